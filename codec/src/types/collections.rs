//! Codec implementations for length-prefixed collections.
//!
//! Ordered collections are encoded in ascending key order and decoding rejects any other order,
//! so each value has exactly one valid encoding.

use crate::{varint, EncodeSize, Error, RangeCfg, Read, Write};
use bytes::{Buf, BufMut};
use std::collections::{BTreeMap, BTreeSet};

fn read_len(buf: &mut impl Buf, range: &RangeCfg) -> Result<usize, Error> {
    let len = varint::read_len(buf)?;
    if !range.contains(len) {
        return Err(Error::InvalidLength(len));
    }
    Ok(len)
}

impl<T: Write> Write for Vec<T> {
    #[inline]
    fn write(&self, buf: &mut impl BufMut) {
        varint::write_len(self.len(), buf);
        for item in self {
            item.write(buf);
        }
    }
}

impl<T: EncodeSize> EncodeSize for Vec<T> {
    #[inline]
    fn encode_size(&self) -> usize {
        varint::len_size(self.len()) + self.iter().map(EncodeSize::encode_size).sum::<usize>()
    }
}

impl<T: Read> Read for Vec<T> {
    type Cfg = (RangeCfg, T::Cfg);

    fn read_cfg(buf: &mut impl Buf, (range, cfg): &Self::Cfg) -> Result<Self, Error> {
        let len = read_len(buf, range)?;
        // Cap the preallocation by what the buffer could possibly hold.
        let mut vec = Vec::with_capacity(len.min(buf.remaining()));
        for _ in 0..len {
            vec.push(T::read_cfg(buf, cfg)?);
        }
        Ok(vec)
    }
}

impl<T: Write> Write for BTreeSet<T> {
    fn write(&self, buf: &mut impl BufMut) {
        varint::write_len(self.len(), buf);
        for item in self {
            item.write(buf);
        }
    }
}

impl<T: EncodeSize> EncodeSize for BTreeSet<T> {
    fn encode_size(&self) -> usize {
        varint::len_size(self.len()) + self.iter().map(EncodeSize::encode_size).sum::<usize>()
    }
}

impl<T: Read + Ord> Read for BTreeSet<T> {
    type Cfg = (RangeCfg, T::Cfg);

    fn read_cfg(buf: &mut impl Buf, (range, cfg): &Self::Cfg) -> Result<Self, Error> {
        let len = read_len(buf, range)?;
        let mut set = BTreeSet::new();
        for _ in 0..len {
            let item = T::read_cfg(buf, cfg)?;
            if let Some(last) = set.last() {
                if &item <= last {
                    return Err(Error::Invalid("BTreeSet", "items not ascending"));
                }
            }
            set.insert(item);
        }
        Ok(set)
    }
}

impl<K: Write, V: Write> Write for BTreeMap<K, V> {
    fn write(&self, buf: &mut impl BufMut) {
        varint::write_len(self.len(), buf);
        for (k, v) in self {
            k.write(buf);
            v.write(buf);
        }
    }
}

impl<K: EncodeSize, V: EncodeSize> EncodeSize for BTreeMap<K, V> {
    fn encode_size(&self) -> usize {
        varint::len_size(self.len())
            + self
                .iter()
                .map(|(k, v)| k.encode_size() + v.encode_size())
                .sum::<usize>()
    }
}

impl<K: Read + Ord, V: Read> Read for BTreeMap<K, V> {
    type Cfg = (RangeCfg, (K::Cfg, V::Cfg));

    fn read_cfg(buf: &mut impl Buf, (range, (k_cfg, v_cfg)): &Self::Cfg) -> Result<Self, Error> {
        let len = read_len(buf, range)?;
        let mut map = BTreeMap::new();
        for _ in 0..len {
            let key = K::read_cfg(buf, k_cfg)?;
            if let Some((last, _)) = map.last_key_value() {
                if &key <= last {
                    return Err(Error::Invalid("BTreeMap", "keys not ascending"));
                }
            }
            let value = V::read_cfg(buf, v_cfg)?;
            map.insert(key, value);
        }
        Ok(map)
    }
}
