//! Codec implementations for tuples.

use crate::{EncodeSize, Error, Read, Write};
use bytes::{Buf, BufMut};

macro_rules! impl_tuple {
    ($($name:ident $idx:tt),+) => {
        impl<$($name: Write),+> Write for ($($name,)+) {
            #[inline]
            fn write(&self, buf: &mut impl BufMut) {
                $(self.$idx.write(buf);)+
            }
        }

        impl<$($name: EncodeSize),+> EncodeSize for ($($name,)+) {
            #[inline]
            fn encode_size(&self) -> usize {
                0 $(+ self.$idx.encode_size())+
            }
        }

        impl<$($name: Read),+> Read for ($($name,)+) {
            type Cfg = ($($name::Cfg,)+);

            #[inline]
            fn read_cfg(buf: &mut impl Buf, cfg: &Self::Cfg) -> Result<Self, Error> {
                Ok(($($name::read_cfg(buf, &cfg.$idx)?,)+))
            }
        }
    };
}

impl_tuple!(A 0, B 1);
impl_tuple!(A 0, B 1, C 2);

#[cfg(test)]
mod tests {
    use crate::{Decode, Encode};

    #[test]
    fn test_tuple() {
        let value = (1u8, 2u64, true);
        let encoded = value.encode();
        assert_eq!(encoded.len(), 1 + 8 + 1);
        assert_eq!(<(u8, u64, bool)>::decode_cfg(encoded, &((), (), ())).unwrap(), value);
    }
}
