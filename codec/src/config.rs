//! Length limits used as [crate::Read::Cfg].

use core::ops::{Bound, RangeBounds};

/// Limits the number of items (or bytes) a variable-length value may decode to.
///
/// Untrusted input must never be able to request an unbounded allocation, so every collection
/// read is bounded by one of these.
///
/// ```
/// use ratify_codec::RangeCfg;
///
/// let cfg = RangeCfg::from(0..=1024);
/// assert!(cfg.contains(500));
/// assert!(!cfg.contains(2000));
///
/// let cfg = RangeCfg::from(1..);
/// assert!(!cfg.contains(0));
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct RangeCfg {
    start: Bound<usize>,
    end: Bound<usize>,
}

impl RangeCfg {
    /// Creates a new [RangeCfg] from any range of lengths.
    pub fn new(r: impl RangeBounds<usize>) -> Self {
        Self {
            start: r.start_bound().cloned(),
            end: r.end_bound().cloned(),
        }
    }

    /// Accepts exactly `len`.
    pub fn exact(len: usize) -> Self {
        Self {
            start: Bound::Included(len),
            end: Bound::Included(len),
        }
    }

    /// Returns true if `len` is within this range.
    pub fn contains(&self, len: usize) -> bool {
        let above_start = match self.start {
            Bound::Included(s) => len >= s,
            Bound::Excluded(s) => len > s,
            Bound::Unbounded => true,
        };
        let below_end = match self.end {
            Bound::Included(e) => len <= e,
            Bound::Excluded(e) => len < e,
            Bound::Unbounded => true,
        };
        above_start && below_end
    }
}

macro_rules! impl_from_range {
    ($($range:ty),*) => {
        $(
            impl From<$range> for RangeCfg {
                fn from(r: $range) -> Self {
                    Self::new(r)
                }
            }
        )*
    };
}

impl_from_range!(
    core::ops::Range<usize>,
    core::ops::RangeInclusive<usize>,
    core::ops::RangeFrom<usize>,
    core::ops::RangeTo<usize>,
    core::ops::RangeToInclusive<usize>,
    core::ops::RangeFull
);
