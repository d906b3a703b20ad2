use std::ops::{Bound, Range, RangeBounds};

/// Clip a range to the given upper-bound.
#[inline]
fn clip_range(r: impl RangeBounds<usize>, upper: usize) -> Range<usize> {
    let start = match r.start_bound() {
        Bound::Included(&s) => s,
        Bound::Excluded(&s) => s + 1,
        Bound::Unbounded => 0,
    };
    let end = match r.end_bound() {
        Bound::Included(&e) => e + 1,
        Bound::Excluded(&e) => e,
        Bound::Unbounded => upper,
    };

    start..end
}

/// A slicable memory area, local or remote.
///
/// Slicing never touches memory; it only narrows the `(addr, len)` window
/// while keeping the access key.
#[allow(clippy::len_without_is_empty)]
pub trait Slicing {
    type Output;

    /// Get the starting address of the memory area.
    fn addr(&self) -> u64;

    /// Get the length of the memory area.
    fn len(&self) -> usize;

    /// Build a slice whose bounds were already checked by the caller.
    #[doc(hidden)]
    fn slice_checked(&self, offset: usize, len: usize) -> Self::Output;

    /// Get a slice that represents the entire memory area.
    fn as_slice(&self) -> Self::Output {
        self.slice_checked(0, self.len())
    }

    /// Get a slice from an offset and a length.
    /// Return `None` if the range is out of bounds.
    fn slice(&self, offset: usize, len: usize) -> Option<Self::Output> {
        if offset <= self.len() && len <= self.len() - offset {
            Some(self.slice_checked(offset, len))
        } else {
            None
        }
    }

    /// Get a slice from a range.
    /// Return `None` if the range is out of bounds.
    fn slice_by_range(&self, range: impl RangeBounds<usize>) -> Option<Self::Output> {
        let r = clip_range(range, self.len());
        if r.start > r.end {
            return None;
        }
        self.slice(r.start, r.end - r.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_range() {
        assert_eq!(clip_range(.., 10), 0..10);
        assert_eq!(clip_range(2..=4, 10), 2..5);
        assert_eq!(clip_range(3.., 10), 3..10);
        assert_eq!(clip_range(..7, 10), 0..7);
    }
}
