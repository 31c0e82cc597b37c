//! Iteration over bit masks: single set bits and contiguous runs of set bits.

/// Iterates the indices of the set bits of a mask, lowest first.
#[derive(Clone, Copy, Debug)]
pub struct BitIter(u32);

impl Iterator for BitIter {
    type Item = u32;

    #[inline]
    fn next(&mut self) -> Option<u32> {
        if self.0 == 0 {
            return None;
        }
        let bit = self.0.trailing_zeros();
        self.0 &= self.0 - 1;
        Some(bit)
    }
}

/// Iterates `(first, count)` runs of consecutive set bits, lowest first.
#[derive(Clone, Copy, Debug)]
pub struct BitRangeIter(u32);

impl Iterator for BitRangeIter {
    type Item = (u32, u32);

    #[inline]
    fn next(&mut self) -> Option<(u32, u32)> {
        if self.0 == 0 {
            return None;
        }
        let first = self.0.trailing_zeros();
        let count = (self.0 >> first).trailing_ones();
        // count can be 32 when every bit is set.
        let run = if count >= 32 { u32::MAX } else { ((1u32 << count) - 1) << first };
        self.0 &= !run;
        Some((first, count))
    }
}

#[inline]
pub fn for_each_bit(mask: u32) -> BitIter {
    BitIter(mask)
}

#[inline]
pub fn for_each_bit_range(mask: u32) -> BitRangeIter {
    BitRangeIter(mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visits_each_bit() {
        let bits: Vec<u32> = for_each_bit(0b1010_0101).collect();
        assert_eq!(bits, vec![0, 2, 5, 7]);
        assert_eq!(for_each_bit(0).count(), 0);
        assert_eq!(for_each_bit(1 << 31).collect::<Vec<_>>(), vec![31]);
    }

    #[test]
    fn visits_contiguous_runs() {
        let runs: Vec<(u32, u32)> = for_each_bit_range(0b0111_0011).collect();
        assert_eq!(runs, vec![(0, 2), (4, 3)]);
        assert_eq!(for_each_bit_range(u32::MAX).collect::<Vec<_>>(), vec![(0, 32)]);
        assert_eq!(
            for_each_bit_range(0x8000_0001).collect::<Vec<_>>(),
            vec![(0, 1), (31, 1)]
        );
    }
}
