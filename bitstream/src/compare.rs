//! Bit-range comparison between two encoded buffers.

use crate::reader::load_bits;

/// Returns `true` if `bits` bits starting at `a_start` in `a` equal the
/// `bits` bits starting at `b_start` in `b`.
///
/// The two ranges may sit at different bit offsets. Returns `false` when
/// either range falls outside its buffer.
pub fn bit_ranges_equal(a: &[u8], a_start: usize, b: &[u8], b_start: usize, bits: usize) -> bool {
    let (Some(a_end), Some(b_end)) = (a_start.checked_add(bits), b_start.checked_add(bits)) else {
        return false;
    };
    if a_end > a.len() * 8 || b_end > b.len() * 8 {
        return false;
    }
    if a_start % 8 == 0 && b_start % 8 == 0 {
        let whole = bits / 8;
        let (a_from, b_from) = (a_start / 8, b_start / 8);
        if a[a_from..a_from + whole] != b[b_from..b_from + whole] {
            return false;
        }
        let tail = bits % 8;
        return tail == 0
            || load_bits(a, a_end - tail, tail) == load_bits(b, b_end - tail, tail);
    }
    let mut done = 0;
    while done < bits {
        let take = (bits - done).min(64);
        if load_bits(a, a_start + done, take) != load_bits(b, b_start + done, take) {
            return false;
        }
        done += take;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_ranges_same_offset() {
        let a = [0b1010_1100, 0xFF, 0b0110_0000];
        let b = [0b0010_1100, 0xFF, 0b0111_1111];
        assert!(bit_ranges_equal(&a, 1, &b, 1, 18));
        assert!(!bit_ranges_equal(&a, 0, &b, 0, 19));
        assert!(!bit_ranges_equal(&a, 1, &b, 1, 19));
    }

    #[test]
    fn equal_ranges_shifted() {
        let a = [0b1011_0000];
        let b = [0b0001_0110];
        assert!(bit_ranges_equal(&a, 0, &b, 3, 4));
        assert!(!bit_ranges_equal(&a, 0, &b, 2, 4));
    }

    #[test]
    fn aligned_with_tail() {
        let a = [0xAB, 0b1100_0000];
        let b = [0x00, 0xAB, 0b1101_0000];
        assert!(bit_ranges_equal(&a, 0, &b, 8, 11));
        assert!(!bit_ranges_equal(&a, 0, &b, 8, 12));
    }

    #[test]
    fn empty_range_is_equal() {
        assert!(bit_ranges_equal(&[1], 3, &[2], 3, 0));
    }

    #[test]
    fn out_of_bounds_is_unequal() {
        assert!(!bit_ranges_equal(&[0], 0, &[0, 0], 0, 9));
        assert!(!bit_ranges_equal(&[0], usize::MAX, &[0], 0, 1));
    }
}
