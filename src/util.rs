/// Serial Number Arithmetic (RFC 1982)
#[inline]
pub(crate) fn sna32lt(i1: u32, i2: u32) -> bool {
    (i1 < i2 && i2 - i1 < 1 << 31) || (i1 > i2 && i1 - i2 > 1 << 31)
}

#[inline]
pub(crate) fn sna32lte(i1: u32, i2: u32) -> bool {
    i1 == i2 || sna32lt(i1, i2)
}

#[inline]
pub(crate) fn sna32gt(i1: u32, i2: u32) -> bool {
    (i1 < i2 && (i2 - i1) >= 1 << 31) || (i1 > i2 && (i1 - i2) <= 1 << 31)
}

#[inline]
pub(crate) fn sna32gte(i1: u32, i2: u32) -> bool {
    i1 == i2 || sna32gt(i1, i2)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_serial_number_arithmetic32bit() {
        const DIV: u32 = 16;
        const SERIAL_BITS: u32 = 32;
        const INTERVAL: u32 = ((1u64 << (SERIAL_BITS as u64)) / (DIV as u64)) as u32;
        const MAX_FORWARD_DISTANCE: u32 = 1 << (SERIAL_BITS - 1);
        const MAX_BACKWARD_DISTANCE: u32 = 1 << (SERIAL_BITS - 1);

        for i in 0..DIV {
            let s1 = i * INTERVAL;
            let s2f = s1.checked_add(MAX_FORWARD_DISTANCE - 1);
            let s2b = s1.checked_add(MAX_BACKWARD_DISTANCE);

            if let (Some(s2f), Some(s2b)) = (s2f, s2b) {
                assert!(sna32lt(s1, s2f), "s1 < s2 should be true: s1={s1} s2={s2f}");
                assert!(!sna32lt(s2b, s1), "s2 < s1 should be false: s1={s1} s2={s2b}");
                assert!(!sna32gt(s1, s2f), "s1 > s2 should be false: s1={s1} s2={s2f}");
                assert!(sna32gt(s2b, s1), "s2 > s1 should be true: s1={s1} s2={s2b}");
                assert!(sna32lte(s1, s2f), "s1 <= s2 should be true: s1={s1} s2={s2f}");
                assert!(sna32gte(s2b, s1), "s2 >= s1 should be true: s1={s1} s2={s2b}");
            }
        }
    }

    #[test]
    fn test_serial_number_wraps_around() {
        assert!(sna32lt(u32::MAX, 0), "0 follows u32::MAX");
        assert!(sna32gt(0, u32::MAX), "0 follows u32::MAX");
        assert!(sna32lte(5, 5));
        assert!(sna32gte(5, 5));
    }
}
