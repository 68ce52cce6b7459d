//! Bit-sizing helpers used when laying out registers and regions

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("A width of {0} bits does not fit in a single bus word")]
    Unsupported(u32),
    #[error("Cannot round zero up to a power of two")]
    Zero,
}

/// The number of bits necessary to store `n`
#[must_use]
pub fn minbits(n: u32) -> u32 {
    u32::BITS - n.leading_zeros()
}

/// Round `n` up to the nearest power of two, leaving powers of two alone
/// # Errors
/// Returns an error if `n` is zero or the result doesn't fit in a `u32`
pub fn round_up_to_pow_2(n: u32) -> Result<u32, Error> {
    if n == 0 {
        return Err(Error::Zero);
    }
    n.checked_next_power_of_two()
        .ok_or(Error::Unsupported(minbits(n) + 1))
}

/// Round a bit width up to the smallest native integer width (8, 16 or 32) that holds it
/// # Errors
/// Returns [`Error::Unsupported`] for widths wider than a bus word
pub fn round_up_to_word(width: u32) -> Result<u32, Error> {
    match width {
        0..=8 => Ok(8),
        9..=16 => Ok(16),
        17..=32 => Ok(32),
        _ => Err(Error::Unsupported(width)),
    }
}

/// A mask covering the low `width` bits of a word
#[must_use]
pub fn width_mask(width: u8) -> u32 {
    match width {
        0 => 0,
        32.. => u32::MAX,
        w => (1 << w) - 1,
    }
}

/// Interpret the low `width` bits of `value` as a two's complement number
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn sign_extend(value: u32, width: u8) -> i32 {
    let mask = width_mask(width);
    if width == 0 || width >= 32 {
        return (value & mask) as i32;
    }
    let sign = 1u32 << (width - 1);
    let value = value & mask;
    (value & !sign) as i32 - (value & sign) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minbits() {
        assert_eq!(minbits(1), 1);
        assert_eq!(minbits(0xF), 4);
        assert_eq!(minbits(0x10), 5);
        assert_eq!(minbits(u32::MAX), 32);
    }

    #[test]
    fn test_pow_2() {
        assert_eq!(round_up_to_pow_2(1), Ok(1));
        assert_eq!(round_up_to_pow_2(20), Ok(32));
        assert_eq!(round_up_to_pow_2(64), Ok(64));
        assert_eq!(round_up_to_pow_2(0), Err(Error::Zero));
        assert!(round_up_to_pow_2(0x8000_0001).is_err());
    }

    #[test]
    fn test_word() {
        assert_eq!(round_up_to_word(1), Ok(8));
        assert_eq!(round_up_to_word(12), Ok(16));
        assert_eq!(round_up_to_word(32), Ok(32));
        assert_eq!(round_up_to_word(33), Err(Error::Unsupported(33)));
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0xF_FFFF, 20), -1);
        assert_eq!(sign_extend(0x8_0000, 20), -(1 << 19));
        assert_eq!(sign_extend(0x7_FFFF, 20), (1 << 19) - 1);
        assert_eq!(sign_extend(0x3_FFFF, 18), -1);
        // Bits above the width are ignored
        assert_eq!(sign_extend(0xFF00_0001, 18), 1);
        assert_eq!(sign_extend(u32::MAX, 32), -1);
    }

    #[test]
    fn test_mask() {
        assert_eq!(width_mask(1), 1);
        assert_eq!(width_mask(20), 0xF_FFFF);
        assert_eq!(width_mask(32), u32::MAX);
    }
}
