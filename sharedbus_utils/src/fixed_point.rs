//! Exact conversion between decimal strings and signed fixed-point integers.
//!
//! Control-loop constants are configured as decimal text and handed to the gateware as two's
//! complement integers with a fixed number of fractional bits. Going through `f64` would lose
//! the low bits of wide formats (Q21.43 for example), so both directions work on integers: the
//! decimal fraction is doubled one bit at a time when encoding and the binary fraction is
//! multiplied by ten one digit at a time when decoding. The sign is stripped, the magnitude
//! converted and the sign reapplied.
//!
//! Encoding truncates toward zero. Decoding emits the exact decimal expansion of the binary
//! value with trailing zeros removed, so a decimal string with no trailing zeros that is
//! exactly representable round-trips unchanged.

use nom::{
    branch::alt,
    character::complete::{
        char,
        digit1,
    },
    combinator::{
        all_consuming,
        opt,
    },
    sequence::preceded,
    IResult,
};
use std::fmt::Write;
use thiserror::Error;

/// Largest supported number of fractional bits
pub const MAX_FRACBITS: u32 = 120;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("`{0}` is not a decimal number")]
    Malformed(String),
    #[error("{0} fractional bits exceeds the supported maximum")]
    FracBits(u32),
    #[error("Value does not fit in 128 bits")]
    Overflow,
}

#[derive(Debug, PartialEq, Eq)]
struct Decimal<'a> {
    negative: bool,
    whole: &'a str,
    fraction: &'a str,
}

fn decimal(input: &str) -> IResult<&str, Decimal<'_>> {
    let (input, sign) = opt(alt((char('-'), char('+'))))(input)?;
    let (input, whole) = digit1(input)?;
    let (input, fraction) = opt(preceded(char('.'), digit1))(input)?;
    Ok((
        input,
        Decimal {
            negative: sign == Some('-'),
            whole,
            fraction: fraction.unwrap_or_default(),
        },
    ))
}

/// Convert the decimal fraction `0.<digits>` into `fracbits` bits by repeated doubling. The
/// digits are doubled in place, so any number of them is exact.
fn fraction_bits(digits: &str, fracbits: u32) -> u128 {
    let mut digits: Vec<u8> = digits
        .trim_end_matches('0')
        .bytes()
        .map(|b| b - b'0')
        .collect();
    let mut bits = 0u128;
    for _ in 0..fracbits {
        let mut carry = 0;
        for digit in digits.iter_mut().rev() {
            let doubled = *digit * 2 + carry;
            *digit = doubled % 10;
            carry = doubled / 10;
        }
        bits = (bits << 1) | u128::from(carry);
    }
    bits
}

/// Parse the decimal string `s` into a fixed-point integer with `fracbits` fractional bits
/// # Example
/// ```
/// # use sharedbus_utils::fixed_point::string_to_fixed;
/// assert_eq!(string_to_fixed("-1.5", 4).unwrap(), -24);
/// ```
/// # Errors
/// Returns an error on malformed input, more fractional bits than supported, or a magnitude that
/// doesn't fit
pub fn string_to_fixed(s: &str, fracbits: u32) -> Result<i128, Error> {
    if fracbits > MAX_FRACBITS {
        return Err(Error::FracBits(fracbits));
    }
    let (_, dec) =
        all_consuming(decimal)(s.trim()).map_err(|_| Error::Malformed(s.to_owned()))?;
    let whole: u128 = dec.whole.parse().map_err(|_| Error::Overflow)?;
    // Leave the sign bit free
    if whole >> (127 - fracbits) != 0 {
        return Err(Error::Overflow);
    }
    let magnitude = (whole << fracbits) | fraction_bits(dec.fraction, fracbits);
    let magnitude = i128::try_from(magnitude).map_err(|_| Error::Overflow)?;
    Ok(if dec.negative { -magnitude } else { magnitude })
}

/// Render the fixed-point integer `value` with `fracbits` fractional bits as an exact decimal
/// string
/// # Example
/// ```
/// # use sharedbus_utils::fixed_point::fixed_to_string;
/// assert_eq!(fixed_to_string(-24, 4).unwrap(), "-1.5");
/// ```
/// # Errors
/// Returns an error if `fracbits` is larger than [`MAX_FRACBITS`]
#[allow(clippy::cast_possible_truncation)]
pub fn fixed_to_string(value: i128, fracbits: u32) -> Result<String, Error> {
    if fracbits > MAX_FRACBITS {
        return Err(Error::FracBits(fracbits));
    }
    let magnitude = value.unsigned_abs();
    let mask = (1u128 << fracbits) - 1;
    let mut fraction = magnitude & mask;
    let mut out = String::new();
    if value < 0 {
        out.push('-');
    }
    // Writing to a String is infallible
    let _ = write!(out, "{}", magnitude >> fracbits);
    if fraction != 0 {
        out.push('.');
        while fraction != 0 {
            fraction *= 10;
            // Always a single decimal digit
            out.push(char::from(b'0' + (fraction >> fracbits) as u8));
            fraction &= mask;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decimal_grammar() {
        let (rest, dec) = decimal("-12.50x").unwrap();
        assert_eq!(rest, "x");
        assert_eq!(
            dec,
            Decimal {
                negative: true,
                whole: "12",
                fraction: "50"
            }
        );
        assert!(decimal(".5").is_err());
    }

    #[test]
    fn test_integers() {
        assert_eq!(string_to_fixed("7", 3).unwrap(), 56);
        assert_eq!(string_to_fixed("+7", 0).unwrap(), 7);
        assert_eq!(string_to_fixed("-7", 2).unwrap(), -28);
        assert_eq!(fixed_to_string(56, 3).unwrap(), "7");
    }

    #[test]
    fn test_fractions() {
        assert_eq!(string_to_fixed("1.5", 1).unwrap(), 3);
        assert_eq!(string_to_fixed("0.25", 4).unwrap(), 4);
        // Truncates rather than rounds
        assert_eq!(string_to_fixed("0.9", 1).unwrap(), 1);
        assert_eq!(fixed_to_string(3, 1).unwrap(), "1.5");
        assert_eq!(fixed_to_string(1, 4).unwrap(), "0.0625");
    }

    #[test]
    fn test_negative_fraction() {
        // The whole part alone reads as zero, the sign still has to apply
        assert_eq!(string_to_fixed("-0.5", 8).unwrap(), -128);
        assert_eq!(fixed_to_string(-128, 8).unwrap(), "-0.5");
        assert_eq!(fixed_to_string(-1, 2).unwrap(), "-0.25");
    }

    #[test]
    fn test_control_loop_gain() {
        let fixed = string_to_fixed("0.0006", 43).unwrap();
        assert_eq!(fixed, 5_277_655_813);
        let s = fixed_to_string(fixed, 43).unwrap();
        assert!(s.starts_with("0.00059999999996"));
        // Going back through the string is lossless
        assert_eq!(string_to_fixed(&s, 43).unwrap(), fixed);
    }

    #[test]
    fn test_long_fractions() {
        // Exact at 120 bits, so 120 digits after the point
        let s = fixed_to_string(1, 120).unwrap();
        assert_eq!(s.len(), 122);
        assert_eq!(string_to_fixed(&s, 120).unwrap(), 1);
        // Digits past the precision truncate
        let tiny = format!("0.{}1", "0".repeat(60));
        assert_eq!(string_to_fixed(&tiny, 120).unwrap(), 0);
        assert_eq!(string_to_fixed(&tiny, 8).unwrap(), 0);
        assert_eq!(string_to_fixed("0.99999999999999999999999999999999999999999", 2).unwrap(), 3);
        assert_eq!(string_to_fixed("0.50000000000000000000000000000000000000000000", 1).unwrap(), 1);
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            string_to_fixed("1.2.3", 4),
            Err(Error::Malformed("1.2.3".to_owned()))
        );
        assert!(matches!(string_to_fixed("", 4), Err(Error::Malformed(_))));
        assert!(matches!(string_to_fixed("abc", 4), Err(Error::Malformed(_))));
        assert_eq!(string_to_fixed("1", 121), Err(Error::FracBits(121)));
        assert_eq!(fixed_to_string(1, 121), Err(Error::FracBits(121)));
        assert_eq!(string_to_fixed("256", 120), Err(Error::Overflow));
    }

    proptest! {
        #[test]
        fn prop_round_trip_value(
            value in -(1i128 << 80)..(1i128 << 80),
            fracbits in 0u32..=MAX_FRACBITS,
        ) {
            let s = fixed_to_string(value, fracbits).unwrap();
            prop_assert_eq!(string_to_fixed(&s, fracbits).unwrap(), value);
        }

        #[test]
        fn prop_round_trip_string(whole in 0u32..100_000, halves in 1u32..1024, negative: bool) {
            // Fractions built from ten bits are exact at ten fractional bits
            let value = (i128::from(whole) << 10) | i128::from(halves);
            let value = if negative { -value } else { value };
            let s = fixed_to_string(value, 10).unwrap();
            prop_assert_eq!(fixed_to_string(string_to_fixed(&s, 10).unwrap(), 10).unwrap(), s);
        }
    }
}
