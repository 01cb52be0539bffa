//! Fixed-width base-30 codec.
//!
//! The alphabet is the ten decimal digits followed by twenty upper-case
//! consonants. Vowels are excluded, so `I`, `O` and `U` never appear next to
//! `1`, `0` and `V`, and no encoded value can spell a word.
//!
//! Digit values below ten map to their decimal symbol, which keeps small
//! values readable: `encode(5, 6, '0')` is `"000005"`. The alphabet is in
//! ASCII order, so zero-padded encodings sort the same way as their values.

/// Number of symbols in the alphabet.
pub const RADIX: u64 = 30;

/// Encoding alphabet, indexed by digit value.
pub const ALPHABET: &[u8; 30] = b"0123456789BCDFGHJKLMNPQRSTVWXZ";

/// Symbol for digit value zero.
pub const ZERO_SYMBOL: char = '0';

const NO_VALUE: u8 = 255;

/// Lookup table for decoding, accepts lower-case letters.
const LOOKUP: [u8; 256] = {
    let mut lut = [NO_VALUE; 256];
    let mut i = 0_u8;
    while i < 30 {
        let c = ALPHABET[i as usize];
        lut[c as usize] = i;
        if c.is_ascii_uppercase() {
            lut[(c + 32) as usize] = i;
        }
        i += 1;
    }
    lut
};

/// Largest value that fits in `width` base-30 digits.
///
/// Returns `None` when `30^width` exceeds `u64`, i.e. every `u64` fits.
#[must_use]
pub fn max_for_width(width: usize) -> Option<u64> {
    let width = u32::try_from(width).ok()?;
    RADIX.checked_pow(width).map(|capacity| capacity - 1)
}

/// Encode `value` as exactly `width` base-30 symbols, left-padded with `pad`.
///
/// # Errors
///
/// Returns [`EncodingError::OutOfRange`] if `value > 30^width - 1`,
/// [`EncodingError::ZeroWidth`] for a zero width, and
/// [`EncodingError::InvalidPad`] if `pad` would make the output ambiguous.
///
/// # Examples
///
/// ```
/// use docid_core::base30::encode;
///
/// assert_eq!(encode(5, 6, '0').unwrap(), "000005");
/// assert_eq!(encode(30, 6, '0').unwrap(), "000010");
/// assert_eq!(encode(29, 3, '-').unwrap(), "--Z");
/// ```
pub fn encode(value: u64, width: usize, pad: char) -> Result<String, EncodingError> {
    check_pad(pad)?;
    if width == 0 {
        return Err(EncodingError::ZeroWidth);
    }
    if let Some(max) = max_for_width(width) {
        if value > max {
            return Err(EncodingError::OutOfRange { value, width, max });
        }
    }

    let mut digits = Vec::with_capacity(width);
    let mut remaining = value;
    loop {
        digits.push(symbol(remaining % RADIX));
        remaining /= RADIX;
        if remaining == 0 {
            break;
        }
    }

    let mut encoded = String::with_capacity(width);
    for _ in digits.len()..width {
        encoded.push(pad);
    }
    encoded.extend(digits.iter().rev());
    Ok(encoded)
}

/// Decode a base-30 string produced by [`encode`] with the same `pad`.
///
/// # Errors
///
/// Returns error if the input is empty, contains a symbol outside the
/// alphabet, or overflows `u64`.
///
/// # Examples
///
/// ```
/// use docid_core::base30::{decode, encode};
///
/// let encoded = encode(728_999_999, 6, '0').unwrap();
/// assert_eq!(encoded, "ZZZZZZ");
/// assert_eq!(decode(&encoded, '0').unwrap(), 728_999_999);
/// ```
pub fn decode(encoded: &str, pad: char) -> Result<u64, EncodingError> {
    check_pad(pad)?;

    let digits = if pad == ZERO_SYMBOL {
        encoded
    } else {
        encoded.trim_start_matches(pad)
    };
    if digits.is_empty() {
        return Err(EncodingError::Empty);
    }

    let offset = encoded.len() - digits.len();
    let mut acc = 0_u64;
    for (index, byte) in digits.bytes().enumerate() {
        let value = LOOKUP[usize::from(byte)];
        if value == NO_VALUE {
            return Err(EncodingError::InvalidSymbol {
                symbol: char::from(byte),
                index: offset + index,
            });
        }
        acc = acc
            .checked_mul(RADIX)
            .and_then(|shifted| shifted.checked_add(u64::from(value)))
            .ok_or(EncodingError::Overflow)?;
    }

    Ok(acc)
}

#[allow(clippy::cast_possible_truncation)]
fn symbol(digit: u64) -> char {
    char::from(ALPHABET[digit as usize])
}

/// A pad must be a printable ASCII character that is either the zero symbol
/// or outside the alphabet.
fn check_pad(pad: char) -> Result<(), EncodingError> {
    let in_alphabet = u8::try_from(pad)
        .map(|byte| LOOKUP[usize::from(byte)] != NO_VALUE)
        .unwrap_or(false);
    if !pad.is_ascii_graphic() || (in_alphabet && pad != ZERO_SYMBOL) {
        return Err(EncodingError::InvalidPad(pad));
    }
    Ok(())
}

/// Errors from base-30 encoding and decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    /// Value does not fit in the requested width
    #[error("value {value} does not fit in {width} base-30 digits (max {max})")]
    OutOfRange {
        /// Value that was rejected
        value: u64,
        /// Requested width
        width: usize,
        /// Largest value for that width
        max: u64,
    },
    /// Width of zero digits requested
    #[error("width must be at least one digit")]
    ZeroWidth,
    /// Pad character would collide with a digit
    #[error("pad character {0:?} is not usable")]
    InvalidPad(char),
    /// Nothing to decode
    #[error("empty base-30 input")]
    Empty,
    /// Character outside the alphabet
    #[error("invalid base-30 symbol {symbol:?} at index {index}")]
    InvalidSymbol {
        /// Offending character
        symbol: char,
        /// Byte offset in the input
        index: usize,
    },
    /// Decoded value exceeds `u64`
    #[error("decoded value overflows u64")]
    Overflow,
}
