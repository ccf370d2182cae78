//! 256-bit EVM words.
//!
//! Integer values of every width in the type taxonomy are carried as a
//! big-endian two's-complement [`Word`]. Signedness is not part of the word;
//! callers pick the signed or unsigned view.

use std::fmt;

use thiserror::Error;

/// Error returned when a decimal integer literal cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WordParseError {
    #[error("empty integer literal")]
    Empty,
    #[error("invalid digit {0:?} in integer literal")]
    InvalidDigit(char),
    #[error("integer literal does not fit in 256 bits")]
    Overflow,
}

/// A 256-bit big-endian two's-complement word.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Word([u8; 32]);

impl Word {
    pub const ZERO: Word = Word([0u8; 32]);
    pub const ONE: Word = {
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        Word(bytes)
    };
    pub const MAX: Word = Word([0xFF; 32]);

    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Word(bytes)
    }

    pub fn to_be_bytes(self) -> [u8; 32] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_u128(value: u128) -> Self {
        let mut bytes = [0u8; 32];
        bytes[16..].copy_from_slice(&value.to_be_bytes());
        Word(bytes)
    }

    pub fn from_i128(value: i128) -> Self {
        let fill = if value < 0 { 0xFF } else { 0x00 };
        let mut bytes = [fill; 32];
        bytes[16..].copy_from_slice(&value.to_be_bytes());
        Word(bytes)
    }

    /// The low 128 bits interpreted as a signed integer, if the word fits.
    pub fn to_i128(self) -> Option<i128> {
        if !self.fits_signed(128) {
            return None;
        }
        let mut low = [0u8; 16];
        low.copy_from_slice(&self.0[16..]);
        Some(i128::from_be_bytes(low))
    }

    /// Whether the sign bit (bit 255) is set.
    pub fn is_negative(&self) -> bool {
        self.0[0] & 0x80 != 0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// `2^bits - 1`. `bits` is clamped to 256.
    pub fn max_unsigned(bits: u16) -> Self {
        let bits = bits.min(256) as usize;
        let mut bytes = [0u8; 32];
        for bit in 0..bits {
            let byte = 31 - bit / 8;
            bytes[byte] |= 1 << (bit % 8);
        }
        Word(bytes)
    }

    /// `2^(bits-1) - 1`.
    pub fn max_signed(bits: u16) -> Self {
        Self::max_unsigned(bits.clamp(1, 256) - 1)
    }

    /// `-(2^(bits-1))`.
    pub fn min_signed(bits: u16) -> Self {
        Self::max_signed(bits).not()
    }

    /// Bitwise complement.
    pub fn not(self) -> Self {
        let mut bytes = self.0;
        for b in bytes.iter_mut() {
            *b = !*b;
        }
        Word(bytes)
    }

    pub fn wrapping_add(self, other: Word) -> Self {
        let mut out = [0u8; 32];
        let mut carry = 0u16;
        for i in (0..32).rev() {
            let sum = self.0[i] as u16 + other.0[i] as u16 + carry;
            out[i] = sum as u8;
            carry = sum >> 8;
        }
        Word(out)
    }

    pub fn wrapping_neg(self) -> Self {
        self.not().wrapping_add(Word::ONE)
    }

    pub fn wrapping_sub(self, other: Word) -> Self {
        self.wrapping_add(other.wrapping_neg())
    }

    /// Whether the unsigned view of the word fits in `bits` bits.
    pub fn fits_unsigned(&self, bits: u16) -> bool {
        let bits = bits.min(256) as usize;
        (bits..256).all(|bit| !self.bit(bit))
    }

    /// Whether the signed view of the word fits in a `bits`-bit signed integer.
    pub fn fits_signed(&self, bits: u16) -> bool {
        let bits = bits.clamp(1, 256) as usize;
        let sign = self.is_negative();
        (bits - 1..256).all(|bit| self.bit(bit) == sign)
    }

    fn bit(&self, bit: usize) -> bool {
        let byte = 31 - bit / 8;
        self.0[byte] & (1 << (bit % 8)) != 0
    }

    /// Unsigned comparison.
    pub fn cmp_unsigned(&self, other: &Word) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }

    /// Signed comparison.
    pub fn cmp_signed(&self, other: &Word) -> std::cmp::Ordering {
        match (self.is_negative(), other.is_negative()) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => self.0.cmp(&other.0),
        }
    }

    /// Decimal rendering of the unsigned view.
    pub fn to_unsigned_string(&self) -> String {
        if self.is_zero() {
            return "0".to_string();
        }
        let mut digits = Vec::with_capacity(78);
        let mut work = self.0;
        while work.iter().any(|b| *b != 0) {
            let mut rem = 0u16;
            for byte in work.iter_mut() {
                let acc = (rem << 8) | *byte as u16;
                *byte = (acc / 10) as u8;
                rem = acc % 10;
            }
            digits.push(b'0' + rem as u8);
        }
        digits.reverse();
        String::from_utf8_lossy(&digits).into_owned()
    }

    /// Decimal rendering of the signed view.
    pub fn to_signed_string(&self) -> String {
        if self.is_negative() {
            format!("-{}", self.wrapping_neg().to_unsigned_string())
        } else {
            self.to_unsigned_string()
        }
    }

    /// Parse a decimal literal with an optional leading `-`.
    ///
    /// Positive literals up to `2^256 - 1` and negative literals down to
    /// `-2^255` are accepted; a negative literal yields the two's-complement
    /// word. Range checks against a concrete type happen afterwards.
    pub fn parse_decimal(literal: &str) -> Result<Self, WordParseError> {
        let (negative, digits) = match literal.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, literal),
        };
        if digits.is_empty() {
            return Err(WordParseError::Empty);
        }
        let mut bytes = [0u8; 32];
        for ch in digits.chars() {
            let digit = ch.to_digit(10).ok_or(WordParseError::InvalidDigit(ch))? as u16;
            let mut carry = digit;
            for byte in bytes.iter_mut().rev() {
                let acc = *byte as u16 * 10 + carry;
                *byte = acc as u8;
                carry = acc >> 8;
            }
            if carry != 0 {
                return Err(WordParseError::Overflow);
            }
        }
        let word = Word(bytes);
        if negative {
            if word.is_negative() && word != Word::min_signed(256) {
                return Err(WordParseError::Overflow);
            }
            Ok(word.wrapping_neg())
        } else {
            Ok(word)
        }
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Word(0x{})", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_roundtrip_extremes() {
        let max = Word::MAX;
        let rendered = max.to_unsigned_string();
        assert_eq!(
            rendered,
            "115792089237316195423570985008687907853269984665640564039457584007913129639935"
        );
        assert_eq!(Word::parse_decimal(&rendered).unwrap(), max);
        assert_eq!(Word::MAX.to_signed_string(), "-1");
    }

    #[test]
    fn test_signed_bounds() {
        assert_eq!(Word::max_signed(8).to_signed_string(), "127");
        assert_eq!(Word::min_signed(8).to_signed_string(), "-128");
        assert_eq!(Word::min_signed(128), Word::from_i128(i128::MIN));
        assert!(Word::from_i128(-128).fits_signed(8));
        assert!(!Word::from_i128(-129).fits_signed(8));
        assert!(!Word::from_i128(128).fits_signed(8));
    }

    #[test]
    fn test_unsigned_bounds() {
        assert_eq!(Word::max_unsigned(8), Word::from_u128(255));
        assert!(Word::from_u128(255).fits_unsigned(8));
        assert!(!Word::from_u128(256).fits_unsigned(8));
        assert!(Word::MAX.fits_unsigned(256));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(Word::parse_decimal(""), Err(WordParseError::Empty));
        assert_eq!(Word::parse_decimal("-"), Err(WordParseError::Empty));
        assert_eq!(
            Word::parse_decimal("12a"),
            Err(WordParseError::InvalidDigit('a'))
        );
        let too_big = format!("{}0", Word::MAX.to_unsigned_string());
        assert_eq!(Word::parse_decimal(&too_big), Err(WordParseError::Overflow));
    }

    #[test]
    fn test_negative_parse() {
        let w = Word::parse_decimal("-42").unwrap();
        assert_eq!(w, Word::from_i128(-42));
        assert_eq!(w.to_i128(), Some(-42));
    }
}
