//! Concrete argument values.
//!
//! Values are what the input generator produces and what literals in the
//! structured input carry. Their JSON form is stable so generated inputs can
//! be persisted and replayed later.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use thiserror::Error;

use crate::ty::{VyperType, DECIMAL_PLACES};
use crate::word::{Word, WordParseError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueParseError {
    #[error("invalid hex: {0}")]
    Hex(String),
    #[error("address must be 20 bytes, got {0}")]
    AddressLength(usize),
    #[error("invalid decimal literal `{0}`")]
    Decimal(String),
    #[error(transparent)]
    Integer(#[from] WordParseError),
}

fn decode_hex(s: &str) -> Result<Vec<u8>, ValueParseError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map_err(|e| ValueParseError::Hex(e.to_string()))
}

// ---- Byte strings ----

/// Raw bytes serialized as `0x`-prefixed lowercase hex.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct HexBytes(pub Vec<u8>);

impl HexBytes {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for HexBytes {
    fn from(bytes: Vec<u8>) -> Self {
        HexBytes(bytes)
    }
}

impl fmt::Display for HexBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

impl fmt::Debug for HexBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HexBytes({self})")
    }
}

impl FromStr for HexBytes {
    type Err = ValueParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_hex(s).map(HexBytes)
    }
}

impl Serialize for HexBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HexBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---- Addresses ----

/// A 20-byte account address, displayed with an EIP-55 checksum.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    /// EIP-55 mixed-case checksum encoding.
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = Keccak256::digest(lower.as_bytes());
        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, ch) in lower.chars().enumerate() {
            let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0F;
            if ch.is_ascii_alphabetic() && nibble >= 8 {
                out.push(ch.to_ascii_uppercase());
            } else {
                out.push(ch);
            }
        }
        out
    }

    /// Left-padded 32-byte word.
    pub fn to_word(&self) -> Word {
        let mut bytes = [0u8; 32];
        bytes[12..].copy_from_slice(&self.0);
        Word::from_be_bytes(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = ValueParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_hex(s)?;
        let arr: [u8; 20] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ValueParseError::AddressLength(bytes.len()))?;
        Ok(Address(arr))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---- Decimals ----

/// Fixed-point decimal stored as an integer scaled by `10^10`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Decimal(pub i128);

impl Decimal {
    pub const SCALE: i128 = 10_000_000_000;
    pub const MIN: Decimal = Decimal(i128::MIN);
    pub const MAX: Decimal = Decimal(i128::MAX);

    pub fn from_units(units: i128) -> Self {
        Decimal(units)
    }

    pub fn units(&self) -> i128 {
        self.0
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let magnitude = self.0.unsigned_abs();
        let scale = Self::SCALE as u128;
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(
            f,
            "{sign}{}.{:0width$}",
            magnitude / scale,
            magnitude % scale,
            width = DECIMAL_PLACES as usize
        )
    }
}

impl fmt::Debug for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Decimal({self})")
    }
}

impl FromStr for Decimal {
    type Err = ValueParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValueParseError::Decimal(s.to_string());
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (whole, frac) = body.split_once('.').unwrap_or((body, ""));
        if whole.is_empty()
            || frac.len() > DECIMAL_PLACES as usize
            || !whole.bytes().all(|b| b.is_ascii_digit())
            || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }
        let whole: u128 = whole.parse().map_err(|_| invalid())?;
        let frac_units: u128 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{frac:0<width$}", width = DECIMAL_PLACES as usize);
            padded.parse().map_err(|_| invalid())?
        };
        let magnitude = whole
            .checked_mul(Self::SCALE as u128)
            .and_then(|w| w.checked_add(frac_units))
            .ok_or_else(invalid)?;
        let units = if negative {
            if magnitude > i128::MAX as u128 + 1 {
                return Err(invalid());
            }
            (magnitude as i128).wrapping_neg()
        } else {
            i128::try_from(magnitude).map_err(|_| invalid())?
        };
        Ok(Decimal(units))
    }
}

impl Serialize for Decimal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Decimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---- Values ----

mod unsigned_word {
    use super::Word;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(word: &Word, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&word.to_unsigned_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Word, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.starts_with('-') {
            return Err(serde::de::Error::custom("unsigned integer cannot be negative"));
        }
        Word::parse_decimal(&s).map_err(serde::de::Error::custom)
    }
}

mod signed_word {
    use super::Word;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(word: &Word, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&word.to_signed_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Word, D::Error> {
        let s = String::deserialize(deserializer)?;
        let word = Word::parse_decimal(&s).map_err(serde::de::Error::custom)?;
        if !s.starts_with('-') && word.is_negative() {
            return Err(serde::de::Error::custom("signed integer exceeds int256"));
        }
        Ok(word)
    }
}

/// A concrete value of some [`VyperType`].
///
/// Integers are serialized as decimal strings so 256-bit values survive
/// JSON consumers that only have doubles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Uint(#[serde(with = "unsigned_word")] Word),
    Int(#[serde(with = "signed_word")] Word),
    Address(Address),
    Decimal(Decimal),
    /// Both `bytesM` and `Bytes[N]`.
    Bytes(HexBytes),
    String(String),
    /// Both static and dynamic arrays.
    Array(Vec<Value>),
    Struct(Vec<Value>),
}

impl Value {
    pub fn uint(v: u128) -> Self {
        Value::Uint(Word::from_u128(v))
    }

    pub fn int(v: i128) -> Self {
        Value::Int(Word::from_i128(v))
    }

    /// Whether this value lies in the value domain of `ty`.
    pub fn conforms_to(&self, ty: &VyperType) -> bool {
        match (self, ty) {
            (Value::Bool(_), VyperType::Bool) => true,
            (Value::Uint(w), VyperType::Uint { bits }) => w.fits_unsigned(*bits),
            (Value::Int(w), VyperType::Int { bits }) => w.fits_signed(*bits),
            (Value::Address(_), VyperType::Address) => true,
            (Value::Decimal(_), VyperType::Decimal) => true,
            (Value::Bytes(b), VyperType::BytesM { m }) => b.len() == *m as usize,
            (Value::Bytes(b), VyperType::Bytes { max_len }) => b.len() <= *max_len as usize,
            (Value::String(s), VyperType::String { max_len }) => {
                s.is_ascii() && s.len() <= *max_len as usize
            }
            (Value::Array(items), VyperType::DynArray { elem, max_len }) => {
                items.len() <= *max_len as usize && items.iter().all(|v| v.conforms_to(elem))
            }
            (Value::Array(items), VyperType::Array { elem, len }) => {
                items.len() == *len as usize && items.iter().all(|v| v.conforms_to(elem))
            }
            (Value::Struct(values), VyperType::Struct { fields }) => {
                values.len() == fields.len()
                    && values.iter().zip(fields).all(|(v, t)| v.conforms_to(t))
            }
            _ => false,
        }
    }

    /// Short kind name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Uint(_) => "uint",
            Value::Int(_) => "int",
            Value::Address(_) => "address",
            Value::Decimal(_) => "decimal",
            Value::Bytes(_) => "bytes",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Struct(_) => "struct",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Uint(w) => f.write_str(&w.to_unsigned_string()),
            Value::Int(w) => f.write_str(&w.to_signed_string()),
            Value::Address(a) => write!(f, "{a}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Bytes(b) => write!(f, "{b}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Array(items) | Value::Struct(items) => {
                let open = if matches!(self, Value::Array(_)) { '[' } else { '(' };
                let close = if open == '[' { ']' } else { ')' };
                write!(f, "{open}")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "{close}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_known_vector() {
        // EIP-55 reference vector
        let addr: Address = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".parse().unwrap();
        assert_eq!(
            addr.to_checksum(),
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        );
    }

    #[test]
    fn test_decimal_display_and_parse() {
        let d: Decimal = "-1.5".parse().unwrap();
        assert_eq!(d.units(), -15_000_000_000);
        assert_eq!(d.to_string(), "-1.5000000000");
        assert_eq!(Decimal::MIN.to_string().parse::<Decimal>().unwrap(), Decimal::MIN);
        assert_eq!(Decimal::MAX.to_string().parse::<Decimal>().unwrap(), Decimal::MAX);
        assert!("1.12345678901".parse::<Decimal>().is_err());
        assert!(".5".parse::<Decimal>().is_err());
    }

    #[test]
    fn test_value_json_shape() {
        let v = Value::Array(vec![Value::uint(7), Value::int(-3), Value::Bool(true)]);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"array": [{"uint": "7"}, {"int": "-3"}, {"bool": true}]})
        );
        let back: Value = serde_json::from_value(json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_unsigned_rejects_negative() {
        let json = serde_json::json!({"uint": "-1"});
        assert!(serde_json::from_value::<Value>(json).is_err());
    }

    #[test]
    fn test_conforms_to_bounds() {
        assert!(Value::uint(255).conforms_to(&VyperType::Uint { bits: 8 }));
        assert!(!Value::uint(256).conforms_to(&VyperType::Uint { bits: 8 }));
        assert!(Value::int(-128).conforms_to(&VyperType::Int { bits: 8 }));
        assert!(!Value::int(-129).conforms_to(&VyperType::Int { bits: 8 }));
        assert!(!Value::Bool(true).conforms_to(&VyperType::uint256()));
        let b32 = Value::Bytes(HexBytes(vec![0u8; 32]));
        assert!(b32.conforms_to(&VyperType::BytesM { m: 32 }));
        assert!(!b32.conforms_to(&VyperType::BytesM { m: 31 }));
        assert!(b32.conforms_to(&VyperType::Bytes { max_len: 40 }));
        let arr = Value::Array(vec![Value::Bool(false); 3]);
        assert!(arr.conforms_to(&VyperType::Array {
            elem: Box::new(VyperType::Bool),
            len: 3
        }));
        assert!(!arr.conforms_to(&VyperType::DynArray {
            elem: Box::new(VyperType::Bool),
            max_len: 2
        }));
    }
}
