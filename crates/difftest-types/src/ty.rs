//! Declared parameter types of synthesized contracts.
//!
//! [`VyperType`] is the finite type taxonomy shared by the synthesizer, the
//! input generator and the runners. [`TypeMap`] is the versioned wire form
//! used to hand parameter-type lists from the compile stage to the runners.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A type descriptor the harness cannot handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported type `{descriptor}`: {reason}")]
pub struct UnsupportedTypeError {
    pub descriptor: String,
    pub reason: String,
}

impl UnsupportedTypeError {
    pub fn new(descriptor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            reason: reason.into(),
        }
    }
}

/// Declared type of a parameter, local, storage variable or return value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VyperType {
    Bool,
    Uint {
        bits: u16,
    },
    Int {
        bits: u16,
    },
    Address,
    /// Fixed point with 10 fractional digits.
    Decimal,
    /// `bytes1` .. `bytes32`.
    BytesM {
        m: u8,
    },
    /// `Bytes[max_len]`.
    Bytes {
        max_len: u32,
    },
    /// `String[max_len]`.
    String {
        max_len: u32,
    },
    /// `DynArray[elem, max_len]`.
    DynArray {
        elem: Box<VyperType>,
        max_len: u32,
    },
    /// `elem[len]`.
    Array {
        elem: Box<VyperType>,
        len: u32,
    },
    Struct {
        fields: Vec<VyperType>,
    },
}

pub const DECIMAL_PLACES: u32 = 10;

/// Most scalar slots one value may occupy once fixed-size arrays are
/// expanded, counted across nesting.
pub const MAX_FIXED_ELEMENTS: u64 = 4096;

impl VyperType {
    pub fn uint256() -> Self {
        VyperType::Uint { bits: 256 }
    }

    pub fn int128() -> Self {
        VyperType::Int { bits: 128 }
    }

    /// Check that widths and lengths are inside the supported domain and
    /// that fixed-size arrays stay within [`MAX_FIXED_ELEMENTS`].
    pub fn validate(&self) -> Result<(), UnsupportedTypeError> {
        self.check_shape()?;
        let elements = self.fixed_elements();
        if elements > MAX_FIXED_ELEMENTS {
            return Err(UnsupportedTypeError::new(
                self.to_string(),
                format!("expands to {elements} elements, limit is {MAX_FIXED_ELEMENTS}"),
            ));
        }
        Ok(())
    }

    /// Scalar slots of one value with fixed arrays expanded. Dynamic
    /// arrays count one element; their generated length is capped
    /// separately.
    pub fn fixed_elements(&self) -> u64 {
        match self {
            VyperType::Array { elem, len } => elem.fixed_elements().saturating_mul(u64::from(*len)),
            VyperType::DynArray { elem, .. } => elem.fixed_elements(),
            VyperType::Struct { fields } => fields
                .iter()
                .fold(0u64, |acc, f| acc.saturating_add(f.fixed_elements())),
            _ => 1,
        }
    }

    fn check_shape(&self) -> Result<(), UnsupportedTypeError> {
        match self {
            VyperType::Bool | VyperType::Address | VyperType::Decimal => Ok(()),
            VyperType::Uint { bits } | VyperType::Int { bits } => {
                if *bits == 0 || *bits > 256 || bits % 8 != 0 {
                    Err(UnsupportedTypeError::new(
                        self.to_string(),
                        "integer width must be a multiple of 8 in 8..=256",
                    ))
                } else {
                    Ok(())
                }
            }
            VyperType::BytesM { m } => {
                if *m == 0 || *m > 32 {
                    Err(UnsupportedTypeError::new(
                        self.to_string(),
                        "fixed bytes width must be in 1..=32",
                    ))
                } else {
                    Ok(())
                }
            }
            VyperType::Bytes { max_len } | VyperType::String { max_len } => {
                if *max_len == 0 {
                    Err(UnsupportedTypeError::new(
                        self.to_string(),
                        "maximum length must be positive",
                    ))
                } else {
                    Ok(())
                }
            }
            VyperType::DynArray { elem, max_len } => {
                if *max_len == 0 {
                    return Err(UnsupportedTypeError::new(
                        self.to_string(),
                        "maximum length must be positive",
                    ));
                }
                elem.check_shape()
            }
            VyperType::Array { elem, len } => {
                if *len == 0 {
                    return Err(UnsupportedTypeError::new(
                        self.to_string(),
                        "array length must be positive",
                    ));
                }
                elem.check_shape()
            }
            VyperType::Struct { fields } => {
                if fields.is_empty() {
                    return Err(UnsupportedTypeError::new(
                        self.to_string(),
                        "struct must declare at least one field",
                    ));
                }
                fields.iter().try_for_each(VyperType::check_shape)
            }
        }
    }

    /// Whether the ABI encoding of this type has a tail section.
    pub fn is_dynamic(&self) -> bool {
        match self {
            VyperType::Bytes { .. } | VyperType::String { .. } | VyperType::DynArray { .. } => {
                true
            }
            VyperType::Array { elem, .. } => elem.is_dynamic(),
            VyperType::Struct { fields } => fields.iter().any(VyperType::is_dynamic),
            _ => false,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            VyperType::Uint { .. } | VyperType::Int { .. } | VyperType::Decimal
        )
    }

    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            VyperType::DynArray { .. } | VyperType::Array { .. } | VyperType::Struct { .. }
        )
    }

    /// Canonical ABI type string (`uint256`, `(bool,address)[2]`, ...).
    pub fn abi_type(&self) -> String {
        match self {
            VyperType::Bool => "bool".to_string(),
            VyperType::Uint { bits } => format!("uint{bits}"),
            VyperType::Int { bits } => format!("int{bits}"),
            VyperType::Address => "address".to_string(),
            VyperType::Decimal => "fixed168x10".to_string(),
            VyperType::BytesM { m } => format!("bytes{m}"),
            VyperType::Bytes { .. } => "bytes".to_string(),
            VyperType::String { .. } => "string".to_string(),
            VyperType::DynArray { elem, .. } => format!("{}[]", elem.abi_type()),
            VyperType::Array { elem, len } => format!("{}[{len}]", elem.abi_type()),
            VyperType::Struct { fields } => {
                let inner: Vec<String> = fields.iter().map(VyperType::abi_type).collect();
                format!("({})", inner.join(","))
            }
        }
    }

    /// Parse a canonical ABI type string.
    ///
    /// ABI strings do not carry Vyper's length bounds, so `bytes`, `string`
    /// and `T[]` get `default_max_len` as their bound.
    pub fn from_abi_type(descriptor: &str, default_max_len: u32) -> Result<Self, UnsupportedTypeError> {
        let descriptor = descriptor.trim();
        if let Some(stripped) = descriptor.strip_suffix(']') {
            let open = stripped.rfind('[').ok_or_else(|| {
                UnsupportedTypeError::new(descriptor, "unbalanced array brackets")
            })?;
            let elem = Self::from_abi_type(&stripped[..open], default_max_len)?;
            let len_str = &stripped[open + 1..];
            let ty = if len_str.is_empty() {
                VyperType::DynArray {
                    elem: Box::new(elem),
                    max_len: default_max_len,
                }
            } else {
                let len = len_str.parse::<u32>().map_err(|_| {
                    UnsupportedTypeError::new(descriptor, "array length is not a number")
                })?;
                VyperType::Array {
                    elem: Box::new(elem),
                    len,
                }
            };
            ty.validate()?;
            return Ok(ty);
        }
        if let Some(inner) = descriptor
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let fields = split_top_level(inner)
                .into_iter()
                .map(|part| Self::from_abi_type(part, default_max_len))
                .collect::<Result<Vec<_>, _>>()?;
            let ty = VyperType::Struct { fields };
            ty.validate()?;
            return Ok(ty);
        }
        let ty = match descriptor {
            "bool" => VyperType::Bool,
            "address" => VyperType::Address,
            "fixed168x10" | "decimal" => VyperType::Decimal,
            "bytes" => VyperType::Bytes {
                max_len: default_max_len,
            },
            "string" => VyperType::String {
                max_len: default_max_len,
            },
            other => {
                if let Some(bits) = other.strip_prefix("uint") {
                    VyperType::Uint {
                        bits: parse_width(descriptor, bits)?,
                    }
                } else if let Some(bits) = other.strip_prefix("int") {
                    VyperType::Int {
                        bits: parse_width(descriptor, bits)?,
                    }
                } else if let Some(m) = other.strip_prefix("bytes") {
                    let m = m.parse::<u8>().map_err(|_| {
                        UnsupportedTypeError::new(descriptor, "fixed bytes width is not a number")
                    })?;
                    VyperType::BytesM { m }
                } else {
                    return Err(UnsupportedTypeError::new(
                        descriptor,
                        "not part of the type taxonomy",
                    ));
                }
            }
        };
        ty.validate()?;
        Ok(ty)
    }
}

fn parse_width(descriptor: &str, bits: &str) -> Result<u16, UnsupportedTypeError> {
    if bits.is_empty() {
        return Ok(256);
    }
    bits.parse::<u16>()
        .map_err(|_| UnsupportedTypeError::new(descriptor, "integer width is not a number"))
}

/// Split `a,(b,c),d[2]` on commas that are not nested in parentheses.
fn split_top_level(inner: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, ch) in inner.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&inner[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if !inner.is_empty() {
        parts.push(&inner[start..]);
    }
    parts
}

impl fmt::Display for VyperType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VyperType::Bool => write!(f, "bool"),
            VyperType::Uint { bits } => write!(f, "uint{bits}"),
            VyperType::Int { bits } => write!(f, "int{bits}"),
            VyperType::Address => write!(f, "address"),
            VyperType::Decimal => write!(f, "decimal"),
            VyperType::BytesM { m } => write!(f, "bytes{m}"),
            VyperType::Bytes { max_len } => write!(f, "Bytes[{max_len}]"),
            VyperType::String { max_len } => write!(f, "String[{max_len}]"),
            VyperType::DynArray { elem, max_len } => write!(f, "DynArray[{elem}, {max_len}]"),
            VyperType::Array { elem, len } => write!(f, "{elem}[{len}]"),
            VyperType::Struct { fields } => {
                write!(f, "struct{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "f{i}: {field}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

// ---- Versioned type map ----

/// Errors decoding a serialized [`TypeMap`].
#[derive(Debug, Error)]
pub enum TypeMapError {
    #[error("unsupported type map version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
    #[error("type map entry `{function}`: {source}")]
    Type {
        function: String,
        #[source]
        source: UnsupportedTypeError,
    },
    #[error("malformed type map: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parameter types per function name, in a versioned wire form.
///
/// ```
/// use difftest_types::{TypeMap, VyperType};
///
/// let mut map = TypeMap::new();
/// map.insert("func_0", vec![VyperType::Bool]);
/// let json = map.to_json().unwrap();
/// assert_eq!(TypeMap::from_json(&json).unwrap(), map);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTypeMap")]
pub struct TypeMap {
    pub version: u32,
    pub functions: BTreeMap<String, Vec<VyperType>>,
}

#[derive(Deserialize)]
struct RawTypeMap {
    version: u32,
    #[serde(default)]
    functions: BTreeMap<String, Vec<VyperType>>,
}

impl TryFrom<RawTypeMap> for TypeMap {
    type Error = TypeMapError;

    fn try_from(raw: RawTypeMap) -> Result<Self, Self::Error> {
        if raw.version != TypeMap::CURRENT_VERSION {
            return Err(TypeMapError::Version {
                found: raw.version,
                expected: TypeMap::CURRENT_VERSION,
            });
        }
        for (function, types) in &raw.functions {
            for ty in types {
                ty.validate().map_err(|source| TypeMapError::Type {
                    function: function.clone(),
                    source,
                })?;
            }
        }
        Ok(TypeMap {
            version: raw.version,
            functions: raw.functions,
        })
    }
}

impl Default for TypeMap {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeMap {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            functions: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, function: impl Into<String>, types: Vec<VyperType>) {
        self.functions.insert(function.into(), types);
    }

    pub fn get(&self, function: &str) -> Option<&[VyperType]> {
        self.functions.get(function).map(Vec::as_slice)
    }

    pub fn to_json(&self) -> Result<String, TypeMapError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, TypeMapError> {
        let raw: RawTypeMap = serde_json::from_str(json)?;
        TypeMap::try_from(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_odd_widths() {
        assert!(VyperType::Uint { bits: 7 }.validate().is_err());
        assert!(VyperType::Int { bits: 264 }.validate().is_err());
        assert!(VyperType::BytesM { m: 33 }.validate().is_err());
        assert!(VyperType::Uint { bits: 8 }.validate().is_ok());
        let nested = VyperType::DynArray {
            elem: Box::new(VyperType::Uint { bits: 3 }),
            max_len: 4,
        };
        assert!(nested.validate().is_err());
    }

    #[test]
    fn test_validate_caps_fixed_array_expansion() {
        let huge = VyperType::Array {
            elem: Box::new(VyperType::Uint { bits: 8 }),
            len: u32::MAX,
        };
        let err = huge.validate().unwrap_err();
        assert!(err.reason.contains("limit is 4096"), "{}", err.reason);

        // 64 * 64 is within the limit, 64 * 65 is not.
        let grid = |inner: u32| VyperType::Array {
            elem: Box::new(VyperType::Array {
                elem: Box::new(VyperType::Bool),
                len: inner,
            }),
            len: 64,
        };
        assert!(grid(64).validate().is_ok());
        assert!(grid(65).validate().is_err());

        let wide = VyperType::Struct {
            fields: vec![grid(32), grid(32), VyperType::Address],
        };
        assert_eq!(wide.fixed_elements(), 4097);
        assert!(wide.validate().is_err());

        let deep = VyperType::Array {
            elem: Box::new(VyperType::Array {
                elem: Box::new(VyperType::Array {
                    elem: Box::new(VyperType::uint256()),
                    len: u32::MAX,
                }),
                len: u32::MAX,
            }),
            len: u32::MAX,
        };
        assert_eq!(deep.fixed_elements(), u64::MAX);
        assert!(deep.validate().is_err());
    }

    #[test]
    fn test_abi_type_strings() {
        let ty = VyperType::Array {
            elem: Box::new(VyperType::Struct {
                fields: vec![VyperType::Bool, VyperType::Address],
            }),
            len: 2,
        };
        assert_eq!(ty.abi_type(), "(bool,address)[2]");
        assert_eq!(VyperType::Decimal.abi_type(), "fixed168x10");
    }

    #[test]
    fn test_parse_abi_types() {
        assert_eq!(
            VyperType::from_abi_type("uint256", 8).unwrap(),
            VyperType::uint256()
        );
        assert_eq!(
            VyperType::from_abi_type("(uint8,bool)[3]", 8).unwrap(),
            VyperType::Array {
                elem: Box::new(VyperType::Struct {
                    fields: vec![VyperType::Uint { bits: 8 }, VyperType::Bool]
                }),
                len: 3,
            }
        );
        assert_eq!(
            VyperType::from_abi_type("bytes32[]", 4).unwrap(),
            VyperType::DynArray {
                elem: Box::new(VyperType::BytesM { m: 32 }),
                max_len: 4,
            }
        );
        assert!(VyperType::from_abi_type("function", 4).is_err());
        assert!(VyperType::from_abi_type("uint7", 4).is_err());
    }

    #[test]
    fn test_display_source_form() {
        let ty = VyperType::DynArray {
            elem: Box::new(VyperType::String { max_len: 10 }),
            max_len: 3,
        };
        assert_eq!(ty.to_string(), "DynArray[String[10], 3]");
    }

    #[test]
    fn test_type_map_rejects_unknown_version() {
        let err = TypeMap::from_json(r#"{"version": 7, "functions": {}}"#).unwrap_err();
        assert!(matches!(err, TypeMapError::Version { found: 7, .. }));
    }

    #[test]
    fn test_type_map_rejects_unknown_tag() {
        let json = r#"{"version": 1, "functions": {"f": [{"type": "fixed128x18"}]}}"#;
        assert!(matches!(
            TypeMap::from_json(json),
            Err(TypeMapError::Json(_))
        ));
    }

    #[test]
    fn test_type_map_rejects_invalid_width() {
        let json = r#"{"version": 1, "functions": {"f": [{"type": "uint", "bits": 9}]}}"#;
        assert!(TypeMap::from_json(json).is_err());
    }

    #[test]
    fn test_type_map_tagged_form() {
        let mut map = TypeMap::new();
        map.insert(
            "func_0",
            vec![VyperType::DynArray {
                elem: Box::new(VyperType::uint256()),
                max_len: 2,
            }],
        );
        let value = serde_json::to_value(&map).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["functions"]["func_0"][0]["type"], "dyn_array");
        assert_eq!(value["functions"]["func_0"][0]["elem"]["bits"], 256);
    }
}
