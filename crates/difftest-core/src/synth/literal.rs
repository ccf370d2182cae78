//! Literal rendering.

use difftest_types::{Value, VyperType};

use super::structs::StructRegistry;
use crate::errors::{ConversionError, ConversionFault};

fn invalid(detail: impl Into<String>) -> ConversionError {
    ConversionError::new("literal", ConversionFault::InvalidLiteral, detail)
}

/// Render `value` as a Vyper literal of type `ty`.
pub fn render_literal(
    value: &Value,
    ty: &VyperType,
    structs: &StructRegistry,
) -> Result<String, ConversionError> {
    if !value.conforms_to(ty) {
        return Err(invalid(format!(
            "{} value `{value}` is outside the domain of {ty}",
            value.kind()
        )));
    }
    render_conforming(value, ty, structs)
}

fn render_conforming(
    value: &Value,
    ty: &VyperType,
    structs: &StructRegistry,
) -> Result<String, ConversionError> {
    let rendered = match (value, ty) {
        (Value::Bool(true), _) => "True".to_string(),
        (Value::Bool(false), _) => "False".to_string(),
        (Value::Uint(w), _) => w.to_unsigned_string(),
        (Value::Int(w), _) => w.to_signed_string(),
        (Value::Address(a), _) => a.to_checksum(),
        (Value::Decimal(d), _) => d.to_string(),
        (Value::Bytes(b), VyperType::BytesM { .. }) => format!("0x{}", hex::encode(b.as_slice())),
        (Value::Bytes(b), _) => {
            let mut out = String::from("b\"");
            for byte in b.as_slice() {
                out.push_str(&format!("\\x{byte:02x}"));
            }
            out.push('"');
            out
        }
        (Value::String(s), _) => render_string(s)?,
        (Value::Array(items), VyperType::Array { elem, .. })
        | (Value::Array(items), VyperType::DynArray { elem, .. }) => {
            let parts = items
                .iter()
                .map(|item| render_conforming(item, elem, structs))
                .collect::<Result<Vec<_>, _>>()?;
            format!("[{}]", parts.join(", "))
        }
        (Value::Struct(values), VyperType::Struct { fields }) => {
            let parts = values
                .iter()
                .zip(fields)
                .enumerate()
                .map(|(i, (v, t))| Ok(format!("f{i}: {}", render_conforming(v, t, structs)?)))
                .collect::<Result<Vec<_>, ConversionError>>()?;
            format!("{}({{{}}})", structs.name_of(fields), parts.join(", "))
        }
        _ => {
            return Err(invalid(format!(
                "{} value cannot be written as {ty}",
                value.kind()
            )))
        }
    };
    Ok(rendered)
}

fn render_string(s: &str) -> Result<String, ConversionError> {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            ' '..='~' => out.push(ch),
            other => {
                return Err(invalid(format!(
                    "string contains non-printable character {other:?}"
                )))
            }
        }
    }
    out.push('"');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use difftest_types::{Decimal, HexBytes};

    fn render(value: Value, ty: VyperType) -> Result<String, ConversionError> {
        let mut structs = StructRegistry::default();
        structs.register(&ty);
        render_literal(&value, &ty, &structs)
    }

    #[test]
    fn test_scalars() {
        assert_eq!(render(Value::Bool(true), VyperType::Bool).unwrap(), "True");
        assert_eq!(render(Value::int(-5), VyperType::int128()).unwrap(), "-5");
        assert_eq!(
            render(Value::Decimal(Decimal::from_units(-15_000_000_000)), VyperType::Decimal)
                .unwrap(),
            "-1.5000000000"
        );
        assert_eq!(
            render(
                Value::Bytes(HexBytes(vec![0xab, 0x01])),
                VyperType::BytesM { m: 2 }
            )
            .unwrap(),
            "0xab01"
        );
        assert_eq!(
            render(
                Value::Bytes(HexBytes(vec![0xab, 0x01])),
                VyperType::Bytes { max_len: 4 }
            )
            .unwrap(),
            "b\"\\xab\\x01\""
        );
    }

    #[test]
    fn test_string_escaping() {
        let ty = VyperType::String { max_len: 16 };
        assert_eq!(
            render(Value::String("a\"b\\".into()), ty.clone()).unwrap(),
            "\"a\\\"b\\\\\""
        );
        let err = render(Value::String("a\nb".into()), ty).unwrap_err();
        assert_eq!(err.fault, ConversionFault::InvalidLiteral);
    }

    #[test]
    fn test_struct_literal() {
        let ty = VyperType::Struct {
            fields: vec![VyperType::uint256(), VyperType::Bool],
        };
        let value = Value::Struct(vec![Value::uint(3), Value::Bool(false)]);
        assert_eq!(render(value, ty).unwrap(), "S0({f0: 3, f1: False})");
    }

    #[test]
    fn test_out_of_range() {
        let err = render(Value::uint(256), VyperType::Uint { bits: 8 }).unwrap_err();
        assert_eq!(err.fault, ConversionFault::InvalidLiteral);
        assert_eq!(err.node, "literal");
    }
}
