//! Ethereum ABI encoding of argument values.
//!
//! Head/tail encoding as the contract ABI specifies it. Decimals are encoded
//! as their scaled integer in a signed word, the way the compiler lays out
//! `fixed168x10`.

use sha3::{Digest, Keccak256};
use thiserror::Error;

use difftest_types::{AbiEntry, Value, VyperType, Word};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot encode {found} value as {expected}")]
pub struct AbiEncodeError {
    pub expected: String,
    pub found: String,
}

fn encode_error(value: &Value, ty: &VyperType) -> AbiEncodeError {
    AbiEncodeError {
        expected: ty.to_string(),
        found: value.kind().to_string(),
    }
}

/// Encode an argument list as a tuple.
pub fn encode(values: &[Value], types: &[VyperType]) -> Result<Vec<u8>, AbiEncodeError> {
    if values.len() != types.len() {
        return Err(AbiEncodeError {
            expected: format!("{} arguments", types.len()),
            found: format!("{} arguments", values.len()),
        });
    }
    let items: Vec<(&Value, &VyperType)> = values.iter().zip(types).collect();
    encode_tuple(&items)
}

/// `keccak256(signature)[..4]`.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Canonical signature of an ABI function entry, e.g. `func_0(uint256,bool)`.
pub fn signature(entry: &AbiEntry) -> String {
    let params: Vec<String> = entry.inputs.iter().map(|p| p.canonical_type()).collect();
    format!(
        "{}({})",
        entry.name.as_deref().unwrap_or_default(),
        params.join(",")
    )
}

/// Selector followed by the encoded arguments.
pub fn calldata(
    entry: &AbiEntry,
    values: &[Value],
    types: &[VyperType],
) -> Result<Vec<u8>, AbiEncodeError> {
    let mut out = selector(&signature(entry)).to_vec();
    out.extend(encode(values, types)?);
    Ok(out)
}

fn encode_tuple(items: &[(&Value, &VyperType)]) -> Result<Vec<u8>, AbiEncodeError> {
    let head_len: usize = items.iter().map(|(_, ty)| head_size(ty)).sum();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();
    for (value, ty) in items {
        if ty.is_dynamic() {
            let offset = head_len + tail.len();
            head.extend_from_slice(Word::from_u128(offset as u128).as_bytes());
            tail.extend(encode_value(value, ty)?);
        } else {
            head.extend(encode_value(value, ty)?);
        }
    }
    head.extend(tail);
    Ok(head)
}

/// Size of a type's head slot: one word for dynamic types, the full
/// in-place encoding for static ones.
fn head_size(ty: &VyperType) -> usize {
    if ty.is_dynamic() {
        return 32;
    }
    match ty {
        VyperType::Array { elem, len } => head_size(elem) * *len as usize,
        VyperType::Struct { fields } => fields.iter().map(head_size).sum(),
        _ => 32,
    }
}

fn encode_value(value: &Value, ty: &VyperType) -> Result<Vec<u8>, AbiEncodeError> {
    let word = |w: Word| w.as_bytes().to_vec();
    match (value, ty) {
        (Value::Bool(b), VyperType::Bool) => Ok(word(if *b { Word::ONE } else { Word::ZERO })),
        (Value::Uint(w), VyperType::Uint { .. }) | (Value::Int(w), VyperType::Int { .. }) => {
            Ok(word(*w))
        }
        (Value::Address(a), VyperType::Address) => Ok(word(a.to_word())),
        (Value::Decimal(d), VyperType::Decimal) => Ok(word(Word::from_i128(d.units()))),
        (Value::Bytes(b), VyperType::BytesM { m }) if b.len() == *m as usize => {
            let mut out = b.as_slice().to_vec();
            out.resize(32, 0);
            Ok(out)
        }
        (Value::Bytes(b), VyperType::Bytes { .. }) => Ok(encode_dynamic_bytes(b.as_slice())),
        (Value::String(s), VyperType::String { .. }) => Ok(encode_dynamic_bytes(s.as_bytes())),
        (Value::Array(items), VyperType::DynArray { elem, .. }) => {
            let mut out = word(Word::from_u128(items.len() as u128));
            let pairs: Vec<_> = items.iter().map(|v| (v, elem.as_ref())).collect();
            out.extend(encode_tuple(&pairs)?);
            Ok(out)
        }
        (Value::Array(items), VyperType::Array { elem, len }) if items.len() == *len as usize => {
            let pairs: Vec<_> = items.iter().map(|v| (v, elem.as_ref())).collect();
            encode_tuple(&pairs)
        }
        (Value::Struct(values), VyperType::Struct { fields }) if values.len() == fields.len() => {
            let pairs: Vec<_> = values.iter().zip(fields).collect();
            encode_tuple(&pairs)
        }
        _ => Err(encode_error(value, ty)),
    }
}

fn encode_dynamic_bytes(data: &[u8]) -> Vec<u8> {
    let mut out = Word::from_u128(data.len() as u128).as_bytes().to_vec();
    out.extend_from_slice(data);
    let padded = data.len().div_ceil(32) * 32;
    out.resize(32 + padded, 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use difftest_types::HexBytes;

    fn hex_words(bytes: &[u8]) -> Vec<String> {
        bytes.chunks(32).map(hex::encode).collect()
    }

    #[test]
    fn test_static_encoding() {
        let out = encode(
            &[Value::uint(69), Value::Bool(true)],
            &[VyperType::Uint { bits: 32 }, VyperType::Bool],
        )
        .unwrap();
        assert_eq!(out.len(), 64);
        assert_eq!(out[31], 69);
        assert_eq!(out[63], 1);
    }

    #[test]
    fn test_negative_int_is_sign_extended() {
        let out = encode(&[Value::int(-1)], &[VyperType::Int { bits: 8 }]).unwrap();
        assert_eq!(out, vec![0xFF; 32]);
    }

    #[test]
    fn test_dynamic_encoding_layout() {
        // f(bytes, uint256) with "dave" and 1
        let out = encode(
            &[Value::Bytes(HexBytes(b"dave".to_vec())), Value::uint(1)],
            &[VyperType::Bytes { max_len: 10 }, VyperType::uint256()],
        )
        .unwrap();
        let words = hex_words(&out);
        assert_eq!(words.len(), 4);
        assert!(words[0].ends_with("40"));
        assert!(words[1].ends_with("01"));
        assert!(words[2].ends_with("04"));
        assert!(words[3].starts_with("64617665"));
    }

    #[test]
    fn test_static_array_of_structs_inline() {
        let ty = VyperType::Array {
            elem: Box::new(VyperType::Struct {
                fields: vec![VyperType::Bool, VyperType::Uint { bits: 8 }],
            }),
            len: 2,
        };
        let value = Value::Array(vec![
            Value::Struct(vec![Value::Bool(true), Value::uint(1)]),
            Value::Struct(vec![Value::Bool(false), Value::uint(2)]),
        ]);
        assert_eq!(encode(&[value], &[ty]).unwrap().len(), 128);
    }

    #[test]
    fn test_mismatch_rejected() {
        let err = encode(&[Value::Bool(true)], &[VyperType::Address]).unwrap_err();
        assert_eq!(err.found, "bool");
        assert!(encode(&[], &[VyperType::Bool]).is_err());
    }

    #[test]
    fn test_selector_known_value() {
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
    }
}
