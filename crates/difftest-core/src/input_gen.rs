//! Typed input generation.
//!
//! Produces concrete argument values for declared parameter types. The
//! strategy is an argument of every call; the generator itself only owns its
//! seeded RNG, so a fixed seed gives a fixed sequence of argument lists.
//!
//! The `boundary` strategy keeps an aggressive distribution: ~40% exact
//! boundaries, ~30% near-boundary, ~30% uniform.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use difftest_types::{
    Address, Decimal, FunctionInputs, HexBytes, InputSet, InputStrategy, TypeMap,
    UnsupportedTypeError, Value, VyperType, Word, CONSTRUCTOR_NAME,
};

/// Printable ASCII, the character domain of generated strings.
const PRINTABLE: std::ops::RangeInclusive<u8> = 0x20..=0x7E;

pub struct InputGenerator {
    rng: StdRng,
    max_dynamic_len: u32,
}

impl InputGenerator {
    /// `max_dynamic_len` caps the length of generated `Bytes`, `String`
    /// and `DynArray` values below their declared bound.
    pub fn new(seed: u64, max_dynamic_len: u32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            max_dynamic_len,
        }
    }

    /// One value per declared type, positionally matched.
    pub fn generate(
        &mut self,
        types: &[VyperType],
        strategy: InputStrategy,
    ) -> Result<Vec<Value>, UnsupportedTypeError> {
        for ty in types {
            ty.validate()?;
        }
        Ok(types.iter().map(|ty| self.value(ty, strategy)).collect())
    }

    /// One candidate set per strategy, in the given order.
    pub fn generate_sets(
        &mut self,
        types: &[VyperType],
        strategies: &[InputStrategy],
    ) -> Result<Vec<InputSet>, UnsupportedTypeError> {
        strategies
            .iter()
            .map(|&strategy| {
                Ok(InputSet {
                    strategy,
                    values: self.generate(types, strategy)?,
                })
            })
            .collect()
    }

    /// Candidate sets for every function of a synthesized contract.
    ///
    /// The constructor comes first, then `functions` in the order given,
    /// which callers pass in structured-input order.
    pub fn generate_for_contract(
        &mut self,
        type_map: &TypeMap,
        functions: &[String],
        strategies: &[InputStrategy],
    ) -> Result<Vec<FunctionInputs>, UnsupportedTypeError> {
        let names = type_map
            .get(CONSTRUCTOR_NAME)
            .map(|_| CONSTRUCTOR_NAME)
            .into_iter()
            .chain(functions.iter().map(String::as_str));
        let mut out = Vec::new();
        for name in names {
            let types = type_map.get(name).ok_or_else(|| {
                UnsupportedTypeError::new(name, "function missing from the parameter-type map")
            })?;
            out.push(FunctionInputs {
                function: name.to_string(),
                sets: self.generate_sets(types, strategies)?,
            });
        }
        Ok(out)
    }

    fn value(&mut self, ty: &VyperType, strategy: InputStrategy) -> Value {
        match ty {
            VyperType::Bool => Value::Bool(match strategy {
                InputStrategy::Default | InputStrategy::Min => false,
                InputStrategy::Max => true,
                InputStrategy::Random | InputStrategy::Boundary => self.rng.gen_bool(0.5),
            }),
            VyperType::Uint { bits } => Value::Uint(self.gen_uint(*bits, strategy)),
            VyperType::Int { bits } => Value::Int(self.gen_int(*bits, strategy)),
            VyperType::Address => Value::Address(self.gen_address(strategy)),
            VyperType::Decimal => Value::Decimal(self.gen_decimal(strategy)),
            VyperType::BytesM { m } => {
                let m = *m as usize;
                let bytes = match strategy {
                    InputStrategy::Default | InputStrategy::Min => vec![0u8; m],
                    InputStrategy::Max => vec![0xFF; m],
                    InputStrategy::Random | InputStrategy::Boundary => self.random_bytes(m),
                };
                Value::Bytes(HexBytes(bytes))
            }
            VyperType::Bytes { max_len } => {
                let len = self.dynamic_len(*max_len, strategy);
                let bytes = match strategy {
                    InputStrategy::Max => vec![0xFF; len],
                    _ => self.random_bytes(len),
                };
                Value::Bytes(HexBytes(bytes))
            }
            VyperType::String { max_len } => {
                let len = self.dynamic_len(*max_len, strategy);
                let s: String = match strategy {
                    InputStrategy::Max => "~".repeat(len),
                    _ => (0..len)
                        .map(|_| self.rng.gen_range(PRINTABLE) as char)
                        .collect(),
                };
                Value::String(s)
            }
            VyperType::DynArray { elem, max_len } => {
                let len = self.dynamic_len(*max_len, strategy);
                Value::Array((0..len).map(|_| self.value(elem, strategy)).collect())
            }
            VyperType::Array { elem, len } => {
                Value::Array((0..*len).map(|_| self.value(elem, strategy)).collect())
            }
            VyperType::Struct { fields } => {
                Value::Struct(fields.iter().map(|f| self.value(f, strategy)).collect())
            }
        }
    }

    // ---- Integers ----

    fn gen_uint(&mut self, bits: u16, strategy: InputStrategy) -> Word {
        let max = Word::max_unsigned(bits);
        match strategy {
            InputStrategy::Default | InputStrategy::Min => Word::ZERO,
            InputStrategy::Max => max,
            InputStrategy::Random => self.random_unsigned(bits),
            InputStrategy::Boundary => {
                let boundaries = uint_boundaries(bits);
                self.tiered(&boundaries, bits, false)
            }
        }
    }

    fn gen_int(&mut self, bits: u16, strategy: InputStrategy) -> Word {
        match strategy {
            InputStrategy::Default => Word::ZERO,
            InputStrategy::Min => Word::min_signed(bits),
            InputStrategy::Max => Word::max_signed(bits),
            InputStrategy::Random => self.random_signed(bits),
            InputStrategy::Boundary => {
                let boundaries = int_boundaries(bits);
                self.tiered(&boundaries, bits, true)
            }
        }
    }

    /// Boundary-heavy pick over a word domain.
    fn tiered(&mut self, boundaries: &[Word], bits: u16, signed: bool) -> Word {
        let tier: f64 = self.rng.gen();
        if tier < 0.4 {
            // Exact boundary value
            boundaries[self.rng.gen_range(0..boundaries.len())]
        } else if tier < 0.7 {
            // Near-boundary: pick a boundary, offset by ±1..16
            let base = boundaries[self.rng.gen_range(0..boundaries.len())];
            let offset = Word::from_u128(self.rng.gen_range(1..=16u128));
            if self.rng.gen_bool(0.5) {
                offset_up(base, offset, bits, signed)
            } else {
                offset_down(base, offset, bits, signed)
            }
        } else if signed {
            self.random_signed(bits)
        } else {
            self.random_unsigned(bits)
        }
    }

    fn random_unsigned(&mut self, bits: u16) -> Word {
        let mut bytes = [0u8; 32];
        self.rng.fill(&mut bytes[..]);
        Word::from_be_bytes(mask_to_bits(bytes, bits))
    }

    fn random_signed(&mut self, bits: u16) -> Word {
        let raw = self.random_unsigned(bits);
        sign_extend(raw, bits)
    }

    // ---- Other scalars ----

    fn gen_address(&mut self, strategy: InputStrategy) -> Address {
        match strategy {
            InputStrategy::Default | InputStrategy::Min => Address::ZERO,
            InputStrategy::Max => Address([0xFF; 20]),
            InputStrategy::Random => Address(self.random_array()),
            InputStrategy::Boundary => {
                let tier: f64 = self.rng.gen();
                if tier < 0.3 {
                    // Well-known addresses: zero, precompiles, all ones
                    let mut addr = [0u8; 20];
                    match self.rng.gen_range(0..5) {
                        0 => {}
                        1 => addr[19] = 1,
                        2 => addr[19] = 4,
                        3 => addr[19] = 9,
                        _ => addr = [0xFF; 20],
                    }
                    Address(addr)
                } else {
                    Address(self.random_array())
                }
            }
        }
    }

    fn gen_decimal(&mut self, strategy: InputStrategy) -> Decimal {
        match strategy {
            InputStrategy::Default => Decimal(0),
            InputStrategy::Min => Decimal::MIN,
            InputStrategy::Max => Decimal::MAX,
            InputStrategy::Random => Decimal(self.rng.gen()),
            InputStrategy::Boundary => {
                let tier: f64 = self.rng.gen();
                if tier < 0.4 {
                    DECIMAL_BOUNDARIES[self.rng.gen_range(0..DECIMAL_BOUNDARIES.len())]
                } else if tier < 0.7 {
                    let base = DECIMAL_BOUNDARIES[self.rng.gen_range(0..DECIMAL_BOUNDARIES.len())];
                    let offset = self.rng.gen_range(1..=16i128);
                    if self.rng.gen_bool(0.5) {
                        Decimal(base.0.saturating_add(offset))
                    } else {
                        Decimal(base.0.saturating_sub(offset))
                    }
                } else {
                    Decimal(self.rng.gen())
                }
            }
        }
    }

    fn random_bytes(&mut self, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        self.rng.fill(&mut bytes[..]);
        bytes
    }

    fn random_array<const N: usize>(&mut self) -> [u8; N] {
        let mut bytes = [0u8; N];
        self.rng.fill(&mut bytes[..]);
        bytes
    }

    // ---- Dynamic lengths ----

    fn dynamic_len(&mut self, max_len: u32, strategy: InputStrategy) -> usize {
        let cap = max_len.min(self.max_dynamic_len) as usize;
        match strategy {
            InputStrategy::Default | InputStrategy::Min => 0,
            InputStrategy::Max => cap,
            InputStrategy::Random => self.rng.gen_range(0..=cap),
            InputStrategy::Boundary => {
                let tier: f64 = self.rng.gen();
                if tier < 0.20 || cap == 0 {
                    0
                } else if tier < 0.35 {
                    1
                } else if tier < 0.50 || cap < 2 {
                    cap
                } else {
                    self.rng.gen_range(2..=cap)
                }
            }
        }
    }
}

// ---- Word helpers ----

/// Clear every bit at or above `bits`.
fn mask_to_bits(mut bytes: [u8; 32], bits: u16) -> [u8; 32] {
    let bits = bits.min(256) as usize;
    for bit in bits..256 {
        bytes[31 - bit / 8] &= !(1 << (bit % 8));
    }
    bytes
}

/// Sign-extend a `bits`-wide two's-complement value to 256 bits.
fn sign_extend(word: Word, bits: u16) -> Word {
    let bits = bits.clamp(1, 256) as usize;
    let mut bytes = word.to_be_bytes();
    let sign = bytes[31 - (bits - 1) / 8] & (1 << ((bits - 1) % 8)) != 0;
    if sign {
        for bit in bits..256 {
            bytes[31 - bit / 8] |= 1 << (bit % 8);
        }
    }
    Word::from_be_bytes(bytes)
}

fn offset_up(base: Word, offset: Word, bits: u16, signed: bool) -> Word {
    let sum = base.wrapping_add(offset);
    if signed {
        let wrapped = sum.cmp_signed(&base).is_lt();
        if wrapped || !sum.fits_signed(bits) {
            return Word::max_signed(bits);
        }
    } else {
        let wrapped = sum.cmp_unsigned(&base).is_lt();
        if wrapped || !sum.fits_unsigned(bits) {
            return Word::max_unsigned(bits);
        }
    }
    sum
}

fn offset_down(base: Word, offset: Word, bits: u16, signed: bool) -> Word {
    let diff = base.wrapping_sub(offset);
    if signed {
        let wrapped = diff.cmp_signed(&base).is_gt();
        if wrapped || !diff.fits_signed(bits) {
            return Word::min_signed(bits);
        }
    } else if diff.cmp_unsigned(&base).is_gt() {
        return Word::ZERO;
    }
    diff
}

// ---- Boundary value tables ----

/// 0, 1, 2, every `2^k - 1` / `2^k` byte boundary below the width, and the
/// top of the range.
fn uint_boundaries(bits: u16) -> Vec<Word> {
    let mut out = vec![Word::ZERO, Word::ONE, Word::from_u128(2)];
    let mut k = 7;
    while k < bits {
        out.push(Word::max_unsigned(k));
        out.push(Word::max_unsigned(k).wrapping_add(Word::ONE));
        k += 8;
    }
    let max = Word::max_unsigned(bits);
    out.push(max.wrapping_sub(Word::ONE));
    out.push(max);
    out
}

fn int_boundaries(bits: u16) -> Vec<Word> {
    let min = Word::min_signed(bits);
    let max = Word::max_signed(bits);
    let mut out = vec![
        Word::ZERO,
        Word::ONE,
        Word::from_i128(-1),
        min,
        min.wrapping_add(Word::ONE),
        max.wrapping_sub(Word::ONE),
        max,
    ];
    let mut k = 7;
    while k + 1 < bits {
        out.push(Word::max_signed(k + 1));
        out.push(Word::min_signed(k + 1));
        k += 8;
    }
    out
}

const DECIMAL_BOUNDARIES: [Decimal; 9] = [
    Decimal(0),
    Decimal(1),
    Decimal(-1),
    Decimal(Decimal::SCALE),
    Decimal(-Decimal::SCALE),
    Decimal(i128::MIN),
    Decimal(i128::MIN + 1),
    Decimal(i128::MAX - 1),
    Decimal(i128::MAX),
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sample_types() -> Vec<VyperType> {
        vec![
            VyperType::Bool,
            VyperType::Uint { bits: 8 },
            VyperType::Uint { bits: 64 },
            VyperType::uint256(),
            VyperType::Int { bits: 8 },
            VyperType::int128(),
            VyperType::Int { bits: 256 },
            VyperType::Address,
            VyperType::Decimal,
            VyperType::BytesM { m: 4 },
            VyperType::Bytes { max_len: 40 },
            VyperType::String { max_len: 3 },
            VyperType::DynArray {
                elem: Box::new(VyperType::Int { bits: 16 }),
                max_len: 5,
            },
            VyperType::Array {
                elem: Box::new(VyperType::Struct {
                    fields: vec![VyperType::Bool, VyperType::Uint { bits: 24 }],
                }),
                len: 2,
            },
        ]
    }

    #[test]
    fn test_values_conform_for_every_strategy() {
        let types = sample_types();
        let mut gen = InputGenerator::new(7, 16);
        for strategy in InputStrategy::ALL {
            for _ in 0..200 {
                let values = gen.generate(&types, strategy).unwrap();
                assert_eq!(values.len(), types.len());
                for (value, ty) in values.iter().zip(&types) {
                    assert!(
                        value.conforms_to(ty),
                        "{strategy}: {value} does not conform to {ty}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_deterministic_seed() {
        let types = sample_types();
        let mut gen1 = InputGenerator::new(42, 8);
        let mut gen2 = InputGenerator::new(42, 8);
        for strategy in [InputStrategy::Random, InputStrategy::Boundary] {
            assert_eq!(
                gen1.generate(&types, strategy).unwrap(),
                gen2.generate(&types, strategy).unwrap()
            );
        }
    }

    #[test]
    fn test_default_is_canonical_zero() {
        let mut gen = InputGenerator::new(1, 8);
        let values = gen
            .generate(
                &[
                    VyperType::Bool,
                    VyperType::int128(),
                    VyperType::Bytes { max_len: 8 },
                    VyperType::Array {
                        elem: Box::new(VyperType::Uint { bits: 8 }),
                        len: 2,
                    },
                ],
                InputStrategy::Default,
            )
            .unwrap();
        assert_eq!(
            values,
            vec![
                Value::Bool(false),
                Value::int(0),
                Value::Bytes(HexBytes(vec![])),
                Value::Array(vec![Value::uint(0), Value::uint(0)]),
            ]
        );
    }

    #[test]
    fn test_min_max_extremes() {
        let mut gen = InputGenerator::new(1, 4);
        let ty = [VyperType::Int { bits: 8 }, VyperType::Bytes { max_len: 100 }];
        let min = gen.generate(&ty, InputStrategy::Min).unwrap();
        let max = gen.generate(&ty, InputStrategy::Max).unwrap();
        assert_eq!(min[0], Value::int(-128));
        assert_eq!(max[0], Value::int(127));
        assert_eq!(min[1], Value::Bytes(HexBytes(vec![])));
        assert_eq!(max[1], Value::Bytes(HexBytes(vec![0xFF; 4])));
    }

    #[test]
    fn test_empty_type_list() {
        let mut gen = InputGenerator::new(0, 4);
        assert!(gen.generate(&[], InputStrategy::Random).unwrap().is_empty());
    }

    #[test]
    fn test_unsupported_type() {
        let mut gen = InputGenerator::new(0, 4);
        let err = gen
            .generate(&[VyperType::Uint { bits: 9 }], InputStrategy::Default)
            .unwrap_err();
        assert_eq!(err.descriptor, "uint9");
    }

    #[test]
    fn test_oversized_fixed_array_is_rejected() {
        let mut gen = InputGenerator::new(0, 4);
        let ty = VyperType::Array {
            elem: Box::new(VyperType::Uint { bits: 8 }),
            len: u32::MAX,
        };
        let err = gen.generate(&[ty], InputStrategy::Max).unwrap_err();
        assert_eq!(err.descriptor, "uint8[4294967295]");
    }

    #[test]
    fn test_boundaries_appear_in_uint8() {
        let mut gen = InputGenerator::new(505, 32);
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            if let Value::Uint(w) = gen.value(&VyperType::Uint { bits: 8 }, InputStrategy::Boundary)
            {
                seen.insert(w.to_unsigned_string());
            }
        }
        for boundary in ["0", "1", "127", "128", "255"] {
            assert!(seen.contains(boundary), "should see boundary {boundary}");
        }
    }

    #[test]
    fn test_contract_inputs_order() {
        let mut map = TypeMap::new();
        map.insert("func_1", vec![VyperType::Bool]);
        map.insert("func_0", vec![]);
        map.insert(CONSTRUCTOR_NAME, vec![VyperType::int128()]);
        let mut gen = InputGenerator::new(3, 4);
        let strategies = [InputStrategy::Default, InputStrategy::Max];
        let inputs = gen
            .generate_for_contract(&map, &["func_0".into(), "func_1".into()], &strategies)
            .unwrap();
        let names: Vec<_> = inputs.iter().map(|f| f.function.as_str()).collect();
        assert_eq!(names, vec!["__init__", "func_0", "func_1"]);
        assert_eq!(inputs[2].sets.len(), 2);
        assert_eq!(inputs[2].sets[1].strategy, InputStrategy::Max);
        assert_eq!(inputs[2].sets[1].values, vec![Value::Bool(true)]);
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(Word::from_u128(0x80), 8), Word::from_i128(-128));
        assert_eq!(sign_extend(Word::from_u128(0x7F), 8), Word::from_i128(127));
    }
}
