//! Typed values and their encoding into 32-bit argument slots.
//!
//! Engines exchange arguments and results through a flat `u32` array. The
//! encoding is:
//!
//! | Value | Slots | Encoding |
//! |---|---|---|
//! | `I32` | 1 | bit copy |
//! | `I64` | 2 | low word, then high word |
//! | `F32` | 1 | IEEE-754 bit copy |
//! | `F64` | 2 | low word, then high word of the bit pattern |
//! | `FuncRef` / `AnyRef` | 1 | opaque handle |
//!
//! Arguments are validated against the declared parameter types in a single
//! pass before any slot is produced.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use wasm_embed_common::{CallError, ValueType};

/// A typed WebAssembly value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// 32-bit integer (signed or unsigned bit pattern).
    I32(i32),
    /// 64-bit integer (signed or unsigned bit pattern).
    I64(i64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
    /// Opaque function reference handle.
    FuncRef(u32),
    /// Opaque host/any reference handle.
    AnyRef(u32),
    /// 128-bit vector; cannot be passed through argument slots.
    V128(u128),
}

impl Value {
    /// The type of this value.
    pub const fn ty(&self) -> ValueType {
        match self {
            Self::I32(_) => ValueType::I32,
            Self::I64(_) => ValueType::I64,
            Self::F32(_) => ValueType::F32,
            Self::F64(_) => ValueType::F64,
            Self::FuncRef(_) => ValueType::FuncRef,
            Self::AnyRef(_) => ValueType::AnyRef,
            Self::V128(_) => ValueType::V128,
        }
    }

    /// Append the slot encoding of this value to `slots`.
    ///
    /// Returns `None` if the value cannot be carried in slots.
    fn push_slots(self, slots: &mut Vec<u32>) -> Option<()> {
        match self {
            Self::I32(v) => slots.push(v as u32),
            Self::F32(v) => slots.push(v.to_bits()),
            Self::FuncRef(handle) | Self::AnyRef(handle) => slots.push(handle),
            Self::I64(v) => push_u64(slots, v as u64),
            Self::F64(v) => push_u64(slots, v.to_bits()),
            Self::V128(_) => return None,
        }
        Some(())
    }

    /// Decode one value of type `ty` from the front of `slots`.
    ///
    /// Returns the value and the number of slots consumed, or `None` if there
    /// are not enough slots or the type cannot be carried in slots.
    fn from_slots(ty: ValueType, slots: &[u32]) -> Option<(Self, usize)> {
        let width = ty.slot_count()?;
        let words = slots.get(..width)?;
        let value = match ty {
            ValueType::I32 => Self::I32(words[0] as i32),
            ValueType::F32 => Self::F32(f32::from_bits(words[0])),
            ValueType::FuncRef => Self::FuncRef(words[0]),
            ValueType::AnyRef => Self::AnyRef(words[0]),
            ValueType::I64 => Self::I64(join_u64(words) as i64),
            ValueType::F64 => Self::F64(f64::from_bits(join_u64(words))),
            ValueType::V128 => return None,
        };
        Some((value, width))
    }

    /// Parse a textual argument as a value of type `ty`.
    ///
    /// Integers accept decimal (optionally negative) or `0x` hexadecimal
    /// notation; floats accept anything `f32`/`f64` parse, including `nan`
    /// and `inf`.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid literal for `ty`.
    pub fn parse(ty: ValueType, text: &str) -> Result<Self, ParseValueError> {
        let text = text.trim();
        let invalid = || ParseValueError {
            ty,
            text: text.to_string(),
        };

        match ty {
            ValueType::I32 => parse_int(text)
                .and_then(|v| i32::try_from(v).ok().or_else(|| u32::try_from(v).ok().map(|u| u as i32)))
                .map(Self::I32)
                .ok_or_else(invalid),
            ValueType::I64 => parse_int(text)
                .and_then(|v| i64::try_from(v).ok().or_else(|| u64::try_from(v).ok().map(|u| u as i64)))
                .map(Self::I64)
                .ok_or_else(invalid),
            ValueType::F32 => f32::from_str(text).map(Self::F32).map_err(|_| invalid()),
            ValueType::F64 => f64::from_str(text).map(Self::F64).map_err(|_| invalid()),
            ValueType::FuncRef => parse_int(text)
                .and_then(|v| u32::try_from(v).ok())
                .map(Self::FuncRef)
                .ok_or_else(invalid),
            ValueType::AnyRef => parse_int(text)
                .and_then(|v| u32::try_from(v).ok())
                .map(Self::AnyRef)
                .ok_or_else(invalid),
            ValueType::V128 => parse_int(text)
                .and_then(|v| u128::try_from(v).ok())
                .map(Self::V128)
                .ok_or_else(invalid),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I32(v) => write!(f, "{v:#x}:i32"),
            Self::I64(v) => write!(f, "{v:#x}:i64"),
            Self::F32(v) => write!(f, "{v}:f32"),
            Self::F64(v) => write!(f, "{v}:f64"),
            Self::FuncRef(v) => write!(f, "{v:#x}:funcref"),
            Self::AnyRef(v) => write!(f, "{v:#x}:anyref"),
            Self::V128(v) => write!(f, "{v:#034x}:v128"),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::I32(v as i32)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::I64(v as i64)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

/// A textual argument that is not a valid literal for its declared type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("'{text}' is not a valid {ty} literal")]
pub struct ParseValueError {
    /// Declared type.
    pub ty: ValueType,
    /// The rejected text.
    pub text: String,
}

/// Validate `args` against `params` and encode them into argument slots.
///
/// Every argument is checked before the slot vector is returned, so a
/// rejected argument list never reaches the engine.
///
/// # Errors
///
/// - [`CallError::ArgumentCountMismatch`] if the counts differ
/// - [`CallError::TypeMismatch`] at the first position whose value type
///   differs from the declared type
/// - [`CallError::UnsupportedType`] for values that cannot be slot-encoded
pub fn encode_args(params: &[ValueType], args: &[Value]) -> Result<Vec<u32>, CallError> {
    if params.len() != args.len() {
        return Err(CallError::ArgumentCountMismatch {
            expected: params.len(),
            actual: args.len(),
        });
    }

    let mut slots = Vec::with_capacity(params.len() * 2);
    for (position, (&expected, arg)) in params.iter().zip(args).enumerate() {
        let actual = arg.ty();
        if expected != actual {
            return Err(CallError::TypeMismatch {
                position,
                expected,
                actual,
            });
        }
        arg.push_slots(&mut slots)
            .ok_or(CallError::UnsupportedType {
                position,
                ty: actual,
            })?;
    }

    Ok(slots)
}

/// Decode values of the given types from the front of `slots`.
///
/// # Errors
///
/// - [`CallError::UnsupportedType`] for types that cannot be slot-encoded
/// - [`CallError::ResultSlots`] if `slots` is too short
pub fn decode_results(results: &[ValueType], slots: &[u32]) -> Result<Vec<Value>, CallError> {
    let mut values = Vec::with_capacity(results.len());
    let mut cursor = 0;

    for (position, &ty) in results.iter().enumerate() {
        let width = ty
            .slot_count()
            .ok_or(CallError::UnsupportedType { position, ty })?;
        let (value, used) =
            Value::from_slots(ty, &slots[cursor.min(slots.len())..]).ok_or_else(|| {
                CallError::ResultSlots {
                    needed: cursor + width,
                    available: slots.len(),
                }
            })?;
        values.push(value);
        cursor += used;
    }

    Ok(values)
}

/// Encode already-validated values (for example results produced by a host
/// function) into `slots`, starting at index 0.
///
/// # Errors
///
/// Returns [`CallError::UnsupportedType`] or [`CallError::ResultSlots`].
pub fn encode_into(values: &[Value], slots: &mut [u32]) -> Result<(), CallError> {
    let mut encoded = Vec::with_capacity(values.len() * 2);
    for (position, value) in values.iter().enumerate() {
        value
            .push_slots(&mut encoded)
            .ok_or(CallError::UnsupportedType {
                position,
                ty: value.ty(),
            })?;
    }

    let available = slots.len();
    let target = slots
        .get_mut(..encoded.len())
        .ok_or(CallError::ResultSlots {
            needed: encoded.len(),
            available,
        })?;
    target.copy_from_slice(&encoded);
    Ok(())
}

fn push_u64(slots: &mut Vec<u32>, v: u64) {
    slots.push(v as u32);
    slots.push((v >> 32) as u32);
}

fn join_u64(words: &[u32]) -> u64 {
    u64::from(words[0]) | (u64::from(words[1]) << 32)
}

fn parse_int(text: &str) -> Option<i128> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i128::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i128>().ok()?,
    };
    Some(if negative { -magnitude } else { magnitude })
}
