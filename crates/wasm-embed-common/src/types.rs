//! Value types shared by the engine boundary, the marshaller and the errors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A WebAssembly value type as declared in a function signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// 32-bit integer.
    I32,
    /// 64-bit integer.
    I64,
    /// 32-bit IEEE-754 float.
    F32,
    /// 64-bit IEEE-754 float.
    F64,
    /// Function reference, carried as an opaque 32-bit handle.
    FuncRef,
    /// Host/any reference, carried as an opaque 32-bit handle.
    AnyRef,
    /// 128-bit vector. Representable in signatures but not marshallable
    /// through 32-bit argument slots.
    V128,
}

impl ValueType {
    /// Number of 32-bit argument slots a value of this type occupies.
    ///
    /// Returns `None` for types the slot marshaller does not support.
    pub const fn slot_count(self) -> Option<usize> {
        match self {
            Self::I32 | Self::F32 | Self::FuncRef | Self::AnyRef => Some(1),
            Self::I64 | Self::F64 => Some(2),
            Self::V128 => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::FuncRef => "funcref",
            Self::AnyRef => "anyref",
            Self::V128 => "v128",
        };
        f.write_str(name)
    }
}

/// Declared parameter and result types of a function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct FuncSignature {
    /// Parameter types, in order.
    pub params: Vec<ValueType>,

    /// Result types, in order.
    pub results: Vec<ValueType>,
}

impl FuncSignature {
    /// Create a signature from parameter and result types.
    pub fn new(
        params: impl IntoIterator<Item = ValueType>,
        results: impl IntoIterator<Item = ValueType>,
    ) -> Self {
        Self {
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
        }
    }

    /// Slots needed to pass the parameters, or `None` if a parameter type
    /// cannot be marshalled.
    pub fn param_slots(&self) -> Option<usize> {
        total_slots(&self.params)
    }

    /// Slots needed to receive the results, or `None` if a result type
    /// cannot be marshalled.
    pub fn result_slots(&self) -> Option<usize> {
        total_slots(&self.results)
    }
}

impl fmt::Display for FuncSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, ty) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{ty}")?;
        }
        write!(f, ") -> (")?;
        for (i, ty) in self.results.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{ty}")?;
        }
        write!(f, ")")
    }
}

fn total_slots(types: &[ValueType]) -> Option<usize> {
    types
        .iter()
        .try_fold(0usize, |acc, ty| Some(acc + ty.slot_count()?))
}
