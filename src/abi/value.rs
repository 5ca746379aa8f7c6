//! Decoded values

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trap::TrapDiagnostics;

/// Scalar type tag a single raw slot is interpreted as.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Bool,
    U8,
    U16,
    U32,
    U64,
    S8,
    S16,
    S32,
    S64,
    F32,
    F64,
    Char,
    V128,
    FuncRef,
    ExternRef,
    /// Host-defined opaque type, decoded by a converter registered under this name
    Named(String),
}

impl ValueType {
    /// Every type the default converter registry knows how to decode.
    pub fn builtin() -> [ValueType; 15] {
        [
            ValueType::Bool,
            ValueType::U8,
            ValueType::U16,
            ValueType::U32,
            ValueType::U64,
            ValueType::S8,
            ValueType::S16,
            ValueType::S32,
            ValueType::S64,
            ValueType::F32,
            ValueType::F64,
            ValueType::Char,
            ValueType::V128,
            ValueType::FuncRef,
            ValueType::ExternRef,
        ]
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Bool => "bool",
            ValueType::U8 => "u8",
            ValueType::U16 => "u16",
            ValueType::U32 => "u32",
            ValueType::U64 => "u64",
            ValueType::S8 => "s8",
            ValueType::S16 => "s16",
            ValueType::S32 => "s32",
            ValueType::S64 => "s64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
            ValueType::Char => "char",
            ValueType::V128 => "v128",
            ValueType::FuncRef => "funcref",
            ValueType::ExternRef => "externref",
            ValueType::Named(name) => name,
        };
        f.write_str(name)
    }
}

impl FromStr for ValueType {
    type Err = ConversionError;

    /// Keywords map to builtin types, any other identifier names an opaque type.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ty = match s {
            "bool" => ValueType::Bool,
            "u8" => ValueType::U8,
            "u16" => ValueType::U16,
            "u32" => ValueType::U32,
            "u64" => ValueType::U64,
            "s8" | "i8" => ValueType::S8,
            "s16" | "i16" => ValueType::S16,
            "s32" | "i32" => ValueType::S32,
            "s64" | "i64" => ValueType::S64,
            "f32" => ValueType::F32,
            "f64" => ValueType::F64,
            "char" => ValueType::Char,
            "v128" => ValueType::V128,
            "funcref" => ValueType::FuncRef,
            "externref" => ValueType::ExternRef,
            name if is_identifier(name) => ValueType::Named(name.to_string()),
            other => return Err(ConversionError::UnknownType(other.to_string())),
        };
        Ok(ty)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == ':')
}

/// Identity of the execution context a reference value was decoded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(u64);

impl ContextId {
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Allocate a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Non-null function reference, only meaningful inside the context it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FuncRef {
    pub context: ContextId,
    pub addr: usize,
}

/// Non-null extern reference: an index into the context's host reference table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ExternRef {
    pub context: ContextId,
    pub index: u32,
}

/// A value decoded from the raw outcome of a call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    // Scalars
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    S8(i8),
    S16(i16),
    S32(i32),
    S64(i64),
    F32(f32),
    F64(f64),
    Char(char),
    V128(u128),
    FuncRef(Option<FuncRef>),
    ExternRef(Option<ExternRef>),
    Opaque { type_name: String, bits: u64 },

    // Composite shapes
    Tuple(Vec<Value>),
    Action(Result<(), TrapDiagnostics>),
    Function(Result<Box<Value>, TrapDiagnostics>),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("invalid {ty} bit pattern: {bits:#x}")]
    InvalidBits { ty: ValueType, bits: u64 },

    #[error("extern reference {index} is not live in context {context}")]
    DanglingRef { context: u64, index: u32 },

    #[error("unknown value type: {0}")]
    UnknownType(String),

    #[error("expected tuple of {expected} elements, got {got}")]
    TupleArity { expected: usize, got: String },

    #[error("element {0}: {1}")]
    IndexError(usize, Box<ConversionError>),
}

// ============================================================================
// Scalar conversions
// ============================================================================

macro_rules! scalar_conversions {
    ($($rust:ty => $variant:ident, $name:literal;)*) => {
        $(
            impl From<$rust> for Value {
                fn from(v: $rust) -> Self {
                    Value::$variant(v)
                }
            }

            impl TryFrom<Value> for $rust {
                type Error = ConversionError;
                fn try_from(v: Value) -> Result<Self, Self::Error> {
                    match v {
                        Value::$variant(x) => Ok(x),
                        other => Err(ConversionError::TypeMismatch {
                            expected: String::from($name),
                            got: format!("{:?}", other),
                        }),
                    }
                }
            }
        )*
    };
}

scalar_conversions! {
    bool => Bool, "bool";
    u8 => U8, "u8";
    u16 => U16, "u16";
    u32 => U32, "u32";
    u64 => U64, "u64";
    i8 => S8, "s8";
    i16 => S16, "s16";
    i32 => S32, "s32";
    i64 => S64, "s64";
    f32 => F32, "f32";
    f64 => F64, "f64";
    char => Char, "char";
    u128 => V128, "v128";
    Option<FuncRef> => FuncRef, "funcref";
    Option<ExternRef> => ExternRef, "externref";
}

// ============================================================================
// Tuple conversions, arity 2 through 7
// ============================================================================

macro_rules! tuple_conversions {
    ($n:literal: $($t:ident $idx:tt),+) => {
        #[allow(non_snake_case)]
        impl<$($t: TryFrom<Value, Error = ConversionError>),+> TryFrom<Value> for ($($t,)+) {
            type Error = ConversionError;
            fn try_from(v: Value) -> Result<Self, Self::Error> {
                match v {
                    Value::Tuple(items) if items.len() == $n => {
                        let mut items = items.into_iter();
                        $(
                            let $t = items
                                .next()
                                .ok_or_else(|| ConversionError::TupleArity {
                                    expected: $n,
                                    got: String::from("fewer elements"),
                                })
                                .and_then($t::try_from)
                                .map_err(|e| ConversionError::IndexError($idx, Box::new(e)))?;
                        )+
                        Ok(($($t,)+))
                    }
                    other => Err(ConversionError::TupleArity {
                        expected: $n,
                        got: format!("{:?}", other),
                    }),
                }
            }
        }
    };
}

tuple_conversions!(2: A 0, B 1);
tuple_conversions!(3: A 0, B 1, C 2);
tuple_conversions!(4: A 0, B 1, C 2, D 3);
tuple_conversions!(5: A 0, B 1, C 2, D 3, E 4);
tuple_conversions!(6: A 0, B 1, C 2, D 3, E 4, F 5);
tuple_conversions!(7: A 0, B 1, C 2, D 3, E 4, F 5, G 6);
