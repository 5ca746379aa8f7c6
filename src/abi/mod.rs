//! ABI: Decoded Values
//!
//! The dynamic value model decoders produce, and conversions between it and
//! Rust types.

mod value;

pub use value::{ContextId, ConversionError, ExternRef, FuncRef, Value, ValueType};
