//! Value Converter Registry
//!
//! One stateless converter per scalar type turns a raw slot into a [`Value`].
//! Narrow integers are lifted by truncating the slot's `i32`, the way the
//! component model lifts them. Reference types are resolved against the
//! [`DecodeContext`] because their identity only means something inside it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use wasmtime::ValRaw;

use crate::abi::{ConversionError, ExternRef, FuncRef, Value, ValueType};
use crate::config::MarshalConfig;
use crate::decode::DecodeContext;

/// Converts one raw slot into one value.
pub trait ValueConverter: Send + Sync {
    fn unbox(&self, ctx: &DecodeContext<'_>, slot: &ValRaw) -> Result<Value, ConversionError>;
}

/// Wrap a closure as a converter.
pub fn from_fn<F>(f: F) -> Arc<dyn ValueConverter>
where
    F: Fn(&DecodeContext<'_>, &ValRaw) -> Result<Value, ConversionError> + Send + Sync + 'static,
{
    Arc::new(FnConverter(f))
}

struct FnConverter<F>(F);

impl<F> ValueConverter for FnConverter<F>
where
    F: Fn(&DecodeContext<'_>, &ValRaw) -> Result<Value, ConversionError> + Send + Sync,
{
    fn unbox(&self, ctx: &DecodeContext<'_>, slot: &ValRaw) -> Result<Value, ConversionError> {
        (self.0)(ctx, slot)
    }
}

/// Converter for the builtin scalar and reference types.
#[derive(Debug, Clone)]
pub struct ScalarConverter {
    ty: ValueType,
    strict_booleans: bool,
}

impl ScalarConverter {
    pub fn new(ty: ValueType, config: &MarshalConfig) -> Self {
        Self {
            ty,
            strict_booleans: config.strict_booleans,
        }
    }
}

impl ValueConverter for ScalarConverter {
    fn unbox(&self, ctx: &DecodeContext<'_>, slot: &ValRaw) -> Result<Value, ConversionError> {
        let value = match &self.ty {
            ValueType::Bool => {
                let raw = slot.get_u32();
                if self.strict_booleans && raw > 1 {
                    return Err(ConversionError::InvalidBits {
                        ty: ValueType::Bool,
                        bits: u64::from(raw),
                    });
                }
                Value::Bool(raw != 0)
            }
            ValueType::U8 => Value::U8(slot.get_u32() as u8),
            ValueType::U16 => Value::U16(slot.get_u32() as u16),
            ValueType::U32 => Value::U32(slot.get_u32()),
            ValueType::U64 => Value::U64(slot.get_u64()),
            ValueType::S8 => Value::S8(slot.get_i32() as i8),
            ValueType::S16 => Value::S16(slot.get_i32() as i16),
            ValueType::S32 => Value::S32(slot.get_i32()),
            ValueType::S64 => Value::S64(slot.get_i64()),
            ValueType::F32 => Value::F32(f32::from_bits(slot.get_f32())),
            ValueType::F64 => Value::F64(f64::from_bits(slot.get_f64())),
            ValueType::Char => {
                let raw = slot.get_u32();
                let c = char::from_u32(raw).ok_or(ConversionError::InvalidBits {
                    ty: ValueType::Char,
                    bits: u64::from(raw),
                })?;
                Value::Char(c)
            }
            ValueType::V128 => Value::V128(slot.get_v128()),
            ValueType::FuncRef => {
                let ptr = slot.get_funcref();
                let func = (!ptr.is_null()).then(|| FuncRef {
                    context: ctx.id(),
                    addr: ptr as usize,
                });
                Value::FuncRef(func)
            }
            ValueType::ExternRef => match slot.get_externref() {
                0 => Value::ExternRef(None),
                index if ctx.is_live_extern(index) => Value::ExternRef(Some(ExternRef {
                    context: ctx.id(),
                    index,
                })),
                index => {
                    return Err(ConversionError::DanglingRef {
                        context: ctx.id().as_u64(),
                        index,
                    })
                }
            },
            ValueType::Named(name) => {
                return Err(ConversionError::UnknownType(name.clone()));
            }
        };
        Ok(value)
    }
}

/// Converter for a host-defined opaque type: keeps the slot's 64 bits as-is.
#[derive(Debug, Clone)]
pub struct OpaqueConverter {
    type_name: String,
}

impl ValueConverter for OpaqueConverter {
    fn unbox(&self, _ctx: &DecodeContext<'_>, slot: &ValRaw) -> Result<Value, ConversionError> {
        Ok(Value::Opaque {
            type_name: self.type_name.clone(),
            bits: slot.get_u64(),
        })
    }
}

/// Converters keyed by the value type they decode.
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    converters: HashMap<ValueType, Arc<dyn ValueConverter>>,
}

impl ConverterRegistry {
    /// A registry with no converters at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry with a converter for every builtin type.
    pub fn with_defaults(config: &MarshalConfig) -> Self {
        let mut registry = Self::empty();
        for ty in ValueType::builtin() {
            let converter = Arc::new(ScalarConverter::new(ty.clone(), config));
            registry.register(ty, converter);
        }
        registry
    }

    /// Register a converter, returning the one it replaces.
    pub fn register(
        &mut self,
        ty: ValueType,
        converter: Arc<dyn ValueConverter>,
    ) -> Option<Arc<dyn ValueConverter>> {
        self.converters.insert(ty, converter)
    }

    /// Register `name` as an opaque 64-bit host type.
    pub fn register_opaque(&mut self, name: impl Into<String>) {
        let type_name = name.into();
        let converter = Arc::new(OpaqueConverter {
            type_name: type_name.clone(),
        });
        self.register(ValueType::Named(type_name), converter);
    }

    pub fn converter_for(&self, ty: &ValueType) -> Option<Arc<dyn ValueConverter>> {
        self.converters.get(ty).cloned()
    }

    pub fn contains(&self, ty: &ValueType) -> bool {
        self.converters.contains_key(ty)
    }
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<String> = self.converters.keys().map(ToString::to_string).collect();
        types.sort();
        f.debug_struct("ConverterRegistry")
            .field("types", &types)
            .finish()
    }
}
