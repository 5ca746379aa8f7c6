//! Return Shape Resolver
//!
//! Classifies a declared return type into one of the supported shapes, builds
//! the matching decoder bottom-up and memoizes it per type. Classification
//! order:
//!
//! 1. a wrapper carrying exactly one result capability
//! 2. a tuple of 2 to 7 scalars
//! 3. a scalar with a registered converter
//!
//! Anything else is a configuration error reported at resolution time, never
//! deferred to a call.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use wasmtime::ValRaw;

use crate::abi::ValueType;
use crate::config::MarshalConfig;
use crate::convert::ConverterRegistry;
use crate::decode::{
    ActionDecoder, DecodeContext, DecodeError, FunctionDecoder, ReturnDecoder, SingleDecoder,
    TupleDecoder,
};
use crate::trap::TrapSignal;
use crate::types::{ResultCapability, ReturnType, TypeDescriptor, TypeKey};

/// Largest tuple a decoder can be built for.
pub const MAX_TUPLE_ARITY: usize = 7;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unsupported return shape `{ty}`: {reason}")]
    UnsupportedShape { ty: String, reason: String },

    #[error("no value converter registered for `{value_type}`")]
    ConverterMissing { value_type: ValueType },
}

fn unsupported(ty: &TypeDescriptor, reason: impl Into<String>) -> ResolveError {
    ResolveError::UnsupportedShape {
        ty: ty.to_string(),
        reason: reason.into(),
    }
}

/// Resolves declared return types into cached decoders.
pub struct Resolver {
    registry: ConverterRegistry,
    config: MarshalConfig,
    cache: RwLock<HashMap<TypeKey, Arc<ReturnDecoder>>>,
}

impl Resolver {
    pub fn new() -> Self {
        Self::with_config(MarshalConfig::default())
    }

    /// A resolver over the default converters, configured by `config`.
    pub fn with_config(config: MarshalConfig) -> Self {
        let registry = ConverterRegistry::with_defaults(&config);
        Self::with_registry(registry, config)
    }

    pub fn with_registry(registry: ConverterRegistry, config: MarshalConfig) -> Self {
        Self {
            registry,
            config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &ConverterRegistry {
        &self.registry
    }

    pub fn config(&self) -> &MarshalConfig {
        &self.config
    }

    /// Number of types with a cached decoder.
    pub fn cached_types(&self) -> usize {
        self.cache.read().len()
    }

    /// Get the decoder for `ty`, building it on first use.
    ///
    /// Types are cached by structure, not by their text form. Wrappers are told
    /// apart from scalars of the same name, and by their capabilities and
    /// builders. Concurrent first uses may each build a decoder; the first one
    /// published wins and every caller gets that instance.
    pub fn resolve(&self, ty: &TypeDescriptor) -> Result<Arc<ReturnDecoder>, ResolveError> {
        let key = ty.key();
        if let Some(decoder) = self.cache.read().get(&key) {
            return Ok(Arc::clone(decoder));
        }

        let built = match self.build(ty) {
            Ok(decoder) => Arc::new(decoder),
            Err(err) => {
                tracing::error!(ty = %ty, error = %err, "cannot resolve return type");
                return Err(err);
            }
        };

        let mut cache = self.cache.write();
        if let Some(existing) = cache.get(&key) {
            tracing::debug!(ty = %ty, "discarding duplicate decoder build");
            return Ok(Arc::clone(existing));
        }
        if let Some(max) = self.config.max_cached_types {
            if cache.len() >= max {
                tracing::warn!(ty = %ty, max, "decoder cache full, not caching");
                return Ok(built);
            }
        }
        tracing::debug!(ty = %ty, arity = built.arity(), "cached decoder");
        cache.insert(key, Arc::clone(&built));
        Ok(built)
    }

    /// Get a typed decoder for the Rust return type `T`.
    pub fn resolve_typed<T: ReturnType>(&self) -> Result<TypedDecoder<T>, ResolveError> {
        let inner = self.resolve(&T::descriptor())?;
        Ok(TypedDecoder {
            inner,
            _marker: PhantomData,
        })
    }

    fn build(&self, ty: &TypeDescriptor) -> Result<ReturnDecoder, ResolveError> {
        match ty {
            TypeDescriptor::Wrapper { capabilities, .. } => match capabilities.as_slice() {
                [ResultCapability::Action(builder)] => {
                    Ok(ReturnDecoder::Action(ActionDecoder::new(Arc::clone(builder))))
                }
                [ResultCapability::Function { value, builder }] => {
                    let inner = self.resolve(value)?;
                    Ok(ReturnDecoder::Function(FunctionDecoder::new(
                        inner,
                        Arc::clone(builder),
                    )))
                }
                [] => Err(unsupported(ty, "type declares no result capability")),
                _ => Err(unsupported(ty, "type declares more than one result capability")),
            },
            TypeDescriptor::Tuple(components) => self.build_tuple(ty, components),
            TypeDescriptor::Scalar(value_type) => {
                Ok(ReturnDecoder::Single(self.single(value_type)?))
            }
        }
    }

    fn build_tuple(
        &self,
        ty: &TypeDescriptor,
        components: &[TypeDescriptor],
    ) -> Result<ReturnDecoder, ResolveError> {
        if components.len() > MAX_TUPLE_ARITY {
            return Err(unsupported(
                ty,
                format!(
                    "tuples of {} elements exceed the maximum arity of {}",
                    components.len(),
                    MAX_TUPLE_ARITY
                ),
            ));
        }
        if components.len() < 2 {
            return Err(unsupported(ty, "tuples need at least 2 elements"));
        }

        let singles = components
            .iter()
            .map(|component| match component {
                TypeDescriptor::Scalar(value_type) => self.single(value_type),
                nested => Err(unsupported(
                    ty,
                    format!("tuple element `{}` is not a scalar", nested),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let decoder = match singles.len() {
            2 => tuple(singles).map(ReturnDecoder::Tuple2),
            3 => tuple(singles).map(ReturnDecoder::Tuple3),
            4 => tuple(singles).map(ReturnDecoder::Tuple4),
            5 => tuple(singles).map(ReturnDecoder::Tuple5),
            6 => tuple(singles).map(ReturnDecoder::Tuple6),
            7 => tuple(singles).map(ReturnDecoder::Tuple7),
            _ => None,
        };
        decoder.ok_or_else(|| unsupported(ty, "unsupported tuple arity"))
    }

    fn single(&self, value_type: &ValueType) -> Result<SingleDecoder, ResolveError> {
        let converter =
            self.registry
                .converter_for(value_type)
                .ok_or_else(|| ResolveError::ConverterMissing {
                    value_type: value_type.clone(),
                })?;
        Ok(SingleDecoder::new(value_type.clone(), converter))
    }
}

fn tuple<const N: usize>(singles: Vec<SingleDecoder>) -> Option<TupleDecoder<N>> {
    let components: [SingleDecoder; N] = singles.try_into().ok()?;
    Some(TupleDecoder::new(components))
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("cached_types", &self.cached_types())
            .finish()
    }
}

/// A resolved decoder producing `T` instead of a dynamic value.
pub struct TypedDecoder<T> {
    inner: Arc<ReturnDecoder>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ReturnType> TypedDecoder<T> {
    pub fn decoder(&self) -> &Arc<ReturnDecoder> {
        &self.inner
    }

    pub fn decode(
        &self,
        ctx: &DecodeContext<'_>,
        trap: TrapSignal,
        slots: &[ValRaw],
    ) -> Result<T, DecodeError> {
        let value = self.inner.decode(ctx, trap, slots)?;
        Ok(T::try_from(value)?)
    }
}

impl<T> Clone for TypedDecoder<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for TypedDecoder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypedDecoder").field(&self.inner).finish()
    }
}
