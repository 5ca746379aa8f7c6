use std::fmt;
use std::sync::Arc;

use wasmtime::ValRaw;

use super::{DecodeContext, DecodeError, ReturnDecoder};
use crate::abi::Value;
use crate::trap::TrapSignal;
use crate::types::{ActionBuilder, FunctionBuilder};

/// Decoder for a value-less result wrapper. Never reads a slot.
#[derive(Clone)]
pub struct ActionDecoder {
    builder: Arc<dyn ActionBuilder>,
}

impl ActionDecoder {
    pub fn new(builder: Arc<dyn ActionBuilder>) -> Self {
        Self { builder }
    }

    pub fn decode(&self, trap: TrapSignal) -> Value {
        match trap {
            Some(handle) => self.builder.failed(handle.into_diagnostics()),
            None => self.builder.succeeded(),
        }
    }
}

impl fmt::Debug for ActionDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDecoder").finish_non_exhaustive()
    }
}

/// Decoder for a value-carrying result wrapper.
#[derive(Clone)]
pub struct FunctionDecoder {
    inner: Arc<ReturnDecoder>,
    builder: Arc<dyn FunctionBuilder>,
}

impl FunctionDecoder {
    pub fn new(inner: Arc<ReturnDecoder>, builder: Arc<dyn FunctionBuilder>) -> Self {
        Self { inner, builder }
    }

    pub fn inner(&self) -> &ReturnDecoder {
        &self.inner
    }

    pub fn decode(
        &self,
        ctx: &DecodeContext<'_>,
        trap: TrapSignal,
        slots: &[ValRaw],
    ) -> Result<Value, DecodeError> {
        match trap {
            // The inner decoder must not look at slots of a trapped call
            Some(handle) => Ok(self.builder.failed(handle.into_diagnostics())),
            None => {
                let value = self.inner.decode(ctx, None, slots)?;
                Ok(self.builder.succeeded(value))
            }
        }
    }
}

impl fmt::Debug for FunctionDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDecoder")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}
