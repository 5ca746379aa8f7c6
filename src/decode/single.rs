use std::fmt;
use std::sync::Arc;

use wasmtime::ValRaw;

use super::{require_slots, DecodeContext, DecodeError};
use crate::abi::{Value, ValueType};
use crate::convert::ValueConverter;
use crate::trap::{TrapFailure, TrapSignal};

/// Decodes slot 0 into one scalar or opaque value.
#[derive(Clone)]
pub struct SingleDecoder {
    ty: ValueType,
    converter: Arc<dyn ValueConverter>,
}

impl SingleDecoder {
    pub fn new(ty: ValueType, converter: Arc<dyn ValueConverter>) -> Self {
        Self { ty, converter }
    }

    pub fn value_type(&self) -> &ValueType {
        &self.ty
    }

    pub fn decode(
        &self,
        ctx: &DecodeContext<'_>,
        trap: TrapSignal,
        slots: &[ValRaw],
    ) -> Result<Value, DecodeError> {
        // Slot contents are undefined after a trap
        if let Some(handle) = trap {
            return Err(TrapFailure::from_handle(handle).into());
        }
        self.unbox(ctx, slots)
    }

    /// Convert slot 0 without any trap handling.
    pub(super) fn unbox(&self, ctx: &DecodeContext<'_>, slots: &[ValRaw]) -> Result<Value, DecodeError> {
        let slots = require_slots(slots, 1)?;
        Ok(self.converter.unbox(ctx, &slots[0])?)
    }
}

impl fmt::Debug for SingleDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleDecoder")
            .field("ty", &self.ty)
            .finish_non_exhaustive()
    }
}
