//! Return Decoders
//!
//! A [`ReturnDecoder`] turns the raw outcome of one call (an optional trap
//! handle plus the result slots) into a [`Value`]. Decoders are built once per
//! declared type by the [`Resolver`](crate::Resolver), hold no mutable state,
//! and are shared across threads.
//!
//! ```text
//!                  ┌── trap ──► Single / TupleN ──► Err(DecodeError::Trap)      (propagated)
//! (trap?, slots) ──┤          ► Action / Function ──► builder.failed(diag)      (absorbed)
//!                  └── none ──► read exactly `arity()` slots ──► Ok(value)
//! ```

mod single;
mod tuple;
mod wrapper;

pub use single::SingleDecoder;
pub use tuple::TupleDecoder;
pub use wrapper::{ActionDecoder, FunctionDecoder};

use serde::Serialize;
use thiserror::Error;
use wasmtime::ValRaw;

use crate::abi::{ContextId, ConversionError, Value, ValueType};
use crate::trap::{TrapDiagnostics, TrapFailure, TrapSignal};

/// The execution context a decode runs in.
///
/// Reference-typed values only have identity relative to the context that
/// produced them, so converters get to see it.
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext<'a> {
    id: ContextId,
    live_externs: &'a [u32],
}

impl DecodeContext<'static> {
    pub fn new(id: ContextId) -> Self {
        Self {
            id,
            live_externs: &[],
        }
    }
}

impl<'a> DecodeContext<'a> {
    /// Attach the extern reference indices currently live in this context.
    pub fn with_externs<'b>(self, live_externs: &'b [u32]) -> DecodeContext<'b> {
        DecodeContext {
            id: self.id,
            live_externs,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn is_live_extern(&self, index: u32) -> bool {
        self.live_externs.contains(&index)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error(transparent)]
    Trap(#[from] TrapFailure),

    #[error("conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    #[error("expected {expected} result slots, got {found}")]
    MissingSlots { expected: usize, found: usize },
}

impl DecodeError {
    /// Diagnostics of the trap, if this error is a propagated trap.
    pub fn trap(&self) -> Option<&TrapDiagnostics> {
        match self {
            DecodeError::Trap(failure) => Some(failure.diagnostics()),
            _ => None,
        }
    }
}

/// How a single decode invocation ended.
///
/// Only terminal states are listed. Not-started and decoding are the time
/// before and during the [`ReturnDecoder::decode`] call itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    Succeeded,
    TrapPropagated,
    TrapAbsorbed,
    /// Not a trap: the slots could not be decoded.
    Failed,
}

/// Decoder for one return shape.
#[derive(Debug)]
pub enum ReturnDecoder {
    Single(SingleDecoder),
    Tuple2(TupleDecoder<2>),
    Tuple3(TupleDecoder<3>),
    Tuple4(TupleDecoder<4>),
    Tuple5(TupleDecoder<5>),
    Tuple6(TupleDecoder<6>),
    Tuple7(TupleDecoder<7>),
    Action(ActionDecoder),
    Function(FunctionDecoder),
}

impl ReturnDecoder {
    /// Number of result slots this decoder reads on success.
    pub fn arity(&self) -> usize {
        match self {
            ReturnDecoder::Single(_) => 1,
            ReturnDecoder::Tuple2(_) => 2,
            ReturnDecoder::Tuple3(_) => 3,
            ReturnDecoder::Tuple4(_) => 4,
            ReturnDecoder::Tuple5(_) => 5,
            ReturnDecoder::Tuple6(_) => 6,
            ReturnDecoder::Tuple7(_) => 7,
            ReturnDecoder::Action(_) => 0,
            ReturnDecoder::Function(decoder) => decoder.inner().arity(),
        }
    }

    /// Value type of each slot read on success, in slot order.
    pub fn slot_types(&self) -> Vec<ValueType> {
        fn types<const N: usize>(decoder: &TupleDecoder<N>) -> Vec<ValueType> {
            decoder
                .components()
                .iter()
                .map(|single| single.value_type().clone())
                .collect()
        }

        match self {
            ReturnDecoder::Single(decoder) => vec![decoder.value_type().clone()],
            ReturnDecoder::Tuple2(decoder) => types(decoder),
            ReturnDecoder::Tuple3(decoder) => types(decoder),
            ReturnDecoder::Tuple4(decoder) => types(decoder),
            ReturnDecoder::Tuple5(decoder) => types(decoder),
            ReturnDecoder::Tuple6(decoder) => types(decoder),
            ReturnDecoder::Tuple7(decoder) => types(decoder),
            ReturnDecoder::Action(_) => Vec::new(),
            ReturnDecoder::Function(decoder) => decoder.inner().slot_types(),
        }
    }

    /// Whether a trap becomes a value instead of an error.
    pub fn absorbs_traps(&self) -> bool {
        matches!(self, ReturnDecoder::Action(_) | ReturnDecoder::Function(_))
    }

    /// Decode one call outcome. The trap handle, if any, is consumed.
    pub fn decode(
        &self,
        ctx: &DecodeContext<'_>,
        trap: TrapSignal,
        slots: &[ValRaw],
    ) -> Result<Value, DecodeError> {
        let trapped = trap.is_some();
        let result = match self {
            ReturnDecoder::Single(decoder) => decoder.decode(ctx, trap, slots),
            ReturnDecoder::Tuple2(decoder) => decoder.decode(ctx, trap, slots),
            ReturnDecoder::Tuple3(decoder) => decoder.decode(ctx, trap, slots),
            ReturnDecoder::Tuple4(decoder) => decoder.decode(ctx, trap, slots),
            ReturnDecoder::Tuple5(decoder) => decoder.decode(ctx, trap, slots),
            ReturnDecoder::Tuple6(decoder) => decoder.decode(ctx, trap, slots),
            ReturnDecoder::Tuple7(decoder) => decoder.decode(ctx, trap, slots),
            ReturnDecoder::Action(decoder) => Ok(decoder.decode(trap)),
            ReturnDecoder::Function(decoder) => decoder.decode(ctx, trap, slots),
        };

        let outcome = match (&result, trapped) {
            (Ok(_), false) => DecodeOutcome::Succeeded,
            (Ok(_), true) => DecodeOutcome::TrapAbsorbed,
            (Err(DecodeError::Trap(_)), _) => DecodeOutcome::TrapPropagated,
            (Err(_), _) => DecodeOutcome::Failed,
        };
        tracing::trace!(shape = self.shape_name(), ?outcome, "decoded call outcome");
        result
    }

    fn shape_name(&self) -> &'static str {
        match self {
            ReturnDecoder::Single(_) => "single",
            ReturnDecoder::Tuple2(_) => "tuple2",
            ReturnDecoder::Tuple3(_) => "tuple3",
            ReturnDecoder::Tuple4(_) => "tuple4",
            ReturnDecoder::Tuple5(_) => "tuple5",
            ReturnDecoder::Tuple6(_) => "tuple6",
            ReturnDecoder::Tuple7(_) => "tuple7",
            ReturnDecoder::Action(_) => "action-result",
            ReturnDecoder::Function(_) => "function-result",
        }
    }

    /// A serializable description of what this decoder does.
    pub fn plan(&self) -> DecodePlan {
        let components = match self {
            ReturnDecoder::Single(decoder) => vec![decoder.value_type().to_string()],
            ReturnDecoder::Tuple2(decoder) => decoder.component_types(),
            ReturnDecoder::Tuple3(decoder) => decoder.component_types(),
            ReturnDecoder::Tuple4(decoder) => decoder.component_types(),
            ReturnDecoder::Tuple5(decoder) => decoder.component_types(),
            ReturnDecoder::Tuple6(decoder) => decoder.component_types(),
            ReturnDecoder::Tuple7(decoder) => decoder.component_types(),
            ReturnDecoder::Action(_) | ReturnDecoder::Function(_) => Vec::new(),
        };
        let inner = match self {
            ReturnDecoder::Function(decoder) => Some(Box::new(decoder.inner().plan())),
            _ => None,
        };
        DecodePlan {
            shape: self.shape_name(),
            arity: self.arity(),
            absorbs_traps: self.absorbs_traps(),
            components,
            inner,
        }
    }
}

/// Serializable summary of a resolved decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodePlan {
    pub shape: &'static str,
    pub arity: usize,
    pub absorbs_traps: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inner: Option<Box<DecodePlan>>,
}

/// Fail with `MissingSlots` unless at least `expected` slots are present.
fn require_slots(slots: &[ValRaw], expected: usize) -> Result<&[ValRaw], DecodeError> {
    if slots.len() < expected {
        return Err(DecodeError::MissingSlots {
            expected,
            found: slots.len(),
        });
    }
    Ok(&slots[..expected])
}
