//! Calling wasmtime Functions
//!
//! Produces the raw outcome the decoders consume: the result slots of a call
//! and, if it aborted, a [`CallTrap`]. [`call_typed`] runs a resolved decoder
//! over that outcome.

use std::ptr;

use thiserror::Error;
use wasmtime::{AsContextMut, Func, Val, ValRaw};

use crate::decode::{DecodeContext, DecodeError};
use crate::resolver::TypedDecoder;
use crate::trap::{CallTrap, TrapHandle, TrapSignal};
use crate::types::ReturnType;

#[derive(Error, Debug)]
pub enum InvokeError {
    #[error("Function expects {expected} arguments, got {got}")]
    ArgumentCount { expected: usize, got: usize },

    #[error("Decoder reads {expected} result slots but the function returns {got}")]
    ResultCount { expected: usize, got: usize },

    #[error("Result {index} cannot be passed as a raw slot: {reason}")]
    UnsupportedResult { index: usize, reason: String },
}

#[derive(Error, Debug)]
pub enum CallError {
    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// The outcome of one call, before decoding.
#[derive(Debug)]
pub struct RawOutcome {
    pub trap: Option<CallTrap>,
    /// One slot per declared result; zeroed when the call trapped.
    pub slots: Vec<ValRaw>,
}

impl RawOutcome {
    pub fn into_parts(self) -> (TrapSignal, Vec<ValRaw>) {
        let trap = self
            .trap
            .map(|trap| Box::new(trap) as Box<dyn TrapHandle>);
        (trap, self.slots)
    }
}

/// Call `func` and collect its raw outcome.
///
/// Any error raised while the call runs is reported as a trap; only argument
/// count mismatches and results that have no raw slot form are errors here.
///
/// Reference results are only passed through when null. A non-null `funcref`
/// or `externref` fails with [`InvokeError::UnsupportedResult`], so the
/// context-relative reference converters only see slots the embedder builds
/// itself.
pub fn call_raw(
    mut store: impl AsContextMut,
    func: &Func,
    params: &[Val],
) -> Result<RawOutcome, InvokeError> {
    let ty = func.ty(&store);
    let expected = ty.params().len();
    if params.len() != expected {
        return Err(InvokeError::ArgumentCount {
            expected,
            got: params.len(),
        });
    }

    let result_count = ty.results().len();
    let mut results = vec![Val::I32(0); result_count];
    match func.call(&mut store, params, &mut results) {
        Ok(()) => {
            let slots = results
                .iter()
                .enumerate()
                .map(|(index, val)| to_slot(index, val))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(RawOutcome { trap: None, slots })
        }
        Err(error) => Ok(RawOutcome {
            trap: Some(CallTrap::new(error)),
            slots: vec![ValRaw::u64(0); result_count],
        }),
    }
}

fn to_slot(index: usize, val: &Val) -> Result<ValRaw, InvokeError> {
    let slot = match val {
        Val::I32(v) => ValRaw::i32(*v),
        Val::I64(v) => ValRaw::i64(*v),
        Val::F32(bits) => ValRaw::f32(*bits),
        Val::F64(bits) => ValRaw::f64(*bits),
        Val::V128(v) => ValRaw::v128(v.as_u128()),
        Val::FuncRef(None) => ValRaw::funcref(ptr::null_mut()),
        Val::ExternRef(None) => ValRaw::externref(0),
        _ => {
            return Err(InvokeError::UnsupportedResult {
                index,
                reason: String::from("non-null references have no context-free slot form"),
            })
        }
    };
    Ok(slot)
}

/// Call `func` and decode its outcome with `decoder`.
pub fn call_typed<T: ReturnType>(
    mut store: impl AsContextMut,
    func: &Func,
    params: &[Val],
    decoder: &TypedDecoder<T>,
    ctx: &DecodeContext<'_>,
) -> Result<T, CallError> {
    let got = func.ty(&store).results().len();
    let expected = decoder.decoder().arity();
    if got != expected {
        return Err(InvokeError::ResultCount { expected, got }.into());
    }

    let (trap, slots) = call_raw(&mut store, func, params)?.into_parts();
    Ok(decoder.decode(ctx, trap, &slots)?)
}
