use wasmtime::ValRaw;

use super::{require_slots, DecodeContext, DecodeError, SingleDecoder};
use crate::abi::{ConversionError, Value};
use crate::trap::{TrapFailure, TrapSignal};

/// Decodes `N` consecutive slots, slot `i` into component `i`.
#[derive(Debug, Clone)]
pub struct TupleDecoder<const N: usize> {
    components: [SingleDecoder; N],
}

impl<const N: usize> TupleDecoder<N> {
    pub fn new(components: [SingleDecoder; N]) -> Self {
        Self { components }
    }

    pub fn components(&self) -> &[SingleDecoder; N] {
        &self.components
    }

    pub fn component_types(&self) -> Vec<String> {
        self.components
            .iter()
            .map(|component| component.value_type().to_string())
            .collect()
    }

    pub fn decode(
        &self,
        ctx: &DecodeContext<'_>,
        trap: TrapSignal,
        slots: &[ValRaw],
    ) -> Result<Value, DecodeError> {
        // A trap fails the whole tuple before any component runs
        if let Some(handle) = trap {
            return Err(TrapFailure::from_handle(handle).into());
        }
        let slots = require_slots(slots, N)?;

        let mut items = Vec::with_capacity(N);
        for (index, component) in self.components.iter().enumerate() {
            let item = component
                .unbox(ctx, &slots[index..=index])
                .map_err(|err| match err {
                    DecodeError::Conversion(err) => {
                        ConversionError::IndexError(index, Box::new(err)).into()
                    }
                    other => other,
                })?;
            items.push(item);
        }
        Ok(Value::Tuple(items))
    }
}
