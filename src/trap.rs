//! Trap Signals
//!
//! A call that aborts abnormally hands the decoder a trap handle instead of
//! meaningful result slots. The handle owns the diagnostic data; decoders take
//! it by value and consume it through [`TrapHandle::into_diagnostics`], so it is
//! disposed exactly once whether the trap is propagated or absorbed.

use std::fmt;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;
use wasmtime::{Trap, WasmBacktrace};

/// The trap signal passed alongside the raw slots of a call.
///
/// `None` means the call returned normally.
pub type TrapSignal = Option<Box<dyn TrapHandle>>;

/// An owned, consume-once handle to the diagnostics of an aborted call.
///
/// Dropping the box disposes the handle. Implementors release any resources
/// they hold in `Drop`.
pub trait TrapHandle: Send {
    /// Read the diagnostics, consuming the handle.
    fn into_diagnostics(self: Box<Self>) -> TrapDiagnostics;
}

/// What is known about why a call aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrapDiagnostics {
    message: String,
    code: Option<Trap>,
    backtrace: Option<String>,
}

impl TrapDiagnostics {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            backtrace: None,
        }
    }

    /// Diagnostics for a trap raised by the engine with a known code.
    pub fn from_code(code: Trap) -> Self {
        Self {
            message: code.to_string(),
            code: Some(code),
            backtrace: None,
        }
    }

    pub fn with_backtrace(mut self, backtrace: impl Into<String>) -> Self {
        self.backtrace = Some(backtrace.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> Option<Trap> {
        self.code
    }

    pub fn backtrace(&self) -> Option<&str> {
        self.backtrace.as_deref()
    }
}

impl fmt::Display for TrapDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

// `wasmtime::Trap` has no serde support, so the code is written by name.
impl Serialize for TrapDiagnostics {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("TrapDiagnostics", 3)?;
        state.serialize_field("message", &self.message)?;
        state.serialize_field("code", &self.code.map(|code| format!("{:?}", code)))?;
        state.serialize_field("backtrace", &self.backtrace)?;
        state.end()
    }
}

/// Already-extracted diagnostics can stand in for a handle.
impl TrapHandle for TrapDiagnostics {
    fn into_diagnostics(self: Box<Self>) -> TrapDiagnostics {
        *self
    }
}

/// A trap handle over the error returned by a wasmtime call.
pub struct CallTrap {
    error: wasmtime::Error,
}

impl CallTrap {
    pub fn new(error: wasmtime::Error) -> Self {
        Self { error }
    }

    /// The engine trap code, when the call failed with a wasm trap.
    pub fn code(&self) -> Option<Trap> {
        self.error.downcast_ref::<Trap>().copied()
    }
}

impl fmt::Debug for CallTrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallTrap")
            .field("code", &self.code())
            .finish_non_exhaustive()
    }
}

impl TrapHandle for CallTrap {
    fn into_diagnostics(self: Box<Self>) -> TrapDiagnostics {
        let diagnostics = match self.code() {
            Some(code) => TrapDiagnostics::from_code(code),
            // Host errors and other aborts carry no trap code
            None => TrapDiagnostics::new(format!("{:#}", self.error)),
        };
        match self.error.downcast_ref::<WasmBacktrace>() {
            Some(backtrace) => diagnostics.with_backtrace(backtrace.to_string()),
            None => diagnostics,
        }
    }
}

/// A trap propagated to the caller as a failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("call trapped: {diagnostics}")]
pub struct TrapFailure {
    diagnostics: TrapDiagnostics,
}

impl TrapFailure {
    /// Consume the handle into a failure.
    pub fn from_handle(handle: Box<dyn TrapHandle>) -> Self {
        Self {
            diagnostics: handle.into_diagnostics(),
        }
    }

    pub fn diagnostics(&self) -> &TrapDiagnostics {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> TrapDiagnostics {
        self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_trap_reads_engine_code() {
        let handle: Box<dyn TrapHandle> =
            Box::new(CallTrap::new(wasmtime::Error::new(Trap::IntegerDivisionByZero)));
        let diagnostics = handle.into_diagnostics();
        assert_eq!(diagnostics.code(), Some(Trap::IntegerDivisionByZero));
        assert!(diagnostics.message().contains("divide by zero"));
    }

    #[test]
    fn test_call_trap_without_code_keeps_error_chain() {
        let error = wasmtime::Error::msg("host exploded").context("calling `run`");
        let diagnostics = Box::new(CallTrap::new(error)).into_diagnostics();
        assert_eq!(diagnostics.code(), None);
        assert!(diagnostics.message().contains("calling `run`"));
        assert!(diagnostics.message().contains("host exploded"));
    }

    #[test]
    fn test_trap_failure_display() {
        let failure = TrapFailure::from_handle(Box::new(TrapDiagnostics::new("divide by zero")));
        assert_eq!(failure.to_string(), "call trapped: divide by zero");
        assert_eq!(failure.diagnostics().message(), "divide by zero");
    }

    #[test]
    fn test_diagnostics_serialize_code_by_name() {
        let json = serde_json::to_value(TrapDiagnostics::from_code(Trap::UnreachableCodeReached))
            .unwrap();
        assert_eq!(json["code"], "UnreachableCodeReached");
    }
}
