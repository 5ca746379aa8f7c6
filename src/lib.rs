//! retshape: type-driven decoding of WebAssembly call results
//!
//! A host declares the return type it expects from a call. The resolver works
//! out once, before any call happens, how the raw outcome of that call (a
//! fixed array of result slots plus an optional trap) becomes a value of that
//! type, and caches the decoder for every later call.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  resolver  - shape classification/cache │
//! │  decode    - Single, Tuple2..7,         │
//! │              ActionResult/FunctionResult│
//! │  convert   - per-scalar converters      │
//! │  trap      - consume-once trap handles  │
//! ├─────────────────────────────────────────┤
//! │  invoke    - wasmtime call adapter      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! let resolver = Resolver::new();
//! let decoder = resolver.resolve_typed::<FunctionResult<(i32, f64)>>()?;
//!
//! let ctx = DecodeContext::new(ContextId::next());
//! match call_typed(&mut store, &func, &[Val::I32(7)], &decoder, &ctx)? {
//!     FunctionResult(Ok((count, mean))) => println!("{count} {mean}"),
//!     FunctionResult(Err(trap)) => println!("trapped: {trap}"),
//! }
//! ```

pub mod abi;
pub mod config;
pub mod convert;
pub mod decode;
pub mod invoke;
pub mod resolver;
pub mod trap;
pub mod types;

pub use abi::{ContextId, ConversionError, Value, ValueType};
pub use config::MarshalConfig;
pub use convert::{ConverterRegistry, ValueConverter};
pub use decode::{DecodeContext, DecodeError, DecodePlan, ReturnDecoder};
pub use invoke::{call_raw, call_typed, CallError, InvokeError, RawOutcome};
pub use resolver::{ResolveError, Resolver, TypedDecoder};
pub use trap::{CallTrap, TrapDiagnostics, TrapFailure, TrapHandle, TrapSignal};
pub use types::{ActionResult, FunctionResult, ReturnType, TypeDescriptor};
