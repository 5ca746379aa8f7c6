//! Declared Return Types
//!
//! A [`TypeDescriptor`] is what a host declares as the return type of a call.
//! Result wrappers are nominal types that opt into trap absorption by carrying
//! a [`ResultCapability`]; plain tuples and scalars never absorb traps.
//!
//! Descriptors have a text form used in logs, errors and by the CLI:
//!
//! ```text
//! s32                         scalar
//! (s32, f64, handle)          tuple, `handle` being a host opaque type
//! action-result               value-less result wrapper
//! function-result<(s32, s64)> value-carrying result wrapper
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use thiserror::Error;

use crate::abi::{ConversionError, ExternRef, FuncRef, Value, ValueType};
use crate::trap::TrapDiagnostics;

pub const ACTION_RESULT: &str = "action-result";
pub const FUNCTION_RESULT: &str = "function-result";

/// Builds a value-less result wrapper.
pub trait ActionBuilder: Send + Sync {
    fn failed(&self, diagnostics: TrapDiagnostics) -> Value;
    fn succeeded(&self) -> Value;
}

/// Builds a value-carrying result wrapper.
pub trait FunctionBuilder: Send + Sync {
    fn failed(&self, diagnostics: TrapDiagnostics) -> Value;
    fn succeeded(&self, value: Value) -> Value;
}

/// Builder for the crate's own [`ActionResult`] and [`FunctionResult`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardResultBuilder;

impl StandardResultBuilder {
    /// The instance behind [`TypeDescriptor::action_result`] and
    /// [`TypeDescriptor::function_result`].
    pub fn shared() -> Arc<StandardResultBuilder> {
        static SHARED: OnceLock<Arc<StandardResultBuilder>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(StandardResultBuilder)))
    }
}

impl ActionBuilder for StandardResultBuilder {
    fn failed(&self, diagnostics: TrapDiagnostics) -> Value {
        Value::Action(Err(diagnostics))
    }

    fn succeeded(&self) -> Value {
        Value::Action(Ok(()))
    }
}

impl FunctionBuilder for StandardResultBuilder {
    fn failed(&self, diagnostics: TrapDiagnostics) -> Value {
        Value::Function(Err(diagnostics))
    }

    fn succeeded(&self, value: Value) -> Value {
        Value::Function(Ok(Box::new(value)))
    }
}

/// The way a wrapper type represents success-or-trap.
#[derive(Clone)]
pub enum ResultCapability {
    Action(Arc<dyn ActionBuilder>),
    Function {
        value: Box<TypeDescriptor>,
        builder: Arc<dyn FunctionBuilder>,
    },
}

impl fmt::Debug for ResultCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCapability::Action(_) => f.write_str("Action"),
            ResultCapability::Function { value, .. } => {
                f.debug_struct("Function").field("value", value).finish_non_exhaustive()
            }
        }
    }
}

/// A declared return type.
#[derive(Debug, Clone)]
pub enum TypeDescriptor {
    Scalar(ValueType),
    Tuple(Vec<TypeDescriptor>),
    /// A nominal type; it is a result wrapper iff it carries exactly one capability.
    Wrapper {
        name: String,
        capabilities: Vec<ResultCapability>,
    },
}

impl TypeDescriptor {
    pub fn scalar(ty: ValueType) -> Self {
        TypeDescriptor::Scalar(ty)
    }

    pub fn tuple(components: impl IntoIterator<Item = TypeDescriptor>) -> Self {
        TypeDescriptor::Tuple(components.into_iter().collect())
    }

    pub fn wrapper(name: impl Into<String>, capabilities: Vec<ResultCapability>) -> Self {
        TypeDescriptor::Wrapper {
            name: name.into(),
            capabilities,
        }
    }

    /// The crate's value-less wrapper, decoding to [`ActionResult`].
    pub fn action_result() -> Self {
        Self::wrapper(
            ACTION_RESULT,
            vec![ResultCapability::Action(StandardResultBuilder::shared())],
        )
    }

    /// The crate's value-carrying wrapper, decoding to [`FunctionResult`].
    pub fn function_result(value: TypeDescriptor) -> Self {
        Self::wrapper(
            FUNCTION_RESULT,
            vec![ResultCapability::Function {
                value: Box::new(value),
                builder: StandardResultBuilder::shared(),
            }],
        )
    }

    /// Structural identity of this type, used to memoize decoders.
    pub(crate) fn key(&self) -> TypeKey {
        match self {
            TypeDescriptor::Scalar(ty) => TypeKey::Scalar(ty.clone()),
            TypeDescriptor::Tuple(components) => {
                TypeKey::Tuple(components.iter().map(TypeDescriptor::key).collect())
            }
            TypeDescriptor::Wrapper { name, capabilities } => TypeKey::Wrapper {
                name: name.clone(),
                capabilities: capabilities
                    .iter()
                    .map(|capability| match capability {
                        ResultCapability::Action(builder) => CapabilityKey::Action {
                            builder: builder_addr(builder),
                        },
                        ResultCapability::Function { value, builder } => CapabilityKey::Function {
                            value: value.key(),
                            builder: builder_addr(builder),
                        },
                    })
                    .collect(),
            },
        }
    }
}

/// Cache key mirroring a [`TypeDescriptor`].
///
/// Builders are keyed by allocation address. A cached decoder owns the builders
/// it was built with, so an address held in a live key is never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum TypeKey {
    Scalar(ValueType),
    Tuple(Vec<TypeKey>),
    Wrapper {
        name: String,
        capabilities: Vec<CapabilityKey>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum CapabilityKey {
    Action { builder: usize },
    Function { value: TypeKey, builder: usize },
}

fn builder_addr<T: ?Sized>(builder: &Arc<T>) -> usize {
    Arc::as_ptr(builder) as *const () as usize
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Scalar(ty) => write!(f, "{}", ty),
            TypeDescriptor::Tuple(components) => {
                f.write_str("(")?;
                for (i, component) in components.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", component)?;
                }
                f.write_str(")")
            }
            TypeDescriptor::Wrapper { name, capabilities } => {
                f.write_str(name)?;
                for capability in capabilities {
                    if let ResultCapability::Function { value, .. } = capability {
                        write!(f, "<{}>", value)?;
                    }
                }
                Ok(())
            }
        }
    }
}

// ============================================================================
// Text syntax
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid type at offset {offset}: {message}")]
pub struct ParseTypeError {
    pub offset: usize,
    pub message: String,
}

impl FromStr for TypeDescriptor {
    type Err = ParseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parser = Parser { src: s, pos: 0 };
        let ty = parser.parse_type()?;
        parser.skip_ws();
        if parser.pos != s.len() {
            return Err(parser.error("trailing input"));
        }
        Ok(ty)
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: impl Into<String>) -> ParseTypeError {
        ParseTypeError {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn skip_ws(&mut self) {
        let rest = &self.src[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        if self.src[self.pos..].starts_with(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), ParseTypeError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{}`", c)))
        }
    }

    fn ident(&mut self) -> Result<&'a str, ParseTypeError> {
        self.skip_ws();
        let src = self.src;
        let rest = &src[self.pos..];
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == ':'))
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(self.error("expected a type name"));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn parse_type(&mut self) -> Result<TypeDescriptor, ParseTypeError> {
        if self.eat('(') {
            let mut components = vec![self.parse_type()?];
            while self.eat(',') {
                components.push(self.parse_type()?);
            }
            self.expect(')')?;
            return Ok(TypeDescriptor::Tuple(components));
        }

        let start = self.pos;
        match self.ident()? {
            ACTION_RESULT => Ok(TypeDescriptor::action_result()),
            FUNCTION_RESULT => {
                self.expect('<')?;
                let value = self.parse_type()?;
                self.expect('>')?;
                Ok(TypeDescriptor::function_result(value))
            }
            name => name.parse().map(TypeDescriptor::Scalar).map_err(|err| ParseTypeError {
                offset: start,
                message: err.to_string(),
            }),
        }
    }
}

// ============================================================================
// Rust return types
// ============================================================================

/// A Rust type that can be declared as the return type of a call.
pub trait ReturnType: TryFrom<Value, Error = ConversionError> + 'static {
    fn descriptor() -> TypeDescriptor;
}

macro_rules! scalar_return_types {
    ($($rust:ty => $ty:ident),* $(,)?) => {
        $(
            impl ReturnType for $rust {
                fn descriptor() -> TypeDescriptor {
                    TypeDescriptor::Scalar(ValueType::$ty)
                }
            }
        )*
    };
}

scalar_return_types! {
    bool => Bool,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i8 => S8,
    i16 => S16,
    i32 => S32,
    i64 => S64,
    f32 => F32,
    f64 => F64,
    char => Char,
    u128 => V128,
    Option<FuncRef> => FuncRef,
    Option<ExternRef> => ExternRef,
}

macro_rules! tuple_return_types {
    ($($t:ident),+) => {
        impl<$($t: ReturnType),+> ReturnType for ($($t,)+) {
            fn descriptor() -> TypeDescriptor {
                TypeDescriptor::Tuple(vec![$($t::descriptor()),+])
            }
        }
    };
}

tuple_return_types!(A, B);
tuple_return_types!(A, B, C);
tuple_return_types!(A, B, C, D);
tuple_return_types!(A, B, C, D, E);
tuple_return_types!(A, B, C, D, E, F);
tuple_return_types!(A, B, C, D, E, F, G);

/// Success-or-trap of a call with no results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult(pub Result<(), TrapDiagnostics>);

impl ActionResult {
    pub fn is_ok(&self) -> bool {
        self.0.is_ok()
    }

    pub fn into_result(self) -> Result<(), TrapDiagnostics> {
        self.0
    }
}

impl TryFrom<Value> for ActionResult {
    type Error = ConversionError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::Action(result) => Ok(ActionResult(result)),
            other => Err(ConversionError::TypeMismatch {
                expected: String::from(ACTION_RESULT),
                got: format!("{:?}", other),
            }),
        }
    }
}

impl ReturnType for ActionResult {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::action_result()
    }
}

/// Success-or-trap of a call returning `T`.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionResult<T>(pub Result<T, TrapDiagnostics>);

impl<T> FunctionResult<T> {
    pub fn is_ok(&self) -> bool {
        self.0.is_ok()
    }

    pub fn into_result(self) -> Result<T, TrapDiagnostics> {
        self.0
    }
}

impl<T: TryFrom<Value, Error = ConversionError>> TryFrom<Value> for FunctionResult<T> {
    type Error = ConversionError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::Function(Ok(value)) => Ok(FunctionResult(Ok(T::try_from(*value)?))),
            Value::Function(Err(diagnostics)) => Ok(FunctionResult(Err(diagnostics))),
            other => Err(ConversionError::TypeMismatch {
                expected: String::from(FUNCTION_RESULT),
                got: format!("{:?}", other),
            }),
        }
    }
}

impl<T: ReturnType> ReturnType for FunctionResult<T> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::function_result(T::descriptor())
    }
}
