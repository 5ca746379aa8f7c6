//! Decoder behavior across every return shape
//!
//! Converters and trap handles here count how often they are used, so the
//! tests can check that traps short-circuit decoding and that every trap
//! handle is disposed exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use retshape::convert::{self, ConverterRegistry};
use retshape::{
    ActionResult, ContextId, DecodeContext, DecodeError, FunctionResult, MarshalConfig,
    ResolveError, Resolver, TrapDiagnostics, TrapHandle, TypeDescriptor, Value, ValueType,
};
use wasmtime::ValRaw;

/// A trap handle that records its own disposal
struct CountingTrap {
    message: &'static str,
    disposed: Arc<AtomicUsize>,
}

impl TrapHandle for CountingTrap {
    fn into_diagnostics(self: Box<Self>) -> TrapDiagnostics {
        TrapDiagnostics::new(self.message)
    }
}

impl Drop for CountingTrap {
    fn drop(&mut self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

fn counting_trap(message: &'static str, disposed: &Arc<AtomicUsize>) -> Option<Box<dyn TrapHandle>> {
    Some(Box::new(CountingTrap {
        message,
        disposed: Arc::clone(disposed),
    }))
}

/// A resolver whose s32 converter counts its invocations
fn counting_resolver() -> (Resolver, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let mut registry = ConverterRegistry::with_defaults(&MarshalConfig::default());
    registry.register(
        ValueType::S32,
        convert::from_fn(move |_ctx: &DecodeContext<'_>, slot: &ValRaw| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::S32(slot.get_i32()))
        }),
    );
    (Resolver::with_registry(registry, MarshalConfig::default()), calls)
}

fn ctx() -> DecodeContext<'static> {
    DecodeContext::new(ContextId::next())
}

fn s32() -> TypeDescriptor {
    TypeDescriptor::Scalar(ValueType::S32)
}

#[test]
fn tuples_of_every_supported_arity_decode_in_order() {
    let resolver = Resolver::new();
    for arity in 2..=7 {
        let decoder = resolver
            .resolve(&TypeDescriptor::tuple(vec![s32(); arity]))
            .expect("resolve tuple");
        assert_eq!(decoder.arity(), arity);

        let literals: Vec<i32> = (0..arity as i32).map(|i| 100 + i * 11).collect();
        let slots: Vec<ValRaw> = literals.iter().map(|v| ValRaw::i32(*v)).collect();

        let value = decoder.decode(&ctx(), None, &slots).expect("decode tuple");
        let expected = Value::Tuple(literals.into_iter().map(Value::S32).collect());
        assert_eq!(value, expected, "arity {}", arity);
    }
}

#[test]
fn typed_seven_tuple_with_mixed_components() {
    let resolver = Resolver::new();
    let decoder = resolver
        .resolve_typed::<(i32, i64, f32, f64, bool, u8, char)>()
        .expect("resolve");
    let slots = [
        ValRaw::i32(-1),
        ValRaw::i64(1 << 40),
        ValRaw::f32(0.5f32.to_bits()),
        ValRaw::f64(3.25f64.to_bits()),
        ValRaw::i32(1),
        ValRaw::i32(255),
        ValRaw::u32('q' as u32),
    ];
    let tuple = decoder.decode(&ctx(), None, &slots).expect("decode");
    assert_eq!(tuple, (-1, 1 << 40, 0.5, 3.25, true, 255, 'q'));
}

#[test]
fn eight_element_tuple_fails_resolution() {
    let resolver = Resolver::new();
    let ty: TypeDescriptor = "(s32, s32, s32, s32, s32, s32, s32, s32)".parse().unwrap();
    match resolver.resolve(&ty) {
        Err(ResolveError::UnsupportedShape { ty, reason }) => {
            assert_eq!(ty, "(s32, s32, s32, s32, s32, s32, s32, s32)");
            assert!(reason.contains("maximum arity"), "{}", reason);
        }
        other => panic!("expected UnsupportedShape, got {:?}", other),
    }
}

#[test]
fn action_result_absorbs_trap_diagnostics() {
    let (resolver, calls) = counting_resolver();
    let decoder = resolver.resolve_typed::<ActionResult>().unwrap();
    let disposed = Arc::new(AtomicUsize::new(0));

    let failed = decoder
        .decode(&ctx(), counting_trap("divide by zero", &disposed), &[])
        .unwrap();
    assert_eq!(failed, ActionResult(Err(TrapDiagnostics::new("divide by zero"))));
    assert_eq!(disposed.load(Ordering::SeqCst), 1);

    let succeeded = decoder.decode(&ctx(), None, &[]).unwrap();
    assert!(succeeded.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn function_result_over_s32() {
    let (resolver, calls) = counting_resolver();
    let decoder = resolver.resolve_typed::<FunctionResult<i32>>().unwrap();

    let ok = decoder.decode(&ctx(), None, &[ValRaw::i32(42)]).unwrap();
    assert_eq!(ok, FunctionResult(Ok(42)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    calls.store(0, Ordering::SeqCst);
    let disposed = Arc::new(AtomicUsize::new(0));
    let trapped = decoder
        .decode(&ctx(), counting_trap("unreachable", &disposed), &[ValRaw::i32(42)])
        .unwrap();
    assert_eq!(trapped.into_result().unwrap_err().message(), "unreachable");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
}

#[test]
fn single_decode_with_trap_skips_converter() {
    let (resolver, calls) = counting_resolver();
    let decoder = resolver.resolve(&s32()).unwrap();
    let disposed = Arc::new(AtomicUsize::new(0));

    let err = decoder
        .decode(&ctx(), counting_trap("out of bounds", &disposed), &[ValRaw::i32(1)])
        .unwrap_err();
    assert_eq!(err.trap().map(|d| d.message()), Some("out of bounds"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
}

#[test]
fn tuple_trap_runs_no_component_converter() {
    let (resolver, calls) = counting_resolver();
    let decoder = resolver.resolve(&"(s32, s32, s32)".parse().unwrap()).unwrap();
    let disposed = Arc::new(AtomicUsize::new(0));

    let slots = [ValRaw::i32(1), ValRaw::i32(2), ValRaw::i32(3)];
    let err = decoder
        .decode(&ctx(), counting_trap("stack overflow", &disposed), &slots)
        .unwrap_err();
    assert!(matches!(err, DecodeError::Trap(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(disposed.load(Ordering::SeqCst), 1);

    decoder.decode(&ctx(), None, &slots).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn trap_handle_disposed_once_on_every_path() {
    let resolver = Resolver::new();
    let types = [
        "s32",
        "(s32, f64)",
        "action-result",
        "function-result<s32>",
        "function-result<(s64, s64, s64)>",
    ];
    for text in types {
        let decoder = resolver.resolve(&text.parse().unwrap()).unwrap();
        let disposed = Arc::new(AtomicUsize::new(0));
        let result = decoder.decode(&ctx(), counting_trap("trapped", &disposed), &[]);

        assert_eq!(result.is_ok(), decoder.absorbs_traps(), "{}", text);
        assert_eq!(disposed.load(Ordering::SeqCst), 1, "{}", text);
    }
}

#[test]
fn separately_resolved_decoders_agree() {
    let ty: TypeDescriptor = "function-result<(s32, f64, u8)>".parse().unwrap();
    let first = Resolver::new().resolve(&ty).unwrap();
    let second = Resolver::new().resolve(&ty).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));

    let slots = [ValRaw::i32(9), ValRaw::f64(1.25f64.to_bits()), ValRaw::i32(300)];
    assert_eq!(
        first.decode(&ctx(), None, &slots).unwrap(),
        second.decode(&ctx(), None, &slots).unwrap()
    );

    let trap = || Some(Box::new(TrapDiagnostics::new("x")) as Box<dyn TrapHandle>);
    assert_eq!(
        first.decode(&ctx(), trap(), &[]).unwrap(),
        second.decode(&ctx(), trap(), &[]).unwrap()
    );
}

#[test]
fn custom_wrapper_builders_shape_the_result() {
    use retshape::types::{FunctionBuilder, ResultCapability};

    /// Maps a trap to a sentinel instead of a failed state
    struct OrMinusOne;

    impl FunctionBuilder for OrMinusOne {
        fn failed(&self, _diagnostics: TrapDiagnostics) -> Value {
            Value::S64(-1)
        }

        fn succeeded(&self, value: Value) -> Value {
            value
        }
    }

    let ty = TypeDescriptor::wrapper(
        "or-minus-one",
        vec![ResultCapability::Function {
            value: Box::new(TypeDescriptor::Scalar(ValueType::S64)),
            builder: Arc::new(OrMinusOne),
        }],
    );
    let resolver = Resolver::new();
    let decoder = resolver.resolve(&ty).unwrap();

    assert_eq!(
        decoder.decode(&ctx(), None, &[ValRaw::i64(12)]).unwrap(),
        Value::S64(12)
    );
    let trap = Some(Box::new(TrapDiagnostics::new("oops")) as Box<dyn TrapHandle>);
    assert_eq!(decoder.decode(&ctx(), trap, &[]).unwrap(), Value::S64(-1));
}

#[test]
fn concurrent_first_use_publishes_one_decoder() {
    let resolver = Arc::new(Resolver::new());
    let ty: TypeDescriptor = "(s64, f32)".parse().unwrap();

    let decoders: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let resolver = Arc::clone(&resolver);
                let ty = ty.clone();
                scope.spawn(move || {
                    let decoder = resolver.resolve(&ty).unwrap();
                    let slots = [ValRaw::i64(i), ValRaw::f32(1.0f32.to_bits())];
                    let value = decoder.decode(&ctx(), None, &slots).unwrap();
                    assert_eq!(value, Value::Tuple(vec![Value::S64(i), Value::F32(1.0)]));
                    decoder
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(resolver.cached_types(), 1);
    let cached = resolver.resolve(&ty).unwrap();
    for decoder in &decoders {
        assert!(Arc::ptr_eq(decoder, &cached));
    }
}

#[test]
fn opaque_host_types_need_registration() {
    let ty: TypeDescriptor = "function-result<(s32, handle)>".parse().unwrap();
    assert!(matches!(
        Resolver::new().resolve(&ty),
        Err(ResolveError::ConverterMissing { .. })
    ));

    let mut registry = ConverterRegistry::with_defaults(&MarshalConfig::default());
    registry.register_opaque("handle");
    let resolver = Resolver::with_registry(registry, MarshalConfig::default());
    let value = resolver
        .resolve(&ty)
        .unwrap()
        .decode(&ctx(), None, &[ValRaw::i32(5), ValRaw::u64(77)])
        .unwrap();
    assert_eq!(
        value,
        Value::Function(Ok(Box::new(Value::Tuple(vec![
            Value::S32(5),
            Value::Opaque {
                type_name: "handle".to_string(),
                bits: 77,
            },
        ]))))
    );
}

#[test]
fn types_printing_alike_keep_separate_decoders() {
    use retshape::types::{ActionBuilder, ResultCapability};

    struct Unit;

    impl ActionBuilder for Unit {
        fn failed(&self, _diagnostics: TrapDiagnostics) -> Value {
            Value::Bool(false)
        }

        fn succeeded(&self) -> Value {
            Value::Bool(true)
        }
    }

    let custom = TypeDescriptor::wrapper(
        "action-result",
        vec![ResultCapability::Action(Arc::new(Unit))],
    );
    let standard = TypeDescriptor::action_result();
    assert_eq!(custom.to_string(), standard.to_string());

    for custom_first in [true, false] {
        let resolver = Resolver::new();
        let order = if custom_first {
            [&custom, &standard]
        } else {
            [&standard, &custom]
        };
        for ty in order {
            resolver.resolve(ty).unwrap();
        }

        let disposed = Arc::new(AtomicUsize::new(0));
        let custom_value = resolver
            .resolve(&custom)
            .unwrap()
            .decode(&ctx(), counting_trap("trap", &disposed), &[])
            .unwrap();
        assert_eq!(custom_value, Value::Bool(false));

        let standard_value = resolver
            .resolve_typed::<ActionResult>()
            .unwrap()
            .decode(&ctx(), counting_trap("trap", &disposed), &[])
            .unwrap();
        assert!(!standard_value.is_ok());
        assert_eq!(disposed.load(Ordering::SeqCst), 2);
        assert_eq!(resolver.cached_types(), 2);
    }
}
