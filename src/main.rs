//! retshape CLI - inspect how call results of a declared type are decoded
//!
//! Commands:
//!   retshape resolve <type>             - Show the decode plan for a type
//!   retshape decode <type> --slot <n>.. - Decode raw slot bit patterns

use clap::{Parser, Subcommand};
use retshape::{
    ContextId, DecodeContext, MarshalConfig, Resolver, TrapDiagnostics, TypeDescriptor, Value,
    ValueType,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use wasmtime::ValRaw;

#[derive(Parser)]
#[command(name = "retshape")]
#[command(about = "Decode WebAssembly call results by declared return type", long_about = None)]
struct Cli {
    /// JSON file with marshalling options
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a return type and print its decode plan
    Resolve {
        /// Type expression, e.g. "(s32, f64)" or "function-result<s64>"
        ty: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decode raw result slots as a return type
    Decode {
        /// Type expression
        ty: String,

        /// Slot value: an integer (decimal, negative, or 0x-hex bits) or a float.
        /// Floats are encoded at the width of the declared slot type
        #[arg(long = "slot", allow_negative_numbers = true)]
        slots: Vec<String>,

        /// Simulate a trap with this message
        #[arg(long)]
        trap: Option<String>,

        /// Opaque host types to register, e.g. --opaque handle
        #[arg(long)]
        opaque: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Resolve { ty, json } => resolve_command(config, &ty, json),
        Commands::Decode {
            ty,
            slots,
            trap,
            opaque,
        } => decode_command(config, &ty, &slots, trap, &opaque),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<MarshalConfig> {
    let Some(path) = path else {
        return Ok(MarshalConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    MarshalConfig::from_json_str(&text)
        .map_err(|e| anyhow::anyhow!("Invalid config {}: {}", path.display(), e))
}

fn resolve_command(config: MarshalConfig, ty: &str, json: bool) -> anyhow::Result<()> {
    let descriptor: TypeDescriptor = ty.parse()?;
    let decoder = Resolver::with_config(config).resolve(&descriptor)?;
    let plan = decoder.plan();

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        println!("type:   {}", descriptor);
        println!("shape:  {}", plan.shape);
        println!("slots:  {}", plan.arity);
        println!("traps:  {}", if plan.absorbs_traps { "absorbed" } else { "propagated" });
        if !plan.components.is_empty() {
            println!("components: {}", plan.components.join(", "));
        }
        if let Some(inner) = &plan.inner {
            println!("inner:  {} ({} slots)", inner.shape, inner.arity);
        }
    }
    Ok(())
}

fn decode_command(
    config: MarshalConfig,
    ty: &str,
    slots: &[String],
    trap: Option<String>,
    opaque: &[String],
) -> anyhow::Result<()> {
    let value = decode_value(config, ty, slots, trap, opaque)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn decode_value(
    config: MarshalConfig,
    ty: &str,
    slots: &[String],
    trap: Option<String>,
    opaque: &[String],
) -> anyhow::Result<Value> {
    let descriptor: TypeDescriptor = ty.parse()?;

    let mut registry = retshape::ConverterRegistry::with_defaults(&config);
    for name in opaque {
        registry.register_opaque(name.as_str());
    }
    let resolver = Resolver::with_registry(registry, config);
    let decoder = resolver.resolve(&descriptor)?;

    let slot_types = decoder.slot_types();
    let slots = slots
        .iter()
        .enumerate()
        .map(|(i, slot)| parse_slot(slot, slot_types.get(i)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let trap = trap.map(|message| {
        Box::new(TrapDiagnostics::new(message)) as Box<dyn retshape::TrapHandle>
    });

    let ctx = DecodeContext::new(ContextId::next());
    Ok(decoder.decode(&ctx, trap, &slots)?)
}

/// Parse a slot given on the command line into its raw bit pattern.
///
/// Hex is taken as raw bits. Decimal text for an `f32` or `f64` slot is a
/// float value encoded at that width.
fn parse_slot(text: &str, ty: Option<&ValueType>) -> anyhow::Result<ValRaw> {
    if let Some(hex) = text.strip_prefix("0x") {
        let bits = u64::from_str_radix(hex, 16)
            .map_err(|e| anyhow::anyhow!("Invalid hex slot {}: {}", text, e))?;
        return Ok(ValRaw::u64(bits));
    }

    let float = || {
        text.parse::<f64>()
            .map_err(|_| anyhow::anyhow!("Invalid slot {}: expected a float", text))
    };
    match ty {
        Some(ValueType::F32) => return Ok(ValRaw::f32((float()? as f32).to_bits())),
        Some(ValueType::F64) => return Ok(ValRaw::f64(float()?.to_bits())),
        _ => {}
    }

    if let Ok(bits) = text.parse::<u64>() {
        return Ok(ValRaw::u64(bits));
    }
    if let Ok(value) = text.parse::<i64>() {
        return Ok(ValRaw::i64(value));
    }
    // Slots without a declared type hold floats as f64 bits
    text.parse::<f64>()
        .map(|value| ValRaw::f64(value.to_bits()))
        .map_err(|_| anyhow::anyhow!("Invalid slot {}: expected an integer or float", text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(ty: &str, slots: &[&str]) -> Value {
        let slots: Vec<String> = slots.iter().map(|s| s.to_string()).collect();
        decode_value(MarshalConfig::default(), ty, &slots, None, &[]).unwrap()
    }

    #[test]
    fn test_float_slots_follow_declared_width() {
        assert_eq!(decode("f32", &["1.5"]), Value::F32(1.5));
        assert_eq!(decode("f64", &["-0.25"]), Value::F64(-0.25));
        assert_eq!(
            decode("(f32, f64)", &["0.5", "0.5"]),
            Value::Tuple(vec![Value::F32(0.5), Value::F64(0.5)])
        );
        assert_eq!(
            decode("function-result<(s32, f32)>", &["-3", "2"]),
            Value::Function(Ok(Box::new(Value::Tuple(vec![
                Value::S32(-3),
                Value::F32(2.0)
            ]))))
        );
    }

    #[test]
    fn test_hex_slots_are_raw_bits() {
        let bits = format!("{:#x}", 1.5f32.to_bits());
        assert_eq!(decode("f32", &[bits.as_str()]), Value::F32(1.5));
        assert_eq!(decode("u8", &["0x1ff"]), Value::U8(0xff));
    }

    #[test]
    fn test_non_float_text_for_float_slot_is_rejected() {
        let slots = vec![String::from("nope")];
        assert!(decode_value(MarshalConfig::default(), "f32", &slots, None, &[]).is_err());
    }

    #[test]
    fn test_trap_is_absorbed_by_wrapper() {
        let value = decode_value(
            MarshalConfig::default(),
            "action-result",
            &[],
            Some(String::from("boom")),
            &[],
        )
        .unwrap();
        assert!(matches!(value, Value::Action(Err(_))));
    }
}
