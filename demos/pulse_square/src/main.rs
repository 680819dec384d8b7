//! Pulse Square Demo
//!
//! A three-level pulse train drives a trigger-mode function computing
//! `x^2`; two tables record the raw and squared signals.
//!
//! Run with `RUST_LOG=debug` to see graph mutations, or pass a RON config
//! file path as the first argument to override the defaults.

use ganglion_builtins::{function, manifest};
use ganglion_core::{Context, Policy, Result, SimConfig, Value};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DT: f64 = 0.25;
const RUN_TIME: f64 = 10.0;

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn build(ctx: &mut Context) -> Result<()> {
    ctx.create("Neutral", "/model", 1)?;
    ctx.set_cwe("/model")?;

    let pulse = ctx.create("PulseGen", "pulse", 1)?;
    ctx.set(pulse, "count", 3i64)?;
    for (i, level) in [1.0, 2.0, 3.0].into_iter().enumerate() {
        ctx.set_lookup(pulse, "level", i, level)?;
        ctx.set_lookup(pulse, "delay", i, 1.0)?;
        ctx.set_lookup(pulse, "width", i, 1.0)?;
    }

    let square = ctx.create("Function", "square", 1)?;
    ctx.set(square, "mode", function::MODE_TRIGGER)?;
    ctx.set(square, "expr", "x^2")?;

    let input = ctx.create("Table", "input", 1)?;
    let output = ctx.create("Table", "output", 1)?;
    ctx.connect(pulse, "output", square, "trigger", Policy::Single)?;
    ctx.connect(square, "output", output, "input", Policy::Single)?;
    ctx.connect(pulse, "output", input, "input", Policy::Single)?;

    for tick in 0..3 {
        if ctx.scheduler().clock(tick).is_none() {
            ctx.set_clock(tick, DT)?;
        }
    }
    ctx.use_clock(0, "pulse", "process")?;
    ctx.use_clock(1, "square", "process")?;
    ctx.use_clock(2, "#[ISA=Table]", "process")?;
    Ok(())
}

fn samples(value: &Value) -> Vec<f64> {
    value
        .as_list()
        .map(|items| items.iter().filter_map(Value::as_float).collect())
        .unwrap_or_default()
}

fn main() -> Result<()> {
    init_tracing();
    println!("=== Ganglion Pulse Square Demo ===\n");

    let config = match std::env::args().nth(1) {
        Some(path) => SimConfig::from_file(path)?,
        None => SimConfig::default(),
    };
    let mut ctx = Context::with_config(manifest()?, config)?;
    println!("Builtin types:");
    for class in ctx.registry().class_names() {
        let doc = ctx.registry().require(class)?.description().to_string();
        println!("  {:<18} {}", class, doc);
    }
    println!();

    build(&mut ctx)?;
    ctx.scheduler_mut().trace_mut().set_enabled(true);
    info!(elements = ctx.graph().count(), messages = ctx.bus().len(), "model built");

    ctx.reinit()?;
    let summary = ctx.start(RUN_TIME)?;
    println!(
        "Ran {} instants ({} dispatches, {} emissions) to t = {}\n",
        summary.instants, summary.dispatches, summary.emissions, summary.time
    );

    let input = samples(&ctx.get(ctx.resolve_obj("/model/input[0]")?, "vector")?);
    let output = samples(&ctx.get(ctx.resolve_obj("/model/output[0]")?, "vector")?);
    println!("{:>8} {:>8} {:>8}", "t", "input", "output");
    for (i, (x, y)) in input.iter().zip(&output).enumerate() {
        // entry 0 is the reinit level
        let t = if i == 0 { 0.0 } else { (i - 1) as f64 * DT };
        println!("{:>8.2} {:>8.2} {:>8.2}", t, x, y);
    }

    let stats = ctx.scheduler().trace().stats();
    println!(
        "\nTrace: {} reinit, {} process calls, {} delivery passes ({} dropped)",
        stats.reinits, stats.processes, stats.deliveries, stats.dropped
    );
    Ok(())
}
