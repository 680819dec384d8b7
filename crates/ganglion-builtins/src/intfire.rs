//! `IntFire`: integrate-and-fire neuron
//!
//! Activation arriving on `activation` accumulates into `Vm`. On `process`,
//! if `Vm` reached `thresh` the neuron emits the current time on `spikeOut`
//! and resets `Vm` to zero.

use ganglion_core::{ProcessCtx, Result, TypeDescriptor, Value, ValueType};
use tracing::trace;

pub const CLASS: &str = "IntFire";

pub fn descriptor() -> TypeDescriptor {
    TypeDescriptor::new(CLASS)
        .doc("Integrate-and-fire neuron")
        .value("Vm", ValueType::Float, 0.0)
        .value("thresh", ValueType::Float, 1.0)
        .dest("activation", ValueType::Float, on_activation)
        .source("spikeOut", ValueType::Float)
        .entry("process", process)
        .entry("reinit", reinit)
}

fn on_activation(ctx: &mut ProcessCtx<'_>, value: Value) -> Result<()> {
    let vm = ctx.get_f64("Vm")?;
    let delta = value.as_float().unwrap_or(0.0);
    ctx.set("Vm", vm + delta)
}

fn process(ctx: &mut ProcessCtx<'_>) -> Result<()> {
    if ctx.get_f64("Vm")? < ctx.get_f64("thresh")? {
        return Ok(());
    }
    trace!(obj = %ctx.obj(), time = ctx.time(), "spike");
    ctx.emit("spikeOut", ctx.time())?;
    ctx.set("Vm", 0.0)
}

fn reinit(ctx: &mut ProcessCtx<'_>) -> Result<()> {
    ctx.set("Vm", 0.0)
}
