//! `SimpleSynHandler`: weighted synapses feeding one activation output
//!
//! Each instance owns a ragged list of `synapse` records. A value on
//! `addSpike` names the synapse slot that received a spike; its weight is
//! added to `pending`, which `process` emits on `activationOut` and clears.

use ganglion_core::{Error, ProcessCtx, Result, TypeDescriptor, Value, ValueField, ValueType};

pub const CLASS: &str = "SimpleSynHandler";

pub fn descriptor() -> TypeDescriptor {
    TypeDescriptor::new(CLASS)
        .doc("Synapse handler summing weighted spikes")
        .element(
            "synapse",
            vec![
                ValueField::new("weight", ValueType::Float, 1.0),
                ValueField::new("delay", ValueType::Float, 0.0),
            ],
        )
        .read_only("pending", ValueType::Float, 0.0)
        .dest("addSpike", ValueType::Int, on_spike)
        .source("activationOut", ValueType::Float)
        .entry("process", process)
        .entry("reinit", reinit)
}

fn on_spike(ctx: &mut ProcessCtx<'_>, value: Value) -> Result<()> {
    let slot = value
        .as_int()
        .ok_or_else(|| Error::type_error("int", value.type_name()))?;
    let len = ctx.element_len("synapse")?;
    let slot = usize::try_from(slot).map_err(|_| Error::IndexOutOfRange {
        index: slot as isize,
        len,
    })?;
    let weight = ctx
        .record("synapse", slot, "weight")?
        .as_float()
        .unwrap_or(0.0);
    let pending = ctx.get_f64("pending")?;
    ctx.set("pending", pending + weight)
}

fn process(ctx: &mut ProcessCtx<'_>) -> Result<()> {
    let pending = ctx.get_f64("pending")?;
    if pending != 0.0 {
        ctx.emit("activationOut", pending)?;
        ctx.set("pending", 0.0)?;
    }
    Ok(())
}

fn reinit(ctx: &mut ProcessCtx<'_>) -> Result<()> {
    ctx.set("pending", 0.0)
}
