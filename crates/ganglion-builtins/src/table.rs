//! `Table`: records every value delivered to `input`

use ganglion_core::{ProcessCtx, Result, TypeDescriptor, Value, ValueType};

pub const CLASS: &str = "Table";

pub fn descriptor() -> TypeDescriptor {
    TypeDescriptor::new(CLASS)
        .doc("Append-only recording of delivered values")
        .read_only("vector", ValueType::FloatList, Value::List(Vec::new()))
        .dest("input", ValueType::Float, on_input)
        .entry("process", process)
        .entry("reinit", reinit)
}

fn on_input(ctx: &mut ProcessCtx<'_>, value: Value) -> Result<()> {
    ctx.push("vector", value)
}

// Recording happens on delivery.
fn process(_ctx: &mut ProcessCtx<'_>) -> Result<()> {
    Ok(())
}

fn reinit(ctx: &mut ProcessCtx<'_>) -> Result<()> {
    ctx.set("vector", Value::List(Vec::new()))
}
