//! `Counter`: emits its count every step, then advances it by `step`

use ganglion_core::{Error, ProcessCtx, Result, TypeDescriptor, ValueType};

pub const CLASS: &str = "Counter";

pub fn descriptor() -> TypeDescriptor {
    TypeDescriptor::new(CLASS)
        .doc("Integer counter advanced once per step")
        .value("count", ValueType::Int, 0i64)
        .value("step", ValueType::Int, 1i64)
        .source("output", ValueType::Int)
        .entry("process", process)
        .entry("reinit", reinit)
}

fn process(ctx: &mut ProcessCtx<'_>) -> Result<()> {
    let count = ctx.get_i64("count")?;
    let step = ctx.get_i64("step")?;
    ctx.emit("output", count)?;
    let next = count
        .checked_add(step)
        .ok_or_else(|| Error::Overflow(format!("count {} + step {}", count, step)))?;
    ctx.set("count", next)
}

fn reinit(ctx: &mut ProcessCtx<'_>) -> Result<()> {
    ctx.set("count", 0i64)
}
