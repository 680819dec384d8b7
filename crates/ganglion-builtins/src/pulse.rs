//! `PulseGen`: a periodic train of rectangular pulses
//!
//! Pulse `i` starts `delay[i]` after pulse `i - 1` starts (pulse 0 starts
//! at `delay[0]`) and holds `level[i]` for `width[i]`. Outside every pulse
//! the output is `baseLevel`. The train repeats with
//! `period = delay0 + width0 + sum(max(0, delay_i + width_i - width_{i-1}))`.

use ganglion_core::{Error, ProcessCtx, Result, TypeDescriptor, ValueType};

pub const CLASS: &str = "PulseGen";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pulse {
    pub level: f64,
    pub delay: f64,
    pub width: f64,
}

pub fn period(pulses: &[Pulse]) -> f64 {
    let Some(first) = pulses.first() else {
        return 0.0;
    };
    let tail: f64 = pulses
        .windows(2)
        .map(|w| (w[1].delay + w[1].width - w[0].width).max(0.0))
        .sum();
    first.delay + first.width + tail
}

/// Output of the train at time `t`; a later overlapping pulse wins
pub fn output_at(base: f64, pulses: &[Pulse], t: f64) -> f64 {
    let period = period(pulses);
    if period <= 0.0 {
        return base;
    }
    let phase = t.rem_euclid(period);
    let mut start = 0.0;
    let mut output = base;
    for pulse in pulses {
        start += pulse.delay;
        if start <= phase && phase < start + pulse.width {
            output = pulse.level;
        }
    }
    output
}

pub fn descriptor() -> TypeDescriptor {
    TypeDescriptor::new(CLASS)
        .doc("Periodic multi-level pulse generator")
        .value("baseLevel", ValueType::Float, 0.0)
        .value("count", ValueType::Int, 1i64)
        .read_only("outputValue", ValueType::Float, 0.0)
        .lookup("level", ValueType::Float, 0.0)
        .lookup("delay", ValueType::Float, 0.0)
        .lookup("width", ValueType::Float, 0.0)
        .source("output", ValueType::Float)
        .entry("process", process)
        .entry("reinit", reinit)
}

fn lookup_f64(ctx: &ProcessCtx<'_>, field: &str, index: usize) -> Result<f64> {
    let value = ctx.lookup(field, index)?;
    value
        .as_float()
        .ok_or_else(|| Error::type_error("double", value.type_name()))
}

fn pulses(ctx: &ProcessCtx<'_>) -> Result<Vec<Pulse>> {
    let count = ctx.get_i64("count")?.max(0) as usize;
    (0..count)
        .map(|i| {
            Ok(Pulse {
                level: lookup_f64(ctx, "level", i)?,
                delay: lookup_f64(ctx, "delay", i)?,
                width: lookup_f64(ctx, "width", i)?,
            })
        })
        .collect()
}

fn process(ctx: &mut ProcessCtx<'_>) -> Result<()> {
    let output = output_at(ctx.get_f64("baseLevel")?, &pulses(ctx)?, ctx.time());
    ctx.set("outputValue", output)?;
    ctx.emit("output", output)
}

fn reinit(ctx: &mut ProcessCtx<'_>) -> Result<()> {
    let base = ctx.get_f64("baseLevel")?;
    ctx.set("outputValue", base)?;
    ctx.emit("output", base)
}
