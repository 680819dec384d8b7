//! `Function`: evaluates an expression of its input and the time
//!
//! `mode` selects when it evaluates: 0 on every `process`, 1 only when a
//! value arrives on `trigger`, 2 on both. Messages into the `input` field
//! only update the stored input.

use crate::expr::Expr;
use ganglion_core::{Error, Key, ProcessCtx, Result, TypeDescriptor, Value, ValueType};
use std::sync::Arc;
use tracing::trace;

pub const CLASS: &str = "Function";

pub const MODE_PROCESS: i64 = 0;
pub const MODE_TRIGGER: i64 = 1;
pub const MODE_BOTH: i64 = 2;

pub fn descriptor() -> TypeDescriptor {
    TypeDescriptor::new(CLASS)
        .doc("Arithmetic function of an input value and time")
        .value("expr", ValueType::String, "x")
        .value("mode", ValueType::Int, MODE_PROCESS)
        .value("input", ValueType::Float, 0.0)
        .read_only("value", ValueType::Float, 0.0)
        .lookup("c", ValueType::Float, 0.0)
        .dest("trigger", ValueType::Float, on_trigger)
        .source("output", ValueType::Float)
        .entry("process", process)
        .entry("reinit", reinit)
}

/// `expr` as last parsed on this instance
#[derive(Debug)]
struct Compiled {
    source: String,
    expr: Expr,
}

fn compiled(ctx: &mut ProcessCtx<'_>) -> Result<Arc<Compiled>> {
    let source = ctx.get_str("expr")?;
    if let Some(cached) = ctx.memo::<Compiled>().filter(|c| c.source == source) {
        return Ok(cached);
    }
    let compiled = Arc::new(Compiled {
        source: source.to_string(),
        expr: Expr::parse(source)?,
    });
    trace!(obj = %ctx.obj(), source = %compiled.source, "expression parsed");
    ctx.set_memo(compiled.clone());
    Ok(compiled)
}

fn evaluate(ctx: &mut ProcessCtx<'_>) -> Result<()> {
    let compiled = compiled(ctx)?;
    let input = ctx.get_f64("input")?;
    let time = ctx.time();
    let constants = ctx.lookup_entries("c")?;
    let vars = |name: &str| match name {
        "x" | "input" => Some(input),
        "t" => Some(time),
        _ => constants
            .get(&Key::Str(name.to_string()))
            .and_then(Value::as_float),
    };
    let value = compiled.expr.eval(&vars)?;
    trace!(obj = %ctx.obj(), input, value, "function evaluated");
    ctx.set("value", value)?;
    ctx.emit("output", value)
}

fn mode(ctx: &ProcessCtx<'_>) -> Result<i64> {
    match ctx.get_i64("mode")? {
        m @ (MODE_PROCESS | MODE_TRIGGER | MODE_BOTH) => Ok(m),
        other => Err(Error::InvalidArgument(format!(
            "Function mode {} (expected 0, 1 or 2)",
            other
        ))),
    }
}

fn process(ctx: &mut ProcessCtx<'_>) -> Result<()> {
    if mode(ctx)? == MODE_TRIGGER {
        return Ok(());
    }
    evaluate(ctx)
}

fn reinit(ctx: &mut ProcessCtx<'_>) -> Result<()> {
    mode(ctx)?;
    ctx.set("value", 0.0)
}

fn on_trigger(ctx: &mut ProcessCtx<'_>, value: Value) -> Result<()> {
    ctx.set("input", value)?;
    if mode(ctx)? == MODE_PROCESS {
        return Ok(());
    }
    evaluate(ctx)
}

#[cfg(test)]
mod tests {
    use crate::manifest;
    use ganglion_core::{Context, Error, Id, Policy, Value};

    fn floats(value: Value) -> Vec<f64> {
        value
            .as_list()
            .unwrap()
            .iter()
            .map(|v| v.as_float().unwrap())
            .collect()
    }

    fn model(mode: i64, expr: &str) -> (Context, Id, Id) {
        let mut ctx = Context::new(manifest().unwrap()).unwrap();
        let func = ctx.create("Function", "/f", 1).unwrap();
        let table = ctx.create("Table", "/t", 1).unwrap();
        ctx.set(func, "mode", mode).unwrap();
        ctx.set(func, "expr", expr).unwrap();
        ctx.connect(func, "output", table, "input", Policy::Single)
            .unwrap();
        ctx.set_clock(0, 1.0).unwrap();
        ctx.use_clock(0, "/f", "process").unwrap();
        ctx.set_clock(1, 1.0).unwrap();
        ctx.use_clock(1, "/t", "process").unwrap();
        (ctx, func, table)
    }

    #[test]
    fn test_process_mode_uses_time_and_constants() {
        let (mut ctx, func, table) = model(0, "k * t + x");
        ctx.set_lookup(func, "c", "k", 10.0).unwrap();
        ctx.set(func, "input", 0.5).unwrap();
        ctx.reinit().unwrap();
        ctx.start(3.0).unwrap();
        assert_eq!(
            floats(ctx.get(table.at(0), "vector").unwrap()),
            vec![0.5, 10.5, 20.5]
        );
        assert_eq!(ctx.get(func.at(0), "value").unwrap(), Value::Float(20.5));
    }

    #[test]
    fn test_trigger_mode_ignores_process() {
        let (mut ctx, func, table) = model(1, "x^2");
        ctx.reinit().unwrap();
        ctx.start(3.0).unwrap();
        assert!(floats(ctx.get(table.at(0), "vector").unwrap()).is_empty());
        assert_eq!(ctx.get(func.at(0), "value").unwrap(), Value::Float(0.0));
    }

    #[test]
    fn test_expression_change_takes_effect_between_runs() {
        let (mut ctx, func, table) = model(0, "2 * x");
        ctx.set(func, "input", 1.0).unwrap();
        ctx.reinit().unwrap();
        ctx.start(2.0).unwrap();
        ctx.set(func, "expr", "3 * x").unwrap();
        ctx.start(2.0).unwrap();
        assert_eq!(
            floats(ctx.get(table.at(0), "vector").unwrap()),
            vec![2.0, 2.0, 3.0, 3.0]
        );

        // a broken edit is reported, the previous parse is not reused
        ctx.set(func, "expr", "3 *").unwrap();
        assert!(matches!(ctx.start(1.0), Err(Error::Evaluation(_))));
    }

    #[test]
    fn test_messages_write_the_input_field() {
        let (mut ctx, func, table) = model(0, "x + 1");
        let counter = ctx.create("Counter", "/c", 1).unwrap();
        ctx.set(counter, "step", 5i64).unwrap();
        ctx.connect(counter, "output", func, "input", Policy::Single)
            .unwrap();
        ctx.set_clock(2, 1.0).unwrap();
        ctx.use_clock(2, "/c", "process").unwrap();
        ctx.reinit().unwrap();
        ctx.start(3.0).unwrap();

        // each count lands after the function ran for that instant
        assert_eq!(
            floats(ctx.get(table.at(0), "vector").unwrap()),
            vec![1.0, 1.0, 6.0]
        );
        assert_eq!(ctx.get(func.at(0), "input").unwrap(), Value::Float(10.0));
    }

    #[test]
    fn test_bad_mode_and_expression_abort() {
        let (mut ctx, func, _) = model(7, "x");
        assert!(matches!(ctx.reinit(), Err(Error::InvalidArgument(_))));

        ctx.set(func, "mode", 0i64).unwrap();
        ctx.set(func, "expr", "x +").unwrap();
        ctx.reinit().unwrap();
        assert!(matches!(ctx.start(1.0), Err(Error::Evaluation(_))));
    }
}
