//! `Pool`: a chemical pool whose concentration resets to `concInit`

use ganglion_core::{ProcessCtx, Result, TypeDescriptor, ValueType};

pub const CLASS: &str = "Pool";

pub fn descriptor() -> TypeDescriptor {
    TypeDescriptor::new(CLASS)
        .doc("Concentration pool")
        .value("concInit", ValueType::Float, 0.0)
        .value("conc", ValueType::Float, 0.0)
        .entry("reinit", reinit)
}

fn reinit(ctx: &mut ProcessCtx<'_>) -> Result<()> {
    let init = ctx.get_f64("concInit")?;
    ctx.set("conc", init)
}

#[cfg(test)]
mod tests {
    use crate::manifest;
    use ganglion_core::{Context, Error, Value};

    #[test]
    fn test_reinit_restores_initial_concentration() {
        let mut ctx = Context::new(manifest().unwrap()).unwrap();
        let pools = ctx.create("Pool", "/pool", 3).unwrap();
        ctx.set(pools, "concInit", vec![1.0, 2.0, 3.0]).unwrap();
        ctx.set(pools, "conc", 9.0).unwrap();

        ctx.set_clock(0, 0.5).unwrap();
        assert!(matches!(
            ctx.use_clock(0, "/pool", "process"),
            Err(Error::Binding(_))
        ));
        ctx.use_clock(0, "/pool", "reinit").unwrap();
        ctx.reinit().unwrap();
        assert_eq!(
            ctx.get(pools, "conc").unwrap(),
            Value::from(vec![1.0, 2.0, 3.0])
        );
    }
}
