//! Connection contracts, aggregation policies and the deletion cascade

use ganglion_builtins::manifest;
use ganglion_core::{Context, Direction, Error, Policy, ReduceOp, Value};

fn context() -> Context {
    Context::new(manifest().unwrap()).unwrap()
}

fn floats(value: Value) -> Vec<f64> {
    value
        .as_list()
        .unwrap()
        .iter()
        .map(|v| v.as_float().unwrap())
        .collect()
}

#[test]
fn test_one_to_one_requires_equal_lengths() {
    let mut ctx = context();
    let counters = ctx.create("Counter", "/c", 3).unwrap();
    let tables = ctx.create("Table", "/t", 4).unwrap();
    let err = ctx
        .connect(counters, "output", tables, "input", Policy::OneToOne)
        .unwrap_err();
    let Error::ConnectionError(message) = &err else {
        panic!("expected a connection error, got {:?}", err);
    };
    assert!(message.contains("/c.output"), "{}", message);
    assert!(message.contains("/t.input"), "{}", message);
    assert!(ctx.bus().is_empty());
}

#[test]
fn test_type_mismatch_fails_at_connect() {
    let mut ctx = context();
    let pulse = ctx.create("PulseGen", "/p", 1).unwrap();
    let syn = ctx.create("SimpleSynHandler", "/s", 1).unwrap();
    // double into int
    assert!(matches!(
        ctx.connect(pulse, "output", syn, "addSpike", Policy::Single),
        Err(Error::ConnectionError(_))
    ));
}

#[test]
fn test_fan_in_policies() {
    let mut ctx = context();
    let counters = ctx.create("Counter", "/c", 3).unwrap();
    ctx.set(counters, "count", vec![10i64, 20, 30]).unwrap();
    ctx.set(counters, "step", 0i64).unwrap();
    let gathered = ctx.create("Table", "/all", 1).unwrap();
    let summed = ctx.create("Table", "/sum", 1).unwrap();
    let pool = ctx.create("Pool", "/pool", 1).unwrap();

    ctx.connect(counters, "output", gathered, "input", Policy::AllToOne)
        .unwrap();
    ctx.connect(
        counters,
        "output",
        summed,
        "input",
        Policy::Reduce(ReduceOp::Sum),
    )
    .unwrap();
    // a writable value field as destination
    ctx.connect(
        counters,
        "output",
        pool,
        "conc",
        Policy::Reduce(ReduceOp::Max),
    )
    .unwrap();

    ctx.set_clock(0, 1.0).unwrap();
    ctx.use_clock(0, "/c", "process").unwrap();
    ctx.reinit().unwrap();
    // reinit zeroes counts
    ctx.set(counters, "count", vec![10i64, 20, 30]).unwrap();
    ctx.start(2.0).unwrap();

    assert_eq!(
        floats(ctx.get(gathered.at(0), "vector").unwrap()),
        vec![10.0, 20.0, 30.0, 10.0, 20.0, 30.0]
    );
    assert_eq!(
        floats(ctx.get(summed.at(0), "vector").unwrap()),
        vec![60.0, 60.0]
    );
    assert_eq!(ctx.get(pool.at(0), "conc").unwrap(), Value::Float(30.0));
}

#[test]
fn test_sparse_delivers_declared_pairs_only() {
    let mut ctx = context();
    let counters = ctx.create("Counter", "/c", 3).unwrap();
    let tables = ctx.create("Table", "/t", 3).unwrap();
    let id = ctx
        .connect(
            counters,
            "output",
            tables,
            "input",
            Policy::Sparse(vec![(2, 0), (0, 1), (2, 0)]),
        )
        .unwrap();
    assert_eq!(
        ctx.message(id).unwrap().policy(),
        &Policy::Sparse(vec![(0, 1), (2, 0)])
    );
    assert!(matches!(
        ctx.connect(
            counters,
            "output",
            tables,
            "input",
            Policy::Sparse(vec![(3, 0)])
        ),
        Err(Error::ConnectionError(_))
    ));

    ctx.set_clock(0, 1.0).unwrap();
    ctx.use_clock(0, "/c", "process").unwrap();
    ctx.reinit().unwrap();
    ctx.set(counters, "count", vec![1i64, 2, 3]).unwrap();
    ctx.start(1.0).unwrap();

    assert_eq!(floats(ctx.get(tables.at(0), "vector").unwrap()), vec![3.0]);
    assert_eq!(floats(ctx.get(tables.at(1), "vector").unwrap()), vec![1.0]);
    assert!(floats(ctx.get(tables.at(2), "vector").unwrap()).is_empty());
}

#[test]
fn test_destroy_cascades_to_messages_and_bindings() {
    let mut ctx = context();
    ctx.create("Neutral", "/model", 1).unwrap();
    let counter = ctx.create("Counter", "/model/c", 1).unwrap();
    let table = ctx.create("Table", "/t", 1).unwrap();
    let msg = ctx
        .connect(counter, "output", table, "input", Policy::Single)
        .unwrap();
    ctx.set_clock(0, 1.0).unwrap();
    assert_eq!(ctx.use_clock(0, "/model/##", "process").unwrap(), 1);
    assert_eq!(ctx.neighbors(table, "input", Direction::In), vec![counter]);

    let model = ctx.resolve_path("/model").unwrap();
    let removed = ctx.destroy(model).unwrap();
    assert_eq!(removed, vec![model, counter]);

    assert!(ctx.bus().is_empty());
    assert!(matches!(ctx.message(msg), Err(Error::StaleHandle(_))));
    assert!(ctx.messages_of(table, Direction::Both).is_empty());
    assert!(ctx.scheduler().binding(0).unwrap().targets().is_empty());
    assert!(matches!(ctx.get(counter, "count"), Err(Error::StaleHandle(_))));
    assert!(!ctx.exists("/model"));

    // the freed slot is reused under a new generation
    let fresh = ctx.create("Counter", "/c2", 1).unwrap();
    assert_ne!(fresh, counter);
    ctx.reinit().unwrap();
    ctx.start(2.0).unwrap();
    assert!(floats(ctx.get(table.at(0), "vector").unwrap()).is_empty());
}

#[test]
fn test_field_conditions_select_matching_vecs() {
    let mut ctx = context();
    let low = ctx.create("Pool", "/low", 2).unwrap();
    let high = ctx.create("Pool", "/high", 2).unwrap();
    ctx.create("Table", "/t", 1).unwrap();
    ctx.set(low, "concInit", vec![0.1, 0.2]).unwrap();
    ctx.set(high, "concInit", vec![0.1, 5.0]).unwrap();

    assert_eq!(ctx.find("/#[FIELD(concInit)>1]"), vec![high]);
    assert_eq!(ctx.find("/#[FIELD(concInit)<1]"), vec![low, high]);
    assert_eq!(ctx.find_instances("/#[FIELD(concInit)>1]"), vec![high.at(1)]);
    assert_eq!(ctx.find("/#[TYPE=Pool],/t"), vec![low, high, ctx.resolve_path("/t").unwrap()]);
    assert_eq!(ctx.find("/h?gh"), vec![high]);
    assert!(ctx.find("/#[FIELD(concInit)>").is_empty());
}
