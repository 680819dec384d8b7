//! The simulation context
//!
//! A [`Context`] owns everything one simulation needs: the element graph,
//! the message bus, the scheduler and a current working element that
//! relative paths and patterns resolve against. There is no global state;
//! two contexts never share anything but their registry.

use crate::config::SimConfig;
use crate::element::ElementGraph;
use crate::field::Target;
use crate::message::{Direction, Message, MessageBus, Policy};
use crate::registry::{FieldInfo, Registry};
use crate::scheduler::{Progress, RunSummary, Scheduler};
use crate::{wildcard, Error, Id, Key, MsgId, ObjId, Result, Value};
use indexmap::IndexMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Context {
    graph: ElementGraph,
    bus: MessageBus,
    scheduler: Scheduler,
    cwe: Id,
    config: SimConfig,
}

impl Context {
    pub fn new(registry: Registry) -> Result<Self> {
        Self::with_config(registry, SimConfig::default())
    }

    pub fn with_config(registry: Registry, config: SimConfig) -> Result<Self> {
        let config = config.validated()?;
        let graph = ElementGraph::new(Arc::new(registry))?;
        let scheduler = Scheduler::with_config(&config)?;
        Ok(Self {
            cwe: graph.root(),
            graph,
            bus: MessageBus::new(),
            scheduler,
            config,
        })
    }

    pub fn graph(&self) -> &ElementGraph {
        &self.graph
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn registry(&self) -> &Registry {
        self.graph.registry()
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn root(&self) -> Id {
        self.graph.root()
    }

    // Namespace

    /// Current working element
    pub fn cwe(&self) -> Id {
        self.cwe
    }

    pub fn set_cwe(&mut self, path: &str) -> Result<Id> {
        self.cwe = self.resolve_path(path)?;
        Ok(self.cwe)
    }

    /// Create `class` at `path`; the parent part must already exist
    pub fn create(&mut self, class: &str, path: &str, size: usize) -> Result<Id> {
        let (parent, name) = match path.rfind('/') {
            Some(0) => (self.graph.root(), &path[1..]),
            Some(split) => (self.resolve_path(&path[..split])?, &path[split + 1..]),
            None => (self.cwe, path),
        };
        self.graph.create(parent, name, class, size)
    }

    pub fn create_in(&mut self, parent: Id, name: &str, class: &str, size: usize) -> Result<Id> {
        self.graph.create(parent, name, class, size)
    }

    /// Destroy an element subtree with its messages and tick bindings
    pub fn destroy(&mut self, id: Id) -> Result<Vec<Id>> {
        let removed = self.graph.destroy(id)?;
        let messages = self.bus.drop_elements(&removed);
        self.scheduler.forget(&removed);
        if removed.contains(&self.cwe) {
            self.cwe = self.graph.root();
        }
        debug!(%id, elements = removed.len(), messages = messages.len(), "destroy cascade");
        Ok(removed)
    }

    pub fn resolve_path(&self, path: &str) -> Result<Id> {
        self.graph.resolve_path(self.cwe, path)
    }

    pub fn resolve_obj(&self, path: &str) -> Result<ObjId> {
        self.graph.resolve_obj(self.cwe, path)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.graph.exists(self.cwe, path)
    }

    pub fn path(&self, id: Id) -> Result<String> {
        self.graph.path(id)
    }

    pub fn move_to(&mut self, id: Id, new_parent: Id) -> Result<()> {
        self.graph.move_to(id, new_parent)
    }

    pub fn copy(&mut self, id: Id, new_parent: Id, name: &str) -> Result<Id> {
        self.graph.copy(id, new_parent, name)
    }

    pub fn find(&self, pattern: &str) -> Vec<Id> {
        wildcard::find(&self.graph, self.cwe, pattern)
    }

    pub fn find_instances(&self, pattern: &str) -> Vec<ObjId> {
        wildcard::find_instances(&self.graph, self.cwe, pattern)
    }

    // Fields

    pub fn get(&self, target: impl Into<Target>, field: &str) -> Result<Value> {
        self.graph.get(target, field)
    }

    pub fn get_opt(&self, target: impl Into<Target>, field: &str) -> Result<Option<Value>> {
        self.graph.get_opt(target, field)
    }

    pub fn set(&mut self, target: impl Into<Target>, field: &str, value: impl Into<Value>) -> Result<()> {
        self.graph.set(target, field, value)
    }

    pub fn get_lookup(&self, target: impl Into<Target>, field: &str, key: impl Into<Key>) -> Result<Value> {
        self.graph.get_lookup(target, field, key)
    }

    pub fn set_lookup(
        &mut self,
        target: impl Into<Target>,
        field: &str,
        key: impl Into<Key>,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.graph.set_lookup(target, field, key, value)
    }

    pub fn get_element(&self, target: impl Into<Target>, field: &str, sub: &str) -> Result<Value> {
        self.graph.get_element(target, field, sub)
    }

    pub fn set_element(
        &mut self,
        target: impl Into<Target>,
        field: &str,
        sub: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.graph.set_element(target, field, sub, value)
    }

    pub fn element_len(&self, target: impl Into<Target>, field: &str) -> Result<Vec<usize>> {
        self.graph.element_len(target, field)
    }

    pub fn resize_element_field(&mut self, target: impl Into<Target>, field: &str, len: usize) -> Result<()> {
        self.graph.resize_element_field(target, field, len)
    }

    // Introspection

    pub fn field_names(&self, class: &str, selector: &str) -> Vec<String> {
        self.registry().field_names(class, selector)
    }

    pub fn field_type_dict(&self, class: &str, selector: &str) -> IndexMap<String, String> {
        self.registry().field_type_dict(class, selector)
    }

    pub fn field_info(&self, class: &str, field: &str) -> FieldInfo {
        self.registry().field_info(class, field)
    }

    // Messages

    pub fn connect(
        &mut self,
        src: impl Into<Target>,
        src_field: &str,
        dst: impl Into<Target>,
        dst_field: &str,
        policy: Policy,
    ) -> Result<MsgId> {
        self.bus
            .connect(&self.graph, src, src_field, dst, dst_field, policy)
    }

    pub fn disconnect(&mut self, id: MsgId) -> Result<()> {
        self.bus.disconnect(id)
    }

    pub fn message(&self, id: MsgId) -> Result<&Message> {
        self.bus.message(id)
    }

    pub fn messages_of(&self, id: Id, direction: Direction) -> Vec<MsgId> {
        self.bus.messages_of(id, direction)
    }

    pub fn neighbors(&self, id: Id, field: &str, direction: Direction) -> Vec<Id> {
        self.bus.neighbors(id, field, direction)
    }

    // Scheduling

    pub fn set_clock(&mut self, tick: usize, dt: f64) -> Result<()> {
        self.scheduler.set_clock(tick, dt)
    }

    /// Bind `entry` of every element matching `pattern` to `tick`
    ///
    /// The pattern is resolved once, now. Returns the number of bound
    /// elements.
    pub fn use_clock(&mut self, tick: usize, pattern: &str, entry: &str) -> Result<usize> {
        let targets = self.find(pattern);
        let count = targets.len();
        self.scheduler
            .bind(&self.graph, tick, pattern, entry, targets)?;
        Ok(count)
    }

    pub fn reinit(&mut self) -> Result<()> {
        self.scheduler.reinit(&mut self.graph, &self.bus)
    }

    pub fn start(&mut self, duration: f64) -> Result<RunSummary> {
        self.scheduler.start(&mut self.graph, &self.bus, duration)
    }

    pub fn start_with(
        &mut self,
        duration: f64,
        control: impl FnMut(&Progress) -> ControlFlow<()>,
    ) -> Result<RunSummary> {
        self.scheduler
            .start_with(&mut self.graph, &self.bus, duration, control)
    }

    pub fn now(&self) -> f64 {
        self.scheduler.now()
    }

    /// Look up an element by path, failing with a `NotFound` naming the path
    pub fn element_at(&self, path: &str) -> Result<Id> {
        self.resolve_path(path)
            .map_err(|_| Error::NotFound(format!("no element at '{}'", path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::ProcessCtx;
    use crate::registry::{TypeDescriptor, NEUTRAL};
    use crate::ValueType;

    fn fire(ctx: &mut ProcessCtx<'_>) -> Result<()> {
        ctx.emit("out", 1.0)
    }

    fn absorb(ctx: &mut ProcessCtx<'_>, value: Value) -> Result<()> {
        let total = ctx.get_f64("x")? + value.as_float().unwrap_or(0.0);
        ctx.set("x", total)
    }

    fn context() -> Context {
        let cell = TypeDescriptor::new("Cell")
            .value("x", ValueType::Float, 0.0)
            .source("out", ValueType::Float)
            .dest("in", ValueType::Float, absorb)
            .entry("process", fire);
        let registry = Registry::builder().register(cell).unwrap().build();
        Context::new(registry).unwrap()
    }

    #[test]
    fn test_create_by_path_and_cwe() {
        let mut ctx = context();
        let model = ctx.create(NEUTRAL, "/model", 1).unwrap();
        let a = ctx.create("Cell", "/model/a", 2).unwrap();
        ctx.set_cwe("/model").unwrap();
        let b = ctx.create("Cell", "b", 1).unwrap();

        assert_eq!(ctx.cwe(), model);
        assert_eq!(ctx.resolve_path("a").unwrap(), a);
        assert_eq!(ctx.path(b).unwrap(), "/model/b");
        assert_eq!(ctx.find("#"), vec![a, b]);
        assert_eq!(ctx.resolve_obj("a[1]").unwrap(), a.at(1));
        assert!(ctx.create("Cell", "/nowhere/c", 1).is_err());
        assert!(matches!(ctx.element_at("zzz"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_destroy_cascade() {
        let mut ctx = context();
        let model = ctx.create(NEUTRAL, "/model", 1).unwrap();
        let a = ctx.create("Cell", "/model/a", 1).unwrap();
        let b = ctx.create("Cell", "/b", 1).unwrap();
        let keep = ctx.connect(b, "out", b, "in", Policy::Single).unwrap();
        ctx.connect(a, "out", b, "in", Policy::Single).unwrap();
        ctx.connect(b, "out", a, "in", Policy::Single).unwrap();
        ctx.set_clock(0, 0.1).unwrap();
        ctx.use_clock(0, "/##[TYPE=Cell]", "process").unwrap();
        ctx.set_cwe("/model/a").unwrap();

        let removed = ctx.destroy(model).unwrap();
        assert_eq!(removed, vec![model, a]);
        assert_eq!(ctx.bus().len(), 1);
        assert!(ctx.message(keep).is_ok());
        assert_eq!(ctx.scheduler().binding(0).unwrap().targets(), &[b]);
        assert_eq!(ctx.cwe(), ctx.root());
        assert!(matches!(ctx.get(a, "x"), Err(Error::StaleHandle(_))));
    }

    #[test]
    fn test_use_clock_resolves_once() {
        let mut ctx = context();
        ctx.create("Cell", "/a", 1).unwrap();
        ctx.set_clock(0, 0.5).unwrap();
        assert_eq!(ctx.use_clock(0, "/#[TYPE=Cell]", "process").unwrap(), 1);
        // created after binding: not picked up
        ctx.create("Cell", "/late", 1).unwrap();
        assert_eq!(ctx.scheduler().binding(0).unwrap().targets().len(), 1);
        assert_eq!(ctx.use_clock(0, "/nothing", "process").unwrap(), 0);
        assert!(matches!(
            ctx.use_clock(0, "/", "process"),
            Err(Error::Binding(_))
        ));
    }

    #[test]
    fn test_run_through_context() {
        let mut ctx = context();
        let a = ctx.create("Cell", "/a", 1).unwrap();
        let b = ctx.create("Cell", "/b", 1).unwrap();
        ctx.connect(a, "out", b, "in", Policy::Single).unwrap();
        ctx.set_clock(0, 0.25).unwrap();
        ctx.use_clock(0, "/a", "process").unwrap();
        ctx.reinit().unwrap();
        let summary = ctx.start(1.0).unwrap();
        assert_eq!(summary.instants, 4);
        assert_eq!(ctx.get(b, "x").unwrap(), Value::Float(4.0));
        assert_eq!(ctx.now(), 1.0);
    }

    #[test]
    fn test_introspection_passthrough() {
        let ctx = context();
        assert_eq!(ctx.field_names("Cell", "dest"), vec!["in".to_string()]);
        assert_eq!(
            ctx.field_type_dict("Cell", "src").get("out").map(String::as_str),
            Some("double")
        );
        assert!(ctx.field_info("Cell", "bogus").is_bad());
    }
}
