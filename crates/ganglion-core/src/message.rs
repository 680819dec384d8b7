//! Typed messages between elements
//!
//! A [`Message`] connects a source port of one target to a destination
//! port, or a writable value field, of another. The [`Policy`] decides how
//! source instances map onto destination instances. Every check (field kinds,
//! type compatibility, lengths, sparse bounds) happens in
//! [`MessageBus::connect`]; delivery itself cannot fail on shape.
//!
//! Delivery runs once per instant over the emission buffer:
//!
//! 1. emissions are visited in production order and each follows its
//!    outgoing messages in creation order; `Single`, `OneToOne`, `OneToAll`
//!    and `Sparse` present the value right away;
//! 2. `AllToOne` and `Reduce` messages collect their values and are resolved
//!    afterwards in creation order, `AllToOne` presenting in source-index
//!    order and `Reduce` presenting one folded value.
//!
//! Handlers may emit while a value is presented to them. Those emissions are
//! left in the buffer for the next instant, which makes cycles harmless. A
//! handler error ends the pass; deliveries not yet made are held in the
//! buffer and go first on the next pass.

use crate::clock::ProcInfo;
use crate::element::ElementGraph;
use crate::field::Target;
use crate::identity::Arena;
use crate::instance::ProcessCtx;
use crate::outbox::{Delivery, Emission, Outbox};
use crate::{Error, Id, MsgId, ObjId, Result, Value, ValueType};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use tracing::{debug, warn};

/// Fold applied by [`Policy::Reduce`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceOp {
    Sum,
    Product,
    Min,
    Max,
}

impl ReduceOp {
    pub fn fold(&self, values: impl IntoIterator<Item = f64>) -> Option<f64> {
        values.into_iter().reduce(|acc, v| match self {
            ReduceOp::Sum => acc + v,
            ReduceOp::Product => acc * v,
            ReduceOp::Min => acc.min(v),
            ReduceOp::Max => acc.max(v),
        })
    }

    /// Fold in `i64` with overflow checks
    pub fn fold_ints(&self, values: impl IntoIterator<Item = i64>) -> Result<Option<i64>> {
        let mut acc: Option<i64> = None;
        for v in values {
            let next = match acc {
                None => Some(v),
                Some(a) => match self {
                    ReduceOp::Sum => a.checked_add(v),
                    ReduceOp::Product => a.checked_mul(v),
                    ReduceOp::Min => Some(a.min(v)),
                    ReduceOp::Max => Some(a.max(v)),
                },
            };
            acc = Some(next.ok_or_else(|| {
                Error::Overflow(format!("{:?} of {} and {}", self, acc.unwrap_or_default(), v))
            })?);
        }
        Ok(acc)
    }

    /// Fold emitted values: all-int inputs stay exact, anything else folds as float
    pub fn fold_values<'v>(&self, values: impl IntoIterator<Item = &'v Value>) -> Result<Option<Value>> {
        let values: Vec<&Value> = values.into_iter().collect();
        if values.iter().all(|v| matches!(v, Value::Int(_))) {
            let ints = values.iter().filter_map(|v| v.as_int());
            return Ok(self.fold_ints(ints)?.map(Value::Int));
        }
        Ok(self
            .fold(values.iter().filter_map(|v| v.as_float()))
            .map(Value::Float))
    }
}

/// How source instances map onto destination instances
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Policy {
    /// One instance to one instance
    #[default]
    Single,
    /// Equal lengths, instance `i` to instance `i`
    OneToOne,
    /// One source instance to every destination instance
    OneToAll,
    /// Every source instance to one destination, in source-index order
    AllToOne,
    /// Every source instance folded into one destination value
    Reduce(ReduceOp),
    /// Explicit `(src index, dst index)` pairs
    Sparse(Vec<(usize, usize)>),
}

impl Policy {
    fn aggregates(&self) -> bool {
        matches!(self, Policy::AllToOne | Policy::Reduce(_))
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Single => write!(f, "Single"),
            Policy::OneToOne => write!(f, "OneToOne"),
            Policy::OneToAll => write!(f, "OneToAll"),
            Policy::AllToOne => write!(f, "AllToOne"),
            Policy::Reduce(op) => write!(f, "Reduce({:?})", op),
            Policy::Sparse(pairs) => write!(f, "Sparse({} pairs)", pairs.len()),
        }
    }
}

/// Message direction relative to an element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    In,
    Out,
    Both,
}

/// What the destination end of a message writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DestSlot {
    /// Index into the destination type's dest ports
    Port(usize),
    /// Index into the destination type's value fields
    Field(usize),
}

/// A live edge of the bus
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    id: MsgId,
    seq: u64,
    src: Target,
    src_field: String,
    src_port: usize,
    src_range: Range<usize>,
    dst: Target,
    dst_field: String,
    dst_slot: DestSlot,
    dst_ty: ValueType,
    dst_range: Range<usize>,
    policy: Policy,
}

impl Message {
    pub fn id(&self) -> MsgId {
        self.id
    }

    pub fn src(&self) -> Target {
        self.src
    }

    pub fn src_field(&self) -> &str {
        &self.src_field
    }

    pub fn dst(&self) -> Target {
        self.dst
    }

    pub fn dst_field(&self) -> &str {
        &self.dst_field
    }

    pub fn dst_slot(&self) -> DestSlot {
        self.dst_slot
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    fn touches(&self, id: Id) -> bool {
        self.src.id() == id || self.dst.id() == id
    }

    /// Offset of a source instance inside the source range
    fn offset(&self, index: usize) -> Option<usize> {
        self.src_range
            .contains(&index)
            .then(|| index - self.src_range.start)
    }

    /// Destination instances receiving the value from source offset `offset`
    fn fan_out(&self, offset: usize) -> Vec<ObjId> {
        let dst = self.dst.id();
        let base = self.dst_range.start;
        match &self.policy {
            Policy::Single | Policy::AllToOne | Policy::Reduce(_) => vec![dst.at(base)],
            Policy::OneToOne => vec![dst.at(base + offset)],
            Policy::OneToAll => self.dst_range.clone().map(|i| dst.at(i)).collect(),
            Policy::Sparse(pairs) => pairs
                .iter()
                .filter(|(s, _)| *s == offset)
                .map(|(_, d)| dst.at(base + d))
                .collect(),
        }
    }
}

fn describe(graph: &ElementGraph, target: Target, field: &str) -> String {
    let path = graph
        .path(target.id())
        .unwrap_or_else(|_| target.id().to_string());
    match target {
        Target::Vec(_) => format!("{}.{}", path, field),
        Target::Instance(obj) => format!("{}[{}].{}", path, obj.index, field),
    }
}

fn target_range(graph: &ElementGraph, target: Target) -> Result<Range<usize>> {
    let len = graph.len(target.id())?;
    match target {
        Target::Vec(_) => Ok(0..len),
        Target::Instance(obj) if obj.index < len => Ok(obj.index..obj.index + 1),
        Target::Instance(obj) => Err(Error::IndexOutOfRange {
            index: obj.index as isize,
            len,
        }),
    }
}

/// Owner of all messages
#[derive(Debug, Clone, Default)]
pub struct MessageBus {
    arena: Arena<Message>,
    next_seq: u64,
    /// Outgoing messages per `(source element, source port)`, in creation order
    routes: IndexMap<(Id, usize), Vec<MsgId>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Connect a source port to a destination port or writable value field
    pub fn connect(
        &mut self,
        graph: &ElementGraph,
        src: impl Into<Target>,
        src_field: &str,
        dst: impl Into<Target>,
        dst_field: &str,
        policy: Policy,
    ) -> Result<MsgId> {
        let (src, dst) = (src.into(), dst.into());
        let label = format!(
            "{} -> {} ({})",
            describe(graph, src, src_field),
            describe(graph, dst, dst_field),
            policy
        );
        let fail = |why: String| Error::ConnectionError(format!("{}: {}", label, why));

        let src_range = target_range(graph, src)?;
        let dst_range = target_range(graph, dst)?;
        let src_class = graph.element(src.id())?.class().clone();
        let dst_class = graph.element(dst.id())?.class().clone();

        let src_port = src_class
            .source_index(src_field)
            .ok_or_else(|| fail(format!("{} has no source port '{}'", src_class.name(), src_field)))?;
        let src_ty = src_class.sources()[src_port].ty;

        let (dst_slot, dst_ty) = if let Some(port) = dst_class.dest_index(dst_field) {
            (DestSlot::Port(port), dst_class.dests()[port].ty)
        } else if let Some(index) = dst_class.value_index(dst_field) {
            let field = &dst_class.values()[index];
            if field.read_only {
                return Err(fail(format!("value field '{}' is read-only", dst_field)));
            }
            (DestSlot::Field(index), field.ty)
        } else {
            return Err(fail(format!(
                "{} has no destination port or value field '{}'",
                dst_class.name(),
                dst_field
            )));
        };

        if !src_ty.flows_into(dst_ty) {
            return Err(fail(format!("type {} cannot flow into {}", src_ty, dst_ty)));
        }

        let (src_len, dst_len) = (src_range.len(), dst_range.len());
        let policy = match policy {
            Policy::Single if src_len != 1 || dst_len != 1 => {
                return Err(fail(format!(
                    "Single needs length 1 on both ends, got {} and {}",
                    src_len, dst_len
                )))
            }
            Policy::OneToOne if src_len != dst_len => {
                return Err(fail(format!(
                    "OneToOne needs equal lengths, got {} and {}",
                    src_len, dst_len
                )))
            }
            Policy::OneToAll if src_len != 1 => {
                return Err(fail(format!("OneToAll needs a length 1 source, got {}", src_len)))
            }
            Policy::AllToOne | Policy::Reduce(_) if dst_len != 1 => {
                return Err(fail(format!(
                    "fan-in needs a length 1 destination, got {}",
                    dst_len
                )))
            }
            Policy::Reduce(_) if !(src_ty.is_numeric() && dst_ty.is_numeric()) => {
                return Err(fail("Reduce needs numeric endpoints".to_string()))
            }
            Policy::Sparse(mut pairs) => {
                pairs.sort_unstable();
                pairs.dedup();
                if let Some((s, d)) = pairs.iter().find(|(s, d)| *s >= src_len || *d >= dst_len) {
                    return Err(fail(format!(
                        "sparse pair ({}, {}) out of bounds for lengths {} and {}",
                        s, d, src_len, dst_len
                    )));
                }
                Policy::Sparse(pairs)
            }
            other => other,
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        let id = MsgId::from_raw(self.arena.insert(Message {
            id: MsgId::from_raw(Default::default()),
            seq,
            src,
            src_field: src_field.to_string(),
            src_port,
            src_range,
            dst,
            dst_field: dst_field.to_string(),
            dst_slot,
            dst_ty,
            dst_range,
            policy,
        }));
        if let Some(message) = self.arena.get_mut(id.raw()) {
            message.id = id;
        }
        self.routes
            .entry((src.id(), src_port))
            .or_default()
            .push(id);
        debug!(%id, %label, "connected");
        Ok(id)
    }

    pub fn message(&self, id: MsgId) -> Result<&Message> {
        self.arena.get(id.raw()).ok_or_else(|| {
            if self.arena.is_stale(id.raw()) {
                Error::StaleHandle(id.to_string())
            } else {
                Error::NotFound(id.to_string())
            }
        })
    }

    pub fn disconnect(&mut self, id: MsgId) -> Result<()> {
        let message = self.message(id)?;
        let key = (message.src.id(), message.src_port);
        self.arena.remove(id.raw());
        if let Some(route) = self.routes.get_mut(&key) {
            route.retain(|m| *m != id);
            if route.is_empty() {
                self.routes.shift_remove(&key);
            }
        }
        debug!(%id, "disconnected");
        Ok(())
    }

    /// Remove every message touching one of `ids`
    pub fn drop_elements(&mut self, ids: &[Id]) -> Vec<MsgId> {
        let doomed: Vec<MsgId> = self
            .messages()
            .into_iter()
            .filter(|m| ids.iter().any(|id| m.touches(*id)))
            .map(|m| m.id)
            .collect();
        for id in &doomed {
            let _ = self.disconnect(*id);
        }
        doomed
    }

    /// Live messages in creation order
    pub fn messages(&self) -> Vec<&Message> {
        let mut all: Vec<&Message> = self.arena.iter().map(|(_, m)| m).collect();
        all.sort_by_key(|m| m.seq);
        all
    }

    /// Messages entering and/or leaving `id`, in creation order
    pub fn messages_of(&self, id: Id, direction: Direction) -> Vec<MsgId> {
        self.messages()
            .into_iter()
            .filter(|m| match direction {
                Direction::Out => m.src.id() == id,
                Direction::In => m.dst.id() == id,
                Direction::Both => m.touches(id),
            })
            .map(|m| m.id)
            .collect()
    }

    /// Elements at the far end of messages on `field` of `id`
    pub fn neighbors(&self, id: Id, field: &str, direction: Direction) -> Vec<Id> {
        let mut out = Vec::new();
        for m in self.messages() {
            let far = if matches!(direction, Direction::Out | Direction::Both)
                && m.src.id() == id
                && m.src_field == field
            {
                Some(m.dst.id())
            } else if matches!(direction, Direction::In | Direction::Both)
                && m.dst.id() == id
                && m.dst_field == field
            {
                Some(m.src.id())
            } else {
                None
            };
            if let Some(far) = far.filter(|f| !out.contains(f)) {
                out.push(far);
            }
        }
        out
    }

    /// Deliver the buffered emissions of one instant
    ///
    /// Returns the number of emissions consumed. Emissions made by handlers
    /// during delivery stay in `outbox` for the next pass. When a handler
    /// fails, the deliveries planned after it are held in `outbox` and go
    /// first on the next pass; a failing fold leaves `outbox` untouched.
    pub fn deliver(&self, graph: &mut ElementGraph, outbox: &mut Outbox, time: f64) -> Result<usize> {
        let held = outbox.take_held();
        let batch = outbox.take();
        let planned = match self.plan(&batch) {
            Ok(planned) => planned,
            Err(err) => {
                outbox.hold(held);
                for emission in batch {
                    outbox.push(emission);
                }
                return Err(err);
            }
        };
        let info = ProcInfo {
            time,
            dt: 0.0,
            tick: None,
        };

        let mut plan = held.into_iter().chain(planned);
        while let Some(delivery) = plan.next() {
            let Some(message) = self.arena.get(delivery.msg.raw()) else {
                continue;
            };
            if let Err(err) = present(graph, message, delivery.dst, delivery.value, outbox, info) {
                outbox.hold(plan);
                warn!(msg = %delivery.msg, dst = %delivery.dst, held = outbox.held().len(), "delivery failed");
                return Err(err);
            }
        }
        Ok(batch.len())
    }

    /// Resolve emissions into per-instance deliveries, in presentation order
    fn plan(&self, batch: &[Emission]) -> Result<Vec<Delivery>> {
        let mut plan = Vec::new();
        let mut gathered: IndexMap<MsgId, Vec<(usize, Value)>> = IndexMap::new();

        for emission in batch {
            let Some(route) = self.routes.get(&(emission.src.id, emission.port)) else {
                continue;
            };
            for msg_id in route {
                let Some(message) = self.arena.get(msg_id.raw()) else {
                    continue;
                };
                let Some(offset) = message.offset(emission.src.index) else {
                    continue;
                };
                if message.policy.aggregates() {
                    gathered
                        .entry(*msg_id)
                        .or_default()
                        .push((offset, emission.value.clone()));
                    continue;
                }
                plan.extend(message.fan_out(offset).into_iter().map(|dst| Delivery {
                    msg: *msg_id,
                    dst,
                    value: emission.value.clone(),
                }));
            }
        }

        let mut pending: Vec<(&Message, Vec<(usize, Value)>)> = gathered
            .into_iter()
            .filter_map(|(id, values)| self.arena.get(id.raw()).map(|m| (m, values)))
            .collect();
        pending.sort_by_key(|(m, _)| m.seq);

        for (message, mut values) in pending {
            let dst = message.dst.id().at(message.dst_range.start);
            match message.policy {
                Policy::Reduce(op) => {
                    if let Some(value) = op.fold_values(values.iter().map(|(_, v)| v))? {
                        plan.push(Delivery {
                            msg: message.id,
                            dst,
                            value,
                        });
                    }
                }
                _ => {
                    values.sort_by_key(|(offset, _)| *offset);
                    plan.extend(values.into_iter().map(|(_, value)| Delivery {
                        msg: message.id,
                        dst,
                        value,
                    }));
                }
            }
        }
        Ok(plan)
    }
}

/// Hand one value to a destination instance
fn present(
    graph: &mut ElementGraph,
    message: &Message,
    dst: ObjId,
    value: Value,
    outbox: &mut Outbox,
    info: ProcInfo,
) -> Result<()> {
    let value = message.dst_ty.coerce(value)?;
    match message.dst_slot {
        DestSlot::Port(port) => graph.with_instance(dst, |desc, data| {
            let handler = desc.dests()[port].handler;
            let mut ctx = ProcessCtx::new(info, dst, desc, data, outbox);
            handler(&mut ctx, value)
        })?,
        DestSlot::Field(index) => graph.with_instance(dst, |_, data| {
            data.values[index] = value;
        }),
    }
}
