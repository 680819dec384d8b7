//! Ganglion Core - element namespace, typed messaging and multi-rate scheduling
//!
//! This crate provides the substrate a simulation is built on:
//! - A hierarchical namespace of typed elements, each a vec of instances
//! - Wildcard queries over the namespace
//! - Field access with vec broadcast and scatter, including ragged element fields
//! - A message bus with fan-out, fan-in, reduction and sparse policies
//! - A multi-rate clock/tick scheduler with deterministic ordering
//!
//! ## Model
//!
//! Types are declared once in a [`Registry`] built from [`TypeDescriptor`]s.
//! A [`Context`] owns the graph, the bus and the scheduler:
//!
//! ```rust,ignore
//! use ganglion_core::{Context, Policy};
//!
//! let mut ctx = Context::new(registry)?;
//! let a = ctx.create("Counter", "/a", 4)?;
//! let b = ctx.create("Table", "/b", 4)?;
//! ctx.connect(a, "output", b, "input", Policy::OneToOne)?;
//! ctx.set_clock(0, 0.1)?;
//! ctx.use_clock(0, "/#[TYPE=Counter]", "process")?;
//! ctx.reinit()?;
//! ctx.start(1.0)?;
//! ```
//!
//! ## Determinism
//!
//! All iteration is in creation, tick-index or instance-index order, and
//! clock times are computed from step counters. A run replayed after
//! `reinit` is bit-identical; enable the [`Trace`] to compare runs.

pub mod clock;
pub mod config;
mod context;
mod element;
mod error;
mod field;
mod identity;
mod instance;
pub mod message;
mod outbox;
pub mod registry;
pub mod scheduler;
pub mod trace;
mod value;
pub mod wildcard;

pub use clock::{Clock, ProcInfo};
pub use config::{ClockPreset, SimConfig, TraceConfig};
pub use context::Context;
pub use element::{Element, ElementGraph};
pub use error::{Error, Result};
pub use field::Target;
pub use identity::{Arena, Id, MsgId, ObjId, RawHandle};
pub use instance::{InstanceData, Memo, ProcessCtx};
pub use message::{DestSlot, Direction, Message, MessageBus, Policy, ReduceOp};
pub use outbox::{Delivery, Emission, Outbox};
pub use registry::{
    DestFn, EntryFn, FieldInfo, FieldKind, Registry, RegistryBuilder, TypeDescriptor, ValueField,
    NEUTRAL,
};
pub use scheduler::{Binding, Progress, RunSummary, Scheduler, SchedulerState};
pub use trace::{Trace, TraceEvent, TraceStats};
pub use value::{Key, Value, ValueType};
