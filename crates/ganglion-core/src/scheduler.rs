//! Multi-rate tick scheduler
//!
//! The scheduler owns a fixed number of ticks. A tick may carry a [`Clock`]
//! and a [`Binding`] naming the entry point to dispatch and the elements to
//! dispatch it to. A run advances through *instants*: at each one, every
//! clock whose next step fires at the earliest pending time dispatches its
//! binding (ticks in index order, elements in binding order, instances in
//! index order), then the bus delivers the instant's emissions once.
//!
//! A clock step `n` covers `[n*dt, (n+1)*dt)` and is dispatched with
//! `time = n*dt`. It runs only if it completes within the requested
//! duration, so `start(t)` on a clock with `dt` runs `floor(t / dt)` steps.
//!
//! ```text
//!   Idle --reinit--> Initialized --start--> Running --done--> Idle
//!                                              |
//!                                       cancel | error
//!                                              v
//!                                           Running (resume with start,
//!                                                    reset with reinit)
//! ```
//!
//! Changing a clock or a binding invalidates the last `reinit`.

use crate::clock::{Clock, ProcInfo};
use crate::config::SimConfig;
use crate::element::ElementGraph;
use crate::instance::ProcessCtx;
use crate::message::MessageBus;
use crate::outbox::Outbox;
use crate::trace::{Trace, TraceEvent};
use crate::{Error, Id, Result};
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use tracing::{info, trace, warn};

/// Entry point dispatched by `reinit`, when the element's type declares it
pub const REINIT: &str = "reinit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SchedulerState {
    #[default]
    Idle,
    Initialized,
    Running,
}

/// Elements bound to a tick
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pattern: String,
    entry: String,
    targets: Vec<Id>,
}

impl Binding {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn targets(&self) -> &[Id] {
        &self.targets
    }
}

#[derive(Debug, Clone, Default)]
struct TickSlot {
    clock: Option<Clock>,
    binding: Option<Binding>,
}

/// Where a run currently stands, handed to the control callback
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub time: f64,
    pub end: f64,
    pub instants: u64,
}

/// Outcome of one `start`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunSummary {
    pub instants: u64,
    pub dispatches: u64,
    pub emissions: usize,
    /// Simulation time when the run returned
    pub time: f64,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    ticks: Vec<TickSlot>,
    state: SchedulerState,
    initialized: bool,
    now: f64,
    tolerance: f64,
    outbox: Outbox,
    trace: Trace,
}

impl Default for Scheduler {
    fn default() -> Self {
        let config = SimConfig::default();
        Self {
            ticks: vec![TickSlot::default(); config.num_ticks],
            state: SchedulerState::Idle,
            initialized: false,
            now: 0.0,
            tolerance: config.time_tolerance,
            outbox: Outbox::new(),
            trace: Trace::new(config.trace),
        }
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &SimConfig) -> Result<Self> {
        let config = config.clone().validated()?;
        let mut scheduler = Self {
            ticks: vec![TickSlot::default(); config.num_ticks],
            tolerance: config.time_tolerance,
            trace: Trace::new(config.trace.clone()),
            ..Self::default()
        };
        for preset in &config.clocks {
            scheduler.set_clock(preset.tick, preset.dt)?;
        }
        Ok(scheduler)
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Current simulation time
    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn num_ticks(&self) -> usize {
        self.ticks.len()
    }

    pub fn clock(&self, tick: usize) -> Option<&Clock> {
        self.ticks.get(tick).and_then(|t| t.clock.as_ref())
    }

    pub fn binding(&self, tick: usize) -> Option<&Binding> {
        self.ticks.get(tick).and_then(|t| t.binding.as_ref())
    }

    /// Emissions waiting for the next delivery pass
    pub fn pending(&self) -> &Outbox {
        &self.outbox
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn trace_mut(&mut self) -> &mut Trace {
        &mut self.trace
    }

    fn configurable(&self, tick: usize, what: &str) -> Result<()> {
        if self.state == SchedulerState::Running {
            return Err(Error::StateError(format!("cannot {} while running", what)));
        }
        if tick >= self.ticks.len() {
            return Err(Error::IndexOutOfRange {
                index: tick as isize,
                len: self.ticks.len(),
            });
        }
        Ok(())
    }

    fn invalidate(&mut self) {
        self.initialized = false;
        self.state = SchedulerState::Idle;
    }

    /// Set (or replace) the clock of `tick`
    pub fn set_clock(&mut self, tick: usize, dt: f64) -> Result<()> {
        self.configurable(tick, "set a clock")?;
        self.ticks[tick].clock = Some(Clock::new(dt)?);
        self.invalidate();
        trace!(tick, dt, "clock set");
        Ok(())
    }

    /// Bind `entry` on `targets` to `tick`, replacing any previous binding
    ///
    /// `pattern` is kept for inspection only; the target list is final.
    pub fn bind(
        &mut self,
        graph: &ElementGraph,
        tick: usize,
        pattern: &str,
        entry: &str,
        targets: Vec<Id>,
    ) -> Result<()> {
        self.configurable(tick, "bind a tick")?;
        if self.ticks[tick].clock.is_none() {
            return Err(Error::Binding(format!(
                "tick {} has no clock; call set_clock first",
                tick
            )));
        }
        for id in &targets {
            let element = graph.element(*id)?;
            if !element.class().has_entry(entry) {
                return Err(Error::Binding(format!(
                    "{} ({}) has no entry point '{}'",
                    graph.path(*id)?,
                    element.class_name(),
                    entry
                )));
            }
        }
        if targets.is_empty() {
            warn!(tick, pattern, entry, "binding resolved to no elements");
        }
        info!(tick, pattern, entry, count = targets.len(), "tick bound");
        self.ticks[tick].binding = Some(Binding {
            pattern: pattern.to_string(),
            entry: entry.to_string(),
            targets,
        });
        self.invalidate();
        Ok(())
    }

    pub fn clear_binding(&mut self, tick: usize) -> Result<()> {
        self.configurable(tick, "unbind a tick")?;
        self.ticks[tick].binding = None;
        self.invalidate();
        Ok(())
    }

    /// Drop destroyed elements from bindings and the emission buffer
    ///
    /// A pending (cancelled) run cannot continue over a changed graph, so it
    /// is abandoned.
    pub fn forget(&mut self, removed: &[Id]) {
        for slot in &mut self.ticks {
            if let Some(binding) = slot.binding.as_mut() {
                binding.targets.retain(|id| !removed.contains(id));
            }
        }
        self.outbox.forget(removed);
        if self.state == SchedulerState::Running {
            warn!("graph changed during a pending run; reinit required");
            self.invalidate();
        }
    }

    /// Reset time, call `reinit` on bound elements and deliver once
    pub fn reinit(&mut self, graph: &mut ElementGraph, bus: &MessageBus) -> Result<()> {
        self.initialized = false;
        self.state = SchedulerState::Idle;
        self.now = 0.0;
        self.outbox.clear();
        for slot in &mut self.ticks {
            if let Some(clock) = slot.clock.as_mut() {
                clock.reset();
            }
        }
        self.trace.record(TraceEvent::Reinit);

        for (tick, slot) in self.ticks.iter().enumerate() {
            let (Some(clock), Some(binding)) = (slot.clock.as_ref(), slot.binding.as_ref())
            else {
                continue;
            };
            let info = ProcInfo {
                time: 0.0,
                dt: clock.dt(),
                tick: Some(tick),
            };
            dispatch(graph, &mut self.outbox, &mut self.trace, binding, REINIT, info)?;
        }
        let emissions = bus.deliver(graph, &mut self.outbox, 0.0)?;
        self.trace.record(TraceEvent::Deliver {
            time: 0.0,
            emissions,
        });

        self.initialized = true;
        self.state = SchedulerState::Initialized;
        info!(ticks = self.active_ticks(), "reinitialized");
        Ok(())
    }

    fn active_ticks(&self) -> usize {
        self.ticks.iter().filter(|t| t.clock.is_some()).count()
    }

    /// Advance simulated time by `duration`
    pub fn start(&mut self, graph: &mut ElementGraph, bus: &MessageBus, duration: f64) -> Result<RunSummary> {
        self.start_with(graph, bus, duration, |_| ControlFlow::Continue(()))
    }

    /// Advance simulated time by `duration`, asking `control` before each instant
    ///
    /// Returning `ControlFlow::Break` stops the run between instants and
    /// leaves the scheduler `Running`.
    pub fn start_with(
        &mut self,
        graph: &mut ElementGraph,
        bus: &MessageBus,
        duration: f64,
        mut control: impl FnMut(&Progress) -> ControlFlow<()>,
    ) -> Result<RunSummary> {
        if !self.initialized {
            return Err(Error::StateError(
                "start requires reinit after configuration changes".into(),
            ));
        }
        if !(duration.is_finite() && duration >= 0.0) {
            return Err(Error::InvalidArgument(format!(
                "run duration must be finite and non-negative, got {}",
                duration
            )));
        }
        let end = self.now + duration;
        self.state = SchedulerState::Running;
        info!(from = self.now, to = end, "run started");

        let mut summary = RunSummary::default();
        while let Some(next) = self.next_instant(end) {
            let progress = Progress {
                time: self.now,
                end,
                instants: summary.instants,
            };
            if control(&progress).is_break() {
                // everything before the pending instant has run
                self.now = self.now.max(next);
                summary.cancelled = true;
                summary.time = self.now;
                info!(time = self.now, "run cancelled");
                return Ok(summary);
            }
            // a clock left behind by the previous run's end may fire below `now`
            self.now = self.now.max(next);
            trace!(time = next, "instant");

            for (tick, slot) in self.ticks.iter_mut().enumerate() {
                let Some(clock) = slot.clock.as_mut() else {
                    continue;
                };
                if !clock.is_eligible(end, self.tolerance)
                    || clock.next_fire() > next + self.tolerance * next.abs().max(clock.dt())
                {
                    continue;
                }
                let info = ProcInfo {
                    time: clock.next_fire(),
                    dt: clock.dt(),
                    tick: Some(tick),
                };
                clock.advance();
                if let Some(binding) = slot.binding.as_ref() {
                    summary.dispatches += dispatch(
                        graph,
                        &mut self.outbox,
                        &mut self.trace,
                        binding,
                        &binding.entry,
                        info,
                    )?;
                }
            }

            let emissions = bus.deliver(graph, &mut self.outbox, next)?;
            self.trace.record(TraceEvent::Deliver {
                time: next,
                emissions,
            });
            summary.emissions += emissions;
            summary.instants += 1;
        }

        self.now = end;
        self.state = SchedulerState::Idle;
        summary.time = end;
        info!(
            time = end,
            instants = summary.instants,
            dispatches = summary.dispatches,
            "run finished"
        );
        Ok(summary)
    }

    /// Earliest fire time among clocks with a step completing by `end`
    fn next_instant(&self, end: f64) -> Option<f64> {
        self.ticks
            .iter()
            .filter_map(|t| t.clock.as_ref())
            .filter(|c| c.is_eligible(end, self.tolerance))
            .map(Clock::next_fire)
            .reduce(f64::min)
    }
}

/// Run `entry` on every instance of every bound element that declares it
fn dispatch(
    graph: &mut ElementGraph,
    outbox: &mut Outbox,
    trace: &mut Trace,
    binding: &Binding,
    entry: &str,
    info: ProcInfo,
) -> Result<u64> {
    let mut count = 0;
    for id in &binding.targets {
        let len = graph.len(*id)?;
        for index in 0..len {
            let obj = id.at(index);
            let ran = graph.with_instance(obj, |desc, data| -> Result<bool> {
                let Some(func) = desc.entry_point(entry) else {
                    return Ok(false);
                };
                let mut ctx = ProcessCtx::new(info, obj, desc, data, &mut *outbox);
                func(&mut ctx)?;
                Ok(true)
            })??;
            if ran {
                count += 1;
                trace.record(TraceEvent::Process {
                    time: info.time,
                    tick: info.tick.unwrap_or_default(),
                    obj,
                    entry: entry.to_string(),
                });
            }
        }
    }
    Ok(count)
}
