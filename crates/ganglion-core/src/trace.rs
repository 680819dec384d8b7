//! Execution trace
//!
//! When enabled, the scheduler records every reinit, every dispatched entry
//! point and every delivery pass. Two runs of the same model from `reinit`
//! produce identical traces; tests compare them to prove replay is exact.

use crate::config::TraceConfig;
use crate::ObjId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TraceEvent {
    /// The scheduler was reinitialized
    Reinit,
    /// An entry point ran on one instance
    Process {
        time: f64,
        tick: usize,
        obj: ObjId,
        entry: String,
    },
    /// One delivery pass consumed `emissions` buffered values
    Deliver { time: f64, emissions: usize },
}

/// Event counts by kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TraceStats {
    pub reinits: usize,
    pub processes: usize,
    pub deliveries: usize,
    pub emissions: usize,
    /// Events dropped because of `max_events`
    pub dropped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Trace {
    config: TraceConfig,
    events: VecDeque<TraceEvent>,
    dropped: usize,
}

impl Trace {
    pub fn new(config: TraceConfig) -> Self {
        Self {
            config,
            events: VecDeque::new(),
            dropped: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    pub fn record(&mut self, event: TraceEvent) {
        if !self.config.enabled {
            return;
        }
        if self.config.max_events > 0 && self.events.len() >= self.config.max_events {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    pub fn events(&self) -> impl Iterator<Item = &TraceEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.dropped = 0;
    }

    pub fn stats(&self) -> TraceStats {
        let mut stats = TraceStats {
            dropped: self.dropped,
            ..TraceStats::default()
        };
        for event in &self.events {
            match event {
                TraceEvent::Reinit => stats.reinits += 1,
                TraceEvent::Process { .. } => stats.processes += 1,
                TraceEvent::Deliver { emissions, .. } => {
                    stats.deliveries += 1;
                    stats.emissions += emissions;
                }
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Id;

    fn process(time: f64) -> TraceEvent {
        TraceEvent::Process {
            time,
            tick: 0,
            obj: Id::ROOT.at(0),
            entry: "process".into(),
        }
    }

    #[test]
    fn test_disabled_records_nothing() {
        let mut trace = Trace::new(TraceConfig::default());
        trace.record(TraceEvent::Reinit);
        assert!(trace.is_empty());

        trace.set_enabled(true);
        trace.record(TraceEvent::Reinit);
        assert!(trace.is_enabled());
        assert_eq!(trace.len(), 1);
    }

    #[test]
    fn test_stats() {
        let mut trace = Trace::new(TraceConfig {
            enabled: true,
            max_events: 0,
        });
        trace.record(TraceEvent::Reinit);
        trace.record(process(0.0));
        trace.record(TraceEvent::Deliver {
            time: 0.0,
            emissions: 2,
        });
        let stats = trace.stats();
        assert_eq!(stats.reinits, 1);
        assert_eq!(stats.processes, 1);
        assert_eq!(stats.deliveries, 1);
        assert_eq!(stats.emissions, 2);
    }

    #[test]
    fn test_bounded_trace_drops_oldest() {
        let mut trace = Trace::new(TraceConfig {
            enabled: true,
            max_events: 2,
        });
        for i in 0..5 {
            trace.record(process(i as f64));
        }
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.stats().dropped, 3);
        assert_eq!(trace.events().next(), Some(&process(3.0)));
        trace.clear();
        assert_eq!(trace.stats(), TraceStats::default());
    }
}
