//! Emission buffer
//!
//! Entry points never touch other elements. Values they produce on source
//! ports are collected into an [`Outbox`] and handed to the
//! [`MessageBus`](crate::MessageBus) in one delivery pass per instant.
//!
//! The buffer preserves production order; delivery relies on it for
//! determinism. Deliveries left over from a pass that stopped on a handler
//! error are held here too and go first on the next pass.

use crate::{Id, MsgId, ObjId, Value};
use serde::{Deserialize, Serialize};

/// A value produced on a source port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emission {
    /// The emitting instance
    pub src: ObjId,
    /// Index of the source port in the emitter's type descriptor
    pub port: usize,
    /// The emitted value, already coerced to the port type
    pub value: Value,
}

/// A value resolved to one destination instance but not yet presented
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub msg: MsgId,
    pub dst: ObjId,
    pub value: Value,
}

/// Ordered collection of pending emissions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Outbox {
    emissions: Vec<Emission>,
    #[serde(default)]
    held: Vec<Delivery>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, emission: Emission) {
        self.emissions.push(emission);
    }

    /// Pending emissions plus held deliveries
    pub fn len(&self) -> usize {
        self.emissions.len() + self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emissions.is_empty() && self.held.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Emission> {
        self.emissions.iter()
    }

    /// Drain the buffer, leaving it empty
    pub fn take(&mut self) -> Vec<Emission> {
        std::mem::take(&mut self.emissions)
    }

    pub fn held(&self) -> &[Delivery] {
        &self.held
    }

    /// Keep deliveries for the next pass, after any already held
    pub fn hold(&mut self, deliveries: impl IntoIterator<Item = Delivery>) {
        self.held.extend(deliveries);
    }

    pub fn take_held(&mut self) -> Vec<Delivery> {
        std::mem::take(&mut self.held)
    }

    pub fn clear(&mut self) {
        self.emissions.clear();
        self.held.clear();
    }

    /// Drop every emission produced by, and every delivery bound for, one of `ids`
    pub(crate) fn forget(&mut self, ids: &[Id]) {
        self.emissions.retain(|e| !ids.contains(&e.src.id));
        self.held.retain(|d| !ids.contains(&d.dst.id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RawHandle;

    fn emission(index: usize, value: f64) -> Emission {
        Emission {
            src: Id::ROOT.at(index),
            port: 0,
            value: Value::Float(value),
        }
    }

    #[test]
    fn test_outbox_empty() {
        let outbox = Outbox::new();
        assert!(outbox.is_empty());
        assert_eq!(outbox.len(), 0);
    }

    fn delivery(dst: Id, value: f64) -> Delivery {
        Delivery {
            msg: MsgId::from_raw(RawHandle::default()),
            dst: dst.at(0),
            value: Value::Float(value),
        }
    }

    #[test]
    fn test_outbox_held_deliveries() {
        let mut outbox = Outbox::new();
        outbox.push(emission(0, 1.0));
        outbox.hold([delivery(Id::ROOT, 2.0)]);
        outbox.hold([delivery(Id::ROOT, 3.0)]);
        assert_eq!(outbox.len(), 2 + 1);

        let drained = outbox.take();
        assert_eq!(drained.len(), 1);
        assert!(!outbox.is_empty());
        let held: Vec<_> = outbox.take_held().into_iter().map(|d| d.value).collect();
        assert_eq!(held, vec![Value::Float(2.0), Value::Float(3.0)]);
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_outbox_forget_drops_held_for_removed_targets() {
        let mut outbox = Outbox::new();
        outbox.push(emission(0, 1.0));
        outbox.hold([delivery(Id::ROOT, 2.0)]);
        outbox.forget(&[Id::ROOT]);
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_outbox_take_drains() {
        let mut outbox = Outbox::new();
        outbox.push(emission(0, 1.0));
        let drained = outbox.take();
        assert_eq!(drained.len(), 1);
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_outbox_ron_round_trip() {
        let mut outbox = Outbox::new();
        outbox.push(emission(2, 0.5));
        let text = ron::to_string(&outbox).expect("serialize");
        let back: Outbox = ron::from_str(&text).expect("deserialize");
        assert_eq!(back.len(), 1);
    }
}
