//! Field access with vec broadcast and scatter
//!
//! A [`Target`] addresses either a whole vec or one instance of it. Reads
//! from a vec return a `Value::List` with one entry per instance; reads from
//! an instance return the bare value. Writes follow the same shape:
//!
//! - a scalar is broadcast to every addressed instance;
//! - a list with one entry per addressed instance is scattered index-wise;
//! - any other list length is a shape error.
//!
//! For list-typed fields a list of numbers is the scalar; only a list of
//! lists scatters.
//!
//! Every write validates and coerces all values before the first one is
//! stored, so a failed write leaves the graph untouched.

use crate::element::ElementGraph;
use crate::registry::TypeDescriptor;
use crate::{Error, Id, Key, ObjId, Result, Value, ValueType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// What a field operation addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Target {
    /// Every instance of the vec
    Vec(Id),
    /// A single instance
    Instance(ObjId),
}

impl Target {
    pub fn id(&self) -> Id {
        match self {
            Target::Vec(id) => *id,
            Target::Instance(obj) => obj.id,
        }
    }
}

impl From<Id> for Target {
    fn from(id: Id) -> Self {
        Target::Vec(id)
    }
}

impl From<ObjId> for Target {
    fn from(obj: ObjId) -> Self {
        Target::Instance(obj)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Vec(id) => write!(f, "{}", id),
            Target::Instance(obj) => write!(f, "{}", obj),
        }
    }
}

/// Addressed instance range plus the vec's class
struct Span {
    id: Id,
    range: Range<usize>,
    class: Arc<TypeDescriptor>,
    single: bool,
}

impl Span {
    fn len(&self) -> usize {
        self.range.len()
    }

    /// Shape a per-instance list back into the target's read shape
    fn shape(&self, mut values: Vec<Value>) -> Value {
        if self.single {
            values.pop().unwrap_or_default()
        } else {
            Value::List(values)
        }
    }
}

fn name_error(field: &str, class: &TypeDescriptor) -> Error {
    Error::NameError {
        field: field.to_string(),
        class: class.name().to_string(),
    }
}

/// Split a written value into `n` coerced per-instance values
fn scatter(ty: ValueType, value: Value, n: usize, context: &str) -> Result<Vec<Value>> {
    match value {
        Value::List(items) if !ty.is_list() || is_nested(&items) => {
            if items.len() != n {
                return Err(Error::shape(n, items.len(), context));
            }
            items.into_iter().map(|v| ty.coerce(v)).collect()
        }
        scalar => {
            let coerced = ty.coerce(scalar)?;
            Ok(vec![coerced; n])
        }
    }
}

fn is_nested(items: &[Value]) -> bool {
    !items.is_empty() && items.iter().all(|v| matches!(v, Value::List(_)))
}

impl ElementGraph {
    fn span(&self, target: Target) -> Result<Span> {
        let element = self.element(target.id())?;
        let len = element.len();
        let (range, single) = match target {
            Target::Vec(_) => (0..len, false),
            Target::Instance(obj) => {
                if obj.index >= len {
                    return Err(Error::IndexOutOfRange {
                        index: obj.index as isize,
                        len,
                    });
                }
                (obj.index..obj.index + 1, true)
            }
        };
        Ok(Span {
            id: target.id(),
            range,
            class: element.class().clone(),
            single,
        })
    }

    fn instances_mut(&mut self, span: &Span) -> Result<&mut [crate::InstanceData]> {
        let element = self.element_mut(span.id)?;
        Ok(&mut element.instances[span.range.clone()])
    }

    /// Read a value field
    pub fn get(&self, target: impl Into<Target>, field: &str) -> Result<Value> {
        let target = target.into();
        let span = self.span(target)?;
        self.get_opt(target, field)?
            .ok_or_else(|| name_error(field, &span.class))
    }

    /// Read a value field, `None` when the type has no such field
    pub fn get_opt(&self, target: impl Into<Target>, field: &str) -> Result<Option<Value>> {
        let span = self.span(target.into())?;
        let Some(index) = span.class.value_index(field) else {
            return Ok(None);
        };
        let element = self.element(span.id)?;
        let values = element.instances[span.range.clone()]
            .iter()
            .map(|data| data.values[index].clone())
            .collect();
        Ok(Some(span.shape(values)))
    }

    /// Write a value field with broadcast/scatter
    pub fn set(&mut self, target: impl Into<Target>, field: &str, value: impl Into<Value>) -> Result<()> {
        let span = self.span(target.into())?;
        let index = span
            .class
            .value_index(field)
            .ok_or_else(|| name_error(field, &span.class))?;
        let decl = &span.class.values()[index];
        if decl.read_only {
            return Err(Error::ReadOnly {
                field: field.to_string(),
                class: span.class.name().to_string(),
            });
        }
        let values = scatter(decl.ty, value.into(), span.len(), field)?;
        for (data, value) in self.instances_mut(&span)?.iter_mut().zip(values) {
            data.values[index] = value;
        }
        Ok(())
    }

    pub fn get_lookup(&self, target: impl Into<Target>, field: &str, key: impl Into<Key>) -> Result<Value> {
        let span = self.span(target.into())?;
        let index = span
            .class
            .lookup_index(field)
            .ok_or_else(|| name_error(field, &span.class))?;
        let key = key.into();
        let default = &span.class.lookups()[index].default;
        let element = self.element(span.id)?;
        let values = element.instances[span.range.clone()]
            .iter()
            .map(|data| data.lookups[index].get(&key).unwrap_or(default).clone())
            .collect();
        Ok(span.shape(values))
    }

    /// Write one lookup entry with broadcast/scatter over instances
    pub fn set_lookup(
        &mut self,
        target: impl Into<Target>,
        field: &str,
        key: impl Into<Key>,
        value: impl Into<Value>,
    ) -> Result<()> {
        let span = self.span(target.into())?;
        let index = span
            .class
            .lookup_index(field)
            .ok_or_else(|| name_error(field, &span.class))?;
        let ty = span.class.lookups()[index].ty;
        let values = scatter(ty, value.into(), span.len(), field)?;
        let key = key.into();
        for (data, value) in self.instances_mut(&span)?.iter_mut().zip(values) {
            data.lookups[index].insert(key.clone(), value);
        }
        Ok(())
    }

    fn element_field(span: &Span, field: &str, sub: &str) -> Result<(usize, usize)> {
        let index = span
            .class
            .element_index(field)
            .ok_or_else(|| name_error(field, &span.class))?;
        let sub_index = span.class.elements()[index]
            .sub_index(sub)
            .ok_or_else(|| name_error(&format!("{}.{}", field, sub), &span.class))?;
        Ok((index, sub_index))
    }

    /// Inner lengths of an element field, one per addressed instance
    pub fn element_len(&self, target: impl Into<Target>, field: &str) -> Result<Vec<usize>> {
        let span = self.span(target.into())?;
        let index = span
            .class
            .element_index(field)
            .ok_or_else(|| name_error(field, &span.class))?;
        let element = self.element(span.id)?;
        Ok(element.instances[span.range.clone()]
            .iter()
            .map(|data| data.elements[index].len())
            .collect())
    }

    /// Resize an element field on the addressed instances only
    pub fn resize_element_field(&mut self, target: impl Into<Target>, field: &str, len: usize) -> Result<()> {
        let span = self.span(target.into())?;
        let index = span
            .class
            .element_index(field)
            .ok_or_else(|| name_error(field, &span.class))?;
        let record = span.class.elements()[index].default_record();
        for data in self.instances_mut(&span)? {
            data.elements[index].resize(len, record.clone());
        }
        Ok(())
    }

    /// Read a record sub-field across all slots
    ///
    /// An instance target yields one list over its slots; a vec target
    /// yields a list of such lists.
    pub fn get_element(&self, target: impl Into<Target>, field: &str, sub: &str) -> Result<Value> {
        let span = self.span(target.into())?;
        let (index, sub_index) = Self::element_field(&span, field, sub)?;
        let element = self.element(span.id)?;
        let values = element.instances[span.range.clone()]
            .iter()
            .map(|data| {
                Value::List(
                    data.elements[index]
                        .iter()
                        .map(|record| record[sub_index].clone())
                        .collect(),
                )
            })
            .collect();
        Ok(span.shape(values))
    }

    /// Write a record sub-field
    ///
    /// A scalar fills every slot of every addressed instance. A list with
    /// one entry per instance applies entry `i` to instance `i`: a scalar
    /// entry fills all its slots, a list entry is applied slot-wise and must
    /// match that instance's inner length. An instance target also takes
    /// the flat list [`get_element`](Self::get_element) returns for it.
    pub fn set_element(
        &mut self,
        target: impl Into<Target>,
        field: &str,
        sub: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let span = self.span(target.into())?;
        let (index, sub_index) = Self::element_field(&span, field, sub)?;
        let decl = &span.class.elements()[index].record[sub_index];
        if decl.read_only {
            return Err(Error::ReadOnly {
                field: format!("{}.{}", field, sub),
                class: span.class.name().to_string(),
            });
        }
        let ty = decl.ty;
        let lens = self.element_len(Target::Vec(span.id), field)?[span.range.clone()].to_vec();
        let context = format!("{}.{}", field, sub);

        let per_instance: Vec<Vec<Value>> = match value.into() {
            Value::List(inner) if span.single && !ty.is_list() && !is_nested(&inner) => {
                let len = lens.first().copied().unwrap_or_default();
                if inner.len() != len {
                    return Err(Error::shape(len, inner.len(), context));
                }
                vec![inner.into_iter().map(|v| ty.coerce(v)).collect::<Result<_>>()?]
            }
            Value::List(outer) if !ty.is_list() => {
                if outer.len() != lens.len() {
                    return Err(Error::shape(lens.len(), outer.len(), context));
                }
                outer
                    .into_iter()
                    .zip(&lens)
                    .map(|(entry, &len)| match entry {
                        Value::List(inner) => {
                            if inner.len() != len {
                                return Err(Error::shape(len, inner.len(), context.as_str()));
                            }
                            inner.into_iter().map(|v| ty.coerce(v)).collect()
                        }
                        scalar => Ok(vec![ty.coerce(scalar)?; len]),
                    })
                    .collect::<Result<_>>()?
            }
            scalar => {
                let coerced = ty.coerce(scalar)?;
                lens.iter().map(|&len| vec![coerced.clone(); len]).collect()
            }
        };

        for (data, slots) in self.instances_mut(&span)?.iter_mut().zip(per_instance) {
            for (record, value) in data.elements[index].iter_mut().zip(slots) {
                record[sub_index] = value;
            }
        }
        Ok(())
    }

    /// Read one slot of an element field
    pub fn get_element_at(&self, obj: ObjId, field: &str, slot: usize, sub: &str) -> Result<Value> {
        let span = self.span(obj.into())?;
        let (index, sub_index) = Self::element_field(&span, field, sub)?;
        let slots = &self.element(obj.id)?.instances[obj.index].elements[index];
        slots
            .get(slot)
            .map(|record| record[sub_index].clone())
            .ok_or(Error::IndexOutOfRange {
                index: slot as isize,
                len: slots.len(),
            })
    }

    /// Write one slot of an element field
    pub fn set_element_at(
        &mut self,
        obj: ObjId,
        field: &str,
        slot: usize,
        sub: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let span = self.span(obj.into())?;
        let (index, sub_index) = Self::element_field(&span, field, sub)?;
        let decl = &span.class.elements()[index].record[sub_index];
        let value = decl.ty.coerce(value.into())?;
        let slots = &mut self.instances_mut(&span)?[0].elements[index];
        let len = slots.len();
        let record = slots.get_mut(slot).ok_or(Error::IndexOutOfRange {
            index: slot as isize,
            len,
        })?;
        record[sub_index] = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Registry, ValueField};
    use proptest::prelude::*;

    fn graph() -> (ElementGraph, Id) {
        let gauge = TypeDescriptor::new("Gauge")
            .value("x", ValueType::Float, 0.0)
            .value("n", ValueType::Int, 0i64)
            .value("samples", ValueType::FloatList, Value::List(vec![]))
            .read_only("locked", ValueType::Float, 1.0)
            .lookup("c", ValueType::Float, -1.0)
            .element(
                "syn",
                vec![
                    ValueField::new("weight", ValueType::Float, 0.0),
                    ValueField::new("delay", ValueType::Float, 0.5),
                ],
            );
        let registry = Registry::builder().register(gauge).unwrap().build();
        let mut g = ElementGraph::new(Arc::new(registry)).unwrap();
        let v = g.create(g.root(), "v", "Gauge", 3).unwrap();
        (g, v)
    }

    #[test]
    fn test_scalar_broadcast_and_read_shapes() {
        let (mut g, v) = graph();
        g.set(v, "x", 2.5).unwrap();
        assert_eq!(g.get(v, "x").unwrap(), Value::from(vec![2.5, 2.5, 2.5]));
        assert_eq!(g.get(v.at(1), "x").unwrap(), Value::Float(2.5));
        // idempotent
        g.set(v, "x", 2.5).unwrap();
        assert_eq!(g.get(v, "x").unwrap(), Value::from(vec![2.5, 2.5, 2.5]));
    }

    #[test]
    fn test_scatter_and_shape_errors() {
        let (mut g, v) = graph();
        g.set(v, "n", vec![1i64, 2, 3]).unwrap();
        assert_eq!(g.get(v.at(2), "n").unwrap(), Value::Int(3));

        let err = g.set(v, "n", vec![1i64, 2]).unwrap_err();
        assert!(matches!(err, Error::ShapeError { expected: 3, got: 2, .. }));
        assert_eq!(g.get(v, "n").unwrap(), Value::from(vec![1i64, 2, 3]));

        g.set(v.at(0), "n", vec![9i64]).unwrap();
        assert_eq!(g.get(v.at(0), "n").unwrap(), Value::Int(9));
        assert!(g.set(v.at(0), "n", vec![9i64, 9]).is_err());
    }

    #[test]
    fn test_no_partial_mutation_on_type_error() {
        let (mut g, v) = graph();
        let bad = Value::List(vec![Value::Int(1), Value::from("two"), Value::Int(3)]);
        assert!(matches!(g.set(v, "n", bad), Err(Error::TypeError { .. })));
        assert_eq!(g.get(v, "n").unwrap(), Value::from(vec![0i64, 0, 0]));
    }

    #[test]
    fn test_list_typed_field_treats_list_as_scalar() {
        let (mut g, v) = graph();
        g.set(v, "samples", vec![1.0, 2.0]).unwrap();
        assert_eq!(g.get(v.at(2), "samples").unwrap(), Value::from(vec![1.0, 2.0]));

        let nested = Value::List(vec![
            Value::from(vec![1.0]),
            Value::from(vec![2.0]),
            Value::from(vec![3.0]),
        ]);
        g.set(v, "samples", nested).unwrap();
        assert_eq!(g.get(v.at(1), "samples").unwrap(), Value::from(vec![2.0]));
    }

    #[test]
    fn test_errors_by_kind() {
        let (mut g, v) = graph();
        assert!(matches!(g.get(v, "nope"), Err(Error::NameError { .. })));
        assert_eq!(g.get_opt(v, "nope").unwrap(), None);
        assert!(matches!(g.set(v, "locked", 2.0), Err(Error::ReadOnly { .. })));
        assert!(matches!(g.set(v, "x", "str"), Err(Error::TypeError { .. })));
        assert!(matches!(
            g.get(v.at(7), "x"),
            Err(Error::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_lookup_broadcast_and_default() {
        let (mut g, v) = graph();
        assert_eq!(g.get_lookup(v.at(0), "c", "k").unwrap(), Value::Float(-1.0));
        g.set_lookup(v, "c", "k", 4.0).unwrap();
        assert_eq!(g.get_lookup(v, "c", "k").unwrap(), Value::from(vec![4.0, 4.0, 4.0]));
        g.set_lookup(v, "c", 7i64, vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(g.get_lookup(v.at(1), "c", 7i64).unwrap(), Value::Float(2.0));
        assert!(g.set_lookup(v, "c", 7i64, vec![1.0]).is_err());
    }

    #[test]
    fn test_element_field_composite_broadcast() {
        let (mut g, v) = graph();
        g.resize_element_field(v.at(0), "syn", 1).unwrap();
        g.resize_element_field(v.at(1), "syn", 2).unwrap();
        g.resize_element_field(v.at(2), "syn", 3).unwrap();
        assert_eq!(g.element_len(v, "syn").unwrap(), vec![1, 2, 3]);

        g.set_element(v, "syn", "weight", vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(
            g.get_element(v, "syn", "weight").unwrap(),
            Value::List(vec![
                Value::from(vec![1.0]),
                Value::from(vec![2.0, 2.0]),
                Value::from(vec![3.0, 3.0, 3.0]),
            ])
        );

        g.set_element(v, "syn", "delay", 0.1).unwrap();
        assert_eq!(g.get_element(v.at(2), "syn", "delay").unwrap(), Value::from(vec![0.1, 0.1, 0.1]));

        let slotwise = Value::List(vec![
            Value::Float(5.0),
            Value::from(vec![6.0, 7.0]),
            Value::Float(8.0),
        ]);
        g.set_element(v, "syn", "weight", slotwise).unwrap();
        assert_eq!(g.get_element(v.at(1), "syn", "weight").unwrap(), Value::from(vec![6.0, 7.0]));

        let wrong = Value::List(vec![
            Value::Float(0.0),
            Value::from(vec![1.0, 2.0, 3.0]),
            Value::Float(0.0),
        ]);
        assert!(matches!(
            g.set_element(v, "syn", "weight", wrong),
            Err(Error::ShapeError { expected: 2, got: 3, .. })
        ));
        assert_eq!(g.get_element(v.at(0), "syn", "weight").unwrap(), Value::from(vec![5.0]));
        assert!(g.set_element(v, "syn", "weight", vec![1.0, 2.0]).is_err());
    }

    #[test]
    fn test_resize_isolation() {
        let (mut g, v) = graph();
        g.resize_element_field(v, "syn", 2).unwrap();
        g.set_element(v, "syn", "weight", 1.5).unwrap();
        g.resize_element_field(v.at(1), "syn", 4).unwrap();

        assert_eq!(g.element_len(v, "syn").unwrap(), vec![2, 4, 2]);
        assert_eq!(g.get_element(v.at(0), "syn", "weight").unwrap(), Value::from(vec![1.5, 1.5]));
        assert_eq!(
            g.get_element(v.at(1), "syn", "weight").unwrap(),
            Value::from(vec![1.5, 1.5, 0.0, 0.0])
        );
        assert_eq!(g.get_element_at(v.at(1), "syn", 3, "delay").unwrap(), Value::Float(0.5));

        g.set_element_at(v.at(2), "syn", 1, "delay", 2i64).unwrap();
        assert_eq!(g.get_element_at(v.at(2), "syn", 1, "delay").unwrap(), Value::Float(2.0));
        assert!(g.get_element_at(v.at(2), "syn", 2, "delay").is_err());
        assert!(matches!(
            g.get_element(v, "syn", "nope"),
            Err(Error::NameError { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_vec_read_has_vec_length(size in 1usize..24, value in -1.0e6f64..1.0e6) {
            let (mut g, _) = graph();
            let id = g.create(g.root(), "p", "Gauge", size).unwrap();
            g.set(id, "x", value).unwrap();
            let read = g.get(id, "x").unwrap();
            let items = read.as_list().unwrap();
            prop_assert_eq!(items.len(), size);
            prop_assert!(items.iter().all(|v| *v == Value::Float(value)));
        }

        #[test]
        fn prop_scatter_round_trips(values in proptest::collection::vec(-1000i64..1000, 1..16)) {
            let (mut g, _) = graph();
            let id = g.create(g.root(), "p", "Gauge", values.len()).unwrap();
            g.set(id, "n", values.clone()).unwrap();
            for (i, expected) in values.iter().enumerate() {
                prop_assert_eq!(g.get(id.at(i), "n").unwrap(), Value::Int(*expected));
            }
        }
    }
}
