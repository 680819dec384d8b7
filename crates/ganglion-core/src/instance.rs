//! Per-instance field storage and the context handed to entry points

use crate::clock::ProcInfo;
use crate::outbox::{Emission, Outbox};
use crate::registry::TypeDescriptor;
use crate::{Error, Key, ObjId, Result, Value};
use indexmap::IndexMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// State an element derives from its fields and keeps between calls
///
/// Not part of the instance's observable state: it never compares unequal
/// and callers must check it is still current before use.
#[derive(Clone, Default)]
pub struct Memo(Option<Arc<dyn Any + Send + Sync>>);

impl fmt::Debug for Memo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.0.is_some() { "Memo(..)" } else { "Memo(None)" })
    }
}

impl PartialEq for Memo {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

/// Field storage of one instance, laid out in descriptor table order
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceData {
    pub(crate) values: Vec<Value>,
    pub(crate) lookups: Vec<IndexMap<Key, Value>>,
    /// `[element field][slot][record sub-field]`
    pub(crate) elements: Vec<Vec<Vec<Value>>>,
    pub(crate) memo: Memo,
}

impl InstanceData {
    /// Fresh storage holding the descriptor's defaults
    pub fn new(desc: &TypeDescriptor) -> Self {
        Self {
            values: desc.values().iter().map(|f| f.default.clone()).collect(),
            lookups: desc.lookups().iter().map(|_| IndexMap::new()).collect(),
            elements: desc.elements().iter().map(|_| Vec::new()).collect(),
            memo: Memo::default(),
        }
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn lookup(&self, index: usize) -> Option<&IndexMap<Key, Value>> {
        self.lookups.get(index)
    }
}

/// Context of one entry-point or handler invocation
///
/// Grants access to the invoked instance's own fields and to its source
/// ports, nothing else.
pub struct ProcessCtx<'a> {
    info: ProcInfo,
    obj: ObjId,
    desc: &'a TypeDescriptor,
    data: &'a mut InstanceData,
    outbox: &'a mut Outbox,
}

impl<'a> ProcessCtx<'a> {
    pub fn new(
        info: ProcInfo,
        obj: ObjId,
        desc: &'a TypeDescriptor,
        data: &'a mut InstanceData,
        outbox: &'a mut Outbox,
    ) -> Self {
        Self {
            info,
            obj,
            desc,
            data,
            outbox,
        }
    }

    pub fn info(&self) -> ProcInfo {
        self.info
    }

    /// Start of the interval being processed
    pub fn time(&self) -> f64 {
        self.info.time
    }

    pub fn dt(&self) -> f64 {
        self.info.dt
    }

    pub fn obj(&self) -> ObjId {
        self.obj
    }

    pub fn class(&self) -> &str {
        self.desc.name()
    }

    fn name_error(&self, field: &str) -> Error {
        Error::NameError {
            field: field.to_string(),
            class: self.desc.name().to_string(),
        }
    }

    fn value_index(&self, field: &str) -> Result<usize> {
        self.desc
            .value_index(field)
            .ok_or_else(|| self.name_error(field))
    }

    pub fn get(&self, field: &str) -> Result<&Value> {
        let index = self.value_index(field)?;
        self.data
            .values
            .get(index)
            .ok_or_else(|| self.name_error(field))
    }

    pub fn get_f64(&self, field: &str) -> Result<f64> {
        let value = self.get(field)?;
        value
            .as_float()
            .ok_or_else(|| Error::type_error("double", value.type_name()))
    }

    pub fn get_i64(&self, field: &str) -> Result<i64> {
        let value = self.get(field)?;
        value
            .as_int()
            .ok_or_else(|| Error::type_error("int", value.type_name()))
    }

    pub fn get_str(&self, field: &str) -> Result<&str> {
        let value = self.get(field)?;
        value
            .as_str()
            .ok_or_else(|| Error::type_error("string", value.type_name()))
    }

    /// Write one of the instance's own value fields; read-only fields included
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<()> {
        let index = self.value_index(field)?;
        let coerced = self.desc.values()[index].ty.coerce(value.into())?;
        self.data.values[index] = coerced;
        Ok(())
    }

    /// Append to a list-typed value field
    pub fn push(&mut self, field: &str, value: impl Into<Value>) -> Result<()> {
        let index = self.value_index(field)?;
        let value = value.into();
        let item = value
            .as_float()
            .ok_or_else(|| Error::type_error("double", value.type_name()))?;
        match &mut self.data.values[index] {
            Value::List(items) => {
                items.push(Value::Float(item));
                Ok(())
            }
            other => Err(Error::type_error("vector<double>", other.type_name())),
        }
    }

    /// Read a lookup entry, falling back to the field default
    pub fn lookup(&self, field: &str, key: impl Into<Key>) -> Result<Value> {
        let index = self
            .desc
            .lookup_index(field)
            .ok_or_else(|| self.name_error(field))?;
        let key = key.into();
        Ok(self.data.lookups[index]
            .get(&key)
            .cloned()
            .unwrap_or_else(|| self.desc.lookups()[index].default.clone()))
    }

    pub fn lookup_entries(&self, field: &str) -> Result<&IndexMap<Key, Value>> {
        let index = self
            .desc
            .lookup_index(field)
            .ok_or_else(|| self.name_error(field))?;
        Ok(&self.data.lookups[index])
    }

    pub fn element_len(&self, field: &str) -> Result<usize> {
        let index = self
            .desc
            .element_index(field)
            .ok_or_else(|| self.name_error(field))?;
        Ok(self.data.elements[index].len())
    }

    pub fn record(&self, field: &str, slot: usize, sub: &str) -> Result<&Value> {
        let index = self
            .desc
            .element_index(field)
            .ok_or_else(|| self.name_error(field))?;
        let sub_index = self.desc.elements()[index]
            .sub_index(sub)
            .ok_or_else(|| self.name_error(sub))?;
        let slots = &self.data.elements[index];
        slots
            .get(slot)
            .map(|record| &record[sub_index])
            .ok_or(Error::IndexOutOfRange {
                index: slot as isize,
                len: slots.len(),
            })
    }

    /// The instance's memo, if one of type `T` is stored
    pub fn memo<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.data.memo.0.clone()?.downcast::<T>().ok()
    }

    pub fn set_memo<T: Any + Send + Sync>(&mut self, memo: Arc<T>) {
        self.data.memo.0 = Some(memo);
    }

    /// Queue a value on one of the instance's source ports
    pub fn emit(&mut self, port: &str, value: impl Into<Value>) -> Result<()> {
        let index = self
            .desc
            .source_index(port)
            .ok_or_else(|| self.name_error(port))?;
        let value = self.desc.sources()[index].ty.coerce(value.into())?;
        self.outbox.push(Emission {
            src: self.obj,
            port: index,
            value,
        });
        Ok(())
    }
}
