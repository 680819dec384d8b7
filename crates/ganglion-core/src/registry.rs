//! Static type registry
//!
//! A [`TypeDescriptor`] is the class of an element: its field table, its
//! message ports and its entry-point table. Descriptors are assembled once at
//! startup into a closed [`Registry`]; elements hold an `Arc` to their
//! descriptor and never synthesize types at runtime.
//!
//! The registry also answers field introspection queries. Those never fail:
//! unknown classes give empty listings and unknown fields report `"bad"`, so
//! generic listing code can skip what it does not understand.

use crate::instance::ProcessCtx;
use crate::{Error, Result, Value, ValueType};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Entry point dispatched by the scheduler (`process`, `reinit`, ...)
pub type EntryFn = fn(&mut ProcessCtx<'_>) -> Result<()>;

/// Handler invoked when a message delivers a value to a destination port
pub type DestFn = fn(&mut ProcessCtx<'_>, Value) -> Result<()>;

/// Name of the type every registry contains and the root element uses
pub const NEUTRAL: &str = "Neutral";

/// Semantic kind of a named field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Value,
    Lookup,
    Element,
    Src,
    Dest,
}

impl FieldKind {
    pub const ALL: [FieldKind; 5] = [
        FieldKind::Value,
        FieldKind::Lookup,
        FieldKind::Element,
        FieldKind::Src,
        FieldKind::Dest,
    ];

    /// Parse an introspection selector; `*` selects every kind
    pub fn parse_selector(selector: &str) -> Option<Vec<FieldKind>> {
        let kind = match selector {
            "*" => return Some(Self::ALL.to_vec()),
            "value" | "valueFinfo" => FieldKind::Value,
            "lookup" | "lookupFinfo" => FieldKind::Lookup,
            "element" | "elementFinfo" | "fieldElement" | "fieldElementFinfo" => {
                FieldKind::Element
            }
            "src" | "srcFinfo" => FieldKind::Src,
            "dest" | "destFinfo" => FieldKind::Dest,
            _ => return None,
        };
        Some(vec![kind])
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Value => "value",
            FieldKind::Lookup => "lookup",
            FieldKind::Element => "element",
            FieldKind::Src => "src",
            FieldKind::Dest => "dest",
        };
        f.write_str(name)
    }
}

/// Scalar or list-typed value field (also used for element-field records)
#[derive(Debug, Clone)]
pub struct ValueField {
    pub name: String,
    pub ty: ValueType,
    pub default: Value,
    pub read_only: bool,
}

impl ValueField {
    pub fn new(name: impl Into<String>, ty: ValueType, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            ty,
            default: default.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Keyed map field; missing keys read as `default`
#[derive(Debug, Clone)]
pub struct LookupField {
    pub name: String,
    pub ty: ValueType,
    pub default: Value,
}

/// Ragged per-instance sequence of records
#[derive(Debug, Clone)]
pub struct ElementField {
    pub name: String,
    pub record: Vec<ValueField>,
}

impl ElementField {
    pub fn sub_index(&self, sub: &str) -> Option<usize> {
        self.record.iter().position(|f| f.name == sub)
    }

    pub(crate) fn default_record(&self) -> Vec<Value> {
        self.record.iter().map(|f| f.default.clone()).collect()
    }
}

/// Outgoing message port
#[derive(Debug, Clone)]
pub struct SrcPort {
    pub name: String,
    pub ty: ValueType,
}

/// Incoming message port
#[derive(Debug, Clone)]
pub struct DestPort {
    pub name: String,
    pub ty: ValueType,
    pub handler: DestFn,
}

#[derive(Debug, Clone)]
pub struct EntryPoint {
    pub name: String,
    pub func: EntryFn,
}

/// Class of an element
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    name: String,
    doc: String,
    values: Vec<ValueField>,
    lookups: Vec<LookupField>,
    elements: Vec<ElementField>,
    sources: Vec<SrcPort>,
    dests: Vec<DestPort>,
    entries: Vec<EntryPoint>,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc: String::new(),
            values: Vec::new(),
            lookups: Vec::new(),
            elements: Vec::new(),
            sources: Vec::new(),
            dests: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = doc.into();
        self
    }

    /// Declare a writable value field
    pub fn value(self, name: &str, ty: ValueType, default: impl Into<Value>) -> Self {
        self.field(ValueField::new(name, ty, default))
    }

    /// Declare a value field only the element itself may write
    pub fn read_only(self, name: &str, ty: ValueType, default: impl Into<Value>) -> Self {
        self.field(ValueField::new(name, ty, default).read_only())
    }

    pub fn field(mut self, field: ValueField) -> Self {
        self.values.push(field);
        self
    }

    pub fn lookup(mut self, name: &str, ty: ValueType, default: impl Into<Value>) -> Self {
        self.lookups.push(LookupField {
            name: name.to_string(),
            ty,
            default: default.into(),
        });
        self
    }

    pub fn element(mut self, name: &str, record: Vec<ValueField>) -> Self {
        self.elements.push(ElementField {
            name: name.to_string(),
            record,
        });
        self
    }

    pub fn source(mut self, name: &str, ty: ValueType) -> Self {
        self.sources.push(SrcPort {
            name: name.to_string(),
            ty,
        });
        self
    }

    pub fn dest(mut self, name: &str, ty: ValueType, handler: DestFn) -> Self {
        self.dests.push(DestPort {
            name: name.to_string(),
            ty,
            handler,
        });
        self
    }

    pub fn entry(mut self, name: &str, func: EntryFn) -> Self {
        self.entries.push(EntryPoint {
            name: name.to_string(),
            func,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.doc
    }

    pub fn values(&self) -> &[ValueField] {
        &self.values
    }

    pub fn lookups(&self) -> &[LookupField] {
        &self.lookups
    }

    pub fn elements(&self) -> &[ElementField] {
        &self.elements
    }

    pub fn sources(&self) -> &[SrcPort] {
        &self.sources
    }

    pub fn dests(&self) -> &[DestPort] {
        &self.dests
    }

    pub fn entries(&self) -> &[EntryPoint] {
        &self.entries
    }

    pub fn value_index(&self, name: &str) -> Option<usize> {
        self.values.iter().position(|f| f.name == name)
    }

    pub fn lookup_index(&self, name: &str) -> Option<usize> {
        self.lookups.iter().position(|f| f.name == name)
    }

    pub fn element_index(&self, name: &str) -> Option<usize> {
        self.elements.iter().position(|f| f.name == name)
    }

    pub fn source_index(&self, name: &str) -> Option<usize> {
        self.sources.iter().position(|p| p.name == name)
    }

    pub fn dest_index(&self, name: &str) -> Option<usize> {
        self.dests.iter().position(|p| p.name == name)
    }

    pub fn entry_point(&self, name: &str) -> Option<EntryFn> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.func)
    }

    pub fn has_entry(&self, name: &str) -> bool {
        self.entry_point(name).is_some()
    }

    /// Kind of the named field, if declared
    pub fn kind_of(&self, name: &str) -> Option<FieldKind> {
        if self.value_index(name).is_some() {
            Some(FieldKind::Value)
        } else if self.lookup_index(name).is_some() {
            Some(FieldKind::Lookup)
        } else if self.element_index(name).is_some() {
            Some(FieldKind::Element)
        } else if self.source_index(name).is_some() {
            Some(FieldKind::Src)
        } else if self.dest_index(name).is_some() {
            Some(FieldKind::Dest)
        } else {
            None
        }
    }

    fn fields_of(&self, kind: FieldKind) -> Vec<(String, &'static str)> {
        match kind {
            FieldKind::Value => self
                .values
                .iter()
                .map(|f| (f.name.clone(), f.ty.tag()))
                .collect(),
            FieldKind::Lookup => self
                .lookups
                .iter()
                .map(|f| (f.name.clone(), f.ty.tag()))
                .collect(),
            FieldKind::Element => self
                .elements
                .iter()
                .map(|f| (f.name.clone(), "element"))
                .collect(),
            FieldKind::Src => self
                .sources
                .iter()
                .map(|p| (p.name.clone(), p.ty.tag()))
                .collect(),
            FieldKind::Dest => self
                .dests
                .iter()
                .map(|p| (p.name.clone(), p.ty.tag()))
                .collect(),
        }
    }

    fn type_tag(&self, name: &str) -> &'static str {
        FieldKind::ALL
            .iter()
            .flat_map(|k| self.fields_of(*k))
            .find(|(n, _)| n == name)
            .map(|(_, tag)| tag)
            .unwrap_or("bad")
    }
}

/// Introspection answer for one field; `kind == None` means unknown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub kind: Option<FieldKind>,
    pub type_tag: String,
}

impl FieldInfo {
    pub fn is_bad(&self) -> bool {
        self.kind.is_none() || self.type_tag == "bad"
    }
}

/// Closed catalog of type descriptors
#[derive(Debug, Clone)]
pub struct Registry {
    types: IndexMap<String, Arc<TypeDescriptor>>,
}

impl Registry {
    /// Start a registry manifest; `Neutral` is always present
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn get(&self, class: &str) -> Option<&Arc<TypeDescriptor>> {
        self.types.get(class)
    }

    pub fn require(&self, class: &str) -> Result<Arc<TypeDescriptor>> {
        self.types
            .get(class)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("class '{}'", class)))
    }

    pub fn contains(&self, class: &str) -> bool {
        self.types.contains_key(class)
    }

    /// Class names in manifest order
    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Declared field names of `class` for a kind selector (`value`, `src`, `*`, ...)
    pub fn field_names(&self, class: &str, selector: &str) -> Vec<String> {
        self.field_type_dict(class, selector).into_keys().collect()
    }

    /// Field name to coarse type tag for a kind selector
    pub fn field_type_dict(&self, class: &str, selector: &str) -> IndexMap<String, String> {
        let (Some(desc), Some(kinds)) = (self.get(class), FieldKind::parse_selector(selector))
        else {
            return IndexMap::new();
        };
        kinds
            .into_iter()
            .flat_map(|k| desc.fields_of(k))
            .map(|(name, tag)| (name, tag.to_string()))
            .collect()
    }

    pub fn field_info(&self, class: &str, field: &str) -> FieldInfo {
        let kind = self.get(class).and_then(|d| d.kind_of(field));
        let type_tag = match (kind, self.get(class)) {
            (Some(_), Some(desc)) => desc.type_tag(field),
            _ => "bad",
        };
        FieldInfo {
            name: field.to_string(),
            kind,
            type_tag: type_tag.to_string(),
        }
    }
}

/// Assembles the startup manifest
#[derive(Debug)]
pub struct RegistryBuilder {
    types: IndexMap<String, Arc<TypeDescriptor>>,
}

impl RegistryBuilder {
    fn new() -> Self {
        let mut types = IndexMap::new();
        let neutral = TypeDescriptor::new(NEUTRAL).doc("Plain container element");
        types.insert(NEUTRAL.to_string(), Arc::new(neutral));
        Self { types }
    }

    /// Add a descriptor; class names must be unique, and so must field
    /// names within a class across every kind
    pub fn register(mut self, desc: TypeDescriptor) -> Result<Self> {
        if self.types.contains_key(desc.name()) {
            return Err(Error::DuplicateName {
                name: desc.name().to_string(),
                parent: "registry".to_string(),
            });
        }
        let mut seen = IndexSet::new();
        let names = desc
            .values
            .iter()
            .map(|f| &f.name)
            .chain(desc.lookups.iter().map(|f| &f.name))
            .chain(desc.elements.iter().map(|f| &f.name))
            .chain(desc.sources.iter().map(|p| &p.name))
            .chain(desc.dests.iter().map(|p| &p.name));
        for name in names {
            if !seen.insert(name.as_str()) {
                return Err(Error::DuplicateName {
                    name: name.clone(),
                    parent: desc.name().to_string(),
                });
            }
        }
        self.types.insert(desc.name().to_string(), Arc::new(desc));
        Ok(self)
    }

    pub fn build(self) -> Registry {
        Registry { types: self.types }
    }
}
