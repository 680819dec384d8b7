//! Hierarchical element namespace
//!
//! Every element is a vec of `len >= 1` identical instances of one type.
//! Elements form a tree rooted at `/`; sibling names are unique, children
//! keep their insertion order, and all walks over the tree are in that order.

use crate::identity::Arena;
use crate::instance::InstanceData;
use crate::registry::{Registry, TypeDescriptor, NEUTRAL};
use crate::{Error, Id, ObjId, Result};
use std::sync::Arc;
use tracing::debug;

/// Characters that cannot appear in an element name
const RESERVED: &[char] = &['/', '[', ']', '#', ',', '?'];

/// A node of the namespace
#[derive(Debug, Clone)]
pub struct Element {
    name: String,
    class: Arc<TypeDescriptor>,
    parent: Option<Id>,
    children: Vec<Id>,
    pub(crate) instances: Vec<InstanceData>,
}

impl Element {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> &Arc<TypeDescriptor> {
        &self.class
    }

    pub fn class_name(&self) -> &str {
        self.class.name()
    }

    pub fn parent(&self) -> Option<Id> {
        self.parent
    }

    pub fn children(&self) -> &[Id] {
        &self.children
    }

    /// Number of instances in the vec
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn instance(&self, index: usize) -> Option<&InstanceData> {
        self.instances.get(index)
    }
}

/// The element tree plus the registry its types come from
#[derive(Debug, Clone)]
pub struct ElementGraph {
    arena: Arena<Element>,
    registry: Arc<Registry>,
    root: Id,
}

impl ElementGraph {
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let neutral = registry.require(NEUTRAL)?;
        let mut arena = Arena::new();
        let root = Id::from_raw(arena.insert(Element {
            name: String::new(),
            instances: vec![InstanceData::new(&neutral)],
            class: neutral,
            parent: None,
            children: Vec::new(),
        }));
        Ok(Self {
            arena,
            registry,
            root,
        })
    }

    pub fn root(&self) -> Id {
        self.root
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Number of live elements, root included
    pub fn count(&self) -> usize {
        self.arena.len()
    }

    pub fn contains(&self, id: Id) -> bool {
        self.arena.contains(id.raw())
    }

    fn missing(&self, id: Id) -> Error {
        if self.arena.is_stale(id.raw()) {
            Error::StaleHandle(id.to_string())
        } else {
            Error::NotFound(id.to_string())
        }
    }

    pub fn element(&self, id: Id) -> Result<&Element> {
        self.arena.get(id.raw()).ok_or_else(|| self.missing(id))
    }

    pub(crate) fn element_mut(&mut self, id: Id) -> Result<&mut Element> {
        if self.arena.contains(id.raw()) {
            self.arena
                .get_mut(id.raw())
                .ok_or_else(|| Error::NotFound(id.to_string()))
        } else {
            Err(self.missing(id))
        }
    }

    /// Run `f` with one instance's descriptor and mutable storage
    pub(crate) fn with_instance<R>(
        &mut self,
        obj: ObjId,
        f: impl FnOnce(&TypeDescriptor, &mut InstanceData) -> R,
    ) -> Result<R> {
        let element = self.element_mut(obj.id)?;
        let len = element.instances.len();
        let data = element
            .instances
            .get_mut(obj.index)
            .ok_or(Error::IndexOutOfRange {
                index: obj.index as isize,
                len,
            })?;
        Ok(f(&element.class, data))
    }

    /// Live elements in slot order
    pub fn iter(&self) -> impl Iterator<Item = (Id, &Element)> {
        self.arena.iter().map(|(raw, e)| (Id::from_raw(raw), e))
    }

    /// Create an element of `class` with `size` instances under `parent`
    pub fn create(&mut self, parent: Id, name: &str, class: &str, size: usize) -> Result<Id> {
        validate_name(name)?;
        if size == 0 {
            return Err(Error::InvalidArgument(format!(
                "element '{}' needs at least one instance",
                name
            )));
        }
        let desc = self.registry.require(class)?;
        if self.child_by_name(parent, name)?.is_some() {
            return Err(Error::DuplicateName {
                name: name.to_string(),
                parent: self.path(parent)?,
            });
        }
        let instances = (0..size).map(|_| InstanceData::new(&desc)).collect();
        let id = Id::from_raw(self.arena.insert(Element {
            name: name.to_string(),
            class: desc,
            parent: Some(parent),
            children: Vec::new(),
            instances,
        }));
        self.element_mut(parent)?.children.push(id);
        debug!(%id, name, class, size, "created element");
        Ok(id)
    }

    /// Remove an element and its whole subtree, returning the removed ids
    ///
    /// Ids are returned depth-first, parents before their children. Callers
    /// owning messages or bindings must drop references to all of them.
    pub fn destroy(&mut self, id: Id) -> Result<Vec<Id>> {
        if id == self.root {
            return Err(Error::InvalidArgument("the root cannot be destroyed".into()));
        }
        let parent = self.element(id)?.parent;
        let removed = self.subtree(id)?;
        if let Some(parent) = parent {
            self.element_mut(parent)?.children.retain(|c| *c != id);
        }
        for gone in &removed {
            self.arena.remove(gone.raw());
        }
        debug!(%id, count = removed.len(), "destroyed element subtree");
        Ok(removed)
    }

    /// `id` followed by all its descendants in pre-order
    pub fn subtree(&self, id: Id) -> Result<Vec<Id>> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let element = self.element(next)?;
            out.push(next);
            stack.extend(element.children.iter().rev());
        }
        Ok(out)
    }

    /// All descendants of `id` in pre-order, excluding `id`
    pub fn descendants(&self, id: Id) -> Result<Vec<Id>> {
        let mut all = self.subtree(id)?;
        all.remove(0);
        Ok(all)
    }

    pub fn children(&self, id: Id) -> Result<&[Id]> {
        Ok(self.element(id)?.children())
    }

    pub fn child_by_name(&self, id: Id, name: &str) -> Result<Option<Id>> {
        let element = self.element(id)?;
        Ok(element
            .children
            .iter()
            .copied()
            .find(|c| self.arena.get(c.raw()).is_some_and(|e| e.name == name)))
    }

    pub fn type_of(&self, id: Id) -> Result<&str> {
        Ok(self.element(id)?.class_name())
    }

    pub fn parent(&self, id: Id) -> Result<Option<Id>> {
        Ok(self.element(id)?.parent)
    }

    pub fn name(&self, id: Id) -> Result<&str> {
        Ok(self.element(id)?.name())
    }

    pub fn len(&self, id: Id) -> Result<usize> {
        Ok(self.element(id)?.len())
    }

    /// Absolute path, `/` for the root
    pub fn path(&self, id: Id) -> Result<String> {
        let mut names = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let element = self.element(current)?;
            if element.parent.is_some() {
                names.push(element.name.as_str());
            }
            cursor = element.parent;
        }
        names.reverse();
        Ok(format!("/{}", names.join("/")))
    }

    /// Address one instance; negative indices count from the end
    pub fn obj(&self, id: Id, index: isize) -> Result<ObjId> {
        let len = self.len(id)?;
        let resolved = if index < 0 {
            len as isize + index
        } else {
            index
        };
        if resolved < 0 || resolved as usize >= len {
            return Err(Error::IndexOutOfRange { index, len });
        }
        Ok(ObjId::new(id, resolved as usize))
    }

    /// Resolve an absolute path, or a relative one against `base`
    pub fn resolve_path(&self, base: Id, path: &str) -> Result<Id> {
        Ok(self.resolve_obj(base, path)?.id)
    }

    /// Resolve a path whose last segment may carry an instance index `[i]`
    pub fn resolve_obj(&self, base: Id, path: &str) -> Result<ObjId> {
        let not_found = || Error::NotFound(format!("path '{}'", path));
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(not_found());
        }
        let mut cursor = if trimmed.starts_with('/') {
            self.root
        } else {
            self.element(base)?;
            base
        };
        let mut index = 0isize;
        for segment in trimmed.split('/').filter(|s| !s.is_empty()) {
            let (name, idx) = split_index(segment).ok_or_else(not_found)?;
            cursor = match name {
                "." => cursor,
                ".." => self.parent(cursor)?.ok_or_else(not_found)?,
                _ => self.child_by_name(cursor, name)?.ok_or_else(not_found)?,
            };
            index = idx.unwrap_or(0);
            self.obj(cursor, index).map_err(|_| not_found())?;
        }
        self.obj(cursor, index)
    }

    pub fn exists(&self, base: Id, path: &str) -> bool {
        self.resolve_path(base, path).is_ok()
    }

    /// Re-parent an element, keeping its subtree
    pub fn move_to(&mut self, id: Id, new_parent: Id) -> Result<()> {
        if id == self.root {
            return Err(Error::InvalidArgument("the root cannot be moved".into()));
        }
        let name = self.name(id)?.to_string();
        let mut cursor = Some(new_parent);
        while let Some(current) = cursor {
            if current == id {
                return Err(Error::InvalidArgument(format!(
                    "cannot move {} into its own subtree",
                    self.path(id)?
                )));
            }
            cursor = self.parent(current)?;
        }
        if self.child_by_name(new_parent, &name)?.is_some() {
            return Err(Error::DuplicateName {
                name,
                parent: self.path(new_parent)?,
            });
        }
        if let Some(old_parent) = self.parent(id)? {
            self.element_mut(old_parent)?.children.retain(|c| *c != id);
        }
        self.element_mut(new_parent)?.children.push(id);
        self.element_mut(id)?.parent = Some(new_parent);
        debug!(%id, %new_parent, "moved element");
        Ok(())
    }

    /// Deep-copy an element's fields and subtree under `new_parent`
    ///
    /// Messages and tick bindings are not copied.
    pub fn copy(&mut self, id: Id, new_parent: Id, name: &str) -> Result<Id> {
        validate_name(name)?;
        self.element(new_parent)?;
        let subtree = self.subtree(id)?;
        if subtree.contains(&new_parent) {
            return Err(Error::InvalidArgument(format!(
                "cannot copy {} into its own subtree",
                self.path(id)?
            )));
        }
        if self.child_by_name(new_parent, name)?.is_some() {
            return Err(Error::DuplicateName {
                name: name.to_string(),
                parent: self.path(new_parent)?,
            });
        }
        let copied = self.copy_node(id, new_parent, name.to_string())?;
        debug!(%id, copy = %copied, "copied element subtree");
        Ok(copied)
    }

    fn copy_node(&mut self, id: Id, parent: Id, name: String) -> Result<Id> {
        let source = self.element(id)?;
        let children = source.children.clone();
        let node = Element {
            name,
            class: source.class.clone(),
            parent: Some(parent),
            children: Vec::new(),
            instances: source.instances.clone(),
        };
        let copy = Id::from_raw(self.arena.insert(node));
        self.element_mut(parent)?.children.push(copy);
        for child in children {
            let child_name = self.name(child)?.to_string();
            self.copy_node(child, copy, child_name)?;
        }
        Ok(copy)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(RESERVED) {
        return Err(Error::InvalidArgument(format!(
            "invalid element name '{}'",
            name
        )));
    }
    Ok(())
}

/// Split `name[3]` into `("name", Some(3))`; `None` if the brackets are malformed
fn split_index(segment: &str) -> Option<(&str, Option<isize>)> {
    match segment.find('[') {
        None => Some((segment, None)),
        Some(open) => {
            let inner = segment[open + 1..].strip_suffix(']')?;
            let index = inner.trim().parse::<isize>().ok()?;
            Some((&segment[..open], Some(index)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> ElementGraph {
        ElementGraph::new(Arc::new(Registry::builder().build())).unwrap()
    }

    #[test]
    fn test_create_and_paths() {
        let mut g = graph();
        let root = g.root();
        let a = g.create(root, "a", NEUTRAL, 1).unwrap();
        let b = g.create(a, "b", NEUTRAL, 4).unwrap();

        assert_eq!(g.path(root).unwrap(), "/");
        assert_eq!(g.path(b).unwrap(), "/a/b");
        assert_eq!(g.resolve_path(root, "/a/b").unwrap(), b);
        assert_eq!(g.resolve_path(a, "b").unwrap(), b);
        assert_eq!(g.resolve_path(b, "../b/.").unwrap(), b);
        assert_eq!(g.resolve_obj(root, "/a/b[2]").unwrap(), b.at(2));
        assert!(matches!(
            g.resolve_path(root, "/a/c"),
            Err(Error::NotFound(_))
        ));
        assert!(g.resolve_obj(root, "/a/b[4]").is_err());
        assert!(g.resolve_obj(root, "/a/b[x]").is_err());
        assert!(g.exists(root, "/a"));
        assert!(!g.exists(root, "/zzz"));
    }

    #[test]
    fn test_names_unique_and_validated() {
        let mut g = graph();
        let root = g.root();
        g.create(root, "a", NEUTRAL, 1).unwrap();
        assert!(matches!(
            g.create(root, "a", NEUTRAL, 1),
            Err(Error::DuplicateName { .. })
        ));
        assert!(g.create(root, "x/y", NEUTRAL, 1).is_err());
        assert!(g.create(root, "", NEUTRAL, 1).is_err());
        assert!(g.create(root, "z", NEUTRAL, 0).is_err());
        assert!(matches!(
            g.create(root, "q", "Missing", 1),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_obj_negative_index() {
        let mut g = graph();
        let v = g.create(g.root(), "v", NEUTRAL, 5).unwrap();
        assert_eq!(g.obj(v, -1).unwrap(), v.at(4));
        assert_eq!(g.obj(v, 0).unwrap(), v.at(0));
        assert!(g.obj(v, 5).is_err());
        assert!(g.obj(v, -6).is_err());
    }

    #[test]
    fn test_destroy_cascades_and_stales_handles() {
        let mut g = graph();
        let root = g.root();
        let a = g.create(root, "a", NEUTRAL, 1).unwrap();
        let b = g.create(a, "b", NEUTRAL, 1).unwrap();
        let c = g.create(a, "c", NEUTRAL, 1).unwrap();
        let d = g.create(b, "d", NEUTRAL, 1).unwrap();

        let removed = g.destroy(a).unwrap();
        assert_eq!(removed, vec![a, b, d, c]);
        assert!(g.children(root).unwrap().is_empty());
        assert!(matches!(g.name(b), Err(Error::StaleHandle(_))));

        // slot reuse does not revive the old handle
        let fresh = g.create(root, "fresh", NEUTRAL, 1).unwrap();
        assert!(g.contains(fresh));
        assert!(!g.contains(a));
        assert!(g.destroy(root).is_err());
    }

    #[test]
    fn test_move_to() {
        let mut g = graph();
        let root = g.root();
        let a = g.create(root, "a", NEUTRAL, 1).unwrap();
        let b = g.create(a, "b", NEUTRAL, 1).unwrap();
        let other = g.create(root, "other", NEUTRAL, 1).unwrap();

        assert!(g.move_to(a, b).is_err());
        g.move_to(b, other).unwrap();
        assert_eq!(g.path(b).unwrap(), "/other/b");
        assert!(g.children(a).unwrap().is_empty());

        g.create(a, "b", NEUTRAL, 1).unwrap();
        assert!(matches!(g.move_to(b, a), Err(Error::DuplicateName { .. })));
    }

    #[test]
    fn test_copy_is_deep() {
        let mut g = graph();
        let root = g.root();
        let a = g.create(root, "a", NEUTRAL, 3).unwrap();
        g.create(a, "b", NEUTRAL, 1).unwrap();

        let copy = g.copy(a, root, "a2").unwrap();
        assert_eq!(g.len(copy).unwrap(), 3);
        assert!(g.exists(root, "/a2/b"));
        assert_ne!(g.resolve_path(root, "/a2/b").unwrap(), g.resolve_path(root, "/a/b").unwrap());
        assert!(g.copy(a, a, "inner").is_err());
    }

    #[test]
    fn test_descendants_pre_order() {
        let mut g = graph();
        let root = g.root();
        let a = g.create(root, "a", NEUTRAL, 1).unwrap();
        let b = g.create(a, "b", NEUTRAL, 1).unwrap();
        let c = g.create(root, "c", NEUTRAL, 1).unwrap();
        assert_eq!(g.descendants(root).unwrap(), vec![a, b, c]);
        assert!(g.descendants(c).unwrap().is_empty());
    }
}
