//! Name-indexed object map that never creates entries implicitly.
//!
//! Every object kind with unique names (pipelines, register arrays,
//! calculations) is stored in an [`ObjectMap`]. Lookups return `Option`,
//! inserts are explicit and reject duplicate names and ids, and runtime
//! inserts draw their id from the map's own [`IdAllocator`].
//!
//! Iteration is in id order, which is also the order objects are written
//! back to a configuration document.

use crate::named::{IdAllocator, NamedObject, ObjectId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Error type for ObjectMap operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectMapError {
    #[error("Duplicate name '{0}'")]
    DuplicateName(String),

    #[error("Duplicate id {0}")]
    DuplicateId(ObjectId),
}

/// Types that carry a [`NamedObject`] identity.
pub trait HasNamedObject {
    fn named(&self) -> &NamedObject;

    fn name(&self) -> &str {
        self.named().name()
    }

    fn id(&self) -> ObjectId {
        self.named().id()
    }
}

impl<T: HasNamedObject> HasNamedObject for Arc<T> {
    fn named(&self) -> &NamedObject {
        self.as_ref().named()
    }
}

/// A map from object name to object, ordered by id.
#[derive(Debug, Clone)]
pub struct ObjectMap<V> {
    by_id: BTreeMap<ObjectId, V>,
    by_name: HashMap<String, ObjectId>,
    ids: IdAllocator,
}

impl<V: HasNamedObject> ObjectMap<V> {
    pub fn new() -> Self {
        Self {
            by_id: BTreeMap::new(),
            by_name: HashMap::new(),
            ids: IdAllocator::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Returns the object with the given name.
    ///
    /// **This never creates entries.**
    pub fn get(&self, name: &str) -> Option<&V> {
        self.by_name.get(name).and_then(|id| self.by_id.get(id))
    }

    /// Returns the object with the given name, mutably.
    ///
    /// **This never creates entries.**
    pub fn get_mut(&mut self, name: &str) -> Option<&mut V> {
        match self.by_name.get(name) {
            Some(id) => self.by_id.get_mut(id),
            None => None,
        }
    }

    pub fn get_by_id(&self, id: ObjectId) -> Option<&V> {
        self.by_id.get(&id)
    }

    /// Inserts an object that already carries its id (loaded from a
    /// configuration document).
    pub fn insert(&mut self, value: V) -> Result<ObjectId, ObjectMapError> {
        let id = value.id();
        if self.by_name.contains_key(value.name()) {
            return Err(ObjectMapError::DuplicateName(value.name().to_string()));
        }
        if self.by_id.contains_key(&id) {
            return Err(ObjectMapError::DuplicateId(id));
        }
        self.ids.observe(id);
        self.by_name.insert(value.name().to_string(), id);
        self.by_id.insert(id, value);
        Ok(id)
    }

    /// Inserts a new object under `name`, assigning it the next free id.
    ///
    /// `build` receives the allocated id. The id is only consumed when the
    /// insert succeeds.
    pub fn insert_with<F>(&mut self, name: &str, build: F) -> Result<ObjectId, ObjectMapError>
    where
        F: FnOnce(ObjectId) -> V,
    {
        if self.by_name.contains_key(name) {
            return Err(ObjectMapError::DuplicateName(name.to_string()));
        }
        let id = self.ids.allocate();
        let value = build(id);
        self.by_name.insert(name.to_string(), id);
        self.by_id.insert(id, value);
        Ok(id)
    }

    /// Removes the object with the given name.
    ///
    /// Its id is not handed out again.
    pub fn remove(&mut self, name: &str) -> Option<V> {
        let id = self.by_name.remove(name)?;
        self.by_id.remove(&id)
    }

    /// Returns the id the next runtime insert will receive.
    pub fn next_free_id(&self) -> ObjectId {
        self.ids.peek()
    }

    /// Iterates over objects in id order.
    pub fn iter(&self) -> impl Iterator<Item = &V> {
        self.by_id.values()
    }

    /// Mutable iteration in id order. Callers must keep each object's name
    /// and id unchanged.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.by_id.values_mut()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_id.values().map(|v| v.name())
    }
}

impl<V: HasNamedObject> Default for ObjectMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, PartialEq)]
    struct Obj {
        named: NamedObject,
        size: usize,
    }

    impl Obj {
        fn new(name: &str, id: ObjectId) -> Self {
            Self {
                named: NamedObject::new(name, id),
                size: 0,
            }
        }
    }

    impl HasNamedObject for Obj {
        fn named(&self) -> &NamedObject {
            &self.named
        }
    }

    #[test]
    fn test_get_never_creates() {
        let mut map: ObjectMap<Obj> = ObjectMap::new();

        assert!(map.get("missing").is_none());
        assert!(map.get_mut("missing").is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let mut map = ObjectMap::new();
        map.insert(Obj::new("a", 0)).unwrap();

        assert_eq!(
            map.insert(Obj::new("a", 1)),
            Err(ObjectMapError::DuplicateName("a".to_string()))
        );
        assert_eq!(
            map.insert(Obj::new("b", 0)),
            Err(ObjectMapError::DuplicateId(0))
        );
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_insert_with_allocates_after_loaded_ids() {
        let mut map = ObjectMap::new();
        map.insert(Obj::new("a", 0)).unwrap();
        map.insert(Obj::new("b", 3)).unwrap();

        let id = map.insert_with("c", |id| Obj::new("c", id)).unwrap();
        assert_eq!(id, 4);
        assert_eq!(map.get("c").map(|o| o.id()), Some(4));

        // Failed insert does not consume an id
        assert!(map.insert_with("c", |id| Obj::new("c", id)).is_err());
        assert_eq!(map.next_free_id(), 5);
    }

    #[test]
    fn test_removed_ids_are_not_reused() {
        let mut map = ObjectMap::new();
        map.insert_with("a", |id| Obj::new("a", id)).unwrap();
        map.insert_with("b", |id| Obj::new("b", id)).unwrap();

        assert!(map.remove("b").is_some());
        assert!(map.get("b").is_none());

        let id = map.insert_with("b", |id| Obj::new("b", id)).unwrap();
        assert_eq!(id, 2);
    }

    #[test]
    fn test_iteration_in_id_order() {
        let mut map = ObjectMap::new();
        map.insert(Obj::new("z", 2)).unwrap();
        map.insert(Obj::new("y", 0)).unwrap();
        map.insert(Obj::new("x", 1)).unwrap();

        let names: Vec<&str> = map.names().collect();
        assert_eq!(names, vec!["y", "x", "z"]);
    }

    #[test]
    fn test_get_mut_edits_in_place() {
        let mut map = ObjectMap::new();
        map.insert(Obj::new("a", 0)).unwrap();

        if let Some(obj) = map.get_mut("a") {
            obj.size = 128;
        }
        assert_eq!(map.get("a").map(|o| o.size), Some(128));
        assert_eq!(map.get_by_id(0).map(|o| o.size), Some(128));
    }
}
