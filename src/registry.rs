//! LEVEE - Dependent Registry
//! The weak side of the handle/dependent pairing. A handle records each
//! live iterator or snapshot under a resource id without owning it, so the
//! dependent's own lifetime decides when it goes away.
//!
//! Removal is idempotent. Bulk teardown takes the whole map out first and
//! works on that copy, so finalizers that fire mid-teardown and try to
//! deregister themselves find nothing to do.

use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

pub type ResourceId = u64;

pub struct Registry<T> {
    next_id: ResourceId,
    live: BTreeMap<ResourceId, Weak<T>>,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            live: BTreeMap::new(),
        }
    }

    /// Reserve an id for a resource about to be created.
    pub fn allocate(&mut self) -> ResourceId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn insert(&mut self, id: ResourceId, resource: &Rc<T>) {
        self.live.insert(id, Rc::downgrade(resource));
    }

    /// Returns whether the id was still registered.
    pub fn remove(&mut self, id: ResourceId) -> bool {
        self.live.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Empty the registry, returning every entry that is still alive.
    pub fn drain_live(&mut self) -> Vec<Rc<T>> {
        std::mem::take(&mut self.live)
            .into_values()
            .filter_map(|weak| weak.upgrade())
            .collect()
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let mut registry: Registry<u8> = Registry::new();
        let a = registry.allocate();
        let b = registry.allocate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut registry = Registry::new();
        let value = Rc::new(7);
        let id = registry.allocate();
        registry.insert(id, &value);
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_does_not_keep_entries_alive() {
        let mut registry = Registry::new();
        let kept = Rc::new("kept");
        let dropped = Rc::new("dropped");
        let (a, b) = (registry.allocate(), registry.allocate());
        registry.insert(a, &kept);
        registry.insert(b, &dropped);
        drop(dropped);

        let live = registry.drain_live();
        assert_eq!(live.len(), 1);
        assert_eq!(*live[0], "kept");
        assert_eq!(registry.len(), 0);
        assert_eq!(Rc::strong_count(&kept), 2);
    }
}
