//! Host resources for handlers.
//!
//! The host fills one [`Bus`] at startup (message sink, world accessors) and
//! every invocation receives a clone. A resource a handler cannot find is a
//! handler failure, not a panic.
//!
//! Cloning clones `Arc`s, so a function call and its caller see the same
//! services.

use std::any::{Any, TypeId};
use std::sync::Arc;

use ahash::AHashMap;

/// One value per type.
#[derive(Default, Clone)]
pub struct Bus {
    resources: AHashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Bus {
    pub fn new() -> Self {
        Bus {
            resources: AHashMap::new(),
        }
    }

    /// Replaces any resource of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, resource: T) {
        self.resources.insert(TypeId::of::<T>(), Arc::new(resource));
    }

    /// Builder-style [`Bus::insert`].
    pub fn with<T: Send + Sync + 'static>(mut self, resource: T) -> Self {
        self.insert(resource);
        self
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.resources
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref())
    }

    /// Get a shared handle to a resource, detached from the Bus lifetime.
    pub fn get_arc<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.resources
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|arc| arc.downcast::<T>().ok())
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.resources.contains_key(&TypeId::of::<T>())
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("resources", &self.resources.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ServerName(&'static str);

    #[test]
    fn test_lookup_by_type() {
        let mut bus = Bus::new();
        bus.insert(ServerName("lobby-1"));
        bus.insert(ServerName("lobby-2"));

        assert_eq!(bus.get::<ServerName>().map(|n| n.0), Some("lobby-2"));
        assert!(bus.contains::<ServerName>());
        assert!(bus.get::<String>().is_none());
    }

    #[test]
    fn test_clones_share_resources() {
        let bus = Bus::new().with(parking_lot::Mutex::new(vec![1, 2, 3]));
        let clone = bus.clone();

        if let Some(v) = clone.get::<parking_lot::Mutex<Vec<i32>>>() {
            v.lock().push(4);
        }

        let shared = bus.get_arc::<parking_lot::Mutex<Vec<i32>>>().unwrap();
        assert_eq!(*shared.lock(), vec![1, 2, 3, 4]);
    }
}
