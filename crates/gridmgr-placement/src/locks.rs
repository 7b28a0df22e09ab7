//! Keyed mutual exclusion for regions and hosts.
//!
//! Port allocation and lifecycle transitions are correctness-critical
//! sections: the registry hands out one mutex per region UUID and one
//! per host address so those sections serialize without a global lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

/// Lazily-populated locks keyed by region and host identity.
#[derive(Default)]
pub struct LockRegistry {
    regions: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    hosts: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock serializing operations on one region.
    pub async fn region(&self, uuid: Uuid) -> Arc<Mutex<()>> {
        let mut map = self.regions.lock().await;
        map.entry(uuid).or_default().clone()
    }

    /// The lock serializing allocations on one host.
    pub async fn host(&self, address: &str) -> Arc<Mutex<()>> {
        let mut map = self.hosts.lock().await;
        map.entry(address.to_string()).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_key_yields_same_lock() {
        let registry = LockRegistry::new();
        let uuid = Uuid::new_v4();

        let a = registry.region(uuid).await;
        let b = registry.region(uuid).await;
        assert!(Arc::ptr_eq(&a, &b));

        let h1 = registry.host("10.0.0.1").await;
        let h2 = registry.host("10.0.0.1").await;
        assert!(Arc::ptr_eq(&h1, &h2));
    }

    #[tokio::test]
    async fn different_keys_are_independent() {
        let registry = LockRegistry::new();

        let a = registry.region(Uuid::new_v4()).await;
        let b = registry.region(Uuid::new_v4()).await;
        assert!(!Arc::ptr_eq(&a, &b));

        // Holding one host's lock does not block another host's.
        let h1 = registry.host("10.0.0.1").await;
        let _guard = h1.lock().await;
        let h2 = registry.host("10.0.0.2").await;
        assert!(h2.try_lock().is_ok());
    }
}
