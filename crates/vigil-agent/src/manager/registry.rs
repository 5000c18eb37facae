//! Name -> housekeeping unit map, keyed by canonical name and every alias

use super::container::ContainerData;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use vigil_core::info::is_same_or_descendant;
use vigil_core::ContainerReference;

/// Registry keys and canonical references, read under one lock
pub struct RegistrySnapshot {
    pub unit: Arc<ContainerData>,
    pub keys: HashSet<String>,
    pub canonical: Vec<ContainerReference>,
}

/// Registry of monitored entities.
///
/// A unit is reachable under its canonical name and each of its aliases.
/// Multi-key inserts and removals happen inside one write-lock section so
/// readers never observe a partial registration.
#[derive(Default)]
pub struct ContainerRegistry {
    containers: RwLock<HashMap<String, Arc<ContainerData>>>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a unit by canonical name or alias
    pub async fn get(&self, name: &str) -> Option<Arc<ContainerData>> {
        self.containers.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.containers.read().await.contains_key(name)
    }

    /// Register `unit` under all of its keys. Returns false, leaving the map
    /// untouched, when the canonical name is already taken.
    pub async fn insert(&self, unit: Arc<ContainerData>) -> bool {
        let mut containers = self.containers.write().await;
        if containers.contains_key(unit.name()) {
            return false;
        }
        for key in unit.reference().keys() {
            containers.insert(key.to_string(), Arc::clone(&unit));
        }
        true
    }

    /// Remove the unit known under `name` (canonical or alias) together with
    /// every key that still points at it
    pub async fn remove(&self, name: &str) -> Option<Arc<ContainerData>> {
        let mut containers = self.containers.write().await;
        let unit = containers.get(name).cloned()?;
        for key in unit.reference().keys() {
            // An alias may since have been claimed by another unit
            if containers
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current, &unit))
            {
                containers.remove(key);
            }
        }
        Some(unit)
    }

    /// One entry per unit, sorted by canonical name
    pub async fn canonical(&self) -> Vec<Arc<ContainerData>> {
        let containers = self.containers.read().await;
        let mut units: Vec<_> = containers
            .iter()
            .filter(|(key, unit)| key.as_str() == unit.name())
            .map(|(_, unit)| Arc::clone(unit))
            .collect();
        units.sort_by(|a, b| a.name().cmp(b.name()));
        units
    }

    /// Units at or below `name` in the hierarchy, sorted by canonical name
    pub async fn subtree(&self, name: &str) -> Vec<Arc<ContainerData>> {
        let mut units = self.canonical().await;
        units.retain(|unit| is_same_or_descendant(name, unit.name()));
        units
    }

    /// The unit registered under `name` plus every key and canonical
    /// reference in the registry
    pub async fn snapshot(&self, name: &str) -> Option<RegistrySnapshot> {
        let containers = self.containers.read().await;
        let unit = containers.get(name).cloned()?;
        let keys = containers.keys().cloned().collect();
        let canonical = containers
            .iter()
            .filter(|(key, unit)| key.as_str() == unit.name())
            .map(|(_, unit)| unit.reference().clone())
            .collect();
        Some(RegistrySnapshot {
            unit,
            keys,
            canonical,
        })
    }

    /// Number of registered units
    pub async fn count(&self) -> usize {
        self.containers
            .read()
            .await
            .iter()
            .filter(|(key, unit)| key.as_str() == unit.name())
            .count()
    }

    /// Number of keys, aliases included
    pub async fn key_count(&self) -> usize {
        self.containers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HousekeepingConfig;
    use crate::storage::InMemoryStorage;
    use crate::testing::FakeHandler;

    async fn unit(handler: FakeHandler) -> Arc<ContainerData> {
        ContainerData::new(
            Arc::new(handler),
            Arc::new(InMemoryStorage::new(4)),
            HousekeepingConfig::default(),
            false,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_alias_consistency() {
        let registry = ContainerRegistry::new();
        let cont = unit(FakeHandler::new("/docker/abc").with_aliases(&["web", "abc"])).await;
        assert!(registry.insert(cont.clone()).await);

        for key in ["/docker/abc", "web", "abc"] {
            let found = registry.get(key).await.unwrap();
            assert!(Arc::ptr_eq(&found, &cont), "{} resolves to another unit", key);
        }
        assert_eq!(registry.count().await, 1);
        assert_eq!(registry.key_count().await, 3);

        // Removal through an alias drops every key
        let removed = registry.remove("web").await.unwrap();
        assert!(Arc::ptr_eq(&removed, &cont));
        for key in ["/docker/abc", "web", "abc"] {
            assert!(!registry.contains(key).await);
        }
        assert_eq!(registry.key_count().await, 0);
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let registry = ContainerRegistry::new();
        let first = unit(FakeHandler::new("/a")).await;
        let second = unit(FakeHandler::new("/a")).await;

        assert!(registry.insert(first.clone()).await);
        assert!(!registry.insert(second).await);
        assert!(Arc::ptr_eq(&registry.get("/a").await.unwrap(), &first));
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_remove_unknown_is_noop() {
        let registry = ContainerRegistry::new();
        registry.insert(unit(FakeHandler::new("/a")).await).await;
        assert!(registry.remove("/missing").await.is_none());
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_remove_keeps_alias_claimed_by_other_unit() {
        let registry = ContainerRegistry::new();
        let old = unit(FakeHandler::new("/a").with_aliases(&["web"])).await;
        registry.insert(old).await;
        let new = unit(FakeHandler::new("/b").with_aliases(&["web"])).await;
        registry.insert(new.clone()).await;

        registry.remove("/a").await;
        assert!(Arc::ptr_eq(&registry.get("web").await.unwrap(), &new));
    }

    #[tokio::test]
    async fn test_snapshot_and_subtree() {
        let registry = ContainerRegistry::new();
        for name in ["/", "/a", "/a/b", "/ab"] {
            registry.insert(unit(FakeHandler::new(name)).await).await;
        }
        registry
            .insert(unit(FakeHandler::new("/c").with_aliases(&["cee"])).await)
            .await;

        let snapshot = registry.snapshot("/").await.unwrap();
        assert_eq!(snapshot.unit.name(), "/");
        assert_eq!(snapshot.keys.len(), 6);
        assert!(snapshot.keys.contains("cee"));
        assert_eq!(snapshot.canonical.len(), 5);
        assert!(registry.snapshot("/missing").await.is_none());

        let names: Vec<String> = registry
            .subtree("/a")
            .await
            .iter()
            .map(|u| u.name().to_string())
            .collect();
        assert_eq!(names, vec!["/a", "/a/b"]);
        assert_eq!(registry.subtree("/").await.len(), 5);
    }
}
