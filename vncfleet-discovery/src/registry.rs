//! Instance registry
//!
//! Merges dynamic discovery with the static fallback list behind a stable
//! lookup surface. The served snapshot plus its id index are swapped as one
//! `Arc` so concurrent readers never observe a partially updated list.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

use vncfleet_core::{Error, Result};

use crate::discovery::InstanceDiscovery;
use crate::instance::{Instance, StaticInstance};

#[derive(Debug, Default)]
struct RegistryIndex {
    instances: Vec<Instance>,
    by_id: HashMap<String, usize>,
    dynamic: bool,
}

impl RegistryIndex {
    fn build(instances: Vec<Instance>, dynamic: bool) -> Self {
        let by_id = instances
            .iter()
            .enumerate()
            .map(|(i, inst)| (inst.id.clone(), i))
            .collect();
        Self {
            instances,
            by_id,
            dynamic,
        }
    }
}

/// Stable lookup surface over discovery, with static fallback
pub struct InstanceRegistry {
    discovery: Arc<InstanceDiscovery>,
    fallback: Vec<Instance>,
    /// When set, an empty dynamic result is authoritative and the fallback
    /// is never served (avoids masking real outages).
    strict: bool,
    index: RwLock<Arc<RegistryIndex>>,
}

impl InstanceRegistry {
    #[must_use]
    pub fn new(discovery: Arc<InstanceDiscovery>, fallback: Vec<Instance>, strict: bool) -> Self {
        Self {
            discovery,
            fallback,
            strict,
            index: RwLock::new(Arc::new(RegistryIndex::default())),
        }
    }

    /// Load the static fallback document, a JSON list of
    /// `{id, displayName, connectionTarget, provisioned}` entries.
    pub async fn load_fallback(path: &Path, vnc_port_name: &str) -> Result<Vec<Instance>> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Configuration(format!("Failed to read fallback document: {e}")))?;
        let entries: Vec<StaticInstance> = serde_json::from_str(&raw)?;
        Ok(entries
            .iter()
            .map(|e| Instance::from_static(e, vnc_port_name))
            .collect())
    }

    /// Force an out-of-band discovery cycle and swap the served snapshot
    /// atomically. Returns the number of instances now served.
    ///
    /// Dynamic results always win; the fallback is consulted only when the
    /// dynamic set is empty and strict mode is off.
    pub async fn refresh_discovery(&self) -> usize {
        let discovered = self.discovery.discover_instances().await;

        let next = if discovered.is_empty() && !self.strict && !self.fallback.is_empty() {
            tracing::warn!(
                fallback_instances = self.fallback.len(),
                "Dynamic discovery empty, serving static fallback"
            );
            RegistryIndex::build(self.fallback.clone(), false)
        } else {
            RegistryIndex::build(discovered, true)
        };

        let count = next.instances.len();
        *self.index.write().await = Arc::new(next);
        count
    }

    /// Current instance list (dynamic snapshot or static fallback).
    pub async fn get_instances(&self) -> Vec<Instance> {
        self.index.read().await.instances.clone()
    }

    /// Instances fully configured for user-facing use.
    pub async fn get_provisioned_instances(&self) -> Vec<Instance> {
        self.index
            .read()
            .await
            .instances
            .iter()
            .filter(|i| i.provisioned)
            .cloned()
            .collect()
    }

    /// O(1) lookup by id against the served snapshot.
    pub async fn get_instance_by_id(&self, id: &str) -> Option<Instance> {
        let index = self.index.read().await;
        index.by_id.get(id).map(|&i| index.instances[i].clone())
    }

    /// Whether the served snapshot came from dynamic discovery.
    pub async fn is_using_dynamic_discovery(&self) -> bool {
        self.index.read().await.dynamic
    }

    #[must_use]
    pub fn discovery(&self) -> Arc<InstanceDiscovery> {
        self.discovery.clone()
    }
}
