//! The set of zones this server is authoritative for.
//!
//! Readers clone an `Arc<Zone>` under a short read lock, so a zone being
//! replaced or dropped never disappears from under a query in flight.

use hickory_proto::rr::Name;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::metrics;
use crate::zone::Zone;

/// Thread-safe zone registry shared by all listeners.
#[derive(Debug, Clone, Default)]
pub struct ZoneRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    /// origin -> zone
    zones: HashMap<Name, Arc<Zone>>,

    /// Bumped on every insert or removal.
    generation: u64,
}

impl ZoneRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a zone under its origin, replacing any previous one.
    /// Returns the replaced zone.
    pub fn insert(&self, zone: Zone) -> Option<Arc<Zone>> {
        let origin = zone.origin().clone();
        let mut inner = self.inner.write();
        let previous = inner.zones.insert(origin.clone(), Arc::new(zone));
        inner.generation = inner.generation.wrapping_add(1);
        debug!(
            %origin,
            replaced = previous.is_some(),
            zones = inner.zones.len(),
            "inserted zone"
        );
        previous
    }

    /// Remove the zone loaded for `origin`.
    pub fn remove(&self, origin: &Name) -> Option<Arc<Zone>> {
        let mut inner = self.inner.write();
        let removed = inner.zones.remove(&origin.to_lowercase());
        if removed.is_some() {
            inner.generation = inner.generation.wrapping_add(1);
            debug!(%origin, zones = inner.zones.len(), "removed zone");
        }
        removed
    }

    /// Zone loaded under exactly `origin`.
    pub fn get(&self, origin: &Name) -> Option<Arc<Zone>> {
        self.inner.read().zones.get(&origin.to_lowercase()).cloned()
    }

    /// The closest enclosing zone for `name`.
    pub fn find_zone(&self, name: &Name) -> Option<Arc<Zone>> {
        let mut current = name.to_lowercase();
        let inner = self.inner.read();
        loop {
            if let Some(zone) = inner.zones.get(&current) {
                return Some(zone.clone());
            }
            if current.is_root() {
                return None;
            }
            current = current.base_name();
        }
    }

    /// True if a zone is loaded under `origin`.
    pub fn contains(&self, origin: &Name) -> bool {
        self.inner.read().zones.contains_key(&origin.to_lowercase())
    }

    /// Loaded origins, sorted.
    pub fn origins(&self) -> Vec<Name> {
        let mut origins: Vec<Name> = self.inner.read().zones.keys().cloned().collect();
        origins.sort();
        origins
    }

    /// Number of loaded zones.
    pub fn len(&self) -> usize {
        self.inner.read().zones.len()
    }

    /// True if no zones are loaded.
    pub fn is_empty(&self) -> bool {
        self.inner.read().zones.is_empty()
    }

    /// Mutation counter.
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Emit current registry metrics.
    pub fn emit_metrics(&self) {
        let inner = self.inner.read();
        let nodes: usize = inner.zones.values().map(|z| z.node_count()).sum();
        metrics::record_zone_counts(inner.zones.len(), nodes);
        metrics::record_generation(inner.generation);
    }
}
