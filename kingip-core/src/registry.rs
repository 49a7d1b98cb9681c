//! Region registry: tracks which upstream connection ids are registered
//! under which region name, and hands out ids in round-robin order.
//!
//! Mirrors `svc/region.go` / `svc/gateway/region.go`: the cursor is an
//! atomic counter that is incremented *before* the modulo on every `pick`,
//! so the first pick after a region is first populated returns the entry
//! at index 1, not 0.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{CoreError, CoreResult};

struct RegionEntry {
    set: HashSet<u64>,
    order: Vec<u64>,
}

impl RegionEntry {
    fn new() -> Self {
        RegionEntry { set: HashSet::new(), order: Vec::new() }
    }
}

struct Region {
    inner: RwLock<RegionEntry>,
    cursor: AtomicU64,
}

impl Region {
    fn new() -> Self {
        Region { inner: RwLock::new(RegionEntry::new()), cursor: AtomicU64::new(0) }
    }
}

/// Concurrent region -> ordered id list, with round-robin `pick`.
pub struct RegionRegistry {
    regions: RwLock<std::collections::HashMap<String, Arc<Region>>>,
}

impl Default for RegionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionRegistry {
    pub fn new() -> Self {
        RegionRegistry { regions: RwLock::new(std::collections::HashMap::new()) }
    }

    fn entry(&self, region: &str) -> Arc<Region> {
        if let Some(entry) = self.regions.read().get(region) {
            return entry.clone();
        }
        let mut regions = self.regions.write();
        regions
            .entry(region.to_string())
            .or_insert_with(|| Arc::new(Region::new()))
            .clone()
    }

    /// Add `id` to `region`'s rotation. A no-op if already present.
    pub fn add(&self, region: &str, id: u64) {
        let entry = self.entry(region);
        let mut inner = entry.inner.write();
        if inner.set.insert(id) {
            inner.order.push(id);
        }
    }

    /// Remove `id` from `region`'s rotation, if present.
    pub fn remove(&self, region: &str, id: u64) {
        let entry = self.entry(region);
        let mut inner = entry.inner.write();
        if inner.set.remove(&id) {
            inner.order.retain(|&existing| existing != id);
        }
    }

    /// Remove `id` from every region it has been registered under.
    pub fn remove_from_all(&self, regions: &[String], id: u64) {
        for region in regions {
            self.remove(region, id);
        }
    }

    /// Round-robin pick: advances the region's cursor before taking the
    /// modulo, so repeated calls cycle `order[1], order[2], ..., order[0], ...`.
    pub fn pick(&self, region: &str) -> CoreResult<u64> {
        let entry = {
            let regions = self.regions.read();
            regions.get(region).cloned().ok_or(CoreError::RegistryNoEntry)?
        };
        let inner = entry.inner.read();
        if inner.order.is_empty() {
            return Err(CoreError::RegistryNoEntry);
        }
        let next = entry.cursor.fetch_add(1, Ordering::Relaxed) + 1;
        let idx = (next % inner.order.len() as u64) as usize;
        Ok(inner.order[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_skips_index_zero_on_first_call() {
        let registry = RegionRegistry::new();
        registry.add("red", 10);
        registry.add("red", 20);
        registry.add("red", 30);

        // order = [10, 20, 30]; cursor starts at 0, first pick adds 1 -> index 1 -> 20
        assert_eq!(registry.pick("red").unwrap(), 20);
        assert_eq!(registry.pick("red").unwrap(), 30);
        assert_eq!(registry.pick("red").unwrap(), 10);
        assert_eq!(registry.pick("red").unwrap(), 20);
    }

    #[test]
    fn pick_on_unknown_region_errors() {
        let registry = RegionRegistry::new();
        assert!(matches!(registry.pick("missing"), Err(CoreError::RegistryNoEntry)));
    }

    #[test]
    fn remove_excludes_id_from_rotation() {
        let registry = RegionRegistry::new();
        registry.add("blue", 1);
        registry.add("blue", 2);
        registry.remove("blue", 1);
        for _ in 0..4 {
            assert_eq!(registry.pick("blue").unwrap(), 2);
        }
    }

    #[test]
    fn remove_from_all_purges_every_region() {
        let registry = RegionRegistry::new();
        registry.add("red", 1);
        registry.add("blue", 1);
        registry.add("blue", 2);
        registry.remove_from_all(&["red".to_string(), "blue".to_string()], 1);
        assert!(matches!(registry.pick("red"), Err(CoreError::RegistryNoEntry)));
        assert_eq!(registry.pick("blue").unwrap(), 2);
    }
}
