use crate::model::ContentDefinition;
use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

struct CacheInner {
    map: HashMap<String, ContentDefinition>,
    /// Recency order, least-recently-used at the front.
    recency: VecDeque<String>,
}

impl CacheInner {
    fn touch(&mut self, id: &str) {
        if let Some(pos) = self.recency.iter().position(|k| k == id) {
            self.recency.remove(pos);
        }
        self.recency.push_back(id.to_string());
    }
}

/// Fixed-capacity LRU map of content definitions keyed by definition id.
///
/// Eviction is silent: an evicted id is thereafter unknown and later
/// interactions referencing it proceed with a degraded payload. Internally
/// thread-safe on top of the facade's own serialization.
pub struct DefinitionCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl DefinitionCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(CacheInner {
                map: HashMap::with_capacity(capacity),
                recency: VecDeque::with_capacity(capacity),
            }),
        }
    }

    /// Upserts a definition and marks its id most-recently-used. Inserting
    /// beyond capacity evicts the least-recently-used entry.
    pub fn store(&self, definition: ContentDefinition) {
        let mut inner = self.inner.lock().unwrap();
        let id = definition.id.clone();
        let mut definition = definition;
        // The submission flag transitions at most once per cached lifetime;
        // re-registering a definition must not re-arm the side channel.
        if let Some(existing) = inner.map.get(&id) {
            definition.submitted_to_featurization |= existing.submitted_to_featurization;
        }
        inner.map.insert(id.clone(), definition);
        inner.touch(&id);

        while inner.map.len() > self.capacity {
            if let Some(evicted) = inner.recency.pop_front() {
                inner.map.remove(&evicted);
                debug!("definition cache evicted '{evicted}' (capacity {})", self.capacity);
            } else {
                break;
            }
        }
    }

    /// Returns a clone of the definition and refreshes its recency, so
    /// actively used definitions stay resident.
    pub fn get(&self, id: &str) -> Option<ContentDefinition> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.map.contains_key(id) {
            return None;
        }
        inner.touch(id);
        inner.map.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().unwrap().map.contains_key(id)
    }

    /// Snapshot of all cached definitions; order is not significant.
    pub fn get_all(&self) -> Vec<ContentDefinition> {
        self.inner.lock().unwrap().map.values().cloned().collect()
    }

    /// Idempotently sets the submission flag. Returns the updated record, or
    /// `None` if the id is not cached.
    pub fn mark_as_sent(&self, id: &str) -> Option<ContentDefinition> {
        let mut inner = self.inner.lock().unwrap();
        let def = inner.map.get_mut(id)?;
        def.submitted_to_featurization = true;
        Some(def.clone())
    }

    /// Once-only gate for the featurization side channel: returns the record
    /// only when this call performed the false-to-true transition.
    pub fn claim_for_submission(&self, id: &str) -> Option<ContentDefinition> {
        let mut inner = self.inner.lock().unwrap();
        let def = inner.map.get_mut(id)?;
        if def.submitted_to_featurization {
            return None;
        }
        def.submitted_to_featurization = true;
        Some(def.clone())
    }

    /// Reverts a claim whose submission never reached the durable queue, so a
    /// later interaction can claim the definition again.
    pub fn release_claim(&self, id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(def) = inner.map.get_mut(id) {
            def.submitted_to_featurization = false;
        }
    }

    pub fn sent_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .map
            .values()
            .filter(|d| d.submitted_to_featurization)
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.map.is_empty() {
            warn!("clearing definition cache ({} entries)", inner.map.len());
        }
        inner.map.clear();
        inner.recency.clear();
    }
}
