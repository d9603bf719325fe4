use crate::cache::DefinitionCache;
use crate::config::Configuration;
use log::info;
use std::sync::RwLock;

/// Serialized holder of the active configuration snapshot.
///
/// The snapshot is replaced wholesale on each update. Readers get a clone;
/// the live snapshot is never handed out by reference.
pub struct ConfigurationStore {
    current: RwLock<Option<Configuration>>,
}

impl ConfigurationStore {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }

    pub fn update(&self, config: Configuration) {
        let mut guard = self.current.write().unwrap();
        *guard = Some(config);
    }

    pub fn snapshot(&self) -> Option<Configuration> {
        self.current.read().unwrap().clone()
    }

    pub fn clear(&self) {
        let mut guard = self.current.write().unwrap();
        *guard = None;
    }

    /// Exclusion check for a URL. Permissive when no configuration or no
    /// value is present: absence of rules never blocks tracking.
    pub fn should_track_url(&self, url: Option<&str>) -> bool {
        let Some(url) = url else { return true };
        match &*self.current.read().unwrap() {
            Some(config) => !config.privacy.url_excluded(url),
            None => true,
        }
    }

    /// Exclusion check for a placement location, same permissive default.
    pub fn should_track_location(&self, location: Option<&str>) -> bool {
        let Some(location) = location else { return true };
        match &*self.current.read().unwrap() {
            Some(config) => !config.privacy.location_excluded(location),
            None => true,
        }
    }
}

impl Default for ConfigurationStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Composes the configuration store and the definition cache behind one
/// synchronized surface used by every other component.
pub struct StateFacade {
    store: ConfigurationStore,
    cache: DefinitionCache,
}

impl StateFacade {
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            store: ConfigurationStore::new(),
            cache: DefinitionCache::new(cache_capacity),
        }
    }

    pub fn update_configuration(&self, config: Configuration) {
        self.store.update(config);
        info!("configuration snapshot replaced");
    }

    pub fn configuration(&self) -> Option<Configuration> {
        self.store.snapshot()
    }

    pub fn should_track_url(&self, url: Option<&str>) -> bool {
        self.store.should_track_url(url)
    }

    pub fn should_track_location(&self, location: Option<&str>) -> bool {
        self.store.should_track_location(location)
    }

    pub fn cache(&self) -> &DefinitionCache {
        &self.cache
    }

    /// Clears the configuration to unset and empties the definition cache.
    pub fn reset(&self) {
        self.store.clear();
        self.cache.remove_all();
        info!("state reset: configuration unset, definition cache cleared");
    }
}
