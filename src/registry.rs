//! Registry of opened catalogue indexes.
//!
//! The registry holds an epoch : a configuration snapshot together with the indexes opened from it.
//! An index is opened on first reference to its catalogue and kept for the life of the epoch. Opening
//! is guarded by a once cell per catalogue so concurrent first requests open it only once.
//!
//! [IndexRegistry::invalidate_all] invalidates the configuration store, reloads it and installs a
//! fresh epoch with no index opened. Readers holding the previous epoch finish with it, a reader
//! never sees a new configuration with old indexes. If the reload fails the current epoch stays.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};

use crate::engine::{EngineError, GenomicIndex, IndexOpener};
use crate::utils::parameters::{ConfigError, ConfigStore, GatewayConfig};

#[derive(Debug, thiserror::Error)]
pub enum CatalogueError {
    #[error("catalogue {0} is not available")]
    NotFound(String),
    #[error("could not open catalogue {catalogue} : {source}")]
    OpenFailed {
        catalogue : String,
        #[source]
        source : EngineError,
    },
}

type IndexSlot = Arc<OnceCell<Arc<dyn GenomicIndex>>>;

/// A configuration and the indexes opened from it.
pub struct Epoch {
    config : Arc<GatewayConfig>,
    opener : Arc<dyn IndexOpener>,
    slots : Mutex<HashMap<String, IndexSlot>>,
}

impl Epoch {
    fn new(config : Arc<GatewayConfig>, opener : Arc<dyn IndexOpener>) -> Self {
        Epoch { config, opener, slots : Mutex::new(HashMap::new()) }
    }

    pub fn get_config(&self) -> &Arc<GatewayConfig> {
        &self.config
    }

    /// returns the index of catalogue, opening it on first call.
    pub fn get(&self, catalogue : &str) -> Result<Arc<dyn GenomicIndex>, CatalogueError> {
        let locator = self.config.get_locator(catalogue).ok_or_else(|| CatalogueError::NotFound(catalogue.to_string()))?;
        // the map lock is held only to fetch the slot, not during the open
        let slot = self.slots.lock().entry(catalogue.to_string()).or_default().clone();
        let index = slot.get_or_try_init(|| {
            let kmer_size = self.config.kmer_size_for(catalogue);
            self.opener.open(catalogue, locator, kmer_size).map_err(|source| {
                log::error!("could not open catalogue {} : {}", catalogue, source);
                CatalogueError::OpenFailed { catalogue : catalogue.to_string(), source }
            })
        })?;
        Ok(index.clone())
    } // end of get

    /// ids of catalogues whose index is opened
    pub fn opened(&self) -> Vec<String> {
        let mut ids : Vec<String> = self.slots.lock().iter().filter(|(_, s)| s.get().is_some()).map(|(id, _)| id.clone()).collect();
        ids.sort();
        ids
    }
} // end of impl Epoch

//=====================================================================================

pub struct IndexRegistry {
    config_store : Arc<ConfigStore>,
    opener : Arc<dyn IndexOpener>,
    epoch : RwLock<Arc<Epoch>>,
}

impl IndexRegistry {
    pub fn new(config_store : Arc<ConfigStore>, opener : Arc<dyn IndexOpener>) -> Self {
        let epoch = Epoch::new(config_store.get(), opener.clone());
        IndexRegistry { config_store, opener, epoch : RwLock::new(Arc::new(epoch)) }
    }

    /// the current epoch. A request should take it once and use it throughout.
    pub fn snapshot(&self) -> Arc<Epoch> {
        self.epoch.read().clone()
    }

    /// index of a catalogue in the current epoch
    pub fn get(&self, catalogue : &str) -> Result<Arc<dyn GenomicIndex>, CatalogueError> {
        self.snapshot().get(catalogue)
    }

    pub fn get_config_store(&self) -> &Arc<ConfigStore> {
        &self.config_store
    }

    /// drops every opened index and reloads the configuration.
    /// On reload failure the current configuration and indexes stay in service and the error is returned.
    pub fn invalidate_all(&self) -> Result<Arc<GatewayConfig>, ConfigError> {
        self.config_store.invalidate();
        let config = self.config_store.try_get()?;
        let fresh = Arc::new(Epoch::new(config.clone(), self.opener.clone()));
        let previous = std::mem::replace(&mut *self.epoch.write(), fresh);
        log::info!("index registry cleared, released {} opened catalogues", previous.opened().len());
        Ok(config)
    } // end of invalidate_all
} // end of impl IndexRegistry

//=====================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RawHit;
    use crate::utils::parameters::{CatalogueLocator, ConfigSource};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EmptyIndex;

    impl GenomicIndex for EmptyIndex {
        fn search(&self, _sequence : &str, _threshold : f64) -> Result<Vec<RawHit>, EngineError> {
            Ok(Vec::new())
        }
        fn get_kmer_size(&self) -> usize {
            31
        }
        fn get_nb_genomes(&self) -> usize {
            0
        }
    }

    // counts opens, fails on locators whose path starts with /broken
    #[derive(Default)]
    struct CountingOpener {
        nb_open : AtomicUsize,
    }

    impl IndexOpener for CountingOpener {
        fn open(&self, _catalogue : &str, locator : &CatalogueLocator, _kmer_size : usize) -> Result<Arc<dyn GenomicIndex>, EngineError> {
            self.nb_open.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            if locator.get_path().starts_with("/broken") {
                return Err(EngineError::Open { path : locator.get_path().display().to_string(), reason : "corrupted".to_string() });
            }
            Ok(Arc::new(EmptyIndex))
        }
    }

    fn registry(opener : Arc<CountingOpener>) -> IndexRegistry {
        let mut config = GatewayConfig::default();
        config.add_catalogue("marine1.0", CatalogueLocator::new("/idx/marine"));
        config.add_catalogue("bad1.0", CatalogueLocator::new("/broken/idx"));
        IndexRegistry::new(Arc::new(ConfigStore::from_config(config)), opener)
    }

    #[test]
    fn lazy_open_once() {
        let opener = Arc::new(CountingOpener::default());
        let registry = registry(opener.clone());
        assert_eq!(opener.nb_open.load(Ordering::SeqCst), 0);
        registry.get("marine1.0").unwrap();
        registry.get("marine1.0").unwrap();
        assert_eq!(opener.nb_open.load(Ordering::SeqCst), 1);
        assert_eq!(registry.snapshot().opened(), vec!["marine1.0".to_string()]);
    }

    #[test]
    fn concurrent_first_access_opens_once() {
        let opener = Arc::new(CountingOpener::default());
        let registry = Arc::new(registry(opener.clone()));
        let handles : Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.get("marine1.0").is_ok())
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap());
        }
        assert_eq!(opener.nb_open.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn not_found_and_open_failed() {
        let opener = Arc::new(CountingOpener::default());
        let registry = registry(opener.clone());
        assert!(matches!(registry.get("nope0.0"), Err(CatalogueError::NotFound(id)) if id == "nope0.0"));
        assert_eq!(opener.nb_open.load(Ordering::SeqCst), 0);
        assert!(matches!(registry.get("bad1.0"), Err(CatalogueError::OpenFailed { .. })));
        // a failed open is retried on next access
        assert!(registry.get("bad1.0").is_err());
        assert_eq!(opener.nb_open.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn invalidate_picks_up_new_catalogues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genogate.yaml");
        std::fs::write(&path, "min_len: 50\nmax_len: 500\nindices:\n  a1.0: /idx/a\n").unwrap();
        let store = Arc::new(ConfigStore::open(ConfigSource::new(Some(path.clone()))).unwrap());
        let opener = Arc::new(CountingOpener::default());
        let registry = IndexRegistry::new(store, opener.clone());
        registry.get("a1.0").unwrap();
        assert!(matches!(registry.get("b1.0"), Err(CatalogueError::NotFound(_))));
        let old_epoch = registry.snapshot();
        //
        std::fs::write(&path, "min_len: 50\nmax_len: 500\nindices:\n  a1.0: /idx/a\n  b1.0: /idx/b\n").unwrap();
        let config = registry.invalidate_all().unwrap();
        assert_eq!(config.catalogue_ids().count(), 2);
        assert!(registry.snapshot().opened().is_empty());
        registry.get("b1.0").unwrap();
        registry.get("a1.0").unwrap();
        assert_eq!(opener.nb_open.load(Ordering::SeqCst), 3);
        // the old epoch is untouched
        assert!(!old_epoch.get_config().has_catalogue("b1.0"));
        //
        std::fs::write(&path, "indices: [").unwrap();
        assert!(registry.invalidate_all().is_err());
        assert_eq!(registry.snapshot().get_config().catalogue_ids().count(), 2);
        assert_eq!(registry.snapshot().opened().len(), 2);
    }
} // end of mod tests
