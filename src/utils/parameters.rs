//! structures related to gateway parameters.
//!
//! The configuration is a yaml file whose path is given by the environment variable GENOGATE_CONFIG.
//! It is loaded once and memoized in a [ConfigStore]. The store can be invalidated, the next access
//! then reloads the file. A failing reload keeps the last good configuration in service.
//!
//! Example of configuration file:
//!
//! ```yaml
//! min_len: 50
//! max_len: 50000
//! alphabet: strict
//! pipeline: derived_count
//! kmer_size: 31
//! indices:
//!   marine1.0: /data/indexes/marine1.0.genogate.json
//!   human-gut1.0:
//!     path: /data/indexes/human-gut1.0.genogate.json
//!     kmer_size: 31
//!     flavour: scored
//! metadata_store: /data/mgnify.cache.jsonl
//! ```

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::dna::sequence::Alphabet;

/// environment variable giving the path of the yaml configuration
pub const CONFIG_ENV_VAR : &str = "GENOGATE_CONFIG";

/// default minimal query length
pub const DEFAULT_MIN_LEN : usize = 50;
/// default maximal query length
pub const DEFAULT_MAX_LEN : usize = 50_000;
/// k-mer size used to build catalogues when nothing else is said
pub const DEFAULT_KMER_SIZE : usize = 31;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file {path:?} : {source}")]
    Io {
        path : PathBuf,
        #[source]
        source : std::io::Error,
    },
    #[error("could not parse config file {path:?} : {source}")]
    Parse {
        path : PathBuf,
        #[source]
        source : serde_yaml::Error,
    },
    #[error("invalid configuration : {0}")]
    Invalid(String),
}

//=====================================================================================

/// The kind of answer an index engine gives.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexFlavour {
    /// the engine reports only the number of k-mers found
    #[default]
    Counts,
    /// the engine also reports a fractional match score
    Scored,
}

/// How hits are post processed before being returned.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// number of query k-mers is derived from the query length and the k-mer size of the catalogue,
    /// no metadata merge.
    #[default]
    DerivedCount,
    /// hits are sorted by decreasing percentage of k-mers found and merged with metadata.
    ScoreRanked,
}

// what can be written in yaml for a catalogue : a path or a detailed description
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum LocatorSpec {
    Path(PathBuf),
    Detailed {
        path : PathBuf,
        #[serde(default)]
        kmer_size : Option<usize>,
        #[serde(default)]
        flavour : IndexFlavour,
    },
}

/// Where to find the index of a catalogue, and with which parameters it was built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "LocatorSpec")]
pub struct CatalogueLocator {
    path : PathBuf,
    /// k-mer size the index was built with. If None the global kmer_size of the configuration applies
    kmer_size : Option<usize>,
    flavour : IndexFlavour,
}

impl From<LocatorSpec> for CatalogueLocator {
    fn from(spec : LocatorSpec) -> Self {
        match spec {
            LocatorSpec::Path(path) => CatalogueLocator { path, kmer_size : None, flavour : IndexFlavour::Counts },
            LocatorSpec::Detailed { path, kmer_size, flavour } => CatalogueLocator { path, kmer_size, flavour },
        }
    }
}

impl CatalogueLocator {
    pub fn new(path : impl Into<PathBuf>) -> Self {
        CatalogueLocator { path : path.into(), kmer_size : None, flavour : IndexFlavour::Counts }
    }

    pub fn with_kmer_size(mut self, kmer_size : usize) -> Self {
        self.kmer_size = Some(kmer_size);
        self
    }

    pub fn with_flavour(mut self, flavour : IndexFlavour) -> Self {
        self.flavour = flavour;
        self
    }

    pub fn get_path(&self) -> &Path {
        &self.path
    }

    /// declared kmer size, if any
    pub fn get_kmer_size(&self) -> Option<usize> {
        self.kmer_size
    }

    pub fn get_flavour(&self) -> IndexFlavour {
        self.flavour
    }
} // end of impl CatalogueLocator

//=====================================================================================

fn default_kmer_size() -> usize {
    DEFAULT_KMER_SIZE
}

/// Gateway configuration. Immutable once loaded, replaced as a whole on reload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    min_len : usize,
    max_len : usize,
    /// catalogue id -> index locator. The BTreeMap gives the ascending order used in dispatch
    #[serde(default)]
    indices : BTreeMap<String, CatalogueLocator>,
    #[serde(default)]
    metadata_store : Option<PathBuf>,
    #[serde(default)]
    alphabet : Alphabet,
    #[serde(default)]
    pipeline : PipelineMode,
    #[serde(default = "default_kmer_size")]
    kmer_size : usize,
} // end of GatewayConfig

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig::new(DEFAULT_MIN_LEN, DEFAULT_MAX_LEN)
    }
}

impl GatewayConfig {
    pub fn new(min_len : usize, max_len : usize) -> Self {
        GatewayConfig {
            min_len,
            max_len,
            indices : BTreeMap::new(),
            metadata_store : None,
            alphabet : Alphabet::default(),
            pipeline : PipelineMode::default(),
            kmer_size : DEFAULT_KMER_SIZE,
        }
    }

    pub fn add_catalogue(&mut self, id : &str, locator : CatalogueLocator) {
        self.indices.insert(id.to_string(), locator);
    }

    pub fn set_alphabet(&mut self, alphabet : Alphabet) {
        self.alphabet = alphabet;
    }

    pub fn set_pipeline(&mut self, pipeline : PipelineMode) {
        self.pipeline = pipeline;
    }

    pub fn set_metadata_store(&mut self, path : impl Into<PathBuf>) {
        self.metadata_store = Some(path.into());
    }

    pub fn set_kmer_size(&mut self, kmer_size : usize) {
        self.kmer_size = kmer_size;
    }

    pub fn get_min_len(&self) -> usize {
        self.min_len
    }

    pub fn get_max_len(&self) -> usize {
        self.max_len
    }

    pub fn get_alphabet(&self) -> Alphabet {
        self.alphabet
    }

    pub fn get_pipeline(&self) -> PipelineMode {
        self.pipeline
    }

    pub fn get_metadata_store(&self) -> Option<&Path> {
        self.metadata_store.as_deref()
    }

    pub fn get_locator(&self, catalogue : &str) -> Option<&CatalogueLocator> {
        self.indices.get(catalogue)
    }

    pub fn has_catalogue(&self, catalogue : &str) -> bool {
        self.indices.contains_key(catalogue)
    }

    /// catalogue ids in ascending order
    pub fn catalogue_ids(&self) -> impl Iterator<Item = &String> {
        self.indices.keys()
    }

    /// k-mer size of a catalogue : the one declared in its locator, else the global one.
    pub fn kmer_size_for(&self, catalogue : &str) -> usize {
        self.indices.get(catalogue).and_then(|l| l.get_kmer_size()).unwrap_or(self.kmer_size)
    }

    /// checks invariants. Called after each load.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.min_len == 0 || self.max_len == 0 {
            return Err(ConfigError::Invalid(format!("min_len ({}) and max_len ({}) must be positive", self.min_len, self.max_len)));
        }
        if self.min_len > self.max_len {
            return Err(ConfigError::Invalid(format!("min_len {} is greater than max_len {}", self.min_len, self.max_len)));
        }
        if self.kmer_size == 0 {
            return Err(ConfigError::Invalid("kmer_size must be positive".to_string()));
        }
        for (id, locator) in &self.indices {
            if id.trim().is_empty() {
                return Err(ConfigError::Invalid("empty catalogue id".to_string()));
            }
            if locator.get_kmer_size() == Some(0) {
                return Err(ConfigError::Invalid(format!("catalogue {} declares a null kmer_size", id)));
            }
        }
        Ok(())
    } // end of check

    /// load a yaml configuration file and check it.
    pub fn load_yaml(filepath : &Path) -> Result<Self, ConfigError> {
        log::debug!("loading config file {:?}", filepath);
        let file = OpenOptions::new().read(true).open(filepath).map_err(|source| {
            log::error!("GatewayConfig load_yaml : could not open file {:?}", filepath.as_os_str());
            ConfigError::Io { path : filepath.to_path_buf(), source }
        })?;
        let reader = BufReader::new(file);
        let config : GatewayConfig = serde_yaml::from_reader(reader)
            .map_err(|source| ConfigError::Parse { path : filepath.to_path_buf(), source })?;
        config.check()?;
        //
        Ok(config)
    } // end of load_yaml
} // end of impl GatewayConfig

//=====================================================================================

/// Where the configuration comes from.
#[derive(Clone, Debug, Default)]
pub struct ConfigSource {
    path : Option<PathBuf>,
}

impl ConfigSource {
    pub fn new(path : Option<PathBuf>) -> Self {
        ConfigSource { path }
    }

    /// source named by the environment variable GENOGATE_CONFIG
    pub fn from_env() -> Self {
        ConfigSource { path : std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from) }
    }

    pub fn get_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// loads the configuration. If no file is set (or it does not exist) the default configuration is returned.
    pub fn load(&self) -> Result<GatewayConfig, ConfigError> {
        match self.path.as_deref() {
            Some(path) if path.is_file() => {
                let config = GatewayConfig::load_yaml(path)?;
                log::info!("config loaded from {:?} : {:?}", path, config);
                Ok(config)
            }
            _ => {
                log::warn!("no config file set, using default config. Set {} to override.", CONFIG_ENV_VAR);
                Ok(GatewayConfig::default())
            }
        }
    } // end of load
} // end of impl ConfigSource

//=====================================================================================

/// Memoized configuration.
///
/// The first load is done in [ConfigStore::open] and its failure is fatal to the caller.
/// After [ConfigStore::invalidate] the next access reloads the source; if that fails the last good
/// configuration is kept and the store stays stale so that a later access retries.
pub struct ConfigStore {
    source : ConfigSource,
    current : RwLock<Arc<GatewayConfig>>,
    stale : AtomicBool,
}

impl ConfigStore {
    /// initial load.
    pub fn open(source : ConfigSource) -> Result<Self, ConfigError> {
        let config = source.load()?;
        Ok(ConfigStore { source, current : RwLock::new(Arc::new(config)), stale : AtomicBool::new(false) })
    }

    /// a store with a fixed initial configuration, reloads use the default (absent) source.
    pub fn from_config(config : GatewayConfig) -> Self {
        ConfigStore { source : ConfigSource::default(), current : RwLock::new(Arc::new(config)), stale : AtomicBool::new(false) }
    }

    pub fn get_source(&self) -> &ConfigSource {
        &self.source
    }

    /// returns current configuration, reloading it if it was invalidated.
    /// A failed reload is logged and the previous configuration is returned.
    pub fn get(&self) -> Arc<GatewayConfig> {
        match self.try_get() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("config reload failed, keeping previous config : {}", e);
                self.current.read().clone()
            }
        }
    } // end of get

    /// returns current configuration, reloading it if it was invalidated and reporting reload failure.
    pub fn try_get(&self) -> Result<Arc<GatewayConfig>, ConfigError> {
        if !self.stale.load(Ordering::Acquire) {
            return Ok(self.current.read().clone());
        }
        let mut current = self.current.write();
        // another caller may have reloaded while we waited for the lock
        if !self.stale.load(Ordering::Acquire) {
            return Ok(current.clone());
        }
        let config = Arc::new(self.source.load()?);
        *current = config.clone();
        self.stale.store(false, Ordering::Release);
        Ok(config)
    } // end of try_get

    /// drops the memoized configuration, next access reloads.
    pub fn invalidate(&self) {
        log::debug!("ConfigStore invalidated");
        self.stale.store(true, Ordering::Release);
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }
} // end of impl ConfigStore

//=====================================================================================

// end of mod tests
