//! The gateway facade, the only surface http or cli glue has to call.
//!
//! A [Gateway] owns the configuration store, the index registry and the metadata store. It is built
//! once at startup and shared (it is Sync) by all request handlers.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;

use crate::answer::{enrich, SearchResponse};
use crate::dispatch::{dispatch, DispatchError};
use crate::dna::sequence::{SequenceQuery, ValidationError};
use crate::engine::{IndexOpener, KmerSetOpener};
use crate::metadata::{JsonMetadataStore, MetadataStore};
use crate::registry::IndexRegistry;
use crate::utils::parameters::{ConfigError, ConfigSource, ConfigStore, GatewayConfig, PipelineMode};

/// fraction of k-mers that must be present for a match when the request does not say
pub const DEFAULT_THRESHOLD : f64 = 0.4;

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

/// A search request as received from clients
#[derive(Clone, Debug, Deserialize)]
pub struct SearchRequest {
    /// the fasta sequence to search
    pub seq : String,
    #[serde(default = "default_threshold")]
    pub threshold : f64,
    /// ask for engine scores when the engine gives some
    #[serde(default)]
    pub score : bool,
    /// catalogue ids to restrict the search to, none or empty for all
    #[serde(default)]
    pub catalogues_filter : Option<Vec<String>>,
}

impl SearchRequest {
    pub fn new(seq : &str) -> Self {
        SearchRequest { seq : seq.to_string(), threshold : DEFAULT_THRESHOLD, score : false, catalogues_filter : None }
    }

    pub fn threshold(mut self, threshold : f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn score(mut self, score : bool) -> Self {
        self.score = score;
        self
    }

    pub fn catalogues(mut self, catalogues : &[&str]) -> Self {
        self.catalogues_filter = Some(catalogues.iter().map(|c| c.to_string()).collect());
        self
    }
} // end of impl SearchRequest

//=====================================================================================

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// malformed request, see field
    Invalid,
    /// request names a catalogue that is not configured
    UnknownCatalogue,
    /// an index engine failed
    SearchFailed,
}

/// Error returned to clients, every kind is a client error (a 4xx for http glue).
/// Neither the message nor the error source carry engine diagnostics, the cause is only reachable
/// through [GatewayError::get_cause] for logs.
#[derive(Debug, thiserror::Error)]
#[error("{field} : {message}")]
pub struct GatewayError {
    field : String,
    message : String,
    kind : GatewayErrorKind,
    cause : Option<Box<dyn Error + Send + Sync>>,
}

impl GatewayError {
    pub fn get_field(&self) -> &str {
        &self.field
    }

    pub fn get_message(&self) -> &str {
        &self.message
    }

    pub fn get_kind(&self) -> GatewayErrorKind {
        self.kind
    }

    /// internal cause, for operators
    pub fn get_cause(&self) -> Option<&(dyn Error + Send + Sync)> {
        self.cause.as_deref()
    }

    /// true if an index engine failed, the cause is then worth an operator log
    pub fn is_engine_fault(&self) -> bool {
        self.kind == GatewayErrorKind::SearchFailed
    }
} // end of impl GatewayError

impl From<ValidationError> for GatewayError {
    fn from(e : ValidationError) -> Self {
        GatewayError { field : e.get_field().to_string(), message : e.get_message().to_string(), kind : GatewayErrorKind::Invalid, cause : None }
    }
}

impl From<DispatchError> for GatewayError {
    fn from(e : DispatchError) -> Self {
        match e {
            DispatchError::UnknownCatalogue(id) => GatewayError {
                field : "catalogue_filter".to_string(),
                message : format!("Catalogue {} is not available.", id),
                kind : GatewayErrorKind::UnknownCatalogue,
                cause : None,
            },
            failed @ DispatchError::SearchFailed { .. } => GatewayError {
                field : "search failed".to_string(),
                message : "Your search could not be handled. Did your query contain characters other than ACTG?".to_string(),
                kind : GatewayErrorKind::SearchFailed,
                cause : Some(Box::new(failed)),
            },
        }
    }
}

//=====================================================================================

pub struct Gateway {
    registry : IndexRegistry,
    /// a store given at construction, takes precedence over the configured one
    metadata_override : Option<Arc<dyn MetadataStore>>,
    /// configured store, opened on first use, keyed by its path
    metadata : Mutex<Option<(PathBuf, Arc<dyn MetadataStore>)>>,
}

impl Gateway {
    pub fn new(config_store : Arc<ConfigStore>, opener : Arc<dyn IndexOpener>) -> Self {
        Gateway { registry : IndexRegistry::new(config_store, opener), metadata_override : None, metadata : Mutex::new(None) }
    }

    /// gateway configured from GENOGATE_CONFIG, serving catalogues built by the index subcommand.
    /// A malformed configuration is an error, it is up to the caller to stop.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config_store = ConfigStore::open(ConfigSource::from_env())?;
        Ok(Gateway::new(Arc::new(config_store), Arc::new(KmerSetOpener)))
    }

    pub fn with_metadata_store(mut self, store : Arc<dyn MetadataStore>) -> Self {
        self.metadata_override = Some(store);
        self
    }

    /// configuration currently served
    pub fn get_config(&self) -> Arc<GatewayConfig> {
        self.registry.snapshot().get_config().clone()
    }

    pub fn get_registry(&self) -> &IndexRegistry {
        &self.registry
    }

    fn metadata_store(&self, config : &GatewayConfig) -> Option<Arc<dyn MetadataStore>> {
        if let Some(store) = &self.metadata_override {
            return Some(store.clone());
        }
        let path = config.get_metadata_store()?;
        let mut cached = self.metadata.lock();
        if let Some((cached_path, store)) = cached.as_ref() {
            if cached_path.as_path() == path {
                return Some(store.clone());
            }
        }
        match JsonMetadataStore::open(path) {
            Ok(store) => {
                let store : Arc<dyn MetadataStore> = Arc::new(store);
                *cached = Some((path.to_path_buf(), store.clone()));
                Some(store)
            }
            Err(e) => {
                log::error!("metadata store {:?} unavailable, answering without metadata : {}", path, e);
                None
            }
        }
    } // end of metadata_store

    /// Search a DNA sequence against the configured catalogues.
    pub fn search(&self, request : &SearchRequest) -> Result<SearchResponse, GatewayError> {
        // one epoch for the whole request : config and indexes stay coherent across a clear_cache
        let epoch = self.registry.snapshot();
        let config = epoch.get_config();
        log::info!(
            "new request, raw length {}, threshold {}, score {}, catalogues {:?}",
            request.seq.len(),
            request.threshold,
            request.score,
            request.catalogues_filter
        );
        //
        let query =
            SequenceQuery::new(&request.seq, request.threshold, request.score, request.catalogues_filter.as_deref(), config)?;
        log::debug!("sequence {}", query.get_cleaned());
        let hits = dispatch(&query, &epoch).map_err(|e| {
            if let DispatchError::SearchFailed { .. } = e {
                log::error!("search failed : {}", e);
            }
            GatewayError::from(e)
        })?;
        //
        let store = match config.get_pipeline() {
            PipelineMode::ScoreRanked => self.metadata_store(config),
            PipelineMode::DerivedCount => None,
        };
        let results = enrich(&query, hits, config.get_pipeline(), store.as_deref());
        log::info!("returning {} results", results.len());
        Ok(SearchResponse::new(&query, results))
    } // end of search

    /// Clear the cached config and indexes, so that catalogues added to the configuration are served
    /// without restarting. On a bad configuration the current state stays in service and the error is returned.
    pub fn clear_cache(&self) -> Result<(), ConfigError> {
        log::info!("clearing config cache and recreating index registry");
        let config = self.registry.invalidate_all().map_err(|e| {
            log::warn!("config reload failed, keeping current config : {}", e);
            e
        })?;
        *self.metadata.lock() = None;
        log::info!("new config : {:?}", config);
        let ids : Vec<&String> = config.catalogue_ids().collect();
        log::info!("new registry catalogues : {:?}", ids);
        Ok(())
    } // end of clear_cache

    /// path of the configuration file, if any
    pub fn get_config_path(&self) -> Option<&Path> {
        self.registry.get_config_store().get_source().get_path()
    }
} // end of impl Gateway

//=====================================================================================

// end of mod tests
