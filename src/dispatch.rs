//! Fan out of a validated query to catalogue indexes.
//!
//! Target catalogues are those of the query filter if any, else all configured catalogues, always in
//! ascending id order. All targets are checked against the configuration before any engine call : an
//! unknown catalogue fails the whole request. Indexes are then resolved one by one on the calling thread
//! and only the searches run in parallel. Results are concatenated
//! in target order and the first failing catalogue (in that order) fails the whole request.

use std::sync::Arc;

use rayon::prelude::*;

use crate::dna::sequence::SequenceQuery;
use crate::engine::{GenomicIndex, RawHit};
use crate::registry::{CatalogueError, Epoch};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("catalogue {0} is not available")]
    UnknownCatalogue(String),
    #[error("search failed on catalogue {catalogue} : {source}")]
    SearchFailed {
        catalogue : String,
        #[source]
        source : Box<dyn std::error::Error + Send + Sync>,
    },
}

/// a raw hit with the catalogue it comes from
#[derive(Clone, Debug)]
pub struct TaggedHit {
    catalogue : String,
    /// k-mer size of the catalogue index
    kmer_size : usize,
    hit : RawHit,
}

impl TaggedHit {
    pub fn new(catalogue : &str, kmer_size : usize, hit : RawHit) -> Self {
        TaggedHit { catalogue : catalogue.to_string(), kmer_size, hit }
    }

    pub fn get_catalogue(&self) -> &str {
        &self.catalogue
    }

    pub fn get_kmer_size(&self) -> usize {
        self.kmer_size
    }

    pub fn get_hit(&self) -> &RawHit {
        &self.hit
    }
}

/// catalogues a query is sent to, in dispatch order
pub fn target_catalogues(query : &SequenceQuery, epoch : &Epoch) -> Vec<String> {
    match query.get_catalogue_filter() {
        Some(filter) => filter.iter().cloned().collect(),
        None => epoch.get_config().catalogue_ids().cloned().collect(),
    }
}

// resolves the index of a catalogue, opening it if needed
fn resolve(epoch : &Epoch, catalogue : &str) -> Result<Arc<dyn GenomicIndex>, DispatchError> {
    epoch.get(catalogue).map_err(|e| match e {
        CatalogueError::NotFound(id) => DispatchError::UnknownCatalogue(id),
        other => DispatchError::SearchFailed { catalogue : catalogue.to_string(), source : Box::new(other) },
    })
}

fn search_catalogue(query : &SequenceQuery, catalogue : &str, index : &dyn GenomicIndex) -> Result<Vec<TaggedHit>, DispatchError> {
    let hits = index.search(query.get_cleaned(), query.get_threshold()).map_err(|e| {
        log::error!("caught error from index engine while searching catalogue {} : {}", catalogue, e);
        DispatchError::SearchFailed { catalogue : catalogue.to_string(), source : Box::new(e) }
    })?;
    log::debug!("catalogue {} : {} hits", catalogue, hits.len());
    let kmer_size = index.get_kmer_size();
    Ok(hits.into_iter().map(|hit| TaggedHit::new(catalogue, kmer_size, hit)).collect())
} // end of search_catalogue

/// sends query to its target catalogues and concatenates hits.
pub fn dispatch(query : &SequenceQuery, epoch : &Epoch) -> Result<Vec<TaggedHit>, DispatchError> {
    let targets = target_catalogues(query, epoch);
    if let Some(unknown) = targets.iter().find(|id| !epoch.get_config().has_catalogue(id)) {
        log::info!("request rejected, catalogue {} is not available", unknown);
        return Err(DispatchError::UnknownCatalogue(unknown.clone()));
    }
    log::debug!("dispatching to catalogues {:?}", targets);
    // indexes are opened on the calling thread, never from within the rayon pool
    let mut indexes = Vec::<(&str, Arc<dyn GenomicIndex>)>::with_capacity(targets.len());
    for catalogue in &targets {
        indexes.push((catalogue.as_str(), resolve(epoch, catalogue)?));
    }
    //
    let by_catalogue : Vec<Result<Vec<TaggedHit>, DispatchError>> =
        indexes.par_iter().map(|(catalogue, index)| search_catalogue(query, catalogue, index.as_ref())).collect();
    let mut hits = Vec::<TaggedHit>::new();
    for res in by_catalogue {
        hits.extend(res?);
    }
    log::info!("found {} matches in {} catalogues", hits.len(), targets.len());
    Ok(hits)
} // end of dispatch

//=====================================================================================

// end of mod tests
