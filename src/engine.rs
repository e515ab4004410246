//! The interface between the gateway and genomic index engines.
//!
//! An engine answers a cleaned sequence and a threshold (fraction of the query k-mers a genome must
//! contain) with a list of raw hits. How it indexes k-mers is its own business.

use std::sync::Arc;

use crate::dna::kmerindex::KmerSetIndex;
use crate::utils::parameters::CatalogueLocator;

/// A hit as returned by an engine, read only for the rest of the pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct RawHit {
    /// genome (sample) identifier
    sample_id : String,
    /// number of query k-mers found in the genome
    kmers_matched : usize,
    /// number of k-mers in the query, as counted by the engine
    total_kmers : usize,
    /// fractional match score for engines reporting one
    score : Option<f64>,
    pvalue : Option<f64>,
} // end of RawHit

impl RawHit {
    pub fn new(sample_id : &str, kmers_matched : usize, total_kmers : usize) -> Self {
        RawHit { sample_id : sample_id.to_string(), kmers_matched, total_kmers, score : None, pvalue : None }
    }

    pub fn with_score(mut self, score : f64, pvalue : Option<f64>) -> Self {
        self.score = Some(score);
        self.pvalue = pvalue;
        self
    }

    pub fn get_sample_id(&self) -> &str {
        &self.sample_id
    }

    pub fn get_kmers_matched(&self) -> usize {
        self.kmers_matched
    }

    pub fn get_total_kmers(&self) -> usize {
        self.total_kmers
    }

    pub fn get_score(&self) -> Option<f64> {
        self.score
    }

    pub fn get_pvalue(&self) -> Option<f64> {
        self.pvalue
    }
} // end of impl RawHit

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("could not open index {path} : {reason}")]
    Open { path : String, reason : String },
    #[error("k-mer size mismatch for index {path} : catalogue declares {declared}, index was built with {built}")]
    KmerSizeMismatch { path : String, declared : usize, built : usize },
    #[error("search failed : {0}")]
    Search(String),
}

/// Search capability of an opened index.
pub trait GenomicIndex : Send + Sync {
    /// returns hits having at least a fraction threshold of the k-mers of sequence.
    fn search(&self, sequence : &str, threshold : f64) -> Result<Vec<RawHit>, EngineError>;

    /// k-mer size the index was built with
    fn get_kmer_size(&self) -> usize;

    /// number of genomes in the index
    fn get_nb_genomes(&self) -> usize;
}

/// Opens (or constructs) the index of a catalogue from its locator.
/// kmer_size is the k-mer size the configuration expects for this catalogue.
pub trait IndexOpener : Send + Sync {
    fn open(&self, catalogue : &str, locator : &CatalogueLocator, kmer_size : usize) -> Result<Arc<dyn GenomicIndex>, EngineError>;
}

/// Opener for catalogues built by the index subcommand.
#[derive(Copy, Clone, Debug, Default)]
pub struct KmerSetOpener;

impl IndexOpener for KmerSetOpener {
    fn open(&self, catalogue : &str, locator : &CatalogueLocator, kmer_size : usize) -> Result<Arc<dyn GenomicIndex>, EngineError> {
        log::info!("opening catalogue {} from {:?}", catalogue, locator.get_path());
        let index = KmerSetIndex::open(locator.get_path(), kmer_size, locator.get_flavour())?;
        Ok(Arc::new(index))
    }
} // end of impl IndexOpener for KmerSetOpener
