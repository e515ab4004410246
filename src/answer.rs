//! constains answer to requests
//!
//! Raw hits coming from dispatch are turned into the response in one of two pipelines :
//! - derived count : the number of query k-mers is l-k+1 where l is the cleaned query length and k the
//!   k-mer size of the catalogue of the hit. Hits keep dispatch order, no metadata.
//! - score ranked : the engine counts are used, hits are sorted by decreasing percentage of k-mers
//!   found and merged with their metadata record. When the request has a catalogue filter, hits without
//!   metadata or whose metadata declares another catalogue are dropped.

use serde::Serialize;
use serde_json::Value;

use crate::dispatch::TaggedHit;
use crate::dna::sequence::SequenceQuery;
use crate::metadata::{catalogue_of, MetadataStore};
use crate::utils::parameters::PipelineMode;

/// number of k-mers of size kmer_size in a sequence of length seq_len
pub fn derived_total_kmers(seq_len : usize, kmer_size : usize) -> usize {
    (seq_len + 1).saturating_sub(kmer_size)
}

/// 100 * found / total rounded to 2 decimals, 0 if total is 0
pub fn percent_kmers_found(found : usize, total : usize) -> f64 {
    if total == 0 {
        return 0.;
    }
    (100. * found as f64 / total as f64 * 100.).round() / 100.
}

/// A hit as returned to clients
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SerializedHit {
    genome : String,
    num_kmers : usize,
    num_kmers_found : usize,
    percent_kmers_found : f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    score : Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pvalue : Option<f64>,
}

impl SerializedHit {
    fn new(tagged : &TaggedHit, num_kmers : usize, want_score : bool) -> Self {
        let hit = tagged.get_hit();
        SerializedHit {
            genome : hit.get_sample_id().to_string(),
            num_kmers,
            num_kmers_found : hit.get_kmers_matched(),
            percent_kmers_found : percent_kmers_found(hit.get_kmers_matched(), num_kmers),
            score : if want_score { hit.get_score() } else { None },
            pvalue : if want_score { hit.get_pvalue() } else { None },
        }
    }

    pub fn get_genome(&self) -> &str {
        &self.genome
    }

    pub fn get_num_kmers(&self) -> usize {
        self.num_kmers
    }

    pub fn get_num_kmers_found(&self) -> usize {
        self.num_kmers_found
    }

    pub fn get_percent_kmers_found(&self) -> f64 {
        self.percent_kmers_found
    }

    pub fn get_score(&self) -> Option<f64> {
        self.score
    }
} // end of impl SerializedHit

/// An entry of the response : a bare hit (derived count pipeline) or a hit with its metadata record,
/// an empty object if there is none (score ranked pipeline).
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResultEntry {
    Hit(SerializedHit),
    Enriched { bigsi : SerializedHit, mgnify : Value },
}

impl ResultEntry {
    pub fn get_hit(&self) -> &SerializedHit {
        match self {
            ResultEntry::Hit(hit) => hit,
            ResultEntry::Enriched { bigsi, .. } => bigsi,
        }
    }

    pub fn get_metadata(&self) -> Option<&Value> {
        match self {
            ResultEntry::Hit(_) => None,
            ResultEntry::Enriched { mgnify, .. } => Some(mgnify),
        }
    }
}

/// The answer to a request : the cleaned query echoed back, the threshold and the results
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchResponse {
    query : String,
    threshold : f64,
    results : Vec<ResultEntry>,
}

impl SearchResponse {
    pub fn new(query : &SequenceQuery, results : Vec<ResultEntry>) -> Self {
        SearchResponse { query : query.get_cleaned().to_string(), threshold : query.get_threshold(), results }
    }

    pub fn get_query(&self) -> &str {
        &self.query
    }

    pub fn get_threshold(&self) -> f64 {
        self.threshold
    }

    pub fn get_results(&self) -> &[ResultEntry] {
        &self.results
    }
} // end of impl SearchResponse

//=====================================================================================

fn lookup(store : Option<&dyn MetadataStore>, sample_id : &str) -> Option<Value> {
    let store = store?;
    match store.get(sample_id) {
        Ok(record) => record,
        Err(e) => {
            log::error!("metadata lookup failed for {} : {}", sample_id, e);
            None
        }
    }
}

/// serializes hits of dispatch, in derived count mode store is not used.
pub fn enrich(query : &SequenceQuery, hits : Vec<TaggedHit>, mode : PipelineMode, store : Option<&dyn MetadataStore>) -> Vec<ResultEntry> {
    match mode {
        PipelineMode::DerivedCount => hits
            .iter()
            .map(|tagged| {
                let num_kmers = derived_total_kmers(query.get_len(), tagged.get_kmer_size());
                ResultEntry::Hit(SerializedHit::new(tagged, num_kmers, query.want_score()))
            })
            .collect(),
        PipelineMode::ScoreRanked => {
            let mut ranked : Vec<SerializedHit> = hits
                .iter()
                .map(|tagged| SerializedHit::new(tagged, tagged.get_hit().get_total_kmers(), query.want_score()))
                .collect();
            // stable, equal percentages keep dispatch order
            ranked.sort_by(|a, b| b.percent_kmers_found.total_cmp(&a.percent_kmers_found));
            //
            let filter = query.get_catalogue_filter();
            let mut entries = Vec::<ResultEntry>::with_capacity(ranked.len());
            for hit in ranked {
                let record = lookup(store, &hit.genome);
                if let Some(filter) = filter {
                    let member = record.as_ref().and_then(catalogue_of).map(|c| filter.contains(c)).unwrap_or(false);
                    if !member {
                        log::trace!("hit {} dropped by catalogue filter", hit.genome);
                        continue;
                    }
                }
                let mgnify = record.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
                entries.push(ResultEntry::Enriched { bigsi : hit, mgnify });
            }
            entries
        }
    }
} // end of enrich

//=====================================================================================

// end of mod tests
