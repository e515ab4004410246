//! genogate : a search gateway in front of k-mer genome catalogues.
//!
//! A request is a (possibly fasta formatted) nucleotide sequence. It is cleaned and validated,
//! dispatched to one or more catalogue indexes, and the hits are ranked, serialized and possibly
//! merged with genome metadata.
//!
//! - utils::parameters : gateway configuration and its reloadable store
//! - dna : sequence cleaning/validation and the reference k-mer index
//! - registry : lazy opening and caching of catalogue indexes
//! - dispatch : fan out of a query to catalogues
//! - answer : ranking, enrichment, serialization of hits
//! - metadata : genome metadata store and its ingestion
//! - gateway : the facade called by http or cli glue

pub mod utils;
pub mod dna;
pub mod engine;
pub mod registry;
pub mod dispatch;
pub mod metadata;
pub mod answer;
pub mod gateway;

pub use gateway::{Gateway, GatewayError, SearchRequest};
pub use answer::SearchResponse;
pub use utils::parameters::{GatewayConfig, ConfigStore};
