//! gathers dna stuff : request sequences and the reference k-mer index

pub mod kmerindex;
pub mod sequence;
