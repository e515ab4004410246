//! A reference index engine : for each genome of a catalogue the exact set of its k-mers.
//!
//! A catalogue is described by a json manifest (file name ending with .genogate.json) built by
//! [build_catalogue] from a directory of fasta files. It records the k-mer size and the genome files.
//! Opening the catalogue parses the genomes with needletail and builds the k-mer sets in parallel.
//!
//! A query of length l has l-k+1 k-mers (duplicates counted). A genome is a hit if it contains at
//! least one of them and at least ceil(threshold * (l-k+1)) of them.
//! The counts flavour accepts only A,C,G,T queries. The scored flavour skips k-mers containing
//! ambiguous bases and reports the fraction of k-mers found as score.

use std::fs::OpenOptions;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use cpu_time::ProcessTime;
use fxhash::FxHashSet;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::engine::{EngineError, GenomicIndex, RawHit};
use crate::utils::files::{collect_fasta_files, genome_name, FilesError};
use crate::utils::parameters::IndexFlavour;

/// suffix appended to the output name given to the index subcommand
pub const MANIFEST_SUFFIX : &str = ".genogate.json";

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Files(#[from] FilesError),
    #[error("no fasta file matching {filter} in {dir:?}")]
    NoGenome { dir : PathBuf, filter : String },
    #[error("index {0:?} already exists, set clobber to overwrite it")]
    Exists(PathBuf),
    #[error("kmer size must be positive")]
    NullKmerSize,
    #[error("io error on {path:?} : {source}")]
    Io {
        path : PathBuf,
        #[source]
        source : std::io::Error,
    },
    #[error("could not write manifest {path:?} : {source}")]
    Json {
        path : PathBuf,
        #[source]
        source : serde_json::Error,
    },
}

/// one genome file of a catalogue
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManifestDocument {
    name : String,
    path : PathBuf,
}

/// description of a built catalogue, dumped in json.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogueManifest {
    kmer_size : usize,
    /// build date, rfc3339
    built : String,
    documents : Vec<ManifestDocument>,
}

impl CatalogueManifest {
    pub fn get_kmer_size(&self) -> usize {
        self.kmer_size
    }

    pub fn get_nb_documents(&self) -> usize {
        self.documents.len()
    }

    pub fn reload_json(filepath : &Path) -> Result<Self, EngineError> {
        let file = OpenOptions::new().read(true).open(filepath).map_err(|e| {
            log::error!("CatalogueManifest reload_json : could not open file {:?}", filepath.as_os_str());
            EngineError::Open { path : filepath.display().to_string(), reason : e.to_string() }
        })?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader)
            .map_err(|e| EngineError::Open { path : filepath.display().to_string(), reason : e.to_string() })
    } // end of reload_json
} // end of impl CatalogueManifest

//=====================================================================================

/// parameters of the index subcommand
#[derive(Clone, Debug)]
pub struct IndexBuildParams {
    /// directory containing the genomes of the catalogue, for example /path/to/mag_catalogues/marine1.0
    pub genomes_dir : PathBuf,
    /// output name, MANIFEST_SUFFIX is appended
    pub output : PathBuf,
    /// glob filter selecting fasta files within genomes_dir
    pub glob_filter : String,
    pub kmer_size : usize,
    /// overwrite an existing index
    pub clobber : bool,
}

impl IndexBuildParams {
    pub fn new(genomes_dir : impl Into<PathBuf>, output : impl Into<PathBuf>) -> Self {
        IndexBuildParams {
            genomes_dir : genomes_dir.into(),
            output : output.into(),
            glob_filter : "**/*.fna".to_string(),
            kmer_size : crate::utils::parameters::DEFAULT_KMER_SIZE,
            clobber : false,
        }
    }

    /// path of the manifest that will be produced
    pub fn manifest_path(&self) -> PathBuf {
        let mut name = self.output.clone().into_os_string();
        name.push(MANIFEST_SUFFIX);
        PathBuf::from(name)
    }
} // end of impl IndexBuildParams

/// builds a catalogue manifest from a directory of genomes. Returns the path of the manifest.
pub fn build_catalogue(params : &IndexBuildParams) -> Result<PathBuf, BuildError> {
    if params.kmer_size == 0 {
        return Err(BuildError::NullKmerSize);
    }
    let manifest_path = params.manifest_path();
    if manifest_path.exists() && !params.clobber {
        return Err(BuildError::Exists(manifest_path));
    }
    let start_t = SystemTime::now();
    let cpu_start = ProcessTime::now();
    //
    let files = collect_fasta_files(&params.genomes_dir, &params.glob_filter)?;
    if files.is_empty() {
        return Err(BuildError::NoGenome { dir : params.genomes_dir.clone(), filter : params.glob_filter.clone() });
    }
    log::info!("found {} fasta files to index", files.len());
    let mut documents = Vec::<ManifestDocument>::with_capacity(files.len());
    for file in files {
        let path = std::fs::canonicalize(&file).map_err(|source| BuildError::Io { path : file.clone(), source })?;
        documents.push(ManifestDocument { name : genome_name(&path), path });
    }
    let manifest = CatalogueManifest { kmer_size : params.kmer_size, built : chrono::Local::now().to_rfc3339(), documents };
    //
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&manifest_path)
        .map_err(|source| BuildError::Io { path : manifest_path.clone(), source })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &manifest)
        .map_err(|source| BuildError::Json { path : manifest_path.clone(), source })?;
    //
    let cpu_time = cpu_start.elapsed().as_secs_f32();
    let elapsed_t = start_t.elapsed().map(|d| d.as_secs_f32()).unwrap_or(0.);
    log::info!("built {:?}, nb genomes : {}, cpu time(s) {:.2}, system time(s) {:.2}", manifest_path, manifest.get_nb_documents(), cpu_time, elapsed_t);
    //
    Ok(manifest_path)
} // end of build_catalogue

//=====================================================================================

// k-mers of one genome
struct GenomeKmers {
    name : String,
    kmers : FxHashSet<Vec<u8>>,
}

fn load_genome(doc : &ManifestDocument, kmer_size : usize) -> Result<GenomeKmers, EngineError> {
    log::trace!("loading genome {} from {:?}", doc.name, doc.path);
    let open_error = |reason : String| EngineError::Open { path : doc.path.display().to_string(), reason };
    let mut reader = needletail::parse_fastx_file(&doc.path).map_err(|e| open_error(e.to_string()))?;
    let mut kmers = FxHashSet::<Vec<u8>>::default();
    // k-mers do not span record boundaries
    while let Some(record) = reader.next() {
        let record = record.map_err(|e| open_error(e.to_string()))?;
        let seq = record.seq().to_ascii_uppercase();
        for kmer in seq.windows(kmer_size) {
            if !kmers.contains(kmer) {
                kmers.insert(kmer.to_vec());
            }
        }
    }
    log::debug!("genome {} : {} distinct k-mers", doc.name, kmers.len());
    Ok(GenomeKmers { name : doc.name.clone(), kmers })
} // end of load_genome

fn is_acgt(kmer : &[u8]) -> bool {
    kmer.iter().all(|b| matches!(b, b'A' | b'C' | b'G' | b'T'))
}

/// the exact k-mer sets of all the genomes of a catalogue
pub struct KmerSetIndex {
    kmer_size : usize,
    flavour : IndexFlavour,
    genomes : Vec<GenomeKmers>,
}

impl KmerSetIndex {
    /// opens a catalogue manifest. kmer_size is the size the caller expects, it must be the one
    /// the catalogue was built with.
    pub fn open(manifest_path : &Path, kmer_size : usize, flavour : IndexFlavour) -> Result<Self, EngineError> {
        let start_t = SystemTime::now();
        let manifest = CatalogueManifest::reload_json(manifest_path)?;
        if manifest.kmer_size != kmer_size {
            log::error!("catalogue {:?} built with k = {}, configured with {}", manifest_path, manifest.kmer_size, kmer_size);
            return Err(EngineError::KmerSizeMismatch {
                path : manifest_path.display().to_string(),
                declared : kmer_size,
                built : manifest.kmer_size,
            });
        }
        let genomes = manifest
            .documents
            .par_iter()
            .map(|doc| load_genome(doc, manifest.kmer_size))
            .collect::<Result<Vec<GenomeKmers>, EngineError>>()?;
        //
        let elapsed_t = start_t.elapsed().map(|d| d.as_secs_f32()).unwrap_or(0.);
        log::info!("KmerSetIndex::open {:?}, nb genomes {}, system time(s) {:.2}", manifest_path, genomes.len(), elapsed_t);
        Ok(KmerSetIndex { kmer_size : manifest.kmer_size, flavour, genomes })
    } // end of open

    /// an index built directly from named sequences.
    pub fn from_sequences(kmer_size : usize, flavour : IndexFlavour, sequences : &[(&str, &str)]) -> Self {
        let genomes = sequences
            .iter()
            .map(|(name, seq)| {
                let seq = seq.as_bytes().to_ascii_uppercase();
                let kmers : FxHashSet<Vec<u8>> = seq.windows(kmer_size).map(|k| k.to_vec()).collect();
                GenomeKmers { name : name.to_string(), kmers }
            })
            .collect();
        KmerSetIndex { kmer_size, flavour, genomes }
    }

    pub fn get_flavour(&self) -> IndexFlavour {
        self.flavour
    }
} // end of impl KmerSetIndex

impl GenomicIndex for KmerSetIndex {
    fn search(&self, sequence : &str, threshold : f64) -> Result<Vec<RawHit>, EngineError> {
        let query = sequence.as_bytes().to_ascii_uppercase();
        if query.len() < self.kmer_size {
            log::debug!("query shorter than k = {}, no k-mer to search", self.kmer_size);
            return Ok(Vec::new());
        }
        let query_kmers : Vec<&[u8]> = query.windows(self.kmer_size).collect();
        let total_kmers = query_kmers.len();
        let searched : Vec<&[u8]> = match self.flavour {
            IndexFlavour::Counts => {
                if !is_acgt(&query) {
                    return Err(EngineError::Search("query contains bases other than A,C,G,T".to_string()));
                }
                query_kmers
            }
            IndexFlavour::Scored => query_kmers.into_iter().filter(|k| is_acgt(k)).collect(),
        };
        let min_matched = ((threshold * total_kmers as f64).ceil() as usize).max(1);
        //
        let mut hits : Vec<RawHit> = self
            .genomes
            .par_iter()
            .filter_map(|genome| {
                let matched = searched.iter().filter(|k| genome.kmers.contains(**k)).count();
                if matched < min_matched {
                    return None;
                }
                let hit = RawHit::new(&genome.name, matched, total_kmers);
                match self.flavour {
                    IndexFlavour::Counts => Some(hit),
                    IndexFlavour::Scored => Some(hit.with_score(matched as f64 / total_kmers as f64, None)),
                }
            })
            .collect();
        hits.sort_by(|a, b| {
            b.get_kmers_matched().cmp(&a.get_kmers_matched()).then_with(|| a.get_sample_id().cmp(b.get_sample_id()))
        });
        log::debug!("KmerSetIndex search, nb kmers {}, nb hits {}", total_kmers, hits.len());
        Ok(hits)
    } // end of search

    fn get_kmer_size(&self) -> usize {
        self.kmer_size
    }

    fn get_nb_genomes(&self) -> usize {
        self.genomes.len()
    }
} // end of impl GenomicIndex for KmerSetIndex

//=====================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    const GENOME : &str = "ACGTTGCAAGGCTTAACCGGTTAACGTACGGATCCA";

    #[test]
    fn counts_search() {
        log_init_test();
        let index = KmerSetIndex::from_sequences(5, IndexFlavour::Counts, &[("g1", GENOME), ("g2", "TTTTTTTTTTTTTTTTTT")]);
        let hits = index.search(&GENOME[0..20], 0.4).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].get_sample_id(), "g1");
        assert_eq!(hits[0].get_total_kmers(), 16);
        assert_eq!(hits[0].get_kmers_matched(), 16);
        assert!(hits[0].get_score().is_none());
        // lower case queries are accepted
        let hits = index.search(&GENOME[0..20].to_lowercase(), 0.4).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn threshold_filters() {
        let index = KmerSetIndex::from_sequences(4, IndexFlavour::Counts, &[("g1", "ACGTACGT")]);
        // query kmers : ACGT CGTA GTAC TACG ACGG CGGG : 4 of 6 found
        let hits = index.search("ACGTACGGG", 0.6).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].get_kmers_matched(), 4);
        assert!(index.search("ACGTACGGG", 0.7).unwrap().is_empty());
        // nothing found is never a hit
        assert!(index.search("GGGGGGGG", 0.).unwrap().is_empty());
    }

    #[test]
    fn counts_flavour_rejects_ambiguous_bases() {
        let index = KmerSetIndex::from_sequences(4, IndexFlavour::Counts, &[("g1", "ACGTACGT")]);
        assert!(matches!(index.search("ACGTNACGT", 0.4), Err(EngineError::Search(_))));
    }

    #[test]
    fn scored_flavour() {
        let index = KmerSetIndex::from_sequences(4, IndexFlavour::Scored, &[("g1", "ACGTACGT"), ("g2", "ACGTACCC")]);
        let hits = index.search("ACGTACGTN", 0.5).unwrap();
        // 6 query kmers, the last contains N
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].get_sample_id(), "g1");
        assert_eq!(hits[0].get_total_kmers(), 6);
        assert_eq!(hits[0].get_kmers_matched(), 5);
        assert!((hits[0].get_score().unwrap() - 5. / 6.).abs() < 1.0e-10);
        assert_eq!(hits[1].get_kmers_matched(), 4);
    }

    #[test]
    fn build_and_open_catalogue() {
        log_init_test();
        let genomes = tempfile::tempdir().unwrap();
        std::fs::write(genomes.path().join("MGYG1.fna"), format!(">contig_1\n{}\n{}\n", &GENOME[0..18], &GENOME[18..])).unwrap();
        std::fs::write(genomes.path().join("MGYG2.fna"), ">contig_1\nTTTTTTTTTTTTTTTTTTTT\n").unwrap();
        let out = tempfile::tempdir().unwrap();
        let mut params = IndexBuildParams::new(genomes.path(), out.path().join("test1.0"));
        params.kmer_size = 5;
        let manifest = build_catalogue(&params).unwrap();
        assert!(manifest.to_string_lossy().ends_with("test1.0.genogate.json"));
        // no overwrite without clobber
        assert!(matches!(build_catalogue(&params), Err(BuildError::Exists(_))));
        params.clobber = true;
        assert!(build_catalogue(&params).is_ok());
        //
        let index = KmerSetIndex::open(&manifest, 5, IndexFlavour::Counts).unwrap();
        assert_eq!(index.get_nb_genomes(), 2);
        assert_eq!(index.get_kmer_size(), 5);
        let hits = index.search(GENOME, 0.9).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].get_sample_id(), "MGYG1");
        // k-mers spanning the two lines of the record are found
        assert_eq!(hits[0].get_kmers_matched(), GENOME.len() - 5 + 1);
        //
        let mismatch = KmerSetIndex::open(&manifest, 31, IndexFlavour::Counts);
        assert!(matches!(mismatch, Err(EngineError::KmerSizeMismatch { declared : 31, built : 5, .. })));
    }

    #[test]
    fn build_needs_genomes() {
        let genomes = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let params = IndexBuildParams::new(genomes.path(), out.path().join("empty"));
        assert!(matches!(build_catalogue(&params), Err(BuildError::NoGenome { .. })));
    }
} // end of mod tests
