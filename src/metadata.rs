//! Genome metadata store.
//!
//! The store maps a genome accession to the json record the genomes api gives for it. It is a json
//! lines file, one record per line, keyed by the (trimmed) "id" field of the record. The gateway only
//! reads it. It is filled by [ingest] which follows the "next" links of the api pages until there is
//! none.

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("io error on metadata store {path:?} : {source}")]
    Io {
        path : PathBuf,
        #[source]
        source : std::io::Error,
    },
    #[error("bad json in {location} : {source}")]
    Json {
        location : String,
        #[source]
        source : serde_json::Error,
    },
    #[error("page {0} has already been ingested, the next links loop")]
    Loop(String),
}

/// read access to genome metadata
pub trait MetadataStore : Send + Sync {
    /// returns the record of sample_id, None if unknown
    fn get(&self, sample_id : &str) -> Result<Option<Value>, MetadataError>;
}

/// catalogue a genome record declares it belongs to
pub fn catalogue_of(record : &Value) -> Option<&str> {
    record.pointer("/relationships/catalogue/data/id").and_then(|v| v.as_str())
}

fn record_key(record : &Value) -> Option<String> {
    record.get("id").and_then(|v| v.as_str()).map(|id| id.trim().to_string())
}

//=====================================================================================

/// json lines store, loaded in memory on open. A later line overrides an earlier one with the same id.
pub struct JsonMetadataStore {
    path : PathBuf,
    records : HashMap<String, Value>,
}

impl JsonMetadataStore {
    pub fn open(path : &Path) -> Result<Self, MetadataError> {
        let file = OpenOptions::new().read(true).open(path).map_err(|source| {
            log::error!("JsonMetadataStore : could not open file {:?}", path.as_os_str());
            MetadataError::Io { path : path.to_path_buf(), source }
        })?;
        let reader = BufReader::new(file);
        let mut records = HashMap::<String, Value>::new();
        let mut nb_skipped = 0;
        let stream = serde_json::Deserializer::from_reader(reader).into_iter::<Value>();
        for value in stream {
            let value = value.map_err(|source| MetadataError::Json { location : path.display().to_string(), source })?;
            match record_key(&value) {
                Some(key) => {
                    records.insert(key, value);
                }
                None => nb_skipped += 1,
            }
        }
        if nb_skipped > 0 {
            log::warn!("JsonMetadataStore {:?} : {} records without id skipped", path, nb_skipped);
        }
        log::info!("JsonMetadataStore, reloaded nb records : {} from {:?}", records.len(), path);
        Ok(JsonMetadataStore { path : path.to_path_buf(), records })
    } // end of open

    pub fn get_path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
} // end of impl JsonMetadataStore

impl MetadataStore for JsonMetadataStore {
    fn get(&self, sample_id : &str) -> Result<Option<Value>, MetadataError> {
        Ok(self.records.get(sample_id.trim()).cloned())
    }
}

//=====================================================================================

/// where api pages come from. location is the first page or a "next" link of a previous page.
pub trait PageSource {
    fn fetch(&mut self, location : &str) -> Result<Value, MetadataError>;
}

/// pages dumped as json files in a directory, links are file names relative to it.
pub struct DirPageSource {
    dir : PathBuf,
}

impl DirPageSource {
    pub fn new(dir : impl Into<PathBuf>) -> Self {
        DirPageSource { dir : dir.into() }
    }
}

impl PageSource for DirPageSource {
    fn fetch(&mut self, location : &str) -> Result<Value, MetadataError> {
        let path = self.dir.join(location);
        log::info!("downloading : {:?}", path);
        let file = OpenOptions::new().read(true).open(&path).map_err(|source| MetadataError::Io { path : path.clone(), source })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| MetadataError::Json { location : location.to_string(), source })
    }
}

/// fetches pages from first on, following links.next until null, and writes every record of
/// their data array in a fresh store at store_path. Returns the number of records written.
pub fn ingest<S : PageSource>(source : &mut S, first : &str, store_path : &Path) -> Result<usize, MetadataError> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(store_path)
        .map_err(|source| MetadataError::Io { path : store_path.to_path_buf(), source })?;
    let mut writer = BufWriter::new(file);
    let io_error = |source| MetadataError::Io { path : store_path.to_path_buf(), source };
    //
    let mut visited = HashSet::<String>::new();
    let mut next = Some(first.to_string());
    let mut nb_records = 0;
    while let Some(location) = next.take() {
        if !visited.insert(location.clone()) {
            return Err(MetadataError::Loop(location));
        }
        let page = source.fetch(&location)?;
        let genomes = page.get("data").and_then(|d| d.as_array()).map(|d| d.as_slice()).unwrap_or(&[]);
        for genome in genomes {
            if record_key(genome).is_none() {
                log::warn!("record without id in page {}", location);
                continue;
            }
            serde_json::to_writer(&mut writer, genome).map_err(|source| MetadataError::Json { location : location.clone(), source })?;
            writer.write_all(b"\n").map_err(io_error)?;
            nb_records += 1;
        }
        next = page.pointer("/links/next").and_then(|v| v.as_str()).map(String::from);
    }
    writer.flush().map_err(io_error)?;
    log::info!("ingested {} records in {} pages into {:?}", nb_records, visited.len(), store_path);
    Ok(nb_records)
} // end of ingest

//=====================================================================================

// end of mod tests
