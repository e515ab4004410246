//! This file contains directory exploration and fasta file selection, used when building a catalogue.

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    #[error("{0:?} does not appear to be a directory")]
    NotADirectory(PathBuf),
    #[error("invalid glob filter {filter} : {source}")]
    Pattern {
        filter : String,
        #[source]
        source : glob::PatternError,
    },
    #[error("error while scanning {path:?} : {source}")]
    Scan {
        path : PathBuf,
        #[source]
        source : std::io::Error,
    },
}

// returns true if file name looks like a fasta file (possibly gzipped)
// filename are of type MGYG000296002.fna or GCA_000091165.1_genomic.fna.gz
pub fn is_fasta_file(path : &Path) -> bool {
    let filename = match path.file_name().and_then(|f| f.to_str()) {
        Some(name) => name,
        None => return false,
    };
    let filename = filename.strip_suffix(".gz").unwrap_or(filename);
    filename.ends_with(".fna") || filename.ends_with(".fa") || filename.ends_with(".fasta")
} // end of is_fasta_file

/// the name under which a genome file is known in a catalogue : the file name stripped of its fasta
/// (and gzip) extensions. MGYG000296002.fna.gz gives MGYG000296002.
pub fn genome_name(path : &Path) -> String {
    let filename = path.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default();
    let mut name = filename.as_str();
    name = name.strip_suffix(".gz").unwrap_or(name);
    for ext in [".fna", ".fasta", ".fa"] {
        if let Some(stripped) = name.strip_suffix(ext) {
            name = stripped;
            break;
        }
    }
    name.to_string()
} // end of genome_name

/// collects fasta files under genomes_dir matching glob_filter (for example "**/*.fna"), sorted by path.
/// Matching files without a fasta extension are skipped.
pub fn collect_fasta_files(genomes_dir : &Path, glob_filter : &str) -> Result<Vec<PathBuf>, FilesError> {
    if !genomes_dir.is_dir() {
        return Err(FilesError::NotADirectory(genomes_dir.to_path_buf()));
    }
    let dir_pattern = glob::Pattern::escape(&genomes_dir.to_string_lossy());
    let pattern = format!("{}/{}", dir_pattern.trim_end_matches('/'), glob_filter);
    log::debug!("collect_fasta_files pattern : {}", pattern);
    let entries = glob::glob(&pattern).map_err(|source| FilesError::Pattern { filter : glob_filter.to_string(), source })?;
    //
    let mut files = Vec::<PathBuf>::new();
    for entry in entries {
        let path = entry.map_err(|e| FilesError::Scan { path : e.path().to_path_buf(), source : std::io::Error::from(e) })?;
        if !path.is_file() {
            continue;
        }
        if is_fasta_file(&path) {
            files.push(path);
        } else {
            log::warn!("skipping {:?}, not a fasta file", path);
        }
    }
    files.sort();
    log::info!("found {} files matching {} in {:?}", files.len(), glob_filter, genomes_dir);
    //
    Ok(files)
} // end of collect_fasta_files

// end of mod tests
