//! cleaning and validation of request sequences.
//!
//! A request is a nucleotide sequence possibly given in fasta format (one header line, sequence split
//! on many lines). It is cleaned (header, newlines and blanks removed) then checked, first failure wins :
//! 1. only one sequence (at most one '>' in the raw text)
//! 2. all characters in the configured alphabet
//! 3. length within configured bounds
//! 4. threshold in [0,1]

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::utils::parameters::GatewayConfig;

/// Accepted nucleotide alphabet.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alphabet {
    /// A,C,G,T case insensitive
    #[default]
    Strict,
    /// A,C,G,T and the IUPAC ambiguity codes R,Y,M,K,S,W,H,B,V,D,N, case insensitive
    Iupac,
}

impl Alphabet {
    /// returns true if base c belongs to the alphabet
    pub fn accepts(&self, c : char) -> bool {
        match self {
            Alphabet::Strict => matches!(c.to_ascii_uppercase(), 'A' | 'C' | 'G' | 'T'),
            Alphabet::Iupac => matches!(
                c.to_ascii_uppercase(),
                'A' | 'T' | 'G' | 'C' | 'R' | 'Y' | 'M' | 'K' | 'S' | 'W' | 'H' | 'B' | 'V' | 'D' | 'N'
            ),
        }
    }
} // end of impl Alphabet

/// What went wrong in a request
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValidationKind {
    MultipleSequences,
    InvalidCharacters,
    Length,
    Threshold,
}

/// A client error, tagged with the name of the offending request field.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{field} : {message}")]
pub struct ValidationError {
    field : &'static str,
    kind : ValidationKind,
    message : String,
}

impl ValidationError {
    pub fn new(field : &'static str, kind : ValidationKind, message : String) -> Self {
        ValidationError { field, kind, message }
    }

    pub fn get_field(&self) -> &'static str {
        self.field
    }

    pub fn get_kind(&self) -> ValidationKind {
        self.kind
    }

    pub fn get_message(&self) -> &str {
        &self.message
    }
} // end of impl ValidationError

/// Clean a fasta sequence.
/// This removes the header line of the sequence (if followed by a newline), then newlines and any blank.
pub fn clean_fasta(raw : &str) -> String {
    let raw = raw.trim_start();
    let body = match raw.strip_prefix('>') {
        Some(header_and_body) => match header_and_body.find(|c : char| c == '\n' || c == '\r') {
            Some(pos) => &header_and_body[pos..],
            // a header alone is kept and will not pass the alphabet check
            None => raw,
        },
        None => raw,
    };
    body.chars().filter(|c| !c.is_whitespace()).collect()
} // end of clean_fasta

/// checks a cleaned sequence against the configuration. raw is needed to count fasta headers.
pub fn validate(raw : &str, cleaned : &str, config : &GatewayConfig) -> Result<(), ValidationError> {
    let nb_header = raw.matches('>').count();
    if nb_header > 1 {
        log::info!("request rejected, {} sequences found", nb_header);
        return Err(ValidationError::new(
            "seq",
            ValidationKind::MultipleSequences,
            "Multiple sequences were found, but this is not supported. Please supply a single sequence.".to_string(),
        ));
    }
    //
    let alphabet = config.get_alphabet();
    if let Some(c) = cleaned.chars().find(|c| !alphabet.accepts(*c)) {
        log::info!("request rejected, non-DNA char {:?} found", c);
        return Err(ValidationError::new(
            "seq",
            ValidationKind::InvalidCharacters,
            "The sequence contains characters not expected for a DNA sequence.".to_string(),
        ));
    }
    //
    let len = cleaned.chars().count();
    if len < config.get_min_len() || len > config.get_max_len() {
        log::info!(
            "request rejected, length {} out of bounds {}-{}",
            len,
            config.get_min_len(),
            config.get_max_len()
        );
        return Err(ValidationError::new(
            "seq",
            ValidationKind::Length,
            format!(
                "The sequence should be longer than {} and shorter than {}pb",
                config.get_min_len(),
                config.get_max_len()
            ),
        ));
    }
    Ok(())
} // end of validate

fn check_threshold(threshold : f64) -> Result<(), ValidationError> {
    if !(0. ..=1.).contains(&threshold) {
        log::info!("request rejected, threshold {} not in [0,1]", threshold);
        return Err(ValidationError::new(
            "threshold",
            ValidationKind::Threshold,
            format!("The threshold must be a fraction between 0 and 1, got {}", threshold),
        ));
    }
    Ok(())
}

/// A validated request. Never modified once built.
#[derive(Clone, Debug)]
pub struct SequenceQuery {
    cleaned : String,
    threshold : f64,
    want_score : bool,
    /// None means all configured catalogues
    catalogue_filter : Option<BTreeSet<String>>,
}

impl SequenceQuery {
    /// cleans and validates a request.
    /// Blank filter entries are dropped, an empty filter is the same as no filter.
    pub fn new(
        raw : &str,
        threshold : f64,
        want_score : bool,
        catalogue_filter : Option<&[String]>,
        config : &GatewayConfig,
    ) -> Result<Self, ValidationError> {
        let cleaned = clean_fasta(raw);
        validate(raw, &cleaned, config)?;
        check_threshold(threshold)?;
        let catalogue_filter = catalogue_filter
            .map(|ids| {
                ids.iter()
                    .map(|id| id.trim())
                    .filter(|id| !id.is_empty())
                    .map(String::from)
                    .collect::<BTreeSet<String>>()
            })
            .filter(|ids| !ids.is_empty());
        //
        Ok(SequenceQuery { cleaned, threshold, want_score, catalogue_filter })
    } // end of new

    pub fn get_cleaned(&self) -> &str {
        &self.cleaned
    }

    pub fn get_len(&self) -> usize {
        self.cleaned.len()
    }

    pub fn get_threshold(&self) -> f64 {
        self.threshold
    }

    pub fn want_score(&self) -> bool {
        self.want_score
    }

    pub fn get_catalogue_filter(&self) -> Option<&BTreeSet<String>> {
        self.catalogue_filter.as_ref()
    }
} // end of impl SequenceQuery

//=====================================================================================

// end of mod tests
