use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GeoError {
    #[error("malformed data: {0}")]
    MalformedData(String),

    #[error("not populated: {0}")]
    NotPopulated(String),

    #[error("study {study} must be of type eQTL, not {found}")]
    StudyTypeMismatch { study: String, found: String },

    #[error("{study} is a super study; read rows from its substudies: {substudies}")]
    SuperStudyAccess { study: String, substudies: String },

    #[error("request for {url} failed: {message}")]
    FetchHttp { url: String, message: String },

    #[error("request for {url} returned status {status}: {message}")]
    FetchStatus {
        url: String,
        status: u16,
        message: String,
    },

    #[error("no gene identity column is defined by platform {0}")]
    NoGeneColumn(String),

    #[error("column merge failed: {0}")]
    ColumnMerge(String),

    #[error("invalid GEO accession: {0}")]
    InvalidAccession(String),

    #[error("percentile must satisfy 0 < p <= 1, got {0}")]
    InvalidPercentile(f64),

    #[error("invalid subject pattern for {study}: {message}")]
    InvalidPattern { study: String, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GeoError {
    pub fn status(&self) -> Option<u16> {
        match self {
            GeoError::FetchStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        GeoError::MalformedData(message.into())
    }
}
