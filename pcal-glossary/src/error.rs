//! Error types for pcal-glossary
//!
//! Fatal errors (corpus, glossary, artifact, cache open) abort the run and
//! carry the path plus the underlying cause. Resolution and translation
//! errors are recoverable: the stages downgrade them to missing labels and a
//! warning, and they only surface here for logging and tests.

use std::path::PathBuf;
use thiserror::Error;

/// Corpus could not be read or is structurally invalid
#[derive(Debug, Error)]
pub enum CorpusReadError {
    #[error("Corpus file {path} could not be read: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corpus file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Corpus file {path} has unexpected structure: {reason}")]
    Structure { path: PathBuf, reason: String },
}

/// Glossary seed could not be loaded
#[derive(Debug, Error)]
pub enum GlossaryLoadError {
    #[error("Glossary file {path} could not be read: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Glossary file {path} is malformed: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Glossary file {path} has invalid entry '{entry}': {reason}")]
    InvalidEntry {
        path: PathBuf,
        entry: String,
        reason: String,
    },
}

/// Knowledge-base query failure (one batch)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Cancelled")]
    Cancelled,
}

impl ResolutionError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ResolutionError::Network(_) | ResolutionError::RateLimited => true,
            ResolutionError::Api(status, _) => *status >= 500,
            // A truncated body from an overloaded endpoint parses as garbage
            ResolutionError::Parse(_) => true,
            ResolutionError::Cancelled => false,
        }
    }
}

/// Translation provider failure (one request)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TranslationError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Quota exceeded")]
    QuotaExceeded,

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Provider returned an empty translation")]
    Empty,

    #[error("Cancelled")]
    Cancelled,
}

impl TranslationError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TranslationError::Network(_) | TranslationError::RateLimited => true,
            TranslationError::Api(status, _) => *status >= 500,
            TranslationError::Parse(_) => true,
            TranslationError::QuotaExceeded
            | TranslationError::Empty
            | TranslationError::Cancelled => false,
        }
    }
}

/// Artifact could not be written
#[derive(Debug, Error)]
pub enum ArtifactWriteError {
    #[error("Artifact {path} could not be written: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact {path} could not be serialized: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Translation cache failure
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Translation cache {path} could not be opened: {source}")]
    Open {
        path: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Translation cache error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Fatal pipeline error
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    CorpusRead(#[from] CorpusReadError),

    #[error(transparent)]
    GlossaryLoad(#[from] GlossaryLoadError),

    #[error(transparent)]
    ArtifactWrite(#[from] ArtifactWriteError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Service client could not be created: {0}")]
    Client(String),

    #[error(transparent)]
    Common(#[from] pcal_common::Error),
}

/// Result type for fatal pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
