use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that may end a whole run.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Connector error: {0}")]
    Connector(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("no stable artifact in {dir} after {waited:?}")]
    TimedOut { dir: PathBuf, waited: Duration },
    #[error("failed to list {dir}: {source}")]
    Io {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unrecognized archive format")]
    UnrecognizedFormat,
    #[error("corrupt archive: {0}")]
    Corrupt(String),
    #[error("archive entry {name} exceeds {limit} bytes")]
    EntryTooLarge { name: String, limit: u64 },
    #[error("I/O error during extraction: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("document is empty")]
    Empty,
    #[error("document is not valid UTF-8: {0}")]
    Encoding(String),
    #[error("malformed markup: {0}")]
    Malformed(String),
    /// The feed's own envelope says the export failed.
    #[error("feed reported failure: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum TransformError {
    /// `shape` lists the top-level keys, for diagnosis.
    #[error("no identifiable items (top-level keys: {shape:?})")]
    NoIdentifiableItems { shape: Vec<String> },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}
