// src/error.rs
use std::io;
use thiserror::Error;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, ReporterError>;

/// Custom Error type for the beacon library
#[derive(Error, Debug)]
pub enum ReporterError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Encoding error: {0}")]
    Encode(String),

    #[error("Compression error: {0}")]
    Compress(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl ReporterError {
    /// Extraction failure for a named instrument accessor
    pub fn extraction(instrument: &str, accessor: &str, detail: impl std::fmt::Display) -> Self {
        ReporterError::Extraction(format!("{instrument}.{accessor}: {detail}"))
    }
}
