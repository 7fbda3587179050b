//! Error types for the shellcache library.

use thiserror::Error;

/// Errors that can occur during cache operations.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error during store or fetch operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization of a stored record failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The asset manifest is malformed.
    #[error("invalid manifest: {0}")]
    Manifest(String),

    /// Configuration file parsing failed.
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// The activation sequence failed and the cache was discarded.
    #[error("activation failed, cache discarded: {0}")]
    Activation(Box<Error>),
}

/// A specialized `Result` type for shellcache operations.
pub type Result<T> = std::result::Result<T, Error>;
