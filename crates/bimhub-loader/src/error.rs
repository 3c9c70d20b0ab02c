//! Error types for family acquisition
//!
//! The `Display` output of every variant is the message handed to the
//! completion callback, so it is written for the end user.

use asset_blob_cache::CacheError;
use std::fmt;

#[derive(Debug)]
pub enum LoaderError {
    /// The asset reference cannot be acted on
    Input(String),
    /// Fetching the asset failed
    Transfer(String),
    /// Writing the asset to the cache failed
    Storage(Box<CacheError>),
    /// The transactional load failed or was cancelled; already rolled back
    Apply(String),
    /// No document, no file, or no privileged context to run on
    Environment(String),
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderError::Input(msg) => write!(f, "{}", msg),
            LoaderError::Transfer(msg) => write!(f, "Download failed: {}", msg),
            LoaderError::Storage(err) => write!(f, "Failed to save file: {}", err),
            LoaderError::Apply(msg) => write!(f, "{}", msg),
            LoaderError::Environment(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for LoaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoaderError::Storage(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<CacheError> for LoaderError {
    fn from(err: CacheError) -> Self {
        match err {
            // The download broke off while being written out
            CacheError::Stream(source) => LoaderError::Transfer(source.to_string()),
            other => LoaderError::Storage(Box::new(other)),
        }
    }
}

pub type Result<T> = std::result::Result<T, LoaderError>;
