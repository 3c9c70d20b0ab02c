//! Error types for the bimhub CLI

use std::fmt;

#[derive(Debug)]
pub enum CliError {
    Catalog(Box<catalog_api::CatalogError>),
    Cache(Box<asset_blob_cache::CacheError>),
    Io(Box<std::io::Error>),
    Config(String),
    /// The family could not be loaded; the message was already reported
    Load(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Catalog(err) => write!(f, "Catalog error: {}", err),
            CliError::Cache(err) => write!(f, "Cache error: {}", err),
            CliError::Io(err) => write!(f, "IO error: {}", err),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Load(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Catalog(err) => Some(err.as_ref()),
            CliError::Cache(err) => Some(err.as_ref()),
            CliError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<catalog_api::CatalogError> for CliError {
    fn from(err: catalog_api::CatalogError) -> Self {
        CliError::Catalog(Box::new(err))
    }
}

impl From<asset_blob_cache::CacheError> for CliError {
    fn from(err: asset_blob_cache::CacheError) -> Self {
        CliError::Cache(Box::new(err))
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io(Box::new(err))
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Config(err.to_string())
    }
}

impl From<tracing_subscriber::filter::ParseError> for CliError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        CliError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CliError>;
