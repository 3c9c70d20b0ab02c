//! Error types for the catalog API client

use std::fmt;

/// Errors that can occur when talking to the catalog API
#[derive(Debug)]
pub enum CatalogError {
    /// HTTP request or body transfer failed
    Http(Box<reqwest::Error>),
    /// Server answered with a non-success status
    Status { status: u16, url: String },
    /// Base URL could not be parsed
    InvalidUrl(String),
    /// API token cannot be used as a header value
    InvalidToken,
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(e) => write!(f, "Catalog HTTP error: {}", e),
            Self::Status { status, url } => {
                write!(f, "Catalog returned status {} for {}", status, url)
            }
            Self::InvalidUrl(msg) => write!(f, "Invalid catalog URL: {}", msg),
            Self::InvalidToken => write!(f, "API token contains invalid header characters"),
        }
    }
}

impl std::error::Error for CatalogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Http(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(Box::new(e))
    }
}

/// Result type for catalog API operations
pub type Result<T> = std::result::Result<T, CatalogError>;
