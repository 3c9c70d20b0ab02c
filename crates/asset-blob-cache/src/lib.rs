//! Content-addressed file cache for downloaded assets
//!
//! Blobs are stored in a single flat directory as `<sha256(url)><extension>`.
//! An in-memory index tracks size and access times; it is rebuilt from the
//! directory listing on startup, so no manifest file is kept. When the total
//! size exceeds the configured capacity, least recently accessed entries are
//! evicted until it fits again.

mod cache;
mod error;
mod types;

pub use cache::BlobCache;
pub use error::{CacheError, Result};
pub use types::{CacheEntry, CacheStats};
