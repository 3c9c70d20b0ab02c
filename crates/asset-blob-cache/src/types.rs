//! Cache types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Index record for one cached blob
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Lowercase hex SHA-256 of the source URL
    pub key: String,
    pub path: PathBuf,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Breaks ties between entries touched within the same clock tick
    #[serde(skip)]
    pub(crate) access_seq: u64,
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
    pub capacity: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Index entries dropped because their file had disappeared
    pub stale_purges: u64,
}
