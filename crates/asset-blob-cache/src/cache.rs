//! File-based blob caching with an in-memory index

use crate::error::{CacheError, Result};
use crate::types::{CacheEntry, CacheStats};
use chrono::{DateTime, Utc};
use futures_util::{stream, Stream, StreamExt};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::convert::Infallible;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prefix of in-flight writes; such files are never indexed
const TEMP_PREFIX: &str = "tmp_";
const DEFAULT_EXTENSION: &str = ".dat";
/// Length of a hex-encoded SHA-256 digest
const KEY_LEN: usize = 64;

/// A content-addressed blob cache keyed by source URL
pub struct BlobCache {
    /// In-memory index of cached entries, keyed by digest
    entries: RwLock<HashMap<String, CacheEntry>>,
    /// Flat directory holding `<key><extension>` files
    cache_dir: PathBuf,
    /// Maximum total size in bytes
    max_size: u64,
    /// Optional maximum entry age
    ttl: Option<chrono::Duration>,
    /// Sum of `size` over the index; only changed under the index write lock
    current_size: AtomicU64,
    access_clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    stale_purges: AtomicU64,
}

impl BlobCache {
    /// Create a cache with an empty index. Call [`BlobCache::init`] before use.
    pub fn new(cache_dir: PathBuf, max_size: u64, ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            cache_dir,
            max_size,
            ttl: ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok()),
            current_size: AtomicU64::new(0),
            access_clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            stale_purges: AtomicU64::new(0),
        }
    }

    /// Create the cache and rebuild its index from the directory contents
    pub async fn open(cache_dir: PathBuf, max_size: u64, ttl: Option<Duration>) -> Result<Self> {
        let cache = Self::new(cache_dir, max_size, ttl);
        cache.init().await?;
        Ok(cache)
    }

    /// Ensure the cache directory exists and warm the index from it
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.cache_dir).await?;
        let (index, total) = self.scan_directory().await?;
        let entries_len = index.len();

        {
            let mut entries = self.entries.write().await;
            *entries = index;
            self.current_size.store(total, Ordering::Relaxed);
        }

        info!(
            cache_dir = ?self.cache_dir,
            entries = entries_len,
            total_size = total,
            max_size = self.max_size,
            "Cache initialized"
        );
        Ok(())
    }

    /// Generate a cache key from a source URL
    pub fn cache_key(url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn capacity(&self) -> u64 {
        self.max_size
    }

    /// Look up the cached file for a URL.
    ///
    /// A hit refreshes the entry's access time. An entry whose file has
    /// disappeared is dropped from the index and reported as a miss.
    pub async fn lookup(&self, url: &str) -> Option<PathBuf> {
        let key = Self::cache_key(url);
        let mut entries = self.entries.write().await;

        let (path, expired) = match entries.get(&key) {
            Some(entry) => (entry.path.clone(), self.is_expired(entry)),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache miss");
                return None;
            }
        };

        if expired {
            debug!(key = %key, "Cache entry expired");
            self.remove_locked(&mut entries, &key).await;
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        match fs::try_exists(&path).await {
            Ok(true) => {
                let seq = self.next_access_seq();
                if let Some(entry) = entries.get_mut(&key) {
                    entry.last_accessed = Utc::now();
                    entry.access_seq = seq;
                }
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache hit");
                Some(path)
            }
            Ok(false) => {
                warn!(key = %key, path = ?path, "Cached file is missing, dropping index entry");
                self.purge_stale_locked(&mut entries, &key);
                None
            }
            Err(e) => {
                warn!(key = %key, path = ?path, error = %e, "Failed to stat cached file, dropping index entry");
                self.purge_stale_locked(&mut entries, &key);
                None
            }
        }
    }

    /// Store a blob held in memory
    pub async fn store(&self, url: &str, data: &[u8], extension: Option<&str>) -> Result<PathBuf> {
        let chunks = stream::iter([Ok::<&[u8], Infallible>(data)]);
        self.store_stream(url, chunks, extension).await
    }

    /// Store a blob from a stream of byte chunks.
    ///
    /// The bytes land in a temporary file first and are renamed into place
    /// only once the stream has ended, so the published file is always
    /// complete. If the stream fails the temporary file is removed and the
    /// index is left untouched.
    pub async fn store_stream<S, B, E>(
        &self,
        url: &str,
        mut chunks: S,
        extension: Option<&str>,
    ) -> Result<PathBuf>
    where
        S: Stream<Item = std::result::Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let key = Self::cache_key(url);
        let temp_path = self
            .cache_dir
            .join(format!("{}{}", TEMP_PREFIX, Uuid::new_v4().simple()));

        let size = match write_temp_file(&temp_path, &mut chunks).await {
            Ok(size) => size,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to write blob, discarding partial file");
                remove_file_quietly(&temp_path).await;
                return Err(e);
            }
        };

        self.publish(key, &temp_path, extension, size).await
    }

    /// Total bytes tracked by the index
    pub fn size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Delete every cached file and empty the index. Returns how many
    /// entries were dropped; individual deletion failures are only logged.
    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let removed = entries.len();

        for (key, entry) in entries.drain() {
            if let Err(e) = fs::remove_file(&entry.path).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!(key = %key, path = ?entry.path, error = %e, "Failed to delete cached file");
                }
            }
        }
        self.current_size.store(0, Ordering::Relaxed);

        info!(removed, "Cache cleared");
        removed
    }

    /// Get current cache statistics
    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        CacheStats {
            entries: entries.len(),
            total_size: self.current_size.load(Ordering::Relaxed),
            capacity: self.max_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            stale_purges: self.stale_purges.load(Ordering::Relaxed),
        }
    }

    /// Snapshot of a single index entry, without touching its access time
    pub async fn entry(&self, url: &str) -> Option<CacheEntry> {
        let key = Self::cache_key(url);
        self.entries.read().await.get(&key).cloned()
    }

    /// Move a completed temp file into place and record it in the index
    async fn publish(
        &self,
        key: String,
        temp_path: &Path,
        extension: Option<&str>,
        size: u64,
    ) -> Result<PathBuf> {
        let path = self
            .cache_dir
            .join(format!("{}{}", key, normalize_extension(extension)));

        let mut entries = self.entries.write().await;

        if let Err(e) = fs::rename(temp_path, &path).await {
            drop(entries);
            remove_file_quietly(temp_path).await;
            return Err(e.into());
        }

        let now = Utc::now();
        let entry = CacheEntry {
            key: key.clone(),
            path: path.clone(),
            size,
            created_at: now,
            last_accessed: now,
            access_seq: self.next_access_seq(),
        };

        if let Some(previous) = entries.insert(key.clone(), entry) {
            self.current_size.fetch_sub(previous.size, Ordering::Relaxed);
            if previous.path != path {
                remove_file_quietly(&previous.path).await;
            }
        }
        self.current_size.fetch_add(size, Ordering::Relaxed);
        debug!(key = %key, size, path = ?path, "Cached blob");

        self.evict_locked(&mut entries, &key).await;

        Ok(path)
    }

    /// Evict least recently accessed entries until the total fits the
    /// capacity. The entry that triggered the write is never a candidate.
    async fn evict_locked(&self, entries: &mut HashMap<String, CacheEntry>, keep: &str) {
        if self.current_size.load(Ordering::Relaxed) <= self.max_size {
            return;
        }

        let mut candidates: Vec<(DateTime<Utc>, u64, String)> = entries
            .iter()
            .filter(|(key, _)| key.as_str() != keep)
            .map(|(key, e)| (e.last_accessed, e.access_seq, key.clone()))
            .collect();
        candidates.sort();

        for (_, _, key) in candidates {
            if self.current_size.load(Ordering::Relaxed) <= self.max_size {
                break;
            }

            let Some(path) = entries.get(&key).map(|e| e.path.clone()) else {
                continue;
            };

            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(key = %key, path = ?path, error = %e, "Failed to delete evicted blob, skipping");
                    continue;
                }
            }

            if let Some(entry) = entries.remove(&key) {
                self.current_size.fetch_sub(entry.size, Ordering::Relaxed);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, size = entry.size, "Evicted least recently used cache entry");
            }
        }

        let total = self.current_size.load(Ordering::Relaxed);
        if total > self.max_size {
            warn!(
                total_size = total,
                max_size = self.max_size,
                "Cache still over capacity after eviction"
            );
        }
    }

    /// Remove an entry and its file while the index write lock is held
    async fn remove_locked(&self, entries: &mut HashMap<String, CacheEntry>, key: &str) {
        if let Some(entry) = entries.remove(key) {
            self.current_size.fetch_sub(entry.size, Ordering::Relaxed);
            remove_file_quietly(&entry.path).await;
        }
    }

    fn purge_stale_locked(&self, entries: &mut HashMap<String, CacheEntry>, key: &str) {
        if let Some(entry) = entries.remove(key) {
            self.current_size.fetch_sub(entry.size, Ordering::Relaxed);
        }
        self.stale_purges.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        match self.ttl {
            Some(ttl) => Utc::now() - entry.created_at > ttl,
            None => false,
        }
    }

    fn next_access_seq(&self) -> u64 {
        self.access_clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Rebuild the index from file metadata, deleting leftover temp files
    async fn scan_directory(&self) -> Result<(HashMap<String, CacheEntry>, u64)> {
        let mut index: HashMap<String, CacheEntry> = HashMap::new();
        let mut modified_at: HashMap<String, DateTime<Utc>> = HashMap::new();
        let mut total = 0u64;
        let mut dir = fs::read_dir(&self.cache_dir).await?;

        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if name.starts_with(TEMP_PREFIX) {
                debug!(path = ?path, "Removing leftover temp file");
                remove_file_quietly(&path).await;
                continue;
            }

            let Some(key) = key_from_file_name(name) else {
                debug!(path = ?path, "Ignoring file that is not a cache entry");
                continue;
            };

            let metadata = match item.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    warn!(path = ?path, error = %e, "Failed to read cache file metadata");
                    continue;
                }
            };

            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            let created_at = metadata.created().map(DateTime::<Utc>::from).unwrap_or(modified);
            let last_accessed = metadata.accessed().map(DateTime::<Utc>::from).unwrap_or(modified);

            let entry = CacheEntry {
                key: key.to_string(),
                path: path.clone(),
                size: metadata.len(),
                created_at,
                last_accessed,
                access_seq: 0,
            };

            // One key stored under two extensions: keep the newer file
            if let Some(existing) = index.get(key) {
                let existing_modified =
                    modified_at.get(key).copied().unwrap_or(existing.created_at);
                if modified <= existing_modified {
                    debug!(path = ?path, kept = ?existing.path, "Removing duplicate cache file");
                    remove_file_quietly(&path).await;
                    continue;
                }
                debug!(path = ?existing.path, kept = ?path, "Removing duplicate cache file");
                remove_file_quietly(&existing.path).await;
                total -= existing.size;
            }

            modified_at.insert(key.to_string(), modified);
            total += entry.size;
            index.insert(key.to_string(), entry);
        }

        Ok((index, total))
    }
}

async fn write_temp_file<S, B, E>(path: &Path, chunks: &mut S) -> Result<u64>
where
    S: Stream<Item = std::result::Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let mut file = fs::File::create(path).await?;
    let mut written = 0u64;

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|e| CacheError::Stream(e.into()))?;
        let bytes = chunk.as_ref();
        file.write_all(bytes).await?;
        written += bytes.len() as u64;
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

async fn remove_file_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = ?path, error = %e, "Failed to remove file");
        }
    }
}

/// `rfa` and `.rfa` both become `.rfa`; nothing becomes `.dat`
fn normalize_extension(extension: Option<&str>) -> String {
    match extension.map(str::trim).filter(|ext| !ext.is_empty() && *ext != ".") {
        Some(ext) if ext.starts_with('.') => ext.to_string(),
        Some(ext) => format!(".{}", ext),
        None => DEFAULT_EXTENSION.to_string(),
    }
}

fn key_from_file_name(name: &str) -> Option<&str> {
    let stem = name.split_once('.').map_or(name, |(stem, _)| stem);
    let is_digest = stem.len() == KEY_LEN
        && stem
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
    is_digest.then_some(stem)
}
