//! Cache-or-fetch, then hand off to the host

use crate::error::{LoaderError, Result};
use crate::gateway::{panic_message, ApplyGateway, PendingJob};
use crate::source::AssetSource;
use asset_blob_cache::BlobCache;
use catalog_api::FamilyItem;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

/// What to acquire
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetRef {
    /// Download URL; also the cache identity
    pub source_url: String,
    pub display_name: String,
    /// File name whose extension the cached copy keeps
    pub main_file_name: String,
}

impl AssetRef {
    pub fn new(
        source_url: impl Into<String>,
        display_name: impl Into<String>,
        main_file_name: impl Into<String>,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            display_name: display_name.into(),
            main_file_name: main_file_name.into(),
        }
    }

    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.main_file_name)
            .extension()
            .and_then(|ext| ext.to_str())
    }
}

impl From<&FamilyItem> for AssetRef {
    fn from(item: &FamilyItem) -> Self {
        Self {
            source_url: item.download_url.clone().unwrap_or_default(),
            display_name: item.display_name().to_string(),
            main_file_name: item.main_file.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStage {
    Downloading,
    FoundInCache,
    Saving,
    Applying,
}

impl ProgressStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStage::Downloading => "downloading",
            ProgressStage::FoundInCache => "found in cache",
            ProgressStage::Saving => "saving",
            ProgressStage::Applying => "applying",
        }
    }
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives one acquisition from URL to host load.
///
/// Safe to share between tasks. Acquisitions of the same URL take turns, so
/// a second caller finds the first caller's download in the cache.
pub struct AcquisitionOrchestrator<S> {
    source: Arc<S>,
    cache: Arc<BlobCache>,
    gateway: ApplyGateway,
    inflight: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl<S: AssetSource> AcquisitionOrchestrator<S> {
    pub fn new(source: Arc<S>, cache: Arc<BlobCache>, gateway: ApplyGateway) -> Self {
        Self {
            source,
            cache,
            gateway,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<BlobCache> {
        &self.cache
    }

    /// Make the asset available locally and queue it for loading.
    ///
    /// `on_complete` is called exactly once: with the load result once the
    /// host has run the job, or with the error if the asset never got that
    /// far. Returns as soon as the job is queued.
    pub async fn acquire<P, C>(&self, asset: &AssetRef, on_progress: P, on_complete: C, interactive: bool)
    where
        P: Fn(ProgressStage) + Send + Sync,
        C: FnOnce(bool, String) + Send + 'static,
    {
        if asset.source_url.trim().is_empty() {
            let err = LoaderError::Input(format!(
                "Family '{}' has no download link",
                asset.display_name
            ));
            warn!(family = %asset.display_name, "Asset has no source URL");
            on_complete(false, err.to_string());
            return;
        }

        let materialized = AssertUnwindSafe(self.materialize(asset, &on_progress))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let reason = panic_message(panic.as_ref());
                error!(family = %asset.display_name, reason = %reason, "Acquisition panicked");
                Err(LoaderError::Apply(format!("Load failed: {}", reason)))
            });

        let path = match materialized {
            Ok(path) => path,
            Err(e) => {
                warn!(family = %asset.display_name, url = %asset.source_url, error = %e, "Acquisition failed");
                on_complete(false, e.to_string());
                return;
            }
        };

        on_progress(ProgressStage::Applying);
        info!(family = %asset.display_name, path = ?path, "Handing family to host");
        self.gateway.submit(PendingJob::new(
            path,
            asset.display_name.clone(),
            interactive,
            on_complete,
        ));
        self.gateway.signal();
    }

    async fn materialize<P>(&self, asset: &AssetRef, on_progress: &P) -> Result<PathBuf>
    where
        P: Fn(ProgressStage) + Send + Sync,
    {
        let url = asset.source_url.as_str();
        on_progress(ProgressStage::Downloading);

        let lock = self.url_lock(url);
        let _turn = lock.lock().await;

        if let Some(path) = self.cache.lookup(url).await {
            debug!(url = %url, path = ?path, "Using cached family file");
            on_progress(ProgressStage::FoundInCache);
            return Ok(path);
        }

        let stream = self
            .source
            .fetch(url)
            .await
            .map_err(|e| LoaderError::Transfer(e.to_string()))?;

        on_progress(ProgressStage::Saving);
        let path = self
            .cache
            .store_stream(url, stream, asset.extension())
            .await?;

        debug!(url = %url, path = ?path, "Family file downloaded");
        Ok(path)
    }

    fn url_lock(&self, url: &str) -> Arc<AsyncMutex<()>> {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        inflight.retain(|_, lock| lock.strong_count() > 0);

        if let Some(lock) = inflight.get(url).and_then(Weak::upgrade) {
            return lock;
        }
        let lock = Arc::new(AsyncMutex::new(()));
        inflight.insert(url.to_string(), Arc::downgrade(&lock));
        lock
    }
}
