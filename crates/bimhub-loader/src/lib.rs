//! Family acquisition for BIMHub
//!
//! An [`AcquisitionOrchestrator`] takes an [`AssetRef`], serves it from the
//! [`BlobCache`](asset_blob_cache::BlobCache) or downloads it through an
//! [`AssetSource`], and hands the local file to the host through an
//! [`ApplyGateway`]. The host document is only ever touched by the
//! [`ApplyRunner`], which the host drives on its own thread.
//!
//! ```no_run
//! use asset_blob_cache::BlobCache;
//! use bimhub_loader::{AcquisitionOrchestrator, ApplyGateway, AssetRef};
//! use catalog_api::CatalogClient;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = CatalogClient::new("https://bimhub.example/api", None, Duration::from_secs(300))?;
//! let cache = BlobCache::open("/tmp/bimhub".into(), 500 * 1024 * 1024, None).await?;
//! let (gateway, runner) = ApplyGateway::new();
//! // `runner` goes to the thread that owns the document
//! # drop(runner);
//!
//! let orchestrator = AcquisitionOrchestrator::new(Arc::new(client), Arc::new(cache), gateway);
//! let asset = AssetRef::new("https://bimhub.example/api/files/download/door.rfa", "Door", "door.rfa");
//! orchestrator
//!     .acquire(&asset, |stage| println!("{}", stage), |ok, msg| println!("{} {}", ok, msg), true)
//!     .await;
//! # Ok(())
//! # }
//! ```

mod error;
mod gateway;
mod host;
mod orchestrator;
mod source;

#[cfg(test)]
mod testing;

pub use error::{LoaderError, Result};
pub use gateway::{
    ApplyGateway, ApplyRunner, CompletionCallback, GatewayState, JobPayload, PendingJob,
    SUPERSEDED_MESSAGE,
};
pub use host::{
    ConflictChoice, ConflictPrompt, FamilyLoadOptions, Host, HostDocument, HostError, HostSession,
    JobLoadOptions, LoadOutcome, LoadRequest, OverwriteDecision, SharedFamilyDecision,
    SharedFamilySource,
};
pub use orchestrator::{AcquisitionOrchestrator, AssetRef, ProgressStage};
pub use source::{AssetSource, AssetStream, FetchError};
