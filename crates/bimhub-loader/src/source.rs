//! Where family files come from

use async_trait::async_trait;
use bytes::Bytes;
use catalog_api::CatalogClient;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};

/// Error type carried by an [`AssetStream`]
pub type FetchError = Box<dyn std::error::Error + Send + Sync>;

/// Body of a fetched asset, consumed chunk by chunk
pub type AssetStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// Fetches the bytes behind an asset URL
#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<AssetStream, FetchError>;
}

#[async_trait]
impl AssetSource for CatalogClient {
    async fn fetch(&self, url: &str) -> Result<AssetStream, FetchError> {
        let stream = self.download_family_file(url).await?;
        Ok(stream.map_err(FetchError::from).boxed())
    }
}
