//! Catalog API HTTP client

use crate::error::{CatalogError, Result};
use crate::types::{FamilyItem, FilterOptions, PagedResult, ReferenceItem};
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use moka::future::Cache;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const REFERENCE_CACHE_TTL_SECS: u64 = 300; // 5 minutes

/// Streamed body of a downloaded file
pub type FileStream = BoxStream<'static, Result<Bytes>>;

/// Client for the BIMHub family catalog
pub struct CatalogClient {
    http: reqwest::Client,
    base_url: String,
    /// Reference lists keyed by endpoint name
    reference_cache: Cache<&'static str, Arc<Vec<ReferenceItem>>>,
}

impl CatalogClient {
    /// Create a client for `base_url`, e.g. `https://bimhub.example/api`.
    ///
    /// A non-empty `token` is sent as a bearer token with every request.
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(base_url.trim())
            .map_err(|e| CatalogError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        let mut headers = HeaderMap::new();
        if let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| CatalogError::InvalidToken)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        let reference_cache = Cache::builder()
            .max_capacity(16)
            .time_to_live(Duration::from_secs(REFERENCE_CACHE_TTL_SECS))
            .build();

        Ok(Self {
            http,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            reference_cache,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Search families
    pub async fn families(&self, filter: &FilterOptions) -> Result<PagedResult<FamilyItem>> {
        let url = format!("{}/Family?{}", self.base_url, filter.to_query());
        let mut page: PagedResult<FamilyItem> = self.get_json(&url).await?;

        for family in &mut page.families {
            self.attach_file_urls(family);
        }

        debug!(
            items = page.families.len(),
            total = page.total_count,
            page = page.current_page,
            "Fetched family page"
        );
        Ok(page)
    }

    /// Get a single family by id
    pub async fn family(&self, id: &str) -> Result<FamilyItem> {
        let url = format!("{}/Family/{}", self.base_url, urlencoding::encode(id));
        let mut family: FamilyItem = self.get_json(&url).await?;
        self.attach_file_urls(&mut family);
        Ok(family)
    }

    pub async fn categories(&self) -> Result<Arc<Vec<ReferenceItem>>> {
        self.reference_list("Category").await
    }

    pub async fn sections(&self) -> Result<Arc<Vec<ReferenceItem>>> {
        self.reference_list("Section").await
    }

    pub async fn manufacturers(&self) -> Result<Arc<Vec<ReferenceItem>>> {
        self.reference_list("Manufacturer").await
    }

    pub async fn revit_versions(&self) -> Result<Arc<Vec<ReferenceItem>>> {
        self.reference_list("RevitVersion").await
    }

    /// Start downloading a family file. The body is streamed, so a transfer
    /// error can also surface while the stream is consumed.
    pub async fn download_family_file(&self, url: &str) -> Result<FileStream> {
        let url = self.resolve(url);
        debug!(url = %url, "Downloading family file");

        let response = self.http.get(&url).send().await?;
        let response = check_status(response, &url)?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(CatalogError::from))
            .boxed())
    }

    /// Download a preview image into memory
    pub async fn download_preview(&self, url: &str) -> Result<Vec<u8>> {
        let url = self.resolve(url);
        let response = self.http.get(&url).send().await?;
        let response = check_status(response, &url)?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn reference_list(&self, endpoint: &'static str) -> Result<Arc<Vec<ReferenceItem>>> {
        if let Some(cached) = self.reference_cache.get(endpoint).await {
            return Ok(cached);
        }

        let url = format!("{}/{}", self.base_url, endpoint);
        let items: Option<Vec<ReferenceItem>> = self.get_json(&url).await?;
        let items = Arc::new(items.unwrap_or_default());

        debug!(endpoint, count = items.len(), "Fetched reference list");
        self.reference_cache.insert(endpoint, items.clone()).await;
        Ok(items)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!(url = %url, "Requesting catalog");
        let response = self.http.get(url).send().await?;
        let response = check_status(response, url)?;
        Ok(response.json().await?)
    }

    fn attach_file_urls(&self, family: &mut FamilyItem) {
        if let Some(file) = family.preview_file.as_deref().filter(|f| !f.is_empty()) {
            family.preview_url = Some(format!(
                "{}/files/preview/{}",
                self.base_url,
                urlencoding::encode(file)
            ));
        }
        if let Some(file) = family.main_file.as_deref().filter(|f| !f.is_empty()) {
            family.download_url = Some(format!(
                "{}/files/download/{}",
                self.base_url,
                urlencoding::encode(file)
            ));
        }
    }

    /// Absolute URLs pass through; anything else is taken relative to the base
    fn resolve(&self, url: &str) -> String {
        if Url::parse(url).is_ok() {
            url.to_string()
        } else {
            format!("{}/{}", self.base_url, url.trim_start_matches('/'))
        }
    }
}

fn check_status(response: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    warn!(status = %status, url = %url, "Catalog request failed");
    Err(CatalogError::Status {
        status: status.as_u16(),
        url: url.to_string(),
    })
}
