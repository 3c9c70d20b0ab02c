//! Rust client for the BIMHub family catalog API
//!
//! The catalog serves Revit family metadata with paging and filtering, a few
//! reference lists used to build filters, and the family files themselves.
//!
//! # Example
//!
//! ```no_run
//! use catalog_api::{CatalogClient, FilterOptions};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), catalog_api::CatalogError> {
//! let client = CatalogClient::new("https://bimhub.example/api", None, Duration::from_secs(300))?;
//!
//! let filter = FilterOptions {
//!     search: Some("door".to_string()),
//!     ..FilterOptions::default()
//! };
//! let page = client.families(&filter).await?;
//! for family in &page.families {
//!     println!("{} -> {:?}", family.name, family.download_url);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # API Coverage
//!
//! - `GET /Family` - Paged, filtered family search
//! - `GET /Family/{id}` - Single family
//! - `GET /Category`, `/Section`, `/Manufacturer`, `/RevitVersion` - Reference lists
//! - `GET /files/download/{file}` - Family file (streamed)
//! - `GET /files/preview/{file}` - Preview image

mod client;
mod error;
mod types;

pub use client::{CatalogClient, FileStream};
pub use error::{CatalogError, Result};
pub use types::{
    Category, FamilyItem, FilterOptions, Manufacturer, PagedResult, ReferenceItem, RevitVersion,
    Section,
};
