//! Data types for catalog API requests and responses

use serde::{Deserialize, Serialize};

/// A downloadable Revit family as listed by the catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FamilyItem {
    pub id: String,
    pub name: String,
    /// Family name as stored in the catalog database
    pub name_rfa: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<String>,
    pub category_name: Option<String>,
    pub section_id: Option<String>,
    pub section_name: Option<String>,
    pub revit_version_id: Option<String>,
    pub revit_version_name: Option<String>,
    pub manufacturer_id: Option<String>,
    pub manufacturer_name: Option<String>,
    /// File name of the `.rfa`
    pub main_file: Option<String>,
    pub preview_file: Option<String>,
    pub attachments: Vec<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,

    // Filled in by the client from the configured base URL
    #[serde(skip_deserializing)]
    pub preview_url: Option<String>,
    #[serde(skip_deserializing)]
    pub download_url: Option<String>,
}

impl FamilyItem {
    /// Name to show the user: the catalog name of the `.rfa`, else the title
    pub fn display_name(&self) -> &str {
        self.name_rfa
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.name)
    }
}

/// One page of search results
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedResult<T> {
    #[serde(default = "Vec::new")]
    pub families: Vec<T>,
    #[serde(default)]
    pub total_count: u32,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub current_page: u32,
    #[serde(default)]
    pub page_size: u32,
    #[serde(default)]
    pub has_next_page: bool,
    #[serde(default)]
    pub has_previous_page: bool,
}

/// Entry of one of the reference lists used for filtering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceItem {
    pub id: String,
    pub name: String,
}

pub type Category = ReferenceItem;
pub type Section = ReferenceItem;
pub type Manufacturer = ReferenceItem;
pub type RevitVersion = ReferenceItem;

/// Search and paging parameters for `GET /Family`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOptions {
    pub search: Option<String>,
    pub category_id: Option<String>,
    pub manufacturer_id: Option<String>,
    pub revit_version_id: Option<String>,
    pub section_id: Option<String>,
    pub sort_by: String,
    pub sort_order: String,
    pub page: u32,
    pub page_size: u32,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            search: None,
            category_id: None,
            manufacturer_id: None,
            revit_version_id: None,
            section_id: None,
            sort_by: "name".to_string(),
            sort_order: "asc".to_string(),
            page: 1,
            page_size: 12,
        }
    }
}

impl FilterOptions {
    /// Build the query string, omitting unset filters
    pub fn to_query(&self) -> String {
        let mut params: Vec<String> = Vec::new();

        if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
            params.push(format!("search={}", urlencoding::encode(search)));
        }
        let ids = [
            ("categoryId", &self.category_id),
            ("manufacturerId", &self.manufacturer_id),
            ("revitVersionId", &self.revit_version_id),
            ("sectionId", &self.section_id),
        ];
        for (name, value) in ids {
            if let Some(value) = value {
                params.push(format!("{}={}", name, urlencoding::encode(value)));
            }
        }

        params.push(format!("sortBy={}", urlencoding::encode(&self.sort_by)));
        params.push(format!("sortOrder={}", urlencoding::encode(&self.sort_order)));
        params.push(format!("page={}", self.page));
        params.push(format!("pageSize={}", self.page_size));

        params.join("&")
    }
}
