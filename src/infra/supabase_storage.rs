use crate::app::ports::ObjectStorePort;
use crate::error::StoreError;
use crate::infra::http_client::{is_retryable_error, is_retryable_status, truncate_body};
use crate::infra::supabase::SupabaseClient;
use crate::types::ObjectListing;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Placeholder object Supabase creates for empty folders.
const FOLDER_PLACEHOLDER: &str = ".emptyFolderPlaceholder";

#[derive(Serialize)]
struct ListRequest<'a> {
    prefix: &'a str,
    limit: usize,
    offset: usize,
    #[serde(rename = "sortBy")]
    sort_by: SortBy,
}

#[derive(Serialize)]
struct SortBy {
    column: &'static str,
    order: &'static str,
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    name: String,
    /// `None` for folders
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    metadata: Option<ObjectMetadata>,
}

#[derive(Debug, Deserialize)]
struct ObjectMetadata {
    #[serde(default)]
    size: Option<u64>,
}

/// Uploads stored under `<bucket>/<owner_id>/<name>` in Supabase Storage.
pub struct SupabaseStorage {
    client: SupabaseClient,
    bucket: String,
    page_size: usize,
}

impl SupabaseStorage {
    pub fn new(client: SupabaseClient, bucket: impl Into<String>, page_size: usize) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            page_size: page_size.max(1),
        }
    }

    fn classify(status: reqwest::StatusCode, body: &str) -> StoreError {
        let message = format!("storage responded {}: {}", status, truncate_body(body));
        if is_retryable_status(status) {
            StoreError::transient(message)
        } else {
            StoreError::permanent(message)
        }
    }

    fn transport(err: reqwest::Error) -> StoreError {
        let message = format!("storage request failed: {}", err);
        if is_retryable_error(&err) {
            StoreError::transient(message)
        } else {
            StoreError::permanent(message)
        }
    }
}

fn into_listing(objects: Vec<ListedObject>) -> Vec<ObjectListing> {
    objects
        .into_iter()
        .filter(|o| o.id.is_some() && o.name != FOLDER_PLACEHOLDER)
        .map(|o| ObjectListing {
            size: o.metadata.and_then(|m| m.size).unwrap_or(0),
            name: o.name,
        })
        .collect()
}

#[async_trait]
impl ObjectStorePort for SupabaseStorage {
    async fn list(&self, owner_id: &str) -> Result<Vec<ObjectListing>, StoreError> {
        let url = self.client.url(&["storage", "v1", "object", "list", &self.bucket]);
        let mut listing = Vec::new();
        let mut offset = 0;

        loop {
            let body = ListRequest {
                prefix: owner_id,
                limit: self.page_size,
                offset,
                sort_by: SortBy {
                    column: "name",
                    order: "asc",
                },
            };
            let req = self.client.http().post(url.clone()).json(&body);
            let req = self.client.with_service_auth(req).map_err(StoreError::permanent)?;
            let resp = req.send().await.map_err(Self::transport)?;
            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(Self::classify(status, &text));
            }
            let page: Vec<ListedObject> = resp.json().await.map_err(Self::transport)?;
            let page_len = page.len();
            listing.extend(into_listing(page));

            if page_len < self.page_size {
                break;
            }
            offset += page_len;
        }

        debug!(owner_id = %owner_id, objects = listing.len(), "Listed uploads");
        Ok(listing)
    }

    async fn download(&self, owner_id: &str, name: &str) -> Result<Vec<u8>, StoreError> {
        let url = self.client.url(&["storage", "v1", "object", &self.bucket, owner_id, name]);
        let req = self
            .client
            .with_service_auth(self.client.http().get(url))
            .map_err(StoreError::permanent)?;
        let resp = req.send().await.map_err(Self::transport)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::classify(status, &text));
        }
        let bytes = resp.bytes().await.map_err(Self::transport)?;
        Ok(bytes.to_vec())
    }
}
