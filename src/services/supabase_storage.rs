//! Supabase Storage backend speaking the `/storage/v1` REST API.

use crate::{
    models::stored_file::StoredFile,
    services::storage_service::{
        ObjectStorage, StorageError, StorageResult, content_type_for, url_with_segments,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url, header};
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::Path;
use tokio::fs;
use tracing::debug;

const LIST_LIMIT: u32 = 1000;
const EMPTY_FOLDER_PLACEHOLDER: &str = ".emptyFolderPlaceholder";

#[derive(Clone, Debug)]
pub struct SupabaseStorage {
    client: Client,
    /// `<project>/storage/v1`
    storage_url: Url,
    api_key: String,
}

/// One row of `POST /object/list/{bucket}`.
#[derive(Debug, Deserialize)]
struct ListEntry {
    name: String,
    id: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    metadata: Option<ListEntryMetadata>,
}

#[derive(Debug, Deserialize)]
struct ListEntryMetadata {
    size: Option<u64>,
    mimetype: Option<String>,
}

/// Error body returned by the storage API. `statusCode` arrives as a string
/// on some versions and a number on others.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "statusCode")]
    status_code: Option<Value>,
    error: Option<String>,
    message: Option<String>,
}

impl ApiErrorBody {
    fn code(&self) -> Option<u16> {
        match self.status_code.as_ref()? {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            _ => None,
        }
    }

    fn is_duplicate(&self, status: StatusCode) -> bool {
        status == StatusCode::CONFLICT
            || self.code() == Some(409)
            || self.error.as_deref() == Some("Duplicate")
            || self
                .message
                .as_deref()
                .is_some_and(|m| m.to_ascii_lowercase().contains("already exists"))
    }

    fn is_not_found(&self, status: StatusCode) -> bool {
        status == StatusCode::NOT_FOUND
            || self.code() == Some(404)
            || self
                .message
                .as_deref()
                .is_some_and(|m| m.to_ascii_lowercase().contains("not found"))
    }

    fn describe(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| "no error message".into())
    }
}

impl SupabaseStorage {
    /// Build a client for the project at `project_url` (e.g.
    /// `https://abc.supabase.co`) authenticated with `api_key`.
    pub fn new(client: Client, project_url: &str, api_key: impl Into<String>) -> StorageResult<Self> {
        let base = Url::parse(project_url).map_err(|err| StorageError::Api {
            status: 0,
            message: format!("invalid Supabase URL `{}`: {}", project_url, err),
        })?;
        if base.cannot_be_a_base() {
            return Err(StorageError::Api {
                status: 0,
                message: format!("Supabase URL `{}` cannot be a base", project_url),
            });
        }
        Ok(Self {
            client,
            storage_url: url_with_segments(&base, &["storage", "v1"]),
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        url_with_segments(&self.storage_url, segments)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    /// Read the error body of a failed response.
    async fn error_body(response: Response) -> (StatusCode, ApiErrorBody) {
        let status = response.status();
        let body = response.json::<ApiErrorBody>().await.unwrap_or_default();
        (status, body)
    }

    fn api_error(status: StatusCode, body: &ApiErrorBody) -> StorageError {
        StorageError::Api {
            status: status.as_u16(),
            message: body.describe(),
        }
    }
}

#[async_trait]
impl ObjectStorage for SupabaseStorage {
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        let response = self
            .authorized(self.client.post(self.endpoint(&["bucket"])))
            .json(&json!({ "id": bucket, "name": bucket, "public": true }))
            .send()
            .await?;
        if response.status().is_success() {
            debug!("created bucket {}", bucket);
            return Ok(());
        }
        let (status, body) = Self::error_body(response).await;
        if body.is_duplicate(status) {
            Err(StorageError::BucketAlreadyExists(bucket.to_string()))
        } else {
            Err(Self::api_error(status, &body))
        }
    }

    async fn list(&self, bucket: &str) -> StorageResult<Vec<StoredFile>> {
        let response = self
            .authorized(self.client.post(self.endpoint(&["object", "list", bucket])))
            .json(&json!({
                "prefix": "",
                "limit": LIST_LIMIT,
                "offset": 0,
                "sortBy": { "column": "name", "order": "asc" }
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            let (status, body) = Self::error_body(response).await;
            return Err(if body.is_not_found(status) {
                StorageError::BucketNotFound(bucket.to_string())
            } else {
                Self::api_error(status, &body)
            });
        }

        let entries: Vec<ListEntry> = response.json().await?;
        Ok(entries
            .into_iter()
            // folders come back without an id
            .filter(|e| e.id.is_some() && e.name != EMPTY_FOLDER_PLACEHOLDER)
            .map(|e| {
                let (size, mimetype) = e
                    .metadata
                    .map(|m| (m.size, m.mimetype))
                    .unwrap_or((None, None));
                StoredFile {
                    name: e.name,
                    id: e.id,
                    created_at: e.created_at,
                    updated_at: e.updated_at,
                    size,
                    mimetype,
                }
            })
            .collect())
    }

    async fn upload(&self, bucket: &str, name: &str, local_path: &Path) -> StorageResult<()> {
        let data = fs::read(local_path).await?;
        let response = self
            .authorized(self.client.post(self.endpoint(&["object", bucket, name])))
            .header(header::CONTENT_TYPE, content_type_for(name))
            .header(header::CACHE_CONTROL, "max-age=3600")
            .header("x-upsert", "false")
            .body(data)
            .send()
            .await?;
        if response.status().is_success() {
            debug!("uploaded {} to bucket {}", name, bucket);
            return Ok(());
        }
        let (status, body) = Self::error_body(response).await;
        if body.is_duplicate(status) {
            Err(StorageError::NameCollision {
                bucket: bucket.to_string(),
                name: name.to_string(),
            })
        } else if body.is_not_found(status) {
            Err(StorageError::BucketNotFound(bucket.to_string()))
        } else {
            Err(Self::api_error(status, &body))
        }
    }

    async fn download(&self, bucket: &str, name: &str) -> StorageResult<Bytes> {
        let response = self
            .authorized(self.client.get(self.endpoint(&["object", bucket, name])))
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(response.bytes().await?);
        }
        let (status, body) = Self::error_body(response).await;
        if body.is_not_found(status) {
            Err(StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                name: name.to_string(),
            })
        } else {
            Err(Self::api_error(status, &body))
        }
    }

    async fn remove(&self, bucket: &str, name: &str) -> StorageResult<()> {
        let response = self
            .authorized(self.client.delete(self.endpoint(&["object", bucket])))
            .json(&json!({ "prefixes": [name] }))
            .send()
            .await?;
        if response.status().is_success() {
            debug!("removed {} from bucket {}", name, bucket);
            return Ok(());
        }
        let (status, body) = Self::error_body(response).await;
        Err(Self::api_error(status, &body))
    }

    fn public_url(&self, bucket: &str, name: &str) -> String {
        self.endpoint(&["object", "public", bucket, name]).to_string()
    }
}
