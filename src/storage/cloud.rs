//! Cloudinary backend, spoken over the plain REST API.
//!
//! Newsletters are stored as `raw` resources whose public id is the storage
//! key, extension included. Writes are signed with the account secret;
//! listing uses HTTP basic auth; downloads fetch the public delivery URL.

use super::{month_partition, sort_newest_first, FileRecord, StorageBackend, StoredFile, UploadOutcome};
use crate::config::{CloudinaryCredentials, StorageConfig, StorageKind};
use crate::download::content_type_for;
use crate::error::NewsletterError;
use crate::sanitize::{file_format, percent_encode_path, sanitize_filename};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use std::time::Duration;
use tracing::{debug, error, info};

/// Resources returned per list call.
const MAX_RESULTS: u32 = 500;

/// Longest error body kept from a failed API call.
const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, Deserialize)]
struct UploadResponse {
    public_id: String,
    secure_url: String,
    #[serde(default)]
    bytes: u64,
    #[serde(default)]
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    resources: Vec<Resource>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    public_id: String,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    bytes: u64,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    secure_url: String,
}

/// Raw resources in one Cloudinary account.
#[derive(Debug, Clone)]
pub struct CloudinaryStorage {
    client: reqwest::Client,
    credentials: CloudinaryCredentials,
    api_base: String,
    delivery_base: String,
    upload_folder: String,
}

impl CloudinaryStorage {
    /// Build a client from a Cloudinary config. Missing credentials are fatal.
    pub fn from_config(config: &StorageConfig) -> Result<Self, NewsletterError> {
        if config.kind != StorageKind::Cloudinary {
            return Err(NewsletterError::InvalidConfig(format!(
                "storage type is '{}', not cloudinary",
                config.kind
            )));
        }
        config.validate()?;
        let credentials = config.cloudinary.clone().unwrap_or_default();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| NewsletterError::InvalidConfig(format!("HTTP client: {e}")))?;

        info!("Cloudinary storage for cloud '{}'", credentials.cloud_name);
        Ok(Self {
            client,
            credentials,
            api_base: config.cloudinary_api_base.trim_end_matches('/').to_string(),
            delivery_base: config
                .cloudinary_delivery_base
                .trim_end_matches('/')
                .to_string(),
            upload_folder: config.upload_folder.clone(),
        })
    }

    fn api_url(&self, tail: &str) -> String {
        format!("{}/{}/{}", self.api_base, self.credentials.cloud_name, tail)
    }

    /// Add `timestamp`, `api_key` and `signature` to a set of write params.
    fn signed(&self, mut params: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
        params.push(("timestamp", Utc::now().timestamp().to_string()));
        let signature = sign(&params, &self.credentials.api_secret);
        params.push(("api_key", self.credentials.api_key.clone()));
        params.push(("signature", signature));
        params
    }

    /// Send a request and decode its JSON body, mapping every failure.
    async fn call<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        operation: &'static str,
        file_id: &str,
    ) -> Result<T, NewsletterError> {
        let remote = |detail: String| NewsletterError::RemoteStorage {
            operation,
            file_id: file_id.to_string(),
            detail,
        };

        let response = request.send().await.map_err(|e| remote(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(remote(format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate(&body, MAX_ERROR_BODY)
            )));
        }
        response.json::<T>().await.map_err(|e| remote(e.to_string()))
    }

    /// Upload `content` under an explicit public id, overwriting.
    async fn put(&self, public_id: &str, content: &[u8]) -> Result<UploadResponse, NewsletterError> {
        let data_uri = format!(
            "data:{};base64,{}",
            content_type_for(public_id),
            BASE64.encode(content)
        );
        let mut params = self.signed(vec![
            ("invalidate", "true".to_string()),
            ("overwrite", "true".to_string()),
            ("public_id", public_id.to_string()),
        ]);
        params.push(("file", data_uri));

        debug!("Uploading {} bytes to '{}'", content.len(), public_id);
        let request = self.client.post(self.api_url("raw/upload")).form(&params);
        self.call(request, "upload", public_id).await
    }

    async fn try_upload(&self, content: &[u8], filename: &str) -> Result<StoredFile, NewsletterError> {
        let display_name = sanitize_filename(filename);
        let partition = month_partition(&self.upload_folder, Utc::now());
        let public_id = format!("{partition}/{display_name}");

        let uploaded = self.put(&public_id, content).await?;
        info!("Uploaded '{}' ({} bytes)", uploaded.public_id, uploaded.bytes);
        Ok(StoredFile {
            format: file_format(&uploaded.public_id),
            file_id: uploaded.public_id,
            url: uploaded.secure_url,
            size: uploaded.bytes,
            created_at: uploaded.created_at,
            display_name,
        })
    }

    async fn try_delete(&self, file_id: &str) -> Result<bool, NewsletterError> {
        let params = self.signed(vec![
            ("invalidate", "true".to_string()),
            ("public_id", file_id.to_string()),
        ]);
        let request = self.client.post(self.api_url("raw/destroy")).form(&params);
        let response: DestroyResponse = self.call(request, "delete", file_id).await?;
        debug!("Destroy '{}' → {}", file_id, response.result);
        Ok(response.result == "ok")
    }

    async fn try_list(&self, prefix: &str) -> Result<Vec<FileRecord>, NewsletterError> {
        let max_results = MAX_RESULTS.to_string();
        let mut query: Vec<(&str, &str)> = vec![("max_results", max_results.as_str())];
        if !prefix.is_empty() {
            query.push(("prefix", prefix));
        }

        let request = self
            .client
            .get(self.api_url("resources/raw/upload"))
            .basic_auth(&self.credentials.api_key, Some(&self.credentials.api_secret))
            .query(&query);
        let response: ListResponse = self.call(request, "list", prefix).await?;

        let mut files: Vec<FileRecord> = response
            .resources
            .into_iter()
            .map(|r| {
                let filename = r
                    .public_id
                    .rsplit('/')
                    .next()
                    .unwrap_or(&r.public_id)
                    .to_string();
                FileRecord {
                    display_name: sanitize_filename(&filename),
                    format: r
                        .format
                        .filter(|f| !f.is_empty())
                        .unwrap_or_else(|| file_format(&filename)),
                    secure_url: if r.secure_url.is_empty() {
                        self.file_url(&r.public_id)
                    } else {
                        r.secure_url
                    },
                    size: r.bytes,
                    created_at: r.created_at,
                    filename,
                    public_id: r.public_id,
                }
            })
            .collect();
        sort_newest_first(&mut files);
        Ok(files)
    }
}

#[async_trait]
impl StorageBackend for CloudinaryStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Cloudinary
    }

    async fn upload(&self, content: &[u8], filename: &str) -> UploadOutcome {
        match self.try_upload(content, filename).await {
            Ok(file) => UploadOutcome::stored(file),
            Err(e) => {
                error!(operation = "upload", filename, "Cloud upload failed: {}", e);
                UploadOutcome::failed(e.to_string())
            }
        }
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, NewsletterError> {
        let url = self.file_url(file_id);
        let remote = |detail: String| NewsletterError::RemoteStorage {
            operation: "download",
            file_id: file_id.to_string(),
            detail,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| remote(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(NewsletterError::NotFound {
                file_id: file_id.to_string(),
            });
        }
        if !status.is_success() {
            return Err(remote(format!("HTTP {}", status.as_u16())));
        }

        let bytes = response.bytes().await.map_err(|e| remote(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, file_id: &str) -> bool {
        match self.try_delete(file_id).await {
            Ok(deleted) => deleted,
            Err(e) => {
                error!(operation = "delete", file_id, "Cloud delete failed: {}", e);
                false
            }
        }
    }

    async fn save(&self, file_id: &str, content: &[u8]) -> bool {
        match self.put(file_id, content).await {
            Ok(saved) => {
                info!("Saved '{}' ({} bytes)", saved.public_id, saved.bytes);
                true
            }
            Err(e) => {
                error!(operation = "save", file_id, "Cloud save failed: {}", e);
                false
            }
        }
    }

    async fn list(&self, prefix: &str) -> Vec<FileRecord> {
        match self.try_list(prefix).await {
            Ok(files) => files,
            Err(e) => {
                error!(operation = "list", prefix, "Cloud list failed: {}", e);
                Vec::new()
            }
        }
    }

    fn file_url(&self, file_id: &str) -> String {
        format!(
            "{}/{}/raw/upload/{}",
            self.delivery_base,
            self.credentials.cloud_name,
            percent_encode_path(file_id)
        )
    }
}

/// Cloudinary request signature.
///
/// SHA-1 over the non-empty params sorted by name, joined as `k=v&k=v`,
/// with the API secret appended.
pub(crate) fn sign(params: &[(&str, String)], secret: &str) -> String {
    let mut pairs: Vec<&(&str, String)> = params.iter().filter(|(_, v)| !v.is_empty()).collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let to_sign = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha1::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
