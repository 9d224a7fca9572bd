//! Object storage for uploaded files (Azure Blob Storage REST API).

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::{StatusCode, header::CONTENT_TYPE};
use url::Url;

use super::{StorageError, decode_key, ensure_success, http_date, parse_connection_string, sign};

const SERVICE: &str = "blob storage";
const API_VERSION: &str = "2021-08-06";

/// Identifiers returned by the store for a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobReceipt {
    pub etag: String,
    pub request_id: String,
    pub version: String,
}

/// Blob storage operations used by the upload workflow.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create the container unless it already exists. Returns its name.
    ///
    /// Safe to call concurrently for the same name.
    async fn ensure_container(&self, container_name: &str) -> Result<String, StorageError>;

    /// Store `data` as a single block blob.
    async fn upload(
        &self,
        container_name: &str,
        blob_name: &str,
        content_type: Option<&str>,
        data: Bytes,
    ) -> Result<BlobReceipt, StorageError>;

    /// Public base URL prefixed to `container/blob` when recording paths.
    fn public_base_url(&self) -> &str;
}

/// Azure Blob Storage client authenticated with the account SharedKey.
#[derive(Debug, Clone)]
pub struct AzureBlobStore {
    http: reqwest::Client,
    account: String,
    key: Vec<u8>,
    endpoint: Url,
    public_base_url: String,
}

impl AzureBlobStore {
    /// Build a client from an Azure storage connection string.
    ///
    /// Uses `BlobEndpoint` when present, otherwise derives the endpoint from
    /// `DefaultEndpointsProtocol`, `AccountName` and `EndpointSuffix`.
    pub fn from_connection_string(
        connection_string: &str,
        public_base_url: &str,
    ) -> Result<Self, StorageError> {
        let parts = parse_connection_string(connection_string);

        let account = parts
            .get("AccountName")
            .ok_or_else(|| StorageError::Credentials("AccountName is missing".to_string()))?
            .clone();
        let key = parts
            .get("AccountKey")
            .ok_or_else(|| StorageError::Credentials("AccountKey is missing".to_string()))?;

        let endpoint = match parts.get("BlobEndpoint") {
            Some(endpoint) => endpoint.clone(),
            None => {
                let protocol = parts
                    .get("DefaultEndpointsProtocol")
                    .map(String::as_str)
                    .unwrap_or("https");
                let suffix = parts
                    .get("EndpointSuffix")
                    .map(String::as_str)
                    .unwrap_or("core.windows.net");
                format!("{}://{}.blob.{}", protocol, account, suffix)
            }
        };
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| StorageError::Credentials(format!("invalid blob endpoint: {}", e)))?;

        Ok(Self {
            http: reqwest::Client::new(),
            key: decode_key(key)?,
            account,
            endpoint,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn resource_url(&self, segments: &[&str]) -> Result<Url, StorageError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::Credentials("blob endpoint cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorization(&self, string_to_sign: &str) -> Result<String, StorageError> {
        Ok(format!(
            "SharedKey {}:{}",
            self.account,
            sign(&self.key, string_to_sign)?
        ))
    }
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    async fn ensure_container(&self, container_name: &str) -> Result<String, StorageError> {
        validate_container_name(container_name)?;

        let mut url = self.resource_url(&[container_name])?;
        url.set_query(Some("restype=container"));

        let date = http_date(Utc::now());
        let ms_headers = [("x-ms-date", date.as_str()), ("x-ms-version", API_VERSION)];
        let resource = format!("/{}{}\nrestype:container", self.account, url.path());
        let to_sign = shared_key_string_to_sign("PUT", 0, "", &ms_headers, &resource);

        let response = self
            .http
            .put(url)
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION)
            .header("Authorization", self.authorization(&to_sign)?)
            .body(Vec::new())
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            tracing::debug!("container {} already exists", container_name);
            return Ok(container_name.to_string());
        }

        ensure_success(SERVICE, response).await?;
        tracing::info!("created blob container {}", container_name);

        Ok(container_name.to_string())
    }

    async fn upload(
        &self,
        container_name: &str,
        blob_name: &str,
        content_type: Option<&str>,
        data: Bytes,
    ) -> Result<BlobReceipt, StorageError> {
        let url = self.resource_url(&[container_name, blob_name])?;
        let content_type = content_type.unwrap_or("application/octet-stream");

        let date = http_date(Utc::now());
        let ms_headers = [
            ("x-ms-blob-type", "BlockBlob"),
            ("x-ms-date", date.as_str()),
            ("x-ms-version", API_VERSION),
        ];
        let resource = format!("/{}{}", self.account, url.path());
        let to_sign =
            shared_key_string_to_sign("PUT", data.len(), content_type, &ms_headers, &resource);

        let response = self
            .http
            .put(url)
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION)
            .header(CONTENT_TYPE, content_type)
            .header("Authorization", self.authorization(&to_sign)?)
            .body(data)
            .send()
            .await?;

        let response = ensure_success(SERVICE, response).await?;
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };

        Ok(BlobReceipt {
            etag: header("etag"),
            request_id: header("x-ms-request-id"),
            version: header("x-ms-version"),
        })
    }

    fn public_base_url(&self) -> &str {
        &self.public_base_url
    }
}

/// Container names: 3-63 chars of lowercase letters, digits and single hyphens,
/// starting and ending with a letter or digit.
pub fn validate_container_name(name: &str) -> Result<(), StorageError> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid = (3..=63).contains(&name.len())
        && valid_chars
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--");

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidName(format!(
            "'{}' is not a valid container name",
            name
        )))
    }
}

/// SharedKey string-to-sign. `ms_headers` must already be sorted by name.
fn shared_key_string_to_sign(
    verb: &str,
    content_length: usize,
    content_type: &str,
    ms_headers: &[(&str, &str)],
    canonical_resource: &str,
) -> String {
    let length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };
    let headers: String = ms_headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect();

    format!(
        "{}\n\n\n{}\n\n{}\n\n\n\n\n\n\n{}{}",
        verb, length, content_type, headers, canonical_resource
    )
}
