//! Clients for the external storage services.
//!
//! - `blob`: object storage for uploaded files
//! - `documents`: NoSQL document store used as the audit log
//! - `queue`: message queue used to hand emails to the delivery worker
//! - `sharepoint`: document library shared with business users
//!
//! Each service sits behind a trait so workflows can be exercised against
//! in-memory implementations.

pub mod blob;
pub mod documents;
pub mod queue;
pub mod sharepoint;

#[cfg(test)]
pub(crate) mod memory;

use std::collections::HashMap;

use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::Sha256;

pub use blob::{AzureBlobStore, BlobReceipt, BlobStore};
pub use documents::{CosmosDocumentStore, DocumentFilter, DocumentStore};
pub use queue::{MessageQueue, ServiceBusQueue};
pub use sharepoint::{
    DocumentLibrary, FolderListing, LibraryCredentials, LibraryItem, SharepointLibrary,
};

type HmacSha256 = Hmac<Sha256>;

/// Errors raised by the storage clients.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The HTTP request never produced a response.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("{service} responded with {status}: {body}")]
    Service {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// Connection string or key material could not be used.
    #[error("invalid credentials: {0}")]
    Credentials(String),

    /// A container or queue name the service would reject.
    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Split `Key=Value;Key=Value` connection strings.
///
/// Values may themselves contain `=` (base64 keys), so only the first `=`
/// of each segment separates key from value.
pub(crate) fn parse_connection_string(raw: &str) -> HashMap<String, String> {
    raw.split(';')
        .filter_map(|segment| {
            let segment = segment.trim();
            let (key, value) = segment.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// HMAC-SHA256 over `payload`, base64 encoded.
pub(crate) fn sign(key: &[u8], payload: &str) -> Result<String, StorageError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| StorageError::Credentials(format!("unusable signing key: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Decode a base64 account key.
pub(crate) fn decode_key(key: &str) -> Result<Vec<u8>, StorageError> {
    STANDARD
        .decode(key)
        .map_err(|e| StorageError::Credentials(format!("account key is not base64: {}", e)))
}

/// Percent-encode a value for use in a query string or token.
pub(crate) fn url_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// RFC 1123 timestamp, as expected by the `x-ms-date` header.
pub(crate) fn http_date(now: chrono::DateTime<chrono::Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Turn a non-success response into [`StorageError::Service`].
pub(crate) async fn ensure_success(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, StorageError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(StorageError::Service {
        service,
        status,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn connection_string_keeps_padding_in_values() {
        let parsed = parse_connection_string(
            "DefaultEndpointsProtocol=https;AccountName=devstore;AccountKey=a2V5PQ==;",
        );
        assert_eq!(parsed["AccountName"], "devstore");
        assert_eq!(parsed["AccountKey"], "a2V5PQ==");
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn http_date_uses_gmt_format() {
        let now = chrono::Utc.with_ymd_and_hms(2024, 10, 9, 14, 5, 3).unwrap();
        assert_eq!(http_date(now), "Wed, 09 Oct 2024 14:05:03 GMT");
    }

    #[test]
    fn signature_is_stable_for_same_input() {
        let first = sign(b"secret", "payload").unwrap();
        let second = sign(b"secret", "payload").unwrap();
        assert_eq!(first, second);
        assert_ne!(first, sign(b"other", "payload").unwrap());
    }

    #[test]
    fn url_encode_escapes_reserved_characters() {
        assert_eq!(url_encode("type=master&sig=a/b+"), "type%3Dmaster%26sig%3Da%2Fb%2B");
    }
}
