//! Message queue producer (Azure Service Bus REST API).
//!
//! Producers only enqueue; delivery and acknowledgement happen in a separate
//! worker that consumes the queue.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use url::Url;

use super::{StorageError, ensure_success, parse_connection_string, sign, url_encode};

const SERVICE: &str = "message queue";
const BATCH_CONTENT_TYPE: &str = "application/vnd.microsoft.servicebus.json";
const TOKEN_TTL_SECS: i64 = 3600;

/// Fire-and-forget queue producer.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Serialize each payload to JSON and enqueue them as one batch.
    async fn send_messages(&self, queue_name: &str, messages: Vec<Value>)
    -> Result<(), StorageError>;
}

#[derive(Debug, Clone)]
pub struct ServiceBusQueue {
    http: reqwest::Client,
    namespace: Url,
    key_name: String,
    key: String,
}

impl ServiceBusQueue {
    /// Build a producer from `Endpoint=sb://…;SharedAccessKeyName=…;SharedAccessKey=…`.
    pub fn from_connection_string(connection_string: &str) -> Result<Self, StorageError> {
        let parts = parse_connection_string(connection_string);
        let field = |name: &str| {
            parts
                .get(name)
                .cloned()
                .ok_or_else(|| StorageError::Credentials(format!("{} is missing", name)))
        };

        let endpoint = field("Endpoint")?;
        let host = endpoint
            .trim_start_matches("sb://")
            .trim_start_matches("https://")
            .trim_end_matches('/');
        let namespace = Url::parse(&format!("https://{}/", host))
            .map_err(|e| StorageError::Credentials(format!("invalid queue endpoint: {}", e)))?;

        Ok(Self {
            http: reqwest::Client::new(),
            namespace,
            key_name: field("SharedAccessKeyName")?,
            key: field("SharedAccessKey")?,
        })
    }

    fn queue_url(&self, queue_name: &str) -> Result<Url, StorageError> {
        if queue_name.is_empty() || queue_name.contains('/') {
            return Err(StorageError::InvalidName(format!(
                "'{}' is not a valid queue name",
                queue_name
            )));
        }

        self.namespace
            .join(queue_name)
            .map_err(|e| StorageError::InvalidName(format!("invalid queue name: {}", e)))
    }

    fn sas_token(&self, resource_uri: &str, expiry: i64) -> Result<String, StorageError> {
        let encoded_uri = url_encode(resource_uri);
        let signature = sign(self.key.as_bytes(), &format!("{}\n{}", encoded_uri, expiry))?;

        Ok(format!(
            "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
            encoded_uri,
            url_encode(&signature),
            expiry,
            self.key_name
        ))
    }
}

#[async_trait]
impl MessageQueue for ServiceBusQueue {
    async fn send_messages(
        &self,
        queue_name: &str,
        messages: Vec<Value>,
    ) -> Result<(), StorageError> {
        if messages.is_empty() {
            return Ok(());
        }

        let queue_url = self.queue_url(queue_name)?;
        let batch = batch_body(&messages)?;
        let expiry = Utc::now().timestamp() + TOKEN_TTL_SECS;
        let token = self.sas_token(queue_url.as_str(), expiry)?;

        let response = self
            .http
            .post(format!("{}/messages", queue_url))
            .header("Authorization", token)
            .header("Content-Type", BATCH_CONTENT_TYPE)
            .body(batch)
            .send()
            .await?;

        ensure_success(SERVICE, response).await?;
        tracing::info!("queued {} message(s) on {}", messages.len(), queue_name);

        Ok(())
    }
}

/// Batch envelope: each payload is carried as a JSON string in `Body`.
fn batch_body(messages: &[Value]) -> Result<String, StorageError> {
    let envelopes = messages
        .iter()
        .map(|message| -> Result<Value, serde_json::Error> {
            Ok(json!({ "Body": serde_json::to_string(message)? }))
        })
        .collect::<Result<Vec<Value>, _>>()?;

    Ok(serde_json::to_string(&envelopes)?)
}
