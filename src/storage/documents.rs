//! Document store (Azure Cosmos DB SQL API over REST).
//!
//! Used as an append-only audit log: containers are partitioned on `/id`,
//! items are created once and then only read or queried.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde_json::{Value, json};
use url::Url;

use super::{StorageError, decode_key, ensure_success, http_date, sign, url_encode};

const SERVICE: &str = "document store";
const API_VERSION: &str = "2018-12-31";

/// Document store operations used by the audit log writer.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create the database and the container unless they already exist.
    async fn ensure_container(&self, container_id: &str) -> Result<(), StorageError>;

    /// Create one document per item. Each item must carry a string `id`.
    async fn create_items(
        &self,
        container_id: &str,
        items: Vec<Value>,
    ) -> Result<Vec<Value>, StorageError>;

    /// The document with `id`, or `None` if it does not exist.
    async fn read_item(&self, container_id: &str, id: &str) -> Result<Option<Value>, StorageError>;

    /// Every document matching `filter`, across partitions.
    async fn query_items(
        &self,
        container_id: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<Value>, StorageError>;
}

/// Selection of documents for [`DocumentStore::query_items`].
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentFilter {
    /// Top-level `field` equals `value`.
    FieldEquals { field: String, value: Value },

    /// `id` is one of `ids`, or none of them when `negate` is set.
    IdIn { ids: Vec<String>, negate: bool },
}

impl DocumentFilter {
    /// Parameterized SQL for the filter.
    pub fn to_query(&self) -> Result<Value, StorageError> {
        let (query, name, value) = match self {
            DocumentFilter::FieldEquals { field, value } => {
                check_property_name(field)?;
                (
                    format!("SELECT * FROM c WHERE c.{} = @value", field),
                    "@value",
                    value.clone(),
                )
            }
            DocumentFilter::IdIn { ids, negate } => (
                format!(
                    "SELECT * FROM c WHERE {}ARRAY_CONTAINS(@ids, c.id)",
                    if *negate { "NOT " } else { "" }
                ),
                "@ids",
                json!(ids),
            ),
        };

        Ok(json!({
            "query": query,
            "parameters": [{ "name": name, "value": value }]
        }))
    }

    /// Whether `document` is selected, evaluated locally.
    pub fn matches(&self, document: &Value) -> bool {
        match self {
            DocumentFilter::FieldEquals { field, value } => document.get(field) == Some(value),
            DocumentFilter::IdIn { ids, negate } => {
                let found = document
                    .get("id")
                    .and_then(Value::as_str)
                    .is_some_and(|id| ids.iter().any(|candidate| candidate == id));
                found != *negate
            }
        }
    }
}

fn check_property_name(name: &str) -> Result<(), StorageError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidName(format!(
            "'{}' is not a queryable property",
            name
        )))
    }
}

/// Cosmos DB client authenticated with the account master key.
#[derive(Debug)]
pub struct CosmosDocumentStore {
    http: reqwest::Client,
    endpoint: Url,
    key: Vec<u8>,
    database_id: String,
    ensured: Mutex<HashSet<String>>,
}

impl CosmosDocumentStore {
    pub fn new(endpoint: &str, master_key: &str, database_id: &str) -> Result<Self, StorageError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| StorageError::Credentials(format!("invalid cosmos endpoint: {}", e)))?;

        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
            key: decode_key(master_key)?,
            database_id: database_id.to_string(),
            ensured: Mutex::new(HashSet::new()),
        })
    }

    fn url(&self, resource_path: &str) -> Result<Url, StorageError> {
        self.endpoint
            .join(resource_path)
            .map_err(|e| StorageError::Credentials(format!("invalid resource path: {}", e)))
    }

    fn collection_link(&self, container_id: &str) -> String {
        format!("dbs/{}/colls/{}", self.database_id, container_id)
    }

    fn is_ensured(&self, container_id: &str) -> bool {
        self.ensured
            .lock()
            .map(|set| set.contains(container_id))
            .unwrap_or(false)
    }

    fn mark_ensured(&self, container_id: &str) {
        if let Ok(mut set) = self.ensured.lock() {
            set.insert(container_id.to_string());
        }
    }

    /// POST `body` to a feed, treating `409 Conflict` as "already exists".
    async fn create_if_not_exists(
        &self,
        resource_type: &str,
        parent_link: &str,
        body: Value,
    ) -> Result<(), StorageError> {
        let feed_path = if parent_link.is_empty() {
            resource_type.to_string()
        } else {
            format!("{}/{}", parent_link, resource_type)
        };

        let date = http_date(Utc::now());
        let token = master_key_token(&self.key, "POST", resource_type, parent_link, &date)?;

        let response = self
            .http
            .post(self.url(&feed_path)?)
            .header("authorization", token)
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            return Ok(());
        }

        ensure_success(SERVICE, response).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for CosmosDocumentStore {
    async fn ensure_container(&self, container_id: &str) -> Result<(), StorageError> {
        if self.is_ensured(container_id) {
            return Ok(());
        }

        self.create_if_not_exists("dbs", "", json!({ "id": self.database_id }))
            .await?;

        let database_link = format!("dbs/{}", self.database_id);
        self.create_if_not_exists(
            "colls",
            &database_link,
            json!({
                "id": container_id,
                "partitionKey": { "paths": ["/id"], "kind": "Hash" }
            }),
        )
        .await?;

        self.mark_ensured(container_id);
        Ok(())
    }

    async fn create_items(
        &self,
        container_id: &str,
        items: Vec<Value>,
    ) -> Result<Vec<Value>, StorageError> {
        let collection_link = self.collection_link(container_id);
        let url = self.url(&format!("{}/docs", collection_link))?;

        let mut created = Vec::with_capacity(items.len());
        for item in items {
            let id = item
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| StorageError::InvalidName("document has no string id".to_string()))?;
            let partition_key = serde_json::to_string(&[id])?;

            let date = http_date(Utc::now());
            let token = master_key_token(&self.key, "POST", "docs", &collection_link, &date)?;

            let response = self
                .http
                .post(url.clone())
                .header("authorization", token)
                .header("x-ms-date", &date)
                .header("x-ms-version", API_VERSION)
                .header("x-ms-documentdb-partitionkey", partition_key)
                .json(&item)
                .send()
                .await?;

            let response = ensure_success(SERVICE, response).await?;
            created.push(response.json::<Value>().await?);
        }

        Ok(created)
    }

    async fn read_item(&self, container_id: &str, id: &str) -> Result<Option<Value>, StorageError> {
        let document_link = format!("{}/docs/{}", self.collection_link(container_id), id);
        let date = http_date(Utc::now());
        let token = master_key_token(&self.key, "GET", "docs", &document_link, &date)?;

        let response = self
            .http
            .get(self.url(&document_link)?)
            .header("authorization", token)
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION)
            .header("x-ms-documentdb-partitionkey", serde_json::to_string(&[id])?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = ensure_success(SERVICE, response).await?;
        Ok(Some(response.json::<Value>().await?))
    }

    async fn query_items(
        &self,
        container_id: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<Value>, StorageError> {
        let collection_link = self.collection_link(container_id);
        let url = self.url(&format!("{}/docs", collection_link))?;
        let body = serde_json::to_vec(&filter.to_query()?)?;

        let mut documents = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let date = http_date(Utc::now());
            let token = master_key_token(&self.key, "POST", "docs", &collection_link, &date)?;

            let mut request = self
                .http
                .post(url.clone())
                .header("authorization", token)
                .header("x-ms-date", &date)
                .header("x-ms-version", API_VERSION)
                .header("x-ms-documentdb-isquery", "True")
                .header("x-ms-documentdb-query-enablecrosspartition", "True")
                .header("content-type", "application/query+json")
                .body(body.clone());
            if let Some(token) = &continuation {
                request = request.header("x-ms-continuation", token);
            }

            let response = ensure_success(SERVICE, request.send().await?).await?;
            continuation = response
                .headers()
                .get("x-ms-continuation")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);

            let page = response.json::<Value>().await?;
            if let Some(Value::Array(items)) = page.get("Documents") {
                documents.extend(items.iter().cloned());
            }

            if continuation.is_none() {
                break;
            }
        }

        Ok(documents)
    }
}

/// Master-key authorization token for one request.
fn master_key_token(
    key: &[u8],
    verb: &str,
    resource_type: &str,
    resource_link: &str,
    date: &str,
) -> Result<String, StorageError> {
    let payload = format!(
        "{}\n{}\n{}\n{}\n\n",
        verb.to_lowercase(),
        resource_type.to_lowercase(),
        resource_link,
        date.to_lowercase()
    );
    let signature = sign(key, &payload)?;

    Ok(url_encode(&format!("type=master&ver=1.0&sig={}", signature)))
}
