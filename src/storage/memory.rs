//! In-memory storage doubles for tests.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use super::{
    BlobReceipt, BlobStore, DocumentFilter, DocumentLibrary, DocumentStore, FolderListing,
    LibraryItem, MessageQueue, StorageError,
};

#[derive(Default)]
pub struct InMemoryQueue {
    sent: Mutex<Vec<(String, Value)>>,
}

impl InMemoryQueue {
    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn send_messages(
        &self,
        queue_name: &str,
        messages: Vec<Value>,
    ) -> Result<(), StorageError> {
        let mut sent = self.sent.lock().unwrap();
        sent.extend(messages.into_iter().map(|m| (queue_name.to_string(), m)));
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryDocuments {
    containers: Mutex<HashSet<String>>,
    items: Mutex<Vec<(String, Value)>>,
    pub unavailable: bool,
}

impl InMemoryDocuments {
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn items(&self) -> Vec<(String, Value)> {
        self.items.lock().unwrap().clone()
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable {
            return Err(StorageError::Service {
                service: "document store",
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocuments {
    async fn ensure_container(&self, container_id: &str) -> Result<(), StorageError> {
        self.containers
            .lock()
            .unwrap()
            .insert(container_id.to_string());
        Ok(())
    }

    async fn create_items(
        &self,
        container_id: &str,
        items: Vec<Value>,
    ) -> Result<Vec<Value>, StorageError> {
        self.check_available()?;
        if !self.containers.lock().unwrap().contains(container_id) {
            return Err(StorageError::Service {
                service: "document store",
                status: 404,
                body: format!("container {} does not exist", container_id),
            });
        }

        let mut stored = self.items.lock().unwrap();
        stored.extend(items.iter().map(|i| (container_id.to_string(), i.clone())));
        Ok(items)
    }

    async fn read_item(&self, container_id: &str, id: &str) -> Result<Option<Value>, StorageError> {
        self.check_available()?;
        let item = self
            .items
            .lock()
            .unwrap()
            .iter()
            .find(|(container, item)| {
                container == container_id && item.get("id").and_then(Value::as_str) == Some(id)
            })
            .map(|(_, item)| item.clone());
        Ok(item)
    }

    async fn query_items(
        &self,
        container_id: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<Value>, StorageError> {
        self.check_available()?;
        let items = self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|(container, item)| container == container_id && filter.matches(item))
            .map(|(_, item)| item.clone())
            .collect();
        Ok(items)
    }
}

/// Blob store whose n-th upload calls (0-based) fail.
#[derive(Default)]
pub struct InMemoryBlobStore {
    containers: Mutex<HashSet<String>>,
    uploads: Mutex<Vec<(String, String, usize)>>,
    calls: AtomicUsize,
    failing_calls: HashSet<usize>,
}

impl InMemoryBlobStore {
    pub fn failing_on(calls: &[usize]) -> Self {
        Self {
            failing_calls: calls.iter().copied().collect(),
            ..Self::default()
        }
    }

    /// `(container, blob name, size)` of every stored blob.
    pub fn uploads(&self) -> Vec<(String, String, usize)> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn has_container(&self, name: &str) -> bool {
        self.containers.lock().unwrap().contains(name)
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn ensure_container(&self, container_name: &str) -> Result<String, StorageError> {
        self.containers
            .lock()
            .unwrap()
            .insert(container_name.to_string());
        Ok(container_name.to_string())
    }

    async fn upload(
        &self,
        container_name: &str,
        blob_name: &str,
        _content_type: Option<&str>,
        data: Bytes,
    ) -> Result<BlobReceipt, StorageError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_calls.contains(&call) {
            return Err(StorageError::Service {
                service: "blob storage",
                status: 500,
                body: "upload failed".to_string(),
            });
        }

        self.uploads.lock().unwrap().push((
            container_name.to_string(),
            blob_name.to_string(),
            data.len(),
        ));

        Ok(BlobReceipt {
            etag: format!("\"0x8DC{:04}\"", call),
            request_id: format!("request-{}", call),
            version: "2021-08-06".to_string(),
        })
    }

    fn public_base_url(&self) -> &str {
        "https://devstore.blob.core.windows.net"
    }
}

/// Document library that, like the real one, only creates a folder whose
/// parent already exists.
pub struct InMemoryLibrary {
    folders: Mutex<BTreeSet<String>>,
    files: Mutex<BTreeMap<String, Bytes>>,
}

impl InMemoryLibrary {
    pub fn with_root(root: &str) -> Self {
        Self {
            folders: Mutex::new(BTreeSet::from([root.to_string()])),
            files: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_file(self, path: &str, content: &'static [u8]) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), Bytes::from_static(content));
        self
    }

    pub fn folders(&self) -> Vec<String> {
        self.folders.lock().unwrap().iter().cloned().collect()
    }

    fn item(path: &str) -> LibraryItem {
        LibraryItem {
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            server_relative_url: path.to_string(),
        }
    }

    fn parent(path: &str) -> &str {
        path.rsplit_once('/').map_or("", |(parent, _)| parent)
    }

    fn not_found(path: &str) -> StorageError {
        StorageError::Service {
            service: "document library",
            status: 404,
            body: format!("{} does not exist", path),
        }
    }
}

#[async_trait]
impl DocumentLibrary for InMemoryLibrary {
    async fn list_folder(&self, folder: &str) -> Result<FolderListing, StorageError> {
        let folders = self.folders.lock().unwrap();
        if !folders.contains(folder) {
            return Err(Self::not_found(folder));
        }

        Ok(FolderListing {
            files: self
                .files
                .lock()
                .unwrap()
                .keys()
                .filter(|path| Self::parent(path) == folder)
                .map(|path| Self::item(path))
                .collect(),
            folders: folders
                .iter()
                .filter(|path| Self::parent(path) == folder)
                .map(|path| Self::item(path))
                .collect(),
        })
    }

    async fn folder_exists(&self, folder: &str) -> Result<bool, StorageError> {
        Ok(self.folders.lock().unwrap().contains(folder))
    }

    async fn create_folder(&self, folder: &str) -> Result<(), StorageError> {
        let mut folders = self.folders.lock().unwrap();
        if !folders.contains(Self::parent(folder)) {
            return Err(Self::not_found(Self::parent(folder)));
        }
        folders.insert(folder.to_string());
        Ok(())
    }

    async fn upload(
        &self,
        folder: &str,
        file_name: &str,
        data: Bytes,
    ) -> Result<LibraryItem, StorageError> {
        if !self.folders.lock().unwrap().contains(folder) {
            return Err(Self::not_found(folder));
        }

        let path = format!("{}/{}", folder, file_name);
        self.files.lock().unwrap().insert(path.clone(), data);
        Ok(Self::item(&path))
    }

    async fn download(&self, file_path: &str) -> Result<Option<Bytes>, StorageError> {
        Ok(self.files.lock().unwrap().get(file_path).cloned())
    }

    fn domain(&self) -> &str {
        "https://contoso.sharepoint.com"
    }
}
