//! In-memory repository doubles for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::upload_service::BlobFileRepository;
use super::user_service::UserRepository;
use crate::error::AppError;
use crate::models::blob_file::{BlobFile, NewBlobFile};
use crate::models::user::User;

/// Assigns ids in insertion order, optionally failing for one file name.
#[derive(Default)]
pub struct InMemoryBlobFiles {
    rows: Mutex<Vec<BlobFile>>,
    failing_name: Option<&'static str>,
}

impl InMemoryBlobFiles {
    pub fn failing_for(file_name: &'static str) -> Self {
        Self {
            failing_name: Some(file_name),
            ..Self::default()
        }
    }

    pub fn rows(&self) -> Vec<BlobFile> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobFileRepository for InMemoryBlobFiles {
    async fn insert(&self, file: NewBlobFile) -> Result<BlobFile, AppError> {
        if self.failing_name == Some(file.original_file_name.as_str()) {
            return Err(AppError::Internal("insert failed".to_string()));
        }

        let mut rows = self.rows.lock().unwrap();
        let stored = file.into_blob_file(rows.len() as i64 + 1, Utc::now());
        rows.push(stored.clone());
        Ok(stored)
    }
}

#[derive(Default)]
pub struct InMemoryUsers {
    users: Vec<User>,
}

impl InMemoryUsers {
    pub fn with(users: impl IntoIterator<Item = User>) -> Self {
        Self {
            users: users.into_iter().collect(),
        }
    }
}

#[async_trait]
impl UserRepository for InMemoryUsers {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        Ok(self.users.iter().find(|user| user.id == id).cloned())
    }
}
