//! Shared application state handed to every handler and middleware.

use std::sync::Arc;

use crate::config::Config;
use crate::db::{Database, DbPool};
use crate::services::email_service::Mailer;
use crate::services::upload_service::{BlobFileRepository, PgBlobFileRepository};
use crate::services::user_service::{PgUserRepository, UserRepository};
use crate::storage::{BlobStore, DocumentLibrary, DocumentStore, MessageQueue};

/// Cloneable handle to everything a request may need.
///
/// All members are reference counted, so cloning per request is cheap.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,

    /// Users of the database that owns `auth_user`.
    pub users: Arc<dyn UserRepository>,
    pub blob_files: Arc<dyn BlobFileRepository>,
    pub blob_store: Arc<dyn BlobStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub mailer: Mailer,

    /// Absent unless the document library is configured.
    pub library: Option<Arc<dyn DocumentLibrary>>,
}

impl AppState {
    pub fn new(
        config: Config,
        pool: DbPool,
        users_pool: DbPool,
        blob_store: Arc<dyn BlobStore>,
        documents: Arc<dyn DocumentStore>,
        queue: Arc<dyn MessageQueue>,
    ) -> Self {
        let config = Arc::new(config);
        let mailer = Mailer::new(config.clone(), queue);

        Self {
            config,
            users: Arc::new(PgUserRepository::new(users_pool)),
            blob_files: Arc::new(PgBlobFileRepository::new(pool.clone())),
            db: Database::new(pool),
            blob_store,
            documents,
            mailer,
            library: None,
        }
    }

    pub fn with_library(mut self, library: Arc<dyn DocumentLibrary>) -> Self {
        self.library = Some(library);
        self
    }

    #[cfg(test)]
    pub fn with_users(mut self, users: Arc<dyn UserRepository>) -> Self {
        self.users = users;
        self
    }

    #[cfg(test)]
    pub fn with_blob_files(mut self, blob_files: Arc<dyn BlobFileRepository>) -> Self {
        self.blob_files = blob_files;
        self
    }
}

/// In-memory backends behind an [`AppState`] for handler and router tests.
///
/// The database pool never connects, so only routes that stay off
/// `Database` can run end to end.
#[cfg(test)]
pub(crate) struct TestBackends {
    pub blob_store: Arc<crate::storage::memory::InMemoryBlobStore>,
    pub blob_files: Arc<crate::services::memory::InMemoryBlobFiles>,
    pub documents: Arc<crate::storage::memory::InMemoryDocuments>,
    pub queue: Arc<crate::storage::memory::InMemoryQueue>,
    pub library: Arc<crate::storage::memory::InMemoryLibrary>,
}

#[cfg(test)]
impl TestBackends {
    pub fn new() -> Self {
        Self::with_documents(crate::storage::memory::InMemoryDocuments::default())
    }

    pub fn with_documents(documents: crate::storage::memory::InMemoryDocuments) -> Self {
        Self {
            blob_store: Arc::default(),
            blob_files: Arc::default(),
            documents: Arc::new(documents),
            queue: Arc::default(),
            library: Arc::new(crate::storage::memory::InMemoryLibrary::with_root(
                "/sites/reports/Shared Documents",
            )),
        }
    }

    /// State whose only known user is [`crate::models::user::sample_user`].
    pub fn state(&self) -> AppState {
        let config = crate::config::test_config();
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .unwrap();

        AppState::new(
            config,
            pool.clone(),
            pool,
            self.blob_store.clone(),
            self.documents.clone(),
            self.queue.clone(),
        )
        .with_users(Arc::new(crate::services::memory::InMemoryUsers::with([
            crate::models::user::sample_user(),
        ])))
        .with_blob_files(self.blob_files.clone())
        .with_library(self.library.clone())
    }
}
