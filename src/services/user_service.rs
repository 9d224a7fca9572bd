//! Read access to the users provisioned by the identity provider.

use async_trait::async_trait;

use crate::db::DbPool;
use crate::error::AppError;
use crate::models::user::User;

/// Lookup of authenticated users.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// The user with `id`, or `None` if no such row exists.
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError>;
}

/// `auth_user` in Postgres.
pub struct PgUserRepository {
    pool: DbPool,
}

impl PgUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM auth_user WHERE id = $1",
            User::COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }
}
