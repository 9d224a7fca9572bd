//! Database connection pool, migrations and the relational data-access layer.
//!
//! This module provides:
//! - Creating and managing a PostgreSQL connection pool
//! - Running database migrations automatically
//! - `Database`: list/create/upsert/raw helpers with explicit transaction boundaries
//!
//! There is intentionally no generic delete helper. Deletions go through
//! [`Database::raw`] so every destructive statement is spelled out by the caller.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{
    Arguments, FromRow, PgConnection, Pool, Postgres,
    postgres::{PgArguments, PgRow},
};

use crate::error::AppError;

/// Type alias for PostgreSQL connection pool.
pub type DbPool = Pool<Postgres>;

/// Postgres refuses statements with more bind parameters than this.
const MAX_BIND_PARAMS: usize = 65_535;

/// Create a new PostgreSQL connection pool.
///
/// Connections are created lazily as needed and handed back to the pool when
/// a query or transaction finishes, so every operation borrows a connection
/// for exactly its own duration.
///
/// # Errors
///
/// Returns an error if the connection string is invalid or the server
/// cannot be reached.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Run database migrations from the `migrations/` directory.
///
/// Migrations are tracked in the `_sqlx_migrations` table, so each migration runs only once.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// A single bindable value for dynamic statements.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// Bound as an untyped text NULL.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(i64::from(value))
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

/// One row to write: column name -> value.
pub type Record = BTreeMap<String, SqlValue>;

/// Relational data-access wrapper around the shared pool.
///
/// Each write runs in its own transaction: commit on success, rollback and
/// log on failure. The error is always returned to the caller.
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Select rows for `query`, binding `params` to `$1..$n` in order.
    pub async fn list<T>(&self, query: &str, params: &[SqlValue]) -> Result<Vec<T>, AppError>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let arguments = to_arguments(params)?;

        sqlx::query_as_with::<_, T, _>(query, arguments)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Error occurred when listing: {}", e);
                AppError::Database(e)
            })
    }

    /// Bulk insert `rows` into `table`.
    ///
    /// Returns `false` without touching the database when `rows` is empty.
    pub async fn create(&self, table: &str, rows: &[Record]) -> Result<bool, AppError> {
        self.write_rows(table, rows, None).await
    }

    /// Bulk insert `rows`, replacing existing rows that collide on `primary_columns`.
    pub async fn upsert(
        &self,
        table: &str,
        rows: &[Record],
        primary_columns: &[&str],
    ) -> Result<bool, AppError> {
        if primary_columns.is_empty() {
            return Err(AppError::InvalidRequest(
                "upsert requires at least one primary column".to_string(),
            ));
        }

        self.write_rows(table, rows, Some(primary_columns)).await
    }

    /// Execute one statement in its own transaction.
    ///
    /// Returns `(affected_rows > 0, affected_rows)`.
    pub async fn raw(&self, sql: &str) -> Result<(bool, u64), AppError> {
        self.execute_in_transaction("raw", &[sql]).await
    }

    /// Execute two statements in one transaction, summing affected rows.
    pub async fn double_raw(
        &self,
        first_query: &str,
        second_query: &str,
    ) -> Result<(bool, u64), AppError> {
        self.execute_in_transaction("double_raw", &[first_query, second_query])
            .await
    }

    async fn execute_in_transaction(
        &self,
        operation: &str,
        statements: &[&str],
    ) -> Result<(bool, u64), AppError> {
        let mut tx = self.pool.begin().await?;

        match execute_statements(&mut tx, statements).await {
            Ok(affected) => {
                tx.commit().await?;
                Ok((affected > 0, affected))
            }
            Err(e) => {
                tracing::error!("Error occurred in Database, for method '{}': {}", operation, e);
                if let Err(rollback_error) = tx.rollback().await {
                    tracing::error!("Rollback failed: {}", rollback_error);
                }
                Err(AppError::Database(e))
            }
        }
    }

    async fn write_rows(
        &self,
        table: &str,
        rows: &[Record],
        conflict_columns: Option<&[&str]>,
    ) -> Result<bool, AppError> {
        let Some(first) = rows.first() else {
            return Ok(false);
        };

        let columns: Vec<&str> = first.keys().map(String::as_str).collect();
        if columns.is_empty() {
            return Err(AppError::InvalidRequest(format!(
                "rows for table '{}' have no columns",
                table
            )));
        }
        check_rows_share_columns(rows, &columns)?;

        let rows_per_statement = MAX_BIND_PARAMS / columns.len();

        let mut tx = self.pool.begin().await?;

        let outcome = write_chunks(
            &mut tx,
            table,
            &columns,
            rows,
            rows_per_statement,
            conflict_columns,
        )
        .await;

        match outcome {
            Ok(()) => {
                tx.commit().await?;
                Ok(true)
            }
            Err(e) => {
                tracing::error!(
                    "Error occurred when writing rows, for table '{}': {}",
                    table,
                    e
                );
                if let Err(rollback_error) = tx.rollback().await {
                    tracing::error!("Rollback failed: {}", rollback_error);
                }
                Err(e)
            }
        }
    }
}

async fn execute_statements(
    conn: &mut PgConnection,
    statements: &[&str],
) -> Result<u64, sqlx::Error> {
    let mut affected = 0;
    for statement in statements {
        affected += sqlx::query(statement)
            .execute(&mut *conn)
            .await?
            .rows_affected();
    }
    Ok(affected)
}

async fn write_chunks(
    conn: &mut PgConnection,
    table: &str,
    columns: &[&str],
    rows: &[Record],
    rows_per_statement: usize,
    conflict_columns: Option<&[&str]>,
) -> Result<(), AppError> {
    for chunk in rows.chunks(rows_per_statement) {
        let sql = build_insert_sql(table, columns, chunk.len(), conflict_columns)?;

        let values: Vec<SqlValue> = chunk
            .iter()
            .flat_map(|row| columns.iter().map(|column| row[*column].clone()))
            .collect();
        let arguments = to_arguments(&values)?;

        sqlx::query_with(&sql, arguments)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

fn check_rows_share_columns(rows: &[Record], columns: &[&str]) -> Result<(), AppError> {
    for (index, row) in rows.iter().enumerate() {
        let same = row.len() == columns.len() && columns.iter().all(|c| row.contains_key(*c));
        if !same {
            return Err(AppError::InvalidRequest(format!(
                "row {} does not have the same columns as the first row",
                index
            )));
        }
    }
    Ok(())
}

fn to_arguments(values: &[SqlValue]) -> Result<PgArguments, sqlx::Error> {
    let mut arguments = PgArguments::default();

    for value in values {
        let added = match value {
            SqlValue::Null => arguments.add(None::<String>),
            SqlValue::Bool(v) => arguments.add(*v),
            SqlValue::Int(v) => arguments.add(*v),
            SqlValue::Float(v) => arguments.add(*v),
            SqlValue::Text(v) => arguments.add(v.clone()),
            SqlValue::Timestamp(v) => arguments.add(*v),
            SqlValue::Json(v) => arguments.add(sqlx::types::Json(v.clone())),
        };
        added.map_err(sqlx::Error::Encode)?;
    }

    Ok(arguments)
}

/// Quote a table or column name after checking it is a plain identifier.
fn quote_identifier(name: &str) -> Result<String, AppError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid {
        return Err(AppError::InvalidRequest(format!(
            "'{}' is not a valid identifier",
            name
        )));
    }

    Ok(format!("\"{}\"", name))
}

/// Build a multi-row `INSERT`, optionally with an `ON CONFLICT` upsert clause.
fn build_insert_sql(
    table: &str,
    columns: &[&str],
    row_count: usize,
    conflict_columns: Option<&[&str]>,
) -> Result<String, AppError> {
    let table = quote_identifier(table)?;
    let quoted: Vec<String> = columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Result<_, _>>()?;

    let mut placeholder = 0;
    let tuples: Vec<String> = (0..row_count)
        .map(|_| {
            let slots: Vec<String> = (0..columns.len())
                .map(|_| {
                    placeholder += 1;
                    format!("${}", placeholder)
                })
                .collect();
            format!("({})", slots.join(", "))
        })
        .collect();

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        table,
        quoted.join(", "),
        tuples.join(", ")
    );

    if let Some(keys) = conflict_columns {
        let quoted_keys: Vec<String> = keys
            .iter()
            .map(|k| quote_identifier(k))
            .collect::<Result<_, _>>()?;

        let updates: Vec<String> = columns
            .iter()
            .filter(|c| !keys.contains(*c))
            .map(|c| format!("\"{0}\" = EXCLUDED.\"{0}\"", c))
            .collect();

        if updates.is_empty() {
            sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", quoted_keys.join(", ")));
        } else {
            sql.push_str(&format!(
                " ON CONFLICT ({}) DO UPDATE SET {}",
                quoted_keys.join(", "),
                updates.join(", ")
            ));
        }
    }

    Ok(sql)
}
