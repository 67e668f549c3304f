//! PostgreSQL implementation of OperationStore
//!
//! Records live in `async_operations` with a unique `request_id` and an
//! optimistic-lock `version` column. Every update is a single
//! `UPDATE ... WHERE version = $n`, so a lost race surfaces as
//! [`TrackerError::ConcurrencyConflict`] instead of a silent overwrite.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};

use super::operation::{AsyncOperation, OperationStatus};
use super::store::{OperationStore, TrackerError};

/// PostgreSQL implementation of OperationStore
///
/// # Example
///
/// ```ignore
/// use phonebill_resilience::PostgresOperationStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/phonebill").await?;
/// let store = PostgresOperationStore::new(pool);
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresOperationStore {
    pool: PgPool,
}

impl PostgresOperationStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> Result<(), TrackerError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to run migrations: {}", e);
                TrackerError::Database(e.to_string())
            })
    }
}

const COLUMNS: &str = "request_id, operation, domain_key, status, requested_at, processed_at, \
                       result_summary, failure_reason, version";

#[async_trait]
impl OperationStore for PostgresOperationStore {
    #[instrument(skip(self, operation), fields(request_id = %operation.request_id))]
    async fn insert(&self, operation: &AsyncOperation) -> Result<(), TrackerError> {
        let result = sqlx::query(
            r#"
            INSERT INTO async_operations
                (request_id, operation, domain_key, status, requested_at, processed_at,
                 result_summary, failure_reason, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (request_id) DO NOTHING
            "#,
        )
        .bind(&operation.request_id)
        .bind(&operation.operation)
        .bind(&operation.domain_key)
        .bind(operation.status.as_str())
        .bind(operation.requested_at)
        .bind(operation.processed_at)
        .bind(&operation.result_payload)
        .bind(&operation.failure_reason)
        .bind(operation.version)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to insert operation: {}", e);
            TrackerError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return Err(TrackerError::AlreadyExists(operation.request_id.clone()));
        }

        debug!(operation = %operation.operation, "created operation record");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, request_id: &str) -> Result<Option<AsyncOperation>, TrackerError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM async_operations WHERE request_id = $1"
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get operation: {}", e);
            TrackerError::Database(e.to_string())
        })?;

        row.map(|row| operation_from_row(&row)).transpose()
    }

    #[instrument(skip(self, operation), fields(request_id = %operation.request_id, status = %operation.status))]
    async fn update(&self, operation: &AsyncOperation) -> Result<AsyncOperation, TrackerError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE async_operations
            SET status = $2,
                processed_at = $3,
                result_summary = $4,
                failure_reason = $5,
                version = version + 1
            WHERE request_id = $1 AND version = $6
            RETURNING {COLUMNS}
            "#
        ))
        .bind(&operation.request_id)
        .bind(operation.status.as_str())
        .bind(operation.processed_at)
        .bind(&operation.result_payload)
        .bind(&operation.failure_reason)
        .bind(operation.version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update operation: {}", e);
            TrackerError::Database(e.to_string())
        })?;

        if let Some(row) = row {
            return operation_from_row(&row);
        }

        // Nothing updated: either the record is gone or the version moved on
        let actual = sqlx::query("SELECT version FROM async_operations WHERE request_id = $1")
            .bind(&operation.request_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TrackerError::Database(e.to_string()))?;

        match actual {
            Some(row) => Err(TrackerError::ConcurrencyConflict {
                request_id: operation.request_id.clone(),
                expected: operation.version,
                actual: row.get("version"),
            }),
            None => Err(TrackerError::NotFound(operation.request_id.clone())),
        }
    }

    #[instrument(skip(self))]
    async fn list_by_status(
        &self,
        operation: &str,
        status: OperationStatus,
        limit: usize,
    ) -> Result<Vec<AsyncOperation>, TrackerError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM async_operations
            WHERE operation = $1 AND status = $2
            ORDER BY requested_at ASC
            LIMIT $3
            "#
        ))
        .bind(operation)
        .bind(status.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list operations: {}", e);
            TrackerError::Database(e.to_string())
        })?;

        rows.iter().map(operation_from_row).collect()
    }
}

fn operation_from_row(row: &PgRow) -> Result<AsyncOperation, TrackerError> {
    let status: String = row.get("status");
    Ok(AsyncOperation {
        request_id: row.get("request_id"),
        operation: row.get("operation"),
        domain_key: row.get("domain_key"),
        status: status.parse().map_err(TrackerError::Serialization)?,
        requested_at: row.get("requested_at"),
        processed_at: row.get("processed_at"),
        result_payload: row.get("result_summary"),
        failure_reason: row.get("failure_reason"),
        version: row.get("version"),
    })
}
