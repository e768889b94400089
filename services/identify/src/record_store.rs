use crate::classification::ClassificationResult;
use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// One identification request and, once available, its result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentificationRequest {
    /// Store-assigned ID
    pub id: Uuid,
    /// Owner the record belongs to
    pub owner_id: String,
    /// Object key of the uploaded image
    pub image_ref: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Empty while classification is in flight or after it failed
    pub result: Option<ClassificationResult>,
}

#[derive(Debug, FromRow)]
struct IdentificationRow {
    id: Uuid,
    owner_id: String,
    image_ref: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    result: Option<Json<ClassificationResult>>,
}

impl From<IdentificationRow> for IdentificationRequest {
    fn from(row: IdentificationRow) -> Self {
        Self {
            id: row.id,
            owner_id: row.owner_id,
            image_ref: row.image_ref,
            created_at: row.created_at,
            updated_at: row.updated_at,
            result: row.result.map(|Json(result)| result),
        }
    }
}

/// Structured store holding one record per identification request
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a record with an empty result, returning its ID
    async fn create_request(&self, owner_id: &str, image_ref: &str) -> Result<Uuid>;

    /// Attach the classification result to an owner's record
    async fn set_result(&self, owner_id: &str, id: Uuid, result: &ClassificationResult) -> Result<()>;

    /// Records of `owner_id` created in `[start, end)`, newest first
    async fn list_created_between(
        &self,
        owner_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<IdentificationRequest>>;

    /// Connectivity check for readiness probes
    async fn ping(&self) -> Result<()>;
}

/// PostgreSQL-backed record store
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Create a new record store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    #[instrument(skip(self))]
    async fn create_request(&self, owner_id: &str, image_ref: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO identification_requests (
                id, owner_id, image_ref, result, created_at, updated_at
            ) VALUES (
                $1, $2, $3, NULL, NOW(), NOW()
            )
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .bind(image_ref)
        .execute(&self.pool)
        .await
        .context("Failed to insert identification request")?;

        debug!(id = %id, "Identification request created");
        metrics::counter!("identify.records.created").increment(1);

        Ok(id)
    }

    #[instrument(skip(self, result))]
    async fn set_result(&self, owner_id: &str, id: Uuid, result: &ClassificationResult) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE identification_requests
            SET result = $3, updated_at = NOW()
            WHERE id = $1 AND owner_id = $2
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .bind(Json(result))
        .execute(&self.pool)
        .await
        .context("Failed to store classification result")?;

        if updated.rows_affected() == 0 {
            anyhow::bail!("Identification request {} not found for owner", id);
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_created_between(
        &self,
        owner_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<IdentificationRequest>> {
        let rows = sqlx::query_as::<_, IdentificationRow>(
            r#"
            SELECT id, owner_id, image_ref, created_at, updated_at, result
            FROM identification_requests
            WHERE owner_id = $1
              AND created_at >= $2
              AND created_at < $3
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(owner_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query identification history")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database unreachable")?;
        Ok(())
    }
}
