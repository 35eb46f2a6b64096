//! Metadata store trait and implementations.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::InstanceRepo;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: InstanceRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store and apply the schema.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // A single connection serializes writers, which also makes the
            // generation check and insert of one transaction atomic.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::InstanceRow;
    use crate::repos::{FingerprintSnapshot, Generation};
    use ember_core::{Fingerprint, InstanceDetail, InstanceDraft, InstanceId, InstanceRecord};
    use uuid::Uuid;

    #[async_trait]
    impl InstanceRepo for SqliteStore {
        async fn find_by_fingerprint(
            &self,
            fingerprint: &Fingerprint,
        ) -> MetadataResult<FingerprintSnapshot> {
            // Read generation and rows in one transaction so the token
            // describes exactly the returned set.
            let mut tx = self.pool.begin().await?;

            let generation: Option<i64> = sqlx::query_scalar(
                "SELECT generation FROM fingerprint_generations \
                 WHERE owner = ? AND project_id = ? AND last_commit = ?",
            )
            .bind(fingerprint.project.owner.as_str())
            .bind(fingerprint.project.id.as_str())
            .bind(fingerprint.last_commit.as_str())
            .fetch_optional(&mut *tx)
            .await?;

            let rows = sqlx::query_as::<_, InstanceRow>(
                "SELECT * FROM inference_instances \
                 WHERE owner = ? AND project_id = ? AND last_commit = ? \
                 ORDER BY rowid",
            )
            .bind(fingerprint.project.owner.as_str())
            .bind(fingerprint.project.id.as_str())
            .bind(fingerprint.last_commit.as_str())
            .fetch_all(&mut *tx)
            .await?;

            tx.commit().await?;

            let records = rows
                .into_iter()
                .map(InstanceRecord::try_from)
                .collect::<MetadataResult<Vec<_>>>()?;

            Ok(FingerprintSnapshot {
                records,
                generation: Generation(generation.unwrap_or(0)),
            })
        }

        async fn insert_if_generation_matches(
            &self,
            draft: &InstanceDraft,
            expected: Generation,
        ) -> MetadataResult<InstanceId> {
            let fingerprint = &draft.fingerprint;
            let mut tx = self.pool.begin().await?;

            // Compare-and-swap on the generation counter. A missing row is
            // generation 0.
            let advanced = if expected == Generation::default() {
                sqlx::query(
                    "INSERT INTO fingerprint_generations (owner, project_id, last_commit, generation) \
                     VALUES (?, ?, ?, 1) ON CONFLICT DO NOTHING",
                )
                .bind(fingerprint.project.owner.as_str())
                .bind(fingerprint.project.id.as_str())
                .bind(fingerprint.last_commit.as_str())
                .execute(&mut *tx)
                .await?
                .rows_affected()
            } else {
                sqlx::query(
                    "UPDATE fingerprint_generations SET generation = generation + 1 \
                     WHERE owner = ? AND project_id = ? AND last_commit = ? AND generation = ?",
                )
                .bind(fingerprint.project.owner.as_str())
                .bind(fingerprint.project.id.as_str())
                .bind(fingerprint.last_commit.as_str())
                .bind(expected.0)
                .execute(&mut *tx)
                .await?
                .rows_affected()
            };

            if advanced == 0 {
                tx.rollback().await?;
                return Err(MetadataError::DuplicateCreation(fingerprint.to_string()));
            }

            let instance_id = Uuid::new_v4();
            sqlx::query(
                r#"
                INSERT INTO inference_instances
                    (instance_id, owner, project_id, last_commit, project_name,
                     resource_level, requester, access_url, error, expiry, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, NULL, NULL, NULL, ?)
                "#,
            )
            .bind(instance_id)
            .bind(fingerprint.project.owner.as_str())
            .bind(fingerprint.project.id.as_str())
            .bind(fingerprint.last_commit.as_str())
            .bind(&draft.project_name)
            .bind(draft.resource_level.as_ref().map(|level| level.as_str()))
            .bind(draft.requester.as_str())
            .bind(draft.created_at)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(InstanceId::from_uuid(instance_id))
        }

        async fn update_detail(
            &self,
            id: InstanceId,
            detail: &InstanceDetail,
        ) -> MetadataResult<()> {
            detail.validate()?;

            let result = sqlx::query(
                "UPDATE inference_instances SET \
                     expiry = COALESCE(?, expiry), \
                     access_url = COALESCE(?, access_url), \
                     error = COALESCE(?, error) \
                 WHERE instance_id = ?",
            )
            .bind(detail.expiry)
            .bind(detail.access_url.as_deref())
            .bind(detail.error.as_deref())
            .bind(*id.as_uuid())
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("instance {id}")));
            }
            Ok(())
        }

        async fn find_by_id(&self, id: InstanceId) -> MetadataResult<Option<InstanceRecord>> {
            let row = sqlx::query_as::<_, InstanceRow>(
                "SELECT * FROM inference_instances WHERE instance_id = ?",
            )
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

            row.map(InstanceRecord::try_from).transpose()
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Generation counter per (project, commit) fingerprint
CREATE TABLE IF NOT EXISTS fingerprint_generations (
    owner TEXT NOT NULL,
    project_id TEXT NOT NULL,
    last_commit TEXT NOT NULL,
    generation INTEGER NOT NULL,
    PRIMARY KEY (owner, project_id, last_commit)
);

-- Inference instances; rows are never deleted by the service
CREATE TABLE IF NOT EXISTS inference_instances (
    instance_id BLOB PRIMARY KEY,
    owner TEXT NOT NULL,
    project_id TEXT NOT NULL,
    last_commit TEXT NOT NULL,
    project_name TEXT NOT NULL,
    resource_level TEXT,
    requester TEXT NOT NULL,
    access_url TEXT,
    error TEXT,
    expiry INTEGER,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_inference_instances_fingerprint
    ON inference_instances(owner, project_id, last_commit);
"#;
