use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use lattice_core::{
    error::{LatticeError, Result},
    models::{ContextLevel, ContextRecord},
    repository::ContextRepository,
};

use crate::common::{db_err, encode_json, map_sqlx_err, row_to_context};

const CONTEXT_COLUMNS: &str = "level, id, parent_id, data, local_overrides, \
     delegation_triggers, inheritance_disabled, version, created_at, updated_at";

/// SQLite implementation of the context repository.
///
/// Records are keyed by `(level, id)` and carry a monotonic version used
/// for optimistic locking: a concurrent writer that lost the race gets
/// `ConflictingState` and re-reads.
#[derive(Debug, Clone)]
pub struct SqliteContextRepository {
    pool: SqlitePool,
}

impl SqliteContextRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContextRepository for SqliteContextRepository {
    async fn insert(&self, record: ContextRecord) -> Result<ContextRecord> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            "INSERT INTO contexts \
             (level, id, parent_id, data, local_overrides, delegation_triggers, \
              inheritance_disabled, version, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?) \
             RETURNING {CONTEXT_COLUMNS}"
        ))
        .bind(record.level.as_str())
        .bind(&record.id)
        .bind(&record.parent_id)
        .bind(encode_json(&record.data)?)
        .bind(encode_json(&record.local_overrides)?)
        .bind(encode_json(&record.delegation_triggers)?)
        .bind(record.inheritance_disabled)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            map_sqlx_err(
                e,
                &format!("{} context '{}' already exists", record.level, record.id),
            )
        })?;

        row_to_context(&row)
    }

    async fn get(&self, level: ContextLevel, id: &str) -> Result<Option<ContextRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {CONTEXT_COLUMNS} FROM contexts WHERE level = ? AND id = ?"
        ))
        .bind(level.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(row_to_context).transpose()
    }

    async fn update(&self, record: ContextRecord) -> Result<ContextRecord> {
        let now = Utc::now();
        let new_version = record.version + 1;

        // Optimistic locking: only write when the stored version matches
        let result = sqlx::query(
            "UPDATE contexts SET data = ?, local_overrides = ?, delegation_triggers = ?, \
             inheritance_disabled = ?, version = ?, updated_at = ? \
             WHERE level = ? AND id = ? AND version = ?",
        )
        .bind(encode_json(&record.data)?)
        .bind(encode_json(&record.local_overrides)?)
        .bind(encode_json(&record.delegation_triggers)?)
        .bind(record.inheritance_disabled)
        .bind(new_version)
        .bind(now.to_rfc3339())
        .bind(record.level.as_str())
        .bind(&record.id)
        .bind(record.version)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM contexts WHERE level = ? AND id = ?")
                .bind(record.level.as_str())
                .bind(&record.id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
            return if exists.is_none() {
                Err(LatticeError::not_found(
                    &format!("{} context", record.level),
                    &record.id,
                ))
            } else {
                Err(LatticeError::ConflictingState(format!(
                    "{} context '{}' was modified concurrently",
                    record.level, record.id
                )))
            };
        }

        let mut updated = record;
        updated.version = new_version;
        updated.updated_at = now;
        Ok(updated)
    }

    async fn delete(&self, level: ContextLevel, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM contexts WHERE level = ? AND id = ?")
            .bind(level.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(LatticeError::not_found(&format!("{level} context"), id));
        }
        Ok(())
    }

    async fn list(&self, level: ContextLevel) -> Result<Vec<ContextRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {CONTEXT_COLUMNS} FROM contexts WHERE level = ? ORDER BY created_at, id"
        ))
        .bind(level.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_context).collect()
    }

    async fn children_of(&self, level: ContextLevel, id: &str) -> Result<Vec<String>> {
        let child_level = match level {
            ContextLevel::Global => ContextLevel::Project,
            ContextLevel::Project => ContextLevel::Branch,
            ContextLevel::Branch => ContextLevel::Task,
            ContextLevel::Task => return Ok(vec![]),
        };

        let rows = sqlx::query(
            "SELECT id FROM contexts WHERE level = ? AND parent_id = ? ORDER BY id",
        )
        .bind(child_level.as_str())
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(|row| row.get::<String, _>("id")).collect())
    }
}
