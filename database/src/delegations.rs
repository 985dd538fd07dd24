use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use lattice_core::{
    error::{LatticeError, Result},
    models::ContextDelegation,
    repository::DelegationRepository,
};

use crate::common::{db_err, encode_json, row_to_delegation};

const DELEGATION_COLUMNS: &str = "id, source_level, source_id, target_level, target_id, \
     delegated_data, reason, auto_delegated, processed, approved, rejected_reason, \
     created_at, processed_at";

/// SQLite implementation of the delegation queue.
#[derive(Debug, Clone)]
pub struct SqliteDelegationRepository {
    pool: SqlitePool,
}

impl SqliteDelegationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DelegationRepository for SqliteDelegationRepository {
    async fn create(&self, delegation: ContextDelegation) -> Result<ContextDelegation> {
        let row = sqlx::query(&format!(
            "INSERT INTO context_delegations \
             (id, source_level, source_id, target_level, target_id, delegated_data, reason, \
              auto_delegated, processed, approved, rejected_reason, created_at, processed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {DELEGATION_COLUMNS}"
        ))
        .bind(&delegation.id)
        .bind(delegation.source_level.as_str())
        .bind(&delegation.source_id)
        .bind(delegation.target_level.as_str())
        .bind(&delegation.target_id)
        .bind(encode_json(&delegation.delegated_data)?)
        .bind(&delegation.reason)
        .bind(delegation.auto_delegated)
        .bind(delegation.processed)
        .bind(delegation.approved)
        .bind(&delegation.rejected_reason)
        .bind(delegation.created_at.to_rfc3339())
        .bind(delegation.processed_at.map(|at| at.to_rfc3339()))
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        row_to_delegation(&row)
    }

    async fn get(&self, id: &str) -> Result<Option<ContextDelegation>> {
        let row = sqlx::query(&format!(
            "SELECT {DELEGATION_COLUMNS} FROM context_delegations WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(row_to_delegation).transpose()
    }

    async fn list(&self, processed: Option<bool>) -> Result<Vec<ContextDelegation>> {
        let rows = match processed {
            Some(processed) => sqlx::query(&format!(
                "SELECT {DELEGATION_COLUMNS} FROM context_delegations \
                 WHERE processed = ? ORDER BY created_at, id"
            ))
            .bind(processed)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?,
            None => sqlx::query(&format!(
                "SELECT {DELEGATION_COLUMNS} FROM context_delegations ORDER BY created_at, id"
            ))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?,
        };
        rows.iter().map(row_to_delegation).collect()
    }

    async fn mark_processed(
        &self,
        id: &str,
        approved: bool,
        rejected_reason: Option<String>,
    ) -> Result<ContextDelegation> {
        let row = sqlx::query(&format!(
            "UPDATE context_delegations SET processed = 1, approved = ?, \
             rejected_reason = ?, processed_at = ? WHERE id = ? \
             RETURNING {DELEGATION_COLUMNS}"
        ))
        .bind(approved)
        .bind(&rejected_reason)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| LatticeError::not_found("Delegation", id))?;

        row_to_delegation(&row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteDatabase;
    use lattice_core::models::{new_entity_id, ContextLevel};
    use serde_json::json;

    fn delegation() -> ContextDelegation {
        ContextDelegation {
            id: new_entity_id(),
            source_level: ContextLevel::Task,
            source_id: "t1".to_string(),
            target_level: ContextLevel::Project,
            target_id: "p1".to_string(),
            delegated_data: json!({"shared": {"pattern": "JWT"}}),
            reason: "reusable".to_string(),
            auto_delegated: true,
            processed: false,
            approved: None,
            rejected_reason: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = SqliteDatabase::in_memory().await.unwrap().delegations();
        let created = repo.create(delegation()).await.unwrap();

        let fetched = repo.get(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.delegated_data, json!({"shared": {"pattern": "JWT"}}));
        assert!(!fetched.processed);
        assert_eq!(fetched.approved, None);
    }

    #[tokio::test]
    async fn test_mark_processed_approved() {
        let repo = SqliteDatabase::in_memory().await.unwrap().delegations();
        let created = repo.create(delegation()).await.unwrap();

        let processed = repo.mark_processed(&created.id, true, None).await.unwrap();
        assert!(processed.processed);
        assert_eq!(processed.approved, Some(true));
        assert!(processed.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_mark_processed_rejected() {
        let repo = SqliteDatabase::in_memory().await.unwrap().delegations();
        let created = repo.create(delegation()).await.unwrap();

        let rejected = repo
            .mark_processed(&created.id, false, Some("schema violation".to_string()))
            .await
            .unwrap();
        assert_eq!(rejected.approved, Some(false));
        assert_eq!(rejected.rejected_reason.as_deref(), Some("schema violation"));
    }

    #[tokio::test]
    async fn test_list_filters_by_processed() {
        let repo = SqliteDatabase::in_memory().await.unwrap().delegations();
        let first = repo.create(delegation()).await.unwrap();
        repo.create(delegation()).await.unwrap();
        repo.mark_processed(&first.id, true, None).await.unwrap();

        assert_eq!(repo.list(Some(false)).await.unwrap().len(), 1);
        assert_eq!(repo.list(Some(true)).await.unwrap().len(), 1);
        assert_eq!(repo.list(None).await.unwrap().len(), 2);
    }
}
