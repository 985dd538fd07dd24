use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use lattice_core::{
    error::{LatticeError, Result},
    models::{new_entity_id, NewProject, Project, ProjectStatus, UpdateProject},
    repository::{CascadeDelete, ProjectRepository},
};

use crate::common::{db_err, map_sqlx_err, row_to_project};

/// SQLite implementation of the project repository.
#[derive(Debug, Clone)]
pub struct SqliteProjectRepository {
    pool: SqlitePool,
}

impl SqliteProjectRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectRepository for SqliteProjectRepository {
    async fn create(&self, project: NewProject, user_id: &str) -> Result<Project> {
        if project.name.trim().is_empty() {
            return Err(LatticeError::empty_field("name"));
        }

        let now = Utc::now();
        let id = new_entity_id();

        let row = sqlx::query(
            r#"
            INSERT INTO projects (id, name, description, user_id, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id, name, description, user_id, status, created_at, updated_at
            "#,
        )
        .bind(&id)
        .bind(&project.name)
        .bind(&project.description)
        .bind(user_id)
        .bind(ProjectStatus::Active.as_str())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_err(e, &format!("Project '{}' already exists", project.name)))?;

        row_to_project(&row)
    }

    async fn get(&self, id: &str) -> Result<Option<Project>> {
        let row = sqlx::query(
            "SELECT id, name, description, user_id, status, created_at, updated_at \
             FROM projects WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(row_to_project).transpose()
    }

    async fn get_by_name(&self, user_id: &str, name: &str) -> Result<Option<Project>> {
        let row = sqlx::query(
            "SELECT id, name, description, user_id, status, created_at, updated_at \
             FROM projects WHERE user_id = ? AND name = ?",
        )
        .bind(user_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(row_to_project).transpose()
    }

    async fn list(&self, user_id: Option<&str>) -> Result<Vec<Project>> {
        let rows = match user_id {
            Some(user_id) => sqlx::query(
                "SELECT id, name, description, user_id, status, created_at, updated_at \
                 FROM projects WHERE user_id = ? ORDER BY created_at, id",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?,
            None => sqlx::query(
                "SELECT id, name, description, user_id, status, created_at, updated_at \
                 FROM projects ORDER BY created_at, id",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?,
        };

        rows.iter().map(row_to_project).collect()
    }

    async fn update(&self, id: &str, updates: UpdateProject) -> Result<Project> {
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| LatticeError::not_found("Project", id))?;
        if updates.is_empty() {
            return Ok(existing);
        }

        let mut builder: sqlx::QueryBuilder<sqlx::Sqlite> =
            sqlx::QueryBuilder::new("UPDATE projects SET updated_at = ");
        builder.push_bind(Utc::now().to_rfc3339());

        if let Some(name) = &updates.name {
            if name.trim().is_empty() {
                return Err(LatticeError::empty_field("name"));
            }
            builder.push(", name = ");
            builder.push_bind(name);
        }
        if let Some(description) = &updates.description {
            builder.push(", description = ");
            builder.push_bind(description);
        }
        if let Some(status) = updates.status {
            builder.push(", status = ");
            builder.push_bind(status.as_str());
        }

        builder.push(" WHERE id = ");
        builder.push_bind(id);
        builder.push(
            " RETURNING id, name, description, user_id, status, created_at, updated_at",
        );

        let row = builder
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(e, "Project name already exists"))?;

        row_to_project(&row)
    }

    async fn delete(&self, id: &str) -> Result<CascadeDelete> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut removed_context_ids: Vec<String> = vec![id.to_string()];
        let branch_rows = sqlx::query("SELECT id FROM branches WHERE project_id = ?")
            .bind(id)
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?;
        for row in &branch_rows {
            removed_context_ids.push(row.get::<String, _>("id"));
        }
        let task_rows = sqlx::query(
            "SELECT t.id FROM tasks t JOIN branches b ON t.branch_id = b.id \
             WHERE b.project_id = ?",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;
        for row in &task_rows {
            removed_context_ids.push(row.get::<String, _>("id"));
        }

        let mut context_delete: sqlx::QueryBuilder<sqlx::Sqlite> =
            sqlx::QueryBuilder::new("DELETE FROM contexts WHERE id IN (");
        let mut separated = context_delete.separated(", ");
        for context_id in &removed_context_ids {
            separated.push_bind(context_id);
        }
        context_delete.push(")");
        context_delete
            .build()
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(LatticeError::not_found("Project", id));
        }

        tx.commit().await.map_err(db_err)?;
        Ok(CascadeDelete {
            removed_context_ids,
        })
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| LatticeError::Database(format!("Health check failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteDatabase;

    async fn repo() -> SqliteProjectRepository {
        SqliteDatabase::in_memory().await.unwrap().projects()
    }

    fn new_project(name: &str) -> NewProject {
        NewProject {
            name: name.to_string(),
            description: "a project".to_string(),
            user_id: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = repo().await;
        let created = repo.create(new_project("Alpha"), "user-1").await.unwrap();
        assert_eq!(created.name, "Alpha");
        assert_eq!(created.status, ProjectStatus::Active);
        assert!(uuid::Uuid::parse_str(&created.id).is_ok());

        let fetched = repo.get(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let repo = repo().await;
        repo.create(new_project("Alpha"), "user-1").await.unwrap();
        let result = repo.create(new_project("Alpha"), "user-1").await;
        assert!(matches!(result, Err(LatticeError::AlreadyExists(_))));

        // Same name under a different user is fine
        repo.create(new_project("Alpha"), "user-2").await.unwrap();
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let repo = repo().await;
        let created = repo.create(new_project("Alpha"), "user-1").await.unwrap();

        let updated = repo
            .update(
                &created.id,
                UpdateProject {
                    description: Some("new description".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Alpha");
        assert_eq!(updated.description, "new description");
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let repo = repo().await;
        let result = repo
            .update("missing-id", UpdateProject::default())
            .await;
        assert!(matches!(result, Err(LatticeError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_reports_context_ids() {
        let repo = repo().await;
        let created = repo.create(new_project("Alpha"), "user-1").await.unwrap();
        let cascade = repo.delete(&created.id).await.unwrap();
        assert_eq!(cascade.removed_context_ids, vec![created.id.clone()]);
        assert!(repo.get(&created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_scoped_by_user() {
        let repo = repo().await;
        repo.create(new_project("A"), "user-1").await.unwrap();
        repo.create(new_project("B"), "user-2").await.unwrap();

        assert_eq!(repo.list(Some("user-1")).await.unwrap().len(), 1);
        assert_eq!(repo.list(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_health_check() {
        let repo = repo().await;
        repo.health_check().await.unwrap();
    }
}
