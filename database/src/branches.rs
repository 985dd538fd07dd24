use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use lattice_core::{
    error::{LatticeError, Result},
    models::{
        new_entity_id, Branch, BranchStatistics, NewBranch, Priority, TaskStatus, UpdateBranch,
    },
    repository::{BranchRepository, CascadeDelete},
};

use crate::common::{db_err, map_sqlx_err, row_to_branch};

const BRANCH_COLUMNS: &str = "id, project_id, name, description, priority, status, \
     assigned_agent_id, task_count, completed_task_count, created_at, updated_at";

/// SQLite implementation of the branch repository.
#[derive(Debug, Clone)]
pub struct SqliteBranchRepository {
    pool: SqlitePool,
}

impl SqliteBranchRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: &str) -> Result<Option<Branch>> {
        let row = sqlx::query(&format!(
            "SELECT {BRANCH_COLUMNS} FROM branches WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(row_to_branch).transpose()
    }
}

#[async_trait]
impl BranchRepository for SqliteBranchRepository {
    async fn create(&self, branch: NewBranch) -> Result<Branch> {
        if branch.name.trim().is_empty() {
            return Err(LatticeError::empty_field("name"));
        }

        let project_exists = sqlx::query("SELECT 1 FROM projects WHERE id = ?")
            .bind(&branch.project_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        if project_exists.is_none() {
            return Err(LatticeError::not_found("Project", &branch.project_id));
        }

        let now = Utc::now();
        let id = new_entity_id();
        let priority = branch.priority.unwrap_or(Priority::Medium);

        let row = sqlx::query(&format!(
            "INSERT INTO branches \
             (id, project_id, name, description, priority, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {BRANCH_COLUMNS}"
        ))
        .bind(&id)
        .bind(&branch.project_id)
        .bind(&branch.name)
        .bind(&branch.description)
        .bind(priority.as_str())
        .bind(TaskStatus::Todo.as_str())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            map_sqlx_err(
                e,
                &format!("Branch '{}' already exists in this project", branch.name),
            )
        })?;

        row_to_branch(&row)
    }

    async fn get(&self, id: &str) -> Result<Option<Branch>> {
        self.fetch(id).await
    }

    async fn list(&self, project_id: &str) -> Result<Vec<Branch>> {
        let rows = sqlx::query(&format!(
            "SELECT {BRANCH_COLUMNS} FROM branches WHERE project_id = ? ORDER BY created_at, id"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_branch).collect()
    }

    async fn update(&self, id: &str, updates: UpdateBranch) -> Result<Branch> {
        let existing = self
            .fetch(id)
            .await?
            .ok_or_else(|| LatticeError::not_found("Branch", id))?;
        if updates.is_empty() {
            return Ok(existing);
        }

        let mut builder: sqlx::QueryBuilder<sqlx::Sqlite> =
            sqlx::QueryBuilder::new("UPDATE branches SET updated_at = ");
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
        if let Some(priority) = updates.priority {
            builder.push(", priority = ");
            builder.push_bind(priority.as_str());
        }
        if let Some(status) = updates.status {
            builder.push(", status = ");
            builder.push_bind(status.as_str());
        }

        builder.push(" WHERE id = ");
        builder.push_bind(id);
        builder.push(&format!(" RETURNING {BRANCH_COLUMNS}"));

        let row = builder
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(e, "Branch name already exists in this project"))?;
        row_to_branch(&row)
    }

    async fn delete(&self, id: &str) -> Result<CascadeDelete> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut removed_context_ids: Vec<String> = vec![id.to_string()];
        let task_rows = sqlx::query("SELECT id FROM tasks WHERE branch_id = ?")
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

        let result = sqlx::query("DELETE FROM branches WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(LatticeError::not_found("Branch", id));
        }

        tx.commit().await.map_err(db_err)?;
        Ok(CascadeDelete {
            removed_context_ids,
        })
    }

    async fn assign_agent(&self, branch_id: &str, agent_id: &str) -> Result<Branch> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "INSERT OR IGNORE INTO agent_assignments (agent_id, branch_id, assigned_at) \
             VALUES (?, ?, ?)",
        )
        .bind(agent_id)
        .bind(branch_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let row = sqlx::query(&format!(
            "UPDATE branches SET assigned_agent_id = ?, updated_at = ? WHERE id = ? \
             RETURNING {BRANCH_COLUMNS}"
        ))
        .bind(agent_id)
        .bind(Utc::now().to_rfc3339())
        .bind(branch_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| LatticeError::not_found("Branch", branch_id))?;

        let branch = row_to_branch(&row)?;
        tx.commit().await.map_err(db_err)?;
        Ok(branch)
    }

    async fn unassign_agent(&self, branch_id: &str, agent_id: &str) -> Result<Branch> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let result = sqlx::query(
            "DELETE FROM agent_assignments WHERE agent_id = ? AND branch_id = ?",
        )
        .bind(agent_id)
        .bind(branch_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(LatticeError::NotFound(format!(
                "Agent '{agent_id}' is not assigned to branch '{branch_id}'"
            )));
        }

        let row = sqlx::query(&format!(
            "UPDATE branches SET assigned_agent_id = NULL, updated_at = ? WHERE id = ? \
             RETURNING {BRANCH_COLUMNS}"
        ))
        .bind(Utc::now().to_rfc3339())
        .bind(branch_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| LatticeError::not_found("Branch", branch_id))?;

        let branch = row_to_branch(&row)?;
        tx.commit().await.map_err(db_err)?;
        Ok(branch)
    }

    async fn assigned_agents(&self, branch_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT agent_id FROM agent_assignments WHERE branch_id = ? ORDER BY assigned_at",
        )
        .bind(branch_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("agent_id"))
            .collect())
    }

    async fn statistics(&self, branch_id: &str) -> Result<BranchStatistics> {
        let branch = self
            .fetch(branch_id)
            .await?
            .ok_or_else(|| LatticeError::not_found("Branch", branch_id))?;

        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM tasks WHERE branch_id = ? GROUP BY status",
        )
        .bind(branch_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut tasks_by_status: HashMap<String, i64> = HashMap::new();
        let mut task_count = 0;
        let mut completed_task_count = 0;
        for row in &rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            task_count += count;
            if status == TaskStatus::Done.as_str() {
                completed_task_count = count;
            }
            tasks_by_status.insert(status, count);
        }

        let progress_percentage = if task_count == 0 {
            0
        } else {
            (completed_task_count * 100 + task_count / 2) / task_count
        };

        Ok(BranchStatistics {
            branch_id: branch.id,
            task_count,
            completed_task_count,
            progress_percentage,
            tasks_by_status,
            assigned_agents: self.assigned_agents(branch_id).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteDatabase;
    use lattice_core::models::NewProject;
    use lattice_core::repository::ProjectRepository;

    async fn setup() -> (SqliteDatabase, String) {
        let db = SqliteDatabase::in_memory().await.unwrap();
        let project = db
            .projects()
            .create(
                NewProject {
                    name: "Alpha".to_string(),
                    description: String::new(),
                    user_id: None,
                },
                "user-1",
            )
            .await
            .unwrap();
        (db, project.id)
    }

    fn new_branch(project_id: &str, name: &str) -> NewBranch {
        NewBranch {
            project_id: project_id.to_string(),
            name: name.to_string(),
            description: String::new(),
            priority: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (db, project_id) = setup().await;
        let repo = db.branches();

        let branch = repo.create(new_branch(&project_id, "feat/x")).await.unwrap();
        assert_eq!(branch.task_count, 0);
        assert_eq!(branch.status, TaskStatus::Todo);

        let fetched = repo.get(&branch.id).await.unwrap().unwrap();
        assert_eq!(fetched, branch);
    }

    #[tokio::test]
    async fn test_name_unique_within_project() {
        let (db, project_id) = setup().await;
        let repo = db.branches();
        repo.create(new_branch(&project_id, "feat/x")).await.unwrap();
        let result = repo.create(new_branch(&project_id, "feat/x")).await;
        assert!(matches!(result, Err(LatticeError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_create_on_missing_project() {
        let (db, _) = setup().await;
        let result = db
            .branches()
            .create(new_branch("not-a-project", "feat/x"))
            .await;
        assert!(matches!(result, Err(LatticeError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_assign_and_unassign_agent() {
        let (db, project_id) = setup().await;
        let repo = db.branches();
        let branch = repo.create(new_branch(&project_id, "feat/x")).await.unwrap();

        sqlx::query(
            "INSERT INTO agents (id, name, capabilities, status, availability_score, registered_at) \
             VALUES ('@coding_agent', '@coding_agent', '{}', 'available', 1.0, ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(db.pool())
        .await
        .unwrap();

        let assigned = repo.assign_agent(&branch.id, "@coding_agent").await.unwrap();
        assert_eq!(assigned.assigned_agent_id.as_deref(), Some("@coding_agent"));
        assert_eq!(
            repo.assigned_agents(&branch.id).await.unwrap(),
            vec!["@coding_agent".to_string()]
        );

        let unassigned = repo
            .unassign_agent(&branch.id, "@coding_agent")
            .await
            .unwrap();
        assert_eq!(unassigned.assigned_agent_id, None);
        assert!(repo.assigned_agents(&branch.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_statistics_reads_live_assignments() {
        let (db, project_id) = setup().await;
        let repo = db.branches();
        let branch = repo.create(new_branch(&project_id, "feat/x")).await.unwrap();

        sqlx::query(
            "INSERT INTO agents (id, name, capabilities, status, availability_score, registered_at) \
             VALUES ('@coding_agent', '@coding_agent', '{}', 'available', 1.0, ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(db.pool())
        .await
        .unwrap();
        repo.assign_agent(&branch.id, "@coding_agent").await.unwrap();

        let stats = repo.statistics(&branch.id).await.unwrap();
        assert_eq!(stats.task_count, 0);
        assert_eq!(stats.assigned_agents, vec!["@coding_agent".to_string()]);
    }
}
