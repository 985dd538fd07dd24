use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use lattice_core::{
    error::{LatticeError, Result},
    models::{
        new_entity_id, CompleteSubtask, NewSubtask, Priority, Subtask, TaskStatus, UpdateSubtask,
    },
    repository::SubtaskRepository,
};

use crate::common::{db_err, encode_json, encode_string_list, row_to_subtask};

const SUBTASK_COLUMNS: &str = "id, task_id, title, description, status, priority, assignees, \
     progress_percentage, progress_notes, blockers, completion_summary, impact_on_parent, \
     insights_found, created_at, updated_at, completed_at";

/// SQLite implementation of the subtask repository.
#[derive(Debug, Clone)]
pub struct SqliteSubtaskRepository {
    pool: SqlitePool,
}

impl SqliteSubtaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubtaskRepository for SqliteSubtaskRepository {
    async fn create(&self, subtask: NewSubtask) -> Result<Subtask> {
        if subtask.title.trim().is_empty() {
            return Err(LatticeError::empty_field("title"));
        }

        let task_exists = sqlx::query("SELECT 1 FROM tasks WHERE id = ?")
            .bind(&subtask.task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        if task_exists.is_none() {
            return Err(LatticeError::not_found("Task", &subtask.task_id));
        }

        let now = Utc::now();
        let row = sqlx::query(&format!(
            "INSERT INTO subtasks \
             (id, task_id, title, description, status, priority, assignees, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {SUBTASK_COLUMNS}"
        ))
        .bind(new_entity_id())
        .bind(&subtask.task_id)
        .bind(&subtask.title)
        .bind(&subtask.description)
        .bind(TaskStatus::Todo.as_str())
        .bind(subtask.priority.unwrap_or(Priority::Medium).as_str())
        .bind(encode_string_list(&subtask.assignees))
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        row_to_subtask(&row)
    }

    async fn get(&self, id: &str) -> Result<Option<Subtask>> {
        let row = sqlx::query(&format!(
            "SELECT {SUBTASK_COLUMNS} FROM subtasks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(row_to_subtask).transpose()
    }

    async fn list_by_task(&self, task_id: &str) -> Result<Vec<Subtask>> {
        let rows = sqlx::query(&format!(
            "SELECT {SUBTASK_COLUMNS} FROM subtasks WHERE task_id = ? ORDER BY created_at, id"
        ))
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_subtask).collect()
    }

    async fn update(&self, id: &str, updates: UpdateSubtask) -> Result<Subtask> {
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| LatticeError::not_found("Subtask", id))?;
        if updates.is_empty() {
            return Ok(existing);
        }

        let mut builder: sqlx::QueryBuilder<sqlx::Sqlite> =
            sqlx::QueryBuilder::new("UPDATE subtasks SET updated_at = ");
        builder.push_bind(Utc::now().to_rfc3339());

        if let Some(title) = &updates.title {
            if title.trim().is_empty() {
                return Err(LatticeError::empty_field("title"));
            }
            builder.push(", title = ");
            builder.push_bind(title);
        }
        if let Some(description) = &updates.description {
            builder.push(", description = ");
            builder.push_bind(description);
        }
        if let Some(status) = updates.status {
            builder.push(", status = ");
            builder.push_bind(status.as_str());
        }
        if let Some(priority) = updates.priority {
            builder.push(", priority = ");
            builder.push_bind(priority.as_str());
        }
        if let Some(assignees) = &updates.assignees {
            builder.push(", assignees = ");
            builder.push_bind(encode_string_list(assignees));
        }
        if let Some(progress) = updates.progress_percentage {
            builder.push(", progress_percentage = ");
            builder.push_bind(progress);
        }
        if let Some(progress_notes) = &updates.progress_notes {
            builder.push(", progress_notes = ");
            builder.push_bind(progress_notes);
        }
        if let Some(blockers) = &updates.blockers {
            builder.push(", blockers = ");
            builder.push_bind(blockers);
        }

        builder.push(" WHERE id = ");
        builder.push_bind(id);
        builder.push(&format!(" RETURNING {SUBTASK_COLUMNS}"));

        let row = builder
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        row_to_subtask(&row)
    }

    async fn complete(&self, id: &str, completion: CompleteSubtask) -> Result<Subtask> {
        self.get(id)
            .await?
            .ok_or_else(|| LatticeError::not_found("Subtask", id))?;

        let now = Utc::now();
        let row = sqlx::query(&format!(
            "UPDATE subtasks SET status = ?, progress_percentage = 100, \
             completion_summary = ?, impact_on_parent = ?, insights_found = ?, \
             updated_at = ?, completed_at = ? WHERE id = ? \
             RETURNING {SUBTASK_COLUMNS}"
        ))
        .bind(TaskStatus::Done.as_str())
        .bind(&completion.completion_summary)
        .bind(completion.impact_on_parent.as_deref().unwrap_or(""))
        .bind(encode_json(&completion.insights_found)?)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        row_to_subtask(&row)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM subtasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteDatabase;
    use lattice_core::models::{Insight, NewBranch, NewProject, NewTask};
    use lattice_core::repository::{BranchRepository, ProjectRepository, TaskRepository};

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
        let branch = db
            .branches()
            .create(NewBranch {
                project_id: project.id,
                name: "feat/x".to_string(),
                description: String::new(),
                priority: None,
            })
            .await
            .unwrap();
        let task = db
            .tasks()
            .create(NewTask::new(branch.id, "Impl auth"))
            .await
            .unwrap();
        (db, task.id)
    }

    fn new_subtask(task_id: &str, title: &str) -> NewSubtask {
        NewSubtask {
            task_id: task_id.to_string(),
            title: title.to_string(),
            description: String::new(),
            priority: None,
            assignees: vec![],
        }
    }

    #[tokio::test]
    async fn test_create_and_list_ordered() {
        let (db, task_id) = setup().await;
        let repo = db.subtasks();

        let first = repo.create(new_subtask(&task_id, "first")).await.unwrap();
        let second = repo.create(new_subtask(&task_id, "second")).await.unwrap();

        let listed = repo.list_by_task(&task_id).await.unwrap();
        assert_eq!(listed.len(), 2);
        let ids: Vec<&str> = listed.iter().map(|s| s.id.as_str()).collect();
        assert!(ids.contains(&first.id.as_str()));
        assert!(ids.contains(&second.id.as_str()));
    }

    #[tokio::test]
    async fn test_create_on_missing_task() {
        let (db, _) = setup().await;
        let result = db.subtasks().create(new_subtask("missing", "x")).await;
        assert!(matches!(result, Err(LatticeError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_complete_forces_progress_to_100() {
        let (db, task_id) = setup().await;
        let repo = db.subtasks();
        let subtask = repo.create(new_subtask(&task_id, "tests")).await.unwrap();

        let done = repo
            .complete(
                &subtask.id,
                CompleteSubtask {
                    completion_summary: "tests green".to_string(),
                    impact_on_parent: Some("unblocks completion".to_string()),
                    insights_found: vec![Insight::new("pattern")],
                    challenges_overcome: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(done.status, TaskStatus::Done);
        assert_eq!(done.progress_percentage, 100);
        assert_eq!(done.completion_summary, "tests green");
        assert!(done.completed_at.is_some());
        assert_eq!(done.insights_found.len(), 1);
    }

    #[tokio::test]
    async fn test_update_progress() {
        let (db, task_id) = setup().await;
        let repo = db.subtasks();
        let subtask = repo.create(new_subtask(&task_id, "tests")).await.unwrap();

        let updated = repo
            .update(
                &subtask.id,
                UpdateSubtask {
                    progress_percentage: Some(40),
                    progress_notes: Some("halfway".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.progress_percentage, 40);
        assert_eq!(updated.progress_notes, "halfway");
    }

    #[tokio::test]
    async fn test_delete() {
        let (db, task_id) = setup().await;
        let repo = db.subtasks();
        let subtask = repo.create(new_subtask(&task_id, "tests")).await.unwrap();

        assert!(repo.delete(&subtask.id).await.unwrap());
        assert!(!repo.delete(&subtask.id).await.unwrap());
        assert!(repo.get(&subtask.id).await.unwrap().is_none());
    }
}
