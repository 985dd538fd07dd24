use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqliteConnection, SqlitePool};

use lattice_core::{
    error::{LatticeError, Result},
    models::{new_entity_id, NewTask, Priority, Task, TaskFilter, TaskStatus, UpdateTask},
    repository::{CascadeDelete, TaskRepository},
};

use crate::common::{db_err, encode_string_list, row_to_task};

const TASK_COLUMNS: &str = "id, branch_id, title, description, status, priority, details, \
     estimated_effort, due_date, context_id, created_at, updated_at, completion_summary, \
     testing_notes, assignees";

/// SQLite implementation of the task repository.
///
/// Labels live in a join table and dependency edges in their own table;
/// both are hydrated onto the returned model. Status-affecting writes
/// recount the owning branch inside the same transaction.
#[derive(Debug, Clone)]
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn hydrate(&self, mut task: Task) -> Result<Task> {
        let label_rows = sqlx::query(
            "SELECT l.name FROM labels l JOIN task_labels tl ON tl.label_id = l.id \
             WHERE tl.task_id = ? ORDER BY l.name",
        )
        .bind(&task.id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        task.labels = label_rows
            .iter()
            .map(|row| row.get::<String, _>("name"))
            .collect();

        let dependency_rows = sqlx::query(
            "SELECT depends_on_task_id FROM task_dependencies WHERE task_id = ? \
             ORDER BY depends_on_task_id",
        )
        .bind(&task.id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        task.dependencies = dependency_rows
            .iter()
            .map(|row| row.get::<String, _>("depends_on_task_id"))
            .collect();

        Ok(task)
    }
}

/// Recompute the denormalized branch counters from live task rows.
async fn recount_branch(conn: &mut SqliteConnection, branch_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE branches SET \
             task_count = (SELECT COUNT(*) FROM tasks WHERE branch_id = ?1), \
             completed_task_count = \
                 (SELECT COUNT(*) FROM tasks WHERE branch_id = ?1 AND status = 'done'), \
             updated_at = ?2 \
         WHERE id = ?1",
    )
    .bind(branch_id)
    .bind(Utc::now().to_rfc3339())
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Replace a task's label set, creating unknown labels by name.
async fn write_labels(conn: &mut SqliteConnection, task_id: &str, labels: &[String]) -> Result<()> {
    sqlx::query("DELETE FROM task_labels WHERE task_id = ?")
        .bind(task_id)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;

    for name in labels {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        sqlx::query("INSERT OR IGNORE INTO labels (id, name) VALUES (?, ?)")
            .bind(new_entity_id())
            .bind(name)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
        sqlx::query(
            "INSERT OR IGNORE INTO task_labels (task_id, label_id) \
             SELECT ?, id FROM labels WHERE name = ?",
        )
        .bind(task_id)
        .bind(name)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    }
    Ok(())
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn create(&self, task: NewTask) -> Result<Task> {
        if task.title.trim().is_empty() {
            return Err(LatticeError::empty_field("title"));
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let branch_exists = sqlx::query("SELECT 1 FROM branches WHERE id = ?")
            .bind(&task.branch_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        if branch_exists.is_none() {
            return Err(LatticeError::not_found("Branch", &task.branch_id));
        }

        let now = Utc::now();
        let id = new_entity_id();
        let priority = task.priority.unwrap_or(Priority::Medium);

        let row = sqlx::query(&format!(
            "INSERT INTO tasks \
             (id, branch_id, title, description, status, priority, details, estimated_effort, \
              due_date, created_at, updated_at, assignees) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(&id)
        .bind(&task.branch_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(TaskStatus::Todo.as_str())
        .bind(priority.as_str())
        .bind(&task.details)
        .bind(task.estimated_effort.map(|e| e.as_str()))
        .bind(task.due_date.map(|d| d.to_rfc3339()))
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(encode_string_list(&task.assignees))
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        let created = row_to_task(&row)?;

        write_labels(&mut tx, &id, &task.labels).await?;
        for dependency_id in &task.dependencies {
            sqlx::query(
                "INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_task_id) \
                 VALUES (?, ?)",
            )
            .bind(&id)
            .bind(dependency_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        recount_branch(&mut tx, &task.branch_id).await?;

        tx.commit().await.map_err(db_err)?;
        self.hydrate(created).await
    }

    async fn get(&self, id: &str) -> Result<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row_to_task(&row)?).await?)),
            None => Ok(None),
        }
    }

    async fn list(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        let mut builder: sqlx::QueryBuilder<sqlx::Sqlite> =
            sqlx::QueryBuilder::new(format!("SELECT {TASK_COLUMNS} FROM tasks WHERE 1 = 1"));

        if let Some(branch_id) = &filter.branch_id {
            builder.push(" AND branch_id = ");
            builder.push_bind(branch_id);
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ");
            builder.push_bind(status.as_str());
        }
        if let Some(priority) = filter.priority {
            builder.push(" AND priority = ");
            builder.push_bind(priority.as_str());
        }
        builder.push(" ORDER BY created_at, id");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit as i64);
            if let Some(offset) = filter.offset {
                builder.push(" OFFSET ");
                builder.push_bind(offset as i64);
            }
        }

        let rows = builder.build().fetch_all(&self.pool).await.map_err(db_err)?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in &rows {
            let task = self.hydrate(row_to_task(row)?).await?;
            // Assignee and label filters need the hydrated collections
            if let Some(assignee) = &filter.assignee {
                if !task.assignees.iter().any(|a| a == assignee) {
                    continue;
                }
            }
            if let Some(label) = &filter.label {
                if !task.labels.iter().any(|l| l == label) {
                    continue;
                }
            }
            tasks.push(task);
        }
        Ok(tasks)
    }

    async fn update(&self, id: &str, updates: UpdateTask) -> Result<Task> {
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| LatticeError::not_found("Task", id))?;
        if updates.is_empty() {
            return Ok(existing);
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut builder: sqlx::QueryBuilder<sqlx::Sqlite> =
            sqlx::QueryBuilder::new("UPDATE tasks SET updated_at = ");
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
        if let Some(details) = &updates.details {
            builder.push(", details = ");
            builder.push_bind(details);
        }
        if let Some(status) = updates.status {
            builder.push(", status = ");
            builder.push_bind(status.as_str());
        }
        if let Some(priority) = updates.priority {
            builder.push(", priority = ");
            builder.push_bind(priority.as_str());
        }
        if let Some(effort) = updates.estimated_effort {
            builder.push(", estimated_effort = ");
            builder.push_bind(effort.as_str());
        }
        if let Some(due_date) = updates.due_date {
            builder.push(", due_date = ");
            builder.push_bind(due_date.map(|d| d.to_rfc3339()));
        }
        if let Some(assignees) = &updates.assignees {
            builder.push(", assignees = ");
            builder.push_bind(encode_string_list(assignees));
        }

        builder.push(" WHERE id = ");
        builder.push_bind(id);
        builder.push(&format!(" RETURNING {TASK_COLUMNS}"));

        let row = builder.build().fetch_one(&mut *tx).await.map_err(db_err)?;
        let updated = row_to_task(&row)?;

        if let Some(labels) = &updates.labels {
            write_labels(&mut tx, id, labels).await?;
        }
        if updates.status.is_some() && updates.status != Some(existing.status) {
            recount_branch(&mut tx, &existing.branch_id).await?;
        }

        tx.commit().await.map_err(db_err)?;
        self.hydrate(updated).await
    }

    async fn delete(&self, id: &str) -> Result<CascadeDelete> {
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| LatticeError::not_found("Task", id))?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("DELETE FROM contexts WHERE level = 'task' AND id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        recount_branch(&mut tx, &existing.branch_id).await?;

        tx.commit().await.map_err(db_err)?;
        Ok(CascadeDelete {
            removed_context_ids: vec![id.to_string()],
        })
    }

    async fn complete(
        &self,
        id: &str,
        completion_summary: &str,
        testing_notes: Option<&str>,
        context_id: &str,
    ) -> Result<Task> {
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| LatticeError::not_found("Task", id))?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query(&format!(
            "UPDATE tasks SET status = ?, completion_summary = ?, testing_notes = ?, \
             context_id = ?, updated_at = ? WHERE id = ? RETURNING {TASK_COLUMNS}"
        ))
        .bind(TaskStatus::Done.as_str())
        .bind(completion_summary)
        .bind(testing_notes.unwrap_or(""))
        .bind(context_id)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        let completed = row_to_task(&row)?;

        recount_branch(&mut tx, &existing.branch_id).await?;
        tx.commit().await.map_err(db_err)?;

        self.hydrate(completed).await
    }

    async fn add_dependency(&self, task_id: &str, depends_on: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_task_id) \
             VALUES (?, ?)",
        )
        .bind(task_id)
        .bind(depends_on)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_dependency(&self, task_id: &str, depends_on: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM task_dependencies WHERE task_id = ? AND depends_on_task_id = ?",
        )
        .bind(task_id)
        .bind(depends_on)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn dependencies_of(&self, task_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT depends_on_task_id FROM task_dependencies WHERE task_id = ? \
             ORDER BY depends_on_task_id",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("depends_on_task_id"))
            .collect())
    }

    async fn dependents_of(&self, task_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT task_id FROM task_dependencies WHERE depends_on_task_id = ? \
             ORDER BY task_id",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("task_id"))
            .collect())
    }
}
