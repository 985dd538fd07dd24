//! Subtask lifecycle and parent-progress rollup.

use std::sync::Arc;

use serde::Serialize;

use crate::context::ContextSyncService;
use crate::error::{LatticeError, Result};
use crate::models::{
    CompleteSubtask, NewSubtask, Subtask, Task, TaskStatus, UpdateSubtask,
};
use crate::repository::{SubtaskRepository, TaskRepository};
use crate::validation::Validator;

/// Aggregate progress of a task's subtasks
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubtaskProgress {
    pub total: i64,
    pub completed: i64,
    /// `round(sum(progress_percentage) / count)`, 0 for no subtasks
    pub percentage: i64,
    /// Advisory only; the parent still requires an explicit complete
    pub ready_to_complete: bool,
}

/// Orchestrates nested subtask state under a parent task.
pub struct SubtaskService {
    subtasks: Arc<dyn SubtaskRepository>,
    tasks: Arc<dyn TaskRepository>,
    sync: Arc<ContextSyncService>,
}

impl SubtaskService {
    pub fn new(
        subtasks: Arc<dyn SubtaskRepository>,
        tasks: Arc<dyn TaskRepository>,
        sync: Arc<ContextSyncService>,
    ) -> Self {
        Self {
            subtasks,
            tasks,
            sync,
        }
    }

    pub async fn create(&self, new_subtask: NewSubtask) -> Result<Subtask> {
        Validator::validate_name("title", &new_subtask.title)?;
        let parent = self.require_parent(&new_subtask.task_id).await?;

        let subtask = self.subtasks.create(new_subtask).await?;
        self.sync.subtask_updated(&parent).await;
        Ok(subtask)
    }

    pub async fn get(&self, task_id: &str, subtask_id: &str) -> Result<Subtask> {
        let subtask = self
            .subtasks
            .get(subtask_id)
            .await?
            .ok_or_else(|| LatticeError::not_found("Subtask", subtask_id))?;
        if subtask.task_id != task_id {
            return Err(LatticeError::not_found("Subtask", subtask_id));
        }
        Ok(subtask)
    }

    pub async fn list(&self, task_id: &str) -> Result<Vec<Subtask>> {
        self.require_parent(task_id).await?;
        self.subtasks.list_by_task(task_id).await
    }

    /// Update a subtask and refresh the parent rollup.
    pub async fn update(
        &self,
        task_id: &str,
        subtask_id: &str,
        updates: UpdateSubtask,
    ) -> Result<Subtask> {
        self.get(task_id, subtask_id).await?;
        if let Some(title) = &updates.title {
            Validator::validate_name("title", title)?;
        }
        if let Some(progress) = updates.progress_percentage {
            Validator::validate_progress(progress)?;
        }
        if updates.status == Some(TaskStatus::Done) {
            return Err(LatticeError::Validation(
                "use the complete action to mark a subtask done".to_string(),
            ));
        }

        let subtask = self.subtasks.update(subtask_id, updates).await?;
        let parent = self.require_parent(task_id).await?;
        self.sync.subtask_updated(&parent).await;
        Ok(subtask)
    }

    /// Complete a subtask: progress forced to 100, parent rollup
    /// recomputed, reusable insights promoted by the sync service.
    pub async fn complete(
        &self,
        task_id: &str,
        subtask_id: &str,
        completion: CompleteSubtask,
    ) -> Result<Subtask> {
        let existing = self.get(task_id, subtask_id).await?;
        if existing.status == TaskStatus::Done {
            return Ok(existing);
        }
        if completion.completion_summary.trim().is_empty() {
            return Err(LatticeError::empty_field("completion_summary"));
        }

        let subtask = self.subtasks.complete(subtask_id, completion).await?;
        let parent = self.require_parent(task_id).await?;
        self.sync.subtask_completed(&parent, &subtask).await;
        Ok(subtask)
    }

    pub async fn delete(&self, task_id: &str, subtask_id: &str) -> Result<()> {
        self.get(task_id, subtask_id).await?;
        self.subtasks.delete(subtask_id).await?;
        let parent = self.require_parent(task_id).await?;
        self.sync.subtask_updated(&parent).await;
        Ok(())
    }

    /// Aggregate progress for the parent task.
    pub async fn progress(&self, task_id: &str) -> Result<SubtaskProgress> {
        let subtasks = self.subtasks.list_by_task(task_id).await?;
        Ok(aggregate_progress(&subtasks))
    }

    async fn require_parent(&self, task_id: &str) -> Result<Task> {
        self.tasks
            .get(task_id)
            .await?
            .ok_or_else(|| LatticeError::not_found("Task", task_id))
    }
}

fn aggregate_progress(subtasks: &[Subtask]) -> SubtaskProgress {
    let total = subtasks.len() as i64;
    let completed = subtasks
        .iter()
        .filter(|s| s.status == TaskStatus::Done)
        .count() as i64;
    let percentage = if total == 0 {
        0
    } else {
        let sum: i64 = subtasks.iter().map(|s| s.progress_percentage).sum();
        (sum + total / 2) / total
    };
    SubtaskProgress {
        total,
        completed,
        percentage,
        ready_to_complete: total > 0 && completed == total,
    }
}
