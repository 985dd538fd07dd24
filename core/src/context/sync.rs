//! Post-mutation propagation of task and subtask state into contexts.
//!
//! Sync keeps the task-level context current so downstream readers observe
//! fresh state without an explicit context write. A sync failure never
//! fails the triggering operation: it is logged and swallowed, and the
//! next read may observe slightly stale context. Every merge is idempotent
//! for unchanged input.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::warn;

use crate::context::resolver::ContextService;
use crate::error::Result;
use crate::models::{ContextLevel, Subtask, Task, TaskStatus};
use crate::repository::SubtaskRepository;

/// Synchronizes entity mutations into the context tier.
pub struct ContextSyncService {
    contexts: Arc<ContextService>,
    subtasks: Arc<dyn SubtaskRepository>,
}

impl ContextSyncService {
    pub fn new(contexts: Arc<ContextService>, subtasks: Arc<dyn SubtaskRepository>) -> Self {
        Self { contexts, subtasks }
    }

    /// Merge current task state into its context after any task write.
    ///
    /// A task without a context yet is left alone; contexts appear either
    /// explicitly or through completion-time auto-creation.
    pub async fn task_updated(&self, task: &Task) {
        if let Err(err) = self.try_task_updated(task).await {
            warn!(task_id = %task.id, error = %err, "context sync after task update failed");
        }
    }

    async fn try_task_updated(&self, task: &Task) -> Result<()> {
        if self.task_context_missing(task).await? {
            return Ok(());
        }
        self.contexts
            .merge_data(
                ContextLevel::Task,
                &task.id,
                json!({
                    "status": task.status.as_str(),
                    "priority": task.priority.as_str(),
                    "updated_at": task.updated_at.to_rfc3339(),
                }),
            )
            .await?;
        Ok(())
    }

    /// Merge the completion record into the task context.
    ///
    /// The lifecycle service guarantees the context exists by the time a
    /// task reaches `done`.
    pub async fn task_completed(&self, task: &Task) {
        if let Err(err) = self.try_task_completed(task).await {
            warn!(task_id = %task.id, error = %err, "context sync after completion failed");
        }
    }

    async fn try_task_completed(&self, task: &Task) -> Result<()> {
        self.contexts
            .merge_data(
                ContextLevel::Task,
                &task.id,
                json!({
                    "status": task.status.as_str(),
                    "completion_summary": task.completion_summary,
                    "testing_notes": task.testing_notes,
                    "completed_at": task.updated_at.to_rfc3339(),
                }),
            )
            .await?;
        Ok(())
    }

    /// Merge a subtask-summary view into the parent task's context.
    pub async fn subtask_updated(&self, parent: &Task) {
        if let Err(err) = self.try_subtask_updated(parent).await {
            warn!(task_id = %parent.id, error = %err, "context sync after subtask write failed");
        }
    }

    async fn try_subtask_updated(&self, parent: &Task) -> Result<()> {
        if self.task_context_missing(parent).await? {
            return Ok(());
        }
        let subtasks = self.subtasks.list_by_task(&parent.id).await?;
        let summary = progress_summary(&subtasks);
        self.contexts
            .merge_data(ContextLevel::Task, &parent.id, summary)
            .await?;
        Ok(())
    }

    /// After a subtask completes: refresh the summary view and promote any
    /// insight flagged `auto_delegate` to the project context.
    pub async fn subtask_completed(&self, parent: &Task, subtask: &Subtask) {
        self.subtask_updated(parent).await;

        for insight in &subtask.insights_found {
            if !insight.auto_delegate {
                continue;
            }
            let payload = json!({
                "delegated_insights": [{
                    "content": insight.content,
                    "category": insight.category,
                    "importance": insight.importance,
                    "source_task": parent.id,
                    "source_subtask": subtask.id,
                    "recorded_at": Utc::now().to_rfc3339(),
                }],
            });
            if let Err(err) = self
                .contexts
                .delegate(
                    ContextLevel::Task,
                    &parent.id,
                    ContextLevel::Project,
                    payload,
                    format!("auto-delegated insight from subtask '{}'", subtask.title),
                    true,
                )
                .await
            {
                warn!(
                    task_id = %parent.id,
                    subtask_id = %subtask.id,
                    error = %err,
                    "insight auto-delegation failed"
                );
            }
        }
    }

    async fn task_context_missing(&self, task: &Task) -> Result<bool> {
        Ok(self.contexts.get(ContextLevel::Task, &task.id).await.is_err())
    }
}

/// Aggregate view of subtask progress for the parent context.
fn progress_summary(subtasks: &[Subtask]) -> serde_json::Value {
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
    json!({
        "subtasks_progress": {
            "total": total,
            "completed": completed,
            "percentage": percentage,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;
    use chrono::Utc;

    fn subtask(progress: i64, status: TaskStatus) -> Subtask {
        Subtask {
            id: "s".to_string(),
            task_id: "t".to_string(),
            title: "sub".to_string(),
            description: String::new(),
            status,
            priority: Priority::Medium,
            assignees: vec![],
            progress_percentage: progress,
            progress_notes: String::new(),
            blockers: String::new(),
            completion_summary: String::new(),
            impact_on_parent: String::new(),
            insights_found: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn test_progress_summary_rounds() {
        let subtasks = vec![
            subtask(100, TaskStatus::Done),
            subtask(50, TaskStatus::InProgress),
            subtask(0, TaskStatus::Todo),
        ];
        let summary = progress_summary(&subtasks);
        assert_eq!(summary["subtasks_progress"]["total"], 3);
        assert_eq!(summary["subtasks_progress"]["completed"], 1);
        assert_eq!(summary["subtasks_progress"]["percentage"], 50);
    }

    #[test]
    fn test_progress_summary_empty() {
        let summary = progress_summary(&[]);
        assert_eq!(summary["subtasks_progress"]["percentage"], 0);
    }
}
