use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::{Priority, TaskStatus};

/// Nested unit of work under a task.
///
/// Subtasks share the task status enum and feed the parent's aggregate
/// progress: any subtask write triggers a recomputation of
/// `sum(progress_percentage) / count` on the parent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subtask {
    /// UUID in canonical string form
    pub id: String,
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub assignees: Vec<String>,
    /// 0-100; forced to 100 on completion
    pub progress_percentage: i64,
    pub progress_notes: String,
    pub blockers: String,
    pub completion_summary: String,
    pub impact_on_parent: String,
    pub insights_found: Vec<Insight>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A reusable finding recorded while completing a subtask.
///
/// Insights flagged `auto_delegate` are promoted to the project context by
/// the sync service after completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Insight {
    pub content: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub importance: String,
    #[serde(default)]
    pub auto_delegate: bool,
}

impl Insight {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            category: String::new(),
            importance: String::new(),
            auto_delegate: false,
        }
    }
}

/// Data transfer object for creating subtasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubtask {
    pub task_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub priority: Option<Priority>,
    #[serde(default)]
    pub assignees: Vec<String>,
}

/// Data transfer object for updating subtasks; only `Some` fields change
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSubtask {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub assignees: Option<Vec<String>>,
    pub progress_percentage: Option<i64>,
    pub progress_notes: Option<String>,
    pub blockers: Option<String>,
}

impl UpdateSubtask {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.assignees.is_none()
            && self.progress_percentage.is_none()
            && self.progress_notes.is_none()
            && self.blockers.is_none()
    }
}

/// Completion request for a subtask
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteSubtask {
    pub completion_summary: String,
    pub impact_on_parent: Option<String>,
    #[serde(default)]
    pub insights_found: Vec<Insight>,
    pub challenges_overcome: Option<String>,
}
