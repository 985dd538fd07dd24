use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::{Priority, TaskStatus};

/// Second-tier organizational unit under a project.
///
/// Named after a VCS branch by domain convention, but the system never
/// touches a real VCS. A branch owns tasks and one branch-level context.
/// The two task counters are denormalized and recomputed inside the same
/// transaction as every task status change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Branch {
    /// UUID in canonical string form
    pub id: String,
    pub project_id: String,
    /// Unique within the project
    pub name: String,
    pub description: String,
    pub priority: Priority,
    pub status: TaskStatus,
    /// Live assignment; statistics derive from the assignment table instead
    pub assigned_agent_id: Option<String>,
    /// Invariant: `completed_task_count <= task_count`
    pub task_count: i64,
    pub completed_task_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Branch {
    /// Percentage of tasks done, rounded to integer; 0 for an empty branch
    pub fn progress_percentage(&self) -> i64 {
        if self.task_count == 0 {
            0
        } else {
            (self.completed_task_count * 100 + self.task_count / 2) / self.task_count
        }
    }
}

/// Data transfer object for creating branches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBranch {
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub priority: Option<Priority>,
}

/// Data transfer object for updating branches; only `Some` fields change
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateBranch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub status: Option<TaskStatus>,
}

impl UpdateBranch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.status.is_none()
    }
}

/// Statistics view for a branch, derived from live rows at read time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchStatistics {
    pub branch_id: String,
    pub task_count: i64,
    pub completed_task_count: i64,
    pub progress_percentage: i64,
    pub tasks_by_status: std::collections::HashMap<String, i64>,
    /// Names from the live assignment table, never a denormalized field
    pub assigned_agents: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn branch(task_count: i64, completed: i64) -> Branch {
        Branch {
            id: "b1".to_string(),
            project_id: "p1".to_string(),
            name: "feat/x".to_string(),
            description: String::new(),
            priority: Priority::Medium,
            status: TaskStatus::Todo,
            assigned_agent_id: None,
            task_count,
            completed_task_count: completed,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_progress_percentage() {
        assert_eq!(branch(0, 0).progress_percentage(), 0);
        assert_eq!(branch(4, 1).progress_percentage(), 25);
        assert_eq!(branch(3, 2).progress_percentage(), 67);
        assert_eq!(branch(5, 5).progress_percentage(), 100);
    }
}
