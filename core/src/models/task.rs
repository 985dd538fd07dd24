use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Core task representation.
///
/// A task is the unit of work tracked through its lifecycle, assigned to
/// agents and gated on completion. Tasks belong to a branch, may depend on
/// other tasks (the dependency graph stays acyclic at all times) and own an
/// ordered list of subtasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// UUID in canonical string form
    pub id: String,
    /// Owning branch
    pub branch_id: String,
    /// Required, non-empty
    pub title: String,
    pub description: String,
    /// Current lifecycle state
    pub status: TaskStatus,
    pub priority: Priority,
    /// Free-form implementation details
    pub details: String,
    pub estimated_effort: Option<EstimatedEffort>,
    pub due_date: Option<DateTime<Utc>>,
    /// Id of the task-level context once one exists
    pub context_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Required non-empty once `status = done`
    pub completion_summary: String,
    pub testing_notes: String,
    /// Agent-name strings; may be empty
    pub assignees: Vec<String>,
    /// Label names attached through the join table
    pub labels: Vec<String>,
    /// Ids of the tasks this task depends on
    pub dependencies: Vec<String>,
}

/// Task lifecycle states.
///
/// `done` is terminal except for an explicit `reopen`; `cancelled` can also
/// be reopened. Transition validity lives in [`Task::can_transition_to`]; the
/// completion gates live in the lifecycle service.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Blocked,
    Review,
    Testing,
    Done,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Review => "review",
            TaskStatus::Testing => "testing",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "todo" => Some(TaskStatus::Todo),
            "in_progress" => Some(TaskStatus::InProgress),
            "blocked" => Some(TaskStatus::Blocked),
            "review" => Some(TaskStatus::Review),
            "testing" => Some(TaskStatus::Testing),
            "done" => Some(TaskStatus::Done),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states admit no transition except `reopen`
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task priority, ordered `critical > urgent > high > medium > low`
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
            Priority::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "urgent" => Some(Priority::Urgent),
            "critical" => Some(Priority::Critical),
            _ => None,
        }
    }

    /// Numeric rank for ordering; higher outranks lower
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Medium => 1,
            Priority::High => 2,
            Priority::Urgent => 3,
            Priority::Critical => 4,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Size buckets for effort estimation
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EstimatedEffort {
    Quick,
    Small,
    Medium,
    Large,
    Epic,
}

impl EstimatedEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            EstimatedEffort::Quick => "quick",
            EstimatedEffort::Small => "small",
            EstimatedEffort::Medium => "medium",
            EstimatedEffort::Large => "large",
            EstimatedEffort::Epic => "epic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "quick" => Some(EstimatedEffort::Quick),
            "small" => Some(EstimatedEffort::Small),
            "medium" => Some(EstimatedEffort::Medium),
            "large" => Some(EstimatedEffort::Large),
            "epic" => Some(EstimatedEffort::Epic),
            _ => None,
        }
    }
}

impl Task {
    /// Check whether the lifecycle admits a transition to `new_status`.
    ///
    /// This validates the raw state machine only; completion gates
    /// (subtasks done, context exists, dependencies satisfied) are enforced
    /// by the lifecycle service on top of this check.
    pub fn can_transition_to(&self, new_status: TaskStatus) -> bool {
        use TaskStatus::*;

        match (self.status, new_status) {
            (current, new) if current == new => false,

            // start / unblock
            (Todo | Blocked, InProgress) => true,

            // block from any active working state
            (InProgress | Review | Testing, Blocked) => true,

            // submit_for_review
            (InProgress, Review) => true,

            // start_testing
            (Review | InProgress, Testing) => true,

            // complete from any state except the terminal ones
            (current, Done) if !current.is_terminal() => true,

            // cancel from any non-terminal state
            (current, Cancelled) if !current.is_terminal() => true,

            // reopen
            (Done | Cancelled, InProgress) => true,

            _ => false,
        }
    }

    /// A task is actionable iff it is not terminal and not blocked
    pub fn is_actionable(&self) -> bool {
        !self.status.is_terminal() && self.status != TaskStatus::Blocked
    }
}

/// Data transfer object for creating tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub branch_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub details: String,
    pub priority: Option<Priority>,
    pub estimated_effort: Option<EstimatedEffort>,
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl NewTask {
    pub fn new(branch_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            branch_id: branch_id.into(),
            title: title.into(),
            description: String::new(),
            details: String::new(),
            priority: None,
            estimated_effort: None,
            due_date: None,
            assignees: vec![],
            labels: vec![],
            dependencies: vec![],
        }
    }
}

/// Data transfer object for updating tasks; only `Some` fields change
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTask {
    pub title: Option<String>,
    pub description: Option<String>,
    pub details: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub estimated_effort: Option<EstimatedEffort>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub assignees: Option<Vec<String>>,
    pub labels: Option<Vec<String>>,
}

impl UpdateTask {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.details.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.estimated_effort.is_none()
            && self.due_date.is_none()
            && self.assignees.is_none()
            && self.labels.is_none()
    }
}

/// Completion request for a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteTask {
    pub completion_summary: String,
    pub testing_notes: Option<String>,
    /// Gate 4 toggle; dependencies are enforced unless explicitly relaxed
    #[serde(default = "default_enforce_dependencies")]
    pub enforce_dependencies: bool,
}

fn default_enforce_dependencies() -> bool {
    true
}

/// Filter criteria for listing tasks; fields combine with AND logic
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    pub branch_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub assignee: Option<String>,
    pub label: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn task_with_status(status: TaskStatus) -> Task {
        Task {
            id: "t1".to_string(),
            branch_id: "b1".to_string(),
            title: "Test task".to_string(),
            description: String::new(),
            status,
            priority: Priority::Medium,
            details: String::new(),
            estimated_effort: None,
            due_date: None,
            context_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completion_summary: String::new(),
            testing_notes: String::new(),
            assignees: vec![],
            labels: vec![],
            dependencies: vec![],
        }
    }

    #[test]
    fn test_start_and_unblock_transitions() {
        let task = task_with_status(TaskStatus::Todo);
        assert!(task.can_transition_to(TaskStatus::InProgress));
        assert!(!task.can_transition_to(TaskStatus::Review));

        let blocked = task_with_status(TaskStatus::Blocked);
        assert!(blocked.can_transition_to(TaskStatus::InProgress));
        assert!(!blocked.can_transition_to(TaskStatus::Review));
    }

    #[test]
    fn test_block_transitions() {
        for from in [TaskStatus::InProgress, TaskStatus::Review, TaskStatus::Testing] {
            assert!(task_with_status(from).can_transition_to(TaskStatus::Blocked));
        }
        assert!(!task_with_status(TaskStatus::Todo).can_transition_to(TaskStatus::Blocked));
    }

    #[test]
    fn test_review_and_testing_transitions() {
        assert!(task_with_status(TaskStatus::InProgress).can_transition_to(TaskStatus::Review));
        assert!(task_with_status(TaskStatus::Review).can_transition_to(TaskStatus::Testing));
        assert!(task_with_status(TaskStatus::InProgress).can_transition_to(TaskStatus::Testing));
        assert!(!task_with_status(TaskStatus::Todo).can_transition_to(TaskStatus::Testing));
    }

    #[test]
    fn test_done_reachable_from_any_non_terminal() {
        for from in [
            TaskStatus::Todo,
            TaskStatus::InProgress,
            TaskStatus::Blocked,
            TaskStatus::Review,
            TaskStatus::Testing,
        ] {
            assert!(task_with_status(from).can_transition_to(TaskStatus::Done));
        }
        assert!(!task_with_status(TaskStatus::Cancelled).can_transition_to(TaskStatus::Done));
        assert!(!task_with_status(TaskStatus::Done).can_transition_to(TaskStatus::Done));
    }

    #[test]
    fn test_terminal_states_only_reopen() {
        for terminal in [TaskStatus::Done, TaskStatus::Cancelled] {
            let task = task_with_status(terminal);
            assert!(task.can_transition_to(TaskStatus::InProgress));
            assert!(!task.can_transition_to(TaskStatus::Review));
            assert!(!task.can_transition_to(TaskStatus::Blocked));
            assert!(!task.can_transition_to(TaskStatus::Testing));
        }
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical.rank() > Priority::Urgent.rank());
        assert!(Priority::Urgent.rank() > Priority::High.rank());
        assert!(Priority::High.rank() > Priority::Medium.rank());
        assert!(Priority::Medium.rank() > Priority::Low.rank());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TaskStatus::Todo,
            TaskStatus::InProgress,
            TaskStatus::Blocked,
            TaskStatus::Review,
            TaskStatus::Testing,
            TaskStatus::Done,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("unknown"), None);
    }
}
