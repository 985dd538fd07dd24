//! Entity builders for concise test setup.

use chrono::Utc;

use lattice_core::models::{new_entity_id, Priority, Subtask, Task, TaskStatus};

/// Builder for [`Task`] values with sensible defaults.
pub struct TaskBuilder {
    task: Task,
}

/// Start a task builder on the given branch.
pub fn task(branch_id: &str) -> TaskBuilder {
    let now = Utc::now();
    TaskBuilder {
        task: Task {
            id: new_entity_id(),
            branch_id: branch_id.to_string(),
            title: "A task".to_string(),
            description: String::new(),
            status: TaskStatus::Todo,
            priority: Priority::Medium,
            details: String::new(),
            estimated_effort: None,
            due_date: None,
            context_id: None,
            created_at: now,
            updated_at: now,
            completion_summary: String::new(),
            testing_notes: String::new(),
            assignees: vec![],
            labels: vec![],
            dependencies: vec![],
        },
    }
}

impl TaskBuilder {
    pub fn id(mut self, id: &str) -> Self {
        self.task.id = id.to_string();
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.task.title = title.to_string();
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn labels(mut self, labels: &[&str]) -> Self {
        self.task.labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

/// Builder for [`Subtask`] values with sensible defaults.
pub struct SubtaskBuilder {
    subtask: Subtask,
}

/// Start a subtask builder under the given task.
pub fn subtask(task_id: &str) -> SubtaskBuilder {
    let now = Utc::now();
    SubtaskBuilder {
        subtask: Subtask {
            id: new_entity_id(),
            task_id: task_id.to_string(),
            title: "A subtask".to_string(),
            description: String::new(),
            status: TaskStatus::Todo,
            priority: Priority::Medium,
            assignees: vec![],
            progress_percentage: 0,
            progress_notes: String::new(),
            blockers: String::new(),
            completion_summary: String::new(),
            impact_on_parent: String::new(),
            insights_found: vec![],
            created_at: now,
            updated_at: now,
            completed_at: None,
        },
    }
}

impl SubtaskBuilder {
    pub fn title(mut self, title: &str) -> Self {
        self.subtask.title = title.to_string();
        self
    }

    pub fn progress(mut self, progress: i64) -> Self {
        self.subtask.progress_percentage = progress;
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.subtask.status = status;
        self
    }

    pub fn build(self) -> Subtask {
        self.subtask
    }
}
