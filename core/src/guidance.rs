//! Deterministic workflow guidance.
//!
//! Hints are a pure function of entity state, generated at response time
//! and never persisted.

use serde::Serialize;

use crate::models::{Branch, Project, ProjectStatus, Task, TaskStatus};
use crate::tasks::SubtaskProgress;

/// Next-step guidance attached to tool responses
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Guidance {
    pub next_action: String,
    pub hints: Vec<String>,
}

/// Guidance for a task, given its subtask rollup.
pub fn for_task(task: &Task, progress: &SubtaskProgress) -> Guidance {
    match task.status {
        TaskStatus::Todo => Guidance {
            next_action: "start the task by updating status to in_progress".to_string(),
            hints: vec![
                "break large work into subtasks before starting".to_string(),
            ],
        },
        TaskStatus::InProgress => {
            if progress.ready_to_complete {
                Guidance {
                    next_action: "all subtasks are done; complete the task with a summary"
                        .to_string(),
                    hints: vec!["include testing_notes in the completion call".to_string()],
                }
            } else if progress.total > 0 {
                Guidance {
                    next_action: format!(
                        "continue work: {}/{} subtasks done",
                        progress.completed, progress.total
                    ),
                    hints: vec!["record progress on subtasks as you go".to_string()],
                }
            } else {
                Guidance {
                    next_action: "work the task, then complete it with a summary".to_string(),
                    hints: vec![],
                }
            }
        }
        TaskStatus::Blocked => Guidance {
            next_action: "resolve the blocker, then update status to in_progress".to_string(),
            hints: vec!["check dependency status with the blockers view".to_string()],
        },
        TaskStatus::Review => Guidance {
            next_action: "finish the review, then move to testing or complete".to_string(),
            hints: vec![],
        },
        TaskStatus::Testing => Guidance {
            next_action: "finish testing, then complete the task with testing_notes".to_string(),
            hints: vec![],
        },
        TaskStatus::Done => Guidance {
            next_action: "task is done; pick the next task with the next action".to_string(),
            hints: vec![],
        },
        TaskStatus::Cancelled => Guidance {
            next_action: "task is cancelled; reopen it before further work".to_string(),
            hints: vec![],
        },
    }
}

/// Guidance for a branch based on its counters.
pub fn for_branch(branch: &Branch) -> Guidance {
    if branch.task_count == 0 {
        Guidance {
            next_action: "create the first task on this branch".to_string(),
            hints: vec!["assign an agent to the branch for automatic routing".to_string()],
        }
    } else if branch.completed_task_count == branch.task_count {
        Guidance {
            next_action: "all tasks are done; review branch results".to_string(),
            hints: vec![],
        }
    } else {
        Guidance {
            next_action: format!(
                "{} of {} tasks done; use the next action to pick work",
                branch.completed_task_count, branch.task_count
            ),
            hints: vec![],
        }
    }
}

/// Guidance for a project.
pub fn for_project(project: &Project, branch_count: usize) -> Guidance {
    match project.status {
        ProjectStatus::Archived => Guidance {
            next_action: "project is archived; reactivate it before new work".to_string(),
            hints: vec![],
        },
        ProjectStatus::Active if branch_count == 0 => Guidance {
            next_action: "create a branch to organize the work".to_string(),
            hints: vec![],
        },
        ProjectStatus::Active => Guidance {
            next_action: "select a branch and pick the next task".to_string(),
            hints: vec![],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;
    use chrono::Utc;

    fn task(status: TaskStatus) -> Task {
        Task {
            id: "t1".to_string(),
            branch_id: "b1".to_string(),
            title: "Task".to_string(),
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

    fn progress(total: i64, completed: i64) -> SubtaskProgress {
        SubtaskProgress {
            total,
            completed,
            percentage: if total == 0 { 0 } else { completed * 100 / total },
            ready_to_complete: total > 0 && completed == total,
        }
    }

    #[test]
    fn test_guidance_is_deterministic() {
        let t = task(TaskStatus::InProgress);
        let p = progress(2, 1);
        assert_eq!(for_task(&t, &p), for_task(&t, &p));
    }

    #[test]
    fn test_ready_to_complete_guidance() {
        let guidance = for_task(&task(TaskStatus::InProgress), &progress(2, 2));
        assert!(guidance.next_action.contains("complete the task"));
    }

    #[test]
    fn test_todo_guidance_suggests_start() {
        let guidance = for_task(&task(TaskStatus::Todo), &progress(0, 0));
        assert!(guidance.next_action.contains("in_progress"));
    }
}
