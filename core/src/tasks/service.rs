//! Task lifecycle: creation, transitions, gated completion, next-task
//! selection and search.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::context::{ContextService, ContextSyncService};
use crate::error::{InvariantKind, LatticeError, Result};
use crate::models::{
    CompleteTask, NewTask, Task, TaskFilter, TaskStatus, UpdateTask,
};
use crate::repository::{
    BranchRepository, CascadeDelete, SubtaskRepository, TaskRepository,
};
use crate::tasks::dependencies::DependencyService;
use crate::validation::Validator;

/// Outcome of a gated completion
#[derive(Debug, Clone, Serialize)]
pub struct CompletionOutcome {
    pub task: Task,
    /// True when the task context was created automatically to satisfy the
    /// completion gate
    pub context_auto_created: bool,
    /// True when the call was an idempotent re-completion
    pub already_done: bool,
}

/// Orchestrates task state over the repositories, the context engine and
/// the dependency graph.
pub struct TaskService {
    tasks: Arc<dyn TaskRepository>,
    subtasks: Arc<dyn SubtaskRepository>,
    branches: Arc<dyn BranchRepository>,
    contexts: Arc<ContextService>,
    sync: Arc<ContextSyncService>,
    dependencies: Arc<DependencyService>,
}

impl TaskService {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        subtasks: Arc<dyn SubtaskRepository>,
        branches: Arc<dyn BranchRepository>,
        contexts: Arc<ContextService>,
        sync: Arc<ContextSyncService>,
        dependencies: Arc<DependencyService>,
    ) -> Self {
        Self {
            tasks,
            subtasks,
            branches,
            contexts,
            sync,
            dependencies,
        }
    }

    pub fn dependencies(&self) -> &DependencyService {
        &self.dependencies
    }

    /// Create a task in `todo`.
    ///
    /// The branch must exist and every declared dependency must be an
    /// existing task. A brand-new task cannot close a cycle, so only
    /// existence is checked here.
    pub async fn create(&self, new_task: NewTask) -> Result<Task> {
        Validator::validate_name("title", &new_task.title)?;
        self.branches
            .get(&new_task.branch_id)
            .await?
            .ok_or_else(|| LatticeError::not_found("Branch", &new_task.branch_id))?;

        for dependency_id in &new_task.dependencies {
            self.tasks
                .get(dependency_id)
                .await?
                .ok_or_else(|| LatticeError::not_found("Task", dependency_id))?;
        }

        let task = self.tasks.create(new_task).await?;
        info!(task_id = %task.id, branch_id = %task.branch_id, "task created");
        Ok(task)
    }

    pub async fn get(&self, id: &str) -> Result<Task> {
        self.tasks
            .get(id)
            .await?
            .ok_or_else(|| LatticeError::not_found("Task", id))
    }

    pub async fn list(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        self.tasks.list(filter).await
    }

    /// Update a task; a requested status change must be a legal transition.
    ///
    /// `done` is unreachable through update; completion is its own gated
    /// action.
    pub async fn update(&self, id: &str, updates: UpdateTask) -> Result<Task> {
        let current = self.get(id).await?;

        if let Some(title) = &updates.title {
            Validator::validate_name("title", title)?;
        }
        if let Some(new_status) = updates.status {
            if new_status == TaskStatus::Done {
                return Err(LatticeError::Validation(
                    "use the complete action to mark a task done".to_string(),
                ));
            }
            if new_status != current.status && !current.can_transition_to(new_status) {
                return Err(LatticeError::blocked_by(
                    InvariantKind::IllegalTransition,
                    format!(
                        "cannot transition task '{}' from {} to {}",
                        id, current.status, new_status
                    ),
                    vec![],
                ));
            }
        }

        let updated = self.tasks.update(id, updates).await?;
        self.sync.task_updated(&updated).await;
        Ok(updated)
    }

    /// Delete a task and invalidate every cache entry behind its contexts.
    pub async fn delete(&self, id: &str) -> Result<CascadeDelete> {
        self.get(id).await?;
        let cascade = self.tasks.delete(id).await?;
        self.contexts
            .cache()
            .invalidate_many(&cascade.removed_context_ids);
        info!(task_id = %id, "task deleted");
        Ok(cascade)
    }

    /// Gated completion.
    ///
    /// Gates, in order: non-empty summary; every subtask done (failure
    /// lists the blocking subtask ids); every dependency done unless
    /// relaxed (failure lists the blocking task ids); a task context,
    /// created automatically when absent. Re-completing with the same
    /// summary is a no-op success.
    pub async fn complete(&self, id: &str, request: CompleteTask) -> Result<CompletionOutcome> {
        let task = self.get(id).await?;

        if task.status == TaskStatus::Done {
            if task.completion_summary == request.completion_summary {
                return Ok(CompletionOutcome {
                    task,
                    context_auto_created: false,
                    already_done: true,
                });
            }
            return Err(LatticeError::ConflictingState(format!(
                "task '{id}' is already done with a different completion summary"
            )));
        }
        if task.status == TaskStatus::Cancelled {
            return Err(LatticeError::blocked_by(
                InvariantKind::TerminalState,
                format!("cancelled task '{id}' cannot be completed; reopen it first"),
                vec![],
            ));
        }

        if request.completion_summary.trim().is_empty() {
            return Err(LatticeError::empty_field("completion_summary"));
        }

        let unfinished: Vec<String> = self
            .subtasks
            .list_by_task(id)
            .await?
            .into_iter()
            .filter(|subtask| subtask.status != TaskStatus::Done)
            .map(|subtask| subtask.id)
            .collect();
        if !unfinished.is_empty() {
            return Err(LatticeError::blocked_by(
                InvariantKind::UnfinishedSubtasks,
                format!(
                    "task '{id}' has {} unfinished subtasks",
                    unfinished.len()
                ),
                unfinished,
            ));
        }

        if request.enforce_dependencies {
            let blocking = self.dependencies.unsatisfied(id).await?;
            if !blocking.is_empty() {
                return Err(LatticeError::blocked_by(
                    InvariantKind::UnsatisfiedDependencies,
                    format!(
                        "task '{id}' has {} unsatisfied dependencies",
                        blocking.len()
                    ),
                    blocking,
                ));
            }
        }

        let context_auto_created = self.contexts.ensure_chain_for_task(&task).await?;

        let completed = self
            .tasks
            .complete(
                id,
                &request.completion_summary,
                request.testing_notes.as_deref(),
                id,
            )
            .await?;

        self.contexts.cache().invalidate_dependents(id);
        self.sync.task_completed(&completed).await;

        info!(
            task_id = %id,
            context_auto_created,
            "task completed"
        );
        Ok(CompletionOutcome {
            task: completed,
            context_auto_created,
            already_done: false,
        })
    }

    /// Highest-priority actionable task in a branch.
    ///
    /// Eligible tasks are neither terminal nor blocked and have every
    /// dependency done. Ties break by priority rank, then earliest
    /// creation, then lexicographic id.
    pub async fn next(&self, branch_id: &str) -> Result<Option<Task>> {
        self.branches
            .get(branch_id)
            .await?
            .ok_or_else(|| LatticeError::not_found("Branch", branch_id))?;

        let mut candidates = Vec::new();
        for task in self
            .tasks
            .list(TaskFilter {
                branch_id: Some(branch_id.to_string()),
                ..Default::default()
            })
            .await?
        {
            if !task.is_actionable() {
                continue;
            }
            if self.dependencies.unsatisfied(&task.id).await?.is_empty() {
                candidates.push(task);
            }
        }

        candidates.sort_by(|a, b| {
            b.priority
                .rank()
                .cmp(&a.priority.rank())
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(candidates.into_iter().next())
    }

    /// Token-AND search over title, description, details and labels.
    ///
    /// Every whitespace token must appear, case-insensitively, in at least
    /// one field. An empty query returns an empty list. Results order by
    /// recency, then id for determinism.
    pub async fn search(&self, query: &str, branch_id: Option<&str>) -> Result<Vec<Task>> {
        let tokens: Vec<String> = query
            .split_whitespace()
            .map(|token| token.to_lowercase())
            .collect();
        if tokens.is_empty() {
            return Ok(vec![]);
        }

        let candidates = self
            .tasks
            .list(TaskFilter {
                branch_id: branch_id.map(str::to_string),
                ..Default::default()
            })
            .await?;

        let mut matches: Vec<Task> = candidates
            .into_iter()
            .filter(|task| {
                let haystack = format!(
                    "{} {} {} {}",
                    task.title,
                    task.description,
                    task.details,
                    task.labels.join(" ")
                )
                .to_lowercase();
                tokens.iter().all(|token| haystack.contains(token))
            })
            .collect();

        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        Ok(matches)
    }
}
