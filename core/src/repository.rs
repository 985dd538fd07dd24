use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    Agent, Branch, BranchStatistics, CompleteSubtask, ContextDelegation, ContextLevel,
    ContextRecord, NewBranch, NewProject, NewSubtask, NewTask, Project, Subtask, Task, TaskFilter,
    UpdateBranch, UpdateProject, UpdateSubtask, UpdateTask,
};

/// Context ids removed by a cascading delete.
///
/// Returned so the caller can invalidate every cache entry whose chain
/// traversed one of the removed contexts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeDelete {
    pub removed_context_ids: Vec<String>,
}

/// Persistence for projects.
///
/// Implementations must be thread-safe and run cascading deletes inside a
/// single transaction.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    /// Create a project; fails with `AlreadyExists` when the `(user_id,
    /// name)` pair is taken.
    async fn create(&self, project: NewProject, user_id: &str) -> Result<Project>;

    async fn get(&self, id: &str) -> Result<Option<Project>>;

    async fn get_by_name(&self, user_id: &str, name: &str) -> Result<Option<Project>>;

    /// List projects, optionally scoped to one user
    async fn list(&self, user_id: Option<&str>) -> Result<Vec<Project>>;

    /// Update only the `Some` fields; fails with `NotFound` for unknown ids
    async fn update(&self, id: &str, updates: UpdateProject) -> Result<Project>;

    /// Delete the project, cascading to branches, tasks and their contexts
    async fn delete(&self, id: &str) -> Result<CascadeDelete>;

    /// Storage connectivity probe
    async fn health_check(&self) -> Result<()>;
}

/// Persistence for branches and their agent assignments.
#[async_trait]
pub trait BranchRepository: Send + Sync {
    /// Create a branch; fails with `AlreadyExists` when the name is taken
    /// within the project and `NotFound` when the project is missing.
    async fn create(&self, branch: NewBranch) -> Result<Branch>;

    async fn get(&self, id: &str) -> Result<Option<Branch>>;

    async fn list(&self, project_id: &str) -> Result<Vec<Branch>>;

    async fn update(&self, id: &str, updates: UpdateBranch) -> Result<Branch>;

    /// Delete the branch, cascading to its tasks and contexts
    async fn delete(&self, id: &str) -> Result<CascadeDelete>;

    /// Record an assignment in the live assignment table
    async fn assign_agent(&self, branch_id: &str, agent_id: &str) -> Result<Branch>;

    async fn unassign_agent(&self, branch_id: &str, agent_id: &str) -> Result<Branch>;

    /// Agent ids currently assigned, read from the assignment table
    async fn assigned_agents(&self, branch_id: &str) -> Result<Vec<String>>;

    /// Statistics derived from live task and assignment rows at read time
    async fn statistics(&self, branch_id: &str) -> Result<BranchStatistics>;
}

/// Persistence for tasks, their labels and dependency edges.
///
/// Every status-affecting write recomputes the owning branch's
/// `task_count` / `completed_task_count` inside the same transaction.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Create a task in `todo`; fails with `NotFound` for a missing branch
    async fn create(&self, task: NewTask) -> Result<Task>;

    async fn get(&self, id: &str) -> Result<Option<Task>>;

    async fn list(&self, filter: TaskFilter) -> Result<Vec<Task>>;

    /// Update only the `Some` fields; status changes recount the branch
    async fn update(&self, id: &str, updates: UpdateTask) -> Result<Task>;

    /// Delete the task, cascading to subtasks, edges, labels and context
    async fn delete(&self, id: &str) -> Result<CascadeDelete>;

    /// Mark the task done with its summary, link the task context and
    /// recount the branch, all in one transaction. Gate checks happen in
    /// the lifecycle service before this is called.
    async fn complete(
        &self,
        id: &str,
        completion_summary: &str,
        testing_notes: Option<&str>,
        context_id: &str,
    ) -> Result<Task>;

    /// Add a dependency edge `task -> depends_on`; returns `false` when the
    /// edge already existed (idempotent). Cycle checks happen in the
    /// dependency service before this is called.
    async fn add_dependency(&self, task_id: &str, depends_on: &str) -> Result<bool>;

    /// Remove a dependency edge; returns `false` when it did not exist
    async fn remove_dependency(&self, task_id: &str, depends_on: &str) -> Result<bool>;

    /// Ids this task depends on
    async fn dependencies_of(&self, task_id: &str) -> Result<Vec<String>>;

    /// Ids of tasks that depend on this task
    async fn dependents_of(&self, task_id: &str) -> Result<Vec<String>>;
}

/// Persistence for subtasks.
#[async_trait]
pub trait SubtaskRepository: Send + Sync {
    /// Create a subtask; fails with `NotFound` for a missing parent task
    async fn create(&self, subtask: NewSubtask) -> Result<Subtask>;

    async fn get(&self, id: &str) -> Result<Option<Subtask>>;

    /// Subtasks of a task, ordered by creation
    async fn list_by_task(&self, task_id: &str) -> Result<Vec<Subtask>>;

    async fn update(&self, id: &str, updates: UpdateSubtask) -> Result<Subtask>;

    /// Mark the subtask done: progress forced to 100, summary and insights
    /// recorded, `completed_at` stamped.
    async fn complete(&self, id: &str, completion: CompleteSubtask) -> Result<Subtask>;

    async fn delete(&self, id: &str) -> Result<bool>;
}

/// Persistence for context records across all four levels.
#[async_trait]
pub trait ContextRepository: Send + Sync {
    /// Insert a record; fails with `AlreadyExists` on a duplicate key.
    /// Parent-existence checks happen in the resolver service.
    async fn insert(&self, record: ContextRecord) -> Result<ContextRecord>;

    async fn get(&self, level: ContextLevel, id: &str) -> Result<Option<ContextRecord>>;

    /// Optimistic write: persists the record with `version + 1` only when
    /// the stored version still matches `record.version`; otherwise fails
    /// with `ConflictingState`.
    async fn update(&self, record: ContextRecord) -> Result<ContextRecord>;

    async fn delete(&self, level: ContextLevel, id: &str) -> Result<()>;

    async fn list(&self, level: ContextLevel) -> Result<Vec<ContextRecord>>;

    /// Ids of existing child contexts pointing at `(level, id)`
    async fn children_of(&self, level: ContextLevel, id: &str) -> Result<Vec<String>>;
}

/// Persistence for the delegation queue.
#[async_trait]
pub trait DelegationRepository: Send + Sync {
    async fn create(&self, delegation: ContextDelegation) -> Result<ContextDelegation>;

    async fn get(&self, id: &str) -> Result<Option<ContextDelegation>>;

    /// List queue entries, optionally filtered by processed flag
    async fn list(&self, processed: Option<bool>) -> Result<Vec<ContextDelegation>>;

    /// Record the outcome of processing a queue entry
    async fn mark_processed(
        &self,
        id: &str,
        approved: bool,
        rejected_reason: Option<String>,
    ) -> Result<ContextDelegation>;
}

/// Persistence for agent reference records.
#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Register an agent; idempotent for an identical re-registration
    async fn register(&self, agent: Agent) -> Result<Agent>;

    async fn get(&self, id: &str) -> Result<Option<Agent>>;

    async fn list(&self) -> Result<Vec<Agent>>;

    async fn unregister(&self, id: &str) -> Result<bool>;
}
