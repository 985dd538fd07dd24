//! Dependency graph maintenance and blocker analysis.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use serde::Serialize;

use crate::error::{LatticeError, Result};
use crate::models::{Task, TaskStatus};
use crate::repository::{BranchRepository, TaskRepository};

/// Maintains the acyclic dependency graph between tasks.
///
/// Edges may cross branches within one project but never cross projects.
/// Cycle checks run before any edge is written, so a rejected addition
/// leaves both tasks untouched.
pub struct DependencyService {
    tasks: Arc<dyn TaskRepository>,
    branches: Arc<dyn BranchRepository>,
}

/// Blocker analysis for one task
#[derive(Debug, Clone, Serialize)]
pub struct BlockerAnalysis {
    pub task_id: String,
    /// Ids this task depends on, with their current status
    pub depends_on: Vec<DependencyRef>,
    /// Ids of tasks that list this task in their dependencies
    pub blocks: Vec<DependencyRef>,
    /// True iff every dependency is done
    pub is_actionable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyRef {
    pub task_id: String,
    pub title: String,
    pub status: TaskStatus,
}

impl DependencyService {
    pub fn new(tasks: Arc<dyn TaskRepository>, branches: Arc<dyn BranchRepository>) -> Self {
        Self { tasks, branches }
    }

    /// Add an edge `task -> depends_on`.
    ///
    /// Returns `false` when the edge already existed. Fails with
    /// `DependencyCycle` when the target can already reach the source, and
    /// with `Validation` for a cross-project edge.
    pub async fn add(&self, task_id: &str, depends_on: &str) -> Result<bool> {
        if task_id == depends_on {
            return Err(LatticeError::DependencyCycle(format!(
                "task '{task_id}' cannot depend on itself"
            )));
        }

        let task = self.require_task(task_id).await?;
        let dependency = self.require_task(depends_on).await?;
        self.require_same_project(&task, &dependency).await?;

        // Reject if `depends_on` already reaches `task_id` transitively
        if self.reaches(depends_on, task_id).await? {
            return Err(LatticeError::DependencyCycle(format!(
                "adding '{task_id}' -> '{depends_on}' would close a cycle"
            )));
        }

        self.tasks.add_dependency(task_id, depends_on).await
    }

    /// Remove an edge; returns `false` when it did not exist.
    pub async fn remove(&self, task_id: &str, depends_on: &str) -> Result<bool> {
        self.require_task(task_id).await?;
        self.tasks.remove_dependency(task_id, depends_on).await
    }

    /// Blocker analysis: `depends_on`, `blocks`, actionability.
    pub async fn blockers(&self, task_id: &str) -> Result<BlockerAnalysis> {
        self.require_task(task_id).await?;

        let mut depends_on = Vec::new();
        for id in self.tasks.dependencies_of(task_id).await? {
            if let Some(task) = self.tasks.get(&id).await? {
                depends_on.push(DependencyRef {
                    task_id: task.id,
                    title: task.title,
                    status: task.status,
                });
            }
        }

        let mut blocks = Vec::new();
        for id in self.tasks.dependents_of(task_id).await? {
            if let Some(task) = self.tasks.get(&id).await? {
                blocks.push(DependencyRef {
                    task_id: task.id,
                    title: task.title,
                    status: task.status,
                });
            }
        }

        let is_actionable = depends_on.iter().all(|d| d.status == TaskStatus::Done);
        Ok(BlockerAnalysis {
            task_id: task_id.to_string(),
            depends_on,
            blocks,
            is_actionable,
        })
    }

    /// Dependency ids of `task_id` that are not yet done.
    pub async fn unsatisfied(&self, task_id: &str) -> Result<Vec<String>> {
        let mut blocking = Vec::new();
        for id in self.tasks.dependencies_of(task_id).await? {
            match self.tasks.get(&id).await? {
                Some(task) if task.status == TaskStatus::Done => {}
                Some(task) => blocking.push(task.id),
                // A dangling edge blocks until it is removed
                None => blocking.push(id),
            }
        }
        Ok(blocking)
    }

    /// Breadth-first reachability over depends-on edges.
    async fn reaches(&self, from: &str, to: &str) -> Result<bool> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(from.to_string());

        while let Some(current) = queue.pop_front() {
            if current == to {
                return Ok(true);
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            for next in self.tasks.dependencies_of(&current).await? {
                if !seen.contains(&next) {
                    queue.push_back(next);
                }
            }
        }
        Ok(false)
    }

    async fn require_task(&self, id: &str) -> Result<Task> {
        self.tasks
            .get(id)
            .await?
            .ok_or_else(|| LatticeError::not_found("Task", id))
    }

    async fn project_of(&self, branch_id: &str) -> Result<String> {
        self.branches
            .get(branch_id)
            .await?
            .map(|branch| branch.project_id)
            .ok_or_else(|| LatticeError::not_found("Branch", branch_id))
    }

    async fn require_same_project(&self, a: &Task, b: &Task) -> Result<()> {
        let project_a = self.project_of(&a.branch_id).await?;
        let project_b = self.project_of(&b.branch_id).await?;
        if project_a != project_b {
            return Err(LatticeError::Validation(format!(
                "tasks '{}' and '{}' belong to different projects",
                a.id, b.id
            )));
        }
        Ok(())
    }
}
