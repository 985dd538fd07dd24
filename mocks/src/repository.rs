use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use lattice_core::{
    error::{LatticeError, Result},
    models::{
        new_entity_id, Agent, Branch, BranchStatistics, CompleteSubtask, ContextDelegation,
        ContextLevel, ContextRecord, NewBranch, NewProject, NewSubtask, NewTask, Priority,
        Project, ProjectStatus, Subtask, Task, TaskFilter, TaskStatus, UpdateBranch,
        UpdateProject, UpdateSubtask, UpdateTask,
    },
    repository::{
        AgentRepository, BranchRepository, CascadeDelete, ContextRepository,
        DelegationRepository, ProjectRepository, SubtaskRepository, TaskRepository,
    },
};

/// Thread-safe in-memory store implementing every repository trait.
///
/// Supports error injection (the next call fails with the injected error)
/// and records called method names for verification.
#[derive(Default)]
pub struct InMemoryRepositories {
    projects: Mutex<HashMap<String, Project>>,
    branches: Mutex<HashMap<String, Branch>>,
    tasks: Mutex<HashMap<String, Task>>,
    dependencies: Mutex<HashSet<(String, String)>>,
    subtasks: Mutex<HashMap<String, Subtask>>,
    contexts: Mutex<HashMap<(ContextLevel, String), ContextRecord>>,
    delegations: Mutex<HashMap<String, ContextDelegation>>,
    agents: Mutex<HashMap<String, Agent>>,
    assignments: Mutex<HashSet<(String, String)>>,
    injected_error: Mutex<Option<LatticeError>>,
    injected_delay: Mutex<Option<std::time::Duration>>,
    call_history: Mutex<Vec<String>>,
}

impl InMemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next repository call with this error.
    pub fn inject_error(&self, error: LatticeError) {
        *self.injected_error.lock() = Some(error);
    }

    /// Delay every repository call; exercises timeout budgets.
    pub fn inject_delay(&self, delay: std::time::Duration) {
        *self.injected_delay.lock() = Some(delay);
    }

    /// Methods called so far, in order.
    pub fn call_history(&self) -> Vec<String> {
        self.call_history.lock().clone()
    }

    pub fn assert_called(&self, method: &str) {
        let history = self.call_history.lock();
        assert!(
            history.iter().any(|call| call.contains(method)),
            "method '{method}' was not called; history: {history:?}"
        );
    }

    async fn enter(&self, method: &str) -> Result<()> {
        self.call_history.lock().push(method.to_string());
        let delay = *self.injected_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.injected_error.lock().take() {
            return Err(error);
        }
        Ok(())
    }

    fn recount(&self, branch_id: &str) {
        let tasks = self.tasks.lock();
        let total = tasks.values().filter(|t| t.branch_id == branch_id).count() as i64;
        let done = tasks
            .values()
            .filter(|t| t.branch_id == branch_id && t.status == TaskStatus::Done)
            .count() as i64;
        drop(tasks);
        if let Some(branch) = self.branches.lock().get_mut(branch_id) {
            branch.task_count = total;
            branch.completed_task_count = done;
            branch.updated_at = Utc::now();
        }
    }
}

#[async_trait]
impl ProjectRepository for InMemoryRepositories {
    async fn create(&self, project: NewProject, user_id: &str) -> Result<Project> {
        self.enter("project.create").await?;
        let mut projects = self.projects.lock();
        if projects
            .values()
            .any(|p| p.user_id == user_id && p.name == project.name)
        {
            return Err(LatticeError::already_exists("Project", &project.name));
        }
        let now = Utc::now();
        let created = Project {
            id: new_entity_id(),
            name: project.name,
            description: project.description,
            user_id: user_id.to_string(),
            status: ProjectStatus::Active,
            created_at: now,
            updated_at: now,
        };
        projects.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn get(&self, id: &str) -> Result<Option<Project>> {
        self.enter("project.get").await?;
        Ok(self.projects.lock().get(id).cloned())
    }

    async fn get_by_name(&self, user_id: &str, name: &str) -> Result<Option<Project>> {
        self.enter("project.get_by_name").await?;
        Ok(self
            .projects
            .lock()
            .values()
            .find(|p| p.user_id == user_id && p.name == name)
            .cloned())
    }

    async fn list(&self, user_id: Option<&str>) -> Result<Vec<Project>> {
        self.enter("project.list").await?;
        let mut projects: Vec<Project> = self
            .projects
            .lock()
            .values()
            .filter(|p| user_id.map_or(true, |u| p.user_id == u))
            .cloned()
            .collect();
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(projects)
    }

    async fn update(&self, id: &str, updates: UpdateProject) -> Result<Project> {
        self.enter("project.update").await?;
        let mut projects = self.projects.lock();
        let project = projects
            .get_mut(id)
            .ok_or_else(|| LatticeError::not_found("Project", id))?;
        if let Some(name) = updates.name {
            project.name = name;
        }
        if let Some(description) = updates.description {
            project.description = description;
        }
        if let Some(status) = updates.status {
            project.status = status;
        }
        project.updated_at = Utc::now();
        Ok(project.clone())
    }

    async fn delete(&self, id: &str) -> Result<CascadeDelete> {
        self.enter("project.delete").await?;
        if self.projects.lock().remove(id).is_none() {
            return Err(LatticeError::not_found("Project", id));
        }
        let mut removed_context_ids = vec![id.to_string()];

        let branch_ids: Vec<String> = self
            .branches
            .lock()
            .values()
            .filter(|b| b.project_id == id)
            .map(|b| b.id.clone())
            .collect();
        for branch_id in &branch_ids {
            self.branches.lock().remove(branch_id);
            removed_context_ids.push(branch_id.clone());
            let task_ids: Vec<String> = self
                .tasks
                .lock()
                .values()
                .filter(|t| &t.branch_id == branch_id)
                .map(|t| t.id.clone())
                .collect();
            for task_id in task_ids {
                self.tasks.lock().remove(&task_id);
                self.subtasks.lock().retain(|_, s| s.task_id != task_id);
                self.dependencies
                    .lock()
                    .retain(|(a, b)| a != &task_id && b != &task_id);
                removed_context_ids.push(task_id);
            }
        }
        let mut contexts = self.contexts.lock();
        for context_id in &removed_context_ids {
            contexts.retain(|(_, id), _| id != context_id);
        }
        Ok(CascadeDelete {
            removed_context_ids,
        })
    }

    async fn health_check(&self) -> Result<()> {
        self.enter("project.health_check").await
    }
}

#[async_trait]
impl BranchRepository for InMemoryRepositories {
    async fn create(&self, branch: NewBranch) -> Result<Branch> {
        self.enter("branch.create").await?;
        if !self.projects.lock().contains_key(&branch.project_id) {
            return Err(LatticeError::not_found("Project", &branch.project_id));
        }
        let mut branches = self.branches.lock();
        if branches
            .values()
            .any(|b| b.project_id == branch.project_id && b.name == branch.name)
        {
            return Err(LatticeError::already_exists("Branch", &branch.name));
        }
        let now = Utc::now();
        let created = Branch {
            id: new_entity_id(),
            project_id: branch.project_id,
            name: branch.name,
            description: branch.description,
            priority: branch.priority.unwrap_or(Priority::Medium),
            status: TaskStatus::Todo,
            assigned_agent_id: None,
            task_count: 0,
            completed_task_count: 0,
            created_at: now,
            updated_at: now,
        };
        branches.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn get(&self, id: &str) -> Result<Option<Branch>> {
        self.enter("branch.get").await?;
        Ok(self.branches.lock().get(id).cloned())
    }

    async fn list(&self, project_id: &str) -> Result<Vec<Branch>> {
        self.enter("branch.list").await?;
        let mut branches: Vec<Branch> = self
            .branches
            .lock()
            .values()
            .filter(|b| b.project_id == project_id)
            .cloned()
            .collect();
        branches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(branches)
    }

    async fn update(&self, id: &str, updates: UpdateBranch) -> Result<Branch> {
        self.enter("branch.update").await?;
        let mut branches = self.branches.lock();
        let branch = branches
            .get_mut(id)
            .ok_or_else(|| LatticeError::not_found("Branch", id))?;
        if let Some(name) = updates.name {
            branch.name = name;
        }
        if let Some(description) = updates.description {
            branch.description = description;
        }
        if let Some(priority) = updates.priority {
            branch.priority = priority;
        }
        if let Some(status) = updates.status {
            branch.status = status;
        }
        branch.updated_at = Utc::now();
        Ok(branch.clone())
    }

    async fn delete(&self, id: &str) -> Result<CascadeDelete> {
        self.enter("branch.delete").await?;
        if self.branches.lock().remove(id).is_none() {
            return Err(LatticeError::not_found("Branch", id));
        }
        let mut removed_context_ids = vec![id.to_string()];
        let task_ids: Vec<String> = self
            .tasks
            .lock()
            .values()
            .filter(|t| t.branch_id == id)
            .map(|t| t.id.clone())
            .collect();
        for task_id in task_ids {
            self.tasks.lock().remove(&task_id);
            self.subtasks.lock().retain(|_, s| s.task_id != task_id);
            self.dependencies
                .lock()
                .retain(|(a, b)| a != &task_id && b != &task_id);
            removed_context_ids.push(task_id);
        }
        let mut contexts = self.contexts.lock();
        for context_id in &removed_context_ids {
            contexts.retain(|(_, cid), _| cid != context_id);
        }
        Ok(CascadeDelete {
            removed_context_ids,
        })
    }

    async fn assign_agent(&self, branch_id: &str, agent_id: &str) -> Result<Branch> {
        self.enter("branch.assign_agent").await?;
        self.assignments
            .lock()
            .insert((agent_id.to_string(), branch_id.to_string()));
        let mut branches = self.branches.lock();
        let branch = branches
            .get_mut(branch_id)
            .ok_or_else(|| LatticeError::not_found("Branch", branch_id))?;
        branch.assigned_agent_id = Some(agent_id.to_string());
        branch.updated_at = Utc::now();
        Ok(branch.clone())
    }

    async fn unassign_agent(&self, branch_id: &str, agent_id: &str) -> Result<Branch> {
        self.enter("branch.unassign_agent").await?;
        let removed = self
            .assignments
            .lock()
            .remove(&(agent_id.to_string(), branch_id.to_string()));
        if !removed {
            return Err(LatticeError::NotFound(format!(
                "Agent '{agent_id}' is not assigned to branch '{branch_id}'"
            )));
        }
        let mut branches = self.branches.lock();
        let branch = branches
            .get_mut(branch_id)
            .ok_or_else(|| LatticeError::not_found("Branch", branch_id))?;
        branch.assigned_agent_id = None;
        branch.updated_at = Utc::now();
        Ok(branch.clone())
    }

    async fn assigned_agents(&self, branch_id: &str) -> Result<Vec<String>> {
        self.enter("branch.assigned_agents").await?;
        let mut agents: Vec<String> = self
            .assignments
            .lock()
            .iter()
            .filter(|(_, b)| b == branch_id)
            .map(|(a, _)| a.clone())
            .collect();
        agents.sort();
        Ok(agents)
    }

    async fn statistics(&self, branch_id: &str) -> Result<BranchStatistics> {
        self.enter("branch.statistics").await?;
        let branch = self
            .branches
            .lock()
            .get(branch_id)
            .cloned()
            .ok_or_else(|| LatticeError::not_found("Branch", branch_id))?;
        let (tasks_by_status, task_count, completed) = {
            let tasks = self.tasks.lock();
            let mut tasks_by_status: HashMap<String, i64> = HashMap::new();
            let mut task_count = 0;
            let mut completed = 0;
            for task in tasks.values().filter(|t| t.branch_id == branch_id) {
                task_count += 1;
                if task.status == TaskStatus::Done {
                    completed += 1;
                }
                *tasks_by_status
                    .entry(task.status.as_str().to_string())
                    .or_insert(0) += 1;
            }
            (tasks_by_status, task_count, completed)
        };
        Ok(BranchStatistics {
            branch_id: branch.id,
            task_count,
            completed_task_count: completed,
            progress_percentage: if task_count == 0 {
                0
            } else {
                (completed * 100 + task_count / 2) / task_count
            },
            tasks_by_status,
            assigned_agents: self.assigned_agents(branch_id).await?,
        })
    }
}

#[async_trait]
impl TaskRepository for InMemoryRepositories {
    async fn create(&self, task: NewTask) -> Result<Task> {
        self.enter("task.create").await?;
        if !self.branches.lock().contains_key(&task.branch_id) {
            return Err(LatticeError::not_found("Branch", &task.branch_id));
        }
        let now = Utc::now();
        let created = Task {
            id: new_entity_id(),
            branch_id: task.branch_id.clone(),
            title: task.title,
            description: task.description,
            status: TaskStatus::Todo,
            priority: task.priority.unwrap_or(Priority::Medium),
            details: task.details,
            estimated_effort: task.estimated_effort,
            due_date: task.due_date,
            context_id: None,
            created_at: now,
            updated_at: now,
            completion_summary: String::new(),
            testing_notes: String::new(),
            assignees: task.assignees,
            labels: task.labels,
            dependencies: task.dependencies.clone(),
        };
        for dependency in &task.dependencies {
            self.dependencies
                .lock()
                .insert((created.id.clone(), dependency.clone()));
        }
        self.tasks.lock().insert(created.id.clone(), created.clone());
        self.recount(&task.branch_id);
        Ok(created)
    }

    async fn get(&self, id: &str) -> Result<Option<Task>> {
        self.enter("task.get").await?;
        let task = self.tasks.lock().get(id).cloned();
        Ok(task.map(|mut task| {
            task.dependencies = self.dependency_ids(id);
            task
        }))
    }

    async fn list(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        self.enter("task.list").await?;
        let mut tasks: Vec<Task> = self
            .tasks
            .lock()
            .values()
            .filter(|t| filter.branch_id.as_deref().map_or(true, |b| t.branch_id == b))
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| filter.priority.map_or(true, |p| t.priority == p))
            .filter(|t| {
                filter
                    .assignee
                    .as_deref()
                    .map_or(true, |a| t.assignees.iter().any(|x| x == a))
            })
            .filter(|t| {
                filter
                    .label
                    .as_deref()
                    .map_or(true, |l| t.labels.iter().any(|x| x == l))
            })
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        for task in &mut tasks {
            task.dependencies = self.dependency_ids(&task.id);
        }
        let offset = filter.offset.unwrap_or(0) as usize;
        let tasks: Vec<Task> = tasks.into_iter().skip(offset).collect();
        Ok(match filter.limit {
            Some(limit) => tasks.into_iter().take(limit as usize).collect(),
            None => tasks,
        })
    }

    async fn update(&self, id: &str, updates: UpdateTask) -> Result<Task> {
        self.enter("task.update").await?;
        let mut tasks = self.tasks.lock();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| LatticeError::not_found("Task", id))?;
        let old_status = task.status;
        if let Some(title) = updates.title {
            task.title = title;
        }
        if let Some(description) = updates.description {
            task.description = description;
        }
        if let Some(details) = updates.details {
            task.details = details;
        }
        if let Some(status) = updates.status {
            task.status = status;
        }
        if let Some(priority) = updates.priority {
            task.priority = priority;
        }
        if let Some(effort) = updates.estimated_effort {
            task.estimated_effort = Some(effort);
        }
        if let Some(due_date) = updates.due_date {
            task.due_date = due_date;
        }
        if let Some(assignees) = updates.assignees {
            task.assignees = assignees;
        }
        if let Some(labels) = updates.labels {
            task.labels = labels;
        }
        task.updated_at = Utc::now();
        let branch_id = task.branch_id.clone();
        let status_changed = task.status != old_status;
        let mut updated = task.clone();
        drop(tasks);
        if status_changed {
            self.recount(&branch_id);
        }
        updated.dependencies = self.dependency_ids(id);
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<CascadeDelete> {
        self.enter("task.delete").await?;
        let task = self
            .tasks
            .lock()
            .remove(id)
            .ok_or_else(|| LatticeError::not_found("Task", id))?;
        self.subtasks.lock().retain(|_, s| s.task_id != id);
        self.dependencies.lock().retain(|(a, b)| a != id && b != id);
        self.contexts
            .lock()
            .remove(&(ContextLevel::Task, id.to_string()));
        self.recount(&task.branch_id);
        Ok(CascadeDelete {
            removed_context_ids: vec![id.to_string()],
        })
    }

    async fn complete(
        &self,
        id: &str,
        completion_summary: &str,
        testing_notes: Option<&str>,
        context_id: &str,
    ) -> Result<Task> {
        self.enter("task.complete").await?;
        let mut tasks = self.tasks.lock();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| LatticeError::not_found("Task", id))?;
        task.status = TaskStatus::Done;
        task.completion_summary = completion_summary.to_string();
        task.testing_notes = testing_notes.unwrap_or("").to_string();
        task.context_id = Some(context_id.to_string());
        task.updated_at = Utc::now();
        let branch_id = task.branch_id.clone();
        let mut completed = task.clone();
        drop(tasks);
        self.recount(&branch_id);
        completed.dependencies = self.dependency_ids(id);
        Ok(completed)
    }

    async fn add_dependency(&self, task_id: &str, depends_on: &str) -> Result<bool> {
        self.enter("task.add_dependency").await?;
        Ok(self
            .dependencies
            .lock()
            .insert((task_id.to_string(), depends_on.to_string())))
    }

    async fn remove_dependency(&self, task_id: &str, depends_on: &str) -> Result<bool> {
        self.enter("task.remove_dependency").await?;
        Ok(self
            .dependencies
            .lock()
            .remove(&(task_id.to_string(), depends_on.to_string())))
    }

    async fn dependencies_of(&self, task_id: &str) -> Result<Vec<String>> {
        self.enter("task.dependencies_of").await?;
        Ok(self.dependency_ids(task_id))
    }

    async fn dependents_of(&self, task_id: &str) -> Result<Vec<String>> {
        self.enter("task.dependents_of").await?;
        let mut ids: Vec<String> = self
            .dependencies
            .lock()
            .iter()
            .filter(|(_, b)| b == task_id)
            .map(|(a, _)| a.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

impl InMemoryRepositories {
    fn dependency_ids(&self, task_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .dependencies
            .lock()
            .iter()
            .filter(|(a, _)| a == task_id)
            .map(|(_, b)| b.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl SubtaskRepository for InMemoryRepositories {
    async fn create(&self, subtask: NewSubtask) -> Result<Subtask> {
        self.enter("subtask.create").await?;
        if !self.tasks.lock().contains_key(&subtask.task_id) {
            return Err(LatticeError::not_found("Task", &subtask.task_id));
        }
        let now = Utc::now();
        let created = Subtask {
            id: new_entity_id(),
            task_id: subtask.task_id,
            title: subtask.title,
            description: subtask.description,
            status: TaskStatus::Todo,
            priority: subtask.priority.unwrap_or(Priority::Medium),
            assignees: subtask.assignees,
            progress_percentage: 0,
            progress_notes: String::new(),
            blockers: String::new(),
            completion_summary: String::new(),
            impact_on_parent: String::new(),
            insights_found: vec![],
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.subtasks
            .lock()
            .insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn get(&self, id: &str) -> Result<Option<Subtask>> {
        self.enter("subtask.get").await?;
        Ok(self.subtasks.lock().get(id).cloned())
    }

    async fn list_by_task(&self, task_id: &str) -> Result<Vec<Subtask>> {
        self.enter("subtask.list_by_task").await?;
        let mut subtasks: Vec<Subtask> = self
            .subtasks
            .lock()
            .values()
            .filter(|s| s.task_id == task_id)
            .cloned()
            .collect();
        subtasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(subtasks)
    }

    async fn update(&self, id: &str, updates: UpdateSubtask) -> Result<Subtask> {
        self.enter("subtask.update").await?;
        let mut subtasks = self.subtasks.lock();
        let subtask = subtasks
            .get_mut(id)
            .ok_or_else(|| LatticeError::not_found("Subtask", id))?;
        if let Some(title) = updates.title {
            subtask.title = title;
        }
        if let Some(description) = updates.description {
            subtask.description = description;
        }
        if let Some(status) = updates.status {
            subtask.status = status;
        }
        if let Some(priority) = updates.priority {
            subtask.priority = priority;
        }
        if let Some(assignees) = updates.assignees {
            subtask.assignees = assignees;
        }
        if let Some(progress) = updates.progress_percentage {
            subtask.progress_percentage = progress;
        }
        if let Some(notes) = updates.progress_notes {
            subtask.progress_notes = notes;
        }
        if let Some(blockers) = updates.blockers {
            subtask.blockers = blockers;
        }
        subtask.updated_at = Utc::now();
        Ok(subtask.clone())
    }

    async fn complete(&self, id: &str, completion: CompleteSubtask) -> Result<Subtask> {
        self.enter("subtask.complete").await?;
        let mut subtasks = self.subtasks.lock();
        let subtask = subtasks
            .get_mut(id)
            .ok_or_else(|| LatticeError::not_found("Subtask", id))?;
        subtask.status = TaskStatus::Done;
        subtask.progress_percentage = 100;
        subtask.completion_summary = completion.completion_summary;
        subtask.impact_on_parent = completion.impact_on_parent.unwrap_or_default();
        subtask.insights_found = completion.insights_found;
        subtask.completed_at = Some(Utc::now());
        subtask.updated_at = Utc::now();
        Ok(subtask.clone())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.enter("subtask.delete").await?;
        Ok(self.subtasks.lock().remove(id).is_some())
    }
}

#[async_trait]
impl ContextRepository for InMemoryRepositories {
    async fn insert(&self, record: ContextRecord) -> Result<ContextRecord> {
        self.enter("context.insert").await?;
        let mut contexts = self.contexts.lock();
        let key = record.key();
        if contexts.contains_key(&key) {
            return Err(LatticeError::already_exists(
                &format!("{} context", record.level),
                &record.id,
            ));
        }
        let mut created = record;
        created.version = 1;
        contexts.insert(key, created.clone());
        Ok(created)
    }

    async fn get(&self, level: ContextLevel, id: &str) -> Result<Option<ContextRecord>> {
        self.enter("context.get").await?;
        Ok(self.contexts.lock().get(&(level, id.to_string())).cloned())
    }

    async fn update(&self, record: ContextRecord) -> Result<ContextRecord> {
        self.enter("context.update").await?;
        let mut contexts = self.contexts.lock();
        let key = record.key();
        let stored = contexts.get_mut(&key).ok_or_else(|| {
            LatticeError::not_found(&format!("{} context", record.level), &record.id)
        })?;
        if stored.version != record.version {
            return Err(LatticeError::ConflictingState(format!(
                "{} context '{}' was modified concurrently",
                record.level, record.id
            )));
        }
        let mut updated = record;
        updated.version += 1;
        updated.updated_at = Utc::now();
        *stored = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, level: ContextLevel, id: &str) -> Result<()> {
        self.enter("context.delete").await?;
        if self
            .contexts
            .lock()
            .remove(&(level, id.to_string()))
            .is_none()
        {
            return Err(LatticeError::not_found(&format!("{level} context"), id));
        }
        Ok(())
    }

    async fn list(&self, level: ContextLevel) -> Result<Vec<ContextRecord>> {
        self.enter("context.list").await?;
        let mut records: Vec<ContextRecord> = self
            .contexts
            .lock()
            .values()
            .filter(|r| r.level == level)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn children_of(&self, level: ContextLevel, id: &str) -> Result<Vec<String>> {
        self.enter("context.children_of").await?;
        let child_level = match level {
            ContextLevel::Global => ContextLevel::Project,
            ContextLevel::Project => ContextLevel::Branch,
            ContextLevel::Branch => ContextLevel::Task,
            ContextLevel::Task => return Ok(vec![]),
        };
        let mut ids: Vec<String> = self
            .contexts
            .lock()
            .values()
            .filter(|r| r.level == child_level && r.parent_id.as_deref() == Some(id))
            .map(|r| r.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl DelegationRepository for InMemoryRepositories {
    async fn create(&self, delegation: ContextDelegation) -> Result<ContextDelegation> {
        self.enter("delegation.create").await?;
        self.delegations
            .lock()
            .insert(delegation.id.clone(), delegation.clone());
        Ok(delegation)
    }

    async fn get(&self, id: &str) -> Result<Option<ContextDelegation>> {
        self.enter("delegation.get").await?;
        Ok(self.delegations.lock().get(id).cloned())
    }

    async fn list(&self, processed: Option<bool>) -> Result<Vec<ContextDelegation>> {
        self.enter("delegation.list").await?;
        let mut delegations: Vec<ContextDelegation> = self
            .delegations
            .lock()
            .values()
            .filter(|d| processed.map_or(true, |p| d.processed == p))
            .cloned()
            .collect();
        delegations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(delegations)
    }

    async fn mark_processed(
        &self,
        id: &str,
        approved: bool,
        rejected_reason: Option<String>,
    ) -> Result<ContextDelegation> {
        self.enter("delegation.mark_processed").await?;
        let mut delegations = self.delegations.lock();
        let delegation = delegations
            .get_mut(id)
            .ok_or_else(|| LatticeError::not_found("Delegation", id))?;
        delegation.processed = true;
        delegation.approved = Some(approved);
        delegation.rejected_reason = rejected_reason;
        delegation.processed_at = Some(Utc::now());
        Ok(delegation.clone())
    }
}

#[async_trait]
impl AgentRepository for InMemoryRepositories {
    async fn register(&self, agent: Agent) -> Result<Agent> {
        self.enter("agent.register").await?;
        self.agents.lock().insert(agent.id.clone(), agent.clone());
        Ok(agent)
    }

    async fn get(&self, id: &str) -> Result<Option<Agent>> {
        self.enter("agent.get").await?;
        Ok(self.agents.lock().get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Agent>> {
        self.enter("agent.list").await?;
        let mut agents: Vec<Agent> = self.agents.lock().values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    async fn unregister(&self, id: &str) -> Result<bool> {
        self.enter("agent.unregister").await?;
        Ok(self.agents.lock().remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_injection_consumed_once() {
        let repos = InMemoryRepositories::new();
        repos.inject_error(LatticeError::Database("boom".to_string()));

        let result = ProjectRepository::list(&repos, None).await;
        assert!(matches!(result, Err(LatticeError::Database(_))));

        // The next call succeeds
        assert!(ProjectRepository::list(&repos, None).await.is_ok());
        repos.assert_called("project.list");
    }

    #[tokio::test]
    async fn test_context_version_semantics_match_sqlite() {
        let repos = InMemoryRepositories::new();
        let now = Utc::now();
        let record = ContextRecord {
            level: ContextLevel::Project,
            id: "p1".to_string(),
            parent_id: None,
            data: serde_json::json!({}),
            local_overrides: serde_json::json!({}),
            delegation_triggers: serde_json::json!({}),
            inheritance_disabled: false,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        let created = ContextRepository::insert(&repos, record.clone()).await.unwrap();
        assert_eq!(created.version, 1);

        let updated = ContextRepository::update(&repos, created.clone()).await.unwrap();
        assert_eq!(updated.version, 2);

        // Stale writer loses
        let stale = ContextRepository::update(&repos, created).await;
        assert!(matches!(stale, Err(LatticeError::ConflictingState(_))));
    }
}
