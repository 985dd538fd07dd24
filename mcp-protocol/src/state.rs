//! Service wiring shared by the server and the test harnesses.

use std::sync::Arc;
use std::time::Duration;

use lattice_core::{
    AgentRepository, AgentService, BranchRepository, BranchService, ContextCache,
    ContextRepository, ContextService, ContextSyncService, DelegationEngine,
    DelegationRepository, DependencyService, ProjectRepository, ProjectService, Result,
    SubtaskRepository, SubtaskService, TaskRepository, TaskService,
};

/// Tunables consumed while assembling the service graph.
#[derive(Debug, Clone)]
pub struct StateConfig {
    pub cache_capacity: usize,
    pub cache_ttl: Option<Duration>,
    pub default_user_id: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            cache_capacity: lattice_core::context::DEFAULT_CACHE_CAPACITY,
            cache_ttl: None,
            default_user_id: "default_user".to_string(),
        }
    }
}

/// The facade layer: every controller reaches the domain through this.
#[derive(Clone)]
pub struct AppState {
    pub projects: Arc<ProjectService>,
    pub branches: Arc<BranchService>,
    pub tasks: Arc<TaskService>,
    pub subtasks: Arc<SubtaskService>,
    pub contexts: Arc<ContextService>,
    pub agents: Arc<AgentService>,
    pub dependencies: Arc<DependencyService>,
}

impl AppState {
    /// Assemble the full service graph over a set of repositories.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        project_repo: Arc<dyn ProjectRepository>,
        branch_repo: Arc<dyn BranchRepository>,
        task_repo: Arc<dyn TaskRepository>,
        subtask_repo: Arc<dyn SubtaskRepository>,
        context_repo: Arc<dyn ContextRepository>,
        delegation_repo: Arc<dyn DelegationRepository>,
        agent_repo: Arc<dyn AgentRepository>,
        config: StateConfig,
    ) -> Self {
        let cache = Arc::new(ContextCache::new(config.cache_capacity, config.cache_ttl));
        let delegation = Arc::new(DelegationEngine::new(
            delegation_repo,
            context_repo.clone(),
            cache.clone(),
        ));
        let contexts = Arc::new(ContextService::new(
            context_repo,
            project_repo.clone(),
            branch_repo.clone(),
            task_repo.clone(),
            cache,
            delegation,
        ));
        let sync = Arc::new(ContextSyncService::new(
            contexts.clone(),
            subtask_repo.clone(),
        ));
        let dependencies = Arc::new(DependencyService::new(
            task_repo.clone(),
            branch_repo.clone(),
        ));
        let tasks = Arc::new(TaskService::new(
            task_repo.clone(),
            subtask_repo.clone(),
            branch_repo.clone(),
            contexts.clone(),
            sync.clone(),
            dependencies.clone(),
        ));
        let subtasks = Arc::new(SubtaskService::new(subtask_repo, task_repo, sync));
        let projects = Arc::new(ProjectService::new(
            project_repo.clone(),
            contexts.clone(),
            config.default_user_id,
        ));
        let branches = Arc::new(BranchService::new(
            branch_repo,
            project_repo,
            agent_repo.clone(),
            contexts.clone(),
        ));
        let agents = Arc::new(AgentService::new(agent_repo));

        Self {
            projects,
            branches,
            tasks,
            subtasks,
            contexts,
            agents,
            dependencies,
        }
    }

    /// One-time startup work: make sure the global context exists.
    pub async fn initialize(&self) -> Result<()> {
        self.contexts.bootstrap_global().await?;
        Ok(())
    }
}
