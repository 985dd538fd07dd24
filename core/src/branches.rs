//! Branch lifecycle and agent assignment.

use std::sync::Arc;

use tracing::info;

use crate::catalog;
use crate::context::ContextService;
use crate::error::{LatticeError, Result};
use crate::models::{
    Agent, AgentStatus, Branch, BranchStatistics, NewBranch, UpdateBranch,
};
use crate::repository::{
    AgentRepository, BranchRepository, CascadeDelete, ProjectRepository,
};
use crate::validation::Validator;

pub struct BranchService {
    branches: Arc<dyn BranchRepository>,
    projects: Arc<dyn ProjectRepository>,
    agents: Arc<dyn AgentRepository>,
    contexts: Arc<ContextService>,
}

impl BranchService {
    pub fn new(
        branches: Arc<dyn BranchRepository>,
        projects: Arc<dyn ProjectRepository>,
        agents: Arc<dyn AgentRepository>,
        contexts: Arc<ContextService>,
    ) -> Self {
        Self {
            branches,
            projects,
            agents,
            contexts,
        }
    }

    pub async fn create(&self, new_branch: NewBranch) -> Result<Branch> {
        Validator::validate_name("name", &new_branch.name)?;
        self.projects
            .get(&new_branch.project_id)
            .await?
            .ok_or_else(|| LatticeError::not_found("Project", &new_branch.project_id))?;

        let branch = self.branches.create(new_branch).await?;
        info!(branch_id = %branch.id, project_id = %branch.project_id, "branch created");
        Ok(branch)
    }

    pub async fn get(&self, id: &str) -> Result<Branch> {
        self.branches
            .get(id)
            .await?
            .ok_or_else(|| LatticeError::not_found("Branch", id))
    }

    pub async fn list(&self, project_id: &str) -> Result<Vec<Branch>> {
        self.projects
            .get(project_id)
            .await?
            .ok_or_else(|| LatticeError::not_found("Project", project_id))?;
        self.branches.list(project_id).await
    }

    pub async fn update(&self, id: &str, updates: UpdateBranch) -> Result<Branch> {
        if let Some(name) = &updates.name {
            Validator::validate_name("name", name)?;
        }
        self.get(id).await?;
        self.branches.update(id, updates).await
    }

    pub async fn delete(&self, id: &str) -> Result<CascadeDelete> {
        self.get(id).await?;
        let cascade = self.branches.delete(id).await?;
        self.contexts
            .cache()
            .invalidate_many(&cascade.removed_context_ids);
        info!(branch_id = %id, "branch deleted");
        Ok(cascade)
    }

    /// Assign an agent to a branch.
    ///
    /// Unregistered catalog agents are registered on first assignment so
    /// the assignment table never references an unknown name.
    pub async fn assign_agent(&self, branch_id: &str, agent_id: &str) -> Result<Branch> {
        Validator::validate_agent_name(agent_id)?;
        self.get(branch_id).await?;

        if self.agents.get(agent_id).await?.is_none() {
            let definition = catalog::lookup(agent_id)
                .ok_or_else(|| LatticeError::not_found("Agent", agent_id))?;
            self.agents
                .register(Agent {
                    id: definition.name.to_string(),
                    name: definition.name.to_string(),
                    capabilities: definition.capabilities_json(),
                    status: AgentStatus::Available,
                    availability_score: 1.0,
                    registered_at: chrono::Utc::now(),
                })
                .await?;
        }

        self.branches.assign_agent(branch_id, agent_id).await
    }

    pub async fn unassign_agent(&self, branch_id: &str, agent_id: &str) -> Result<Branch> {
        self.get(branch_id).await?;
        self.branches.unassign_agent(branch_id, agent_id).await
    }

    /// Statistics derived from live task and assignment rows.
    pub async fn statistics(&self, branch_id: &str) -> Result<BranchStatistics> {
        self.get(branch_id).await?;
        self.branches.statistics(branch_id).await
    }
}
