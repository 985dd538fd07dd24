//! Project lifecycle and the health surface.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::context::{CacheMetrics, ContextService};
use crate::error::{LatticeError, Result};
use crate::models::{NewProject, Project, UpdateProject};
use crate::repository::{CascadeDelete, ProjectRepository};
use crate::validation::Validator;

/// Health report returned by `manage_project.health_check`
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub database: bool,
    pub cache: CacheMetrics,
    pub project_count: usize,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

pub struct ProjectService {
    projects: Arc<dyn ProjectRepository>,
    contexts: Arc<ContextService>,
    default_user_id: String,
}

impl ProjectService {
    pub fn new(
        projects: Arc<dyn ProjectRepository>,
        contexts: Arc<ContextService>,
        default_user_id: String,
    ) -> Self {
        Self {
            projects,
            contexts,
            default_user_id,
        }
    }

    /// Create a project for the caller (or the configured development
    /// fallback identity).
    pub async fn create(&self, new_project: NewProject) -> Result<Project> {
        Validator::validate_name("name", &new_project.name)?;
        let user_id = new_project
            .user_id
            .clone()
            .unwrap_or_else(|| self.default_user_id.clone());

        if self
            .projects
            .get_by_name(&user_id, &new_project.name)
            .await?
            .is_some()
        {
            return Err(LatticeError::already_exists("Project", &new_project.name));
        }

        let project = self.projects.create(new_project, &user_id).await?;
        info!(project_id = %project.id, "project created");
        Ok(project)
    }

    pub async fn get(&self, id: &str) -> Result<Project> {
        self.projects
            .get(id)
            .await?
            .ok_or_else(|| LatticeError::not_found("Project", id))
    }

    pub async fn list(&self, user_id: Option<&str>) -> Result<Vec<Project>> {
        self.projects.list(user_id).await
    }

    pub async fn update(&self, id: &str, updates: UpdateProject) -> Result<Project> {
        if let Some(name) = &updates.name {
            Validator::validate_name("name", name)?;
        }
        self.get(id).await?;
        self.projects.update(id, updates).await
    }

    /// Delete a project; branches, tasks and contexts go with it, and the
    /// cache entries behind those contexts are invalidated.
    pub async fn delete(&self, id: &str) -> Result<CascadeDelete> {
        self.get(id).await?;
        let cascade = self.projects.delete(id).await?;
        self.contexts
            .cache()
            .invalidate_many(&cascade.removed_context_ids);
        info!(project_id = %id, "project deleted");
        Ok(cascade)
    }

    pub async fn health_check(&self) -> Result<HealthStatus> {
        let database = self.projects.health_check().await.is_ok();
        let project_count = self.projects.list(None).await.map(|p| p.len()).unwrap_or(0);
        Ok(HealthStatus {
            status: if database { "healthy" } else { "degraded" }.to_string(),
            database,
            cache: self.contexts.cache().metrics(),
            project_count,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}
