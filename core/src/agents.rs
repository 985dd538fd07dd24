//! Agent registration and lookup.

use std::sync::Arc;

use chrono::Utc;

use crate::catalog;
use crate::error::{LatticeError, Result};
use crate::models::{Agent, AgentStatus, NewAgent};
use crate::repository::AgentRepository;
use crate::validation::Validator;

pub struct AgentService {
    agents: Arc<dyn AgentRepository>,
}

impl AgentService {
    pub fn new(agents: Arc<dyn AgentRepository>) -> Self {
        Self { agents }
    }

    /// Register an agent reference.
    ///
    /// Capabilities default from the catalog when the name is a known
    /// role; custom agents must bring their own.
    pub async fn register(&self, new_agent: NewAgent) -> Result<Agent> {
        Validator::validate_agent_name(&new_agent.name)?;

        let capabilities = match new_agent.capabilities {
            Some(capabilities) => capabilities,
            None => catalog::lookup(&new_agent.name)
                .map(|definition| definition.capabilities_json())
                .ok_or_else(|| {
                    LatticeError::Validation(format!(
                        "agent '{}' is not in the catalog; provide capabilities",
                        new_agent.name
                    ))
                })?,
        };

        self.agents
            .register(Agent {
                id: new_agent.name.clone(),
                name: new_agent.name,
                capabilities,
                status: AgentStatus::Available,
                availability_score: 1.0,
                registered_at: Utc::now(),
            })
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Agent> {
        self.agents
            .get(id)
            .await?
            .ok_or_else(|| LatticeError::not_found("Agent", id))
    }

    pub async fn list(&self) -> Result<Vec<Agent>> {
        self.agents.list().await
    }

    pub async fn unregister(&self, id: &str) -> Result<()> {
        if !self.agents.unregister(id).await? {
            return Err(LatticeError::not_found("Agent", id));
        }
        Ok(())
    }

    /// Descriptor for `call_agent`: catalog entry enriched with live
    /// registration state when present.
    pub async fn describe(&self, name: &str) -> Result<serde_json::Value> {
        Validator::validate_agent_name(name)?;

        let registered = self.agents.get(name).await?;
        let definition = catalog::lookup(name);

        match (definition, registered) {
            (Some(definition), Some(agent)) => {
                let mut descriptor = definition.descriptor();
                descriptor["status"] = serde_json::json!(agent.status);
                descriptor["availability_score"] = serde_json::json!(agent.availability_score);
                Ok(descriptor)
            }
            (Some(definition), None) => Ok(definition.descriptor()),
            (None, Some(agent)) => Ok(serde_json::json!({
                "name": agent.name,
                "capabilities": agent.capabilities,
                "status": agent.status,
                "availability_score": agent.availability_score,
            })),
            (None, None) => Err(LatticeError::not_found("Agent", name)),
        }
    }
}
