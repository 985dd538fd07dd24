use lattice_core::{models::NewAgent, LatticeError, Result};
use serde_json::{json, Value};

use crate::coerce::{self, Args};
use crate::envelope::Envelope;
use crate::state::AppState;
use crate::tools::require_branch_id;

pub const TOOL: &str = "manage_agent";

pub async fn handle(state: &AppState, action: &str, args: &Args) -> Value {
    let result = match action {
        "register" => register(state, args).await,
        "assign" => assign(state, args).await,
        "list" => list(state).await,
        "get" => get(state, args).await,
        "unassign" => unassign(state, args).await,
        _ => Err(LatticeError::InvalidAction {
            tool: TOOL.to_string(),
            action: action.to_string(),
        }),
    };
    result.unwrap_or_else(|err| Envelope::new(TOOL, action).failure(&err))
}

fn agent_name(args: &Args) -> Result<String> {
    if let Some(name) = coerce::opt_string(args, "agent_id")? {
        return Ok(name);
    }
    coerce::require_string(args, "name")
}

async fn register(state: &AppState, args: &Args) -> Result<Value> {
    let new_agent = NewAgent {
        name: agent_name(args)?,
        capabilities: coerce::opt_object(args, "capabilities")?,
    };
    let agent = state.agents.register(new_agent).await?;
    Ok(Envelope::new(TOOL, "register")
        .data("agent", json!(agent))
        .success())
}

async fn assign(state: &AppState, args: &Args) -> Result<Value> {
    let agent_id = agent_name(args)?;
    let branch_id = require_branch_id(args)?;
    let branch = state.branches.assign_agent(&branch_id, &agent_id).await?;
    Ok(Envelope::new(TOOL, "assign")
        .data("branch", json!(branch))
        .detail("agent_id", json!(agent_id))
        .success())
}

async fn list(state: &AppState) -> Result<Value> {
    let agents = state.agents.list().await?;
    let count = agents.len();
    Ok(Envelope::new(TOOL, "list")
        .data("agents", json!(agents))
        .detail("count", json!(count))
        .success())
}

async fn get(state: &AppState, args: &Args) -> Result<Value> {
    let agent_id = agent_name(args)?;
    let agent = state.agents.get(&agent_id).await?;
    Ok(Envelope::new(TOOL, "get")
        .data("agent", json!(agent))
        .success())
}

async fn unassign(state: &AppState, args: &Args) -> Result<Value> {
    let agent_id = agent_name(args)?;
    let branch_id = require_branch_id(args)?;
    let branch = state.branches.unassign_agent(&branch_id, &agent_id).await?;
    Ok(Envelope::new(TOOL, "unassign")
        .data("branch", json!(branch))
        .detail("agent_id", json!(agent_id))
        .success())
}
