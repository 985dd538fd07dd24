use lattice_core::{
    guidance,
    models::{NewBranch, UpdateBranch},
    LatticeError, Result,
};
use serde_json::{json, Value};

use crate::coerce::{self, Args};
use crate::envelope::Envelope;
use crate::state::AppState;
use crate::tools::{opt_priority, opt_status, require_branch_id};

pub const TOOL: &str = "manage_git_branch";

pub async fn handle(state: &AppState, action: &str, args: &Args) -> Value {
    let result = match action {
        "create" => create(state, args).await,
        "get" => get(state, args).await,
        "list" => list(state, args).await,
        "update" => update(state, args).await,
        "delete" => delete(state, args).await,
        "assign_agent" => assign_agent(state, args).await,
        "unassign_agent" => unassign_agent(state, args).await,
        "get_statistics" => get_statistics(state, args).await,
        _ => Err(LatticeError::InvalidAction {
            tool: TOOL.to_string(),
            action: action.to_string(),
        }),
    };
    result.unwrap_or_else(|err| Envelope::new(TOOL, action).failure(&err))
}

async fn create(state: &AppState, args: &Args) -> Result<Value> {
    let new_branch = NewBranch {
        project_id: coerce::require_string(args, "project_id")?,
        name: coerce::require_string(args, "name")?,
        description: coerce::opt_string(args, "description")?.unwrap_or_default(),
        priority: opt_priority(args, "priority")?,
    };
    let branch = state.branches.create(new_branch).await?;
    let hint = guidance::for_branch(&branch);
    Ok(Envelope::new(TOOL, "create")
        .data("branch", json!(branch))
        .guidance(hint)
        .success())
}

async fn get(state: &AppState, args: &Args) -> Result<Value> {
    let branch_id = require_branch_id(args)?;
    let branch = state.branches.get(&branch_id).await?;
    let hint = guidance::for_branch(&branch);
    Ok(Envelope::new(TOOL, "get")
        .data("branch", json!(branch))
        .guidance(hint)
        .success())
}

async fn list(state: &AppState, args: &Args) -> Result<Value> {
    let project_id = coerce::require_string(args, "project_id")?;
    let branches = state.branches.list(&project_id).await?;
    let count = branches.len();
    Ok(Envelope::new(TOOL, "list")
        .data("branches", json!(branches))
        .detail("count", json!(count))
        .success())
}

async fn update(state: &AppState, args: &Args) -> Result<Value> {
    let branch_id = require_branch_id(args)?;
    let updates = UpdateBranch {
        name: coerce::opt_string(args, "name")?,
        description: coerce::opt_string(args, "description")?,
        priority: opt_priority(args, "priority")?,
        status: opt_status(args, "status")?,
    };
    let branch = state.branches.update(&branch_id, updates).await?;
    Ok(Envelope::new(TOOL, "update")
        .data("branch", json!(branch))
        .success())
}

async fn delete(state: &AppState, args: &Args) -> Result<Value> {
    let branch_id = require_branch_id(args)?;
    let cascade = state.branches.delete(&branch_id).await?;
    Ok(Envelope::new(TOOL, "delete")
        .data("branch_id", json!(branch_id))
        .detail(
            "invalidated_contexts",
            json!(cascade.removed_context_ids.len()),
        )
        .success())
}

async fn assign_agent(state: &AppState, args: &Args) -> Result<Value> {
    let branch_id = require_branch_id(args)?;
    let agent_id = coerce::require_string(args, "agent_id")?;
    let branch = state.branches.assign_agent(&branch_id, &agent_id).await?;
    Ok(Envelope::new(TOOL, "assign_agent")
        .data("branch", json!(branch))
        .detail("agent_id", json!(agent_id))
        .success())
}

async fn unassign_agent(state: &AppState, args: &Args) -> Result<Value> {
    let branch_id = require_branch_id(args)?;
    let agent_id = coerce::require_string(args, "agent_id")?;
    let branch = state.branches.unassign_agent(&branch_id, &agent_id).await?;
    Ok(Envelope::new(TOOL, "unassign_agent")
        .data("branch", json!(branch))
        .detail("agent_id", json!(agent_id))
        .success())
}

async fn get_statistics(state: &AppState, args: &Args) -> Result<Value> {
    let branch_id = require_branch_id(args)?;
    let statistics = state.branches.statistics(&branch_id).await?;
    Ok(Envelope::new(TOOL, "get_statistics")
        .data("statistics", json!(statistics))
        .success())
}
