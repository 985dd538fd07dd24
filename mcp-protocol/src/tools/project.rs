use lattice_core::{
    guidance,
    models::{NewProject, UpdateProject},
    LatticeError, Result,
};
use serde_json::{json, Value};

use crate::coerce::{self, Args};
use crate::envelope::Envelope;
use crate::state::AppState;
use crate::tools::opt_project_status;

pub const TOOL: &str = "manage_project";

pub async fn handle(state: &AppState, action: &str, args: &Args) -> Value {
    let result = match action {
        "create" => create(state, args).await,
        "get" => get(state, args).await,
        "list" => list(state, args).await,
        "update" => update(state, args).await,
        "delete" => delete(state, args).await,
        "health_check" => health_check(state).await,
        _ => Err(LatticeError::InvalidAction {
            tool: TOOL.to_string(),
            action: action.to_string(),
        }),
    };
    result.unwrap_or_else(|err| Envelope::new(TOOL, action).failure(&err))
}

async fn create(state: &AppState, args: &Args) -> Result<Value> {
    let new_project = NewProject {
        name: coerce::require_string(args, "name")?,
        description: coerce::opt_string(args, "description")?.unwrap_or_default(),
        user_id: coerce::opt_string(args, "user_id")?,
    };
    let project = state.projects.create(new_project).await?;
    let hint = guidance::for_project(&project, 0);
    Ok(Envelope::new(TOOL, "create")
        .data("project", json!(project))
        .guidance(hint)
        .success())
}

async fn get(state: &AppState, args: &Args) -> Result<Value> {
    let project_id = coerce::require_string(args, "project_id")?;
    let project = state.projects.get(&project_id).await?;
    let branches = state.branches.list(&project_id).await?;
    let hint = guidance::for_project(&project, branches.len());
    Ok(Envelope::new(TOOL, "get")
        .data("project", json!(project))
        .detail("branch_count", json!(branches.len()))
        .guidance(hint)
        .success())
}

async fn list(state: &AppState, args: &Args) -> Result<Value> {
    let user_id = coerce::opt_string(args, "user_id")?;
    let projects = state.projects.list(user_id.as_deref()).await?;
    let count = projects.len();
    Ok(Envelope::new(TOOL, "list")
        .data("projects", json!(projects))
        .detail("count", json!(count))
        .success())
}

async fn update(state: &AppState, args: &Args) -> Result<Value> {
    let project_id = coerce::require_string(args, "project_id")?;
    let updates = UpdateProject {
        name: coerce::opt_string(args, "name")?,
        description: coerce::opt_string(args, "description")?,
        status: opt_project_status(args, "status")?,
    };
    let project = state.projects.update(&project_id, updates).await?;
    Ok(Envelope::new(TOOL, "update")
        .data("project", json!(project))
        .success())
}

async fn delete(state: &AppState, args: &Args) -> Result<Value> {
    let project_id = coerce::require_string(args, "project_id")?;
    let cascade = state.projects.delete(&project_id).await?;
    Ok(Envelope::new(TOOL, "delete")
        .data("project_id", json!(project_id))
        .detail(
            "invalidated_contexts",
            json!(cascade.removed_context_ids.len()),
        )
        .success())
}

async fn health_check(state: &AppState) -> Result<Value> {
    let health = state.projects.health_check().await?;
    Ok(Envelope::new(TOOL, "health_check")
        .data("health", json!(health))
        .success())
}
