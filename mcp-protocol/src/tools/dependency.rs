use lattice_core::{LatticeError, Result};
use serde_json::{json, Value};

use crate::coerce::{self, Args};
use crate::envelope::Envelope;
use crate::state::AppState;

pub const TOOL: &str = "manage_dependency";

pub async fn handle(state: &AppState, action: &str, args: &Args) -> Value {
    let result = match action {
        "add" => add(state, args).await,
        "remove" => remove(state, args).await,
        "list" => list(state, args).await,
        "blockers" => blockers(state, args).await,
        _ => Err(LatticeError::InvalidAction {
            tool: TOOL.to_string(),
            action: action.to_string(),
        }),
    };
    result.unwrap_or_else(|err| Envelope::new(TOOL, action).failure(&err))
}

fn dependency_id(args: &Args) -> Result<String> {
    if let Some(id) = coerce::opt_string(args, "dependency_id")? {
        return Ok(id);
    }
    coerce::require_string(args, "depends_on")
}

async fn add(state: &AppState, args: &Args) -> Result<Value> {
    let task_id = coerce::require_string(args, "task_id")?;
    let depends_on = dependency_id(args)?;
    let added = state.dependencies.add(&task_id, &depends_on).await?;
    Ok(Envelope::new(TOOL, "add")
        .data("task_id", json!(task_id))
        .data("depends_on", json!(depends_on))
        .data("added", json!(added))
        .success())
}

async fn remove(state: &AppState, args: &Args) -> Result<Value> {
    let task_id = coerce::require_string(args, "task_id")?;
    let depends_on = dependency_id(args)?;
    let removed = state.dependencies.remove(&task_id, &depends_on).await?;
    Ok(Envelope::new(TOOL, "remove")
        .data("task_id", json!(task_id))
        .data("depends_on", json!(depends_on))
        .data("removed", json!(removed))
        .success())
}

async fn list(state: &AppState, args: &Args) -> Result<Value> {
    let task_id = coerce::require_string(args, "task_id")?;
    let analysis = state.dependencies.blockers(&task_id).await?;
    Ok(Envelope::new(TOOL, "list")
        .data("dependencies", json!(analysis.depends_on))
        .data("blocks", json!(analysis.blocks))
        .success())
}

async fn blockers(state: &AppState, args: &Args) -> Result<Value> {
    let task_id = coerce::require_string(args, "task_id")?;
    let analysis = state.dependencies.blockers(&task_id).await?;
    Ok(Envelope::new(TOOL, "blockers")
        .data("blockers", json!(analysis))
        .success())
}
