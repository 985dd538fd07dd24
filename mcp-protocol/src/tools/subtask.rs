use lattice_core::{
    models::{CompleteSubtask, Insight, NewSubtask, UpdateSubtask},
    LatticeError, Result,
};
use serde_json::{json, Value};

use crate::coerce::{self, Args};
use crate::envelope::Envelope;
use crate::state::AppState;
use crate::tools::{opt_priority, opt_status};

pub const TOOL: &str = "manage_subtask";

pub async fn handle(state: &AppState, action: &str, args: &Args) -> Value {
    let result = match action {
        "create" => create(state, args).await,
        "list" => list(state, args).await,
        "get" => get(state, args).await,
        "update" => update(state, args).await,
        "complete" => complete(state, args).await,
        "delete" => delete(state, args).await,
        _ => Err(LatticeError::InvalidAction {
            tool: TOOL.to_string(),
            action: action.to_string(),
        }),
    };
    result.unwrap_or_else(|err| Envelope::new(TOOL, action).failure(&err))
}

async fn create(state: &AppState, args: &Args) -> Result<Value> {
    let new_subtask = NewSubtask {
        task_id: coerce::require_string(args, "task_id")?,
        title: coerce::require_string(args, "title")?,
        description: coerce::opt_string(args, "description")?.unwrap_or_default(),
        priority: opt_priority(args, "priority")?,
        assignees: coerce::opt_string_list(args, "assignees")?.unwrap_or_default(),
    };
    let task_id = new_subtask.task_id.clone();
    let subtask = state.subtasks.create(new_subtask).await?;
    let progress = state.subtasks.progress(&task_id).await?;
    Ok(Envelope::new(TOOL, "create")
        .data("subtask", json!(subtask))
        .data("progress", json!(progress))
        .success())
}

async fn list(state: &AppState, args: &Args) -> Result<Value> {
    let task_id = coerce::require_string(args, "task_id")?;
    let subtasks = state.subtasks.list(&task_id).await?;
    let progress = state.subtasks.progress(&task_id).await?;
    let count = subtasks.len();
    Ok(Envelope::new(TOOL, "list")
        .data("subtasks", json!(subtasks))
        .data("progress", json!(progress))
        .detail("count", json!(count))
        .success())
}

async fn get(state: &AppState, args: &Args) -> Result<Value> {
    let task_id = coerce::require_string(args, "task_id")?;
    let subtask_id = coerce::require_string(args, "subtask_id")?;
    let subtask = state.subtasks.get(&task_id, &subtask_id).await?;
    Ok(Envelope::new(TOOL, "get")
        .data("subtask", json!(subtask))
        .success())
}

async fn update(state: &AppState, args: &Args) -> Result<Value> {
    let task_id = coerce::require_string(args, "task_id")?;
    let subtask_id = coerce::require_string(args, "subtask_id")?;
    let updates = UpdateSubtask {
        title: coerce::opt_string(args, "title")?,
        description: coerce::opt_string(args, "description")?,
        status: opt_status(args, "status")?,
        priority: opt_priority(args, "priority")?,
        assignees: coerce::opt_string_list(args, "assignees")?,
        progress_percentage: coerce::opt_i64(args, "progress_percentage")?,
        progress_notes: coerce::opt_string(args, "progress_notes")?,
        blockers: coerce::opt_string(args, "blockers")?,
    };
    let subtask = state.subtasks.update(&task_id, &subtask_id, updates).await?;
    let progress = state.subtasks.progress(&task_id).await?;
    Ok(Envelope::new(TOOL, "update")
        .data("subtask", json!(subtask))
        .data("progress", json!(progress))
        .success())
}

async fn complete(state: &AppState, args: &Args) -> Result<Value> {
    let task_id = coerce::require_string(args, "task_id")?;
    let subtask_id = coerce::require_string(args, "subtask_id")?;
    let completion = CompleteSubtask {
        completion_summary: coerce::opt_string(args, "completion_summary")?.unwrap_or_default(),
        impact_on_parent: coerce::opt_string(args, "impact_on_parent")?,
        insights_found: parse_insights(args)?,
        challenges_overcome: coerce::opt_string(args, "challenges_overcome")?,
    };
    let subtask = state
        .subtasks
        .complete(&task_id, &subtask_id, completion)
        .await?;
    let progress = state.subtasks.progress(&task_id).await?;
    Ok(Envelope::new(TOOL, "complete")
        .data("subtask", json!(subtask))
        .data("progress", json!(progress))
        .success())
}

async fn delete(state: &AppState, args: &Args) -> Result<Value> {
    let task_id = coerce::require_string(args, "task_id")?;
    let subtask_id = coerce::require_string(args, "subtask_id")?;
    state.subtasks.delete(&task_id, &subtask_id).await?;
    let progress = state.subtasks.progress(&task_id).await?;
    Ok(Envelope::new(TOOL, "delete")
        .data("subtask_id", json!(subtask_id))
        .data("progress", json!(progress))
        .success())
}

/// Insights arrive as structured objects, plain strings, or a JSON-encoded
/// array of either.
fn parse_insights(args: &Args) -> Result<Vec<Insight>> {
    let raw = match args.get("insights_found") {
        None | Some(Value::Null) => return Ok(vec![]),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(vec![]),
        Some(Value::String(s)) => serde_json::from_str::<Value>(s.trim()).map_err(|_| {
            LatticeError::Validation(
                "Parameter 'insights_found' is not a JSON array".to_string(),
            )
        })?,
        Some(other) => other.clone(),
    };
    let items = match raw {
        Value::Array(items) => items,
        _ => {
            return Err(LatticeError::Validation(
                "Parameter 'insights_found' must be a list".to_string(),
            ))
        }
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(content) => Ok(Insight::new(content)),
            Value::Object(_) => serde_json::from_value(item).map_err(|e| {
                LatticeError::Validation(format!("Invalid insight entry: {e}"))
            }),
            _ => Err(LatticeError::Validation(
                "Insight entries must be strings or objects".to_string(),
            )),
        })
        .collect()
}
