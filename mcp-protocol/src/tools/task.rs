use lattice_core::{
    guidance,
    models::{CompleteTask, NewTask, TaskFilter, UpdateTask},
    InvariantKind, LatticeError, Result,
};
use serde_json::{json, Value};

use crate::coerce::{self, Args};
use crate::envelope::Envelope;
use crate::state::AppState;
use crate::tools::{opt_datetime, opt_effort, opt_priority, opt_status, require_branch_id};

pub const TOOL: &str = "manage_task";

pub async fn handle(state: &AppState, action: &str, args: &Args) -> Value {
    let result = match action {
        "create" => create(state, args).await,
        "get" => get(state, args).await,
        "list" => list(state, args).await,
        "update" => update(state, args).await,
        "delete" => delete(state, args).await,
        "complete" => return complete(state, args).await,
        "next" => next(state, args).await,
        "search" => search(state, args).await,
        "add_dependency" => add_dependency(state, args).await,
        "remove_dependency" => remove_dependency(state, args).await,
        _ => Err(LatticeError::InvalidAction {
            tool: TOOL.to_string(),
            action: action.to_string(),
        }),
    };
    result.unwrap_or_else(|err| Envelope::new(TOOL, action).failure(&err))
}

async fn create(state: &AppState, args: &Args) -> Result<Value> {
    let new_task = NewTask {
        branch_id: require_branch_id(args)?,
        title: coerce::require_string(args, "title")?,
        description: coerce::opt_string(args, "description")?.unwrap_or_default(),
        details: coerce::opt_string(args, "details")?.unwrap_or_default(),
        priority: opt_priority(args, "priority")?,
        estimated_effort: opt_effort(args, "estimated_effort")?,
        due_date: opt_datetime(args, "due_date")?,
        assignees: coerce::opt_string_list(args, "assignees")?.unwrap_or_default(),
        labels: coerce::opt_string_list(args, "labels")?.unwrap_or_default(),
        dependencies: coerce::opt_string_list(args, "dependencies")?.unwrap_or_default(),
    };
    let task = state.tasks.create(new_task).await?;
    let progress = state.subtasks.progress(&task.id).await?;
    let hint = guidance::for_task(&task, &progress);
    Ok(Envelope::new(TOOL, "create")
        .data("task", json!(task))
        .guidance(hint)
        .success())
}

async fn get(state: &AppState, args: &Args) -> Result<Value> {
    let task_id = coerce::require_string(args, "task_id")?;
    let task = state.tasks.get(&task_id).await?;
    let progress = state.subtasks.progress(&task_id).await?;
    let hint = guidance::for_task(&task, &progress);
    Ok(Envelope::new(TOOL, "get")
        .data("task", json!(task))
        .data("subtask_progress", json!(progress))
        .guidance(hint)
        .success())
}

async fn list(state: &AppState, args: &Args) -> Result<Value> {
    let filter = TaskFilter {
        branch_id: coerce::opt_string(args, "git_branch_id")?
            .or(coerce::opt_string(args, "branch_id")?),
        status: opt_status(args, "status")?,
        priority: opt_priority(args, "priority")?,
        assignee: coerce::opt_string(args, "assignee")?,
        label: coerce::opt_string(args, "label")?,
        limit: coerce::opt_i64(args, "limit")?.map(|v| v as u32),
        offset: coerce::opt_i64(args, "offset")?.map(|v| v as u32),
    };
    let tasks = state.tasks.list(filter).await?;
    let count = tasks.len();
    Ok(Envelope::new(TOOL, "list")
        .data("tasks", json!(tasks))
        .detail("count", json!(count))
        .success())
}

async fn update(state: &AppState, args: &Args) -> Result<Value> {
    let task_id = coerce::require_string(args, "task_id")?;
    let updates = UpdateTask {
        title: coerce::opt_string(args, "title")?,
        description: coerce::opt_string(args, "description")?,
        details: coerce::opt_string(args, "details")?,
        status: opt_status(args, "status")?,
        priority: opt_priority(args, "priority")?,
        estimated_effort: opt_effort(args, "estimated_effort")?,
        due_date: opt_datetime(args, "due_date")?.map(Some),
        assignees: coerce::opt_string_list(args, "assignees")?,
        labels: coerce::opt_string_list(args, "labels")?,
    };
    let task = state.tasks.update(&task_id, updates).await?;
    Ok(Envelope::new(TOOL, "update")
        .data("task", json!(task))
        .success())
}

async fn delete(state: &AppState, args: &Args) -> Result<Value> {
    let task_id = coerce::require_string(args, "task_id")?;
    state.tasks.delete(&task_id).await?;
    Ok(Envelope::new(TOOL, "delete")
        .data("task_id", json!(task_id))
        .success())
}

/// Completion shapes its own failure envelope so gate failures can name
/// the blocking ids under the right key.
async fn complete(state: &AppState, args: &Args) -> Value {
    let parsed = (|| -> Result<(String, CompleteTask)> {
        let task_id = coerce::require_string(args, "task_id")?;
        let request = CompleteTask {
            completion_summary: coerce::opt_string(args, "completion_summary")?
                .unwrap_or_default(),
            testing_notes: coerce::opt_string(args, "testing_notes")?,
            enforce_dependencies: coerce::bool_or(args, "enforce_dependencies", true)?,
        };
        Ok((task_id, request))
    })();
    let (task_id, request) = match parsed {
        Ok(parsed) => parsed,
        Err(err) => return Envelope::new(TOOL, "complete").failure(&err),
    };

    match state.tasks.complete(&task_id, request).await {
        Ok(outcome) => {
            let progress = state
                .subtasks
                .progress(&task_id)
                .await
                .unwrap_or(lattice_core::SubtaskProgress {
                    total: 0,
                    completed: 0,
                    percentage: 0,
                    ready_to_complete: false,
                });
            let hint = guidance::for_task(&outcome.task, &progress);
            let mut envelope = Envelope::new(TOOL, "complete")
                .data("task", json!(outcome.task))
                .data("context_auto_created", json!(outcome.context_auto_created))
                .guidance(hint);
            if outcome.context_auto_created {
                envelope = envelope.context_operation(json!({
                    "action": "auto_create",
                    "level": "task",
                    "context_id": task_id,
                }));
            }
            if outcome.already_done {
                envelope = envelope.detail("already_done", json!(true));
            }
            envelope.success()
        }
        Err(err) => {
            let mut envelope = Envelope::new(TOOL, "complete");
            if let LatticeError::InvariantViolation {
                kind,
                blocking_ids,
                ..
            } = &err
            {
                if !blocking_ids.is_empty() {
                    let key = match kind {
                        InvariantKind::UnfinishedSubtasks => "blocking_subtasks",
                        InvariantKind::UnsatisfiedDependencies => "blocking_tasks",
                        _ => "blocking_ids",
                    };
                    envelope = envelope.data(key, json!(blocking_ids));
                }
            }
            envelope.failure(&err)
        }
    }
}

async fn next(state: &AppState, args: &Args) -> Result<Value> {
    let branch_id = require_branch_id(args)?;
    let envelope = Envelope::new(TOOL, "next");
    match state.tasks.next(&branch_id).await? {
        Some(task) => {
            let progress = state.subtasks.progress(&task.id).await?;
            let hint = guidance::for_task(&task, &progress);
            Ok(envelope.data("task", json!(task)).guidance(hint).success())
        }
        None => Ok(envelope
            .data("task", Value::Null)
            .detail("message", json!("no actionable task in this branch"))
            .success()),
    }
}

async fn search(state: &AppState, args: &Args) -> Result<Value> {
    let query = coerce::opt_string(args, "query")?.unwrap_or_default();
    let branch_id = coerce::opt_string(args, "git_branch_id")?
        .or(coerce::opt_string(args, "branch_id")?);
    let tasks = state.tasks.search(&query, branch_id.as_deref()).await?;
    let count = tasks.len();
    Ok(Envelope::new(TOOL, "search")
        .data("tasks", json!(tasks))
        .detail("count", json!(count))
        .detail("query", json!(query))
        .success())
}

async fn add_dependency(state: &AppState, args: &Args) -> Result<Value> {
    let task_id = coerce::require_string(args, "task_id")?;
    let depends_on = dependency_id(args)?;
    let added = state.dependencies.add(&task_id, &depends_on).await?;
    Ok(Envelope::new(TOOL, "add_dependency")
        .data("task_id", json!(task_id))
        .data("depends_on", json!(depends_on))
        .data("added", json!(added))
        .success())
}

async fn remove_dependency(state: &AppState, args: &Args) -> Result<Value> {
    let task_id = coerce::require_string(args, "task_id")?;
    let depends_on = dependency_id(args)?;
    let removed = state.dependencies.remove(&task_id, &depends_on).await?;
    Ok(Envelope::new(TOOL, "remove_dependency")
        .data("task_id", json!(task_id))
        .data("depends_on", json!(depends_on))
        .data("removed", json!(removed))
        .success())
}

fn dependency_id(args: &Args) -> Result<String> {
    if let Some(id) = coerce::opt_string(args, "dependency_id")? {
        return Ok(id);
    }
    coerce::require_string(args, "depends_on")
}
