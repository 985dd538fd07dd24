//! Row mapping and error conversion shared by the SQLite repositories.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use lattice_core::{
    error::{LatticeError, Result},
    models::{
        Agent, AgentStatus, Branch, ContextDelegation, ContextLevel, ContextRecord,
        EstimatedEffort, Priority, Project, ProjectStatus, Subtask, Task, TaskStatus,
    },
};

/// Convert a sqlx error into a domain error.
///
/// Unique violations become `AlreadyExists` with the caller's message;
/// everything else folds into `Database` and stays out of client view.
pub(crate) fn map_sqlx_err(err: sqlx::Error, unique_message: &str) -> LatticeError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            LatticeError::AlreadyExists(unique_message.to_string())
        }
        _ => LatticeError::Database(err.to_string()),
    }
}

pub(crate) fn db_err(err: sqlx::Error) -> LatticeError {
    LatticeError::Database(err.to_string())
}

/// Decode a TEXT column holding JSON.
pub(crate) fn json_column(row: &SqliteRow, column: &str) -> Result<serde_json::Value> {
    let raw: String = row
        .try_get(column)
        .map_err(|e| LatticeError::Database(e.to_string()))?;
    serde_json::from_str(&raw)
        .map_err(|e| LatticeError::Internal(format!("corrupt JSON in column '{column}': {e}")))
}

/// Decode a TEXT column holding a JSON string array.
pub(crate) fn string_list_column(row: &SqliteRow, column: &str) -> Result<Vec<String>> {
    let raw: String = row
        .try_get(column)
        .map_err(|e| LatticeError::Database(e.to_string()))?;
    serde_json::from_str(&raw)
        .map_err(|e| LatticeError::Internal(format!("corrupt JSON in column '{column}': {e}")))
}

pub(crate) fn get_text(row: &SqliteRow, column: &str) -> Result<String> {
    row.try_get(column)
        .map_err(|e| LatticeError::Database(e.to_string()))
}

pub(crate) fn get_opt_text(row: &SqliteRow, column: &str) -> Result<Option<String>> {
    row.try_get(column)
        .map_err(|e| LatticeError::Database(e.to_string()))
}

pub(crate) fn get_i64(row: &SqliteRow, column: &str) -> Result<i64> {
    row.try_get(column)
        .map_err(|e| LatticeError::Database(e.to_string()))
}

pub(crate) fn get_bool(row: &SqliteRow, column: &str) -> Result<bool> {
    row.try_get(column)
        .map_err(|e| LatticeError::Database(e.to_string()))
}

pub(crate) fn get_f64(row: &SqliteRow, column: &str) -> Result<f64> {
    row.try_get(column)
        .map_err(|e| LatticeError::Database(e.to_string()))
}

/// Timestamps are stored as RFC 3339 TEXT.
pub(crate) fn get_datetime(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let raw: String = row
        .try_get(column)
        .map_err(|e| LatticeError::Database(e.to_string()))?;
    parse_datetime(&raw, column)
}

pub(crate) fn get_opt_datetime(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row
        .try_get(column)
        .map_err(|e| LatticeError::Database(e.to_string()))?;
    raw.map(|value| parse_datetime(&value, column)).transpose()
}

fn parse_datetime(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LatticeError::Internal(format!("corrupt timestamp in '{column}': {e}")))
}

pub(crate) fn parse_status(raw: &str) -> Result<TaskStatus> {
    TaskStatus::parse(raw)
        .ok_or_else(|| LatticeError::Internal(format!("unknown task status '{raw}'")))
}

pub(crate) fn parse_priority(raw: &str) -> Result<Priority> {
    Priority::parse(raw)
        .ok_or_else(|| LatticeError::Internal(format!("unknown priority '{raw}'")))
}

pub(crate) fn parse_level(raw: &str) -> Result<ContextLevel> {
    ContextLevel::parse(raw)
        .ok_or_else(|| LatticeError::Internal(format!("unknown context level '{raw}'")))
}

pub(crate) fn row_to_project(row: &SqliteRow) -> Result<Project> {
    let status_raw = get_text(row, "status")?;
    Ok(Project {
        id: get_text(row, "id")?,
        name: get_text(row, "name")?,
        description: get_text(row, "description")?,
        user_id: get_text(row, "user_id")?,
        status: ProjectStatus::parse(&status_raw)
            .ok_or_else(|| LatticeError::Internal(format!("unknown project status '{status_raw}'")))?,
        created_at: get_datetime(row, "created_at")?,
        updated_at: get_datetime(row, "updated_at")?,
    })
}

pub(crate) fn row_to_branch(row: &SqliteRow) -> Result<Branch> {
    Ok(Branch {
        id: get_text(row, "id")?,
        project_id: get_text(row, "project_id")?,
        name: get_text(row, "name")?,
        description: get_text(row, "description")?,
        priority: parse_priority(&get_text(row, "priority")?)?,
        status: parse_status(&get_text(row, "status")?)?,
        assigned_agent_id: get_opt_text(row, "assigned_agent_id")?,
        task_count: get_i64(row, "task_count")?,
        completed_task_count: get_i64(row, "completed_task_count")?,
        created_at: get_datetime(row, "created_at")?,
        updated_at: get_datetime(row, "updated_at")?,
    })
}

/// Task row without its labels and dependency edges; callers hydrate those
/// from the join tables.
pub(crate) fn row_to_task(row: &SqliteRow) -> Result<Task> {
    let effort = get_opt_text(row, "estimated_effort")?
        .map(|raw| {
            EstimatedEffort::parse(&raw)
                .ok_or_else(|| LatticeError::Internal(format!("unknown effort bucket '{raw}'")))
        })
        .transpose()?;
    Ok(Task {
        id: get_text(row, "id")?,
        branch_id: get_text(row, "branch_id")?,
        title: get_text(row, "title")?,
        description: get_text(row, "description")?,
        status: parse_status(&get_text(row, "status")?)?,
        priority: parse_priority(&get_text(row, "priority")?)?,
        details: get_text(row, "details")?,
        estimated_effort: effort,
        due_date: get_opt_datetime(row, "due_date")?,
        context_id: get_opt_text(row, "context_id")?,
        created_at: get_datetime(row, "created_at")?,
        updated_at: get_datetime(row, "updated_at")?,
        completion_summary: get_text(row, "completion_summary")?,
        testing_notes: get_text(row, "testing_notes")?,
        assignees: string_list_column(row, "assignees")?,
        labels: vec![],
        dependencies: vec![],
    })
}

pub(crate) fn row_to_subtask(row: &SqliteRow) -> Result<Subtask> {
    let insights_raw: String = get_text(row, "insights_found")?;
    let insights_found = serde_json::from_str(&insights_raw)
        .map_err(|e| LatticeError::Internal(format!("corrupt insights payload: {e}")))?;
    Ok(Subtask {
        id: get_text(row, "id")?,
        task_id: get_text(row, "task_id")?,
        title: get_text(row, "title")?,
        description: get_text(row, "description")?,
        status: parse_status(&get_text(row, "status")?)?,
        priority: parse_priority(&get_text(row, "priority")?)?,
        assignees: string_list_column(row, "assignees")?,
        progress_percentage: get_i64(row, "progress_percentage")?,
        progress_notes: get_text(row, "progress_notes")?,
        blockers: get_text(row, "blockers")?,
        completion_summary: get_text(row, "completion_summary")?,
        impact_on_parent: get_text(row, "impact_on_parent")?,
        insights_found,
        created_at: get_datetime(row, "created_at")?,
        updated_at: get_datetime(row, "updated_at")?,
        completed_at: get_opt_datetime(row, "completed_at")?,
    })
}

pub(crate) fn row_to_context(row: &SqliteRow) -> Result<ContextRecord> {
    Ok(ContextRecord {
        level: parse_level(&get_text(row, "level")?)?,
        id: get_text(row, "id")?,
        parent_id: get_opt_text(row, "parent_id")?,
        data: json_column(row, "data")?,
        local_overrides: json_column(row, "local_overrides")?,
        delegation_triggers: json_column(row, "delegation_triggers")?,
        inheritance_disabled: get_bool(row, "inheritance_disabled")?,
        version: get_i64(row, "version")?,
        created_at: get_datetime(row, "created_at")?,
        updated_at: get_datetime(row, "updated_at")?,
    })
}

pub(crate) fn row_to_delegation(row: &SqliteRow) -> Result<ContextDelegation> {
    let approved: Option<i64> = row
        .try_get("approved")
        .map_err(|e| LatticeError::Database(e.to_string()))?;
    Ok(ContextDelegation {
        id: get_text(row, "id")?,
        source_level: parse_level(&get_text(row, "source_level")?)?,
        source_id: get_text(row, "source_id")?,
        target_level: parse_level(&get_text(row, "target_level")?)?,
        target_id: get_text(row, "target_id")?,
        delegated_data: json_column(row, "delegated_data")?,
        reason: get_text(row, "reason")?,
        auto_delegated: get_bool(row, "auto_delegated")?,
        processed: get_bool(row, "processed")?,
        approved: approved.map(|value| value != 0),
        rejected_reason: get_opt_text(row, "rejected_reason")?,
        created_at: get_datetime(row, "created_at")?,
        processed_at: get_opt_datetime(row, "processed_at")?,
    })
}

pub(crate) fn row_to_agent(row: &SqliteRow) -> Result<Agent> {
    let status_raw = get_text(row, "status")?;
    Ok(Agent {
        id: get_text(row, "id")?,
        name: get_text(row, "name")?,
        capabilities: json_column(row, "capabilities")?,
        status: AgentStatus::parse(&status_raw)
            .ok_or_else(|| LatticeError::Internal(format!("unknown agent status '{status_raw}'")))?,
        availability_score: get_f64(row, "availability_score")?,
        registered_at: get_datetime(row, "registered_at")?,
    })
}

/// JSON-encode a string list for storage.
pub(crate) fn encode_string_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

/// JSON-encode an arbitrary serializable payload for storage.
pub(crate) fn encode_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| LatticeError::Internal(format!("failed to encode JSON payload: {e}")))
}
