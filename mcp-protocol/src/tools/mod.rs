//! Per-tool controllers: parse and coerce arguments, call the facade,
//! shape the envelope.

pub mod agent;
pub mod branch;
pub mod call_agent;
pub mod context;
pub mod dependency;
pub mod project;
pub mod subtask;
pub mod task;

use chrono::{DateTime, NaiveDate, Utc};
use lattice_core::{
    models::{ContextLevel, EstimatedEffort, Priority, ProjectStatus, TaskStatus},
    LatticeError, Result,
};

use crate::coerce::{self, Args};

/// Parse an optional priority parameter.
pub(crate) fn opt_priority(args: &Args, key: &str) -> Result<Option<Priority>> {
    match coerce::opt_string(args, key)? {
        Some(raw) => Priority::parse(&raw).map(Some).ok_or_else(|| {
            LatticeError::Validation(format!(
                "Parameter '{key}' must be one of low|medium|high|urgent|critical, got '{raw}'"
            ))
        }),
        None => Ok(None),
    }
}

/// Parse an optional task status parameter.
pub(crate) fn opt_status(args: &Args, key: &str) -> Result<Option<TaskStatus>> {
    match coerce::opt_string(args, key)? {
        Some(raw) => TaskStatus::parse(&raw).map(Some).ok_or_else(|| {
            LatticeError::Validation(format!("Unknown status '{raw}' for parameter '{key}'"))
        }),
        None => Ok(None),
    }
}

/// Parse an optional project status parameter.
pub(crate) fn opt_project_status(args: &Args, key: &str) -> Result<Option<ProjectStatus>> {
    match coerce::opt_string(args, key)? {
        Some(raw) => ProjectStatus::parse(&raw).map(Some).ok_or_else(|| {
            LatticeError::Validation(format!(
                "Parameter '{key}' must be active or archived, got '{raw}'"
            ))
        }),
        None => Ok(None),
    }
}

/// Parse an optional effort bucket.
pub(crate) fn opt_effort(args: &Args, key: &str) -> Result<Option<EstimatedEffort>> {
    match coerce::opt_string(args, key)? {
        Some(raw) => EstimatedEffort::parse(&raw).map(Some).ok_or_else(|| {
            LatticeError::Validation(format!(
                "Parameter '{key}' must be one of quick|small|medium|large|epic, got '{raw}'"
            ))
        }),
        None => Ok(None),
    }
}

/// Parse a required context level.
pub(crate) fn require_level(args: &Args, key: &str) -> Result<ContextLevel> {
    let raw = coerce::require_string(args, key)?;
    ContextLevel::parse(&raw).ok_or_else(|| {
        LatticeError::Validation(format!(
            "Parameter '{key}' must be one of global|project|branch|task, got '{raw}'"
        ))
    })
}

/// Parse an optional timestamp: RFC 3339, or a bare date taken as UTC
/// midnight.
pub(crate) fn opt_datetime(args: &Args, key: &str) -> Result<Option<DateTime<Utc>>> {
    match coerce::opt_string(args, key)? {
        Some(raw) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
                return Ok(Some(parsed.with_timezone(&Utc)));
            }
            if let Ok(date) = NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
                let midnight = date.and_hms_opt(0, 0, 0).expect("valid midnight");
                return Ok(Some(DateTime::from_naive_utc_and_offset(midnight, Utc)));
            }
            Err(LatticeError::Validation(format!(
                "Parameter '{key}' is not a recognizable datetime: '{raw}'"
            )))
        }
        None => Ok(None),
    }
}

/// Branch id under either accepted parameter name.
pub(crate) fn require_branch_id(args: &Args) -> Result<String> {
    if let Some(id) = coerce::opt_string(args, "git_branch_id")? {
        return Ok(id);
    }
    coerce::require_string(args, "branch_id")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: serde_json::Value) -> Args {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_enum_parsers() {
        let table = args(json!({"p": "critical", "s": "in_progress", "e": "epic"}));
        assert_eq!(opt_priority(&table, "p").unwrap(), Some(Priority::Critical));
        assert_eq!(opt_status(&table, "s").unwrap(), Some(TaskStatus::InProgress));
        assert_eq!(opt_effort(&table, "e").unwrap(), Some(EstimatedEffort::Epic));
        assert!(opt_priority(&args(json!({"p": "asap"})), "p").is_err());
    }

    #[test]
    fn test_datetime_accepts_bare_dates() {
        let table = args(json!({"due": "2026-03-01"}));
        let parsed = opt_datetime(&table, "due").unwrap().unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-03-01T00:00:00+00:00");
    }

    #[test]
    fn test_branch_id_aliases() {
        assert_eq!(
            require_branch_id(&args(json!({"git_branch_id": "b1"}))).unwrap(),
            "b1"
        );
        assert_eq!(
            require_branch_id(&args(json!({"branch_id": "b2"}))).unwrap(),
            "b2"
        );
        assert!(require_branch_id(&args(json!({}))).is_err());
    }
}
