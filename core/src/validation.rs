use crate::error::{LatticeError, Result};
use crate::models::GLOBAL_SINGLETON_ID;

/// Validation utilities shared by the domain services.
pub struct Validator;

impl Validator {
    /// Validate an entity id: canonical UUID string, or the global
    /// singleton literal where the caller permits it.
    pub fn validate_entity_id(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(LatticeError::empty_field("id"));
        }
        if id == GLOBAL_SINGLETON_ID {
            return Ok(());
        }
        uuid::Uuid::parse_str(id)
            .map(|_| ())
            .map_err(|_| LatticeError::Validation(format!("Invalid entity id: '{id}'")))
    }

    /// Validate a project or branch name.
    ///
    /// Names must be 1-200 characters and not purely whitespace.
    pub fn validate_name(field: &str, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(LatticeError::empty_field(field));
        }
        if name.len() > 200 {
            return Err(LatticeError::Validation(format!(
                "Field '{field}' must be at most 200 characters long"
            )));
        }
        Ok(())
    }

    /// Validate an agent name.
    ///
    /// Agent names follow the `@snake_case` catalog convention: an optional
    /// leading `@`, then letters, numbers and underscores.
    pub fn validate_agent_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(LatticeError::empty_field("agent name"));
        }
        let body = name.strip_prefix('@').unwrap_or(name);
        if body.is_empty() {
            return Err(LatticeError::Validation(
                "Agent name cannot be a bare '@'".to_string(),
            ));
        }
        if !body
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(LatticeError::Validation(format!(
                "Agent name '{name}' may only contain letters, numbers and underscores"
            )));
        }
        Ok(())
    }

    /// Validate a progress percentage
    pub fn validate_progress(progress: i64) -> Result<()> {
        if !(0..=100).contains(&progress) {
            return Err(LatticeError::Validation(format!(
                "progress_percentage must be between 0 and 100, got {progress}"
            )));
        }
        Ok(())
    }

    /// Validate that a context payload is a JSON object
    pub fn validate_context_data(data: &serde_json::Value) -> Result<()> {
        if !data.is_object() {
            return Err(LatticeError::Validation(
                "Context data must be a JSON object".to_string(),
            ));
        }
        Ok(())
    }
}
