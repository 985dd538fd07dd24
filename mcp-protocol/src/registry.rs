//! Fixed registry of tool families.

use serde_json::{json, Value};

use crate::coerce::{self, Args};
use crate::envelope::Envelope;
use crate::error::McpError;
use crate::state::AppState;
use crate::tools;

/// Tool names and their one-line descriptions, as listed to clients.
pub const TOOLS: &[(&str, &str)] = &[
    ("manage_project", "Create, inspect, update and delete projects"),
    ("manage_git_branch", "Manage branches, agent assignment and statistics"),
    ("manage_task", "Task lifecycle: create, update, complete, next, search, dependencies"),
    ("manage_subtask", "Nested subtasks with parent progress rollup"),
    ("manage_context", "Hierarchical context: CRUD, resolve, delegate, insights"),
    ("manage_agent", "Register agents and manage branch assignments"),
    ("manage_dependency", "Dependency graph edges and blocker analysis"),
    ("call_agent", "Return an agent descriptor by name"),
];

/// Whether a tool name is registered.
pub fn is_registered(tool: &str) -> bool {
    TOOLS.iter().any(|(name, _)| *name == tool)
}

/// Tool listing payload for `tools/list`.
pub fn listing() -> Value {
    let tools: Vec<Value> = TOOLS
        .iter()
        .map(|(name, description)| {
            json!({
                "name": name,
                "description": description,
                "inputSchema": {
                    "type": "object",
                    "properties": { "action": { "type": "string" } },
                },
            })
        })
        .collect();
    json!({ "tools": tools })
}

/// Route a `tools/call` to its controller and return the envelope.
///
/// Domain failures come back inside the envelope; only an unknown tool is
/// a protocol-level error.
pub async fn dispatch(state: &AppState, tool: &str, args: &Args) -> Result<Value, McpError> {
    if tool == tools::call_agent::TOOL {
        return Ok(tools::call_agent::handle(state, args).await);
    }
    if !is_registered(tool) {
        return Err(McpError::UnknownTool(tool.to_string()));
    }

    let action = match coerce::require_string(args, "action") {
        Ok(action) => action,
        Err(err) => return Ok(Envelope::new(tool, "unknown").failure(&err)),
    };

    let envelope = match tool {
        "manage_project" => tools::project::handle(state, &action, args).await,
        "manage_git_branch" => tools::branch::handle(state, &action, args).await,
        "manage_task" => tools::task::handle(state, &action, args).await,
        "manage_subtask" => tools::subtask::handle(state, &action, args).await,
        "manage_context" => tools::context::handle(state, &action, args).await,
        "manage_agent" => tools::agent::handle(state, &action, args).await,
        "manage_dependency" => tools::dependency::handle(state, &action, args).await,
        _ => return Err(McpError::UnknownTool(tool.to_string())),
    };
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_names() {
        assert!(is_registered("manage_task"));
        assert!(is_registered("call_agent"));
        assert!(!is_registered("manage_nothing"));
    }

    #[test]
    fn test_listing_shape() {
        let listing = listing();
        let tools = listing["tools"].as_array().unwrap();
        assert_eq!(tools.len(), TOOLS.len());
        assert!(tools.iter().any(|t| t["name"] == "manage_context"));
    }
}
