//! Static catalog of named agent roles.
//!
//! The catalog is read-only at runtime; the core records assignments and
//! returns descriptors, nothing more. The definition library itself is an
//! external collaborator.

use serde_json::json;

/// One catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub capabilities: &'static [&'static str],
}

impl AgentDefinition {
    pub fn capabilities_json(&self) -> serde_json::Value {
        json!({ "skills": self.capabilities })
    }

    pub fn descriptor(&self) -> serde_json::Value {
        json!({
            "name": self.name,
            "description": self.description,
            "capabilities": self.capabilities,
        })
    }
}

const CATALOG: &[AgentDefinition] = &[
    AgentDefinition {
        name: "@coding_agent",
        description: "Implements features and fixes across the codebase",
        capabilities: &["implementation", "refactoring", "debugging"],
    },
    AgentDefinition {
        name: "@test_orchestrator_agent",
        description: "Plans and executes test strategies",
        capabilities: &["unit_testing", "integration_testing", "coverage"],
    },
    AgentDefinition {
        name: "@code_reviewer_agent",
        description: "Reviews changes for correctness and style",
        capabilities: &["review", "static_analysis"],
    },
    AgentDefinition {
        name: "@system_architect_agent",
        description: "Designs system structure and interfaces",
        capabilities: &["architecture", "api_design"],
    },
    AgentDefinition {
        name: "@devops_agent",
        description: "Owns build, deployment and infrastructure concerns",
        capabilities: &["ci_cd", "deployment", "monitoring"],
    },
    AgentDefinition {
        name: "@documentation_agent",
        description: "Writes and maintains documentation",
        capabilities: &["documentation", "examples"],
    },
    AgentDefinition {
        name: "@security_auditor_agent",
        description: "Audits changes for security issues",
        capabilities: &["security_review", "threat_modeling"],
    },
    AgentDefinition {
        name: "@planning_agent",
        description: "Breaks work down into tasks and subtasks",
        capabilities: &["planning", "estimation"],
    },
];

/// Look up a catalog entry by name; the leading `@` is optional.
pub fn lookup(name: &str) -> Option<&'static AgentDefinition> {
    let normalized = if name.starts_with('@') {
        name.to_string()
    } else {
        format!("@{name}")
    };
    CATALOG.iter().find(|agent| agent.name == normalized)
}

/// Every catalog entry.
pub fn all() -> &'static [AgentDefinition] {
    CATALOG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_with_and_without_prefix() {
        assert!(lookup("@coding_agent").is_some());
        assert!(lookup("coding_agent").is_some());
        assert!(lookup("@unknown_agent").is_none());
    }

    #[test]
    fn test_descriptor_shape() {
        let descriptor = lookup("@coding_agent").unwrap().descriptor();
        assert_eq!(descriptor["name"], "@coding_agent");
        assert!(descriptor["capabilities"].is_array());
    }
}
