use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registered agent reference.
///
/// The capability payload comes from the static catalog; the core only
/// records assignments and hands the name back to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    /// Agent name, e.g. `@coding_agent` (primary key)
    pub id: String,
    pub name: String,
    /// Opaque capability descriptor from the catalog
    pub capabilities: serde_json::Value,
    pub status: AgentStatus,
    /// 0.0 = saturated, 1.0 = fully available
    pub availability_score: f64,
    pub registered_at: DateTime<Utc>,
}

/// Agent availability states
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Available,
    Busy,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Available => "available",
            AgentStatus::Busy => "busy",
            AgentStatus::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(AgentStatus::Available),
            "busy" => Some(AgentStatus::Busy),
            "offline" => Some(AgentStatus::Offline),
            _ => None,
        }
    }
}

/// Data transfer object for registering an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAgent {
    pub name: String,
    pub capabilities: Option<serde_json::Value>,
}

/// Many-to-many link between agents and branches
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentAssignment {
    pub agent_id: String,
    pub branch_id: String,
    pub assigned_at: DateTime<Utc>,
}

/// Task label; attached through a join table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Label {
    pub id: String,
    /// Unique
    pub name: String,
    pub color: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_status_round_trip() {
        for status in [AgentStatus::Available, AgentStatus::Busy, AgentStatus::Offline] {
            assert_eq!(AgentStatus::parse(status.as_str()), Some(status));
        }
    }
}
