use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Literal id of the single global context
pub const GLOBAL_SINGLETON_ID: &str = "global_singleton";

/// The four context tiers, root first.
///
/// The inheritance chain is a lookup traversal, not an ownership graph:
/// each level knows how to find its parent's id and nothing else.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContextLevel {
    Global,
    Project,
    Branch,
    Task,
}

impl ContextLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextLevel::Global => "global",
            ContextLevel::Project => "project",
            ContextLevel::Branch => "branch",
            ContextLevel::Task => "task",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "global" => Some(ContextLevel::Global),
            "project" => Some(ContextLevel::Project),
            "branch" => Some(ContextLevel::Branch),
            "task" => Some(ContextLevel::Task),
            _ => None,
        }
    }

    /// The level one step toward the root, if any
    pub fn parent(&self) -> Option<ContextLevel> {
        match self {
            ContextLevel::Global => None,
            ContextLevel::Project => Some(ContextLevel::Global),
            ContextLevel::Branch => Some(ContextLevel::Project),
            ContextLevel::Task => Some(ContextLevel::Branch),
        }
    }

    /// Levels in resolve order, root first
    pub fn all() -> [ContextLevel; 4] {
        [
            ContextLevel::Global,
            ContextLevel::Project,
            ContextLevel::Branch,
            ContextLevel::Task,
        ]
    }
}

impl std::fmt::Display for ContextLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistent context record at one level.
///
/// The id equals the owning entity's id (the global context uses
/// [`GLOBAL_SINGLETON_ID`]). `version` is monotonic from 1 and backs the
/// optimistic concurrency check and the cache dependency hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextRecord {
    pub level: ContextLevel,
    pub id: String,
    /// Id of the parent context; `None` only at the global level
    pub parent_id: Option<String>,
    /// Arbitrary nested JSON object
    pub data: Value,
    pub local_overrides: Value,
    pub delegation_triggers: Value,
    /// When set, resolution stops here and ancestors are not consulted
    pub inheritance_disabled: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContextRecord {
    /// Cache key for this record
    pub fn key(&self) -> (ContextLevel, String) {
        (self.level, self.id.clone())
    }
}

/// Data transfer object for creating a context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewContext {
    pub level: ContextLevel,
    pub id: String,
    #[serde(default = "empty_object")]
    pub data: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Data transfer object for updating a context
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateContext {
    pub data: Option<Value>,
    pub local_overrides: Option<Value>,
    pub delegation_triggers: Option<Value>,
    pub inheritance_disabled: Option<bool>,
}

/// One consulted link in a resolved inheritance chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainLink {
    pub level: ContextLevel,
    pub context_id: String,
    /// Version observed at resolve time; feeds the dependency hash
    #[serde(skip)]
    pub version: i64,
}

/// Result of walking the inheritance chain for a `(level, id)` pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedContext {
    pub level: ContextLevel,
    pub context_id: String,
    /// Deterministic merge of every consulted level, root first
    pub data: Value,
    /// Ordered levels actually consulted, root first
    pub inheritance_chain: Vec<ContextLevel>,
    /// Ids and versions behind `inheritance_chain`
    #[serde(skip)]
    pub chain: Vec<ChainLink>,
    /// Whether this result came from the cache
    pub from_cache: bool,
    pub resolved_at: DateTime<Utc>,
}

impl ResolvedContext {
    /// Hash over the `(id, version)` pairs of the chain.
    ///
    /// Two resolutions of the same key agree on the hash iff no consulted
    /// context changed in between.
    pub fn dependency_hash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for link in &self.chain {
            link.context_id.hash(&mut hasher);
            link.version.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Queue entry for upward promotion of context data.
///
/// Delegations to the project or branch level may auto-apply; writes to the
/// global context always wait for explicit approval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextDelegation {
    pub id: String,
    pub source_level: ContextLevel,
    pub source_id: String,
    pub target_level: ContextLevel,
    pub target_id: String,
    pub delegated_data: Value,
    pub reason: String,
    pub auto_delegated: bool,
    pub processed: bool,
    pub approved: Option<bool>,
    pub rejected_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Data transfer object for enqueuing a delegation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDelegation {
    pub source_level: ContextLevel,
    pub source_id: String,
    pub target_level: ContextLevel,
    pub target_id: String,
    pub delegated_data: Value,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub auto_delegated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parents() {
        assert_eq!(ContextLevel::Global.parent(), None);
        assert_eq!(ContextLevel::Project.parent(), Some(ContextLevel::Global));
        assert_eq!(ContextLevel::Branch.parent(), Some(ContextLevel::Project));
        assert_eq!(ContextLevel::Task.parent(), Some(ContextLevel::Branch));
    }

    #[test]
    fn test_level_round_trip() {
        for level in ContextLevel::all() {
            assert_eq!(ContextLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(ContextLevel::parse("universe"), None);
    }

    #[test]
    fn test_dependency_hash_tracks_versions() {
        let mut resolved = ResolvedContext {
            level: ContextLevel::Task,
            context_id: "t1".to_string(),
            data: serde_json::json!({}),
            inheritance_chain: vec![ContextLevel::Global, ContextLevel::Task],
            chain: vec![
                ChainLink {
                    level: ContextLevel::Global,
                    context_id: GLOBAL_SINGLETON_ID.to_string(),
                    version: 1,
                },
                ChainLink {
                    level: ContextLevel::Task,
                    context_id: "t1".to_string(),
                    version: 3,
                },
            ],
            from_cache: false,
            resolved_at: Utc::now(),
        };
        let before = resolved.dependency_hash();
        resolved.chain[1].version = 4;
        assert_ne!(before, resolved.dependency_hash());
    }

    #[test]
    fn test_chain_serializes_as_level_names() {
        let resolved = ResolvedContext {
            level: ContextLevel::Task,
            context_id: "t1".to_string(),
            data: serde_json::json!({}),
            inheritance_chain: ContextLevel::all().to_vec(),
            chain: vec![],
            from_cache: false,
            resolved_at: Utc::now(),
        };
        let value = serde_json::to_value(&resolved).unwrap();
        assert_eq!(
            value["inheritance_chain"],
            serde_json::json!(["global", "project", "branch", "task"])
        );
    }
}
