//! The standardized response envelope.
//!
//! Every tool call, success or failure, flows through this single builder;
//! controllers never assemble responses by hand. Data payload field names
//! are fixed per action family and asserted by tests.

use chrono::Utc;
use lattice_core::{guidance::Guidance, LatticeError};
use serde_json::{json, Map, Value};

/// Builder for one tool response envelope.
pub struct Envelope {
    operation: String,
    data: Value,
    context_operation: Option<Value>,
    operation_details: Value,
    guidance: Option<Guidance>,
    partial_failures: Vec<Value>,
}

impl Envelope {
    pub fn new(tool: &str, action: &str) -> Self {
        Self {
            operation: format!("{tool}.{action}"),
            data: Value::Object(Map::new()),
            context_operation: None,
            operation_details: Value::Object(Map::new()),
            guidance: None,
            partial_failures: Vec::new(),
        }
    }

    /// Set one field of the `data` payload.
    pub fn data(mut self, key: &str, value: Value) -> Self {
        if let Value::Object(map) = &mut self.data {
            map.insert(key.to_string(), value);
        }
        self
    }

    /// Record a context side effect (auto-creation, sync) in metadata.
    pub fn context_operation(mut self, value: Value) -> Self {
        self.context_operation = Some(value);
        self
    }

    /// Set one field of `metadata.operation_details`.
    pub fn detail(mut self, key: &str, value: Value) -> Self {
        if let Value::Object(map) = &mut self.operation_details {
            map.insert(key.to_string(), value);
        }
        self
    }

    /// Attach workflow guidance.
    pub fn guidance(mut self, guidance: Guidance) -> Self {
        self.guidance = Some(guidance);
        self
    }

    /// Record a swallowed partial failure (sync, delegation).
    pub fn partial_failure(mut self, message: &str) -> Self {
        self.partial_failures.push(json!(message));
        self
    }

    /// Finish as a success (or `partial_success` when partial failures
    /// were recorded).
    pub fn success(self) -> Value {
        let status = if self.partial_failures.is_empty() {
            "success"
        } else {
            "partial_success"
        };
        let mut metadata = json!({ "operation_details": self.operation_details });
        if let Some(context_operation) = self.context_operation {
            metadata["context_operation"] = context_operation;
        }
        if let Some(guidance) = &self.guidance {
            metadata["workflow_guidance"] = json!(guidance);
        }
        json!({
            "status": status,
            "success": true,
            "operation": self.operation,
            "operation_id": uuid::Uuid::new_v4().to_string(),
            "timestamp": Utc::now().to_rfc3339(),
            "data": self.data,
            "metadata": metadata,
            "confirmation": {
                "operation_completed": true,
                "data_persisted": true,
                "partial_failures": self.partial_failures,
            },
        })
    }

    /// Finish as a failure carrying the domain error.
    ///
    /// Gate failures surface their blocking ids in `data` so callers can
    /// act on them without parsing messages.
    pub fn failure(self, error: &LatticeError) -> Value {
        let mut data = self.data;
        if let LatticeError::InvariantViolation { blocking_ids, .. } = error {
            if !blocking_ids.is_empty() {
                if let Value::Object(map) = &mut data {
                    map.entry("blocking_ids".to_string())
                        .or_insert_with(|| json!(blocking_ids));
                }
            }
        }
        json!({
            "status": "failure",
            "success": false,
            "operation": self.operation,
            "operation_id": uuid::Uuid::new_v4().to_string(),
            "timestamp": Utc::now().to_rfc3339(),
            "data": data,
            "metadata": { "operation_details": self.operation_details },
            "error": {
                "message": error.to_string(),
                "code": error.code(),
                "operation": self.operation,
                "timestamp": Utc::now().to_rfc3339(),
            },
            "confirmation": {
                "operation_completed": false,
                "data_persisted": false,
                "partial_failures": [],
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_shape() {
        let envelope = Envelope::new("manage_task", "get")
            .data("task", json!({"id": "t1"}))
            .success();

        assert_eq!(envelope["status"], "success");
        assert_eq!(envelope["success"], true);
        assert_eq!(envelope["operation"], "manage_task.get");
        assert!(envelope["operation_id"].is_string());
        assert!(envelope["timestamp"].is_string());
        assert_eq!(envelope["data"]["task"]["id"], "t1");
        assert_eq!(envelope["confirmation"]["operation_completed"], true);
        assert_eq!(envelope["confirmation"]["data_persisted"], true);
        assert!(envelope.get("error").is_none());
    }

    #[test]
    fn test_failure_envelope_shape() {
        let error = LatticeError::not_found("Task", "t1");
        let envelope = Envelope::new("manage_task", "get").failure(&error);

        assert_eq!(envelope["status"], "failure");
        assert_eq!(envelope["success"], false);
        assert_eq!(envelope["error"]["code"], "NOT_FOUND");
        assert_eq!(envelope["error"]["operation"], "manage_task.get");
        assert_eq!(envelope["confirmation"]["data_persisted"], false);
    }

    #[test]
    fn test_blocking_ids_surface_in_data() {
        let error = LatticeError::blocked_by(
            lattice_core::InvariantKind::UnfinishedSubtasks,
            "unfinished subtasks",
            vec!["s1".to_string(), "s2".to_string()],
        );
        let envelope = Envelope::new("manage_task", "complete")
            .data("blocking_subtasks", json!(["s1", "s2"]))
            .failure(&error);

        assert_eq!(envelope["data"]["blocking_subtasks"], json!(["s1", "s2"]));
        assert_eq!(envelope["data"]["blocking_ids"], json!(["s1", "s2"]));
        assert_eq!(envelope["error"]["code"], "INVARIANT_VIOLATION");
    }

    #[test]
    fn test_partial_failures_flip_status() {
        let envelope = Envelope::new("manage_task", "update")
            .partial_failure("context sync deferred")
            .success();
        assert_eq!(envelope["status"], "partial_success");
        assert_eq!(envelope["success"], true);
        assert_eq!(
            envelope["confirmation"]["partial_failures"],
            json!(["context sync deferred"])
        );
    }
}
