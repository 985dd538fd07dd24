use thiserror::Error;

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, LatticeError>;

/// Which invariant an [`LatticeError::InvariantViolation`] was raised for.
///
/// Response shaping branches on this tag, never on the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantKind {
    /// Completion blocked on subtasks that are not done
    UnfinishedSubtasks,
    /// Completion blocked on dependency tasks that are not done
    UnsatisfiedDependencies,
    /// Context deletion blocked while child contexts still exist
    ChildContexts,
    /// The requested status change is not a legal transition
    IllegalTransition,
    /// The entity is in a terminal state that forbids the operation
    TerminalState,
}

/// Error types for the task and context orchestration core.
///
/// Each variant surfaces to clients with a stable `code` string so that
/// callers can branch on failures without parsing messages. Database and
/// serialization problems are folded into `INTERNAL` at the boundary; the
/// detail stays in the logs keyed by `operation_id`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LatticeError {
    /// Entity or context missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness violation on create
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Required ancestor context absent during resolve or create
    #[error("Missing parent context: {0}")]
    MissingParent(String),

    /// Unknown action for the tool
    #[error("Invalid action '{action}' for tool '{tool}'")]
    InvalidAction { tool: String, action: String },

    /// Parameter failed coercion or schema validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// A domain invariant blocked the operation; carries the blocking ids
    /// and which invariant they belong to
    #[error("Invariant violation: {message}")]
    InvariantViolation {
        kind: InvariantKind,
        message: String,
        blocking_ids: Vec<String>,
    },

    /// Adding the edge would create a dependency cycle
    #[error("Dependency cycle: {0}")]
    DependencyCycle(String),

    /// Resolver re-visited a level or id while walking the chain
    #[error("Circular inheritance detected: {0}")]
    CircularInheritance(String),

    /// Concurrent modification detected via version mismatch
    #[error("Conflicting state: {0}")]
    ConflictingState(String),

    /// Execution budget exceeded
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Storage layer failure; surfaces as INTERNAL
    #[error("Database error: {0}")]
    Database(String),

    /// Unclassified failure; surfaces as INTERNAL
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LatticeError {
    /// Create a not found error for an entity kind and id
    pub fn not_found(kind: &str, id: &str) -> Self {
        Self::NotFound(format!("{kind} '{id}' not found"))
    }

    /// Create an already exists error for an entity kind and key
    pub fn already_exists(kind: &str, key: &str) -> Self {
        Self::AlreadyExists(format!("{kind} '{key}' already exists"))
    }

    /// Create a missing parent error for a context level and parent id
    pub fn missing_parent(level: &str, parent_id: &str) -> Self {
        Self::MissingParent(format!(
            "{level} context '{parent_id}' does not exist"
        ))
    }

    /// Create a validation error for an empty required field
    pub fn empty_field(field: &str) -> Self {
        Self::Validation(format!("Field '{field}' cannot be empty"))
    }

    /// Create an invariant violation with the ids blocking the operation
    pub fn blocked_by(
        kind: InvariantKind,
        message: impl Into<String>,
        blocking_ids: Vec<String>,
    ) -> Self {
        Self::InvariantViolation {
            kind,
            message: message.into(),
            blocking_ids,
        }
    }

    /// Check if this error indicates a not found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, LatticeError::NotFound(_))
    }

    /// Check if this error indicates a validation problem
    pub fn is_validation(&self) -> bool {
        matches!(self, LatticeError::Validation(_))
    }

    /// Check if this error indicates a broken invariant
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, LatticeError::InvariantViolation { .. })
    }

    /// Stable machine-readable code for the response envelope
    pub fn code(&self) -> &'static str {
        match self {
            LatticeError::NotFound(_) => "NOT_FOUND",
            LatticeError::AlreadyExists(_) => "ALREADY_EXISTS",
            LatticeError::MissingParent(_) => "MISSING_PARENT",
            LatticeError::InvalidAction { .. } => "INVALID_ACTION",
            LatticeError::Validation(_) => "VALIDATION_ERROR",
            LatticeError::InvariantViolation { .. } => "INVARIANT_VIOLATION",
            LatticeError::DependencyCycle(_) => "DEPENDENCY_CYCLE",
            LatticeError::CircularInheritance(_) => "CIRCULAR_INHERITANCE",
            LatticeError::ConflictingState(_) => "CONFLICTING_STATE",
            LatticeError::Timeout(_) => "TIMEOUT",
            LatticeError::Database(_) => "INTERNAL",
            LatticeError::Internal(_) => "INTERNAL",
        }
    }

    /// Convert to the equivalent HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            LatticeError::NotFound(_) => 404,
            LatticeError::AlreadyExists(_) => 409,
            LatticeError::MissingParent(_) => 409,
            LatticeError::InvalidAction { .. } => 400,
            LatticeError::Validation(_) => 400,
            LatticeError::InvariantViolation { .. } => 422,
            LatticeError::DependencyCycle(_) => 422,
            LatticeError::CircularInheritance(_) => 500,
            LatticeError::ConflictingState(_) => 409,
            LatticeError::Timeout(_) => 408,
            LatticeError::Database(_) => 500,
            LatticeError::Internal(_) => 500,
        }
    }

    /// The ids blocking the operation, if any (completion gates, cycles)
    pub fn blocking_ids(&self) -> &[String] {
        match self {
            LatticeError::InvariantViolation { blocking_ids, .. } => blocking_ids,
            _ => &[],
        }
    }
}
