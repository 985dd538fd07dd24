//! Core domain of the Lattice task and context orchestration server.
//!
//! Everything observable over the wire is produced here: the hierarchical
//! context engine (resolver, cache, delegation, sync), the task and
//! subtask lifecycle with gated completion, the dependency graph, and the
//! repository traits the storage layer implements.

pub mod agents;
pub mod branches;
pub mod catalog;
pub mod context;
pub mod error;
pub mod guidance;
pub mod models;
pub mod projects;
pub mod repository;
pub mod tasks;
pub mod validation;

pub use agents::AgentService;
pub use branches::BranchService;
pub use context::{
    CacheMetrics, ContextCache, ContextService, ContextSyncService, DelegationEngine,
};
pub use error::{InvariantKind, LatticeError, Result};
pub use models::*;
pub use projects::{HealthStatus, ProjectService};
pub use repository::{
    AgentRepository, BranchRepository, CascadeDelete, ContextRepository, DelegationRepository,
    ProjectRepository, SubtaskRepository, TaskRepository,
};
pub use tasks::{
    BlockerAnalysis, CompletionOutcome, DependencyService, SubtaskProgress, SubtaskService,
    TaskService,
};
pub use validation::Validator;
