//! The task lifecycle engine: tasks, subtasks and the dependency graph.

pub mod dependencies;
pub mod service;
pub mod subtasks;

pub use dependencies::{BlockerAnalysis, DependencyRef, DependencyService};
pub use service::{CompletionOutcome, TaskService};
pub use subtasks::{SubtaskProgress, SubtaskService};
