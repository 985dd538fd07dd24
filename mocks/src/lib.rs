//! In-memory repository implementations for testing.
//!
//! One [`InMemoryRepositories`] value implements every repository trait
//! with the same observable semantics as the SQLite store, plus error
//! injection and call tracking for failure-path tests.

mod builders;
mod repository;

pub use builders::{subtask, task, SubtaskBuilder, TaskBuilder};
pub use repository::InMemoryRepositories;
