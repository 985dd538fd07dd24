//! SQLite persistence for the Lattice orchestration server.
//!
//! Implements every repository trait from `lattice-core` over one shared
//! sqlx pool. JSON payloads live in TEXT columns; timestamps are RFC 3339
//! TEXT; multi-table writes run inside transactions.

mod agents;
mod branches;
mod common;
mod contexts;
mod delegations;
mod projects;
mod sqlite;
mod subtasks;
mod tasks;

pub use agents::SqliteAgentRepository;
pub use branches::SqliteBranchRepository;
pub use contexts::SqliteContextRepository;
pub use delegations::SqliteDelegationRepository;
pub use projects::SqliteProjectRepository;
pub use sqlite::SqliteDatabase;
pub use subtasks::SqliteSubtaskRepository;
pub use tasks::SqliteTaskRepository;
