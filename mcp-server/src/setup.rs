use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use database::SqliteDatabase;
use mcp_protocol::{AppState, StateConfig};

use crate::config::Config;

/// Make sure the directory behind a file-backed database URL exists.
pub fn ensure_database_directory(database_url: &str) -> Result<()> {
    if database_url.contains(":memory:") {
        return Ok(());
    }
    let path = database_url.trim_start_matches("sqlite://");
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {parent:?}"))?;
        }
    }
    Ok(())
}

/// Connect, migrate and assemble the full service graph.
pub async fn build_state(config: &Config) -> Result<AppState> {
    let database_url = config.database_url();
    ensure_database_directory(&database_url)?;

    let db = SqliteDatabase::connect(&database_url)
        .await
        .context("Failed to connect to the database")?;
    db.migrate().await.context("Failed to run migrations")?;

    let state = AppState::build(
        Arc::new(db.projects()),
        Arc::new(db.branches()),
        Arc::new(db.tasks()),
        Arc::new(db.subtasks()),
        Arc::new(db.contexts()),
        Arc::new(db.delegations()),
        Arc::new(db.agents()),
        StateConfig {
            cache_capacity: config.context.cache_size,
            cache_ttl: config.cache_ttl(),
            default_user_id: config.context.default_user_id.clone(),
        },
    );
    state
        .initialize()
        .await
        .context("Failed to bootstrap the global context")?;
    Ok(state)
}
