//! SQLite-backed storage engine.
//!
//! One pool feeds every repository. Multi-table writes (cascade deletes,
//! branch count recomputation) run inside a single transaction so a
//! failure rolls everything back and no cache entry is invalidated.

use lattice_core::error::{LatticeError, Result};
use sqlx::{migrate::MigrateDatabase, Sqlite, SqlitePool};

use crate::agents::SqliteAgentRepository;
use crate::branches::SqliteBranchRepository;
use crate::contexts::SqliteContextRepository;
use crate::delegations::SqliteDelegationRepository;
use crate::projects::SqliteProjectRepository;
use crate::subtasks::SqliteSubtaskRepository;
use crate::tasks::SqliteTaskRepository;

/// Shared SQLite database handle.
#[derive(Debug, Clone)]
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    /// Connect to a SQLite database URL (file path or `:memory:`),
    /// creating the file when missing.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let db_url = if database_url.starts_with(":memory:")
            || database_url.starts_with("sqlite://")
        {
            database_url.to_string()
        } else {
            format!("sqlite://{database_url}")
        };

        if !db_url.contains(":memory:") && !Sqlite::database_exists(&db_url).await.unwrap_or(false)
        {
            Sqlite::create_database(&db_url).await.map_err(|error| {
                tracing::error!(%error, "failed to create database");
                LatticeError::Database(format!("Failed to create database: {error}"))
            })?;
            tracing::info!("database created");
        }

        let connect_options = if db_url.contains(":memory:") {
            sqlx::sqlite::SqliteConnectOptions::new()
                .filename(&db_url)
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Memory)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
        } else {
            sqlx::sqlite::SqliteConnectOptions::new()
                .filename(db_url.replace("sqlite://", ""))
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
        };

        // An in-memory database exists per connection, so the pool must
        // stay at one connection or later checkouts see an empty schema.
        let pool = if db_url.contains(":memory:") {
            sqlx::sqlite::SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(connect_options)
                .await
        } else {
            SqlitePool::connect_with(connect_options).await
        }
        .map_err(|e| LatticeError::Database(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Apply pending migrations; call once after connecting.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations/sqlite")
            .run(&self.pool)
            .await
            .map_err(|e| LatticeError::Database(format!("Migration failed: {e}")))?;
        tracing::info!("database migrations completed");
        Ok(())
    }

    /// In-memory database with the schema applied; test setup helper.
    pub async fn in_memory() -> Result<Self> {
        let db = Self::connect(":memory:").await?;
        db.migrate().await?;
        Ok(db)
    }

    /// Direct pool access for custom statements in tests.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn projects(&self) -> SqliteProjectRepository {
        SqliteProjectRepository::new(self.pool.clone())
    }

    pub fn branches(&self) -> SqliteBranchRepository {
        SqliteBranchRepository::new(self.pool.clone())
    }

    pub fn tasks(&self) -> SqliteTaskRepository {
        SqliteTaskRepository::new(self.pool.clone())
    }

    pub fn subtasks(&self) -> SqliteSubtaskRepository {
        SqliteSubtaskRepository::new(self.pool.clone())
    }

    pub fn contexts(&self) -> SqliteContextRepository {
        SqliteContextRepository::new(self.pool.clone())
    }

    pub fn delegations(&self) -> SqliteDelegationRepository {
        SqliteDelegationRepository::new(self.pool.clone())
    }

    pub fn agents(&self) -> SqliteAgentRepository {
        SqliteAgentRepository::new(self.pool.clone())
    }
}
