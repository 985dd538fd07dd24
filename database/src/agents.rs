use async_trait::async_trait;
use sqlx::SqlitePool;

use lattice_core::{
    error::Result,
    models::Agent,
    repository::AgentRepository,
};

use crate::common::{db_err, encode_json, row_to_agent};

const AGENT_COLUMNS: &str = "id, name, capabilities, status, availability_score, registered_at";

/// SQLite implementation of the agent reference store.
#[derive(Debug, Clone)]
pub struct SqliteAgentRepository {
    pool: SqlitePool,
}

impl SqliteAgentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgentRepository for SqliteAgentRepository {
    async fn register(&self, agent: Agent) -> Result<Agent> {
        // Re-registration refreshes the descriptor rather than failing
        let row = sqlx::query(&format!(
            "INSERT INTO agents (id, name, capabilities, status, availability_score, registered_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET \
                 name = excluded.name, \
                 capabilities = excluded.capabilities, \
                 status = excluded.status, \
                 availability_score = excluded.availability_score \
             RETURNING {AGENT_COLUMNS}"
        ))
        .bind(&agent.id)
        .bind(&agent.name)
        .bind(encode_json(&agent.capabilities)?)
        .bind(agent.status.as_str())
        .bind(agent.availability_score)
        .bind(agent.registered_at.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        row_to_agent(&row)
    }

    async fn get(&self, id: &str) -> Result<Option<Agent>> {
        let row = sqlx::query(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_agent).transpose()
    }

    async fn list(&self) -> Result<Vec<Agent>> {
        let rows = sqlx::query(&format!("SELECT {AGENT_COLUMNS} FROM agents ORDER BY id"))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_agent).collect()
    }

    async fn unregister(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM agents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}
