use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub context: ContextConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    /// Optional database URL; defaults to a per-user SQLite file
    pub url: Option<String>,
    /// Storage engine: `sqlite` (shipped) or `postgresql`
    #[serde(default = "default_database_type")]
    pub database_type: String,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

fn default_database_type() -> String {
    "sqlite".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub port: u16,
    /// Execution budget for one tool call
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ContextConfig {
    /// Capacity of the resolved-context cache
    pub cache_size: usize,
    /// Optional TTL in seconds; unset means LRU-only eviction
    pub cache_ttl_seconds: Option<u64>,
    /// Identity used when the caller provides none (development mode)
    pub default_user_id: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

impl Config {
    /// Load configuration: defaults, then an optional file, then the
    /// environment (both `MCP_`-prefixed keys and the standard names).
    pub fn from_env() -> Result<Self> {
        let mut builder = ConfigBuilder::builder().add_source(File::from_str(
            include_str!("../config/default.toml"),
            FileFormat::Toml,
        ));

        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(
                File::with_name(&config_file)
                    .required(false)
                    .format(FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix("MCP")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;
        let mut result: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Self::apply_standard_env_vars(&mut result)?;
        Ok(result)
    }

    /// The enumerated environment keys consumed by the core.
    fn apply_standard_env_vars(config: &mut Config) -> Result<()> {
        if let Ok(database_url) = env::var("DATABASE_URL") {
            config.database.url = Some(database_url);
        }
        if let Ok(database_type) = env::var("DATABASE_TYPE") {
            config.database.database_type = database_type;
        }
        if let Ok(cache_size) = env::var("CONTEXT_CACHE_SIZE") {
            config.context.cache_size = cache_size
                .parse()
                .context("CONTEXT_CACHE_SIZE must be an integer")?;
        }
        if let Ok(cache_ttl) = env::var("CONTEXT_CACHE_TTL") {
            config.context.cache_ttl_seconds =
                Some(cache_ttl.parse().context("CONTEXT_CACHE_TTL must be seconds")?);
        }
        if let Ok(default_user_id) = env::var("DEFAULT_USER_ID") {
            config.context.default_user_id = default_user_id;
        }
        if let Ok(timeout) = env::var("REQUEST_TIMEOUT_SECONDS") {
            config.server.request_timeout_seconds = timeout
                .parse()
                .context("REQUEST_TIMEOUT_SECONDS must be an integer")?;
        }
        if let Ok(listen_addr) = env::var("LISTEN_ADDR") {
            config.server.listen_addr = listen_addr;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.logging.level = log_level;
        }
        Ok(())
    }

    /// The database URL with a per-user default fallback.
    pub fn database_url(&self) -> String {
        match &self.database.url {
            Some(url) => url.clone(),
            None => Self::default_database_url(),
        }
    }

    fn default_database_url() -> String {
        if let Ok(xdg_data) = env::var("XDG_DATA_HOME") {
            return format!("sqlite://{xdg_data}/lattice-mcp/lattice.sqlite");
        }
        let home = env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        format!("sqlite://{home}/lattice.sqlite")
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.listen_addr, self.server.port)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.server.request_timeout_seconds)
    }

    pub fn cache_ttl(&self) -> Option<std::time::Duration> {
        self.context
            .cache_ttl_seconds
            .map(std::time::Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(anyhow::anyhow!(
                    "Invalid log level: {other}. Must be one of: trace, debug, info, warn, error"
                ));
            }
        }

        match self.database.database_type.as_str() {
            "sqlite" => {
                let url = self.database_url();
                if !url.starts_with("sqlite://") && !url.starts_with(":memory:") {
                    return Err(anyhow::anyhow!(
                        "SQLite database URL must start with 'sqlite://', got: {url}"
                    ));
                }
            }
            "postgresql" => {
                return Err(anyhow::anyhow!(
                    "DATABASE_TYPE=postgresql is not available in this build; use sqlite"
                ));
            }
            other => {
                return Err(anyhow::anyhow!(
                    "Unknown DATABASE_TYPE '{other}'; expected sqlite or postgresql"
                ));
            }
        }

        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }
        if self.server.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("Request timeout must be greater than 0"));
        }
        if self.context.cache_size == 0 {
            return Err(anyhow::anyhow!("Context cache size must be greater than 0"));
        }
        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!(
                "Database max_connections must be greater than 0"
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: None,
                database_type: "sqlite".to_string(),
                max_connections: 5,
                connection_timeout: 30,
            },
            server: ServerConfig {
                listen_addr: "127.0.0.1".to_string(),
                port: 3000,
                request_timeout_seconds: 30,
            },
            context: ContextConfig {
                cache_size: 1000,
                cache_ttl_seconds: None,
                default_user_id: "default_user".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
        }
    }
}
