use anyhow::Result;
use clap::Parser;
use mcp_protocol::McpServer;
use tracing::info;

use mcp_server::config::Config;
use mcp_server::setup::build_state;
use mcp_server::telemetry::{init_telemetry, log_startup_info};

#[derive(Parser)]
#[command(name = "lattice-mcp")]
#[command(about = "Lattice task & context orchestration server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value = "3000")]
    port: u16,

    /// Listen address override
    #[arg(long, env = "LISTEN_ADDR")]
    listen_addr: Option<String>,

    /// Database URL override
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Log level override
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::from_env()?;

    if let Some(ref database_url) = cli.database_url {
        config.database.url = Some(database_url.clone());
    }
    if let Some(ref listen_addr) = cli.listen_addr {
        config.server.listen_addr = listen_addr.clone();
    }
    config.server.port = cli.port;
    if let Some(ref log_level) = cli.log_level {
        config.logging.level = log_level.clone();
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    init_telemetry(&config.logging)?;
    config.validate()?;
    log_startup_info(&config);

    let state = build_state(&config).await?;
    info!("service graph assembled");

    let server = McpServer::new(state, config.request_timeout());
    server.serve(&config.server_address()).await?;
    Ok(())
}
