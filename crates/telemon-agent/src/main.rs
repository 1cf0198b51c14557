use anyhow::Result;
use telemon_agent::{AgentConfig, AgentHandle};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("telemon=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/agent.toml".to_string());

    let config = AgentConfig::load(&config_path)?;
    tracing::info!(
        server = %config.server_addr,
        poll_secs = config.poll_interval_secs,
        report_secs = config.report_interval_secs,
        "telemon-agent starting"
    );

    let agent = AgentHandle::start(&config)?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down gracefully");
    agent.shutdown(config.shutdown_grace()).await;

    Ok(())
}
