//! # elastic-AI Protocol Agent
//!
//! Device runtime speaking the elastic-AI protocol over MQTT.
//!
//! ## Behaviour
//!
//! 1. **Status**: Announces `ONLINE` (retained) and registers an `OFFLINE` will
//! 2. **Streams**: Publishes configured data streams between START and STOP requests
//! 3. **Commands**: Answers `ECHO` requests with a DONE carrying the settings
//! 4. **Requests**: Optionally pulls one remote stream and logs its values

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod config;
mod runtime;

pub use config::AgentConfig;
pub use runtime::Agent;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting elastic-AI protocol agent"
    );

    let config = AgentConfig::from_env()?;

    let client_id = config
        .client_id
        .clone()
        .unwrap_or_else(|| format!("eaip{}", Uuid::new_v4().simple()));

    tracing::info!(%client_id, device_type = %config.device_type, "Agent initialized");

    Agent::new(config, client_id).run().await?;

    Ok(())
}
