//! Pump Agent binary
//!
//! Wires the agent to a real MQTT broker and the simulated pump driver.

use anyhow::Result;
use pump_agent::{mqtt, Agent, AgentConfig, DeviceTopics, SimulatedPump, TokioClock};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Fine if there is no .env

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pump_agent=info")),
        )
        .init();

    info!("Starting Pump Agent v{}", env!("CARGO_PKG_VERSION"));

    let config = AgentConfig::load().await?;
    let topics = DeviceTopics::new(config.device.device_id.clone());
    let (gateway, events, session) = mqtt::connect(&config, &topics);

    let agent = Agent::new(&config, SimulatedPump::new(), gateway, TokioClock::new());
    let poll_every = config.timing.poll_interval();

    tokio::select! {
        agent = agent.run(events, poll_every) => {
            error!("MQTT session ended, shutting down");
            if agent.state().is_running() {
                error!("Infusion was still running at shutdown");
            }
        }
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received");
        }
    }

    session.abort();
    info!("Pump Agent stopped");
    Ok(())
}
