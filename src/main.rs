pub mod config;
pub mod mqtt;
pub mod network;
pub mod node;
pub mod supervisor;
pub mod telemetry;

#[cfg(test)]
mod testing;

use crate::config::NodeConfig;
use crate::mqtt::{BrokerSettings, RumqttSession};
use crate::network::NmcliStation;
use crate::node::{Booting, Node};
use crate::supervisor::Supervisor;
use color_eyre::{eyre::eyre, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    setup()?;

    let config_path = NodeConfig::default_path()?;
    if NodeConfig::ensure_default(&config_path)? {
        return Err(eyre!(
            "Wrote default configuration to {}, fill in the wifi and mqtt credentials",
            config_path.display()
        ));
    }
    let config = NodeConfig::load(&config_path)?;
    config
        .validate()
        .map_err(|e| eyre!("{} (edit {})", e, config_path.display()))?;

    setup_logging_env(config.logging.max_level()?);
    info!("Loaded configuration from {}", config_path.display());

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received");
                ctrl_c.cancel();
            }
            Err(e) => warn!("Unable to listen for Ctrl-C: {}", e),
        }
    });

    let mut supervisor = Supervisor::new(shutdown, config.timing.restart_delay());
    supervisor.run(|| assemble_node(&config)).await;

    info!("Stopped after {} restarts", supervisor.restarts());
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();
}

fn assemble_node(config: &NodeConfig) -> Node<Booting> {
    Node::create(
        config,
        Box::new(NmcliStation::new(config.wifi.interface.as_str())),
        Box::new(RumqttSession::new(BrokerSettings::from(&config.mqtt))),
        config.sensors.build(),
    )
}
