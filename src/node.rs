//! Telemetry node with a statum typestate for its lifecycle
//!
//! # State Machine
//!
//! ```text
//! Booting ──► LinkConnecting ──► Online ──┐
//!                   │              ▲      │ check session, reconnect if needed,
//!                   │              └──────┘ build, publish, sleep
//!                   ▼
//!           RestartRequired (handled by the supervisor)
//! ```
//!
//! A node owns its station, broker session and sensors. Nothing is shared between
//! nodes, so a restart is simply dropping the node and assembling a new one.

use statum::{machine, state};
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{NodeConfig, WifiConfig};
use crate::mqtt::publisher::PublisherStatus;
use crate::mqtt::{BrokerSession, TelemetryPublisher};
use crate::network::{LinkError, LinkUp, NetworkConnector, Station};
use crate::telemetry::sensors::SensorSuite;
use crate::telemetry::PayloadBuilder;

#[derive(Debug, Error)]
pub enum NodeError {
    /// Unrecoverable at node level, the node has to be rebuilt from scratch
    #[error("Restart required: {0}")]
    RestartRequired(#[source] LinkError),
}

/// What a single online cycle ended with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Published,
    PublishFailed,
    SensorFailed,
    PayloadRejected,
}

#[state]
#[derive(Debug, Clone)]
pub enum NodeState {
    Booting,
    LinkConnecting,
    Online,
}

#[machine]
pub struct Node<S: NodeState> {
    wifi: WifiConfig,
    topic: String,
    publish_interval: Duration,
    connector: NetworkConnector,
    publisher: TelemetryPublisher,
    builder: PayloadBuilder,
    link: Option<LinkUp>,
}

impl Node<Booting> {
    pub fn create(
        config: &NodeConfig,
        station: Box<dyn Station>,
        session: Box<dyn BrokerSession>,
        sensors: Box<dyn SensorSuite>,
    ) -> Self {
        let connector = NetworkConnector::new(
            station,
            config.timing.link_poll_interval(),
            config.timing.link_max_retries,
        );
        let publisher = TelemetryPublisher::new(
            session,
            config.mqtt.client_id_prefix.clone(),
            config.timing.reconnect_backoff(),
        );

        Self::new(
            config.wifi.clone(),
            config.mqtt.telemetry_topic.clone(),
            config.timing.publish_interval(),
            connector,
            publisher,
            PayloadBuilder::new(sensors),
            None, // link
        )
    }

    pub fn start(self) -> Node<LinkConnecting> {
        info!("Booting telemetry node");
        self.transition()
    }
}

impl Node<LinkConnecting> {
    /// Joins the configured network. Exhausting the retry budget is fatal for the node.
    pub async fn connect(mut self) -> Result<Node<Online>, NodeError> {
        let link = self
            .connector
            .connect(&self.wifi.ssid, &self.wifi.password)
            .await
            .map_err(NodeError::RestartRequired)?;

        self.publisher.reseed(link.seed);
        self.link = Some(link);
        Ok(self.transition())
    }
}

impl Node<Online> {
    pub fn local_addr(&self) -> Option<IpAddr> {
        self.link.and_then(|link| link.addr)
    }

    pub fn publisher_status(&self) -> &PublisherStatus {
        self.publisher.status()
    }

    /// One pass of the control loop, without the trailing sleep.
    pub async fn cycle(&mut self) -> CycleOutcome {
        if !self.publisher.is_connected() {
            self.publisher.ensure_connected().await;
        }
        self.publisher.service().await;

        let record = match self.builder.build() {
            Ok(record) => record,
            Err(e) => {
                error!("Sensor read failed, skipping cycle: {}", e);
                return CycleOutcome::SensorFailed;
            }
        };

        let payload = match record.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Telemetry payload rejected: {}", e);
                return CycleOutcome::PayloadRejected;
            }
        };

        match self.publisher.publish(&self.topic, &payload).await {
            Ok(()) => CycleOutcome::Published,
            Err(_) => CycleOutcome::PublishFailed,
        }
    }

    /// Runs cycles every publish interval until `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) -> PublisherStatus {
        match self.local_addr() {
            Some(addr) => info!(
                "Publishing telemetry from {} to '{}' every {}s",
                addr,
                self.topic,
                self.publish_interval.as_secs()
            ),
            None => info!(
                "Publishing telemetry to '{}' every {}s",
                self.topic,
                self.publish_interval.as_secs()
            ),
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, leaving telemetry loop");
                    break;
                }
                _ = async {
                    self.cycle().await;
                    tokio::time::sleep(self.publish_interval).await;
                } => {}
            }
        }

        self.publisher.status().clone()
    }
}
