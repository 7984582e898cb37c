use chrono::{DateTime, Local};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tracing::{error, info, warn};

use super::{BrokerSession, PublishError};

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Clone, Debug, Default)]
pub struct PublisherStatus {
    pub connection_state: ConnectionState,
    pub connect_attempts: u64,
    pub messages_sent: u64,
    pub publish_failures: u64,
    pub last_error: Option<String>,
    pub last_activity: Option<DateTime<Local>>,
}

impl PublisherStatus {
    /// One line suitable for a shutdown log.
    pub fn summary(&self) -> String {
        let last_activity = self
            .last_activity
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        format!(
            "{} sent, {} failed, {} connect attempts, last activity {}, last error: {}",
            self.messages_sent,
            self.publish_failures,
            self.connect_attempts,
            last_activity,
            self.last_error.as_deref().unwrap_or("none")
        )
    }
}

/// Keeps a broker session alive and pushes payloads through it.
///
/// Reconnects are unbounded: `ensure_connected` only returns once the broker accepted
/// a session. Publishing is best effort and never retried within a cycle.
pub struct TelemetryPublisher {
    session: Box<dyn BrokerSession>,
    rng: StdRng,
    client_id_prefix: String,
    backoff: Duration,
    status: PublisherStatus,
}

impl TelemetryPublisher {
    pub fn new(session: Box<dyn BrokerSession>, client_id_prefix: String, backoff: Duration) -> Self {
        Self {
            session,
            rng: StdRng::seed_from_u64(0),
            client_id_prefix,
            backoff,
            status: PublisherStatus::default(),
        }
    }

    /// Reseeds the client id generator, done once the link is up.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn status(&self) -> &PublisherStatus {
        &self.status
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    fn next_client_id(&mut self) -> String {
        let suffix: u32 = self.rng.gen_range(0..0xffff);
        format!("{}{:x}", self.client_id_prefix, suffix)
    }

    /// Blocks until the broker accepts a session. Returns the number of attempts made.
    pub async fn ensure_connected(&mut self) -> u32 {
        let mut attempts = 0;

        while !self.session.is_connected() {
            attempts += 1;
            self.status.connect_attempts += 1;
            self.status.connection_state = ConnectionState::Connecting;

            let client_id = self.next_client_id();
            info!("Attempting MQTT connection as {}", client_id);

            match self.session.connect(&client_id).await {
                Ok(()) => {
                    info!("MQTT connected");
                    self.status.connection_state = ConnectionState::Connected;
                    self.status.last_activity = Some(Local::now());
                }
                Err(e) => {
                    warn!(
                        "MQTT connect failed, rc={} ({}), try again in {} seconds",
                        e.state_code(),
                        e,
                        self.backoff.as_secs()
                    );
                    self.status.last_error = Some(e.to_string());
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }

        attempts
    }

    pub async fn service(&mut self) {
        self.session.service().await;
        if !self.session.is_connected() {
            self.status.connection_state = ConnectionState::Disconnected;
        }
    }

    pub async fn publish(&mut self, topic: &str, payload: &str) -> Result<(), PublishError> {
        match self.session.publish(topic, payload.as_bytes()).await {
            Ok(()) => {
                info!("Telemetry data sent: {}", payload);
                self.status.messages_sent += 1;
                self.status.last_activity = Some(Local::now());
                Ok(())
            }
            Err(e) => {
                error!("Failed to send telemetry data: {}", e);
                self.status.publish_failures += 1;
                self.status.last_error = Some(e.to_string());
                if !self.session.is_connected() {
                    self.status.connection_state = ConnectionState::Disconnected;
                }
                Err(e)
            }
        }
    }
}
