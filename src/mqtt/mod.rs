//! # MQTT Telemetry Session
//!
//! Everything between a built payload and the broker. The module is split in two:
//!
//! ```text
//! mqtt/
//! ├── publisher.rs  - reconnect loop, client ids, publish bookkeeping
//! └── session.rs    - rumqttc-backed broker session
//! ```
//!
//! The publisher only sees the [`BrokerSession`] trait, so the reconnect and publish
//! policy can be exercised against a scripted broker in tests.
//!
//! ## Status Codes
//!
//! Connect failures are logged with a single numeric code, following the convention
//! used by small MQTT clients:
//!
//! | code | meaning                              |
//! |------|--------------------------------------|
//! | -4   | no CONNACK within the connect timeout |
//! | -2   | transport failure (DNS, TCP, I/O)    |
//! | 1..5 | CONNACK refusal reported by broker   |

pub mod publisher;
pub mod session;

use async_trait::async_trait;
use thiserror::Error;

pub use publisher::TelemetryPublisher;
pub use session::{BrokerSettings, RumqttSession};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Broker did not acknowledge the connection in time")]
    Timeout,

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Broker refused the connection (code {0})")]
    Refused(u8),
}

impl ConnectError {
    /// Raw status code for diagnostics.
    pub fn state_code(&self) -> i16 {
        match self {
            ConnectError::Timeout => -4,
            ConnectError::Transport(_) => -2,
            ConnectError::Refused(code) => i16::from(*code),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("Not connected to broker")]
    NotConnected,

    #[error("Publish was not written within the timeout")]
    Timeout,

    #[error("Publish failed: {0}")]
    Failed(String),
}

/// A single broker session. Implementations own their transport.
#[async_trait]
pub trait BrokerSession: Send {
    /// Performs a full CONNECT handshake using `client_id`.
    async fn connect(&mut self, client_id: &str) -> Result<(), ConnectError>;

    fn is_connected(&self) -> bool;

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError>;

    /// Processes pending inbound traffic. Detects drops between publishes.
    async fn service(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_codes() {
        assert_eq!(ConnectError::Timeout.state_code(), -4);
        assert_eq!(ConnectError::Transport("dns".into()).state_code(), -2);
        assert_eq!(ConnectError::Refused(5).state_code(), 5);
    }
}
