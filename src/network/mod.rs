//! # Network Link
//!
//! Brings the WiFi station up once at boot. The connector issues a single association
//! request and then polls the station until it reports [`LinkStatus::Connected`] or the
//! retry budget runs out.
//!
//! ```text
//! begin ──► poll ──► connected? ──yes──► LinkUp
//!             ▲          │no
//!             │     sleep, retries += 1
//!             │          │
//!             └── retries <= max ──► Exhausted
//! ```
//!
//! With the default settings (500ms, 20 retries) that means 21 polls over roughly
//! 10.5 seconds before the connector gives up. Giving up is reported, not acted on:
//! the supervisor decides what a restart looks like.

pub mod nmcli;

use async_trait::async_trait;
use std::net::IpAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use nmcli::NmcliStation;

/// Association state as reported by a station backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    Unavailable,
    Disconnected,
    Connecting,
    Connected,
    ConnectFailed,
    Unknown,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Failed to join '{ssid}' after {retries} retries")]
    Exhausted { ssid: String, retries: u32 },

    #[error("Station backend error: {0}")]
    Backend(String),
}

/// A WiFi interface operating in station mode.
#[async_trait]
pub trait Station: Send {
    /// Starts associating with `ssid`. Returns once the request is issued.
    async fn begin(&mut self, ssid: &str, passphrase: &str) -> Result<(), LinkError>;

    async fn status(&mut self) -> LinkStatus;

    async fn local_addr(&mut self) -> Option<IpAddr>;
}

/// Outcome of a successful association.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkUp {
    pub addr: Option<IpAddr>,
    /// Seed for downstream random identifiers, taken from the microsecond clock
    pub seed: u64,
}

pub struct NetworkConnector {
    station: Box<dyn Station>,
    poll_interval: Duration,
    max_retries: u32,
}

impl NetworkConnector {
    pub fn new(station: Box<dyn Station>, poll_interval: Duration, max_retries: u32) -> Self {
        Self {
            station,
            poll_interval,
            max_retries,
        }
    }

    pub async fn connect(&mut self, ssid: &str, passphrase: &str) -> Result<LinkUp, LinkError> {
        info!("Connecting to {}", ssid);

        if let Err(e) = self.station.begin(ssid, passphrase).await {
            warn!("Association request failed: {}", e);
        }

        let mut retries = 0;
        loop {
            let status = self.station.status().await;
            if status == LinkStatus::Connected {
                break;
            }

            tokio::time::sleep(self.poll_interval).await;
            retries += 1;
            debug!("Link status {:?}, retry {}/{}", status, retries, self.max_retries);

            if retries > self.max_retries {
                error!("Failed to connect to WiFi, restart required");
                return Err(LinkError::Exhausted {
                    ssid: ssid.to_string(),
                    retries,
                });
            }
        }

        let seed = clock_seed();
        let addr = self.station.local_addr().await;
        match addr {
            Some(ip) => info!("WiFi connected, IP address: {}", ip),
            None => info!("WiFi connected, IP address unknown"),
        }

        Ok(LinkUp { addr, seed })
    }
}

/// Microseconds since the epoch, used to seed random generators.
pub(crate) fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedStation;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_twenty_first_failed_poll() {
        let station = ScriptedStation::never_connects();
        let polls = station.polls();
        let mut connector =
            NetworkConnector::new(Box::new(station), Duration::from_millis(500), 20);

        let started = Instant::now();
        let result = connector.connect("lab", "secret").await;

        match result {
            Err(LinkError::Exhausted { ssid, retries }) => {
                assert_eq!(ssid, "lab");
                assert_eq!(retries, 21);
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(polls.get(), 21);
        assert_eq!(started.elapsed(), Duration::from_millis(21 * 500));
    }

    #[tokio::test(start_paused = true)]
    async fn connects_on_a_late_poll() {
        let station = ScriptedStation::connects_on_poll(5);
        let polls = station.polls();
        let mut connector =
            NetworkConnector::new(Box::new(station), Duration::from_millis(500), 20);

        let started = Instant::now();
        let link = connector.connect("lab", "secret").await.unwrap();

        assert_eq!(polls.get(), 5);
        assert_eq!(started.elapsed(), Duration::from_millis(4 * 500));
        assert_eq!(link.addr, Some("192.168.1.50".parse().unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn last_allowed_poll_still_connects() {
        let station = ScriptedStation::connects_on_poll(21);
        let mut connector =
            NetworkConnector::new(Box::new(station), Duration::from_millis(500), 20);

        assert!(connector.connect("lab", "secret").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn begin_failure_does_not_stop_polling() {
        let station = ScriptedStation::connects_on_poll(2).failing_begin();
        let polls = station.polls();
        let mut connector =
            NetworkConnector::new(Box::new(station), Duration::from_millis(500), 20);

        assert!(connector.connect("lab", "secret").await.is_ok());
        assert_eq!(polls.get(), 2);
    }

    #[test]
    fn clock_seed_follows_the_microsecond_clock() {
        let before = clock_seed();
        std::thread::sleep(Duration::from_millis(2));
        let after = clock_seed();

        assert!(before > 0);
        assert!(after - before >= 2_000, "{} -> {}", before, after);
    }
}
