//! NetworkManager backed station.
//!
//! Talks to NetworkManager through `nmcli` in terse mode. The association request runs
//! as a child process so `begin` returns immediately, like a radio driver would.

use async_trait::async_trait;
use std::net::IpAddr;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::{LinkError, LinkStatus, Station};

pub struct NmcliStation {
    interface: String,
    pending: Option<Child>,
}

impl NmcliStation {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            pending: None,
        }
    }

    fn reap_pending(&mut self) {
        let Some(child) = self.pending.as_mut() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    warn!("nmcli connect on {} exited with {}", self.interface, status);
                }
                self.pending = None;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Lost track of nmcli connect: {}", e);
                self.pending = None;
            }
        }
    }
}

#[async_trait]
impl Station for NmcliStation {
    async fn begin(&mut self, ssid: &str, passphrase: &str) -> Result<(), LinkError> {
        let mut command = Command::new("nmcli");
        command.args(["device", "wifi", "connect", ssid]);
        if !passphrase.is_empty() {
            command.args(["password", passphrase]);
        }
        command
            .args(["ifname", self.interface.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| LinkError::Backend(format!("failed to spawn nmcli: {}", e)))?;
        self.pending = Some(child);
        Ok(())
    }

    async fn status(&mut self) -> LinkStatus {
        self.reap_pending();
        match device_field(&self.interface, "GENERAL.STATE").await {
            Some(raw) => parse_device_state(&raw),
            None => LinkStatus::Unknown,
        }
    }

    async fn local_addr(&mut self) -> Option<IpAddr> {
        let raw = device_field(&self.interface, "IP4.ADDRESS").await?;
        parse_ip4_address(&raw)
    }
}

async fn device_field(interface: &str, field: &str) -> Option<String> {
    let output = Command::new("nmcli")
        .args(["-t", "-g", field, "device", "show", interface])
        .stdin(Stdio::null())
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => Some(String::from_utf8_lossy(&out.stdout).into_owned()),
        Ok(out) => {
            debug!("nmcli {} on {} exited with {}", field, interface, out.status);
            None
        }
        Err(e) => {
            warn!("Failed to run nmcli: {}", e);
            None
        }
    }
}

/// Maps `GENERAL.STATE` output such as `100 (connected)` to a link status.
pub fn parse_device_state(raw: &str) -> LinkStatus {
    let code = raw
        .split_whitespace()
        .next()
        .and_then(|c| c.parse::<u32>().ok());

    match code {
        Some(100) => LinkStatus::Connected,
        Some(40..=90) => LinkStatus::Connecting,
        Some(120) => LinkStatus::ConnectFailed,
        Some(30) | Some(110) => LinkStatus::Disconnected,
        Some(10) | Some(20) => LinkStatus::Unavailable,
        _ => LinkStatus::Unknown,
    }
}

/// First address of `IP4.ADDRESS`, e.g. `192.168.1.7/24 | 10.0.0.2/8`.
pub fn parse_ip4_address(raw: &str) -> Option<IpAddr> {
    raw.split(['|', '\n'])
        .map(str::trim)
        .find(|entry| !entry.is_empty())
        .and_then(|entry| entry.split('/').next())
        .and_then(|addr| addr.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_states() {
        assert_eq!(parse_device_state("100 (connected)\n"), LinkStatus::Connected);
        assert_eq!(
            parse_device_state("70 (connecting (getting IP configuration))"),
            LinkStatus::Connecting
        );
        assert_eq!(parse_device_state("120 (failed)"), LinkStatus::ConnectFailed);
        assert_eq!(parse_device_state("30 (disconnected)"), LinkStatus::Disconnected);
        assert_eq!(parse_device_state("20 (unavailable)"), LinkStatus::Unavailable);
        assert_eq!(parse_device_state(""), LinkStatus::Unknown);
        assert_eq!(parse_device_state("garbage"), LinkStatus::Unknown);
    }

    #[test]
    fn first_ip4_address_without_prefix() {
        assert_eq!(
            parse_ip4_address("192.168.1.7/24\n"),
            Some("192.168.1.7".parse().unwrap())
        );
        assert_eq!(
            parse_ip4_address("10.0.0.2/8 | 172.16.0.1/12"),
            Some("10.0.0.2".parse().unwrap())
        );
        assert_eq!(parse_ip4_address("\n"), None);
        assert_eq!(parse_ip4_address("not-an-ip/24"), None);
    }
}
