use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS,
};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use super::{BrokerSession, ConnectError, PublishError};
use crate::config::MqttConfig;

/// Time given to inbound traffic on every service call.
const SERVICE_WINDOW: Duration = Duration::from_millis(50);

/// Request channel capacity between client handle and event loop.
const REQUEST_CAPACITY: usize = 10;

#[derive(Clone, Debug, PartialEq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub access_token: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
}

impl From<&MqttConfig> for BrokerSettings {
    fn from(config: &MqttConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            access_token: config.access_token.clone(),
            keep_alive: Duration::from_secs(config.keep_alive_secs),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            publish_timeout: Duration::from_secs(config.publish_timeout_secs),
        }
    }
}

impl BrokerSettings {
    pub fn options(&self, client_id: &str) -> MqttOptions {
        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options
            .set_keep_alive(self.keep_alive)
            .set_clean_session(true)
            // access token as username, empty password is left out of CONNECT
            .set_credentials(self.access_token.clone(), "");
        options
    }
}

/// Broker session over plain TCP, driven inline from the control loop.
///
/// Every connect attempt builds a fresh client and event loop, so a new client id
/// takes effect immediately and no state leaks from a failed session.
pub struct RumqttSession {
    settings: BrokerSettings,
    link: Option<(AsyncClient, EventLoop)>,
}

impl RumqttSession {
    pub fn new(settings: BrokerSettings) -> Self {
        Self {
            settings,
            link: None,
        }
    }

    fn drop_link(&mut self, reason: &ConnectionError) {
        warn!("MQTT session lost: {}", reason);
        self.link = None;
    }
}

fn refusal_code(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}

fn connect_error(error: ConnectionError) -> ConnectError {
    match error {
        ConnectionError::ConnectionRefused(code) => ConnectError::Refused(refusal_code(code)),
        ConnectionError::NetworkTimeout => ConnectError::Timeout,
        other => ConnectError::Transport(other.to_string()),
    }
}

async fn await_connack(eventloop: &mut EventLoop) -> Result<(), ConnectError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(ConnectError::Refused(refusal_code(code))),
                };
            }
            Ok(event) => trace!("mqtt event before CONNACK: {:?}", event),
            Err(e) => return Err(connect_error(e)),
        }
    }
}

async fn await_outgoing_publish(eventloop: &mut EventLoop) -> Result<(), ConnectionError> {
    loop {
        match eventloop.poll().await? {
            Event::Outgoing(Outgoing::Publish(_)) => return Ok(()),
            event => trace!("mqtt event: {:?}", event),
        }
    }
}

#[async_trait]
impl BrokerSession for RumqttSession {
    async fn connect(&mut self, client_id: &str) -> Result<(), ConnectError> {
        self.link = None;
        debug!(
            "Connecting to {}:{} as {}",
            self.settings.host, self.settings.port, client_id
        );

        let (client, mut eventloop) =
            AsyncClient::new(self.settings.options(client_id), REQUEST_CAPACITY);

        match timeout(self.settings.connect_timeout, await_connack(&mut eventloop)).await {
            Ok(Ok(())) => {
                self.link = Some((client, eventloop));
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ConnectError::Timeout),
        }
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        let Some((client, eventloop)) = self.link.as_mut() else {
            return Err(PublishError::NotConnected);
        };

        client
            .publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .await
            .map_err(|e| PublishError::Failed(e.to_string()))?;

        match timeout(self.settings.publish_timeout, await_outgoing_publish(eventloop)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                let error = PublishError::Failed(e.to_string());
                self.drop_link(&e);
                Err(error)
            }
            Err(_) => {
                warn!("MQTT publish timed out, dropping session");
                self.link = None;
                Err(PublishError::Timeout)
            }
        }
    }

    async fn service(&mut self) {
        let Some((_, eventloop)) = self.link.as_mut() else {
            return;
        };

        loop {
            match timeout(SERVICE_WINDOW, eventloop.poll()).await {
                Err(_) => break,
                Ok(Ok(event)) => trace!("mqtt event: {:?}", event),
                Ok(Err(e)) => {
                    self.drop_link(&e);
                    break;
                }
            }
        }
    }
}
