//! In-memory stand-ins for the station, broker and sensors used by unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::mqtt::{BrokerSession, ConnectError, PublishError};
use crate::network::{LinkError, LinkStatus, Station};
use crate::telemetry::sensors::{SensorError, SensorSuite};

#[derive(Clone, Default, Debug)]
pub struct Counter(Arc<AtomicU32>);

impl Counter {
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Station that reports `Connected` from a given poll onwards, or never.
pub struct ScriptedStation {
    connect_on_poll: Option<u32>,
    fail_begin: bool,
    polls: Counter,
}

impl ScriptedStation {
    pub fn never_connects() -> Self {
        Self {
            connect_on_poll: None,
            fail_begin: false,
            polls: Counter::default(),
        }
    }

    pub fn connects_on_poll(poll: u32) -> Self {
        Self {
            connect_on_poll: Some(poll),
            ..Self::never_connects()
        }
    }

    pub fn failing_begin(mut self) -> Self {
        self.fail_begin = true;
        self
    }

    pub fn polls(&self) -> Counter {
        self.polls.clone()
    }
}

#[async_trait]
impl Station for ScriptedStation {
    async fn begin(&mut self, _ssid: &str, _passphrase: &str) -> Result<(), LinkError> {
        if self.fail_begin {
            return Err(LinkError::Backend("radio off".into()));
        }
        Ok(())
    }

    async fn status(&mut self) -> LinkStatus {
        let poll = self.polls.bump();
        match self.connect_on_poll {
            Some(target) if poll >= target => LinkStatus::Connected,
            _ => LinkStatus::Connecting,
        }
    }

    async fn local_addr(&mut self) -> Option<IpAddr> {
        Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50)))
    }
}

#[derive(Default, Debug)]
struct BrokerRecord {
    client_ids: Vec<String>,
    publishes: Vec<(String, String)>,
    publish_attempts: u32,
}

/// Shared view on what a [`ScriptedBroker`] saw, kept after the broker is moved away.
#[derive(Clone, Default, Debug)]
pub struct BrokerLog(Arc<Mutex<BrokerRecord>>);

impl BrokerLog {
    pub fn client_ids(&self) -> Vec<String> {
        self.0.lock().unwrap().client_ids.clone()
    }

    pub fn publishes(&self) -> Vec<(String, String)> {
        self.0.lock().unwrap().publishes.clone()
    }

    pub fn publish_attempts(&self) -> u32 {
        self.0.lock().unwrap().publish_attempts
    }
}

/// Broker that plays back scripted connect refusals and publish failures.
#[derive(Default)]
pub struct ScriptedBroker {
    refusals: VecDeque<ConnectError>,
    unreachable: bool,
    connected: bool,
    failing_publishes: u32,
    log: BrokerLog,
}

impl ScriptedBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected(mut self) -> Self {
        self.connected = true;
        self
    }

    pub fn refuse_connects(mut self, refusals: Vec<ConnectError>) -> Self {
        self.refusals = refusals.into();
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// The next `count` publishes fail and drop the session.
    pub fn fail_publishes(mut self, count: u32) -> Self {
        self.failing_publishes = count;
        self
    }

    pub fn log(&self) -> BrokerLog {
        self.log.clone()
    }
}

#[async_trait]
impl BrokerSession for ScriptedBroker {
    async fn connect(&mut self, client_id: &str) -> Result<(), ConnectError> {
        self.log.0.lock().unwrap().client_ids.push(client_id.to_string());

        if self.unreachable {
            return Err(ConnectError::Transport("connection refused".into()));
        }
        if let Some(refusal) = self.refusals.pop_front() {
            return Err(refusal);
        }
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        let mut record = self.log.0.lock().unwrap();
        record.publish_attempts += 1;

        if !self.connected {
            return Err(PublishError::NotConnected);
        }
        if self.failing_publishes > 0 {
            self.failing_publishes -= 1;
            self.connected = false;
            return Err(PublishError::Failed("broker closed connection".into()));
        }

        record.publishes.push((
            topic.to_string(),
            String::from_utf8_lossy(payload).into_owned(),
        ));
        Ok(())
    }
}

/// Sensor suite whose temperature sensor is missing.
pub struct BrokenSensors;

impl SensorSuite for BrokenSensors {
    fn read_temperature(&mut self) -> Result<f32, SensorError> {
        Err(SensorError::Read {
            path: PathBuf::from("/sys/bus/iio/devices/iio:device0/in_temp_input"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })
    }

    fn read_humidity(&mut self) -> Result<f32, SensorError> {
        Ok(50.0)
    }

    fn read_co2(&mut self) -> Result<f32, SensorError> {
        Ok(400.0)
    }

    fn read_pm25(&mut self) -> Result<i32, SensorError> {
        Ok(5)
    }
}
