//! Outermost loop of the process.
//!
//! Assembles a node, drives it online and keeps it running. A node that reports
//! [`NodeError::RestartRequired`] is dropped together with everything it owns and a
//! freshly assembled one takes its place.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::node::{Booting, Node};

pub struct Supervisor {
    shutdown: CancellationToken,
    restart_delay: Duration,
    restarts: u32,
}

impl Supervisor {
    pub fn new(shutdown: CancellationToken, restart_delay: Duration) -> Self {
        Self {
            shutdown,
            restart_delay,
            restarts: 0,
        }
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Runs nodes produced by `assemble` until shutdown is requested.
    pub async fn run<F>(&mut self, mut assemble: F)
    where
        F: FnMut() -> Node<Booting>,
    {
        while !self.shutdown.is_cancelled() {
            let node = assemble().start();

            let connected = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = node.connect() => result,
            };

            match connected {
                Ok(node) => {
                    let status = node.run(self.shutdown.clone()).await;
                    info!("Node stopped: {}", status.summary());
                    break;
                }
                Err(e) => {
                    self.restarts += 1;
                    error!("{}, restarting node (restart #{})", e, self.restarts);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.restart_delay) => {}
                    }
                }
            }
        }
    }
}
