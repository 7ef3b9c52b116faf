//! ConnectivityMonitor 実装
//!
//! - ManualConnectivity: ホスト（OS コールバック、テスト）が状態を設定する
//! - PollingConnectivity: Probe を一定間隔で実行し、変化だけを通知する

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::ports::ConnectivityMonitor;

/// Connectivity set from outside.
#[derive(Debug)]
pub struct ManualConnectivity {
    tx: watch::Sender<bool>,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Publish a new state. Returns `true` if it differs from the current one;
    /// repeating the same state does not wake subscribers.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if changed {
            info!(online, "connectivity changed");
        }
        changed
    }
}

impl ConnectivityMonitor for ManualConnectivity {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// One reachability check.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self) -> bool;
}

/// Online if a TCP connection to `addr` opens within `timeout`.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: SocketAddr,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn check(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(self.addr)).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(err)) => {
                debug!(addr = %self.addr, error = %err, "probe connect failed");
                false
            }
            Err(_) => {
                debug!(addr = %self.addr, timeout = ?self.timeout, "probe timed out");
                false
            }
        }
    }
}

/// Runs a probe on a fixed interval and publishes transitions.
///
/// The background task stops when this value is dropped.
pub struct PollingConnectivity {
    state: Arc<ManualConnectivity>,
    task: JoinHandle<()>,
}

impl PollingConnectivity {
    /// Must be called inside a tokio runtime.
    pub fn spawn(probe: Arc<dyn Probe>, interval: Duration, initial: bool) -> Self {
        let state = Arc::new(ManualConnectivity::new(initial));
        let publisher = Arc::clone(&state);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let online = probe.check().await;
                publisher.set_online(online);
            }
        });

        Self { state, task }
    }
}

impl ConnectivityMonitor for PollingConnectivity {
    fn is_online(&self) -> bool {
        self.state.is_online()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

impl Drop for PollingConnectivity {
    fn drop(&mut self) {
        self.task.abort();
    }
}
