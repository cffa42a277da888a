//! The object a UI holds: owns the peer table, the discovery socket, the transfer listener and
//! the outbound slot. Build one per process and share it by reference.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use lanshare_core::{
    Direction, PeerRecord, PeerTable, ProgressSnapshot, TransferCounters, TransferError,
    TransferId, TransferOutcome,
};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::acceptor::{Acceptor, InboundSlot};
use crate::config::Config;
use crate::discovery::Discovery;
use crate::error::NodeError;
use crate::events::{EventReceiver, EventSender};
use crate::history::{HistoryEntry, TransferHistory};
use crate::sender::{self, SendJob};

#[derive(Debug, Clone)]
struct ActiveOutbound {
    id: TransferId,
    counters: Arc<TransferCounters>,
}

/// Handle to a running outbound transfer. Events for it arrive on the node's event channel.
pub struct OutboundHandle {
    id: TransferId,
    counters: Arc<TransferCounters>,
    task: JoinHandle<TransferOutcome>,
}

impl OutboundHandle {
    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.counters.snapshot()
    }

    /// Wait for the terminal outcome.
    pub async fn wait(self) -> TransferOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => TransferOutcome::failed(
                TransferError::Io {
                    reason: format!("send worker stopped: {}", e),
                },
                self.counters.bytes_done(),
                self.counters.total_bytes(),
            ),
        }
    }
}

pub struct Node {
    config: Config,
    events: EventSender,
    peers: Arc<Mutex<PeerTable>>,
    history: TransferHistory,
    discovery: Mutex<Option<Discovery>>,
    acceptor: Mutex<Option<Acceptor>>,
    outbound: Arc<Mutex<Option<ActiveOutbound>>>,
    inbound: InboundSlot,
}

impl Node {
    /// Create a node and the receiving end of its event channel.
    pub fn new(config: Config) -> (Self, EventReceiver) {
        let (events, rx) = mpsc::unbounded_channel();
        let node = Self {
            config,
            events,
            peers: Arc::new(Mutex::new(PeerTable::new())),
            history: TransferHistory::new(),
            discovery: Mutex::new(None),
            acceptor: Mutex::new(None),
            outbound: Arc::new(Mutex::new(None)),
            inbound: Arc::new(Mutex::new(None)),
        };
        (node, rx)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bind the discovery port (first call only) and broadcast a probe.
    /// Returns the local discovery address.
    pub async fn start_discovery(&self) -> Result<SocketAddr, NodeError> {
        let mut slot = self.discovery.lock().await;
        if let Some(d) = slot.as_ref() {
            d.probe().await;
            return Ok(discovery_addr(d, self.config.discovery_port));
        }
        let d = Discovery::start(
            self.config.discovery_port,
            self.config.broadcast_addr,
            self.peers.clone(),
            self.events.clone(),
        )
        .await?;
        let addr = discovery_addr(&d, self.config.discovery_port);
        *slot = Some(d);
        Ok(addr)
    }

    /// Probe one address directly (e.g. a peer on another subnet, or loopback in tests).
    /// No-op if discovery is not running.
    pub async fn probe(&self, target: SocketAddr) {
        if let Some(d) = self.discovery.lock().await.as_ref() {
            d.probe_to(target).await;
        }
    }

    /// Clear the peer list and probe again. Starts discovery if needed.
    pub async fn reset_discovery(&self) -> Result<(), NodeError> {
        let started = self.discovery.lock().await.is_some();
        if !started {
            self.start_discovery().await?;
            return Ok(());
        }
        if let Some(d) = self.discovery.lock().await.as_ref() {
            d.reset().await;
        }
        Ok(())
    }

    pub async fn known_peers(&self) -> Vec<PeerRecord> {
        self.peers.lock().await.list()
    }

    /// Start accepting incoming transfers (first call only). Returns the listening address.
    pub async fn start_acceptor(&self) -> Result<SocketAddr, NodeError> {
        let mut slot = self.acceptor.lock().await;
        if let Some(a) = slot.as_ref() {
            return Ok(a.local_addr());
        }
        let a = Acceptor::bind(
            self.config.transfer_port,
            self.config.download_dir.clone(),
            self.events.clone(),
            self.history.clone(),
            self.inbound.clone(),
        )
        .await?;
        let addr = a.local_addr();
        *slot = Some(a);
        Ok(addr)
    }

    /// Send a file to a peer's transfer port.
    pub async fn send_file(
        &self,
        peer: IpAddr,
        path: impl Into<PathBuf>,
    ) -> Result<OutboundHandle, NodeError> {
        self.send_file_to(SocketAddr::new(peer, self.config.transfer_port), path)
            .await
    }

    /// Send a file to an explicit address. Fails with `Busy` while another send is running;
    /// every other failure is reported by the transfer's terminal event.
    pub async fn send_file_to(
        &self,
        addr: SocketAddr,
        path: impl Into<PathBuf>,
    ) -> Result<OutboundHandle, NodeError> {
        let mut slot = self.outbound.lock().await;
        if slot.is_some() {
            return Err(NodeError::Busy);
        }
        let job = SendJob {
            id: TransferId::new(),
            peer: addr,
            path: path.into(),
            chunk_size: self.config.chunk_size(),
            connect_timeout: self.config.connect_timeout(),
        };
        let counters = Arc::new(TransferCounters::default());
        *slot = Some(ActiveOutbound {
            id: job.id,
            counters: counters.clone(),
        });
        debug!(id = %job.id, peer = %addr, path = %job.path.display(), "send queued");

        let id = job.id;
        let outbound = self.outbound.clone();
        let history = self.history.clone();
        let events = self.events.clone();
        let worker_counters = counters.clone();
        let task = tokio::spawn(async move {
            let outcome = sender::run_send(job.clone(), worker_counters, events.clone()).await;
            // Free the slot before the terminal event so the controller can send again right away.
            *outbound.lock().await = None;
            if outcome.success {
                history
                    .record(HistoryEntry {
                        id: job.id,
                        direction: Direction::Outbound,
                        peer: job.peer,
                        file_name: job
                            .path
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                        bytes: outcome.bytes_transferred,
                        path: job.path.clone(),
                    })
                    .await;
            }
            sender::finish(job.id, &outcome, &events);
            outcome
        });
        Ok(OutboundHandle { id, counters, task })
    }

    /// Progress of the running outbound transfer, if any.
    pub async fn outbound_progress(&self) -> Option<(TransferId, ProgressSnapshot)> {
        self.outbound
            .lock()
            .await
            .as_ref()
            .map(|a| (a.id, a.counters.snapshot()))
    }

    /// Progress of the inbound transfer being received, if any.
    pub async fn inbound_progress(&self) -> Option<(TransferId, ProgressSnapshot)> {
        self.inbound
            .lock()
            .await
            .as_ref()
            .map(|a| (a.id, a.counters.snapshot()))
    }

    /// Files moved successfully so far, oldest first.
    pub async fn transfer_history(&self) -> Vec<HistoryEntry> {
        self.history.entries().await
    }
}

fn discovery_addr(d: &Discovery, port: u16) -> SocketAddr {
    d.local_addr()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)))
}
