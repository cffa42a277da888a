//! LAN discovery: UDP broadcast probe, answer probes point-to-point, collect responders into the peer table.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use lanshare_core::{DiscoveryMessage, PeerRecord, PeerTable};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::NodeError;
use crate::events::{emit, EventSender, NodeEvent};
use crate::interfaces;

/// Pause after a receive error so a persistent failure cannot spin.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(250);

/// Owns the discovery socket and the task answering it. Dropping it stops discovery.
pub struct Discovery {
    socket: Arc<UdpSocket>,
    peers: Arc<Mutex<PeerTable>>,
    events: EventSender,
    probe_target: SocketAddr,
    recv_task: JoinHandle<()>,
}

impl Discovery {
    /// Bind the discovery port, list local addresses, start answering, and send one probe.
    /// Bind failure is returned and also reported as an event; a failed probe is only reported.
    pub async fn start(
        discovery_port: u16,
        broadcast_addr: Ipv4Addr,
        peers: Arc<Mutex<PeerTable>>,
        events: EventSender,
    ) -> Result<Self, NodeError> {
        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, discovery_port));
        let socket = match make_broadcast_socket(bind_addr) {
            Ok(s) => Arc::new(s),
            Err(e) => {
                warn!(addr = %bind_addr, error = %e, "discovery bind failed");
                emit(
                    &events,
                    NodeEvent::DiscoveryFailed {
                        reason: format!("bind {}: {}", bind_addr, e),
                    },
                );
                return Err(NodeError::Bind {
                    what: "discovery",
                    addr: bind_addr,
                    source: e,
                });
            }
        };
        info!(addr = ?socket.local_addr().ok(), "discovery listening");

        let recv_task = tokio::spawn(recv_loop(socket.clone(), peers.clone(), events.clone()));
        let probe_target = SocketAddr::from((broadcast_addr, discovery_port));
        let discovery = Self {
            socket,
            peers,
            events,
            probe_target,
            recv_task,
        };
        discovery.add_local_peers().await;
        discovery.probe().await;
        Ok(discovery)
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Send a probe to a specific address instead of the broadcast target.
    pub async fn probe_to(&self, target: SocketAddr) {
        match self
            .socket
            .send_to(DiscoveryMessage::Probe.as_bytes(), target)
            .await
        {
            Ok(_) => debug!(%target, "probe sent"),
            Err(e) => {
                warn!(%target, error = %e, "probe send failed");
                emit(
                    &self.events,
                    NodeEvent::DiscoveryFailed {
                        reason: format!("probe to {}: {}", target, e),
                    },
                );
            }
        }
    }

    /// Broadcast one probe.
    pub async fn probe(&self) {
        self.probe_to(self.probe_target).await;
    }

    /// Forget every peer, list local addresses again, and re-probe.
    pub async fn reset(&self) {
        self.peers.lock().await.clear();
        self.add_local_peers().await;
        self.probe().await;
    }

    async fn add_local_peers(&self) {
        let added: Vec<PeerRecord> = {
            let mut table = self.peers.lock().await;
            interfaces::local_ipv4_addrs()
                .into_iter()
                .map(PeerRecord::local)
                .filter(|r| table.insert(r.clone()))
                .collect()
        };
        for peer in added {
            debug!(address = %peer.address, "listed local address");
            emit(&self.events, NodeEvent::PeerDiscovered { peer });
        }
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

/// UDP socket on `addr` with address reuse and broadcast enabled, so several instances can share the port.
fn make_broadcast_socket(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};

    let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    sock.set_reuse_address(true)?;
    sock.set_broadcast(true)?;
    sock.set_nonblocking(true)?;
    sock.bind(&addr.into())?;
    UdpSocket::from_std(sock.into())
}

async fn recv_loop(socket: Arc<UdpSocket>, peers: Arc<Mutex<PeerTable>>, events: EventSender) {
    let mut buf = vec![0u8; 2048];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, from)) => match DiscoveryMessage::parse(&buf[..n]) {
                Some(DiscoveryMessage::Probe) => {
                    debug!(%from, "probe received");
                    if let Err(e) = socket
                        .send_to(DiscoveryMessage::Response.as_bytes(), from)
                        .await
                    {
                        warn!(%from, error = %e, "response send failed");
                        emit(
                            &events,
                            NodeEvent::DiscoveryFailed {
                                reason: format!("response to {}: {}", from, e),
                            },
                        );
                    }
                }
                Some(DiscoveryMessage::Response) => {
                    let peer = PeerRecord::discovered(from.ip());
                    let is_new = peers.lock().await.insert(peer.clone());
                    if is_new {
                        info!(address = %peer.address, "peer discovered");
                        emit(&events, NodeEvent::PeerDiscovered { peer });
                    }
                }
                None => trace!(%from, len = n, "ignoring unknown datagram"),
            },
            Err(e) => {
                warn!(error = %e, "discovery receive failed");
                emit(
                    &events,
                    NodeEvent::DiscoveryFailed {
                        reason: format!("receive: {}", e),
                    },
                );
                tokio::time::sleep(RECV_ERROR_BACKOFF).await;
            }
        }
    }
}
