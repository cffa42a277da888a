//! Events the node delivers to its controller over one unbounded channel, in emission order.

use lanshare_core::{PeerRecord, TransferEvent};
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeEvent {
    /// A new address answered a probe (or a local interface was listed).
    PeerDiscovered { peer: PeerRecord },
    /// Discovery socket error; discovery keeps running but may find nothing.
    DiscoveryFailed { reason: String },
    /// Accept error on the transfer listener.
    AcceptFailed { reason: String },
    Transfer(TransferEvent),
}

pub type EventSender = mpsc::UnboundedSender<NodeEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<NodeEvent>;

/// Send, ignoring a controller that stopped listening.
pub(crate) fn emit(events: &EventSender, event: NodeEvent) {
    let _ = events.send(event);
}
