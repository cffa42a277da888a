//! LAN file transfer node: broadcast discovery, transfer listener and sender on tokio.
//! Protocol state lives in `lanshare_core`; this crate owns the sockets and files.

pub mod acceptor;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod history;
pub mod interfaces;
pub mod node;
pub mod sender;

pub use config::Config;
pub use error::NodeError;
pub use events::{EventReceiver, EventSender, NodeEvent};
pub use history::{HistoryEntry, TransferHistory};
pub use node::{Node, OutboundHandle};
