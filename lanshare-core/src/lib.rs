//! LAN file transfer protocol core.
//! Host-driven: no sockets, no runtime; the host moves bytes and acts on what the core returns.

pub mod error;
pub mod event;
pub mod integrity;
pub mod peers;
pub mod progress;
pub mod protocol;
pub mod receiver;
pub mod wire;

pub use error::TransferError;
pub use event::{Direction, TransferEvent, TransferId, TransferOutcome};
pub use peers::{PeerOrigin, PeerRecord, PeerTable};
pub use progress::{percent, ProgressSnapshot, TransferCounters};
pub use protocol::{DiscoveryMessage, DEFAULT_DISCOVERY_PORT, DEFAULT_TRANSFER_PORT};
pub use receiver::{resolve_destination, Feed, InboundTransfer, Phase, Progress};
pub use wire::{
    decode_header, encode_header, HeaderDecodeError, HeaderEncodeError, MalformedHeader,
    TransferHeader,
};

/// Reference chunk size for streaming file bodies.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;
