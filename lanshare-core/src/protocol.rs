//! Discovery wire protocol: probe/response tokens and the well-known ports.

/// Discovery UDP port shared by every instance.
pub const DEFAULT_DISCOVERY_PORT: u16 = 9999;
/// Transfer TCP port shared by every instance.
pub const DEFAULT_TRANSFER_PORT: u16 = 8888;

/// Broadcast by an instance looking for peers.
pub const PROBE_TOKEN: &[u8] = b"LAN_FILE_TRANSFER_DISCOVER";
/// Sent point-to-point back to whoever probed.
pub const RESPONSE_TOKEN: &[u8] = b"LAN_FILE_TRANSFER_RESPONSE";

/// Datagrams understood on the discovery port. Anything else is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMessage {
    Probe,
    Response,
}

impl DiscoveryMessage {
    /// Parse a datagram payload. Only an exact token match is accepted.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload == PROBE_TOKEN {
            Some(DiscoveryMessage::Probe)
        } else if payload == RESPONSE_TOKEN {
            Some(DiscoveryMessage::Response)
        } else {
            None
        }
    }

    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            DiscoveryMessage::Probe => PROBE_TOKEN,
            DiscoveryMessage::Response => RESPONSE_TOKEN,
        }
    }
}
