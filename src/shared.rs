use crate::packet::Packet;

use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

/// Protocol-level identifier for an Association: the verification tag this
/// side expects in every inbound packet.
pub type AssociationId = u32;

/// Explicit congestion notification codepoint
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EcnCodepoint {
    #[doc(hidden)]
    Ect0 = 0b10,
    #[doc(hidden)]
    Ect1 = 0b01,
    #[doc(hidden)]
    Ce = 0b11,
}

impl EcnCodepoint {
    /// Create new object from the given bits
    pub fn from_bits(x: u8) -> Option<Self> {
        use self::EcnCodepoint::*;
        Some(match x & 0b11 {
            0b10 => Ect0,
            0b01 => Ect1,
            0b11 => Ce,
            _ => {
                return None;
            }
        })
    }

    /// Congestion Experienced
    pub fn is_ce(self) -> bool {
        self == EcnCodepoint::Ce
    }
}

/// Incoming/outgoing Transmit
#[derive(Debug, Clone)]
pub struct Transmit {
    /// Received/Sent time
    pub now: Instant,
    /// The peer address this datagram came from or should be sent to
    pub remote: SocketAddr,
    /// Explicit congestion notification bits to set on (or read from) the packet
    pub ecn: Option<EcnCodepoint>,
    /// Optional local IP address for the datagram
    pub local_ip: Option<IpAddr>,
    /// The SCTP packet
    pub packet: Packet,
}
