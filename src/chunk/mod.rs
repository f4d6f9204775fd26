#[cfg(test)]
mod chunk_test;

pub mod chunk_abort;
pub mod chunk_cookie_echo;
pub mod chunk_ecn;
pub mod chunk_heartbeat;
pub mod chunk_init;
pub mod chunk_payload_data;
pub mod chunk_selective_ack;
pub mod chunk_shutdown;
pub mod chunk_type;

use chunk_abort::{ChunkAbort, ChunkError};
use chunk_cookie_echo::ChunkCookieEcho;
use chunk_ecn::{ChunkCwr, ChunkEcne};
use chunk_heartbeat::ChunkHeartbeat;
use chunk_init::ChunkInit;
use chunk_payload_data::{ChunkPayloadData, PAYLOAD_DATA_HEADER_SIZE};
use chunk_selective_ack::{ChunkSelectiveAck, SELECTIVE_ACK_HEADER_SIZE};
use chunk_shutdown::ChunkShutdown;
use chunk_type::*;

use std::fmt;

pub(crate) const CHUNK_HEADER_SIZE: usize = 4;

/// Chunk is a single SCTP message unit. Several chunks may share a packet.
///
/// Encoding to and from the wire happens outside of this crate; the engine
/// only ever deals with decoded chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    PayloadData(ChunkPayloadData),
    Init(ChunkInit),
    InitAck(ChunkInit),
    Sack(ChunkSelectiveAck),
    Heartbeat(ChunkHeartbeat),
    HeartbeatAck(ChunkHeartbeat),
    Abort(ChunkAbort),
    Shutdown(ChunkShutdown),
    ShutdownAck,
    Error(ChunkError),
    CookieEcho(ChunkCookieEcho),
    CookieAck,
    Ecne(ChunkEcne),
    Cwr(ChunkCwr),
    ShutdownComplete,
    Unknown(ChunkType),
}

impl Chunk {
    pub fn chunk_type(&self) -> ChunkType {
        match self {
            Chunk::PayloadData(_) => CT_PAYLOAD_DATA,
            Chunk::Init(_) => CT_INIT,
            Chunk::InitAck(_) => CT_INIT_ACK,
            Chunk::Sack(_) => CT_SACK,
            Chunk::Heartbeat(_) => CT_HEARTBEAT,
            Chunk::HeartbeatAck(_) => CT_HEARTBEAT_ACK,
            Chunk::Abort(_) => CT_ABORT,
            Chunk::Shutdown(_) => CT_SHUTDOWN,
            Chunk::ShutdownAck => CT_SHUTDOWN_ACK,
            Chunk::Error(_) => CT_ERROR,
            Chunk::CookieEcho(_) => CT_COOKIE_ECHO,
            Chunk::CookieAck => CT_COOKIE_ACK,
            Chunk::Ecne(_) => CT_ECNE,
            Chunk::Cwr(_) => CT_CWR,
            Chunk::ShutdownComplete => CT_SHUTDOWN_COMPLETE,
            Chunk::Unknown(typ) => *typ,
        }
    }

    /// Approximate on-the-wire size, used to bundle chunks into a packet
    pub(crate) fn encoded_len(&self) -> usize {
        let value = match self {
            Chunk::PayloadData(d) => PAYLOAD_DATA_HEADER_SIZE + d.user_data.len(),
            Chunk::Init(i) | Chunk::InitAck(i) => {
                16 + i.addresses.len() * 20
                    + i.state_cookie.as_ref().map_or(0, |c| 4 + c.len())
            }
            Chunk::Sack(s) => {
                SELECTIVE_ACK_HEADER_SIZE + s.gap_ack_blocks.len() * 4 + s.duplicate_tsn.len() * 4
            }
            Chunk::Heartbeat(_) | Chunk::HeartbeatAck(_) => 36,
            Chunk::Abort(a) => a.error_causes.iter().map(|c| 4 + c.raw.len()).sum(),
            Chunk::Error(e) => e.error_causes.iter().map(|c| 4 + c.raw.len()).sum(),
            Chunk::CookieEcho(c) => c.cookie.len(),
            Chunk::Shutdown(_) | Chunk::Ecne(_) | Chunk::Cwr(_) => 4,
            Chunk::ShutdownAck | Chunk::CookieAck | Chunk::ShutdownComplete => 0,
            Chunk::Unknown(_) => 0,
        };
        let len = CHUNK_HEADER_SIZE + value;
        len + (4 - len % 4) % 4
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Chunk::PayloadData(_))
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chunk::PayloadData(c) => write!(f, "{c}"),
            Chunk::Init(c) | Chunk::InitAck(c) => write!(f, "{c}"),
            Chunk::Sack(c) => write!(f, "{c}"),
            Chunk::Heartbeat(c) | Chunk::HeartbeatAck(c) => write!(f, "{c}"),
            Chunk::Abort(c) => write!(f, "{c}"),
            Chunk::Shutdown(c) => write!(f, "{c}"),
            Chunk::Error(c) => write!(f, "{c}"),
            Chunk::CookieEcho(c) => write!(f, "{c}"),
            Chunk::Ecne(c) => write!(f, "{c}"),
            Chunk::Cwr(c) => write!(f, "{c}"),
            other => write!(f, "{}", other.chunk_type()),
        }
    }
}
