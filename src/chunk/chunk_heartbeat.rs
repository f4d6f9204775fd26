use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

/// Heartbeat Information as chosen by the sender. The receiver echoes it
/// unmodified in the HEARTBEAT ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatInfo {
    pub addr: SocketAddr,
    pub sent_at: Instant,
    pub nonce: u64,
}

///chunkHeartbeat represents an SCTP Chunk of type HEARTBEAT or HEARTBEAT ACK
///
///An endpoint should send this chunk to its peer endpoint to test the
///reachability of a particular destination transport IP defined in
///the present association.
///
///The parameter field contains the Heartbeat Information, which is a
///variable-length opaque data structure understood only by the sender.
///
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///|   Type = 4    | Chunk  Flags  |      Heartbeat Length         |
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///|                                                               |
///|            Heartbeat Information TLV (Variable-Length)        |
///|                                                               |
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeartbeat {
    pub is_ack: bool,
    pub info: HeartbeatInfo,
}

impl fmt::Display for ChunkHeartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} addr: {} nonce: {}",
            if self.is_ack {
                "HEARTBEAT-ACK"
            } else {
                "HEARTBEAT"
            },
            self.info.addr,
            self.info.nonce
        )
    }
}
