use crate::error::{Error, Result};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// CookieEcho represents an SCTP Chunk of type CookieEcho
///
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///|   Type = 10   |Chunk  Flags   |         Length                |
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///|                     Cookie                                    |
///|                                                               |
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ChunkCookieEcho {
    pub cookie: Bytes,
}

/// makes ChunkCookieEcho printable
impl fmt::Display for ChunkCookieEcho {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "COOKIE-ECHO cookie: {} bytes", self.cookie.len())
    }
}

pub(crate) const STATE_COOKIE_LENGTH: usize = 28;

/// StateCookie is the TCB snapshot a server hands out in its INIT ACK and
/// gets back in the COOKIE ECHO, so that no state is kept before the
/// handshake completes.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateCookie {
    pub my_verification_tag: u32,
    pub peer_verification_tag: u32,
    pub my_initial_tsn: u32,
    pub peer_initial_tsn: u32,
    pub peer_rwnd: u32,
    pub num_outbound_streams: u16,
    pub num_inbound_streams: u16,
    pub peer_ecn_capable: bool,
}

impl StateCookie {
    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(STATE_COOKIE_LENGTH);
        buf.put_u32(self.my_verification_tag);
        buf.put_u32(self.peer_verification_tag);
        buf.put_u32(self.my_initial_tsn);
        buf.put_u32(self.peer_initial_tsn);
        buf.put_u32(self.peer_rwnd);
        buf.put_u16(self.num_outbound_streams);
        buf.put_u16(self.num_inbound_streams);
        buf.put_u32(u32::from(self.peer_ecn_capable));
        buf.freeze()
    }

    pub fn unmarshal(raw: &Bytes) -> Result<Self> {
        if raw.len() < STATE_COOKIE_LENGTH {
            return Err(Error::ErrStateCookieTooShort);
        }

        let reader = &mut raw.clone();
        Ok(StateCookie {
            my_verification_tag: reader.get_u32(),
            peer_verification_tag: reader.get_u32(),
            my_initial_tsn: reader.get_u32(),
            peer_initial_tsn: reader.get_u32(),
            peer_rwnd: reader.get_u32(),
            num_outbound_streams: reader.get_u16(),
            num_inbound_streams: reader.get_u16(),
            peer_ecn_capable: reader.get_u32() != 0,
        })
    }
}
