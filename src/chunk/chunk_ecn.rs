use std::fmt;

/// ECN-Echo, sent by a receiver that saw the CE codepoint on a packet
/// carrying DATA. Repeated in every outbound packet until a CWR arrives.
///
///0                   1                   2                   3
///0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///| Chunk Type=12 | Flags=00000000|    Chunk Length = 8           |
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///|                      Lowest TSN Number                        |
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkEcne {
    pub lowest_tsn: u32,
}

impl fmt::Display for ChunkEcne {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ECNE lowestTsn={}", self.lowest_tsn)
    }
}

/// Congestion Window Reduced, the sender's answer to an ECNE
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkCwr {
    pub lowest_tsn: u32,
}

impl fmt::Display for ChunkCwr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CWR lowestTsn={}", self.lowest_tsn)
    }
}
