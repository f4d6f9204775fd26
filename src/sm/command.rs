use crate::association::state::AssociationState;
use crate::association::timer::{Counter, TimerKind};
use crate::association::transport::TransportIdx;
use crate::association::Association;
use crate::chunk::chunk_abort::ChunkError;
use crate::chunk::chunk_init::ChunkInit;
use crate::chunk::chunk_payload_data::ChunkPayloadData;
use crate::chunk::chunk_selective_ack::ChunkSelectiveAck;
use crate::chunk::Chunk;
use crate::error::Error;
use crate::queue::ulp_queue::Notification;
use crate::shared::Transmit;

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

/// The side effects a transition function asks for, executed in order by the
/// interpreter. Commands appended while the sequence runs execute after
/// everything already queued.
pub type CommandSeq = VecDeque<Command>;

/// Command is one side effect of a state machine transition
#[derive(Debug)]
pub enum Command {
    /// Register and hash a new association and make it the current one
    NewAssoc(Box<Association>),
    /// Merge a restarted peer's parameters into the current association
    UpdateAssoc(Box<Association>),
    /// Drop everything queued or in flight
    PurgeOutqueue,
    /// Flush, unhash, remove and kill the association, then stop
    DeleteAssoc,
    NewState(AssociationState),

    ReportTsn(u32),
    GenSack {
        force: bool,
    },
    ProcessSack(ChunkSelectiveAck),
    /// Answer an INIT. Without an association the INIT ACK goes out as a
    /// packet of its own to `remote`.
    GenInitAck {
        init: ChunkInit,
        remote: SocketAddr,
    },
    PeerInit(ChunkInit),
    /// Send the COOKIE ECHO, bundled with an ERROR chunk when one is given
    GenCookieEcho {
        error: Option<ChunkError>,
    },
    GenShutdown,

    ChunkUlp(ChunkPayloadData),
    EventUlp(Notification),

    Reply(Chunk),
    /// Reply on one specific path
    ReplyOn(TransportIdx, Chunk),
    SendPkt(Transmit),
    Retran(TransportIdx),
    Flush,

    EcnCe(u32),
    EcnEcne(u32),
    EcnCwr(u32),

    SetupT2,
    TimerStart(TimerKind),
    TimerRestart(TimerKind),
    TimerStop(TimerKind),
    InitTimerBackoff(TimerKind),
    HbTimersStart,
    HbTimersStop,
    HbTimerUpdate(TransportIdx),
    T3RtxTimersStop,

    InitFailed(Error),
    AssocFailed(Error),
    CounterInc(Counter),
    CounterReset(Counter),

    ReportDup(u32),
    ReportBigGap(u32),
    ReportBadTag(u32),
    SetBindAddrs(Vec<SocketAddr>),

    Strike(TransportIdx),
    TransportDown(TransportIdx),
    /// The path answered; `sent_at` is the send time echoed in a
    /// HEARTBEAT ACK and yields an RTT sample
    TransportUp {
        path: TransportIdx,
        sent_at: Option<Instant>,
    },

    ReportError(Error),
    ProcessCtsn(u32),
    DiscardPacket,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::NewAssoc(_) => "NewAssoc",
            Command::UpdateAssoc(_) => "UpdateAssoc",
            Command::PurgeOutqueue => "PurgeOutqueue",
            Command::DeleteAssoc => "DeleteAssoc",
            Command::NewState(_) => "NewState",
            Command::ReportTsn(_) => "ReportTsn",
            Command::GenSack { .. } => "GenSack",
            Command::ProcessSack(_) => "ProcessSack",
            Command::GenInitAck { .. } => "GenInitAck",
            Command::PeerInit(_) => "PeerInit",
            Command::GenCookieEcho { .. } => "GenCookieEcho",
            Command::GenShutdown => "GenShutdown",
            Command::ChunkUlp(_) => "ChunkUlp",
            Command::EventUlp(_) => "EventUlp",
            Command::Reply(_) => "Reply",
            Command::ReplyOn(..) => "ReplyOn",
            Command::SendPkt(_) => "SendPkt",
            Command::Retran(_) => "Retran",
            Command::Flush => "Flush",
            Command::EcnCe(_) => "EcnCe",
            Command::EcnEcne(_) => "EcnEcne",
            Command::EcnCwr(_) => "EcnCwr",
            Command::SetupT2 => "SetupT2",
            Command::TimerStart(_) => "TimerStart",
            Command::TimerRestart(_) => "TimerRestart",
            Command::TimerStop(_) => "TimerStop",
            Command::InitTimerBackoff(_) => "InitTimerBackoff",
            Command::HbTimersStart => "HbTimersStart",
            Command::HbTimersStop => "HbTimersStop",
            Command::HbTimerUpdate(_) => "HbTimerUpdate",
            Command::T3RtxTimersStop => "T3RtxTimersStop",
            Command::InitFailed(_) => "InitFailed",
            Command::AssocFailed(_) => "AssocFailed",
            Command::CounterInc(_) => "CounterInc",
            Command::CounterReset(_) => "CounterReset",
            Command::ReportDup(_) => "ReportDup",
            Command::ReportBigGap(_) => "ReportBigGap",
            Command::ReportBadTag(_) => "ReportBadTag",
            Command::SetBindAddrs(_) => "SetBindAddrs",
            Command::Strike(_) => "Strike",
            Command::TransportDown(_) => "TransportDown",
            Command::TransportUp { .. } => "TransportUp",
            Command::ReportError(_) => "ReportError",
            Command::ProcessCtsn(_) => "ProcessCtsn",
            Command::DiscardPacket => "DiscardPacket",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::NewState(s) => write!(f, "NewState({s})"),
            Command::ReportTsn(tsn)
            | Command::EcnCe(tsn)
            | Command::EcnEcne(tsn)
            | Command::EcnCwr(tsn)
            | Command::ReportDup(tsn)
            | Command::ReportBigGap(tsn)
            | Command::ProcessCtsn(tsn) => write!(f, "{}({})", self.name(), tsn),
            Command::GenSack { force } => write!(f, "GenSack(force={force})"),
            Command::Reply(c) | Command::ReplyOn(_, c) => {
                write!(f, "{}({})", self.name(), c.chunk_type())
            }
            Command::TimerStart(k)
            | Command::TimerRestart(k)
            | Command::TimerStop(k)
            | Command::InitTimerBackoff(k) => write!(f, "{}({})", self.name(), k),
            Command::Retran(p)
            | Command::Strike(p)
            | Command::TransportDown(p)
            | Command::HbTimerUpdate(p)
            | Command::TransportUp { path: p, .. } => write!(f, "{}({})", self.name(), p),
            Command::InitFailed(e) | Command::AssocFailed(e) | Command::ReportError(e) => {
                write!(f, "{}({})", self.name(), e)
            }
            other => write!(f, "{}", other.name()),
        }
    }
}
