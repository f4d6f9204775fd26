
pub mod command;
pub(crate) mod dispatcher;
pub(crate) mod interpreter;
pub mod table;
pub mod transitions;

use crate::association::timer::TimerKind;
use crate::association::transport::TransportIdx;
use crate::chunk::chunk_payload_data::ChunkPayloadData;
use crate::chunk::chunk_type::ChunkType;
use crate::chunk::Chunk;
use crate::config::ReclaimPolicy;
use crate::endpoint::Endpoint;
use crate::factory::ChunkFactory;
use crate::timer::TimerContext;

use command::CommandSeq;
use table::StateTable;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// The broad class of an event
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    Chunk,
    Timeout,
    Other,
    Primitive,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            EventType::Chunk => "Chunk",
            EventType::Timeout => "Timeout",
            EventType::Other => "Other",
            EventType::Primitive => "Primitive",
        };
        write!(f, "{s}")
    }
}

/// Events the engine raises for itself
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OtherEvent {
    /// Every outstanding TSN has been acknowledged
    NoPendingTsn,
}

/// Requests of the upper layer
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Primitive {
    Associate,
    Send,
    Shutdown,
    Abort,
    RequestHeartbeat,
}

/// Identifies an event within its class
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventSubtype {
    Chunk(ChunkType),
    Timeout(TimerKind),
    Other(OtherEvent),
    Primitive(Primitive),
}

impl EventSubtype {
    pub fn event_type(&self) -> EventType {
        match self {
            EventSubtype::Chunk(_) => EventType::Chunk,
            EventSubtype::Timeout(_) => EventType::Timeout,
            EventSubtype::Other(_) => EventType::Other,
            EventSubtype::Primitive(_) => EventType::Primitive,
        }
    }
}

impl fmt::Display for EventSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSubtype::Chunk(t) => write!(f, "{t}"),
            EventSubtype::Timeout(k) => write!(f, "{k}"),
            EventSubtype::Other(o) => write!(f, "{o:?}"),
            EventSubtype::Primitive(p) => write!(f, "{p:?}"),
        }
    }
}

/// One chunk of an inbound packet, with what the packet told us about it
#[derive(Debug, Clone)]
pub struct InboundChunk {
    pub chunk: Chunk,
    pub remote: SocketAddr,
    pub local: Option<SocketAddr>,
    /// The transport the packet came from, when it belongs to an association
    pub path: Option<TransportIdx>,
    /// Verification tag of the enclosing packet
    pub verification_tag: u32,
    /// The packet was marked Congestion Experienced
    pub ecn_ce: bool,
}

/// Event argument handed to the transition function
#[derive(Debug, Clone)]
pub enum EventPayload {
    None,
    Chunk(InboundChunk),
    Timeout { path: Option<TransportIdx> },
    Associate { remote: SocketAddr },
    Send(ChunkPayloadData),
    Heartbeat { path: TransportIdx },
}

/// The categorical outcome of one transition
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Disposition {
    Consume,
    Discard,
    Abort,
    NoMem,
    DeleteTcb,
    Violation,
    NotImpl,
    Bug,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Disposition::Consume => "Consume",
            Disposition::Discard => "Discard",
            Disposition::Abort => "Abort",
            Disposition::NoMem => "NoMem",
            Disposition::DeleteTcb => "DeleteTcb",
            Disposition::Violation => "Violation",
            Disposition::NotImpl => "NotImpl",
            Disposition::Bug => "Bug",
        };
        write!(f, "{s}")
    }
}

/// What a transition function decided
#[derive(Debug)]
pub struct Transition {
    pub disposition: Disposition,
    pub commands: CommandSeq,
}

impl Transition {
    pub fn new(disposition: Disposition, commands: impl Into<CommandSeq>) -> Self {
        Transition {
            disposition,
            commands: commands.into(),
        }
    }

    pub fn consume(commands: impl Into<CommandSeq>) -> Self {
        Transition::new(Disposition::Consume, commands)
    }

    /// A bare disposition with nothing to do
    pub fn only(disposition: Disposition) -> Self {
        Transition::new(disposition, CommandSeq::new())
    }
}

/// Everything one run of the state machine works against. Lives for the
/// duration of one packet, primitive or timer fire.
pub(crate) struct SmContext<'a> {
    pub(crate) endpoint: &'a mut Endpoint,
    pub(crate) table: &'a StateTable,
    pub(crate) timers: &'a TimerContext,
    pub(crate) reclaim: &'a dyn ReclaimPolicy,
    pub(crate) factory: Arc<dyn ChunkFactory>,
    /// Set by `DiscardPacket`: the rest of the inbound packet is dropped
    pub(crate) packet_discarded: bool,
}

impl<'a> SmContext<'a> {
    pub(crate) fn new(
        endpoint: &'a mut Endpoint,
        table: &'a StateTable,
        timers: &'a TimerContext,
        reclaim: &'a dyn ReclaimPolicy,
    ) -> Self {
        let factory = endpoint.factory_handle();
        SmContext {
            endpoint,
            table,
            timers,
            reclaim,
            factory,
            packet_discarded: false,
        }
    }
}
