//! Command-driven state machine for SCTP associations
//!
//! Every event an association sees, an inbound chunk, an expired timer, a
//! request of the application or an event the engine raises for itself, is
//! looked up in a [`StateTable`]. The transition function found there only
//! decides: it returns a [`Disposition`] and a sequence of [`Command`]s, and
//! the interpreter carries the commands out against the association.
//!
//! [`Socket`] ties it together for one local port. It takes inbound packets,
//! hands out outbound ones and runs the association timers on tokio.

#![warn(rust_2018_idioms)]
#![allow(clippy::too_many_arguments)]

pub mod association;
pub use crate::association::{
    state::AssociationState,
    stats::AssociationStats,
    timer::{Counter, TimerKind},
    transport::{Transport, TransportIdx},
    Association,
};

pub mod chunk;
pub use crate::chunk::{
    chunk_payload_data::{ChunkPayloadData, PayloadProtocolIdentifier},
    Chunk,
};

mod config;
pub use crate::config::{NoReclaim, ReclaimPolicy, SocketConfig, TransportConfig};

mod endpoint;
pub use crate::endpoint::{AssociationHandle, Endpoint};

mod error;
pub use crate::error::{Error, Result};

pub mod error_cause;

mod factory;
pub use crate::factory::{ChunkFactory, DefaultChunkFactory};

pub(crate) mod mutex;

mod packet;
pub use crate::packet::Packet;

pub(crate) mod queue;
pub use crate::queue::ulp_queue::{AssocChangeState, Notification, PeerAddrState, UlpEvent};

mod shared;
pub use crate::shared::{AssociationId, EcnCodepoint, Transmit};

pub mod sm;
pub use crate::sm::{
    command::Command,
    table::{StateTable, TransitionFn},
    Disposition, EventPayload, EventSubtype, EventType, InboundChunk, OtherEvent, Primitive,
    Transition,
};

mod socket;
pub use crate::socket::Socket;

pub(crate) mod timer;

mod tsn_map;
pub use crate::tsn_map::{TsnMap, TsnStatus};

pub(crate) mod util;
