use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::association::state::AssociationState;
use crate::association::timer::TimerKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("out of memory while building a chunk")]
    ErrNoMemory,
    #[error("internal bug: {0}")]
    ErrInternalBug(String),
    #[error("timer {0} started with an unset timeout")]
    ErrTimerTimeoutUnset(TimerKind),
    #[error("timer {0} is a per-path timer")]
    ErrTimerPerPath(TimerKind),
    #[error("command requires an association")]
    ErrNoAssociation,
    #[error("association has been deleted")]
    ErrAssociationDeleted,
    #[error("transport index {0} out of range")]
    ErrTransportNotFound(usize),

    #[error("association not found")]
    ErrAssociationNotFound,
    #[error("association init failed")]
    ErrAssociationInitFailed,
    #[error("association aborted by peer")]
    ErrAssociationAbortedByPeer,
    #[error("association aborted by user")]
    ErrAssociationAbortedByUser,
    #[error("association timed out: too many retransmissions")]
    ErrAssociationTimedOut,
    #[error("shutdown guard timer expired")]
    ErrShutdownGuardExpired,
    #[error("sending payload data in non-Established state")]
    ErrPayloadDataStateNotExist,
    #[error("no cookie in InitAck")]
    ErrInitAckNoCookie,
    #[error("state cookie too short")]
    ErrStateCookieTooShort,
    #[error("there already exists an association with this peer")]
    ErrAssociationAlreadyExist,
    #[error("protocol violation")]
    ErrProtocolViolation,
    #[error("primitive not allowed in state {0}")]
    ErrPrimitiveNotAllowed(AssociationState),
    #[error("{0} is not a peer address of the association")]
    ErrUnknownPeerAddress(SocketAddr),
}

impl Error {
    /// Errors that reveal a broken invariant of the engine rather than
    /// anything the peer or the user did
    pub fn is_internal_bug(&self) -> bool {
        matches!(
            self,
            Error::ErrInternalBug(_)
                | Error::ErrTimerTimeoutUnset(_)
                | Error::ErrTimerPerPath(_)
                | Error::ErrNoAssociation
                | Error::ErrAssociationDeleted
                | Error::ErrTransportNotFound(_)
        )
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        match error {
            e @ Error::ErrNoMemory => io::Error::new(io::ErrorKind::OutOfMemory, e.to_string()),
            e @ Error::ErrAssociationAbortedByPeer | e @ Error::ErrAssociationAbortedByUser => {
                io::Error::new(io::ErrorKind::ConnectionAborted, e.to_string())
            }
            e @ Error::ErrAssociationTimedOut => io::Error::new(io::ErrorKind::TimedOut, e.to_string()),
            e @ Error::ErrAssociationNotFound => {
                io::Error::new(io::ErrorKind::NotConnected, e.to_string())
            }
            e => io::Error::new(io::ErrorKind::Other, e.to_string()),
        }
    }
}
