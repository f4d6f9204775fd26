use crate::chunk::chunk_abort::ChunkError;
use crate::chunk::chunk_payload_data::ChunkPayloadData;
use crate::shared::AssociationId;

use portable_atomic::AtomicU64;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Association state changes reported to the upper layer
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AssocChangeState {
    CommUp,
    CommLost,
    Restart,
    ShutdownComplete,
    CantStartAssoc,
}

impl fmt::Display for AssocChangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            AssocChangeState::CommUp => "CommUp",
            AssocChangeState::CommLost => "CommLost",
            AssocChangeState::Restart => "Restart",
            AssocChangeState::ShutdownComplete => "ShutdownComplete",
            AssocChangeState::CantStartAssoc => "CantStartAssoc",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PeerAddrState {
    Available,
    Unreachable,
}

/// Notifications delivered alongside user data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    AssocChange(AssocChangeState),
    PeerAddrChange {
        addr: SocketAddr,
        state: PeerAddrState,
    },
    /// The peer sent a SHUTDOWN; no more data will arrive
    Shutdown,
    /// The peer reported an operational error
    RemoteError(ChunkError),
}

/// Everything an association hands to the upper layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UlpEvent {
    Data {
        association: AssociationId,
        chunk: ChunkPayloadData,
    },
    Notification {
        association: AssociationId,
        notification: Notification,
    },
}

impl UlpEvent {
    pub fn association(&self) -> AssociationId {
        match self {
            UlpEvent::Data { association, .. } | UlpEvent::Notification { association, .. } => {
                *association
            }
        }
    }
}

/// UlpQueue delivers data and notifications to the application.
///
/// The channel is bounded and never blocks the state machine: an event that
/// does not fit is dropped and counted.
#[derive(Debug, Clone)]
pub struct UlpQueue {
    tx: mpsc::Sender<UlpEvent>,
    dropped: Arc<AtomicU64>,
}

impl UlpQueue {
    pub(crate) fn new(capacity: usize) -> (Self, mpsc::Receiver<UlpEvent>) {
        let (tx, rx) = mpsc::channel(std::cmp::max(capacity, 1));
        (
            UlpQueue {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub(crate) fn deliver_data(&self, association: AssociationId, chunk: ChunkPayloadData) {
        self.push(UlpEvent::Data { association, chunk });
    }

    pub(crate) fn deliver_event(&self, association: AssociationId, notification: Notification) {
        log::debug!("[{}] notify upper layer: {:?}", association, notification);
        self.push(UlpEvent::Notification {
            association,
            notification,
        });
    }

    fn push(&self, event: UlpEvent) {
        if let Err(err) = self.tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
            log::warn!("upper layer event dropped: {}", err);
        }
    }

    /// Events lost because the application did not keep up
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_ulp_queue_delivers_in_order() {
        let (q, mut rx) = UlpQueue::new(8);
        q.deliver_event(7, Notification::AssocChange(AssocChangeState::CommUp));
        q.deliver_data(7, ChunkPayloadData::new(0, 51u32.into(), Bytes::from_static(b"x")));

        assert_eq!(
            rx.recv().await,
            Some(UlpEvent::Notification {
                association: 7,
                notification: Notification::AssocChange(AssocChangeState::CommUp),
            })
        );
        let data = rx.recv().await.unwrap();
        assert!(matches!(data, UlpEvent::Data { association: 7, .. }));
        assert_eq!(q.dropped(), 0);
    }

    #[tokio::test]
    async fn test_ulp_queue_drops_when_full() {
        let (q, mut rx) = UlpQueue::new(1);
        q.deliver_event(1, Notification::Shutdown);
        q.deliver_event(1, Notification::Shutdown);
        assert_eq!(q.dropped(), 1);
        assert!(rx.recv().await.is_some());
    }
}
