#[cfg(test)]
mod socket_test;

use crate::association::state::AssociationState;
use crate::association::stats::AssociationStats;
use crate::association::timer::TimerKind;
use crate::association::Association;
use crate::chunk::chunk_payload_data::{ChunkPayloadData, PayloadProtocolIdentifier};
use crate::chunk::Chunk;
use crate::config::{ReclaimPolicy, SocketConfig};
use crate::endpoint::{AssociationHandle, Endpoint};
use crate::error::{Error, Result};
use crate::factory::{ChunkFactory, DefaultChunkFactory};
use crate::mutex::Mutex;
use crate::queue::ulp_queue::{UlpEvent, UlpQueue};
use crate::shared::{AssociationId, Transmit};
use crate::sm::table::StateTable;
use crate::sm::{dispatcher, EventPayload, EventSubtype, InboundChunk, Primitive, SmContext};
use crate::timer::{AssociationRef, TimerContext, TimerId};

use bytes::Bytes;
use log::{debug, trace, warn};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Socket owns every association of one local SCTP port.
///
/// Inbound packets go in through [`Socket::handle`], outbound packets come
/// out of [`Socket::poll_transmit`], and data and notifications for the
/// application arrive on the event channel returned by [`Socket::new`].
/// Timers run as tokio tasks, so a socket must be driven from within a
/// tokio runtime.
#[derive(Clone)]
pub struct Socket {
    inner: Arc<Mutex<SocketInner>>,
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket").finish_non_exhaustive()
    }
}

pub(crate) struct SocketInner {
    endpoint: Endpoint,
    table: Arc<StateTable>,
    timers: TimerContext,
    reclaim: Arc<dyn ReclaimPolicy>,
}

impl SocketInner {
    /// Runs one event through the state machine. Also reports whether the
    /// transition asked for the rest of the packet to be dropped.
    fn dispatch(
        &mut self,
        subtype: EventSubtype,
        state: AssociationState,
        handle: Option<AssociationHandle>,
        payload: EventPayload,
    ) -> (Result<()>, bool) {
        let mut ctx = SmContext::new(
            &mut self.endpoint,
            &self.table,
            &self.timers,
            self.reclaim.as_ref(),
        );
        let result = dispatcher::run(
            &mut ctx,
            subtype.event_type(),
            subtype,
            state,
            handle,
            payload,
        );
        (result, ctx.packet_discarded)
    }

    /// Dispatches a primitive to the association identified by `id`
    fn primitive(&mut self, id: AssociationId, p: Primitive, payload: EventPayload) -> Result<()> {
        let handle = self
            .endpoint
            .lookup_by_tag(id)
            .ok_or(Error::ErrAssociationNotFound)?;
        let state = self
            .endpoint
            .association(handle)
            .map(|a| a.state())
            .ok_or(Error::ErrAssociationNotFound)?;
        self.dispatch(EventSubtype::Primitive(p), state, Some(handle), payload)
            .0
    }

    /// Called by a timer task once its deadline passed. Handles are reused
    /// once an association is removed, so the expiry only counts when
    /// `owner` was taken on the association found under `handle`.
    pub(crate) fn handle_timeout(
        &mut self,
        handle: AssociationHandle,
        id: TimerId,
        generation: u64,
        owner: &AssociationRef,
    ) {
        let Some(a) = self.endpoint.association_mut(handle) else {
            return;
        };
        if !owner.refers_to(&a.liveness) {
            trace!("[{}] timer {} of a removed association ignored", a.name(), id);
            return;
        }
        if !a.take_fired_timer(id, generation) {
            trace!("[{}] stale timer {} ignored", a.name(), id);
            return;
        }
        if id.kind == TimerKind::Sack {
            a.stats.inc_ack_timeouts();
        }
        let state = a.state();

        let (result, _) = self.dispatch(
            EventSubtype::Timeout(id.kind),
            state,
            Some(handle),
            EventPayload::Timeout { path: id.path },
        );
        if let Err(err) = result {
            debug!("[{}] timer {}: {}", handle, id, err);
        }
    }

    /// The association a chunk belongs to. Chunks that may legitimately
    /// arrive without our tag fall back to the peer address.
    fn resolve(&self, chunk: &Chunk, tag: u32, remote: &SocketAddr) -> Option<AssociationHandle> {
        if let Some(h) = self.endpoint.lookup_by_tag(tag) {
            return Some(h);
        }
        match chunk {
            Chunk::Init(_) | Chunk::Abort(_) | Chunk::ShutdownComplete => {
                self.endpoint.lookup_by_addr(remote)
            }
            _ => None,
        }
    }

    fn handle_packet(&mut self, transmit: Transmit) -> Result<()> {
        let Transmit {
            remote,
            local_ip,
            ecn,
            packet,
            ..
        } = transmit;

        if packet.destination_port != self.endpoint.local_port() {
            debug!(
                "packet for port {} dropped on port {}",
                packet.destination_port,
                self.endpoint.local_port()
            );
            return Ok(());
        }

        let local = local_ip.map(|ip| SocketAddr::new(ip, self.endpoint.local_port()));
        let tag = packet.verification_tag;
        // CE is reported once per packet, against its first DATA chunk
        let mut ce = ecn.map_or(false, |e| e.is_ce());
        let mut result = Ok(());

        for chunk in packet.chunks {
            let handle = self.resolve(&chunk, tag, &remote);
            let (state, path) = match handle.and_then(|h| self.endpoint.association(h)) {
                Some(a) => (a.state(), a.transport_idx(&remote)),
                None => (AssociationState::Closed, None),
            };
            let ecn_ce = ce && matches!(chunk, Chunk::PayloadData(_));
            if ecn_ce {
                ce = false;
            }

            let subtype = EventSubtype::Chunk(chunk.chunk_type());
            let (r, discarded) = self.dispatch(
                subtype,
                state,
                handle,
                EventPayload::Chunk(InboundChunk {
                    chunk,
                    remote,
                    local,
                    path,
                    verification_tag: tag,
                    ecn_ce,
                }),
            );
            if let Err(err) = r {
                debug!("{} from {}: {}", subtype, remote, err);
                if result.is_ok() {
                    result = Err(err);
                }
            }
            if discarded {
                trace!("rest of packet from {} discarded", remote);
                break;
            }
        }
        result
    }
}

impl Socket {
    /// Creates a socket with the default chunk factory and transition table
    pub fn new(config: SocketConfig) -> (Self, mpsc::Receiver<UlpEvent>) {
        Socket::with_parts(
            config,
            Arc::new(DefaultChunkFactory),
            Arc::new(StateTable::default()),
        )
    }

    /// Creates a socket that builds its chunks with `factory` and decides
    /// with `table`
    pub fn with_parts(
        config: SocketConfig,
        factory: Arc<dyn ChunkFactory>,
        table: Arc<StateTable>,
    ) -> (Self, mpsc::Receiver<UlpEvent>) {
        let (ulpq, events) = UlpQueue::new(config.event_channel_capacity);
        let reclaim = Arc::clone(&config.reclaim);

        let inner = Arc::new_cyclic(|weak| {
            Mutex::new(SocketInner {
                endpoint: Endpoint::new(&config, factory, ulpq),
                table,
                timers: TimerContext::new(weak.clone()),
                reclaim,
            })
        });

        (Socket { inner }, events)
    }

    /// Processes one inbound packet. Returns the first error a chunk of
    /// the packet produced.
    pub fn handle(&self, transmit: Transmit) -> Result<()> {
        let mut inner = self.inner.lock("handle");
        inner.handle_packet(transmit)
    }

    /// Starts an association with `remote` and returns its identifier. The
    /// handshake completes in the background; `CommUp` is notified once it
    /// did.
    pub fn associate(&self, remote: SocketAddr) -> Result<AssociationId> {
        let mut inner = self.inner.lock("associate");
        if inner.endpoint.lookup_by_addr(&remote).is_some() {
            return Err(Error::ErrAssociationAlreadyExist);
        }

        inner
            .dispatch(
                EventSubtype::Primitive(Primitive::Associate),
                AssociationState::Closed,
                None,
                EventPayload::Associate { remote },
            )
            .0?;

        let handle = inner
            .endpoint
            .lookup_by_addr(&remote)
            .ok_or(Error::ErrAssociationNotFound)?;
        inner
            .endpoint
            .association(handle)
            .map(|a| a.id())
            .ok_or(Error::ErrAssociationNotFound)
    }

    /// Queues an unfragmented message on `stream`
    pub fn send(
        &self,
        id: AssociationId,
        stream: u16,
        ppi: PayloadProtocolIdentifier,
        payload: Bytes,
    ) -> Result<()> {
        let data = ChunkPayloadData::new(stream, ppi, payload);
        self.send_chunk(id, data)
    }

    /// Queues a DATA chunk built by the caller, for unordered delivery or
    /// fragmented messages. Its TSN is assigned on transmission.
    pub fn send_chunk(&self, id: AssociationId, data: ChunkPayloadData) -> Result<()> {
        let mut inner = self.inner.lock("send");
        inner.primitive(id, Primitive::Send, EventPayload::Send(data))
    }

    /// Gracefully closes the association once all queued data is acknowledged
    pub fn shutdown(&self, id: AssociationId) -> Result<()> {
        let mut inner = self.inner.lock("shutdown");
        inner.primitive(id, Primitive::Shutdown, EventPayload::None)
    }

    /// Tears the association down immediately
    pub fn abort(&self, id: AssociationId) -> Result<()> {
        let mut inner = self.inner.lock("abort");
        match inner.primitive(id, Primitive::Abort, EventPayload::None) {
            Err(Error::ErrAssociationAbortedByUser) => Ok(()),
            result => result,
        }
    }

    /// Sends a HEARTBEAT to `addr` right away, outside the regular interval
    pub fn request_heartbeat(&self, id: AssociationId, addr: SocketAddr) -> Result<()> {
        let mut inner = self.inner.lock("request_heartbeat");
        let path = inner
            .endpoint
            .lookup_by_tag(id)
            .and_then(|h| inner.endpoint.association(h))
            .ok_or(Error::ErrAssociationNotFound)?
            .transport_idx(&addr)
            .ok_or(Error::ErrUnknownPeerAddress(addr))?;
        inner.primitive(id, Primitive::RequestHeartbeat, EventPayload::Heartbeat { path })
    }

    /// Next packet to put on the wire
    pub fn poll_transmit(&self) -> Option<Transmit> {
        let mut inner = self.inner.lock("poll_transmit");
        let transmit = inner.endpoint.poll_transmit();
        if let Some(t) = &transmit {
            trace!("transmit to {}: {} chunks", t.remote, t.packet.chunks.len());
        }
        transmit
    }

    pub fn association_state(&self, id: AssociationId) -> Option<AssociationState> {
        self.with_association(id, |a| a.state())
    }

    pub fn stats(&self, id: AssociationId) -> Option<Arc<AssociationStats>> {
        self.with_association(id, |a| a.stats())
    }

    /// Runs `f` against the association identified by `id`
    pub fn with_association<R>(&self, id: AssociationId, f: impl FnOnce(&Association) -> R) -> Option<R> {
        let inner = self.inner.lock("with_association");
        let handle = inner.endpoint.lookup_by_tag(id)?;
        inner.endpoint.association(handle).map(f)
    }

    /// Identifiers of every association the socket currently holds
    pub fn associations(&self) -> Vec<AssociationId> {
        let inner = self.inner.lock("associations");
        inner
            .endpoint
            .handles()
            .filter_map(|h| inner.endpoint.association(h))
            .map(|a| a.id())
            .collect()
    }

    /// Aborts every association, as when the application goes away
    pub fn close(&self) {
        for id in self.associations() {
            if let Err(err) = self.abort(id) {
                warn!("[{:08x}] abort on close failed: {}", id, err);
            }
        }
    }
}
