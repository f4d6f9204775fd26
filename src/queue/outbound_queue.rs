use crate::association::state::AssociationState;
use crate::association::transport::{Transport, TransportIdx};
use crate::chunk::chunk_payload_data::{ChunkPayloadData, PAYLOAD_DATA_HEADER_SIZE};
use crate::chunk::chunk_selective_ack::ChunkSelectiveAck;
use crate::chunk::Chunk;
use crate::config::INITIAL_MTU;
use crate::packet::Packet;
use crate::shared::{EcnCodepoint, Transmit};
use crate::util::*;

use std::collections::VecDeque;
use std::time::Instant;

/// A DATA chunk that has been assigned a TSN and sent at least once
#[derive(Debug, Clone)]
pub(crate) struct InflightChunk {
    pub(crate) data: ChunkPayloadData,
    pub(crate) transport: TransportIdx,
    pub(crate) nsent: u32,
    pub(crate) gap_acked: bool,
    pub(crate) retransmit: bool,
}

impl InflightChunk {
    /// Counted in the flight size of its transport
    fn in_flight(&self) -> bool {
        !self.gap_acked && !self.retransmit
    }
}

pub(crate) fn data_size(d: &ChunkPayloadData) -> u32 {
    (PAYLOAD_DATA_HEADER_SIZE + d.user_data.len()) as u32
}

/// What a SACK did to the outbound queue
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct SackOutcome {
    pub(crate) cumulative_advanced: bool,
    /// anything left queued or unacknowledged
    pub(crate) has_pending: bool,
    /// paths with nothing outstanding any more
    pub(crate) stop_t3: Vec<TransportIdx>,
    /// paths whose earliest outstanding chunk was acknowledged
    pub(crate) restart_t3: Vec<TransportIdx>,
}

/// What a flush put on the wire
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct FlushOutcome {
    pub(crate) packets: usize,
    /// paths that carried DATA and need a running T3-rtx timer
    pub(crate) t3_paths: Vec<TransportIdx>,
}

/// Everything a flush needs from the association besides the queue itself
pub(crate) struct FlushContext<'a> {
    pub(crate) transports: &'a mut [Transport],
    pub(crate) active_path: TransportIdx,
    pub(crate) state: AssociationState,
    pub(crate) source_port: u16,
    pub(crate) destination_port: u16,
    pub(crate) peer_tag: u32,
    pub(crate) ecn_capable: bool,
    /// bundled in front of every packet while set
    pub(crate) ecne: Option<Chunk>,
    /// send at most one packet of DATA
    pub(crate) rate_limited: bool,
    pub(crate) now: Instant,
    pub(crate) transmits: &'a mut VecDeque<Transmit>,
}

/// OutboundQueue holds control chunks and user DATA until they can be
/// bundled into packets, and keeps sent DATA until it is acknowledged.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    control: VecDeque<(Chunk, Option<TransportIdx>)>,
    pending: VecDeque<ChunkPayloadData>,
    inflight: VecDeque<InflightChunk>,
    next_tsn: u32,
    cumulative_tsn_ack_point: u32,
    outstanding_bytes: u32,
    peer_rwnd: u32,
}

impl OutboundQueue {
    pub(crate) fn new(initial_tsn: u32, peer_rwnd: u32) -> Self {
        OutboundQueue {
            next_tsn: initial_tsn,
            cumulative_tsn_ack_point: initial_tsn.wrapping_sub(1),
            peer_rwnd,
            ..Default::default()
        }
    }

    /// Queue a chunk. DATA waits for the congestion window, control chunks
    /// go out with the next flush, on `path` or the active path.
    pub(crate) fn push(&mut self, chunk: Chunk, path: Option<TransportIdx>) {
        match chunk {
            Chunk::PayloadData(d) => self.pending.push_back(d),
            c => self.control.push_back((c, path)),
        }
    }

    pub fn next_tsn(&self) -> u32 {
        self.next_tsn
    }

    pub fn cumulative_tsn_ack_point(&self) -> u32 {
        self.cumulative_tsn_ack_point
    }

    pub fn outstanding_bytes(&self) -> u32 {
        self.outstanding_bytes
    }

    /// Sent but not yet cumulatively acknowledged chunks
    pub fn outstanding_count(&self) -> usize {
        self.inflight.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn control_count(&self) -> usize {
        self.control.len()
    }

    pub fn peer_rwnd(&self) -> u32 {
        self.peer_rwnd
    }

    pub(crate) fn set_peer_rwnd(&mut self, rwnd: u32) {
        self.peer_rwnd = rwnd;
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.inflight.is_empty() || !self.pending.is_empty()
    }

    pub(crate) fn transport_for_tsn(&self, tsn: u32) -> Option<TransportIdx> {
        self.inflight
            .iter()
            .find(|c| c.data.tsn == tsn)
            .map(|c| c.transport)
    }

    pub(crate) fn retransmit_marked(&self) -> usize {
        self.inflight.iter().filter(|c| c.retransmit).count()
    }

    /// Drop everything queued or in flight
    pub(crate) fn teardown(&mut self, transports: &mut [Transport]) {
        self.control.clear();
        self.pending.clear();
        self.inflight.clear();
        self.outstanding_bytes = 0;
        for t in transports.iter_mut() {
            t.flight_size = 0;
        }
    }

    /// Peer restarted: forget what was in flight, keep what the user queued
    pub(crate) fn restart(&mut self, transports: &mut [Transport]) {
        let pending = std::mem::take(&mut self.pending);
        self.teardown(transports);
        self.pending = pending;
        self.cumulative_tsn_ack_point = self.next_tsn.wrapping_sub(1);
    }

    /// Take DATA out of flight so the next flush sends it again. `None`
    /// marks chunks on every path. Returns the number of chunks marked.
    pub(crate) fn mark_for_retransmission(
        &mut self,
        path: Option<TransportIdx>,
        transports: &mut [Transport],
    ) -> usize {
        let mut n = 0;
        for c in self.inflight.iter_mut() {
            if !c.in_flight() || path.map_or(false, |p| p != c.transport) {
                continue;
            }
            let size = data_size(&c.data);
            if let Some(t) = transports.get_mut(c.transport) {
                t.flight_size = t.flight_size.saturating_sub(size);
            }
            self.outstanding_bytes = self.outstanding_bytes.saturating_sub(size);
            self.peer_rwnd = self.peer_rwnd.saturating_add(size);
            c.retransmit = true;
            n += 1;
        }

        if n > 0 {
            log::debug!("marked {} chunks for retransmission (path={:?})", n, path);
        }
        n
    }

    pub(crate) fn process_sack(
        &mut self,
        sack: &ChunkSelectiveAck,
        transports: &mut [Transport],
    ) -> SackOutcome {
        let cum = sack.cumulative_tsn_ack;
        if sna32lt(cum, self.cumulative_tsn_ack_point) {
            log::debug!(
                "SACK cumTSN={} older than ack point {}, ignored",
                cum,
                self.cumulative_tsn_ack_point
            );
            return SackOutcome {
                has_pending: self.has_pending(),
                ..Default::default()
            };
        }

        let mut acked = vec![0u32; transports.len()];
        let cumulative_advanced = sna32gt(cum, self.cumulative_tsn_ack_point);

        while let Some(front) = self.inflight.front() {
            if !sna32lte(front.data.tsn, cum) {
                break;
            }
            if let Some(c) = self.inflight.pop_front() {
                self.settle(&c, transports, &mut acked);
            }
        }
        if cumulative_advanced {
            self.cumulative_tsn_ack_point = cum;
        }

        for block in &sack.gap_ack_blocks {
            let start = cum.wrapping_add(block.start as u32);
            let end = cum.wrapping_add(block.end as u32);
            for i in 0..self.inflight.len() {
                let c = &self.inflight[i];
                if c.gap_acked || sna32lt(c.data.tsn, start) || sna32gt(c.data.tsn, end) {
                    continue;
                }
                let c = self.inflight[i].clone();
                self.settle(&c, transports, &mut acked);
                self.inflight[i].gap_acked = true;
                self.inflight[i].retransmit = false;
            }
        }

        self.peer_rwnd = sack
            .advertised_receiver_window_credit
            .saturating_sub(self.outstanding_bytes);

        let mut outcome = SackOutcome {
            cumulative_advanced,
            ..Default::default()
        };
        for (i, t) in transports.iter_mut().enumerate() {
            if acked[i] > 0 {
                t.error_count = 0;
            }
            t.raise_cwnd(acked[i], cumulative_advanced);

            let outstanding = self
                .inflight
                .iter()
                .any(|c| c.transport == i && c.in_flight());
            if !outstanding {
                outcome.stop_t3.push(i);
            } else if cumulative_advanced && acked[i] > 0 {
                outcome.restart_t3.push(i);
            }
        }
        outcome.has_pending = self.has_pending();

        log::trace!(
            "SACK cumTSN={} outstanding={} rwnd={} pending={}",
            cum,
            self.outstanding_bytes,
            self.peer_rwnd,
            outcome.has_pending
        );
        outcome
    }

    /// Account for a chunk acknowledged for the first time
    fn settle(&mut self, c: &InflightChunk, transports: &mut [Transport], acked: &mut [u32]) {
        if c.gap_acked {
            return;
        }
        let size = data_size(&c.data);
        if c.in_flight() {
            if let Some(t) = transports.get_mut(c.transport) {
                t.flight_size = t.flight_size.saturating_sub(size);
            }
            self.outstanding_bytes = self.outstanding_bytes.saturating_sub(size);
        }
        if let Some(a) = acked.get_mut(c.transport) {
            *a += size;
        }
    }

    /// Bundle queued chunks into packets and append them to the transmit queue
    pub(crate) fn flush(&mut self, ctx: &mut FlushContext<'_>) -> FlushOutcome {
        let mut outcome = FlushOutcome::default();
        let mut open: Vec<(TransportIdx, Packet)> = vec![];
        let mut done: Vec<(TransportIdx, Packet)> = vec![];
        let mut has_cookie_echo = false;

        while let Some((chunk, path)) = self.control.pop_front() {
            let path = path.unwrap_or(ctx.active_path);
            match chunk {
                // INIT is never bundled and carries a zero verification tag
                Chunk::Init(_) => {
                    done.push((
                        path,
                        Packet {
                            source_port: ctx.source_port,
                            destination_port: ctx.destination_port,
                            verification_tag: 0,
                            chunks: vec![chunk],
                        },
                    ));
                }
                chunk => {
                    if matches!(chunk, Chunk::CookieEcho(_)) && path == ctx.active_path {
                        has_cookie_echo = true;
                    }
                    bundle(ctx, &mut open, &mut done, path, chunk);
                }
            }
        }

        // In COOKIE-ECHOED, DATA may only ride along with the COOKIE ECHO
        let data_allowed = match ctx.state {
            AssociationState::CookieEchoed => has_cookie_echo,
            state => state.can_send_data(),
        };
        if data_allowed && !ctx.transports.is_empty() {
            self.flush_data(ctx, &mut open, &mut done, &mut outcome);
        }

        done.append(&mut open);
        for (path, packet) in done {
            let Some(remote) = ctx.transports.get(path).map(|t| t.addr) else {
                log::warn!("dropping packet for unknown path {}", path);
                continue;
            };
            ctx.transmits.push_back(Transmit {
                now: ctx.now,
                remote,
                ecn: if ctx.ecn_capable {
                    Some(EcnCodepoint::Ect0)
                } else {
                    None
                },
                local_ip: None,
                packet,
            });
            outcome.packets += 1;
        }

        outcome
    }

    fn flush_data(
        &mut self,
        ctx: &mut FlushContext<'_>,
        open: &mut Vec<(TransportIdx, Packet)>,
        done: &mut Vec<(TransportIdx, Packet)>,
        outcome: &mut FlushOutcome,
    ) {
        let path = ctx.active_path;
        let Some(mtu) = ctx.transports.get(path).map(|t| t.mtu) else {
            return;
        };
        let budget = if ctx.rate_limited {
            Some(mtu.saturating_sub(crate::config::COMMON_HEADER_SIZE))
        } else {
            None
        };
        let mut sent = 0u32;

        let fits = |t: &Transport, sent: u32, size: u32| -> bool {
            if t.flight_size > 0 && t.flight_size + size > t.cwnd {
                return false;
            }
            match budget {
                Some(b) => sent == 0 || sent + size <= b,
                None => true,
            }
        };

        // retransmissions first
        for i in 0..self.inflight.len() {
            if !self.inflight[i].retransmit {
                continue;
            }
            let size = data_size(&self.inflight[i].data);
            if !fits(&ctx.transports[path], sent, size) {
                return;
            }
            let c = &mut self.inflight[i];
            c.retransmit = false;
            c.transport = path;
            c.nsent += 1;
            let chunk = Chunk::PayloadData(c.data.clone());

            ctx.transports[path].flight_size += size;
            self.outstanding_bytes += size;
            self.peer_rwnd = self.peer_rwnd.saturating_sub(size);
            sent += size;
            bundle(ctx, open, done, path, chunk);
            if !outcome.t3_paths.contains(&path) {
                outcome.t3_paths.push(path);
            }
        }

        while let Some(front) = self.pending.front() {
            let size = data_size(front);
            if !fits(&ctx.transports[path], sent, size) {
                break;
            }
            // RFC 4960 6.1 A) always allow one packet when nothing is outstanding
            if self.outstanding_bytes > 0 && size > self.peer_rwnd {
                break;
            }
            let Some(mut data) = self.pending.pop_front() else {
                break;
            };
            data.tsn = self.next_tsn;
            self.next_tsn = self.next_tsn.wrapping_add(1);

            ctx.transports[path].flight_size += size;
            self.outstanding_bytes += size;
            self.peer_rwnd = self.peer_rwnd.saturating_sub(size);
            sent += size;

            self.inflight.push_back(InflightChunk {
                data: data.clone(),
                transport: path,
                nsent: 1,
                gap_acked: false,
                retransmit: false,
            });
            bundle(ctx, open, done, path, Chunk::PayloadData(data));
            if !outcome.t3_paths.contains(&path) {
                outcome.t3_paths.push(path);
            }
        }
    }
}

/// Append `chunk` to the open packet for `path`, starting a new one when it
/// would exceed the path MTU
fn bundle(
    ctx: &FlushContext<'_>,
    open: &mut Vec<(TransportIdx, Packet)>,
    done: &mut Vec<(TransportIdx, Packet)>,
    path: TransportIdx,
    chunk: Chunk,
) {
    let mtu = ctx.transports.get(path).map_or(INITIAL_MTU, |t| t.mtu) as usize;

    if let Some(i) = open.iter().position(|(p, _)| *p == path) {
        if open[i].1.encoded_len() + chunk.encoded_len() <= mtu {
            open[i].1.chunks.push(chunk);
            return;
        }
        done.push(open.remove(i));
    }

    let mut packet = Packet {
        source_port: ctx.source_port,
        destination_port: ctx.destination_port,
        verification_tag: ctx.peer_tag,
        chunks: vec![],
    };
    if let Some(ecne) = &ctx.ecne {
        packet.chunks.push(ecne.clone());
    }
    packet.chunks.push(chunk);
    open.push((path, packet));
}
