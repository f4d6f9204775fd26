#[cfg(test)]
mod association_test;

pub mod state;
pub mod stats;
pub mod timer;
pub mod transport;

use crate::chunk::chunk_cookie_echo::StateCookie;
use crate::chunk::chunk_init::ChunkInit;
use crate::chunk::Chunk;
use crate::config::TransportConfig;
use crate::endpoint::AssociationHandle;
use crate::error::{Error, Result};
use crate::queue::outbound_queue::{FlushContext, FlushOutcome, OutboundQueue};
use crate::queue::ulp_queue::UlpQueue;
use crate::shared::{AssociationId, Transmit};
use crate::timer::{AssociationRef, Liveness, PendingTimer, TimerContext, TimerId};
use crate::tsn_map::TsnMap;

use state::AssociationState;
use stats::AssociationStats;
use timer::{Counter, TimeoutTable, TimerKind, COUNTER_COUNT, TIMER_COUNT};
use transport::{Transport, TransportIdx};

use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Largest number of duplicate TSNs reported in one SACK
pub(crate) const MAX_DUP_TSNS: usize = 16;

pub(crate) fn random_nonzero_u32() -> u32 {
    loop {
        let v = rand::random::<u32>();
        if v != 0 {
            return v;
        }
    }
}

/// Association represents an SCTP association: the transmission control
/// block of one session with a peer endpoint.
///
/// It is only ever mutated by the command interpreter, under the socket lock.
pub struct Association {
    pub(crate) name: String,
    pub(crate) handle: AssociationHandle,
    pub(crate) config: Arc<TransportConfig>,

    pub(crate) state: AssociationState,
    pub(crate) state_entered_at: Instant,

    pub(crate) source_port: u16,
    pub(crate) destination_port: u16,
    pub(crate) my_verification_tag: u32,
    pub(crate) peer_verification_tag: u32,
    pub(crate) my_initial_tsn: u32,
    pub(crate) peer_ecn_capable: bool,
    pub(crate) num_outbound_streams: u16,
    pub(crate) num_inbound_streams: u16,
    pub(crate) my_rwnd: u32,
    /// State Cookie received in the INIT ACK, echoed back in COOKIE ECHO
    pub(crate) peer_cookie: Option<Bytes>,

    pub(crate) transports: Vec<Transport>,
    pub(crate) primary_path: TransportIdx,
    pub(crate) active_path: TransportIdx,
    pub(crate) shutdown_last_sent_to: Option<TransportIdx>,
    pub(crate) bind_addrs: Vec<SocketAddr>,

    pub(crate) tsn_map: TsnMap,
    pub(crate) sack_needed: bool,
    pub(crate) dup_tsns: Vec<u32>,
    pub(crate) outq: OutboundQueue,
    pub(crate) ulpq: UlpQueue,

    pub(crate) need_ecn_echo: bool,
    pub(crate) last_ecne_tsn: u32,
    pub(crate) last_cwr_tsn: u32,

    pub(crate) timeouts: TimeoutTable,
    timers: [Option<PendingTimer>; TIMER_COUNT],
    timer_generation: u64,
    counters: [u32; COUNTER_COUNT],

    pub(crate) liveness: Arc<Liveness>,
    pub(crate) stats: Arc<AssociationStats>,
}

impl fmt::Debug for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Association")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .field("state", &self.state)
            .field("my_verification_tag", &self.my_verification_tag)
            .field("peer_verification_tag", &self.peer_verification_tag)
            .field("transports", &self.transports)
            .field("active_path", &self.active_path)
            .field("tsn_map", &self.tsn_map)
            .field("outq", &self.outq)
            .field("timer_refs", &self.timer_refs())
            .finish()
    }
}

impl Association {
    /// Creates the client side of an association, in the Closed state
    pub(crate) fn new(
        config: Arc<TransportConfig>,
        local_port: u16,
        remote: SocketAddr,
        ulpq: UlpQueue,
    ) -> Self {
        let my_verification_tag = random_nonzero_u32();
        let my_initial_tsn = rand::random::<u32>();
        Association::build(
            config,
            local_port,
            remote,
            ulpq,
            my_verification_tag,
            my_initial_tsn,
        )
    }

    /// Creates the server side of an association from a State Cookie the
    /// peer echoed back
    pub(crate) fn from_cookie(
        config: Arc<TransportConfig>,
        local_port: u16,
        remote: SocketAddr,
        ulpq: UlpQueue,
        cookie: &StateCookie,
    ) -> Self {
        let mut a = Association::build(
            config,
            local_port,
            remote,
            ulpq,
            cookie.my_verification_tag,
            cookie.my_initial_tsn,
        );
        a.peer_verification_tag = cookie.peer_verification_tag;
        a.tsn_map = TsnMap::new(cookie.peer_initial_tsn);
        a.outq.set_peer_rwnd(cookie.peer_rwnd);
        a.num_outbound_streams = cookie.num_outbound_streams;
        a.num_inbound_streams = cookie.num_inbound_streams;
        a.peer_ecn_capable = cookie.peer_ecn_capable;
        a
    }

    fn build(
        config: Arc<TransportConfig>,
        local_port: u16,
        remote: SocketAddr,
        ulpq: UlpQueue,
        my_verification_tag: u32,
        my_initial_tsn: u32,
    ) -> Self {
        let transports = vec![Transport::new(remote, &config)];
        let timeouts = TimeoutTable::new(&config);

        Association {
            name: format!("{my_verification_tag:08x}"),
            handle: AssociationHandle(usize::MAX),
            state: AssociationState::Closed,
            state_entered_at: Instant::now(),
            source_port: local_port,
            destination_port: remote.port(),
            my_verification_tag,
            peer_verification_tag: 0,
            my_initial_tsn,
            peer_ecn_capable: false,
            num_outbound_streams: config.max_num_outbound_streams(),
            num_inbound_streams: config.max_num_inbound_streams(),
            my_rwnd: config.max_receive_buffer_size(),
            peer_cookie: None,
            transports,
            primary_path: 0,
            active_path: 0,
            shutdown_last_sent_to: None,
            bind_addrs: vec![],
            tsn_map: TsnMap::default(),
            sack_needed: false,
            dup_tsns: vec![],
            outq: OutboundQueue::new(my_initial_tsn, 0),
            ulpq,
            need_ecn_echo: false,
            last_ecne_tsn: 0,
            last_cwr_tsn: my_initial_tsn.wrapping_sub(1),
            timeouts,
            timers: Default::default(),
            timer_generation: 0,
            counters: [0; COUNTER_COUNT],
            liveness: Arc::new(Liveness::default()),
            stats: Arc::new(AssociationStats::default()),
            config,
        }
    }

    /// Protocol-level identifier: the verification tag the peer must use
    pub fn id(&self) -> AssociationId {
        self.my_verification_tag
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> AssociationHandle {
        self.handle
    }

    pub fn state(&self) -> AssociationState {
        self.state
    }

    /// When the current state was entered
    pub fn state_entered_at(&self) -> Instant {
        self.state_entered_at
    }

    pub fn peer_verification_tag(&self) -> u32 {
        self.peer_verification_tag
    }

    pub fn my_initial_tsn(&self) -> u32 {
        self.my_initial_tsn
    }

    pub fn peer_cookie(&self) -> Option<&Bytes> {
        self.peer_cookie.as_ref()
    }

    pub fn transports(&self) -> &[Transport] {
        &self.transports
    }

    pub fn active_path(&self) -> TransportIdx {
        self.active_path
    }

    pub fn primary_path(&self) -> TransportIdx {
        self.primary_path
    }

    pub fn shutdown_last_sent_to(&self) -> Option<TransportIdx> {
        self.shutdown_last_sent_to
    }

    pub fn bind_addrs(&self) -> &[SocketAddr] {
        &self.bind_addrs
    }

    pub fn tsn_map(&self) -> &TsnMap {
        &self.tsn_map
    }

    pub fn outq(&self) -> &OutboundQueue {
        &self.outq
    }

    pub fn sack_needed(&self) -> bool {
        self.sack_needed
    }

    pub fn dup_tsns(&self) -> &[u32] {
        &self.dup_tsns
    }

    pub fn need_ecn_echo(&self) -> bool {
        self.need_ecn_echo
    }

    pub fn last_ecne_tsn(&self) -> u32 {
        self.last_ecne_tsn
    }

    pub fn last_cwr_tsn(&self) -> u32 {
        self.last_cwr_tsn
    }

    pub fn my_rwnd(&self) -> u32 {
        self.my_rwnd
    }

    pub fn stats(&self) -> Arc<AssociationStats> {
        Arc::clone(&self.stats)
    }

    pub fn counter(&self, counter: Counter) -> u32 {
        self.counters[counter as usize]
    }

    pub fn timeout(&self, kind: TimerKind) -> Duration {
        self.timeouts.get(kind)
    }

    pub(crate) fn set_state(&mut self, new_state: AssociationState) {
        if new_state != self.state {
            log::debug!(
                "[{}] state change: '{}' => '{}'",
                self.name,
                self.state,
                new_state
            );
        }
        self.state = new_state;
        self.state_entered_at = Instant::now();
    }

    pub(crate) fn counter_inc(&mut self, counter: Counter) -> u32 {
        let c = &mut self.counters[counter as usize];
        *c = c.saturating_add(1);
        *c
    }

    pub(crate) fn counter_reset(&mut self, counter: Counter) {
        self.counters[counter as usize] = 0;
    }

    pub(crate) fn transport(&self, path: TransportIdx) -> Result<&Transport> {
        self.transports
            .get(path)
            .ok_or(Error::ErrTransportNotFound(path))
    }

    pub(crate) fn transport_mut(&mut self, path: TransportIdx) -> Result<&mut Transport> {
        self.transports
            .get_mut(path)
            .ok_or(Error::ErrTransportNotFound(path))
    }

    pub fn transport_idx(&self, addr: &SocketAddr) -> Option<TransportIdx> {
        self.transports.iter().position(|t| t.addr == *addr)
    }

    pub(crate) fn add_transport(&mut self, addr: SocketAddr) -> TransportIdx {
        if let Some(idx) = self.transport_idx(&addr) {
            return idx;
        }
        log::debug!("[{}] new peer transport {}", self.name, addr);
        self.transports.push(Transport::new(addr, &self.config));
        self.transports.len() - 1
    }

    /// Prefer the primary path, otherwise the first active path in
    /// insertion order. Keeps the current path when none is active.
    pub(crate) fn select_active_path(&mut self) {
        let next = if self
            .transports
            .get(self.primary_path)
            .map_or(false, |t| t.active)
        {
            Some(self.primary_path)
        } else {
            self.transports.iter().position(|t| t.active)
        };

        if let Some(next) = next {
            if next != self.active_path {
                log::debug!(
                    "[{}] active path {} => {}",
                    self.name,
                    self.active_path,
                    next
                );
            }
            self.active_path = next;
        }
    }

    /// An active path other than `from`, falling back to `from` itself
    pub(crate) fn alternate_path(&self, from: Option<TransportIdx>) -> TransportIdx {
        let Some(from) = from else {
            return self.active_path;
        };
        let n = self.transports.len();
        (1..n)
            .map(|i| (from + i) % n)
            .find(|&i| self.transports[i].active)
            .unwrap_or(from)
    }

    /// Apply the peer's INIT or INIT ACK
    pub(crate) fn process_init(&mut self, init: &ChunkInit) {
        self.peer_verification_tag = init.initiate_tag;
        self.tsn_map = TsnMap::new(init.initial_tsn);
        self.outq
            .set_peer_rwnd(init.advertised_receiver_window_credit);
        self.num_outbound_streams =
            std::cmp::min(self.num_outbound_streams, init.num_inbound_streams);
        self.num_inbound_streams =
            std::cmp::min(self.num_inbound_streams, init.num_outbound_streams);
        self.peer_ecn_capable = init.ecn_capable;
        for addr in &init.addresses {
            self.add_transport(*addr);
        }
        if init.is_ack {
            self.peer_cookie = init.state_cookie.clone();
        }
    }

    /// Take over the peer parameters of `new`, after the peer restarted
    pub(crate) fn update(&mut self, new: Association) {
        log::debug!(
            "[{}] peer restarted: peer tag {:08x} => {:08x}",
            self.name,
            self.peer_verification_tag,
            new.peer_verification_tag
        );
        self.peer_verification_tag = new.peer_verification_tag;
        self.tsn_map = new.tsn_map;
        self.num_outbound_streams = new.num_outbound_streams;
        self.num_inbound_streams = new.num_inbound_streams;
        self.peer_ecn_capable = new.peer_ecn_capable;
        self.sack_needed = false;
        self.dup_tsns.clear();
        self.need_ecn_echo = false;

        for t in &new.transports {
            self.add_transport(t.addr);
        }
        for t in self.transports.iter_mut() {
            t.reset();
        }
        self.outq.restart(&mut self.transports);
        self.outq.set_peer_rwnd(new.outq.peer_rwnd());
        self.last_cwr_tsn = self.outq.next_tsn().wrapping_sub(1);
        self.counters = [0; COUNTER_COUNT];
    }

    /// The ECNE chunk to bundle while a congestion echo is owed
    pub(crate) fn pending_ecne(&self) -> Option<u32> {
        if self.need_ecn_echo {
            Some(self.last_ecne_tsn)
        } else {
            None
        }
    }

    pub(crate) fn flush(
        &mut self,
        ecne: Option<Chunk>,
        rate_limited: bool,
        transmits: &mut VecDeque<Transmit>,
    ) -> FlushOutcome {
        let mut ctx = FlushContext {
            transports: &mut self.transports,
            active_path: self.active_path,
            state: self.state,
            source_port: self.source_port,
            destination_port: self.destination_port,
            peer_tag: self.peer_verification_tag,
            ecn_capable: self.peer_ecn_capable,
            ecne,
            rate_limited,
            now: Instant::now(),
            transmits,
        };
        let outcome = self.outq.flush(&mut ctx);
        if outcome.packets > 0 {
            log::trace!(
                "[{}] flushed {} packets, t3 paths {:?}",
                self.name,
                outcome.packets,
                outcome.t3_paths
            );
        }
        outcome
    }

    pub(crate) fn hold(&self) -> AssociationRef {
        AssociationRef::new(&self.liveness)
    }

    /// References currently held by armed timers
    pub fn timer_refs(&self) -> usize {
        Arc::strong_count(&self.liveness) - 1
    }

    pub fn is_dead(&self) -> bool {
        self.liveness.is_dead()
    }

    /// Marks the association dead and cancels every timer
    pub(crate) fn kill(&mut self) {
        self.liveness.kill();
        self.cancel_all_timers();
    }

    pub(crate) fn cancel_all_timers(&mut self) {
        for slot in self.timers.iter_mut() {
            slot.take();
        }
        for t in self.transports.iter_mut() {
            t.t3_rtx.take();
            t.hb_timer.take();
        }
    }

    fn timer_slot(&mut self, id: TimerId) -> Result<&mut Option<PendingTimer>> {
        match id.path {
            None if id.kind.is_per_path() => Err(Error::ErrTimerPerPath(id.kind)),
            None => Ok(&mut self.timers[id.kind as usize]),
            Some(path) => {
                let t = self.transport_mut(path)?;
                match id.kind {
                    TimerKind::T3Rtx => Ok(&mut t.t3_rtx),
                    TimerKind::Heartbeat => Ok(&mut t.hb_timer),
                    kind => Err(Error::ErrInternalBug(format!(
                        "{kind} is not a per-path timer"
                    ))),
                }
            }
        }
    }

    pub(crate) fn is_timer_pending(&self, id: TimerId) -> bool {
        match id.path {
            None => self.timers[id.kind as usize].is_some(),
            Some(path) => self.transports.get(path).map_or(false, |t| match id.kind {
                TimerKind::T3Rtx => t.t3_rtx.is_some(),
                TimerKind::Heartbeat => t.hb_timer.is_some(),
                _ => false,
            }),
        }
    }

    /// Arm the timer, or move its deadline when it is already pending
    pub(crate) fn start_timer(
        &mut self,
        timers: &TimerContext,
        id: TimerId,
        timeout: Duration,
    ) -> Result<()> {
        if timeout.is_zero() {
            return Err(Error::ErrTimerTimeoutUnset(id.kind));
        }

        let handle = self.handle;
        let aref = self.hold();
        self.timer_generation += 1;
        let generation = self.timer_generation;

        let slot = self.timer_slot(id)?;
        if let Some(pending) = slot.as_ref() {
            pending.restart(timeout);
            return Ok(());
        }
        *slot = Some(PendingTimer::arm(
            timers, handle, id, generation, aref, timeout,
        ));
        Ok(())
    }

    pub(crate) fn stop_timer(&mut self, id: TimerId) -> Result<()> {
        if self.timer_slot(id)?.take().is_some() {
            log::trace!("[{}] timer {} stopped", self.name, id);
        }
        Ok(())
    }

    /// Clears the slot of a timer that just fired. Returns false when the
    /// slot was stopped or re-armed after this arming expired.
    pub(crate) fn take_fired_timer(&mut self, id: TimerId, generation: u64) -> bool {
        match self.timer_slot(id) {
            Ok(slot) if slot.as_ref().map(|t| t.generation()) == Some(generation) => {
                slot.take();
                true
            }
            _ => false,
        }
    }
}
