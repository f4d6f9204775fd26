use super::command::{Command, CommandSeq};
use super::dispatcher;
use super::{EventPayload, EventSubtype, EventType, OtherEvent, SmContext};
use crate::association::state::AssociationState;
use crate::association::timer::{backoff, Counter, TimerKind};
use crate::association::transport::{LowerCwndReason, TransportIdx};
use crate::association::{random_nonzero_u32, Association, MAX_DUP_TSNS};
use crate::chunk::chunk_init::ChunkInit;
use crate::chunk::chunk_selective_ack::ChunkSelectiveAck;
use crate::chunk::Chunk;
use crate::endpoint::{AssociationHandle, Endpoint};
use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::queue::ulp_queue::{AssocChangeState, Notification, PeerAddrState};
use crate::shared::Transmit;
use crate::timer::TimerId;
use crate::util::*;

use log::{debug, trace, warn};
use std::net::SocketAddr;
use std::time::Instant;

/// Executes `commands` in order against the association behind `handle`.
///
/// Output queued by `Reply` is held back and flushed once, when the
/// sequence ends or right before the association is deleted.
pub(crate) fn interpret(
    ctx: &mut SmContext<'_>,
    subtype: EventSubtype,
    handle: Option<AssociationHandle>,
    commands: CommandSeq,
) -> Result<()> {
    let mut interpreter = Interpreter {
        subtype,
        handle,
        commands,
        corked: false,
        status: Ok(()),
    };

    let result = interpreter.drain(ctx);
    if let Err(err) = &result {
        if err.is_internal_bug() {
            return result;
        }
    }
    let uncorked = interpreter.uncork(ctx);
    result.and(uncorked).and(interpreter.status)
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Halt,
}

struct Interpreter {
    subtype: EventSubtype,
    handle: Option<AssociationHandle>,
    commands: CommandSeq,
    corked: bool,
    /// Status reported back for the event, set by `ReportError` and the
    /// failure commands
    status: Result<()>,
}

fn association(
    endpoint: &mut Endpoint,
    handle: Option<AssociationHandle>,
) -> Result<&mut Association> {
    let handle = handle.ok_or(Error::ErrNoAssociation)?;
    endpoint
        .association_mut(handle)
        .ok_or(Error::ErrAssociationDeleted)
}

impl Interpreter {
    fn name<'c>(&self, ctx: &'c SmContext<'_>) -> &'c str {
        self.handle
            .and_then(|h| ctx.endpoint.association(h))
            .map_or("-", |a| a.name())
    }

    fn drain(&mut self, ctx: &mut SmContext<'_>) -> Result<()> {
        while let Some(command) = self.commands.pop_front() {
            trace!("[{}] {}: {}", self.name(ctx), self.subtype, command);
            if self.execute(ctx, command)? == Flow::Halt {
                return Ok(());
            }
        }
        Ok(())
    }

    fn uncork(&mut self, ctx: &mut SmContext<'_>) -> Result<()> {
        if !self.corked {
            return Ok(());
        }
        match self.handle {
            Some(h) if ctx.endpoint.association(h).is_some() => self.flush(ctx, false),
            _ => Ok(()),
        }
    }

    fn execute(&mut self, ctx: &mut SmContext<'_>, command: Command) -> Result<Flow> {
        match command {
            Command::NewAssoc(a) => {
                if let Some(h) = self.handle {
                    return Err(Error::ErrInternalBug(format!(
                        "new association while {h} is current"
                    )));
                }
                let h = ctx.endpoint.add_association(*a);
                ctx.endpoint.hash(h);
                self.handle = Some(h);
            }
            Command::UpdateAssoc(new) => association(ctx.endpoint, self.handle)?.update(*new),
            Command::PurgeOutqueue => {
                let a = association(ctx.endpoint, self.handle)?;
                a.outq.teardown(&mut a.transports);
            }
            Command::DeleteAssoc => {
                self.delete(ctx)?;
                return Ok(Flow::Halt);
            }
            Command::NewState(state) => association(ctx.endpoint, self.handle)?.set_state(state),

            Command::ReportTsn(tsn) => {
                association(ctx.endpoint, self.handle)?.tsn_map.mark(tsn);
            }
            Command::GenSack { force } => self.gen_sack(ctx, force)?,
            Command::ProcessSack(sack) => {
                self.process_sack(ctx, sack)?;
                if let Some(h) = self.handle {
                    if ctx.endpoint.association(h).is_none() {
                        self.handle = None;
                        self.corked = false;
                        return Ok(Flow::Halt);
                    }
                }
            }
            Command::GenInitAck { init, remote } => self.gen_init_ack(ctx, init, remote)?,
            Command::PeerInit(init) => {
                let a = association(ctx.endpoint, self.handle)?;
                a.process_init(&init);
                let h = a.handle();
                ctx.endpoint.hash(h);
            }
            Command::GenCookieEcho { error } => {
                let a = association(ctx.endpoint, self.handle)?;
                let chunk = ctx
                    .factory
                    .make_cookie_echo(a)
                    .ok_or(Error::ErrNoMemory)?;
                self.commands.push_back(Command::Reply(chunk));
                if let Some(error) = error {
                    self.commands.push_back(Command::Reply(Chunk::Error(error)));
                }
            }
            Command::GenShutdown => {
                let a = association(ctx.endpoint, self.handle)?;
                let chunk = ctx.factory.make_shutdown(a).ok_or(Error::ErrNoMemory)?;
                self.commands.push_back(Command::Reply(chunk));
            }

            Command::ChunkUlp(data) => {
                let a = association(ctx.endpoint, self.handle)?;
                a.stats.inc_datas();
                a.ulpq.deliver_data(a.id(), data);
            }
            Command::EventUlp(notification) => {
                let a = association(ctx.endpoint, self.handle)?;
                a.ulpq.deliver_event(a.id(), notification);
            }

            Command::Reply(chunk) => self.reply(ctx, None, chunk)?,
            Command::ReplyOn(path, chunk) => self.reply(ctx, Some(path), chunk)?,
            Command::SendPkt(transmit) => ctx.endpoint.transmits.push_back(transmit),
            Command::Retran(path) => {
                let a = association(ctx.endpoint, self.handle)?;
                a.transport_mut(path)?
                    .lower_cwnd(LowerCwndReason::T3Rtx, Instant::now());
                let n = a
                    .outq
                    .mark_for_retransmission(Some(path), &mut a.transports);
                a.stats.inc_t3timeouts();
                debug!("[{}] T3-rtx on path {}: {} chunks to resend", a.name(), path, n);
                self.flush(ctx, true)?;
            }
            Command::Flush => self.flush(ctx, false)?,

            Command::EcnCe(tsn) => {
                let a = association(ctx.endpoint, self.handle)?;
                a.last_ecne_tsn = tsn;
                a.need_ecn_echo = true;
            }
            Command::EcnEcne(tsn) => self.ecn_ecne(ctx, tsn)?,
            Command::EcnCwr(tsn) => {
                let a = association(ctx.endpoint, self.handle)?;
                if sna32lte(a.last_ecne_tsn, tsn) {
                    a.need_ecn_echo = false;
                }
            }

            Command::SetupT2 => {
                let a = association(ctx.endpoint, self.handle)?;
                let path = a.alternate_path(a.shutdown_last_sent_to);
                let rto = a.transport(path)?.rto();
                a.timeouts.set(TimerKind::T2Shutdown, rto);
                a.shutdown_last_sent_to = Some(path);
            }
            Command::TimerStart(kind) | Command::TimerRestart(kind) => {
                if kind.is_per_path() {
                    return Err(Error::ErrTimerPerPath(kind));
                }
                let a = association(ctx.endpoint, self.handle)?;
                let timeout = a.timeouts.get(kind);
                a.start_timer(ctx.timers, TimerId::association(kind), timeout)?;
            }
            Command::TimerStop(kind) => {
                if kind.is_per_path() {
                    return Err(Error::ErrTimerPerPath(kind));
                }
                association(ctx.endpoint, self.handle)?.stop_timer(TimerId::association(kind))?;
            }
            Command::InitTimerBackoff(kind) => {
                if kind.is_per_path() {
                    return Err(Error::ErrTimerPerPath(kind));
                }
                let a = association(ctx.endpoint, self.handle)?;
                let timeout = backoff(a.timeouts.get(kind), a.config.max_init_timeout());
                a.timeouts.set(kind, timeout);
                let attempts = a.counter_inc(Counter::InitError);
                a.outq.mark_for_retransmission(None, &mut a.transports);
                debug!(
                    "[{}] {} backed off to {:?} after {} attempts",
                    a.name(),
                    kind,
                    timeout,
                    attempts
                );
                a.start_timer(ctx.timers, TimerId::association(kind), timeout)?;
            }
            Command::HbTimersStart => {
                let a = association(ctx.endpoint, self.handle)?;
                let interval = a.config.heartbeat_interval();
                for path in 0..a.transports.len() {
                    let timeout = a.transports[path].heartbeat_timeout(interval);
                    a.start_timer(
                        ctx.timers,
                        TimerId::path(TimerKind::Heartbeat, path),
                        timeout,
                    )?;
                }
            }
            Command::HbTimersStop => {
                let a = association(ctx.endpoint, self.handle)?;
                for path in 0..a.transports.len() {
                    a.stop_timer(TimerId::path(TimerKind::Heartbeat, path))?;
                }
            }
            Command::HbTimerUpdate(path) => {
                let a = association(ctx.endpoint, self.handle)?;
                let interval = a.config.heartbeat_interval();
                let t = a.transport_mut(path)?;
                if t.flight_size == 0 {
                    t.lower_cwnd(LowerCwndReason::Inactive, Instant::now());
                }
                let timeout = t.heartbeat_timeout(interval);
                a.start_timer(
                    ctx.timers,
                    TimerId::path(TimerKind::Heartbeat, path),
                    timeout,
                )?;
            }
            Command::T3RtxTimersStop => {
                let a = association(ctx.endpoint, self.handle)?;
                for path in 0..a.transports.len() {
                    a.stop_timer(TimerId::path(TimerKind::T3Rtx, path))?;
                }
            }

            Command::InitFailed(err) => {
                let a = association(ctx.endpoint, self.handle)?;
                warn!("[{}] association could not be started: {}", a.name(), err);
                a.ulpq.deliver_event(
                    a.id(),
                    Notification::AssocChange(AssocChangeState::CantStartAssoc),
                );
                self.status = Err(err);
                self.commands.push_back(Command::DeleteAssoc);
            }
            Command::AssocFailed(err) => {
                let a = association(ctx.endpoint, self.handle)?;
                warn!("[{}] association failed: {}", a.name(), err);
                a.ulpq.deliver_event(
                    a.id(),
                    Notification::AssocChange(AssocChangeState::CommLost),
                );
                a.set_state(AssociationState::Closed);
                self.status = Err(err);
                self.commands.push_back(Command::DeleteAssoc);
            }
            Command::CounterInc(counter) => {
                association(ctx.endpoint, self.handle)?.counter_inc(counter);
            }
            Command::CounterReset(counter) => {
                association(ctx.endpoint, self.handle)?.counter_reset(counter);
            }

            Command::ReportDup(tsn) => {
                let a = association(ctx.endpoint, self.handle)?;
                if a.dup_tsns.len() < MAX_DUP_TSNS {
                    a.dup_tsns.push(tsn);
                }
                a.stats.inc_dup_tsns();
            }
            Command::ReportBigGap(tsn) => {
                let a = association(ctx.endpoint, self.handle)?;
                a.stats.inc_big_gaps();
                debug!(
                    "[{}] TSN {} too far beyond cumulative TSN {}",
                    a.name(),
                    tsn,
                    a.tsn_map.cumulative_ack()
                );
            }
            Command::ReportBadTag(tag) => {
                match self.handle.and_then(|h| ctx.endpoint.association(h)) {
                    Some(a) => {
                        a.stats.inc_bad_tags();
                        debug!(
                            "[{}] bad verification tag {:08x}, expected {:08x}",
                            a.name(),
                            tag,
                            a.id()
                        );
                    }
                    None => debug!("bad verification tag {:08x}", tag),
                }
            }
            Command::SetBindAddrs(addrs) => {
                let a = association(ctx.endpoint, self.handle)?;
                for addr in addrs {
                    if !a.bind_addrs.contains(&addr) {
                        a.bind_addrs.push(addr);
                    }
                }
            }

            Command::Strike(path) => self.strike(ctx, path)?,
            Command::TransportDown(path) => {
                let a = association(ctx.endpoint, self.handle)?;
                let t = a.transport_mut(path)?;
                let was_active = std::mem::replace(&mut t.active, false);
                let addr = t.addr;
                if was_active {
                    a.ulpq.deliver_event(
                        a.id(),
                        Notification::PeerAddrChange {
                            addr,
                            state: PeerAddrState::Unreachable,
                        },
                    );
                }
                a.select_active_path();
            }
            Command::TransportUp { path, sent_at } => {
                let a = association(ctx.endpoint, self.handle)?;
                a.counter_reset(Counter::OverallError);
                let t = a.transport_mut(path)?;
                t.error_count = 0;
                t.hb_outstanding = false;
                if let Some(sent_at) = sent_at {
                    let rtt = Instant::now().saturating_duration_since(sent_at);
                    t.rto_mgr.set_new_rtt(rtt.as_millis() as u64);
                }
                let was_active = std::mem::replace(&mut t.active, true);
                let addr = t.addr;
                if !was_active {
                    a.ulpq.deliver_event(
                        a.id(),
                        Notification::PeerAddrChange {
                            addr,
                            state: PeerAddrState::Available,
                        },
                    );
                }
                a.select_active_path();
            }

            Command::ReportError(err) => self.status = Err(err),
            Command::ProcessCtsn(tsn) => {
                let a = association(ctx.endpoint, self.handle)?;
                let sack = ChunkSelectiveAck {
                    cumulative_tsn_ack: tsn,
                    advertised_receiver_window_credit: a
                        .outq
                        .peer_rwnd()
                        .saturating_add(a.outq.outstanding_bytes()),
                    gap_ack_blocks: vec![],
                    duplicate_tsn: vec![],
                };
                self.commands.push_back(Command::ProcessSack(sack));
            }
            Command::DiscardPacket => ctx.packet_discarded = true,
        }

        Ok(Flow::Continue)
    }

    fn reply(
        &mut self,
        ctx: &mut SmContext<'_>,
        path: Option<TransportIdx>,
        chunk: Chunk,
    ) -> Result<()> {
        let a = association(ctx.endpoint, self.handle)?;
        let path = match (&chunk, path) {
            (_, Some(path)) => {
                a.transport(path)?;
                Some(path)
            }
            (Chunk::Shutdown(_) | Chunk::ShutdownAck, None) => a.shutdown_last_sent_to,
            _ => None,
        };
        if let (Chunk::Heartbeat(_), Some(path)) = (&chunk, path) {
            a.transport_mut(path)?.hb_outstanding = true;
        }
        a.outq.push(chunk, path);
        self.corked = true;
        Ok(())
    }

    fn flush(&mut self, ctx: &mut SmContext<'_>, rate_limited: bool) -> Result<()> {
        let handle = self.handle.ok_or(Error::ErrNoAssociation)?;
        let (a, transmits) = ctx
            .endpoint
            .association_and_transmits(handle)
            .ok_or(Error::ErrAssociationDeleted)?;

        let ecne = match a.pending_ecne() {
            Some(tsn) => Some(ctx.factory.make_ecne(a, tsn).ok_or(Error::ErrNoMemory)?),
            None => None,
        };
        let outcome = a.flush(ecne, rate_limited, transmits);
        self.corked = false;

        for path in outcome.t3_paths {
            let id = TimerId::path(TimerKind::T3Rtx, path);
            if !a.is_timer_pending(id) {
                let rto = a.transport(path)?.rto();
                a.start_timer(ctx.timers, id, rto)?;
            }
        }
        Ok(())
    }

    fn delete(&mut self, ctx: &mut SmContext<'_>) -> Result<()> {
        let handle = self.handle.ok_or(Error::ErrNoAssociation)?;
        if self.corked {
            if let Err(err) = self.flush(ctx, false) {
                if err.is_internal_bug() {
                    return Err(err);
                }
                warn!("[{}] final flush failed: {}", self.name(ctx), err);
            }
        }

        let mut a = ctx
            .endpoint
            .remove_association(handle)
            .ok_or(Error::ErrAssociationDeleted)?;
        a.kill();
        debug!("[{}] association deleted", a.name());
        if !self.commands.is_empty() {
            trace!(
                "[{}] {} commands dropped after deletion",
                a.name(),
                self.commands.len()
            );
            self.commands.clear();
        }

        self.handle = None;
        self.corked = false;
        Ok(())
    }

    fn gen_sack(&mut self, ctx: &mut SmContext<'_>, force: bool) -> Result<()> {
        let a = association(ctx.endpoint, self.handle)?;
        let sack_timer = TimerId::association(TimerKind::Sack);

        if !(force || a.tsn_map.has_gap() || a.sack_needed) {
            a.sack_needed = true;
            let timeout = a.timeouts.get(TimerKind::Sack);
            return a.start_timer(ctx.timers, sack_timer, timeout);
        }

        let sack = ctx.factory.make_sack(a).ok_or(Error::ErrNoMemory)?;
        a.sack_needed = false;
        a.dup_tsns.clear();
        a.stats.inc_sacks();
        a.stop_timer(sack_timer)?;
        self.reply(ctx, None, sack)
    }

    fn process_sack(&mut self, ctx: &mut SmContext<'_>, sack: ChunkSelectiveAck) -> Result<()> {
        let a = association(ctx.endpoint, self.handle)?;
        let outcome = a.outq.process_sack(&sack, &mut a.transports);
        if outcome.cumulative_advanced {
            a.counter_reset(Counter::OverallError);
        }
        for path in &outcome.stop_t3 {
            a.stop_timer(TimerId::path(TimerKind::T3Rtx, *path))?;
        }
        for path in &outcome.restart_t3 {
            let rto = a.transport(*path)?.rto();
            a.start_timer(ctx.timers, TimerId::path(TimerKind::T3Rtx, *path), rto)?;
        }

        if outcome.has_pending {
            return self.flush(ctx, false);
        }

        let state = a.state();
        let handle = a.handle();
        dispatcher::run(
            ctx,
            EventType::Other,
            EventSubtype::Other(OtherEvent::NoPendingTsn),
            state,
            Some(handle),
            EventPayload::None,
        )
    }

    /// INIT ACK is never bundled, so it always goes out in a packet of its
    /// own, tagged with the initiate tag of the INIT
    fn gen_init_ack(
        &mut self,
        ctx: &mut SmContext<'_>,
        init: ChunkInit,
        remote: SocketAddr,
    ) -> Result<()> {
        let (my_tag, my_initial_tsn) = match self.handle.and_then(|h| ctx.endpoint.association(h)) {
            Some(a) => (a.id(), a.my_initial_tsn()),
            None => (random_nonzero_u32(), rand::random::<u32>()),
        };
        let chunk = ctx
            .factory
            .make_init_ack(ctx.endpoint.config(), &init, my_tag, my_initial_tsn)
            .ok_or(Error::ErrNoMemory)?;

        self.commands.push_back(Command::SendPkt(Transmit {
            now: Instant::now(),
            remote,
            ecn: None,
            local_ip: None,
            packet: Packet {
                source_port: ctx.endpoint.local_port(),
                destination_port: remote.port(),
                verification_tag: init.initiate_tag,
                chunks: vec![chunk],
            },
        }));
        Ok(())
    }

    fn ecn_ecne(&mut self, ctx: &mut SmContext<'_>, tsn: u32) -> Result<()> {
        let a = association(ctx.endpoint, self.handle)?;
        if sna32lt(a.last_cwr_tsn, tsn) {
            if let Some(path) = a.outq.transport_for_tsn(tsn) {
                if a
                    .transport_mut(path)?
                    .lower_cwnd(LowerCwndReason::Ecne, Instant::now())
                {
                    a.stats.inc_ecne_reductions();
                    debug!("[{}] cwnd of path {} lowered on ECNE({})", a.name(), path, tsn);
                }
            }
            a.last_cwr_tsn = a.outq.next_tsn().wrapping_sub(1);
        }

        match ctx.factory.make_cwr(a, a.last_cwr_tsn) {
            Some(cwr) => self.reply(ctx, None, cwr),
            None => {
                debug!("[{}] no memory for CWR, peer will echo again", a.name());
                Ok(())
            }
        }
    }

    fn strike(&mut self, ctx: &mut SmContext<'_>, path: TransportIdx) -> Result<()> {
        let a = association(ctx.endpoint, self.handle)?;
        a.counter_inc(Counter::OverallError);

        let t = a.transport_mut(path)?;
        t.error_count = t.error_count.saturating_add(1);
        t.rto_mgr.backoff();
        let failed = t.active && t.error_count > t.error_threshold;
        if failed {
            t.active = false;
        }
        let (addr, errors) = (t.addr, t.error_count);

        if failed {
            warn!(
                "[{}] path {} ({}) unreachable after {} errors",
                a.name(),
                path,
                addr,
                errors
            );
            a.ulpq.deliver_event(
                a.id(),
                Notification::PeerAddrChange {
                    addr,
                    state: PeerAddrState::Unreachable,
                },
            );
            a.select_active_path();
        }
        Ok(())
    }
}
