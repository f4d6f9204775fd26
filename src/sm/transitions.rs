//! The default transition table.
//!
//! Every function here only decides: it reads the endpoint and the
//! association and returns the commands that carry the decision out.

use super::command::Command;
use super::table::StateTable;
use super::{Disposition, EventPayload, EventSubtype, InboundChunk, OtherEvent, Primitive, Transition};
use crate::association::state::AssociationState::{self, *};
use crate::association::timer::{Counter, TimerKind};
use crate::association::Association;
use crate::chunk::chunk_cookie_echo::StateCookie;
use crate::chunk::chunk_type::*;
use crate::chunk::Chunk;
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::error_cause::{ErrorCauseCode, NO_ERROR, NO_USER_DATA, PROTOCOL_VIOLATION, USER_INITIATED_ABORT};
use crate::packet::Packet;
use crate::queue::ulp_queue::{AssocChangeState, Notification};
use crate::shared::Transmit;
use crate::tsn_map::TsnStatus;
use crate::util::*;

use std::sync::Arc;
use std::time::Instant;

/// Unwraps the `Ok` side or returns the `Err` transition
macro_rules! try_transition {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(t) => return t,
        }
    };
}

const RECEIVING: [AssociationState; 3] = [Established, ShutdownPending, ShutdownSent];
const SACKING: [AssociationState; 3] = [Established, ShutdownPending, ShutdownReceived];
const CONNECTED: [AssociationState; 4] =
    [Established, ShutdownPending, ShutdownSent, ShutdownReceived];
const SHUTTING_DOWN: [AssociationState; 4] =
    [ShutdownPending, ShutdownSent, ShutdownReceived, ShutdownAckSent];
const ALIVE: [AssociationState; 7] = [
    CookieWait,
    CookieEchoed,
    Established,
    ShutdownPending,
    ShutdownSent,
    ShutdownReceived,
    ShutdownAckSent,
];

fn chunk(t: ChunkType) -> EventSubtype {
    EventSubtype::Chunk(t)
}

fn timeout(k: TimerKind) -> EventSubtype {
    EventSubtype::Timeout(k)
}

fn primitive(p: Primitive) -> EventSubtype {
    EventSubtype::Primitive(p)
}

/// Builds the table used by sockets unless they are given another one
pub fn default_table() -> StateTable {
    let mut t = StateTable::new(discard, timer_ignore, ignore_other, primitive_error);

    // handshake
    t.set(Closed, chunk(CT_INIT), do_init)
        .set_states(&[CookieWait, CookieEchoed, Established], chunk(CT_INIT), do_dup_init)
        .set(CookieWait, chunk(CT_INIT_ACK), do_init_ack)
        .set(Closed, chunk(CT_COOKIE_ECHO), do_cookie_echo)
        .set_states(&[CookieEchoed, Established], chunk(CT_COOKIE_ECHO), do_dup_cookie_echo)
        .set(CookieEchoed, chunk(CT_COOKIE_ACK), do_cookie_ack)
        .set(CookieWait, timeout(TimerKind::T1Init), t1_init_expire)
        .set(CookieEchoed, timeout(TimerKind::T1Cookie), t1_cookie_expire);

    // data, SACK and ECN
    t.set_states(&RECEIVING, chunk(CT_PAYLOAD_DATA), eat_data)
        .set_states(&SACKING, chunk(CT_SACK), eat_sack)
        .set_states(&CONNECTED, chunk(CT_ECNE), ecn_ecne)
        .set_states(&CONNECTED, chunk(CT_CWR), ecn_cwr)
        .set_states(&CONNECTED, timeout(TimerKind::Sack), sack_expire)
        .set_states(
            &[CookieEchoed, Established, ShutdownPending, ShutdownSent, ShutdownReceived],
            timeout(TimerKind::T3Rtx),
            t3_rtx_expire,
        )
        .set(Established, EventSubtype::Other(OtherEvent::NoPendingTsn), all_acked)
        .set(ShutdownPending, EventSubtype::Other(OtherEvent::NoPendingTsn), start_shutdown)
        .set(ShutdownReceived, EventSubtype::Other(OtherEvent::NoPendingTsn), send_shutdown_ack);

    // path management
    t.set_states(&CONNECTED, chunk(CT_HEARTBEAT), beat)
        .set_states(&CONNECTED, chunk(CT_HEARTBEAT_ACK), backbeat)
        .set_states(&SACKING, timeout(TimerKind::Heartbeat), sendbeat);

    // shutdown
    t.set_states(&[Established, ShutdownPending], chunk(CT_SHUTDOWN), do_shutdown)
        .set(ShutdownReceived, chunk(CT_SHUTDOWN), do_shutdown_again)
        .set_states(&[ShutdownSent, ShutdownAckSent], chunk(CT_SHUTDOWN), send_shutdown_ack)
        .set_states(&[ShutdownSent, ShutdownAckSent], chunk(CT_SHUTDOWN_ACK), do_shutdown_final)
        .set(Closed, chunk(CT_SHUTDOWN_ACK), ootb_shutdown_ack)
        .set(ShutdownAckSent, chunk(CT_SHUTDOWN_COMPLETE), do_shutdown_complete)
        .set(ShutdownSent, timeout(TimerKind::T2Shutdown), t2_shutdown_expire)
        .set(ShutdownAckSent, timeout(TimerKind::T2Shutdown), t2_shutdown_expire)
        .set(ShutdownSent, timeout(TimerKind::T5ShutdownGuard), t5_guard_expire)
        .set(Established, timeout(TimerKind::Autoclose), prm_shutdown);

    // abort and errors
    t.set_states(&[CookieWait, CookieEchoed], chunk(CT_ABORT), do_handshake_abort)
        .set_states(&[Established], chunk(CT_ABORT), do_abort)
        .set_states(&SHUTTING_DOWN, chunk(CT_ABORT), do_abort)
        .set_states(&ALIVE, chunk(CT_ERROR), do_operation_error);

    // primitives
    t.set(Closed, primitive(Primitive::Associate), prm_associate)
        .set_states(&[CookieWait, CookieEchoed, Established], primitive(Primitive::Send), prm_send)
        .set_states(&SHUTTING_DOWN, primitive(Primitive::Send), prm_send_shutting_down)
        .set(Established, primitive(Primitive::Shutdown), prm_shutdown)
        .set_states(&[CookieWait, CookieEchoed], primitive(Primitive::Shutdown), prm_shutdown_handshake)
        .set_states(&SHUTTING_DOWN, primitive(Primitive::Shutdown), ignore_primitive)
        .set_states(&[CookieWait, CookieEchoed], primitive(Primitive::Abort), prm_abort_handshake)
        .set(Established, primitive(Primitive::Abort), prm_abort)
        .set_states(&SHUTTING_DOWN, primitive(Primitive::Abort), prm_abort)
        .set_states(&SACKING, primitive(Primitive::RequestHeartbeat), prm_request_heartbeat);

    t
}

// Defaults and generic outcomes

fn discard(_: &Endpoint, _: Option<&Association>, _: EventSubtype, _: EventPayload) -> Transition {
    Transition::only(Disposition::Discard)
}

fn timer_ignore(
    _: &Endpoint,
    _: Option<&Association>,
    _: EventSubtype,
    _: EventPayload,
) -> Transition {
    Transition::only(Disposition::Consume)
}

fn ignore_other(
    _: &Endpoint,
    _: Option<&Association>,
    _: EventSubtype,
    _: EventPayload,
) -> Transition {
    Transition::only(Disposition::Discard)
}

fn ignore_primitive(
    _: &Endpoint,
    _: Option<&Association>,
    _: EventSubtype,
    _: EventPayload,
) -> Transition {
    Transition::only(Disposition::Discard)
}

fn primitive_error(
    _: &Endpoint,
    a: Option<&Association>,
    _: EventSubtype,
    _: EventPayload,
) -> Transition {
    let state = a.map_or(Closed, |a| a.state());
    Transition::consume([Command::ReportError(Error::ErrPrimitiveNotAllowed(state))])
}

fn bug() -> Transition {
    Transition::only(Disposition::Bug)
}

fn violation() -> Transition {
    Transition::new(Disposition::Violation, [Command::DiscardPacket])
}

fn bad_tag(c: &InboundChunk) -> Transition {
    Transition::new(
        Disposition::Discard,
        [
            Command::ReportBadTag(c.verification_tag),
            Command::DiscardPacket,
        ],
    )
}

/// The association and chunk of a chunk event whose packet carries our tag
fn checked(
    a: Option<&Association>,
    payload: EventPayload,
) -> Result<(&Association, InboundChunk), Transition> {
    let (Some(a), EventPayload::Chunk(c)) = (a, payload) else {
        return Err(bug());
    };
    if c.verification_tag != a.id() {
        return Err(bad_tag(&c));
    }
    Ok((a, c))
}

/// Like `checked`, also accepting the peer's tag, as ABORT and SHUTDOWN
/// COMPLETE may be sent with the T bit set
fn checked_reflected(
    a: Option<&Association>,
    payload: EventPayload,
) -> Result<(&Association, InboundChunk), Transition> {
    let (Some(a), EventPayload::Chunk(c)) = (a, payload) else {
        return Err(bug());
    };
    let reflected = a.peer_verification_tag() != 0 && c.verification_tag == a.peer_verification_tag();
    if c.verification_tag != a.id() && !reflected {
        return Err(bad_tag(&c));
    }
    Ok((a, c))
}

fn expired_path(a: Option<&Association>, payload: EventPayload) -> Result<(&Association, usize), Transition> {
    match (a, payload) {
        (Some(a), EventPayload::Timeout { path: Some(path) }) if path < a.transports().len() => {
            Ok((a, path))
        }
        _ => Err(bug()),
    }
}

/// ABORT the association after a protocol violation, too many
/// retransmissions or an exhausted guard timer. `NO_ERROR` sends an ABORT
/// without a cause. The ABORT chunk itself is best effort.
fn fail_association(ep: &Endpoint, a: &Association, cause: ErrorCauseCode, err: Error) -> Transition {
    let mut commands = vec![];
    if let Some(abort) = ep.factory().make_abort(Some(a), cause) {
        commands.push(Command::Reply(abort));
    }
    commands.push(Command::AssocFailed(err));
    Transition::new(Disposition::DeleteTcb, commands)
}

// Association setup

fn do_init(_: &Endpoint, _: Option<&Association>, _: EventSubtype, payload: EventPayload) -> Transition {
    let EventPayload::Chunk(c) = payload else {
        return bug();
    };
    let Chunk::Init(init) = c.chunk else {
        return violation();
    };
    if c.verification_tag != 0 || init.initiate_tag == 0 {
        return violation();
    }

    Transition::new(
        Disposition::DeleteTcb,
        [Command::GenInitAck {
            init,
            remote: c.remote,
        }],
    )
}

/// INIT while an association exists: a collision during setup, or a peer
/// that restarted. Either way the INIT ACK carries our current tag.
fn do_dup_init(
    _: &Endpoint,
    a: Option<&Association>,
    _: EventSubtype,
    payload: EventPayload,
) -> Transition {
    let (Some(_), EventPayload::Chunk(c)) = (a, payload) else {
        return bug();
    };
    let Chunk::Init(init) = c.chunk else {
        return violation();
    };
    if c.verification_tag != 0 || init.initiate_tag == 0 {
        return violation();
    }

    Transition::consume([Command::GenInitAck {
        init,
        remote: c.remote,
    }])
}

fn do_init_ack(
    _: &Endpoint,
    a: Option<&Association>,
    _: EventSubtype,
    payload: EventPayload,
) -> Transition {
    let (_, c) = try_transition!(checked(a, payload));
    let Chunk::InitAck(init) = c.chunk else {
        return violation();
    };
    if init.state_cookie.is_none() {
        return Transition::new(
            Disposition::Abort,
            [Command::InitFailed(Error::ErrInitAckNoCookie)],
        );
    }
    if init.initiate_tag == 0 {
        return violation();
    }

    // T1-cookie is armed before the COOKIE ECHO is built, so a failure to
    // build it is retried on expiry
    Transition::consume([
        Command::PeerInit(init),
        Command::CounterReset(Counter::InitError),
        Command::TimerStop(TimerKind::T1Init),
        Command::TimerStart(TimerKind::T1Cookie),
        Command::NewState(CookieEchoed),
        Command::GenCookieEcho { error: None },
    ])
}

fn cookie_of(c: &InboundChunk) -> Option<StateCookie> {
    match &c.chunk {
        Chunk::CookieEcho(ce) => StateCookie::unmarshal(&ce.cookie).ok(),
        _ => None,
    }
}

fn established_commands(ep: &Endpoint) -> Vec<Command> {
    let mut commands = vec![
        Command::NewState(Established),
        Command::EventUlp(Notification::AssocChange(AssocChangeState::CommUp)),
        Command::HbTimersStart,
    ];
    if ep.config().autoclose().is_some() {
        commands.push(Command::TimerStart(TimerKind::Autoclose));
    }
    commands
}

fn do_cookie_echo(
    ep: &Endpoint,
    _: Option<&Association>,
    _: EventSubtype,
    payload: EventPayload,
) -> Transition {
    let EventPayload::Chunk(c) = payload else {
        return bug();
    };
    let Some(cookie) = cookie_of(&c) else {
        return Transition::new(Disposition::Discard, [Command::DiscardPacket]);
    };
    if c.verification_tag != cookie.my_verification_tag {
        return bad_tag(&c);
    }
    if ep.lookup_by_tag(cookie.my_verification_tag).is_some() {
        return Transition::new(Disposition::Discard, [Command::DiscardPacket]);
    }

    let new = Association::from_cookie(
        Arc::clone(ep.config()),
        ep.local_port(),
        c.remote,
        ep.ulpq().clone(),
        &cookie,
    );
    let Some(cookie_ack) = ep.factory().make_cookie_ack(&new) else {
        return Transition::only(Disposition::NoMem);
    };

    let mut commands = vec![Command::NewAssoc(Box::new(new))];
    if let Some(local) = c.local {
        commands.push(Command::SetBindAddrs(vec![local]));
    }
    commands.extend(established_commands(ep));
    commands.push(Command::Reply(cookie_ack));
    Transition::consume(commands)
}

/// COOKIE ECHO for an association we already have. A different peer tag
/// means the peer restarted; matching tags are a retransmission.
fn do_dup_cookie_echo(
    ep: &Endpoint,
    a: Option<&Association>,
    _: EventSubtype,
    payload: EventPayload,
) -> Transition {
    let (a, c) = try_transition!(checked(a, payload));
    let Some(cookie) = cookie_of(&c) else {
        return Transition::new(Disposition::Discard, [Command::DiscardPacket]);
    };
    let Some(cookie_ack) = ep.factory().make_cookie_ack(a) else {
        return Transition::only(Disposition::NoMem);
    };

    if cookie.peer_verification_tag != a.peer_verification_tag() {
        let new = Association::from_cookie(
            Arc::clone(ep.config()),
            ep.local_port(),
            c.remote,
            ep.ulpq().clone(),
            &cookie,
        );
        return Transition::consume([
            Command::UpdateAssoc(Box::new(new)),
            Command::T3RtxTimersStop,
            Command::NewState(Established),
            Command::EventUlp(Notification::AssocChange(AssocChangeState::Restart)),
            Command::Reply(cookie_ack),
        ]);
    }

    let mut commands = vec![];
    if a.state() == CookieEchoed {
        commands.push(Command::TimerStop(TimerKind::T1Cookie));
        commands.push(Command::CounterReset(Counter::InitError));
        commands.extend(established_commands(ep));
    }
    commands.push(Command::Reply(cookie_ack));
    Transition::consume(commands)
}

fn do_cookie_ack(
    ep: &Endpoint,
    a: Option<&Association>,
    _: EventSubtype,
    payload: EventPayload,
) -> Transition {
    let _ = try_transition!(checked(a, payload));

    let mut commands = vec![
        Command::TimerStop(TimerKind::T1Cookie),
        Command::CounterReset(Counter::InitError),
    ];
    commands.extend(established_commands(ep));
    commands.push(Command::Flush);
    Transition::consume(commands)
}

fn t1_init_expire(
    ep: &Endpoint,
    a: Option<&Association>,
    _: EventSubtype,
    _: EventPayload,
) -> Transition {
    let Some(a) = a else {
        return bug();
    };
    if a.counter(Counter::InitError) >= a.config.max_init_attempts() {
        return Transition::new(
            Disposition::DeleteTcb,
            [Command::InitFailed(Error::ErrAssociationInitFailed)],
        );
    }
    let Some(init) = ep.factory().make_init(a) else {
        return Transition::new(Disposition::NoMem, [Command::TimerRestart(TimerKind::T1Init)]);
    };
    Transition::consume([
        Command::InitTimerBackoff(TimerKind::T1Init),
        Command::Reply(init),
    ])
}

fn t1_cookie_expire(
    _: &Endpoint,
    a: Option<&Association>,
    _: EventSubtype,
    _: EventPayload,
) -> Transition {
    let Some(a) = a else {
        return bug();
    };
    if a.counter(Counter::InitError) >= a.config.max_init_attempts() {
        return Transition::new(
            Disposition::DeleteTcb,
            [Command::InitFailed(Error::ErrAssociationInitFailed)],
        );
    }
    Transition::consume([
        Command::InitTimerBackoff(TimerKind::T1Cookie),
        Command::GenCookieEcho { error: None },
    ])
}

// Data transfer

fn eat_data(ep: &Endpoint, a: Option<&Association>, _: EventSubtype, payload: EventPayload) -> Transition {
    let (a, c) = try_transition!(checked(a, payload));
    let Chunk::PayloadData(data) = c.chunk else {
        return violation();
    };
    if data.user_data.is_empty() {
        return fail_association(ep, a, NO_USER_DATA, Error::ErrProtocolViolation);
    }

    let mut commands = vec![];
    if c.ecn_ce {
        commands.push(Command::EcnCe(data.tsn));
    }

    let tsn = data.tsn;
    match a.tsn_map().check(tsn) {
        TsnStatus::Duplicate => {
            commands.push(Command::ReportDup(tsn));
            commands.push(Command::GenSack { force: true });
            Transition::new(Disposition::Discard, commands)
        }
        TsnStatus::BeyondWindow => {
            commands.push(Command::ReportBigGap(tsn));
            commands.push(Command::GenSack { force: true });
            Transition::new(Disposition::Discard, commands)
        }
        TsnStatus::New => {
            let force = data.immediate_sack || a.state() == ShutdownSent;
            commands.push(Command::ReportTsn(tsn));
            commands.push(Command::ChunkUlp(data));
            if a.state() == ShutdownSent {
                // every DATA in SHUTDOWN-SENT is answered with SACK and SHUTDOWN
                commands.push(Command::GenShutdown);
                commands.push(Command::TimerRestart(TimerKind::T2Shutdown));
            }
            commands.push(Command::GenSack { force });
            Transition::consume(commands)
        }
    }
}

fn eat_sack(ep: &Endpoint, a: Option<&Association>, _: EventSubtype, payload: EventPayload) -> Transition {
    let (a, c) = try_transition!(checked(a, payload));
    let Chunk::Sack(sack) = c.chunk else {
        return violation();
    };

    let ack_point = a.outq().cumulative_tsn_ack_point();
    if sna32lt(sack.cumulative_tsn_ack, ack_point) {
        return Transition::only(Disposition::Discard);
    }
    if sna32gte(sack.cumulative_tsn_ack, a.outq().next_tsn()) {
        return fail_association(ep, a, PROTOCOL_VIOLATION, Error::ErrProtocolViolation);
    }

    Transition::consume([Command::ProcessSack(sack)])
}

fn ecn_ecne(_: &Endpoint, a: Option<&Association>, _: EventSubtype, payload: EventPayload) -> Transition {
    let (_, c) = try_transition!(checked(a, payload));
    let Chunk::Ecne(ecne) = c.chunk else {
        return violation();
    };
    Transition::consume([Command::EcnEcne(ecne.lowest_tsn)])
}

fn ecn_cwr(_: &Endpoint, a: Option<&Association>, _: EventSubtype, payload: EventPayload) -> Transition {
    let (_, c) = try_transition!(checked(a, payload));
    let Chunk::Cwr(cwr) = c.chunk else {
        return violation();
    };
    Transition::consume([Command::EcnCwr(cwr.lowest_tsn)])
}

fn sack_expire(_: &Endpoint, a: Option<&Association>, _: EventSubtype, _: EventPayload) -> Transition {
    if a.is_none() {
        return bug();
    }
    Transition::consume([Command::GenSack { force: true }])
}

fn t3_rtx_expire(
    ep: &Endpoint,
    a: Option<&Association>,
    _: EventSubtype,
    payload: EventPayload,
) -> Transition {
    let (a, path) = try_transition!(expired_path(a, payload));
    if a.counter(Counter::OverallError) >= a.config.assoc_max_retrans() {
        return fail_association(ep, a, NO_ERROR, Error::ErrAssociationTimedOut);
    }
    Transition::consume([Command::Strike(path), Command::Retran(path)])
}

fn all_acked(_: &Endpoint, _: Option<&Association>, _: EventSubtype, _: EventPayload) -> Transition {
    Transition::consume([Command::T3RtxTimersStop])
}

// Path management

fn beat(ep: &Endpoint, a: Option<&Association>, _: EventSubtype, payload: EventPayload) -> Transition {
    let (a, c) = try_transition!(checked(a, payload));
    let Chunk::Heartbeat(hb) = c.chunk else {
        return violation();
    };
    let Some(ack) = ep.factory().make_heartbeat_ack(a, &hb) else {
        return Transition::only(Disposition::NoMem);
    };
    match c.path {
        Some(path) => Transition::consume([Command::ReplyOn(path, ack)]),
        None => Transition::consume([Command::Reply(ack)]),
    }
}

fn backbeat(_: &Endpoint, a: Option<&Association>, _: EventSubtype, payload: EventPayload) -> Transition {
    let (a, c) = try_transition!(checked(a, payload));
    let Chunk::HeartbeatAck(hb) = c.chunk else {
        return violation();
    };
    let Some(path) = a.transport_idx(&hb.info.addr) else {
        return Transition::only(Disposition::Discard);
    };
    if hb.info.sent_at > Instant::now() {
        return violation();
    }
    Transition::consume([Command::TransportUp {
        path,
        sent_at: Some(hb.info.sent_at),
    }])
}

fn sendbeat(ep: &Endpoint, a: Option<&Association>, _: EventSubtype, payload: EventPayload) -> Transition {
    let (a, path) = try_transition!(expired_path(a, payload));
    if a.counter(Counter::OverallError) >= a.config.assoc_max_retrans() {
        return fail_association(ep, a, NO_ERROR, Error::ErrAssociationTimedOut);
    }
    let Some(hb) = ep.factory().make_heartbeat(a, path) else {
        return Transition::new(Disposition::NoMem, [Command::HbTimerUpdate(path)]);
    };

    let mut commands = vec![];
    if a.transports()[path].hb_outstanding {
        commands.push(Command::Strike(path));
    }
    commands.push(Command::ReplyOn(path, hb));
    commands.push(Command::HbTimerUpdate(path));
    Transition::consume(commands)
}

// Shutdown

fn shutdown_commands() -> Vec<Command> {
    vec![
        Command::SetupT2,
        Command::TimerRestart(TimerKind::T2Shutdown),
        Command::TimerStart(TimerKind::T5ShutdownGuard),
        Command::TimerStop(TimerKind::Autoclose),
        Command::NewState(ShutdownSent),
        Command::HbTimersStop,
        Command::GenShutdown,
    ]
}

fn shutdown_ack_commands(ep: &Endpoint, a: &Association) -> Option<Vec<Command>> {
    let ack = ep.factory().make_shutdown_ack(a)?;
    Some(vec![
        Command::SetupT2,
        Command::TimerRestart(TimerKind::T2Shutdown),
        Command::TimerStop(TimerKind::Autoclose),
        Command::NewState(ShutdownAckSent),
        Command::HbTimersStop,
        Command::Reply(ack),
    ])
}

fn start_shutdown(_: &Endpoint, a: Option<&Association>, _: EventSubtype, _: EventPayload) -> Transition {
    if a.is_none() {
        return bug();
    }
    let mut commands = vec![Command::T3RtxTimersStop];
    commands.extend(shutdown_commands());
    Transition::consume(commands)
}

fn send_shutdown_ack(
    ep: &Endpoint,
    a: Option<&Association>,
    _: EventSubtype,
    _: EventPayload,
) -> Transition {
    let Some(a) = a else {
        return bug();
    };
    match shutdown_ack_commands(ep, a) {
        Some(commands) => Transition::consume(commands),
        None => Transition::only(Disposition::NoMem),
    }
}

fn do_shutdown(ep: &Endpoint, a: Option<&Association>, _: EventSubtype, payload: EventPayload) -> Transition {
    let (a, c) = try_transition!(checked(a, payload));
    let Chunk::Shutdown(shutdown) = c.chunk else {
        return violation();
    };
    let ctsn = shutdown.cumulative_tsn_ack;
    if sna32lt(ctsn, a.outq().cumulative_tsn_ack_point()) {
        return Transition::only(Disposition::Discard);
    }
    if sna32gte(ctsn, a.outq().next_tsn()) {
        return fail_association(ep, a, PROTOCOL_VIOLATION, Error::ErrProtocolViolation);
    }

    let mut commands = vec![
        Command::EventUlp(Notification::Shutdown),
        Command::NewState(ShutdownReceived),
    ];
    if !a.outq().has_pending() {
        let Some(ack) = shutdown_ack_commands(ep, a) else {
            return Transition::only(Disposition::NoMem);
        };
        commands.extend(ack);
    }
    commands.push(Command::ProcessCtsn(ctsn));
    Transition::consume(commands)
}

fn do_shutdown_again(
    _: &Endpoint,
    a: Option<&Association>,
    _: EventSubtype,
    payload: EventPayload,
) -> Transition {
    let (a, c) = try_transition!(checked(a, payload));
    let Chunk::Shutdown(shutdown) = c.chunk else {
        return violation();
    };
    if sna32lt(shutdown.cumulative_tsn_ack, a.outq().cumulative_tsn_ack_point()) {
        return Transition::only(Disposition::Discard);
    }
    Transition::consume([Command::ProcessCtsn(shutdown.cumulative_tsn_ack)])
}

fn shutdown_complete_commands() -> Vec<Command> {
    vec![
        Command::TimerStop(TimerKind::T2Shutdown),
        Command::TimerStop(TimerKind::T5ShutdownGuard),
        Command::EventUlp(Notification::AssocChange(AssocChangeState::ShutdownComplete)),
    ]
}

fn do_shutdown_final(
    ep: &Endpoint,
    a: Option<&Association>,
    _: EventSubtype,
    payload: EventPayload,
) -> Transition {
    let (a, _) = try_transition!(checked(a, payload));
    let Some(complete) = ep.factory().make_shutdown_complete(Some(a)) else {
        return Transition::only(Disposition::NoMem);
    };

    let mut commands = shutdown_complete_commands();
    commands.push(Command::Reply(complete));
    commands.push(Command::NewState(Closed));
    commands.push(Command::DeleteAssoc);
    Transition::new(Disposition::DeleteTcb, commands)
}

/// SHUTDOWN ACK for an association we do not know: answer with a SHUTDOWN
/// COMPLETE reflecting the peer's tag
fn ootb_shutdown_ack(
    ep: &Endpoint,
    _: Option<&Association>,
    _: EventSubtype,
    payload: EventPayload,
) -> Transition {
    let EventPayload::Chunk(c) = payload else {
        return bug();
    };
    let Some(complete) = ep.factory().make_shutdown_complete(None) else {
        return Transition::only(Disposition::NoMem);
    };
    Transition::consume([
        Command::SendPkt(Transmit {
            now: Instant::now(),
            remote: c.remote,
            ecn: None,
            local_ip: c.local.map(|l| l.ip()),
            packet: Packet {
                source_port: ep.local_port(),
                destination_port: c.remote.port(),
                verification_tag: c.verification_tag,
                chunks: vec![complete],
            },
        }),
        Command::DiscardPacket,
    ])
}

fn do_shutdown_complete(
    _: &Endpoint,
    a: Option<&Association>,
    _: EventSubtype,
    payload: EventPayload,
) -> Transition {
    let _ = try_transition!(checked_reflected(a, payload));
    let mut commands = shutdown_complete_commands();
    commands.push(Command::NewState(Closed));
    commands.push(Command::DeleteAssoc);
    Transition::new(Disposition::DeleteTcb, commands)
}

fn t2_shutdown_expire(
    ep: &Endpoint,
    a: Option<&Association>,
    _: EventSubtype,
    _: EventPayload,
) -> Transition {
    let Some(a) = a else {
        return bug();
    };
    if a.counter(Counter::OverallError) >= a.config.assoc_max_retrans() {
        return fail_association(ep, a, NO_ERROR, Error::ErrAssociationTimedOut);
    }

    let mut commands = vec![];
    if let Some(path) = a.shutdown_last_sent_to() {
        commands.push(Command::Strike(path));
    }
    commands.push(Command::SetupT2);
    commands.push(Command::TimerRestart(TimerKind::T2Shutdown));
    if a.state() == ShutdownSent {
        commands.push(Command::GenShutdown);
    } else {
        let Some(ack) = ep.factory().make_shutdown_ack(a) else {
            return Transition::new(Disposition::NoMem, commands);
        };
        commands.push(Command::Reply(ack));
    }
    Transition::consume(commands)
}

fn t5_guard_expire(
    ep: &Endpoint,
    a: Option<&Association>,
    _: EventSubtype,
    _: EventPayload,
) -> Transition {
    let Some(a) = a else {
        return bug();
    };
    fail_association(ep, a, USER_INITIATED_ABORT, Error::ErrShutdownGuardExpired)
}

// Abort and operation errors

fn do_handshake_abort(
    _: &Endpoint,
    a: Option<&Association>,
    _: EventSubtype,
    payload: EventPayload,
) -> Transition {
    let _ = try_transition!(checked_reflected(a, payload));
    Transition::new(
        Disposition::Abort,
        [Command::InitFailed(Error::ErrAssociationAbortedByPeer)],
    )
}

fn do_abort(_: &Endpoint, a: Option<&Association>, _: EventSubtype, payload: EventPayload) -> Transition {
    let _ = try_transition!(checked_reflected(a, payload));
    Transition::new(
        Disposition::Abort,
        [Command::AssocFailed(Error::ErrAssociationAbortedByPeer)],
    )
}

fn do_operation_error(
    _: &Endpoint,
    a: Option<&Association>,
    _: EventSubtype,
    payload: EventPayload,
) -> Transition {
    let (_, c) = try_transition!(checked(a, payload));
    let Chunk::Error(error) = c.chunk else {
        return violation();
    };
    Transition::consume([Command::EventUlp(Notification::RemoteError(error))])
}

// Primitives

fn prm_associate(
    ep: &Endpoint,
    _: Option<&Association>,
    _: EventSubtype,
    payload: EventPayload,
) -> Transition {
    let EventPayload::Associate { remote } = payload else {
        return bug();
    };
    let new = Association::new(
        Arc::clone(ep.config()),
        ep.local_port(),
        remote,
        ep.ulpq().clone(),
    );
    let Some(init) = ep.factory().make_init(&new) else {
        return Transition::only(Disposition::NoMem);
    };

    Transition::consume([
        Command::NewAssoc(Box::new(new)),
        Command::NewState(CookieWait),
        Command::TimerStart(TimerKind::T1Init),
        Command::Reply(init),
    ])
}

fn prm_send(_: &Endpoint, a: Option<&Association>, _: EventSubtype, payload: EventPayload) -> Transition {
    let (Some(_), EventPayload::Send(data)) = (a, payload) else {
        return bug();
    };
    Transition::consume([Command::Reply(Chunk::PayloadData(data))])
}

fn prm_send_shutting_down(
    _: &Endpoint,
    _: Option<&Association>,
    _: EventSubtype,
    _: EventPayload,
) -> Transition {
    Transition::consume([Command::ReportError(Error::ErrPayloadDataStateNotExist)])
}

fn prm_shutdown(_: &Endpoint, a: Option<&Association>, _: EventSubtype, _: EventPayload) -> Transition {
    let Some(a) = a else {
        return bug();
    };
    let mut commands = vec![Command::NewState(ShutdownPending)];
    if !a.outq().has_pending() {
        commands.extend(shutdown_commands());
    }
    Transition::consume(commands)
}

/// Shutting down before the handshake completed: nothing was sent yet, so
/// the association simply goes away
fn prm_shutdown_handshake(
    _: &Endpoint,
    a: Option<&Association>,
    _: EventSubtype,
    _: EventPayload,
) -> Transition {
    if a.is_none() {
        return bug();
    }
    Transition::new(
        Disposition::DeleteTcb,
        [Command::NewState(Closed), Command::DeleteAssoc],
    )
}

fn prm_abort_handshake(
    ep: &Endpoint,
    a: Option<&Association>,
    _: EventSubtype,
    _: EventPayload,
) -> Transition {
    let Some(a) = a else {
        return bug();
    };
    let mut commands = vec![];
    if a.state() == CookieEchoed {
        if let Some(abort) = ep.factory().make_abort(Some(a), USER_INITIATED_ABORT) {
            commands.push(Command::Reply(abort));
        }
    }
    commands.push(Command::InitFailed(Error::ErrAssociationAbortedByUser));
    Transition::new(Disposition::Abort, commands)
}

fn prm_abort(ep: &Endpoint, a: Option<&Association>, _: EventSubtype, _: EventPayload) -> Transition {
    let Some(a) = a else {
        return bug();
    };
    let Some(abort) = ep.factory().make_abort(Some(a), USER_INITIATED_ABORT) else {
        return Transition::only(Disposition::NoMem);
    };
    Transition::new(
        Disposition::Abort,
        [
            Command::Reply(abort),
            Command::AssocFailed(Error::ErrAssociationAbortedByUser),
        ],
    )
}

fn prm_request_heartbeat(
    ep: &Endpoint,
    a: Option<&Association>,
    _: EventSubtype,
    payload: EventPayload,
) -> Transition {
    let (Some(a), EventPayload::Heartbeat { path }) = (a, payload) else {
        return bug();
    };
    if path >= a.transports().len() {
        return bug();
    }
    let Some(hb) = ep.factory().make_heartbeat(a, path) else {
        return Transition::only(Disposition::NoMem);
    };
    Transition::consume([Command::ReplyOn(path, hb)])
}
