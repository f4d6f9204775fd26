use super::interpreter;
use super::{Disposition, EventPayload, EventSubtype, EventType, SmContext, Transition};
use crate::association::state::AssociationState;
use crate::endpoint::AssociationHandle;
use crate::error::{Error, Result};
use crate::queue::ulp_queue::{AssocChangeState, Notification};

use log::{error, trace, warn};

/// Runs one event through the state machine: look up the transition, let it
/// decide, interpret the commands it returned and turn the disposition into
/// the result seen by the caller.
pub(crate) fn run(
    ctx: &mut SmContext<'_>,
    event_type: EventType,
    subtype: EventSubtype,
    state: AssociationState,
    handle: Option<AssociationHandle>,
    payload: EventPayload,
) -> Result<()> {
    debug_assert_eq!(event_type, subtype.event_type());

    let name = match handle {
        Some(h) => match ctx.endpoint.association(h) {
            Some(a) if !a.is_dead() => a.name().to_owned(),
            _ => {
                let reason = format!("{event_type} {subtype} dispatched to deleted association {h}");
                error!("internal bug: {}", reason);
                return Err(Error::ErrInternalBug(reason));
            }
        },
        None => "-".to_owned(),
    };

    let f = ctx.table.lookup(event_type, state, subtype);
    let Transition {
        disposition,
        commands,
    } = {
        let association = handle.and_then(|h| ctx.endpoint.association(h));
        f(ctx.endpoint, association, subtype, payload)
    };

    trace!(
        "[{}] {} {} in {}: {} with {} commands",
        name,
        event_type,
        subtype,
        state,
        disposition,
        commands.len()
    );

    let status = interpreter::interpret(ctx, subtype, handle, commands);
    coordinate(ctx, &name, subtype, state, handle, disposition, status)
}

/// Maps the disposition, together with the outcome of the interpreter, to
/// the status returned for the event
fn coordinate(
    ctx: &mut SmContext<'_>,
    name: &str,
    subtype: EventSubtype,
    state: AssociationState,
    handle: Option<AssociationHandle>,
    disposition: Disposition,
    status: Result<()>,
) -> Result<()> {
    let bug = match &status {
        Err(err) if err.is_internal_bug() => Some(err.to_string()),
        _ if disposition == Disposition::Bug => Some(format!("no valid transition for {subtype} in {state}")),
        _ => None,
    };
    if let Some(reason) = bug {
        error!("[{}] internal bug: {}", name, reason);
        poison(ctx, handle);
        return Err(Error::ErrInternalBug(reason));
    }

    if disposition == Disposition::NoMem || status == Err(Error::ErrNoMemory) {
        warn!("[{}] out of memory handling {} in {}", name, subtype, state);
        if let Some(a) = handle.and_then(|h| ctx.endpoint.association(h)) {
            ctx.reclaim.reclaim(a.id());
        }
        return Err(Error::ErrNoMemory);
    }

    match disposition {
        Disposition::Discard => trace!("[{}] discarded {} in {}", name, subtype, state),
        Disposition::Violation => warn!("[{}] protocol violation: {} in {}", name, subtype, state),
        Disposition::NotImpl => warn!("[{}] not implemented: {} in {}", name, subtype, state),
        Disposition::Consume
        | Disposition::Abort
        | Disposition::DeleteTcb
        | Disposition::NoMem
        | Disposition::Bug => {}
    }
    status
}

/// Takes an association that hit a bug out of service for good
fn poison(ctx: &mut SmContext<'_>, handle: Option<AssociationHandle>) {
    let Some(handle) = handle else {
        return;
    };
    if let Some(mut a) = ctx.endpoint.remove_association(handle) {
        a.kill();
        a.ulpq.deliver_event(a.id(), Notification::AssocChange(AssocChangeState::CommLost));
        error!("[{}] association poisoned and removed", a.name());
    }
}
