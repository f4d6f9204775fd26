#[cfg(test)]
mod timer_test;

use crate::association::timer::TimerKind;
use crate::association::transport::TransportIdx;
use crate::endpoint::AssociationHandle;
use crate::mutex::Mutex;
use crate::socket::SocketInner;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

/// How long an expired timer waits before retrying when the socket is
/// locked by someone else
pub(crate) const TIMER_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Identifies one timer of an association
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) struct TimerId {
    pub(crate) kind: TimerKind,
    /// Set for the per-path timers only
    pub(crate) path: Option<TransportIdx>,
}

impl TimerId {
    pub(crate) fn association(kind: TimerKind) -> Self {
        TimerId { kind, path: None }
    }

    pub(crate) fn path(kind: TimerKind, path: TransportIdx) -> Self {
        TimerId {
            kind,
            path: Some(path),
        }
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.path {
            Some(path) => write!(f, "{}[{}]", self.kind, path),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Shared between an association and everything that must not outlive it
#[derive(Debug, Default)]
pub(crate) struct Liveness {
    dead: AtomicBool,
}

impl Liveness {
    pub(crate) fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }
}

/// A counted reference on an association, held by each armed timer and
/// released when the timer task ends
#[derive(Debug)]
pub(crate) struct AssociationRef(Arc<Liveness>);

impl AssociationRef {
    pub(crate) fn new(liveness: &Arc<Liveness>) -> Self {
        AssociationRef(Arc::clone(liveness))
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.0.is_dead()
    }

    /// Whether this reference was taken on the association owning `liveness`
    pub(crate) fn refers_to(&self, liveness: &Arc<Liveness>) -> bool {
        Arc::ptr_eq(&self.0, liveness)
    }
}

/// Lets timer tasks re-enter the socket that armed them
#[derive(Clone, Default)]
pub(crate) struct TimerContext {
    socket: Weak<Mutex<SocketInner>>,
}

impl TimerContext {
    pub(crate) fn new(socket: Weak<Mutex<SocketInner>>) -> Self {
        TimerContext { socket }
    }
}

/// An armed timer. Dropping it cancels the timer; a restart only moves the
/// deadline and keeps the reference taken when it was armed.
#[derive(Debug)]
pub(crate) struct PendingTimer {
    generation: u64,
    deadline: watch::Sender<Instant>,
}

impl PendingTimer {
    /// Spawns the timer task. `aref` is released when the task ends.
    pub(crate) fn arm(
        ctx: &TimerContext,
        handle: AssociationHandle,
        id: TimerId,
        generation: u64,
        aref: AssociationRef,
        timeout: Duration,
    ) -> Self {
        let (deadline, deadline_rx) = watch::channel(Instant::now() + timeout);
        log::trace!("[{}] timer {} armed for {:?}", handle, id, timeout);

        tokio::spawn(run_timer(
            ctx.socket.clone(),
            handle,
            id,
            generation,
            aref,
            deadline_rx,
        ));

        PendingTimer {
            generation,
            deadline,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn restart(&self, timeout: Duration) {
        self.deadline.send_replace(Instant::now() + timeout);
    }
}

async fn run_timer(
    socket: Weak<Mutex<SocketInner>>,
    handle: AssociationHandle,
    id: TimerId,
    generation: u64,
    aref: AssociationRef,
    mut deadline_rx: watch::Receiver<Instant>,
) {
    let mut deadline = *deadline_rx.borrow_and_update();

    loop {
        tokio::select! {
            biased;
            changed = deadline_rx.changed() => {
                if changed.is_err() {
                    log::trace!("[{}] timer {} cancelled", handle, id);
                    return;
                }
                deadline = *deadline_rx.borrow_and_update();
                continue;
            }
            _ = tokio::time::sleep_until(deadline) => {}
        }

        if aref.is_dead() {
            log::trace!("[{}] timer {} expired on a dead association", handle, id);
            return;
        }

        let Some(inner) = socket.upgrade() else {
            return;
        };

        let fired = match inner.try_lock("timer") {
            Some(mut inner) => {
                inner.handle_timeout(handle, id, generation, &aref);
                true
            }
            None => false,
        };
        if fired {
            return;
        }

        log::trace!(
            "[{}] timer {} expired while the socket is busy, retrying ({} refusals so far)",
            handle,
            id,
            inner.refused()
        );
        deadline = Instant::now() + TIMER_RETRY_DELAY;
    }
}
