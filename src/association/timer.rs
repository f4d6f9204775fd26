use crate::config::TransportConfig;

use std::fmt;
use std::time::Duration;

pub(crate) const TIMER_COUNT: usize = 9;
pub(crate) const COUNTER_COUNT: usize = 2;

/// Every timeout an association reacts to. T3-rtx and Heartbeat run once
/// per peer transport, all others once per association.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum TimerKind {
    T1Init = 0,
    T1Cookie = 1,
    T2Shutdown = 2,
    T3Rtx = 3,
    T5ShutdownGuard = 4,
    Heartbeat = 5,
    Sack = 6,
    Autoclose = 7,
    PmtuRaise = 8,
}

impl TimerKind {
    pub const VALUES: [Self; TIMER_COUNT] = [
        TimerKind::T1Init,
        TimerKind::T1Cookie,
        TimerKind::T2Shutdown,
        TimerKind::T3Rtx,
        TimerKind::T5ShutdownGuard,
        TimerKind::Heartbeat,
        TimerKind::Sack,
        TimerKind::Autoclose,
        TimerKind::PmtuRaise,
    ];

    pub fn is_per_path(&self) -> bool {
        matches!(*self, TimerKind::T3Rtx | TimerKind::Heartbeat)
    }
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            TimerKind::T1Init => "T1Init",
            TimerKind::T1Cookie => "T1Cookie",
            TimerKind::T2Shutdown => "T2Shutdown",
            TimerKind::T3Rtx => "T3Rtx",
            TimerKind::T5ShutdownGuard => "T5ShutdownGuard",
            TimerKind::Heartbeat => "Heartbeat",
            TimerKind::Sack => "Sack",
            TimerKind::Autoclose => "Autoclose",
            TimerKind::PmtuRaise => "PmtuRaise",
        };
        write!(f, "{s}")
    }
}

/// A table of the timeout used for each association-level `TimerKind`.
/// A zero entry means the timer must not be started.
#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct TimeoutTable {
    data: [Duration; TIMER_COUNT],
}

impl TimeoutTable {
    pub(crate) fn new(config: &TransportConfig) -> Self {
        let mut t = TimeoutTable::default();
        t.set(TimerKind::T1Init, config.rto_initial());
        t.set(TimerKind::T1Cookie, config.rto_initial());
        t.set(TimerKind::T2Shutdown, config.rto_initial());
        t.set(TimerKind::T5ShutdownGuard, 5 * config.rto_max());
        t.set(TimerKind::Sack, config.sack_delay());
        t.set(TimerKind::Autoclose, config.autoclose().unwrap_or_default());
        t.set(TimerKind::PmtuRaise, crate::config::PMTU_RAISE_INTERVAL);
        t
    }

    pub(crate) fn set(&mut self, kind: TimerKind, timeout: Duration) {
        self.data[kind as usize] = timeout;
    }

    pub(crate) fn get(&self, kind: TimerKind) -> Duration {
        self.data[kind as usize]
    }
}

/// Per-reason retry/error counters
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Counter {
    /// INIT / COOKIE ECHO retransmissions
    InitError = 0,
    /// consecutive retransmissions across all paths
    OverallError = 1,
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Counter::InitError => "InitError",
            Counter::OverallError => "OverallError",
        };
        write!(f, "{s}")
    }
}

/// Doubles `timeout` for a backoff, never exceeding `max` and never going down
pub(crate) fn backoff(timeout: Duration, max: Duration) -> Duration {
    // RFC 4960 sec 6.3.3.  Handle T3-rtx Expiration
    //   E2)  For the destination address for which the timer expires, set RTO
    //        <- RTO * 2 ("back off the timer").  The maximum value discussed
    //        in rule C7 above (RTO.max) may be used to provide an upper bound
    //        to this doubling operation.
    if timeout >= max {
        return timeout;
    }
    std::cmp::min(timeout.saturating_mul(2), max)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_backoff_is_capped_and_monotonic() {
        let max = Duration::from_millis(60000);
        let mut t = Duration::from_millis(3000);
        let mut seen = vec![];
        for _ in 0..10 {
            let next = backoff(t, max);
            assert!(next >= t, "backoff must never decrease");
            assert!(next <= max, "backoff must never exceed the maximum");
            t = next;
            seen.push(t.as_millis());
        }
        assert_eq!(&seen[..5], &[6000, 12000, 24000, 48000, 60000]);
        assert_eq!(t, max);
    }

    #[test]
    fn test_backoff_keeps_a_timeout_already_above_max() {
        let max = Duration::from_secs(1);
        assert_eq!(backoff(Duration::from_secs(5), max), Duration::from_secs(5));
    }

    #[test]
    fn test_timeout_table_defaults() {
        let config = TransportConfig::default();
        let t = TimeoutTable::new(&config);
        assert_eq!(t.get(TimerKind::T1Init), Duration::from_millis(3000));
        assert_eq!(t.get(TimerKind::Sack), Duration::from_millis(200));
        assert_eq!(t.get(TimerKind::Autoclose), Duration::ZERO);
        assert!(TimerKind::T3Rtx.is_per_path());
        assert!(!TimerKind::T1Cookie.is_per_path());
    }
}
