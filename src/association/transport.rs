use crate::config::TransportConfig;
use crate::timer::PendingTimer;

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Index of a peer transport address inside its association
pub type TransportIdx = usize;

/// RTO.Alpha and RTO.Beta, expressed over RTO_BASE
const RTO_ALPHA: u64 = 1;
const RTO_BETA: u64 = 2;
const RTO_BASE: u64 = 8;

/// rtoManager manages Rtx timeout values.
/// This is an implementation of RFC 4960 sec 6.3.1.
#[derive(Default, Debug, Copy, Clone)]
pub(crate) struct RtoManager {
    pub(crate) srtt: u64,
    pub(crate) rttvar: f64,
    pub(crate) rto: u64,
    rto_min: u64,
    rto_max: u64,
    rto_initial: u64,
}

impl RtoManager {
    pub(crate) fn new(config: &TransportConfig) -> Self {
        let rto_initial = config.rto_initial().as_millis() as u64;
        RtoManager {
            rto: rto_initial,
            rto_min: config.rto_min().as_millis() as u64,
            rto_max: config.rto_max().as_millis() as u64,
            rto_initial,
            ..Default::default()
        }
    }

    /// set_new_rtt takes a newly measured RTT then adjust the RTO in msec.
    pub(crate) fn set_new_rtt(&mut self, rtt: u64) -> u64 {
        if self.srtt == 0 {
            // First measurement
            self.srtt = rtt;
            self.rttvar = rtt as f64 / 2.0;
        } else {
            // Subsequent rtt measurement
            self.rttvar = ((RTO_BASE - RTO_BETA) as f64 * self.rttvar
                + RTO_BETA as f64 * (self.srtt as i64 - rtt as i64).abs() as f64)
                / RTO_BASE as f64;
            self.srtt = ((RTO_BASE - RTO_ALPHA) * self.srtt + RTO_ALPHA * rtt) / RTO_BASE;
        }

        self.rto = std::cmp::min(
            std::cmp::max(self.srtt + (4.0 * self.rttvar) as u64, self.rto_min),
            self.rto_max,
        );

        self.srtt
    }

    /// get_rto simply returns the current RTO in msec.
    pub(crate) fn get_rto(&self) -> u64 {
        self.rto
    }

    /// E2) back off the timer: double RTO up to RTO.max
    pub(crate) fn backoff(&mut self) {
        self.rto = std::cmp::min(self.rto.saturating_mul(2), self.rto_max);
    }

    /// reset resets the RTO variables to the initial values.
    pub(crate) fn reset(&mut self) {
        self.srtt = 0;
        self.rttvar = 0.0;
        self.rto = self.rto_initial;
    }
}

/// Why the congestion window of a transport is being lowered
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LowerCwndReason {
    /// T3-rtx expired on this transport
    T3Rtx,
    /// the peer signalled congestion with an ECN Echo
    Ecne,
    /// no data was sent on this transport for a while
    Inactive,
}

impl fmt::Display for LowerCwndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            LowerCwndReason::T3Rtx => "T3Rtx",
            LowerCwndReason::Ecne => "Ecne",
            LowerCwndReason::Inactive => "Inactive",
        };
        write!(f, "{s}")
    }
}

/// A single peer transport address of an association, with its own
/// congestion control, RTO estimation and liveness bookkeeping
#[derive(Debug)]
pub struct Transport {
    pub(crate) addr: SocketAddr,
    pub(crate) active: bool,
    pub(crate) error_count: u32,
    pub(crate) error_threshold: u32,
    pub(crate) rto_mgr: RtoManager,
    pub(crate) mtu: u32,
    pub(crate) cwnd: u32,
    pub(crate) ssthresh: u32,
    pub(crate) partial_bytes_acked: u32,
    pub(crate) flight_size: u32,
    pub(crate) hb_outstanding: bool,
    pub(crate) last_ecne_reduction: Option<Instant>,

    pub(crate) t3_rtx: Option<PendingTimer>,
    pub(crate) hb_timer: Option<PendingTimer>,
}

impl Transport {
    pub(crate) fn new(addr: SocketAddr, config: &TransportConfig) -> Self {
        let mtu = config.mtu();
        Transport {
            addr,
            active: true,
            error_count: 0,
            error_threshold: config.path_max_retrans(),
            rto_mgr: RtoManager::new(config),
            mtu,
            // RFC 4960 7.2.1: initial cwnd = min(4*MTU, max(2*MTU, 4380))
            cwnd: std::cmp::min(4 * mtu, std::cmp::max(2 * mtu, 4380)),
            ssthresh: config.max_receive_buffer_size(),
            partial_bytes_acked: 0,
            flight_size: 0,
            hb_outstanding: false,
            last_ecne_reduction: None,
            t3_rtx: None,
            hb_timer: None,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub fn rto(&self) -> Duration {
        Duration::from_millis(self.rto_mgr.get_rto())
    }

    /// Heartbeat period of this path: interval + RTO, with a small jitter
    pub(crate) fn heartbeat_timeout(&self, interval: Duration) -> Duration {
        let rto = self.rto();
        let jitter = rand::random::<u64>() % (rto.as_millis() as u64 / 2 + 1);
        interval + rto + Duration::from_millis(jitter)
    }

    /// Congestion window adjustments of RFC 4960 sections 6.3.3 and 7.2,
    /// and RFC 3168 section 6.1.2 for ECN
    pub(crate) fn lower_cwnd(&mut self, reason: LowerCwndReason, now: Instant) -> bool {
        match reason {
            LowerCwndReason::T3Rtx => {
                // RFC 4960 7.2.3
                // ssthresh = max(cwnd/2, 4*MTU)
                // cwnd = 1*MTU
                self.ssthresh = std::cmp::max(self.cwnd / 2, 4 * self.mtu);
                self.cwnd = self.mtu;
            }
            LowerCwndReason::Ecne => {
                // Reduce at most once per round trip
                let rtt = Duration::from_millis(if self.rto_mgr.srtt > 0 {
                    self.rto_mgr.srtt
                } else {
                    self.rto_mgr.get_rto()
                });
                if let Some(last) = self.last_ecne_reduction {
                    if now.saturating_duration_since(last) < rtt {
                        return false;
                    }
                }
                self.ssthresh = std::cmp::max(self.cwnd / 2, 4 * self.mtu);
                self.cwnd = self.ssthresh;
                self.last_ecne_reduction = Some(now);
            }
            LowerCwndReason::Inactive => {
                self.cwnd = std::cmp::max(self.cwnd / 2, 4 * self.mtu);
            }
        }
        self.partial_bytes_acked = 0;

        log::debug!(
            "[{}] cwnd lowered ({}): cwnd={} ssthresh={}",
            self.addr,
            reason,
            self.cwnd,
            self.ssthresh
        );
        true
    }

    /// Congestion window growth for `acked` newly acknowledged bytes
    pub(crate) fn raise_cwnd(&mut self, acked: u32, cumulative_advanced: bool) {
        if !cumulative_advanced || acked == 0 {
            return;
        }

        if self.cwnd <= self.ssthresh {
            // RFC 4960 7.2.1 slow start
            self.cwnd += std::cmp::min(acked, self.mtu);
        } else {
            // RFC 4960 7.2.2 congestion avoidance
            self.partial_bytes_acked += acked;
            if self.partial_bytes_acked >= self.cwnd {
                self.partial_bytes_acked -= self.cwnd;
                self.cwnd += self.mtu;
            }
        }
        log::trace!(
            "[{}] cwnd raised: cwnd={} ssthresh={} acked={}",
            self.addr,
            self.cwnd,
            self.ssthresh,
            acked
        );
    }

    /// Forgets congestion and RTT state, as after a peer restart
    pub(crate) fn reset(&mut self) {
        self.rto_mgr.reset();
        self.cwnd = std::cmp::min(4 * self.mtu, std::cmp::max(2 * self.mtu, 4380));
        self.partial_bytes_acked = 0;
        self.flight_size = 0;
        self.error_count = 0;
        self.hb_outstanding = false;
        self.last_ecne_reduction = None;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn transport() -> Transport {
        Transport::new(
            "127.0.0.1:5000".parse().unwrap(),
            &TransportConfig::default(),
        )
    }

    #[test]
    fn test_rto_manager_initial_values() {
        let m = RtoManager::new(&TransportConfig::default());
        assert_eq!(m.rto, 3000, "should be rtoInitial");
        assert_eq!(m.get_rto(), 3000, "should be rtoInitial");
        assert_eq!(m.srtt, 0, "should be 0");
        assert_eq!(m.rttvar, 0.0, "should be 0.0");
    }

    #[test]
    fn test_rto_manager_rto_calculation_small_rtt() {
        let mut m = RtoManager::new(&TransportConfig::default());
        let exp = vec![
            1800, 1500, 1275, 1106, 1000, // capped at RTO.Min
        ];

        for i in 0..5 {
            m.set_new_rtt(600);
            let rto = m.get_rto();
            assert_eq!(rto, exp[i], "should be equal: {i}");
        }
    }

    #[test]
    fn test_rto_manager_rto_calculation_large_rtt() {
        let mut m = RtoManager::new(&TransportConfig::default());
        let exp = vec![
            60000, // capped at RTO.Max
            60000, // capped at RTO.Max
            60000, // capped at RTO.Max
            55312, 48984,
        ];

        for i in 0..5 {
            m.set_new_rtt(30000);
            let rto = m.get_rto();
            assert_eq!(rto, exp[i], "should be equal: {i}");
        }
    }

    #[test]
    fn test_rto_manager_backoff_and_reset() {
        let mut m = RtoManager::new(&TransportConfig::default());
        for _ in 0..10 {
            m.backoff();
        }
        assert_eq!(m.get_rto(), 60000, "backoff is capped at RTO.Max");

        m.set_new_rtt(200);
        m.reset();
        assert_eq!(m.get_rto(), 3000, "should be rtoInitial");
        assert_eq!(m.srtt, 0, "should be 0");
    }

    #[test]
    fn test_transport_lower_cwnd_t3() {
        let mut t = transport();
        t.cwnd = 20000;
        assert!(t.lower_cwnd(LowerCwndReason::T3Rtx, Instant::now()));
        assert_eq!(t.cwnd, t.mtu);
        assert_eq!(t.ssthresh, 10000);
    }

    #[test]
    fn test_transport_lower_cwnd_ecne_once_per_rtt() {
        let mut t = transport();
        t.cwnd = 20000;
        let now = Instant::now();
        assert!(t.lower_cwnd(LowerCwndReason::Ecne, now));
        assert_eq!(t.cwnd, 10000);
        assert_eq!(t.ssthresh, 10000);

        assert!(
            !t.lower_cwnd(LowerCwndReason::Ecne, now),
            "second ECNE within one RTT must not reduce again"
        );
        assert_eq!(t.cwnd, 10000);

        assert!(t.lower_cwnd(LowerCwndReason::Ecne, now + Duration::from_secs(4)));
        assert_eq!(t.cwnd, 5000);
    }

    #[test]
    fn test_transport_lower_cwnd_inactive() {
        let mut t = transport();
        t.cwnd = 3 * t.mtu;
        t.lower_cwnd(LowerCwndReason::Inactive, Instant::now());
        assert_eq!(t.cwnd, 4 * t.mtu, "never below 4*MTU");
    }

    #[test]
    fn test_transport_raise_cwnd_slow_start() {
        let mut t = transport();
        let before = t.cwnd;
        t.raise_cwnd(5000, true);
        assert_eq!(t.cwnd, before + t.mtu);
        t.raise_cwnd(5000, false);
        assert_eq!(t.cwnd, before + t.mtu, "no growth without cum ack advance");
    }
}
