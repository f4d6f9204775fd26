use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// initial MTU for outgoing packets
pub(crate) const INITIAL_MTU: u32 = 1228;
pub(crate) const INITIAL_RECV_BUF_SIZE: u32 = 1024 * 1024;
pub(crate) const COMMON_HEADER_SIZE: u32 = 12;
pub(crate) const DATA_CHUNK_HEADER_SIZE: u32 = 16;

pub(crate) const RTO_INITIAL: Duration = Duration::from_millis(3000);
pub(crate) const RTO_MIN: Duration = Duration::from_millis(1000);
pub(crate) const RTO_MAX: Duration = Duration::from_millis(60000);
pub(crate) const MAX_INIT_RETRANS: u32 = 8;
pub(crate) const PATH_MAX_RETRANS: u32 = 5;
pub(crate) const ASSOC_MAX_RETRANS: u32 = 10;
pub(crate) const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub(crate) const SACK_DELAY: Duration = Duration::from_millis(200);
pub(crate) const PMTU_RAISE_INTERVAL: Duration = Duration::from_secs(600);
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// TransportConfig collects the per-association protocol parameters
/// (RFC 4960 Sec 15) into a single structure
#[derive(Debug, Clone)]
pub struct TransportConfig {
    rto_initial: Duration,
    rto_min: Duration,
    rto_max: Duration,
    max_init_timeout: Duration,
    max_init_attempts: u32,
    path_max_retrans: u32,
    assoc_max_retrans: u32,
    heartbeat_interval: Duration,
    sack_delay: Duration,
    autoclose: Option<Duration>,
    max_receive_buffer_size: u32,
    mtu: u32,
    max_num_outbound_streams: u16,
    max_num_inbound_streams: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            rto_initial: RTO_INITIAL,
            rto_min: RTO_MIN,
            rto_max: RTO_MAX,
            max_init_timeout: RTO_MAX,
            max_init_attempts: MAX_INIT_RETRANS,
            path_max_retrans: PATH_MAX_RETRANS,
            assoc_max_retrans: ASSOC_MAX_RETRANS,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            sack_delay: SACK_DELAY,
            autoclose: None,
            max_receive_buffer_size: INITIAL_RECV_BUF_SIZE,
            mtu: INITIAL_MTU,
            max_num_outbound_streams: u16::MAX,
            max_num_inbound_streams: u16::MAX,
        }
    }
}

impl TransportConfig {
    pub fn with_rto_initial(mut self, value: Duration) -> Self {
        self.rto_initial = value;
        self
    }

    pub fn with_rto_min(mut self, value: Duration) -> Self {
        self.rto_min = value;
        self
    }

    pub fn with_rto_max(mut self, value: Duration) -> Self {
        self.rto_max = value;
        self
    }

    /// Upper bound for the doubling of the T1-init and T1-cookie timeouts
    pub fn with_max_init_timeout(mut self, value: Duration) -> Self {
        self.max_init_timeout = value;
        self
    }

    pub fn with_max_init_attempts(mut self, value: u32) -> Self {
        self.max_init_attempts = value;
        self
    }

    /// Number of consecutive strikes a path tolerates before it is marked inactive
    pub fn with_path_max_retrans(mut self, value: u32) -> Self {
        self.path_max_retrans = value;
        self
    }

    pub fn with_assoc_max_retrans(mut self, value: u32) -> Self {
        self.assoc_max_retrans = value;
        self
    }

    pub fn with_heartbeat_interval(mut self, value: Duration) -> Self {
        self.heartbeat_interval = value;
        self
    }

    pub fn with_sack_delay(mut self, value: Duration) -> Self {
        self.sack_delay = value;
        self
    }

    /// Close an idle association after `value`. `None` disables autoclose.
    pub fn with_autoclose(mut self, value: Option<Duration>) -> Self {
        self.autoclose = value;
        self
    }

    pub fn with_max_receive_buffer_size(mut self, value: u32) -> Self {
        self.max_receive_buffer_size = value;
        self
    }

    pub fn with_mtu(mut self, value: u32) -> Self {
        self.mtu = value;
        self
    }

    pub fn with_max_num_outbound_streams(mut self, value: u16) -> Self {
        self.max_num_outbound_streams = value;
        self
    }

    pub fn with_max_num_inbound_streams(mut self, value: u16) -> Self {
        self.max_num_inbound_streams = value;
        self
    }

    pub(crate) fn rto_initial(&self) -> Duration {
        self.rto_initial
    }

    pub(crate) fn rto_min(&self) -> Duration {
        self.rto_min
    }

    pub(crate) fn rto_max(&self) -> Duration {
        self.rto_max
    }

    pub(crate) fn max_init_timeout(&self) -> Duration {
        self.max_init_timeout
    }

    pub(crate) fn max_init_attempts(&self) -> u32 {
        self.max_init_attempts
    }

    pub(crate) fn path_max_retrans(&self) -> u32 {
        self.path_max_retrans
    }

    pub(crate) fn assoc_max_retrans(&self) -> u32 {
        self.assoc_max_retrans
    }

    pub(crate) fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub(crate) fn sack_delay(&self) -> Duration {
        self.sack_delay
    }

    pub(crate) fn autoclose(&self) -> Option<Duration> {
        self.autoclose
    }

    pub(crate) fn max_receive_buffer_size(&self) -> u32 {
        self.max_receive_buffer_size
    }

    pub(crate) fn mtu(&self) -> u32 {
        self.mtu
    }

    pub(crate) fn max_num_outbound_streams(&self) -> u16 {
        self.max_num_outbound_streams
    }

    pub(crate) fn max_num_inbound_streams(&self) -> u16 {
        self.max_num_inbound_streams
    }
}

/// Invoked when the state machine reports an out-of-memory disposition
///
/// Reclaiming receive buffer space ("reneging") is a policy of the embedding
/// application; the engine only signals when it is needed.
pub trait ReclaimPolicy: Send + Sync {
    fn reclaim(&self, association: crate::AssociationId);
}

/// Default policy: nothing is reclaimed
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReclaim;

impl ReclaimPolicy for NoReclaim {
    fn reclaim(&self, _association: crate::AssociationId) {}
}

/// Configuration of a `Socket` and every association it owns
#[derive(Clone)]
pub struct SocketConfig {
    /// Transport configuration applied to new associations
    pub transport: Arc<TransportConfig>,

    /// Local SCTP port
    pub local_port: u16,

    /// Capacity of the upper-layer event channel; events beyond it are dropped
    pub event_channel_capacity: usize,

    pub(crate) reclaim: Arc<dyn ReclaimPolicy>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketConfig {
            transport: Arc::new(TransportConfig::default()),
            local_port: 5000,
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
            reclaim: Arc::new(NoReclaim),
        }
    }
}

impl SocketConfig {
    pub fn new() -> Self {
        SocketConfig::default()
    }

    /// Supply the buffer-reclaim policy invoked on memory pressure
    pub fn reclaim_policy<P: ReclaimPolicy + 'static>(&mut self, policy: P) -> &mut Self {
        self.reclaim = Arc::new(policy);
        self
    }
}

impl fmt::Debug for SocketConfig {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("SocketConfig")
            .field("transport", &self.transport)
            .field("local_port", &self.local_port)
            .field("event_channel_capacity", &self.event_channel_capacity)
            .field("reclaim", &"[ elided ]")
            .finish()
    }
}
