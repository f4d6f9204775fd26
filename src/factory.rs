use crate::association::transport::TransportIdx;
use crate::association::Association;
use crate::chunk::chunk_abort::ChunkAbort;
use crate::chunk::chunk_cookie_echo::{ChunkCookieEcho, StateCookie};
use crate::chunk::chunk_ecn::{ChunkCwr, ChunkEcne};
use crate::chunk::chunk_heartbeat::{ChunkHeartbeat, HeartbeatInfo};
use crate::chunk::chunk_init::ChunkInit;
use crate::chunk::chunk_selective_ack::ChunkSelectiveAck;
use crate::chunk::chunk_shutdown::ChunkShutdown;
use crate::chunk::Chunk;
use crate::config::TransportConfig;
use crate::error_cause::{ErrorCause, ErrorCauseCode, NO_ERROR};

use std::time::Instant;

/// Builds the control chunks the interpreter emits.
///
/// Every constructor may fail to allocate, which it reports with `None`;
/// the interpreter turns that into an out-of-memory result.
pub trait ChunkFactory: Send + Sync {
    fn make_init(&self, association: &Association) -> Option<Chunk>;

    /// INIT ACK for an INIT received without an association. The State
    /// Cookie carries everything needed to build the association later.
    fn make_init_ack(
        &self,
        config: &TransportConfig,
        init: &ChunkInit,
        my_tag: u32,
        my_initial_tsn: u32,
    ) -> Option<Chunk>;

    fn make_cookie_echo(&self, association: &Association) -> Option<Chunk>;

    fn make_cookie_ack(&self, association: &Association) -> Option<Chunk>;

    fn make_shutdown(&self, association: &Association) -> Option<Chunk>;

    fn make_shutdown_ack(&self, association: &Association) -> Option<Chunk>;

    fn make_shutdown_complete(&self, association: Option<&Association>) -> Option<Chunk>;

    fn make_sack(&self, association: &Association) -> Option<Chunk>;

    fn make_cwr(&self, association: &Association, lowest_tsn: u32) -> Option<Chunk>;

    fn make_ecne(&self, association: &Association, lowest_tsn: u32) -> Option<Chunk>;

    fn make_heartbeat(&self, association: &Association, path: TransportIdx) -> Option<Chunk>;

    fn make_heartbeat_ack(
        &self,
        association: &Association,
        heartbeat: &ChunkHeartbeat,
    ) -> Option<Chunk>;

    fn make_abort(&self, association: Option<&Association>, cause: ErrorCauseCode)
        -> Option<Chunk>;
}

/// ChunkFactory that always succeeds
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultChunkFactory;

impl ChunkFactory for DefaultChunkFactory {
    fn make_init(&self, a: &Association) -> Option<Chunk> {
        Some(Chunk::Init(ChunkInit {
            is_ack: false,
            initiate_tag: a.my_verification_tag,
            advertised_receiver_window_credit: a.my_rwnd,
            num_outbound_streams: a.num_outbound_streams,
            num_inbound_streams: a.num_inbound_streams,
            initial_tsn: a.my_initial_tsn,
            addresses: a.bind_addrs.clone(),
            state_cookie: None,
            ecn_capable: true,
        }))
    }

    fn make_init_ack(
        &self,
        config: &TransportConfig,
        init: &ChunkInit,
        my_tag: u32,
        my_initial_tsn: u32,
    ) -> Option<Chunk> {
        let num_outbound_streams =
            std::cmp::min(config.max_num_outbound_streams(), init.num_inbound_streams);
        let num_inbound_streams =
            std::cmp::min(config.max_num_inbound_streams(), init.num_outbound_streams);
        let cookie = StateCookie {
            my_verification_tag: my_tag,
            peer_verification_tag: init.initiate_tag,
            my_initial_tsn,
            peer_initial_tsn: init.initial_tsn,
            peer_rwnd: init.advertised_receiver_window_credit,
            num_outbound_streams,
            num_inbound_streams,
            peer_ecn_capable: init.ecn_capable,
        };

        Some(Chunk::InitAck(ChunkInit {
            is_ack: true,
            initiate_tag: my_tag,
            advertised_receiver_window_credit: config.max_receive_buffer_size(),
            num_outbound_streams,
            num_inbound_streams,
            initial_tsn: my_initial_tsn,
            addresses: vec![],
            state_cookie: Some(cookie.marshal()),
            ecn_capable: true,
        }))
    }

    fn make_cookie_echo(&self, a: &Association) -> Option<Chunk> {
        let cookie = a.peer_cookie.clone()?;
        Some(Chunk::CookieEcho(ChunkCookieEcho { cookie }))
    }

    fn make_cookie_ack(&self, _a: &Association) -> Option<Chunk> {
        Some(Chunk::CookieAck)
    }

    fn make_shutdown(&self, a: &Association) -> Option<Chunk> {
        Some(Chunk::Shutdown(ChunkShutdown {
            cumulative_tsn_ack: a.tsn_map.cumulative_ack(),
        }))
    }

    fn make_shutdown_ack(&self, _a: &Association) -> Option<Chunk> {
        Some(Chunk::ShutdownAck)
    }

    fn make_shutdown_complete(&self, _a: Option<&Association>) -> Option<Chunk> {
        Some(Chunk::ShutdownComplete)
    }

    fn make_sack(&self, a: &Association) -> Option<Chunk> {
        Some(Chunk::Sack(ChunkSelectiveAck {
            cumulative_tsn_ack: a.tsn_map.cumulative_ack(),
            advertised_receiver_window_credit: a.my_rwnd,
            gap_ack_blocks: a.tsn_map.gap_ack_blocks(),
            duplicate_tsn: a.dup_tsns.clone(),
        }))
    }

    fn make_cwr(&self, _a: &Association, lowest_tsn: u32) -> Option<Chunk> {
        Some(Chunk::Cwr(ChunkCwr { lowest_tsn }))
    }

    fn make_ecne(&self, _a: &Association, lowest_tsn: u32) -> Option<Chunk> {
        Some(Chunk::Ecne(ChunkEcne { lowest_tsn }))
    }

    fn make_heartbeat(&self, a: &Association, path: TransportIdx) -> Option<Chunk> {
        let t = a.transports.get(path)?;
        Some(Chunk::Heartbeat(ChunkHeartbeat {
            is_ack: false,
            info: HeartbeatInfo {
                addr: t.addr,
                sent_at: Instant::now(),
                nonce: rand::random::<u64>(),
            },
        }))
    }

    fn make_heartbeat_ack(&self, _a: &Association, heartbeat: &ChunkHeartbeat) -> Option<Chunk> {
        Some(Chunk::HeartbeatAck(ChunkHeartbeat {
            is_ack: true,
            info: heartbeat.info,
        }))
    }

    fn make_abort(&self, _a: Option<&Association>, cause: ErrorCauseCode) -> Option<Chunk> {
        let error_causes = if cause == NO_ERROR {
            vec![]
        } else {
            vec![ErrorCause::new(cause)]
        };
        Some(Chunk::Abort(ChunkAbort { error_causes }))
    }
}
