use super::*;
use crate::timer::TimerContext;

fn remote() -> SocketAddr {
    "10.0.0.2:5001".parse().unwrap()
}

fn association(config: TransportConfig) -> Association {
    let (ulpq, _events) = UlpQueue::new(16);
    Association::new(Arc::new(config), 5000, remote(), ulpq)
}

fn init_ack(addresses: Vec<SocketAddr>) -> ChunkInit {
    ChunkInit {
        is_ack: true,
        initiate_tag: 0x1234,
        advertised_receiver_window_credit: 4096,
        num_outbound_streams: 3,
        num_inbound_streams: 2,
        initial_tsn: 500,
        addresses,
        state_cookie: Some(Bytes::from_static(b"cookie")),
        ecn_capable: true,
    }
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[test]
fn test_new_association_defaults() {
    let a = association(TransportConfig::default());
    assert_ne!(a.id(), 0);
    assert_eq!(a.name(), format!("{:08x}", a.id()));
    assert_eq!(a.state(), AssociationState::Closed);
    assert_eq!(a.peer_verification_tag(), 0);
    assert_eq!(a.transports().len(), 1);
    assert_eq!(a.transports()[0].addr(), remote());
    assert_eq!(a.outq().next_tsn(), a.my_initial_tsn());
    assert_eq!(a.last_cwr_tsn(), a.my_initial_tsn().wrapping_sub(1));
    assert_eq!(a.timer_refs(), 0);
    assert!(!a.is_dead());
}

#[test]
fn test_process_init_takes_peer_parameters() {
    let mut a = association(TransportConfig::default());
    let extra: SocketAddr = "10.0.1.2:5001".parse().unwrap();
    a.process_init(&init_ack(vec![remote(), extra]));

    assert_eq!(a.peer_verification_tag(), 0x1234);
    assert_eq!(a.tsn_map().cumulative_ack(), 499);
    assert_eq!(a.outq().peer_rwnd(), 4096);
    assert_eq!(a.num_outbound_streams, 2);
    assert_eq!(a.num_inbound_streams, 3);
    assert!(a.peer_ecn_capable);
    assert_eq!(a.transports().len(), 2, "known address is not added twice");
    assert_eq!(a.transport_idx(&extra), Some(1));
    assert_eq!(a.peer_cookie(), Some(&Bytes::from_static(b"cookie")));
}

#[test]
fn test_state_cookie_builds_server_side() {
    let (ulpq, _events) = UlpQueue::new(16);
    let cookie = StateCookie {
        my_verification_tag: 0xaaaa,
        peer_verification_tag: 0xbbbb,
        my_initial_tsn: 10,
        peer_initial_tsn: 20,
        peer_rwnd: 3000,
        num_outbound_streams: 4,
        num_inbound_streams: 5,
        peer_ecn_capable: false,
    };
    let a = Association::from_cookie(
        Arc::new(TransportConfig::default()),
        5000,
        remote(),
        ulpq,
        &cookie,
    );

    assert_eq!(a.id(), 0xaaaa);
    assert_eq!(a.peer_verification_tag(), 0xbbbb);
    assert_eq!(a.my_initial_tsn(), 10);
    assert_eq!(a.outq().next_tsn(), 10);
    assert_eq!(a.tsn_map().cumulative_ack(), 19);
    assert_eq!(a.outq().peer_rwnd(), 3000);
}

#[test]
fn test_counters() {
    let mut a = association(TransportConfig::default());
    assert_eq!(a.counter_inc(Counter::InitError), 1);
    assert_eq!(a.counter_inc(Counter::InitError), 2);
    assert_eq!(a.counter(Counter::OverallError), 0);
    a.counter_reset(Counter::InitError);
    assert_eq!(a.counter(Counter::InitError), 0);
}

#[test]
fn test_active_path_prefers_primary() {
    let mut a = association(TransportConfig::default());
    let second = a.add_transport("10.0.1.2:5001".parse().unwrap());
    let third = a.add_transport("10.0.2.2:5001".parse().unwrap());

    a.transports[0].active = false;
    a.transports[second].active = false;
    a.select_active_path();
    assert_eq!(a.active_path(), third);

    a.transports[0].active = true;
    a.select_active_path();
    assert_eq!(a.active_path(), 0);

    // nothing active: keep the current path
    for t in a.transports.iter_mut() {
        t.active = false;
    }
    a.select_active_path();
    assert_eq!(a.active_path(), 0);
}

#[test]
fn test_alternate_path_rotates_over_active_paths() {
    let mut a = association(TransportConfig::default());
    a.add_transport("10.0.1.2:5001".parse().unwrap());
    a.add_transport("10.0.2.2:5001".parse().unwrap());

    assert_eq!(a.alternate_path(None), a.active_path());
    assert_eq!(a.alternate_path(Some(0)), 1);
    assert_eq!(a.alternate_path(Some(2)), 0);

    a.transports[1].active = false;
    assert_eq!(a.alternate_path(Some(0)), 2);

    a.transports[0].active = false;
    a.transports[2].active = false;
    assert_eq!(a.alternate_path(Some(2)), 2);
}

#[test]
fn test_update_after_peer_restart() {
    let mut a = association(TransportConfig::default());
    a.process_init(&init_ack(vec![]));
    a.tsn_map.mark(500);
    a.sack_needed = true;
    a.need_ecn_echo = true;
    a.counter_inc(Counter::OverallError);

    let (ulpq, _events) = UlpQueue::new(16);
    let cookie = StateCookie {
        my_verification_tag: a.id(),
        peer_verification_tag: 0x9999,
        my_initial_tsn: a.my_initial_tsn(),
        peer_initial_tsn: 7000,
        peer_rwnd: 2048,
        num_outbound_streams: 1,
        num_inbound_streams: 1,
        peer_ecn_capable: false,
    };
    let new = Association::from_cookie(Arc::clone(&a.config), 5000, remote(), ulpq, &cookie);
    a.update(new);

    assert_eq!(a.peer_verification_tag(), 0x9999);
    assert_eq!(a.tsn_map().cumulative_ack(), 6999);
    assert_eq!(a.outq().peer_rwnd(), 2048);
    assert!(!a.sack_needed());
    assert!(!a.need_ecn_echo());
    assert_eq!(a.counter(Counter::OverallError), 0);
}

#[test]
fn test_pending_ecne_follows_echo_flag() {
    let mut a = association(TransportConfig::default());
    assert_eq!(a.pending_ecne(), None);
    a.need_ecn_echo = true;
    a.last_ecne_tsn = 42;
    assert_eq!(a.pending_ecne(), Some(42));
}

#[tokio::test]
async fn test_timer_with_unset_timeout_is_refused() {
    let mut a = association(TransportConfig::default());
    let timers = TimerContext::default();

    let result = a.start_timer(
        &timers,
        TimerId::association(TimerKind::Autoclose),
        a.timeout(TimerKind::Autoclose),
    );
    assert_eq!(
        result,
        Err(Error::ErrTimerTimeoutUnset(TimerKind::Autoclose))
    );
    assert!(!a.is_timer_pending(TimerId::association(TimerKind::Autoclose)));
    assert_eq!(a.timer_refs(), 0);
}

#[tokio::test]
async fn test_timer_slots_are_checked() {
    let mut a = association(TransportConfig::default());
    let timers = TimerContext::default();
    let timeout = Duration::from_secs(1);

    assert_eq!(
        a.start_timer(&timers, TimerId::association(TimerKind::T3Rtx), timeout),
        Err(Error::ErrTimerPerPath(TimerKind::T3Rtx))
    );
    assert_eq!(
        a.start_timer(&timers, TimerId::path(TimerKind::T3Rtx, 3), timeout),
        Err(Error::ErrTransportNotFound(3))
    );
    assert!(a
        .start_timer(&timers, TimerId::path(TimerKind::Sack, 0), timeout)
        .unwrap_err()
        .is_internal_bug());
}

#[tokio::test]
async fn test_each_pending_timer_holds_one_reference() {
    let mut a = association(TransportConfig::default());
    let timers = TimerContext::default();
    let t1 = TimerId::association(TimerKind::T1Init);
    let hb = TimerId::path(TimerKind::Heartbeat, 0);

    a.start_timer(&timers, t1, Duration::from_secs(3)).unwrap();
    a.start_timer(&timers, hb, Duration::from_secs(30)).unwrap();
    assert_eq!(a.timer_refs(), 2);

    // a restart keeps the reference of the first arming
    a.start_timer(&timers, t1, Duration::from_secs(6)).unwrap();
    assert_eq!(a.timer_refs(), 2);

    a.stop_timer(t1).unwrap();
    a.stop_timer(t1).unwrap();
    settle().await;
    assert!(!a.is_timer_pending(t1));
    assert_eq!(a.timer_refs(), 1);

    a.kill();
    settle().await;
    assert!(a.is_dead());
    assert!(!a.is_timer_pending(hb));
    assert_eq!(a.timer_refs(), 0);
}

#[tokio::test]
async fn test_fired_timer_generation() {
    let mut a = association(TransportConfig::default());
    let timers = TimerContext::default();
    let id = TimerId::association(TimerKind::T1Cookie);

    a.start_timer(&timers, id, Duration::from_secs(3)).unwrap();
    let first = a.timer_generation;

    // a stale expiry from an earlier arming is ignored
    assert!(!a.take_fired_timer(id, first + 1));
    assert!(a.is_timer_pending(id));

    assert!(a.take_fired_timer(id, first));
    assert!(!a.is_timer_pending(id));
    assert!(!a.take_fired_timer(id, first));
}
