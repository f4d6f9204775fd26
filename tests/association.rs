use sctp_sm::chunk::chunk_type::CT_PAYLOAD_DATA;
use sctp_sm::{
    AssocChangeState, Association, AssociationId, AssociationState, Chunk, Disposition, Endpoint,
    Error, EventPayload, EventSubtype, Notification, PayloadProtocolIdentifier, Socket,
    SocketConfig, StateTable, Transition, Transmit, TransportConfig, UlpEvent,
};

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Peer {
    socket: Socket,
    addr: SocketAddr,
    events: mpsc::Receiver<UlpEvent>,
}

impl Peer {
    fn new(port: u16) -> Self {
        Peer::with_config(port, TransportConfig::default())
    }

    fn with_config(port: u16, transport: TransportConfig) -> Self {
        let mut config = SocketConfig::new();
        config.local_port = port;
        config.transport = Arc::new(transport);
        let (socket, events) = Socket::new(config);
        Peer {
            socket,
            addr: SocketAddr::new("127.0.0.1".parse().unwrap(), port),
            events,
        }
    }

    fn drain(&self) -> Vec<Transmit> {
        std::iter::from_fn(|| self.socket.poll_transmit()).collect()
    }

    fn events(&mut self) -> Vec<UlpEvent> {
        let mut out = vec![];
        while let Ok(e) = self.events.try_recv() {
            out.push(e);
        }
        out
    }

    fn received(&mut self) -> Vec<Bytes> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UlpEvent::Data { chunk, .. } => Some(chunk.user_data),
                UlpEvent::Notification { .. } => None,
            })
            .collect()
    }
}

fn init_logger() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Trace)
        .is_test(true)
        .try_init()
        .ok();
}

/// Carries every queued packet of `from` over to `to`. Packets for which
/// `lose` returns true never arrive.
fn deliver_lossy(from: &Peer, to: &Peer, lose: &mut dyn FnMut(&Transmit) -> bool) -> usize {
    let transmits = from.drain();
    let n = transmits.len();
    for mut t in transmits {
        if lose(&t) {
            log::info!("lost packet {} -> {}", from.addr, to.addr);
            continue;
        }
        t.remote = from.addr;
        t.local_ip = Some(to.addr.ip());
        if let Err(err) = to.socket.handle(t) {
            log::info!("{} handling packet from {}: {}", to.addr, from.addr, err);
        }
    }
    n
}

fn pump(a: &Peer, b: &Peer) {
    let mut keep = |_: &Transmit| false;
    while deliver_lossy(a, b, &mut keep) + deliver_lossy(b, a, &mut keep) > 0 {}
}

fn connect(a: &Peer, b: &Peer) -> (AssociationId, AssociationId) {
    let id = a.socket.associate(b.addr).unwrap();
    pump(a, b);
    let b_id = b.socket.associations()[0];
    assert_eq!(
        a.socket.association_state(id),
        Some(AssociationState::Established)
    );
    assert_eq!(
        b.socket.association_state(b_id),
        Some(AssociationState::Established)
    );
    (id, b_id)
}

fn notifications(events: Vec<UlpEvent>) -> Vec<Notification> {
    events
        .into_iter()
        .filter_map(|e| match e {
            UlpEvent::Notification { notification, .. } => Some(notification),
            UlpEvent::Data { .. } => None,
        })
        .collect()
}

#[tokio::test]
async fn test_messages_both_ways() {
    init_logger();
    let mut a = Peer::new(5000);
    let mut b = Peer::new(5001);
    let (id, b_id) = connect(&a, &b);

    // every second packet is acknowledged at once
    for i in 0..4u8 {
        a.socket
            .send(id, 0, PayloadProtocolIdentifier::Binary, Bytes::from(vec![i; 100]))
            .unwrap();
    }
    b.socket
        .send(b_id, 1, PayloadProtocolIdentifier::String, Bytes::from_static(b"pong"))
        .unwrap();
    pump(&a, &b);

    let at_b = b.received();
    assert_eq!(at_b.len(), 4);
    for (i, payload) in at_b.iter().enumerate() {
        assert_eq!(payload, &Bytes::from(vec![i as u8; 100]));
    }
    assert_eq!(a.received(), vec![Bytes::from_static(b"pong")]);

    let stats = b.socket.stats(b_id).unwrap();
    assert_eq!(stats.get_num_datas(), 4);
    assert_eq!(stats.get_num_sacks(), 2);
    assert_eq!(
        a.socket.with_association(id, |a| a.outq().outstanding_count()),
        Some(0)
    );
}

#[tokio::test(start_paused = true)]
async fn test_graceful_shutdown_after_pending_data() {
    init_logger();
    let mut a = Peer::new(5000);
    let mut b = Peer::new(5001);
    let (id, b_id) = connect(&a, &b);
    a.events();
    b.events();

    a.socket
        .send(id, 0, PayloadProtocolIdentifier::Binary, Bytes::from_static(b"last words"))
        .unwrap();
    a.socket.shutdown(id).unwrap();
    assert_eq!(
        a.socket.association_state(id),
        Some(AssociationState::ShutdownPending)
    );
    assert_eq!(
        a.socket
            .send(id, 0, PayloadProtocolIdentifier::Binary, Bytes::from_static(b"late")),
        Err(Error::ErrPayloadDataStateNotExist)
    );

    pump(&a, &b);
    // the last DATA is acknowledged by the delayed SACK
    tokio::time::sleep(Duration::from_millis(300)).await;
    pump(&a, &b);

    assert!(a.socket.associations().is_empty());
    assert!(b.socket.associations().is_empty());
    assert_eq!(b.socket.association_state(b_id), None);

    let b_events = b.events();
    assert!(b_events.iter().any(|e| matches!(
        e,
        UlpEvent::Data { chunk, .. } if &chunk.user_data[..] == b"last words"
    )));
    assert_eq!(
        notifications(b_events),
        vec![
            Notification::Shutdown,
            Notification::AssocChange(AssocChangeState::ShutdownComplete)
        ]
    );
    assert_eq!(
        notifications(a.events()),
        vec![Notification::AssocChange(AssocChangeState::ShutdownComplete)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_lost_cookie_echo_is_retransmitted() {
    init_logger();
    let a = Peer::new(5000);
    let b = Peer::new(5001);
    let id = a.socket.associate(b.addr).unwrap();

    let mut lose_echo = |t: &Transmit| matches!(t.packet.chunks[..], [Chunk::CookieEcho(_), ..]);
    deliver_lossy(&a, &b, &mut lose_echo);
    deliver_lossy(&b, &a, &mut lose_echo);
    assert_eq!(deliver_lossy(&a, &b, &mut lose_echo), 1);
    assert_eq!(
        a.socket.association_state(id),
        Some(AssociationState::CookieEchoed)
    );
    assert!(b.socket.associations().is_empty());

    tokio::time::sleep(Duration::from_millis(3100)).await;
    pump(&a, &b);

    assert_eq!(
        a.socket.association_state(id),
        Some(AssociationState::Established)
    );
    assert_eq!(b.socket.associations().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_data_survives_loss() {
    init_logger();
    let a = Peer::new(5000);
    let mut b = Peer::new(5001);
    let (id, _) = connect(&a, &b);

    for i in 0..3u8 {
        a.socket
            .send(id, 0, PayloadProtocolIdentifier::Binary, Bytes::from(vec![i; 10]))
            .unwrap();
    }
    let mut lost = false;
    let mut lose_first_data = |t: &Transmit| {
        let data = t
            .packet
            .chunks
            .iter()
            .any(|c| matches!(c, Chunk::PayloadData(_)));
        if data && !lost {
            lost = true;
            return true;
        }
        false
    };
    deliver_lossy(&a, &b, &mut lose_first_data);

    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        pump(&a, &b);
    }

    let received = b.received();
    assert_eq!(received.len(), 3);
    assert_eq!(
        a.socket.with_association(id, |a| a.outq().outstanding_count()),
        Some(0)
    );
}

#[tokio::test(start_paused = true)]
async fn test_peer_gone_loses_association() {
    init_logger();
    let config = TransportConfig::default()
        .with_rto_initial(Duration::from_secs(1))
        .with_rto_max(Duration::from_secs(2))
        .with_assoc_max_retrans(3);
    let mut a = Peer::with_config(5000, config.clone());
    let b = Peer::with_config(5001, config);
    let (id, _) = connect(&a, &b);
    a.events();

    a.socket
        .send(id, 0, PayloadProtocolIdentifier::Binary, Bytes::from_static(b"void"))
        .unwrap();
    drop(b);

    tokio::time::sleep(Duration::from_secs(20)).await;
    a.drain();

    assert_eq!(a.socket.association_state(id), None);
    assert!(notifications(a.events())
        .contains(&Notification::AssocChange(AssocChangeState::CommLost)));
}

fn refuse_data(
    _: &Endpoint,
    _: Option<&Association>,
    _: EventSubtype,
    _: EventPayload,
) -> Transition {
    Transition::only(Disposition::Discard)
}

#[tokio::test]
async fn test_custom_transition_table() {
    init_logger();
    let a = Peer::new(5000);

    let mut table = StateTable::default();
    table.set(
        AssociationState::Established,
        EventSubtype::Chunk(CT_PAYLOAD_DATA),
        refuse_data,
    );
    let mut config = SocketConfig::new();
    config.local_port = 5001;
    let (socket, events) = Socket::with_parts(
        config,
        Arc::new(sctp_sm::DefaultChunkFactory),
        Arc::new(table),
    );
    let mut b = Peer {
        socket,
        addr: "127.0.0.1:5001".parse().unwrap(),
        events,
    };

    let (id, _) = connect(&a, &b);
    a.socket
        .send(id, 0, PayloadProtocolIdentifier::Binary, Bytes::from_static(b"ignored"))
        .unwrap();
    pump(&a, &b);

    assert!(b.received().is_empty());
    assert_eq!(
        a.socket.with_association(id, |a| a.outq().outstanding_count()),
        Some(1)
    );
}
