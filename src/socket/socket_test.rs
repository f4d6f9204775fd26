use super::*;
use crate::association::timer::Counter;
use crate::packet::Packet;
use crate::queue::ulp_queue::{AssocChangeState, Notification};
use crate::shared::EcnCodepoint;

use std::time::{Duration, Instant};

struct Peer {
    socket: Socket,
    addr: SocketAddr,
    events: mpsc::Receiver<UlpEvent>,
}

impl Peer {
    fn new(port: u16) -> Self {
        let config = SocketConfig {
            local_port: port,
            ..Default::default()
        };
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

    fn notifications(&mut self) -> Vec<Notification> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UlpEvent::Notification { notification, .. } => Some(notification),
                UlpEvent::Data { .. } => None,
            })
            .collect()
    }
}

fn arrive(mut t: Transmit, from: &Peer, to: &Peer) -> Result<()> {
    t.remote = from.addr;
    t.local_ip = Some(to.addr.ip());
    to.socket.handle(t)
}

fn deliver(from: &Peer, to: &Peer) -> usize {
    let transmits = from.drain();
    let n = transmits.len();
    for t in transmits {
        let _ = arrive(t, from, to);
    }
    n
}

fn pump(a: &Peer, b: &Peer) {
    while deliver(a, b) + deliver(b, a) > 0 {}
}

fn connect() -> (Peer, Peer, AssociationId, AssociationId) {
    let mut a = Peer::new(5000);
    let mut b = Peer::new(5001);
    let id = a.socket.associate(b.addr).unwrap();
    pump(&a, &b);

    let b_id = b.socket.associations()[0];
    assert_eq!(a.socket.association_state(id), Some(AssociationState::Established));
    assert_eq!(b.socket.association_state(b_id), Some(AssociationState::Established));
    assert_eq!(
        a.notifications(),
        vec![Notification::AssocChange(AssocChangeState::CommUp)]
    );
    assert_eq!(
        b.notifications(),
        vec![Notification::AssocChange(AssocChangeState::CommUp)]
    );
    (a, b, id, b_id)
}

#[tokio::test]
async fn test_handshake_and_data() {
    let (a, mut b, id, b_id) = connect();
    assert_eq!(
        a.socket.with_association(id, |a| a.peer_verification_tag()),
        Some(b_id)
    );
    assert_eq!(
        b.socket.with_association(b_id, |a| a.bind_addrs().to_vec()),
        Some(vec![b.addr])
    );

    a.socket
        .send(id, 3, PayloadProtocolIdentifier::String, Bytes::from_static(b"ping"))
        .unwrap();
    pump(&a, &b);

    let data: Vec<ChunkPayloadData> = b
        .events()
        .into_iter()
        .filter_map(|e| match e {
            UlpEvent::Data { association, chunk } => {
                assert_eq!(association, b_id);
                Some(chunk)
            }
            UlpEvent::Notification { .. } => None,
        })
        .collect();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0].stream_identifier, 3);
    assert_eq!(data[0].payload_type, PayloadProtocolIdentifier::String);
    assert_eq!(&data[0].user_data[..], b"ping");
}

#[tokio::test]
async fn test_packet_for_other_port_is_ignored() {
    let a = Peer::new(5000);
    let t = Transmit {
        now: Instant::now(),
        remote: "127.0.0.1:7000".parse().unwrap(),
        ecn: None,
        local_ip: None,
        packet: Packet {
            source_port: 7000,
            destination_port: 6000,
            verification_tag: 0,
            chunks: vec![Chunk::CookieAck],
        },
    };
    assert_eq!(a.socket.handle(t), Ok(()));
    assert!(a.drain().is_empty());
    assert!(a.socket.associations().is_empty());
}

#[tokio::test]
async fn test_api_errors() {
    let a = Peer::new(5000);
    let remote: SocketAddr = "127.0.0.1:5001".parse().unwrap();

    assert_eq!(
        a.socket
            .send(42, 0, PayloadProtocolIdentifier::Binary, Bytes::new()),
        Err(Error::ErrAssociationNotFound)
    );
    assert_eq!(a.socket.shutdown(42), Err(Error::ErrAssociationNotFound));

    let id = a.socket.associate(remote).unwrap();
    assert_eq!(
        a.socket.associate(remote),
        Err(Error::ErrAssociationAlreadyExist)
    );

    let unknown: SocketAddr = "127.0.0.9:5001".parse().unwrap();
    assert_eq!(
        a.socket.request_heartbeat(id, unknown),
        Err(Error::ErrUnknownPeerAddress(unknown))
    );
    assert_eq!(
        a.socket.request_heartbeat(id, remote),
        Err(Error::ErrPrimitiveNotAllowed(AssociationState::CookieWait))
    );
}

#[tokio::test]
async fn test_request_heartbeat() {
    let (a, b, id, _) = connect();

    a.socket.request_heartbeat(id, b.addr).unwrap();
    let sent = a.drain();
    assert_eq!(sent.len(), 1);
    assert!(matches!(sent[0].packet.chunks[..], [Chunk::Heartbeat(_)]));

    for t in sent {
        arrive(t, &a, &b).unwrap();
    }
    let acks = b.drain();
    assert!(matches!(acks[0].packet.chunks[..], [Chunk::HeartbeatAck(_)]));
}

#[tokio::test]
async fn test_abort_reaches_peer() {
    let (a, mut b, id, b_id) = connect();

    assert_eq!(a.socket.abort(id), Ok(()));
    assert_eq!(a.socket.association_state(id), None);

    let sent = a.drain();
    assert!(matches!(sent[0].packet.chunks[..], [Chunk::Abort(_)]));
    let result = sent
        .into_iter()
        .map(|t| arrive(t, &a, &b))
        .find(|r| r.is_err());
    assert_eq!(result, Some(Err(Error::ErrAssociationAbortedByPeer)));
    assert_eq!(b.socket.association_state(b_id), None);
    assert_eq!(
        b.notifications(),
        vec![Notification::AssocChange(AssocChangeState::CommLost)]
    );
}

#[tokio::test]
async fn test_close_aborts_everything() {
    let a = Peer::new(5000);
    a.socket.associate("127.0.0.1:5001".parse().unwrap()).unwrap();
    a.socket.associate("127.0.0.1:5002".parse().unwrap()).unwrap();
    assert_eq!(a.socket.associations().len(), 2);

    a.socket.close();
    assert!(a.socket.associations().is_empty());
}

#[tokio::test]
async fn test_ce_mark_is_reported_once_per_packet() {
    let (a, b, id, b_id) = connect();

    for _ in 0..2 {
        a.socket
            .send(id, 0, PayloadProtocolIdentifier::Binary, Bytes::from_static(b"x"))
            .unwrap();
    }
    let mut transmits = a.drain().into_iter();
    let mut packet = transmits.next().unwrap();
    for t in transmits {
        packet.packet.chunks.extend(t.packet.chunks);
    }
    let tsns: Vec<u32> = packet
        .packet
        .chunks
        .iter()
        .filter_map(|c| match c {
            Chunk::PayloadData(d) => Some(d.tsn),
            _ => None,
        })
        .collect();
    assert_eq!(tsns.len(), 2);

    packet.ecn = Some(EcnCodepoint::Ce);
    arrive(packet, &a, &b).unwrap();

    let echo = b
        .socket
        .with_association(b_id, |a| (a.need_ecn_echo(), a.last_ecne_tsn()));
    assert_eq!(echo, Some((true, tsns[0])));

    // the SACK for both chunks carries the echo, and the CWR ends it
    let sent = b.drain();
    assert!(sent
        .iter()
        .flat_map(|t| t.packet.chunks.iter())
        .any(|c| matches!(c, Chunk::Ecne(e) if e.lowest_tsn == tsns[0])));
    for t in sent {
        arrive(t, &b, &a).unwrap();
    }
    deliver(&a, &b);
    assert_eq!(
        b.socket.with_association(b_id, |a| a.need_ecn_echo()),
        Some(false)
    );
}

#[tokio::test(start_paused = true)]
async fn test_expired_timer_waits_for_the_lock() {
    let a = Peer::new(5000);
    a.socket.associate("127.0.0.1:5001".parse().unwrap()).unwrap();
    assert_eq!(a.drain().len(), 1);

    {
        let _guard = a.socket.inner.lock("test");
        tokio::time::sleep(Duration::from_millis(3200)).await;
    }
    assert!(a.drain().is_empty(), "T1-init could not run while locked");
    assert!(a.socket.inner.refused() >= 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let resent = a.drain();
    assert_eq!(resent.len(), 1);
    assert!(matches!(resent[0].packet.chunks[..], [Chunk::Init(_)]));
}

#[tokio::test]
async fn test_timer_of_removed_association_is_not_delivered_to_successor() {
    let a = Peer::new(5000);
    let first = a.socket.associate("127.0.0.1:5001".parse().unwrap()).unwrap();
    let stale = a.socket.with_association(first, |a| a.hold()).unwrap();
    a.socket.abort(first).unwrap();

    let second = a.socket.associate("127.0.0.1:5002".parse().unwrap()).unwrap();
    a.drain();
    let t1_init = TimerId::association(TimerKind::T1Init);

    // T1-init is the first timer either association armed
    let generation = 1;

    let mut inner = a.socket.inner.lock("test");
    let handle = inner.endpoint.lookup_by_tag(second).unwrap();
    let fresh = {
        let assoc = inner.endpoint.association(handle).unwrap();
        assert!(!stale.refers_to(&assoc.liveness));
        assoc.hold()
    };

    inner.handle_timeout(handle, t1_init, generation, &stale);
    let assoc = inner.endpoint.association(handle).unwrap();
    assert_eq!(assoc.counter(Counter::InitError), 0);
    assert!(assoc.is_timer_pending(t1_init));
    assert!(inner.endpoint.poll_transmit().is_none());

    // the same expiry from the association's own timer goes through
    inner.handle_timeout(handle, t1_init, generation, &fresh);
    let assoc = inner.endpoint.association(handle).unwrap();
    assert_eq!(assoc.counter(Counter::InitError), 1);
    let resent = inner.endpoint.poll_transmit().unwrap();
    assert!(matches!(resent.packet.chunks[..], [Chunk::Init(_)]));
}
