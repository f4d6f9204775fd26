use super::*;
use crate::association::state::AssociationState;
use crate::chunk::chunk_payload_data::PayloadProtocolIdentifier;
use crate::chunk::Chunk;
use crate::config::{SocketConfig, TransportConfig};
use crate::queue::ulp_queue::{AssocChangeState, Notification, UlpEvent};
use crate::shared::{AssociationId, Transmit};
use crate::socket::Socket;

use bytes::Bytes;
use std::net::SocketAddr;
use tokio::sync::mpsc;

struct Peer {
    socket: Socket,
    addr: SocketAddr,
    events: mpsc::Receiver<UlpEvent>,
}

impl Peer {
    fn new(port: u16, transport: TransportConfig) -> Self {
        let config = SocketConfig {
            transport: Arc::new(transport),
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

    fn notifications(&mut self) -> Vec<Notification> {
        let mut out = vec![];
        while let Ok(e) = self.events.try_recv() {
            if let UlpEvent::Notification { notification, .. } = e {
                out.push(notification);
            }
        }
        out
    }
}

/// Hands every packet `from` has queued to `to`, as if they crossed the wire
fn deliver(from: &Peer, to: &Peer) -> usize {
    let mut n = 0;
    for mut t in from.drain() {
        assert_eq!(t.remote, to.addr);
        t.remote = from.addr;
        t.local_ip = Some(to.addr.ip());
        let _ = to.socket.handle(t);
        n += 1;
    }
    n
}

fn pump(a: &Peer, b: &Peer) {
    while deliver(a, b) + deliver(b, a) > 0 {}
}

fn connect(transport: TransportConfig) -> (Peer, Peer, AssociationId) {
    let a = Peer::new(5000, transport.clone());
    let b = Peer::new(5001, transport);
    let id = a.socket.associate(b.addr).unwrap();
    pump(&a, &b);
    assert_eq!(a.socket.association_state(id), Some(AssociationState::Established));
    (a, b, id)
}

fn chunks(transmits: &[Transmit]) -> Vec<&Chunk> {
    transmits.iter().flat_map(|t| t.packet.chunks.iter()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_t1_init_retransmits_init() {
    let a = Peer::new(5000, TransportConfig::default());
    let id = a.socket.associate("127.0.0.1:5001".parse().unwrap()).unwrap();
    assert_eq!(a.drain().len(), 1);

    tokio::time::sleep(Duration::from_millis(2900)).await;
    assert!(a.drain().is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    let resent = a.drain();
    assert_eq!(resent.len(), 1);
    assert!(matches!(resent[0].packet.chunks[..], [Chunk::Init(_)]));
    assert_eq!(resent[0].packet.verification_tag, 0);

    let timeout = a
        .socket
        .with_association(id, |a| a.timeout(crate::association::timer::TimerKind::T1Init));
    assert_eq!(timeout, Some(Duration::from_secs(6)));
}

#[tokio::test(start_paused = true)]
async fn test_handshake_gives_up_when_nobody_answers() {
    let config = TransportConfig::default()
        .with_rto_initial(Duration::from_secs(1))
        .with_max_init_timeout(Duration::from_secs(2))
        .with_max_init_attempts(2);
    let mut a = Peer::new(5000, config);
    let id = a.socket.associate("127.0.0.1:5001".parse().unwrap()).unwrap();

    tokio::time::sleep(Duration::from_secs(6)).await;

    assert_eq!(a.drain().len(), 3, "INIT and two retransmissions");
    assert_eq!(a.socket.association_state(id), None);
    assert!(a.socket.associations().is_empty());
    assert_eq!(
        a.notifications(),
        vec![Notification::AssocChange(AssocChangeState::CantStartAssoc)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_delayed_sack_fires() {
    let (a, b, id) = connect(TransportConfig::default());
    let b_id = b.socket.associations()[0];

    a.socket
        .send(id, 0, PayloadProtocolIdentifier::Binary, Bytes::from_static(b"hello"))
        .unwrap();
    assert_eq!(deliver(&a, &b), 1);
    assert!(b.drain().is_empty(), "SACK is delayed");

    tokio::time::sleep(Duration::from_millis(250)).await;
    let sacks = b.drain();
    assert!(matches!(chunks(&sacks)[..], [Chunk::Sack(_)]));
    assert_eq!(b.socket.stats(b_id).unwrap().get_num_ack_timeouts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_t3_rtx_retransmits_lost_data() {
    let (a, b, id) = connect(TransportConfig::default());

    a.socket
        .send(id, 0, PayloadProtocolIdentifier::Binary, Bytes::from_static(b"lost"))
        .unwrap();
    let lost = a.drain();
    let Some(Chunk::PayloadData(first)) = chunks(&lost).first().copied() else {
        panic!("expected DATA");
    };
    let tsn = first.tsn;

    tokio::time::sleep(Duration::from_millis(3100)).await;
    let resent = a.drain();
    assert!(chunks(&resent)
        .iter()
        .any(|c| matches!(c, Chunk::PayloadData(d) if d.tsn == tsn)));
    assert_eq!(a.socket.stats(id).unwrap().get_num_t3timeouts(), 1);
    assert_eq!(
        a.socket.with_association(id, |a| a.transports()[0].rto()),
        Some(Duration::from_secs(6))
    );

    // the retransmission gets through and is acknowledged
    for mut t in resent {
        t.remote = a.addr;
        t.local_ip = Some(b.addr.ip());
        b.socket.handle(t).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(250)).await;
    pump(&a, &b);
    assert_eq!(a.socket.with_association(id, |a| a.outq().outstanding_count()), Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_keeps_idle_path_confirmed() {
    let config = TransportConfig::default().with_heartbeat_interval(Duration::from_secs(1));
    let (a, b, id) = connect(config);

    tokio::time::sleep(Duration::from_secs(6)).await;
    let sent = a.drain();
    assert!(chunks(&sent).iter().any(|c| matches!(c, Chunk::Heartbeat(_))));
    assert_eq!(
        a.socket.with_association(id, |a| a.transports()[0].hb_outstanding),
        Some(true)
    );

    for mut t in sent {
        t.remote = a.addr;
        t.local_ip = Some(b.addr.ip());
        let _ = b.socket.handle(t);
    }
    deliver(&b, &a);
    let path = a.socket.with_association(id, |a| {
        let t = &a.transports()[0];
        (t.hb_outstanding, t.error_count(), t.is_active())
    });
    assert_eq!(path, Some((false, 0, true)));
}

#[tokio::test(start_paused = true)]
async fn test_timers_release_references_on_abort() {
    let (a, _b, id) = connect(TransportConfig::default());
    let liveness = a
        .socket
        .with_association(id, |a| Arc::clone(&a.liveness))
        .unwrap();
    assert!(Arc::strong_count(&liveness) > 1, "heartbeat timer is armed");

    a.socket.abort(id).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(liveness.is_dead());
    assert_eq!(Arc::strong_count(&liveness), 1);
}
