use super::*;
use crate::chunk::chunk_init::ChunkInit;
use crate::factory::DefaultChunkFactory;
use crate::packet::Packet;

use std::time::Instant;

fn endpoint() -> Endpoint {
    let (ulpq, _events) = UlpQueue::new(16);
    Endpoint::new(&SocketConfig::default(), Arc::new(DefaultChunkFactory), ulpq)
}

fn association(ep: &Endpoint, remote: &str) -> Association {
    Association::new(
        Arc::clone(ep.config()),
        ep.local_port(),
        remote.parse().unwrap(),
        ep.ulpq().clone(),
    )
}

fn transmit(tag: u32) -> Transmit {
    Transmit {
        now: Instant::now(),
        remote: "10.0.0.2:5001".parse().unwrap(),
        ecn: None,
        local_ip: None,
        packet: Packet {
            source_port: 5000,
            destination_port: 5001,
            verification_tag: tag,
            chunks: vec![],
        },
    }
}

#[test]
fn test_added_association_is_unreachable_until_hashed() {
    let mut ep = endpoint();
    let a = association(&ep, "10.0.0.2:5001");
    let id = a.id();

    let h = ep.add_association(a);
    assert_eq!(ep.association(h).map(|a| a.handle()), Some(h));
    assert_eq!(ep.association_count(), 1);
    assert_eq!(ep.lookup_by_tag(id), None);

    ep.hash(h);
    ep.hash(h);
    assert_eq!(ep.lookup_by_tag(id), Some(h));
    assert_eq!(ep.lookup_by_addr(&"10.0.0.2:5001".parse().unwrap()), Some(h));
}

#[test]
fn test_hash_picks_up_new_peer_addresses() {
    let mut ep = endpoint();
    let h = ep.add_association(association(&ep, "10.0.0.2:5001"));
    ep.hash(h);

    let extra: SocketAddr = "10.0.1.2:5001".parse().unwrap();
    let init = ChunkInit {
        is_ack: true,
        initiate_tag: 77,
        initial_tsn: 1,
        advertised_receiver_window_credit: 1500,
        num_outbound_streams: 1,
        num_inbound_streams: 1,
        addresses: vec![extra],
        state_cookie: None,
        ecn_capable: false,
    };
    ep.association_mut(h).unwrap().process_init(&init);
    assert_eq!(ep.lookup_by_addr(&extra), None);

    ep.hash(h);
    assert_eq!(ep.lookup_by_addr(&extra), Some(h));
}

#[test]
fn test_remove_forgets_every_key() {
    let mut ep = endpoint();
    let a = association(&ep, "10.0.0.2:5001");
    let id = a.id();
    let h = ep.add_association(a);
    ep.hash(h);

    let removed = ep.remove_association(h).unwrap();
    assert_eq!(removed.id(), id);
    assert!(ep.association(h).is_none());
    assert_eq!(ep.lookup_by_tag(id), None);
    assert_eq!(ep.lookup_by_addr(&"10.0.0.2:5001".parse().unwrap()), None);
    assert_eq!(ep.association_count(), 0);
    assert!(ep.remove_association(h).is_none());
}

#[test]
fn test_handles_of_distinct_associations() {
    let mut ep = endpoint();
    let h1 = ep.add_association(association(&ep, "10.0.0.2:5001"));
    let h2 = ep.add_association(association(&ep, "10.0.0.3:5001"));
    assert_ne!(h1, h2);

    let mut handles: Vec<AssociationHandle> = ep.handles().collect();
    handles.sort();
    assert_eq!(handles, vec![h1, h2]);
    assert_eq!(format!("{h1}"), format!("#{}", usize::from(h1)));
}

#[test]
fn test_poll_transmit_is_fifo() {
    let mut ep = endpoint();
    ep.transmits.push_back(transmit(1));
    ep.transmits.push_back(transmit(2));

    let tags: Vec<u32> = std::iter::from_fn(|| ep.poll_transmit())
        .map(|t| t.packet.verification_tag)
        .collect();
    assert_eq!(tags, vec![1, 2]);
    assert!(ep.poll_transmit().is_none());
}
