use super::chunk_cookie_echo::*;
use super::*;
use crate::error::{Error, Result};

use bytes::Bytes;

#[test]
fn test_state_cookie_survives_the_round_trip_through_the_peer() -> Result<()> {
    let cookie = StateCookie {
        my_verification_tag: 0xdead_beef,
        peer_verification_tag: 0x0102_0304,
        my_initial_tsn: 1000,
        peer_initial_tsn: u32::MAX,
        peer_rwnd: 1024 * 1024,
        num_outbound_streams: 10,
        num_inbound_streams: 20,
        peer_ecn_capable: true,
    };

    let raw = cookie.marshal();
    assert_eq!(raw.len(), STATE_COOKIE_LENGTH);
    assert_eq!(StateCookie::unmarshal(&raw)?, cookie);

    Ok(())
}

#[test]
fn test_state_cookie_too_short() {
    let raw = Bytes::from_static(&[0u8; STATE_COOKIE_LENGTH - 1]);
    assert_eq!(
        StateCookie::unmarshal(&raw),
        Err(Error::ErrStateCookieTooShort)
    );
}

#[test]
fn test_encoded_len_is_padded() {
    let data = Chunk::PayloadData(chunk_payload_data::ChunkPayloadData {
        user_data: Bytes::from_static(b"ABC"),
        ..Default::default()
    });
    // 4 header + 12 data header + 3 user data, padded to 20
    assert_eq!(data.encoded_len(), 20);
    assert_eq!(Chunk::CookieAck.encoded_len(), 4);
    assert!(data.is_data());
    assert!(!Chunk::CookieAck.is_data());
}

#[test]
fn test_chunk_display_uses_chunk_type() {
    assert_eq!(Chunk::ShutdownAck.to_string(), "SHUTDOWN-ACK");
    assert_eq!(
        Chunk::Ecne(chunk_ecn::ChunkEcne { lowest_tsn: 7 }).to_string(),
        "ECNE lowestTsn=7"
    );
    assert_eq!(Chunk::Unknown(ChunkType(200)).chunk_type(), ChunkType(200));
}
