use anyhow::Result;
use bytes::BytesMut;
use quic_bridge_codec::{
    Error,
    rtp::{DirectionState, FIXED_HEADER_SIZE, MAX_PACKET_SIZE, RtpPacket},
    srtp::{AUTH_TAG_SIZE, SrtpSession},
};

const KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef012345678901";

/// A plain 172 byte packet: fixed header plus 160 bytes of payload.
fn sample_packet() -> Vec<u8> {
    let mut state = DirectionState::new(0x12345678, 96, 160);
    let mut bytes = BytesMut::with_capacity(MAX_PACKET_SIZE);
    state.encode(&[0x42u8; 160], &mut bytes).unwrap();
    bytes.to_vec()
}

#[test]
fn test_decode_recovers_encoded_fields() -> Result<()> {
    let mut state = DirectionState::new(0xdeadbeef, 111, 960);
    let mut bytes = BytesMut::with_capacity(MAX_PACKET_SIZE);

    for round in 1u16..=5 {
        state.encode(&[round as u8; 31], &mut bytes)?;

        let packet = RtpPacket::decode(&bytes)?;
        assert_eq!(packet.header.version, 2);
        assert!(!packet.header.padding);
        assert!(!packet.header.extension);
        assert_eq!(packet.header.csrc_count, 0);
        assert!(!packet.header.marker);
        assert_eq!(packet.header.payload_type, 111);
        assert_eq!(packet.header.sequence_number, round);
        assert_eq!(packet.header.timestamp, round as u32 * 960);
        assert_eq!(packet.header.ssrc, 0xdeadbeef);
        assert_eq!(packet.payload(), &[round as u8; 31]);
    }

    Ok(())
}

#[test]
fn test_decode_rejects_truncated_buffers() {
    let packet = sample_packet();

    for len in 0..FIXED_HEADER_SIZE {
        assert!(matches!(
            RtpPacket::decode(&packet[..len]),
            Err(Error::Malformed)
        ));
    }

    // Wrong protocol version.
    let mut wrong_version = packet.clone();
    wrong_version[0] = 0x40 | (wrong_version[0] & 0x3F);
    assert!(RtpPacket::decode(&wrong_version).is_err());

    // CSRC count larger than the buffer.
    let mut short_csrc = packet[..FIXED_HEADER_SIZE].to_vec();
    short_csrc[0] |= 0x0F;
    assert!(RtpPacket::decode(&short_csrc).is_err());

    // Extension flag without the four byte prologue.
    let mut short_extension = packet[..FIXED_HEADER_SIZE + 2].to_vec();
    short_extension[0] |= 0x10;
    assert!(RtpPacket::decode(&short_extension).is_err());

    // Extension word count past the end of the buffer.
    let mut bad_words = packet[..FIXED_HEADER_SIZE].to_vec();
    bad_words[0] |= 0x10;
    bad_words.extend_from_slice(&[0xbe, 0xde, 0x00, 0x10]);
    assert!(RtpPacket::decode(&bad_words).is_err());
}

#[test]
fn test_encode_payload_size_boundary() {
    let mut state = DirectionState::new(1, 96, 160);
    let mut bytes = BytesMut::with_capacity(MAX_PACKET_SIZE);

    assert!(matches!(
        state.encode(&vec![0u8; MAX_PACKET_SIZE - 11], &mut bytes),
        Err(Error::PayloadTooLarge)
    ));

    // The failed call must not advance the counters.
    assert_eq!(state.sequence_number, 0);
    assert_eq!(state.timestamp, 0);

    state
        .encode(&vec![0u8; MAX_PACKET_SIZE - 12], &mut bytes)
        .unwrap();

    assert_eq!(bytes.len(), MAX_PACKET_SIZE);
    assert_eq!(state.sequence_number, 1);
}

#[test]
fn test_encode_sequence_wraps_at_16_bits() -> Result<()> {
    let mut state = DirectionState::new(1, 96, 160);
    state.sequence_number = u16::MAX - 1;

    let mut bytes = BytesMut::with_capacity(64);

    state.encode(&[0u8; 4], &mut bytes)?;
    assert_eq!(state.sequence_number, u16::MAX);

    state.encode(&[0u8; 4], &mut bytes)?;
    assert_eq!(state.sequence_number, 0);

    Ok(())
}

#[test]
fn test_srtp_round_trip_restores_payload() -> Result<()> {
    let packet = sample_packet();

    let mut sender = SrtpSession::open(KEY)?;
    let mut receiver = SrtpSession::open(KEY)?;

    let mut protected = sender.protect(&packet)?;
    assert_eq!(protected.len(), packet.len() + AUTH_TAG_SIZE);

    let len = receiver.unprotect(&mut protected)?;
    assert_eq!(&protected[..len], &packet[..]);

    Ok(())
}

#[test]
fn test_srtp_rejects_wrong_key() -> Result<()> {
    let other = "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff";
    let packet = sample_packet();

    let mut sender = SrtpSession::open(KEY)?;
    let mut receiver = SrtpSession::open(other)?;

    let mut protected = sender.protect(&packet)?;
    assert!(matches!(
        receiver.unprotect(&mut protected),
        Err(Error::CryptoFailure)
    ));

    Ok(())
}

#[test]
fn test_srtp_key_material_validation() {
    // Not hex.
    assert!(SrtpSession::open(&"zz".repeat(30)).is_err());

    // Every length other than 60 characters.
    for len in [0, 2, 30, 58, 59, 61, 62, 64] {
        assert!(matches!(
            SrtpSession::open(&"ab".repeat(32)[..len]),
            Err(Error::InvalidKey)
        ));
    }

    assert!(SrtpSession::open(&"ab".repeat(30)).is_ok());
}

#[test]
fn test_srtp_replay_and_reorder_window() -> Result<()> {
    let mut sender = SrtpSession::open(KEY)?;
    let mut receiver = SrtpSession::open(KEY)?;

    let mut state = DirectionState::new(0x1000, 96, 160);
    let mut bytes = BytesMut::with_capacity(64);

    let mut protected = Vec::with_capacity(8);
    for _ in 0..8 {
        state.encode(&[7u8; 16], &mut bytes)?;
        protected.push(sender.protect(&bytes)?);
    }

    // In order delivery with one gap, the late packet still decodes.
    for it in [0usize, 1, 2, 4, 5, 3, 6, 7] {
        assert!(receiver.unprotect(&mut protected[it].clone()).is_ok());
    }

    // Everything seen once is now a replay.
    for it in protected.iter() {
        assert!(receiver.unprotect(&mut it.clone()).is_err());
    }

    Ok(())
}

#[test]
fn test_srtp_streams_are_tracked_per_ssrc() -> Result<()> {
    let mut sender = SrtpSession::open(KEY)?;
    let mut receiver = SrtpSession::open(KEY)?;

    let mut bytes = BytesMut::with_capacity(64);

    for ssrc in [0x1111u32, 0x2222, 0x3333] {
        let mut state = DirectionState::new(ssrc, 96, 160);
        state.encode(&[1u8; 8], &mut bytes)?;

        let mut protected = sender.protect(&bytes)?;
        let len = receiver.unprotect(&mut protected)?;

        assert_eq!(RtpPacket::decode(&protected[..len])?.header.ssrc, ssrc);
    }

    Ok(())
}

#[test]
fn test_srtcp_round_trip() -> Result<()> {
    let packet = [
        0x80u8, 0xc9, 0x00, 0x01, 0x12, 0x34, 0x56, 0x78, 0xde, 0xad, 0xbe, 0xef,
    ];

    let mut sender = SrtpSession::open(KEY)?;
    let mut receiver = SrtpSession::open(KEY)?;

    let mut protected = sender.protect_rtcp(&packet)?;
    let len = receiver.unprotect_rtcp(&mut protected)?;

    assert_eq!(&protected[..len], &packet[..]);

    // Replayed SRTCP index.
    let mut replay = sender.protect_rtcp(&packet)?;
    receiver.unprotect_rtcp(&mut replay.clone())?;
    assert!(receiver.unprotect_rtcp(&mut replay).is_err());

    Ok(())
}
