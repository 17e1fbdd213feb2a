use bytes::BytesMut;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use quic_bridge_codec::{
    rtp::{DirectionState, MAX_PACKET_SIZE, RtpPacket},
    srtp::SrtpSession,
};

fn criterion_benchmark(c: &mut Criterion) {
    let mut state = DirectionState::new(0x12345678, 96, 160);
    let mut bytes = BytesMut::with_capacity(MAX_PACKET_SIZE);

    state.encode(&[0x42u8; 160], &mut bytes).unwrap();
    let packet = bytes.to_vec();

    let mut session =
        SrtpSession::open("0123456789abcdef0123456789abcdef0123456789abcdef012345678901").unwrap();

    let mut rtp_criterion = c.benchmark_group("rtp");

    rtp_criterion.throughput(Throughput::Elements(1));
    rtp_criterion.bench_function("decode", |bencher| {
        bencher.iter(|| {
            RtpPacket::decode(&packet).unwrap();
        })
    });

    rtp_criterion.bench_function("encode", |bencher| {
        bencher.iter(|| {
            state.encode(&packet[12..], &mut bytes).unwrap();
        })
    });

    rtp_criterion.bench_function("protect", |bencher| {
        bencher.iter(|| {
            session.protect(&packet).unwrap();
        })
    });

    rtp_criterion.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
