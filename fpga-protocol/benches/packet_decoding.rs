use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use fpga_protocol::{Answer, Event, Packet, codec::PacketDecoder};
use rmpv::Value;

fn stream() -> Vec<u8> {
    let mut out = Vec::new();
    for i in 0..1000u16 {
        let packet: Packet = if i % 4 == 0 {
            Event::RegisterChanged {
                serial: "FAOUT-01".to_string(),
                addr: 0,
                port: 1,
                value: i,
            }
            .into()
        } else if i % 4 == 1 {
            Answer::ok(Value::Binary(vec![0x5a; 512])).into()
        } else {
            Answer::ok(i).into()
        };
        packet.write_to(&mut out).expect("Writing to vector shouldn't fail");
    }
    out
}

fn decode_chunked(wire: &[u8], chunk_size: usize) -> usize {
    let mut decoder = PacketDecoder::new();
    let mut count = 0;
    for chunk in wire.chunks(chunk_size) {
        decoder.feed(chunk);
        for packet in decoder.packets() {
            black_box(packet.expect("stream is valid"));
            count += 1;
        }
    }
    count
}

fn bench_decoding(c: &mut Criterion) {
    let wire = stream();
    c.bench_function("decode single chunk", |b| {
        b.iter(|| decode_chunked(black_box(&wire), wire.len()))
    });
    c.bench_function("decode 8 KiB chunks", |b| {
        b.iter(|| decode_chunked(black_box(&wire), 8 * 1024))
    });
    c.bench_function("decode 64 byte chunks", |b| {
        b.iter(|| decode_chunked(black_box(&wire), 64))
    });

    let mut block = Vec::new();
    Packet::from(Answer::ok(Value::Binary(vec![0x5a; 4 * 1024 * 1024])))
        .write_to(&mut block)
        .expect("Writing to vector shouldn't fail");
    c.bench_function("decode 4 MiB answer in 8 KiB chunks", |b| {
        b.iter(|| decode_chunked(black_box(&block), 8 * 1024))
    });
}

criterion_group!(benches, bench_decoding);
criterion_main!(benches);
