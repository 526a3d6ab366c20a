use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};
use vflow_core::ids::{FlowId, VcId};
use vflow_wire::cipher::{BoxCrypter, NullCipher};
use vflow_wire::message::Message;
use vflow_wire::{read_from, write_to};

fn data_message(len: usize) -> Message {
    Message::Data {
        vc_id: VcId::new(1),
        flow_id: FlowId::new(10),
        flags: 0,
        payload: Bytes::from(vec![0xABu8; len]),
    }
}

fn bench_write_read_null_cipher(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let msg = data_message(4096);
    c.bench_function("frame_round_trip_null_cipher_4k", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut buf = Vec::new();
                write_to(&mut buf, &msg, &NullCipher, 4 * 1024 * 1024)
                    .await
                    .unwrap();
                let mut cursor = std::io::Cursor::new(buf);
                read_from(&mut cursor, &NullCipher, 4 * 1024 * 1024)
                    .await
                    .unwrap()
            })
        });
    });
}

fn bench_write_read_authenticated_cipher(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let cipher = BoxCrypter::new([1u8; 32]);
    let msg = data_message(4096);
    c.bench_function("frame_round_trip_box_crypter_4k", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut buf = Vec::new();
                write_to(&mut buf, &msg, &cipher, 4 * 1024 * 1024)
                    .await
                    .unwrap();
                let mut cursor = std::io::Cursor::new(buf);
                read_from(&mut cursor, &cipher, 4 * 1024 * 1024)
                    .await
                    .unwrap()
            })
        });
    });
}

criterion_group!(
    framing_benches,
    bench_write_read_null_cipher,
    bench_write_read_authenticated_cipher
);
criterion_main!(framing_benches);
