use bytes::Bytes;
use proptest::prelude::*;
use vflow_core::ids::{FlowId, VcId};
use vflow_wire::cipher::{BoxCrypter, NullCipher};
use vflow_wire::message::Message;
use vflow_wire::queue::Queue;
use vflow_wire::{read_from, write_to};

#[tokio::test]
async fn oversized_setup_stream_is_rejected_on_write() {
    let msg = Message::SetupStream {
        bytes: Bytes::from(vec![0u8; 9 * 1024]),
    };
    let mut buf = Vec::new();
    let err = write_to(&mut buf, &msg, &NullCipher, 4 * 1024 * 1024)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), vflow_core::ErrorKind::BadProtocol);
}

#[tokio::test]
async fn queue_full_lifecycle_matches_close_then_shutdown_semantics() {
    let q = Queue::new(vflow_wire::queue::DEFAULT_CAPACITY);
    q.put(b"a".to_vec()).unwrap();
    q.put(b"b".to_vec()).unwrap();
    q.close();

    let cancel = vflow_core::Cancellation::new();
    assert_eq!(q.get(&cancel).await.unwrap(), b"a");
    assert_eq!(q.get(&cancel).await.unwrap(), b"b");
    let err = q.get(&cancel).await.unwrap_err();
    assert_eq!(err.kind(), vflow_core::ErrorKind::Aborted);

    // Shutdown after close is a no-op for already-reported closure.
    q.shutdown();
    let err = q.get(&cancel).await.unwrap_err();
    assert_eq!(err.kind(), vflow_core::ErrorKind::Aborted);
}

proptest! {
    #[test]
    fn data_frame_round_trips_for_arbitrary_payloads(
        vc in any::<u64>(),
        flow in any::<u64>(),
        flags in any::<u8>(),
        payload in proptest::collection::vec(any::<u8>(), 0..2048),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let cipher = BoxCrypter::new([42u8; 32]);
            let msg = Message::Data {
                vc_id: VcId::new(vc),
                flow_id: FlowId::new(flow),
                flags,
                payload: Bytes::from(payload),
            };
            let mut buf = Vec::new();
            write_to(&mut buf, &msg, &cipher, 16 * 1024 * 1024).await.unwrap();
            let mut cursor = std::io::Cursor::new(buf);
            let got = read_from(&mut cursor, &cipher, 16 * 1024 * 1024).await.unwrap();
            prop_assert_eq!(got, msg);
            Ok(())
        })?;
    }
}
