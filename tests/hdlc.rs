use pw_rpc::protocol::hdlc::{DecodeError, Decoder, Encoder, Frame, FLAG, MAX_FRAME_SIZE};
use pw_rpc::protocol::rpc::RPC_ADDRESS;

async fn encode_frame(address: u64, payload: &[u8]) -> Vec<u8> {
    let mut encoder = Encoder::new(Vec::new(), address);
    encoder.encode(payload).await.expect("encode frame");
    encoder.into_inner()
}

/// Feeds `wire` through the state machine, collecting every yielded frame
/// and error.
fn process_all(wire: &[u8]) -> (Vec<Frame>, Vec<DecodeError>) {
    let mut decoder = Decoder::new(tokio::io::empty());
    let mut frames = Vec::new();
    let mut errors = Vec::new();
    for &byte in wire {
        match decoder.process(byte) {
            Ok(Some(frame)) => frames.push(frame),
            Ok(None) => {}
            Err(err) => errors.push(err),
        }
    }
    (frames, errors)
}

#[tokio::test]
async fn test_empty_payload_round_trip() {
    let wire = encode_frame(RPC_ADDRESS, &[]).await;
    assert_eq!(wire, [0x7e, 0xa5, 0x03, 0xe9, 0x0b, 0xa0, 0x0b, 0x7e]);

    let mut decoder = Decoder::new(wire.as_slice());
    let frame = decoder.decode().await.expect("decode frame");
    assert_eq!(frame.address(), 0x52);
    assert_eq!(frame.control(), 0x03);
    assert_eq!(frame.payload(), &[] as &[u8]);
}

#[tokio::test]
async fn test_flag_and_escape_bytes_are_escaped_in_place() {
    let wire = encode_frame(RPC_ADDRESS, &[0x7e, 0x7d, 0x00]).await;
    assert_eq!(
        wire,
        [0x7e, 0xa5, 0x03, 0x7d, 0x5e, 0x7d, 0x5d, 0x00, 0xf4, 0x0a, 0xae, 0xa8, 0x7e]
    );

    let (frames, errors) = process_all(&wire);
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload(), [0x7e, 0x7d, 0x00]);
}

#[tokio::test]
async fn test_escape_minimality() {
    // However many flags the payload contains, the only flag bytes on the
    // wire are the frame delimiters.
    let payload = [0x7e; 32];
    let wire = encode_frame(RPC_ADDRESS, &payload).await;
    let flags = wire.iter().filter(|&&byte| byte == FLAG).count();
    assert_eq!(flags, 2);
    assert_eq!(*wire.first().unwrap(), FLAG);
    assert_eq!(*wire.last().unwrap(), FLAG);

    let (frames, errors) = process_all(&wire);
    assert!(errors.is_empty());
    assert_eq!(frames[0].payload(), payload);
}

#[tokio::test]
async fn test_round_trip_payload_sizes_and_addresses() {
    let payload: Vec<u8> = (0..32 * 1024u32).map(|i| (i % 251) as u8).collect();
    for address in [0u64, 1, 0x52, 300, u64::MAX] {
        for len in [0usize, 1, 2, 3, 127, 128, 1024, payload.len()] {
            let wire = encode_frame(address, &payload[..len]).await;
            let (frames, errors) = process_all(&wire);
            assert!(errors.is_empty(), "address {address:#x} len {len}");
            assert_eq!(frames.len(), 1, "address {address:#x} len {len}");
            assert_eq!(frames[0].address(), address);
            assert_eq!(frames[0].control(), 0x03);
            assert_eq!(frames[0].payload(), &payload[..len]);
        }
    }
}

#[tokio::test]
async fn test_exactly_one_frame_then_silence() {
    let wire = encode_frame(RPC_ADDRESS, b"hello").await;
    let mut decoder = Decoder::new(tokio::io::empty());
    let mut frames = 0;
    for &byte in &wire {
        if decoder.process(byte).expect("process").is_some() {
            frames += 1;
        }
    }
    assert_eq!(frames, 1);

    // Further flags produce nothing until real content arrives.
    for _ in 0..8 {
        assert!(decoder.process(FLAG).expect("process").is_none());
    }
}

#[tokio::test]
async fn test_back_to_back_frames() {
    let mut wire = Vec::new();
    for i in 0..4u8 {
        wire.extend(encode_frame(RPC_ADDRESS, &[i; 5]).await);
    }
    let (frames, errors) = process_all(&wire);
    assert!(errors.is_empty());
    assert_eq!(frames.len(), 4);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.payload(), [i as u8; 5]);
    }
}

#[tokio::test]
async fn test_single_bit_flips_are_detected_and_recovered_from() {
    let frame = encode_frame(RPC_ADDRESS, &[1, 2, 3]).await;
    let follow_up = encode_frame(RPC_ADDRESS, b"ok").await;

    // Flip every bit of every byte between the delimiting flags.
    for index in 1..frame.len() - 1 {
        for bit in 0..8 {
            let mut wire = frame.clone();
            wire[index] ^= 1 << bit;
            wire.extend_from_slice(&follow_up);

            let (frames, errors) = process_all(&wire);
            assert!(
                !errors.is_empty(),
                "corruption at byte {index} bit {bit} went undetected"
            );
            assert_eq!(frames.len(), 1, "byte {index} bit {bit}");
            assert_eq!(frames[0].payload(), b"ok", "byte {index} bit {bit}");
        }
    }
}

#[tokio::test]
async fn test_short_frame_is_data_loss() {
    // Three content bytes is below the one-address + control + FCS minimum.
    let wire = [FLAG, 0xa5, 0x03, 0x01, FLAG];
    let (frames, errors) = process_all(&wire);
    assert!(frames.is_empty());
    assert_eq!(errors, [DecodeError::DataLoss]);
}

#[tokio::test]
async fn test_interframe_garbage_is_reported_once() {
    let mut wire = vec![0xaa, 0xbb, 0xcc];
    wire.extend(encode_frame(RPC_ADDRESS, b"after").await);

    let (frames, errors) = process_all(&wire);
    assert_eq!(errors, [DecodeError::DataLoss]);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload(), b"after");
}

#[tokio::test]
async fn test_repeated_flags_are_legal() {
    let mut wire = vec![FLAG, FLAG, FLAG];
    wire.extend(encode_frame(RPC_ADDRESS, b"x").await);
    wire.push(FLAG);

    let (frames, errors) = process_all(&wire);
    assert!(errors.is_empty());
    assert_eq!(frames.len(), 1);
}

#[tokio::test]
async fn test_escaped_flag_is_data_loss() {
    let wire = [FLAG, 0xa5, 0x03, 0x7d, FLAG];
    let (frames, errors) = process_all(&wire);
    assert!(frames.is_empty());
    assert_eq!(errors, [DecodeError::DataLoss]);
}

#[tokio::test]
async fn test_escape_of_escape_abandons_frame() {
    let mut wire = vec![FLAG, 0xa5, 0x03, 0x7d, 0x7d, 0x01, FLAG];
    wire.extend(encode_frame(RPC_ADDRESS, b"next").await);

    let (frames, errors) = process_all(&wire);
    assert_eq!(errors, [DecodeError::DataLoss]);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload(), b"next");
}

#[tokio::test]
async fn test_oversized_frame_is_resource_exhausted() {
    let payload = vec![0u8; MAX_FRAME_SIZE];
    let wire = encode_frame(RPC_ADDRESS, &payload).await;

    let (frames, errors) = process_all(&wire);
    assert!(frames.is_empty());
    assert_eq!(errors, [DecodeError::ResourceExhausted]);
}

#[tokio::test]
async fn test_blocking_decode_reports_eof_as_data_loss() {
    let mut decoder = Decoder::new(tokio::io::empty());
    assert_eq!(decoder.decode().await, Err(DecodeError::DataLoss));
}

#[tokio::test]
async fn test_blocking_decode_across_split_reads() {
    let wire = encode_frame(RPC_ADDRESS, b"stream me").await;
    let (client, mut server) = tokio::io::duplex(8);
    let writer = tokio::spawn(async move {
        use tokio::io::AsyncWriteExt;
        for chunk in wire.chunks(3) {
            server.write_all(chunk).await.expect("write chunk");
        }
    });

    let mut decoder = Decoder::new(client);
    let frame = decoder.decode().await.expect("decode across reads");
    assert_eq!(frame.payload(), b"stream me");
    writer.await.expect("writer task");
}
