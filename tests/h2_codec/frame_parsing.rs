//! Tests for HTTP/2 frame parsing

use bytes::Bytes;
use h2_mux::{flags, frame_type, ErrorCode, Frame, FrameHeader, H2Codec, Priority, Setting};

#[test]
fn test_frame_header_headers() {
    // HEADERS frame, length 10, stream 3, END_HEADERS
    let header = FrameHeader::parse(&[0, 0, 10, 1, 4, 0, 0, 0, 3]).unwrap();

    assert_eq!(header.length, 10);
    assert_eq!(header.frame_type, frame_type::HEADERS);
    assert_eq!(header.stream_id, 3);
    assert!(!header.is_end_stream());
    assert!(header.is_end_headers());
    assert_eq!(header.total_size(), 19);
}

#[test]
fn test_padded_data_frame() {
    let mut codec = H2Codec::new();

    // DATA frame with PADDED flag: length 10, pad_length 4, data "hello"
    let mut frame = vec![0, 0, 10, 0, 0x9, 0, 0, 0, 1];
    frame.push(4);
    frame.extend_from_slice(b"hello");
    frame.extend_from_slice(&[0, 0, 0, 0]);

    let frames = codec.process(&frame).unwrap();
    assert_eq!(
        frames,
        vec![Frame::Data {
            stream_id: 1,
            data: Bytes::from_static(b"hello"),
            end_stream: true,
            pad_len: Some(4),
        }]
    );
    // padding and the pad length octet count against flow control
    assert_eq!(frames[0].flow_controlled_len(), 10);
}

#[test]
fn test_headers_with_priority_flag() {
    let mut codec = H2Codec::new();

    // HEADERS with PRIORITY | END_HEADERS, exclusive dependency on 3, weight 256
    let mut frame = vec![0, 0, 7, 1, 0x24, 0, 0, 0, 5];
    frame.extend_from_slice(&[0x80, 0, 0, 3]);
    frame.push(255);
    frame.extend_from_slice(&[0x82, 0x86]);

    let frames = codec.process(&frame).unwrap();
    match &frames[0] {
        Frame::Headers {
            priority,
            header_block,
            end_headers,
            ..
        } => {
            assert_eq!(
                *priority,
                Some(Priority {
                    dependency: 3,
                    exclusive: true,
                    weight: 256,
                })
            );
            assert_eq!(&header_block[..], &[0x82, 0x86]);
            assert!(*end_headers);
        }
        other => panic!("expected HEADERS, got {other:?}"),
    }
}

#[test]
fn test_settings_frame() {
    let mut codec = H2Codec::new();

    // SETTINGS: MAX_CONCURRENT_STREAMS=100, INITIAL_WINDOW_SIZE=1048576, unknown id 0x99
    let mut frame = vec![0, 0, 18, frame_type::SETTINGS, 0, 0, 0, 0, 0];
    frame.extend_from_slice(&[0, 3, 0, 0, 0, 100]);
    frame.extend_from_slice(&[0, 4, 0, 0x10, 0, 0]);
    frame.extend_from_slice(&[0, 0x99, 0, 0, 0, 1]);

    let frames = codec.process(&frame).unwrap();
    assert_eq!(
        frames,
        vec![Frame::Settings {
            ack: false,
            settings: vec![
                Setting::MaxConcurrentStreams(100),
                Setting::InitialWindowSize(1 << 20),
            ],
        }]
    );
}

#[test]
fn test_settings_ack() {
    let mut codec = H2Codec::new();
    let frames = codec
        .process(&[0, 0, 0, frame_type::SETTINGS, flags::ACK, 0, 0, 0, 0])
        .unwrap();
    assert_eq!(
        frames,
        vec![Frame::Settings {
            ack: true,
            settings: vec![],
        }]
    );
}

#[test]
fn test_goaway_with_debug_data() {
    let mut codec = H2Codec::new();
    let mut frame = vec![0, 0, 12, frame_type::GOAWAY, 0, 0, 0, 0, 0];
    frame.extend_from_slice(&[0, 0, 0, 7]);
    frame.extend_from_slice(&[0, 0, 0, 0xb]);
    frame.extend_from_slice(b"calm");

    let frames = codec.process(&frame).unwrap();
    assert_eq!(
        frames,
        vec![Frame::GoAway {
            last_stream_id: 7,
            error_code: ErrorCode::EnhanceYourCalm,
            debug_data: Bytes::from_static(b"calm"),
        }]
    );
}

#[test]
fn test_rst_stream_unknown_code_is_internal_error() {
    let mut codec = H2Codec::new();
    let frame = [0, 0, 4, frame_type::RST_STREAM, 0, 0, 0, 0, 1, 0, 0, 0, 0x42];
    assert_eq!(
        codec.process(&frame).unwrap(),
        vec![Frame::RstStream {
            stream_id: 1,
            error_code: ErrorCode::InternalError,
        }]
    );
}

#[test]
fn test_ping_and_window_update() {
    let mut codec = H2Codec::new();
    let mut bytes = vec![0, 0, 8, frame_type::PING, flags::ACK, 0, 0, 0, 0];
    bytes.extend_from_slice(b"abcdefgh");
    bytes.extend_from_slice(&[0, 0, 4, frame_type::WINDOW_UPDATE, 0, 0, 0, 0, 3, 0x80, 0, 0x10, 0]);

    let frames = codec.process(&bytes).unwrap();
    assert_eq!(
        frames,
        vec![
            Frame::Ping {
                ack: true,
                payload: *b"abcdefgh",
            },
            // reserved bit is ignored
            Frame::WindowUpdate {
                stream_id: 3,
                increment: 4096,
            },
        ]
    );
}

#[test]
fn test_unknown_frame_type_is_surfaced() {
    let mut codec = H2Codec::new();
    let frames = codec.process(&[0, 0, 2, 0xfa, 0, 0, 0, 0, 1, 1, 2]).unwrap();
    assert_eq!(
        frames,
        vec![Frame::Unknown {
            frame_type: 0xfa,
            stream_id: 1,
        }]
    );
}

#[test]
fn test_multiple_frames_in_one_read() {
    let mut codec = H2Codec::new();
    let mut bytes = vec![0, 0, 3, 0, 0, 0, 0, 0, 1];
    bytes.extend_from_slice(b"abc");
    bytes.extend_from_slice(&[0, 0, 3, 0, 1, 0, 0, 0, 3]);
    bytes.extend_from_slice(b"def");
    // trailing partial frame header
    bytes.extend_from_slice(&[0, 0, 8]);

    let frames = codec.process(&bytes).unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1].stream_id(), 3);
    assert_eq!(codec.buffered(), 3);
}
