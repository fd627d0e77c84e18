//! Tests for HTTP/2 frame encoding

use bytes::{Bytes, BytesMut};
use h2_mux::frame::{encode_headers, encode_push_promise};
use h2_mux::{flags, frame_type, ErrorCode, Frame, FrameHeader, H2Codec, Priority, FRAME_HEADER_LEN};

fn encode(frame: &Frame) -> BytesMut {
    let mut buf = BytesMut::new();
    frame.encode(&mut buf);
    buf
}

#[test]
fn test_build_data_frame() {
    let buf = encode(&Frame::Data {
        stream_id: 1,
        data: Bytes::from_static(b"hello"),
        end_stream: true,
        pad_len: None,
    });
    assert_eq!(&buf[..], &[0, 0, 5, 0, 1, 0, 0, 0, 1, b'h', b'e', b'l', b'l', b'o']);
}

#[test]
fn test_build_padded_data_frame() {
    let buf = encode(&Frame::Data {
        stream_id: 3,
        data: Bytes::from_static(b"hi"),
        end_stream: false,
        pad_len: Some(3),
    });
    let header = FrameHeader::parse(&buf).unwrap();
    assert_eq!(header.length, 6);
    assert!(header.has_flag(flags::PADDED));
    assert_eq!(&buf[FRAME_HEADER_LEN..], &[3, b'h', b'i', 0, 0, 0]);
}

#[test]
fn test_build_rst_stream_frame() {
    let buf = encode(&Frame::RstStream {
        stream_id: 5,
        error_code: ErrorCode::Cancel,
    });
    assert_eq!(&buf[..], &[0, 0, 4, 3, 0, 0, 0, 0, 5, 0, 0, 0, 8]);
}

#[test]
fn test_build_window_update_frame() {
    let buf = encode(&Frame::WindowUpdate {
        stream_id: 0,
        increment: 65_535,
    });
    assert_eq!(&buf[..], &[0, 0, 4, 8, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff]);
}

#[test]
fn test_build_goaway_frame() {
    let buf = encode(&Frame::GoAway {
        last_stream_id: 9,
        error_code: ErrorCode::ProtocolError,
        debug_data: Bytes::from_static(b"bad"),
    });
    assert_eq!(
        &buf[..],
        &[0, 0, 11, 7, 0, 0, 0, 0, 0, 0, 0, 0, 9, 0, 0, 0, 1, b'b', b'a', b'd']
    );
}

#[test]
fn test_build_priority_frame() {
    let buf = encode(&Frame::Priority {
        stream_id: 7,
        priority: Priority {
            dependency: 3,
            exclusive: false,
            weight: 16,
        },
    });
    assert_eq!(&buf[..], &[0, 0, 5, 2, 0, 0, 0, 0, 7, 0, 0, 0, 3, 15]);
}

#[test]
fn test_encoded_frames_parse_back() {
    let frames = vec![
        Frame::Ping {
            ack: false,
            payload: [1, 2, 3, 4, 5, 6, 7, 8],
        },
        Frame::Headers {
            stream_id: 1,
            priority: Some(Priority::default()),
            header_block: Bytes::from_static(&[0x82, 0x84]),
            end_stream: true,
            end_headers: true,
        },
        Frame::PushPromise {
            stream_id: 1,
            promised_id: 2,
            header_block: Bytes::from_static(&[0x82]),
            end_headers: true,
        },
    ];
    let mut buf = BytesMut::new();
    for frame in &frames {
        frame.encode(&mut buf);
    }
    let mut codec = H2Codec::new();
    assert_eq!(codec.process(&buf).unwrap(), frames);
}

#[test]
fn test_large_header_block_is_split_into_continuations() {
    let block = Bytes::from(vec![0x82; 40_000]);
    let mut buf = BytesMut::new();
    encode_headers(&mut buf, 1, None, block.clone(), true, 16_384);

    let first = FrameHeader::parse(&buf).unwrap();
    assert_eq!(first.frame_type, frame_type::HEADERS);
    assert_eq!(first.length, 16_384);
    assert!(!first.is_end_headers());
    assert!(first.is_end_stream());

    let second = FrameHeader::parse(&buf[first.total_size()..]).unwrap();
    assert_eq!(second.frame_type, frame_type::CONTINUATION);
    assert!(!second.is_end_headers());

    let third = FrameHeader::parse(&buf[first.total_size() + second.total_size()..]).unwrap();
    assert_eq!(third.frame_type, frame_type::CONTINUATION);
    assert_eq!(third.length as usize, 40_000 - 2 * 16_384);
    assert!(third.is_end_headers());

    let mut codec = H2Codec::new();
    assert_eq!(
        codec.process(&buf).unwrap(),
        vec![Frame::Headers {
            stream_id: 1,
            priority: None,
            header_block: block,
            end_stream: true,
            end_headers: true,
        }]
    );
}

#[test]
fn test_small_header_block_is_one_frame() {
    let mut buf = BytesMut::new();
    encode_headers(&mut buf, 3, None, Bytes::from_static(&[0x88]), false, 16_384);
    assert_eq!(&buf[..], &[0, 0, 1, 1, 4, 0, 0, 0, 3, 0x88]);
}

#[test]
fn test_push_promise_split() {
    let block = Bytes::from(vec![0x84; 20_000]);
    let mut buf = BytesMut::new();
    encode_push_promise(&mut buf, 1, 2, block.clone(), 16_384);

    let first = FrameHeader::parse(&buf).unwrap();
    assert_eq!(first.frame_type, frame_type::PUSH_PROMISE);
    assert_eq!(first.length, 16_384);

    let mut codec = H2Codec::new();
    assert_eq!(
        codec.process(&buf).unwrap(),
        vec![Frame::PushPromise {
            stream_id: 1,
            promised_id: 2,
            header_block: block,
            end_headers: true,
        }]
    );
}
