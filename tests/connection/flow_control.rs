//! Flow control across a connected pair

use bytes::Bytes;
use h2_mux::{Config, Connection, ErrorCode, Event, Frame, Setting, StreamState, UserError};

use crate::support::{client_preface, encode, frames, raw_headers, request, response, Pair};

fn received_bytes(events: &[Event]) -> usize {
    events
        .iter()
        .map(|e| match e {
            Event::Data { data, .. } => data.len(),
            _ => 0,
        })
        .sum()
}

#[test]
fn test_send_blocks_and_resumes_after_release() {
    let mut pair = Pair::new();
    let id = pair.client.open_stream(&request(), false).unwrap();
    let body = Bytes::from(vec![b'x'; 70_000]);

    assert_eq!(pair.client.send_data(id, body.clone(), true).unwrap(), 65_535);
    assert_eq!(pair.client.send_capacity(id), 0);
    assert_eq!(
        pair.client.send_data(id, body.slice(65_535..), true),
        Err(UserError::WouldBlock)
    );
    pair.run();

    let events = pair.server_events();
    assert_eq!(received_bytes(&events), 65_535);
    // split at the peer's max frame size
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, Event::Data { .. }))
            .count(),
        4
    );

    pair.server.release_capacity(id, 65_535).unwrap();
    pair.run();
    assert_eq!(
        pair.client_events(),
        vec![Event::WindowAvailable { stream_id: id }]
    );
    assert_eq!(
        pair.client.send_data(id, body.slice(65_535..), true).unwrap(),
        4_465
    );
    pair.run();
    let events = pair.server_events();
    assert_eq!(received_bytes(&events), 4_465);
    assert!(matches!(
        events.last(),
        Some(Event::Data {
            end_stream: true,
            ..
        })
    ));
}

#[test]
fn test_auto_release_keeps_data_flowing() {
    let mut pair = Pair::with(
        Config::default(),
        Config::default().auto_release_capacity(true),
    );
    let id = pair.client.open_stream(&request(), false).unwrap();
    let mut remaining = Bytes::from(vec![7u8; 300_000]);
    let mut received = 0;

    while !remaining.is_empty() {
        match pair.client.send_data(id, remaining.clone(), true) {
            Ok(n) => remaining = remaining.slice(n..),
            Err(UserError::WouldBlock) => {}
            Err(err) => panic!("unexpected error: {err}"),
        }
        pair.run();
        received += received_bytes(&pair.server_events());
    }
    assert_eq!(received, 300_000);
}

#[test]
fn test_connection_window_grown_after_preface() {
    let pair = Pair::with(
        Config::default(),
        Config::default().connection_window_size(1 << 20),
    );
    assert_eq!(pair.client.connection_send_window(), 1 << 20);
    assert_eq!(pair.server.connection_recv_window(), 1 << 20);
}

#[test]
fn test_release_more_than_received() {
    let mut pair = Pair::new();
    let id = pair.client.open_stream(&request(), false).unwrap();
    pair.client
        .send_data(id, Bytes::from_static(b"0123456789"), false)
        .unwrap();
    pair.run();
    assert_eq!(
        pair.server.release_capacity(id, 11),
        Err(UserError::ReleaseTooLarge(id))
    );
    pair.server.release_capacity(id, 10).unwrap();
}

#[test]
fn test_peer_overruns_stream_window() {
    let mut server = Connection::server(Config::default().initial_window_size(100)).unwrap();
    let mut input = client_preface();
    input.extend(encode(&[
        Frame::Settings {
            ack: true,
            settings: vec![],
        },
        raw_headers(1, false),
        Frame::Data {
            stream_id: 1,
            data: Bytes::from(vec![0; 101]),
            end_stream: false,
            pad_len: None,
        },
    ]));
    server.recv(&input).unwrap();

    assert!(frames(&server.take_pending_send()).contains(&Frame::RstStream {
        stream_id: 1,
        error_code: ErrorCode::FlowControlError,
    }));
    assert!(!server.is_closed());
}

#[test]
fn test_peer_overruns_connection_window() {
    let mut server = Connection::server(Config::default()).unwrap();
    let mut input = client_preface();
    input.extend(encode(&[
        // the connection window is debited before the stream window
        Frame::Settings {
            ack: true,
            settings: vec![],
        },
        raw_headers(1, false),
    ]));
    for _ in 0..4 {
        input.extend(encode(&[Frame::Data {
            stream_id: 1,
            data: Bytes::from(vec![0; 16_384]),
            end_stream: false,
            pad_len: None,
        }]));
    }
    let err = server.recv(&input).unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(err.code(), ErrorCode::FlowControlError);
}

#[test]
fn test_window_update_overflow() {
    let mut client = Connection::client(Config::default()).unwrap();
    let id = client.open_stream(&request(), false).unwrap();
    let mut input = encode(&[
        Frame::Settings {
            ack: false,
            settings: vec![],
        },
        Frame::WindowUpdate {
            stream_id: id,
            increment: 0x7fff_ffff,
        },
    ]);
    client.recv(&input).unwrap();
    client.take_pending_send();
    assert_eq!(client.stream_state(id), h2_mux::StreamState::Closed);

    // connection level overflow is fatal
    input = encode(&[Frame::WindowUpdate {
        stream_id: 0,
        increment: 0x7fff_ffff,
    }]);
    let err = client.recv(&input).unwrap_err();
    assert_eq!(err.code(), ErrorCode::FlowControlError);
    assert!(client.is_closed());
}

#[test]
fn test_initial_window_change_overflowing_a_stream() {
    let mut client = Connection::client(Config::default()).unwrap();
    let id = client.open_stream(&request(), false).unwrap();
    let input = encode(&[
        Frame::Settings {
            ack: false,
            settings: vec![],
        },
        Frame::WindowUpdate {
            stream_id: id,
            increment: 0x7fff_ffff - 65_535,
        },
        Frame::Settings {
            ack: false,
            settings: vec![Setting::InitialWindowSize(65_536)],
        },
    ]);
    let err = client.recv(&input).unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(err.code(), ErrorCode::FlowControlError);
    // nothing was applied
    assert_eq!(client.remote_settings().initial_window_size, 65_535);
}

#[test]
fn test_release_after_stream_finished() {
    let mut pair = Pair::new();
    let id = pair.client.open_stream(&request(), true).unwrap();
    pair.run();
    pair.server.send_headers(id, &response(), false).unwrap();
    pair.server
        .send_data(id, Bytes::from(vec![0; 30_000]), true)
        .unwrap();
    pair.run();
    assert_eq!(received_bytes(&pair.client_events()), 30_000);
    assert_eq!(pair.client.stream_state(id), StreamState::Closed);
    assert_eq!(pair.client.connection_recv_window(), 35_535);

    // the finished stream still holds what the application has not released
    pair.client.release_capacity(id, 100).unwrap();
    assert_eq!(
        pair.client.release_capacity(id, u32::MAX as usize),
        Err(UserError::ReleaseTooLarge(id))
    );
    pair.client.release_capacity(id, 29_900).unwrap();
    assert_eq!(
        pair.client.release_capacity(id, 1),
        Err(UserError::ReleaseTooLarge(id))
    );
    assert_eq!(
        pair.client.release_capacity(999, 100),
        Err(UserError::UnknownStream(999))
    );
    assert_eq!(pair.client.connection_recv_window(), 35_535);

    // the next release crosses the batching threshold
    let next = pair.client.open_stream(&request(), true).unwrap();
    pair.run();
    pair.server.send_headers(next, &response(), false).unwrap();
    pair.server
        .send_data(next, Bytes::from(vec![0; 3_000]), true)
        .unwrap();
    pair.run();
    pair.client_events();
    pair.client.release_capacity(next, 3_000).unwrap();
    assert_eq!(pair.client.connection_recv_window(), 65_535);
}
