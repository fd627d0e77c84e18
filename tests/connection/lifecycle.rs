//! Stream lifecycle over a connected pair

use bytes::Bytes;
use h2_mux::{Config, Connection, ErrorCode, Event, Frame, H2Header, StreamState, UserError};

use crate::support::{client_preface, drain, encode, frames, raw_headers, request, response, Pair};

#[test]
fn test_request_with_body_and_trailers() {
    let mut pair = Pair::new();
    let id = pair.client.open_stream(&request(), false).unwrap();
    assert_eq!(
        pair.client
            .send_data(id, Bytes::from_static(b"body"), false)
            .unwrap(),
        4
    );
    let trailers = vec![H2Header::new("grpc-status", "0")];
    pair.client.send_headers(id, &trailers, true).unwrap();
    assert_eq!(pair.client.stream_state(id), StreamState::HalfClosedLocal);
    pair.run();

    assert_eq!(
        pair.server_events(),
        vec![
            Event::Headers {
                stream_id: id,
                headers: request(),
                end_stream: false,
            },
            Event::Data {
                stream_id: id,
                data: Bytes::from_static(b"body"),
                end_stream: false,
            },
            Event::Headers {
                stream_id: id,
                headers: trailers,
                end_stream: true,
            },
        ]
    );
    assert_eq!(pair.server.stream_state(id), StreamState::HalfClosedRemote);
}

#[test]
fn test_stream_ids_increase() {
    let mut pair = Pair::new();
    let ids: Vec<u32> = (0..3)
        .map(|_| pair.client.open_stream(&request(), true).unwrap())
        .collect();
    assert_eq!(ids, vec![1, 3, 5]);
    pair.run();
    let opened: Vec<u32> = pair
        .server_events()
        .into_iter()
        .filter_map(|e| match e {
            Event::Headers { stream_id, .. } => Some(stream_id),
            _ => None,
        })
        .collect();
    assert_eq!(opened, ids);
    assert_eq!(pair.server.last_processed_id(), 5);
}

#[test]
fn test_client_reset() {
    let mut pair = Pair::new();
    let id = pair.client.open_stream(&request(), false).unwrap();
    pair.run();
    pair.server_events();

    pair.client.reset_stream(id, ErrorCode::Cancel).unwrap();
    assert_eq!(pair.client.stream_state(id), StreamState::Closed);
    assert_eq!(
        pair.client.send_data(id, Bytes::from_static(b"late"), false),
        Err(UserError::UnknownStream(id))
    );
    pair.run();

    assert_eq!(
        pair.server_events(),
        vec![Event::StreamReset {
            stream_id: id,
            error_code: ErrorCode::Cancel,
            remote: true,
        }]
    );
    assert_eq!(pair.server.active_streams(), 0);
}

#[test]
fn test_late_frames_on_reset_stream_are_ignored() {
    let mut pair = Pair::new();
    let id = pair.client.open_stream(&request(), true).unwrap();
    pair.run();
    pair.client_events();

    // the response crosses our RST_STREAM on the wire
    pair.server.send_headers(id, &response(), false).unwrap();
    pair.server
        .send_data(id, Bytes::from_static(b"in flight"), true)
        .unwrap();
    pair.client.reset_stream(id, ErrorCode::Cancel).unwrap();
    let to_client = pair.server.take_pending_send();
    pair.client.recv(&to_client).unwrap();

    assert!(pair.client_events().is_empty());
    assert!(!pair.client.is_closed());
    // no connection error
    assert!(frames(&pair.client.take_pending_send())
        .iter()
        .all(|f| !matches!(f, Frame::GoAway { .. })));
}

#[test]
fn test_invalid_local_sends() {
    let mut pair = Pair::new();
    let id = pair.client.open_stream(&request(), true).unwrap();
    assert!(matches!(
        pair.client.send_data(id, Bytes::from_static(b"x"), false),
        Err(UserError::InvalidState {
            frame: "DATA",
            state: StreamState::HalfClosedLocal,
            ..
        })
    ));
    assert_eq!(
        pair.client.send_headers(99, &request(), true),
        Err(UserError::UnknownStream(99))
    );
}

#[test]
fn test_client_respects_peer_concurrency_limit() {
    let mut pair = Pair::with(Config::default(), Config::default().max_concurrent_streams(1));
    pair.client.open_stream(&request(), false).unwrap();
    assert_eq!(
        pair.client.open_stream(&request(), false),
        Err(UserError::ConcurrencyLimit)
    );
}

#[test]
fn test_server_refuses_streams_over_limit() {
    let mut server = Connection::server(Config::default().max_concurrent_streams(1)).unwrap();
    let mut input = client_preface();
    input.extend(encode(&[Frame::Settings {
        ack: true,
        settings: vec![],
    }]));
    input.extend(encode(&[raw_headers(1, false), raw_headers(3, false)]));
    server.recv(&input).unwrap();

    let sent = frames(&server.take_pending_send());
    assert!(sent.contains(&Frame::RstStream {
        stream_id: 3,
        error_code: ErrorCode::RefusedStream,
    }));
    assert_eq!(server.stream_state(1), StreamState::Open);
    assert_eq!(server.stream_state(3), StreamState::Closed);
}

#[test]
fn test_stream_id_going_backwards() {
    let mut server = Connection::server(Config::default()).unwrap();
    let mut input = client_preface();
    input.extend(encode(&[raw_headers(5, true), raw_headers(3, true)]));
    let err = server.recv(&input).unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(err.code(), ErrorCode::ProtocolError);
}

#[test]
fn test_server_push() {
    let mut pair = Pair::new();
    let id = pair.client.open_stream(&request(), true).unwrap();
    pair.run();
    pair.server_events();

    let pushed_request = vec![
        H2Header::new(":method", "GET"),
        H2Header::new(":path", "/style.css"),
    ];
    let promised = pair.server.push_promise(id, &pushed_request).unwrap();
    assert_eq!(promised, 2);
    assert_eq!(pair.server.stream_state(promised), StreamState::ReservedLocal);
    pair.server.send_headers(promised, &response(), true).unwrap();
    pair.server.send_headers(id, &response(), true).unwrap();
    pair.run();

    assert_eq!(
        pair.client_events(),
        vec![
            Event::PushPromise {
                stream_id: id,
                promised_id: promised,
                headers: pushed_request,
            },
            Event::Headers {
                stream_id: promised,
                headers: response(),
                end_stream: true,
            },
            Event::Headers {
                stream_id: id,
                headers: response(),
                end_stream: true,
            },
        ]
    );
    assert_eq!(pair.client.active_streams(), 0);
    assert_eq!(pair.server.active_streams(), 0);
}

#[test]
fn test_push_disabled_by_client() {
    let mut pair = Pair::with(Config::default().enable_push(false), Config::default());
    let id = pair.client.open_stream(&request(), true).unwrap();
    pair.run();
    assert_eq!(
        pair.server.push_promise(id, &request()),
        Err(UserError::PushNotAllowed)
    );
}

#[test]
fn test_client_cannot_push() {
    let mut pair = Pair::new();
    let id = pair.client.open_stream(&request(), false).unwrap();
    assert_eq!(
        pair.client.push_promise(id, &request()),
        Err(UserError::PushNotAllowed)
    );
}

#[test]
fn test_self_dependency() {
    let mut pair = Pair::new();
    let id = pair.client.open_stream(&request(), false).unwrap();
    let priority = h2_mux::Priority {
        dependency: id,
        exclusive: false,
        weight: 16,
    };
    assert_eq!(
        pair.client.set_priority(id, priority),
        Err(UserError::SelfDependency(id))
    );

    let mut server = Connection::server(Config::default()).unwrap();
    let mut input = client_preface();
    input.extend(encode(&[
        raw_headers(1, false),
        Frame::Priority {
            stream_id: 1,
            priority: h2_mux::Priority {
                dependency: 1,
                exclusive: false,
                weight: 16,
            },
        },
    ]));
    server.recv(&input).unwrap();
    assert!(frames(&server.take_pending_send()).contains(&Frame::RstStream {
        stream_id: 1,
        error_code: ErrorCode::ProtocolError,
    }));
}

#[test]
fn test_self_dependent_headers_leave_no_stream() {
    let mut server = Connection::server(Config::default()).unwrap();
    server.take_pending_send();
    let mut input = client_preface();
    input.extend(encode(&[Frame::Headers {
        stream_id: 1,
        priority: Some(h2_mux::Priority {
            dependency: 1,
            exclusive: false,
            weight: 16,
        }),
        header_block: Bytes::from_static(&[0x82, 0x86, 0x84]),
        end_stream: false,
        end_headers: true,
    }]));
    server.recv(&input).unwrap();

    assert!(frames(&server.take_pending_send()).contains(&Frame::RstStream {
        stream_id: 1,
        error_code: ErrorCode::ProtocolError,
    }));
    let events = drain(&mut server);
    assert!(events.iter().all(|e| !matches!(e, Event::Headers { .. })));
    assert_eq!(server.stream_state(1), StreamState::Closed);
    assert_eq!(server.active_streams(), 0);
    assert!(!server.is_closed());

    // the table stayed in step, so the next stream decodes
    server.recv(&encode(&[raw_headers(3, true)])).unwrap();
    assert!(drain(&mut server).iter().any(|e| matches!(
        e,
        Event::Headers {
            stream_id: 3,
            end_stream: true,
            ..
        }
    )));
}

#[test]
fn test_malformed_priority_on_idle_stream() {
    let mut server = Connection::server(Config::default()).unwrap();
    server.take_pending_send();
    let mut input = client_preface();
    // PRIORITY with a four byte payload
    input.extend([0, 0, 4, 0x2, 0, 0, 0, 0, 1, 0, 0, 0, 0]);

    let err = server.recv(&input).unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(err.code(), ErrorCode::FrameSizeError);
    let sent = frames(&server.take_pending_send());
    assert!(sent
        .iter()
        .all(|f| !matches!(f, Frame::RstStream { .. })));
    assert!(sent.iter().any(|f| matches!(
        f,
        Frame::GoAway {
            error_code: ErrorCode::FrameSizeError,
            ..
        }
    )));
}

#[test]
fn test_zero_window_update_on_idle_stream() {
    let mut server = Connection::server(Config::default()).unwrap();
    server.take_pending_send();
    let mut input = client_preface();
    input.extend([0, 0, 4, 0x8, 0, 0, 0, 0, 1, 0, 0, 0, 0]);

    let err = server.recv(&input).unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(err.code(), ErrorCode::ProtocolError);
    assert!(frames(&server.take_pending_send())
        .iter()
        .all(|f| !matches!(f, Frame::RstStream { .. })));
}

#[test]
fn test_priority_before_headers_opens_normally() {
    let mut server = Connection::server(Config::default()).unwrap();
    server.take_pending_send();
    let mut input = client_preface();
    input.extend(encode(&[
        Frame::Priority {
            stream_id: 1,
            priority: h2_mux::Priority {
                dependency: 0,
                exclusive: false,
                weight: 32,
            },
        },
        raw_headers(1, true),
    ]));
    server.recv(&input).unwrap();
    assert!(drain(&mut server).iter().any(|e| matches!(
        e,
        Event::Headers {
            stream_id: 1,
            end_stream: true,
            ..
        }
    )));
    assert_eq!(server.stream_state(1), StreamState::HalfClosedRemote);
}
