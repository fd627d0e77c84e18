//! Shared helpers: an in-memory client/server pair and raw frame tools.

use bytes::{Bytes, BytesMut};
use h2_mux::settings::MAX_MAX_FRAME_SIZE;
use h2_mux::{Config, Connection, Event, Frame, H2Codec, H2Header, CONNECTION_PREFACE};

pub struct Pair {
    pub client: Connection,
    pub server: Connection,
}

impl Pair {
    pub fn new() -> Self {
        Self::with(Config::default(), Config::default())
    }

    /// A pair that has finished the SETTINGS exchange, with events drained.
    pub fn with(client: Config, server: Config) -> Self {
        let mut pair = Self {
            client: Connection::client(client).unwrap(),
            server: Connection::server(server).unwrap(),
        };
        pair.run();
        pair.client_events();
        pair.server_events();
        pair
    }

    /// Move bytes both ways until neither side has anything to send.
    pub fn run(&mut self) {
        while self.client.has_pending_send() || self.server.has_pending_send() {
            let bytes = self.client.take_pending_send();
            let _ = self.server.recv(&bytes);
            let bytes = self.server.take_pending_send();
            let _ = self.client.recv(&bytes);
        }
    }

    pub fn client_events(&mut self) -> Vec<Event> {
        drain(&mut self.client)
    }

    pub fn server_events(&mut self) -> Vec<Event> {
        drain(&mut self.server)
    }
}

pub fn drain(conn: &mut Connection) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = conn.poll_event() {
        events.push(event);
    }
    events
}

pub fn request() -> Vec<H2Header> {
    vec![
        H2Header::new(":method", "GET"),
        H2Header::new(":scheme", "https"),
        H2Header::new(":path", "/"),
        H2Header::new(":authority", "example.com"),
    ]
}

pub fn response() -> Vec<H2Header> {
    vec![
        H2Header::new(":status", "200"),
        H2Header::new("content-type", "text/plain"),
    ]
}

/// Parse everything a connection queued, skipping a leading client preface.
pub fn frames(bytes: &[u8]) -> Vec<Frame> {
    let bytes = bytes.strip_prefix(CONNECTION_PREFACE).unwrap_or(bytes);
    let mut codec = H2Codec::new();
    codec.set_max_frame_size(MAX_MAX_FRAME_SIZE);
    codec.process(bytes).unwrap()
}

pub fn encode(frames: &[Frame]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    for frame in frames {
        frame.encode(&mut buf);
    }
    buf.to_vec()
}

/// Client preface followed by an empty SETTINGS frame.
pub fn client_preface() -> Vec<u8> {
    let mut bytes = CONNECTION_PREFACE.to_vec();
    bytes.extend(encode(&[Frame::Settings {
        ack: false,
        settings: vec![],
    }]));
    bytes
}

/// HEADERS with a fixed `GET /` block.
pub fn raw_headers(stream_id: u32, end_stream: bool) -> Frame {
    Frame::Headers {
        stream_id,
        priority: None,
        header_block: Bytes::from_static(&[0x82, 0x86, 0x84]),
        end_stream,
        end_headers: true,
    }
}

/// The GOAWAY a connection queued, as `(last_stream_id, error_code)`.
pub fn sent_go_away(bytes: &[u8]) -> Option<(u32, h2_mux::ErrorCode)> {
    frames(bytes).into_iter().find_map(|frame| match frame {
        Frame::GoAway {
            last_stream_id,
            error_code,
            ..
        } => Some((last_stream_id, error_code)),
        _ => None,
    })
}
