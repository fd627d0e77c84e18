//! h2-mux: a sans-I/O HTTP/2 connection and stream-multiplexing engine
//!
//! This crate turns a byte stream into multiplexed HTTP/2 streams. It owns
//! the protocol: framing, HPACK, flow control, the stream state machine and
//! connection management. It never touches a socket; you feed it bytes and
//! write out what it queues.
//!
//! # Features
//!
//! - **Sans-I/O Design**: No async runtime, no threads, explicit timers
//! - **RFC 7540 Framing**: All ten frame types, padding, CONTINUATION assembly
//! - **RFC 7541 HPACK**: Static and dynamic tables, Huffman coding, atomic
//!   block decoding
//! - **Flow Control**: Connection and stream windows, backpressure, batched
//!   WINDOW_UPDATE
//! - **Stream Lifecycle**: Total state machine, concurrency limits, id rules
//! - **Connection Management**: SETTINGS negotiation, PING, keepalive,
//!   graceful GOAWAY, h2c upgrade
//!
//! # Quick Start
//!
//! ```rust
//! use h2_mux::{Config, Connection, Event, H2Header};
//!
//! let mut client = Connection::client(Config::default()).unwrap();
//! let mut server = Connection::server(Config::default()).unwrap();
//!
//! let request = [
//!     H2Header::new(":method", "GET"),
//!     H2Header::new(":scheme", "https"),
//!     H2Header::new(":path", "/"),
//!     H2Header::new(":authority", "example.com"),
//! ];
//! let stream_id = client.open_stream(&request, true).unwrap();
//!
//! // Shuttle bytes in both directions until both sides are quiet
//! while client.has_pending_send() || server.has_pending_send() {
//!     let bytes = client.take_pending_send();
//!     server.recv(&bytes).unwrap();
//!     let bytes = server.take_pending_send();
//!     client.recv(&bytes).unwrap();
//! }
//!
//! while let Some(event) = server.poll_event() {
//!     if let Event::Headers { stream_id: id, headers, end_stream } = event {
//!         assert_eq!(id, stream_id);
//!         assert_eq!(headers, request);
//!         assert!(end_stream);
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! Inbound bytes pass through [`H2Codec`] (frames), [`hpack::Decoder`]
//! (header blocks), [`flow::FlowController`] (windows) and [`streams::Streams`]
//! (stream registry) inside [`Connection`], which answers faults with
//! RST_STREAM or GOAWAY and reports everything else as [`Event`]s.
//!
//! It does NOT provide:
//! - TCP or TLS (you provide the bytes, [`transport::pump`] helps)
//! - HTTP semantics beyond framing (pseudo-headers are passed through)
//! - Priority scheduling (PRIORITY is recorded, not acted on)

pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod flow;
pub mod frame;
pub mod h2_codec;
pub mod hpack;
pub mod settings;
pub mod stream;
pub mod streams;
pub mod transport;

pub use command::{Command, CommandOutcome, CommandQueue, CommandSender};
pub use config::Config;
pub use connection::Connection;
pub use error::{ErrorCode, H2Error, HpackError, UserError};
pub use event::Event;
pub use frame::{
    flags, frame_type, is_h2c_preface, Frame, FrameHeader, Priority, CONNECTION_PREFACE,
    FRAME_HEADER_LEN,
};
pub use h2_codec::{H2Codec, MAX_HEADER_BLOCK_SIZE};
pub use hpack::H2Header;
pub use settings::{Setting, Settings};
pub use stream::StreamState;
pub use streams::Role;
pub use transport::Pump;
