//! Events delivered to the application.

use std::time::Duration;

use bytes::Bytes;

use crate::error::ErrorCode;
use crate::hpack::H2Header;
use crate::settings::Settings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A decoded header list: request, response, informational or trailers.
    Headers {
        stream_id: u32,
        headers: Vec<H2Header>,
        end_stream: bool,
    },
    /// A chunk of body data, padding removed. Its length counts as
    /// unreleased capacity until released.
    Data {
        stream_id: u32,
        data: Bytes,
        end_stream: bool,
    },
    /// The peer reserved `promised_id` for a pushed response to `headers`.
    PushPromise {
        stream_id: u32,
        promised_id: u32,
        headers: Vec<H2Header>,
    },
    /// The stream closed abnormally. `remote` is true when the peer reset it,
    /// false when this side did because of a protocol fault or a connection
    /// error.
    StreamReset {
        stream_id: u32,
        error_code: ErrorCode,
        remote: bool,
    },
    /// The peer acknowledged our SETTINGS; they are now in force.
    SettingsAcked,
    /// The peer's SETTINGS after applying a frame from it.
    RemoteSettings(Settings),
    /// Reply to a PING we sent.
    PingAck {
        payload: [u8; 8],
        rtt: Duration,
    },
    /// The peer sent GOAWAY.
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: Bytes,
    },
    /// A stream that hit flow control can send again.
    WindowAvailable { stream_id: u32 },
    /// The connection is finished; no more events follow.
    ConnectionClosed {
        error_code: ErrorCode,
        reason: String,
        remote: bool,
    },
}
