//! Error types for the HTTP/2 engine.
//!
//! Protocol faults are split by severity before anything is applied:
//! [`H2Error::Stream`] resets one stream, [`H2Error::Connection`] tears the
//! whole connection down with GOAWAY. Local API misuse is reported through
//! [`UserError`] and never produces frames.

use std::fmt;

use thiserror::Error;

use crate::stream::StreamState;

/// HTTP/2 error codes (RFC 7540 Section 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// Graceful shutdown or no error.
    NoError = 0x0,
    /// Protocol error detected.
    ProtocolError = 0x1,
    /// Implementation fault.
    InternalError = 0x2,
    /// Flow-control limits exceeded.
    FlowControlError = 0x3,
    /// SETTINGS not acknowledged in time.
    SettingsTimeout = 0x4,
    /// Frame received for a closed stream.
    StreamClosed = 0x5,
    /// Frame size incorrect.
    FrameSizeError = 0x6,
    /// Stream not processed.
    RefusedStream = 0x7,
    /// Stream cancelled.
    Cancel = 0x8,
    /// Compression state not updated.
    CompressionError = 0x9,
    /// TCP connection error for CONNECT method.
    ConnectError = 0xa,
    /// Processing capacity exceeded.
    EnhanceYourCalm = 0xb,
    /// Negotiated TLS parameters not acceptable.
    InadequateSecurity = 0xc,
    /// Use HTTP/1.1 for the request.
    Http11Required = 0xd,
}

impl ErrorCode {
    /// Map a wire value to an error code. Unknown codes are treated as
    /// `INTERNAL_ERROR` (RFC 7540 Section 7).
    pub fn from_u32(value: u32) -> Self {
        match value {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            0xd => Self::Http11Required,
            _ => Self::InternalError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoError => "NO_ERROR",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::FlowControlError => "FLOW_CONTROL_ERROR",
            Self::SettingsTimeout => "SETTINGS_TIMEOUT",
            Self::StreamClosed => "STREAM_CLOSED",
            Self::FrameSizeError => "FRAME_SIZE_ERROR",
            Self::RefusedStream => "REFUSED_STREAM",
            Self::Cancel => "CANCEL",
            Self::CompressionError => "COMPRESSION_ERROR",
            Self::ConnectError => "CONNECT_ERROR",
            Self::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            Self::InadequateSecurity => "INADEQUATE_SECURITY",
            Self::Http11Required => "HTTP_1_1_REQUIRED",
        }
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> u32 {
        code as u32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol fault, already classified by scope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum H2Error {
    /// Fatal to the connection: answered with GOAWAY and close.
    #[error("connection error {code}: {reason}")]
    Connection { code: ErrorCode, reason: String },
    /// Scoped to one stream: answered with RST_STREAM.
    #[error("stream {stream_id} error {code}: {reason}")]
    Stream {
        stream_id: u32,
        code: ErrorCode,
        reason: String,
    },
}

impl H2Error {
    pub fn connection(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::Connection {
            code,
            reason: reason.into(),
        }
    }

    pub fn stream(stream_id: u32, code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::Stream {
            stream_id,
            code,
            reason: reason.into(),
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::connection(ErrorCode::ProtocolError, reason)
    }

    pub fn frame_size(reason: impl Into<String>) -> Self {
        Self::connection(ErrorCode::FrameSizeError, reason)
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Connection { code, .. } | Self::Stream { code, .. } => *code,
        }
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Connection { reason, .. } | Self::Stream { reason, .. } => reason,
        }
    }
}

/// Failures while decoding or encoding an HPACK header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HpackError {
    #[error("integer overflows the decoder's range")]
    IntegerOverflow,
    #[error("header block ended in the middle of a representation")]
    Truncated,
    #[error("index 0 is not a valid table index")]
    ZeroIndex,
    #[error("index {0} is outside the static and dynamic tables")]
    InvalidIndex(usize),
    #[error("huffman string contains the EOS symbol")]
    HuffmanEos,
    #[error("huffman padding is longer than 7 bits")]
    HuffmanPaddingTooLong,
    #[error("huffman padding is not a prefix of EOS")]
    HuffmanInvalidPadding,
    #[error("huffman code is not in the code table")]
    HuffmanInvalidCode,
    #[error("dynamic table size update after the first header field")]
    LateSizeUpdate,
    #[error("dynamic table size update to {requested} exceeds the limit of {limit}")]
    SizeUpdateTooLarge { requested: usize, limit: usize },
    #[error("header block must begin with a dynamic table size update")]
    MissingSizeUpdate,
    #[error("decoded header list exceeds {limit} bytes")]
    HeaderListTooLarge { limit: usize },
}

impl HpackError {
    /// Scope the failure for the stream whose header block was being decoded.
    ///
    /// An oversized header list only refuses the stream because the block was
    /// still decoded to the end; every other failure leaves the dynamic table
    /// unusable and is fatal.
    pub fn into_h2(self, stream_id: u32) -> H2Error {
        match self {
            Self::HeaderListTooLarge { .. } => {
                H2Error::stream(stream_id, ErrorCode::RefusedStream, self.to_string())
            }
            _ => H2Error::connection(ErrorCode::CompressionError, self.to_string()),
        }
    }
}

/// Local misuse of the connection API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserError {
    #[error("connection is closed")]
    ConnectionClosed,
    #[error("connection is going away")]
    GoingAway,
    #[error("stream ids are exhausted")]
    StreamIdsExhausted,
    #[error("peer's concurrent stream limit reached")]
    ConcurrencyLimit,
    #[error("stream {0} is not active")]
    UnknownStream(u32),
    #[error("stream {stream_id} cannot send {frame} while {state:?}")]
    InvalidState {
        stream_id: u32,
        frame: &'static str,
        state: StreamState,
    },
    #[error("flow-control window exhausted")]
    WouldBlock,
    #[error("GOAWAY last stream id cannot increase from {previous} to {requested}")]
    GoAwayRaised { previous: u32, requested: u32 },
    #[error("server push is not allowed on this connection")]
    PushNotAllowed,
    #[error("stream {0} cannot depend on itself")]
    SelfDependency(u32),
    #[error("invalid setting: {0}")]
    InvalidSetting(&'static str),
    #[error("released more capacity than was received on stream {0}")]
    ReleaseTooLarge(u32),
    #[error("invalid HTTP2-Settings: {0}")]
    InvalidUpgrade(H2Error),
}
