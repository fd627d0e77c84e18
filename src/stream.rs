//! Per-stream state (RFC 7540 Section 5.1).
//!
//! [`transition`] is the whole stream state machine as a total function:
//! every `(state, frame kind, direction)` yields a next state, a stream
//! error or a connection error.

use tracing::debug;

use crate::error::ErrorCode;
use crate::flow::Window;
use crate::frame::Priority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    pub const ALL: [StreamState; 7] = [
        StreamState::Idle,
        StreamState::ReservedLocal,
        StreamState::ReservedRemote,
        StreamState::Open,
        StreamState::HalfClosedLocal,
        StreamState::HalfClosedRemote,
        StreamState::Closed,
    ];

    /// Position in the forward-only lifecycle order.
    pub fn rank(&self) -> u8 {
        match self {
            StreamState::Idle => 0,
            StreamState::ReservedLocal | StreamState::ReservedRemote => 1,
            StreamState::Open => 2,
            StreamState::HalfClosedLocal | StreamState::HalfClosedRemote => 3,
            StreamState::Closed => 4,
        }
    }

    /// Open or half-closed: counts towards SETTINGS_MAX_CONCURRENT_STREAMS.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            StreamState::Open | StreamState::HalfClosedLocal | StreamState::HalfClosedRemote
        )
    }

    pub fn is_closed(&self) -> bool {
        *self == StreamState::Closed
    }

    pub fn can_send_data(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    pub fn can_recv_data(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }
}

/// Stream-level frame kinds that drive the state machine. CONTINUATION is
/// part of the header block it extends. `PushPromise` is applied to the
/// promised stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Headers,
    Data,
    Priority,
    RstStream,
    PushPromise,
    WindowUpdate,
}

impl FrameKind {
    pub const ALL: [FrameKind; 6] = [
        FrameKind::Headers,
        FrameKind::Data,
        FrameKind::Priority,
        FrameKind::RstStream,
        FrameKind::PushPromise,
        FrameKind::WindowUpdate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FrameKind::Headers => "HEADERS",
            FrameKind::Data => "DATA",
            FrameKind::Priority => "PRIORITY",
            FrameKind::RstStream => "RST_STREAM",
            FrameKind::PushPromise => "PUSH_PROMISE",
            FrameKind::WindowUpdate => "WINDOW_UPDATE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Recv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Next(StreamState),
    StreamError(ErrorCode),
    ConnectionError(ErrorCode),
}

/// The stream state machine.
///
/// Illegal sends come back as `StreamError`; they are local mistakes and are
/// reported to the caller instead of being put on the wire.
pub fn transition(state: StreamState, kind: FrameKind, dir: Direction, end_stream: bool) -> Transition {
    use Direction::{Recv, Send};
    use FrameKind::{Data, Headers, PushPromise, RstStream, WindowUpdate};
    use StreamState::*;
    use Transition::{ConnectionError, Next, StreamError};

    let protocol = ErrorCode::ProtocolError;
    let stream_closed = ErrorCode::StreamClosed;
    let end = |open: StreamState, closed: StreamState| Next(if end_stream { closed } else { open });

    match (state, dir, kind) {
        (_, _, RstStream) if state == Idle => match dir {
            Recv => ConnectionError(protocol),
            Send => StreamError(protocol),
        },
        (Closed, Send, RstStream) => StreamError(stream_closed),
        (_, _, RstStream) => Next(Closed),
        (_, _, FrameKind::Priority) => Next(state),

        (Idle, Send, Headers) => end(Open, HalfClosedLocal),
        (Idle, Recv, Headers) => end(Open, HalfClosedRemote),
        (Idle, Send, PushPromise) => Next(ReservedLocal),
        (Idle, Recv, PushPromise) => Next(ReservedRemote),
        (Idle, Recv, _) => ConnectionError(protocol),
        (Idle, Send, _) => StreamError(protocol),

        (ReservedLocal, Send, Headers) => end(HalfClosedRemote, Closed),
        (ReservedLocal, Recv, WindowUpdate) => Next(state),
        (ReservedLocal, Recv, _) => ConnectionError(protocol),
        (ReservedLocal, Send, _) => StreamError(protocol),

        (ReservedRemote, Recv, Headers) => end(HalfClosedLocal, Closed),
        (ReservedRemote, Send, WindowUpdate) => Next(state),
        (ReservedRemote, Recv, _) => ConnectionError(protocol),
        (ReservedRemote, Send, _) => StreamError(protocol),

        (Open, _, WindowUpdate) => Next(Open),
        (Open, Send, Headers | Data) => end(Open, HalfClosedLocal),
        (Open, Recv, Headers | Data) => end(Open, HalfClosedRemote),
        (Open, Recv, PushPromise) => ConnectionError(protocol),
        (Open, Send, PushPromise) => StreamError(protocol),

        (HalfClosedLocal, _, WindowUpdate) => Next(state),
        (HalfClosedLocal, Recv, Headers | Data) => end(HalfClosedLocal, Closed),
        (HalfClosedLocal, Send, Headers | Data) => StreamError(stream_closed),
        (HalfClosedLocal, Recv, PushPromise) => ConnectionError(protocol),
        (HalfClosedLocal, Send, PushPromise) => StreamError(protocol),

        (HalfClosedRemote, _, WindowUpdate) => Next(state),
        (HalfClosedRemote, Send, Headers | Data) => end(HalfClosedRemote, Closed),
        (HalfClosedRemote, Recv, Headers | Data) => StreamError(stream_closed),
        (HalfClosedRemote, Recv, PushPromise) => ConnectionError(protocol),
        (HalfClosedRemote, Send, PushPromise) => StreamError(protocol),

        (Closed, Recv, WindowUpdate) => Next(Closed),
        (Closed, Send, WindowUpdate) => StreamError(stream_closed),
        (Closed, _, Headers | Data) => StreamError(stream_closed),
        (Closed, Recv, PushPromise) => ConnectionError(protocol),
        (Closed, Send, PushPromise) => StreamError(protocol),
    }
}

/// One stream, owned by the registry.
#[derive(Debug)]
pub struct Stream {
    pub id: u32,
    pub state: StreamState,
    pub send_window: Window,
    pub recv_window: Window,
    /// 1 to 256
    pub weight: u16,
    pub dependency: u32,
    pub headers_received: bool,
    pub headers_sent: bool,
    /// The peer has sent END_STREAM.
    pub end_stream_seen: bool,
    /// Received DATA the application has not released yet.
    pub(crate) unreleased: usize,
    /// Released capacity not yet announced with WINDOW_UPDATE.
    pub(crate) release_pending: u32,
    /// A send hit the window; report when capacity returns.
    pub(crate) send_blocked: bool,
}

impl Stream {
    pub fn new(id: u32, state: StreamState, send_initial: u32, recv_initial: u32) -> Self {
        Self {
            id,
            state,
            send_window: Window::new(send_initial),
            recv_window: Window::new(recv_initial),
            weight: Priority::DEFAULT_WEIGHT,
            dependency: 0,
            headers_received: false,
            headers_sent: false,
            end_stream_seen: false,
            unreleased: 0,
            release_pending: 0,
            send_blocked: false,
        }
    }

    /// Run the state machine for one frame and move to the next state when
    /// the frame is legal.
    pub fn apply(&mut self, kind: FrameKind, dir: Direction, end_stream: bool) -> Transition {
        let result = transition(self.state, kind, dir, end_stream);
        if let Transition::Next(next) = result {
            if next != self.state {
                debug!(
                    stream_id = self.id,
                    from = ?self.state,
                    to = ?next,
                    frame = kind.name(),
                    ?dir,
                    "stream transition"
                );
                self.state = next;
            }
            match (kind, dir) {
                (FrameKind::Headers, Direction::Recv) => self.headers_received = true,
                (FrameKind::Headers, Direction::Send) => self.headers_sent = true,
                _ => {}
            }
            if dir == Direction::Recv && end_stream {
                self.end_stream_seen = true;
            }
        }
        result
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.weight = priority.weight;
        self.dependency = priority.dependency;
    }
}
