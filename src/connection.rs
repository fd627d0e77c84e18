//! HTTP/2 connection controller.
//!
//! `Connection` is a sans-I/O state machine for one transport session. Feed
//! it received bytes with [`Connection::recv`], write out whatever
//! [`Connection::take_pending_send`] returns, and drain
//! [`Connection::poll_event`]. Timers are driven by
//! [`Connection::handle_timeout`] and [`Connection::poll_timeout`].
//!
//! Inbound frames run through a fixed pipeline: frame codec, HPACK, flow
//! control, then the stream registry. Every fault is classified as a stream
//! error (RST_STREAM) or a connection error (GOAWAY and close) before any
//! state changes.

use std::collections::VecDeque;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::error::{ErrorCode, H2Error, UserError};
use crate::event::Event;
use crate::flow::FlowController;
use crate::frame::{self, frame_type, Frame, Priority, CONNECTION_PREFACE, MAX_STREAM_ID};
use crate::h2_codec::H2Codec;
use crate::hpack::{self, H2Header};
use crate::settings::{self, Setting, Settings};
use crate::stream::{transition, Direction, FrameKind, StreamState, Transition};
use crate::streams::{CloseCause, Lookup, Role, Streams};

/// PING payload of the graceful shutdown round trip.
const SHUTDOWN_PING: [u8; 8] = *b"h2-drain";
/// PING payload of keepalive pings.
const KEEPALIVE_PING: [u8; 8] = *b"h2-alive";

#[derive(Debug)]
pub struct Connection {
    role: Role,
    config: Config,
    codec: H2Codec,
    decoder: hpack::Decoder,
    encoder: hpack::Encoder,
    flow: FlowController,
    streams: Streams,
    /// Our settings the peer has acknowledged.
    local_settings: Settings,
    /// Our settings sent but not yet acknowledged, oldest first.
    pending_settings: VecDeque<Settings>,
    remote_settings: Settings,
    remote_settings_received: bool,
    send_buf: BytesMut,
    events: VecDeque<Event>,
    now: Instant,
    last_activity: Instant,
    settings_deadline: Option<Instant>,
    /// Application PINGs awaiting ACK.
    pings: VecDeque<([u8; 8], Instant)>,
    keepalive_deadline: Option<Instant>,
    /// Last stream id of the most recent GOAWAY we sent.
    go_away_sent: Option<u32>,
    /// Last stream id of the most recent GOAWAY the peer sent.
    go_away_received: Option<u32>,
    /// Graceful shutdown is between its two GOAWAY frames.
    drain_ping_outstanding: bool,
    drain_deadline: Option<Instant>,
    /// Highest peer-initiated stream we accepted.
    last_processed_id: u32,
    closed: bool,
}

impl Connection {
    /// Client side: the preface and SETTINGS are queued immediately.
    pub fn client(config: Config) -> Result<Self, UserError> {
        let mut conn = Self::new(Role::Client, config)?;
        conn.send_buf.extend_from_slice(CONNECTION_PREFACE);
        conn.send_initial_settings();
        Ok(conn)
    }

    /// Server side: SETTINGS are queued immediately, the client preface is
    /// expected first on the wire.
    pub fn server(config: Config) -> Result<Self, UserError> {
        let mut conn = Self::new(Role::Server, config)?;
        conn.send_initial_settings();
        Ok(conn)
    }

    /// Server side of an HTTP/1.1 `Upgrade: h2c`.
    ///
    /// `http2_settings` is the decoded HTTP2-Settings payload of the
    /// upgrade request. Stream 1 carries that request and starts half-closed
    /// (remote), ready for the response.
    pub fn server_upgrade(config: Config, http2_settings: &[u8]) -> Result<Self, UserError> {
        let list = settings::decode_payload(http2_settings).map_err(UserError::InvalidUpgrade)?;
        let mut conn = Self::new(Role::Server, config)?;
        conn.apply_remote_effects(&list).map_err(UserError::InvalidUpgrade)?;
        conn.remote_settings.apply_all(&list);
        conn.streams.insert_upgraded(1, StreamState::HalfClosedRemote);
        conn.last_processed_id = 1;
        conn.send_initial_settings();
        Ok(conn)
    }

    /// Client side of an HTTP/1.1 `Upgrade: h2c` that was accepted.
    ///
    /// The settings in `config` were announced in HTTP2-Settings (see
    /// [`Connection::http2_settings`]) and are in force from the start.
    /// Stream 1 carries the upgrade request and starts half-closed (local).
    pub fn client_upgrade(config: Config) -> Result<Self, UserError> {
        let mut conn = Self::new(Role::Client, config)?;
        let settings = conn.config.settings;
        conn.apply_local_settings(settings);
        conn.streams.insert_upgraded(1, StreamState::HalfClosedLocal);
        conn.send_buf.extend_from_slice(CONNECTION_PREFACE);
        conn.send_initial_settings();
        Ok(conn)
    }

    /// SETTINGS payload for the HTTP2-Settings header of an upgrade request,
    /// before base64url encoding.
    pub fn http2_settings(config: &Config) -> Bytes {
        let mut buf = BytesMut::new();
        settings::encode_payload(&config.settings.to_list(), &mut buf);
        buf.freeze()
    }

    fn new(role: Role, config: Config) -> Result<Self, UserError> {
        config.validate()?;
        let mut codec = match role {
            Role::Client => H2Codec::new(),
            Role::Server => H2Codec::server(),
        };
        codec.set_max_header_block_size(config.max_header_block_size);
        let now = Instant::now();
        Ok(Self {
            role,
            codec,
            decoder: hpack::Decoder::default(),
            encoder: hpack::Encoder::default().with_size_limit(config.encoder_table_limit),
            flow: FlowController::new(config.connection_window_size),
            streams: Streams::new(role, config.reset_stream_memory),
            local_settings: Settings::default(),
            pending_settings: VecDeque::new(),
            remote_settings: Settings::default(),
            remote_settings_received: false,
            send_buf: BytesMut::new(),
            events: VecDeque::new(),
            now,
            last_activity: now,
            settings_deadline: None,
            pings: VecDeque::new(),
            keepalive_deadline: None,
            go_away_sent: None,
            go_away_received: None,
            drain_ping_outstanding: false,
            drain_deadline: None,
            last_processed_id: 0,
            closed: false,
            config,
        })
    }

    fn send_initial_settings(&mut self) {
        let settings = self.config.settings;
        self.write_frame(Frame::Settings {
            ack: false,
            settings: settings.to_list(),
        });
        self.pending_settings.push_back(settings);
        self.settings_deadline = Some(self.now + self.config.settings_timeout);
        if let Some(increment) = self.flow.initial_update() {
            self.write_frame(Frame::WindowUpdate {
                stream_id: 0,
                increment,
            });
        }
    }

    // ===== Accessors =====

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Our settings currently in force.
    pub fn local_settings(&self) -> &Settings {
        &self.local_settings
    }

    pub fn remote_settings(&self) -> &Settings {
        &self.remote_settings
    }

    /// State of any stream id, including ones that were never used or have
    /// been removed from the registry.
    pub fn stream_state(&self, stream_id: u32) -> StreamState {
        match self.streams.lookup(stream_id) {
            Lookup::Active(state) => state,
            Lookup::Idle => StreamState::Idle,
            Lookup::Closed(_) | Lookup::Forgotten => StreamState::Closed,
        }
    }

    pub fn stream_send_window(&self, stream_id: u32) -> Option<i64> {
        self.streams.get(stream_id).map(|s| s.send_window.get())
    }

    pub fn stream_recv_window(&self, stream_id: u32) -> Option<i64> {
        self.streams.get(stream_id).map(|s| s.recv_window.get())
    }

    pub fn connection_send_window(&self) -> i64 {
        self.flow.send_window()
    }

    pub fn connection_recv_window(&self) -> i64 {
        self.flow.recv_window()
    }

    /// Bytes `send_data` would accept on `stream_id` right now.
    pub fn send_capacity(&self, stream_id: u32) -> usize {
        match self.streams.get(stream_id) {
            Some(stream) if stream.state.can_send_data() => {
                self.flow.available(&self.streams, stream_id)
            }
            _ => 0,
        }
    }

    /// Streams still in the registry.
    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn last_processed_id(&self) -> u32 {
        self.last_processed_id
    }

    /// The HPACK dynamic table used to decode the peer's header blocks.
    pub fn decoder_table(&self) -> &hpack::DynamicTable {
        self.decoder.table()
    }

    /// The HPACK dynamic table used to encode our header blocks.
    pub fn encoder_table(&self) -> &hpack::DynamicTable {
        self.encoder.table()
    }

    // ===== I/O boundary =====

    /// Process bytes received from the transport.
    ///
    /// A connection error is returned after GOAWAY has been queued and
    /// `ConnectionClosed` emitted. Input after close is ignored.
    pub fn recv(&mut self, data: &[u8]) -> Result<(), H2Error> {
        if self.closed {
            return Ok(());
        }
        self.last_activity = self.now;
        self.codec.extend(data);
        loop {
            let result = match self.codec.decode() {
                Ok(Some(frame)) => self.handle_frame(frame),
                Ok(None) => break,
                Err(err) => Err(err),
            };
            if let Err(err) = result {
                let err = self.escalate_idle_stream_error(err);
                if err.is_connection_error() {
                    self.close_with_error(err.code(), err.reason());
                    return Err(err);
                }
                self.reset_on_error(err);
            }
            if self.closed {
                return Ok(());
            }
        }
        self.maybe_close();
        Ok(())
    }

    /// Bytes queued for the transport.
    pub fn take_pending_send(&mut self) -> Bytes {
        self.send_buf.split().freeze()
    }

    pub fn has_pending_send(&self) -> bool {
        !self.send_buf.is_empty()
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// The transport reached EOF or failed.
    pub fn transport_closed(&mut self) {
        if !self.closed {
            debug!("transport closed");
            self.shutdown(ErrorCode::NoError, "transport closed".to_string(), true);
        }
    }

    /// Earliest instant at which [`Connection::handle_timeout`] has work.
    pub fn poll_timeout(&self) -> Option<Instant> {
        if self.closed {
            return None;
        }
        let keepalive = match (self.keepalive_deadline, self.config.keepalive_interval) {
            (Some(deadline), _) => Some(deadline),
            (None, Some(interval)) => Some(self.last_activity + interval),
            (None, None) => None,
        };
        [self.settings_deadline, self.drain_deadline, keepalive]
            .into_iter()
            .flatten()
            .min()
    }

    /// Advance the connection clock and fire due timers.
    pub fn handle_timeout(&mut self, now: Instant) {
        self.now = now;
        if self.closed {
            return;
        }
        if self.settings_deadline.is_some_and(|d| now >= d) {
            self.close_with_error(ErrorCode::SettingsTimeout, "SETTINGS not acknowledged");
            return;
        }
        if self.drain_deadline.is_some_and(|d| now >= d) {
            self.close_with_error(ErrorCode::NoError, "graceful shutdown timed out");
            return;
        }
        if self.keepalive_deadline.is_some_and(|d| now >= d) {
            self.close_with_error(ErrorCode::NoError, "keepalive timed out");
            return;
        }
        if let Some(interval) = self.config.keepalive_interval {
            if self.keepalive_deadline.is_none() && now >= self.last_activity + interval {
                trace!("sending keepalive PING");
                self.write_frame(Frame::Ping {
                    ack: false,
                    payload: KEEPALIVE_PING,
                });
                self.keepalive_deadline = Some(now + self.config.keepalive_timeout);
            }
        }
    }

    // ===== Application commands =====

    /// Open a new stream by sending its request headers.
    pub fn open_stream(&mut self, headers: &[H2Header], end_stream: bool) -> Result<u32, UserError> {
        self.check_open()?;
        if self.go_away_received.is_some() || self.go_away_sent.is_some() {
            return Err(UserError::GoingAway);
        }
        let stream_id = self.streams.open_local()?;
        self.send_headers(stream_id, headers, end_stream)?;
        Ok(stream_id)
    }

    /// Send a header list on an existing stream: a response, an
    /// informational response or trailers.
    pub fn send_headers(
        &mut self,
        stream_id: u32,
        headers: &[H2Header],
        end_stream: bool,
    ) -> Result<(), UserError> {
        self.check_open()?;
        let stream = self
            .streams
            .get_mut(stream_id)
            .ok_or(UserError::UnknownStream(stream_id))?;
        if !matches!(
            stream.apply(FrameKind::Headers, Direction::Send, end_stream),
            Transition::Next(_)
        ) {
            return Err(UserError::InvalidState {
                stream_id,
                frame: "HEADERS",
                state: stream.state,
            });
        }
        let block = self.encoder.encode_block(headers);
        trace!(stream_id, end_stream, len = block.len(), "send HEADERS");
        frame::encode_headers(
            &mut self.send_buf,
            stream_id,
            None,
            block,
            end_stream,
            self.remote_settings.max_frame_size as usize,
        );
        self.finish_local_send(stream_id);
        Ok(())
    }

    /// Send as much of `data` as the flow-control windows allow.
    ///
    /// Returns the number of bytes written; END_STREAM is only sent with the
    /// final byte. When nothing fits, `WouldBlock` is returned and
    /// `Event::WindowAvailable` follows once capacity returns.
    pub fn send_data(&mut self, stream_id: u32, data: Bytes, end_stream: bool) -> Result<usize, UserError> {
        self.check_open()?;
        let state = self
            .streams
            .get(stream_id)
            .ok_or(UserError::UnknownStream(stream_id))?
            .state;
        if !matches!(
            transition(state, FrameKind::Data, Direction::Send, end_stream),
            Transition::Next(_)
        ) {
            return Err(UserError::InvalidState {
                stream_id,
                frame: "DATA",
                state,
            });
        }

        let len = data.len();
        if len == 0 && !end_stream {
            return Ok(0);
        }
        let n = self.flow.available(&self.streams, stream_id).min(len);
        if n == 0 && len > 0 {
            if let Some(stream) = self.streams.get_mut(stream_id) {
                stream.send_blocked = true;
            }
            return Err(UserError::WouldBlock);
        }
        self.flow.reserve(&mut self.streams, stream_id, n)?;

        let finished = end_stream && n == len;
        let max = self.remote_settings.max_frame_size as usize;
        let mut rest = data.slice(..n);
        loop {
            let chunk = rest.split_to(max.min(rest.len()));
            let last = rest.is_empty();
            self.write_frame(Frame::Data {
                stream_id,
                data: chunk,
                end_stream: finished && last,
                pad_len: None,
            });
            if last {
                break;
            }
        }

        if let Some(stream) = self.streams.get_mut(stream_id) {
            if n < len {
                stream.send_blocked = true;
            }
            stream.apply(FrameKind::Data, Direction::Send, finished);
        }
        self.finish_local_send(stream_id);
        Ok(n)
    }

    /// Cancel a stream with RST_STREAM.
    pub fn reset_stream(&mut self, stream_id: u32, error_code: ErrorCode) -> Result<(), UserError> {
        self.check_open()?;
        let stream = self
            .streams
            .get_mut(stream_id)
            .ok_or(UserError::UnknownStream(stream_id))?;
        if !matches!(
            stream.apply(FrameKind::RstStream, Direction::Send, false),
            Transition::Next(_)
        ) {
            return Err(UserError::InvalidState {
                stream_id,
                frame: "RST_STREAM",
                state: stream.state,
            });
        }
        debug!(stream_id, %error_code, "resetting stream");
        self.write_frame(Frame::RstStream {
            stream_id,
            error_code,
        });
        self.discard_stream(stream_id, CloseCause::LocalReset);
        self.maybe_close();
        Ok(())
    }

    /// Promise a pushed response on `stream_id`. Returns the promised id;
    /// the response is then sent with `send_headers` on it.
    pub fn push_promise(&mut self, stream_id: u32, request: &[H2Header]) -> Result<u32, UserError> {
        self.check_open()?;
        if self.role != Role::Server || !self.remote_settings.enable_push {
            return Err(UserError::PushNotAllowed);
        }
        if self.go_away_received.is_some() {
            return Err(UserError::GoingAway);
        }
        let state = self
            .streams
            .get(stream_id)
            .ok_or(UserError::UnknownStream(stream_id))?
            .state;
        if !matches!(state, StreamState::Open | StreamState::HalfClosedRemote) {
            return Err(UserError::InvalidState {
                stream_id,
                frame: "PUSH_PROMISE",
                state,
            });
        }
        let promised_id = self.streams.reserve_local_push()?;
        if let Some(promised) = self.streams.get_mut(promised_id) {
            promised.apply(FrameKind::PushPromise, Direction::Send, false);
        }
        let block = self.encoder.encode_block(request);
        trace!(stream_id, promised_id, "send PUSH_PROMISE");
        frame::encode_push_promise(
            &mut self.send_buf,
            stream_id,
            promised_id,
            block,
            self.remote_settings.max_frame_size as usize,
        );
        Ok(promised_id)
    }

    /// Send a PRIORITY frame for `stream_id`.
    pub fn set_priority(&mut self, stream_id: u32, priority: Priority) -> Result<(), UserError> {
        self.check_open()?;
        if priority.dependency == stream_id {
            return Err(UserError::SelfDependency(stream_id));
        }
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.set_priority(priority);
        }
        self.write_frame(Frame::Priority {
            stream_id,
            priority,
        });
        Ok(())
    }

    /// Hand back `n` bytes of received DATA on `stream_id`, letting the peer
    /// send more once enough has accumulated.
    pub fn release_capacity(&mut self, stream_id: u32, n: usize) -> Result<(), UserError> {
        self.check_open()?;
        self.release(stream_id, n)
    }

    /// Announce new local settings. They take effect when acknowledged.
    pub fn update_settings(&mut self, settings: Settings) -> Result<(), UserError> {
        self.check_open()?;
        settings.validate()?;
        let base = self
            .pending_settings
            .back()
            .copied()
            .unwrap_or(self.local_settings);
        let list = base.diff(&settings);
        debug!(?list, "sending SETTINGS");
        self.write_frame(Frame::Settings {
            ack: false,
            settings: list,
        });
        self.pending_settings.push_back(settings);
        if self.settings_deadline.is_none() {
            self.settings_deadline = Some(self.now + self.config.settings_timeout);
        }
        Ok(())
    }

    /// Send a PING; `Event::PingAck` reports the round trip.
    pub fn ping(&mut self, payload: [u8; 8]) -> Result<(), UserError> {
        self.check_open()?;
        self.write_frame(Frame::Ping {
            ack: false,
            payload,
        });
        self.pings.push_back((payload, self.now));
        Ok(())
    }

    /// Send GOAWAY. A repeated GOAWAY may lower `last_stream_id` but never
    /// raise it. With an error code the connection closes immediately;
    /// with `NO_ERROR` it drains until no streams remain.
    pub fn go_away(
        &mut self,
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: Bytes,
    ) -> Result<(), UserError> {
        self.check_open()?;
        if let Some(previous) = self.go_away_sent {
            if last_stream_id > previous {
                return Err(UserError::GoAwayRaised {
                    previous,
                    requested: last_stream_id,
                });
            }
        }
        self.send_go_away(last_stream_id, error_code, debug_data);
        if error_code != ErrorCode::NoError {
            self.shutdown(error_code, "GOAWAY sent".to_string(), false);
            return Ok(());
        }
        for stream_id in self.streams.ids() {
            if !self.streams.is_local(stream_id) && stream_id > last_stream_id {
                self.discard_stream(stream_id, CloseCause::LocalReset);
                self.events.push_back(Event::StreamReset {
                    stream_id,
                    error_code: ErrorCode::RefusedStream,
                    remote: false,
                });
            }
        }
        self.maybe_close();
        Ok(())
    }

    /// Two-phase graceful shutdown: GOAWAY with the maximum stream id and a
    /// PING, then on the PING ACK a GOAWAY with the last processed stream.
    pub fn graceful_shutdown(&mut self) -> Result<(), UserError> {
        self.check_open()?;
        if self.go_away_sent.is_some() {
            return Ok(());
        }
        debug!("starting graceful shutdown");
        self.send_go_away(MAX_STREAM_ID, ErrorCode::NoError, Bytes::new());
        self.write_frame(Frame::Ping {
            ack: false,
            payload: SHUTDOWN_PING,
        });
        self.drain_ping_outstanding = true;
        Ok(())
    }

    // ===== Inbound dispatch =====

    fn handle_frame(&mut self, frame: Frame) -> Result<(), H2Error> {
        if !self.remote_settings_received && !matches!(frame, Frame::Settings { ack: false, .. }) {
            return Err(H2Error::protocol(format!(
                "first frame was {} instead of SETTINGS",
                frame_type::name(frame.frame_type())
            )));
        }
        let flow_len = frame.flow_controlled_len();
        match frame {
            Frame::Data {
                stream_id,
                data,
                end_stream,
                ..
            } => self.recv_data(stream_id, data, end_stream, flow_len),
            Frame::Headers {
                stream_id,
                priority,
                header_block,
                end_stream,
                ..
            } => self.recv_headers(stream_id, priority, header_block, end_stream),
            Frame::Priority {
                stream_id,
                priority,
            } => self.recv_priority(stream_id, priority),
            Frame::RstStream {
                stream_id,
                error_code,
            } => self.recv_reset(stream_id, error_code),
            Frame::Settings { ack, settings } => self.recv_settings(ack, settings),
            Frame::PushPromise {
                stream_id,
                promised_id,
                header_block,
                ..
            } => self.recv_push_promise(stream_id, promised_id, header_block),
            Frame::Ping { ack, payload } => {
                self.recv_ping(ack, payload);
                Ok(())
            }
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => self.recv_go_away(last_stream_id, error_code, debug_data),
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => self.recv_window_update(stream_id, increment),
            Frame::Continuation { stream_id, .. } => Err(H2Error::protocol(format!(
                "unexpected CONTINUATION on stream {stream_id}"
            ))),
            Frame::Unknown {
                frame_type,
                stream_id,
            } => {
                trace!(frame_type, stream_id, "ignoring unknown frame");
                Ok(())
            }
        }
    }

    /// HPACK-decode a header block. Fatal decode errors are returned as the
    /// outer error; an oversized header list comes back as the inner stream
    /// error so the caller can finish its bookkeeping first.
    fn decode_block(
        &mut self,
        stream_id: u32,
        block: &[u8],
    ) -> Result<Result<Vec<H2Header>, H2Error>, H2Error> {
        let limit = self.local_settings.max_header_list_size.map(|v| v as usize);
        match self.decoder.decode(block, limit) {
            Ok(headers) => Ok(Ok(headers)),
            Err(err) => {
                let err = err.into_h2(stream_id);
                if err.is_connection_error() {
                    Err(err)
                } else {
                    Ok(Err(err))
                }
            }
        }
    }

    fn recv_headers(
        &mut self,
        stream_id: u32,
        priority: Option<Priority>,
        block: Bytes,
        end_stream: bool,
    ) -> Result<(), H2Error> {
        // always decode: the dynamic table must follow every block
        let decoded = self.decode_block(stream_id, &block)?;

        match self.streams.lookup(stream_id) {
            Lookup::Active(_) => {}
            Lookup::Idle if self.role == Role::Server && !self.streams.is_local(stream_id) => {
                if self.go_away_sent.is_some_and(|last| stream_id > last) {
                    debug!(stream_id, "ignoring new stream after GOAWAY");
                    self.streams.skip_remote(stream_id);
                    return Ok(());
                }
                if self.streams.remote_at_capacity() {
                    self.streams.skip_remote(stream_id);
                    return Err(H2Error::stream(
                        stream_id,
                        ErrorCode::RefusedStream,
                        "concurrent stream limit reached",
                    ));
                }
                self.streams.open_remote(stream_id)?;
                self.last_processed_id = stream_id;
            }
            Lookup::Idle => {
                return Err(H2Error::protocol(format!(
                    "HEADERS on idle stream {stream_id}"
                )))
            }
            Lookup::Closed(CloseCause::LocalReset) => {
                trace!(stream_id, "ignoring HEADERS on reset stream");
                return Ok(());
            }
            Lookup::Closed(CloseCause::Finished) => {
                return Err(H2Error::stream(
                    stream_id,
                    ErrorCode::StreamClosed,
                    "HEADERS on closed stream",
                ))
            }
            Lookup::Forgotten if self.streams.is_local(stream_id) => {
                return Err(H2Error::stream(
                    stream_id,
                    ErrorCode::StreamClosed,
                    "HEADERS on closed stream",
                ))
            }
            Lookup::Forgotten => {
                return Err(H2Error::protocol(format!(
                    "stream id {stream_id} behind next expected"
                )))
            }
        }

        if priority.is_some_and(|p| p.dependency == stream_id) {
            return Err(H2Error::stream(
                stream_id,
                ErrorCode::ProtocolError,
                "stream depends on itself",
            ));
        }
        let Some(stream) = self.streams.get_mut(stream_id) else {
            return Ok(());
        };
        match stream.apply(FrameKind::Headers, Direction::Recv, end_stream) {
            Transition::Next(_) => {}
            Transition::StreamError(code) => {
                return Err(H2Error::stream(stream_id, code, "HEADERS not allowed"))
            }
            Transition::ConnectionError(code) => {
                return Err(H2Error::connection(
                    code,
                    format!("HEADERS not allowed on stream {stream_id}"),
                ))
            }
        }
        if let Some(priority) = priority {
            stream.set_priority(priority);
        }

        let headers = decoded?;
        self.events.push_back(Event::Headers {
            stream_id,
            headers,
            end_stream,
        });
        self.retire_if_closed(stream_id);
        Ok(())
    }

    fn recv_data(&mut self, stream_id: u32, data: Bytes, end_stream: bool, flow_len: usize) -> Result<(), H2Error> {
        let state = match self.streams.lookup(stream_id) {
            Lookup::Active(state) => state,
            Lookup::Idle => {
                return Err(H2Error::protocol(format!(
                    "DATA on idle stream {stream_id}"
                )))
            }
            gone => {
                self.flow.debit_connection(flow_len)?;
                self.release_connection(flow_len);
                if gone == Lookup::Closed(CloseCause::LocalReset) {
                    trace!(stream_id, "ignoring DATA on reset stream");
                    return Ok(());
                }
                return Err(H2Error::stream(
                    stream_id,
                    ErrorCode::StreamClosed,
                    "DATA on closed stream",
                ));
            }
        };

        match transition(state, FrameKind::Data, Direction::Recv, end_stream) {
            Transition::Next(_) => {}
            Transition::StreamError(code) => {
                self.flow.debit_connection(flow_len)?;
                self.release_connection(flow_len);
                return Err(H2Error::stream(stream_id, code, "DATA not allowed"));
            }
            Transition::ConnectionError(code) => {
                return Err(H2Error::connection(
                    code,
                    format!("DATA not allowed on stream {stream_id}"),
                ))
            }
        }

        if let Err(err) = self.flow.debit(&mut self.streams, stream_id, flow_len) {
            if !err.is_connection_error() {
                self.release_connection(flow_len);
            }
            return Err(err);
        }
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.apply(FrameKind::Data, Direction::Recv, end_stream);
        }
        let padding = flow_len - data.len();
        if padding > 0 {
            let _ = self.release(stream_id, padding);
        }

        let len = data.len();
        self.events.push_back(Event::Data {
            stream_id,
            data,
            end_stream,
        });
        if self.config.auto_release_capacity && len > 0 {
            let _ = self.release(stream_id, len);
        }
        self.retire_if_closed(stream_id);
        Ok(())
    }

    fn recv_priority(&mut self, stream_id: u32, priority: Priority) -> Result<(), H2Error> {
        if priority.dependency == stream_id {
            return Err(H2Error::stream(
                stream_id,
                ErrorCode::ProtocolError,
                "stream depends on itself",
            ));
        }
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.set_priority(priority);
        }
        Ok(())
    }

    fn recv_reset(&mut self, stream_id: u32, error_code: ErrorCode) -> Result<(), H2Error> {
        match self.streams.lookup(stream_id) {
            Lookup::Active(_) => {}
            Lookup::Idle => {
                return Err(H2Error::protocol(format!(
                    "RST_STREAM on idle stream {stream_id}"
                )))
            }
            _ => return Ok(()),
        }
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.apply(FrameKind::RstStream, Direction::Recv, false);
        }
        debug!(stream_id, %error_code, "stream reset by peer");
        self.discard_stream(stream_id, CloseCause::Finished);
        self.events.push_back(Event::StreamReset {
            stream_id,
            error_code,
            remote: true,
        });
        Ok(())
    }

    fn recv_settings(&mut self, ack: bool, list: Vec<Setting>) -> Result<(), H2Error> {
        if ack {
            match self.pending_settings.pop_front() {
                Some(settings) => {
                    debug!("SETTINGS acknowledged");
                    self.apply_local_settings(settings);
                    self.settings_deadline = if self.pending_settings.is_empty() {
                        None
                    } else {
                        Some(self.now + self.config.settings_timeout)
                    };
                    self.events.push_back(Event::SettingsAcked);
                }
                None => warn!("SETTINGS ACK without pending SETTINGS"),
            }
            return Ok(());
        }

        self.apply_remote_effects(&list)?;
        self.remote_settings.apply_all(&list);
        self.remote_settings_received = true;
        debug!(?list, "peer SETTINGS applied");
        self.write_frame(Frame::Settings {
            ack: true,
            settings: Vec::new(),
        });
        self.events
            .push_back(Event::RemoteSettings(self.remote_settings));
        self.notify_capacity();
        Ok(())
    }

    /// Apply the side effects of the peer's settings before they are
    /// recorded. Fails without changing anything.
    fn apply_remote_effects(&mut self, list: &[Setting]) -> Result<(), H2Error> {
        let mut next = self.remote_settings;
        next.apply_all(list);
        if next.initial_window_size != self.streams.send_initial() {
            self.flow
                .apply_remote_initial_window(&mut self.streams, next.initial_window_size)?;
        }
        if list
            .iter()
            .any(|s| matches!(s, Setting::HeaderTableSize(_)))
        {
            self.encoder.set_max_table_size(next.header_table_size as usize);
        }
        self.streams
            .set_remote_max_concurrent(next.max_concurrent_streams);
        Ok(())
    }

    fn apply_local_settings(&mut self, settings: Settings) {
        if settings.initial_window_size != self.streams.recv_initial() {
            self.flow
                .apply_local_initial_window(&mut self.streams, settings.initial_window_size);
        }
        self.decoder
            .set_max_size_limit(settings.header_table_size as usize);
        self.codec.set_max_frame_size(settings.max_frame_size);
        self.streams
            .set_local_max_concurrent(settings.max_concurrent_streams);
        self.local_settings = settings;
    }

    fn recv_push_promise(&mut self, stream_id: u32, promised_id: u32, block: Bytes) -> Result<(), H2Error> {
        let decoded = self.decode_block(promised_id, &block)?;

        if self.role == Role::Server {
            return Err(H2Error::protocol("client sent PUSH_PROMISE"));
        }
        if !self.local_settings.enable_push {
            return Err(H2Error::protocol("PUSH_PROMISE while push is disabled"));
        }
        match self.streams.lookup(stream_id) {
            Lookup::Active(StreamState::Open | StreamState::HalfClosedLocal) => {}
            Lookup::Closed(CloseCause::LocalReset) => {
                self.streams.open_remote(promised_id)?;
                self.streams.remove(promised_id, CloseCause::LocalReset);
                self.write_frame(Frame::RstStream {
                    stream_id: promised_id,
                    error_code: ErrorCode::Cancel,
                });
                return Ok(());
            }
            _ => {
                return Err(H2Error::protocol(format!(
                    "PUSH_PROMISE on stream {stream_id} that cannot carry it"
                )))
            }
        }

        self.streams.open_remote(promised_id)?;
        if let Some(promised) = self.streams.get_mut(promised_id) {
            promised.apply(FrameKind::PushPromise, Direction::Recv, false);
        }
        let headers = decoded?;
        self.events.push_back(Event::PushPromise {
            stream_id,
            promised_id,
            headers,
        });
        Ok(())
    }

    fn recv_ping(&mut self, ack: bool, payload: [u8; 8]) {
        if !ack {
            self.write_frame(Frame::Ping { ack: true, payload });
            return;
        }
        if let Some(pos) = self.pings.iter().position(|(p, _)| *p == payload) {
            if let Some((_, sent)) = self.pings.remove(pos) {
                self.events.push_back(Event::PingAck {
                    payload,
                    rtt: self.now.saturating_duration_since(sent),
                });
            }
            return;
        }
        if payload == KEEPALIVE_PING && self.keepalive_deadline.is_some() {
            self.keepalive_deadline = None;
            return;
        }
        if payload == SHUTDOWN_PING && self.drain_ping_outstanding {
            self.drain_ping_outstanding = false;
            let last = self.last_processed_id;
            debug!(last_stream_id = last, "graceful shutdown: final GOAWAY");
            self.send_go_away(last, ErrorCode::NoError, Bytes::new());
            for stream_id in self.streams.ids() {
                if !self.streams.is_local(stream_id) && stream_id > last {
                    self.discard_stream(stream_id, CloseCause::LocalReset);
                }
            }
            return;
        }
        trace!("ignoring unmatched PING ACK");
    }

    fn recv_go_away(&mut self, last_stream_id: u32, error_code: ErrorCode, debug_data: Bytes) -> Result<(), H2Error> {
        if let Some(previous) = self.go_away_received {
            if last_stream_id > previous {
                return Err(H2Error::protocol(format!(
                    "GOAWAY raised last stream id from {previous} to {last_stream_id}"
                )));
            }
        }
        debug!(last_stream_id, %error_code, "GOAWAY received");
        self.go_away_received = Some(last_stream_id);
        self.events.push_back(Event::GoAway {
            last_stream_id,
            error_code,
            debug_data,
        });
        // streams above the boundary were never processed and are safe to retry
        for stream_id in self.streams.ids() {
            if self.streams.is_local(stream_id) && stream_id > last_stream_id {
                self.discard_stream(stream_id, CloseCause::Finished);
                self.events.push_back(Event::StreamReset {
                    stream_id,
                    error_code: ErrorCode::RefusedStream,
                    remote: true,
                });
            }
        }
        Ok(())
    }

    fn recv_window_update(&mut self, stream_id: u32, increment: u32) -> Result<(), H2Error> {
        if stream_id != 0 {
            match self.streams.lookup(stream_id) {
                Lookup::Active(_) => {}
                Lookup::Idle => {
                    return Err(H2Error::protocol(format!(
                        "WINDOW_UPDATE on idle stream {stream_id}"
                    )))
                }
                _ => return Ok(()),
            }
            if let Some(stream) = self.streams.get_mut(stream_id) {
                if let Transition::ConnectionError(code) =
                    stream.apply(FrameKind::WindowUpdate, Direction::Recv, false)
                {
                    return Err(H2Error::connection(
                        code,
                        format!("WINDOW_UPDATE not allowed on stream {stream_id}"),
                    ));
                }
            }
        }
        self.flow.credit(&mut self.streams, stream_id, increment)?;
        self.notify_capacity();
        Ok(())
    }

    // ===== Internals =====

    fn check_open(&self) -> Result<(), UserError> {
        if self.closed {
            return Err(UserError::ConnectionClosed);
        }
        Ok(())
    }

    fn write_frame(&mut self, frame: Frame) {
        trace!(
            frame = frame_type::name(frame.frame_type()),
            stream_id = frame.stream_id(),
            "send frame"
        );
        frame.encode(&mut self.send_buf);
    }

    fn send_go_away(&mut self, last_stream_id: u32, error_code: ErrorCode, debug_data: Bytes) {
        debug!(last_stream_id, %error_code, "sending GOAWAY");
        self.write_frame(Frame::GoAway {
            last_stream_id,
            error_code,
            debug_data,
        });
        self.go_away_sent = Some(last_stream_id);
        if self.drain_deadline.is_none() {
            self.drain_deadline = Some(self.now + self.config.graceful_shutdown_timeout);
        }
    }

    /// Release capacity and queue the resulting WINDOW_UPDATE frames.
    fn release(&mut self, stream_id: u32, n: usize) -> Result<(), UserError> {
        for (id, increment) in self.flow.release(&mut self.streams, stream_id, n)? {
            self.write_frame(Frame::WindowUpdate {
                stream_id: id,
                increment,
            });
        }
        Ok(())
    }

    fn release_connection(&mut self, n: usize) {
        if let Some(increment) = self.flow.release_connection(n) {
            self.write_frame(Frame::WindowUpdate {
                stream_id: 0,
                increment,
            });
        }
    }

    /// Remove a stream and hand its undelivered receive capacity back to the
    /// connection.
    fn discard_stream(&mut self, stream_id: u32, cause: CloseCause) {
        if let Some(stream) = self.streams.remove(stream_id, cause) {
            self.release_connection(stream.unreleased);
        }
    }

    /// Remove a stream that finished normally. Capacity the application has
    /// not released yet stays claimable through `release_capacity`.
    fn retire_if_closed(&mut self, stream_id: u32) {
        if let Some(stream) = self.streams.remove_if_closed(stream_id) {
            self.flow.retire(&stream);
        }
    }

    fn finish_local_send(&mut self, stream_id: u32) {
        self.retire_if_closed(stream_id);
        self.maybe_close();
    }

    /// Emit `WindowAvailable` for blocked streams that can send again.
    fn notify_capacity(&mut self) {
        for stream_id in self.streams.ids() {
            let available = self.flow.available(&self.streams, stream_id);
            if let Some(stream) = self.streams.get_mut(stream_id) {
                if stream.send_blocked && available > 0 {
                    stream.send_blocked = false;
                    self.events.push_back(Event::WindowAvailable { stream_id });
                }
            }
        }
    }

    /// RST_STREAM must not be sent on an idle stream, so a stream error
    /// there becomes a connection error and the id stays unused.
    fn escalate_idle_stream_error(&self, err: H2Error) -> H2Error {
        match err {
            H2Error::Stream {
                stream_id,
                code,
                reason,
            } if self.streams.lookup(stream_id) == Lookup::Idle => H2Error::connection(
                code,
                format!("{reason} (idle stream {stream_id})"),
            ),
            err => err,
        }
    }

    /// Answer a stream error with RST_STREAM.
    fn reset_on_error(&mut self, err: H2Error) {
        let H2Error::Stream {
            stream_id,
            code,
            reason,
        } = err
        else {
            return;
        };
        warn!(stream_id, %code, %reason, "stream error");
        self.write_frame(Frame::RstStream {
            stream_id,
            error_code: code,
        });
        if let Some(stream) = self.streams.remove(stream_id, CloseCause::LocalReset) {
            self.release_connection(stream.unreleased);
            self.events.push_back(Event::StreamReset {
                stream_id,
                error_code: code,
                remote: false,
            });
        } else {
            self.streams.remember_closed(stream_id, CloseCause::LocalReset);
        }
    }

    /// Answer a connection error: GOAWAY, then tear everything down.
    fn close_with_error(&mut self, code: ErrorCode, reason: &str) {
        if self.closed {
            return;
        }
        warn!(%code, reason, "connection error");
        let last = match self.go_away_sent {
            Some(previous) => previous.min(self.last_processed_id),
            None => self.last_processed_id,
        };
        self.send_go_away(last, code, Bytes::copy_from_slice(reason.as_bytes()));
        self.shutdown(code, reason.to_string(), false);
    }

    /// Close once GOAWAY has been exchanged and the last stream is gone.
    fn maybe_close(&mut self) {
        if self.closed || self.drain_ping_outstanding || !self.streams.is_empty() {
            return;
        }
        if self.go_away_sent.is_none() && self.go_away_received.is_none() {
            return;
        }
        debug!("connection drained");
        let remote = self.go_away_sent.is_none();
        self.shutdown(ErrorCode::NoError, "connection drained".to_string(), remote);
    }

    fn shutdown(&mut self, code: ErrorCode, reason: String, remote: bool) {
        let reset_code = if code == ErrorCode::NoError {
            ErrorCode::Cancel
        } else {
            code
        };
        for stream in self.streams.drain() {
            self.events.push_back(Event::StreamReset {
                stream_id: stream.id,
                error_code: reset_code,
                remote,
            });
        }
        self.codec.reset();
        self.closed = true;
        self.settings_deadline = None;
        self.drain_deadline = None;
        self.keepalive_deadline = None;
        self.events.push_back(Event::ConnectionClosed {
            error_code: code,
            reason,
            remote,
        });
    }
}
