//! Flow control (RFC 7540 Section 5.2 and 6.9).
//!
//! Windows are `i64` so a SETTINGS_INITIAL_WINDOW_SIZE reduction can drive a
//! stream's send window negative. [`FlowController`] holds the two
//! connection-level windows; stream windows live on each [`Stream`] and are
//! reached through the registry by id.

use std::collections::HashMap;

use thiserror::Error;

use crate::error::{ErrorCode, H2Error, UserError};
use crate::stream::Stream;
use crate::streams::{Lookup, Streams};

/// Largest legal window size (2^31-1).
pub const MAX_WINDOW_SIZE: i64 = 0x7fff_ffff;

/// Backpressure: the send would not fit the current windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("flow-control window exhausted")]
pub struct WouldBlock;

impl From<WouldBlock> for UserError {
    fn from(_: WouldBlock) -> Self {
        UserError::WouldBlock
    }
}

/// An increase would take a window beyond 2^31-1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOverflow;

/// One flow-control window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window(i64);

impl Window {
    pub fn new(initial: u32) -> Self {
        Self(initial as i64)
    }

    pub fn get(&self) -> i64 {
        self.0
    }

    /// Bytes that may be sent or received right now.
    pub fn available(&self) -> usize {
        self.0.max(0) as usize
    }

    /// Take `n` bytes, all or nothing.
    pub fn consume(&mut self, n: usize) -> Result<(), WouldBlock> {
        if n > self.available() {
            return Err(WouldBlock);
        }
        self.0 -= n as i64;
        Ok(())
    }

    pub fn increase(&mut self, n: u32) -> Result<(), WindowOverflow> {
        self.adjust(n as i64)
    }

    /// Apply a signed delta, rejecting results above 2^31-1.
    pub fn adjust(&mut self, delta: i64) -> Result<(), WindowOverflow> {
        let next = self.0 + delta;
        if next > MAX_WINDOW_SIZE {
            return Err(WindowOverflow);
        }
        self.0 = next;
        Ok(())
    }
}

/// Connection-level windows plus the receive replenishment policy.
#[derive(Debug)]
pub struct FlowController {
    send: Window,
    recv: Window,
    /// Size the connection receive window is replenished towards.
    recv_target: u32,
    /// Released but not yet announced connection capacity.
    recv_pending: u32,
    /// Received DATA still held by the application for streams that finished
    /// and left the registry.
    retired: HashMap<u32, usize>,
}

impl FlowController {
    pub fn new(recv_target: u32) -> Self {
        Self {
            send: Window::new(crate::settings::DEFAULT_INITIAL_WINDOW_SIZE),
            recv: Window::new(crate::settings::DEFAULT_INITIAL_WINDOW_SIZE),
            recv_target,
            recv_pending: 0,
            retired: HashMap::new(),
        }
    }

    pub fn send_window(&self) -> i64 {
        self.send.get()
    }

    pub fn recv_window(&self) -> i64 {
        self.recv.get()
    }

    /// Initial WINDOW_UPDATE that grows the connection receive window from the
    /// RFC default to the configured target.
    pub fn initial_update(&mut self) -> Option<u32> {
        let grow = self.recv_target as i64 - self.recv.get();
        if grow <= 0 {
            return None;
        }
        self.recv.adjust(grow).ok()?;
        Some(grow as u32)
    }

    /// Sendable bytes on `stream_id`: the smaller of both send windows.
    pub fn available(&self, streams: &Streams, stream_id: u32) -> usize {
        match streams.get(stream_id) {
            Some(stream) => self.send.available().min(stream.send_window.available()),
            None => 0,
        }
    }

    /// Reserve `n` bytes of DATA on both send windows, all or nothing.
    pub fn reserve(&mut self, streams: &mut Streams, stream_id: u32, n: usize) -> Result<(), WouldBlock> {
        let stream = streams.get_mut(stream_id).ok_or(WouldBlock)?;
        if n > self.send.available() || n > stream.send_window.available() {
            stream.send_blocked = true;
            return Err(WouldBlock);
        }
        self.send.consume(n)?;
        stream.send_window.consume(n)
    }

    /// Apply a received WINDOW_UPDATE. Stream id 0 credits the connection.
    ///
    /// Updates for streams no longer in the registry are ignored.
    pub fn credit(&mut self, streams: &mut Streams, stream_id: u32, increment: u32) -> Result<(), H2Error> {
        if stream_id == 0 {
            return self.send.increase(increment).map_err(|_| {
                H2Error::connection(
                    ErrorCode::FlowControlError,
                    "connection send window overflow",
                )
            });
        }
        if let Some(stream) = streams.get_mut(stream_id) {
            stream.send_window.increase(increment).map_err(|_| {
                H2Error::stream(
                    stream_id,
                    ErrorCode::FlowControlError,
                    "stream send window overflow",
                )
            })?;
        }
        Ok(())
    }

    /// Account received DATA (including padding) against both receive windows.
    ///
    /// The connection window is checked and debited first; when the stream
    /// window then fails the connection debit stands and the caller must
    /// release it.
    pub fn debit(&mut self, streams: &mut Streams, stream_id: u32, n: usize) -> Result<(), H2Error> {
        self.debit_connection(n)?;
        if let Some(stream) = streams.get_mut(stream_id) {
            debit_stream(stream, n)?;
        }
        Ok(())
    }

    pub fn debit_connection(&mut self, n: usize) -> Result<(), H2Error> {
        self.recv.consume(n).map_err(|_| {
            H2Error::connection(
                ErrorCode::FlowControlError,
                format!("DATA of {n} bytes exceeds connection receive window"),
            )
        })
    }

    /// Release consumed bytes on `stream_id` and the connection. Returns the
    /// WINDOW_UPDATE frames due as `(stream_id, increment)`.
    pub fn release(
        &mut self,
        streams: &mut Streams,
        stream_id: u32,
        n: usize,
    ) -> Result<Vec<(u32, u32)>, UserError> {
        let mut updates = Vec::new();
        let threshold = (streams.recv_initial() / 2).max(1);
        if let Some(stream) = streams.get_mut(stream_id) {
            if n > stream.unreleased {
                return Err(UserError::ReleaseTooLarge(stream_id));
            }
            let pending = u32::try_from(n)
                .ok()
                .and_then(|n| stream.release_pending.checked_add(n))
                .ok_or(UserError::ReleaseTooLarge(stream_id))?;
            stream.unreleased -= n;
            // only streams the peer can still send on are replenished
            if stream.state.can_recv_data() {
                stream.release_pending = pending;
                if stream.release_pending >= threshold {
                    let increment = std::mem::take(&mut stream.release_pending);
                    if stream.recv_window.increase(increment).is_ok() {
                        updates.push((stream_id, increment));
                    }
                }
            }
        } else {
            let Some(held) = self.retired.get_mut(&stream_id) else {
                return Err(match streams.lookup(stream_id) {
                    Lookup::Idle => UserError::UnknownStream(stream_id),
                    _ => UserError::ReleaseTooLarge(stream_id),
                });
            };
            if n > *held {
                return Err(UserError::ReleaseTooLarge(stream_id));
            }
            *held -= n;
            if *held == 0 {
                self.retired.remove(&stream_id);
            }
        }
        if let Some(increment) = self.release_connection(n) {
            updates.push((0, increment));
        }
        Ok(updates)
    }

    /// Keep the undelivered capacity of a stream that finished normally so
    /// the application can still release it.
    pub fn retire(&mut self, stream: &Stream) {
        if stream.unreleased > 0 {
            *self.retired.entry(stream.id).or_default() += stream.unreleased;
        }
    }

    /// Release connection-level capacity only, as for padding or DATA on
    /// streams that are gone.
    pub fn release_connection(&mut self, n: usize) -> Option<u32> {
        if n == 0 {
            return None;
        }
        self.recv_pending = self.recv_pending.checked_add(u32::try_from(n).ok()?)?;
        if self.recv_pending < (self.recv_target / 2).max(1) {
            return None;
        }
        let increment = std::mem::take(&mut self.recv_pending);
        self.recv.increase(increment).ok()?;
        Some(increment)
    }

    /// Apply a change of the peer's SETTINGS_INITIAL_WINDOW_SIZE to every
    /// stream's send window. Overflow is checked for all streams before any
    /// window changes.
    pub fn apply_remote_initial_window(&mut self, streams: &mut Streams, new: u32) -> Result<(), H2Error> {
        let delta = new as i64 - streams.send_initial() as i64;
        if streams
            .iter()
            .any(|s| s.send_window.get() + delta > MAX_WINDOW_SIZE)
        {
            return Err(H2Error::connection(
                ErrorCode::FlowControlError,
                "SETTINGS_INITIAL_WINDOW_SIZE change overflows a stream window",
            ));
        }
        for stream in streams.iter_mut() {
            let _ = stream.send_window.adjust(delta);
        }
        streams.set_send_initial(new);
        Ok(())
    }

    /// Apply our acknowledged SETTINGS_INITIAL_WINDOW_SIZE to every stream's
    /// receive window.
    pub fn apply_local_initial_window(&mut self, streams: &mut Streams, new: u32) {
        let delta = new as i64 - streams.recv_initial() as i64;
        for stream in streams.iter_mut() {
            let _ = stream.recv_window.adjust(delta);
        }
        streams.set_recv_initial(new);
    }
}

fn debit_stream(stream: &mut Stream, n: usize) -> Result<(), H2Error> {
    stream.recv_window.consume(n).map_err(|_| {
        H2Error::stream(
            stream.id,
            ErrorCode::FlowControlError,
            format!("DATA of {n} bytes exceeds stream receive window"),
        )
    })?;
    stream.unreleased += n;
    Ok(())
}
