//! Commands submitted from other threads.
//!
//! A [`Connection`] is owned by one context. Other threads hold a
//! [`CommandSender`] and the owner drains the matching [`CommandQueue`]
//! between I/O rounds, applying commands in submission order.

use std::sync::mpsc;

use bytes::Bytes;

use crate::connection::Connection;
use crate::error::{ErrorCode, UserError};
use crate::frame::Priority;
use crate::hpack::H2Header;
use crate::settings::Settings;

/// One application command, mirroring the `Connection` methods.
#[derive(Debug, Clone)]
pub enum Command {
    OpenStream {
        headers: Vec<H2Header>,
        end_stream: bool,
    },
    SendHeaders {
        stream_id: u32,
        headers: Vec<H2Header>,
        end_stream: bool,
    },
    SendData {
        stream_id: u32,
        data: Bytes,
        end_stream: bool,
    },
    ResetStream {
        stream_id: u32,
        error_code: ErrorCode,
    },
    PushPromise {
        stream_id: u32,
        headers: Vec<H2Header>,
    },
    SetPriority {
        stream_id: u32,
        priority: Priority,
    },
    ReleaseCapacity {
        stream_id: u32,
        n: usize,
    },
    UpdateSettings(Settings),
    Ping([u8; 8]),
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: Bytes,
    },
    GracefulShutdown,
}

/// Result of a successfully applied command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Done,
    /// `OpenStream` or `PushPromise` allocated this id.
    StreamOpened(u32),
    /// `SendData` wrote this many bytes.
    Written(usize),
}

#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<Command>,
}

impl CommandSender {
    /// Queue a command. Fails once the queue has been dropped.
    pub fn send(&self, command: Command) -> Result<(), UserError> {
        self.tx.send(command).map_err(|_| UserError::ConnectionClosed)
    }
}

#[derive(Debug)]
pub struct CommandQueue {
    rx: mpsc::Receiver<Command>,
}

impl CommandQueue {
    /// Next queued command, without blocking.
    pub fn try_next(&self) -> Option<Command> {
        self.rx.try_recv().ok()
    }
}

pub fn channel() -> (CommandSender, CommandQueue) {
    let (tx, rx) = mpsc::channel();
    (CommandSender { tx }, CommandQueue { rx })
}

impl Connection {
    pub fn apply(&mut self, command: Command) -> Result<CommandOutcome, UserError> {
        match command {
            Command::OpenStream {
                headers,
                end_stream,
            } => self
                .open_stream(&headers, end_stream)
                .map(CommandOutcome::StreamOpened),
            Command::SendHeaders {
                stream_id,
                headers,
                end_stream,
            } => self
                .send_headers(stream_id, &headers, end_stream)
                .map(|_| CommandOutcome::Done),
            Command::SendData {
                stream_id,
                data,
                end_stream,
            } => self
                .send_data(stream_id, data, end_stream)
                .map(CommandOutcome::Written),
            Command::ResetStream {
                stream_id,
                error_code,
            } => self
                .reset_stream(stream_id, error_code)
                .map(|_| CommandOutcome::Done),
            Command::PushPromise { stream_id, headers } => self
                .push_promise(stream_id, &headers)
                .map(CommandOutcome::StreamOpened),
            Command::SetPriority {
                stream_id,
                priority,
            } => self
                .set_priority(stream_id, priority)
                .map(|_| CommandOutcome::Done),
            Command::ReleaseCapacity { stream_id, n } => self
                .release_capacity(stream_id, n)
                .map(|_| CommandOutcome::Done),
            Command::UpdateSettings(settings) => self
                .update_settings(settings)
                .map(|_| CommandOutcome::Done),
            Command::Ping(payload) => self.ping(payload).map(|_| CommandOutcome::Done),
            Command::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => self
                .go_away(last_stream_id, error_code, debug_data)
                .map(|_| CommandOutcome::Done),
            Command::GracefulShutdown => self.graceful_shutdown().map(|_| CommandOutcome::Done),
        }
    }

    /// Apply every queued command in order, returning each outcome.
    pub fn apply_queued(&mut self, queue: &CommandQueue) -> Vec<Result<CommandOutcome, UserError>> {
        let mut outcomes = Vec::new();
        while let Some(command) = queue.try_next() {
            outcomes.push(self.apply(command));
        }
        outcomes
    }
}
