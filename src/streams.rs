//! Stream registry: the single owner of every live [`Stream`].
//!
//! Tracks id allocation per initiator, the highest id the peer has used,
//! concurrency limits in both directions, and a bounded memory of recently
//! closed ids so leftover frames can be told apart from protocol violations.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::error::{H2Error, UserError};
use crate::frame::MAX_STREAM_ID;
use crate::settings::DEFAULT_INITIAL_WINDOW_SIZE;
use crate::stream::{Stream, StreamState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// Whether `stream_id` is initiated by an endpoint with this role.
    pub fn initiates(&self, stream_id: u32) -> bool {
        match self {
            Role::Client => stream_id % 2 == 1,
            Role::Server => stream_id % 2 == 0 && stream_id != 0,
        }
    }
}

/// How a stream left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    /// We sent RST_STREAM; the peer may still have frames in flight.
    LocalReset,
    /// END_STREAM in both directions, or the peer's RST_STREAM.
    Finished,
}

/// What the registry knows about a stream id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Active(StreamState),
    /// Never used.
    Idle,
    /// Closed recently, with the reason.
    Closed(CloseCause),
    /// Used or skipped earlier and no longer remembered.
    Forgotten,
}

#[derive(Debug)]
pub struct Streams {
    role: Role,
    streams: HashMap<u32, Stream>,
    /// Next id for a stream we initiate; `None` once ids are exhausted.
    next_local_id: Option<u32>,
    /// Highest id the peer has opened or promised.
    highest_remote_id: u32,
    /// Our SETTINGS_MAX_CONCURRENT_STREAMS, applied to peer streams.
    local_max_concurrent: Option<u32>,
    /// The peer's SETTINGS_MAX_CONCURRENT_STREAMS, applied to our streams.
    remote_max_concurrent: Option<u32>,
    closed: VecDeque<(u32, CloseCause)>,
    closed_memory: usize,
    send_initial: u32,
    recv_initial: u32,
}

impl Streams {
    pub fn new(role: Role, closed_memory: usize) -> Self {
        Self {
            role,
            streams: HashMap::new(),
            next_local_id: Some(match role {
                Role::Client => 1,
                Role::Server => 2,
            }),
            highest_remote_id: 0,
            local_max_concurrent: None,
            remote_max_concurrent: None,
            closed: VecDeque::new(),
            closed_memory,
            send_initial: DEFAULT_INITIAL_WINDOW_SIZE,
            recv_initial: DEFAULT_INITIAL_WINDOW_SIZE,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn get(&self, stream_id: u32) -> Option<&Stream> {
        self.streams.get(&stream_id)
    }

    pub fn get_mut(&mut self, stream_id: u32) -> Option<&mut Stream> {
        self.streams.get_mut(&stream_id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stream> {
        self.streams.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Stream> {
        self.streams.values_mut()
    }

    /// Live stream ids in ascending order.
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.streams.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_local(&self, stream_id: u32) -> bool {
        self.role.initiates(stream_id)
    }

    pub fn highest_remote_id(&self) -> u32 {
        self.highest_remote_id
    }

    /// Id the next locally opened stream will get.
    pub fn next_local_id(&self) -> Option<u32> {
        self.next_local_id
    }

    pub fn send_initial(&self) -> u32 {
        self.send_initial
    }

    pub fn recv_initial(&self) -> u32 {
        self.recv_initial
    }

    pub(crate) fn set_send_initial(&mut self, size: u32) {
        self.send_initial = size;
    }

    pub(crate) fn set_recv_initial(&mut self, size: u32) {
        self.recv_initial = size;
    }

    pub fn set_local_max_concurrent(&mut self, max: Option<u32>) {
        self.local_max_concurrent = max;
    }

    pub fn set_remote_max_concurrent(&mut self, max: Option<u32>) {
        self.remote_max_concurrent = max;
    }

    /// Open or half-closed streams started by us (`local`) or by the peer.
    pub fn active_count(&self, local: bool) -> usize {
        self.streams
            .values()
            .filter(|s| s.state.is_active() && self.is_local(s.id) == local)
            .count()
    }

    /// The peer has as many active streams as our SETTINGS allow.
    pub fn remote_at_capacity(&self) -> bool {
        match self.local_max_concurrent {
            Some(max) => self.active_count(false) >= max as usize,
            None => false,
        }
    }

    pub fn lookup(&self, stream_id: u32) -> Lookup {
        if let Some(stream) = self.streams.get(&stream_id) {
            return Lookup::Active(stream.state);
        }
        if let Some((_, cause)) = self.closed.iter().find(|(id, _)| *id == stream_id) {
            return Lookup::Closed(*cause);
        }
        let used = if self.is_local(stream_id) {
            match self.next_local_id {
                Some(next) => stream_id < next,
                None => true,
            }
        } else {
            stream_id <= self.highest_remote_id
        };
        if used {
            Lookup::Forgotten
        } else {
            Lookup::Idle
        }
    }

    /// Allocate the next local id and register an idle stream for it.
    pub fn open_local(&mut self) -> Result<u32, UserError> {
        if let Some(max) = self.remote_max_concurrent {
            if self.active_count(true) >= max as usize {
                return Err(UserError::ConcurrencyLimit);
            }
        }
        self.allocate_local()
    }

    /// Allocate an id for a server push. Reserved streams do not count
    /// towards the concurrency limit until they open.
    pub fn reserve_local_push(&mut self) -> Result<u32, UserError> {
        if self.role != Role::Server {
            return Err(UserError::PushNotAllowed);
        }
        self.allocate_local()
    }

    fn allocate_local(&mut self) -> Result<u32, UserError> {
        let id = self.next_local_id.ok_or(UserError::StreamIdsExhausted)?;
        self.next_local_id = id.checked_add(2).filter(|next| *next <= MAX_STREAM_ID);
        self.insert(id, StreamState::Idle);
        Ok(id)
    }

    /// Register a peer-initiated stream from HEADERS or PUSH_PROMISE.
    ///
    /// The id must have the peer's parity and be above every id the peer has
    /// used before.
    pub fn open_remote(&mut self, stream_id: u32) -> Result<(), H2Error> {
        if self.is_local(stream_id) {
            return Err(H2Error::protocol(format!(
                "peer used stream {stream_id} with our parity"
            )));
        }
        if stream_id <= self.highest_remote_id {
            return Err(H2Error::protocol(format!(
                "stream id {stream_id} behind next expected {}",
                self.highest_remote_id + 2
            )));
        }
        self.highest_remote_id = stream_id;
        self.insert(stream_id, StreamState::Idle);
        Ok(())
    }

    /// Record a peer-initiated id that is refused or ignored without creating
    /// a stream, so later frames on it read as closed.
    pub fn skip_remote(&mut self, stream_id: u32) {
        if !self.is_local(stream_id) && stream_id > self.highest_remote_id {
            self.highest_remote_id = stream_id;
        }
    }

    /// Create a stream in an arbitrary starting state, as for stream 1 after
    /// an HTTP/1.1 upgrade.
    pub fn insert_upgraded(&mut self, stream_id: u32, state: StreamState) {
        if self.is_local(stream_id) {
            if self.next_local_id.is_some_and(|next| next <= stream_id) {
                self.next_local_id = stream_id.checked_add(2);
            }
        } else {
            self.highest_remote_id = self.highest_remote_id.max(stream_id);
        }
        self.insert(stream_id, state);
    }

    fn insert(&mut self, stream_id: u32, state: StreamState) {
        debug!(stream_id, ?state, "stream created");
        self.streams.insert(
            stream_id,
            Stream::new(stream_id, state, self.send_initial, self.recv_initial),
        );
    }

    /// Remove a stream, remembering why it closed.
    pub fn remove(&mut self, stream_id: u32, cause: CloseCause) -> Option<Stream> {
        let stream = self.streams.remove(&stream_id)?;
        self.remember_closed(stream_id, cause);
        Some(stream)
    }

    /// Remove the stream if its state machine has reached `Closed`.
    pub fn remove_if_closed(&mut self, stream_id: u32) -> Option<Stream> {
        if self.get(stream_id)?.state.is_closed() {
            self.remove(stream_id, CloseCause::Finished)
        } else {
            None
        }
    }

    /// Remember an id that was reset without ever being registered.
    pub fn remember_closed(&mut self, stream_id: u32, cause: CloseCause) {
        if self.closed_memory == 0 {
            return;
        }
        if self.closed.len() == self.closed_memory {
            self.closed.pop_front();
        }
        self.closed.push_back((stream_id, cause));
    }

    /// Take every stream out of the registry, ascending by id.
    pub fn drain(&mut self) -> Vec<Stream> {
        let mut all: Vec<Stream> = self.streams.drain().map(|(_, s)| s).collect();
        all.sort_unstable_by_key(|s| s.id);
        all
    }
}
