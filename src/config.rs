//! Connection configuration.

use std::time::Duration;

use crate::error::UserError;
use crate::h2_codec::MAX_HEADER_BLOCK_SIZE;
use crate::hpack::DEFAULT_ENCODER_TABLE_LIMIT;
use crate::settings::{Settings, DEFAULT_INITIAL_WINDOW_SIZE};

pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 100;
pub const DEFAULT_RESET_STREAM_MEMORY: usize = 64;

/// Local behaviour of a connection. The `settings` are announced to the peer
/// in our first SETTINGS frame.
///
/// ```rust
/// use std::time::Duration;
/// use h2_mux::Config;
///
/// let config = Config::default()
///     .initial_window_size(1 << 20)
///     .max_concurrent_streams(256)
///     .keepalive_interval(Duration::from_secs(30));
/// assert_eq!(config.settings.initial_window_size, 1 << 20);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub settings: Settings,
    /// Connection-level receive window, grown from 65535 with a WINDOW_UPDATE
    /// right after the preface.
    pub connection_window_size: u32,
    /// Cap on an assembled HEADERS + CONTINUATION block.
    pub max_header_block_size: usize,
    /// Ceiling on the HPACK encoder table, however large a table the peer
    /// offers.
    pub encoder_table_limit: usize,
    /// How long a drain after GOAWAY may take before the connection is
    /// closed abruptly.
    pub graceful_shutdown_timeout: Duration,
    /// How long the peer has to acknowledge our SETTINGS.
    pub settings_timeout: Duration,
    /// Idle time before a keepalive PING; `None` disables keepalive.
    pub keepalive_interval: Option<Duration>,
    /// How long to wait for the keepalive PING ACK.
    pub keepalive_timeout: Duration,
    /// Release received DATA for WINDOW_UPDATE as soon as it is delivered.
    /// When false the application calls `release_capacity`.
    pub auto_release_capacity: bool,
    /// Locally reset stream ids remembered so that late frames on them are
    /// ignored.
    pub reset_stream_memory: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings: Settings {
                max_concurrent_streams: Some(DEFAULT_MAX_CONCURRENT_STREAMS),
                ..Settings::default()
            },
            connection_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_header_block_size: MAX_HEADER_BLOCK_SIZE,
            encoder_table_limit: DEFAULT_ENCODER_TABLE_LIMIT,
            graceful_shutdown_timeout: Duration::from_secs(30),
            settings_timeout: Duration::from_secs(10),
            keepalive_interval: None,
            keepalive_timeout: Duration::from_secs(20),
            auto_release_capacity: false,
            reset_stream_memory: DEFAULT_RESET_STREAM_MEMORY,
        }
    }
}

impl Config {
    pub fn header_table_size(mut self, size: u32) -> Self {
        self.settings.header_table_size = size;
        self
    }

    pub fn enable_push(mut self, enabled: bool) -> Self {
        self.settings.enable_push = enabled;
        self
    }

    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings.max_concurrent_streams = Some(max);
        self
    }

    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings.initial_window_size = size;
        self
    }

    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings.max_frame_size = size;
        self
    }

    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.settings.max_header_list_size = Some(size);
        self
    }

    pub fn connection_window_size(mut self, size: u32) -> Self {
        self.connection_window_size = size;
        self
    }

    pub fn max_header_block_size(mut self, size: usize) -> Self {
        self.max_header_block_size = size;
        self
    }

    pub fn encoder_table_limit(mut self, limit: usize) -> Self {
        self.encoder_table_limit = limit;
        self
    }

    pub fn graceful_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_shutdown_timeout = timeout;
        self
    }

    pub fn settings_timeout(mut self, timeout: Duration) -> Self {
        self.settings_timeout = timeout;
        self
    }

    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = Some(interval);
        self
    }

    pub fn keepalive_timeout(mut self, timeout: Duration) -> Self {
        self.keepalive_timeout = timeout;
        self
    }

    pub fn auto_release_capacity(mut self, enabled: bool) -> Self {
        self.auto_release_capacity = enabled;
        self
    }

    pub fn reset_stream_memory(mut self, count: usize) -> Self {
        self.reset_stream_memory = count;
        self
    }

    pub fn validate(&self) -> Result<(), UserError> {
        self.settings.validate()?;
        if self.connection_window_size as i64 > crate::flow::MAX_WINDOW_SIZE {
            return Err(UserError::InvalidSetting(
                "connection_window_size exceeds 2^31-1",
            ));
        }
        Ok(())
    }
}
