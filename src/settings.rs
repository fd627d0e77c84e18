//! SETTINGS parameters (RFC 7540 Section 6.5).

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{ErrorCode, H2Error, UserError};

/// HTTP/2 SETTINGS identifiers (RFC 7540 Section 6.5.2)
pub mod settings_id {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;
}

pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4_096;
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
pub const MAX_MAX_FRAME_SIZE: u32 = 16_777_215;
pub const MAX_INITIAL_WINDOW_SIZE: u32 = 0x7fff_ffff;

/// Size of one encoded setting on the wire.
pub const SETTING_LEN: usize = 6;

/// A single SETTINGS parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    HeaderTableSize(u32),
    EnablePush(bool),
    MaxConcurrentStreams(u32),
    InitialWindowSize(u32),
    MaxFrameSize(u32),
    MaxHeaderListSize(u32),
}

impl Setting {
    /// Decode one identifier/value pair, validating the value.
    ///
    /// Unknown identifiers yield `Ok(None)` and must be ignored.
    pub fn decode(id: u16, value: u32) -> Result<Option<Self>, H2Error> {
        let setting = match id {
            settings_id::HEADER_TABLE_SIZE => Self::HeaderTableSize(value),
            settings_id::ENABLE_PUSH => match value {
                0 => Self::EnablePush(false),
                1 => Self::EnablePush(true),
                _ => {
                    return Err(H2Error::protocol(format!(
                        "SETTINGS_ENABLE_PUSH must be 0 or 1, got {value}"
                    )))
                }
            },
            settings_id::MAX_CONCURRENT_STREAMS => Self::MaxConcurrentStreams(value),
            settings_id::INITIAL_WINDOW_SIZE => {
                if value > MAX_INITIAL_WINDOW_SIZE {
                    return Err(H2Error::connection(
                        ErrorCode::FlowControlError,
                        format!("SETTINGS_INITIAL_WINDOW_SIZE {value} exceeds 2^31-1"),
                    ));
                }
                Self::InitialWindowSize(value)
            }
            settings_id::MAX_FRAME_SIZE => {
                if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&value) {
                    return Err(H2Error::protocol(format!(
                        "SETTINGS_MAX_FRAME_SIZE {value} out of range"
                    )));
                }
                Self::MaxFrameSize(value)
            }
            settings_id::MAX_HEADER_LIST_SIZE => Self::MaxHeaderListSize(value),
            _ => return Ok(None),
        };
        Ok(Some(setting))
    }

    pub fn id(&self) -> u16 {
        match self {
            Self::HeaderTableSize(_) => settings_id::HEADER_TABLE_SIZE,
            Self::EnablePush(_) => settings_id::ENABLE_PUSH,
            Self::MaxConcurrentStreams(_) => settings_id::MAX_CONCURRENT_STREAMS,
            Self::InitialWindowSize(_) => settings_id::INITIAL_WINDOW_SIZE,
            Self::MaxFrameSize(_) => settings_id::MAX_FRAME_SIZE,
            Self::MaxHeaderListSize(_) => settings_id::MAX_HEADER_LIST_SIZE,
        }
    }

    pub fn value(&self) -> u32 {
        match *self {
            Self::EnablePush(enabled) => enabled as u32,
            Self::HeaderTableSize(v)
            | Self::MaxConcurrentStreams(v)
            | Self::InitialWindowSize(v)
            | Self::MaxFrameSize(v)
            | Self::MaxHeaderListSize(v) => v,
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.id());
        dst.put_u32(self.value());
    }
}

/// Decode a SETTINGS payload into its parameters, in wire order.
///
/// Every value is validated before any is returned, so a bad parameter never
/// leaves a half-applied SETTINGS frame behind.
pub fn decode_payload(mut payload: &[u8]) -> Result<Vec<Setting>, H2Error> {
    if payload.len() % SETTING_LEN != 0 {
        return Err(H2Error::frame_size(format!(
            "SETTINGS payload length {} is not a multiple of 6",
            payload.len()
        )));
    }
    let mut settings = Vec::with_capacity(payload.len() / SETTING_LEN);
    while payload.has_remaining() {
        let id = payload.get_u16();
        let value = payload.get_u32();
        if let Some(setting) = Setting::decode(id, value)? {
            settings.push(setting);
        }
    }
    Ok(settings)
}

pub fn encode_payload(settings: &[Setting], dst: &mut BytesMut) {
    dst.reserve(settings.len() * SETTING_LEN);
    for setting in settings {
        setting.encode(dst);
    }
}

/// The full set of SETTINGS values in force for one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: u32,
    pub enable_push: bool,
    /// `None` means unlimited.
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    /// `None` means unlimited.
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    pub fn apply(&mut self, setting: Setting) {
        match setting {
            Setting::HeaderTableSize(v) => self.header_table_size = v,
            Setting::EnablePush(v) => self.enable_push = v,
            Setting::MaxConcurrentStreams(v) => self.max_concurrent_streams = Some(v),
            Setting::InitialWindowSize(v) => self.initial_window_size = v,
            Setting::MaxFrameSize(v) => self.max_frame_size = v,
            Setting::MaxHeaderListSize(v) => self.max_header_list_size = Some(v),
        }
    }

    pub fn apply_all(&mut self, settings: &[Setting]) {
        for setting in settings {
            self.apply(*setting);
        }
    }

    /// Parameters that differ from the RFC defaults, as announced in a
    /// connection's first SETTINGS frame.
    pub fn to_list(&self) -> Vec<Setting> {
        Settings::default().diff(self)
    }

    /// Parameters needed to move a peer from `self` to `next`.
    pub fn diff(&self, next: &Settings) -> Vec<Setting> {
        let mut list = Vec::new();
        if self.header_table_size != next.header_table_size {
            list.push(Setting::HeaderTableSize(next.header_table_size));
        }
        if self.enable_push != next.enable_push {
            list.push(Setting::EnablePush(next.enable_push));
        }
        if self.max_concurrent_streams != next.max_concurrent_streams {
            if let Some(v) = next.max_concurrent_streams {
                list.push(Setting::MaxConcurrentStreams(v));
            }
        }
        if self.initial_window_size != next.initial_window_size {
            list.push(Setting::InitialWindowSize(next.initial_window_size));
        }
        if self.max_frame_size != next.max_frame_size {
            list.push(Setting::MaxFrameSize(next.max_frame_size));
        }
        if self.max_header_list_size != next.max_header_list_size {
            if let Some(v) = next.max_header_list_size {
                list.push(Setting::MaxHeaderListSize(v));
            }
        }
        list
    }

    /// Check locally chosen values before they are announced.
    pub fn validate(&self) -> Result<(), UserError> {
        if self.initial_window_size > MAX_INITIAL_WINDOW_SIZE {
            return Err(UserError::InvalidSetting("initial_window_size exceeds 2^31-1"));
        }
        if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&self.max_frame_size) {
            return Err(UserError::InvalidSetting("max_frame_size out of range"));
        }
        Ok(())
    }
}
