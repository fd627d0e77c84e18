//! HTTP/2 frame grammar (RFC 7540 Section 4 and 6).
//!
//! [`FrameHeader`] is the fixed 9-byte prefix. [`Frame`] is one typed frame
//! with owned payload slices; [`Frame::parse`] validates a payload against its
//! header and [`Frame::encode`] writes it back out bit-exact.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ErrorCode, H2Error};
use crate::settings::{self, Setting};

/// HTTP/2 frame types (RFC 7540 Section 6)
pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;

    pub fn name(frame_type: u8) -> &'static str {
        match frame_type {
            DATA => "DATA",
            HEADERS => "HEADERS",
            PRIORITY => "PRIORITY",
            RST_STREAM => "RST_STREAM",
            SETTINGS => "SETTINGS",
            PUSH_PROMISE => "PUSH_PROMISE",
            PING => "PING",
            GOAWAY => "GOAWAY",
            WINDOW_UPDATE => "WINDOW_UPDATE",
            CONTINUATION => "CONTINUATION",
            _ => "UNKNOWN",
        }
    }
}

/// HTTP/2 frame flags
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

pub const FRAME_HEADER_LEN: usize = 9;

/// Largest valid stream identifier (31 bits).
pub const MAX_STREAM_ID: u32 = 0x7fff_ffff;

/// The HTTP/2 connection preface (24 bytes)
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Check if data starts with HTTP/2 connection preface (h2c detection)
pub fn is_h2c_preface(data: &[u8]) -> bool {
    data.starts_with(CONNECTION_PREFACE)
}

/// A parsed HTTP/2 frame header (9 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// 24 bits
    pub length: u32,
    pub frame_type: u8,
    pub flags: u8,
    /// 31 bits, reserved bit cleared
    pub stream_id: u32,
}

impl FrameHeader {
    pub fn new(frame_type: u8, flags: u8, stream_id: u32, length: u32) -> Self {
        Self {
            length,
            frame_type,
            flags,
            stream_id,
        }
    }

    /// Parse a 9-byte frame header
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_HEADER_LEN {
            return None;
        }
        let mut buf = &data[..FRAME_HEADER_LEN];
        let length = buf.get_uint(3) as u32;
        let frame_type = buf.get_u8();
        let flags = buf.get_u8();
        let stream_id = buf.get_u32() & MAX_STREAM_ID;
        Some(Self {
            length,
            frame_type,
            flags,
            stream_id,
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(FRAME_HEADER_LEN + self.length as usize);
        dst.put_uint(self.length as u64, 3);
        dst.put_u8(self.frame_type);
        dst.put_u8(self.flags);
        dst.put_u32(self.stream_id & MAX_STREAM_ID);
    }

    /// Total frame size including header
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_LEN + self.length as usize
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    pub fn is_end_stream(&self) -> bool {
        self.has_flag(flags::END_STREAM)
    }

    pub fn is_end_headers(&self) -> bool {
        self.has_flag(flags::END_HEADERS)
    }

    pub fn is_ack(&self) -> bool {
        self.has_flag(flags::ACK)
    }
}

/// Stream dependency carried by PRIORITY frames and prioritized HEADERS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub dependency: u32,
    pub exclusive: bool,
    /// 1 to 256; the wire carries `weight - 1`.
    pub weight: u16,
}

impl Default for Priority {
    fn default() -> Self {
        Self {
            dependency: 0,
            exclusive: false,
            weight: Self::DEFAULT_WEIGHT,
        }
    }
}

impl Priority {
    pub const DEFAULT_WEIGHT: u16 = 16;
    pub const LEN: usize = 5;

    fn decode(buf: &mut Bytes) -> Self {
        let raw = buf.get_u32();
        Self {
            dependency: raw & MAX_STREAM_ID,
            exclusive: raw & !MAX_STREAM_ID != 0,
            weight: buf.get_u8() as u16 + 1,
        }
    }

    fn encode(&self, dst: &mut BytesMut) {
        let mut raw = self.dependency & MAX_STREAM_ID;
        if self.exclusive {
            raw |= !MAX_STREAM_ID;
        }
        dst.put_u32(raw);
        dst.put_u8(self.weight.clamp(1, 256).wrapping_sub(1) as u8);
    }
}

/// One HTTP/2 frame with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        stream_id: u32,
        data: Bytes,
        end_stream: bool,
        /// Pad length when the PADDED flag was set.
        pad_len: Option<u8>,
    },
    Headers {
        stream_id: u32,
        priority: Option<Priority>,
        header_block: Bytes,
        end_stream: bool,
        end_headers: bool,
    },
    Priority {
        stream_id: u32,
        priority: Priority,
    },
    RstStream {
        stream_id: u32,
        error_code: ErrorCode,
    },
    Settings {
        ack: bool,
        settings: Vec<Setting>,
    },
    PushPromise {
        stream_id: u32,
        promised_id: u32,
        header_block: Bytes,
        end_headers: bool,
    },
    Ping {
        ack: bool,
        payload: [u8; 8],
    },
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: Bytes,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Continuation {
        stream_id: u32,
        header_block: Bytes,
        end_headers: bool,
    },
    /// Extension frame; ignored by the connection.
    Unknown {
        frame_type: u8,
        stream_id: u32,
    },
}

impl Frame {
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Data { stream_id, .. }
            | Frame::Headers { stream_id, .. }
            | Frame::Priority { stream_id, .. }
            | Frame::RstStream { stream_id, .. }
            | Frame::PushPromise { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. }
            | Frame::Continuation { stream_id, .. }
            | Frame::Unknown { stream_id, .. } => *stream_id,
            Frame::Settings { .. } | Frame::Ping { .. } | Frame::GoAway { .. } => 0,
        }
    }

    pub fn frame_type(&self) -> u8 {
        match self {
            Frame::Data { .. } => frame_type::DATA,
            Frame::Headers { .. } => frame_type::HEADERS,
            Frame::Priority { .. } => frame_type::PRIORITY,
            Frame::RstStream { .. } => frame_type::RST_STREAM,
            Frame::Settings { .. } => frame_type::SETTINGS,
            Frame::PushPromise { .. } => frame_type::PUSH_PROMISE,
            Frame::Ping { .. } => frame_type::PING,
            Frame::GoAway { .. } => frame_type::GOAWAY,
            Frame::WindowUpdate { .. } => frame_type::WINDOW_UPDATE,
            Frame::Continuation { .. } => frame_type::CONTINUATION,
            Frame::Unknown { frame_type, .. } => *frame_type,
        }
    }

    /// Bytes of a DATA frame counted against flow-control windows: the data
    /// plus any padding and the pad length octet.
    pub fn flow_controlled_len(&self) -> usize {
        match self {
            Frame::Data { data, pad_len, .. } => {
                data.len() + pad_len.map_or(0, |pad| pad as usize + 1)
            }
            _ => 0,
        }
    }

    /// Validate `payload` against `header` and build the typed frame.
    ///
    /// The payload length must already have been checked against
    /// SETTINGS_MAX_FRAME_SIZE.
    pub fn parse(header: FrameHeader, mut payload: Bytes) -> Result<Self, H2Error> {
        let stream_id = header.stream_id;
        let name = frame_type::name(header.frame_type);
        match header.frame_type {
            frame_type::DATA => {
                require_stream(&header)?;
                let pad_len = strip_padding(&header, &mut payload)?;
                Ok(Frame::Data {
                    stream_id,
                    data: payload,
                    end_stream: header.is_end_stream(),
                    pad_len,
                })
            }
            frame_type::HEADERS => {
                require_stream(&header)?;
                strip_padding(&header, &mut payload)?;
                let priority = if header.has_flag(flags::PRIORITY) {
                    if payload.len() < Priority::LEN {
                        return Err(H2Error::frame_size(
                            "HEADERS with PRIORITY flag too short",
                        ));
                    }
                    Some(Priority::decode(&mut payload))
                } else {
                    None
                };
                Ok(Frame::Headers {
                    stream_id,
                    priority,
                    header_block: payload,
                    end_stream: header.is_end_stream(),
                    end_headers: header.is_end_headers(),
                })
            }
            frame_type::PRIORITY => {
                require_stream(&header)?;
                if payload.len() != Priority::LEN {
                    return Err(H2Error::stream(
                        stream_id,
                        ErrorCode::FrameSizeError,
                        format!("PRIORITY payload is {} bytes", payload.len()),
                    ));
                }
                Ok(Frame::Priority {
                    stream_id,
                    priority: Priority::decode(&mut payload),
                })
            }
            frame_type::RST_STREAM => {
                require_stream(&header)?;
                expect_len(name, &payload, 4)?;
                Ok(Frame::RstStream {
                    stream_id,
                    error_code: ErrorCode::from_u32(payload.get_u32()),
                })
            }
            frame_type::SETTINGS => {
                require_connection(&header)?;
                if header.is_ack() {
                    expect_len(name, &payload, 0)?;
                    return Ok(Frame::Settings {
                        ack: true,
                        settings: Vec::new(),
                    });
                }
                Ok(Frame::Settings {
                    ack: false,
                    settings: settings::decode_payload(&payload)?,
                })
            }
            frame_type::PUSH_PROMISE => {
                require_stream(&header)?;
                strip_padding(&header, &mut payload)?;
                if payload.len() < 4 {
                    return Err(H2Error::frame_size("PUSH_PROMISE too short"));
                }
                let promised_id = payload.get_u32() & MAX_STREAM_ID;
                Ok(Frame::PushPromise {
                    stream_id,
                    promised_id,
                    header_block: payload,
                    end_headers: header.is_end_headers(),
                })
            }
            frame_type::PING => {
                require_connection(&header)?;
                expect_len(name, &payload, 8)?;
                let mut data = [0u8; 8];
                payload.copy_to_slice(&mut data);
                Ok(Frame::Ping {
                    ack: header.is_ack(),
                    payload: data,
                })
            }
            frame_type::GOAWAY => {
                require_connection(&header)?;
                if payload.len() < 8 {
                    return Err(H2Error::frame_size("GOAWAY too short"));
                }
                let last_stream_id = payload.get_u32() & MAX_STREAM_ID;
                let error_code = ErrorCode::from_u32(payload.get_u32());
                Ok(Frame::GoAway {
                    last_stream_id,
                    error_code,
                    debug_data: payload,
                })
            }
            frame_type::WINDOW_UPDATE => {
                expect_len(name, &payload, 4)?;
                let increment = payload.get_u32() & MAX_STREAM_ID;
                if increment == 0 {
                    let reason = "WINDOW_UPDATE with zero increment";
                    return Err(if stream_id == 0 {
                        H2Error::protocol(reason)
                    } else {
                        H2Error::stream(stream_id, ErrorCode::ProtocolError, reason)
                    });
                }
                Ok(Frame::WindowUpdate {
                    stream_id,
                    increment,
                })
            }
            frame_type::CONTINUATION => {
                require_stream(&header)?;
                Ok(Frame::Continuation {
                    stream_id,
                    header_block: payload,
                    end_headers: header.is_end_headers(),
                })
            }
            other => Ok(Frame::Unknown {
                frame_type: other,
                stream_id,
            }),
        }
    }

    /// Serialize this frame as a single wire frame.
    ///
    /// Header blocks are written as-is; use [`encode_headers`] to split a
    /// block that may exceed the peer's frame size.
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Frame::Data {
                stream_id,
                data,
                end_stream,
                pad_len,
            } => {
                let mut fl = if *end_stream { flags::END_STREAM } else { 0 };
                if pad_len.is_some() {
                    fl |= flags::PADDED;
                }
                let len = self.flow_controlled_len();
                FrameHeader::new(frame_type::DATA, fl, *stream_id, len as u32).encode(dst);
                if let Some(pad) = pad_len {
                    dst.put_u8(*pad);
                }
                dst.put_slice(data);
                if let Some(pad) = pad_len {
                    dst.put_bytes(0, *pad as usize);
                }
            }
            Frame::Headers {
                stream_id,
                priority,
                header_block,
                end_stream,
                end_headers,
            } => {
                let mut fl = 0;
                if *end_stream {
                    fl |= flags::END_STREAM;
                }
                if *end_headers {
                    fl |= flags::END_HEADERS;
                }
                let mut len = header_block.len();
                if priority.is_some() {
                    fl |= flags::PRIORITY;
                    len += Priority::LEN;
                }
                FrameHeader::new(frame_type::HEADERS, fl, *stream_id, len as u32).encode(dst);
                if let Some(priority) = priority {
                    priority.encode(dst);
                }
                dst.put_slice(header_block);
            }
            Frame::Priority {
                stream_id,
                priority,
            } => {
                FrameHeader::new(frame_type::PRIORITY, 0, *stream_id, Priority::LEN as u32)
                    .encode(dst);
                priority.encode(dst);
            }
            Frame::RstStream {
                stream_id,
                error_code,
            } => {
                FrameHeader::new(frame_type::RST_STREAM, 0, *stream_id, 4).encode(dst);
                dst.put_u32((*error_code).into());
            }
            Frame::Settings { ack, settings } => {
                let fl = if *ack { flags::ACK } else { 0 };
                let len = settings.len() * settings::SETTING_LEN;
                FrameHeader::new(frame_type::SETTINGS, fl, 0, len as u32).encode(dst);
                settings::encode_payload(settings, dst);
            }
            Frame::PushPromise {
                stream_id,
                promised_id,
                header_block,
                end_headers,
            } => {
                let fl = if *end_headers { flags::END_HEADERS } else { 0 };
                let len = 4 + header_block.len();
                FrameHeader::new(frame_type::PUSH_PROMISE, fl, *stream_id, len as u32)
                    .encode(dst);
                dst.put_u32(*promised_id & MAX_STREAM_ID);
                dst.put_slice(header_block);
            }
            Frame::Ping { ack, payload } => {
                let fl = if *ack { flags::ACK } else { 0 };
                FrameHeader::new(frame_type::PING, fl, 0, 8).encode(dst);
                dst.put_slice(payload);
            }
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                let len = 8 + debug_data.len();
                FrameHeader::new(frame_type::GOAWAY, 0, 0, len as u32).encode(dst);
                dst.put_u32(*last_stream_id & MAX_STREAM_ID);
                dst.put_u32((*error_code).into());
                dst.put_slice(debug_data);
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                FrameHeader::new(frame_type::WINDOW_UPDATE, 0, *stream_id, 4).encode(dst);
                dst.put_u32(*increment & MAX_STREAM_ID);
            }
            Frame::Continuation {
                stream_id,
                header_block,
                end_headers,
            } => {
                let fl = if *end_headers { flags::END_HEADERS } else { 0 };
                FrameHeader::new(
                    frame_type::CONTINUATION,
                    fl,
                    *stream_id,
                    header_block.len() as u32,
                )
                .encode(dst);
                dst.put_slice(header_block);
            }
            Frame::Unknown {
                frame_type,
                stream_id,
            } => {
                FrameHeader::new(*frame_type, 0, *stream_id, 0).encode(dst);
            }
        }
    }
}

/// Encode a header block as HEADERS plus as many CONTINUATION frames as
/// `max_frame_size` requires.
pub fn encode_headers(
    dst: &mut BytesMut,
    stream_id: u32,
    priority: Option<Priority>,
    mut block: Bytes,
    end_stream: bool,
    max_frame_size: usize,
) {
    let room = max_frame_size - if priority.is_some() { Priority::LEN } else { 0 };
    let first = block.split_to(room.min(block.len()));
    Frame::Headers {
        stream_id,
        priority,
        header_block: first,
        end_stream,
        end_headers: block.is_empty(),
    }
    .encode(dst);
    encode_continuations(dst, stream_id, block, max_frame_size);
}

/// Encode a PUSH_PROMISE header block, splitting it like [`encode_headers`].
pub fn encode_push_promise(
    dst: &mut BytesMut,
    stream_id: u32,
    promised_id: u32,
    mut block: Bytes,
    max_frame_size: usize,
) {
    let first = block.split_to((max_frame_size - 4).min(block.len()));
    Frame::PushPromise {
        stream_id,
        promised_id,
        header_block: first,
        end_headers: block.is_empty(),
    }
    .encode(dst);
    encode_continuations(dst, stream_id, block, max_frame_size);
}

fn encode_continuations(dst: &mut BytesMut, stream_id: u32, mut rest: Bytes, max_frame_size: usize) {
    while !rest.is_empty() {
        let chunk = rest.split_to(max_frame_size.min(rest.len()));
        Frame::Continuation {
            stream_id,
            header_block: chunk,
            end_headers: rest.is_empty(),
        }
        .encode(dst);
    }
}

fn require_stream(header: &FrameHeader) -> Result<(), H2Error> {
    if header.stream_id == 0 {
        return Err(H2Error::protocol(format!(
            "{} frame on stream 0",
            frame_type::name(header.frame_type)
        )));
    }
    Ok(())
}

fn require_connection(header: &FrameHeader) -> Result<(), H2Error> {
    if header.stream_id != 0 {
        return Err(H2Error::protocol(format!(
            "{} frame on stream {}",
            frame_type::name(header.frame_type),
            header.stream_id
        )));
    }
    Ok(())
}

fn expect_len(name: &str, payload: &Bytes, len: usize) -> Result<(), H2Error> {
    if payload.len() != len {
        return Err(H2Error::frame_size(format!(
            "{name} payload is {} bytes, expected {len}",
            payload.len()
        )));
    }
    Ok(())
}

/// Remove the pad length octet and trailing padding.
fn strip_padding(header: &FrameHeader, payload: &mut Bytes) -> Result<Option<u8>, H2Error> {
    if !header.has_flag(flags::PADDED) {
        return Ok(None);
    }
    if payload.is_empty() {
        return Err(H2Error::protocol(format!(
            "PADDED {} frame with no pad length",
            frame_type::name(header.frame_type)
        )));
    }
    let pad_len = payload.get_u8();
    if pad_len as usize > payload.len() {
        return Err(H2Error::protocol(format!(
            "padding of {pad_len} exceeds {} frame payload",
            frame_type::name(header.frame_type)
        )));
    }
    payload.truncate(payload.len() - pad_len as usize);
    Ok(Some(pad_len))
}
