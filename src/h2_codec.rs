//! Inbound HTTP/2 frame decoder.
//!
//! `H2Codec` buffers raw transport bytes and yields one [`Frame`] per call to
//! [`H2Codec::decode`]. It owns the only cross-frame state of the wire
//! grammar:
//! 1. The client connection preface (server role only)
//! 2. The negotiated SETTINGS_MAX_FRAME_SIZE
//! 3. Header block assembly: a HEADERS or PUSH_PROMISE without END_HEADERS must
//!    be followed only by CONTINUATION frames on the same stream
//!
//! Assembled header blocks are returned as a single `Frame::Headers` or
//! `Frame::PushPromise` with `end_headers` set; CONTINUATION never surfaces.

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::error::{ErrorCode, H2Error};
use crate::frame::{
    frame_type, Frame, FrameHeader, Priority, CONNECTION_PREFACE, FRAME_HEADER_LEN,
};
use crate::settings::DEFAULT_MAX_FRAME_SIZE;

/// Maximum accumulated header block size (256 KB).
/// Prevents unbounded memory growth from malicious/buggy CONTINUATION floods.
pub const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

/// Header block waiting for its END_HEADERS.
#[derive(Debug)]
struct PendingBlock {
    stream_id: u32,
    start: BlockStart,
    block: BytesMut,
}

#[derive(Debug)]
enum BlockStart {
    Headers {
        priority: Option<Priority>,
        end_stream: bool,
    },
    PushPromise {
        promised_id: u32,
    },
}

#[derive(Debug)]
pub struct H2Codec {
    /// Bytes not yet consumed as frames
    buffer: BytesMut,
    /// Server side: the client preface has not been seen yet
    expect_preface: bool,
    max_frame_size: u32,
    max_header_block_size: usize,
    pending: Option<PendingBlock>,
}

impl Default for H2Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl H2Codec {
    /// Codec for the client side of a connection: frames start immediately.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            expect_preface: false,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_block_size: MAX_HEADER_BLOCK_SIZE,
            pending: None,
        }
    }

    /// Codec for the server side: the 24-octet client preface comes first.
    pub fn server() -> Self {
        Self {
            expect_preface: true,
            ..Self::new()
        }
    }

    /// Largest frame payload accepted; tracks our acknowledged
    /// SETTINGS_MAX_FRAME_SIZE.
    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size;
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    pub fn set_max_header_block_size(&mut self, size: usize) {
        self.max_header_block_size = size;
    }

    pub fn preface_received(&self) -> bool {
        !self.expect_preface
    }

    /// Stream whose header block is still waiting for CONTINUATION frames.
    pub fn pending_headers_stream(&self) -> Option<u32> {
        self.pending.as_ref().map(|p| p.stream_id)
    }

    /// Number of buffered bytes not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append received bytes to the decode buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Decode the next complete frame from the buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Every error is a
    /// connection error except the stream-scoped ones [`Frame::parse`]
    /// reports for frames that carry no header block.
    pub fn decode(&mut self) -> Result<Option<Frame>, H2Error> {
        loop {
            if self.expect_preface && !self.check_preface()? {
                return Ok(None);
            }

            let header = match FrameHeader::parse(&self.buffer) {
                Some(h) => h,
                None => return Ok(None),
            };
            if header.length > self.max_frame_size {
                return Err(H2Error::frame_size(format!(
                    "{} frame of {} bytes exceeds SETTINGS_MAX_FRAME_SIZE {}",
                    frame_type::name(header.frame_type),
                    header.length,
                    self.max_frame_size
                )));
            }
            if self.buffer.len() < header.total_size() {
                return Ok(None);
            }

            let mut raw = self.buffer.split_to(header.total_size());
            let payload = raw.split_off(FRAME_HEADER_LEN).freeze();
            trace!(
                frame = frame_type::name(header.frame_type),
                stream_id = header.stream_id,
                flags = header.flags,
                length = header.length,
                "recv frame"
            );

            if let Some(frame) = self.assemble(header, payload)? {
                return Ok(Some(frame));
            }
        }
    }

    /// Buffer `data` and decode every complete frame.
    pub fn process(&mut self, data: &[u8]) -> Result<Vec<Frame>, H2Error> {
        self.extend(data);
        let mut frames = Vec::new();
        while let Some(frame) = self.decode()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Drop all buffered input and any partial header block.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending = None;
    }

    /// Consume the preface once it is fully buffered; fail on the first
    /// mismatching byte.
    fn check_preface(&mut self) -> Result<bool, H2Error> {
        let n = self.buffer.len().min(CONNECTION_PREFACE.len());
        if self.buffer[..n] != CONNECTION_PREFACE[..n] {
            return Err(H2Error::protocol("invalid connection preface"));
        }
        if n < CONNECTION_PREFACE.len() {
            return Ok(false);
        }
        let _ = self.buffer.split_to(CONNECTION_PREFACE.len());
        self.expect_preface = false;
        trace!("connection preface received");
        Ok(true)
    }

    /// Run header block assembly over one wire frame.
    fn assemble(&mut self, header: FrameHeader, payload: Bytes) -> Result<Option<Frame>, H2Error> {
        if let Some(pending) = &self.pending {
            if header.frame_type != frame_type::CONTINUATION {
                return Err(H2Error::protocol(format!(
                    "{} frame while header block for stream {} is open",
                    frame_type::name(header.frame_type),
                    pending.stream_id
                )));
            }
            if header.stream_id != pending.stream_id {
                return Err(H2Error::protocol(format!(
                    "CONTINUATION for stream {} but header block open on stream {}",
                    header.stream_id, pending.stream_id
                )));
            }
        }

        match Frame::parse(header, payload)? {
            Frame::Headers {
                stream_id,
                priority,
                header_block,
                end_stream,
                end_headers: false,
            } => {
                self.start_block(stream_id, BlockStart::Headers { priority, end_stream }, header_block)?;
                Ok(None)
            }
            Frame::PushPromise {
                stream_id,
                promised_id,
                header_block,
                end_headers: false,
            } => {
                self.start_block(stream_id, BlockStart::PushPromise { promised_id }, header_block)?;
                Ok(None)
            }
            Frame::Continuation {
                stream_id,
                header_block,
                end_headers,
            } => {
                let Some(pending) = self.pending.as_mut() else {
                    return Err(H2Error::protocol(format!(
                        "unexpected CONTINUATION frame for stream {stream_id}"
                    )));
                };
                let new_size = pending.block.len() + header_block.len();
                if new_size > self.max_header_block_size {
                    self.pending = None;
                    return Err(self.block_too_large(new_size));
                }
                pending.block.extend_from_slice(&header_block);
                if !end_headers {
                    return Ok(None);
                }
                let Some(done) = self.pending.take() else {
                    return Ok(None);
                };
                Ok(Some(done.finish()))
            }
            frame => Ok(Some(frame)),
        }
    }

    fn start_block(
        &mut self,
        stream_id: u32,
        start: BlockStart,
        fragment: Bytes,
    ) -> Result<(), H2Error> {
        if fragment.len() > self.max_header_block_size {
            return Err(self.block_too_large(fragment.len()));
        }
        let mut block = BytesMut::with_capacity(fragment.len() * 2);
        block.extend_from_slice(&fragment);
        self.pending = Some(PendingBlock {
            stream_id,
            start,
            block,
        });
        Ok(())
    }

    fn block_too_large(&self, size: usize) -> H2Error {
        H2Error::connection(
            ErrorCode::EnhanceYourCalm,
            format!(
                "header block too large ({} bytes, max {})",
                size, self.max_header_block_size
            ),
        )
    }
}

impl PendingBlock {
    fn finish(self) -> Frame {
        let header_block = self.block.freeze();
        match self.start {
            BlockStart::Headers {
                priority,
                end_stream,
            } => Frame::Headers {
                stream_id: self.stream_id,
                priority,
                header_block,
                end_stream,
                end_headers: true,
            },
            BlockStart::PushPromise { promised_id } => Frame::PushPromise {
                stream_id: self.stream_id,
                promised_id,
                header_block,
                end_headers: true,
            },
        }
    }
}
