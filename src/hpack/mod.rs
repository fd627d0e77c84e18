//! HPACK: Header Compression for HTTP/2 (RFC 7541)
//!
//! Each direction of a connection owns one context: the [`Decoder`] mirrors
//! the peer's encoder and the [`Encoder`] is mirrored by the peer's decoder.
//! Both mutate their dynamic table strictly in header block order.

mod decoder;
mod encoder;
pub mod huffman;
pub mod integer;
pub mod table;

use bytes::Bytes;

pub use decoder::Decoder;
pub use encoder::{Encoder, DEFAULT_ENCODER_TABLE_LIMIT};
pub use table::{DynamicTable, STATIC_TABLE};

/// A decoded HTTP/2 header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H2Header {
    pub name: Bytes,
    pub value: Bytes,
    /// Never-indexed field: encoded as a literal and never added to a table.
    pub sensitive: bool,
}

impl H2Header {
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self::from_parts(name.into(), value.into(), false)
    }

    /// A header that must never be compressed into a table, such as
    /// credentials or cookies with little entropy.
    pub fn sensitive(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self::from_parts(name.into(), value.into(), true)
    }

    pub fn from_parts(name: Bytes, value: Bytes, sensitive: bool) -> Self {
        Self {
            name,
            value,
            sensitive,
        }
    }

    /// Size counted against SETTINGS_MAX_HEADER_LIST_SIZE.
    pub fn size(&self) -> usize {
        table::entry_size(&self.name, &self.value)
    }
}
