//! HPACK header block encoder (RFC 7541 Section 6).

use bytes::{Bytes, BytesMut};

use super::table::{self, DynamicTable, Match};
use super::{huffman, integer, H2Header};
use crate::settings::DEFAULT_HEADER_TABLE_SIZE;

/// Default ceiling on the encoder's dynamic table, whatever the peer allows.
pub const DEFAULT_ENCODER_TABLE_LIMIT: usize = 64 * 1024;

/// Encoding context for one direction of a connection.
#[derive(Debug)]
pub struct Encoder {
    table: DynamicTable,
    /// `(smallest, final)` table sizes announced by the peer since the last
    /// block; emitted as size updates at the start of the next block.
    pending_size_update: Option<(usize, usize)>,
    /// Largest table we are willing to keep for the peer.
    size_limit: usize,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(DEFAULT_HEADER_TABLE_SIZE as usize)
    }
}

impl Encoder {
    pub fn new(max_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_size),
            pending_size_update: None,
            size_limit: DEFAULT_ENCODER_TABLE_LIMIT.max(max_size),
        }
    }

    /// Cap the table size adopted from the peer's SETTINGS_HEADER_TABLE_SIZE.
    pub fn with_size_limit(mut self, limit: usize) -> Self {
        self.size_limit = limit;
        if self.table.max_size() > limit {
            self.set_max_table_size(limit);
        }
        self
    }

    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Apply the peer's SETTINGS_HEADER_TABLE_SIZE, clamped to our limit.
    /// The size actually used is what the next size update announces.
    pub fn set_max_table_size(&mut self, size: usize) {
        let size = size.min(self.size_limit);
        let smallest = match self.pending_size_update {
            Some((smallest, _)) => smallest.min(size),
            None => size.min(self.table.max_size()),
        };
        self.pending_size_update = Some((smallest, size));
        self.table.set_max_size(size);
    }

    /// Encode a header list into `dst`.
    pub fn encode(&mut self, headers: &[H2Header], dst: &mut BytesMut) {
        if let Some((smallest, last)) = self.pending_size_update.take() {
            if smallest < last {
                integer::encode(smallest, 5, 0x20, dst);
            }
            integer::encode(last, 5, 0x20, dst);
        }
        for header in headers {
            self.encode_field(header, dst);
        }
    }

    /// Encode a header list into a new buffer.
    pub fn encode_block(&mut self, headers: &[H2Header]) -> Bytes {
        let mut dst = BytesMut::new();
        self.encode(headers, &mut dst);
        dst.freeze()
    }

    fn encode_field(&mut self, header: &H2Header, dst: &mut BytesMut) {
        let found = self.table.find(&header.name, &header.value);

        if header.sensitive {
            let name_index = match found {
                Some(Match::Full(i)) | Some(Match::Name(i)) => i,
                None => 0,
            };
            self.encode_literal(header, name_index, 4, 0x10, dst);
            return;
        }

        if let Some(Match::Full(index)) = found {
            integer::encode(index, 7, 0x80, dst);
            return;
        }

        let name_index = match found {
            Some(Match::Name(i)) => i,
            _ => 0,
        };
        if table::entry_size(&header.name, &header.value) > self.table.max_size() {
            // would only flush the table
            self.encode_literal(header, name_index, 4, 0x00, dst);
            return;
        }
        self.encode_literal(header, name_index, 6, 0x40, dst);
        self.table.insert(header.name.clone(), header.value.clone());
    }

    fn encode_literal(
        &self,
        header: &H2Header,
        name_index: usize,
        prefix_bits: u8,
        first: u8,
        dst: &mut BytesMut,
    ) {
        integer::encode(name_index, prefix_bits, first, dst);
        if name_index == 0 {
            write_string(&header.name, dst);
        }
        write_string(&header.value, dst);
    }
}

/// Write a string literal, Huffman-coded when that is shorter.
fn write_string(src: &[u8], dst: &mut BytesMut) {
    let huffman_len = huffman::encoded_len(src);
    if huffman_len < src.len() {
        integer::encode(huffman_len, 7, 0x80, dst);
        huffman::encode(src, dst);
    } else {
        integer::encode(src.len(), 7, 0x00, dst);
        dst.extend_from_slice(src);
    }
}
