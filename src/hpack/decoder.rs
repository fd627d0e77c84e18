//! HPACK header block decoder (RFC 7541 Section 3 and 6).

use bytes::{Bytes, BytesMut};
use tracing::trace;

use super::table::{self, DynamicTable};
use super::{huffman, integer, H2Header};
use crate::error::HpackError;
use crate::settings::DEFAULT_HEADER_TABLE_SIZE;

/// Decoding context for one direction of a connection.
///
/// A block is decoded all-or-nothing: when decoding fails part way, dynamic
/// table changes made by that block are rolled back.
#[derive(Debug)]
pub struct Decoder {
    table: DynamicTable,
    /// Largest size a table size update may request: our acknowledged
    /// SETTINGS_HEADER_TABLE_SIZE.
    max_size_limit: usize,
    /// The limit was lowered below the current table size; the next block
    /// must open with a size update.
    size_update_required: bool,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DEFAULT_HEADER_TABLE_SIZE as usize)
    }
}

impl Decoder {
    pub fn new(max_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_size),
            max_size_limit: max_size,
            size_update_required: false,
        }
    }

    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    pub fn max_size_limit(&self) -> usize {
        self.max_size_limit
    }

    /// Apply an acknowledged SETTINGS_HEADER_TABLE_SIZE.
    pub fn set_max_size_limit(&mut self, limit: usize) {
        if limit < self.table.max_size() {
            self.size_update_required = true;
        }
        self.max_size_limit = limit;
    }

    /// Decode a complete header block.
    ///
    /// When the decoded list exceeds `max_header_list_size` the block is
    /// still decoded to the end so the table stays in sync with the peer's
    /// encoder, then `HeaderListTooLarge` is returned.
    pub fn decode(
        &mut self,
        block: &[u8],
        max_header_list_size: Option<usize>,
    ) -> Result<Vec<H2Header>, HpackError> {
        let mut checkpoint = None;
        let size_update_required = self.size_update_required;
        match self.decode_fields(block, max_header_list_size, &mut checkpoint) {
            Ok((headers, None)) => Ok(headers),
            Ok((_, Some(limit))) => Err(HpackError::HeaderListTooLarge { limit }),
            Err(err) => {
                if let Some(table) = checkpoint {
                    self.table = table;
                }
                self.size_update_required = size_update_required;
                Err(err)
            }
        }
    }

    /// Returns the decoded list and, when it overflowed, the limit it broke.
    fn decode_fields(
        &mut self,
        mut src: &[u8],
        max_header_list_size: Option<usize>,
        checkpoint: &mut Option<DynamicTable>,
    ) -> Result<(Vec<H2Header>, Option<usize>), HpackError> {
        let mut headers = Vec::new();
        let mut list_size = 0usize;
        let mut overflow = None;
        let mut at_start = true;

        while let Some(&first) = src.first() {
            if first & 0xe0 == 0x20 {
                // 001xxxxx: dynamic table size update
                if !at_start {
                    return Err(HpackError::LateSizeUpdate);
                }
                let size = integer::decode(&mut src, 5)?;
                if size > self.max_size_limit {
                    return Err(HpackError::SizeUpdateTooLarge {
                        requested: size,
                        limit: self.max_size_limit,
                    });
                }
                checkpoint.get_or_insert_with(|| self.table.clone());
                self.table.set_max_size(size);
                self.size_update_required = false;
                trace!(size, "hpack table size update");
                continue;
            }

            if at_start && self.size_update_required {
                return Err(HpackError::MissingSizeUpdate);
            }
            at_start = false;

            let header = if first & 0x80 != 0 {
                // 1xxxxxxx: indexed field
                let index = integer::decode(&mut src, 7)?;
                let (name, value) = self.table.get(index)?;
                H2Header::from_parts(name, value, false)
            } else if first & 0xc0 == 0x40 {
                // 01xxxxxx: literal with incremental indexing
                let (name, value) = self.read_literal(&mut src, 6)?;
                checkpoint.get_or_insert_with(|| self.table.clone());
                self.table.insert(name.clone(), value.clone());
                H2Header::from_parts(name, value, false)
            } else {
                // 0001xxxx never indexed, 0000xxxx without indexing
                let sensitive = first & 0xf0 == 0x10;
                let (name, value) = self.read_literal(&mut src, 4)?;
                H2Header::from_parts(name, value, sensitive)
            };

            if overflow.is_some() {
                continue;
            }
            list_size += table::entry_size(&header.name, &header.value);
            match max_header_list_size {
                Some(limit) if list_size > limit => {
                    overflow = Some(limit);
                    headers.clear();
                }
                _ => headers.push(header),
            }
        }

        Ok((headers, overflow))
    }

    /// Read a literal's name (indexed or literal) followed by its value.
    fn read_literal(&self, src: &mut &[u8], prefix_bits: u8) -> Result<(Bytes, Bytes), HpackError> {
        let index = integer::decode(src, prefix_bits)?;
        let name = if index == 0 {
            read_string(src)?
        } else {
            self.table.get(index)?.0
        };
        let value = read_string(src)?;
        Ok((name, value))
    }
}

/// Read a length-prefixed string literal, Huffman-decoding when flagged.
fn read_string(src: &mut &[u8]) -> Result<Bytes, HpackError> {
    let huffman_coded = src.first().ok_or(HpackError::Truncated)? & 0x80 != 0;
    let len = integer::decode(src, 7)?;
    if len > src.len() {
        return Err(HpackError::Truncated);
    }
    let (raw, rest) = src.split_at(len);
    *src = rest;
    if huffman_coded {
        let mut out = BytesMut::with_capacity(len * 8 / 5);
        huffman::decode(raw, &mut out)?;
        Ok(out.freeze())
    } else {
        Ok(Bytes::copy_from_slice(raw))
    }
}
