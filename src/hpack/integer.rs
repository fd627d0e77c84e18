//! HPACK prefix integers (RFC 7541 Section 5.1).

use bytes::{BufMut, BytesMut};

use crate::error::HpackError;

/// Decoded integers are limited to 32 bits.
const MAX_VALUE: u64 = u32::MAX as u64;

/// Encode `value` with an N-bit prefix. `first` carries the representation
/// bits above the prefix.
pub fn encode(value: usize, prefix_bits: u8, first: u8, dst: &mut BytesMut) {
    let max_prefix = (1usize << prefix_bits) - 1;
    if value < max_prefix {
        dst.put_u8(first | value as u8);
        return;
    }
    dst.put_u8(first | max_prefix as u8);
    let mut rest = value - max_prefix;
    while rest >= 0x80 {
        dst.put_u8((rest & 0x7f) as u8 | 0x80);
        rest >>= 7;
    }
    dst.put_u8(rest as u8);
}

/// Decode an N-bit prefix integer, advancing `src` past it.
pub fn decode(src: &mut &[u8], prefix_bits: u8) -> Result<usize, HpackError> {
    let max_prefix = (1u64 << prefix_bits) - 1;
    let first = next_byte(src)?;
    let mut value = first as u64 & max_prefix;
    if value < max_prefix {
        return Ok(value as usize);
    }

    let mut shift = 0u32;
    loop {
        let byte = next_byte(src)?;
        if shift > 28 {
            return Err(HpackError::IntegerOverflow);
        }
        value += ((byte & 0x7f) as u64) << shift;
        if value > MAX_VALUE {
            return Err(HpackError::IntegerOverflow);
        }
        if byte & 0x80 == 0 {
            return Ok(value as usize);
        }
        shift += 7;
    }
}

pub(crate) fn next_byte(src: &mut &[u8]) -> Result<u8, HpackError> {
    let (&byte, rest) = src.split_first().ok_or(HpackError::Truncated)?;
    *src = rest;
    Ok(byte)
}
