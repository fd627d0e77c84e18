//! Tests for HPACK decoding

use h2_mux::hpack::Decoder;
use h2_mux::{ErrorCode, H2Header, HpackError};

#[test]
fn test_decode_multiple_indexed_headers() {
    let mut decoder = Decoder::default();

    // 0x82 = :method: GET, 0x86 = :scheme: http, 0x84 = :path: /
    let headers = decoder.decode(&[0x82, 0x86, 0x84], None).unwrap();
    assert_eq!(
        headers,
        vec![
            H2Header::new(":method", "GET"),
            H2Header::new(":scheme", "http"),
            H2Header::new(":path", "/"),
        ]
    );
}

#[test]
fn test_decode_literal_with_indexing() {
    let mut decoder = Decoder::default();

    // literal with incremental indexing, new name "custom-key", value "custom-header"
    let mut data = vec![0x40, 0x0a];
    data.extend_from_slice(b"custom-key");
    data.push(0x0d);
    data.extend_from_slice(b"custom-header");

    let headers = decoder.decode(&data, None).unwrap();
    assert_eq!(headers, vec![H2Header::new("custom-key", "custom-header")]);
    assert_eq!(decoder.table().size(), 55);

    // now reachable as index 62
    let headers = decoder.decode(&[0xbe], None).unwrap();
    assert_eq!(headers, vec![H2Header::new("custom-key", "custom-header")]);
}

#[test]
fn test_decode_literal_indexed_name_without_indexing() {
    let mut decoder = Decoder::default();

    // literal without indexing, name index 4 (:path), value "/sample/path"
    let mut data = vec![0x04, 0x0c];
    data.extend_from_slice(b"/sample/path");

    let headers = decoder.decode(&data, None).unwrap();
    assert_eq!(headers, vec![H2Header::new(":path", "/sample/path")]);
    assert_eq!(decoder.table().len(), 0);
}

#[test]
fn test_invalid_index() {
    let mut decoder = Decoder::default();
    assert_eq!(decoder.decode(&[0x80], None), Err(HpackError::ZeroIndex));
    assert_eq!(decoder.decode(&[0xbe], None), Err(HpackError::InvalidIndex(62)));
}

#[test]
fn test_bad_huffman_padding_is_compression_error() {
    let mut decoder = Decoder::default();
    // literal, new name "a", huffman value whose padding is not all ones
    let data = [0x00, 0x01, b'a', 0x81, 0x1a];
    let err = decoder.decode(&data, None).unwrap_err();
    assert_eq!(err, HpackError::HuffmanInvalidPadding);

    let h2 = err.into_h2(1);
    assert!(h2.is_connection_error());
    assert_eq!(h2.code(), ErrorCode::CompressionError);
}

#[test]
fn test_size_update_after_field_rejected() {
    let mut decoder = Decoder::default();
    assert_eq!(
        decoder.decode(&[0x82, 0x20], None),
        Err(HpackError::LateSizeUpdate)
    );
}

#[test]
fn test_header_list_limit() {
    let mut decoder = Decoder::default();
    let mut data = vec![0x40, 0x03];
    data.extend_from_slice(b"foo");
    data.push(0x03);
    data.extend_from_slice(b"bar");

    // 3 + 3 + 32 = 38
    let err = decoder.decode(&data, Some(37)).unwrap_err();
    assert_eq!(err, HpackError::HeaderListTooLarge { limit: 37 });
    let h2 = err.into_h2(3);
    assert!(!h2.is_connection_error());
    assert_eq!(h2.code(), ErrorCode::RefusedStream);

    // the entry was still inserted so later references resolve
    assert_eq!(
        decoder.decode(&[0xbe], Some(38)).unwrap(),
        vec![H2Header::new("foo", "bar")]
    );
}

#[test]
fn test_failed_block_leaves_table_untouched() {
    let mut decoder = Decoder::default();
    // valid insert followed by a truncated literal
    let mut data = vec![0x40, 0x01, b'k', 0x01, b'v'];
    data.extend_from_slice(&[0x40, 0x05, b'x']);
    assert_eq!(decoder.decode(&data, None), Err(HpackError::Truncated));
    assert_eq!(decoder.table().len(), 0);
}
