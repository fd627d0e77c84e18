//! Interoperability with the fluke-hpack implementation

use h2_mux::hpack::{Decoder, Encoder};
use h2_mux::H2Header;

fn request(path: &str) -> Vec<H2Header> {
    vec![
        H2Header::new(":method", "GET"),
        H2Header::new(":scheme", "https"),
        H2Header::new(":path", path.to_string()),
        H2Header::new(":authority", "www.example.com"),
        H2Header::new("user-agent", "h2-mux-test/1.0"),
        H2Header::new("accept", "*/*"),
    ]
}

fn pairs(headers: &[H2Header]) -> Vec<(Vec<u8>, Vec<u8>)> {
    headers
        .iter()
        .map(|h| (h.name.to_vec(), h.value.to_vec()))
        .collect()
}

#[test]
fn test_fluke_decodes_our_blocks() {
    let mut encoder = Encoder::default();
    let mut peer = fluke_hpack::Decoder::new();

    for i in 0..50 {
        let headers = request(&format!("/item/{}", i % 7));
        let block = encoder.encode_block(&headers);
        let decoded = peer.decode(&block).unwrap();
        assert_eq!(decoded, pairs(&headers));
    }
}

#[test]
fn test_we_decode_fluke_blocks() {
    let mut peer = fluke_hpack::Encoder::new();
    let mut decoder = Decoder::default();

    for i in 0..50 {
        let headers = request(&format!("/item/{}", i % 7));
        let block = peer.encode(
            headers
                .iter()
                .map(|h| (&h.name[..], &h.value[..])),
        );
        let decoded = decoder.decode(&block, None).unwrap();
        assert_eq!(pairs(&decoded), pairs(&headers));
    }
}
