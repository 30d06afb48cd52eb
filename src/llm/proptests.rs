//! Property-based tests for the stream decoder
//!
//! For any list of fragments encoded as `data:` frames and terminated by the
//! sentinel, the decoder must yield the fragments in order followed by a
//! single `Done`, no matter where the byte stream is cut.

use super::decoder::{StreamDecoder, StreamEvent};
use proptest::prelude::*;

/// Non-empty fragment, including multi-byte characters and JSON-escaped ones
fn arb_fragment() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 _.!?,\"\\\\é✓日本]{1,24}"
}

fn encode(fragments: &[String]) -> Vec<u8> {
    let mut out = String::from("data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n");
    for fragment in fragments {
        let frame = serde_json::json!({"choices": [{"index": 0, "delta": {"content": fragment}}]});
        out.push_str(&format!("data: {frame}\n\n"));
    }
    out.push_str("data: [DONE]\n\n");
    out.into_bytes()
}

/// Cut `bytes` at the given (sorted, deduplicated) offsets
fn split_at_offsets(bytes: &[u8], mut offsets: Vec<usize>) -> Vec<Vec<u8>> {
    offsets.retain(|o| *o > 0 && *o < bytes.len());
    offsets.sort_unstable();
    offsets.dedup();

    let mut chunks = Vec::new();
    let mut start = 0;
    for offset in offsets {
        chunks.push(bytes[start..offset].to_vec());
        start = offset;
    }
    chunks.push(bytes[start..].to_vec());
    chunks
}

proptest! {
    #[test]
    fn prop_chunking_never_changes_output(
        fragments in proptest::collection::vec(arb_fragment(), 0..12),
        cuts in proptest::collection::vec(0usize..2048, 0..24),
    ) {
        let bytes = encode(&fragments);
        let mut decoder = StreamDecoder::new();
        let mut events = Vec::new();
        for chunk in split_at_offsets(&bytes, cuts) {
            events.extend(decoder.feed(&chunk));
        }
        events.extend(decoder.finish());

        let mut expected: Vec<StreamEvent> =
            fragments.iter().cloned().map(StreamEvent::Delta).collect();
        expected.push(StreamEvent::Done);
        prop_assert_eq!(events, expected);
    }

    #[test]
    fn prop_single_byte_chunks(fragments in proptest::collection::vec(arb_fragment(), 1..6)) {
        let bytes = encode(&fragments);
        let mut decoder = StreamDecoder::new();
        let mut deltas = 0;
        let mut dones = 0;
        for byte in &bytes {
            for event in decoder.feed(std::slice::from_ref(byte)) {
                match event {
                    StreamEvent::Delta(_) => deltas += 1,
                    StreamEvent::Done => dones += 1,
                }
            }
        }
        prop_assert_eq!(deltas, fragments.len());
        prop_assert_eq!(dones, 1);
        prop_assert!(decoder.finish().is_empty());
    }
}
