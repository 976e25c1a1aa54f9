//! Latin-1 (ISO-8859-1) text conversion.
//!
//! The upstream tables and every CSV consumed by the visualization layer use
//! Latin-1 so that Spanish province names keep their diacritics.

use tracing::warn;

/// Decodes Latin-1 bytes. Every byte maps to the code point of the same value.
pub fn decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Encodes text as Latin-1, replacing characters outside the charset with `?`.
///
/// One warning is logged per call that had to replace anything.
pub fn encode(text: &str) -> Vec<u8> {
    let (bytes, replaced) = encode_counting(text);
    if replaced > 0 {
        warn!(replaced, "Characters outside Latin-1 were written as '?'");
    }
    bytes
}

fn encode_counting(text: &str) -> (Vec<u8>, usize) {
    let mut replaced = 0;
    let bytes = text
        .chars()
        .map(|c| {
            u8::try_from(u32::from(c)).unwrap_or_else(|_| {
                replaced += 1;
                b'?'
            })
        })
        .collect();
    (bytes, replaced)
}
