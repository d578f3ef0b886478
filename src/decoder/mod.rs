//! Decoder layer: locates the `"chunk"` field in a streamed response body,
//! reassembles it and decodes the base64url payload.

pub mod base64url;
#[allow(clippy::module_inception)]
mod decoder;
pub mod scanner;
pub mod span;

pub use base64url::DecodeError;
pub use decoder::ChunkDecoder;
pub use scanner::{FieldScanner, ScanPhase, ScanState};
pub use span::SpanBuffer;

/// Hex dump of at most `limit` bytes, 16 per line with offsets.
pub fn hex_preview(bytes: &[u8], limit: usize) -> String {
    let mut out = String::new();
    for (i, b) in bytes.iter().enumerate().take(limit) {
        if i % 16 == 0 {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&format!("{:04x}: ", i));
        }
        out.push_str(&format!("{:02x} ", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_preview_wraps_every_sixteen_bytes() {
        let bytes: Vec<u8> = (0..18).collect();
        let dump = hex_preview(&bytes, 64);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0000: 00 01 02"));
        assert_eq!(lines[1], "0010: 10 11 ");
    }

    #[test]
    fn hex_preview_honours_limit() {
        assert_eq!(hex_preview(b"Hello", 2), "0000: 48 65 ");
    }
}
