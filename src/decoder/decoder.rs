use tracing::{debug, trace};

use super::base64url;
use super::scanner::FieldScanner;
use super::span::SpanBuffer;
use crate::error::{PipelineError, Result};
use crate::receiver::BodyReceiver;
use crate::types::DecodedChunk;

/// Turns one `/chunk/{offset}` response body into the raw chunk bytes.
///
/// Each segment read from the network is handed to the `FieldScanner`; the
/// part of the segment that lies inside the `"chunk"` value is copied into the
/// `SpanBuffer`. Once the closing quote is seen the accumulated base64url text
/// is decoded in one go.
///
/// A decoder is reused across requests; `reset` (called by `decode_body`)
/// discards everything from the previous body.
pub struct ChunkDecoder {
    scanner: FieldScanner,
    span: SpanBuffer,
}

impl ChunkDecoder {
    pub fn new(span_capacity: usize) -> Self {
        Self {
            scanner: FieldScanner::chunk_field(),
            span: SpanBuffer::with_capacity(span_capacity),
        }
    }

    pub fn reset(&mut self) {
        self.scanner.reset();
        self.span.reset();
    }

    pub fn is_done(&self) -> bool {
        self.scanner.is_done()
    }

    /// Feed the next body segment. Returns `true` once the value is complete.
    pub fn feed(&mut self, segment: &[u8]) -> Result<bool> {
        let seg_start = self.scanner.position();
        let seg_end = seg_start + segment.len() as u64;
        let done = self.scanner.feed(segment);

        let state = self.scanner.state();
        if let Some(value_start) = state.value_start {
            let lo = value_start.max(seg_start);
            let hi = state.value_end.unwrap_or(seg_end).min(seg_end);
            if lo < hi {
                let len = (hi - lo) as usize;
                let needed = self.span.written() + len;
                if needed > self.span.capacity() {
                    return Err(PipelineError::SpanOverflow {
                        needed,
                        capacity: self.span.capacity(),
                    });
                }
                self.span.append(segment, (lo - seg_start) as usize, len)?;
                trace!(appended = len, total = self.span.written(), "chunk span grew");
            }
        }

        Ok(done)
    }

    /// Decode the accumulated value. Fails if the value was never closed.
    pub fn finish(&self, offset: u64) -> Result<DecodedChunk> {
        let (start, end) = self.scanner.value_span().ok_or_else(|| {
            PipelineError::MalformedResponse(format!(
                "chunk response for offset {offset} ended before the \"chunk\" field was complete"
            ))
        })?;
        let encoded = self.span.span((end - start) as usize)?;

        let len = base64url::decode(encoded, None)?;
        let mut bytes = vec![0u8; len];
        base64url::decode(encoded, Some(&mut bytes))?;

        debug!(offset, encoded = encoded.len(), decoded = len, "decoded chunk");
        Ok(DecodedChunk { offset, bytes })
    }

    /// Read `body` until the `"chunk"` value is complete and decode it.
    ///
    /// Reading stops as soon as the value's closing quote arrives; the rest of
    /// the body (proofs and paths) is never pulled off the connection.
    pub async fn decode_body(&mut self, offset: u64, body: &mut BodyReceiver) -> Result<DecodedChunk> {
        self.reset();
        while let Some(segment) = body.next_segment().await? {
            if self.feed(&segment)? {
                break;
            }
        }
        self.finish(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::NodeResponse;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const BODY: &[u8] = br#"{"tx_path":"dHhwYXRo","packing":"unpacked","data_path":"ZGF0YQ","chunk":"SGVsbG8","proof":"x"}"#;

    fn decode_segments(segments: &[&[u8]], capacity: usize) -> Result<DecodedChunk> {
        let mut decoder = ChunkDecoder::new(capacity);
        for seg in segments {
            if decoder.feed(seg)? {
                break;
            }
        }
        decoder.finish(100)
    }

    #[test]
    fn decodes_single_segment_body() {
        let chunk = decode_segments(&[BODY], 64).unwrap();
        assert_eq!(chunk.bytes, b"Hello");
        assert_eq!(chunk.offset, 100);
    }

    #[test]
    fn every_split_point_yields_same_bytes() {
        for split in 0..=BODY.len() {
            let chunk = decode_segments(&[&BODY[..split], &BODY[split..]], 64).unwrap();
            assert_eq!(chunk.bytes, b"Hello", "split at {split}");
        }
    }

    #[test]
    fn every_three_way_split_yields_same_bytes() {
        for a in 0..=BODY.len() {
            for b in a..=BODY.len() {
                let chunk = decode_segments(&[&BODY[..a], &BODY[a..b], &BODY[b..]], 8).unwrap();
                assert_eq!(chunk.bytes, b"Hello", "split at {a}/{b}");
            }
        }
    }

    #[test]
    fn reset_between_bodies() {
        let mut decoder = ChunkDecoder::new(64);
        decoder.feed(BODY).unwrap();
        assert_eq!(decoder.finish(1).unwrap().bytes, b"Hello");

        decoder.reset();
        assert!(!decoder.is_done());
        decoder.feed(br#"{"chunk":"V29ybGQ"}"#).unwrap();
        assert_eq!(decoder.finish(6).unwrap().bytes, b"World");
    }

    #[test]
    fn truncated_body_is_malformed() {
        let err = decode_segments(&[br#"{"chunk":"SGVs"#], 64).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedResponse(_)));

        let err = decode_segments(&[br#"{"data_path":"x"}"#], 64).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedResponse(_)));
    }

    #[test]
    fn invalid_payload_is_rejected() {
        let err = decode_segments(&[br#"{"chunk":"SGV+bG8"}"#], 64).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidEncoding(_)));

        let err = decode_segments(&[br#"{"chunk":"SGVsb"}"#], 64).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidEncoding(_)));
    }

    #[test]
    fn value_larger_than_capacity_overflows() {
        let err = decode_segments(&[br#"{"chunk":"SGVs"#, br#"bG8"}"#], 6).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::SpanOverflow {
                needed: 7,
                capacity: 6
            }
        ));
    }

    #[tokio::test]
    async fn decode_body_stops_after_closing_quote() {
        let segments = vec![
            Bytes::from_static(br#"{"chunk":"SGVs"#),
            Bytes::from_static(br#"bG8","proof":"#),
            Bytes::from_static(b"never read"),
        ];
        let response = NodeResponse::from_segments(200, segments);
        let mut body = BodyReceiver::new(response, Duration::from_secs(1), CancellationToken::new());

        let mut decoder = ChunkDecoder::new(64);
        let chunk = decoder.decode_body(100, &mut body).await.unwrap();
        assert_eq!(chunk.bytes, b"Hello");
        assert_eq!(body.received(), 27);
    }
}
