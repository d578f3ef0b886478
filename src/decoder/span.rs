//! Fixed-capacity circular accumulator for the encoded field value.

use crate::error::{PipelineError, Result};

/// Accumulates the bytes of one field value as they arrive across reads.
///
/// The logical write position is `written % capacity`; an append that runs
/// past the end of the storage continues at index 0. Reading the span back
/// with [`SpanBuffer::span`] requires that nothing was overwritten, i.e. that
/// at most `capacity` bytes were appended since the last reset.
pub struct SpanBuffer {
    storage: Box<[u8]>,
    /// Total bytes appended since the last reset.
    written: usize,
}

impl SpanBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            written: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes appended since the last reset, including any that wrapped.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Index in the storage the next append starts at.
    pub fn write_index(&self) -> usize {
        match self.capacity() {
            0 => 0,
            cap => self.written % cap,
        }
    }

    pub fn reset(&mut self) {
        self.written = 0;
    }

    /// Copy `source[offset..offset + len]` in at the current write position,
    /// splitting the copy in two when it crosses the end of the storage.
    pub fn append(&mut self, source: &[u8], offset: usize, len: usize) -> Result<()> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= source.len())
            .ok_or_else(|| {
                PipelineError::MalformedResponse(format!(
                    "span copy {offset}+{len} outside a {} byte segment",
                    source.len()
                ))
            })?;
        if len == 0 {
            return Ok(());
        }
        let capacity = self.capacity();
        if len > capacity {
            return Err(PipelineError::SpanOverflow {
                needed: len,
                capacity,
            });
        }

        let bytes = &source[offset..end];
        let start = self.write_index();
        if start + len <= capacity {
            self.storage[start..start + len].copy_from_slice(bytes);
        } else {
            let first = capacity - start;
            self.storage[start..].copy_from_slice(&bytes[..first]);
            self.storage[..len - first].copy_from_slice(&bytes[first..]);
        }

        self.written += len;
        Ok(())
    }

    /// The first `len` bytes appended since the last reset.
    pub fn span(&self, len: usize) -> Result<&[u8]> {
        if self.written > self.capacity() {
            return Err(PipelineError::SpanOverflow {
                needed: self.written,
                capacity: self.capacity(),
            });
        }
        if len > self.written {
            return Err(PipelineError::MalformedResponse(format!(
                "span of {len} bytes requested, {} accumulated",
                self.written
            )));
        }
        Ok(&self.storage[..len])
    }

    /// Raw storage, for inspecting wrapped contents.
    pub fn storage(&self) -> &[u8] {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_appends_read_back_in_order() {
        let mut buf = SpanBuffer::with_capacity(16);
        buf.append(b"xxSGVs", 2, 4).unwrap();
        buf.append(b"bG8", 0, 3).unwrap();
        assert_eq!(buf.written(), 7);
        assert_eq!(buf.span(7).unwrap(), b"SGVsbG8");
    }

    #[test]
    fn wrapping_append_splits_across_the_end() {
        let mut buf = SpanBuffer::with_capacity(16);
        let first: Vec<u8> = (0..10).collect();
        let second: Vec<u8> = (100..110).collect();

        buf.append(&first, 0, 10).unwrap();
        assert_eq!(buf.write_index(), 10);
        buf.append(&second, 0, 10).unwrap();
        assert_eq!(buf.write_index(), 4);

        let storage = buf.storage();
        // head of the second append fills [10..16)
        assert_eq!(&storage[10..16], &second[..6]);
        // its tail wrapped to [0..4)
        assert_eq!(&storage[0..4], &second[6..]);
        // untouched part of the first append
        assert_eq!(&storage[4..10], &first[4..]);
    }

    #[test]
    fn wrapped_span_cannot_be_read_back() {
        let mut buf = SpanBuffer::with_capacity(16);
        buf.append(&[1; 10], 0, 10).unwrap();
        buf.append(&[2; 10], 0, 10).unwrap();
        assert!(matches!(
            buf.span(4),
            Err(PipelineError::SpanOverflow {
                needed: 20,
                capacity: 16
            })
        ));
    }

    #[test]
    fn exact_fill_then_reset() {
        let mut buf = SpanBuffer::with_capacity(4);
        buf.append(b"QUJD", 0, 4).unwrap();
        assert_eq!(buf.write_index(), 0);
        assert_eq!(buf.span(4).unwrap(), b"QUJD");

        buf.reset();
        assert_eq!(buf.written(), 0);
        buf.append(b"RA", 0, 2).unwrap();
        assert_eq!(buf.span(2).unwrap(), b"RA");
    }

    #[test]
    fn rejects_out_of_range_source_and_oversized_append() {
        let mut buf = SpanBuffer::with_capacity(4);
        assert!(matches!(
            buf.append(b"abc", 2, 2),
            Err(PipelineError::MalformedResponse(_))
        ));
        assert!(matches!(
            buf.append(b"abcdef", 0, 6),
            Err(PipelineError::SpanOverflow {
                needed: 6,
                capacity: 4
            })
        ));
        assert_eq!(buf.written(), 0);
    }
}
