//! Table-driven base64url (RFC 4648 §5) decoding without padding.
//!
//! The ledger ships chunk payloads as unpadded base64url strings, so the
//! decoder rejects `=` along with every other byte outside `A-Z a-z 0-9 - _`.
//! Decoding never allocates: callers either pass an output buffer or `None`
//! to validate the input and learn the decoded length.

use thiserror::Error;

const INVALID: u8 = 0xFF;

/// Maps an ASCII byte to its 6-bit value, `INVALID` for bytes outside the alphabet.
static DECODE_TABLE: [u8; 256] = build_decode_table();

const fn build_decode_table() -> [u8; 256] {
    let alphabet = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
    let mut table = [INVALID; 256];
    let mut i = 0;
    while i < alphabet.len() {
        table[alphabet[i] as usize] = i as u8;
        i += 1;
    }
    table
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// No encoding produces an input whose length is 1 mod 4.
    #[error("invalid base64url length {len}")]
    InvalidLength { len: usize },

    #[error("invalid base64url character 0x{byte:02x} at position {position}")]
    InvalidCharacter { byte: u8, position: usize },

    #[error("output buffer holds {available} bytes, {needed} required")]
    OutputTooSmall { needed: usize, available: usize },
}

/// Number of bytes `len` encoded characters decode to.
pub fn decoded_len(len: usize) -> Result<usize, DecodeError> {
    match len % 4 {
        1 => Err(DecodeError::InvalidLength { len }),
        0 => Ok(len / 4 * 3),
        rem => Ok(len / 4 * 3 + rem - 1),
    }
}

/// Decode `input` into `output`, returning the number of decoded bytes.
///
/// With `output == None` the input is fully validated and the decoded length
/// returned without writing anything. Decoding stops at the first invalid
/// character; whatever was written to `output` before that is not meaningful.
pub fn decode(input: &[u8], output: Option<&mut [u8]>) -> Result<usize, DecodeError> {
    let needed = decoded_len(input.len())?;

    let mut output = output;
    if let Some(out) = output.as_deref() {
        if out.len() < needed {
            return Err(DecodeError::OutputTooSmall {
                needed,
                available: out.len(),
            });
        }
    }

    let mut groups = input.chunks_exact(4);
    let mut n = 0;
    let mut position = 0;

    for group in groups.by_ref() {
        let value = sextets(group, position)?;
        if let Some(out) = output.as_deref_mut() {
            out[n] = (value >> 16) as u8;
            out[n + 1] = (value >> 8) as u8;
            out[n + 2] = value as u8;
        }
        n += 3;
        position += 4;
    }

    let tail = groups.remainder();
    if !tail.is_empty() {
        let value = sextets(tail, position)?;
        match tail.len() {
            2 => {
                // 12 bits, the low 4 are padding
                if let Some(out) = output.as_deref_mut() {
                    out[n] = (value >> 4) as u8;
                }
                n += 1;
            }
            3 => {
                // 18 bits, the low 2 are padding
                if let Some(out) = output.as_deref_mut() {
                    out[n] = (value >> 10) as u8;
                    out[n + 1] = (value >> 2) as u8;
                }
                n += 2;
            }
            // length % 4 == 1 was rejected up front
            _ => unreachable!("tail of length {}", tail.len()),
        }
    }

    debug_assert_eq!(n, needed);
    Ok(n)
}

/// Concatenate the 6-bit values of up to four characters, first character most significant.
#[inline]
fn sextets(group: &[u8], base: usize) -> Result<u32, DecodeError> {
    let mut value = 0u32;
    for (i, &byte) in group.iter().enumerate() {
        let v = DECODE_TABLE[byte as usize];
        if v == INVALID {
            return Err(DecodeError::InvalidCharacter {
                byte,
                position: base + i,
            });
        }
        value = (value << 6) | v as u32;
    }
    Ok(value)
}

/// Allocating convenience wrapper, used for small values such as tag names.
pub fn decode_to_vec(input: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = vec![0u8; decoded_len(input.len())?];
    let n = decode(input, Some(&mut out))?;
    out.truncate(n);
    Ok(out)
}
