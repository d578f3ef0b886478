//! Incremental locator for one string field of a JSON object.
//!
//! `/chunk` responses are several hundred kilobytes of JSON of which only the
//! `"chunk"` value matters. Rather than parsing the document, `FieldScanner`
//! watches the byte stream for the quoted key and records the absolute offsets
//! of the value between its quotes. Offsets count from the first byte of the
//! response body, so the scanner can be fed segments of any size, including
//! ones that split the key itself.
//!
//! String escapes are not interpreted: the value is assumed to be a plain
//! base64url string, which never contains `"` or `\`.

/// Where the scanner is within the `"key" : "value"` pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    /// Matching the quoted key; `matched` bytes of it are already seen.
    SeekingKey { matched: usize },
    /// Key found; expecting optional whitespace, `:`, whitespace, then `"`.
    SeekingOpenQuote { colon_seen: bool },
    /// Inside the value, waiting for the closing quote.
    SeekingCloseQuote,
    /// All offsets known; further input is ignored.
    Done,
}

/// Absolute offsets discovered so far for the current response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanState {
    pub phase: ScanPhase,
    /// Offset of the key's opening quote.
    pub key_start: Option<u64>,
    /// Offset of the first value byte.
    pub value_start: Option<u64>,
    /// Offset of the value's closing quote (exclusive end of the value).
    pub value_end: Option<u64>,
}

impl ScanState {
    fn initial() -> Self {
        Self {
            phase: ScanPhase::SeekingKey { matched: 0 },
            key_start: None,
            value_start: None,
            value_end: None,
        }
    }
}

pub struct FieldScanner {
    /// Wire form of the key, quotes included.
    token: Vec<u8>,
    /// KMP failure function over `token`.
    failure: Vec<usize>,
    state: ScanState,
    /// Number of body bytes fed so far.
    position: u64,
}

impl FieldScanner {
    /// Scanner for the string value bound to `field` (given without quotes).
    pub fn new(field: &str) -> Self {
        let mut token = Vec::with_capacity(field.len() + 2);
        token.push(b'"');
        token.extend_from_slice(field.as_bytes());
        token.push(b'"');
        let failure = failure_table(&token);

        Self {
            token,
            failure,
            state: ScanState::initial(),
            position: 0,
        }
    }

    /// Scanner for the `"chunk"` field of a `/chunk/{offset}` response.
    pub fn chunk_field() -> Self {
        Self::new("chunk")
    }

    /// Forget all progress, ready for the next response body.
    pub fn reset(&mut self) {
        self.state = ScanState::initial();
        self.position = 0;
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    /// Absolute offset of the next byte to be fed.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_done(&self) -> bool {
        self.state.phase == ScanPhase::Done
    }

    /// `(value_start, value_end)` once the value is fully delimited.
    pub fn value_span(&self) -> Option<(u64, u64)> {
        match (self.state.value_start, self.state.value_end) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => None,
        }
    }

    /// Consume the next segment of the body. Returns `true` once the value is delimited.
    pub fn feed(&mut self, segment: &[u8]) -> bool {
        let base = self.position;
        self.position += segment.len() as u64;

        for (i, &byte) in segment.iter().enumerate() {
            if self.state.phase == ScanPhase::Done {
                break;
            }
            self.step(byte, base + i as u64);
        }

        self.is_done()
    }

    fn step(&mut self, byte: u8, at: u64) {
        match self.state.phase {
            ScanPhase::SeekingKey { matched } => self.match_key(matched, byte, at),
            ScanPhase::SeekingOpenQuote { colon_seen } => match byte {
                b' ' | b'\t' | b'\r' | b'\n' => {}
                b':' if !colon_seen => {
                    self.state.phase = ScanPhase::SeekingOpenQuote { colon_seen: true };
                }
                b'"' if colon_seen => {
                    self.state.value_start = Some(at + 1);
                    self.state.phase = ScanPhase::SeekingCloseQuote;
                }
                _ => {
                    // the quoted token was a value or the field is not a
                    // string; resume the key search from this byte
                    self.state.key_start = None;
                    self.state.phase = ScanPhase::SeekingKey { matched: 0 };
                    self.match_key(0, byte, at);
                }
            },
            ScanPhase::SeekingCloseQuote => {
                if byte == b'"' {
                    self.state.value_end = Some(at);
                    self.state.phase = ScanPhase::Done;
                }
            }
            ScanPhase::Done => {}
        }
    }

    fn match_key(&mut self, mut matched: usize, byte: u8, at: u64) {
        while matched > 0 && self.token[matched] != byte {
            matched = self.failure[matched - 1];
        }
        if self.token[matched] == byte {
            matched += 1;
        }

        if matched == self.token.len() {
            self.state.key_start = Some(at + 1 - self.token.len() as u64);
            self.state.phase = ScanPhase::SeekingOpenQuote { colon_seen: false };
        } else {
            self.state.phase = ScanPhase::SeekingKey { matched };
        }
    }
}

fn failure_table(token: &[u8]) -> Vec<usize> {
    let mut failure = vec![0; token.len()];
    let mut k = 0;
    for i in 1..token.len() {
        while k > 0 && token[i] != token[k] {
            k = failure[k - 1];
        }
        if token[i] == token[k] {
            k += 1;
        }
        failure[i] = k;
    }
    failure
}
