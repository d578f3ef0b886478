// Shared types for the bundle dissector.
//
// Plain data: the byte range a bundle occupies on the ledger, decoded chunks,
// and the small JSON documents the node returns for a transaction.

use serde::{Deserialize, Deserializer, Serialize};

use crate::decoder::base64url;
use crate::error::{PipelineError, Result};

/// Leading bytes of a bundle captured from its first chunk.
pub const HEADER_PREFIX_LEN: usize = 32;

/// Decoded key/value tags of a transaction, in the order the node lists them.
pub type Tags = Vec<(String, String)>;

/// Ledger byte range of one bundle plus the traversal cursor.
///
/// `end_offset` is the ledger offset of the bundle's last byte, so
/// `start_offset = end_offset - size + 1`. `current_offset` always stays
/// within `start_offset..=end_offset` and only moves forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRange {
    pub tx_id: String,
    pub size: u64,
    pub start_offset: u64,
    pub end_offset: u64,
    current_offset: u64,
    received: u64,
}

impl BundleRange {
    pub fn new(tx_id: impl Into<String>, size: u64, end_offset: u64) -> Result<Self> {
        let tx_id = tx_id.into();
        if size == 0 {
            return Err(PipelineError::MalformedResponse(format!(
                "tx {tx_id} reports size 0"
            )));
        }
        let start_offset = end_offset.checked_sub(size - 1).ok_or_else(|| {
            PipelineError::MalformedResponse(format!(
                "tx {tx_id} size {size} exceeds end offset {end_offset}"
            ))
        })?;

        Ok(Self {
            tx_id,
            size,
            start_offset,
            end_offset,
            current_offset: start_offset,
            received: 0,
        })
    }

    /// Ledger offset the next chunk request is anchored at.
    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    /// Bundle bytes accepted so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn remaining(&self) -> u64 {
        self.size - self.received
    }

    pub fn is_complete(&self) -> bool {
        self.received >= self.size
    }

    /// Move the cursor past `decoded` bytes. Bytes beyond the end of the
    /// bundle are not counted; returns how many were accepted.
    pub fn advance(&mut self, decoded: u64) -> u64 {
        let accepted = decoded.min(self.remaining());
        self.received += accepted;
        self.current_offset = (self.start_offset + self.received).min(self.end_offset);
        accepted
    }
}

/// Raw bytes of one chunk, requested at ledger offset `offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedChunk {
    pub offset: u64,
    pub bytes: Vec<u8>,
}

impl DecodedChunk {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Body of `GET /tx/{id}/offset`. The node sends both values as decimal
/// strings; plain JSON numbers are accepted too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct OffsetInfo {
    #[serde(deserialize_with = "decimal")]
    pub size: u64,
    #[serde(rename = "offset", deserialize_with = "decimal")]
    pub end_offset: u64,
}

fn decimal<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Decimal {
        Text(String),
        Number(u64),
    }

    match Decimal::deserialize(deserializer)? {
        Decimal::Number(n) => Ok(n),
        Decimal::Text(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom(format!("{s:?} is not a decimal u64"))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

/// The parts of `GET /tx/{id}` used to recognise a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TxHeader {
    #[serde(default)]
    pub data_root: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl TxHeader {
    /// Tag names and values decoded from base64url.
    pub fn decoded_tags(&self) -> Result<Tags> {
        self.tags
            .iter()
            .map(|tag| -> Result<(String, String)> {
                let name = base64url::decode_to_vec(tag.name.as_bytes())?;
                let value = base64url::decode_to_vec(tag.value.as_bytes())?;
                Ok((
                    String::from_utf8_lossy(&name).into_owned(),
                    String::from_utf8_lossy(&value).into_owned(),
                ))
            })
            .collect()
    }

    /// Whether the tags mark this transaction as a version 2.0.0 binary bundle.
    pub fn is_binary_bundle(&self) -> Result<bool> {
        let tags = self.decoded_tags()?;
        let has = |name: &str, value: &str| tags.iter().any(|(n, v)| n == name && v == value);
        Ok(has("Bundle-Format", "binary") && has("Bundle-Version", "2.0.0"))
    }
}

/// Outcome of a completed bundle fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleSummary {
    pub tx_id: String,
    pub size: u64,
    pub start_offset: u64,
    pub end_offset: u64,
    /// Number of chunk requests issued.
    pub chunks: usize,
    /// First bytes of the bundle, uninterpreted. `None` for bundles shorter
    /// than `HEADER_PREFIX_LEN`.
    pub header_prefix: Option<[u8; HEADER_PREFIX_LEN]>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_derives_inclusive_start() {
        let range = BundleRange::new("tx", 5, 104).unwrap();
        assert_eq!(range.start_offset, 100);
        assert_eq!(range.current_offset(), 100);
        assert_eq!(range.remaining(), 5);
        assert!(!range.is_complete());
    }

    #[test]
    fn range_rejects_impossible_sizes() {
        assert!(BundleRange::new("tx", 0, 104).is_err());
        assert!(BundleRange::new("tx", 106, 104).is_err());
        // a bundle may start at ledger offset 0
        assert_eq!(BundleRange::new("tx", 105, 104).unwrap().start_offset, 0);
    }

    #[test]
    fn advance_clamps_to_end_offset() {
        let mut range = BundleRange::new("tx", 10, 109).unwrap();
        assert_eq!(range.advance(4), 4);
        assert_eq!(range.current_offset(), 104);

        assert_eq!(range.advance(6), 6);
        assert!(range.is_complete());
        assert_eq!(range.current_offset(), range.end_offset);

        let mut range = BundleRange::new("tx", 3, 2).unwrap();
        assert_eq!(range.advance(8), 3);
        assert_eq!(range.received(), 3);
        assert_eq!(range.current_offset(), 2);
    }

    #[test]
    fn offset_info_accepts_strings_and_numbers() {
        let info: OffsetInfo = serde_json::from_str(r#"{"size":"5","offset":"104"}"#).unwrap();
        assert_eq!(info, OffsetInfo { size: 5, end_offset: 104 });

        let info: OffsetInfo = serde_json::from_str(r#"{"offset":104,"size":5}"#).unwrap();
        assert_eq!(info.end_offset, 104);

        assert!(serde_json::from_str::<OffsetInfo>(r#"{"size":"5"}"#).is_err());
        assert!(serde_json::from_str::<OffsetInfo>(r#"{"size":"-5","offset":"1"}"#).is_err());
        assert!(serde_json::from_str::<OffsetInfo>(r#"{"size":"5x","offset":"1"}"#).is_err());
    }

    #[test]
    fn recognises_binary_bundle_tags() {
        let header: TxHeader = serde_json::from_str(
            r#"{"data_root":"root","tags":[
                {"name":"QnVuZGxlLUZvcm1hdA","value":"YmluYXJ5"},
                {"name":"QnVuZGxlLVZlcnNpb24","value":"Mi4wLjA"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(header.decoded_tags().unwrap()[0], ("Bundle-Format".into(), "binary".into()));
        assert!(header.is_binary_bundle().unwrap());

        let plain: TxHeader = serde_json::from_str(
            r#"{"tags":[{"name":"Q29udGVudC1UeXBl","value":"aW1hZ2UvcG5n"}]}"#,
        )
        .unwrap();
        assert!(!plain.is_binary_bundle().unwrap());
    }

    #[test]
    fn rejects_undecodable_tags() {
        let header = TxHeader {
            data_root: String::new(),
            tags: vec![Tag {
                name: "Q".into(),
                value: "YQ".into(),
            }],
        };
        assert!(matches!(
            header.decoded_tags(),
            Err(PipelineError::InvalidEncoding(_))
        ));
    }
}
