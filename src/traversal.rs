//! Drives the fetch of one bundle: resolve its ledger range, then request
//! chunk after chunk until every byte of the bundle has been written out.
//!
//! ```text
//! FetchingOffset ──► Traversing(current_offset) ──► Complete
//!        │                    │  ▲
//!        │                    └──┘ one /chunk request per step
//!        └────────────► Failed ◄──┘
//! ```
//!
//! Requests are strictly sequential and each chunk body is decoded while it
//! streams in. The only state carried from one chunk to the next is the
//! `BundleRange` cursor and the output writer.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::decoder::{hex_preview, ChunkDecoder};
use crate::error::{PipelineError, Result};
use crate::receiver::{bounded, BodyReceiver, HttpTransport, NodeTransport};
use crate::retry::{backoff_or_fail, retry_with_backoff};
use crate::types::{
    BundleRange, BundleSummary, DecodedChunk, OffsetInfo, TxHeader, HEADER_PREFIX_LEN,
};

/// Upper bound for the small JSON documents (`/offset`, `/tx/{id}`).
const SMALL_BODY_LIMIT: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalState {
    FetchingOffset,
    Traversing { current_offset: u64 },
    Complete,
    Failed,
}

pub struct BundleTraversal<T: NodeTransport> {
    transport: T,
    config: NodeConfig,
    decoder: ChunkDecoder,
    cancel: CancellationToken,
    state: TraversalState,
}

impl BundleTraversal<HttpTransport> {
    /// Traversal over HTTP against the node described by `config`.
    pub fn connect(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(&config)?;
        Ok(Self::new(transport, config))
    }
}

impl<T: NodeTransport> BundleTraversal<T> {
    pub fn new(transport: T, config: NodeConfig) -> Self {
        let decoder = ChunkDecoder::new(config.span_capacity);
        Self {
            transport,
            config,
            decoder,
            cancel: CancellationToken::new(),
            state: TraversalState::FetchingOffset,
        }
    }

    /// Abort every pending read and backoff once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> TraversalState {
        self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Send `GET {path}` and check for a 200. `resource` names what was asked
    /// for in the resulting `HttpStatus` error.
    async fn open(&self, path: &str, resource: &str) -> Result<BodyReceiver> {
        let response = bounded(self.transport.get(path), self.config.read_timeout, &self.cancel).await??;
        if response.status != 200 {
            return Err(PipelineError::HttpStatus {
                resource: resource.to_string(),
                status: response.status,
            });
        }
        Ok(BodyReceiver::new(
            response,
            self.config.read_timeout,
            self.cancel.clone(),
        ))
    }

    /// Look up the size and ledger end offset of `tx_id`.
    pub async fn fetch_offset(&self, tx_id: &str) -> Result<OffsetInfo> {
        let path = format!("/tx/{tx_id}/offset");
        let path = path.as_str();
        let this = self;

        retry_with_backoff(&self.config.retry, &self.cancel, || async move {
            let body = this.open(path, tx_id).await?.read_to_end(SMALL_BODY_LIMIT).await?;
            Ok(serde_json::from_slice::<OffsetInfo>(&body)?)
        })
        .await
    }

    /// Resolve `tx_id` to its ledger byte range.
    pub async fn fetch_range(&self, tx_id: &str) -> Result<BundleRange> {
        let info = self.fetch_offset(tx_id).await?;
        let range = BundleRange::new(tx_id, info.size, info.end_offset)?;
        info!(
            tx_id,
            size = range.size,
            start_offset = range.start_offset,
            end_offset = range.end_offset,
            "resolved bundle range"
        );
        Ok(range)
    }

    /// Fetch the transaction header and fail unless its tags mark a binary bundle.
    pub async fn verify_bundle_format(&self, tx_id: &str) -> Result<TxHeader> {
        let path = format!("/tx/{tx_id}");
        let path = path.as_str();
        let this = self;

        let header = retry_with_backoff(&self.config.retry, &self.cancel, || async move {
            let body = this.open(path, tx_id).await?.read_to_end(SMALL_BODY_LIMIT).await?;
            Ok(serde_json::from_slice::<TxHeader>(&body)?)
        })
        .await?;

        if !header.is_binary_bundle()? {
            return Err(PipelineError::MalformedResponse(format!(
                "tx {tx_id} is not tagged as a binary bundle"
            )));
        }
        debug!(tx_id, data_root = %header.data_root, "bundle format verified");
        Ok(header)
    }

    /// Request and decode the chunk anchored at `offset`, once.
    pub async fn fetch_chunk(&mut self, offset: u64) -> Result<DecodedChunk> {
        let path = format!("/chunk/{offset}");
        let mut body = self.open(&path, &offset.to_string()).await?;
        self.decoder.decode_body(offset, &mut body).await
    }

    /// `fetch_chunk` under the retry policy. A body cannot be resumed, so
    /// every retry re-issues the whole request.
    async fn fetch_chunk_with_retry(&mut self, offset: u64) -> Result<DecodedChunk> {
        let mut attempt = 0;
        loop {
            match self.fetch_chunk(offset).await {
                Ok(chunk) => return Ok(chunk),
                Err(err) => {
                    backoff_or_fail(&self.config.retry, &self.cancel, attempt, err).await?;
                    attempt += 1;
                }
            }
        }
    }

    /// Fetch bundle `tx_id` and write its bytes, in order, to `writer`.
    pub async fn fetch_to_writer<W>(&mut self, tx_id: &str, writer: &mut W) -> Result<BundleSummary>
    where
        W: AsyncWrite + Unpin,
    {
        self.state = TraversalState::FetchingOffset;
        let result = self.drive(tx_id, writer).await;
        self.state = if result.is_ok() {
            TraversalState::Complete
        } else {
            TraversalState::Failed
        };
        result
    }

    /// Fetch bundle `tx_id` into memory.
    pub async fn fetch_to_vec(&mut self, tx_id: &str) -> Result<(BundleSummary, Vec<u8>)> {
        let mut out = Vec::new();
        let summary = self.fetch_to_writer(tx_id, &mut out).await?;
        Ok((summary, out))
    }

    async fn drive<W>(&mut self, tx_id: &str, writer: &mut W) -> Result<BundleSummary>
    where
        W: AsyncWrite + Unpin,
    {
        let mut range = self.fetch_range(tx_id).await?;
        let mut prefix = Vec::with_capacity(HEADER_PREFIX_LEN);
        let mut chunks = 0;

        while !range.is_complete() {
            let offset = range.current_offset();
            self.state = TraversalState::Traversing {
                current_offset: offset,
            };

            let chunk = self.fetch_chunk_with_retry(offset).await?;
            chunks += 1;
            if chunk.is_empty() {
                return Err(PipelineError::NoProgress { offset });
            }

            let accepted = range.advance(chunk.len() as u64) as usize;
            if accepted < chunk.len() {
                warn!(
                    offset,
                    decoded = chunk.len(),
                    accepted,
                    "chunk runs past the end of the bundle, truncating"
                );
            }
            let bytes = &chunk.bytes[..accepted];

            if prefix.len() < HEADER_PREFIX_LEN {
                let take = (HEADER_PREFIX_LEN - prefix.len()).min(bytes.len());
                prefix.extend_from_slice(&bytes[..take]);
                if prefix.len() == HEADER_PREFIX_LEN {
                    debug!(tx_id, prefix = %hex_preview(&prefix, HEADER_PREFIX_LEN), "bundle header prefix");
                }
            }

            writer.write_all(bytes).await?;
            debug!(
                offset,
                decoded = chunk.len(),
                received = range.received(),
                remaining = range.remaining(),
                "chunk appended"
            );
        }
        writer.flush().await?;

        info!(tx_id, size = range.size, chunks, "bundle complete");
        Ok(BundleSummary {
            tx_id: range.tx_id.clone(),
            size: range.size,
            start_offset: range.start_offset,
            end_offset: range.end_offset,
            chunks,
            header_prefix: <[u8; HEADER_PREFIX_LEN]>::try_from(prefix.as_slice()).ok(),
        })
    }
}
