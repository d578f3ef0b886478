use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::NodeConfig;
use crate::error::{PipelineError, Result};

/// Body segments in the order the network delivered them.
pub type SegmentStream = BoxStream<'static, Result<Bytes>>;

/// Status line, framing length and body of one node response.
///
/// Header parsing and transfer framing belong to the transport; the decoder
/// layer only ever sees the body as a sequence of byte segments of arbitrary size.
pub struct NodeResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    segments: SegmentStream,
}

impl NodeResponse {
    pub fn new(status: u16, content_length: Option<u64>, segments: SegmentStream) -> Self {
        Self {
            status,
            content_length,
            segments,
        }
    }

    /// Response whose body is delivered exactly as the given segments.
    pub fn from_segments(status: u16, segments: Vec<Bytes>) -> Self {
        let len = segments.iter().map(|s| s.len() as u64).sum();
        Self::new(
            status,
            Some(len),
            stream::iter(segments.into_iter().map(Ok)).boxed(),
        )
    }
}

/// Minimal GET-only view of a ledger node.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// Issue `GET {path}` (path starts with `/`) and return once the status is known.
    async fn get(&self, path: &str) -> Result<NodeResponse>;
}

/// reqwest-backed transport talking to `{scheme}://{domain}:{port}`.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(config: &NodeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl NodeTransport for HttpTransport {
    async fn get(&self, path: &str) -> Result<NodeResponse> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "GET");

        let response = self.client.get(&url).send().await?;
        let status = response.status().as_u16();
        let content_length = response.content_length();
        let segments = response
            .bytes_stream()
            .map(|segment| segment.map_err(PipelineError::from))
            .boxed();

        Ok(NodeResponse::new(status, content_length, segments))
    }
}

/// Scripted in-process node, for exercising the pipeline without sockets.
///
/// Each path holds a queue of responses: they are served in order and the
/// last one is repeated. Unrouted paths answer 404.
#[derive(Default)]
pub struct MemoryTransport {
    routes: Mutex<HashMap<String, VecDeque<(u16, Vec<Bytes>)>>>,
    requests: Mutex<Vec<String>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `path`, delivered as the given body segments.
    pub fn route(&self, path: impl Into<String>, status: u16, segments: Vec<Bytes>) -> &Self {
        self.routes
            .lock()
            .expect("memory transport routes mutex poisoned")
            .entry(path.into())
            .or_default()
            .push_back((status, segments));
        self
    }

    /// Paths requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .expect("memory transport requests mutex poisoned")
            .clone()
    }
}

#[async_trait]
impl NodeTransport for MemoryTransport {
    async fn get(&self, path: &str) -> Result<NodeResponse> {
        self.requests
            .lock()
            .expect("memory transport requests mutex poisoned")
            .push(path.to_string());

        let scripted = {
            let mut routes = self
                .routes
                .lock()
                .expect("memory transport routes mutex poisoned");
            match routes.get_mut(path) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };
        let (status, segments) =
            scripted.unwrap_or_else(|| (404, vec![Bytes::from_static(b"Not Found")]));

        Ok(NodeResponse::from_segments(status, segments))
    }
}

/// Race `fut` against the cancellation token and a deadline.
///
/// Cancellation is checked first so a cancelled fetch never starts another read.
pub async fn bounded<T, F>(fut: F, deadline: Duration, cancel: &CancellationToken) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;

        _ = cancel.cancelled() => Err(PipelineError::Cancelled),

        res = tokio::time::timeout(deadline, fut) => {
            res.map_err(|_| PipelineError::Timeout { after: deadline })
        }
    }
}

/// Pulls body segments off a `NodeResponse` with a per-read deadline.
pub struct BodyReceiver {
    status: u16,
    content_length: Option<u64>,
    segments: SegmentStream,
    read_timeout: Duration,
    cancel: CancellationToken,
    received: u64,
}

impl BodyReceiver {
    pub fn new(response: NodeResponse, read_timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            status: response.status,
            content_length: response.content_length,
            segments: response.segments,
            read_timeout,
            cancel,
            received: 0,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Body bytes handed out so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Next non-empty segment, `None` at end of body.
    pub async fn next_segment(&mut self) -> Result<Option<Bytes>> {
        loop {
            let next = bounded(self.segments.next(), self.read_timeout, &self.cancel).await?;
            match next {
                None => return Ok(None),
                Some(Err(e)) => return Err(e),
                Some(Ok(segment)) if segment.is_empty() => continue,
                Some(Ok(segment)) => {
                    self.received += segment.len() as u64;
                    return Ok(Some(segment));
                }
            }
        }
    }

    /// Collect a small body in full. Bodies larger than `limit` are rejected.
    pub async fn read_to_end(mut self, limit: usize) -> Result<Vec<u8>> {
        let mut body = BytesMut::with_capacity(
            self.content_length
                .map(|len| (len as usize).min(limit))
                .unwrap_or(0),
        );
        while let Some(segment) = self.next_segment().await? {
            if body.len() + segment.len() > limit {
                return Err(PipelineError::MalformedResponse(format!(
                    "response body exceeds {limit} bytes"
                )));
            }
            body.extend_from_slice(&segment);
        }
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receiver(response: NodeResponse) -> BodyReceiver {
        BodyReceiver::new(response, Duration::from_secs(1), CancellationToken::new())
    }

    #[tokio::test]
    async fn skips_empty_segments_and_counts_bytes() {
        let response = NodeResponse::from_segments(
            200,
            vec![
                Bytes::from_static(b"ab"),
                Bytes::new(),
                Bytes::from_static(b"cde"),
            ],
        );
        assert_eq!(response.content_length, Some(5));

        let mut body = receiver(response);
        assert_eq!(body.next_segment().await.unwrap().unwrap(), "ab");
        assert_eq!(body.next_segment().await.unwrap().unwrap(), "cde");
        assert!(body.next_segment().await.unwrap().is_none());
        assert_eq!(body.received(), 5);
    }

    #[tokio::test]
    async fn read_to_end_enforces_limit() {
        let body = receiver(NodeResponse::from_segments(
            200,
            vec![Bytes::from_static(b"{\"size\":"), Bytes::from_static(b"\"5\"}")],
        ));
        assert_eq!(body.read_to_end(64).await.unwrap(), b"{\"size\":\"5\"}");

        let body = receiver(NodeResponse::from_segments(200, vec![Bytes::from(vec![b'x'; 65])]));
        assert!(matches!(
            body.read_to_end(64).await,
            Err(PipelineError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn stalled_read_times_out() {
        let response = NodeResponse::new(200, None, stream::pending::<Result<Bytes>>().boxed());
        let mut body = BodyReceiver::new(response, Duration::from_millis(20), CancellationToken::new());
        assert!(matches!(
            body.next_segment().await,
            Err(PipelineError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn cancelled_token_wins_over_ready_data() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let response = NodeResponse::from_segments(200, vec![Bytes::from_static(b"ready")]);
        let mut body = BodyReceiver::new(response, Duration::from_secs(1), cancel);
        assert!(matches!(body.next_segment().await, Err(PipelineError::Cancelled)));
    }

    #[tokio::test]
    async fn stream_errors_propagate() {
        let segments = stream::iter(vec![
            Ok(Bytes::from_static(b"{")),
            Err(PipelineError::Network("connection reset".into())),
        ])
        .boxed();
        let mut body = receiver(NodeResponse::new(200, None, segments));
        assert!(body.next_segment().await.unwrap().is_some());
        assert!(matches!(
            body.next_segment().await,
            Err(PipelineError::Network(_))
        ));
    }

    #[tokio::test]
    async fn memory_transport_serves_queue_then_repeats_last() {
        let transport = MemoryTransport::new();
        transport
            .route("/chunk/1", 503, vec![])
            .route("/chunk/1", 200, vec![Bytes::from_static(b"ok")]);

        assert_eq!(transport.get("/chunk/1").await.unwrap().status, 503);
        assert_eq!(transport.get("/chunk/1").await.unwrap().status, 200);
        assert_eq!(transport.get("/chunk/1").await.unwrap().status, 200);
        assert_eq!(transport.get("/chunk/2").await.unwrap().status, 404);
        assert_eq!(
            transport.requests(),
            vec!["/chunk/1", "/chunk/1", "/chunk/1", "/chunk/2"]
        );
    }
}
