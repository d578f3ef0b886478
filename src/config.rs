//! Node connection settings and the chunk size constants they are checked against.

use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::retry::RetryPolicy;

/// Largest raw chunk the ledger stores (256 KiB).
pub const MAX_CHUNK_SIZE: usize = 262_144;

/// Base64url length of a maximum-size chunk.
pub const MAX_ENCODED_CHUNK_SIZE: usize = (MAX_CHUNK_SIZE * 4 + 2) / 3;

/// Span accumulator size: one maximum encoded chunk plus slack.
pub const DEFAULT_SPAN_CAPACITY: usize = MAX_ENCODED_CHUNK_SIZE + 4096;

pub const DEFAULT_PORT: u16 = 1984;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Host name or address of the node
    pub domain: String,

    pub port: u16,

    /// `http` or `https`
    pub scheme: String,

    /// Deadline for the response head and for every individual body read
    pub read_timeout: Duration,

    pub connect_timeout: Duration,

    pub retry: RetryPolicy,

    /// Capacity of the span accumulator holding one encoded chunk
    pub span_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            port: DEFAULT_PORT,
            scheme: "http".to_string(),
            read_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            span_capacity: DEFAULT_SPAN_CAPACITY,
        }
    }
}

impl NodeConfig {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build a config from a base URL such as `http://127.0.0.1:40123`.
    pub fn from_base_url(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| PipelineError::Config(format!("missing scheme in {url}")))?;
        let authority = rest.trim_end_matches('/');
        let (domain, port) = match authority.rsplit_once(':') {
            Some((domain, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| PipelineError::Config(format!("invalid port in {url}")))?;
                (domain, port)
            }
            None => (authority, DEFAULT_PORT),
        };

        let config = Self::new(domain).with_port(port).with_scheme(scheme);
        config.validate()?;
        Ok(config)
    }

    /// `{scheme}://{domain}:{port}`
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.domain, self.port)
    }

    /// Reject settings the pipeline cannot run with. A span capacity below one
    /// maximum encoded chunk would overflow on a legal response.
    pub fn validate(&self) -> Result<()> {
        if self.domain.is_empty() {
            return Err(PipelineError::Config("node domain is empty".into()));
        }
        if self.port == 0 {
            return Err(PipelineError::Config("node port must be non-zero".into()));
        }
        if self.scheme != "http" && self.scheme != "https" {
            return Err(PipelineError::Config(format!(
                "unsupported scheme {:?}",
                self.scheme
            )));
        }
        if self.read_timeout.is_zero() {
            return Err(PipelineError::Config("read timeout must be non-zero".into()));
        }
        if self.span_capacity < MAX_ENCODED_CHUNK_SIZE {
            return Err(PipelineError::Config(format!(
                "span capacity {} is below the maximum encoded chunk size {}",
                self.span_capacity, MAX_ENCODED_CHUNK_SIZE
            )));
        }
        Ok(())
    }
}
