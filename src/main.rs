use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bundle_dissector_rs::config::{NodeConfig, DEFAULT_PORT};
use bundle_dissector_rs::retry::RetryPolicy;
use bundle_dissector_rs::traversal::BundleTraversal;

#[derive(Parser)]
#[command(name = "bundle-dissector")]
#[command(about = "Fetch a bundle chunk by chunk and write its raw bytes", long_about = None)]
struct Cli {
    /// Node host name or address
    #[arg(short, long, env = "ARWEAVE_NODE")]
    node: String,

    /// Node port
    #[arg(short, long, env = "ARWEAVE_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Transaction id of the bundle
    #[arg(short, long)]
    tx: String,

    /// `http` or `https`
    #[arg(long, default_value = "http")]
    scheme: String,

    /// Write the bundle here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Deadline for every single read, in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Retries for transient failures (0 disables retrying)
    #[arg(long, default_value_t = 3)]
    retries: usize,

    /// Check the transaction's bundle tags before fetching any chunk
    #[arg(long)]
    verify_format: bool,
}

impl Cli {
    fn node_config(&self) -> NodeConfig {
        NodeConfig::new(self.node.clone())
            .with_port(self.port)
            .with_scheme(self.scheme.clone())
            .with_read_timeout(Duration::from_secs(self.timeout_secs))
            .with_retry(RetryPolicy {
                max_retries: self.retries,
                ..RetryPolicy::default()
            })
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    // stdout may carry the bundle itself, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.node_config();
    info!(node = %config.base_url(), tx_id = %cli.tx, "starting bundle fetch");

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("shutdown signal received");
            shutdown.cancel();
        }
    });

    let mut traversal = BundleTraversal::connect(config)
        .context("invalid node configuration")?
        .with_cancellation(cancel);

    if cli.verify_format {
        traversal
            .verify_bundle_format(&cli.tx)
            .await
            .with_context(|| format!("tx {} is not a usable bundle", cli.tx))?;
    }

    let mut writer: Box<dyn AsyncWrite + Unpin + Send> = match &cli.output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let summary = traversal
        .fetch_to_writer(&cli.tx, &mut writer)
        .await
        .with_context(|| format!("failed to fetch bundle {}", cli.tx))?;

    let line = serde_json::to_string(&summary)?;
    if cli.output.is_some() {
        println!("{line}");
    } else {
        eprintln!("{line}");
    }

    Ok(())
}
