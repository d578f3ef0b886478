use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use bundle_dissector_rs::config::DEFAULT_SPAN_CAPACITY;
use bundle_dissector_rs::decoder::{hex_preview, ChunkDecoder};

/// Segment size used to replay a saved body through the decoder.
const SEGMENT_LEN: usize = 1024;

/// Decode a saved `/chunk/{offset}` response body.
#[derive(Parser)]
#[command(name = "decode_chunk")]
struct Args {
    /// Response body to decode; reads stdin when omitted
    file: Option<PathBuf>,

    /// Write the decoded bytes to stdout
    #[arg(long)]
    raw: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let body = match &args.file {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?
        }
        None => {
            let mut body = Vec::new();
            std::io::stdin()
                .read_to_end(&mut body)
                .context("failed to read stdin")?;
            body
        }
    };

    let mut decoder = ChunkDecoder::new(DEFAULT_SPAN_CAPACITY);
    for segment in body.chunks(SEGMENT_LEN) {
        if decoder.feed(segment)? {
            break;
        }
    }
    let chunk = decoder.finish(0).context("decode failed")?;

    eprintln!("body len = {}, decoded len = {}", body.len(), chunk.len());
    eprintln!("hex preview (first 256 bytes):");
    eprintln!("{}", hex_preview(&chunk.bytes, 256));

    if args.raw {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(&chunk.bytes)?;
        stdout.flush()?;
    }
    Ok(())
}
