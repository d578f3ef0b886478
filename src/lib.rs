// Library entry point for the bundle dissector.
// Receiver layer (transport, bounded body reads), decoder layer (field scan,
// span accumulation, base64url) and the traversal that drives them per chunk.

pub mod config;
pub mod decoder;
pub mod error;
pub mod receiver;
pub mod retry;
pub mod traversal;
pub mod types;

pub use crate::config::NodeConfig;
pub use crate::error::{PipelineError, Result};
pub use crate::traversal::{BundleTraversal, TraversalState};
pub use crate::types::{BundleRange, BundleSummary, DecodedChunk};
