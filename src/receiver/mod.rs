//! Receiver layer: fetches node responses and hands their bodies out as
//! byte segments, one bounded read at a time.

#[allow(clippy::module_inception)]
mod receiver;

pub use receiver::{
    bounded, BodyReceiver, HttpTransport, MemoryTransport, NodeResponse, NodeTransport,
    SegmentStream,
};
