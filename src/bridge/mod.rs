//! Bridges store change callbacks into outward signals: pushed snapshots
//! (stream mode) or invalidate-and-discard (windowed loaders).

mod session;
mod snapshot_stream;

pub(crate) use session::*;
pub use snapshot_stream::*;

#[cfg(test)]
mod snapshot_stream_test;
