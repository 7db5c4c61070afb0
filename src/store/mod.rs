//! Store collaborator contract: engines, thread-affine handles, and live
//! change-notifying result sets.
//!
//! The storage/query engine itself is an external collaborator; this module
//! only fixes the seam the paged-view layer depends on. Implementations that
//! forbid cross-thread access express it in the type system by making their
//! handle and result-set types `!Send`, so they cannot leave the dispatcher
//! worker that created them.

pub mod adaptors;
mod scoped;

pub use scoped::*;


use std::sync::Arc;

use crate::errors::StoreError;

/// Callback invoked by the engine whenever a result set's contents change.
/// Fired from the engine's own notification thread; implementations must
/// re-enter the owning dispatcher before touching handles or result sets.
pub type ChangeListener = Arc<dyn Fn() + Send + Sync>;

/// Registration token for [`ResultSet::remove_change_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

pub trait StoreEngine: Send + Sync + 'static {
    type Row: 'static;
    type Handle: StoreHandle<Row = Self::Row>;

    /// Opens a session handle on the calling thread.
    fn open_handle(&self) -> Result<Self::Handle, StoreError>;
}

pub trait StoreHandle: 'static {
    type Row: 'static;
    type Results: ResultSet<Row = Self::Row>;

    fn is_closed(&self) -> bool;

    /// Releases the session. Idempotent; implementations must also release
    /// on `Drop` so scoped use survives panics.
    fn close(&mut self);
}

pub trait ResultSet: 'static {
    type Row: 'static;

    /// False once the backing handle or engine is gone. An invalid result
    /// set is unusable: discard it and re-acquire.
    fn is_valid(&self) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The element at `index` under the view established by the last
    /// [`len`](ResultSet::len) call, so a `len`-then-`get` sequence reads
    /// one consistent validity epoch.
    fn get(&self, index: usize) -> Option<Self::Row>;

    fn add_change_listener(&self, listener: ChangeListener) -> ListenerId;

    /// Idempotent; unknown ids are ignored.
    fn remove_change_listener(&self, id: ListenerId);
}

/// Results type produced by evaluating a query against `E`'s handle.
pub type ResultsOf<E> = <<E as StoreEngine>::Handle as StoreHandle>::Results;
