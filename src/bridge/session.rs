use tracing::debug;

use crate::errors::StoreError;
use crate::query::LiveQuery;
use crate::store::{ChangeListener, ListenerId, ResultSet, ResultsOf, StoreEngine, StoreHandle};

/// One subscription's confined state: the open handle, the live result set,
/// and the registered change listener. Lives in an [`Affinity`] slot on the
/// owning dispatcher's worker thread and never leaves it.
///
/// [`Affinity`]: crate::dispatch::Affinity
pub(crate) struct StoreSession<E: StoreEngine> {
    handle: Option<E::Handle>,
    results: Option<ResultsOf<E>>,
    listener: Option<ListenerId>,
}

impl<E: StoreEngine> StoreSession<E> {
    /// Opens a handle and evaluates `query`. No listener is registered yet.
    pub fn open(engine: &E, query: &LiveQuery<E>) -> Result<Self, StoreError> {
        let mut handle = engine.open_handle()?;
        match query.evaluate(&handle) {
            Ok(results) => Ok(Self {
                handle: Some(handle),
                results: Some(results),
                listener: None,
            }),
            Err(e) => {
                handle.close();
                Err(e)
            }
        }
    }

    /// Registers `listener` on the live result set. At most one listener per
    /// session.
    pub fn listen(&mut self, listener: ChangeListener) {
        if self.listener.is_some() {
            debug!("session listener already registered, ignoring");
            return;
        }
        if let Some(results) = &self.results {
            self.listener = Some(results.add_change_listener(listener));
        }
    }

    pub fn is_usable(&self) -> bool {
        match (&self.handle, &self.results) {
            (Some(handle), Some(results)) => !handle.is_closed() && results.is_valid(),
            _ => false,
        }
    }

    pub fn handle(&self) -> Option<&E::Handle> {
        self.handle.as_ref()
    }

    pub fn results(&self) -> Option<&ResultsOf<E>> {
        self.results.as_ref()
    }

    /// Tears down in order: remove the change listener, drop the result set,
    /// close the handle. Safe to call any number of times.
    pub fn detach(&mut self) {
        if let Some(id) = self.listener.take() {
            if let Some(results) = &self.results {
                results.remove_change_listener(id);
            }
        }
        drop(self.results.take());
        if let Some(mut handle) = self.handle.take() {
            handle.close();
        }
    }
}

impl<E: StoreEngine> Drop for StoreSession<E> {
    fn drop(&mut self) {
        self.detach();
    }
}
