use std::sync::Arc;

use crate::dispatch::ConfinedDispatcher;
use crate::errors::Result;
use crate::store::{StoreEngine, StoreHandle};

/// Acquires a handle, runs `f`, and releases the handle before returning,
/// on every exit path.
pub fn with_handle<E, R>(engine: &E, f: impl FnOnce(&E::Handle) -> Result<R>) -> Result<R>
where
    E: StoreEngine,
{
    let mut handle = engine.open_handle()?;
    let out = f(&handle);
    handle.close();
    out
}

/// The same unit of work, confined to `dispatcher`'s worker thread. The
/// handle is opened, used, and released without ever leaving that thread.
pub async fn with_handle_on<E, R, F>(
    dispatcher: &ConfinedDispatcher,
    engine: Arc<E>,
    f: F,
) -> Result<R>
where
    E: StoreEngine,
    R: Send + 'static,
    F: FnOnce(&E::Handle) -> Result<R> + Send + 'static,
{
    dispatcher
        .call(move |_affinity| with_handle(engine.as_ref(), f))
        .await?
}
