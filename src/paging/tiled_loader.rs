use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::bridge::StoreSession;
use crate::dispatch::{Affinity, ConfinedDispatcher, Slot};
use crate::errors::Result;
use crate::query::{transform_failure, LiveQuery, RowTransform};
use crate::store::{ResultSet, StoreEngine, StoreHandle};

/// Lifecycle of a tiled loader. `Invalidated` is terminal: a loader never
/// revives, the composer replaces it wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoaderPhase {
    Unopened,
    Open,
    Invalidated,
}

/// Windowed (`count`/`load_range`) view over one evaluation of a live query.
///
/// The session opens lazily on first use: a handle is acquired on the
/// dispatcher, the query evaluated, and a change listener registered that
/// invalidates the whole loader on the first mutation. Elements are read
/// fresh from the live result set on every call; no page cache is kept,
/// since any cache would go stale the moment invalidation can occur
/// mid-load.
pub struct TiledLoader<E: StoreEngine, R> {
    shared: Arc<LoaderShared<E, R>>,
}

struct LoaderShared<E: StoreEngine, R> {
    dispatcher: Arc<ConfinedDispatcher>,
    engine: Arc<E>,
    query: LiveQuery<E>,
    transform: RowTransform<E, R>,
    phase: Mutex<LoaderPhase>,
    slot: Slot<StoreSession<E>>,
    invalid_tx: watch::Sender<bool>,
    ever_opened: AtomicBool,
}

impl<E: StoreEngine, R: Send + 'static> TiledLoader<E, R> {
    pub fn new(
        dispatcher: Arc<ConfinedDispatcher>,
        engine: Arc<E>,
        query: LiveQuery<E>,
        transform: RowTransform<E, R>,
    ) -> Self {
        let (invalid_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(LoaderShared {
                dispatcher,
                engine,
                query,
                transform,
                phase: Mutex::new(LoaderPhase::Unopened),
                slot: Slot::reserve(),
                invalid_tx,
                ever_opened: AtomicBool::new(false),
            }),
        }
    }

    /// Live element count. Zero once the loader is invalidated, the handle
    /// is closed, or the result set is invalid; those are expected
    /// steady-state events, not errors.
    pub async fn count(&self) -> usize {
        if !self.ensure_open().await {
            return 0;
        }
        let slot = self.shared.slot;
        let counted = self
            .shared
            .dispatcher
            .call(move |affinity| {
                affinity
                    .with(slot, |session: &mut StoreSession<E>| {
                        if !session.is_usable() {
                            return 0;
                        }
                        session.results().map(|results| results.len()).unwrap_or(0)
                    })
                    .unwrap_or(0)
            })
            .await;
        match counted {
            Ok(count) => count,
            Err(e) => {
                debug!("count after dispatcher close: {}", e);
                0
            }
        }
    }

    /// Loads `[start, min(start + length, count))` in index order, reading
    /// every element within one dispatcher job so the whole range observes a
    /// single result-set epoch. Out-of-range or unusable states yield an
    /// empty page; only transform failures are errors.
    pub async fn load_range(&self, start: usize, length: usize) -> Result<Vec<R>> {
        if !self.ensure_open().await {
            return Ok(Vec::new());
        }
        let slot = self.shared.slot;
        let transform = self.shared.transform.clone();
        let loaded = self
            .shared
            .dispatcher
            .call(move |affinity| {
                affinity
                    .with(slot, |session: &mut StoreSession<E>| -> Result<Vec<R>> {
                        let (Some(handle), Some(results)) = (session.handle(), session.results())
                        else {
                            return Ok(Vec::new());
                        };
                        if handle.is_closed() || !results.is_valid() {
                            return Ok(Vec::new());
                        }
                        let total = results.len();
                        if total == 0 || start >= total {
                            return Ok(Vec::new());
                        }
                        let end = (start + length).min(total);
                        let mut items = Vec::with_capacity(end - start);
                        for index in start..end {
                            let Some(row) = results.get(index) else {
                                continue;
                            };
                            let value = (transform)(handle, &row)
                                .map_err(|e| transform_failure(index, e))?;
                            items.push(value);
                        }
                        Ok(items)
                    })
                    .unwrap_or_else(|| Ok(Vec::new()))
            })
            .await;
        match loaded {
            Ok(page) => page,
            Err(e) => {
                debug!("load_range after dispatcher close: {}", e);
                Ok(Vec::new())
            }
        }
    }

    /// Invalidates the loader explicitly: unregister the listener, release
    /// the handle. Idempotent, and indistinguishable from a store-triggered
    /// invalidation to observers.
    pub fn close(&self) {
        invalidate(&self.shared);
    }

    pub fn is_invalidated(&self) -> bool {
        *self.shared.phase.lock() == LoaderPhase::Invalidated
    }

    /// Whether a session was ever successfully opened. False together with
    /// `is_invalidated` means the store itself was unusable.
    pub fn ever_opened(&self) -> bool {
        self.shared.ever_opened.load(Ordering::SeqCst)
    }

    /// Resolves once the loader transitions to `Invalidated`.
    pub async fn invalidated(&self) {
        let mut rx = self.shared.invalid_tx.subscribe();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Opens the session if this is the first use. Returns false once the
    /// loader is (or just became) invalidated.
    async fn ensure_open(&self) -> bool {
        {
            let phase = self.shared.phase.lock();
            match *phase {
                LoaderPhase::Invalidated => return false,
                LoaderPhase::Open => return true,
                LoaderPhase::Unopened => {}
            }
        }
        let shared = self.shared.clone();
        let opened = self
            .shared
            .dispatcher
            .call(move |affinity| open_session(&shared, affinity))
            .await;
        match opened {
            Ok(true) => true,
            Ok(false) => {
                invalidate(&self.shared);
                false
            }
            Err(e) => {
                debug!("loader open after dispatcher close: {}", e);
                invalidate(&self.shared);
                false
            }
        }
    }
}

impl<E: StoreEngine, R> Drop for TiledLoader<E, R> {
    fn drop(&mut self) {
        invalidate(&self.shared);
    }
}

/// Runs on the dispatcher. Concurrent first uses race to this job; the FIFO
/// queue serializes them and the phase check makes the second a no-op.
fn open_session<E: StoreEngine, R: 'static>(shared: &Arc<LoaderShared<E, R>>, affinity: &Affinity) -> bool {
    {
        let phase = shared.phase.lock();
        match *phase {
            LoaderPhase::Invalidated => return false,
            LoaderPhase::Open => return true,
            LoaderPhase::Unopened => {}
        }
    }
    let mut session = match StoreSession::open(shared.engine.as_ref(), &shared.query) {
        Ok(session) => session,
        Err(e) => {
            warn!("tiled loader open failed: {}", e);
            return false;
        }
    };
    if !session.is_usable() {
        session.detach();
        return false;
    }
    let weak = Arc::downgrade(shared);
    session.listen(Arc::new(move || {
        if let Some(shared) = weak.upgrade() {
            invalidate(&shared);
        }
    }));
    affinity.insert(shared.slot, session);
    shared.ever_opened.store(true, Ordering::SeqCst);
    *shared.phase.lock() = LoaderPhase::Open;
    true
}

/// Exactly-once transition to `Invalidated`; later calls are no-ops. The
/// session detach re-enters the dispatcher. A detach submitted after the
/// dispatcher closed is swallowed: the drained worker already dropped the
/// slot and the session with it.
fn invalidate<E: StoreEngine, R>(shared: &Arc<LoaderShared<E, R>>) {
    {
        let mut phase = shared.phase.lock();
        if *phase == LoaderPhase::Invalidated {
            return;
        }
        *phase = LoaderPhase::Invalidated;
    }
    debug!("tiled loader invalidated");
    let _ = shared.invalid_tx.send(true);
    let slot = shared.slot;
    let submitted = shared.dispatcher.run(move |affinity| {
        if let Some(mut session) = affinity.take(slot) {
            session.detach();
        }
    });
    if let Err(e) = submitted {
        debug!("loader teardown after dispatcher close: {}", e);
    }
}
