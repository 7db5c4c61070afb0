//! In-memory reference engine with live result sets and writer-thread change
//! notification. Used by the crate's own tests and as a template for real
//! adaptors.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::errors::StoreError;
use crate::store::{ChangeListener, ListenerId, ResultSet, StoreEngine, StoreHandle};

struct Table<T> {
    rows: Mutex<Vec<T>>,
    version: AtomicU64,
    listeners: Mutex<HashMap<ListenerId, ChangeListener>>,
    next_listener: AtomicU64,
    closed: AtomicBool,
    open_handles: AtomicUsize,
}

/// Ordered in-memory store engine.
///
/// Writes bump a version counter and fire every registered change listener
/// synchronously on the writer thread, which models the notification thread
/// a real embedded store uses. Handles and result sets handed out by this
/// engine are `!Send`.
pub struct MemStoreEngine<T> {
    table: Arc<Table<T>>,
}

impl<T: Clone + Send + Sync + 'static> MemStoreEngine<T> {
    pub fn new() -> Self {
        Self::with_rows(Vec::new())
    }

    pub fn with_rows(rows: Vec<T>) -> Self {
        Self {
            table: Arc::new(Table {
                rows: Mutex::new(rows),
                version: AtomicU64::new(0),
                listeners: Mutex::new(HashMap::new()),
                next_listener: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                open_handles: AtomicUsize::new(0),
            }),
        }
    }

    /// Runs `mutate` on the row table, then notifies every registered
    /// listener on the calling thread.
    pub fn write(&self, mutate: impl FnOnce(&mut Vec<T>)) {
        {
            let mut rows = self.table.rows.lock();
            mutate(&mut rows);
        }
        self.table.version.fetch_add(1, Ordering::SeqCst);
        let listeners: Vec<ChangeListener> = self.table.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener();
        }
    }

    /// Closes the engine: open handles report closed and their result sets
    /// turn invalid.
    pub fn close(&self) {
        self.table.closed.store(true, Ordering::SeqCst);
        debug!("mem store engine closed");
    }

    pub fn len(&self) -> usize {
        self.table.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handles acquired and not yet released. The paged-view teardown
    /// invariant is that this returns to zero.
    pub fn open_handles(&self) -> usize {
        self.table.open_handles.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.table.listeners.lock().len()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for MemStoreEngine<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> StoreEngine for MemStoreEngine<T> {
    type Row = T;
    type Handle = MemHandle<T>;

    fn open_handle(&self) -> Result<MemHandle<T>, StoreError> {
        if self.table.closed.load(Ordering::SeqCst) {
            return Err(StoreError::HandleUnavailable);
        }
        self.table.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(MemHandle {
            shared: Arc::new(HandleShared {
                table: self.table.clone(),
                open: AtomicBool::new(true),
            }),
            _not_send: PhantomData,
        })
    }
}

struct HandleShared<T> {
    table: Arc<Table<T>>,
    open: AtomicBool,
}

impl<T> HandleShared<T> {
    fn usable(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.table.closed.load(Ordering::SeqCst)
    }

    fn release(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.table.open_handles.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Thread-affine session. `!Send`: live objects never leave the thread that
/// opened the handle.
pub struct MemHandle<T> {
    shared: Arc<HandleShared<T>>,
    _not_send: PhantomData<*const ()>,
}

impl<T> std::fmt::Debug for MemHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemHandle").finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> MemHandle<T> {
    /// Evaluates a filtering query. The result set stays live against the
    /// table until this handle closes.
    pub fn select(
        &self,
        filter: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Result<MemResults<T>, StoreError> {
        if self.is_closed() {
            return Err(StoreError::HandleUnavailable);
        }
        Ok(MemResults::new(self.shared.clone(), Arc::new(filter)))
    }

    pub fn select_all(&self) -> Result<MemResults<T>, StoreError> {
        self.select(|_| true)
    }
}

impl<T: Clone + Send + Sync + 'static> StoreHandle for MemHandle<T> {
    type Row = T;
    type Results = MemResults<T>;

    fn is_closed(&self) -> bool {
        !self.shared.usable()
    }

    fn close(&mut self) {
        self.shared.release();
    }
}

impl<T> Drop for MemHandle<T> {
    fn drop(&mut self) {
        self.shared.release();
    }
}

type RowFilter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Live view over the table. `len` re-materializes when the table version
/// has moved; `get` serves the materialization established by the last
/// `len`, so one `len`-then-`get` pass never mixes epochs.
pub struct MemResults<T> {
    handle: Arc<HandleShared<T>>,
    filter: RowFilter<T>,
    cached: RefCell<Vec<T>>,
    cached_version: Cell<u64>,
    _not_send: PhantomData<*const ()>,
}

impl<T> std::fmt::Debug for MemResults<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemResults").finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> MemResults<T> {
    fn new(handle: Arc<HandleShared<T>>, filter: RowFilter<T>) -> Self {
        let results = Self {
            handle,
            filter,
            cached: RefCell::new(Vec::new()),
            cached_version: Cell::new(u64::MAX),
            _not_send: PhantomData,
        };
        results.refresh();
        results
    }

    fn refresh(&self) {
        let version = self.handle.table.version.load(Ordering::SeqCst);
        if version != self.cached_version.get() {
            let rows = self.handle.table.rows.lock();
            *self.cached.borrow_mut() = rows.iter().filter(|row| (self.filter)(row)).cloned().collect();
            self.cached_version.set(version);
        }
    }
}

impl<T: Clone + Send + Sync + 'static> ResultSet for MemResults<T> {
    type Row = T;

    fn is_valid(&self) -> bool {
        self.handle.usable()
    }

    fn len(&self) -> usize {
        if !self.is_valid() {
            return 0;
        }
        self.refresh();
        self.cached.borrow().len()
    }

    fn get(&self, index: usize) -> Option<T> {
        if !self.is_valid() {
            return None;
        }
        self.cached.borrow().get(index).cloned()
    }

    fn add_change_listener(&self, listener: ChangeListener) -> ListenerId {
        let id = ListenerId(self.handle.table.next_listener.fetch_add(1, Ordering::SeqCst));
        self.handle.table.listeners.lock().insert(id, listener);
        id
    }

    fn remove_change_listener(&self, id: ListenerId) {
        self.handle.table.listeners.lock().remove(&id);
    }
}
