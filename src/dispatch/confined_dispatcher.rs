use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use super::Affinity;
use crate::errors::DispatchError;

type Job = Box<dyn FnOnce(&Affinity) + Send + 'static>;

static NEXT_DISPATCHER_ID: AtomicU64 = AtomicU64::new(1);

enum WorkerState {
    /// No worker yet; spawned lazily on the first submission
    Idle,
    Running {
        job_tx: mpsc::UnboundedSender<Job>,
        thread: Option<JoinHandle<()>>,
    },
    Closed,
}

/// Single-threaded executor enforcing store thread affinity.
///
/// Jobs submitted with [`run`](ConfinedDispatcher::run) or
/// [`call`](ConfinedDispatcher::call) execute in submission order on one
/// dedicated worker thread. A job submitted from the worker thread itself
/// runs inline, so reentrant calls cannot deadlock. The worker is created
/// lazily; immediately-cancelled subscriptions never pay for a thread.
pub struct ConfinedDispatcher {
    id: u64,
    tag: String,
    state: Mutex<WorkerState>,
}

impl ConfinedDispatcher {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            id: NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed),
            tag: tag.into(),
            state: Mutex::new(WorkerState::Idle),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.state.lock(), WorkerState::Closed)
    }

    /// Submits `f` for execution on the worker thread. Runs `f` in place
    /// when the caller is already on that thread.
    pub fn run<F>(&self, f: F) -> Result<(), DispatchError>
    where
        F: FnOnce(&Affinity) + Send + 'static,
    {
        if let Some(affinity) = Affinity::current(self.id) {
            f(&affinity);
            return Ok(());
        }
        let job_tx = self.ensure_worker()?;
        job_tx
            .send(Box::new(f))
            .map_err(|_| DispatchError::Closed)
    }

    /// Submits `f` and awaits its return value.
    pub async fn call<F, R>(&self, f: F) -> Result<R, DispatchError>
    where
        F: FnOnce(&Affinity) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.run(move |affinity| {
            let _ = reply_tx.send(f(affinity));
        })?;
        reply_rx.await.map_err(|_| DispatchError::WorkerGone)
    }

    fn ensure_worker(&self) -> Result<mpsc::UnboundedSender<Job>, DispatchError> {
        let mut state = self.state.lock();
        match &*state {
            WorkerState::Running { job_tx, .. } => Ok(job_tx.clone()),
            WorkerState::Closed => Err(DispatchError::Closed),
            WorkerState::Idle => {
                let (job_tx, job_rx) = mpsc::unbounded_channel();
                let id = self.id;
                let tag = self.tag.clone();
                let thread = std::thread::Builder::new()
                    .name(tag.clone())
                    .spawn(move || worker_loop(id, tag, job_rx))
                    .map_err(|e| DispatchError::SpawnFailed(e.to_string()))?;
                *state = WorkerState::Running {
                    job_tx: job_tx.clone(),
                    thread: Some(thread),
                };
                Ok(job_tx)
            }
        }
    }

    /// Stops the run-loop after draining already-queued work and joins the
    /// worker thread. Idempotent. A reentrant close from the worker itself
    /// skips the join; the drain still runs.
    pub fn close(&self) {
        let prev = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, WorkerState::Closed)
        };
        if let WorkerState::Running { job_tx, thread } = prev {
            drop(job_tx);
            let on_worker = Affinity::current(self.id).is_some();
            if let Some(handle) = thread {
                if on_worker {
                    debug!("[{}] close from worker thread, skipping join", self.tag);
                } else if handle.join().is_err() {
                    error!("[{}] worker thread panicked during drain", self.tag);
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn worker_started(&self) -> bool {
        matches!(*self.state.lock(), WorkerState::Running { .. })
    }
}

impl Drop for ConfinedDispatcher {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ConfinedDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfinedDispatcher")
            .field("tag", &self.tag)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn worker_loop(id: u64, tag: String, mut job_rx: mpsc::UnboundedReceiver<Job>) {
    debug!("[{}] dispatch worker started", tag);
    let affinity = Rc::new(Affinity::new(id));
    Affinity::install(affinity.clone());
    while let Some(job) = job_rx.blocking_recv() {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| job(&affinity)));
        if let Err(panic) = outcome {
            let reason = panic
                .downcast_ref::<&'static str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "opaque panic payload".to_string());
            error!("[{}] dispatched job panicked: {}", tag, reason);
        }
    }
    Affinity::uninstall();
    debug!("[{}] dispatch worker stopped", tag);
}
