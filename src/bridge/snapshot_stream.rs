use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bridge::StoreSession;
use crate::config::ChannelSettings;
use crate::dispatch::{ConfinedDispatcher, Slot};
use crate::errors::{Error, Result};
use crate::query::{snapshot_rows, LiveQuery, RowTransform};
use crate::store::StoreEngine;

/// Stream of full snapshots of a live query.
///
/// One eager emission at subscription start establishes the current-state
/// baseline, then one emission per coalesced change notification. The stream
/// completes when the result set becomes unusable or [`close`] is called; a
/// transform failure is delivered as a terminal error.
///
/// [`close`]: SnapshotStream::close
pub struct SnapshotStream<R> {
    rx: mpsc::Receiver<Result<Vec<R>>>,
    shutdown: CancellationToken,
}

impl<R> SnapshotStream<R> {
    pub async fn next(&mut self) -> Option<Result<Vec<R>>> {
        self.rx.recv().await
    }

    /// Cancels the subscription and its worker. Idempotent.
    pub fn close(&mut self) {
        self.shutdown.cancel();
        self.rx.close();
    }
}

impl<R> Drop for SnapshotStream<R> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl<R> Stream for SnapshotStream<R> {
    type Item = Result<Vec<R>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Subscribes to `query` and returns a snapshot stream with default channel
/// settings. Must be called within a tokio runtime.
pub fn snapshots<E, R>(
    engine: Arc<E>,
    query: LiveQuery<E>,
    transform: RowTransform<E, R>,
) -> SnapshotStream<R>
where
    E: StoreEngine,
    R: Send + 'static,
{
    snapshots_with(engine, query, transform, &ChannelSettings::default())
}

/// Subscribes to `query`: a fresh confined dispatcher is created for the
/// subscription, the query is evaluated on it, and every result-set change
/// re-reads and pushes a full transformed snapshot.
pub fn snapshots_with<E, R>(
    engine: Arc<E>,
    query: LiveQuery<E>,
    transform: RowTransform<E, R>,
    channel: &ChannelSettings,
) -> SnapshotStream<R>
where
    E: StoreEngine,
    R: Send + 'static,
{
    let (tx, rx) = mpsc::channel(channel.snapshot_buffer.max(1));
    let shutdown = CancellationToken::new();
    tokio::spawn(pump(engine, query, transform, tx, shutdown.clone()));
    SnapshotStream { rx, shutdown }
}

async fn pump<E, R>(
    engine: Arc<E>,
    query: LiveQuery<E>,
    transform: RowTransform<E, R>,
    tx: mpsc::Sender<Result<Vec<R>>>,
    shutdown: CancellationToken,
) where
    E: StoreEngine,
    R: Send + 'static,
{
    let dispatcher = Arc::new(ConfinedDispatcher::new("snapshot-stream"));
    let slot: Slot<StoreSession<E>> = Slot::reserve();
    let (dirty_tx, mut dirty_rx) = watch::channel(0u64);

    // Open the session, register the listener, and take the baseline
    // snapshot in one job so no change can slip between them.
    let opened = dispatcher
        .call({
            let engine = engine.clone();
            let query = query.clone();
            let transform = transform.clone();
            move |affinity| -> Result<Option<Vec<R>>> {
                let mut session = StoreSession::open(engine.as_ref(), &query)?;
                if !session.is_usable() {
                    session.detach();
                    return Ok(None);
                }
                session.listen(Arc::new(move || {
                    dirty_tx.send_modify(|version| *version += 1);
                }));
                let baseline = match (session.handle(), session.results()) {
                    (Some(handle), Some(results)) => {
                        snapshot_rows::<E, R>(handle, results, &transform)?
                    }
                    _ => None,
                };
                affinity.insert(slot, session);
                Ok(baseline)
            }
        })
        .await;

    let initial = match opened {
        Ok(Ok(Some(snapshot))) => snapshot,
        Ok(Ok(None)) => {
            warn!("result set unusable at subscription start, completing stream");
            teardown::<E>(&dispatcher, slot);
            return;
        }
        Ok(Err(e)) => {
            let _ = tx.send(Err(e)).await;
            teardown::<E>(&dispatcher, slot);
            return;
        }
        Err(e) => {
            let _ = tx.send(Err(e.into())).await;
            teardown::<E>(&dispatcher, slot);
            return;
        }
    };
    if tx.send(Ok(initial)).await.is_err() {
        teardown::<E>(&dispatcher, slot);
        return;
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = dirty_rx.changed() => {
                if changed.is_err() {
                    // Listener dropped with the session: nothing left to watch.
                    break;
                }
                let transform = transform.clone();
                let reread = dispatcher
                    .call(move |affinity| -> Result<Option<Vec<R>>> {
                        affinity
                            .with(slot, |session: &mut StoreSession<E>| {
                                match (session.handle(), session.results()) {
                                    (Some(handle), Some(results)) => {
                                        snapshot_rows::<E, R>(handle, results, &transform)
                                            .map_err(Error::from)
                                    }
                                    _ => Ok(None),
                                }
                            })
                            .unwrap_or(Ok(None))
                    })
                    .await;
                match reread {
                    Ok(Ok(Some(items))) => {
                        if tx.send(Ok(items)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Ok(None)) => {
                        debug!("result set no longer usable, completing snapshot stream");
                        break;
                    }
                    Ok(Err(e)) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                    Err(e) => {
                        debug!("dispatcher closed mid-stream: {}", e);
                        break;
                    }
                }
            }
        }
    }
    teardown::<E>(&dispatcher, slot);
}

/// Detaches the session on the worker, then closes the dispatcher. A late
/// submit against an already-closed dispatcher is swallowed: the drained
/// worker drops the slot, and the session detaches on drop.
fn teardown<E: StoreEngine>(dispatcher: &Arc<ConfinedDispatcher>, slot: Slot<StoreSession<E>>) {
    let submitted = dispatcher.run(move |affinity| {
        if let Some(mut session) = affinity.take(slot) {
            session.detach();
        }
    });
    if let Err(e) = submitted {
        debug!("session teardown after dispatcher close: {}", e);
    }
    dispatcher.close();
}
