use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dispatch::ConfinedDispatcher;
use crate::errors::Result;
use crate::paging::{LoadRequest, PageResult, PageWindow, PagingConfig, TiledLoader};
use crate::query::{LiveQuery, RowTransform};
use crate::store::StoreEngine;

const REQUEST_QUEUE_DEPTH: usize = 16;
const PAGE_SET_BUFFER: usize = 4;

/// Every page served so far in one loader generation, oldest first. A
/// refresh restarts the list; a new generation starts a new set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSet<R> {
    pub generation: u64,
    pub pages: Vec<PageResult<R>>,
}

/// Clonable handle for issuing load requests against the current generation.
/// Requests are served in FIFO order on the generation's dispatcher.
#[derive(Clone)]
pub struct PageRequester {
    tx: mpsc::Sender<LoadRequest>,
    config: PagingConfig,
}

impl PageRequester {
    /// Submits `request`; false once the paged stream is gone.
    pub async fn load(&self, request: LoadRequest) -> bool {
        self.tx.send(request).await.is_ok()
    }

    pub async fn refresh(&self, key: Option<usize>) -> bool {
        self.load(LoadRequest::Refresh {
            key,
            size: self.config.initial_load_size,
        })
        .await
    }

    pub async fn append(&self, key: usize) -> bool {
        self.load(LoadRequest::Append {
            key,
            size: self.config.page_size,
        })
        .await
    }

    pub async fn prepend(&self, key: usize) -> bool {
        self.load(LoadRequest::Prepend {
            key,
            size: self.config.page_size,
        })
        .await
    }
}

/// Continuous, cancellable stream of [`PageSet`]s. Each loader invalidation
/// discards the generation wholesale and begins the next one with a fresh
/// dispatcher and an eager initial window.
pub struct PagedStream<R> {
    rx: mpsc::Receiver<Result<PageSet<R>>>,
    shutdown: CancellationToken,
}

impl<R> PagedStream<R> {
    pub async fn next(&mut self) -> Option<Result<PageSet<R>>> {
        self.rx.recv().await
    }

    /// Cancels the stream and tears down the current generation. Idempotent.
    pub fn close(&mut self) {
        self.shutdown.cancel();
        self.rx.close();
    }
}

impl<R> Drop for PagedStream<R> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl<R> Stream for PagedStream<R> {
    type Item = Result<PageSet<R>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Composes dispatcher, tiled loader, and a windowed-paging consumer into
/// one restartable paged stream. Must be called within a tokio runtime.
pub fn paged<E, R>(
    engine: Arc<E>,
    query: LiveQuery<E>,
    transform: RowTransform<E, R>,
    config: PagingConfig,
) -> (PageRequester, PagedStream<R>)
where
    E: StoreEngine,
    R: Clone + Send + 'static,
{
    let (req_tx, req_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
    let (page_tx, page_rx) = mpsc::channel(PAGE_SET_BUFFER);
    let shutdown = CancellationToken::new();
    tokio::spawn(drive(
        engine,
        query,
        transform,
        config.clone(),
        req_rx,
        page_tx,
        shutdown.clone(),
    ));
    (
        PageRequester { tx: req_tx, config },
        PagedStream {
            rx: page_rx,
            shutdown,
        },
    )
}

async fn drive<E, R>(
    engine: Arc<E>,
    query: LiveQuery<E>,
    transform: RowTransform<E, R>,
    config: PagingConfig,
    mut requests: mpsc::Receiver<LoadRequest>,
    out: mpsc::Sender<Result<PageSet<R>>>,
    shutdown: CancellationToken,
) where
    E: StoreEngine,
    R: Clone + Send + 'static,
{
    let mut generation: u64 = 0;
    let mut requests_open = true;
    'generations: loop {
        generation += 1;
        let dispatcher = Arc::new(ConfinedDispatcher::new(format!("pager-gen-{}", generation)));
        let loader = TiledLoader::new(
            dispatcher.clone(),
            engine.clone(),
            query.clone(),
            transform.clone(),
        );
        let mut pages: Vec<PageResult<R>> = Vec::new();

        // Eager initial window: a consumer never waits for a request to see
        // the current generation's data.
        let initial = LoadRequest::Refresh {
            key: None,
            size: config.initial_load_size,
        };
        match serve(&loader, initial).await {
            Ok(page) => {
                pages.push(page);
                let set = PageSet {
                    generation,
                    pages: pages.clone(),
                };
                if out.send(Ok(set)).await.is_err() {
                    close_generation(&loader, &dispatcher);
                    return;
                }
            }
            Err(e) => {
                let _ = out.send(Err(e)).await;
                close_generation(&loader, &dispatcher);
                return;
            }
        }
        if loader.is_invalidated() && !loader.ever_opened() {
            // The store itself is unusable: a fresh generation could not even
            // open, so the stream completes instead of regenerating.
            debug!("pager generation {} could not open, completing stream", generation);
            close_generation(&loader, &dispatcher);
            return;
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    close_generation(&loader, &dispatcher);
                    return;
                }
                _ = loader.invalidated() => {
                    debug!("pager generation {} invalidated, recreating loader", generation);
                    close_generation(&loader, &dispatcher);
                    continue 'generations;
                }
                request = requests.recv(), if requests_open => {
                    let Some(request) = request else {
                        // Requester gone: manual loads stop, invalidation-
                        // driven regeneration continues.
                        requests_open = false;
                        continue;
                    };
                    match serve(&loader, request).await {
                        Ok(page) => {
                            if matches!(request, LoadRequest::Refresh { .. }) {
                                pages.clear();
                            }
                            pages.push(page);
                            let set = PageSet {
                                generation,
                                pages: pages.clone(),
                            };
                            if out.send(Ok(set)).await.is_err() {
                                close_generation(&loader, &dispatcher);
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = out.send(Err(e)).await;
                            close_generation(&loader, &dispatcher);
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Teardown order per subscription contract: loader (listener + handle)
/// first, then the dispatcher.
fn close_generation<E: StoreEngine, R: Send + 'static>(
    loader: &TiledLoader<E, R>,
    dispatcher: &Arc<ConfinedDispatcher>,
) {
    loader.close();
    dispatcher.close();
}

/// The index window one consumer request resolves to against a result set of
/// `total` elements. Prepend windows grow backwards from the key; everything
/// else grows forwards.
pub(crate) fn window_for(request: LoadRequest, total: usize) -> PageWindow {
    match request {
        LoadRequest::Refresh { key, size } => PageWindow {
            start_index: key.unwrap_or(0).min(total),
            length: size,
        },
        LoadRequest::Append { key, size } => PageWindow {
            start_index: key,
            length: size,
        },
        LoadRequest::Prepend { key, size } => {
            let start_index = key.saturating_sub(size);
            PageWindow {
                start_index,
                length: key - start_index,
            }
        }
    }
}

/// Translates one consumer request into a clamped window load plus the page
/// keys a positional paging consumer expects. Only refresh windows carry the
/// surrounding item counts.
async fn serve<E, R>(loader: &TiledLoader<E, R>, request: LoadRequest) -> Result<PageResult<R>>
where
    E: StoreEngine,
    R: Send + 'static,
{
    let total = loader.count().await;
    if total == 0 {
        return Ok(PageResult::empty());
    }
    let window = window_for(request, total);
    let items = loader
        .load_range(window.start_index, window.length)
        .await?;
    let loaded = items.len();
    let start = window.start_index;
    let page = match request {
        LoadRequest::Refresh { .. } => PageResult {
            previous_key: (start > 0).then_some(start),
            next_key: (loaded > 0 && start + loaded < total).then_some(start + loaded),
            items_before: Some(start),
            items_after: Some(total.saturating_sub(start + loaded)),
            items,
        },
        LoadRequest::Append { key, .. } => PageResult {
            previous_key: Some(key),
            next_key: (loaded > 0 && key + loaded < total).then_some(key + loaded),
            items_before: None,
            items_after: None,
            items,
        },
        LoadRequest::Prepend { key, .. } => PageResult {
            previous_key: (start > 0 && loaded > 0).then_some(start),
            next_key: (loaded > 0).then_some(key),
            items_before: None,
            items_after: None,
            items,
        },
    };
    Ok(page)
}
