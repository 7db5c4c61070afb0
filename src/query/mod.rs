//! Live query handles and row transforms.


use std::sync::Arc;

use tracing::debug;

use crate::errors::{Result, StoreError};
use crate::store::{with_handle, ResultSet, ResultsOf, StoreEngine};

type QueryFn<E> = dyn Fn(&<E as StoreEngine>::Handle) -> std::result::Result<ResultsOf<E>, StoreError>
    + Send
    + Sync;

/// A pure function from an open handle to a live result set.
///
/// Cloning is cheap; evaluation always re-runs the underlying query. Nothing
/// is cached here. Callers that need a held result set keep it themselves,
/// confined to their dispatcher.
pub struct LiveQuery<E: StoreEngine> {
    build: Arc<QueryFn<E>>,
}

impl<E: StoreEngine> Clone for LiveQuery<E> {
    fn clone(&self) -> Self {
        Self {
            build: self.build.clone(),
        }
    }
}

impl<E: StoreEngine> LiveQuery<E> {
    pub fn new(
        build: impl Fn(&E::Handle) -> std::result::Result<ResultsOf<E>, StoreError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            build: Arc::new(build),
        }
    }

    /// Re-evaluates the query against `handle`.
    pub fn evaluate(&self, handle: &E::Handle) -> std::result::Result<ResultsOf<E>, StoreError> {
        (self.build)(handle)
    }

    /// One-shot read: opens a handle on the calling thread, evaluates,
    /// copies every row out through `transform`, and releases the handle.
    pub fn fetch_all<R>(&self, engine: &E, transform: &RowTransform<E, R>) -> Result<Vec<R>> {
        let query = self.clone();
        let transform = transform.clone();
        with_handle(engine, move |handle| {
            let results = query.evaluate(handle)?;
            let snapshot = snapshot_rows::<E, R>(handle, &results, &transform)?
                .ok_or(StoreError::ResultSetInvalid)?;
            Ok(snapshot)
        })
    }
}

/// Maps one live row to a caller-owned value. Return `Send` values whenever
/// snapshots must cross threads; the stream and pager seams enforce it.
pub type RowTransform<E, R> = Arc<
    dyn Fn(
            &<E as StoreEngine>::Handle,
            &<E as StoreEngine>::Row,
        ) -> std::result::Result<R, StoreError>
        + Send
        + Sync,
>;

/// Deep-copy transform: clones each row as-is.
pub fn copy_transform<E>() -> RowTransform<E, E::Row>
where
    E: StoreEngine,
    E::Row: Clone,
{
    Arc::new(|_handle, row| Ok(row.clone()))
}

pub(crate) fn transform_failure(index: usize, e: StoreError) -> StoreError {
    match e {
        StoreError::Transform { .. } => e,
        other => StoreError::Transform {
            index,
            reason: other.to_string(),
        },
    }
}

/// Reads every element of `results` through `transform` at one point in
/// time. Returns `Ok(None)` when the result set is no longer valid. Rows
/// the engine reports missing mid-read are skipped, matching live stores
/// that compact underneath a reader.
pub(crate) fn snapshot_rows<E, R>(
    handle: &E::Handle,
    results: &ResultsOf<E>,
    transform: &RowTransform<E, R>,
) -> std::result::Result<Option<Vec<R>>, StoreError>
where
    E: StoreEngine,
{
    if !results.is_valid() {
        return Ok(None);
    }
    let len = results.len();
    let mut items = Vec::with_capacity(len);
    for index in 0..len {
        let Some(row) = results.get(index) else {
            debug!("row {} missing during snapshot, skipping", index);
            continue;
        };
        let value = (transform)(handle, &row).map_err(|e| transform_failure(index, e))?;
        items.push(value);
    }
    Ok(Some(items))
}
