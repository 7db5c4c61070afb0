//! Shared fixtures and mocks for crate tests.

use std::sync::Arc;
use std::time::Duration;

use mockall::mock;

use crate::errors::StoreError;
use crate::query::{LiveQuery, RowTransform};
use crate::store::adaptors::mem::MemStoreEngine;
use crate::store::{ChangeListener, ListenerId, ResultSet, StoreEngine, StoreHandle};

/// Row type used across tests; rows stay in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRow {
    pub id: u64,
    pub name: String,
}

pub fn task(id: u64) -> TaskRow {
    TaskRow {
        id,
        name: format!("task-{}", id),
    }
}

pub fn seeded_engine(count: u64) -> Arc<MemStoreEngine<TaskRow>> {
    Arc::new(MemStoreEngine::with_rows((0..count).map(task).collect()))
}

pub fn all_tasks() -> LiveQuery<MemStoreEngine<TaskRow>> {
    LiveQuery::new(|handle: &crate::store::adaptors::mem::MemHandle<TaskRow>| handle.select_all())
}

pub fn task_ids() -> RowTransform<MemStoreEngine<TaskRow>, u64> {
    Arc::new(|_, row| Ok(row.id))
}

/// Polls `predicate` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

mock! {
    pub TestResults {}

    impl ResultSet for TestResults {
        type Row = u64;

        fn is_valid(&self) -> bool;
        fn len(&self) -> usize;
        fn get(&self, index: usize) -> Option<u64>;
        fn add_change_listener(&self, listener: ChangeListener) -> ListenerId;
        fn remove_change_listener(&self, id: ListenerId);
    }
}

mock! {
    pub TestHandle {}

    impl StoreHandle for TestHandle {
        type Row = u64;
        type Results = MockTestResults;

        fn is_closed(&self) -> bool;
        fn close(&mut self);
    }
}

mock! {
    pub TestEngine {}

    impl StoreEngine for TestEngine {
        type Row = u64;
        type Handle = MockTestHandle;

        fn open_handle(&self) -> Result<MockTestHandle, StoreError>;
    }
}
