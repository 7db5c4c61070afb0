use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::*;
use crate::errors::StoreError;
use crate::store::{ResultSet, StoreEngine, StoreHandle};

fn seeded(count: u64) -> MemStoreEngine<u64> {
    MemStoreEngine::with_rows((0..count).collect())
}

#[test]
fn test_select_all_materializes_rows_in_order() {
    let engine = seeded(5);
    let handle = engine.open_handle().unwrap();
    let results = handle.select_all().unwrap();

    assert!(results.is_valid());
    assert_eq!(results.len(), 5);
    assert_eq!(results.get(0), Some(0));
    assert_eq!(results.get(4), Some(4));
    assert_eq!(results.get(5), None);
}

#[test]
fn test_select_filters_rows() {
    let engine = seeded(10);
    let handle = engine.open_handle().unwrap();
    let evens = handle.select(|row| row % 2 == 0).unwrap();

    assert_eq!(evens.len(), 5);
    assert_eq!(evens.get(1), Some(2));
}

#[test]
fn test_results_are_live_after_write() {
    let engine = seeded(3);
    let handle = engine.open_handle().unwrap();
    let results = handle.select_all().unwrap();
    assert_eq!(results.len(), 3);

    engine.write(|rows| rows.push(3));
    assert_eq!(results.len(), 4);
    assert_eq!(results.get(3), Some(3));
}

#[test]
fn test_get_serves_the_epoch_of_the_last_len() {
    let engine = seeded(3);
    let handle = engine.open_handle().unwrap();
    let results = handle.select_all().unwrap();
    assert_eq!(results.len(), 3);

    // A write between len and get must not shift the indexed view.
    engine.write(|rows| {
        rows.remove(0);
    });
    assert_eq!(results.get(0), Some(0));
    assert_eq!(results.len(), 2);
    assert_eq!(results.get(0), Some(1));
}

#[test]
fn test_write_notifies_listeners_on_writer_thread() {
    let engine = seeded(1);
    let handle = engine.open_handle().unwrap();
    let results = handle.select_all().unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let count = fired.clone();
    let id = results.add_change_listener(Arc::new(move || {
        count.fetch_add(1, Ordering::SeqCst);
    }));
    assert_eq!(engine.listener_count(), 1);

    engine.write(|rows| rows.push(1));
    engine.write(|rows| rows.push(2));
    assert_eq!(fired.load(Ordering::SeqCst), 2);

    results.remove_change_listener(id);
    results.remove_change_listener(id);
    assert_eq!(engine.listener_count(), 0);

    engine.write(|rows| rows.push(3));
    assert_eq!(fired.load(Ordering::SeqCst), 2);
}

#[test]
fn test_handle_close_invalidates_results() {
    let engine = seeded(3);
    let mut handle = engine.open_handle().unwrap();
    let results = handle.select_all().unwrap();
    assert_eq!(engine.open_handles(), 1);

    handle.close();
    handle.close();
    assert_eq!(engine.open_handles(), 0);
    assert!(handle.is_closed());
    assert!(!results.is_valid());
    assert_eq!(results.len(), 0);
    assert_eq!(results.get(0), None);
}

#[test]
fn test_drop_releases_handle() {
    let engine = seeded(1);
    {
        let _handle = engine.open_handle().unwrap();
        assert_eq!(engine.open_handles(), 1);
    }
    assert_eq!(engine.open_handles(), 0);
}

#[test]
fn test_engine_close_rejects_new_handles() {
    let engine = seeded(1);
    let handle = engine.open_handle().unwrap();
    let results = handle.select_all().unwrap();

    engine.close();
    assert!(handle.is_closed());
    assert!(!results.is_valid());
    assert_eq!(engine.open_handle().unwrap_err(), StoreError::HandleUnavailable);
}

#[test]
fn test_select_on_closed_handle_fails() {
    let engine = seeded(1);
    let mut handle = engine.open_handle().unwrap();
    handle.close();
    assert_eq!(handle.select_all().unwrap_err(), StoreError::HandleUnavailable);
}
