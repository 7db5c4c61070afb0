use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::errors::{Error, StoreError};
use crate::test_utils::{all_tasks, seeded_engine, task, task_ids, wait_until};

#[tokio::test]
async fn test_initial_snapshot_precedes_any_mutation() {
    let engine = seeded_engine(100);
    let mut stream = snapshots(engine.clone(), all_tasks(), task_ids());

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.len(), 100);
    assert_eq!(first[0], 0);
    assert_eq!(first[99], 99);
    stream.close();
}

#[tokio::test]
async fn test_snapshot_emitted_after_write() {
    let engine = seeded_engine(100);
    let mut stream = snapshots(engine.clone(), all_tasks(), task_ids());
    assert_eq!(stream.next().await.unwrap().unwrap().len(), 100);

    engine.write(|rows| rows.push(task(100)));
    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(second.len(), 101);
    assert_eq!(second[100], 100);
    stream.close();
}

#[tokio::test]
async fn test_burst_of_writes_coalesces_to_latest_state() {
    let engine = seeded_engine(10);
    let mut stream = snapshots(engine.clone(), all_tasks(), task_ids());
    assert_eq!(stream.next().await.unwrap().unwrap().len(), 10);

    for id in 10..20 {
        engine.write(|rows| rows.push(task(id)));
    }
    // However many intermediate emissions arrive, the stream converges on
    // the final state without needing one emission per write.
    let mut latest = Vec::new();
    while latest.len() < 20 {
        latest = stream.next().await.unwrap().unwrap();
    }
    assert_eq!(latest.len(), 20);
    stream.close();
}

#[tokio::test]
async fn test_custom_transform_is_applied() {
    let engine = seeded_engine(3);
    let names: crate::query::RowTransform<crate::store::adaptors::mem::MemStoreEngine<crate::test_utils::TaskRow>, String> = Arc::new(|_, row: &crate::test_utils::TaskRow| Ok(row.name.clone()));
    let mut stream = snapshots(engine.clone(), all_tasks(), names);

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first, vec!["task-0", "task-1", "task-2"]);
    stream.close();
}

#[tokio::test]
async fn test_transform_failure_is_terminal() {
    let engine = seeded_engine(3);
    let failing: crate::query::RowTransform<crate::store::adaptors::mem::MemStoreEngine<crate::test_utils::TaskRow>, u64> =
        Arc::new(|_, row: &crate::test_utils::TaskRow| {
            if row.id == 99 {
                Err(StoreError::Engine("malformed".into()))
            } else {
                Ok(row.id)
            }
        });
    let mut stream = snapshots(engine.clone(), all_tasks(), failing);
    assert_eq!(stream.next().await.unwrap().unwrap().len(), 3);

    engine.write(|rows| rows.push(task(99)));
    match stream.next().await.unwrap() {
        Err(Error::Store(StoreError::Transform { .. })) => {}
        other => panic!("expected terminal transform error, got {:?}", other.map(|v| v.len())),
    }
    assert!(stream.next().await.is_none());
    assert!(
        wait_until(Duration::from_secs(1), || engine.open_handles() == 0
            && engine.listener_count() == 0)
        .await
    );
}

#[tokio::test]
async fn test_close_is_idempotent_and_releases_resources() {
    let engine = seeded_engine(5);
    let mut stream = snapshots(engine.clone(), all_tasks(), task_ids());
    assert_eq!(stream.next().await.unwrap().unwrap().len(), 5);

    stream.close();
    stream.close();
    assert!(
        wait_until(Duration::from_secs(1), || engine.open_handles() == 0
            && engine.listener_count() == 0)
        .await
    );
}

#[tokio::test]
async fn test_drop_releases_resources() {
    let engine = seeded_engine(5);
    {
        let mut stream = snapshots(engine.clone(), all_tasks(), task_ids());
        assert_eq!(stream.next().await.unwrap().unwrap().len(), 5);
    }
    assert!(
        wait_until(Duration::from_secs(1), || engine.open_handles() == 0
            && engine.listener_count() == 0)
        .await
    );
}

#[tokio::test]
async fn test_listener_firing_after_close_is_swallowed() {
    let engine = seeded_engine(5);
    let mut stream = snapshots(engine.clone(), all_tasks(), task_ids());
    assert_eq!(stream.next().await.unwrap().unwrap().len(), 5);

    stream.close();
    assert!(wait_until(Duration::from_secs(1), || engine.listener_count() == 0).await);

    // A write racing teardown must not panic or resurrect the stream.
    engine.write(|rows| rows.push(task(5)));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_engine_closed_before_subscription_surfaces_error() {
    let engine = seeded_engine(5);
    engine.close();

    let mut stream = snapshots(engine.clone(), all_tasks(), task_ids());
    match stream.next().await.unwrap() {
        Err(Error::Store(StoreError::HandleUnavailable)) => {}
        other => panic!("expected handle-unavailable, got {:?}", other.map(|v| v.len())),
    }
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_stream_trait_yields_items() {
    use futures::StreamExt;

    let engine = seeded_engine(2);
    let stream = snapshots(engine.clone(), all_tasks(), task_ids());
    let mut stream = stream.boxed();
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first, vec![0, 1]);
}
