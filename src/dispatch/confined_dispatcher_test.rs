use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::*;
use crate::errors::DispatchError;

#[tokio::test]
async fn test_call_returns_value_from_worker() {
    let dispatcher = ConfinedDispatcher::new("test-call");
    let value = dispatcher.call(|_| 41 + 1).await;
    assert_eq!(value, Ok(42));
    dispatcher.close();
}

#[tokio::test]
async fn test_worker_spawn_is_lazy() {
    let dispatcher = ConfinedDispatcher::new("test-lazy");
    assert!(!dispatcher.worker_started());

    dispatcher.call(|_| ()).await.unwrap();
    assert!(dispatcher.worker_started());
    dispatcher.close();
}

#[tokio::test]
async fn test_fifo_dispatch_across_threads() {
    let dispatcher = Arc::new(ConfinedDispatcher::new("test-fifo"));
    let submitted = Arc::new(Mutex::new(Vec::new()));
    let executed = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..8u32)
        .map(|i| {
            let dispatcher = dispatcher.clone();
            let submitted = submitted.clone();
            let executed = executed.clone();
            std::thread::spawn(move || {
                // Hold the submission log lock across the send so the
                // recorded order is the true submission order.
                let mut log = submitted.lock();
                dispatcher
                    .run(move |_| {
                        executed.lock().push(i);
                    })
                    .unwrap();
                log.push(i);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Synchronize on a final job so all earlier jobs have run.
    dispatcher.call(|_| ()).await.unwrap();
    assert_eq!(*executed.lock(), *submitted.lock());
    dispatcher.close();
}

#[tokio::test]
async fn test_reentrant_run_executes_inline() {
    let dispatcher = Arc::new(ConfinedDispatcher::new("test-reentrant"));
    let inner = dispatcher.clone();
    let observed = dispatcher
        .call(move |_| {
            let ran = Arc::new(AtomicUsize::new(0));
            let flag = ran.clone();
            // Submitting from the worker thread must run in place, not
            // deadlock behind the currently-executing job.
            inner.run(move |_| {
                flag.fetch_add(1, Ordering::SeqCst);
            })?;
            Ok::<usize, DispatchError>(ran.load(Ordering::SeqCst))
        })
        .await
        .unwrap();
    assert_eq!(observed, Ok(1));
    dispatcher.close();
}

#[tokio::test]
async fn test_run_after_close_returns_closed() {
    let dispatcher = ConfinedDispatcher::new("test-closed");
    dispatcher.call(|_| ()).await.unwrap();
    dispatcher.close();

    let result = dispatcher.run(|_| ());
    assert_eq!(result, Err(DispatchError::Closed));
    assert!(dispatcher.is_closed());
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let dispatcher = ConfinedDispatcher::new("test-double-close");
    dispatcher.call(|_| ()).await.unwrap();
    dispatcher.close();
    dispatcher.close();
    assert!(dispatcher.is_closed());
}

#[test]
fn test_close_drains_queued_jobs() {
    let dispatcher = ConfinedDispatcher::new("test-drain");
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..32 {
        let counter = counter.clone();
        dispatcher
            .run(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }
    // close() joins the worker, which must first finish everything queued.
    dispatcher.close();
    assert_eq!(counter.load(Ordering::SeqCst), 32);
}

#[tokio::test]
async fn test_slot_state_survives_between_jobs() {
    let dispatcher = ConfinedDispatcher::new("test-slots");
    let slot: Slot<u64> = Slot::reserve();

    dispatcher
        .call(move |affinity| {
            affinity.insert(slot, 10);
        })
        .await
        .unwrap();
    let value = dispatcher
        .call(move |affinity| affinity.with(slot, |v| *v + 1))
        .await
        .unwrap();
    assert_eq!(value, Some(11));
    dispatcher.close();
}
