//! Integration tests for core-async.
//!
//! These tests verify the runtime wrappers and the work queue under real
//! producer/consumer concurrency.

use core_async::queue::WorkQueue;
use core_async::{sync, task, time};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[core_async::test]
async fn test_task_spawn() {
    let handle = task::spawn(async { 42 });
    let result = handle.await.unwrap();
    assert_eq!(result, 42);
}

#[core_async::test]
async fn test_timeout_failure() {
    let result = time::timeout(time::Duration::from_millis(10), async {
        time::sleep(time::Duration::from_millis(100)).await;
        42
    })
    .await;

    assert!(result.is_err());
}

#[core_async::test]
async fn test_mutex_try_lock_reports_contention() {
    let mutex = sync::Mutex::new(());
    let guard = mutex.lock().await;
    assert!(mutex.try_lock().is_err());
    drop(guard);
    assert!(mutex.try_lock().is_ok());
}

#[core_async::test]
async fn test_join_set_collects_results() {
    let mut set = task::JoinSet::new();
    for i in 0..4u32 {
        set.spawn(async move { i * 2 });
    }

    let mut sum = 0;
    while let Some(result) = set.join_next().await {
        sum += result.unwrap();
    }
    assert_eq!(sum, 12);
}

#[core_async::test]
async fn test_cancellation_token_stops_loop() {
    let token = sync::CancellationToken::new();
    let child = token.child_token();
    let ticks = Arc::new(AtomicUsize::new(0));
    let ticks_clone = ticks.clone();

    let handle = task::spawn(async move {
        let mut interval = time::interval(time::Duration::from_millis(5));
        loop {
            next_tick_or_cancel(&child, &mut interval).await;
            if child.is_cancelled() {
                break;
            }
            ticks_clone.fetch_add(1, Ordering::SeqCst);
        }
    });

    time::sleep(time::Duration::from_millis(30)).await;
    token.cancel();
    handle.await.unwrap();
    assert!(ticks.load(Ordering::SeqCst) > 0);
}

async fn next_tick_or_cancel(token: &sync::CancellationToken, interval: &mut time::Interval) {
    futures::future::select(Box::pin(token.cancelled()), Box::pin(interval.tick())).await;
}

#[core_async::test(multi_thread)]
async fn test_work_queue_many_producers_many_consumers() {
    let queue = WorkQueue::bounded(4);
    let mut producers = Vec::new();
    for p in 0..3usize {
        let queue = queue.clone();
        producers.push(task::spawn(async move {
            for i in 0..50usize {
                queue.push(p * 1000 + i).await.unwrap();
            }
        }));
    }

    let seen = Arc::new(AtomicUsize::new(0));
    let mut consumers = Vec::new();
    for _ in 0..4 {
        let queue = queue.clone();
        let seen = seen.clone();
        consumers.push(task::spawn(async move {
            while queue.pop().await.is_some() {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }

    for producer in producers {
        producer.await.unwrap();
    }
    queue.close();
    for consumer in consumers {
        consumer.await.unwrap();
    }

    assert_eq!(seen.load(Ordering::SeqCst), 150);
    assert!(queue.is_drained());
}
