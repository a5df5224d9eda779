#![allow(clippy::unwrap_used)]
//! Expiration scheduler on the paused tokio clock.

use discovery_protocol::utils::ExpirationScheduler;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Box<dyn FnOnce() + Send>) {
    let count = Arc::new(AtomicUsize::new(0));
    let handle = Arc::clone(&count);
    let make = move || {
        let count = Arc::clone(&handle);
        Box::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        }) as Box<dyn FnOnce() + Send>
    };
    (count, make)
}

#[tokio::test(start_paused = true)]
async fn test_rescheduling_debounces() {
    let scheduler = ExpirationScheduler::new("debounce", CancellationToken::new());
    let (fired, action) = counter();

    // touched every second for five seconds with a three second deadline
    for _ in 0..5 {
        scheduler.schedule("peer", Duration::from_secs(3), action());
        sleep(Duration::from_secs(1)).await;
    }
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    sleep(Duration::from_millis(1900)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_keys_fire_in_deadline_order() {
    let scheduler = ExpirationScheduler::new("order", CancellationToken::new());
    let order = Arc::new(Mutex::new(Vec::new()));
    for (key, secs) in [(3u8, 3u64), (1, 1), (2, 2)] {
        let order = Arc::clone(&order);
        scheduler.schedule(key, Duration::from_secs(secs), move || order.lock().push(key));
    }
    assert_eq!(scheduler.len(), 3);

    sleep(Duration::from_secs(4)).await;
    assert_eq!(*order.lock(), vec![1, 2, 3]);
    assert!(scheduler.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_action_may_reschedule_its_key() {
    let scheduler = Arc::new(ExpirationScheduler::new("again", CancellationToken::new()));
    let fired = Arc::new(Mutex::new(Vec::new()));

    let inner = Arc::clone(&scheduler);
    let log = Arc::clone(&fired);
    let start = Instant::now();
    scheduler.schedule(7u32, Duration::from_secs(1), move || {
        log.lock().push(start.elapsed().as_secs());
        let log = Arc::clone(&log);
        inner.schedule(7u32, Duration::from_secs(1), move || {
            log.lock().push(start.elapsed().as_secs());
        });
    });

    sleep(Duration::from_millis(2500)).await;
    assert_eq!(*fired.lock(), vec![1, 2]);
    assert!(!scheduler.contains(&7));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_and_stop_discard_actions() {
    let scheduler = ExpirationScheduler::new("discard", CancellationToken::new());
    let (fired, action) = counter();

    scheduler.schedule(1u8, Duration::from_secs(1), action());
    scheduler.schedule(2u8, Duration::from_secs(1), action());
    assert!(scheduler.cancel(&1));
    scheduler.stop();
    assert!(scheduler.is_empty());

    // scheduling after stop is ignored
    scheduler.schedule(3u8, Duration::from_secs(1), action());
    sleep(Duration::from_secs(5)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert!(scheduler.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_parent_token_stops_driver() {
    let parent = CancellationToken::new();
    let scheduler = ExpirationScheduler::new("child", parent.child_token());
    let (fired, action) = counter();

    scheduler.schedule(1u8, Duration::from_secs(2), action());
    parent.cancel();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}
