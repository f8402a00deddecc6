//! Integration tests for cancellation and teardown.

mod support;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use broker_host::Priority;
use futures::StreamExt;
use proptest::prelude::*;
use rx_broker::prelude::*;
use rx_broker::{Canceller, SubscriptionStatus};
use support::{connect_event, publish_event, settle, shared, CountingRegistry};

#[tokio::test]
async fn test_no_delivery_after_cancel_returns() {
    support::init_tracing();
    let registry = CountingRegistry::new();
    let sources = EventSources::new(registry.clone());
    let seen = shared::<String>();

    let sink = Arc::clone(&seen);
    let subscription = sources
        .client_connects(Priority::MEDIUM)
        .subscribe(move |event| sink.lock().push(event.client_id().to_string()), |_| {})
        .unwrap();

    registry.dispatch(&connect_event("before"));
    settle().await;
    subscription.cancel();

    assert_eq!(registry.live(), 0);
    registry.dispatch(&connect_event("after"));
    settle().await;

    assert_eq!(*seen.lock(), vec!["before"]);
}

#[tokio::test]
async fn test_events_queued_before_cancel_are_dropped() {
    let registry = CountingRegistry::new();
    let sources = EventSources::new(registry.clone());
    let seen = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&seen);
    let subscription = sources
        .publishes_received(Priority::MEDIUM)
        .subscribe(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            |_| {},
        )
        .unwrap();

    // Queued on the channel, but the drive task has not run yet
    for n in 0..10 {
        registry.dispatch(&publish_event(&format!("t/{}", n), b"x", "dev"));
    }
    subscription.cancel();
    settle().await;

    assert_eq!(seen.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cancel_deregisters_once() {
    let registry = CountingRegistry::new();
    let sources = EventSources::new(registry.clone());
    let subscription = sources
        .client_connects(Priority::MEDIUM)
        .subscribe(|_| {}, |_| {})
        .unwrap();

    let cancels: Vec<_> = (0..8)
        .map(|_| {
            let subscription = subscription.clone();
            tokio::spawn(async move { subscription.cancel() })
        })
        .collect();
    for cancel in cancels {
        cancel.await.unwrap();
    }
    subscription.cancel();

    assert_eq!(registry.added(), 1);
    assert_eq!(registry.removed(), 1);
    assert_eq!(subscription.status(), SubscriptionStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_after_completion_does_not_deregister_again() {
    let registry = CountingRegistry::new();
    let sources = EventSources::new(registry.clone());
    let subscription = sources
        .broker_stop(Priority::MEDIUM)
        .subscribe(|| {}, |_| {})
        .unwrap();

    registry.dispatch(&broker_host::HostEvent::BrokerStop);
    settle().await;
    subscription.cancel();
    subscription.cancel();

    assert_eq!(registry.removed(), 1);
    assert!(!subscription.is_cancelled());
}

#[tokio::test]
async fn test_cancel_drops_pending_async_operations() {
    let registry = CountingRegistry::new();
    let sources = EventSources::new(registry.clone());
    let cancelled_ops = Arc::new(AtomicUsize::new(0));
    let results = Arc::new(AtomicUsize::new(0));

    let cancelled = Arc::clone(&cancelled_ops);
    let delivered = Arc::clone(&results);
    let subscription = sources
        .client_connects(Priority::MEDIUM)
        .flat_map_async(move |_event| {
            let cancelled = Arc::clone(&cancelled);
            // Never settles on its own
            Single::<()>::from_callback(move |completer| {
                std::mem::forget(completer);
                Some(Box::new(move || {
                    cancelled.fetch_add(1, Ordering::SeqCst);
                }) as Canceller)
            })
        })
        .subscribe(
            move |_| {
                delivered.fetch_add(1, Ordering::SeqCst);
            },
            |_| {},
        )
        .unwrap();

    registry.dispatch(&connect_event("a"));
    registry.dispatch(&connect_event("b"));
    settle().await;
    assert_eq!(subscription.pending_operations(), 2);

    subscription.cancel();
    settle().await;

    assert_eq!(cancelled_ops.load(Ordering::SeqCst), 2);
    assert_eq!(subscription.pending_operations(), 0);
    assert_eq!(results.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_dropping_stream_cancels_subscription() {
    let registry = CountingRegistry::new();
    let sources = EventSources::new(registry.clone());

    let mut stream = sources
        .client_connects(Priority::MEDIUM)
        .map(|event| event.client_id().to_string())
        .into_stream()
        .unwrap();

    registry.dispatch(&connect_event("dev-A"));
    let first = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(first, "dev-A");

    drop(stream);
    assert_eq!(registry.removed(), 1);
    assert_eq!(registry.live(), 0);
}

#[tokio::test]
async fn test_subscription_set_tears_everything_down() {
    let registry = CountingRegistry::new();
    let sources = EventSources::new(registry.clone());
    let set = SubscriptionSet::new();

    set.insert(sources.client_connects(Priority::MEDIUM).subscribe(|_| {}, |_| {}).unwrap());
    set.insert(sources.publishes_received(Priority::MEDIUM).subscribe(|_| {}, |_| {}).unwrap());
    set.insert(sources.scheduled("0 0 * * * ?").subscribe(|_| {}, |_| {}).unwrap());
    set.insert(sources.broker_start(Priority::MEDIUM).subscribe(|| {}, |_| {}).unwrap());

    registry.dispatch(&broker_host::HostEvent::BrokerStart);
    settle().await;
    assert_eq!(set.prune(), 1);

    assert_eq!(set.cancel_all(), 3);
    assert!(set.is_empty());
    assert_eq!(registry.added(), 4);
    assert_eq!(registry.removed(), 4);
    assert_eq!(registry.live(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_while_host_threads_dispatch() {
    for round in 0..5 {
        let registry = CountingRegistry::new();
        let sources = EventSources::new(registry.clone());
        let cancel_returned = Arc::new(AtomicBool::new(false));
        let delivered = Arc::new(AtomicUsize::new(0));
        let late = Arc::new(AtomicUsize::new(0));

        let subscription = sources
            .publishes_received(Priority::MEDIUM)
            .subscribe(
                {
                    let cancel_returned = Arc::clone(&cancel_returned);
                    let delivered = Arc::clone(&delivered);
                    let late = Arc::clone(&late);
                    move |_| {
                        if cancel_returned.load(Ordering::SeqCst) {
                            late.fetch_add(1, Ordering::SeqCst);
                        }
                        delivered.fetch_add(1, Ordering::SeqCst);
                    }
                },
                |_| {},
            )
            .unwrap();

        let running = Arc::new(AtomicBool::new(true));
        let hosts: Vec<_> = (0..4)
            .map(|n| {
                let registry = Arc::clone(&registry);
                let running = Arc::clone(&running);
                std::thread::spawn(move || {
                    let client_id = format!("dev-{}-{}", round, n);
                    while running.load(Ordering::SeqCst) {
                        registry.dispatch(&publish_event("sensor/1", b"42", &client_id));
                    }
                })
            })
            .collect();

        // Let deliveries get under way before cancelling mid-stream
        while delivered.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::task::spawn_blocking({
            let subscription = subscription.clone();
            let cancel_returned = Arc::clone(&cancel_returned);
            move || {
                subscription.cancel();
                cancel_returned.store(true, Ordering::SeqCst);
            }
        })
        .await
        .unwrap();

        // Host threads keep dispatching after the cancel
        tokio::time::sleep(Duration::from_millis(10)).await;
        running.store(false, Ordering::SeqCst);
        for host in hosts {
            host.join().unwrap();
        }
        settle().await;

        assert_eq!(registry.added(), 1);
        assert_eq!(registry.removed(), 1);
        assert_eq!(registry.live(), 0);
        assert_eq!(subscription.status(), SubscriptionStatus::Cancelled);
        // At most the element the drive task was already delivering
        assert!(late.load(Ordering::SeqCst) <= 1);
    }
}

proptest! {
    /// However many times each subscription is cancelled, every registration
    /// is removed exactly once.
    #[test]
    fn test_cancel_is_idempotent(cancels in prop::collection::vec(1usize..5, 1..8)) {
        let registry = CountingRegistry::new();
        let sources = EventSources::new(registry.clone());

        tokio_test::block_on(async {
            let subscriptions: Vec<Subscription> = cancels
                .iter()
                .map(|_| sources.client_connects(Priority::MEDIUM).subscribe(|_| {}, |_| {}).unwrap())
                .collect();

            for (subscription, times) in subscriptions.iter().zip(&cancels) {
                for _ in 0..*times {
                    subscription.cancel();
                }
            }
        });

        prop_assert_eq!(registry.added(), cancels.len());
        prop_assert_eq!(registry.removed(), cancels.len());
        prop_assert_eq!(registry.live(), 0);
    }
}
