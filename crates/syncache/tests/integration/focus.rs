use std::sync::Arc;
use std::time::Duration;

use syncache::{ActivityChannel, ActivityEvent, BindOptions, Binding, Config, Store};

use crate::{Counter, counting_fetcher};

fn store_with_channel() -> (Arc<ActivityChannel>, Store) {
    syncache_test::setup();
    let host = Arc::new(ActivityChannel::new());
    let store = Store::with_host(Config::default(), host.clone());
    (host, store)
}

/// Waits until the fetch the binding observes has settled.
async fn settled(binding: &mut Binding<usize>) -> Option<usize> {
    loop {
        let snapshot = binding.changed().await.unwrap();
        if !snapshot.is_validating {
            return snapshot.data;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_focus_respects_dedup_window() {
    let (host, store) = store_with_channel();
    let calls = Counter::new();

    let mut binding = store
        .bind(
            "/a",
            counting_fetcher(&calls),
            BindOptions::default().revalidate_on_focus(true),
        )
        .unwrap();
    binding.initial_revalidation().unwrap().await.unwrap();

    // within the window, focus is answered from the cache
    host.emit(ActivityEvent::Focus);
    tokio::task::yield_now().await;
    assert_eq!(calls.get(), 1);
    assert!(!binding.is_validating());

    tokio::time::advance(Duration::from_secs(2)).await;
    host.emit(ActivityEvent::VisibilityChange { visible: true });
    assert!(binding.is_validating());
    assert_eq!(settled(&mut binding).await, Some(2));
    assert_eq!(calls.get(), 2);
}

#[tokio::test]
async fn test_focus_revalidates_every_key() {
    let (host, store) = store_with_channel();
    let a_calls = Counter::new();
    let b_calls = Counter::new();
    let options = || {
        BindOptions::default()
            .revalidate_on_focus(true)
            .revalidate_on_bind(false)
    };

    let a_fetcher = counting_fetcher(&a_calls);
    let mut a = store.bind("/a", a_fetcher.clone(), options()).unwrap();
    let mut b = store.bind("/b", counting_fetcher(&b_calls), options()).unwrap();
    // a second binding on the same key must not cause a second fetch
    let _also_a = store.bind("/a", a_fetcher, options()).unwrap();

    host.emit(ActivityEvent::VisibilityChange { visible: false });
    assert!(!a.is_validating());
    assert!(!b.is_validating());

    host.emit(ActivityEvent::Focus);
    assert_eq!(settled(&mut a).await, Some(1));
    assert_eq!(settled(&mut b).await, Some(1));
    assert_eq!(a_calls.get(), 1);
    assert_eq!(b_calls.get(), 1);
}

#[tokio::test]
async fn test_dropping_last_binding_detaches() {
    let (host, store) = store_with_channel();
    let calls = Counter::new();
    let options = || BindOptions::default().revalidate_on_focus(true);

    let fetcher = counting_fetcher(&calls);

    let first = store.bind("/a", fetcher.clone(), options()).unwrap();
    let second = store.bind("/a", fetcher, options()).unwrap();
    assert_eq!(host.attach_count(), 2);

    drop(first);
    assert!(store.focus().is_attached());
    drop(second);
    assert!(!store.focus().is_attached());
    assert_eq!(host.detach_count(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_focus_from_host_thread() {
    let (host, store) = store_with_channel();
    let calls = Counter::new();

    let mut binding = store
        .bind(
            "/a",
            counting_fetcher(&calls),
            BindOptions::default()
                .revalidate_on_focus(true)
                .revalidate_on_bind(false),
        )
        .unwrap();

    // hosts deliver activity from their own event loop, outside of any runtime
    let emitter = Arc::clone(&host);
    std::thread::spawn(move || emitter.emit(ActivityEvent::Focus))
        .join()
        .unwrap();

    assert_eq!(settled(&mut binding).await, Some(1));
    assert_eq!(calls.get(), 1);
}
