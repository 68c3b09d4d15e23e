use std::time::Duration;

use syncache::{BindOptions, CacheError, Fetcher};

use crate::setup_store;

fn constant(value: &'static str) -> Fetcher<&'static str> {
    Fetcher::new(move |_key: &str| async move { Ok(value) })
}

fn options() -> BindOptions<&'static str> {
    BindOptions::default()
        .revalidate_on_bind(false)
        .dedup_interval(Duration::ZERO)
}

#[tokio::test]
async fn test_most_recent_binding_wins() {
    let store = setup_store(|_| ());

    let first = store.bind("/k", constant("first"), options()).unwrap();
    let _second = store.bind("/k", constant("second"), options()).unwrap();

    // plain revalidations use the most recently bound fetcher
    let value = store.revalidate_with::<&str>("/k", Duration::ZERO).await;
    assert_eq!(value.unwrap(), "second");

    // a binding always revalidates with its own fetcher
    assert_eq!(first.revalidate().await, Some("first"));
}

#[tokio::test]
async fn test_strict_fetchers_reject_conflicts() {
    let store = setup_store(|config| config.strict_fetchers = true);
    let fetcher = constant("first");

    let _first = store.bind("/k", fetcher.clone(), options()).unwrap();
    let _again = store.bind("/k", fetcher, options()).unwrap();

    let err = store.bind("/k", constant("second"), options()).unwrap_err();
    assert!(matches!(err, CacheError::FetcherConflict { ref key } if &**key == "/k"));
    assert_eq!(
        err.to_string(),
        "key /k is bound to a different fetcher"
    );

    // other keys are unaffected
    let other = store.bind("/other", constant("second"), options()).unwrap();
    assert_eq!(other.revalidate().await, Some("second"));
}

#[tokio::test]
async fn test_type_mismatch_on_bind() {
    let store = setup_store(|_| ());
    let _strings = store.bind("/k", constant("text"), options()).unwrap();

    let err = store
        .bind("/k", Fetcher::new(|_key: &str| async { Ok(1u32) }), BindOptions::default())
        .unwrap_err();
    assert!(matches!(err, CacheError::TypeMismatch { .. }));
}
