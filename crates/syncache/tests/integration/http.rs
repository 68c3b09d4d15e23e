use reqwest::StatusCode;
use syncache::CacheError;
use syncache::http::{HttpFetchError, JsonFetcher};

use crate::{User, UsersApi, setup_store, user};

#[tokio::test]
async fn test_get_decodes_json() {
    syncache_test::setup();
    let api = UsersApi::new(vec![user("1"), user("2")]);
    let server = api.serve();

    let fetcher = JsonFetcher::new(server.url("/"));
    let users: Vec<User> = fetcher.get("/users").await.unwrap();

    assert_eq!(users, vec![user("1"), user("2")]);
    assert_eq!(api.hits.get(), 1);
}

#[tokio::test]
async fn test_error_status() {
    syncache_test::setup();
    let server = UsersApi::new(vec![]).serve();
    let fetcher = JsonFetcher::new(server.url("/"));

    let err = fetcher.get::<Vec<User>>("/missing").await.unwrap_err();
    assert!(matches!(
        err,
        HttpFetchError::Status { status, .. } if status == StatusCode::NOT_FOUND
    ));

    let err = fetcher.get::<Vec<User>>("/broken").await.unwrap_err();
    assert!(matches!(
        err,
        HttpFetchError::Status { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR
    ));
}

#[tokio::test]
async fn test_invalid_body() {
    syncache_test::setup();
    let server = UsersApi::new(vec![]).serve();
    let fetcher = JsonFetcher::new(server.url("/"));

    let err = fetcher.get::<Vec<User>>("/garbage").await.unwrap_err();
    assert!(matches!(err, HttpFetchError::InvalidBody { .. }));
}

#[tokio::test]
async fn test_fetch_errors_keep_their_cause() {
    let store = setup_store(|_| ());
    let server = UsersApi::new(vec![]).serve();
    let fetcher = JsonFetcher::new(server.url("/")).fetcher::<Vec<User>>();

    store.set_fetcher("/garbage", &fetcher).unwrap();
    let err = store.revalidate::<Vec<User>>("/garbage").await.unwrap_err();

    let cause = match err {
        CacheError::Fetch(cause) => cause,
        other => panic!("unexpected error: {other}"),
    };
    assert!(matches!(
        cause.downcast_ref::<HttpFetchError>(),
        Some(HttpFetchError::InvalidBody { .. })
    ));
}
