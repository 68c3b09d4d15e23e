use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use syncache::{BindOptions, MutateOptions, Mutation};

use crate::{UsersApi, setup_store, user, users_fetcher};

#[tokio::test]
async fn test_fallback_then_server_data() {
    let store = setup_store(|_| ());
    let api = UsersApi::new(vec![user("1")]);
    let server = api.serve();

    let mut binding = store
        .bind(
            "/users",
            users_fetcher(&server),
            BindOptions::default().fallback_data(vec![]),
        )
        .unwrap();

    let snapshot = binding.snapshot();
    assert_eq!(snapshot.data, Some(vec![]));
    assert!(snapshot.is_validating);
    assert!(snapshot.error.is_none());

    let users = binding.initial_revalidation().unwrap().await.unwrap();
    assert_eq!(users, vec![user("1")]);

    let snapshot = binding.snapshot();
    assert_eq!(snapshot.data, Some(vec![user("1")]));
    assert!(!snapshot.is_validating);
    assert_eq!(snapshot.version, 2);
    assert_eq!(api.hits.get(), 1);
}

#[tokio::test]
async fn test_optimistic_append_is_reconciled() {
    let store = setup_store(|_| ());
    let api = UsersApi::new(vec![user("1")]);
    let server = api.serve();

    let mut binding = store
        .bind("/users", users_fetcher(&server), BindOptions::default())
        .unwrap();
    binding.initial_revalidation().unwrap().await.unwrap();

    let history = Arc::new(Mutex::new(Vec::new()));
    let _subscription = {
        let history = Arc::clone(&history);
        let observer = store.clone();
        store
            .subscribe::<Vec<crate::User>, _>("/users", move || {
                let data = observer.peek::<Vec<crate::User>>("/users");
                history.lock().push(data.unwrap_or_default());
            })
            .unwrap()
    };

    // the server assigns its own id to the new user
    let response = reqwest::Client::new()
        .post(server.url("/users"))
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(serde_json::to_vec(&user("server-2")).unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);

    let reconciled = binding
        .mutate(
            Mutation::update(|current: Option<Vec<crate::User>>| {
                let mut users = current.unwrap_or_default();
                users.push(user("local-2"));
                Ok(users)
            }),
            MutateOptions::revalidate(),
        )
        .await
        .unwrap();

    assert_eq!(reconciled, Some(vec![user("1"), user("server-2")]));
    assert_eq!(binding.data(), Some(vec![user("1"), user("server-2")]));

    let history = history.lock();
    // the optimistic value was visible before the server answered
    assert_eq!(history.first(), Some(&vec![user("1"), user("local-2")]));
    assert_eq!(history.last(), Some(&vec![user("1"), user("server-2")]));
    assert_eq!(history.len(), 3);
    assert_eq!(api.hits.get(), 2);
}

#[tokio::test]
async fn test_concurrent_bindings_share_one_request() {
    let store = setup_store(|_| ());
    let api = UsersApi::gated(vec![user("1")]);
    let server = api.serve();
    let fetcher = users_fetcher(&server);

    let mut first = store
        .bind("/users", fetcher.clone(), BindOptions::default())
        .unwrap();
    while api.hits.get() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // the first request is still held by the server
    let mut second = store
        .bind("/users", fetcher, BindOptions::default())
        .unwrap();
    assert!(first.is_validating());
    assert!(second.is_validating());

    api.gate.open();
    let first = first.initial_revalidation().unwrap().await.unwrap();
    let second = second.initial_revalidation().unwrap().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(api.hits.get(), 1);
}

#[tokio::test]
async fn test_server_errors_reach_every_binding() {
    let store = setup_store(|_| ());
    let api = UsersApi::new(vec![]);
    let server = api.serve();
    let fetcher = users_fetcher(&server);

    let mut first = store
        .bind(
            "/broken",
            fetcher.clone(),
            BindOptions::default().fallback_data(vec![user("cached")]),
        )
        .unwrap();
    let second = store
        .bind("/broken", fetcher, BindOptions::default())
        .unwrap();

    let err = first.initial_revalidation().unwrap().await.unwrap_err();
    assert!(err.is_fetch());
    assert!(err.to_string().contains("500"));

    // fallback data survives the failure
    assert_eq!(first.data(), Some(vec![user("cached")]));
    assert!(second.error().unwrap().is_fetch());
    assert!(!second.is_validating());
}
