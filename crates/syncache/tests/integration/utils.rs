use std::sync::Arc;

use axum::Router;
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::routing::get;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use syncache::Config;
use syncache::http::JsonFetcher;
use syncache::{Fetcher, Store};
use syncache_test as test;

pub use test::{Counter, Gate, Server};

/// Setup tests and create an isolated store.
///
/// The `update_config` closure can modify any default configuration if needed before the store
/// is created.
pub fn setup_store(update_config: impl FnOnce(&mut Config)) -> Store {
    test::setup();

    let mut config = Config::default();
    update_config(&mut config);
    Store::new(config)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
}

pub fn user(id: &str) -> User {
    User { id: id.to_owned() }
}

/// State of the fake users API.
///
/// `GET /users` is held back until the gate opens, which it is by default.
#[derive(Clone, Debug, Default)]
pub struct UsersApi {
    pub users: Arc<Mutex<Vec<User>>>,
    pub hits: Counter,
    pub gate: Gate,
}

impl UsersApi {
    pub fn new(users: Vec<User>) -> Self {
        let api = Self {
            users: Arc::new(Mutex::new(users)),
            ..Default::default()
        };
        api.gate.open();
        api
    }

    /// Like [`new`](Self::new), but requests wait until the gate is opened.
    pub fn gated(users: Vec<User>) -> Self {
        Self {
            users: Arc::new(Mutex::new(users)),
            ..Default::default()
        }
    }

    pub fn serve(&self) -> Server {
        let router = Router::new()
            .route("/users", get(list_users).post(create_user))
            .route("/broken", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .route("/garbage", get(|| async { "this is not json" }))
            .with_state(self.clone());
        Server::new(router)
    }
}

async fn list_users(State(api): State<UsersApi>) -> Json<Vec<User>> {
    api.hits.hit();
    api.gate.wait().await;
    Json(api.users.lock().clone())
}

async fn create_user(State(api): State<UsersApi>, Json(user): Json<User>) -> StatusCode {
    api.users.lock().push(user);
    StatusCode::CREATED
}

/// A JSON fetcher for users pointed at `server`.
pub fn users_fetcher(server: &Server) -> Fetcher<Vec<User>> {
    JsonFetcher::new(server.url("/")).fetcher()
}

/// An in-process fetcher counting its invocations, resolving to the invocation number.
pub fn counting_fetcher(counter: &Counter) -> Fetcher<usize> {
    let counter = counter.clone();
    Fetcher::new(move |_key: &str| {
        let n = counter.hit();
        async move { Ok(n) }
    })
}
