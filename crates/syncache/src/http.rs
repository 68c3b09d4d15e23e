//! A [`Fetcher`] for JSON APIs.

use reqwest::{Client, StatusCode, header};
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

use crate::fetcher::Fetcher;

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("syncache/", env!("CARGO_PKG_VERSION"));

/// Errors of a [`JsonFetcher`].
#[derive(Debug, Error)]
pub enum HttpFetchError {
    /// The key could not be joined to the base URL.
    #[error("invalid request path `{key}`")]
    InvalidKey {
        key: String,
        #[source]
        source: url::ParseError,
    },
    /// The request could not be sent, or the response could not be read.
    #[error("request failed")]
    Request(#[from] reqwest::Error),
    /// The server answered with a non-success status.
    #[error("unexpected status {status} from `{url}`")]
    Status { url: Url, status: StatusCode },
    /// The response body is not the expected JSON.
    #[error("invalid response body from `{url}`")]
    InvalidBody {
        url: Url,
        #[source]
        source: serde_json::Error,
    },
}

/// Fetches keys as request paths relative to a base URL and decodes the JSON response.
///
/// Responses are never served from an HTTP cache, the store does its own caching.
#[derive(Clone, Debug)]
pub struct JsonFetcher {
    client: Client,
    base: Url,
}

impl JsonFetcher {
    pub fn new(base: Url) -> Self {
        Self::with_client(Client::new(), base)
    }

    pub fn with_client(client: Client, base: Url) -> Self {
        Self { client, base }
    }

    /// Resolves `key` against the base URL.
    pub fn url_for(&self, key: &str) -> Result<Url, HttpFetchError> {
        self.base
            .join(key)
            .map_err(|source| HttpFetchError::InvalidKey {
                key: key.to_owned(),
                source,
            })
    }

    /// Requests `key` and decodes the response body.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, HttpFetchError> {
        let url = self.url_for(key)?;
        tracing::debug!("Fetching `{}`", url);

        let response = self
            .client
            .get(url.clone())
            .header(header::CACHE_CONTROL, "no-store")
            .header(header::USER_AGENT, USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!("Unexpected status {} from `{}`", status, url);
            return Err(HttpFetchError::Status { url, status });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|source| HttpFetchError::InvalidBody { url, source })
    }

    /// Wraps this client into a [`Fetcher`] decoding responses into `T`.
    pub fn fetcher<T>(&self) -> Fetcher<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let this = self.clone();
        Fetcher::new(move |key: &str| {
            let this = this.clone();
            let key = key.to_owned();
            async move { this.get::<T>(&key).await.map_err(anyhow::Error::from) }
        })
    }
}
