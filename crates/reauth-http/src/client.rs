//! Authenticated JSON client with automatic session refresh.

use std::sync::Arc;

use reqwest::{Method, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use reauth_core::{ApiAuth, AuthStore, Error, RefreshConfig, Result};

use crate::coordinator::RefreshCoordinator;
use crate::headers;
use crate::transport::{RestTransport, decode_response, endpoint, transport_error};

/// JSON API client that recovers from expired access credentials.
///
/// Requests carry the UID (and, in token mode, bearer) headers read from
/// the store at send time. On a 401 the client hands the failed
/// response's server time to its [`RefreshCoordinator`] and, once the
/// refresh completes, replays the request a single time with fresh
/// credentials. The refresh transport shares this client's cookie jar so
/// cookie-mode sessions refresh against the same jar they live in.
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    store: Arc<dyn AuthStore>,
    refresh: RefreshCoordinator,
}

impl ApiClient {
    /// Create a client for the given API base URL.
    pub fn new(base: Url, store: Arc<dyn AuthStore>) -> Self {
        Self::with_config(base, store, RefreshConfig::default())
    }

    /// Create a client with an explicit refresh configuration.
    pub fn with_config(base: Url, store: Arc<dyn AuthStore>, config: RefreshConfig) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("reauth/", env!("CARGO_PKG_VERSION")))
            .cookie_store(true)
            .build()
            .expect("failed to build HTTP client");

        let transport = Arc::new(RestTransport::with_client(http.clone(), base.clone()));
        let refresh = RefreshCoordinator::with_config(transport, store.clone(), config);

        Self {
            http,
            base,
            store,
            refresh,
        }
    }

    /// The coordinator handling this client's refreshes.
    pub fn refresh_coordinator(&self) -> &RefreshCoordinator {
        &self.refresh
    }

    /// GET a JSON resource.
    pub async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        self.request::<(), R>(Method::GET, path, None).await
    }

    /// POST a JSON body and decode the JSON response.
    pub async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        self.request(Method::POST, path, Some(body)).await
    }

    #[instrument(skip_all, fields(%method, path))]
    async fn request<B, R>(&self, method: Method, path: &str, body: Option<&B>) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let response = self.send(method.clone(), path, body).await?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            debug!(path, "access credentials expired, refreshing session");
            self.refresh.handle(headers::auth_failure(&response)).await?;
            self.send(method, path, body).await?
        } else {
            response
        };

        decode_response(response).await
    }

    /// Build and send one request with the current credentials.
    async fn send<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response> {
        let auth = self.store.current().ok_or(Error::InactiveSession)?;

        let mut request = self.http.request(method, endpoint(&self.base, path));
        request = match &auth {
            ApiAuth::Cookie { uid, .. } => request.headers(headers::uid_headers(uid)),
            ApiAuth::Token {
                uid, access_token, ..
            } => request.headers(headers::auth_headers(uid, access_token)),
        };

        if let Some(body) = body {
            request = request.json(body);
        }

        request.send().await.map_err(transport_error)
    }
}
