//! reqwest-backed refresh transport.

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use reauth_core::error::TransportError;
use reauth_core::{
    AccessToken, CookieRefresh, Error, HttpError, RefreshToken, RefreshTransport, Result,
    SessionUid, TokenRefresh,
};

use crate::headers;

/// Endpoint exchanging a refresh token for a new token pair.
const TOKEN_REFRESH: &str = "auth/refresh";

/// Endpoint refreshing a cookie-based session.
const COOKIE_REFRESH: &str = "auth/sessions/refresh";

/// Request body for the token-refresh endpoint.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "PascalCase")]
struct TokenRefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Response from the token-refresh endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TokenRefreshResponse {
    #[serde(rename = "UID")]
    uid: String,
    access_token: String,
    refresh_token: String,
}

/// Response from the cookie-refresh endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CookieRefreshResponse {
    #[serde(rename = "UID")]
    uid: String,
    refresh_counter: Option<u64>,
}

/// Error body shape used by the session API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiErrorResponse {
    code: Option<i64>,
    error: Option<String>,
}

/// A network-backed [`RefreshTransport`] using reqwest.
///
/// Cookie-mode refreshes rely on the underlying client's cookie jar
/// carrying the session cookies, so the jar must be shared with whatever
/// client performs the regular API traffic.
#[derive(Clone, Debug)]
pub struct RestTransport {
    client: reqwest::Client,
    base: Url,
}

impl RestTransport {
    /// Create a transport for the given API base URL.
    pub fn new(base: Url) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("reauth/", env!("CARGO_PKG_VERSION")))
            .cookie_store(true)
            .build()
            .expect("failed to build HTTP client");

        Self::with_client(client, base)
    }

    /// Create a transport reusing an existing reqwest client (and its
    /// cookie jar).
    pub fn with_client(client: reqwest::Client, base: Url) -> Self {
        Self { client, base }
    }

    /// Returns the API base URL this transport is configured for.
    pub fn base(&self) -> &Url {
        &self.base
    }
}

#[async_trait]
impl RefreshTransport for RestTransport {
    #[instrument(skip(self), fields(uid = %uid))]
    async fn refresh_cookie(&self, uid: &SessionUid) -> Result<CookieRefresh> {
        debug!("refreshing cookie session");

        let response = self
            .client
            .post(endpoint(&self.base, COOKIE_REFRESH))
            .headers(headers::uid_headers(uid))
            .send()
            .await
            .map_err(transport_error)?;

        let body: CookieRefreshResponse = decode_response(response).await?;

        Ok(CookieRefresh {
            uid: SessionUid::new(body.uid)?,
            refresh_counter: body.refresh_counter,
        })
    }

    #[instrument(skip(self, access_token, refresh_token), fields(uid = %uid))]
    async fn refresh_token(
        &self,
        uid: &SessionUid,
        access_token: &AccessToken,
        refresh_token: &RefreshToken,
    ) -> Result<TokenRefresh> {
        debug!("refreshing token session");

        let request = TokenRefreshRequest {
            refresh_token: refresh_token.as_str(),
        };

        let response = self
            .client
            .post(endpoint(&self.base, TOKEN_REFRESH))
            .headers(headers::auth_headers(uid, access_token))
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let body: TokenRefreshResponse = decode_response(response).await?;

        Ok(TokenRefresh {
            uid: SessionUid::new(body.uid)?,
            access_token: AccessToken::new(body.access_token),
            refresh_token: RefreshToken::new(body.refresh_token),
        })
    }
}

/// Join the base URL and an endpoint path.
pub(crate) fn endpoint(base: &Url, path: &str) -> String {
    format!("{}/{}", base.as_str().trim_end_matches('/'), path)
}

/// Classify a reqwest error into the crate's transport taxonomy.
pub(crate) fn transport_error(err: reqwest::Error) -> Error {
    let transport = if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Offline {
            message: err.to_string(),
        }
    } else {
        TransportError::Other {
            message: err.to_string(),
        }
    };

    Error::Transport(transport)
}

/// Decode a response body, mapping error statuses into the taxonomy.
pub(crate) async fn decode_response<R: DeserializeOwned>(response: Response) -> Result<R> {
    let status = response.status();

    if status.is_success() {
        return response.json::<R>().await.map_err(transport_error);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = headers::retry_after(response.headers());
        return Err(Error::RateLimited { retry_after });
    }

    Err(Error::Http(parse_error_response(response).await))
}

/// Parse an error response body into an [`HttpError`].
async fn parse_error_response(response: Response) -> HttpError {
    let status = response.status().as_u16();

    match response.json::<ApiErrorResponse>().await {
        Ok(body) => HttpError::new(status, body.code, body.error),
        Err(_) => HttpError::new(status, None, None),
    }
}
