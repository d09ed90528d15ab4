//! HTTP header names and helpers shared by the transport and client.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, DATE, HeaderMap, HeaderValue, RETRY_AFTER};

use reauth_core::{AccessToken, AuthFailure, SessionUid};

/// Header carrying the session identity on every authenticated call.
pub const SESSION_UID_HEADER: &str = "x-session-uid";

/// Build the headers for a cookie-mode request: the UID identifies the
/// session, the cookies carry the secrets.
pub fn uid_headers(uid: &SessionUid) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        SESSION_UID_HEADER,
        HeaderValue::from_str(uid.as_str()).expect("invalid uid characters"),
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

/// Build the UID + bearer headers for a token-mode request.
pub fn auth_headers(uid: &SessionUid, access_token: &AccessToken) -> HeaderMap {
    let mut headers = uid_headers(uid);
    let bearer = format!("Bearer {}", access_token.as_str());
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&bearer).expect("invalid token characters"),
    );
    headers
}

/// Parse the server `Date` header into a UTC timestamp.
pub fn server_date(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    let raw = headers.get(DATE)?.to_str().ok()?;
    DateTime::parse_from_rfc2822(raw)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// Parse an integral-seconds `Retry-After` header.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?;
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Build an [`AuthFailure`] from a failed response's headers.
pub fn auth_failure(response: &reqwest::Response) -> AuthFailure {
    AuthFailure::new(server_date(response.headers()))
}
