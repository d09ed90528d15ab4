//! Auth descriptors and refreshed-credential payloads.

use chrono::{DateTime, Utc};

use crate::types::{AccessToken, RefreshToken, SessionUid};

/// Which authentication transport a session uses.
///
/// The two modes are mutually exclusive: a session authenticates either
/// through server-set HTTP cookies or through explicit bearer tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMode {
    /// Server-set HTTP cookies carry the session.
    Cookie,
    /// Bearer tokens carried in headers.
    Token,
}

/// The auth descriptor for the current session.
///
/// `refresh_time` marks when the credentials were last refreshed and is
/// `None` until the first refresh. Per UID it only ever moves forward;
/// the coordinator relies on this to recognize refreshes that already
/// happened.
#[derive(Clone, Debug)]
pub enum ApiAuth {
    /// A cookie-based session. The secrets live in the cookie jar.
    Cookie {
        uid: SessionUid,
        refresh_time: Option<DateTime<Utc>>,
    },
    /// A bearer-token session.
    Token {
        uid: SessionUid,
        access_token: AccessToken,
        refresh_token: RefreshToken,
        refresh_time: Option<DateTime<Utc>>,
    },
}

impl ApiAuth {
    /// The session identity.
    pub fn uid(&self) -> &SessionUid {
        match self {
            ApiAuth::Cookie { uid, .. } => uid,
            ApiAuth::Token { uid, .. } => uid,
        }
    }

    /// The authentication mode of this descriptor.
    pub fn mode(&self) -> AuthMode {
        match self {
            ApiAuth::Cookie { .. } => AuthMode::Cookie,
            ApiAuth::Token { .. } => AuthMode::Token,
        }
    }

    /// When these credentials were last refreshed, if ever.
    pub fn refresh_time(&self) -> Option<DateTime<Utc>> {
        match self {
            ApiAuth::Cookie { refresh_time, .. } => *refresh_time,
            ApiAuth::Token { refresh_time, .. } => *refresh_time,
        }
    }
}

/// Credentials published through [`AuthStore::on_refresh`] after a
/// successful refresh.
///
/// Token-mode refreshes carry `Some` tokens and `cookies == false`;
/// cookie-mode refreshes carry no tokens and `cookies == true`, the new
/// session cookies having been set on the transport.
///
/// [`AuthStore::on_refresh`]: crate::traits::AuthStore::on_refresh
#[derive(Clone, Debug)]
pub struct RefreshedSession {
    pub uid: SessionUid,
    pub access_token: Option<AccessToken>,
    pub refresh_token: Option<RefreshToken>,
    pub refresh_time: DateTime<Utc>,
    pub cookies: bool,
}

/// The authentication-expiry signal handed to the coordinator.
///
/// Carries the server time (`Date` header) of the response that failed
/// with an expired credential, used to order the failure against
/// refreshes that may have completed since.
#[derive(Clone, Copy, Debug, Default)]
pub struct AuthFailure {
    pub server_time: Option<DateTime<Utc>>,
}

impl AuthFailure {
    /// Create a failure signal from an optional server timestamp.
    pub fn new(server_time: Option<DateTime<Utc>>) -> Self {
        Self { server_time }
    }
}
