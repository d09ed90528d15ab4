//! Refresh transport trait.

use async_trait::async_trait;

use crate::Result;
use crate::types::{AccessToken, RefreshToken, SessionUid};

/// Result of a token-mode refresh exchange: a fresh token pair.
#[derive(Clone, Debug)]
pub struct TokenRefresh {
    pub uid: SessionUid,
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
}

/// Result of a cookie-mode refresh exchange. The new session cookies are
/// set on the transport; only the identity and the server's refresh
/// counter come back in the body.
#[derive(Clone, Debug)]
pub struct CookieRefresh {
    pub uid: SessionUid,
    pub refresh_counter: Option<u64>,
}

/// One completed refresh exchange, tagged by auth mode.
#[derive(Clone, Debug)]
pub enum RefreshOutcome {
    Token(TokenRefresh),
    Cookie(CookieRefresh),
}

/// Performs one credential-refresh exchange against the session API.
///
/// Implementations make exactly one network call per method; retry
/// policy belongs to the coordinator.
#[async_trait]
pub trait RefreshTransport: Send + Sync {
    /// Refresh a cookie-based session.
    async fn refresh_cookie(&self, uid: &SessionUid) -> Result<CookieRefresh>;

    /// Exchange the current refresh token for a new token pair.
    async fn refresh_token(
        &self,
        uid: &SessionUid,
        access_token: &AccessToken,
        refresh_token: &RefreshToken,
    ) -> Result<TokenRefresh>;
}
