//! In-memory auth store.

use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use reauth_core::{ApiAuth, AuthStore, RefreshedSession, Result};

/// An [`AuthStore`] keeping the auth descriptor in process memory.
///
/// Suitable for clients that hold credentials for the lifetime of the
/// process and for tests. Anything longer-lived should implement
/// [`AuthStore`] over its own persistence instead.
#[derive(Debug, Default)]
pub struct MemoryAuthStore {
    auth: RwLock<Option<ApiAuth>>,
}

impl MemoryAuthStore {
    /// Create a store holding the given descriptor.
    pub fn new(auth: ApiAuth) -> Self {
        Self {
            auth: RwLock::new(Some(auth)),
        }
    }

    /// Create a store with no active session.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Replace the current descriptor wholesale.
    pub fn replace(&self, auth: ApiAuth) {
        *self.auth.write().unwrap() = Some(auth);
    }

    /// Drop the current session, if any.
    pub fn clear(&self) {
        *self.auth.write().unwrap() = None;
    }
}

#[async_trait]
impl AuthStore for MemoryAuthStore {
    fn current(&self) -> Option<ApiAuth> {
        self.auth.read().unwrap().clone()
    }

    async fn on_refresh(&self, refreshed: RefreshedSession) -> Result<()> {
        debug!(uid = %refreshed.uid, cookies = refreshed.cookies, "storing refreshed credentials");

        let auth = match (refreshed.access_token, refreshed.refresh_token) {
            (Some(access_token), Some(refresh_token)) if !refreshed.cookies => ApiAuth::Token {
                uid: refreshed.uid,
                access_token,
                refresh_token,
                refresh_time: Some(refreshed.refresh_time),
            },
            _ => ApiAuth::Cookie {
                uid: refreshed.uid,
                refresh_time: Some(refreshed.refresh_time),
            },
        };

        *self.auth.write().unwrap() = Some(auth);
        Ok(())
    }
}
