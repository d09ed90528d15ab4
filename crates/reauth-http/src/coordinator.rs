//! Single-flight session-refresh coordination.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use reauth_core::error::TransportError;
use reauth_core::{
    ApiAuth, AuthFailure, AuthStore, Error, RefreshConfig, RefreshOutcome, RefreshTransport,
    RefreshedSession, Result, SessionUid,
};

/// Serializes concurrent credential refreshes per session identity.
///
/// At most one refresh operation is in flight per UID. Callers that queue
/// behind an in-flight refresh re-evaluate staleness once unblocked, so a
/// refresh that already happened is never repeated. Different UIDs never
/// serialize against each other.
///
/// Any error returned from [`handle`](Self::handle) means the session
/// could not be refreshed; callers should treat it as a sign-out signal.
pub struct RefreshCoordinator {
    transport: Arc<dyn RefreshTransport>,
    store: Arc<dyn AuthStore>,
    config: RefreshConfig,
    locks: StdMutex<HashMap<SessionUid, Arc<AsyncMutex<()>>>>,
}

impl RefreshCoordinator {
    /// Create a coordinator with the default retry configuration.
    pub fn new(transport: Arc<dyn RefreshTransport>, store: Arc<dyn AuthStore>) -> Self {
        Self::with_config(transport, store, RefreshConfig::default())
    }

    /// Create a coordinator with an explicit retry configuration.
    pub fn with_config(
        transport: Arc<dyn RefreshTransport>,
        store: Arc<dyn AuthStore>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            transport,
            store,
            config,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Handle an authentication-expiry signal.
    ///
    /// Designed to be installed as the 401 handler of an HTTP client:
    /// pass the failed response's server time, await the refresh, then
    /// replay the original request. The failure's timestamp is compared
    /// against the session's last refresh so a refresh that a concurrent
    /// caller already performed is not repeated.
    #[instrument(skip(self))]
    pub async fn handle(&self, failure: AuthFailure) -> Result<()> {
        let uid = self
            .store
            .current()
            .map(|auth| auth.uid().clone())
            .ok_or(Error::InactiveSession)?;

        let lock = self.lock_for(&uid);
        let guard = lock.lock().await;
        let result = self.refresh_if_stale(&failure).await;
        drop(guard);
        self.evict(&uid);

        result
    }

    /// Fetch or lazily create the per-UID mutex.
    fn lock_for(&self, uid: &SessionUid) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks.entry(uid.clone()).or_default().clone()
    }

    /// Drop the per-UID mutex once nobody holds or waits on it.
    fn evict(&self, uid: &SessionUid) {
        let mut locks = self.locks.lock().unwrap();
        if let Some(lock) = locks.get(uid) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(uid);
            }
        }
    }

    /// Refresh unless a concurrent caller already did.
    ///
    /// Runs under the per-UID lock. The failure is stale when the session
    /// was refreshed at or after the failure's server time.
    async fn refresh_if_stale(&self, failure: &AuthFailure) -> Result<()> {
        let auth = self.store.current().ok_or(Error::InactiveSession)?;

        let observed = failure.server_time.unwrap_or_else(Utc::now);
        if let Some(last) = auth.refresh_time() {
            if observed <= last {
                debug!(%last, "session already refreshed by a concurrent caller");
                return Ok(());
            }
        }

        let outcome = self.refresh_with_retry().await?;
        let refresh_time = failure.server_time.unwrap_or_else(Utc::now);

        let refreshed = match outcome {
            RefreshOutcome::Token(token) => RefreshedSession {
                uid: token.uid,
                access_token: Some(token.access_token),
                refresh_token: Some(token.refresh_token),
                refresh_time,
                cookies: false,
            },
            RefreshOutcome::Cookie(cookie) => RefreshedSession {
                uid: cookie.uid,
                access_token: None,
                refresh_token: None,
                refresh_time,
                cookies: true,
            },
        };

        info!("successfully refreshed session credentials");
        self.store.on_refresh(refreshed).await?;

        self.jitter().await;
        Ok(())
    }

    /// One refresh exchange against the current auth descriptor.
    ///
    /// The descriptor is re-read on every call so a credential swap by
    /// another writer mid-retry is honored.
    async fn attempt(&self) -> Result<RefreshOutcome> {
        let auth = self.store.current().ok_or(Error::InactiveSession)?;

        match auth {
            ApiAuth::Cookie { uid, .. } => {
                let cookie = self.transport.refresh_cookie(&uid).await?;
                Ok(RefreshOutcome::Cookie(cookie))
            }
            ApiAuth::Token {
                uid,
                access_token,
                refresh_token,
                ..
            } => {
                let token = self
                    .transport
                    .refresh_token(&uid, &access_token, &refresh_token)
                    .await?;
                Ok(RefreshOutcome::Token(token))
            }
        }
    }

    /// The bounded retry loop around [`Self::attempt`].
    ///
    /// Offline and timeout failures share a dedicated ceiling and reset
    /// the generic budget to it; only offline failures sleep before the
    /// next attempt. Rate limiting waits out the server's `Retry-After`
    /// within the generic budget. Everything else is terminal.
    async fn refresh_with_retry(&self) -> Result<RefreshOutcome> {
        let mut attempt: u32 = 0;
        let mut max_attempts = self.config.retry_attempts_max;

        loop {
            let err = match self.attempt().await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => err,
            };

            if attempt >= max_attempts {
                return Err(err);
            }

            match &err {
                Error::Transport(TransportError::Offline { .. }) => {
                    if attempt > self.config.offline_retry_attempts_max {
                        return Err(err);
                    }
                    warn!(attempt, "refresh failed offline, retrying");
                    sleep(self.config.offline_retry_delay).await;
                    max_attempts = self.config.offline_retry_attempts_max;
                }
                Error::Transport(TransportError::Timeout) => {
                    if attempt > self.config.offline_retry_attempts_max {
                        return Err(err);
                    }
                    warn!(attempt, "refresh timed out, retrying");
                    max_attempts = self.config.offline_retry_attempts_max;
                }
                Error::RateLimited { retry_after } => {
                    let delay = retry_after.unwrap_or(Duration::ZERO);
                    if delay > self.config.retry_after_max {
                        return Err(err);
                    }
                    debug!(attempt, ?delay, "refresh rate limited, backing off");
                    sleep(delay).await;
                }
                _ => return Err(err),
            }

            attempt += 1;
        }
    }

    /// Randomized post-success delay, desynchronizing clients that all
    /// refreshed around the same time.
    async fn jitter(&self) {
        let min = self.config.jitter_min.as_millis() as u64;
        let max = self.config.jitter_max.as_millis() as u64;

        let millis = if max > min {
            rand::rng().random_range(min..=max)
        } else {
            min
        };

        sleep(Duration::from_millis(millis)).await;
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use tokio::time::Instant;

    use reauth_core::error::HttpError;
    use reauth_core::{AccessToken, CookieRefresh, RefreshToken, TokenRefresh};

    use crate::store::MemoryAuthStore;

    /// One scripted transport response.
    #[derive(Clone)]
    enum Step {
        Succeed(RefreshOutcome),
        Offline,
        Timeout,
        RateLimited(Option<Duration>),
        Forbidden,
    }

    impl Step {
        fn into_result(self) -> Result<RefreshOutcome> {
            match self {
                Step::Succeed(outcome) => Ok(outcome),
                Step::Offline => Err(Error::Transport(TransportError::Offline {
                    message: "connection refused".to_string(),
                })),
                Step::Timeout => Err(Error::Transport(TransportError::Timeout)),
                Step::RateLimited(retry_after) => Err(Error::RateLimited { retry_after }),
                Step::Forbidden => Err(Error::Http(HttpError::new(
                    403,
                    None,
                    Some("Forbidden".to_string()),
                ))),
            }
        }
    }

    /// Credential swap applied after a given transport call completes.
    struct Swap {
        after_call: usize,
        store: Arc<MemoryAuthStore>,
        auth: ApiAuth,
    }

    /// Transport that replays a script, repeating the last step forever.
    struct ScriptedTransport {
        steps: Vec<Step>,
        calls: AtomicUsize,
        seen_refresh_tokens: StdMutex<Vec<String>>,
        swap: StdMutex<Option<Swap>>,
    }

    impl ScriptedTransport {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            assert!(!steps.is_empty(), "script must have at least one step");
            Arc::new(Self {
                steps,
                calls: AtomicUsize::new(0),
                seen_refresh_tokens: StdMutex::new(Vec::new()),
                swap: StdMutex::new(None),
            })
        }

        fn swap_after(&self, after_call: usize, store: Arc<MemoryAuthStore>, auth: ApiAuth) {
            *self.swap.lock().unwrap() = Some(Swap {
                after_call,
                store,
                auth,
            });
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn next(&self) -> Result<RefreshOutcome> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.steps[call.min(self.steps.len() - 1)].clone();

            if let Some(swap) = self.swap.lock().unwrap().as_ref() {
                if call == swap.after_call {
                    swap.store.replace(swap.auth.clone());
                }
            }

            step.into_result()
        }
    }

    #[async_trait]
    impl RefreshTransport for ScriptedTransport {
        async fn refresh_cookie(&self, _uid: &SessionUid) -> Result<CookieRefresh> {
            match self.next()? {
                RefreshOutcome::Cookie(cookie) => Ok(cookie),
                RefreshOutcome::Token(_) => panic!("script returned token outcome in cookie mode"),
            }
        }

        async fn refresh_token(
            &self,
            _uid: &SessionUid,
            _access_token: &AccessToken,
            refresh_token: &RefreshToken,
        ) -> Result<TokenRefresh> {
            self.seen_refresh_tokens
                .lock()
                .unwrap()
                .push(refresh_token.as_str().to_string());

            match self.next()? {
                RefreshOutcome::Token(token) => Ok(token),
                RefreshOutcome::Cookie(_) => panic!("script returned cookie outcome in token mode"),
            }
        }
    }

    fn uid(value: &str) -> SessionUid {
        SessionUid::new(value).unwrap()
    }

    fn token_auth(refresh_time: Option<DateTime<Utc>>) -> ApiAuth {
        ApiAuth::Token {
            uid: uid("uid-1"),
            access_token: AccessToken::new("access-0"),
            refresh_token: RefreshToken::new("refresh-0"),
            refresh_time,
        }
    }

    fn token_outcome(generation: u32) -> RefreshOutcome {
        RefreshOutcome::Token(TokenRefresh {
            uid: uid("uid-1"),
            access_token: AccessToken::new(format!("access-{generation}")),
            refresh_token: RefreshToken::new(format!("refresh-{generation}")),
        })
    }

    fn failure_at(hms: (u32, u32, u32)) -> AuthFailure {
        let (h, m, s) = hms;
        AuthFailure::new(Some(Utc.with_ymd_and_hms(2025, 8, 4, h, m, s).unwrap()))
    }

    fn coordinator(
        transport: &Arc<ScriptedTransport>,
        store: &Arc<MemoryAuthStore>,
    ) -> RefreshCoordinator {
        RefreshCoordinator::new(transport.clone(), store.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_publishes_new_token_credentials() {
        let transport = ScriptedTransport::new(vec![Step::Succeed(token_outcome(1))]);
        let store = Arc::new(MemoryAuthStore::new(token_auth(None)));

        coordinator(&transport, &store)
            .handle(failure_at((10, 0, 0)))
            .await
            .unwrap();

        assert_eq!(transport.calls(), 1);
        match store.current().unwrap() {
            ApiAuth::Token {
                access_token,
                refresh_token,
                refresh_time,
                ..
            } => {
                assert_eq!(access_token.as_str(), "access-1");
                assert_eq!(refresh_token.as_str(), "refresh-1");
                assert_eq!(
                    refresh_time,
                    Some(Utc.with_ymd_and_hms(2025, 8, 4, 10, 0, 0).unwrap())
                );
            }
            other => panic!("expected token auth, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_calls_refresh_once() {
        let transport = ScriptedTransport::new(vec![Step::Succeed(token_outcome(1))]);
        let store = Arc::new(MemoryAuthStore::new(token_auth(None)));
        let coordinator = Arc::new(coordinator(&transport, &store));

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let coordinator = coordinator.clone();
            tasks.push(tokio::spawn(async move {
                coordinator.handle(failure_at((10, 0, 0))).await
            }));
        }

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_failure_short_circuits() {
        let last = Utc.with_ymd_and_hms(2025, 8, 4, 10, 0, 0).unwrap();
        let transport = ScriptedTransport::new(vec![Step::Succeed(token_outcome(1))]);
        let store = Arc::new(MemoryAuthStore::new(token_auth(Some(last))));
        let coordinator = coordinator(&transport, &store);

        // Older than the last refresh.
        coordinator.handle(failure_at((9, 59, 0))).await.unwrap();
        // Exactly the last refresh.
        coordinator.handle(failure_at((10, 0, 0))).await.unwrap();

        assert_eq!(transport.calls(), 0);

        // Strictly newer failures do refresh.
        coordinator.handle(failure_at((10, 0, 1))).await.unwrap();
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_failures_hit_dedicated_ceiling() {
        let transport = ScriptedTransport::new(vec![Step::Offline]);
        let store = Arc::new(MemoryAuthStore::new(token_auth(None)));
        let coordinator = coordinator(&transport, &store);

        let start = Instant::now();
        let err = coordinator.handle(failure_at((10, 0, 0))).await.unwrap_err();

        assert!(matches!(
            err,
            Error::Transport(TransportError::Offline { .. })
        ));
        // offline_retry_attempts_max retries beyond the initial attempt.
        assert_eq!(transport.calls(), 4);
        // One offline delay before each retry.
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_retry_without_delay() {
        let transport = ScriptedTransport::new(vec![Step::Timeout]);
        let store = Arc::new(MemoryAuthStore::new(token_auth(None)));
        let coordinator = coordinator(&transport, &store);

        let start = Instant::now();
        let err = coordinator.handle(failure_at((10, 0, 0))).await.unwrap_err();

        assert!(matches!(err, Error::Transport(TransportError::Timeout)));
        assert_eq!(transport.calls(), 4);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_backoff_is_honored() {
        let transport = ScriptedTransport::new(vec![
            Step::RateLimited(Some(Duration::from_secs(2))),
            Step::Succeed(token_outcome(1)),
        ]);
        let store = Arc::new(MemoryAuthStore::new(token_auth(None)));
        let coordinator = coordinator(&transport, &store);

        let start = Instant::now();
        coordinator.handle(failure_at((10, 0, 0))).await.unwrap();

        assert_eq!(transport.calls(), 2);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_beyond_cap_is_fatal() {
        let transport =
            ScriptedTransport::new(vec![Step::RateLimited(Some(Duration::from_secs(11)))]);
        let store = Arc::new(MemoryAuthStore::new(token_auth(None)));

        let err = coordinator(&transport, &store)
            .handle(failure_at((10, 0, 0)))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RateLimited { .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_rate_limiting_exhausts_generic_budget() {
        let transport = ScriptedTransport::new(vec![Step::RateLimited(Some(Duration::ZERO))]);
        let store = Arc::new(MemoryAuthStore::new(token_auth(None)));

        let err = coordinator(&transport, &store)
            .handle(failure_at((10, 0, 0)))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RateLimited { .. }));
        // retry_attempts_max retries beyond the initial attempt.
        assert_eq!(transport.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_fails_fast() {
        let transport = ScriptedTransport::new(vec![Step::Forbidden]);
        let store = Arc::new(MemoryAuthStore::new(token_auth(None)));

        let err = coordinator(&transport, &store)
            .handle(failure_at((10, 0, 0)))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Http(ref http) if http.status == 403));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cookie_refresh_publishes_cookie_credentials() {
        let transport = ScriptedTransport::new(vec![Step::Succeed(RefreshOutcome::Cookie(
            CookieRefresh {
                uid: uid("uid-2"),
                refresh_counter: Some(4),
            },
        ))]);
        let store = Arc::new(RecordingStore::new(ApiAuth::Cookie {
            uid: uid("uid-1"),
            refresh_time: None,
        }));
        let coordinator = RefreshCoordinator::new(transport.clone(), store.clone());

        coordinator.handle(failure_at((10, 0, 0))).await.unwrap();

        let published = store.published.lock().unwrap();
        assert_eq!(published.len(), 1);

        let refreshed = &published[0];
        assert_eq!(refreshed.uid.as_str(), "uid-2");
        assert!(refreshed.access_token.is_none());
        assert!(refreshed.refresh_token.is_none());
        assert!(refreshed.cookies);
        assert_eq!(
            refreshed.refresh_time,
            Utc.with_ymd_and_hms(2025, 8, 4, 10, 0, 0).unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn jitter_bounds_successful_refresh() {
        let transport = ScriptedTransport::new(vec![Step::Succeed(token_outcome(1))]);
        let store = Arc::new(MemoryAuthStore::new(token_auth(None)));

        let start = Instant::now();
        coordinator(&transport, &store)
            .handle(failure_at((10, 0, 0)))
            .await
            .unwrap();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(2000), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn inactive_session_fails_immediately() {
        let transport = ScriptedTransport::new(vec![Step::Succeed(token_outcome(1))]);
        let store = Arc::new(MemoryAuthStore::empty());

        let err = coordinator(&transport, &store)
            .handle(failure_at((10, 0, 0)))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InactiveSession));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn credential_swap_mid_retry_is_honored() {
        let transport = ScriptedTransport::new(vec![
            Step::RateLimited(Some(Duration::ZERO)),
            Step::Succeed(token_outcome(2)),
        ]);
        let store = Arc::new(MemoryAuthStore::new(token_auth(None)));

        // Another writer replaces the refresh token while the first
        // attempt is being rate limited.
        let swapped = ApiAuth::Token {
            uid: uid("uid-1"),
            access_token: AccessToken::new("access-0"),
            refresh_token: RefreshToken::new("refresh-1"),
            refresh_time: None,
        };
        transport.swap_after(0, store.clone(), swapped);

        coordinator(&transport, &store)
            .handle(failure_at((10, 0, 0)))
            .await
            .unwrap();

        let seen = transport.seen_refresh_tokens.lock().unwrap();
        assert_eq!(seen.as_slice(), ["refresh-0", "refresh-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn lock_map_is_evicted_after_completion() {
        let transport = ScriptedTransport::new(vec![Step::Succeed(token_outcome(1))]);
        let store = Arc::new(MemoryAuthStore::new(token_auth(None)));
        let coordinator = coordinator(&transport, &store);

        coordinator.handle(failure_at((10, 0, 0))).await.unwrap();
        assert_eq!(coordinator.lock_count(), 0);

        // Failures release the lock too.
        store.replace(token_auth(None));
        let transport_err = ScriptedTransport::new(vec![Step::Forbidden]);
        let failing = RefreshCoordinator::new(transport_err, store.clone());
        failing.handle(failure_at((10, 0, 1))).await.unwrap_err();
        assert_eq!(failing.lock_count(), 0);
    }

    /// Store that records every published payload.
    struct RecordingStore {
        inner: MemoryAuthStore,
        published: StdMutex<Vec<RefreshedSession>>,
    }

    impl RecordingStore {
        fn new(auth: ApiAuth) -> Self {
            Self {
                inner: MemoryAuthStore::new(auth),
                published: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AuthStore for RecordingStore {
        fn current(&self) -> Option<ApiAuth> {
            self.inner.current()
        }

        async fn on_refresh(&self, refreshed: RefreshedSession) -> Result<()> {
            self.published.lock().unwrap().push(refreshed.clone());
            self.inner.on_refresh(refreshed).await
        }
    }
}
