//! Session-credential store trait.

use async_trait::async_trait;

use crate::Result;
use crate::auth::{ApiAuth, RefreshedSession};

/// The session-credential store the coordinator reads from and publishes
/// to.
///
/// The coordinator never mutates credentials itself: `current` is re-read
/// at every decision point so the latest descriptor always wins, and
/// `on_refresh` is the sole channel by which new credentials reach
/// storage. Whoever owns the store is the single writer.
#[async_trait]
pub trait AuthStore: Send + Sync {
    /// The latest auth descriptor, or `None` when no session is active.
    ///
    /// Must never return a cached snapshot; callers rely on observing
    /// credential swaps made by other writers between calls.
    fn current(&self) -> Option<ApiAuth>;

    /// Persist refreshed credentials, replacing the previous descriptor
    /// wholesale.
    async fn on_refresh(&self, refreshed: RefreshedSession) -> Result<()>;
}
