//! reauth-http - HTTP transport and single-flight refresh coordination.
//!
//! The [`RefreshCoordinator`] serializes concurrent session refreshes per
//! identity and retries transient failures; [`RestTransport`] performs the
//! refresh exchanges over reqwest; [`ApiClient`] ties both together as an
//! authenticated JSON client that transparently recovers from expired
//! access credentials.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use reauth_core::{AccessToken, ApiAuth, RefreshToken, SessionUid};
//! use reauth_http::{ApiClient, MemoryAuthStore};
//! use url::Url;
//!
//! # async fn example() -> Result<(), reauth_core::Error> {
//! let store = Arc::new(MemoryAuthStore::new(ApiAuth::Token {
//!     uid: SessionUid::new("uid-1")?,
//!     access_token: AccessToken::new("access"),
//!     refresh_token: RefreshToken::new("refresh"),
//!     refresh_time: None,
//! }));
//!
//! let base = Url::parse("https://api.example.com").unwrap();
//! let client = ApiClient::new(base, store);
//! let me: serde_json::Value = client.get_json("core/v1/me").await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod coordinator;
pub mod headers;
mod store;
mod transport;

pub use client::ApiClient;
pub use coordinator::RefreshCoordinator;
pub use store::MemoryAuthStore;
pub use transport::RestTransport;
