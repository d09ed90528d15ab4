//! reauth-core - Types and trait seams for single-flight session refresh.
//!
//! This crate defines the data model shared by every refresh-capable
//! client: validated identity and token types, the two-mode auth
//! descriptor, the error taxonomy, retry configuration, and the
//! [`AuthStore`]/[`RefreshTransport`] seams the coordinator in
//! `reauth-http` is wired against.

pub mod auth;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use auth::{ApiAuth, AuthFailure, AuthMode, RefreshedSession};
pub use config::RefreshConfig;
pub use error::{Error, HttpError, TransportError};
pub use traits::{AuthStore, CookieRefresh, RefreshOutcome, RefreshTransport, TokenRefresh};
pub use types::{AccessToken, RefreshToken, SessionUid};

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;
