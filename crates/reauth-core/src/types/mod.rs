//! Validated identity and token types.

mod tokens;
mod uid;

pub use tokens::{AccessToken, RefreshToken};
pub use uid::SessionUid;
