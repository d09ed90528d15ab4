//! Session identity type.

use std::fmt;

use crate::error::Error;

/// An opaque session identity.
///
/// The UID identifies a logged-in session independently of which device
/// or tab holds it. It travels as an HTTP header on every authenticated
/// request and keys the coordinator's in-flight lock map, so it must be
/// non-empty printable ASCII.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionUid(String);

impl SessionUid {
    /// Create a new session UID, validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is empty or contains characters that
    /// cannot travel in an HTTP header.
    pub fn new(value: impl Into<String>) -> Result<Self, Error> {
        let value = value.into();

        if value.is_empty() {
            return Err(Error::InvalidUid {
                reason: "must not be empty".to_string(),
            });
        }

        if !value.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(Error::InvalidUid {
                reason: "must be printable ASCII without whitespace".to_string(),
            });
        }

        Ok(Self(value))
    }

    /// Returns the UID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
