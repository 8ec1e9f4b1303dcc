//! Correlation ids for request and response frames.
//!
//! A [`RequestId`] is a random 128-bit token rendered as a hyphenated UUID.
//! The originator of a request generates it, the responder echoes it back
//! verbatim. Ids are compared as strings on the wire, so ids generated by the
//! remote end need not be UUIDs at all: anything that deserializes as a
//! string is accepted.

use std::{fmt, str::FromStr};

use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::error::Error;

/// Correlation key shared by a request frame and its response frame.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct RequestId(String);

impl RequestId {
    /// Generates a new random id.
    ///
    /// Uses `fastrand` rather than the operating system's random source:
    /// the ids only need to be unique among the requests in flight, not
    /// unpredictable.
    #[must_use]
    pub fn fast_v4() -> Self {
        let random_bytes = fastrand::u128(..).to_ne_bytes();
        let uuid = uuid::Builder::from_random_bytes(random_bytes).into_uuid();
        Self(uuid.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parses an id from the wire.
///
/// # Errors
///
/// Returns `InvalidArgument` for an empty string: an empty id cannot be
/// correlated.
impl FromStr for RequestId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(Error::invalid_argument("request id is empty"));
        }

        Ok(Self(s.to_owned()))
    }
}
