//! Wire protocol of the Kava socket.
//!
//! # Submodules
//!
//! * [`frame`] - request and response frames and their status envelopes
//! * [`id`] - correlation ids linking a request to its response
//!
//! Frames are JSON objects, one per websocket text message. Decoding goes
//! through [`json`], which logs what was received so that protocol issues
//! can be diagnosed from trace output alone.

pub mod frame;
pub mod id;

pub use frame::Frame;
pub use id::RequestId;

use crate::error::Result;
use serde::Deserialize;
use std::fmt::Debug;

/// Parses and logs JSON received from the remote end.
///
/// # Logging
///
/// * Success: logs the parsed structure at TRACE level
/// * Structure mismatch: logs the raw JSON value at TRACE level
/// * Invalid JSON: logs the error at DEBUG level and the raw text at TRACE
///   level
///
/// # Errors
///
/// Returns `InvalidArgument` if `body` is not valid JSON or does not match
/// `T`.
pub fn json<T>(body: &str, origin: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    match serde_json::from_str(body) {
        Ok(result) => {
            trace!("{origin}: {result:?}");
            Ok(result)
        }
        Err(e) => {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
                trace!("{origin}: {json}");
            } else {
                debug!("{origin}: failed parsing ({e})");
                trace!("{body}");
            }

            Err(crate::error::Error::invalid_argument(e))
        }
    }
}
