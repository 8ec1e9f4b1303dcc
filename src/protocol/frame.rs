//! Frames exchanged on the Kava socket.
//!
//! Every websocket text message carries exactly one JSON object:
//!
//! ```text
//! {"type":"request",  "id":"<id>", "endpoint":"<name>", "data":{...}}
//! {"type":"response", "id":"<id>", "data":{...}}
//! ```
//!
//! Objects with any other `type` decode to [`Frame::Unknown`] and are
//! ignored by the dispatcher. Anything that is not such an object at all is
//! a protocol error.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::RequestId;
use crate::error::Result;

/// Value of the `status` field of a successful response.
pub const STATUS_SUCCESS: &str = "success";

/// Value of the `status` field of a failed response.
pub const STATUS_ERROR: &str = "error";

/// One complete protocol message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// Asks the other side to run `endpoint` with `data`.
    Request {
        id: RequestId,
        endpoint: String,
        #[serde(default)]
        data: Value,
    },

    /// Answers the request with the same `id`.
    Response {
        id: RequestId,
        #[serde(default)]
        data: Value,
    },

    /// A frame of a type this side does not know.
    #[serde(other)]
    Unknown,
}

impl Frame {
    #[must_use]
    pub fn response(id: RequestId, data: Value) -> Self {
        Self::Response { id, data }
    }

    /// Decodes one frame from websocket text.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when the text is not JSON, is not an
    /// object with a string `type`, or a known frame type lacks a required
    /// field.
    pub fn decode(text: &str) -> Result<Self> {
        super::json(text, "frame")
    }

    /// Encodes this frame as websocket text.
    ///
    /// # Errors
    ///
    /// Fails only when `data` holds something JSON cannot represent, which
    /// cannot happen for payloads built from `serde_json::Value`.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Into::into)
    }
}

/// Builds a response payload with `status` set to `"success"` and `fields`
/// merged in.
#[must_use]
pub fn success(fields: Value) -> Value {
    with_status(STATUS_SUCCESS, fields)
}

/// Builds a response payload with `status` set to `"error"` and the given
/// human readable `message`.
#[must_use]
pub fn error(message: &str) -> Value {
    let mut object = Map::new();
    object.insert("status".to_owned(), Value::from(STATUS_ERROR));
    object.insert("message".to_owned(), Value::from(message));
    Value::Object(object)
}

fn with_status(status: &str, fields: Value) -> Value {
    let mut object = match fields {
        Value::Object(object) => object,
        Value::Null => Map::new(),
        other => {
            let mut object = Map::new();
            object.insert("data".to_owned(), other);
            object
        }
    };
    object.insert("status".to_owned(), Value::from(status));
    Value::Object(object)
}

/// The `status` field of a response payload, if present and a string.
#[must_use]
pub fn status(data: &Value) -> Option<&str> {
    data.get("status").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn decodes_request() {
        let frame = Frame::decode(
            r#"{"type":"request","id":"abc","endpoint":"play","data":{"channel_id":1,"author_id":2,"query":"song"}}"#,
        )
        .unwrap();

        let Frame::Request { id, endpoint, data } = frame else {
            panic!("expected request frame");
        };
        assert_eq!(id.as_str(), "abc");
        assert_eq!(endpoint, "play");
        assert_eq!(data["query"], "song");
    }

    #[test]
    fn decodes_response_without_data() {
        let frame = Frame::decode(r#"{"type":"response","id":"abc"}"#).unwrap();
        assert_eq!(
            frame,
            Frame::Response {
                id: "abc".parse().unwrap(),
                data: Value::Null
            }
        );
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        let frame = Frame::decode(r#"{"type":"heartbeat","id":"abc"}"#).unwrap();
        assert_eq!(frame, Frame::Unknown);
    }

    #[test]
    fn malformed_frames_are_rejected() {
        for text in [
            "not json",
            "[1, 2, 3]",
            r#"{"id":"abc"}"#,
            r#"{"type":"request","id":"abc"}"#,
            r#"{"type":"response","id":""}"#,
        ] {
            let err = Frame::decode(text).unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidArgument, "{text}");
        }
    }

    #[test]
    fn encodes_wire_shape() {
        let frame = Frame::response("abc".parse().unwrap(), success(json!({"channel_id": 1})));
        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "response", "id": "abc", "data": {"status": "success", "channel_id": 1}})
        );
    }

    #[test]
    fn error_payload_has_status_and_message() {
        let data = error("No handler for endpoint");
        assert_eq!(status(&data), Some(STATUS_ERROR));
        assert_eq!(data["message"], "No handler for endpoint");
    }
}
