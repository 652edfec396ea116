//! Wire frames exchanged between contexts.
//!
//! Three frame kinds travel over the ambient message channel, tagged by a
//! `type` field:
//! - `{"type":"request","requestId":..,"payload":..}`
//! - `{"type":"response","requestId":..,"result"?:..,"error"?:..}`
//! - `{"type":"push","payload":..}`

use crate::transport::error::{TransportError, TransportResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Request {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(default)]
        payload: Value,
    },
    Response {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
    },
    Push {
        #[serde(default)]
        payload: Value,
    },
}

impl Frame {
    pub fn request(request_id: impl Into<String>, payload: Value) -> Self {
        Self::Request {
            request_id: request_id.into(),
            payload,
        }
    }

    /// Successful response carrying `result`.
    pub fn success(request_id: impl Into<String>, result: Value) -> Self {
        Self::Response {
            request_id: request_id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Failed response carrying the remote `error` payload.
    pub fn failure(request_id: impl Into<String>, error: Value) -> Self {
        Self::Response {
            request_id: request_id.into(),
            result: None,
            error: Some(error),
        }
    }

    pub fn push(payload: Value) -> Self {
        Self::Push { payload }
    }

    /// Correlation id for request and response frames.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Request { request_id, .. } | Self::Response { request_id, .. } => {
                Some(request_id)
            }
            Self::Push { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Response { .. } => "response",
            Self::Push { .. } => "push",
        }
    }
}

/// Serializes a frame for string-based channels.
pub fn encode_frame(frame: &Frame) -> TransportResult<String> {
    serde_json::to_string(frame).map_err(|err| TransportError::Codec(err.to_string()))
}

/// Parses a frame received from a string-based channel.
pub fn decode_frame(raw: &str) -> TransportResult<Frame> {
    serde_json::from_str(raw).map_err(|err| TransportError::Codec(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{decode_frame, encode_frame, Frame};
    use serde_json::{json, Value};

    #[test]
    fn encodes_request_with_camel_case_id() {
        let raw = encode_frame(&Frame::request("ctx:1", json!({"op": "dial"}))).expect("encode");
        let value: Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(
            value,
            json!({"type": "request", "requestId": "ctx:1", "payload": {"op": "dial"}})
        );
    }

    #[test]
    fn omits_absent_response_fields() {
        let raw = encode_frame(&Frame::failure("ctx:2", json!("busy"))).expect("encode");
        let value: Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(
            value,
            json!({"type": "response", "requestId": "ctx:2", "error": "busy"})
        );
    }

    #[test]
    fn decodes_push_without_payload_as_null() {
        let frame = decode_frame(r#"{"type":"push"}"#).expect("decode");
        assert_eq!(frame, Frame::push(Value::Null));
        assert_eq!(frame.request_id(), None);
    }

    #[test]
    fn rejects_unknown_frame_type() {
        let err = decode_frame(r#"{"type":"ping"}"#).expect_err("unknown type");
        assert!(err.to_string().contains("frame codec"));
    }
}
