//! The RPC wire envelope (spec §6) and its newline-delimited JSON framing.
//!
//! Frames are themselves assumed stream-safe but not concurrency-safe: spec
//! §3's invariant "a connection's outgoing frames are serialized" is
//! enforced by routing every reply through one writer task (see
//! `connection.rs`), not by this module.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One inbound RPC request frame.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestFrame {
    #[serde(rename = "RequestId")]
    pub request_id: u64,
    #[serde(rename = "Type")]
    pub facade: String,
    #[serde(rename = "Version")]
    pub version: u32,
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Request")]
    pub method: String,
    #[serde(rename = "Params", default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireError {
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Code")]
    pub code: String,
}

impl From<&fleet_core::error::CoreError> for WireError {
    fn from(err: &fleet_core::error::CoreError) -> Self {
        Self {
            message: err.message().to_string(),
            code: fleet_core::error::wire_code(err.code()).to_string(),
        }
    }
}

/// One outbound RPC reply frame, tagged by the request it answers. Replies
/// may be written in any order relative to requests on the same connection
/// (spec §5: "replies are tagged by requestId and may arrive out of order").
#[derive(Debug, Clone, Serialize)]
pub struct ResponseFrame {
    #[serde(rename = "RequestId")]
    pub request_id: u64,
    #[serde(rename = "Error", skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
    #[serde(rename = "Response", skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl ResponseFrame {
    pub fn ok(request_id: u64, response: Value) -> Self {
        Self {
            request_id,
            error: None,
            response: Some(response),
        }
    }

    pub fn err(request_id: u64, error: &fleet_core::error::CoreError) -> Self {
        Self {
            request_id,
            error: Some(error.into()),
            response: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frame_parses_the_wire_field_names() {
        let raw = r#"{"RequestId":7,"Type":"Admin","Version":0,"Id":"","Request":"Login","Params":{"tag":"user-admin"}}"#;
        let frame: RequestFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(frame.request_id, 7);
        assert_eq!(frame.facade, "Admin");
        assert_eq!(frame.method, "Login");
    }

    #[test]
    fn response_frame_omits_absent_fields() {
        let frame = ResponseFrame::ok(3, Value::Bool(true));
        let encoded = serde_json::to_string(&frame).unwrap();
        assert_eq!(encoded, r#"{"RequestId":3,"Response":true}"#);
    }
}
