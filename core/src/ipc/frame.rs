//! Wire frame shapes for the IPC surface (spec §4.5 "Frame kinds").
//!
//! Grounded on the teacher's `server/mod.rs` `MessageEnvelope<T>` +
//! tagged client/server enums, adapted from a WebSocket text-frame
//! transport to length-prefixed JSON over a raw stream (this workspace
//! has no WebSocket dependency): `server::serve` wraps each connection in
//! a `tokio_util::codec::LengthDelimitedCodec` and these types are what
//! gets serialized into/out of each length-prefixed chunk.

use crate::error::CcccError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Request {
        id: String,
        op: String,
        #[serde(default)]
        args: serde_json::Value,
        /// Acting identity for permission resolution. `None` is the
        /// `user` principal; `Some(actor_id)` is a peer (or the
        /// foreman) acting as itself.
        #[serde(default)]
        as_actor: Option<String>,
    },
    Subscribe {
        id: String,
        topic: String,
        #[serde(default)]
        filter: serde_json::Value,
    },
    Cancel {
        id: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&CcccError> for ErrorBody {
    fn from(err: &CcccError) -> Self {
        Self { code: err.code().to_string(), message: err.to_string(), details: err.details() }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Response {
        id: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },
    Event {
        id: String,
        data: serde_json::Value,
    },
    Complete {
        id: String,
    },
    Error {
        id: String,
        error: ErrorBody,
    },
}

impl ServerFrame {
    pub fn ok(id: impl Into<String>, result: serde_json::Value) -> Self {
        Self::Response { id: id.into(), ok: true, result: Some(result), error: None }
    }

    pub fn err(id: impl Into<String>, err: &CcccError) -> Self {
        Self::Response { id: id.into(), ok: false, result: None, error: Some(err.into()) }
    }

    pub fn subscribe_err(id: impl Into<String>, err: &CcccError) -> Self {
        Self::Error { id: id.into(), error: err.into() }
    }

    /// Encodes one frame as a JSON payload. Every frame written over a
    /// connection is length-prefixed by `tokio_util::codec::LengthDelimitedCodec`
    /// at the `server::handle_connection` level; this is just the body.
    pub fn to_bytes(&self) -> crate::error::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl ClientFrame {
    pub fn from_bytes(bytes: &[u8]) -> crate::error::Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| CcccError::invalid_payload(format!("malformed client frame: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frame_round_trips_with_default_args() {
        let raw = serde_json::json!({ "type": "request", "id": "1", "op": "group.create" });
        let frame: ClientFrame = serde_json::from_value(raw).unwrap();
        match frame {
            ClientFrame::Request { id, op, args, as_actor } => {
                assert_eq!(id, "1");
                assert_eq!(op, "group.create");
                assert_eq!(args, serde_json::Value::Null);
                assert!(as_actor.is_none());
            }
            _ => panic!("expected Request"),
        }
    }

    #[test]
    fn response_frame_omits_absent_result_and_error() {
        let frame = ServerFrame::ok("1", serde_json::json!({ "a": 1 }));
        let value = serde_json::to_value(&frame).unwrap();
        assert!(value.get("error").is_none());
        assert_eq!(value["result"]["a"], 1);
    }

    #[test]
    fn error_body_carries_stable_code() {
        let err = CcccError::no_such_group("g1");
        let body = ErrorBody::from(&err);
        assert_eq!(body.code, "no_such_group");
    }
}
