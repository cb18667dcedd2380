//! Stream protocol message types
//!
//! Messages pushed by the server over the WebSocket, JSON-encoded:
//!
//! ```text
//! {"JsonPatch": [{"op": "replace", "path": "/a", "value": 1}, ...]}
//! {"finished": true}
//! ```

use json_patch::PatchOperation;
use serde::{Deserialize, Serialize};

use crate::error::StreamResult;

/// Messages received from the stream server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamMessage {
    /// Ordered patch operations against the current snapshot
    JsonPatch(Vec<PatchOperation>),

    /// Server has no more patches for this stream
    #[serde(rename = "finished")]
    Finished(bool),
}

impl StreamMessage {
    /// Decode a message from a text frame
    pub fn decode(text: &str) -> StreamResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decode a message from a binary frame holding UTF-8 JSON
    pub fn decode_bytes(bytes: &[u8]) -> StreamResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encode message to JSON text
    pub fn encode(&self) -> StreamResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Whether this message ends the stream
    pub fn is_finished(&self) -> bool {
        matches!(self, StreamMessage::Finished(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;

    #[test]
    fn test_decode_patch_message() {
        let text = r#"{"JsonPatch":[
            {"op":"add","path":"/execution_processes/p1","value":{"id":"p1"}},
            {"op":"remove","path":"/execution_processes/p0"}
        ]}"#;

        match StreamMessage::decode(text).unwrap() {
            StreamMessage::JsonPatch(ops) => assert_eq!(ops.len(), 2),
            other => panic!("Expected JsonPatch, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_finished_message() {
        let msg = StreamMessage::decode(r#"{"finished":true}"#).unwrap();
        assert_eq!(msg, StreamMessage::Finished(true));
        assert!(msg.is_finished());

        let not_yet = StreamMessage::decode(r#"{"finished":false}"#).unwrap();
        assert!(!not_yet.is_finished());
    }

    #[test]
    fn test_decode_binary_frame() {
        let msg = StreamMessage::decode_bytes(br#"{"finished":true}"#).unwrap();
        assert!(msg.is_finished());
    }

    #[test]
    fn test_unrecognized_payload_is_parse_error() {
        for text in [r#"{"Stdout":"hello"}"#, "not json", r#"{"JsonPatch":{}}"#] {
            let err = StreamMessage::decode(text).unwrap_err();
            assert!(matches!(err, StreamError::Parse(_)), "{}", text);
        }
    }

    #[test]
    fn test_encode_matches_wire_shape() {
        let text = StreamMessage::Finished(true).encode().unwrap();
        assert_eq!(text, r#"{"finished":true}"#);
    }
}
