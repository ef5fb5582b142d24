//! Codec trait and implementations for serializing/deserializing messages.
//!
//! The session layer only needs *something* that implements [`Codec`];
//! [`JsonCodec`] is the one shipped by default since its output is easy to
//! read in logs and packet captures.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Encodes values to bytes and decodes them back.
///
/// `Send + Sync + 'static` because the codec lives inside the session
/// manager, which is moved into the processing task.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value can't be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// truncated, or describe a different type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] backed by `serde_json`.
///
/// ```rust
/// use cubeclash_protocol::{Codec, JsonCodec, WireMessage};
///
/// let codec = JsonCodec;
/// let msg = WireMessage::ConnectRequest { version: 1 };
///
/// let bytes = codec.encode(&msg).unwrap();
/// let decoded: WireMessage = codec.decode(&bytes).unwrap();
/// assert_eq!(msg, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{ConnectionId, WireMessage};

    #[test]
    fn test_json_codec_decode_garbage_fails() {
        let result: Result<WireMessage, _> = JsonCodec.decode(b"not json at all");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_json_codec_decode_unknown_type_fails() {
        let result: Result<WireMessage, _> = JsonCodec.decode(br#"{"type":"Teleport"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_json_codec_encodes_readable_json() {
        let msg = WireMessage::ConnectAck {
            connection_id: ConnectionId(1),
        };
        let bytes = JsonCodec.encode(&msg).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, r#"{"type":"ConnectAck","connection_id":1}"#);
    }
}
