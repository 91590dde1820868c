//! Codec trait and the JSON implementation.
//!
//! The server never touches `serde_json` directly; it encodes and decodes
//! through a [`Codec`] so the wire format can change in one place.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Turns frames into bytes and back.
///
/// `Send + Sync + 'static` because a single codec instance is shared by
/// every connection task.
pub trait Codec: Send + Sync + 'static {
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value cannot be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or do not
    /// match `T`.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;

    /// Best-effort `seq` of a frame that failed to decode, so the error
    /// reply can still be matched to its request. Zero when unknown.
    fn seq_hint(&self, _data: &[u8]) -> u64 {
        0
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] backed by `serde_json`. Behind the `json` feature
/// (on by default).
///
/// ```rust
/// use huddle_protocol::{ClientEnvelope, ClientMessage, Codec, JsonCodec, RoomId};
///
/// let codec = JsonCodec;
/// let frame = ClientEnvelope {
///     seq: 1,
///     payload: ClientMessage::Leave { room_id: RoomId(4) },
/// };
///
/// let bytes = codec.encode(&frame).unwrap();
/// let decoded: ClientEnvelope = codec.decode(&bytes).unwrap();
/// assert_eq!(frame, decoded);
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

    fn seq_hint(&self, data: &[u8]) -> u64 {
        #[derive(serde::Deserialize)]
        struct SeqOnly {
            seq: u64,
        }
        serde_json::from_slice::<SeqOnly>(data).map_or(0, |frame| frame.seq)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{ClientEnvelope, ClientMessage, Hand, RoomId};

    #[test]
    fn test_decode_client_frame() {
        let raw = br#"{"seq":7,"payload":{"type":"submit_choice","room_id":2,"hand":"paper"}}"#;
        let frame: ClientEnvelope = JsonCodec.decode(raw).unwrap();
        assert_eq!(frame.seq, 7);
        assert_eq!(
            frame.payload,
            ClientMessage::SubmitChoice { room_id: RoomId(2), hand: Hand::Paper }
        );
    }

    #[test]
    fn test_seq_hint_survives_unknown_payload() {
        let raw = br#"{"seq":12,"payload":{"type":"fly"}}"#;
        assert!(JsonCodec.decode::<ClientEnvelope>(raw).is_err());
        assert_eq!(JsonCodec.seq_hint(raw), 12);
        assert_eq!(JsonCodec.seq_hint(b"\x00garbage"), 0);
    }

    #[test]
    fn test_truncated_frame_is_decode_error() {
        let result: Result<ClientEnvelope, _> = JsonCodec.decode(br#"{"seq":1,"payl"#);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
