//! MsgPack serializer using `rmp-serde`.
//!
//! Structs are always written with `to_vec_named` (struct-as-map) so that
//! peers written against field names, not field order, can read them.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{decode_body, encode_body, request_id_of, tags, SerdeFormat, Serializer};
use crate::error::Result;
use crate::protocol::{Body, MessageType};

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

impl SerdeFormat for MsgPackCodec {
    fn to_vec<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Self::encode(value)
    }

    fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Self::decode(bytes)
    }
}

/// Serializer bound to tag [`tags::MSGPACK`].
#[derive(Debug, Default)]
pub struct MsgPackSerializer;

impl Serializer for MsgPackSerializer {
    fn tag(&self) -> u8 {
        tags::MSGPACK
    }

    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn encode(&self, body: &Body) -> Result<Vec<u8>> {
        encode_body::<MsgPackCodec>(body)
    }

    fn decode(&self, message_type: MessageType, bytes: &[u8]) -> Result<Body> {
        decode_body::<MsgPackCodec>(message_type, bytes)
    }

    fn request_id(&self, bytes: &[u8]) -> Option<String> {
        request_id_of::<MsgPackCodec>(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DiscoveryQuery, RpcRequest, RpcResponse};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct TestStruct {
        id: u32,
        name: String,
        active: bool,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = TestStruct {
            id: 42,
            name: "test".to_string(),
            active: true,
        };

        let encoded = MsgPackCodec::encode(&original).unwrap();
        let decoded: TestStruct = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_to_vec_named_produces_map_format() {
        let test = TestStruct {
            id: 1,
            name: "x".to_string(),
            active: false,
        };

        let encoded = MsgPackCodec::encode(&test).unwrap();

        // fixmap with 3 entries, not fixarray
        assert_eq!(encoded[0], 0x83);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<TestStruct> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(result.is_err());
    }

    #[test]
    fn test_serializer_request_roundtrip() {
        let body = Body::Request(RpcRequest {
            request_id: "r1".into(),
            service_name: "echo@1.0".into(),
            method_name: "say".into(),
            params: json!({"text": "hi", "times": 3, "tags": ["a", "b"], "ratio": 0.5}),
        });

        let bytes = MsgPackSerializer.encode(&body).unwrap();
        let decoded = MsgPackSerializer
            .decode(MessageType::Request, &bytes)
            .unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_serializer_response_with_null_data() {
        let body = Body::Response(RpcResponse::success("r2", None));
        let bytes = MsgPackSerializer.encode(&body).unwrap();
        assert_eq!(
            MsgPackSerializer
                .decode(MessageType::Response, &bytes)
                .unwrap(),
            body
        );
    }

    #[test]
    fn test_serializer_decodes_by_message_type() {
        let body = Body::Discover(DiscoveryQuery {
            request_id: "d1".into(),
            service_name: "echo@1.0".into(),
        });
        let bytes = MsgPackSerializer.encode(&body).unwrap();

        // Same bytes read as a request is a serialization failure
        assert!(MsgPackSerializer
            .decode(MessageType::Request, &bytes)
            .is_err());
    }
}
