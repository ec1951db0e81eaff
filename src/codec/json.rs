//! JSON serializer using `serde_json`.
//!
//! Slower and larger than MsgPack; useful when a human needs to read the
//! payloads off the wire.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{decode_body, encode_body, request_id_of, tags, SerdeFormat, Serializer};
use crate::error::Result;
use crate::protocol::{Body, MessageType};

/// JSON codec for structured data.
pub struct JsonCodec;

impl SerdeFormat for JsonCodec {
    fn to_vec<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Serializer bound to tag [`tags::JSON`].
#[derive(Debug, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn tag(&self) -> u8 {
        tags::JSON
    }

    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, body: &Body) -> Result<Vec<u8>> {
        encode_body::<JsonCodec>(body)
    }

    fn decode(&self, message_type: MessageType, bytes: &[u8]) -> Result<Body> {
        decode_body::<JsonCodec>(message_type, bytes)
    }

    fn request_id(&self, bytes: &[u8]) -> Option<String> {
        request_id_of::<JsonCodec>(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RegistryAction, RegistryCommand, ResponseCode, RpcResponse};

    #[test]
    fn test_register_command_is_readable_json() {
        let body = Body::Register(RegistryCommand {
            request_id: "g1".into(),
            action: RegistryAction::Register,
            service_name: "echo@1.0".into(),
            address: "10.0.0.5:9000".parse().unwrap(),
        });

        let bytes = JsonSerializer.encode(&body).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains("\"action\":\"register\""));
        assert!(text.contains("10.0.0.5:9000"));

        let decoded = JsonSerializer.decode(MessageType::Register, &bytes).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_unknown_response_code_fails() {
        let bytes = br#"{"request_id":"r","response_code":7,"response_message":"?"}"#;
        assert!(JsonSerializer.decode(MessageType::Response, bytes).is_err());
    }

    #[test]
    fn test_response_data_defaults_to_none() {
        let bytes = br#"{"request_id":"r","response_code":404,"response_message":"gone"}"#;
        let decoded = JsonSerializer.decode(MessageType::Response, bytes).unwrap();
        assert_eq!(
            decoded,
            Body::Response(RpcResponse::fail_with(
                "r",
                ResponseCode::ServiceNotFound,
                "gone"
            ))
        );
    }

    #[test]
    fn test_null_data_is_kept_apart_from_absent_data() {
        let bytes = br#"{"request_id":"r","response_code":200,"response_message":"ok","data":null}"#;
        let decoded = JsonSerializer.decode(MessageType::Response, bytes).unwrap();
        let Body::Response(response) = decoded else {
            panic!("expected a response body");
        };
        assert_eq!(response.data, Some(serde_json::Value::Null));

        let encoded = JsonSerializer
            .encode(&Body::Response(RpcResponse::success("r", None)))
            .unwrap();
        assert!(!std::str::from_utf8(&encoded).unwrap().contains("data"));
    }
}
