//! Plain UTF-8 text serializer.
//!
//! For services that exchange nothing but strings. Each body is written as
//! newline-separated fields; the free-form text value (request params or
//! response data) comes last and may itself contain newlines.
//!
//! ```text
//! REQUEST   request_id \n service_name \n method_name [\n params]
//! RESPONSE  request_id \n code \n response_message [\n data]
//! REGISTER  request_id \n action \n service_name \n address
//! DISCOVER  request_id \n service_name
//! ```
//!
//! A missing trailing field means null params or absent data. Values other
//! than strings cannot be carried and fail to encode.

use serde_json::Value;

use super::{tags, Serializer};
use crate::error::{Result, RpcError};
use crate::protocol::{
    Body, DiscoveryQuery, MessageType, RegistryAction, RegistryCommand, ResponseCode, RpcRequest,
    RpcResponse,
};

/// Serializer bound to tag [`tags::STRING`].
#[derive(Debug, Default)]
pub struct StringSerializer;

fn field<'a>(name: &str, value: &'a str) -> Result<&'a str> {
    if value.contains('\n') {
        return Err(RpcError::Serialization(format!(
            "string serializer: {name} must not contain a newline"
        )));
    }
    Ok(value)
}

fn text_of<'a>(name: &str, value: Option<&'a Value>) -> Result<Option<&'a str>> {
    match value {
        None => Ok(None),
        Some(Value::String(text)) => Ok(Some(text)),
        Some(other) => Err(RpcError::Serialization(format!(
            "string serializer: {name} must be a string, got {other}"
        ))),
    }
}

fn join(fields: &[&str], text: Option<&str>) -> Vec<u8> {
    let mut out = fields.join("\n");
    if let Some(text) = text {
        out.push('\n');
        out.push_str(text);
    }
    out.into_bytes()
}

struct Fields<'a> {
    kind: &'static str,
    parts: std::str::SplitN<'a, char>,
}

impl<'a> Fields<'a> {
    fn new(kind: &'static str, text: &'a str, count: usize) -> Self {
        Self {
            kind,
            parts: text.splitn(count, '\n'),
        }
    }

    fn next(&mut self, name: &str) -> Result<&'a str> {
        self.parts.next().ok_or_else(|| {
            RpcError::Serialization(format!("string serializer: {} is missing {name}", self.kind))
        })
    }

    fn rest(&mut self) -> Option<&'a str> {
        self.parts.next()
    }
}

impl Serializer for StringSerializer {
    fn tag(&self) -> u8 {
        tags::STRING
    }

    fn name(&self) -> &'static str {
        "string"
    }

    fn encode(&self, body: &Body) -> Result<Vec<u8>> {
        Ok(match body {
            Body::Request(r) => join(
                &[
                    field("request_id", &r.request_id)?,
                    field("service_name", &r.service_name)?,
                    field("method_name", &r.method_name)?,
                ],
                text_of("params", Some(&r.params).filter(|p| !p.is_null()))?,
            ),
            Body::Response(r) => join(
                &[
                    field("request_id", &r.request_id)?,
                    r.response_code.code().to_string().as_str(),
                    field("response_message", &r.response_message)?,
                ],
                text_of("data", r.data.as_ref())?,
            ),
            Body::Register(c) => {
                let action = match c.action {
                    RegistryAction::Register => "register",
                    RegistryAction::Unregister => "unregister",
                };
                join(
                    &[
                        field("request_id", &c.request_id)?,
                        action,
                        field("service_name", &c.service_name)?,
                        c.address.to_string().as_str(),
                    ],
                    None,
                )
            }
            Body::Discover(q) => join(
                &[
                    field("request_id", &q.request_id)?,
                    field("service_name", &q.service_name)?,
                ],
                None,
            ),
            Body::Heartbeat => Vec::new(),
        })
    }

    fn decode(&self, message_type: MessageType, bytes: &[u8]) -> Result<Body> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| RpcError::Serialization(format!("string serializer: {e}")))?;

        Ok(match message_type {
            MessageType::Request => {
                let mut f = Fields::new("request", text, 4);
                Body::Request(RpcRequest {
                    request_id: f.next("request_id")?.to_string(),
                    service_name: f.next("service_name")?.to_string(),
                    method_name: f.next("method_name")?.to_string(),
                    params: f.rest().map_or(Value::Null, |p| Value::String(p.to_string())),
                })
            }
            MessageType::Response => {
                let mut f = Fields::new("response", text, 4);
                let request_id = f.next("request_id")?.to_string();
                let code = f.next("code")?;
                let response_code = code
                    .parse::<u16>()
                    .ok()
                    .and_then(|c| ResponseCode::try_from(c).ok())
                    .ok_or_else(|| {
                        RpcError::Serialization(format!(
                            "string serializer: bad response code {code:?}"
                        ))
                    })?;
                Body::Response(RpcResponse {
                    request_id,
                    response_code,
                    response_message: f.next("response_message")?.to_string(),
                    data: f.rest().map(|d| Value::String(d.to_string())),
                })
            }
            MessageType::Register => {
                let mut f = Fields::new("register", text, 4);
                let request_id = f.next("request_id")?.to_string();
                let action = match f.next("action")? {
                    "register" => RegistryAction::Register,
                    "unregister" => RegistryAction::Unregister,
                    other => {
                        return Err(RpcError::Serialization(format!(
                            "string serializer: unknown action {other:?}"
                        )))
                    }
                };
                let service_name = f.next("service_name")?.to_string();
                let address = f.next("address")?;
                Body::Register(RegistryCommand {
                    request_id,
                    action,
                    service_name,
                    address: address.parse().map_err(|_| {
                        RpcError::Serialization(format!(
                            "string serializer: bad address {address:?}"
                        ))
                    })?,
                })
            }
            MessageType::Discover => {
                let mut f = Fields::new("discover", text, 2);
                Body::Discover(DiscoveryQuery {
                    request_id: f.next("request_id")?.to_string(),
                    service_name: f.next("service_name")?.to_string(),
                })
            }
            MessageType::HeartbeatPing | MessageType::HeartbeatPong => Body::Heartbeat,
        })
    }

    fn request_id(&self, bytes: &[u8]) -> Option<String> {
        let text = std::str::from_utf8(bytes).ok()?;
        text.split('\n')
            .next()
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }
}
