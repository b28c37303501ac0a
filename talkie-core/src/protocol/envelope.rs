//! The message envelope and the typed bodies it carries.
//!
//! Every frame on the wire holds exactly one [`Envelope`]. Its
//! `proto_name` field names the schema of `serialized_data`; the known
//! schemas are collected in the [`Payload`] sum type so dispatch is a
//! single exhaustive `match` instead of a per-type handler table.
//!
//! Bodies are MessagePack maps (`rmp_serde::to_vec_named`) — positional
//! arrays would silently break the moment the server reorders a field.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TalkieError};

/// One decoded unit from the wire: method name, body schema tag,
/// server wall-clock, and the still-serialized typed body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub method: String,
    pub proto_name: String,
    pub server_time: i64,
    #[serde(with = "serde_bytes")]
    pub serialized_data: Vec<u8>,
}

impl Envelope {
    /// Wrap an outgoing payload. Outgoing envelopes carry no server
    /// time; the field is meaningful on the receive path only.
    pub fn wrap(payload: &Payload) -> Result<Envelope> {
        Ok(Envelope {
            method: payload.method().to_string(),
            proto_name: payload.proto_name().to_string(),
            server_time: 0,
            serialized_data: payload.encode_body()?,
        })
    }
}

/// Account flavor carried in the login body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Guest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Login {
    pub account_type: AccountType,
    pub name: String,
    /// Persisted device identifier (UUID v4).
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResult {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// JSON control/status text (see [`control`](crate::protocol::control)).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Msg {
    pub text: String,
}

/// Opaque binary payload — exactly one opus packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BytesMsg {
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// Server configuration blob, delivered as raw JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configs {
    pub json: String,
}

/// The server hello: audio parameters and session identity, as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantConfig {
    pub json: String,
}

/// Every message kind the device knows how to speak or hear.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Login(Login),
    LoginResult(LoginResult),
    Ping,
    Msg(Msg),
    BytesMsg(BytesMsg),
    Configs(Configs),
    AssistantConfig(AssistantConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PingBody {}

impl Payload {
    /// Schema tag carried in `Envelope.proto_name`.
    pub fn proto_name(&self) -> &'static str {
        match self {
            Payload::Login(_) => "Login",
            Payload::LoginResult(_) => "LoginResult",
            Payload::Ping => "Ping",
            Payload::Msg(_) => "Msg",
            Payload::BytesMsg(_) => "BytesMsg",
            Payload::Configs(_) => "Configs",
            Payload::AssistantConfig(_) => "AssistantConfig",
        }
    }

    /// Method name carried in `Envelope.method`.
    ///
    /// The first four are the device-originated methods; the rest only
    /// ever arrive from the server and echo their schema tag.
    pub fn method(&self) -> &'static str {
        match self {
            Payload::Login(_) => "login",
            Payload::Ping => "ping",
            Payload::Msg(_) => "jsonMessage",
            Payload::BytesMsg(_) => "audioMessage",
            Payload::LoginResult(_) => "loginResult",
            Payload::Configs(_) => "configs",
            Payload::AssistantConfig(_) => "assistantConfig",
        }
    }

    /// Serialize the typed body.
    pub fn encode_body(&self) -> Result<Vec<u8>> {
        let encoded = match self {
            Payload::Login(body) => rmp_serde::to_vec_named(body),
            Payload::LoginResult(body) => rmp_serde::to_vec_named(body),
            Payload::Ping => rmp_serde::to_vec_named(&PingBody {}),
            Payload::Msg(body) => rmp_serde::to_vec_named(body),
            Payload::BytesMsg(body) => rmp_serde::to_vec_named(body),
            Payload::Configs(body) => rmp_serde::to_vec_named(body),
            Payload::AssistantConfig(body) => rmp_serde::to_vec_named(body),
        };
        encoded.map_err(|e| TalkieError::Encode(e.to_string()))
    }

    /// Decode a typed body by schema tag.
    ///
    /// Returns `Ok(None)` for an unknown tag — the caller logs and
    /// moves on; an unknown message is never fatal.
    pub fn decode(proto_name: &str, body: &[u8]) -> Result<Option<Payload>> {
        fn parse<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T> {
            rmp_serde::from_slice(body).map_err(|e| TalkieError::Decode(e.to_string()))
        }

        let payload = match proto_name {
            "Login" => Payload::Login(parse(body)?),
            "LoginResult" => Payload::LoginResult(parse(body)?),
            "Ping" => Payload::Ping,
            "Msg" => Payload::Msg(parse(body)?),
            "BytesMsg" => Payload::BytesMsg(parse(body)?),
            "Configs" => Payload::Configs(parse(body)?),
            "AssistantConfig" => Payload::AssistantConfig(parse(body)?),
            _ => return Ok(None),
        };
        Ok(Some(payload))
    }
}
