//! Protocol messages.
//!
//! Outgoing requests are `{command, id, ...fields}`. Incoming frames are
//! either a reply correlated by `id` (`type: "response"`), an unsolicited
//! stream message tagged by `type`, or a bare error frame.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// A command sent to the server.
///
/// The correlation id is not part of the request; it is assigned per send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl Request {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            params: Map::new(),
        }
    }

    /// Set a command field.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// The same command continuing from `marker`.
    pub fn with_marker(self, marker: Value) -> Self {
        self.with("marker", marker)
    }

    /// The continuation of this request after `previous`, if it has a marker.
    pub fn next_page(&self, previous: &Response) -> Option<Request> {
        previous
            .marker()
            .map(|marker| self.clone().with_marker(marker.clone()))
    }

    /// Serialize with the given correlation id.
    pub fn to_frame(&self, id: u64) -> Result<String, MessageError> {
        #[derive(Serialize)]
        struct Outgoing<'a> {
            id: u64,
            #[serde(flatten)]
            request: &'a Request,
        }

        serde_json::to_string(&Outgoing { id, request: self })
            .map_err(|e| MessageError::Encode(e.to_string()))
    }
}

/// A successful reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: Value,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<u32>,
}

impl Response {
    /// Build a reply around a bare result (HTTP transport has no id).
    pub fn from_result(id: Value, result: Value) -> Self {
        Self {
            id,
            status: Some("success".to_string()),
            result,
            warnings: None,
            forwarded: None,
            api_version: None,
        }
    }

    /// Pagination marker, if more pages exist.
    pub fn marker(&self) -> Option<&Value> {
        self.result.get("marker").filter(|m| !m.is_null())
    }

    pub fn has_next_page(&self) -> bool {
        self.marker().is_some()
    }

    /// Whether the result reports a validated ledger (`validated: true`).
    pub fn is_validated(&self) -> bool {
        self.result
            .get("validated")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// A well-formed error reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{error}{}", .error_message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
pub struct RippledError {
    pub error: String,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub request: Option<Value>,
}

impl RippledError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_code: None,
            error_message: None,
            request: None,
        }
    }

    /// Transaction lookups report this while a transaction is not (yet) known.
    pub fn is_not_found(&self) -> bool {
        self.error == "txnNotFound"
    }
}

/// A reply correlated to a request id.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub id: Value,
    pub outcome: Result<Response, RippledError>,
}

/// Kinds of unsolicited stream messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    LedgerClosed,
    ValidationReceived,
    Transaction,
    PeerStatusChange,
    ConsensusPhase,
    ManifestReceived,
    PathFind,
    ServerStatus,
    BookChanges,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::LedgerClosed => "ledgerClosed",
            StreamKind::ValidationReceived => "validationReceived",
            StreamKind::Transaction => "transaction",
            StreamKind::PeerStatusChange => "peerStatusChange",
            StreamKind::ConsensusPhase => "consensusPhase",
            StreamKind::ManifestReceived => "manifestReceived",
            StreamKind::PathFind => "path_find",
            StreamKind::ServerStatus => "serverStatus",
            StreamKind::BookChanges => "bookChanges",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamKind {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ledgerClosed" => StreamKind::LedgerClosed,
            "validationReceived" => StreamKind::ValidationReceived,
            "transaction" => StreamKind::Transaction,
            "peerStatusChange" => StreamKind::PeerStatusChange,
            "consensusPhase" => StreamKind::ConsensusPhase,
            "manifestReceived" => StreamKind::ManifestReceived,
            "path_find" => StreamKind::PathFind,
            "serverStatus" => StreamKind::ServerStatus,
            "bookChanges" => StreamKind::BookChanges,
            other => return Err(MessageError::UnknownType(other.to_string())),
        })
    }
}

/// An unsolicited stream message.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    pub kind: StreamKind,
    /// The full frame, `type` included.
    pub payload: Value,
}

/// A classified incoming frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Reply(Reply),
    Stream(StreamMessage),
    /// Error frame with no `type` (e.g. the server rejecting unparsable input).
    Error(RippledError),
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| MessageError::InvalidJson(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, MessageError> {
        let Value::Object(object) = value else {
            return Err(MessageError::NotAnObject);
        };

        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_owned);

        match kind.as_deref() {
            Some("response") => {
                let id = object.get("id").cloned().ok_or(MessageError::MissingId)?;
                let is_error = object.get("status").and_then(Value::as_str) == Some("error")
                    || object.contains_key("error");
                let object = Value::Object(object);
                let malformed = |e: serde_json::Error| MessageError::MalformedReply {
                    id: id.clone(),
                    reason: e.to_string(),
                };
                let outcome = if is_error {
                    Err(serde_json::from_value(object).map_err(malformed)?)
                } else {
                    Ok(serde_json::from_value(object).map_err(malformed)?)
                };
                Ok(ServerMessage::Reply(Reply { id, outcome }))
            }
            Some(kind) => {
                let kind = kind.parse()?;
                Ok(ServerMessage::Stream(StreamMessage {
                    kind,
                    payload: Value::Object(object),
                }))
            }
            None if object.contains_key("error") => serde_json::from_value(Value::Object(object))
                .map(ServerMessage::Error)
                .map_err(|e| MessageError::Malformed(e.to_string())),
            None => Err(MessageError::Malformed(
                "frame has neither type nor error".to_string(),
            )),
        }
    }
}

/// Error encoding or classifying a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("response frame has no id")]
    MissingId,
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// A reply whose id is readable but whose body is not.
    #[error("malformed reply {id}: {reason}")]
    MalformedReply { id: Value, reason: String },
    #[error("cannot encode request: {0}")]
    Encode(String),
}
