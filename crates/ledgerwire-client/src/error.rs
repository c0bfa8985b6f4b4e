//! Error taxonomy.
//!
//! Every public operation fails with exactly one `ClientError`. Transient
//! "not found yet" conditions inside the finality loop never reach callers.

use ledgerwire_core::{CodecError, HashError, MessageError, MultisignError, RippledError, ValidationError};
use std::time::Duration;
use thiserror::Error;

/// Close code for a caller-initiated disconnect.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code reported when the socket died without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// The connection cannot be established or used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("not connected")]
    NotConnected,
    #[error("disconnected (code {code})")]
    Disconnected { code: u16 },
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("connection timed out after {}ms", .0.as_millis())]
    ConnectTimeout(Duration),
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("request {id} timed out after {}ms", .after.as_millis())]
    Timeout { id: u64, after: Duration },

    #[error("server error: {0}")]
    Rippled(#[from] RippledError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Multisign(#[from] MultisignError),

    #[error(
        "the latest ledger sequence {latest_ledger} is greater than the transaction's \
         LastLedgerSequence ({last_ledger_sequence}); preliminary result: {engine_result}"
    )]
    SubmissionExpired {
        latest_ledger: u32,
        last_ledger_sequence: u32,
        engine_result: String,
    },

    #[error("{source}; preliminary result: {engine_result}")]
    FinalityCheck {
        engine_result: String,
        #[source]
        source: Box<ClientError>,
    },

    #[error("response does not have a next page")]
    NoNextPage,

    #[error("malformed response: {0}")]
    ResponseFormat(String),

    #[error("http transport error: {0}")]
    Http(String),
}

impl ClientError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        ClientError::Validation(ValidationError::new(message))
    }

    /// The server-reported error, if this is one.
    pub fn rippled(&self) -> Option<&RippledError> {
        match self {
            ClientError::Rippled(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MessageError> for ClientError {
    fn from(err: MessageError) -> Self {
        ClientError::ResponseFormat(err.to_string())
    }
}

impl From<HashError> for ClientError {
    fn from(err: HashError) -> Self {
        ClientError::Codec(CodecError::new(err.to_string()))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Http(err.to_string())
    }
}
