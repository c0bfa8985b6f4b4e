//! Core types and traits for ledgerwire.
//!
//! This crate provides the protocol primitives: request/response envelopes,
//! the transaction model, and the seams to the codec, signer and validator
//! collaborators. It does no I/O; `ledgerwire-client` drives the wire.

mod account;
mod codec;
mod message;
mod multisign;
mod transaction;

pub use account::{AccountId, AccountIdError};
pub use codec::{
    BasicValidator, BinaryCodec, CodecError, JsonBlobCodec, Signer, TransactionValidator,
    ValidationError,
};
pub use message::{
    MessageError, Reply, Request, Response, RippledError, ServerMessage, StreamKind,
    StreamMessage,
};
pub use multisign::{MultisignError, multisign};
pub use transaction::{HashError, SignedTransaction, Transaction, TransactionInput, hash_signed_blob};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket.
    Disconnected,
    /// Opening a socket on request.
    Connecting,
    /// Socket open, requests flow.
    Connected,
    /// Socket lost unexpectedly; retrying on its own.
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}
