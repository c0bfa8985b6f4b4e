//! Collaborator seams.
//!
//! The binary codec, key handling and the per-type field rules live outside
//! this workspace. The client consumes them through these traits.

use crate::{SignedTransaction, Transaction};
use serde_json::Value;

/// Binary transaction encoding (`encode(tx) -> blob`, `decode(blob) -> tx`).
pub trait BinaryCodec: Send + Sync {
    fn encode(&self, tx: &Transaction) -> Result<String, CodecError>;
    fn decode(&self, blob: &str) -> Result<Transaction, CodecError>;
}

/// Something holding a key that can sign transactions.
pub trait Signer: Send + Sync {
    /// Sign `tx`. With `multisign` set, produce a single signer entry
    /// suitable for aggregation instead of a single-signed transaction.
    fn sign(&self, tx: &Transaction, multisign: bool) -> Result<SignedTransaction, CodecError>;
}

/// Transaction-shape validation, run before anything is sent.
pub trait TransactionValidator: Send + Sync {
    fn validate(&self, tx: &Transaction) -> Result<(), ValidationError>;
}

/// Checks the fields common to every transaction type.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicValidator;

impl TransactionValidator for BasicValidator {
    fn validate(&self, tx: &Transaction) -> Result<(), ValidationError> {
        match tx.get("TransactionType") {
            Some(Value::String(_)) => {}
            Some(_) => return Err(ValidationError::new("TransactionType must be a string")),
            None => return Err(ValidationError::new("missing field TransactionType")),
        }
        match tx.get("Account") {
            Some(Value::String(account)) if !account.is_empty() => {}
            Some(_) => return Err(ValidationError::new("Account must be a non-empty string")),
            None => return Err(ValidationError::new("missing field Account")),
        }

        if let Some(fee) = tx.get("Fee") {
            let valid = fee
                .as_str()
                .is_some_and(|f| !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()));
            if !valid {
                return Err(ValidationError::new("Fee must be a string of drops"));
            }
        }

        for field in ["Sequence", "LastLedgerSequence", "Flags"] {
            if let Some(value) = tx.get(field) {
                let in_range = value.as_u64().is_some_and(|v| u32::try_from(v).is_ok());
                if !in_range {
                    return Err(ValidationError::new(format!("{field} must be a 32-bit unsigned integer")));
                }
            }
        }

        Ok(())
    }
}

/// Codec that carries the transaction's JSON as hex.
///
/// Development servers such as the mock ledger accept this in place of the
/// binary format.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBlobCodec;

impl BinaryCodec for JsonBlobCodec {
    fn encode(&self, tx: &Transaction) -> Result<String, CodecError> {
        let json = serde_json::to_vec(tx).map_err(|e| CodecError::new(e.to_string()))?;
        Ok(hex::encode_upper(json))
    }

    fn decode(&self, blob: &str) -> Result<Transaction, CodecError> {
        let bytes = hex::decode(blob).map_err(|e| CodecError::new(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| CodecError::new(e.to_string()))
    }
}

/// A transaction that cannot be encoded, decoded or signed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("codec error: {0}")]
pub struct CodecError(pub String);

impl CodecError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Input rejected before anything was sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
