//! Transaction model.
//!
//! Transactions are kept as their JSON field map: the field catalogue and
//! binary layout belong to the codec, not to this crate.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha512};

/// Prefix of the signed-transaction hash preimage ("TXN\0").
const TRANSACTION_ID_PREFIX: [u8; 4] = [0x54, 0x58, 0x4E, 0x00];

/// A transaction in JSON form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transaction(Map<String, Value>);

impl Transaction {
    pub fn new(transaction_type: impl Into<String>, account: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(
            "TransactionType".to_string(),
            Value::String(transaction_type.into()),
        );
        fields.insert("Account".to_string(), Value::String(account.into()));
        Self(fields)
    }

    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Returns `None` if the value is not a JSON object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn transaction_type(&self) -> Option<&str> {
        self.get("TransactionType").and_then(Value::as_str)
    }

    pub fn account(&self) -> Option<&str> {
        self.get("Account").and_then(Value::as_str)
    }

    pub fn last_ledger_sequence(&self) -> Option<u32> {
        self.get("LastLedgerSequence")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }

    /// Signer entries of a multisigned transaction.
    pub fn signers(&self) -> Option<&Vec<Value>> {
        self.get("Signers").and_then(Value::as_array)
    }

    /// Whether the transaction carries a single signature or signer entries.
    pub fn is_signed(&self) -> bool {
        let single = self.contains("SigningPubKey") && self.contains("TxnSignature");
        single || self.signers().is_some_and(|s| !s.is_empty())
    }

    /// Transaction types whose effects cannot be retried once applied, and
    /// which are therefore always submitted with `fail_hard`.
    pub fn is_irrevocable(&self) -> bool {
        self.transaction_type() == Some("AccountDelete")
    }
}

/// What a caller hands to submission: JSON or an encoded blob.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionInput {
    Json(Transaction),
    Blob(String),
}

impl From<Transaction> for TransactionInput {
    fn from(tx: Transaction) -> Self {
        TransactionInput::Json(tx)
    }
}

impl From<String> for TransactionInput {
    fn from(blob: String) -> Self {
        TransactionInput::Blob(blob)
    }
}

impl From<&str> for TransactionInput {
    fn from(blob: &str) -> Self {
        TransactionInput::Blob(blob.to_string())
    }
}

/// Output of signing: the encoded signed transaction and its hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx_blob: String,
    pub hash: String,
}

/// Hash of a signed transaction blob (hex in, uppercase hex out).
pub fn hash_signed_blob(tx_blob: &str) -> Result<String, HashError> {
    let bytes = hex::decode(tx_blob).map_err(|e| HashError(e.to_string()))?;
    let mut hasher = Sha512::new();
    hasher.update(TRANSACTION_ID_PREFIX);
    hasher.update(&bytes);
    let digest = hasher.finalize();
    Ok(hex::encode_upper(&digest[..32]))
}

/// A blob that is not valid hex.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transaction blob is not valid hex: {0}")]
pub struct HashError(pub String);
