//! Multisignature aggregation.
//!
//! Each signer signs the same unsigned transaction in multisign mode, which
//! yields a blob carrying a one-entry `Signers` array. Aggregation merges the
//! entries into one transaction. The ledger requires signer entries sorted by
//! numeric account id, which also makes the result independent of the order
//! the blobs are supplied in.

use crate::{AccountId, BinaryCodec, CodecError, Transaction};
use serde_json::Value;
use std::collections::BTreeMap;

/// Merge independently multisigned blobs of one transaction into a single blob.
pub fn multisign<C, S>(codec: &C, blobs: &[S]) -> Result<String, MultisignError>
where
    C: BinaryCodec + ?Sized,
    S: AsRef<str>,
{
    if blobs.is_empty() {
        return Err(MultisignError::Empty);
    }

    let decoded = blobs
        .iter()
        .map(|blob| codec.decode(blob.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    let mut base: Option<Transaction> = None;
    let mut signers: BTreeMap<AccountId, Value> = BTreeMap::new();

    for tx in decoded {
        let entries = tx.signers().filter(|s| !s.is_empty()).ok_or(MultisignError::MissingSigners)?;
        for entry in entries {
            let account = signer_account(entry)?;
            signers.entry(account).or_insert_with(|| entry.clone());
        }

        let mut unsigned = tx.clone();
        unsigned.remove("Signers");
        match &base {
            Some(first) if *first != unsigned => return Err(MultisignError::Mismatch),
            Some(_) => {}
            None => base = Some(unsigned),
        }
    }

    let mut combined = base.ok_or(MultisignError::Empty)?;
    combined.set("Signers", Value::Array(signers.into_values().collect()));
    Ok(codec.encode(&combined)?)
}

fn signer_account(entry: &Value) -> Result<AccountId, MultisignError> {
    let account = entry
        .get("Signer")
        .and_then(|s| s.get("Account"))
        .and_then(Value::as_str)
        .ok_or(MultisignError::MalformedSigner)?;
    account
        .parse()
        .map_err(|e| MultisignError::SignerAccount(account.to_string(), e))
}

/// Error aggregating signatures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MultisignError {
    #[error("there were 0 transactions to multisign")]
    Empty,
    #[error("for multisigning the transaction must include a Signers field")]
    MissingSigners,
    #[error("signer entry has no Signer.Account")]
    MalformedSigner,
    #[error("invalid signer account {0}: {1}")]
    SignerAccount(String, crate::AccountIdError),
    #[error("transactions are not the same apart from their signers")]
    Mismatch,
    #[error(transparent)]
    Codec(#[from] CodecError),
}
