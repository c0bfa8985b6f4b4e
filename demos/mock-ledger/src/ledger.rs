//! In-memory ledger state.

use ledgerwire_core::{AccountId, BinaryCodec, JsonBlobCodec, RippledError, hash_signed_blob};
use serde_json::{Value, json};
use std::collections::HashMap;

const BASE_FEE: u64 = 10;
const RESERVE_BASE: u64 = 1_000_000;
const RESERVE_INC: u64 = 200_000;
const PAGE_SIZE: usize = 16;

struct Included {
    ledger_index: u32,
    tx: Value,
    result: &'static str,
}

pub struct Ledger {
    validated: u32,
    sequences: HashMap<String, u32>,
    queue: Vec<(String, Value)>,
    transactions: HashMap<String, Included>,
    objects: Vec<Value>,
}

/// Summary of a ledger close, as sent on the `ledger` stream.
pub struct Closed {
    pub ledger_index: u32,
    pub txn_count: usize,
}

impl Ledger {
    pub fn new(start: u32, objects: usize) -> Self {
        let objects = (0..objects)
            .map(|i| json!({"index": format!("{i:064X}"), "LedgerEntryType": "DirectoryNode"}))
            .collect();
        Self {
            validated: start,
            sequences: HashMap::new(),
            queue: Vec::new(),
            transactions: HashMap::new(),
            objects,
        }
    }

    pub fn validated(&self) -> u32 {
        self.validated
    }

    /// Close the open ledger, applying every queued transaction.
    pub fn close(&mut self) -> Closed {
        self.validated += 1;
        let ledger_index = self.validated;
        let queued = std::mem::take(&mut self.queue);
        let txn_count = queued.len();

        for (hash, tx) in queued {
            let expired = tx
                .get("LastLedgerSequence")
                .and_then(Value::as_u64)
                .is_some_and(|lls| lls < u64::from(ledger_index));
            if expired {
                tracing::debug!("{} expired before ledger {}", hash, ledger_index);
                continue;
            }
            if let Some(account) = tx.get("Account").and_then(Value::as_str) {
                *self.sequences.entry(account.to_string()).or_insert(1) += 1;
            }
            self.transactions.insert(
                hash,
                Included {
                    ledger_index,
                    tx,
                    result: "tesSUCCESS",
                },
            );
        }

        Closed {
            ledger_index,
            txn_count,
        }
    }

    pub fn account_info(&self, account: &str) -> Result<Value, RippledError> {
        account.parse::<AccountId>().map_err(|e| RippledError {
            error_message: Some(e.to_string()),
            ..RippledError::new("actMalformed")
        })?;
        let sequence = self.sequences.get(account).copied().unwrap_or(1);
        Ok(json!({
            "account_data": {"Account": account, "Sequence": sequence, "Balance": "100000000000"},
            "ledger_current_index": self.validated + 1,
            "validated": false,
        }))
    }

    pub fn server_state(&self) -> Value {
        json!({"state": {
            "load_base": 256,
            "load_factor": 256,
            "server_state": "full",
            "validated_ledger": {
                "seq": self.validated,
                "base_fee": BASE_FEE,
                "reserve_base": RESERVE_BASE,
                "reserve_inc": RESERVE_INC,
            },
        }})
    }

    pub fn ledger(&self) -> Value {
        json!({
            "ledger_index": self.validated,
            "ledger_hash": format!("{:064X}", self.validated),
            "validated": true,
        })
    }

    /// Queue a signed blob for the next close and report the engine result.
    pub fn submit(&mut self, tx_blob: &str) -> Result<Value, RippledError> {
        let invalid = |e: String| RippledError {
            error_message: Some(e),
            ..RippledError::new("invalidTransaction")
        };
        let tx = JsonBlobCodec.decode(tx_blob).map_err(|e| invalid(e.to_string()))?;
        let hash = hash_signed_blob(tx_blob).map_err(|e| invalid(e.to_string()))?;
        let account = tx.account().unwrap_or_default().to_string();

        let expected = self.sequences.get(&account).copied().unwrap_or(1);
        let sequence = tx.get("Sequence").and_then(Value::as_u64).unwrap_or(0);
        let pending = self
            .queue
            .iter()
            .filter(|(_, q)| q.get("Account").and_then(Value::as_str) == Some(account.as_str()))
            .count() as u64;

        let engine_result = if !tx.is_signed() {
            "temBAD_SIGNATURE"
        } else if tx.last_ledger_sequence().is_some_and(|lls| lls <= self.validated) {
            "tefMAX_LEDGER"
        } else if sequence < u64::from(expected) {
            "tefPAST_SEQ"
        } else if sequence > u64::from(expected) + pending {
            "terPRE_SEQ"
        } else {
            "tesSUCCESS"
        };

        if engine_result == "tesSUCCESS" {
            self.queue.push((hash.clone(), tx.clone().into_value()));
        }
        tracing::info!("submit {} from {}: {}", hash, account, engine_result);

        Ok(json!({
            "engine_result": engine_result,
            "accepted": engine_result == "tesSUCCESS",
            "tx_blob": tx_blob,
            "tx_json": tx.into_value(),
        }))
    }

    pub fn tx(&self, hash: &str) -> Result<Value, RippledError> {
        let Some(included) = self.transactions.get(hash) else {
            return Err(RippledError {
                error_message: Some("Transaction not found.".to_string()),
                error_code: Some(29),
                ..RippledError::new("txnNotFound")
            });
        };
        Ok(json!({
            "hash": hash,
            "ledger_index": included.ledger_index,
            "validated": included.ledger_index <= self.validated,
            "tx_json": included.tx,
            "meta": {"TransactionResult": included.result},
        }))
    }

    /// One page of state objects. The marker is the offset of the next page.
    pub fn ledger_data(&self, marker: Option<&str>, limit: Option<usize>) -> Result<Value, RippledError> {
        let start = match marker {
            Some(m) => m.parse::<usize>().map_err(|_| RippledError::new("invalidParams"))?,
            None => 0,
        };
        let limit = limit.unwrap_or(PAGE_SIZE).clamp(1, PAGE_SIZE);
        let end = (start + limit).min(self.objects.len());
        let page = self.objects.get(start..end).unwrap_or_default();

        let mut result = json!({
            "ledger_index": self.validated,
            "state": page,
            "validated": true,
        });
        if end < self.objects.len() {
            result["marker"] = json!(end.to_string());
        }
        Ok(result)
    }
}
