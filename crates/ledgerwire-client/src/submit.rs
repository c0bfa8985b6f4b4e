//! Reliable transaction submission.
//!
//! `submit` returns the server's provisional engine result. `submit_and_wait`
//! then polls once per ledger close until the transaction shows up in a
//! validated ledger or its `LastLedgerSequence` has passed.

use crate::client::LedgerClient;
use crate::config::SubmissionConfig;
use crate::error::ClientError;
use ledgerwire_core::{
    BinaryCodec, Request, Response, Signer, Transaction, TransactionInput, TransactionValidator,
    hash_signed_blob,
};
use serde_json::Value;
use std::sync::Arc;

const MISSING_WALLET: &str = "Wallet must be provided when submitting an unsigned transaction";
const MISSING_LAST_LEDGER: &str =
    "Transaction must contain a LastLedgerSequence value for reliable submission.";

/// Per-call submission options.
#[derive(Clone)]
pub struct SubmitOptions {
    /// Fill in `Fee`, `Sequence` and `LastLedgerSequence` when missing.
    pub autofill: bool,
    /// Ask the server not to queue or relay on a provisional failure.
    pub fail_hard: bool,
    /// Signs unsigned input; required unless the input is already signed.
    pub wallet: Option<Arc<dyn Signer>>,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            autofill: true,
            fail_hard: false,
            wallet: None,
        }
    }
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wallet(mut self, wallet: Arc<dyn Signer>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn autofill(mut self, autofill: bool) -> Self {
        self.autofill = autofill;
        self
    }

    pub fn fail_hard(mut self, fail_hard: bool) -> Self {
        self.fail_hard = fail_hard;
        self
    }
}

impl std::fmt::Debug for SubmitOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmitOptions")
            .field("autofill", &self.autofill)
            .field("fail_hard", &self.fail_hard)
            .field("wallet", &self.wallet.is_some())
            .finish()
    }
}

/// A signed transaction ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTransaction {
    pub tx_blob: String,
    pub hash: String,
    /// Decoded form, used for `LastLedgerSequence` and type checks.
    pub transaction: Transaction,
}

pub struct SubmissionCoordinator<C> {
    client: C,
    codec: Arc<dyn BinaryCodec>,
    validator: Option<Arc<dyn TransactionValidator>>,
    config: SubmissionConfig,
}

impl<C: LedgerClient> SubmissionCoordinator<C> {
    /// Tuning starts from the client's [`submission_config`](LedgerClient::submission_config).
    pub fn new(client: C, codec: Arc<dyn BinaryCodec>) -> Self {
        let config = client.submission_config();
        Self {
            client,
            codec,
            validator: None,
            config,
        }
    }

    pub fn with_config(mut self, config: SubmissionConfig) -> Self {
        self.config = config;
        self
    }

    /// Run `validator` on every transaction before it is signed.
    pub fn with_validator(mut self, validator: Arc<dyn TransactionValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &SubmissionConfig {
        &self.config
    }

    /// Turn `input` into a signed blob and its hash.
    ///
    /// Signed input passes through untouched. Unsigned input is autofilled
    /// (if enabled), validated and signed with the options' wallet.
    pub async fn prepare(
        &self,
        input: TransactionInput,
        options: &SubmitOptions,
    ) -> Result<PreparedTransaction, ClientError> {
        let tx = match input {
            TransactionInput::Blob(tx_blob) => {
                let transaction = self.codec.decode(&tx_blob)?;
                if transaction.is_signed() {
                    let hash = hash_signed_blob(&tx_blob)?;
                    return Ok(PreparedTransaction {
                        tx_blob,
                        hash,
                        transaction,
                    });
                }
                transaction
            }
            TransactionInput::Json(transaction) => {
                if transaction.is_signed() {
                    let tx_blob = self.codec.encode(&transaction)?;
                    let hash = hash_signed_blob(&tx_blob)?;
                    return Ok(PreparedTransaction {
                        tx_blob,
                        hash,
                        transaction,
                    });
                }
                transaction
            }
        };

        let wallet = options
            .wallet
            .as_ref()
            .ok_or_else(|| ClientError::validation(MISSING_WALLET))?;

        let tx = if options.autofill {
            self.autofill(tx, 0).await?
        } else {
            tx
        };
        if let Some(validator) = &self.validator {
            validator.validate(&tx)?;
        }

        let signed = wallet.sign(&tx, false)?;
        Ok(PreparedTransaction {
            tx_blob: signed.tx_blob,
            hash: signed.hash,
            transaction: tx,
        })
    }

    /// Submit and return the provisional result.
    pub async fn submit(
        &self,
        input: impl Into<TransactionInput>,
        options: &SubmitOptions,
    ) -> Result<Response, ClientError> {
        let prepared = self.prepare(input.into(), options).await?;
        self.submit_prepared(&prepared, options).await
    }

    /// Submit, then wait until the transaction is in a validated ledger.
    ///
    /// Fails with [`ClientError::SubmissionExpired`] once the validated ledger
    /// passes the transaction's `LastLedgerSequence`.
    pub async fn submit_and_wait(
        &self,
        input: impl Into<TransactionInput>,
        options: &SubmitOptions,
    ) -> Result<Response, ClientError> {
        let prepared = self.prepare(input.into(), options).await?;
        let last_ledger_sequence = prepared
            .transaction
            .last_ledger_sequence()
            .ok_or_else(|| ClientError::validation(MISSING_LAST_LEDGER))?;

        let response = self.submit_prepared(&prepared, options).await?;
        let engine_result = response
            .result
            .get("engine_result")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        self.wait_for_final_outcome(&prepared.hash, last_ledger_sequence, &engine_result)
            .await
    }

    async fn submit_prepared(
        &self,
        prepared: &PreparedTransaction,
        options: &SubmitOptions,
    ) -> Result<Response, ClientError> {
        let fail_hard = options.fail_hard || prepared.transaction.is_irrevocable();
        tracing::info!(
            "submitting {} {} (fail_hard: {})",
            prepared.transaction.transaction_type().unwrap_or("transaction"),
            prepared.hash,
            fail_hard
        );

        let request = Request::new("submit")
            .with("tx_blob", prepared.tx_blob.clone())
            .with("fail_hard", fail_hard);
        let response = self.client.request(&request).await?;

        if let Some(result) = response.result.get("engine_result").and_then(Value::as_str) {
            tracing::debug!("{} provisional result: {}", prepared.hash, result);
        }
        Ok(response)
    }

    /// Poll until `hash` is validated or `last_ledger_sequence` has passed.
    ///
    /// `txnNotFound` and unvalidated results are retried. Any other failure
    /// is returned as [`ClientError::FinalityCheck`] carrying `engine_result`.
    pub async fn wait_for_final_outcome(
        &self,
        hash: &str,
        last_ledger_sequence: u32,
        engine_result: &str,
    ) -> Result<Response, ClientError> {
        let finality_error = |source: ClientError| ClientError::FinalityCheck {
            engine_result: engine_result.to_string(),
            source: Box::new(source),
        };

        loop {
            tokio::time::sleep(self.config.ledger_close_time()).await;

            let latest_ledger = self.client.ledger_index().await.map_err(finality_error)?;
            tracing::debug!(
                "checking {}: latest validated ledger {}, last ledger {}",
                hash,
                latest_ledger,
                last_ledger_sequence
            );
            if latest_ledger > last_ledger_sequence {
                tracing::warn!("{} expired at ledger {}", hash, latest_ledger);
                return Err(ClientError::SubmissionExpired {
                    latest_ledger,
                    last_ledger_sequence,
                    engine_result: engine_result.to_string(),
                });
            }

            let request = Request::new("tx").with("transaction", hash);
            match self.client.request(&request).await {
                Ok(response) if response.is_validated() => {
                    tracing::info!("{} validated", hash);
                    return Ok(response);
                }
                Ok(_) => tracing::debug!("{} found but not yet validated", hash),
                Err(ClientError::Rippled(err)) if err.is_not_found() => {
                    tracing::debug!("{} not found yet", hash);
                }
                Err(err) => return Err(finality_error(err)),
            }
        }
    }

    /// Fill in missing `Sequence`, `Fee` and `LastLedgerSequence`.
    ///
    /// `signers_count` is the number of signers for a multisigned
    /// transaction, 0 otherwise.
    pub async fn autofill(
        &self,
        mut tx: Transaction,
        signers_count: u32,
    ) -> Result<Transaction, ClientError> {
        let account = tx
            .account()
            .filter(|a| !a.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| ClientError::validation("transaction is missing Account"))?;

        let needs_sequence = !tx.contains("Sequence");
        let needs_fee = !tx.contains("Fee");
        let needs_last_ledger = !tx.contains("LastLedgerSequence");

        let (sequence, fee, last_ledger) = tokio::try_join!(
            async {
                if needs_sequence {
                    self.account_sequence(&account).await.map(Some)
                } else {
                    Ok(None)
                }
            },
            async {
                if needs_fee {
                    self.network_fee(&tx, signers_count).await.map(Some)
                } else {
                    Ok(None)
                }
            },
            async {
                if needs_last_ledger {
                    let offset = self.config.ledger_offset;
                    self.client
                        .ledger_index()
                        .await
                        .map(|index| Some(index.saturating_add(offset)))
                } else {
                    Ok(None)
                }
            },
        )?;

        if let Some(sequence) = sequence {
            tx.set("Sequence", sequence);
        }
        if let Some(fee) = fee {
            tx.set("Fee", fee.to_string());
        }
        if let Some(last_ledger) = last_ledger {
            tx.set("LastLedgerSequence", last_ledger);
        }
        Ok(tx)
    }

    /// Merge independently multisigned blobs of one transaction.
    pub fn multisign<S: AsRef<str>>(&self, blobs: &[S]) -> Result<String, ClientError> {
        Ok(ledgerwire_core::multisign(self.codec.as_ref(), blobs)?)
    }

    async fn account_sequence(&self, account: &str) -> Result<u32, ClientError> {
        let request = Request::new("account_info")
            .with("account", account)
            .with("ledger_index", "current");
        let response = self.client.request(&request).await?;
        response
            .result
            .pointer("/account_data/Sequence")
            .and_then(Value::as_u64)
            .and_then(|seq| u32::try_from(seq).ok())
            .ok_or_else(|| ClientError::ResponseFormat("account_info has no account_data.Sequence".to_string()))
    }

    async fn network_fee(&self, tx: &Transaction, signers_count: u32) -> Result<u64, ClientError> {
        let response = self.client.request(&Request::new("server_state")).await?;
        transaction_fee(&response.result, tx, signers_count, &self.config)
    }
}

/// Fee in drops for `tx` given a `server_state` result.
fn transaction_fee(
    server_state: &Value,
    tx: &Transaction,
    signers_count: u32,
    config: &SubmissionConfig,
) -> Result<u64, ClientError> {
    let state = &server_state["state"];
    let number = |pointer: &str| {
        state
            .pointer(pointer)
            .and_then(Value::as_f64)
            .ok_or_else(|| ClientError::ResponseFormat(format!("server_state has no {pointer}")))
    };

    let base_fee = number("/validated_ledger/base_fee")?;
    let load_factor = number("/load_factor").unwrap_or(1.0);
    let load_base = number("/load_base").ok().filter(|b| *b > 0.0).unwrap_or(load_factor);

    let scaled = (base_fee * load_factor / load_base * config.fee_cushion).ceil();
    let net_fee = if scaled.is_finite() && scaled > 0.0 {
        (scaled as u64).min(config.max_fee_drops)
    } else {
        config.max_fee_drops
    };

    let base = if tx.is_irrevocable() {
        number("/validated_ledger/reserve_inc")? as u64
    } else {
        net_fee
    };
    Ok(base.saturating_add(net_fee.saturating_mul(u64::from(signers_count))))
}
