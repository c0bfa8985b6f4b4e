mod common;

use async_trait::async_trait;
use common::{MockServer, Reply, success, test_config};
use ledgerwire_client::{
    Client, ClientConfig, ClientError, EventRegistry, LedgerClient, SubmissionConfig, SubmissionCoordinator,
    SubmitOptions,
};
use ledgerwire_core::{
    BasicValidator, BinaryCodec, CodecError, JsonBlobCodec, Request, Response, RippledError,
    SignedTransaction, Signer, Transaction, hash_signed_blob,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

const ACCOUNT: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";

/// In-memory ledger answering from a script.
#[derive(Clone, Default)]
struct ScriptedLedger {
    script: Arc<Mutex<Script>>,
    events: Arc<EventRegistry>,
}

#[derive(Default)]
struct Script {
    /// Validated ledger index per `ledger` call; the last one repeats.
    ledgers: VecDeque<u32>,
    /// Replies to `tx`; `txnNotFound` once exhausted.
    lookups: VecDeque<Result<Value, RippledError>>,
    engine_result: String,
    requests: Vec<Request>,
}

impl ScriptedLedger {
    fn new(ledgers: &[u32], engine_result: &str) -> Self {
        let ledger = Self::default();
        {
            let mut script = ledger.script.lock();
            script.ledgers = ledgers.iter().copied().collect();
            script.engine_result = engine_result.to_string();
        }
        ledger
    }

    fn lookup(self, reply: Result<Value, RippledError>) -> Self {
        self.script.lock().lookups.push_back(reply);
        self
    }

    fn not_found(self) -> Self {
        self.lookup(Err(RippledError::new("txnNotFound")))
    }

    fn sent(&self, command: &str) -> Vec<Request> {
        self.script
            .lock()
            .requests
            .iter()
            .filter(|r| r.command == command)
            .cloned()
            .collect()
    }

    fn total(&self) -> usize {
        self.script.lock().requests.len()
    }
}

#[async_trait]
impl LedgerClient for ScriptedLedger {
    fn url(&self) -> &str {
        "scripted://"
    }

    async fn connect(&self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn events(&self) -> &EventRegistry {
        &self.events
    }

    async fn request(&self, request: &Request) -> Result<Response, ClientError> {
        let mut script = self.script.lock();
        script.requests.push(request.clone());

        let result = match request.command.as_str() {
            "ledger" => {
                let index = if script.ledgers.len() > 1 {
                    script.ledgers.pop_front()
                } else {
                    script.ledgers.front().copied()
                };
                json!({"ledger_index": index.unwrap_or(1), "validated": true})
            }
            "tx" => match script.lookups.pop_front() {
                Some(Ok(result)) => result,
                Some(Err(err)) => return Err(err.into()),
                None => return Err(RippledError::new("txnNotFound").into()),
            },
            "submit" => json!({"engine_result": script.engine_result, "accepted": true}),
            "account_info" => json!({"account_data": {"Account": ACCOUNT, "Sequence": 7}}),
            "server_state" => json!({"state": {
                "load_base": 256,
                "load_factor": 256,
                "validated_ledger": {"base_fee": 10, "reserve_base": 1_000_000, "reserve_inc": 200_000},
            }}),
            _ => return Err(RippledError::new("unknownCmd").into()),
        };
        Ok(Response::from_result(Value::from(script.requests.len()), result))
    }
}

/// Signs by attaching a fake key and signature.
struct TestWallet;

impl Signer for TestWallet {
    fn sign(&self, tx: &Transaction, _multisign: bool) -> Result<SignedTransaction, CodecError> {
        let signed = tx.clone().with("SigningPubKey", "ED01").with("TxnSignature", "5349");
        let tx_blob = JsonBlobCodec.encode(&signed)?;
        let hash = hash_signed_blob(&tx_blob).map_err(|e| CodecError::new(e.to_string()))?;
        Ok(SignedTransaction { tx_blob, hash })
    }
}

fn coordinator(ledger: &ScriptedLedger) -> SubmissionCoordinator<ScriptedLedger> {
    SubmissionCoordinator::new(ledger.clone(), Arc::new(JsonBlobCodec))
        .with_validator(Arc::new(BasicValidator))
        .with_config(SubmissionConfig {
            ledger_close_time_ms: 1,
            ..SubmissionConfig::default()
        })
}

fn signed_payment(last_ledger: Option<u32>) -> Transaction {
    let tx = Transaction::new("Payment", ACCOUNT)
        .with("Destination", "rrrrrrrrrrrrrrrrrrrrBZbvji")
        .with("Amount", "1000")
        .with("Fee", "12")
        .with("Sequence", 3)
        .with("SigningPubKey", "ED01")
        .with("TxnSignature", "5349");
    match last_ledger {
        Some(lls) => tx.with("LastLedgerSequence", lls),
        None => tx,
    }
}

fn wallet() -> SubmitOptions {
    SubmitOptions::new().wallet(Arc::new(TestWallet))
}

#[tokio::test]
async fn expires_once_ledger_passes_last_ledger_sequence() {
    let ledger = ScriptedLedger::new(&[98, 99, 101], "terQUEUED").not_found().not_found();
    let err = coordinator(&ledger)
        .submit_and_wait(signed_payment(Some(100)), &SubmitOptions::new())
        .await
        .unwrap_err();

    match err {
        ClientError::SubmissionExpired {
            latest_ledger,
            last_ledger_sequence,
            engine_result,
        } => {
            assert_eq!(latest_ledger, 101);
            assert_eq!(last_ledger_sequence, 100);
            assert_eq!(engine_result, "terQUEUED");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(ledger.sent("ledger").len(), 3);
    assert_eq!(ledger.sent("tx").len(), 2);
}

#[tokio::test]
async fn already_expired_fails_on_first_check() {
    let ledger = ScriptedLedger::new(&[150], "tesSUCCESS");
    let err = coordinator(&ledger)
        .submit_and_wait(signed_payment(Some(100)), &SubmitOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::SubmissionExpired { latest_ledger: 150, .. }));
    assert_eq!(ledger.sent("ledger").len(), 1);
    assert!(ledger.sent("tx").is_empty());
}

#[tokio::test]
async fn returns_validated_result_and_stops_polling() {
    let tx = signed_payment(Some(100));
    let hash = hash_signed_blob(&JsonBlobCodec.encode(&tx).unwrap()).unwrap();
    let ledger = ScriptedLedger::new(&[10, 11, 12, 13], "tesSUCCESS")
        .not_found()
        .not_found()
        .lookup(Ok(json!({"hash": hash, "validated": true, "meta": {"TransactionResult": "tesSUCCESS"}})));

    let response = coordinator(&ledger)
        .submit_and_wait(tx, &SubmitOptions::new())
        .await
        .unwrap();
    assert!(response.is_validated());
    assert_eq!(response.result["hash"], hash.as_str());

    let lookups = ledger.sent("tx");
    assert_eq!(lookups.len(), 3);
    assert!(lookups.iter().all(|r| r.param("transaction") == Some(&json!(hash))));

    let total = ledger.total();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(ledger.total(), total);
}

#[tokio::test]
async fn unvalidated_result_is_retried() {
    let ledger = ScriptedLedger::new(&[10], "tesSUCCESS")
        .lookup(Ok(json!({"validated": false})))
        .lookup(Ok(json!({"validated": true})));

    let response = coordinator(&ledger)
        .submit_and_wait(signed_payment(Some(100)), &SubmitOptions::new())
        .await
        .unwrap();
    assert!(response.is_validated());
    assert_eq!(ledger.sent("tx").len(), 2);
}

#[tokio::test]
async fn other_lookup_errors_keep_engine_result() {
    let ledger = ScriptedLedger::new(&[10], "tesSUCCESS")
        .not_found()
        .lookup(Err(RippledError::new("internal")));

    let err = coordinator(&ledger)
        .submit_and_wait(signed_payment(Some(100)), &SubmitOptions::new())
        .await
        .unwrap_err();

    match err {
        ClientError::FinalityCheck { engine_result, source } => {
            assert_eq!(engine_result, "tesSUCCESS");
            assert_eq!(source.rippled().unwrap().error, "internal");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn reliable_submission_needs_last_ledger_sequence() {
    let ledger = ScriptedLedger::new(&[10], "tesSUCCESS");
    let err = coordinator(&ledger)
        .submit_and_wait(signed_payment(None), &SubmitOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(&err, ClientError::Validation(e) if e.0.contains("LastLedgerSequence")));
    assert_eq!(ledger.total(), 0);
}

#[tokio::test]
async fn unsigned_needs_wallet() {
    let ledger = ScriptedLedger::new(&[10], "tesSUCCESS");
    let err = coordinator(&ledger)
        .submit(Transaction::new("AccountSet", ACCOUNT), &SubmitOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(&err, ClientError::Validation(e) if e.0.starts_with("Wallet must be provided")));
    assert_eq!(ledger.total(), 0);
}

#[tokio::test]
async fn autofill_fills_missing_fields() {
    let ledger = ScriptedLedger::new(&[100], "tesSUCCESS");
    let coordinator = coordinator(&ledger);
    let tx = Transaction::new("Payment", ACCOUNT)
        .with("Destination", "rrrrrrrrrrrrrrrrrrrrBZbvji")
        .with("Amount", "1000");

    let response = coordinator.submit(tx, &wallet()).await.unwrap();
    assert_eq!(response.result["engine_result"], "tesSUCCESS");

    let submitted = &ledger.sent("submit")[0];
    assert_eq!(submitted.param("fail_hard"), Some(&json!(false)));
    let blob = submitted.param("tx_blob").and_then(Value::as_str).unwrap();
    let sent = JsonBlobCodec.decode(blob).unwrap();
    assert_eq!(sent.get("Fee"), Some(&json!("12")));
    assert_eq!(sent.get("Sequence"), Some(&json!(7)));
    assert_eq!(sent.last_ledger_sequence(), Some(120));
    assert!(sent.is_signed());

    let info = &ledger.sent("account_info")[0];
    assert_eq!(info.param("ledger_index"), Some(&json!("current")));
}

#[tokio::test]
async fn autofill_keeps_present_fields() {
    let ledger = ScriptedLedger::new(&[100], "tesSUCCESS");
    let tx = Transaction::new("AccountSet", ACCOUNT)
        .with("Fee", "50")
        .with("Sequence", 1)
        .with("LastLedgerSequence", 105);

    let filled = coordinator(&ledger).autofill(tx.clone(), 0).await.unwrap();
    assert_eq!(filled, tx);
    assert_eq!(ledger.total(), 0);
}

#[tokio::test]
async fn account_delete_is_fail_hard_and_pays_reserve() {
    let ledger = ScriptedLedger::new(&[100], "tesSUCCESS");
    let tx = Transaction::new("AccountDelete", ACCOUNT).with("Destination", "rrrrrrrrrrrrrrrrrrrrBZbvji");

    coordinator(&ledger).submit(tx, &wallet()).await.unwrap();

    let submitted = &ledger.sent("submit")[0];
    assert_eq!(submitted.param("fail_hard"), Some(&json!(true)));
    let blob = submitted.param("tx_blob").and_then(Value::as_str).unwrap();
    assert_eq!(JsonBlobCodec.decode(blob).unwrap().get("Fee"), Some(&json!("200000")));
}

#[tokio::test]
async fn fail_hard_on_request() {
    let ledger = ScriptedLedger::new(&[10], "tesSUCCESS");
    let options = SubmitOptions::new().fail_hard(true);
    coordinator(&ledger).submit(signed_payment(Some(20)), &options).await.unwrap();

    assert_eq!(ledger.sent("submit")[0].param("fail_hard"), Some(&json!(true)));
}

#[tokio::test]
async fn signed_blob_is_submitted_as_is() {
    let blob = JsonBlobCodec.encode(&signed_payment(Some(100))).unwrap();
    let hash = hash_signed_blob(&blob).unwrap();
    let ledger = ScriptedLedger::new(&[10], "tesSUCCESS").lookup(Ok(json!({"validated": true})));

    coordinator(&ledger)
        .submit_and_wait(blob.as_str(), &SubmitOptions::new())
        .await
        .unwrap();

    assert_eq!(ledger.sent("submit")[0].param("tx_blob"), Some(&json!(blob)));
    assert_eq!(ledger.sent("tx")[0].param("transaction"), Some(&json!(hash)));
}

#[tokio::test]
async fn validator_rejects_before_signing() {
    let ledger = ScriptedLedger::new(&[10], "tesSUCCESS");
    let tx = Transaction::new("AccountSet", ACCOUNT).with("Fee", "lots");
    let err = coordinator(&ledger)
        .submit(tx, &wallet().autofill(false))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Validation(_)));
    assert!(ledger.sent("submit").is_empty());
}

#[tokio::test]
async fn multisign_through_coordinator() {
    let ledger = ScriptedLedger::default();
    let coordinator = coordinator(&ledger);
    let entry = |account: &str| {
        let tx = Transaction::new("AccountSet", ACCOUNT)
            .with("Fee", "36")
            .with("Sequence", 2)
            .with("SigningPubKey", "")
            .with("Signers", json!([{"Signer": {"Account": account, "SigningPubKey": "ED02", "TxnSignature": "AB"}}]));
        JsonBlobCodec.encode(&tx).unwrap()
    };

    let combined = coordinator
        .multisign(&[entry("rQEKJvwyJrNBHtYqxZdrWqpTUD4umAxuEV"), entry("rrrrrrrrrrrrrrrrrrrrBZbvji")])
        .unwrap();
    let signers = JsonBlobCodec.decode(&combined).unwrap();
    assert_eq!(signers.signers().unwrap().len(), 2);
    assert!(signers.is_signed());

    let none: [&str; 0] = [];
    assert!(matches!(coordinator.multisign(&none), Err(ClientError::Multisign(_))));
}

#[tokio::test]
async fn concurrent_waits_over_one_socket() {
    let server = MockServer::start(|req| {
        let result = match req["command"].as_str() {
            Some("ledger") => json!({"ledger_index": 10, "validated": true}),
            Some("submit") => json!({"engine_result": "tesSUCCESS"}),
            Some("tx") => json!({"hash": req["transaction"], "validated": true}),
            _ => json!({}),
        };
        vec![Reply::After(Duration::from_millis(5), success(req, result))]
    })
    .await;
    let client = Client::new(server.url(), test_config());
    client.connect().await.unwrap();
    let coordinator = SubmissionCoordinator::new(client, Arc::new(JsonBlobCodec));
    assert_eq!(coordinator.config().ledger_close_time_ms, 10);

    let first = signed_payment(Some(100));
    let second = signed_payment(Some(100)).with("Sequence", 4);
    let options = SubmitOptions::new();
    let (a, b) = tokio::join!(
        coordinator.submit_and_wait(first.clone(), &options),
        coordinator.submit_and_wait(second.clone(), &options),
    );

    let hash = |tx: &Transaction| hash_signed_blob(&JsonBlobCodec.encode(tx).unwrap()).unwrap();
    assert_eq!(a.unwrap().result["hash"], hash(&first).as_str());
    assert_eq!(b.unwrap().result["hash"], hash(&second).as_str());

    let requests = server.requests();
    let mut ids: Vec<u64> = requests.iter().map(|r| r["id"].as_u64().unwrap()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), requests.len());
}

#[tokio::test]
async fn poll_interval_follows_client_config() {
    let mut validated = 9;
    let server = MockServer::start(move |req| {
        let reply = match req["command"].as_str() {
            Some("ledger") => {
                validated += 1;
                success(req, json!({"ledger_index": validated, "validated": true}))
            }
            Some("submit") => success(req, json!({"engine_result": "tesSUCCESS"})),
            Some("tx") => common::error(req, "txnNotFound"),
            _ => success(req, json!({})),
        };
        vec![Reply::Now(reply)]
    })
    .await;
    let config = ClientConfig::from_toml_str(
        r#"
        [submission]
        ledger_close_time_ms = 100
        ledger_offset = 5
        "#,
    )
    .unwrap();
    let client = Client::new(server.url(), config);
    client.connect().await.unwrap();

    let coordinator = SubmissionCoordinator::new(client, Arc::new(JsonBlobCodec));
    assert_eq!(coordinator.config().ledger_close_time(), Duration::from_millis(100));
    assert_eq!(coordinator.config().ledger_offset, 5);

    let started = std::time::Instant::now();
    let err = coordinator
        .submit_and_wait(signed_payment(Some(12)), &SubmitOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::SubmissionExpired { latest_ledger: 13, last_ledger_sequence: 12, .. }
    ));
    assert_eq!(server.commands("ledger"), 4);
    assert!(started.elapsed() >= Duration::from_millis(400));
}
