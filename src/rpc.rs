/// Ledger access for volumebot
///
/// `LedgerClient` is the seam between the execution machinery and the chain:
/// everything the executor, wallet manager and orchestrator need from Solana
/// goes through this trait so tests can script ledger behavior. `RpcClient`
/// is the production implementation speaking raw JSON-RPC over HTTP with a
/// premium endpoint preferred for transaction submission and the public
/// endpoint preferred for reads.
use async_trait::async_trait;
use base64::Engine;
use serde_json::Value;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_instruction;
use solana_sdk::transaction::Transaction;
use std::str::FromStr;

use crate::errors::RpcError;
use crate::global::Configs;
use crate::logger::{log, log_debug, LogTag};

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Commitment level at which a submitted transaction counts as settled
pub const CONFIRM_COMMITMENT: &str = "confirmed";

pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

pub fn sol_to_lamports(sol_amount: f64) -> u64 {
    (sol_amount * LAMPORTS_PER_SOL as f64).round() as u64
}

/// Status of a submitted signature as reported by the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    /// Not yet visible at the configured commitment level
    Pending,
    Confirmed,
    /// Landed on chain but the transaction itself failed
    Failed(String),
}

/// Chain operations consumed by the core components
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Fetch a fresh finality reference (recent blockhash)
    async fn latest_blockhash(&self) -> Result<Hash, RpcError>;

    /// Submit a signed transaction, returning its signature string
    async fn send_transaction(&self, transaction: &Transaction) -> Result<String, RpcError>;

    /// One status poll for a submitted signature
    async fn signature_status(&self, signature: &str) -> Result<SignatureStatus, RpcError>;

    /// Whether the given blockhash is still valid as a finality reference
    async fn is_blockhash_valid(&self, blockhash: &Hash) -> Result<bool, RpcError>;

    /// Simulate a signed transaction; Err carries the simulation failure
    async fn simulate_transaction(&self, transaction: &Transaction) -> Result<(), RpcError>;

    /// Lamport balance of an account
    async fn get_balance_lamports(&self, pubkey: &Pubkey) -> Result<u64, RpcError>;

    /// Unsigned system transfer instruction
    fn transfer_instruction(&self, from: &Pubkey, to: &Pubkey, lamports: u64) -> Instruction {
        system_instruction::transfer(from, to, lamports)
    }
}

/// JSON-RPC client over HTTP with main + premium endpoints
pub struct RpcClient {
    rpc_url: String,
    premium_url: String,
    http: reqwest::Client,
}

impl RpcClient {
    pub fn from_config(configs: &Configs) -> Self {
        Self::new(&configs.rpc_url, &configs.rpc_url_premium)
    }

    pub fn new(rpc_url: &str, premium_url: &str) -> Self {
        Self {
            rpc_url: rpc_url.to_string(),
            premium_url: premium_url.to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// POST one JSON-RPC payload and return the `result` field
    async fn post(&self, url: &str, payload: &Value) -> Result<Value, RpcError> {
        let response = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RpcError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await.map_err(|e| RpcError::InvalidResponse {
            message: format!("failed to decode JSON-RPC body: {}", e),
        })?;

        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown RPC error");
            return Err(RpcError::RpcResponse {
                message: message.to_string(),
            });
        }

        body.get("result").cloned().ok_or(RpcError::InvalidResponse {
            message: "missing result field".to_string(),
        })
    }

    /// Try the preferred endpoint first, fall back to the other on failure
    async fn post_with_fallback(
        &self,
        preferred: &str,
        fallback: &str,
        payload: &Value,
    ) -> Result<Value, RpcError> {
        match self.post(preferred, payload).await {
            Ok(result) => Ok(result),
            Err(first_err) => {
                if preferred != fallback {
                    log(
                        LogTag::Rpc,
                        "WARNING",
                        &format!("Endpoint {} failed ({}), trying fallback", preferred, first_err),
                    );
                    self.post(fallback, payload).await
                } else {
                    Err(first_err)
                }
            }
        }
    }

    fn encode_transaction(transaction: &Transaction) -> Result<String, RpcError> {
        let bytes = bincode::serialize(transaction).map_err(|e| RpcError::InvalidResponse {
            message: format!("failed to serialize transaction: {}", e),
        })?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }
}

/// Extract a `SignatureStatus` from one entry of getSignatureStatuses
pub(crate) fn parse_signature_status(entry: &Value) -> SignatureStatus {
    if entry.is_null() {
        return SignatureStatus::Pending;
    }

    if let Some(err) = entry.get("err") {
        if !err.is_null() {
            return SignatureStatus::Failed(err.to_string());
        }
    }

    match entry.get("confirmationStatus").and_then(|s| s.as_str()) {
        Some("confirmed") | Some("finalized") => SignatureStatus::Confirmed,
        _ => SignatureStatus::Pending,
    }
}

#[async_trait]
impl LedgerClient for RpcClient {
    async fn latest_blockhash(&self) -> Result<Hash, RpcError> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getLatestBlockhash",
            "params": [{ "commitment": "finalized" }]
        });

        let result = self
            .post_with_fallback(&self.rpc_url, &self.premium_url, &payload)
            .await?;

        let blockhash_str = result
            .get("value")
            .and_then(|v| v.get("blockhash"))
            .and_then(|b| b.as_str())
            .ok_or(RpcError::InvalidResponse {
                message: "missing blockhash in response".to_string(),
            })?;

        Hash::from_str(blockhash_str).map_err(|e| RpcError::InvalidResponse {
            message: format!("unparseable blockhash '{}': {}", blockhash_str, e),
        })
    }

    async fn send_transaction(&self, transaction: &Transaction) -> Result<String, RpcError> {
        let tx_base64 = Self::encode_transaction(transaction)?;

        // maxRetries 0: retry scheduling belongs to the execution engine,
        // not the RPC node's internal rebroadcast loop.
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "sendTransaction",
            "params": [
                tx_base64,
                {
                    "encoding": "base64",
                    "skipPreflight": false,
                    "preflightCommitment": "processed",
                    "maxRetries": 0
                }
            ]
        });

        log_debug(
            LogTag::Rpc,
            "SEND",
            &format!("Submitting transaction ({} bytes base64)", tx_base64.len()),
        );

        let result = self
            .post_with_fallback(&self.premium_url, &self.rpc_url, &payload)
            .await?;

        result
            .as_str()
            .map(|s| s.to_string())
            .ok_or(RpcError::InvalidResponse {
                message: "sendTransaction returned non-string result".to_string(),
            })
    }

    async fn signature_status(&self, signature: &str) -> Result<SignatureStatus, RpcError> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getSignatureStatuses",
            "params": [[signature], { "searchTransactionHistory": false }]
        });

        let result = self
            .post_with_fallback(&self.rpc_url, &self.premium_url, &payload)
            .await?;

        let entry = result
            .get("value")
            .and_then(|v| v.get(0))
            .cloned()
            .unwrap_or(Value::Null);

        Ok(parse_signature_status(&entry))
    }

    async fn is_blockhash_valid(&self, blockhash: &Hash) -> Result<bool, RpcError> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "isBlockhashValid",
            "params": [blockhash.to_string(), { "commitment": "processed" }]
        });

        let result = self
            .post_with_fallback(&self.rpc_url, &self.premium_url, &payload)
            .await?;

        result
            .get("value")
            .and_then(|v| v.as_bool())
            .ok_or(RpcError::InvalidResponse {
                message: "isBlockhashValid returned non-boolean value".to_string(),
            })
    }

    async fn simulate_transaction(&self, transaction: &Transaction) -> Result<(), RpcError> {
        let tx_base64 = Self::encode_transaction(transaction)?;

        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "simulateTransaction",
            "params": [tx_base64, { "encoding": "base64", "commitment": "processed" }]
        });

        let result = self
            .post_with_fallback(&self.rpc_url, &self.premium_url, &payload)
            .await?;

        let err = result.get("value").and_then(|v| v.get("err"));
        match err {
            Some(e) if !e.is_null() => Err(RpcError::RpcResponse {
                message: format!("simulation error: {}", e),
            }),
            _ => Ok(()),
        }
    }

    async fn get_balance_lamports(&self, pubkey: &Pubkey) -> Result<u64, RpcError> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getBalance",
            "params": [pubkey.to_string(), { "commitment": CONFIRM_COMMITMENT }]
        });

        let result = self
            .post_with_fallback(&self.rpc_url, &self.premium_url, &payload)
            .await?;

        result
            .get("value")
            .and_then(|v| v.as_u64())
            .ok_or(RpcError::InvalidResponse {
                message: "getBalance returned non-numeric value".to_string(),
            })
    }
}

/// Scripted in-memory ledger used by unit tests across the crate
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    pub(crate) struct MockLedger {
        send_calls: AtomicU32,
        fail_first_sends: AtomicU32,
        fail_all_sends: AtomicBool,
        fail_payers: Mutex<HashSet<String>>,
        confirm_after_polls: AtomicU32,
        poll_counts: Mutex<HashMap<String, u32>>,
        statuses_fail: AtomicBool,
        simulate_fails: AtomicBool,
        blockhash_valid: AtomicBool,
        balances: Mutex<HashMap<String, u64>>,
        last_sent: Mutex<Option<Transaction>>,
    }

    impl MockLedger {
        pub(crate) fn new() -> Self {
            Self {
                send_calls: AtomicU32::new(0),
                fail_first_sends: AtomicU32::new(0),
                fail_all_sends: AtomicBool::new(false),
                fail_payers: Mutex::new(HashSet::new()),
                confirm_after_polls: AtomicU32::new(0),
                poll_counts: Mutex::new(HashMap::new()),
                statuses_fail: AtomicBool::new(false),
                simulate_fails: AtomicBool::new(false),
                blockhash_valid: AtomicBool::new(true),
                balances: Mutex::new(HashMap::new()),
                last_sent: Mutex::new(None),
            }
        }

        pub(crate) fn send_count(&self) -> u32 {
            self.send_calls.load(Ordering::SeqCst)
        }

        /// Fail the first n sendTransaction calls, then succeed
        pub(crate) fn fail_first_sends(&self, n: u32) {
            self.fail_first_sends.store(n, Ordering::SeqCst);
        }

        pub(crate) fn fail_all_sends(&self) {
            self.fail_all_sends.store(true, Ordering::SeqCst);
        }

        /// Fail every send whose fee payer matches this pubkey
        pub(crate) fn fail_payer(&self, pubkey: &Pubkey) {
            self.fail_payers.lock().unwrap().insert(pubkey.to_string());
        }

        pub(crate) fn confirm_after_polls(&self, polls: u32) {
            self.confirm_after_polls.store(polls, Ordering::SeqCst);
        }

        /// Every status poll reports an on-chain failure
        pub(crate) fn fail_statuses(&self) {
            self.statuses_fail.store(true, Ordering::SeqCst);
        }

        pub(crate) fn fail_simulation(&self) {
            self.simulate_fails.store(true, Ordering::SeqCst);
        }

        pub(crate) fn expire_blockhashes(&self) {
            self.blockhash_valid.store(false, Ordering::SeqCst);
        }

        pub(crate) fn set_balance(&self, pubkey: &str, lamports: u64) {
            self.balances
                .lock()
                .unwrap()
                .insert(pubkey.to_string(), lamports);
        }

        /// Last transaction that made it past the scripted failures
        pub(crate) fn last_sent_transaction(&self) -> Option<Transaction> {
            self.last_sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LedgerClient for MockLedger {
        async fn latest_blockhash(&self) -> Result<Hash, RpcError> {
            Ok(Hash::default())
        }

        async fn send_transaction(&self, transaction: &Transaction) -> Result<String, RpcError> {
            let n = self.send_calls.fetch_add(1, Ordering::SeqCst) + 1;

            let payer = transaction
                .message
                .account_keys
                .first()
                .map(|k| k.to_string())
                .unwrap_or_default();
            if self.fail_payers.lock().unwrap().contains(&payer) {
                return Err(RpcError::Network {
                    message: format!("scripted failure for payer {}", payer),
                });
            }

            if self.fail_all_sends.load(Ordering::SeqCst)
                || n <= self.fail_first_sends.load(Ordering::SeqCst)
            {
                return Err(RpcError::Network {
                    message: format!("scripted send failure #{}", n),
                });
            }

            *self.last_sent.lock().unwrap() = Some(transaction.clone());
            Ok(format!("sig-{}", n))
        }

        async fn signature_status(&self, signature: &str) -> Result<SignatureStatus, RpcError> {
            if self.statuses_fail.load(Ordering::SeqCst) {
                return Ok(SignatureStatus::Failed("scripted on-chain failure".to_string()));
            }

            let mut polls = self.poll_counts.lock().unwrap();
            let count = polls.entry(signature.to_string()).or_insert(0);
            *count += 1;
            if *count > self.confirm_after_polls.load(Ordering::SeqCst) {
                Ok(SignatureStatus::Confirmed)
            } else {
                Ok(SignatureStatus::Pending)
            }
        }

        async fn is_blockhash_valid(&self, _blockhash: &Hash) -> Result<bool, RpcError> {
            Ok(self.blockhash_valid.load(Ordering::SeqCst))
        }

        async fn simulate_transaction(&self, _transaction: &Transaction) -> Result<(), RpcError> {
            if self.simulate_fails.load(Ordering::SeqCst) {
                Err(RpcError::RpcResponse {
                    message: "scripted simulation failure".to_string(),
                })
            } else {
                Ok(())
            }
        }

        async fn get_balance_lamports(&self, pubkey: &Pubkey) -> Result<u64, RpcError> {
            Ok(self
                .balances
                .lock()
                .unwrap()
                .get(&pubkey.to_string())
                .copied()
                .unwrap_or(0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lamports_conversion_round_trips() {
        assert_eq!(sol_to_lamports(1.0), LAMPORTS_PER_SOL);
        assert_eq!(sol_to_lamports(0.0005), 500_000);
        assert!((lamports_to_sol(1_500_000_000) - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn parses_pending_status_from_null() {
        assert_eq!(parse_signature_status(&Value::Null), SignatureStatus::Pending);
    }

    #[test]
    fn parses_confirmed_status() {
        let entry = serde_json::json!({
            "slot": 100,
            "confirmations": 5,
            "err": null,
            "confirmationStatus": "confirmed"
        });
        assert_eq!(parse_signature_status(&entry), SignatureStatus::Confirmed);
    }

    #[test]
    fn parses_finalized_as_confirmed() {
        let entry = serde_json::json!({
            "err": null,
            "confirmationStatus": "finalized"
        });
        assert_eq!(parse_signature_status(&entry), SignatureStatus::Confirmed);
    }

    #[test]
    fn parses_failed_status() {
        let entry = serde_json::json!({
            "err": { "InstructionError": [0, "Custom"] },
            "confirmationStatus": "confirmed"
        });
        match parse_signature_status(&entry) {
            SignatureStatus::Failed(msg) => assert!(msg.contains("InstructionError")),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn processed_status_is_still_pending() {
        let entry = serde_json::json!({
            "err": null,
            "confirmationStatus": "processed"
        });
        assert_eq!(parse_signature_status(&entry), SignatureStatus::Pending);
    }
}
