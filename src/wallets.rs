use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use solana_sdk::transaction::Transaction;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::errors::{ExecutorError, WalletError};
use crate::executor::wait_for_confirmation;
use crate::global::DATA_DIR;
use crate::logger::{log, log_debug, LogTag};
use crate::rpc::{lamports_to_sol, LedgerClient};

/// Minimum age before a wallet becomes eligible for the sell phase.
/// Kept configurable per manager; 30s is the operational default.
pub const MIN_HOLD_SECS: i64 = 30;

/// Lamports left behind on sweep so the account stays rent-exempt
pub const SWEEP_RESERVE_LAMPORTS: u64 = 890_880;

/// Signature fee the swept wallet pays on its own closing transfer
pub const SWEEP_FEE_LAMPORTS: u64 = 5_000;

/// Opaque signing handle for an ephemeral wallet
///
/// The keypair never leaves this type; the executor can ask it to sign a
/// transaction and read the public key, nothing else.
#[derive(Clone)]
pub struct WalletSigner {
    keypair: Arc<Keypair>,
}

impl WalletSigner {
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    /// Sign a transaction in place against the given finality reference
    pub fn sign_transaction(
        &self,
        transaction: &mut Transaction,
        blockhash: Hash,
    ) -> Result<(), ExecutorError> {
        transaction
            .try_sign(&[self.keypair.as_ref()], blockhash)
            .map_err(|e| ExecutorError::Signing {
                message: e.to_string(),
            })
    }
}

impl std::fmt::Debug for WalletSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSigner")
            .field("pubkey", &self.keypair.pubkey().to_string())
            .finish()
    }
}

/// On-disk record for one ephemeral wallet
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalletRecord {
    public_key: String,
    private_key: String,
    created_at: DateTime<Utc>,
    operations: u64,
}

/// Public view of a managed wallet handed to the orchestrator
#[derive(Debug, Clone)]
pub struct EphemeralWallet {
    pub public_key: String,
    pub created_at: DateTime<Utc>,
    pub operations: u64,
    pub signer: WalletSigner,
}

struct StoredWallet {
    record: WalletRecord,
    signer: WalletSigner,
}

impl StoredWallet {
    fn to_wallet(&self) -> EphemeralWallet {
        EphemeralWallet {
            public_key: self.record.public_key.clone(),
            created_at: self.record.created_at,
            operations: self.record.operations,
            signer: self.signer.clone(),
        }
    }
}

/// Manages the population of ephemeral signing wallets for one mint
pub struct WalletManager {
    wallets: Mutex<HashMap<String, StoredWallet>>,
    wallets_dir: PathBuf,
    archive_dir: PathBuf,
    min_hold: Duration,
}

impl WalletManager {
    /// Open the manager for a mint under the default data directory
    pub fn new(mint: &str) -> Result<Self, WalletError> {
        let dir = Path::new(DATA_DIR).join("wallets").join(mint);
        Self::open(dir, Duration::seconds(MIN_HOLD_SECS))
    }

    /// Open the manager over an explicit directory with a custom hold time
    pub fn open(wallets_dir: PathBuf, min_hold: Duration) -> Result<Self, WalletError> {
        let archive_dir = wallets_dir.join("archive");
        for dir in [&wallets_dir, &archive_dir] {
            fs::create_dir_all(dir).map_err(|e| WalletError::Persistence {
                public_key: String::new(),
                reason: format!("failed to create {}: {}", dir.display(), e),
            })?;
        }

        let manager = Self {
            wallets: Mutex::new(HashMap::new()),
            wallets_dir,
            archive_dir,
            min_hold,
        };
        manager.load_wallets()?;
        Ok(manager)
    }

    /// Load existing wallet records from disk into memory
    fn load_wallets(&self) -> Result<(), WalletError> {
        let entries = fs::read_dir(&self.wallets_dir).map_err(|e| WalletError::Persistence {
            public_key: String::new(),
            reason: format!("failed to read wallet dir: {}", e),
        })?;

        let mut loaded = 0usize;
        let mut map = self.wallets.try_lock().expect("no concurrent access during open");

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let content = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    log(
                        LogTag::Wallet,
                        "WARNING",
                        &format!("Skipping unreadable wallet file {}: {}", path.display(), e),
                    );
                    continue;
                }
            };
            match serde_json::from_str::<WalletRecord>(&content) {
                Ok(record) => match signer_from_record(&record) {
                    Ok(signer) => {
                        map.insert(record.public_key.clone(), StoredWallet { record, signer });
                        loaded += 1;
                    }
                    Err(e) => {
                        log(
                            LogTag::Wallet,
                            "WARNING",
                            &format!("Skipping wallet with bad credential {}: {}", path.display(), e),
                        );
                    }
                },
                Err(e) => {
                    log(
                        LogTag::Wallet,
                        "WARNING",
                        &format!("Skipping unparseable wallet file {}: {}", path.display(), e),
                    );
                }
            }
        }
        drop(map);

        if loaded > 0 {
            log(
                LogTag::Wallet,
                "LOADED",
                &format!("Loaded {} wallets from disk", loaded),
            );
        }
        Ok(())
    }

    /// Generate n new wallets, persisting each one before it is returned
    ///
    /// A wallet whose record cannot be written is logged and dropped from
    /// the returned list; the rest of the batch still succeeds.
    pub async fn create_wallets(&self, n: usize) -> Vec<EphemeralWallet> {
        let mut created = Vec::with_capacity(n);

        for _ in 0..n {
            let keypair = Keypair::new();
            let record = WalletRecord {
                public_key: keypair.pubkey().to_string(),
                private_key: bs58::encode(keypair.to_bytes()).into_string(),
                created_at: Utc::now(),
                operations: 0,
            };

            if let Err(e) = self.write_record(&record) {
                log(
                    LogTag::Wallet,
                    "ERROR",
                    &format!("Dropping wallet {}: {}", record.public_key, e),
                );
                continue;
            }

            let stored = StoredWallet {
                signer: WalletSigner::new(keypair),
                record,
            };
            let wallet = stored.to_wallet();
            self.wallets
                .lock()
                .await
                .insert(wallet.public_key.clone(), stored);
            created.push(wallet);
        }

        log(
            LogTag::Wallet,
            "CREATED",
            &format!("Created {}/{} new wallets", created.len(), n),
        );
        created
    }

    /// All wallets whose age has reached the minimum hold duration
    pub async fn wallets_eligible_for_sale(&self) -> Vec<EphemeralWallet> {
        self.eligible_at(Utc::now()).await
    }

    /// Eligibility against an explicit clock, used by tests
    pub(crate) async fn eligible_at(&self, now: DateTime<Utc>) -> Vec<EphemeralWallet> {
        let wallets = self.wallets.lock().await;
        let mut eligible: Vec<EphemeralWallet> = wallets
            .values()
            .filter(|w| now - w.record.created_at >= self.min_hold)
            .map(|w| w.to_wallet())
            .collect();
        eligible.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        eligible
    }

    /// Number of wallets currently known
    pub async fn wallet_count(&self) -> usize {
        self.wallets.lock().await.len()
    }

    /// Bump a wallet's usage counter and persist the updated record
    pub async fn increment_operations(&self, public_key: &str) {
        let mut wallets = self.wallets.lock().await;
        if let Some(stored) = wallets.get_mut(public_key) {
            stored.record.operations += 1;
            let record = stored.record.clone();
            drop(wallets);
            if let Err(e) = self.write_record(&record) {
                log(
                    LogTag::Wallet,
                    "WARNING",
                    &format!("Failed to persist usage counter for {}: {}", public_key, e),
                );
            }
        }
    }

    /// Sweep a wallet's balance (minus the rent reserve and the transfer's
    /// own signature fee) to the treasury
    ///
    /// Returns the transfer signature, or None when the balance would not
    /// leave anything to move after reserve and fee.
    pub async fn reclaim_funds(
        &self,
        public_key: &str,
        ledger: &dyn LedgerClient,
        treasury: &Pubkey,
    ) -> Result<Option<String>, WalletError> {
        let signer = {
            let wallets = self.wallets.lock().await;
            wallets
                .get(public_key)
                .map(|w| w.signer.clone())
                .ok_or(WalletError::NotFound {
                    public_key: public_key.to_string(),
                })?
        };

        let wallet_pubkey = signer.pubkey();
        let balance = ledger
            .get_balance_lamports(&wallet_pubkey)
            .await
            .map_err(|e| WalletError::Reclaim {
                public_key: public_key.to_string(),
                reason: format!("balance query failed: {}", e),
            })?;

        if balance <= SWEEP_RESERVE_LAMPORTS + SWEEP_FEE_LAMPORTS {
            log_debug(
                LogTag::Wallet,
                "SWEEP_SKIP",
                &format!(
                    "{} holds {} lamports, at or below reserve plus fee",
                    public_key, balance
                ),
            );
            return Ok(None);
        }

        // The wallet also pays the signature fee, so leave room for it on
        // top of the rent reserve
        let amount = balance - SWEEP_RESERVE_LAMPORTS - SWEEP_FEE_LAMPORTS;
        let blockhash = ledger.latest_blockhash().await.map_err(|e| WalletError::Reclaim {
            public_key: public_key.to_string(),
            reason: format!("blockhash fetch failed: {}", e),
        })?;

        let instruction = ledger.transfer_instruction(&wallet_pubkey, treasury, amount);
        let message = solana_sdk::message::Message::new_with_blockhash(
            &[instruction],
            Some(&wallet_pubkey),
            &blockhash,
        );
        let mut transaction = Transaction::new_unsigned(message);
        signer
            .sign_transaction(&mut transaction, blockhash)
            .map_err(|e| WalletError::Reclaim {
                public_key: public_key.to_string(),
                reason: e.to_string(),
            })?;

        let signature = ledger
            .send_transaction(&transaction)
            .await
            .map_err(|e| WalletError::Reclaim {
                public_key: public_key.to_string(),
                reason: format!("transfer submission failed: {}", e),
            })?;

        wait_for_confirmation(ledger, &signature, &blockhash, std::time::Duration::from_secs(1))
            .await
            .map_err(|e| WalletError::Reclaim {
                public_key: public_key.to_string(),
                reason: e.to_string(),
            })?;

        log(
            LogTag::Wallet,
            "SWEPT",
            &format!(
                "Reclaimed {:.6} SOL from {} -> treasury ({})",
                lamports_to_sol(amount),
                public_key,
                signature
            ),
        );
        Ok(Some(signature))
    }

    /// Archive a wallet record (copy to the backup dir) then remove it
    pub async fn retire_wallet(&self, public_key: &str) -> Result<(), WalletError> {
        let live_path = self.record_path(public_key);
        let archive_path = self.archive_dir.join(format!("{}.json", public_key));

        if live_path.exists() {
            fs::copy(&live_path, &archive_path).map_err(|e| WalletError::Archive {
                public_key: public_key.to_string(),
                reason: format!("backup copy failed: {}", e),
            })?;
            fs::remove_file(&live_path).map_err(|e| WalletError::Archive {
                public_key: public_key.to_string(),
                reason: format!("record removal failed: {}", e),
            })?;
        }

        self.wallets.lock().await.remove(public_key);

        log(
            LogTag::Wallet,
            "RETIRED",
            &format!("Archived and removed wallet {}", public_key),
        );
        Ok(())
    }

    /// Retire every wallet older than max_age; returns how many were retired
    pub async fn cleanup_older_than(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let stale: Vec<String> = {
            let wallets = self.wallets.lock().await;
            wallets
                .values()
                .filter(|w| w.record.created_at < cutoff)
                .map(|w| w.record.public_key.clone())
                .collect()
        };

        let mut retired = 0usize;
        for public_key in stale {
            match self.retire_wallet(&public_key).await {
                Ok(()) => retired += 1,
                Err(e) => log(LogTag::Wallet, "ERROR", &format!("Cleanup failed: {}", e)),
            }
        }
        retired
    }

    fn record_path(&self, public_key: &str) -> PathBuf {
        self.wallets_dir.join(format!("{}.json", public_key))
    }

    fn write_record(&self, record: &WalletRecord) -> Result<(), WalletError> {
        let json = serde_json::to_string_pretty(record).map_err(|e| WalletError::Persistence {
            public_key: record.public_key.clone(),
            reason: format!("serialization failed: {}", e),
        })?;
        fs::write(self.record_path(&record.public_key), json).map_err(|e| {
            WalletError::Persistence {
                public_key: record.public_key.clone(),
                reason: format!("write failed: {}", e),
            }
        })
    }
}

fn signer_from_record(record: &WalletRecord) -> Result<WalletSigner, WalletError> {
    let bytes = bs58::decode(&record.private_key)
        .into_vec()
        .map_err(|e| WalletError::Persistence {
            public_key: record.public_key.clone(),
            reason: format!("invalid stored key encoding: {}", e),
        })?;
    let keypair = Keypair::try_from(&bytes[..]).map_err(|e| WalletError::Persistence {
        public_key: record.public_key.clone(),
        reason: format!("invalid stored keypair: {}", e),
    })?;

    // Guard against a record whose key material does not match its filename
    if keypair.pubkey().to_string() != record.public_key
        && Pubkey::from_str(&record.public_key).is_ok()
    {
        return Err(WalletError::Persistence {
            public_key: record.public_key.clone(),
            reason: "stored credential does not match public key".to_string(),
        });
    }
    Ok(WalletSigner::new(keypair))
}

/// Fresh signing handle for tests elsewhere in the crate
#[cfg(test)]
pub(crate) fn test_signer() -> WalletSigner {
    WalletSigner::new(Keypair::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::MockLedger;
    use tempfile::TempDir;

    fn manager_in(dir: &TempDir, hold_secs: i64) -> WalletManager {
        WalletManager::open(dir.path().join("wallets"), Duration::seconds(hold_secs)).unwrap()
    }

    #[tokio::test]
    async fn create_wallets_persists_each_record() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, 30);

        let wallets = manager.create_wallets(3).await;
        assert_eq!(wallets.len(), 3);
        assert_eq!(manager.wallet_count().await, 3);

        for wallet in &wallets {
            let path = dir
                .path()
                .join("wallets")
                .join(format!("{}.json", wallet.public_key));
            assert!(path.exists(), "record missing for {}", wallet.public_key);
        }
    }

    #[tokio::test]
    async fn wallets_survive_a_reopen() {
        let dir = TempDir::new().unwrap();
        let created = {
            let manager = manager_in(&dir, 30);
            manager.create_wallets(2).await
        };

        let reopened = manager_in(&dir, 30);
        assert_eq!(reopened.wallet_count().await, 2);
        let eligible = reopened.eligible_at(Utc::now() + Duration::seconds(60)).await;
        let mut keys: Vec<String> = eligible.iter().map(|w| w.public_key.clone()).collect();
        keys.sort();
        let mut expected: Vec<String> = created.iter().map(|w| w.public_key.clone()).collect();
        expected.sort();
        assert_eq!(keys, expected);
    }

    #[tokio::test]
    async fn eligibility_respects_minimum_hold() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, 30);
        let wallets = manager.create_wallets(1).await;
        let created_at = wallets[0].created_at;

        let before = manager.eligible_at(created_at + Duration::seconds(29)).await;
        assert!(before.is_empty(), "wallet eligible 1s too early");

        let after = manager.eligible_at(created_at + Duration::seconds(31)).await;
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].public_key, wallets[0].public_key);
    }

    #[tokio::test]
    async fn retire_archives_before_removal() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, 30);
        let wallets = manager.create_wallets(1).await;
        let key = wallets[0].public_key.clone();

        manager.retire_wallet(&key).await.unwrap();

        let live = dir.path().join("wallets").join(format!("{}.json", key));
        let archived = dir
            .path()
            .join("wallets")
            .join("archive")
            .join(format!("{}.json", key));
        assert!(!live.exists());
        assert!(archived.exists());
        assert_eq!(manager.wallet_count().await, 0);
    }

    #[tokio::test]
    async fn reclaim_is_noop_at_or_below_reserve_plus_fee() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, 30);
        let wallets = manager.create_wallets(1).await;
        let key = wallets[0].public_key.clone();

        let ledger = MockLedger::new();
        for balance in [
            SWEEP_RESERVE_LAMPORTS,
            SWEEP_RESERVE_LAMPORTS + SWEEP_FEE_LAMPORTS,
        ] {
            ledger.set_balance(&key, balance);
            let treasury = Keypair::new().pubkey();
            let swept = manager.reclaim_funds(&key, &ledger, &treasury).await.unwrap();
            assert!(swept.is_none());
        }
        assert_eq!(ledger.send_count(), 0);
    }

    #[tokio::test]
    async fn reclaim_sweeps_excess_balance_net_of_reserve_and_fee() {
        use solana_sdk::system_instruction::SystemInstruction;

        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, 30);
        let wallets = manager.create_wallets(1).await;
        let key = wallets[0].public_key.clone();

        let ledger = MockLedger::new();
        ledger.set_balance(&key, SWEEP_RESERVE_LAMPORTS + 5_000_000);

        let treasury = Keypair::new().pubkey();
        let swept = manager.reclaim_funds(&key, &ledger, &treasury).await.unwrap();
        assert!(swept.is_some());
        assert_eq!(ledger.send_count(), 1);

        // The wallet keeps the full rent reserve after paying its own
        // signature fee
        let sent = ledger.last_sent_transaction().unwrap();
        let transfer: SystemInstruction =
            bincode::deserialize(&sent.message.instructions[0].data).unwrap();
        match transfer {
            SystemInstruction::Transfer { lamports } => {
                assert_eq!(lamports, 5_000_000 - SWEEP_FEE_LAMPORTS);
            }
            other => panic!("unexpected instruction: {:?}", other),
        }
    }

    #[tokio::test]
    async fn reclaim_for_unknown_wallet_errors() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, 30);
        let ledger = MockLedger::new();
        let treasury = Keypair::new().pubkey();

        let result = manager.reclaim_funds("missing", &ledger, &treasury).await;
        assert!(matches!(result, Err(WalletError::NotFound { .. })));
    }

    #[tokio::test]
    async fn cleanup_retires_only_stale_wallets() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, 30);
        manager.create_wallets(2).await;

        // Nothing is older than an hour yet
        assert_eq!(manager.cleanup_older_than(Duration::hours(1)).await, 0);
        assert_eq!(manager.wallet_count().await, 2);

        // Everything is older than zero seconds
        assert_eq!(manager.cleanup_older_than(Duration::seconds(0)).await, 2);
        assert_eq!(manager.wallet_count().await, 0);
    }
}
