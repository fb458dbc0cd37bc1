/// Session cycle orchestration
///
/// Drives complete trading sessions against one mint: resolves the venue
/// once up front, then runs buy/sell cycles over a rotating population of
/// ephemeral wallets until the configured cycle count is reached or the
/// operator cancels. Individual operation failures never abort a session;
/// they are recorded and the cycle moves on.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{ConfigError, SessionError};
use crate::executor::{OperationResult, PreparedOperation, TransactionExecutor};
use crate::logger::{log, log_debug, LogTag};
use crate::metrics::{MetricsAggregator, RunningMetrics};
use crate::oracle::{PoolOracle, SwapDirection};
use crate::rpc::{sol_to_lamports, LedgerClient};
use crate::wallets::{EphemeralWallet, WalletManager, WalletSigner, SWEEP_RESERVE_LAMPORTS};

// ============================================================================
// Session constants
// ============================================================================

/// Pause after the buy wave so confirmations settle before sells begin
pub const SETTLEMENT_PAUSE_SECS: u64 = 5;

/// Wallets sold concurrently per batch during the sell phase
pub const SELL_BATCH_SIZE: usize = 5;

/// Pause between sell batches
pub const SELL_BATCH_PAUSE_SECS: u64 = 2;

/// Extra SOL funded per wallet on top of its buy amount, covering
/// transaction fees for the buy, the sell and the final sweep
const FEE_BUFFER_SOL: f64 = 0.003;

/// Base signature fee charged per transaction
const BASE_FEE_SOL: f64 = 0.000_005;

// ============================================================================
// Configuration ranges
// ============================================================================

/// SOL amount range; draws are uniform over the half-open [min, max)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AmountRange {
    pub min: f64,
    pub max: f64,
}

impl AmountRange {
    pub fn draw(&self) -> f64 {
        if self.min >= self.max {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..self.max)
    }
}

/// Wallet count range; draws are uniform over the half-open [min, max)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CountRange {
    pub min: u32,
    pub max: u32,
}

impl CountRange {
    pub fn draw(&self) -> u32 {
        if self.min >= self.max {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..self.max)
    }
}

/// Delay range in seconds; draws are uniform over the half-open [min, max)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl DelayRange {
    pub fn draw(&self) -> Duration {
        if self.min_secs >= self.max_secs {
            return Duration::from_secs(self.min_secs);
        }
        Duration::from_secs(rand::thread_rng().gen_range(self.min_secs..self.max_secs))
    }
}

/// Operator-supplied parameters for one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub mint: String,
    pub cycles: u32,
    pub wallets_per_cycle: CountRange,
    pub buy_amount_sol: AmountRange,
    pub sell_amount_sol: AmountRange,
    pub cycle_delay: DelayRange,
    #[serde(default)]
    pub jito_tip_sol: f64,
    /// Simulate each transaction before submission; a failed simulation
    /// consumes the attempt
    #[serde(default)]
    pub simulate_first: bool,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mint.is_empty() {
            return Err(ConfigError::InvalidConfig {
                field: "mint".to_string(),
                reason: "mint address is empty".to_string(),
            });
        }
        if self.cycles == 0 {
            return Err(ConfigError::InvalidConfig {
                field: "cycles".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.wallets_per_cycle.min == 0 || self.wallets_per_cycle.min > self.wallets_per_cycle.max
        {
            return Err(ConfigError::InvalidRange {
                field: "wallets_per_cycle".to_string(),
                reason: "min must be at least 1 and not exceed max".to_string(),
            });
        }
        for (field, range) in [
            ("buy_amount_sol", self.buy_amount_sol),
            ("sell_amount_sol", self.sell_amount_sol),
        ] {
            if range.min <= 0.0 || range.min > range.max {
                return Err(ConfigError::InvalidRange {
                    field: field.to_string(),
                    reason: "min must be positive and not exceed max".to_string(),
                });
            }
        }
        if self.cycle_delay.min_secs > self.cycle_delay.max_secs {
            return Err(ConfigError::InvalidRange {
                field: "cycle_delay".to_string(),
                reason: "min must not exceed max".to_string(),
            });
        }
        if self.jito_tip_sol < 0.0 {
            return Err(ConfigError::InvalidConfig {
                field: "jito_tip_sol".to_string(),
                reason: "must not be negative".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Session state
// ============================================================================

/// Lifecycle record for one session, updated as cycles complete
#[derive(Debug, Clone)]
pub struct TradingSession {
    pub id: String,
    pub mint: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub cycles_completed: u32,
    pub total_buys: u64,
    pub total_sells: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub total_volume_sol: f64,
    pub total_fees_sol: f64,
}

impl TradingSession {
    fn new(mint: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mint: mint.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            active: true,
            cycles_completed: 0,
            total_buys: 0,
            total_sells: 0,
            successful_operations: 0,
            failed_operations: 0,
            total_volume_sol: 0.0,
            total_fees_sol: 0.0,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.ended_at.unwrap_or_else(Utc::now) - self.started_at
    }

    /// Percentage over all recorded operations; 0 when nothing ran
    pub fn success_rate(&self) -> f64 {
        let total = self.successful_operations + self.failed_operations;
        if total == 0 {
            return 0.0;
        }
        self.successful_operations as f64 / total as f64 * 100.0
    }

    fn record(&mut self, result: &OperationResult) {
        if result.success {
            self.successful_operations += 1;
            if let Some(volume) = result.volume_sol {
                self.total_volume_sol += volume;
            }
            if let Some(fee) = result.fee_sol {
                self.total_fees_sol += fee;
            }
        } else {
            self.failed_operations += 1;
        }
    }

    fn close(&mut self) {
        self.ended_at = Some(Utc::now());
        self.active = false;
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct SessionOrchestrator {
    ledger: Arc<dyn LedgerClient>,
    oracle: Arc<dyn PoolOracle>,
    executor: TransactionExecutor,
    wallets: WalletManager,
    metrics: MetricsAggregator,
    treasury: WalletSigner,
    running: Arc<AtomicBool>,
    settlement_pause: Duration,
    sell_batch_pause: Duration,
    jito_tip_account: Option<solana_sdk::pubkey::Pubkey>,
}

impl SessionOrchestrator {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        oracle: Arc<dyn PoolOracle>,
        executor: TransactionExecutor,
        wallets: WalletManager,
        treasury: WalletSigner,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            ledger,
            oracle,
            executor,
            wallets,
            metrics: MetricsAggregator::new(),
            treasury,
            running,
            settlement_pause: Duration::from_secs(SETTLEMENT_PAUSE_SECS),
            sell_batch_pause: Duration::from_secs(SELL_BATCH_PAUSE_SECS),
            jito_tip_account: None,
        }
    }

    /// Override the settlement and batch pauses (tests use zero)
    pub fn with_timings(mut self, settlement_pause: Duration, sell_batch_pause: Duration) -> Self {
        self.settlement_pause = settlement_pause;
        self.sell_batch_pause = sell_batch_pause;
        self
    }

    /// Route a priority tip to this account on every buy
    pub fn with_jito_tip_account(mut self, account: solana_sdk::pubkey::Pubkey) -> Self {
        self.jito_tip_account = Some(account);
        self
    }

    pub fn metrics_snapshot(&self) -> RunningMetrics {
        self.metrics.snapshot()
    }

    /// Run one complete session. Session bookkeeping (`ended_at`, `active`)
    /// is finalized on every exit path, including the fatal ones.
    pub async fn execute_session(
        &mut self,
        config: &SessionConfig,
    ) -> Result<TradingSession, SessionError> {
        config.validate()?;

        let mut session = TradingSession::new(&config.mint);
        log(
            LogTag::Session,
            "START",
            &format!(
                "Session {} started for {} ({} cycles)",
                session.id, config.mint, config.cycles
            ),
        );

        let pool = match self.oracle.resolve_pool(&config.mint).await {
            Ok(pool) => pool,
            Err(e) => {
                session.close();
                self.log_summary(&session);
                return Err(SessionError::VenueUnavailable {
                    mint: config.mint.clone(),
                    reason: e.to_string(),
                });
            }
        };
        log_debug(
            LogTag::Session,
            "POOL",
            &format!("Trading {} via {}", pool.mint, pool.venue),
        );

        for cycle in 1..=config.cycles {
            if !self.running.load(Ordering::SeqCst) {
                log(
                    LogTag::Session,
                    "CANCELLED",
                    &format!("Stop requested before cycle {}, winding down", cycle),
                );
                break;
            }

            log(
                LogTag::Session,
                "CYCLE",
                &format!("Cycle {}/{} starting", cycle, config.cycles),
            );

            self.run_buy_phase(config, &mut session).await;
            tokio::time::sleep(self.settlement_pause).await;
            self.run_sell_phase(config, &mut session, false).await;

            session.cycles_completed = cycle;
            log_debug(
                LogTag::Session,
                "CYCLE_DONE",
                &format!(
                    "Cycle {} complete: {} ok / {} failed so far",
                    cycle, session.successful_operations, session.failed_operations
                ),
            );

            if cycle < config.cycles && self.running.load(Ordering::SeqCst) {
                let pause = config.cycle_delay.draw();
                log_debug(
                    LogTag::Session,
                    "PAUSE",
                    &format!("Waiting {}s before next cycle", pause.as_secs()),
                );
                tokio::time::sleep(pause).await;
            }
        }

        // Wind-down: liquidate whatever is still held and sweep all wallets,
        // even after cancellation
        self.run_sell_phase(config, &mut session, true).await;
        self.sweep_remaining().await;

        session.close();
        self.log_summary(&session);
        Ok(session)
    }

    /// Create and fund a fresh wave of wallets, then fire their buys in
    /// parallel. Failures are recorded and never abort the cycle.
    async fn run_buy_phase(&mut self, config: &SessionConfig, session: &mut TradingSession) {
        let count = config.wallets_per_cycle.draw() as usize;
        let wallets = self.wallets.create_wallets(count).await;
        if wallets.is_empty() {
            log(
                LogTag::Session,
                "WARNING",
                "No wallets could be created this cycle, skipping buys",
            );
            return;
        }

        // One buy amount per cycle, shared by every wallet in the wave;
        // funding gives each wallet exactly what its buy needs
        let buy_amount = config.buy_amount_sol.draw();
        let planned: Vec<(EphemeralWallet, f64)> = wallets
            .into_iter()
            .map(|w| (w, buy_amount))
            .collect();

        let funding: Vec<PreparedOperation> = planned
            .iter()
            .map(|(wallet, buy_amount)| {
                let lamports =
                    sol_to_lamports(buy_amount + FEE_BUFFER_SOL) + SWEEP_RESERVE_LAMPORTS;
                PreparedOperation {
                    label: format!("fund {}", short_key(&wallet.public_key)),
                    instructions: vec![self.ledger.transfer_instruction(
                        &self.treasury.pubkey(),
                        &wallet.signer.pubkey(),
                        lamports,
                    )],
                    signer: self.treasury.clone(),
                    volume_sol: None,
                    fee_sol: Some(BASE_FEE_SOL),
                }
            })
            .collect();

        let funding_results = self
            .executor
            .execute_sequential(&funding, Duration::ZERO)
            .await;

        let mut funded = Vec::with_capacity(planned.len());
        for ((wallet, buy_amount), result) in planned.into_iter().zip(&funding_results) {
            self.record(session, result);
            if result.success {
                funded.push((wallet, buy_amount));
            } else {
                log(
                    LogTag::Session,
                    "WARNING",
                    &format!(
                        "Funding failed for {}: {}",
                        short_key(&wallet.public_key),
                        result.error.as_deref().unwrap_or("unknown")
                    ),
                );
            }
        }

        let mut buys = Vec::with_capacity(funded.len());
        for (wallet, buy_amount) in &funded {
            let payer = wallet.signer.pubkey();
            match self
                .oracle
                .build_swap_instructions(&config.mint, *buy_amount, &payer, SwapDirection::Buy)
                .await
            {
                Ok(mut instructions) => {
                    let mut fee = BASE_FEE_SOL;
                    if config.jito_tip_sol > 0.0 {
                        if let Some(tip_account) = &self.jito_tip_account {
                            instructions.push(self.ledger.transfer_instruction(
                                &payer,
                                tip_account,
                                sol_to_lamports(config.jito_tip_sol),
                            ));
                            fee += config.jito_tip_sol;
                        }
                    }
                    buys.push((
                        wallet.public_key.clone(),
                        PreparedOperation {
                            label: format!("buy {}", short_key(&wallet.public_key)),
                            instructions,
                            signer: wallet.signer.clone(),
                            volume_sol: Some(*buy_amount),
                            fee_sol: Some(fee),
                        },
                    ));
                }
                Err(e) => {
                    session.total_buys += 1;
                    self.record(session, &synthetic_failure(e.to_string()));
                    log(
                        LogTag::Session,
                        "WARNING",
                        &format!("Buy route failed for {}: {}", short_key(&wallet.public_key), e),
                    );
                }
            }
        }

        let ops: Vec<PreparedOperation> = buys.iter().map(|(_, op)| op.clone()).collect();
        let results = self.executor.execute_parallel(&ops).await;

        for ((public_key, _), result) in buys.iter().zip(&results) {
            session.total_buys += 1;
            self.record(session, result);
            if result.success {
                self.wallets.increment_operations(public_key).await;
            }
        }

        log(
            LogTag::Session,
            "BUYS_DONE",
            &format!(
                "Buy wave complete: {}/{} landed",
                results.iter().filter(|r| r.success).count(),
                results.len()
            ),
        );
    }

    /// Sell out of wallets that have held long enough, in bounded batches.
    /// Wallets whose sell lands are swept back to the treasury and retired;
    /// failed sells stay in the population for the next pass.
    async fn run_sell_phase(
        &mut self,
        config: &SessionConfig,
        session: &mut TradingSession,
        final_pass: bool,
    ) {
        let eligible = self.wallets.wallets_eligible_for_sale().await;
        if eligible.is_empty() {
            return;
        }

        log(
            LogTag::Session,
            if final_pass { "FINAL_SELLS" } else { "SELLS" },
            &format!("Selling out of {} wallets", eligible.len()),
        );

        for (i, batch) in eligible.chunks(SELL_BATCH_SIZE).enumerate() {
            if i > 0 && !self.sell_batch_pause.is_zero() {
                tokio::time::sleep(self.sell_batch_pause).await;
            }

            let mut ops = Vec::with_capacity(batch.len());
            for wallet in batch {
                let sell_amount = config.sell_amount_sol.draw();
                match self
                    .oracle
                    .build_swap_instructions(
                        &config.mint,
                        sell_amount,
                        &wallet.signer.pubkey(),
                        SwapDirection::Sell,
                    )
                    .await
                {
                    Ok(instructions) => ops.push((
                        wallet.public_key.clone(),
                        PreparedOperation {
                            label: format!("sell {}", short_key(&wallet.public_key)),
                            instructions,
                            signer: wallet.signer.clone(),
                            volume_sol: Some(sell_amount),
                            fee_sol: Some(BASE_FEE_SOL),
                        },
                    )),
                    Err(e) => {
                        session.total_sells += 1;
                        self.record(session, &synthetic_failure(e.to_string()));
                        log(
                            LogTag::Session,
                            "WARNING",
                            &format!(
                                "Sell route failed for {}: {}",
                                short_key(&wallet.public_key),
                                e
                            ),
                        );
                    }
                }
            }

            let prepared: Vec<PreparedOperation> = ops.iter().map(|(_, op)| op.clone()).collect();
            let results = self.executor.execute_parallel(&prepared).await;

            for ((public_key, _), result) in ops.iter().zip(&results) {
                session.total_sells += 1;
                self.record(session, result);
                if result.success {
                    self.wallets.increment_operations(public_key).await;
                    self.reclaim_and_retire(public_key).await;
                }
            }
        }
    }

    /// Sweep residual SOL out of every wallet still in the population and
    /// retire them, regardless of sell outcomes
    async fn sweep_remaining(&mut self) {
        let remaining = self.wallets.wallets_eligible_for_sale().await;
        for wallet in remaining {
            self.reclaim_and_retire(&wallet.public_key).await;
        }
        let stragglers = self.wallets.wallet_count().await;
        if stragglers > 0 {
            log(
                LogTag::Session,
                "WARNING",
                &format!("{} wallets still held after wind-down sweep", stragglers),
            );
        }
    }

    async fn reclaim_and_retire(&self, public_key: &str) {
        match self
            .wallets
            .reclaim_funds(public_key, self.ledger.as_ref(), &self.treasury.pubkey())
            .await
        {
            Ok(Some(signature)) => log_debug(
                LogTag::Session,
                "SWEPT",
                &format!("{} swept ({})", short_key(public_key), signature),
            ),
            Ok(None) => {}
            Err(e) => {
                // Leave the wallet in place so a later sweep can retry
                log(
                    LogTag::Session,
                    "WARNING",
                    &format!("Sweep failed for {}: {}", short_key(public_key), e),
                );
                return;
            }
        }

        if let Err(e) = self.wallets.retire_wallet(public_key).await {
            log(
                LogTag::Session,
                "WARNING",
                &format!("Could not retire {}: {}", short_key(public_key), e),
            );
        }
    }

    fn record(&mut self, session: &mut TradingSession, result: &OperationResult) {
        self.metrics.record(result);
        session.record(result);
    }

    fn log_summary(&self, session: &TradingSession) {
        let metrics = self.metrics.snapshot();
        log(
            LogTag::Session,
            "SUMMARY",
            &format!(
                "Session {} finished: {} cycles, {} buys, {} sells, {:.1}% success, {:.4} SOL volume, {:.6} SOL fees, {}s elapsed",
                session.id,
                session.cycles_completed,
                session.total_buys,
                session.total_sells,
                session.success_rate(),
                session.total_volume_sol,
                session.total_fees_sol,
                session.duration().num_seconds(),
            ),
        );
        log_debug(
            LogTag::Metrics,
            "FINAL",
            &format!(
                "Aggregate: {} tx, avg latency {:.0}ms, healthy={}",
                metrics.total_transactions, metrics.average_latency_ms,
                self.metrics.is_healthy()
            ),
        );
    }
}

fn short_key(public_key: &str) -> &str {
    if public_key.len() > 8 {
        &public_key[..8]
    } else {
        public_key
    }
}

fn synthetic_failure(error: String) -> OperationResult {
    OperationResult {
        signature: String::new(),
        success: false,
        error: Some(error),
        execution_time_ms: 0,
        volume_sol: None,
        fee_sol: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RetryPolicy;
    use crate::oracle::mock::MockOracle;
    use crate::rpc::mock::MockLedger;
    use crate::wallets::test_signer;
    use tempfile::TempDir;

    fn test_config() -> SessionConfig {
        SessionConfig {
            mint: "TestMint11111111111111111111111111111111111".to_string(),
            cycles: 1,
            wallets_per_cycle: CountRange { min: 2, max: 2 },
            buy_amount_sol: AmountRange {
                min: 0.01,
                max: 0.01,
            },
            sell_amount_sol: AmountRange {
                min: 0.01,
                max: 0.01,
            },
            cycle_delay: DelayRange {
                min_secs: 0,
                max_secs: 0,
            },
            jito_tip_sol: 0.0,
            simulate_first: false,
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
        }
    }

    fn orchestrator(
        dir: &TempDir,
        ledger: Arc<MockLedger>,
        oracle: Arc<MockOracle>,
        running: Arc<AtomicBool>,
    ) -> SessionOrchestrator {
        let wallets =
            WalletManager::open(dir.path().to_path_buf(), chrono::Duration::zero()).unwrap();
        let executor = TransactionExecutor::new(ledger.clone(), fast_policy(), false)
            .with_poll_interval(Duration::from_millis(1));
        SessionOrchestrator::new(ledger, oracle, executor, wallets, test_signer(), running)
            .with_timings(Duration::ZERO, Duration::ZERO)
    }

    #[test]
    fn validation_rejects_degenerate_configs() {
        let mut config = test_config();
        config.cycles = 0;
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.buy_amount_sol = AmountRange { min: 0.5, max: 0.1 };
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.wallets_per_cycle = CountRange { min: 0, max: 3 };
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.jito_tip_sol = -0.001;
        assert!(config.validate().is_err());

        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn collapsed_ranges_draw_the_single_value() {
        let amount = AmountRange { min: 0.25, max: 0.25 };
        let count = CountRange { min: 4, max: 4 };
        let delay = DelayRange {
            min_secs: 0,
            max_secs: 0,
        };
        for _ in 0..10 {
            assert_eq!(amount.draw(), 0.25);
            assert_eq!(count.draw(), 4);
            assert_eq!(delay.draw(), Duration::ZERO);
        }
    }

    #[test]
    fn range_draws_exclude_the_upper_bound() {
        let amount = AmountRange { min: 0.1, max: 0.2 };
        let count = CountRange { min: 2, max: 3 };
        let delay = DelayRange {
            min_secs: 1,
            max_secs: 2,
        };
        for _ in 0..1_000 {
            assert!(amount.draw() < 0.2);
            assert_eq!(count.draw(), 2);
            assert_eq!(delay.draw(), Duration::from_secs(1));
        }
    }

    #[tokio::test]
    async fn single_cycle_session_completes_with_full_success() {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(MockLedger::new());
        let oracle = Arc::new(MockOracle::new());
        let running = Arc::new(AtomicBool::new(true));
        let mut orch = orchestrator(&dir, ledger.clone(), oracle, running);

        let session = orch.execute_session(&test_config()).await.unwrap();

        assert_eq!(session.cycles_completed, 1);
        assert_eq!(session.total_buys, 2);
        assert_eq!(session.total_sells, 2);
        assert_eq!(session.failed_operations, 0);
        assert_eq!(session.success_rate(), 100.0);
        assert!(!session.active);
        assert!(session.ended_at.is_some());

        // 2 funding transfers + 2 buys + 2 sells
        assert_eq!(ledger.send_count(), 6);

        let metrics = orch.metrics_snapshot();
        assert_eq!(metrics.total_transactions, 6);
        assert_eq!(
            metrics.successful_transactions + metrics.failed_transactions,
            metrics.total_transactions
        );
        assert!((metrics.total_volume_sol - 0.04).abs() < 1e-9);

        // All wallets sold out and retired
        assert_eq!(orch.wallets.wallet_count().await, 0);
    }

    #[tokio::test]
    async fn no_sells_before_minimum_hold_elapses() {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(MockLedger::new());
        let oracle = Arc::new(MockOracle::new());
        let running = Arc::new(AtomicBool::new(true));

        // Default 30s hold: nothing ages into eligibility within the cycle
        let wallets = WalletManager::open(
            dir.path().to_path_buf(),
            chrono::Duration::seconds(crate::wallets::MIN_HOLD_SECS),
        )
        .unwrap();
        let executor = TransactionExecutor::new(ledger.clone(), fast_policy(), false)
            .with_poll_interval(Duration::from_millis(1));
        let mut orch =
            SessionOrchestrator::new(ledger.clone(), oracle, executor, wallets, test_signer(), running)
                .with_timings(Duration::ZERO, Duration::ZERO);

        let session = orch.execute_session(&test_config()).await.unwrap();

        assert_eq!(session.total_buys, 2);
        assert_eq!(session.total_sells, 0);
        // 2 funding transfers + 2 buys, no sells and no sweeps
        assert_eq!(ledger.send_count(), 4);
        // Unsold wallets stay in the population for a later session
        assert_eq!(orch.wallets.wallet_count().await, 2);
    }

    #[tokio::test]
    async fn session_counters_reconcile_with_metrics_under_failures() {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(MockLedger::new());
        ledger.fail_all_sends();
        let oracle = Arc::new(MockOracle::new());
        let running = Arc::new(AtomicBool::new(true));
        let mut orch = orchestrator(&dir, ledger.clone(), oracle, running);

        let session = orch.execute_session(&test_config()).await.unwrap();

        assert!(session.failed_operations > 0);
        assert_eq!(session.successful_operations, 0);
        assert_eq!(session.success_rate(), 0.0);

        let metrics = orch.metrics_snapshot();
        assert_eq!(
            session.successful_operations + session.failed_operations,
            metrics.total_transactions
        );
    }

    #[tokio::test]
    async fn unresolvable_pool_aborts_before_any_submission() {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(MockLedger::new());
        let oracle = Arc::new(MockOracle::new());
        oracle.fail_resolution();
        let running = Arc::new(AtomicBool::new(true));
        let mut orch = orchestrator(&dir, ledger.clone(), oracle, running);

        let err = orch.execute_session(&test_config()).await.unwrap_err();
        assert!(matches!(err, SessionError::VenueUnavailable { .. }));
        assert_eq!(ledger.send_count(), 0);
        assert_eq!(orch.metrics_snapshot().total_transactions, 0);
    }

    #[tokio::test]
    async fn cancellation_before_first_cycle_runs_no_operations() {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(MockLedger::new());
        let oracle = Arc::new(MockOracle::new());
        let running = Arc::new(AtomicBool::new(false));
        let mut orch = orchestrator(&dir, ledger.clone(), oracle, running);

        let session = orch.execute_session(&test_config()).await.unwrap();

        assert_eq!(session.cycles_completed, 0);
        assert_eq!(session.total_buys, 0);
        assert_eq!(ledger.send_count(), 0);
        assert!(!session.active);
        assert!(session.ended_at.is_some());
    }

    #[tokio::test]
    async fn cancellation_between_cycles_stops_early() {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(MockLedger::new());
        let oracle = Arc::new(MockOracle::new());
        let running = Arc::new(AtomicBool::new(true));
        let mut orch = orchestrator(&dir, ledger.clone(), oracle, running.clone());

        let mut config = test_config();
        config.cycles = 50;
        config.wallets_per_cycle = CountRange { min: 1, max: 1 };
        config.cycle_delay = DelayRange {
            min_secs: 1,
            max_secs: 1,
        };

        // Flip the flag during the first inter-cycle pause; it is only
        // observed at cycle boundaries, so exactly one cycle completes
        let flag = running.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(false, Ordering::SeqCst);
        });

        let session = orch.execute_session(&config).await.unwrap();
        assert_eq!(session.cycles_completed, 1);
        assert!(!session.active);
    }
}
