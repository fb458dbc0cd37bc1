/// Transaction execution engine
///
/// Submits one logical operation (instruction set + signer) with bounded
/// retries and confirmation polling. Each attempt is a full fresh cycle:
/// new blockhash, re-sign, optional simulation, submit, poll until the
/// ledger confirms or the blockhash expires. Batch helpers fan out with a
/// settle-all join - one operation's failure never cancels its siblings.
use futures::future::join_all;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::Instruction;
use solana_sdk::message::Message;
use solana_sdk::transaction::Transaction;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::errors::ExecutorError;
use crate::logger::{log, log_debug, LogTag};
use crate::rpc::{LedgerClient, SignatureStatus};
use crate::wallets::WalletSigner;

/// Default pause between confirmation polls
const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(1_000);

/// Bounded exponential backoff between submission attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay applied after failed attempt k (1-based):
    /// min(base * multiplier^(k-1), max)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powf(f64::from(attempt.saturating_sub(1)));
        // Compare in f64 space; mul_f64 panics on overflow before the cap
        let scaled = self.base_delay.as_secs_f64() * factor;
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled)
    }
}

/// Outcome of one submitted operation, produced exactly once
#[derive(Debug, Clone)]
pub struct OperationResult {
    /// Transaction signature; empty if the operation never landed
    pub signature: String,
    pub success: bool,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub volume_sol: Option<f64>,
    pub fee_sol: Option<f64>,
}

/// One ready-to-submit operation with its signer and accounting hints
#[derive(Debug, Clone)]
pub struct PreparedOperation {
    /// Short human label used in logs ("buy 3Fk2…", "sell 9aQx…")
    pub label: String,
    pub instructions: Vec<Instruction>,
    pub signer: WalletSigner,
    pub volume_sol: Option<f64>,
    pub fee_sol: Option<f64>,
}

pub struct TransactionExecutor {
    ledger: Arc<dyn LedgerClient>,
    policy: RetryPolicy,
    simulate_first: bool,
    confirm_poll_interval: Duration,
}

impl TransactionExecutor {
    pub fn new(ledger: Arc<dyn LedgerClient>, policy: RetryPolicy, simulate_first: bool) -> Self {
        Self {
            ledger,
            policy,
            simulate_first,
            confirm_poll_interval: CONFIRM_POLL_INTERVAL,
        }
    }

    /// Override the confirmation poll pause (tests use a tiny interval)
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.confirm_poll_interval = interval;
        self
    }

    /// Submit one operation, retrying up to the policy's attempt limit
    pub async fn execute(
        &self,
        instructions: &[Instruction],
        signer: &WalletSigner,
    ) -> Result<String, ExecutorError> {
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=self.policy.max_attempts {
            match self.attempt_once(instructions, signer).await {
                Ok(signature) => {
                    if attempt > 1 {
                        log(
                            LogTag::Executor,
                            "RECOVERED",
                            &format!("Operation landed on attempt {}: {}", attempt, signature),
                        );
                    }
                    return Ok(signature);
                }
                Err(e) => {
                    last_error = e.to_string();
                    log(
                        LogTag::Executor,
                        "WARNING",
                        &format!(
                            "Attempt {}/{} failed for {}: {}",
                            attempt,
                            self.policy.max_attempts,
                            signer.pubkey(),
                            last_error
                        ),
                    );
                    if attempt < self.policy.max_attempts {
                        tokio::time::sleep(self.policy.delay_for_attempt(attempt)).await;
                    }
                }
            }
        }

        Err(ExecutorError::SubmissionExhausted {
            attempts: self.policy.max_attempts,
            last_error,
        })
    }

    /// One full submission cycle: blockhash, sign, simulate, send, confirm
    async fn attempt_once(
        &self,
        instructions: &[Instruction],
        signer: &WalletSigner,
    ) -> Result<String, ExecutorError> {
        let blockhash = self
            .ledger
            .latest_blockhash()
            .await
            .map_err(|e| ExecutorError::Submission {
                message: format!("blockhash fetch failed: {}", e),
            })?;

        let payer = signer.pubkey();
        let message = Message::new_with_blockhash(instructions, Some(&payer), &blockhash);
        let mut transaction = Transaction::new_unsigned(message);
        signer.sign_transaction(&mut transaction, blockhash)?;

        if self.simulate_first {
            self.ledger
                .simulate_transaction(&transaction)
                .await
                .map_err(|e| ExecutorError::Simulation {
                    message: e.to_string(),
                })?;
        }

        let signature =
            self.ledger
                .send_transaction(&transaction)
                .await
                .map_err(|e| ExecutorError::Submission {
                    message: e.to_string(),
                })?;

        log_debug(
            LogTag::Executor,
            "SUBMITTED",
            &format!("{} submitted, awaiting confirmation", signature),
        );

        wait_for_confirmation(
            self.ledger.as_ref(),
            &signature,
            &blockhash,
            self.confirm_poll_interval,
        )
        .await?;

        Ok(signature)
    }

    /// Run one operation end to end and account the outcome
    pub async fn execute_operation(&self, op: &PreparedOperation) -> OperationResult {
        let started = Instant::now();
        match self.execute(&op.instructions, &op.signer).await {
            Ok(signature) => {
                let elapsed = started.elapsed().as_millis() as u64;
                log(
                    LogTag::Executor,
                    "SUCCESS",
                    &format!("{} confirmed in {}ms ({})", op.label, elapsed, signature),
                );
                OperationResult {
                    signature,
                    success: true,
                    error: None,
                    execution_time_ms: elapsed,
                    volume_sol: op.volume_sol,
                    fee_sol: op.fee_sol,
                }
            }
            Err(e) => {
                let elapsed = started.elapsed().as_millis() as u64;
                log(
                    LogTag::Executor,
                    "ERROR",
                    &format!("{} failed after {}ms: {}", op.label, elapsed, e),
                );
                OperationResult {
                    signature: String::new(),
                    success: false,
                    error: Some(e.to_string()),
                    execution_time_ms: elapsed,
                    volume_sol: None,
                    fee_sol: None,
                }
            }
        }
    }

    /// Fire all operations concurrently; results preserve input order and a
    /// failing operation never cancels the others
    pub async fn execute_parallel(&self, ops: &[PreparedOperation]) -> Vec<OperationResult> {
        let futures = ops.iter().map(|op| self.execute_operation(op));
        join_all(futures).await
    }

    /// Execute strictly in order with a pause between operations; operation
    /// i's outcome is observed before i+1 is submitted
    pub async fn execute_sequential(
        &self,
        ops: &[PreparedOperation],
        inter_delay: Duration,
    ) -> Vec<OperationResult> {
        let mut results = Vec::with_capacity(ops.len());
        for (i, op) in ops.iter().enumerate() {
            if i > 0 && !inter_delay.is_zero() {
                tokio::time::sleep(inter_delay).await;
            }
            results.push(self.execute_operation(op).await);
        }
        results
    }
}

/// Poll a signature until confirmed, failed, or the finality reference expires
pub(crate) async fn wait_for_confirmation(
    ledger: &dyn LedgerClient,
    signature: &str,
    blockhash: &Hash,
    poll_interval: Duration,
) -> Result<(), ExecutorError> {
    loop {
        let status =
            ledger
                .signature_status(signature)
                .await
                .map_err(|e| ExecutorError::Confirmation {
                    signature: signature.to_string(),
                    message: format!("status poll failed: {}", e),
                })?;

        match status {
            SignatureStatus::Confirmed => return Ok(()),
            SignatureStatus::Failed(reason) => {
                return Err(ExecutorError::Confirmation {
                    signature: signature.to_string(),
                    message: reason,
                });
            }
            SignatureStatus::Pending => {
                // Blockhash expiry bounds how long a pending submission can
                // stay in flight; after that the attempt is dead.
                let still_valid = ledger.is_blockhash_valid(blockhash).await.unwrap_or(true);
                if !still_valid {
                    return Err(ExecutorError::Confirmation {
                        signature: signature.to_string(),
                        message: "finality reference expired before confirmation".to_string(),
                    });
                }
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}
