use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use solana_sdk::pubkey::Pubkey;

use volumebot::executor::{RetryPolicy, TransactionExecutor};
use volumebot::global;
use volumebot::logger::{header, log, LogTag};
use volumebot::oracle::RouterOracle;
use volumebot::rpc::RpcClient;
use volumebot::session::SessionOrchestrator;
use volumebot::wallets::{WalletManager, WalletSigner};

/// Entry point: loads configs.json, wires the orchestrator together and
/// runs one session. Ctrl+C requests a graceful wind-down; the session
/// finishes its current cycle, liquidates and sweeps before exiting.
#[tokio::main]
async fn main() -> Result<()> {
    header("VOLUME BOT");
    log(LogTag::System, "STARTUP", "Volume bot starting up");

    let configs = global::read_configs("configs.json").context("failed to load configs.json")?;
    configs
        .session
        .validate()
        .context("invalid session configuration")?;

    let treasury_keypair =
        global::load_wallet_from_config(&configs).context("failed to load treasury wallet")?;
    let treasury = WalletSigner::new(treasury_keypair);
    log(
        LogTag::System,
        "WALLET",
        &format!("Treasury wallet {}", treasury.pubkey()),
    );

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || {
        log(
            LogTag::System,
            "SHUTDOWN",
            "Stop requested, finishing current cycle before winding down",
        );
        flag.store(false, Ordering::SeqCst);
    })
    .context("failed to install shutdown handler")?;

    let ledger = Arc::new(RpcClient::from_config(&configs));
    let oracle = Arc::new(RouterOracle::new(&configs.router_api_url));
    let executor = TransactionExecutor::new(
        ledger.clone(),
        RetryPolicy::default(),
        configs.session.simulate_first,
    );
    let wallets =
        WalletManager::new(&configs.session.mint).context("failed to open wallet store")?;

    let mut orchestrator =
        SessionOrchestrator::new(ledger, oracle, executor, wallets, treasury, running);
    if let Some(tip) = &configs.jito_tip_account {
        let tip_account = Pubkey::from_str(tip).context("invalid jito tip account")?;
        orchestrator = orchestrator.with_jito_tip_account(tip_account);
    }

    let session = orchestrator.execute_session(&configs.session).await?;

    log(
        LogTag::System,
        "EXIT",
        &format!(
            "Session {} done: {:.1}% success over {} operations",
            session.id,
            session.success_rate(),
            session.successful_operations + session.failed_operations
        ),
    );
    Ok(())
}
