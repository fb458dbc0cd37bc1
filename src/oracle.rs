/// Pool resolution and swap instruction construction
///
/// `PoolOracle` is the venue seam: the orchestrator asks it whether a mint
/// is tradable and for ready-to-sign swap instructions, and never learns how
/// prices or routes are computed. `RouterOracle` is the production
/// implementation backed by the venue's swap-route HTTP API; it decodes the
/// router's unsigned transaction back into instructions so the execution
/// engine controls signing, fees and the finality reference itself.
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::message::MessageHeader;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::Transaction;

use crate::errors::OracleError;
use crate::logger::{log, log_debug, LogTag};
use crate::rpc::sol_to_lamports;

pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Slippage tolerance passed to the router on every quote
pub const SLIPPAGE_TOLERANCE_PERCENT: f64 = 5.0;

/// Bounded retries for transient router failures
const QUOTE_RETRY_ATTEMPTS: u32 = 3;

/// Dust amount used when probing whether a pool exists at all
const PROBE_AMOUNT_LAMPORTS: u64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapDirection {
    Buy,
    Sell,
}

/// Resolved venue handle for one mint
#[derive(Debug, Clone)]
pub struct PoolHandle {
    pub mint: String,
    /// Route label reported by the router (venue/AMM identifier)
    pub venue: String,
}

/// Venue collaborator consumed by the session orchestrator
#[async_trait]
pub trait PoolOracle: Send + Sync {
    /// Check that the mint has a tradable pool before any cycle runs
    async fn resolve_pool(&self, mint: &str) -> Result<PoolHandle, OracleError>;

    /// Build the swap instructions for one operation. `amount_sol` is the
    /// SOL leg of the swap: spent on a buy, received on a sell.
    async fn build_swap_instructions(
        &self,
        mint: &str,
        amount_sol: f64,
        payer: &Pubkey,
        direction: SwapDirection,
    ) -> Result<Vec<Instruction>, OracleError>;
}

// Router API response shapes
#[derive(Debug, Deserialize)]
struct RouterResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<RouterData>,
}

#[derive(Debug, Deserialize)]
struct RouterData {
    quote: RouterQuote,
    raw_tx: RouterRawTx,
}

#[derive(Debug, Deserialize)]
struct RouterQuote {
    #[serde(default)]
    in_amount: String,
    #[serde(default)]
    out_amount: String,
    #[serde(default)]
    venue: String,
}

#[derive(Debug, Deserialize)]
struct RouterRawTx {
    swap_transaction: String,
}

/// Swap-route API client
pub struct RouterOracle {
    api_url: String,
    http: reqwest::Client,
}

impl RouterOracle {
    pub fn new(api_url: &str) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn route_url(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount_lamports: u64,
        payer: &Pubkey,
        swap_mode: &str,
    ) -> String {
        format!(
            "{}/get_swap_route?token_in_address={}&token_out_address={}&in_amount={}&from_address={}&slippage={}&swap_mode={}",
            self.api_url, input_mint, output_mint, amount_lamports, payer, SLIPPAGE_TOLERANCE_PERCENT, swap_mode
        )
    }

    /// Fetch one swap route with bounded retries on transient failures
    async fn fetch_route(&self, mint: &str, url: &str) -> Result<RouterData, OracleError> {
        let mut last_error = OracleError::Api {
            message: "no attempt made".to_string(),
        };

        for attempt in 1..=QUOTE_RETRY_ATTEMPTS {
            log_debug(
                LogTag::Oracle,
                "QUOTE_ATTEMPT",
                &format!("Route request attempt {}/{}", attempt, QUOTE_RETRY_ATTEMPTS),
            );

            let retryable = match self.http.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        last_error = OracleError::Api {
                            message: format!("HTTP {}: {}", status.as_u16(), body),
                        };
                        // Client errors will not improve on retry
                        status.is_server_error()
                    } else {
                        match response.json::<RouterResponse>().await {
                            Ok(parsed) => {
                                if parsed.code != 0 {
                                    let message = parsed.msg.to_lowercase();
                                    if message.contains("not found") || message.contains("no route")
                                    {
                                        return Err(OracleError::PoolNotFound {
                                            mint: mint.to_string(),
                                        });
                                    }
                                    return Err(OracleError::RouteUnavailable {
                                        mint: mint.to_string(),
                                        reason: format!("router code {}: {}", parsed.code, parsed.msg),
                                    });
                                }
                                match parsed.data {
                                    Some(data) => return Ok(data),
                                    None => {
                                        last_error = OracleError::Parse {
                                            message: "router reported success without data"
                                                .to_string(),
                                        };
                                        true
                                    }
                                }
                            }
                            Err(e) => {
                                last_error = OracleError::Parse {
                                    message: e.to_string(),
                                };
                                true
                            }
                        }
                    }
                }
                Err(e) => {
                    last_error = OracleError::Api {
                        message: e.to_string(),
                    };
                    true
                }
            };

            if !retryable {
                return Err(last_error);
            }
            if attempt < QUOTE_RETRY_ATTEMPTS {
                log(
                    LogTag::Oracle,
                    "WARNING",
                    &format!("Route attempt {} failed ({}), retrying", attempt, last_error),
                );
                tokio::time::sleep(std::time::Duration::from_millis(1_000 * attempt as u64)).await;
            }
        }

        Err(last_error)
    }
}

#[async_trait]
impl PoolOracle for RouterOracle {
    async fn resolve_pool(&self, mint: &str) -> Result<PoolHandle, OracleError> {
        // A dust-sized quote probe; any routable answer proves the pool exists
        let probe_payer = Pubkey::default();
        let url = self.route_url(SOL_MINT, mint, PROBE_AMOUNT_LAMPORTS, &probe_payer, "ExactIn");
        let data = self.fetch_route(mint, &url).await?;

        let venue = if data.quote.venue.is_empty() {
            "router".to_string()
        } else {
            data.quote.venue
        };

        log(
            LogTag::Oracle,
            "RESOLVED",
            &format!("Pool resolved for {} via {}", mint, venue),
        );

        Ok(PoolHandle {
            mint: mint.to_string(),
            venue,
        })
    }

    async fn build_swap_instructions(
        &self,
        mint: &str,
        amount_sol: f64,
        payer: &Pubkey,
        direction: SwapDirection,
    ) -> Result<Vec<Instruction>, OracleError> {
        let amount_lamports = sol_to_lamports(amount_sol);

        // Buys spend an exact SOL amount; sells target an exact SOL amount out
        let url = match direction {
            SwapDirection::Buy => self.route_url(SOL_MINT, mint, amount_lamports, payer, "ExactIn"),
            SwapDirection::Sell => {
                self.route_url(mint, SOL_MINT, amount_lamports, payer, "ExactOut")
            }
        };

        let data = self.fetch_route(mint, &url).await?;

        log_debug(
            LogTag::Oracle,
            "QUOTE",
            &format!(
                "Route for {:?} {}: {} -> {}",
                direction, mint, data.quote.in_amount, data.quote.out_amount
            ),
        );

        decode_swap_instructions(&data.raw_tx.swap_transaction)
    }
}

/// Decode the router's unsigned base64 legacy transaction into instructions
///
/// The router prepares a full transaction; re-extracting the instructions
/// lets the execution engine own the payer, blockhash and signing.
pub(crate) fn decode_swap_instructions(tx_base64: &str) -> Result<Vec<Instruction>, OracleError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(tx_base64)
        .map_err(|e| OracleError::Parse {
            message: format!("invalid transaction encoding: {}", e),
        })?;

    let transaction: Transaction = bincode::deserialize(&bytes).map_err(|e| OracleError::Parse {
        message: format!("invalid transaction payload: {}", e),
    })?;

    let message = &transaction.message;
    let num_keys = message.account_keys.len();
    let mut instructions = Vec::with_capacity(message.instructions.len());

    for compiled in &message.instructions {
        let program_id = *message
            .account_keys
            .get(compiled.program_id_index as usize)
            .ok_or(OracleError::Parse {
                message: "program id index out of range".to_string(),
            })?;

        let mut accounts = Vec::with_capacity(compiled.accounts.len());
        for &index in &compiled.accounts {
            let i = index as usize;
            let pubkey = *message.account_keys.get(i).ok_or(OracleError::Parse {
                message: "account index out of range".to_string(),
            })?;
            accounts.push(AccountMeta {
                pubkey,
                is_signer: is_signer_index(&message.header, i),
                is_writable: is_writable_index(&message.header, num_keys, i),
            });
        }

        instructions.push(Instruction {
            program_id,
            accounts,
            data: compiled.data.clone(),
        });
    }

    Ok(instructions)
}

fn is_signer_index(header: &MessageHeader, index: usize) -> bool {
    index < header.num_required_signatures as usize
}

/// Legacy message writability rules: writable signed keys come first, then
/// readonly signed, then writable unsigned, then readonly unsigned.
fn is_writable_index(header: &MessageHeader, num_keys: usize, index: usize) -> bool {
    let signed = header.num_required_signatures as usize;
    let readonly_signed = header.num_readonly_signed_accounts as usize;
    let readonly_unsigned = header.num_readonly_unsigned_accounts as usize;

    if index < signed {
        index < signed - readonly_signed
    } else {
        index < num_keys - readonly_unsigned
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::message::Message;
    use solana_sdk::signature::Keypair;
    use solana_sdk::signer::Signer;
    use solana_sdk::system_instruction;

    #[test]
    fn decodes_instructions_from_router_transaction() {
        let payer = Keypair::new();
        let dest = Pubkey::new_unique();
        let original = vec![
            system_instruction::transfer(&payer.pubkey(), &dest, 42_000),
            system_instruction::transfer(&payer.pubkey(), &dest, 7),
        ];

        let message = Message::new(&original, Some(&payer.pubkey()));
        let transaction = Transaction::new_unsigned(message);
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(bincode::serialize(&transaction).unwrap());

        let decoded = decode_swap_instructions(&encoded).unwrap();
        assert_eq!(decoded.len(), original.len());

        for (decoded_ix, original_ix) in decoded.iter().zip(&original) {
            assert_eq!(decoded_ix.program_id, original_ix.program_id);
            assert_eq!(decoded_ix.data, original_ix.data);
            assert_eq!(decoded_ix.accounts.len(), original_ix.accounts.len());
            for (d, o) in decoded_ix.accounts.iter().zip(&original_ix.accounts) {
                assert_eq!(d.pubkey, o.pubkey);
                assert_eq!(d.is_signer, o.is_signer);
                assert_eq!(d.is_writable, o.is_writable);
            }
        }
    }

    #[test]
    fn rejects_garbage_payloads() {
        assert!(decode_swap_instructions("not base64!").is_err());
        let junk = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]);
        assert!(decode_swap_instructions(&junk).is_err());
    }

    #[test]
    fn writability_follows_legacy_header_layout() {
        let header = MessageHeader {
            num_required_signatures: 2,
            num_readonly_signed_accounts: 1,
            num_readonly_unsigned_accounts: 1,
        };
        // Keys: [writable signer, readonly signer, writable, readonly]
        assert!(is_writable_index(&header, 4, 0));
        assert!(!is_writable_index(&header, 4, 1));
        assert!(is_writable_index(&header, 4, 2));
        assert!(!is_writable_index(&header, 4, 3));
        assert!(is_signer_index(&header, 1));
        assert!(!is_signer_index(&header, 2));
    }
}
