use ethers::types::Address;
use futures_util::future::join_all;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    constants::{network_profile, NetworkProfile, BALANCE_BATCH_SIZE},
    error::{AppError, Result},
    models::TokenBalance,
    provider::{erc20, ChainReadProvider},
    services::token_metadata::TokenMetadataResolver,
    utils::{address_key, normalize_address, validate_address},
};

// Profile used for chains without a curated entry: ETH-style native asset,
// no seed tokens.
static GENERIC_NETWORK: NetworkProfile = NetworkProfile {
    chain_id: 0,
    name: "EVM",
    chain_namespace: "eth",
    native_symbol: "ETH",
    native_name: "Ether",
    seed_tokens: &[],
};

#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    pub include_native_token: bool,
    pub include_zero_balances: bool,
    /// Explicit candidate contracts; `None` probes the network seed list.
    pub token_addresses: Option<Vec<String>>,
    /// Carried for callers that post-filter by fiat value.
    pub min_balance_usd: Option<f64>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            include_native_token: true,
            include_zero_balances: false,
            token_addresses: None,
            min_balance_usd: None,
        }
    }
}

/// Why a candidate token is absent from a fetch result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    InvalidAddress(String),
    CallFailed(String),
    NotAToken(String),
    Timeout,
    ZeroBalance,
}

impl From<AppError> for SkipReason {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Decode(msg) => SkipReason::NotAToken(msg),
            AppError::Timeout(_) => SkipReason::Timeout,
            AppError::InvalidAddress(msg) => SkipReason::InvalidAddress(msg),
            other => SkipReason::CallFailed(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedToken {
    pub address: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BalanceReport {
    pub balances: Vec<TokenBalance>,
    pub skipped: Vec<SkippedToken>,
}

/// Native + ERC-20 balance reads for one chain, batched to bound the number
/// of concurrent provider calls.
#[derive(Clone)]
pub struct BalanceFetcher {
    provider: Arc<dyn ChainReadProvider>,
    network: &'static NetworkProfile,
    resolver: TokenMetadataResolver,
    call_timeout: Option<Duration>,
}

impl BalanceFetcher {
    pub fn new(provider: Arc<dyn ChainReadProvider>, chain_id: u64) -> Self {
        Self {
            provider,
            network: network_profile(chain_id).unwrap_or(&GENERIC_NETWORK),
            resolver: TokenMetadataResolver::new(),
            call_timeout: None,
        }
    }

    /// Per-read deadline; a read that exceeds it counts as failed.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn provider(&self) -> &Arc<dyn ChainReadProvider> {
        &self.provider
    }

    pub fn network(&self) -> &'static NetworkProfile {
        self.network
    }

    pub fn seed_tokens(&self) -> Vec<String> {
        self.network
            .seed_tokens
            .iter()
            .map(|token| token.to_string())
            .collect()
    }

    // Internal helper that applies the optional per-read deadline.
    async fn with_deadline<T>(&self, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| AppError::Timeout(format!("{} exceeded {:?}", what, limit)))?,
            None => fut.await,
        }
    }

    pub async fn fetch_native_balance(&self, wallet: Address) -> Result<TokenBalance> {
        let raw = self
            .with_deadline("eth_getBalance", self.provider.get_balance(wallet))
            .await?;
        Ok(TokenBalance::native(self.network, raw))
    }

    /// Single-token path: balance plus metadata, zero balances included.
    pub async fn fetch_token_balance(&self, wallet: Address, token: &str) -> Result<TokenBalance> {
        let token = validate_address(token)?;
        let provider = self.provider.as_ref();
        self.with_deadline("token read", async {
            let (raw, metadata) = tokio::join!(
                erc20::balance_of(provider, token, wallet),
                self.resolver.resolve(token, provider),
            );
            Ok(TokenBalance::from_metadata(metadata, raw?))
        })
        .await
    }

    // Internal helper that supports `probe_token` operations.
    async fn probe_token(
        &self,
        wallet: Address,
        token: &str,
        include_zero: bool,
    ) -> std::result::Result<TokenBalance, SkipReason> {
        let balance = self.fetch_token_balance(wallet, token).await?;
        if balance.is_zero() && !include_zero {
            return Err(SkipReason::ZeroBalance);
        }
        Ok(balance)
    }

    /// Fetches data for `fetch_balance_report`.
    ///
    /// # Arguments
    /// * `wallet` - owner whose balances are read.
    /// * `options` - native/zero inclusion and the candidate token list.
    ///
    /// # Returns
    /// * `Ok(BalanceReport)` with balances sorted by raw amount (largest
    ///   first) and the reason every omitted candidate was skipped.
    /// * `Err(AppError)` only when the native balance was requested and
    ///   could not be read.
    ///
    /// # Notes
    /// * Candidates are probed in batches of `BALANCE_BATCH_SIZE`; a batch
    ///   settles completely before the next one starts.
    pub async fn fetch_balance_report(
        &self,
        wallet: Address,
        options: &FetchOptions,
    ) -> Result<BalanceReport> {
        let mut report = BalanceReport::default();

        if options.include_native_token {
            let native = self.fetch_native_balance(wallet).await?;
            if !native.is_zero() || options.include_zero_balances {
                report.balances.push(native);
            }
        }

        let candidates = dedupe_candidates(
            options
                .token_addresses
                .clone()
                .unwrap_or_else(|| self.seed_tokens()),
        );

        for batch in candidates.chunks(BALANCE_BATCH_SIZE) {
            let results = join_all(
                batch
                    .iter()
                    .map(|token| self.probe_token(wallet, token, options.include_zero_balances)),
            )
            .await;

            for (token, result) in batch.iter().zip(results) {
                match result {
                    Ok(balance) => report.balances.push(balance),
                    Err(reason) => {
                        if reason != SkipReason::ZeroBalance {
                            tracing::debug!("Skipping token {}: {:?}", token, reason);
                        }
                        report.skipped.push(SkippedToken {
                            address: token.clone(),
                            reason,
                        });
                    }
                }
            }
        }

        sort_by_raw_balance(&mut report.balances);
        tracing::debug!(
            "Fetched {} balances for {} ({} skipped)",
            report.balances.len(),
            address_key(&wallet),
            report.skipped.len()
        );
        Ok(report)
    }

    pub async fn fetch_balances(
        &self,
        wallet: Address,
        options: &FetchOptions,
    ) -> Result<Vec<TokenBalance>> {
        Ok(self.fetch_balance_report(wallet, options).await?.balances)
    }
}

// Internal helper that keeps the first occurrence of each address.
fn dedupe_candidates(candidates: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .map(|token| normalize_address(&token))
        .filter(|token| !token.is_empty() && seen.insert(token.clone()))
        .collect()
}

/// Stable descending sort by raw on-chain amount.
pub fn sort_by_raw_balance(balances: &mut [TokenBalance]) {
    balances.sort_by(|a, b| b.raw_balance.cmp(&a.raw_balance));
}
