use ethers::types::Address;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

use crate::{
    error::Result,
    models::TokenBalance,
    provider::{
        erc20::{transfer_filter, transfer_parties},
        Unsubscribe,
    },
    services::balance_fetcher::{sort_by_raw_balance, BalanceFetcher},
    utils::{address_key, validate_address},
};

/// One live Transfer subscription for a (wallet, token) pair.
///
/// `cancel` stops the forwarding task and runs the provider unsubscribe;
/// calling it again is a no-op. Dropping the handle cancels it.
pub struct WatchHandle {
    wallet: Address,
    token: String,
    cancelled: AtomicBool,
    stop: CancellationToken,
    unsubscribe: Mutex<Option<Unsubscribe>>,
}

impl WatchHandle {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn wallet(&self) -> Address {
        self.wallet
    }

    pub fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop.cancel();
        let unsubscribe = self
            .unsubscribe
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(unsubscribe) = unsubscribe {
            unsubscribe();
        }
        tracing::debug!("Stopped watching {} for {}", self.token, address_key(&self.wallet));
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Subscribes to `token`'s Transfer logs and calls `on_update` with a fresh
/// single-token balance whenever `wallet` is the sender or the recipient.
/// Transfers between other parties are ignored.
pub async fn watch(
    fetcher: &BalanceFetcher,
    wallet: Address,
    token: &str,
    on_update: impl Fn(TokenBalance) + Send + Sync + 'static,
) -> Result<WatchHandle> {
    let token_address = validate_address(token)?;
    let token = address_key(&token_address);
    let filter = transfer_filter(Some(token_address), None, None);
    let (mut logs, unsubscribe) = fetcher.provider().subscribe_logs(filter).await?.into_parts();

    let stop = CancellationToken::new();
    let task_stop = stop.clone();
    let task_fetcher = fetcher.clone();
    let task_token = token.clone();

    tokio::spawn(async move {
        loop {
            let log = tokio::select! {
                _ = task_stop.cancelled() => break,
                log = logs.recv() => match log {
                    Some(log) => log,
                    None => break,
                },
            };

            let relevant = transfer_parties(&log)
                .map(|(from, to)| from == wallet || to == wallet)
                .unwrap_or(false);
            if !relevant {
                continue;
            }

            let refreshed = tokio::select! {
                _ = task_stop.cancelled() => break,
                refreshed = task_fetcher.fetch_token_balance(wallet, &task_token) => refreshed,
            };
            match refreshed {
                Ok(balance) if !task_stop.is_cancelled() => on_update(balance),
                Ok(_) => break,
                Err(e) => {
                    tracing::warn!("Live balance refresh failed for {}: {}", task_token, e);
                }
            }
        }
    });

    tracing::debug!("Watching {} for {}", token, address_key(&wallet));
    Ok(WatchHandle {
        wallet,
        token,
        cancelled: AtomicBool::new(false),
        stop,
        unsubscribe: Mutex::new(Some(unsubscribe)),
    })
}

/// Largest `limit` non-zero contract-token holdings, by raw amount.
pub fn select_watch_targets(tokens: &[TokenBalance], limit: usize) -> Vec<String> {
    let mut candidates: Vec<TokenBalance> = tokens
        .iter()
        .filter(|token| !token.is_native() && !token.is_zero())
        .cloned()
        .collect();
    sort_by_raw_balance(&mut candidates);
    candidates
        .into_iter()
        .take(limit)
        .map(|token| token.address)
        .collect()
}
