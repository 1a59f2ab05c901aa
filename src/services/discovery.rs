use ethers::types::{Address, Log};
use std::collections::HashSet;

use crate::{
    provider::{erc20::transfer_filter, ChainReadProvider},
    utils::address_key,
};

/// Block range covering the last `window` blocks up to `head`, inclusive.
pub fn discovery_range(head: u64, window: u64) -> (u64, u64) {
    (head.saturating_sub(window), head)
}

// Internal helper that checks conditions for `in_range`.
fn in_range(log: &Log, from_block: u64, to_block: u64) -> bool {
    match log.block_number {
        Some(block) => {
            let block = block.as_u64();
            block >= from_block && block <= to_block
        }
        None => false,
    }
}

/// Fetches data for `discover_tokens`.
///
/// # Arguments
/// * `wallet` - address matched against the indexed `to` and `from` topics.
/// * `from_block` / `to_block` - inclusive scan window.
///
/// # Returns
/// * Lower-cased addresses of every contract that emitted a Transfer
///   involving `wallet` inside the window. Empty when either query fails.
///
/// # Notes
/// * Results are candidates to probe, not proof of a fungible token.
pub async fn discover_tokens(
    provider: &dyn ChainReadProvider,
    wallet: Address,
    from_block: u64,
    to_block: u64,
) -> HashSet<String> {
    if from_block > to_block {
        return HashSet::new();
    }

    let incoming = transfer_filter(None, None, Some(wallet))
        .from_block(from_block)
        .to_block(to_block);
    let outgoing = transfer_filter(None, Some(wallet), None)
        .from_block(from_block)
        .to_block(to_block);

    let (received, sent) = tokio::join!(provider.get_logs(&incoming), provider.get_logs(&outgoing));
    let logs = match (received, sent) {
        (Ok(mut received), Ok(sent)) => {
            received.extend(sent);
            received
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!("Token discovery failed for {}: {}", address_key(&wallet), e);
            return HashSet::new();
        }
    };

    let found: HashSet<String> = logs
        .iter()
        .filter(|log| in_range(log, from_block, to_block))
        .map(|log| address_key(&log.address))
        .collect();
    tracing::debug!(
        "Discovered {} token contracts for {} in blocks {}..={}",
        found.len(),
        address_key(&wallet),
        from_block,
        to_block
    );
    found
}
