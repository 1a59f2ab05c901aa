use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use balance_monitor::{
    config::Config,
    constants::network_profile,
    provider::EthersReadProvider,
    services::{BalanceMonitor, HttpPriceSource, InMemoryPriceCache, PriceOracle},
    BalanceSnapshot,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "balance_monitor=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    config.validate()?;

    let network = network_profile(config.network_id)
        .map(|n| n.name)
        .unwrap_or("unknown network");
    tracing::info!("Starting balance monitor");
    tracing::info!("Chain: {} ({})", network, config.network_id);

    // Chain + price clients
    let provider = Arc::new(EthersReadProvider::connect(&config.rpc_url)?);
    let source = HttpPriceSource::with_timeout(
        &config.price_api_url,
        Duration::from_secs(config.http_timeout_secs),
    )?;
    let prices = PriceOracle::new(Arc::new(source))
        .with_cache(InMemoryPriceCache::shared())
        .with_ttl(Duration::from_secs(config.price_cache_ttl_secs));

    let monitor = BalanceMonitor::new(provider, Arc::new(prices));
    let mut updates = monitor.subscribe();
    let reporter = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            log_snapshot(&snapshot);
        }
    });

    if let Err(e) = monitor
        .activate(&config.wallet_address, config.network_id, config.session_config())
        .await
    {
        tracing::error!("Initial balance fetch failed: {}", e);
    }

    for token in &config.custom_tokens {
        match monitor.add_custom_token(token).await {
            Ok(balance) => tracing::info!("Tracking custom token {} ({})", balance.symbol, token),
            Err(e) => tracing::warn!("Custom token {} rejected: {}", token, e),
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    let left = monitor.deactivate();
    if !left.is_empty() {
        tracing::warn!("Resources still registered after shutdown: {:?}", left);
    }
    drop(monitor);
    reporter.abort();

    Ok(())
}

// Internal helper that supports `log_snapshot` operations.
fn log_snapshot(snapshot: &BalanceSnapshot) {
    if snapshot.is_loading || snapshot.is_refreshing {
        tracing::debug!("Balance fetch #{} in flight", snapshot.fetch_generation);
        return;
    }
    if let Some(error) = &snapshot.error {
        tracing::warn!("Balance fetch failed [{}]: {}", error.code, error.message);
    }

    tracing::info!(
        "{} tokens, ${:.2} total, {} watched ({:?})",
        snapshot.tokens.len(),
        snapshot.total_value_usd(),
        snapshot.watched_tokens.len(),
        snapshot.status
    );
    for token in &snapshot.tokens {
        match token.balance_usd {
            Some(usd) => tracing::info!("  {:<8} {:>24}  ${:.2}", token.symbol, token.formatted_balance, usd),
            None => tracing::info!("  {:<8} {:>24}", token.symbol, token.formatted_balance),
        }
    }
}
