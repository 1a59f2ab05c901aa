// All service modules
pub mod balance_fetcher;
pub mod balance_monitor;
pub mod balance_watcher;
pub mod discovery;
pub mod price_oracle;
pub mod token_metadata;

// Re-export for convenience
pub use balance_fetcher::{BalanceFetcher, BalanceReport, FetchOptions, SkipReason, SkippedToken};
pub use balance_monitor::BalanceMonitor;
pub use balance_watcher::{select_watch_targets, watch, WatchHandle};
pub use discovery::{discover_tokens, discovery_range};
pub use price_oracle::{HttpPriceSource, InMemoryPriceCache, PriceCache, PriceOracle, PriceSource};
pub use token_metadata::TokenMetadataResolver;
