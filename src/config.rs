use serde::Deserialize;
use std::env;

use crate::constants::{
    network_profile, DEFAULT_DISCOVERY_BLOCK_WINDOW, DEFAULT_PRICE_API_URL,
    DEFAULT_READ_TIMEOUT_SECS, DEFAULT_REFRESH_INTERVAL_SECS, PRICE_CACHE_TTL_SECS,
    PRICE_HTTP_TIMEOUT_SECS,
};
use crate::models::SessionConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Blockchain
    pub rpc_url: String,
    pub network_id: u64,
    pub wallet_address: String,
    pub rpc_timeout_secs: u64,

    // Price API
    pub price_api_url: String,
    pub price_cache_ttl_secs: u64,
    pub http_timeout_secs: u64,

    // Session behaviour
    pub auto_refresh: bool,
    pub refresh_interval_secs: u64,
    pub watch_real_time: bool,
    pub discover_new_tokens: bool,
    pub discovery_block_window: u64,
    pub include_zero_balances: bool,
    pub min_balance_usd: Option<f64>,
    pub custom_tokens: Vec<String>,
}

// Internal helper that checks conditions for `is_env_flag_enabled`.
fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

// Internal helper that supports `parse_address_list` operations.
fn parse_address_list(raw: &str) -> Vec<String> {
    raw.split([',', ';', '\n', ' '])
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        Ok(Config {
            rpc_url: env::var("RPC_URL")?,
            network_id: env::var("NETWORK_ID")
                .unwrap_or_else(|_| "1".to_string())
                .parse()?,
            wallet_address: env::var("WALLET_ADDRESS")?,
            rpc_timeout_secs: env::var("RPC_TIMEOUT_SECS")
                .unwrap_or_else(|_| DEFAULT_READ_TIMEOUT_SECS.to_string())
                .parse()?,

            price_api_url: env::var("PRICE_API_URL")
                .unwrap_or_else(|_| DEFAULT_PRICE_API_URL.to_string()),
            price_cache_ttl_secs: env::var("PRICE_CACHE_TTL_SECS")
                .unwrap_or_else(|_| PRICE_CACHE_TTL_SECS.to_string())
                .parse()?,
            http_timeout_secs: env::var("HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| PRICE_HTTP_TIMEOUT_SECS.to_string())
                .parse()?,

            auto_refresh: env_flag("AUTO_REFRESH", true),
            refresh_interval_secs: env::var("REFRESH_INTERVAL_SECS")
                .unwrap_or_else(|_| DEFAULT_REFRESH_INTERVAL_SECS.to_string())
                .parse()?,
            watch_real_time: env_flag("WATCH_REAL_TIME", true),
            discover_new_tokens: env_flag("DISCOVER_NEW_TOKENS", true),
            discovery_block_window: env::var("DISCOVERY_BLOCK_WINDOW")
                .unwrap_or_else(|_| DEFAULT_DISCOVERY_BLOCK_WINDOW.to_string())
                .parse()?,
            include_zero_balances: env_flag("INCLUDE_ZERO_BALANCES", false),
            min_balance_usd: env::var("MIN_BALANCE_USD").ok().and_then(|s| s.parse().ok()),
            custom_tokens: env::var("CUSTOM_TOKENS")
                .map(|raw| parse_address_list(&raw))
                .unwrap_or_default(),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rpc_url.trim().is_empty() {
            anyhow::bail!("RPC_URL is empty");
        }
        if self.wallet_address.trim().is_empty() {
            anyhow::bail!("WALLET_ADDRESS is empty");
        }
        if self.refresh_interval_secs == 0 {
            anyhow::bail!("REFRESH_INTERVAL_SECS must be > 0");
        }
        if url::Url::parse(&self.price_api_url).is_err() {
            anyhow::bail!("PRICE_API_URL is not a valid URL");
        }

        if network_profile(self.network_id).is_none() {
            tracing::warn!(
                "NETWORK_ID {} has no seed list; only discovered and custom tokens will be probed",
                self.network_id
            );
        }
        if self.price_cache_ttl_secs == 0 {
            tracing::warn!("PRICE_CACHE_TTL_SECS is 0; every price lookup will hit the API");
        }
        if self.discover_new_tokens && self.discovery_block_window == 0 {
            tracing::warn!("DISCOVERY_BLOCK_WINDOW is 0; discovery will only scan the head block");
        }
        if let Some(min) = self.min_balance_usd {
            if !min.is_finite() || min < 0.0 {
                tracing::warn!("MIN_BALANCE_USD should be a non-negative number");
            }
        }

        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            auto_refresh: self.auto_refresh,
            refresh_interval_secs: self.refresh_interval_secs,
            watch_real_time: self.watch_real_time,
            discover_new_tokens: self.discover_new_tokens,
            include_zero_balances: self.include_zero_balances,
            min_balance_usd: self.min_balance_usd,
            discovery_block_window: self.discovery_block_window,
            read_timeout_secs: Some(self.rpc_timeout_secs).filter(|secs| *secs > 0),
        }
    }
}
