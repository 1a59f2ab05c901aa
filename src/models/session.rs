use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    constants::{
        DEFAULT_DISCOVERY_BLOCK_WINDOW, DEFAULT_READ_TIMEOUT_SECS, DEFAULT_REFRESH_INTERVAL_SECS,
    },
    error::ErrorDetail,
};

use super::TokenBalance;

/// Per-activation behaviour of a balance session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    pub auto_refresh: bool,
    pub refresh_interval_secs: u64,
    pub watch_real_time: bool,
    pub discover_new_tokens: bool,
    pub include_zero_balances: bool,
    pub min_balance_usd: Option<f64>,
    pub discovery_block_window: u64,
    pub read_timeout_secs: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_refresh: true,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            watch_real_time: true,
            discover_new_tokens: true,
            include_zero_balances: false,
            min_balance_usd: None,
            discovery_block_window: DEFAULT_DISCOVERY_BLOCK_WINDOW,
            read_timeout_secs: Some(DEFAULT_READ_TIMEOUT_SECS),
        }
    }
}

impl SessionConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Fetching,
    Ready,
    Refreshing,
    Error,
}

/// Read-only copy of the orchestration state handed to callers.
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct BalanceSnapshot {
    pub status: SessionStatus,
    pub wallet_address: Option<String>,
    pub network_id: Option<u64>,
    pub tokens: Vec<TokenBalance>,
    pub custom_tokens: Vec<String>,
    pub hidden_tokens: Vec<String>,
    pub watched_tokens: Vec<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub is_loading: bool,
    pub is_refreshing: bool,
    pub error: Option<ErrorDetail>,
    pub fetch_generation: u64,
}

impl BalanceSnapshot {
    pub fn total_value_usd(&self) -> f64 {
        self.tokens.iter().filter_map(|t| t.balance_usd).sum()
    }

    pub fn token(&self, address: &str) -> Option<&TokenBalance> {
        let lower = address.trim().to_ascii_lowercase();
        self.tokens.iter().find(|t| t.address == lower)
    }
}
