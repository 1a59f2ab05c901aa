//! Wallet balance aggregation: seed-list and discovered ERC-20 balances,
//! fiat pricing with a fallback chain, and live Transfer-driven updates
//! inside a leak-free session lifecycle.

pub mod config;
pub mod constants;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod provider;
pub mod services;
pub mod utils;

pub use error::{AppError, Result};
pub use models::{BalanceSnapshot, SessionConfig, SessionStatus, TokenBalance};
pub use services::BalanceMonitor;
