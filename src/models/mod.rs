pub mod session;
pub mod token;

pub use session::{BalanceSnapshot, SessionConfig, SessionStatus};
pub use token::{TokenBalance, TokenMetadata};
