//! Chain read-provider seam consumed by the balance services.

pub mod erc20;
pub mod ethers_provider;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, Filter, Log, U256};
use tokio::sync::mpsc;

use crate::error::Result;

pub use ethers_provider::EthersReadProvider;

pub type Unsubscribe = Box<dyn FnOnce() + Send + 'static>;

/// Read-only chain access: balances, `eth_call`, logs and log subscriptions.
#[async_trait]
pub trait ChainReadProvider: Send + Sync {
    async fn get_balance(&self, address: Address) -> Result<U256>;

    async fn call(&self, contract: Address, data: Bytes) -> Result<Bytes>;

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>>;

    async fn subscribe_logs(&self, filter: Filter) -> Result<LogSubscription>;

    async fn get_block_number(&self) -> Result<u64>;
}

/// A live log stream plus the function that tears it down.
pub struct LogSubscription {
    logs: mpsc::UnboundedReceiver<Log>,
    unsubscribe: Unsubscribe,
}

impl LogSubscription {
    pub fn new(
        logs: mpsc::UnboundedReceiver<Log>,
        unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            logs,
            unsubscribe: Box::new(unsubscribe),
        }
    }

    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<Log>, Unsubscribe) {
        (self.logs, self.unsubscribe)
    }
}
