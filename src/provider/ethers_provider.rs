use async_trait::async_trait;
use ethers::providers::{FilterKind, FilterWatcher, Http, Middleware, Provider};
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, Bytes, Filter, Log,
    TransactionRequest, U256,
};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{ChainReadProvider, LogSubscription};
use crate::error::{AppError, Result};

const DEFAULT_POLL_INTERVAL_MS: u64 = 4_000;

/// `ChainReadProvider` over an HTTP JSON-RPC endpoint. Log subscriptions are
/// served by a polling filter watcher forwarded through a channel.
#[derive(Clone)]
pub struct EthersReadProvider {
    client: Arc<Provider<Http>>,
}

impl EthersReadProvider {
    pub fn connect(rpc_url: &str) -> Result<Self> {
        Self::connect_with_poll_interval(rpc_url, Duration::from_millis(DEFAULT_POLL_INTERVAL_MS))
    }

    pub fn connect_with_poll_interval(rpc_url: &str, poll_interval: Duration) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| AppError::Internal(format!("Invalid RPC URL: {}", e)))?
            .interval(poll_interval);
        Ok(Self {
            client: Arc::new(provider),
        })
    }
}

// Internal helper that supports `rpc_error` operations.
fn rpc_error(method: &str, err: impl std::fmt::Display) -> AppError {
    AppError::BlockchainRPC(format!("{} failed: {}", method, err))
}

// Internal helper that removes the node-side filter once nobody polls it.
fn uninstall_filter(client: Arc<Provider<Http>>, id: U256) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::debug!("No runtime to uninstall log filter {:#x}; it will expire on the node", id);
        return;
    };
    runtime.spawn(async move {
        if let Err(e) = client.uninstall_filter(id).await {
            tracing::debug!("{}", rpc_error("eth_uninstallFilter", e));
        }
    });
}

#[async_trait]
impl ChainReadProvider for EthersReadProvider {
    async fn get_balance(&self, address: Address) -> Result<U256> {
        self.client
            .get_balance(address, None)
            .await
            .map_err(|e| rpc_error("eth_getBalance", e))
    }

    async fn call(&self, contract: Address, data: Bytes) -> Result<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new().to(contract).data(data).into();
        self.client
            .call(&tx, None)
            .await
            .map_err(|e| rpc_error("eth_call", e))
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        self.client
            .get_logs(filter)
            .await
            .map_err(|e| rpc_error("eth_getLogs", e))
    }

    async fn subscribe_logs(&self, filter: Filter) -> Result<LogSubscription> {
        let id = self
            .client
            .new_filter(FilterKind::Logs(&filter))
            .await
            .map_err(|e| rpc_error("eth_newFilter", e))?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let task = tokio::spawn(async move {
            let watcher: FilterWatcher<'_, Http, Log> =
                FilterWatcher::new(id, client.as_ref()).interval(client.get_interval());
            let mut stream = Box::pin(watcher);
            while let Some(log) = stream.next().await {
                if sender.send(log).is_err() {
                    break;
                }
            }
            tracing::debug!("Log filter {:#x} stream ended", id);
        });

        let client = self.client.clone();
        Ok(LogSubscription::new(receiver, move || {
            task.abort();
            uninstall_filter(client, id);
        }))
    }

    async fn get_block_number(&self) -> Result<u64> {
        self.client
            .get_block_number()
            .await
            .map(|block| block.as_u64())
            .map_err(|e| rpc_error("eth_blockNumber", e))
    }
}
