//! Scripted in-memory provider for unit tests.

use async_trait::async_trait;
use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, Filter, Log, ValueOrArray, H256, U256, U64};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use super::erc20::{transfer_topic, Erc20Read};
use super::{ChainReadProvider, LogSubscription};
use crate::error::{AppError, Result};
use crate::utils::address_topic;

#[derive(Debug, Clone, Default)]
pub struct MockToken {
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub decimals: Option<u8>,
    pub balances: HashMap<Address, U256>,
}

#[derive(Default)]
struct MockState {
    native: HashMap<Address, U256>,
    tokens: HashMap<Address, MockToken>,
    failing_tokens: HashSet<Address>,
    logs: Vec<Log>,
    block_number: u64,
    call_delay: Option<Duration>,
    fail_native: bool,
    fail_logs: bool,
    subscribers: Vec<(u64, Filter, mpsc::UnboundedSender<Log>)>,
}

#[derive(Default)]
pub struct MockProvider {
    state: Arc<Mutex<MockState>>,
    calls: AtomicUsize,
    subscribe_calls: AtomicUsize,
    next_subscription: AtomicU64,
}

pub fn addr(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

pub fn transfer_log(token: Address, from: Address, to: Address, block: u64) -> Log {
    Log {
        address: token,
        topics: vec![transfer_topic(), address_topic(from), address_topic(to)],
        data: Bytes::from(abi::encode(&[Token::Uint(U256::one())])),
        block_number: Some(U64::from(block)),
        ..Default::default()
    }
}

fn topic_matches(topic: &Option<ValueOrArray<Option<H256>>>, value: Option<&H256>) -> bool {
    match topic {
        None | Some(ValueOrArray::Value(None)) => true,
        Some(ValueOrArray::Value(Some(expected))) => value == Some(expected),
        Some(ValueOrArray::Array(options)) => options
            .iter()
            .any(|option| option.is_none() || value == option.as_ref()),
    }
}

fn filter_matches(filter: &Filter, log: &Log) -> bool {
    let address_ok = match &filter.address {
        None => true,
        Some(ValueOrArray::Value(address)) => *address == log.address,
        Some(ValueOrArray::Array(addresses)) => addresses.contains(&log.address),
    };
    if !address_ok {
        return false;
    }

    let block = log.block_number.map(|b| b.as_u64());
    if let (Some(from), Some(block)) = (filter.get_from_block(), block) {
        if block < from.as_u64() {
            return false;
        }
    }
    if let (Some(to), Some(block)) = (filter.get_to_block(), block) {
        if block > to.as_u64() {
            return false;
        }
    }

    filter
        .topics
        .iter()
        .enumerate()
        .all(|(index, topic)| topic_matches(topic, log.topics.get(index)))
}

impl MockProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn set_native_balance(&self, owner: Address, raw: U256) {
        self.state().native.insert(owner, raw);
    }

    pub fn add_token(&self, token: Address, symbol: &str, name: &str, decimals: u8) {
        self.state().tokens.insert(
            token,
            MockToken {
                symbol: Some(symbol.to_string()),
                name: Some(name.to_string()),
                decimals: Some(decimals),
                balances: HashMap::new(),
            },
        );
    }

    /// A contract that answers `balanceOf` but none of the metadata views.
    pub fn add_bare_token(&self, token: Address) {
        self.state().tokens.insert(token, MockToken::default());
    }

    pub fn set_token_balance(&self, token: Address, owner: Address, raw: U256) {
        self.state()
            .tokens
            .entry(token)
            .or_default()
            .balances
            .insert(owner, raw);
    }

    pub fn fail_token(&self, token: Address) {
        self.state().failing_tokens.insert(token);
    }

    pub fn set_fail_native(&self, fail: bool) {
        self.state().fail_native = fail;
    }

    pub fn set_fail_logs(&self, fail: bool) {
        self.state().fail_logs = fail;
    }

    pub fn set_block_number(&self, block: u64) {
        self.state().block_number = block;
    }

    /// Delays every `eth_call` by `delay` (tokio time).
    pub fn set_call_delay(&self, delay: Option<Duration>) {
        self.state().call_delay = delay;
    }

    pub fn push_log(&self, log: Log) {
        self.state().logs.push(log);
    }

    /// Delivers a log to every live subscription whose filter matches.
    pub fn emit(&self, log: Log) {
        let mut state = self.state();
        state
            .subscribers
            .retain(|(_, filter, sender)| !filter_matches(filter, &log) || sender.send(log.clone()).is_ok());
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn active_subscriptions(&self) -> usize {
        self.state().subscribers.len()
    }

    fn answer_call(&self, contract: Address, data: &[u8]) -> Result<Bytes> {
        let state = self.state();
        if state.failing_tokens.contains(&contract) {
            return Err(AppError::BlockchainRPC("execution reverted".to_string()));
        }
        let Some(token) = state.tokens.get(&contract) else {
            // calls to accounts without code return empty data
            return Ok(Bytes::new());
        };
        if data.len() < 4 {
            return Ok(Bytes::new());
        }

        let selector = &data[..4];
        let encoded = if selector == Erc20Read::Decimals.selector() {
            token
                .decimals
                .map(|d| abi::encode(&[Token::Uint(U256::from(d))]))
        } else if selector == Erc20Read::Symbol.selector() {
            token
                .symbol
                .clone()
                .map(|s| abi::encode(&[Token::String(s)]))
        } else if selector == Erc20Read::Name.selector() {
            token
                .name
                .clone()
                .map(|s| abi::encode(&[Token::String(s)]))
        } else if selector == Erc20Read::BalanceOf(Address::zero()).selector() {
            let owner = abi::decode(&[ParamType::Address], &data[4..])
                .ok()
                .and_then(|tokens| tokens.into_iter().next())
                .and_then(Token::into_address)
                .unwrap_or_default();
            let balance = token.balances.get(&owner).copied().unwrap_or_default();
            Some(abi::encode(&[Token::Uint(balance)]))
        } else {
            None
        };

        Ok(encoded.map(Bytes::from).unwrap_or_default())
    }
}

#[async_trait]
impl ChainReadProvider for MockProvider {
    async fn get_balance(&self, address: Address) -> Result<U256> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if state.fail_native {
            return Err(AppError::BlockchainRPC("connection refused".to_string()));
        }
        Ok(state.native.get(&address).copied().unwrap_or_default())
    }

    async fn call(&self, contract: Address, data: Bytes) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.state().call_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.answer_call(contract, &data)
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if state.fail_logs {
            return Err(AppError::BlockchainRPC("query timeout exceeded".to_string()));
        }
        Ok(state
            .logs
            .iter()
            .filter(|log| filter_matches(filter, log))
            .cloned()
            .collect())
    }

    async fn subscribe_logs(&self, filter: Filter) -> Result<LogSubscription> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.state().subscribers.push((id, filter, sender));

        let state = Arc::downgrade(&self.state);
        Ok(LogSubscription::new(receiver, move || {
            if let Some(state) = state.upgrade() {
                state.lock().unwrap().subscribers.retain(|(sub, _, _)| *sub != id);
            }
        }))
    }

    async fn get_block_number(&self) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.state().block_number)
    }
}
