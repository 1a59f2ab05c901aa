use chrono::Utc;
use ethers::types::Address;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;

use crate::{
    constants::{MAX_WATCHED_TOKENS, NATIVE_TOKEN_ADDRESS},
    error::{AppError, Result},
    lifecycle::{lock, CleanupHandle, EventEmitter, ResourceCounts, ResourceScope},
    models::{BalanceSnapshot, SessionConfig, SessionStatus, TokenBalance},
    provider::ChainReadProvider,
    services::{
        balance_fetcher::{BalanceFetcher, FetchOptions},
        balance_watcher::{self, select_watch_targets},
        discovery::{discover_tokens, discovery_range},
        price_oracle::PriceOracle,
    },
    utils::{address_key, normalize_address, validate_address},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchKind {
    Activation,
    Refresh,
}

/// One activated wallet+network pair and everything it owns.
struct Session {
    id: u64,
    wallet: Address,
    config: SessionConfig,
    fetcher: BalanceFetcher,
    scope: ResourceScope,
}

#[derive(Default)]
struct MonitorState {
    session: Option<Arc<Session>>,
    next_session_id: u64,
    snapshot: BalanceSnapshot,
    generation: u64,
    watch_generation: u64,
    watches: Vec<(String, CleanupHandle)>,
    // set on activation, cleared by the first applied fetch that opens watches
    watches_pending: bool,
    last_error: Option<AppError>,
}

impl MonitorState {
    fn is_current(&self, session: &Arc<Session>) -> bool {
        session.scope.is_active()
            && self
                .session
                .as_ref()
                .map(|current| Arc::ptr_eq(current, session))
                .unwrap_or(false)
    }

    fn active_session(&self) -> Result<Arc<Session>> {
        self.session
            .clone()
            .filter(|session| session.scope.is_active())
            .ok_or(AppError::SessionInactive)
    }

    fn sync_watched_tokens(&mut self) {
        self.snapshot.watched_tokens = self.watches.iter().map(|(token, _)| token.clone()).collect();
    }
}

struct MonitorCore {
    provider: Arc<dyn ChainReadProvider>,
    prices: Arc<PriceOracle>,
    state: Mutex<MonitorState>,
    updates: watch::Sender<BalanceSnapshot>,
    events: EventEmitter<BalanceSnapshot>,
}

/// Descending by raw amount; the native token goes first on ties.
pub fn sort_tokens(tokens: &mut [TokenBalance]) {
    tokens.sort_by(|a, b| {
        b.raw_balance
            .cmp(&a.raw_balance)
            .then_with(|| b.is_native().cmp(&a.is_native()))
    });
}

// Internal helper that supports `unit_price` operations.
fn unit_price(token: &TokenBalance) -> Option<f64> {
    let amount = token.amount();
    token
        .balance_usd
        .filter(|_| amount > 0.0)
        .map(|usd| usd / amount)
}

impl MonitorCore {
    fn publish(&self, snapshot: BalanceSnapshot) {
        self.updates.send_replace(snapshot.clone());
        self.events.emit(&snapshot);
    }

    // Internal helper that fetches data for `collect_balances`.
    async fn collect_balances(
        &self,
        session: &Session,
        custom: &[String],
        hidden: &[String],
    ) -> Result<Vec<TokenBalance>> {
        let fetcher = &session.fetcher;
        let config = &session.config;
        let mut candidates = fetcher.seed_tokens();

        if config.discover_new_tokens {
            match fetcher.provider().get_block_number().await {
                Ok(head) => {
                    let (from, to) = discovery_range(head, config.discovery_block_window);
                    let mut found: Vec<String> =
                        discover_tokens(fetcher.provider().as_ref(), session.wallet, from, to)
                            .await
                            .into_iter()
                            .collect();
                    found.sort();
                    candidates.extend(found);
                }
                Err(e) => {
                    tracing::warn!("Skipping token discovery, block head unavailable: {}", e);
                }
            }
        }
        candidates.retain(|token| !custom.contains(token) && !hidden.contains(token));

        let base = FetchOptions {
            include_native_token: !hidden.iter().any(|t| t == NATIVE_TOKEN_ADDRESS),
            include_zero_balances: config.include_zero_balances,
            token_addresses: Some(candidates),
            min_balance_usd: config.min_balance_usd,
        };
        let mut balances = fetcher.fetch_balances(session.wallet, &base).await?;

        if !custom.is_empty() {
            // user-added tokens stay visible at zero
            let user_added = FetchOptions {
                include_native_token: false,
                include_zero_balances: true,
                token_addresses: Some(custom.to_vec()),
                min_balance_usd: None,
            };
            balances.extend(fetcher.fetch_balances(session.wallet, &user_added).await?);
        }

        self.prices
            .value_tokens(&mut balances, fetcher.network().chain_namespace)
            .await;

        if let Some(min_usd) = config.min_balance_usd {
            balances.retain(|token| {
                token.is_native()
                    || custom.contains(&token.address)
                    || token.balance_usd.map(|usd| usd >= min_usd).unwrap_or(true)
            });
        }

        sort_tokens(&mut balances);
        Ok(balances)
    }

    async fn run_pipeline(self: &Arc<Self>, expected_session: Option<u64>, kind: FetchKind) -> Result<()> {
        let (session, generation, custom, hidden, started) = {
            let mut st = lock(&self.state);
            let session = st.active_session()?;
            if expected_session.is_some_and(|id| id != session.id) {
                return Ok(());
            }

            st.generation += 1;
            let generation = st.generation;
            let snapshot = &mut st.snapshot;
            snapshot.fetch_generation = generation;
            let has_results = matches!(
                snapshot.status,
                SessionStatus::Ready | SessionStatus::Error | SessionStatus::Refreshing
            );
            if kind == FetchKind::Refresh && has_results {
                snapshot.status = SessionStatus::Refreshing;
                snapshot.is_refreshing = true;
            } else {
                snapshot.status = SessionStatus::Fetching;
                snapshot.is_loading = true;
            }
            (
                session,
                generation,
                snapshot.custom_tokens.clone(),
                snapshot.hidden_tokens.clone(),
                snapshot.clone(),
            )
        };
        self.publish(started);

        let cancel = session.scope.cancellation_token();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(AppError::Cancelled),
            result = self.collect_balances(&session, &custom, &hidden) => result,
        };

        let applied = {
            let mut st = lock(&self.state);
            if !st.is_current(&session) || st.generation != generation {
                tracing::debug!("Discarding superseded balance fetch #{}", generation);
                Err(st.is_current(&session).then(|| self.updates.subscribe()))
            } else {
                let wants_watches = session.config.watch_real_time
                    && (kind == FetchKind::Activation || st.watches_pending);
                st.snapshot.is_loading = false;
                st.snapshot.is_refreshing = false;
                let mut watch_targets = None;
                let result = match outcome {
                    Ok(tokens) => {
                        st.snapshot.tokens = tokens;
                        st.snapshot.status = SessionStatus::Ready;
                        st.snapshot.error = None;
                        st.snapshot.last_updated = Some(Utc::now());
                        if wants_watches {
                            watch_targets =
                                Some(select_watch_targets(&st.snapshot.tokens, MAX_WATCHED_TOKENS));
                            st.watches_pending = false;
                        }
                        st.last_error = None;
                        Ok(())
                    }
                    Err(e) => {
                        if e.is_transient() {
                            tracing::debug!("Balance fetch #{} failed transiently: {}", generation, e);
                        } else {
                            tracing::warn!("Balance fetch #{} failed: {}", generation, e);
                        }
                        st.snapshot.status = SessionStatus::Error;
                        st.snapshot.error = Some(e.detail());
                        st.last_error = Some(e.clone());
                        Err(e)
                    }
                };
                Ok((st.snapshot.clone(), watch_targets, result))
            }
        };
        let (finished, watch_targets, result) = match applied {
            Ok(applied) => applied,
            Err(Some(updates)) => return self.await_settled(&session, updates).await,
            Err(None) => return Err(AppError::SessionInactive),
        };
        self.publish(finished);

        if let Some(targets) = watch_targets {
            self.replace_watches(&session, targets).await;
        }
        result
    }

    // Internal helper that waits for the fetch that superseded ours and
    // reports its outcome.
    async fn await_settled(
        &self,
        session: &Arc<Session>,
        mut updates: watch::Receiver<BalanceSnapshot>,
    ) -> Result<()> {
        loop {
            {
                let st = lock(&self.state);
                if !st.is_current(session) {
                    return Err(AppError::SessionInactive);
                }
                if !st.snapshot.is_loading && !st.snapshot.is_refreshing {
                    return st.last_error.clone().map_or(Ok(()), Err);
                }
            }
            updates.changed().await.map_err(|_| AppError::Cancelled)?;
        }
    }

    // Internal helper that swaps the whole live-watch set.
    async fn replace_watches(self: &Arc<Self>, session: &Arc<Session>, targets: Vec<String>) {
        let (previous, watch_generation) = {
            let mut st = lock(&self.state);
            if !st.is_current(session) {
                return;
            }
            st.watch_generation += 1;
            (std::mem::take(&mut st.watches), st.watch_generation)
        };
        for (_, cleanup) in previous {
            cleanup.run();
        }

        let mut established = Vec::with_capacity(targets.len());
        for target in targets {
            let core = Arc::downgrade(self);
            let owner = Arc::downgrade(session);
            let watched = balance_watcher::watch(&session.fetcher, session.wallet, &target, move |balance| {
                if let (Some(core), Some(owner)) = (core.upgrade(), owner.upgrade()) {
                    core.apply_live_update(&owner, watch_generation, balance);
                }
            })
            .await;

            match watched {
                Ok(handle) => {
                    let cleanup = session.scope.track_subscription(move || handle.cancel());
                    established.push((target, cleanup));
                }
                Err(e) => tracing::warn!("Live watch failed for {}: {}", target, e),
            }
        }

        let snapshot = {
            let mut st = lock(&self.state);
            if !st.is_current(session) || st.watch_generation != watch_generation {
                None
            } else {
                st.watches = established;
                st.sync_watched_tokens();
                established = Vec::new();
                Some(st.snapshot.clone())
            }
        };
        match snapshot {
            Some(snapshot) => self.publish(snapshot),
            None => {
                for (_, cleanup) in established {
                    cleanup.run();
                }
            }
        }
    }

    fn apply_live_update(&self, session: &Arc<Session>, watch_generation: u64, mut balance: TokenBalance) {
        let snapshot = {
            let mut st = lock(&self.state);
            if !st.is_current(session) || st.watch_generation != watch_generation {
                return;
            }
            let snapshot = &mut st.snapshot;
            if snapshot.hidden_tokens.contains(&balance.address) {
                return;
            }

            if let Some(pos) = snapshot.tokens.iter().position(|t| t.address == balance.address) {
                let previous = snapshot.tokens.remove(pos);
                if let Some(price) = unit_price(&previous) {
                    balance.apply_price(price);
                }
            }
            let keep = !balance.is_zero()
                || session.config.include_zero_balances
                || snapshot.custom_tokens.contains(&balance.address);
            if keep {
                snapshot.tokens.push(balance);
            }
            sort_tokens(&mut snapshot.tokens);
            snapshot.last_updated = Some(Utc::now());
            snapshot.clone()
        };
        self.publish(snapshot);
    }
}

/// Balance session façade: activation, refresh, custom tokens and a live
/// snapshot stream for one wallet on one network at a time.
pub struct BalanceMonitor {
    core: Arc<MonitorCore>,
}

impl BalanceMonitor {
    pub fn new(provider: Arc<dyn ChainReadProvider>, prices: Arc<PriceOracle>) -> Self {
        let (updates, _) = watch::channel(BalanceSnapshot::default());
        Self {
            core: Arc::new(MonitorCore {
                provider,
                prices,
                state: Mutex::new(MonitorState::default()),
                updates,
                events: EventEmitter::new(),
            }),
        }
    }

    /// Starts a session for `wallet` on `network_id`.
    ///
    /// # Arguments
    /// * `wallet` - `0x` address; mixed case must carry a valid checksum.
    /// * `network_id` - EVM chain id.
    /// * `config` - refresh cadence, live watching, discovery and filters.
    ///
    /// # Returns
    /// * `Ok(())` when the first fetch succeeded. If a refresh overtook it,
    ///   the outcome of that refresh is reported instead.
    /// * `Err(AppError)` for an invalid wallet or chain id, or when the first
    ///   fetch failed. A failed first fetch leaves the session active in
    ///   `Error`, with auto-refresh still scheduled.
    /// * `Err(AppError::SessionInactive)` when the session was closed or
    ///   replaced before the fetch finished.
    ///
    /// # Notes
    /// * Any previous session is torn down before the new one is created.
    pub async fn activate(&self, wallet: &str, network_id: u64, config: SessionConfig) -> Result<()> {
        let wallet = validate_address(wallet)?;
        if network_id == 0 {
            return Err(AppError::UnsupportedNetwork(network_id));
        }
        self.deactivate();

        let fetcher = BalanceFetcher::new(self.core.provider.clone(), network_id)
            .with_call_timeout(config.read_timeout());
        let (session, snapshot) = {
            let mut st = lock(&self.core.state);
            st.next_session_id += 1;
            let session = Arc::new(Session {
                id: st.next_session_id,
                wallet,
                config: config.clone(),
                fetcher,
                scope: ResourceScope::new(),
            });
            st.session = Some(session.clone());
            st.watches_pending = config.watch_real_time;
            st.last_error = None;
            st.snapshot = BalanceSnapshot {
                wallet_address: Some(address_key(&wallet)),
                network_id: Some(network_id),
                fetch_generation: st.generation,
                ..Default::default()
            };
            (session, st.snapshot.clone())
        };
        self.core.publish(snapshot);
        tracing::info!(
            "Balance session #{} started for {} on chain {}",
            session.id,
            address_key(&wallet),
            network_id
        );

        if config.auto_refresh {
            let core = Arc::downgrade(&self.core);
            let session_id = session.id;
            session.scope.set_interval(config.refresh_interval(), move || {
                let core: Weak<MonitorCore> = core.clone();
                async move {
                    if let Some(core) = core.upgrade() {
                        match core.run_pipeline(Some(session_id), FetchKind::Refresh).await {
                            Err(e) if e.is_transient() => tracing::debug!("Auto-refresh failed: {}", e),
                            Err(e) => tracing::warn!("Auto-refresh failed: {}", e),
                            Ok(()) => {}
                        }
                    }
                }
            });
        }

        self.core.run_pipeline(Some(session.id), FetchKind::Activation).await
    }

    /// Tears down the current session and returns what was left registered
    /// in its scope afterwards (empty unless a cleanup leaked).
    pub fn deactivate(&self) -> ResourceCounts {
        let (session, snapshot) = {
            let mut st = lock(&self.core.state);
            let session = st.session.take();
            st.generation += 1;
            st.watches.clear();
            st.watches_pending = false;
            st.last_error = None;
            st.snapshot = BalanceSnapshot {
                fetch_generation: st.generation,
                ..Default::default()
            };
            (session, st.snapshot.clone())
        };
        let Some(session) = session else {
            return ResourceCounts::default();
        };

        session.scope.close();
        self.core.publish(snapshot);
        tracing::info!("Balance session #{} closed", session.id);
        session.scope.resource_counts()
    }

    /// Re-runs the fetch, discovery and pricing pipeline.
    pub async fn refresh(&self) -> Result<()> {
        self.core.run_pipeline(None, FetchKind::Refresh).await
    }

    /// Validates, fetches and merges a user-added token. Zero balances are
    /// kept; tokens already on the seed list or custom list are rejected.
    pub async fn add_custom_token(&self, address: &str) -> Result<TokenBalance> {
        let token = validate_address(address)?;
        let key = address_key(&token);

        let session = {
            let st = lock(&self.core.state);
            let session = st.active_session()?;
            let hidden = st.snapshot.hidden_tokens.contains(&key);
            let seeded = session.fetcher.seed_tokens().contains(&key);
            if st.snapshot.custom_tokens.contains(&key) || (seeded && !hidden) {
                return Err(AppError::TokenAlreadyTracked(key));
            }
            session
        };

        let mut balance = session.fetcher.fetch_token_balance(session.wallet, &key).await?;
        self.core
            .prices
            .value_tokens(
                std::slice::from_mut(&mut balance),
                session.fetcher.network().chain_namespace,
            )
            .await;

        let snapshot = {
            let mut st = lock(&self.core.state);
            if !st.is_current(&session) {
                return Err(AppError::SessionInactive);
            }
            let snapshot = &mut st.snapshot;
            if snapshot.custom_tokens.contains(&key) {
                return Err(AppError::TokenAlreadyTracked(key));
            }
            snapshot.hidden_tokens.retain(|t| t != &key);
            snapshot.custom_tokens.push(key.clone());
            snapshot.tokens.retain(|t| t.address != key);
            snapshot.tokens.push(balance.clone());
            sort_tokens(&mut snapshot.tokens);
            snapshot.clone()
        };
        self.core.publish(snapshot);
        tracing::info!("Custom token {} added", key);
        Ok(balance)
    }

    /// Hides a token from the snapshot and stops watching it. On-chain state
    /// is untouched.
    pub fn remove_token(&self, address: &str) -> Result<()> {
        let key = normalize_address(address);
        if key.is_empty() {
            return Err(AppError::BadRequest("token address is empty".to_string()));
        }

        let (cleanup, snapshot) = {
            let mut st = lock(&self.core.state);
            st.active_session()?;
            let cleanup = st
                .watches
                .iter()
                .position(|(token, _)| *token == key)
                .map(|pos| st.watches.remove(pos).1);
            st.sync_watched_tokens();

            let snapshot = &mut st.snapshot;
            snapshot.custom_tokens.retain(|t| t != &key);
            if !snapshot.hidden_tokens.contains(&key) {
                snapshot.hidden_tokens.push(key.clone());
            }
            snapshot.tokens.retain(|t| t.address != key);
            (cleanup, snapshot.clone())
        };
        if let Some(cleanup) = cleanup {
            cleanup.run();
        }
        self.core.publish(snapshot);
        Ok(())
    }

    pub fn snapshot(&self) -> BalanceSnapshot {
        lock(&self.core.state).snapshot.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BalanceSnapshot> {
        self.core.updates.subscribe()
    }

    /// Registers a snapshot listener owned by the current session; it is
    /// removed when the session ends.
    pub fn add_listener(
        &self,
        listener: impl Fn(&BalanceSnapshot) + Send + Sync + 'static,
    ) -> Result<CleanupHandle> {
        let session = lock(&self.core.state).active_session()?;
        Ok(session.scope.add_listener(&self.core.events, listener))
    }

    pub fn listener_count(&self) -> usize {
        self.core.events.listener_count()
    }

    pub fn is_active(&self) -> bool {
        lock(&self.core.state).active_session().is_ok()
    }

    pub fn resource_counts(&self) -> ResourceCounts {
        lock(&self.core.state)
            .session
            .as_ref()
            .map(|session| session.scope.resource_counts())
            .unwrap_or_default()
    }
}

impl Drop for BalanceMonitor {
    fn drop(&mut self) {
        self.deactivate();
    }
}
