// Fiat price resolution with a TTL cache and a static fallback table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::time::Duration;

use crate::{
    constants::{
        DEFAULT_FALLBACK_YIELD_PERCENT, MAX_ANNUAL_YIELD_PERCENT, PRICE_CACHE_TTL_SECS,
        PRICE_HTTP_TIMEOUT_SECS, SECONDS_PER_YEAR, UNKNOWN_TOKEN_SYMBOL,
    },
    error::{AppError, Result},
    models::TokenBalance,
};

// Internal helper that normalizes symbols for price lookups.
pub fn normalize_symbol(token: &str) -> String {
    token.trim().to_ascii_uppercase()
}

// Internal helper that supports alias candidates (WETH <-> ETH).
pub fn symbol_candidates_for(token: &str) -> Vec<String> {
    let symbol = normalize_symbol(token);
    let underlying = match symbol.as_str() {
        "WETH" => Some("ETH"),
        "WBTC" => Some("BTC"),
        "WPOL" | "WMATIC" => Some("POL"),
        _ => None,
    };
    match underlying {
        Some(base) => vec![symbol, base.to_string()],
        None => vec![symbol],
    }
}

// Internal helper that provides deterministic fallback prices.
pub fn fallback_price_for(token: &str) -> f64 {
    symbol_candidates_for(token)
        .iter()
        .map(|symbol| match symbol.as_str() {
            "BTC" => 65_000.0,
            "ETH" => 1_900.0,
            "USDT" | "USDC" | "DAI" => 1.0,
            "POL" | "MATIC" => 0.4,
            "LINK" => 14.0,
            "UNI" => 7.0,
            _ => 0.0,
        })
        .find(|price| *price > 0.0)
        .unwrap_or(0.0)
}

// Internal helper that provides fallback staking yields (percent per year).
pub fn fallback_yield_for(token: &str) -> Option<f64> {
    symbol_candidates_for(token)
        .iter()
        .find_map(|symbol| match symbol.as_str() {
            "USDT" | "USDC" | "DAI" => Some(5.0),
            "ETH" => Some(4.0),
            "POL" => Some(6.0),
            _ => None,
        })
}

// Internal helper that returns sane min/max USD bounds for known assets.
fn bounds_for(token: &str) -> (f64, f64) {
    let symbol = symbol_candidates_for(token).pop().unwrap_or_default();
    match symbol.as_str() {
        "USDT" | "USDC" | "DAI" => (0.5, 2.0),
        "ETH" => (10.0, 100_000.0),
        "BTC" => (1_000.0, 1_000_000.0),
        _ => (0.000_000_01, 1_000_000.0),
    }
}

// Internal helper that validates a raw USD price.
pub fn sanitize_price_usd(token: &str, value: f64) -> Option<f64> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    let (min, max) = bounds_for(token);
    if value < min || value > max {
        return None;
    }
    Some(value)
}

/// Cache key: chain namespace plus lower-cased symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PriceKey {
    pub chain_namespace: String,
    pub symbol: String,
}

impl PriceKey {
    pub fn new(chain_namespace: &str, symbol: &str) -> Self {
        Self {
            chain_namespace: chain_namespace.trim().to_ascii_lowercase(),
            symbol: symbol.trim().to_ascii_lowercase(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceCacheEntry {
    pub price: f64,
    pub observed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PriceCacheEntry {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for deterministic expiry checks.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// get / set-with-TTL price storage.
pub trait PriceCache: Send + Sync {
    fn entry(&self, key: &PriceKey) -> Option<PriceCacheEntry>;

    fn set(&self, key: PriceKey, price: f64, ttl: Duration);

    /// Price of a still-valid entry.
    fn get(&self, key: &PriceKey) -> Option<f64>;
}

pub struct InMemoryPriceCache {
    entries: RwLock<HashMap<PriceKey, PriceCacheEntry>>,
    clock: Arc<dyn Clock>,
}

static SHARED_PRICE_CACHE: OnceLock<Arc<InMemoryPriceCache>> = OnceLock::new();

impl InMemoryPriceCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Process-wide cache shared by every oracle built with `PriceOracle::new`.
    pub fn shared() -> Arc<InMemoryPriceCache> {
        SHARED_PRICE_CACHE
            .get_or_init(|| Arc::new(InMemoryPriceCache::new()))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryPriceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceCache for InMemoryPriceCache {
    fn entry(&self, key: &PriceKey) -> Option<PriceCacheEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }

    fn set(&self, key: PriceKey, price: f64, ttl: Duration) {
        let observed_at = self.clock.now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        let entry = PriceCacheEntry {
            price,
            observed_at,
            expires_at: observed_at + ttl,
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, entry);
    }

    fn get(&self, key: &PriceKey) -> Option<f64> {
        let now = self.clock.now();
        self.entry(key)
            .filter(|entry| entry.is_valid_at(now))
            .map(|entry| entry.price)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSearchHit {
    pub symbol: String,
    pub address: String,
}

/// Remote symbol-search and per-token price endpoints.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn search_tokens(&self, symbol: &str, chain_namespace: &str) -> Result<Vec<TokenSearchHit>>;

    async fn token_price(&self, chain_namespace: &str, token_address: &str) -> Result<Option<f64>>;
}

/// GeckoTerminal-style HTTP price source.
pub struct HttpPriceSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPriceSource {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(PRICE_HTTP_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    // Internal helper that fetches data for `get_json`.
    async fn get_json(&self, url: url::Url) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(url.clone())
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| AppError::ExternalAPI(format!("GET {} failed: {}", url.path(), e)))?;
        if !response.status().is_success() {
            return Err(AppError::ExternalAPI(format!(
                "GET {} returned {}",
                url.path(),
                response.status()
            )));
        }
        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| AppError::ExternalAPI(format!("Invalid JSON from {}: {}", url.path(), e)))
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn search_tokens(&self, symbol: &str, chain_namespace: &str) -> Result<Vec<TokenSearchHit>> {
        let url = url::Url::parse_with_params(
            &format!("{}/search/pools", self.base_url),
            &[("query", symbol), ("network", chain_namespace)],
        )
        .map_err(|e| AppError::Internal(format!("Invalid price API URL: {}", e)))?;
        let payload = self.get_json(url).await?;
        Ok(parse_search_hits(&payload))
    }

    async fn token_price(&self, chain_namespace: &str, token_address: &str) -> Result<Option<f64>> {
        let address = token_address.trim().to_ascii_lowercase();
        let url = url::Url::parse(&format!(
            "{}/simple/networks/{}/token_price/{}",
            self.base_url, chain_namespace, address
        ))
        .map_err(|e| AppError::Internal(format!("Invalid price API URL: {}", e)))?;
        let payload = self.get_json(url).await?;
        Ok(parse_token_price(&payload, &address))
    }
}

// Internal helper that supports `json_as_f64` operations.
fn json_as_f64(value: &serde_json::Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_i64().map(|v| v as f64))
        .or_else(|| value.as_u64().map(|v| v as f64))
        .or_else(|| value.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
}

/// Reads `(base symbol, base token address)` pairs out of a pool search
/// payload. Pool names look like `"WETH / USDC"`; token ids like
/// `"eth_0xc02a..."`.
pub fn parse_search_hits(payload: &serde_json::Value) -> Vec<TokenSearchHit> {
    let Some(items) = payload.get("data").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let name = item
                .get("attributes")
                .and_then(|attrs| attrs.get("name"))
                .and_then(|v| v.as_str())?;
            let token_id = item
                .get("relationships")
                .and_then(|rel| rel.get("base_token"))
                .and_then(|base| base.get("data"))
                .and_then(|data| data.get("id"))
                .and_then(|v| v.as_str())?;
            let address = token_id.rsplit('_').next()?.trim().to_ascii_lowercase();
            if !address.starts_with("0x") {
                return None;
            }
            let symbol = name.split('/').next()?.trim().to_string();
            Some(TokenSearchHit { symbol, address })
        })
        .collect()
}

pub fn parse_token_price(payload: &serde_json::Value, token_address: &str) -> Option<f64> {
    let prices = payload
        .get("data")
        .and_then(|data| data.get("attributes"))
        .and_then(|attrs| attrs.get("token_prices"))
        .and_then(|v| v.as_object())?;
    prices
        .iter()
        .find(|(address, _)| address.eq_ignore_ascii_case(token_address))
        .and_then(|(_, value)| json_as_f64(value))
}

/// Resolves fiat unit prices: cache, then remote lookup, then the static
/// fallback table, then zero. Never fails.
pub struct PriceOracle {
    source: Arc<dyn PriceSource>,
    cache: Arc<dyn PriceCache>,
    ttl: Duration,
}

impl PriceOracle {
    pub fn new(source: Arc<dyn PriceSource>) -> Self {
        Self {
            source,
            cache: InMemoryPriceCache::shared(),
            ttl: Duration::from_secs(PRICE_CACHE_TTL_SECS),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn PriceCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fetches data for `get_price`.
    ///
    /// # Arguments
    /// * `symbol` - token symbol, any case.
    /// * `chain_namespace` - price API network namespace (`eth`, `base`, ...).
    ///
    /// # Returns
    /// * Fiat unit price, `0.0` when neither the remote lookup nor the
    ///   fallback table knows the symbol.
    ///
    /// # Notes
    /// * Remote prices are cached for the full TTL, fallback prices for half
    ///   of it. Zero is never cached.
    pub async fn get_price(&self, symbol: &str, chain_namespace: &str) -> f64 {
        let key = PriceKey::new(chain_namespace, symbol);
        if let Some(price) = self.cache.get(&key) {
            return price;
        }

        match self.fetch_remote_price(symbol, chain_namespace).await {
            Ok(Some(price)) => {
                self.cache.set(key, price, self.ttl);
                return price;
            }
            Ok(None) => {
                tracing::debug!("No remote price for {} on {}", symbol, chain_namespace);
            }
            Err(e) => {
                tracing::warn!("Price lookup failed for {} on {}: {}", symbol, chain_namespace, e);
            }
        }

        let fallback = fallback_price_for(symbol);
        if fallback > 0.0 {
            self.cache.set(key, fallback, self.ttl / 2);
        }
        fallback
    }

    // Internal helper that fetches data for `fetch_remote_price`.
    async fn fetch_remote_price(&self, symbol: &str, chain_namespace: &str) -> Result<Option<f64>> {
        let hits = self.source.search_tokens(symbol, chain_namespace).await?;
        let wanted = normalize_symbol(symbol);
        let Some(hit) = hits
            .iter()
            .find(|hit| normalize_symbol(&hit.symbol) == wanted)
            .or_else(|| hits.first())
        else {
            return Ok(None);
        };

        let price = self.source.token_price(chain_namespace, &hit.address).await?;
        Ok(price.and_then(|value| sanitize_price_usd(symbol, value)))
    }

    /// Annualized staking yield in percent.
    ///
    /// Per-second emission is extrapolated to a year, valued at the reward
    /// token's price and divided by the staked fiat value. Capped at 1000%.
    pub async fn compute_annual_yield_rate(
        &self,
        reward_rate_per_second: f64,
        reward_period_seconds: f64,
        reward_symbol: &str,
        total_staked_usd: f64,
        chain_namespace: &str,
    ) -> f64 {
        if !reward_rate_per_second.is_finite() || reward_rate_per_second <= 0.0 {
            return 0.0;
        }

        let price = self.get_price(reward_symbol, chain_namespace).await;
        if price <= 0.0 {
            return fallback_yield_for(reward_symbol).unwrap_or(DEFAULT_FALLBACK_YIELD_PERCENT);
        }
        if !total_staked_usd.is_finite() || total_staked_usd <= 0.0 {
            return MAX_ANNUAL_YIELD_PERCENT;
        }

        let per_year = if reward_period_seconds.is_finite() && reward_period_seconds > 0.0 {
            let per_period = reward_rate_per_second * reward_period_seconds;
            per_period * (SECONDS_PER_YEAR / reward_period_seconds)
        } else {
            reward_rate_per_second * SECONDS_PER_YEAR
        };

        let apy = per_year * price / total_staked_usd * 100.0;
        if apy.is_finite() {
            apy.min(MAX_ANNUAL_YIELD_PERCENT)
        } else {
            MAX_ANNUAL_YIELD_PERCENT
        }
    }

    /// Fills `balance_usd` for every token, one lookup per distinct symbol.
    /// Tokens whose symbol could not be read stay unpriced.
    pub async fn value_tokens(&self, tokens: &mut [TokenBalance], chain_namespace: &str) {
        let mut symbols: Vec<String> = tokens
            .iter()
            .filter(|t| has_priceable_symbol(t))
            .map(|t| normalize_symbol(&t.symbol))
            .collect();
        symbols.sort();
        symbols.dedup();

        let prices = join_all(
            symbols
                .iter()
                .map(|symbol| self.get_price(symbol, chain_namespace)),
        )
        .await;
        let by_symbol: HashMap<&str, f64> = symbols
            .iter()
            .map(String::as_str)
            .zip(prices)
            .collect();

        for token in tokens.iter_mut() {
            if !has_priceable_symbol(token) {
                token.balance_usd = None;
                continue;
            }
            let price = by_symbol
                .get(normalize_symbol(&token.symbol).as_str())
                .copied()
                .unwrap_or(0.0);
            token.apply_price(price);
        }
    }
}

// Internal helper that supports `has_priceable_symbol` operations.
fn has_priceable_symbol(token: &TokenBalance) -> bool {
    let symbol = token.symbol.trim();
    !symbol.is_empty() && symbol != UNKNOWN_TOKEN_SYMBOL
}
