/// Application constants

// Sentinel used as `TokenBalance::address` for the chain's base asset.
pub const NATIVE_TOKEN_ADDRESS: &str = "native";
pub const NATIVE_TOKEN_DECIMALS: u8 = 18;

// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_EVENT_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

// Balance fetching
pub const BALANCE_BATCH_SIZE: usize = 10;
pub const MAX_DISPLAY_FRACTION_DIGITS: usize = 6;
pub const DEFAULT_TOKEN_DECIMALS: u8 = 18;
pub const UNKNOWN_TOKEN_SYMBOL: &str = "UNKNOWN";
pub const UNKNOWN_TOKEN_NAME: &str = "Unknown Token";

// Live watching
pub const MAX_WATCHED_TOKENS: usize = 10;

// Price oracle
pub const PRICE_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_PRICE_API_URL: &str = "https://api.geckoterminal.com/api/v2";
pub const PRICE_HTTP_TIMEOUT_SECS: u64 = 8;

// Yield estimation
pub const SECONDS_PER_YEAR: f64 = 31_536_000.0;
pub const MAX_ANNUAL_YIELD_PERCENT: f64 = 1_000.0;
pub const DEFAULT_FALLBACK_YIELD_PERCENT: f64 = 8.0;

// Orchestration defaults
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_DISCOVERY_BLOCK_WINDOW: u64 = 10_000;
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownToken {
    pub address: &'static str,
    pub symbol: &'static str,
    pub name: &'static str,
    pub decimals: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkProfile {
    pub chain_id: u64,
    pub name: &'static str,
    /// Namespace used by the price endpoints (`eth`, `base`, ...).
    pub chain_namespace: &'static str,
    pub native_symbol: &'static str,
    pub native_name: &'static str,
    pub seed_tokens: &'static [&'static str],
}

// Known token table, keyed by lower-cased contract address.
pub const KNOWN_TOKENS: &[KnownToken] = &[
    // Ethereum mainnet
    KnownToken {
        address: "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
        symbol: "USDC",
        name: "USD Coin",
        decimals: 6,
    },
    KnownToken {
        address: "0xdac17f958d2ee523a2206206994597c13d831ec7",
        symbol: "USDT",
        name: "Tether USD",
        decimals: 6,
    },
    KnownToken {
        address: "0x6b175474e89094c44da98b954eedeac495271d0f",
        symbol: "DAI",
        name: "Dai Stablecoin",
        decimals: 18,
    },
    KnownToken {
        address: "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2",
        symbol: "WETH",
        name: "Wrapped Ether",
        decimals: 18,
    },
    KnownToken {
        address: "0x2260fac5e5542a773aa44fbcfedf7c193bc2c599",
        symbol: "WBTC",
        name: "Wrapped BTC",
        decimals: 8,
    },
    KnownToken {
        address: "0x514910771af9ca656af840dff83e8264ecf986ca",
        symbol: "LINK",
        name: "ChainLink Token",
        decimals: 18,
    },
    KnownToken {
        address: "0x1f9840a85d5af5bf1d1762f925bdaddc4201f984",
        symbol: "UNI",
        name: "Uniswap",
        decimals: 18,
    },
    // Base
    KnownToken {
        address: "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913",
        symbol: "USDC",
        name: "USD Coin",
        decimals: 6,
    },
    KnownToken {
        address: "0x4200000000000000000000000000000000000006",
        symbol: "WETH",
        name: "Wrapped Ether",
        decimals: 18,
    },
    KnownToken {
        address: "0x50c5725949a6f0c72e6c4a641f24049a917db0cb",
        symbol: "DAI",
        name: "Dai Stablecoin",
        decimals: 18,
    },
    // Polygon PoS
    KnownToken {
        address: "0x3c499c542cef5e3811e1192ce70d8cc03d5c3359",
        symbol: "USDC",
        name: "USD Coin",
        decimals: 6,
    },
    KnownToken {
        address: "0xc2132d05d31c914a87c6611c10748aeb04b58e8f",
        symbol: "USDT",
        name: "Tether USD",
        decimals: 6,
    },
    KnownToken {
        address: "0x7ceb23fd6bc0add59e62ac25578270cff1b9f619",
        symbol: "WETH",
        name: "Wrapped Ether",
        decimals: 18,
    },
    KnownToken {
        address: "0x0d500b1d8e8ef31e21c99d1db9a6444d3adf1270",
        symbol: "WPOL",
        name: "Wrapped Polygon Ecosystem Token",
        decimals: 18,
    },
];

pub const NETWORKS: &[NetworkProfile] = &[
    NetworkProfile {
        chain_id: 1,
        name: "Ethereum",
        chain_namespace: "eth",
        native_symbol: "ETH",
        native_name: "Ether",
        seed_tokens: &[
            "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
            "0xdac17f958d2ee523a2206206994597c13d831ec7",
            "0x6b175474e89094c44da98b954eedeac495271d0f",
            "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2",
            "0x2260fac5e5542a773aa44fbcfedf7c193bc2c599",
            "0x514910771af9ca656af840dff83e8264ecf986ca",
            "0x1f9840a85d5af5bf1d1762f925bdaddc4201f984",
        ],
    },
    NetworkProfile {
        chain_id: 8453,
        name: "Base",
        chain_namespace: "base",
        native_symbol: "ETH",
        native_name: "Ether",
        seed_tokens: &[
            "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913",
            "0x4200000000000000000000000000000000000006",
            "0x50c5725949a6f0c72e6c4a641f24049a917db0cb",
        ],
    },
    NetworkProfile {
        chain_id: 137,
        name: "Polygon",
        chain_namespace: "polygon_pos",
        native_symbol: "POL",
        native_name: "Polygon Ecosystem Token",
        seed_tokens: &[
            "0x3c499c542cef5e3811e1192ce70d8cc03d5c3359",
            "0xc2132d05d31c914a87c6611c10748aeb04b58e8f",
            "0x7ceb23fd6bc0add59e62ac25578270cff1b9f619",
            "0x0d500b1d8e8ef31e21c99d1db9a6444d3adf1270",
        ],
    },
];

pub fn known_token(address: &str) -> Option<&'static KnownToken> {
    let lower = address.trim().to_ascii_lowercase();
    KNOWN_TOKENS.iter().find(|token| token.address == lower)
}

pub fn network_profile(chain_id: u64) -> Option<&'static NetworkProfile> {
    NETWORKS.iter().find(|network| network.chain_id == chain_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_token_lookup_ignores_case() {
        let token = known_token("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48").unwrap();
        assert_eq!(token.symbol, "USDC");
        assert_eq!(token.decimals, 6);
    }

    #[test]
    fn every_seed_token_is_known() {
        // Memastikan seed list selalu punya metadata statis
        for network in NETWORKS {
            for seed in network.seed_tokens {
                assert!(known_token(seed).is_some(), "missing metadata for {}", seed);
            }
        }
    }

    #[test]
    fn unknown_network_is_none() {
        assert!(network_profile(424242).is_none());
        assert_eq!(network_profile(8453).map(|n| n.chain_namespace), Some("base"));
    }
}
