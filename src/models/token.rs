use ethers::types::U256;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{NetworkProfile, NATIVE_TOKEN_ADDRESS, NATIVE_TOKEN_DECIMALS},
    utils::{format_balance, token_amount_f64},
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenMetadata {
    pub address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub logo_uri: Option<String>,
}

/// One wallet holding. `formatted_balance` is always derived from
/// `raw_balance` and `decimals`; use `set_raw_balance` to change the amount.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenBalance {
    pub address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub raw_balance: U256,
    pub formatted_balance: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,
}

impl TokenBalance {
    pub fn from_metadata(metadata: TokenMetadata, raw_balance: U256) -> Self {
        Self {
            formatted_balance: format_balance(raw_balance, metadata.decimals),
            address: metadata.address,
            symbol: metadata.symbol,
            name: metadata.name,
            decimals: metadata.decimals,
            raw_balance,
            balance_usd: None,
            logo_uri: metadata.logo_uri,
        }
    }

    pub fn native(network: &NetworkProfile, raw_balance: U256) -> Self {
        Self::from_metadata(
            TokenMetadata {
                address: NATIVE_TOKEN_ADDRESS.to_string(),
                symbol: network.native_symbol.to_string(),
                name: network.native_name.to_string(),
                decimals: NATIVE_TOKEN_DECIMALS,
                logo_uri: None,
            },
            raw_balance,
        )
    }

    pub fn is_native(&self) -> bool {
        self.address == NATIVE_TOKEN_ADDRESS
    }

    pub fn is_zero(&self) -> bool {
        self.raw_balance.is_zero()
    }

    pub fn set_raw_balance(&mut self, raw_balance: U256) {
        self.raw_balance = raw_balance;
        self.formatted_balance = format_balance(raw_balance, self.decimals);
        self.balance_usd = None;
    }

    pub fn amount(&self) -> f64 {
        token_amount_f64(self.raw_balance, self.decimals)
    }

    pub fn apply_price(&mut self, unit_price: f64) {
        self.balance_usd = if unit_price.is_finite() && unit_price > 0.0 {
            Some(self.amount() * unit_price)
        } else {
            None
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::network_profile;

    fn usdc(raw: u64) -> TokenBalance {
        TokenBalance::from_metadata(
            TokenMetadata {
                address: "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48".to_string(),
                symbol: "USDC".to_string(),
                name: "USD Coin".to_string(),
                decimals: 6,
                logo_uri: None,
            },
            U256::from(raw),
        )
    }

    #[test]
    fn formatted_balance_follows_raw_balance() {
        // Memastikan formatted_balance selalu diturunkan dari raw_balance
        let mut balance = usdc(1_234_560);
        assert_eq!(balance.formatted_balance, "1.23456");
        balance.set_raw_balance(U256::from(2_000_000_u64));
        assert_eq!(balance.formatted_balance, "2");
    }

    #[test]
    fn apply_price_values_holding() {
        let mut balance = usdc(2_500_000);
        balance.apply_price(1.0);
        assert_eq!(balance.balance_usd, Some(2.5));
        balance.apply_price(0.0);
        assert_eq!(balance.balance_usd, None);
    }

    #[test]
    fn native_uses_sentinel_address() {
        let network = network_profile(1).unwrap();
        let native = TokenBalance::native(network, U256::exp10(18));
        assert!(native.is_native());
        assert_eq!(native.symbol, "ETH");
        assert_eq!(native.formatted_balance, "1");
    }
}
