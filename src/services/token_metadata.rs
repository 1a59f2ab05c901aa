use ethers::types::Address;

use crate::{
    constants::{known_token, DEFAULT_TOKEN_DECIMALS, UNKNOWN_TOKEN_NAME, UNKNOWN_TOKEN_SYMBOL},
    models::TokenMetadata,
    provider::{erc20, ChainReadProvider},
    utils::address_key,
};

/// Static-table-first ERC-20 metadata lookups. Unknown tokens are read from
/// the contract on every call; failures degrade to placeholders.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenMetadataResolver;

impl TokenMetadataResolver {
    pub fn new() -> Self {
        Self
    }

    pub async fn get_symbol(&self, token: Address, provider: &dyn ChainReadProvider) -> String {
        if let Some(known) = known_token(&address_key(&token)) {
            return known.symbol.to_string();
        }
        match erc20::symbol(provider, token).await {
            Ok(symbol) if !symbol.trim().is_empty() => symbol.trim().to_string(),
            Ok(_) => UNKNOWN_TOKEN_SYMBOL.to_string(),
            Err(e) => {
                tracing::debug!("symbol() failed for {}: {}", address_key(&token), e);
                UNKNOWN_TOKEN_SYMBOL.to_string()
            }
        }
    }

    pub async fn get_name(&self, token: Address, provider: &dyn ChainReadProvider) -> String {
        if let Some(known) = known_token(&address_key(&token)) {
            return known.name.to_string();
        }
        match erc20::name(provider, token).await {
            Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
            Ok(_) => UNKNOWN_TOKEN_NAME.to_string(),
            Err(e) => {
                tracing::debug!("name() failed for {}: {}", address_key(&token), e);
                UNKNOWN_TOKEN_NAME.to_string()
            }
        }
    }

    pub async fn get_decimals(&self, token: Address, provider: &dyn ChainReadProvider) -> u8 {
        if let Some(known) = known_token(&address_key(&token)) {
            return known.decimals;
        }
        erc20::decimals(provider, token).await.unwrap_or_else(|e| {
            tracing::debug!("decimals() failed for {}: {}", address_key(&token), e);
            DEFAULT_TOKEN_DECIMALS
        })
    }

    /// Resolves all three attributes concurrently.
    pub async fn resolve(&self, token: Address, provider: &dyn ChainReadProvider) -> TokenMetadata {
        let (symbol, name, decimals) = tokio::join!(
            self.get_symbol(token, provider),
            self.get_name(token, provider),
            self.get_decimals(token, provider),
        );
        TokenMetadata {
            address: address_key(&token),
            symbol,
            name,
            decimals,
            logo_uri: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::{addr, MockProvider};
    use crate::utils::validate_address;

    #[tokio::test]
    async fn known_token_is_served_without_calls() {
        // Memastikan token yang dikenal tidak memicu panggilan kontrak
        let provider = MockProvider::new();
        let usdc = validate_address("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48").unwrap();
        let meta = TokenMetadataResolver::new().resolve(usdc, provider.as_ref()).await;

        assert_eq!(meta.symbol, "USDC");
        assert_eq!(meta.decimals, 6);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn unknown_token_is_read_from_contract_each_time() {
        let provider = MockProvider::new();
        let token = addr(0x77);
        provider.add_token(token, "PEPE", "Pepe", 9);
        let resolver = TokenMetadataResolver::new();

        assert_eq!(resolver.get_symbol(token, provider.as_ref()).await, "PEPE");
        assert_eq!(resolver.get_symbol(token, provider.as_ref()).await, "PEPE");
        assert_eq!(resolver.get_decimals(token, provider.as_ref()).await, 9);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn failures_fall_back_to_placeholders() {
        let provider = MockProvider::new();
        let bare = addr(0x88);
        provider.add_bare_token(bare);
        let meta = TokenMetadataResolver::new().resolve(bare, provider.as_ref()).await;

        assert_eq!(meta.symbol, UNKNOWN_TOKEN_SYMBOL);
        assert_eq!(meta.name, UNKNOWN_TOKEN_NAME);
        assert_eq!(meta.decimals, DEFAULT_TOKEN_DECIMALS);
        assert_eq!(meta.address, address_key(&bare));
    }
}
