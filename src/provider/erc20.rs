use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, Filter, Log, H256, U256};
use ethers::utils::{id, keccak256};

use super::ChainReadProvider;
use crate::{
    error::{AppError, Result},
    utils::{address_topic, topic_address},
};

const TRANSFER_EVENT_SIGNATURE: &str = "Transfer(address,address,uint256)";

/// The read-only ERC-20 views the balance services rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Erc20Read {
    BalanceOf(Address),
    Symbol,
    Name,
    Decimals,
}

impl Erc20Read {
    pub fn signature(&self) -> &'static str {
        match self {
            Erc20Read::BalanceOf(_) => "balanceOf(address)",
            Erc20Read::Symbol => "symbol()",
            Erc20Read::Name => "name()",
            Erc20Read::Decimals => "decimals()",
        }
    }

    pub fn selector(&self) -> [u8; 4] {
        id(self.signature())
    }

    pub fn calldata(&self) -> Bytes {
        let mut data = self.selector().to_vec();
        if let Erc20Read::BalanceOf(owner) = self {
            data.extend(abi::encode(&[Token::Address(*owner)]));
        }
        Bytes::from(data)
    }
}

pub fn transfer_topic() -> H256 {
    H256::from(keccak256(TRANSFER_EVENT_SIGNATURE))
}

/// Transfer logs, optionally narrowed to one emitting contract and to an
/// indexed `from` and/or `to` party.
pub fn transfer_filter(
    token: Option<Address>,
    from: Option<Address>,
    to: Option<Address>,
) -> Filter {
    let mut filter = Filter::new().topic0(transfer_topic());
    if let Some(token) = token {
        filter = filter.address(token);
    }
    if let Some(from) = from {
        filter = filter.topic1(address_topic(from));
    }
    if let Some(to) = to {
        filter = filter.topic2(address_topic(to));
    }
    filter
}

/// `(from, to)` of a Transfer-shaped log.
pub fn transfer_parties(log: &Log) -> Option<(Address, Address)> {
    if log.topics.len() < 3 || log.topics[0] != transfer_topic() {
        return None;
    }
    Some((topic_address(&log.topics[1]), topic_address(&log.topics[2])))
}

pub fn decode_uint(data: &[u8]) -> Result<U256> {
    let tokens = abi::decode(&[ParamType::Uint(256)], data)
        .map_err(|e| AppError::Decode(format!("uint256: {}", e)))?;
    tokens
        .into_iter()
        .next()
        .and_then(Token::into_uint)
        .ok_or_else(|| AppError::Decode("uint256 missing".to_string()))
}

pub fn decode_decimals(data: &[u8]) -> Result<u8> {
    let value = decode_uint(data)?;
    if value > U256::from(u8::MAX) {
        return Err(AppError::Decode(format!("decimals out of range: {}", value)));
    }
    Ok(value.low_u32() as u8)
}

/// Decodes an ABI `string`, falling back to the legacy `bytes32` encoding
/// some older tokens use for `symbol()`/`name()`.
pub fn decode_text(data: &[u8]) -> Result<String> {
    if let Ok(tokens) = abi::decode(&[ParamType::String], data) {
        if let Some(Token::String(text)) = tokens.into_iter().next() {
            return Ok(text);
        }
    }

    if data.len() == 32 {
        let trimmed: Vec<u8> = data.iter().copied().take_while(|b| *b != 0).collect();
        if let Ok(text) = String::from_utf8(trimmed) {
            if !text.is_empty() {
                return Ok(text);
            }
        }
    }

    Err(AppError::Decode("string or bytes32 expected".to_string()))
}

pub async fn balance_of(
    provider: &dyn ChainReadProvider,
    token: Address,
    owner: Address,
) -> Result<U256> {
    let data = provider
        .call(token, Erc20Read::BalanceOf(owner).calldata())
        .await?;
    decode_uint(&data)
}

pub async fn symbol(provider: &dyn ChainReadProvider, token: Address) -> Result<String> {
    let data = provider.call(token, Erc20Read::Symbol.calldata()).await?;
    decode_text(&data)
}

pub async fn name(provider: &dyn ChainReadProvider, token: Address) -> Result<String> {
    let data = provider.call(token, Erc20Read::Name.calldata()).await?;
    decode_text(&data)
}

pub async fn decimals(provider: &dyn ChainReadProvider, token: Address) -> Result<u8> {
    let data = provider.call(token, Erc20Read::Decimals.calldata()).await?;
    decode_decimals(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TRANSFER_EVENT_TOPIC;
    use std::str::FromStr;

    #[test]
    fn transfer_topic_matches_constant() {
        assert_eq!(transfer_topic(), H256::from_str(TRANSFER_EVENT_TOPIC).unwrap());
    }

    #[test]
    fn balance_of_calldata_is_selector_plus_owner() {
        // Memastikan calldata balanceOf = selector 4 byte + alamat 32 byte
        let owner = Address::from_low_u64_be(0xbeef);
        let data = Erc20Read::BalanceOf(owner).calldata();
        assert_eq!(data.len(), 36);
        assert_eq!(&data[..4], &[0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(&data[16..], owner.as_bytes());
    }

    #[test]
    fn decode_text_handles_string_and_bytes32() {
        let encoded = abi::encode(&[Token::String("USDC".to_string())]);
        assert_eq!(decode_text(&encoded).unwrap(), "USDC");

        let mut legacy = [0u8; 32];
        legacy[..3].copy_from_slice(b"MKR");
        assert_eq!(decode_text(&legacy).unwrap(), "MKR");

        assert!(decode_text(&[]).is_err());
    }

    #[test]
    fn decode_decimals_rejects_out_of_range() {
        let ok = abi::encode(&[Token::Uint(U256::from(6))]);
        assert_eq!(decode_decimals(&ok).unwrap(), 6);
        let too_big = abi::encode(&[Token::Uint(U256::from(300))]);
        assert!(decode_decimals(&too_big).is_err());
    }

    #[test]
    fn transfer_parties_reads_indexed_topics() {
        let from = Address::from_low_u64_be(1);
        let to = Address::from_low_u64_be(2);
        let log = Log {
            topics: vec![transfer_topic(), address_topic(from), address_topic(to)],
            ..Default::default()
        };
        assert_eq!(transfer_parties(&log), Some((from, to)));

        let approval = Log {
            topics: vec![H256::zero(), address_topic(from), address_topic(to)],
            ..Default::default()
        };
        assert_eq!(transfer_parties(&approval), None);
    }
}
