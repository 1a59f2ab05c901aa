// Utility helpers shared by the balance services

use ethers::types::{Address, H256, U256};
use ethers::utils::{format_units, to_checksum};
use std::str::FromStr;

use crate::{
    constants::MAX_DISPLAY_FRACTION_DIGITS,
    error::{AppError, Result},
};

// 10^77 is the largest power of ten that fits in a U256.
const MAX_U256_DECIMALS: usize = 77;

/// Formats a raw on-chain integer for display.
///
/// The integer part is `raw / 10^decimals` with thousands separators; the
/// fractional part is `raw % 10^decimals` zero-padded to `decimals` digits,
/// stripped of trailing zeros and truncated (never rounded) to six digits.
pub fn format_balance(raw: U256, decimals: u8) -> String {
    let decimals = decimals as usize;
    let (whole, fraction) = if decimals > MAX_U256_DECIMALS {
        (U256::zero(), raw)
    } else {
        raw.div_mod(U256::exp10(decimals))
    };

    let whole = group_thousands(&whole.to_string());
    if decimals == 0 {
        return whole;
    }

    let padded = format!("{:0>width$}", fraction.to_string(), width = decimals);
    let shown: String = padded
        .trim_end_matches('0')
        .chars()
        .take(MAX_DISPLAY_FRACTION_DIGITS)
        .collect();
    let shown = shown.trim_end_matches('0');

    if shown.is_empty() {
        whole
    } else {
        format!("{whole}.{shown}")
    }
}

// Internal helper that parses or transforms values for `group_thousands`.
pub fn group_thousands(digits: &str) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (len - index) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Lossy decimal amount, only for fiat valuation.
pub fn token_amount_f64(raw: U256, decimals: u8) -> f64 {
    format_units(raw, decimals as u32)
        .ok()
        .and_then(|text| text.parse::<f64>().ok())
        .unwrap_or(0.0)
}

pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

pub fn address_key(address: &Address) -> String {
    format!("{:#x}", address)
}

/// Validates a `0x`-prefixed 20-byte hex address.
///
/// All-lowercase and all-uppercase inputs are accepted as-is; mixed-case
/// inputs must carry a valid EIP-55 checksum.
pub fn validate_address(input: &str) -> Result<Address> {
    let trimmed = input.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| AppError::InvalidAddress(format!("{trimmed} is missing the 0x prefix")))?;

    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AppError::InvalidAddress(format!(
            "{trimmed} is not a 20-byte hex address"
        )));
    }

    let address = Address::from_str(hex_part)
        .map_err(|e| AppError::InvalidAddress(format!("{trimmed}: {e}")))?;

    let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        let expected = to_checksum(&address, None);
        if expected[2..] != *hex_part {
            return Err(AppError::InvalidAddress(format!(
                "{trimmed} has an invalid checksum"
            )));
        }
    }

    Ok(address)
}

/// Left-pads an address into a 32-byte indexed event topic.
pub fn address_topic(address: Address) -> H256 {
    let mut topic = H256::zero();
    topic.as_bytes_mut()[12..].copy_from_slice(address.as_bytes());
    topic
}

pub fn topic_address(topic: &H256) -> Address {
    Address::from_slice(&topic.as_bytes()[12..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn formats_native_one_and_a_half() {
        // Memastikan 1.5 * 10^18 wei ditampilkan sebagai "1.5"
        let raw = U256::from_dec_str("1500000000000000000").unwrap();
        assert_eq!(format_balance(raw, 18), "1.5");
    }

    #[test]
    fn formats_six_decimal_token() {
        assert_eq!(format_balance(U256::from(1_234_560_u64), 6), "1.23456");
    }

    #[test]
    fn truncates_instead_of_rounding() {
        // 0.9999999 must not round up to 1
        assert_eq!(format_balance(U256::from(9_999_999_u64), 7), "0.999999");
        assert_eq!(format_balance(U256::from(10_000_001_u64), 7), "1");
    }

    #[test]
    fn groups_integer_part() {
        let raw = U256::from_dec_str("1234567890000000").unwrap();
        assert_eq!(format_balance(raw, 6), "1,234,567,890");
        assert_eq!(group_thousands("100"), "100");
        assert_eq!(group_thousands("1000"), "1,000");
    }

    #[test]
    fn zero_and_zero_decimals() {
        assert_eq!(format_balance(U256::zero(), 18), "0");
        assert_eq!(format_balance(U256::from(42_u64), 0), "42");
    }

    #[test]
    fn huge_decimals_do_not_overflow() {
        assert_eq!(format_balance(U256::from(5_u64), 80), "0");
        assert_eq!(format_balance(U256::MAX, 77), "1.15792");
    }

    #[test]
    fn validate_address_accepts_lowercase_and_checksummed() {
        assert!(validate_address("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48").is_ok());
        assert!(validate_address("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48").is_ok());
    }

    #[test]
    fn validate_address_rejects_bad_input() {
        assert!(matches!(
            validate_address("not-an-address"),
            Err(AppError::InvalidAddress(_))
        ));
        assert!(validate_address("0x1234").is_err());
        // one flipped letter breaks the checksum
        assert!(validate_address("0xa0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48").is_err());
    }

    #[test]
    fn topic_round_trips_address() {
        let address = validate_address("0x000000000000000000000000000000000000dEaD").unwrap();
        let topic = address_topic(address);
        assert_eq!(topic.as_bytes()[..12], [0u8; 12]);
        assert_eq!(topic_address(&topic), address);
    }

    proptest! {
        #[test]
        fn formatted_parts_reconstruct_raw(raw in any::<u128>(), decimals in 0u8..=36) {
            let raw = U256::from(raw);
            let formatted = format_balance(raw, decimals);
            let (whole_text, fraction_text) = match formatted.split_once('.') {
                Some((whole, fraction)) => (whole.to_string(), fraction.to_string()),
                None => (formatted.clone(), String::new()),
            };

            let divisor = U256::exp10(decimals as usize);
            let whole = U256::from_dec_str(&whole_text.replace(',', "")).unwrap();
            prop_assert_eq!(whole, raw / divisor);

            let expected = format!(
                "{:0>width$}",
                (raw % divisor).to_string(),
                width = decimals as usize
            );
            let expected = if decimals == 0 { String::new() } else { expected };
            prop_assert!(fraction_text.len() <= MAX_DISPLAY_FRACTION_DIGITS);
            prop_assert!(expected.starts_with(&fraction_text));
        }
    }
}
