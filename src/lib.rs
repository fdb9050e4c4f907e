// =============================================================================
// SATKAS - Kaspa <-> Lightning atomic swaps
// =============================================================================
//
// Core library: address codec, script assembler and interpreter, HTLC
// contracts, transaction signing hash, and the swap lifecycle. The Kaspa
// node and the Lightning node are reached through the `ChainClient` and
// `InvoiceClient` traits.
//
// =============================================================================

pub mod address;
pub mod atomic_swaps;
pub mod bolt11;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod crypto;
pub mod funding;
pub mod hashes;
pub mod invoice;
pub mod sighash;
pub mod storage;
pub mod transaction;
pub mod wallet;

use std::time::{SystemTime, UNIX_EPOCH};

// --- Unidades ---
pub const SOMPI_PER_KAS: u64 = 100_000_000;

/// Flat fee of a contract spend, in sompi
pub const DEFAULT_FEE: u64 = 100_000;

/// Extra KAS the taker asks the maker to lock on top of the quoted amount
pub const FUNDING_MARGIN: u64 = SOMPI_PER_KAS / 1000;

// --- Utilidades ---

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn format_sompi(sompi: u64) -> String {
    let whole = sompi / SOMPI_PER_KAS;
    let frac = sompi % SOMPI_PER_KAS;
    if frac == 0 {
        format!("{}", whole)
    } else {
        let digits = format!("{:08}", frac);
        format!("{}.{}", whole, digits.trim_end_matches('0'))
    }
}

/// Parses a KAS amount like "1.5" into sompi
pub fn parse_kas(amount: &str) -> Result<u64, String> {
    let amount = amount.trim();
    let (whole, frac) = amount.split_once('.').unwrap_or((amount, ""));
    if frac.len() > 8 || (whole.is_empty() && frac.is_empty()) {
        return Err(format!("Invalid KAS amount: {}", amount));
    }
    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| format!("Invalid KAS amount: {}", amount))?
    };
    let frac: u64 = if frac.is_empty() {
        0
    } else {
        format!("{:0<8}", frac)
            .parse()
            .map_err(|_| format!("Invalid KAS amount: {}", amount))?
    };
    whole
        .checked_mul(SOMPI_PER_KAS)
        .and_then(|w| w.checked_add(frac))
        .ok_or_else(|| format!("KAS amount too large: {}", amount))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_sompi() {
        assert_eq!(format_sompi(0), "0");
        assert_eq!(format_sompi(3 * SOMPI_PER_KAS), "3");
        assert_eq!(format_sompi(150_000_000), "1.5");
        assert_eq!(format_sompi(100_000), "0.001");
    }

    #[test]
    fn test_parse_kas() {
        assert_eq!(parse_kas("1.5").unwrap(), 150_000_000);
        assert_eq!(parse_kas("0.001").unwrap(), FUNDING_MARGIN);
        assert_eq!(parse_kas("2").unwrap(), 2 * SOMPI_PER_KAS);
        assert!(parse_kas("0.123456789").is_err());
        assert!(parse_kas("abc").is_err());
        assert!(parse_kas(".").is_err());
        assert!(parse_kas("-1").is_err());
    }
}
