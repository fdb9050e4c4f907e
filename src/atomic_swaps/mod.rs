// =============================================================================
// SATKAS - Atomic Swaps (Lightning <-> Kaspa)
// =============================================================================
//
// Both sides of a swap derive the same HTLC contract from a Lightning
// invoice and the two parties' Kaspa addresses:
//
// 1. The KAS seller locks funds in the p2sh contract address
// 2. The KAS buyer pays the invoice and learns the preimage R
// 3. The buyer redeems the contract with R before the timelock
// 4. Otherwise the seller refunds once the timelock has passed
//
// The invoice's payment hash is the contract's secret hash, and its expiry
// is the contract's timelock. Nothing is negotiated beyond the addresses.
//
// =============================================================================

pub mod engine;
pub mod htlc_script;
pub mod protocol;
pub mod swap;


pub use engine::{RetryPolicy, SwapEngine, SwapParties};
pub use htlc_script::{
    contract_address, full_script, short_script, spend_script, verify_contract_address, ContractParameters,
    ContractVariant, ShortContractParameters, SpendPath,
};
pub use protocol::{hello, sign_message, verify_message, SignedMessage};
pub use swap::{Role, SpendKind, SwapError, SwapRecord, SwapState, SwapStatus, SwapType};

use crate::hashes::sha256;

/// Secret/preimage size in bytes
pub const SECRET_SIZE: usize = 32;

pub const HASH_SIZE: usize = crate::hashes::HASH_SIZE;

// =============================================================================
// Secrets
// =============================================================================

pub fn generate_secret() -> [u8; SECRET_SIZE] {
    rand::random()
}

/// Lightning payment hashes are SHA256 of the preimage
pub fn hash_secret(secret: &[u8; SECRET_SIZE]) -> [u8; HASH_SIZE] {
    sha256(secret)
}

pub fn verify_secret(secret: &[u8; SECRET_SIZE], hash: &[u8; HASH_SIZE]) -> bool {
    &hash_secret(secret) == hash
}

/// Parses a hex preimage, rejecting anything that is not 32 bytes
pub fn parse_secret(hex_secret: &str) -> Result<[u8; SECRET_SIZE], SwapError> {
    let bytes = hex::decode(hex_secret.trim()).map_err(|e| SwapError::InvalidSecret(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| SwapError::InvalidSecret(format!("expected {} bytes, got {}", SECRET_SIZE, b.len())))
}

// =============================================================================
// Tests
// =============================================================================
