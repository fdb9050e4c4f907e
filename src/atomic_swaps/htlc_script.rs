// =============================================================================
// SATKAS - HTLC Contract Scripts
// =============================================================================
//
// Full contract (default):
//
// OP_IF
//     OP_SIZE 20 OP_EQUALVERIFY                  secret must be 32 bytes
//     OP_SHA256 <secret_hash> OP_EQUALVERIFY
//     OP_DUP OP_BLAKE2B <receiver_pubkey_hash>
// OP_ELSE
//     <timelock> OP_CHECKLOCKTIMEVERIFY
//     OP_DUP OP_BLAKE2B <sender_pubkey_hash>
// OP_ENDIF
// OP_EQUALVERIFY OP_CHECKSIG
//
// Short contract (experimental, never selected by default): no size check and
// raw public keys instead of their hashes.
//
// Spend script, both variants:
//     redeem: <sig> <pubkey> <secret> OP_1 <contract>
//     refund: <sig> <pubkey> OP_0 <contract>
//
// =============================================================================

use serde::{Deserialize, Serialize};

use super::{HASH_SIZE, SECRET_SIZE};
use crate::address::Address;
use crate::atomic_swaps::swap::{SpendKind, SwapError};
use crate::contracts::builder::{decode_u64, parse_script, ScriptBuilder, ScriptElement};
use crate::contracts::engine::ScriptError;
use crate::contracts::opcodes::Opcode;

// =============================================================================
// Parameters
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ContractVariant {
    #[default]
    Full,
    /// Compares raw public keys and skips the secret size check
    Short,
}

/// Everything that determines a full contract script
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractParameters {
    pub secret_hash: [u8; HASH_SIZE],
    pub receiver_pubkey_hash: [u8; HASH_SIZE],
    /// Milliseconds since epoch
    pub timelock: u64,
    pub sender_pubkey_hash: [u8; HASH_SIZE],
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortContractParameters {
    pub secret_hash: [u8; HASH_SIZE],
    pub receiver_pubkey: Vec<u8>,
    pub timelock: u64,
    pub sender_pubkey: Vec<u8>,
}

/// Branch of the contract a spend takes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpendPath {
    Redeem { secret: [u8; SECRET_SIZE] },
    Refund,
}

impl SpendPath {
    pub fn is_redeem(&self) -> bool {
        matches!(self, SpendPath::Redeem { .. })
    }

    pub fn kind(&self) -> SpendKind {
        match self {
            SpendPath::Redeem { .. } => SpendKind::Redeem,
            SpendPath::Refund => SpendKind::Refund,
        }
    }
}

// =============================================================================
// Script Creation
// =============================================================================

pub fn full_script(params: &ContractParameters) -> Vec<u8> {
    let mut builder = ScriptBuilder::new();

    builder
        .add_op(Opcode::OP_IF)
        .add_op(Opcode::OP_SIZE)
        .add_raw_data(&[SECRET_SIZE as u8])
        .add_op(Opcode::OP_EQUALVERIFY)
        .add_op(Opcode::OP_SHA256)
        .add_raw_data(&params.secret_hash)
        .add_op(Opcode::OP_EQUALVERIFY)
        .add_op(Opcode::OP_DUP)
        .add_op(Opcode::OP_BLAKE2B)
        .add_raw_data(&params.receiver_pubkey_hash);

    builder
        .add_op(Opcode::OP_ELSE)
        .add_u64(params.timelock)
        .add_op(Opcode::OP_CHECKLOCKTIMEVERIFY)
        .add_op(Opcode::OP_DUP)
        .add_op(Opcode::OP_BLAKE2B)
        .add_raw_data(&params.sender_pubkey_hash);

    builder
        .add_op(Opcode::OP_ENDIF)
        .add_op(Opcode::OP_EQUALVERIFY)
        .add_op(Opcode::OP_CHECKSIG);

    builder.into_script()
}

pub fn short_script(params: &ShortContractParameters) -> Vec<u8> {
    let mut builder = ScriptBuilder::new();

    builder
        .add_op(Opcode::OP_IF)
        .add_op(Opcode::OP_SHA256)
        .add_raw_data(&params.secret_hash)
        .add_op(Opcode::OP_EQUALVERIFY)
        .add_op(Opcode::OP_DUP)
        .add_raw_data(&params.receiver_pubkey)
        .add_op(Opcode::OP_ELSE)
        .add_u64(params.timelock)
        .add_op(Opcode::OP_CHECKLOCKTIMEVERIFY)
        .add_op(Opcode::OP_DUP)
        .add_raw_data(&params.sender_pubkey)
        .add_op(Opcode::OP_ENDIF)
        .add_op(Opcode::OP_EQUALVERIFY)
        .add_op(Opcode::OP_CHECKSIG);

    builder.into_script()
}

/// Unlocking script for either branch; the contract is appended verbatim
pub fn spend_script(signature: &[u8], pubkey: &[u8], path: &SpendPath, contract: &[u8]) -> Vec<u8> {
    let mut builder = ScriptBuilder::new();

    builder.add_raw_data(signature).add_raw_data(pubkey);
    match path {
        SpendPath::Redeem { secret } => {
            builder.add_raw_data(secret).add_op(Opcode::OP_1);
        }
        SpendPath::Refund => {
            builder.add_op(Opcode::OP_0);
        }
    }
    builder.add_raw_data(contract);

    builder.into_script()
}

// =============================================================================
// Addresses
// =============================================================================

pub fn contract_address(prefix: &str, contract: &[u8]) -> Address {
    Address::p2sh(prefix, contract)
}

/// Compares a counterparty's claimed contract address with the local derivation
pub fn verify_contract_address(prefix: &str, contract: &[u8], claimed: &str) -> Result<Address, SwapError> {
    let local = contract_address(prefix, contract);
    let local_text = local.encode()?;
    let claimed_address = Address::decode(claimed)?;

    if claimed_address != local {
        return Err(SwapError::Mismatch {
            expected: local_text,
            provided: claimed.to_string(),
        });
    }
    Ok(local)
}

// =============================================================================
// Parsing
// =============================================================================

/// Recovers the parameters of a full contract script
pub fn parse_full_script(script: &[u8]) -> Result<ContractParameters, ScriptError> {
    use ScriptElement::{Data, Op};

    let elements = parse_script(script)?;
    let malformed = || ScriptError::MalformedContract;

    match elements.as_slice() {
        [Op(Opcode::OP_IF), Op(Opcode::OP_SIZE), Data(size), Op(Opcode::OP_EQUALVERIFY), Op(Opcode::OP_SHA256), Data(secret_hash), Op(Opcode::OP_EQUALVERIFY), Op(Opcode::OP_DUP), Op(Opcode::OP_BLAKE2B), Data(receiver), Op(Opcode::OP_ELSE), Data(timelock), Op(Opcode::OP_CHECKLOCKTIMEVERIFY), Op(Opcode::OP_DUP), Op(Opcode::OP_BLAKE2B), Data(sender), Op(Opcode::OP_ENDIF), Op(Opcode::OP_EQUALVERIFY), Op(Opcode::OP_CHECKSIG)]
            if size.as_slice() == [SECRET_SIZE as u8] =>
        {
            Ok(ContractParameters {
                secret_hash: to_hash(secret_hash).ok_or_else(malformed)?,
                receiver_pubkey_hash: to_hash(receiver).ok_or_else(malformed)?,
                timelock: decode_u64(timelock)?,
                sender_pubkey_hash: to_hash(sender).ok_or_else(malformed)?,
            })
        }
        _ => Err(malformed()),
    }
}

fn to_hash(data: &[u8]) -> Option<[u8; HASH_SIZE]> {
    data.try_into().ok()
}

// =============================================================================
// Tests
// =============================================================================
