// =============================================================================
// SATKAS - Transaction Signing Hash
// =============================================================================
//
// Digest signed by every input, computed with a BLAKE2b writer keyed with
// "TransactionSigningHash":
//
//   version u16
//   previous outputs hash      (zero if ANYONECANPAY)
//   sequences hash             (zero if SINGLE, NONE or ANYONECANPAY)
//   sig op counts hash         (zero if ANYONECANPAY)
//   outpoint (id, index u32)
//   prev script (version u16, len u64, bytes)
//   amount u64, sequence u64, sig op count u8
//   outputs hash               (zero if NONE, single output if SINGLE)
//   lock time u64, subnetwork id [20], gas u64
//   payload hash               (zero on the native subnetwork)
//   hash type u8
//
// The four transaction-wide hashes are memoized per signing session.
//
// =============================================================================

use std::fmt;

use crate::hashes::{HashWriter, HASH_SIZE, ZERO_HASH};
use crate::transaction::{OutPoint, ScriptPublicKey, Transaction, TxInput, TxOutput, UtxoEntry};

pub const SIG_HASH_ALL: u8 = 0x01;
pub const SIG_HASH_NONE: u8 = 0x02;
pub const SIG_HASH_SINGLE: u8 = 0x04;
pub const SIG_HASH_ANY_ONE_CAN_PAY: u8 = 0x80;

const SIG_HASH_MASK: u8 = 0x07;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SighashError {
    InvalidHashType(u8),
    InputIndexOutOfRange { index: usize, inputs: usize },
}

impl fmt::Display for SighashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SighashError::InvalidHashType(flag) => write!(f, "Invalid sighash type: 0x{:02x}", flag),
            SighashError::InputIndexOutOfRange { index, inputs } => {
                write!(f, "Input index {} out of range ({} inputs)", index, inputs)
            }
        }
    }
}

impl std::error::Error for SighashError {}

// =============================================================================
// Hash Type
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SigHashType(u8);

impl SigHashType {
    pub const ALL: SigHashType = SigHashType(SIG_HASH_ALL);
    pub const NONE: SigHashType = SigHashType(SIG_HASH_NONE);
    pub const SINGLE: SigHashType = SigHashType(SIG_HASH_SINGLE);
    pub const ALL_ANYONE_CAN_PAY: SigHashType = SigHashType(SIG_HASH_ALL | SIG_HASH_ANY_ONE_CAN_PAY);
    pub const NONE_ANYONE_CAN_PAY: SigHashType = SigHashType(SIG_HASH_NONE | SIG_HASH_ANY_ONE_CAN_PAY);
    pub const SINGLE_ANYONE_CAN_PAY: SigHashType = SigHashType(SIG_HASH_SINGLE | SIG_HASH_ANY_ONE_CAN_PAY);

    /// Accepts exactly one base type, optionally with ANYONECANPAY
    pub fn from_u8(flag: u8) -> Result<Self, SighashError> {
        match flag & !SIG_HASH_ANY_ONE_CAN_PAY {
            SIG_HASH_ALL | SIG_HASH_NONE | SIG_HASH_SINGLE => Ok(SigHashType(flag)),
            _ => Err(SighashError::InvalidHashType(flag)),
        }
    }

    pub fn to_u8(self) -> u8 {
        self.0
    }

    pub fn is_all(&self) -> bool {
        self.0 & SIG_HASH_MASK == SIG_HASH_ALL
    }

    pub fn is_none(&self) -> bool {
        self.0 & SIG_HASH_MASK == SIG_HASH_NONE
    }

    pub fn is_single(&self) -> bool {
        self.0 & SIG_HASH_MASK == SIG_HASH_SINGLE
    }

    pub fn is_anyone_can_pay(&self) -> bool {
        self.0 & SIG_HASH_ANY_ONE_CAN_PAY == SIG_HASH_ANY_ONE_CAN_PAY
    }
}

impl Default for SigHashType {
    fn default() -> Self {
        SigHashType::ALL
    }
}

// =============================================================================
// Reused values
// =============================================================================

/// Memo of transaction-wide hashes. Belongs to one transaction.
#[derive(Clone, Debug, Default)]
pub struct SighashReusedValues {
    pub previous_outputs_hash: Option<[u8; HASH_SIZE]>,
    pub sequences_hash: Option<[u8; HASH_SIZE]>,
    pub sig_op_counts_hash: Option<[u8; HASH_SIZE]>,
    pub outputs_hash: Option<[u8; HASH_SIZE]>,
    pub payload_hash: Option<[u8; HASH_SIZE]>,
}

impl SighashReusedValues {
    pub fn new() -> Self {
        Self::default()
    }
}

fn previous_outputs_hash(tx: &Transaction, hash_type: SigHashType, reused: &mut SighashReusedValues) -> [u8; HASH_SIZE] {
    if hash_type.is_anyone_can_pay() {
        return ZERO_HASH;
    }
    *reused.previous_outputs_hash.get_or_insert_with(|| {
        let mut writer = HashWriter::transaction_signing();
        for input in &tx.inputs {
            writer
                .write_bytes(&input.previous_outpoint.transaction_id)
                .write_u32(input.previous_outpoint.index);
        }
        writer.finalize()
    })
}

fn sequences_hash(tx: &Transaction, hash_type: SigHashType, reused: &mut SighashReusedValues) -> [u8; HASH_SIZE] {
    if hash_type.is_single() || hash_type.is_anyone_can_pay() || hash_type.is_none() {
        return ZERO_HASH;
    }
    *reused.sequences_hash.get_or_insert_with(|| {
        let mut writer = HashWriter::transaction_signing();
        for input in &tx.inputs {
            writer.write_u64(input.sequence);
        }
        writer.finalize()
    })
}

fn sig_op_counts_hash(tx: &Transaction, hash_type: SigHashType, reused: &mut SighashReusedValues) -> [u8; HASH_SIZE] {
    if hash_type.is_anyone_can_pay() {
        return ZERO_HASH;
    }
    *reused.sig_op_counts_hash.get_or_insert_with(|| {
        let mut writer = HashWriter::transaction_signing();
        for input in &tx.inputs {
            writer.write_u8(input.sig_op_count);
        }
        writer.finalize()
    })
}

fn write_output(writer: &mut HashWriter, output: &TxOutput) {
    writer
        .write_u64(output.value)
        .write_u16(output.script_public_key.version)
        .write_var_bytes(&output.script_public_key.script);
}

fn outputs_hash(
    tx: &Transaction,
    input_index: usize,
    hash_type: SigHashType,
    reused: &mut SighashReusedValues,
) -> [u8; HASH_SIZE] {
    if hash_type.is_none() {
        return ZERO_HASH;
    }

    if hash_type.is_single() {
        // Not memoized: depends on the input index
        return match tx.outputs.get(input_index) {
            Some(output) => {
                let mut writer = HashWriter::transaction_signing();
                write_output(&mut writer, output);
                writer.finalize()
            }
            None => ZERO_HASH,
        };
    }

    *reused.outputs_hash.get_or_insert_with(|| {
        let mut writer = HashWriter::transaction_signing();
        for output in &tx.outputs {
            write_output(&mut writer, output);
        }
        writer.finalize()
    })
}

fn payload_hash(tx: &Transaction, reused: &mut SighashReusedValues) -> [u8; HASH_SIZE] {
    if tx.subnetwork_id.is_native() {
        return ZERO_HASH;
    }
    *reused.payload_hash.get_or_insert_with(|| {
        let mut writer = HashWriter::transaction_signing();
        writer.write_bytes(&tx.payload);
        writer.finalize()
    })
}

// =============================================================================
// Signature hash
// =============================================================================

pub fn calc_signature_hash(
    tx: &Transaction,
    input_index: usize,
    hash_type: SigHashType,
    reused: &mut SighashReusedValues,
) -> Result<[u8; HASH_SIZE], SighashError> {
    let input = tx.inputs.get(input_index).ok_or(SighashError::InputIndexOutOfRange {
        index: input_index,
        inputs: tx.inputs.len(),
    })?;

    let mut writer = HashWriter::transaction_signing();
    writer.write_u16(tx.version);
    writer.write_bytes(&previous_outputs_hash(tx, hash_type, reused));
    writer.write_bytes(&sequences_hash(tx, hash_type, reused));
    writer.write_bytes(&sig_op_counts_hash(tx, hash_type, reused));

    let prev_script = &input.utxo_entry.script_public_key;
    writer
        .write_bytes(&input.previous_outpoint.transaction_id)
        .write_u32(input.previous_outpoint.index)
        .write_u16(prev_script.version)
        .write_var_bytes(&prev_script.script)
        .write_u64(input.utxo_entry.amount)
        .write_u64(input.sequence)
        .write_u8(input.sig_op_count);

    writer.write_bytes(&outputs_hash(tx, input_index, hash_type, reused));
    writer
        .write_u64(tx.lock_time)
        .write_bytes(&tx.subnetwork_id.0)
        .write_u64(tx.gas);
    writer.write_bytes(&payload_hash(tx, reused));
    writer.write_u8(hash_type.to_u8());

    Ok(writer.finalize())
}

/// Signing session bound to one transaction, owning its memo
pub struct SignatureHasher<'a> {
    tx: &'a Transaction,
    reused: SighashReusedValues,
}

impl<'a> SignatureHasher<'a> {
    pub fn new(tx: &'a Transaction) -> Self {
        SignatureHasher {
            tx,
            reused: SighashReusedValues::new(),
        }
    }

    pub fn digest(&mut self, input_index: usize, hash_type: SigHashType) -> Result<[u8; HASH_SIZE], SighashError> {
        calc_signature_hash(self.tx, input_index, hash_type, &mut self.reused)
    }

    pub fn reused_values(&self) -> &SighashReusedValues {
        &self.reused
    }
}

// =============================================================================
// Conformance vector
// =============================================================================

const VECTOR_SCRIPT: &str = "aa202c8922b6c21a55a8e868dddacd226760ea14d45c9febebc6a9be526495d8384987";
const VECTOR_OUTPOINT: &str = "a449ba289c7d7ef8641eb110deead0e334b685a2aafff836321b88851bbba11f";

/// One input of 5 KAS, one output of 4 KAS, both locked by the same p2sh script.
/// Other implementations hash this exact transaction to cross-check digests.
pub fn conformance_transaction() -> Result<Transaction, String> {
    let script = hex::decode(VECTOR_SCRIPT).map_err(|e| format!("Invalid vector script: {}", e))?;
    let spk = ScriptPublicKey::new(0, script);
    let entry = UtxoEntry {
        amount: 500_000_000,
        script_public_key: spk.clone(),
        block_daa_score: 2149,
        is_coinbase: false,
    };
    Ok(Transaction::new(
        vec![TxInput::new(OutPoint::from_hex(VECTOR_OUTPOINT, 0)?, entry, 0)],
        vec![TxOutput { value: 400_000_000, script_public_key: spk }],
        0,
    ))
}

// =============================================================================
// Tests
// =============================================================================
