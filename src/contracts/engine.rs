// =============================================================================
// SATKAS - Script Engine
// =============================================================================
//
// Minimal stack machine for the HTLC opcode subset. It is used to check a
// signed contract spend locally before it is broadcast, so it follows the
// node's rules for the opcodes it knows:
//
// - OP_IF takes a minimal boolean ([] or [1])
// - OP_CHECKLOCKTIMEVERIFY pops its argument
// - OP_CHECKSIG verifies a 64-byte schnorr signature + hash type byte
// - p2sh spends leave exactly one true element on the stack
//
// =============================================================================

use std::fmt;

use crate::contracts::builder::{decode_u64, extract_script_hash, parse_script, ScriptElement};
use crate::contracts::opcodes::Opcode;
use crate::hashes::{blake2b_256, script_hash, sha256};
use crate::sighash::{calc_signature_hash, SigHashType, SighashReusedValues};
use crate::transaction::Transaction;
use crate::wallet::{SigningCapability, SCHNORR_SIGNATURE_SIZE};

/// Lock times below this are DAA scores, above it millisecond timestamps
pub const LOCK_TIME_THRESHOLD: u64 = 500_000_000_000;

/// Sequence value that disables lock time checks
pub const MAX_TX_IN_SEQUENCE_NUM: u64 = u64::MAX;

const MAX_STACK_SIZE: usize = 244;

// =============================================================================
// Script Error
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptError {
    /// Script ended in the middle of a push
    UnexpectedEnd,
    /// Byte is not a known opcode
    UnknownOpcode(u8),
    /// Opcode known but not evaluated here
    UnsupportedOpcode(Opcode),
    NumberTooLong(usize),
    UnsupportedAddressVersion(u8),
    StackUnderflow,
    StackOverflow,
    UnbalancedConditional,
    /// OP_IF argument was not [] or [1]
    NonMinimalConditional,
    VerifyFailed(Opcode),
    EvalFalse,
    /// Extra elements left after a p2sh spend
    CleanStack(usize),
    LocktimeTypeMismatch,
    LocktimeNotSatisfied { required: u64, actual: u64 },
    /// Input sequence disables lock time checks
    FinalizedInput,
    InvalidSignatureEncoding(usize),
    InvalidHashType(u8),
    NotPushOnly,
    NotPayToScriptHash,
    ScriptHashMismatch,
    InputIndexOutOfRange(usize),
    /// Script does not have the contract layout
    MalformedContract,
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::UnexpectedEnd => write!(f, "Script ends inside a data push"),
            ScriptError::UnknownOpcode(b) => write!(f, "Unknown opcode: 0x{:02X}", b),
            ScriptError::UnsupportedOpcode(op) => write!(f, "Unsupported opcode: {}", op),
            ScriptError::NumberTooLong(n) => write!(f, "Number of {} bytes exceeds 8", n),
            ScriptError::UnsupportedAddressVersion(v) => write!(f, "Unsupported address version: {}", v),
            ScriptError::StackUnderflow => write!(f, "Stack underflow"),
            ScriptError::StackOverflow => write!(f, "Stack overflow"),
            ScriptError::UnbalancedConditional => write!(f, "Unbalanced IF/ELSE/ENDIF"),
            ScriptError::NonMinimalConditional => write!(f, "OP_IF argument is not a minimal boolean"),
            ScriptError::VerifyFailed(op) => write!(f, "{} failed", op),
            ScriptError::EvalFalse => write!(f, "Script evaluated to false"),
            ScriptError::CleanStack(n) => write!(f, "Stack has {} elements after execution, expected 1", n),
            ScriptError::LocktimeTypeMismatch => write!(f, "Lock time type mismatch"),
            ScriptError::LocktimeNotSatisfied { required, actual } => {
                write!(f, "Lock time not satisfied: required {}, transaction has {}", required, actual)
            }
            ScriptError::FinalizedInput => write!(f, "Input sequence is final, lock time disabled"),
            ScriptError::InvalidSignatureEncoding(len) => write!(f, "Invalid signature length: {}", len),
            ScriptError::InvalidHashType(t) => write!(f, "Invalid hash type: 0x{:02x}", t),
            ScriptError::NotPushOnly => write!(f, "Signature script is not push-only"),
            ScriptError::NotPayToScriptHash => write!(f, "Spent output is not pay-to-script-hash"),
            ScriptError::ScriptHashMismatch => write!(f, "Redeem script does not match script hash"),
            ScriptError::InputIndexOutOfRange(i) => write!(f, "Input index {} out of range", i),
            ScriptError::MalformedContract => write!(f, "Script is not a recognized HTLC contract"),
        }
    }
}

impl std::error::Error for ScriptError {}

// =============================================================================
// Execution Context
// =============================================================================

/// Transaction input being verified
pub struct ExecutionContext<'a> {
    pub tx: &'a Transaction,
    pub input_index: usize,
    pub signer: &'a dyn SigningCapability,
}

// =============================================================================
// Script Engine
// =============================================================================

pub struct ScriptEngine<'a> {
    context: ExecutionContext<'a>,
    stack: Vec<Vec<u8>>,
    exec_stack: Vec<bool>,
    reused: SighashReusedValues,
}

impl<'a> ScriptEngine<'a> {
    pub fn new(context: ExecutionContext<'a>) -> Self {
        ScriptEngine {
            context,
            stack: Vec::new(),
            exec_stack: Vec::new(),
            reused: SighashReusedValues::new(),
        }
    }

    pub fn stack(&self) -> &[Vec<u8>] {
        &self.stack
    }

    /// Runs a script over the current stack
    pub fn execute(&mut self, script: &[u8]) -> Result<(), ScriptError> {
        for element in parse_script(script)? {
            let executing = self.exec_stack.iter().all(|&b| b);

            let op = match element {
                ScriptElement::Data(data) => {
                    if executing {
                        self.push(data)?;
                    }
                    continue;
                }
                ScriptElement::Op(op) => op,
            };

            match op {
                Opcode::OP_IF => {
                    let mut value = false;
                    if executing {
                        value = match self.pop()?.as_slice() {
                            [] => false,
                            [1] => true,
                            _ => return Err(ScriptError::NonMinimalConditional),
                        };
                    }
                    self.exec_stack.push(value);
                }
                Opcode::OP_ELSE => {
                    let top = self.exec_stack.pop().ok_or(ScriptError::UnbalancedConditional)?;
                    let parent_executing = self.exec_stack.iter().all(|&b| b);
                    self.exec_stack.push(parent_executing && !top);
                }
                Opcode::OP_ENDIF => {
                    self.exec_stack.pop().ok_or(ScriptError::UnbalancedConditional)?;
                }
                _ if !executing => {}
                _ => self.execute_opcode(op)?,
            }
        }

        if !self.exec_stack.is_empty() {
            return Err(ScriptError::UnbalancedConditional);
        }
        Ok(())
    }

    fn execute_opcode(&mut self, op: Opcode) -> Result<(), ScriptError> {
        match op {
            Opcode::OP_0 => self.push(vec![])?,
            Opcode::OP_1NEGATE => self.push(vec![0x81])?,
            Opcode::OP_VERIFY => {
                let top = self.pop()?;
                if !cast_to_bool(&top) {
                    return Err(ScriptError::VerifyFailed(op));
                }
            }
            Opcode::OP_DROP => {
                self.pop()?;
            }
            Opcode::OP_DUP => {
                let top = self.stack.last().cloned().ok_or(ScriptError::StackUnderflow)?;
                self.push(top)?;
            }
            Opcode::OP_SIZE => {
                let len = self.stack.last().map(|t| t.len()).ok_or(ScriptError::StackUnderflow)?;
                self.push(encode_num(len as u64))?;
            }
            Opcode::OP_EQUAL | Opcode::OP_EQUALVERIFY => {
                let a = self.pop()?;
                let b = self.pop()?;
                if op == Opcode::OP_EQUALVERIFY {
                    if a != b {
                        return Err(ScriptError::VerifyFailed(op));
                    }
                } else {
                    self.push_bool(a == b)?;
                }
            }
            Opcode::OP_SHA256 => {
                let data = self.pop()?;
                self.push(sha256(&data).to_vec())?;
            }
            Opcode::OP_BLAKE2B => {
                let data = self.pop()?;
                self.push(blake2b_256(&data).to_vec())?;
            }
            Opcode::OP_CHECKSIG => {
                let pubkey = self.pop()?;
                let signature = self.pop()?;
                let valid = self.check_sig(&pubkey, &signature)?;
                self.push_bool(valid)?;
            }
            Opcode::OP_CHECKLOCKTIMEVERIFY => {
                let required = decode_u64(&self.pop()?)?;
                self.check_lock_time(required)?;
            }
            other => {
                if let Some(n) = other.small_int_value() {
                    self.push(vec![n])?;
                } else {
                    return Err(ScriptError::UnsupportedOpcode(other));
                }
            }
        }
        Ok(())
    }

    fn check_lock_time(&self, required: u64) -> Result<(), ScriptError> {
        let tx = self.context.tx;
        let input = tx
            .inputs
            .get(self.context.input_index)
            .ok_or(ScriptError::InputIndexOutOfRange(self.context.input_index))?;

        if (tx.lock_time < LOCK_TIME_THRESHOLD) != (required < LOCK_TIME_THRESHOLD) {
            return Err(ScriptError::LocktimeTypeMismatch);
        }
        if required > tx.lock_time {
            return Err(ScriptError::LocktimeNotSatisfied {
                required,
                actual: tx.lock_time,
            });
        }
        if input.sequence == MAX_TX_IN_SEQUENCE_NUM {
            return Err(ScriptError::FinalizedInput);
        }
        Ok(())
    }

    fn check_sig(&mut self, pubkey: &[u8], signature: &[u8]) -> Result<bool, ScriptError> {
        if signature.is_empty() {
            return Ok(false);
        }
        if signature.len() != SCHNORR_SIGNATURE_SIZE + 1 {
            return Err(ScriptError::InvalidSignatureEncoding(signature.len()));
        }

        let (sig, flag) = signature.split_at(SCHNORR_SIGNATURE_SIZE);
        let hash_type = SigHashType::from_u8(flag[0]).map_err(|_| ScriptError::InvalidHashType(flag[0]))?;
        let digest = calc_signature_hash(self.context.tx, self.context.input_index, hash_type, &mut self.reused)
            .map_err(|_| ScriptError::InputIndexOutOfRange(self.context.input_index))?;

        Ok(self.context.signer.verify(sig, &digest, pubkey))
    }

    // =========================================================================
    // Stack Helpers
    // =========================================================================

    fn push(&mut self, data: Vec<u8>) -> Result<(), ScriptError> {
        if self.stack.len() >= MAX_STACK_SIZE {
            return Err(ScriptError::StackOverflow);
        }
        self.stack.push(data);
        Ok(())
    }

    fn push_bool(&mut self, value: bool) -> Result<(), ScriptError> {
        self.push(if value { vec![1] } else { vec![] })
    }

    fn pop(&mut self) -> Result<Vec<u8>, ScriptError> {
        self.stack.pop().ok_or(ScriptError::StackUnderflow)
    }
}

fn cast_to_bool(data: &[u8]) -> bool {
    for (i, &byte) in data.iter().enumerate() {
        if byte != 0 {
            // Negative zero is still false
            return !(i == data.len() - 1 && byte == 0x80);
        }
    }
    false
}

/// Minimal script number for a non-negative value
fn encode_num(mut value: u64) -> Vec<u8> {
    let mut result = Vec::new();
    while value > 0 {
        result.push((value & 0xFF) as u8);
        value >>= 8;
    }
    if result.last().map_or(false, |b| b & 0x80 != 0) {
        result.push(0x00);
    }
    result
}

fn is_push_only(script: &[u8]) -> Result<bool, ScriptError> {
    Ok(parse_script(script)?.iter().all(|element| match element {
        ScriptElement::Data(_) => true,
        ScriptElement::Op(op) => *op == Opcode::OP_0 || *op == Opcode::OP_1NEGATE || op.small_int_value().is_some(),
    }))
}

// =============================================================================
// P2SH Verification
// =============================================================================

/// Verifies the signature script of a p2sh input against the UTXO it spends
pub fn verify_p2sh_input(context: ExecutionContext<'_>) -> Result<(), ScriptError> {
    let tx = context.tx;
    let input = tx
        .inputs
        .get(context.input_index)
        .ok_or(ScriptError::InputIndexOutOfRange(context.input_index))?;
    let signature_script = &input.signature_script;
    let expected_hash =
        extract_script_hash(&input.utxo_entry.script_public_key.script).ok_or(ScriptError::NotPayToScriptHash)?;

    if !is_push_only(signature_script)? {
        return Err(ScriptError::NotPushOnly);
    }

    let mut engine = ScriptEngine::new(context);
    engine.execute(signature_script)?;

    let redeem_script = engine.pop()?;
    if script_hash(&redeem_script) != expected_hash {
        return Err(ScriptError::ScriptHashMismatch);
    }

    engine.execute(&redeem_script)?;

    match engine.stack.as_slice() {
        [top] if cast_to_bool(top) => Ok(()),
        [_] | [] => Err(ScriptError::EvalFalse),
        other => Err(ScriptError::CleanStack(other.len())),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::builder::ScriptBuilder;
    use crate::transaction::{OutPoint, ScriptPublicKey, TxInput, TxOutput, UtxoEntry};
    use crate::wallet::SchnorrSigner;

    fn dummy_tx(lock_time: u64, sequence: u64) -> Transaction {
        let entry = UtxoEntry {
            amount: 1000,
            script_public_key: ScriptPublicKey::new(0, vec![]),
            block_daa_score: 0,
            is_coinbase: false,
        };
        Transaction::new(
            vec![TxInput::new(OutPoint::new([0u8; 32], 0), entry, sequence)],
            vec![TxOutput { value: 900, script_public_key: ScriptPublicKey::new(0, vec![]) }],
            lock_time,
        )
    }

    fn run(tx: &Transaction, script: &[u8]) -> Result<Vec<Vec<u8>>, ScriptError> {
        let signer = SchnorrSigner::new();
        let mut engine = ScriptEngine::new(ExecutionContext { tx, input_index: 0, signer: &signer });
        engine.execute(script)?;
        Ok(engine.stack().to_vec())
    }

    #[test]
    fn test_if_else_branches() {
        let tx = dummy_tx(0, 1);
        let mut b = ScriptBuilder::new();
        b.add_ops(&[Opcode::OP_1, Opcode::OP_IF, Opcode::OP_2, Opcode::OP_ELSE, Opcode::OP_3, Opcode::OP_ENDIF]);
        assert_eq!(run(&tx, b.script()).unwrap(), vec![vec![2]]);

        let mut b = ScriptBuilder::new();
        b.add_ops(&[Opcode::OP_0, Opcode::OP_IF, Opcode::OP_2, Opcode::OP_ELSE, Opcode::OP_3, Opcode::OP_ENDIF]);
        assert_eq!(run(&tx, b.script()).unwrap(), vec![vec![3]]);
    }

    #[test]
    fn test_if_requires_minimal_bool() {
        let tx = dummy_tx(0, 1);
        let mut b = ScriptBuilder::new();
        b.add_op(Opcode::OP_2).add_op(Opcode::OP_IF).add_op(Opcode::OP_ENDIF);
        assert_eq!(run(&tx, b.script()), Err(ScriptError::NonMinimalConditional));
    }

    #[test]
    fn test_unbalanced() {
        let tx = dummy_tx(0, 1);
        assert_eq!(run(&tx, &[0x51, 0x63]), Err(ScriptError::UnbalancedConditional));
        assert_eq!(run(&tx, &[0x68]), Err(ScriptError::UnbalancedConditional));
    }

    #[test]
    fn test_size_check_of_secret() {
        let tx = dummy_tx(0, 1);
        let mut b = ScriptBuilder::new();
        b.add_raw_data(&[7u8; 32]).add_op(Opcode::OP_SIZE).add_raw_data(&[0x20]).add_op(Opcode::OP_EQUALVERIFY);
        assert_eq!(run(&tx, b.script()).unwrap(), vec![vec![7u8; 32]]);

        let mut b = ScriptBuilder::new();
        b.add_raw_data(&[7u8; 31]).add_op(Opcode::OP_SIZE).add_raw_data(&[0x20]).add_op(Opcode::OP_EQUALVERIFY);
        assert_eq!(run(&tx, b.script()), Err(ScriptError::VerifyFailed(Opcode::OP_EQUALVERIFY)));
    }

    #[test]
    fn test_lock_time_rules() {
        let timelock = 1_700_000_000_000u64;
        let mut b = ScriptBuilder::new();
        b.add_u64(timelock).add_op(Opcode::OP_CHECKLOCKTIMEVERIFY);

        assert_eq!(run(&dummy_tx(timelock, 1), b.script()).unwrap(), Vec::<Vec<u8>>::new());
        assert_eq!(
            run(&dummy_tx(timelock - 1, 1), b.script()),
            Err(ScriptError::LocktimeNotSatisfied { required: timelock, actual: timelock - 1 })
        );
        assert_eq!(run(&dummy_tx(0, 1), b.script()), Err(ScriptError::LocktimeTypeMismatch));
        assert_eq!(run(&dummy_tx(timelock, u64::MAX), b.script()), Err(ScriptError::FinalizedInput));
    }

    #[test]
    fn test_encode_num() {
        assert_eq!(encode_num(0), Vec::<u8>::new());
        assert_eq!(encode_num(32), vec![0x20]);
        assert_eq!(encode_num(128), vec![0x80, 0x00]);
        assert_eq!(encode_num(300), vec![0x2C, 0x01]);
    }

    #[test]
    fn test_push_only_detection() {
        assert!(is_push_only(&[0x00, 0x51, 0x02, 1, 2]).unwrap());
        assert!(!is_push_only(&[0x00, 0x76]).unwrap());
    }
}
