// =============================================================================
// SATKAS - Script Builder
// =============================================================================
//
// Append-only assembler with canonical push encoding:
//
//   []  / [0x00]        -> OP_0
//   [1..=16]            -> OP_1 .. OP_16
//   [0x81]              -> OP_1NEGATE
//   1..=75 bytes        -> <len> <data>
//   76..=255 bytes      -> OP_PUSHDATA1 <len u8> <data>
//   256..=65535 bytes   -> OP_PUSHDATA2 <len u16 LE> <data>
//   larger              -> OP_PUSHDATA4 <len u32 LE> <data>
//
// Plus the reverse direction: parsing, disassembly and script numbers.
//
// =============================================================================

use crate::address::{Address, VERSION_PUBKEY, VERSION_SCRIPT_HASH};
use crate::contracts::engine::ScriptError;
use crate::contracts::opcodes::{Opcode, MAX_DIRECT_PUSH};
use crate::transaction::ScriptPublicKey;

/// Byte pushed with OP_1NEGATE
pub const NEGATIVE_ONE: u8 = 0x81;

/// Minimum width of an encoded u64 push
const MIN_U64_PUSH: usize = 4;

// =============================================================================
// Builder
// =============================================================================

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScriptBuilder {
    script: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        ScriptBuilder { script: Vec::new() }
    }

    pub fn add_op(&mut self, op: Opcode) -> &mut Self {
        self.script.push(op.to_byte());
        self
    }

    pub fn add_ops(&mut self, ops: &[Opcode]) -> &mut Self {
        for op in ops {
            self.add_op(*op);
        }
        self
    }

    /// Pushes `data` using the smallest canonical encoding
    pub fn add_raw_data(&mut self, data: &[u8]) -> &mut Self {
        let len = data.len();

        if len == 0 || (len == 1 && data[0] == 0) {
            return self.add_op(Opcode::OP_0);
        }
        if len == 1 {
            if let Some(op) = Opcode::small_int(data[0]) {
                return self.add_op(op);
            }
            if data[0] == NEGATIVE_ONE {
                return self.add_op(Opcode::OP_1NEGATE);
            }
        }

        if len <= MAX_DIRECT_PUSH {
            self.script.push(len as u8);
        } else if len <= u8::MAX as usize {
            self.script.push(Opcode::OP_PUSHDATA1.to_byte());
            self.script.push(len as u8);
        } else if len <= u16::MAX as usize {
            self.script.push(Opcode::OP_PUSHDATA2.to_byte());
            self.script.extend_from_slice(&(len as u16).to_le_bytes());
        } else {
            debug_assert!(len <= u32::MAX as usize);
            self.script.push(Opcode::OP_PUSHDATA4.to_byte());
            self.script.extend_from_slice(&(len as u32).to_le_bytes());
        }

        self.script.extend_from_slice(data);
        self
    }

    /// Pushes a little-endian u64 trimmed of trailing zeros, never below 4 bytes
    pub fn add_u64(&mut self, value: u64) -> &mut Self {
        let encoded = encode_u64(value);
        self.add_raw_data(&encoded)
    }

    pub fn script(&self) -> &[u8] {
        &self.script
    }

    pub fn into_script(self) -> Vec<u8> {
        self.script
    }

    pub fn len(&self) -> usize {
        self.script.len()
    }

    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }
}

/// Script-number bytes produced by `add_u64`
pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut bytes = value.to_le_bytes().to_vec();
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    if bytes.len() < MIN_U64_PUSH {
        bytes.resize(MIN_U64_PUSH, 0);
    }
    bytes
}

/// Inverse of `encode_u64`: little-endian, at most 8 bytes
pub fn decode_u64(bytes: &[u8]) -> Result<u64, ScriptError> {
    if bytes.len() > 8 {
        return Err(ScriptError::NumberTooLong(bytes.len()));
    }
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(u64::from_le_bytes(buf))
}

// =============================================================================
// Parsing
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptElement {
    Op(Opcode),
    Data(Vec<u8>),
}

/// Splits a script into opcodes and data pushes
pub fn parse_script(script: &[u8]) -> Result<Vec<ScriptElement>, ScriptError> {
    let mut elements = Vec::new();
    let mut pc = 0;

    while pc < script.len() {
        let byte = script[pc];
        pc += 1;

        let push_len = match byte as usize {
            n @ 1..=MAX_DIRECT_PUSH => Some(n),
            _ if byte == Opcode::OP_PUSHDATA1.to_byte() => Some(read_len(script, &mut pc, 1)?),
            _ if byte == Opcode::OP_PUSHDATA2.to_byte() => Some(read_len(script, &mut pc, 2)?),
            _ if byte == Opcode::OP_PUSHDATA4.to_byte() => Some(read_len(script, &mut pc, 4)?),
            _ => None,
        };

        match push_len {
            Some(len) => {
                let end = pc.checked_add(len).filter(|end| *end <= script.len()).ok_or(ScriptError::UnexpectedEnd)?;
                elements.push(ScriptElement::Data(script[pc..end].to_vec()));
                pc = end;
            }
            None => {
                let op = Opcode::from_byte(byte).ok_or(ScriptError::UnknownOpcode(byte))?;
                elements.push(ScriptElement::Op(op));
            }
        }
    }

    Ok(elements)
}

fn read_len(script: &[u8], pc: &mut usize, width: usize) -> Result<usize, ScriptError> {
    if *pc + width > script.len() {
        return Err(ScriptError::UnexpectedEnd);
    }
    let mut buf = [0u8; 4];
    buf[..width].copy_from_slice(&script[*pc..*pc + width]);
    *pc += width;
    Ok(u32::from_le_bytes(buf) as usize)
}

/// Human-readable form, data pushes shown as hex
pub fn disassemble(script: &[u8]) -> Result<String, ScriptError> {
    let parts: Vec<String> = parse_script(script)?
        .into_iter()
        .map(|element| match element {
            ScriptElement::Op(op) => op.name().to_string(),
            ScriptElement::Data(data) => hex::encode(data),
        })
        .collect();
    Ok(parts.join(" "))
}

// =============================================================================
// Standard locking scripts
// =============================================================================

/// ScriptPublicKey paying to a p2pk or p2sh address
pub fn pay_to_address_script(address: &Address) -> Result<ScriptPublicKey, ScriptError> {
    let mut builder = ScriptBuilder::new();
    match address.version {
        VERSION_PUBKEY => {
            builder.add_raw_data(&address.payload).add_op(Opcode::OP_CHECKSIG);
        }
        VERSION_SCRIPT_HASH => {
            builder
                .add_op(Opcode::OP_BLAKE2B)
                .add_raw_data(&address.payload)
                .add_op(Opcode::OP_EQUAL);
        }
        other => return Err(ScriptError::UnsupportedAddressVersion(other)),
    }
    Ok(ScriptPublicKey::new(0, builder.into_script()))
}

/// Hash committed by a p2sh locking script, if it is one
pub fn extract_script_hash(script: &[u8]) -> Option<[u8; 32]> {
    if script.len() == 35
        && script[0] == Opcode::OP_BLAKE2B.to_byte()
        && script[1] == 0x20
        && script[34] == Opcode::OP_EQUAL.to_byte()
    {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&script[2..34]);
        Some(hash)
    } else {
        None
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn push(data: &[u8]) -> Vec<u8> {
        let mut builder = ScriptBuilder::new();
        builder.add_raw_data(data);
        builder.into_script()
    }

    #[test]
    fn test_canonical_push_boundaries() {
        assert_eq!(push(&[]), vec![0x00]);
        assert_eq!(push(&[0]), vec![0x00]);
        assert_eq!(push(&[5]), vec![0x55]);
        assert_eq!(push(&[16]), vec![0x60]);
        assert_eq!(push(&[17]), vec![0x01, 17]);
        assert_eq!(push(&[NEGATIVE_ONE]), vec![0x4F]);
        assert_eq!(push(&[1, 2]), vec![0x02, 1, 2]);

        let s = push(&[7u8; 75]);
        assert_eq!(s[0], 75);
        assert_eq!(s.len(), 76);

        let s = push(&[7u8; 76]);
        assert_eq!(&s[..2], &[0x4C, 76]);
        assert_eq!(s.len(), 78);

        let s = push(&[7u8; 255]);
        assert_eq!(&s[..2], &[0x4C, 0xFF]);

        let s = push(&[7u8; 256]);
        assert_eq!(&s[..3], &[0x4D, 0x00, 0x01]);
        assert_eq!(s.len(), 259);

        let s = push(&vec![7u8; 65537]);
        assert_eq!(&s[..5], &[0x4E, 0x01, 0x00, 0x01, 0x00]);
        assert_eq!(s.len(), 65542);
    }

    #[test]
    fn test_u64_encoding() {
        let mut builder = ScriptBuilder::new();
        builder.add_u64(0);
        assert_eq!(builder.script(), &[0x04, 0, 0, 0, 0]);

        let mut builder = ScriptBuilder::new();
        builder.add_u64(300);
        assert_eq!(builder.script(), &[0x04, 0x2C, 0x01, 0x00, 0x00]);

        assert_eq!(encode_u64(1_700_000_000_000), vec![0x00, 0x68, 0xE5, 0xCF, 0x8B, 0x01]);
        assert_eq!(encode_u64(u64::MAX), vec![0xFF; 8]);

        for value in [0u64, 300, 1_700_000_000_000, u64::MAX] {
            assert_eq!(decode_u64(&encode_u64(value)).unwrap(), value);
        }
        assert!(decode_u64(&[0u8; 9]).is_err());
    }

    #[test]
    fn test_parse_round_trip() {
        let mut builder = ScriptBuilder::new();
        builder
            .add_op(Opcode::OP_IF)
            .add_raw_data(&[0xAB; 32])
            .add_raw_data(&[9u8; 300])
            .add_op(Opcode::OP_ENDIF);

        let elements = parse_script(builder.script()).unwrap();
        assert_eq!(
            elements,
            vec![
                ScriptElement::Op(Opcode::OP_IF),
                ScriptElement::Data(vec![0xAB; 32]),
                ScriptElement::Data(vec![9u8; 300]),
                ScriptElement::Op(Opcode::OP_ENDIF),
            ]
        );
    }

    #[test]
    fn test_parse_truncated() {
        assert_eq!(parse_script(&[0x05, 1, 2]), Err(ScriptError::UnexpectedEnd));
        assert_eq!(parse_script(&[0x4D, 0x01]), Err(ScriptError::UnexpectedEnd));
        assert_eq!(parse_script(&[0xFE]), Err(ScriptError::UnknownOpcode(0xFE)));
    }

    #[test]
    fn test_disassemble() {
        let text = disassemble(&[0x63, 0x01, 0x20, 0x88, 0x68]).unwrap();
        assert_eq!(text, "OP_IF 20 OP_EQUALVERIFY OP_ENDIF");
    }

    #[test]
    fn test_pay_to_address_scripts() {
        let p2sh = Address::new("kaspa", VERSION_SCRIPT_HASH, vec![0x11; 32]);
        let spk = pay_to_address_script(&p2sh).unwrap();
        assert_eq!(spk.version, 0);
        assert_eq!(spk.script.len(), 35);
        assert_eq!(extract_script_hash(&spk.script), Some([0x11; 32]));

        let p2pk = Address::new("kaspa", VERSION_PUBKEY, vec![0x22; 32]);
        let spk = pay_to_address_script(&p2pk).unwrap();
        assert_eq!(spk.script[0], 0x20);
        assert_eq!(*spk.script.last().unwrap(), 0xAC);
        assert_eq!(extract_script_hash(&spk.script), None);

        let other = Address::new("kaspa", 1, vec![0x22; 32]);
        assert!(pay_to_address_script(&other).is_err());
    }
}
