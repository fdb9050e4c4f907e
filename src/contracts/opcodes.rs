// =============================================================================
// SATKAS - Script Opcodes (Kaspa subset)
// =============================================================================
//
// Only the opcodes needed by HTLC contracts and standard locking scripts.
// Data pushes of 1-75 bytes use the length itself as opcode (OP_DATA_N) and
// are not listed here.
//
// =============================================================================

use std::fmt;

pub const MAX_DIRECT_PUSH: usize = 0x4B;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(non_camel_case_types)]
pub enum Opcode {
    // Constants
    OP_0 = 0x00,
    OP_PUSHDATA1 = 0x4C,
    OP_PUSHDATA2 = 0x4D,
    OP_PUSHDATA4 = 0x4E,
    OP_1NEGATE = 0x4F,
    OP_1 = 0x51,
    OP_2 = 0x52,
    OP_3 = 0x53,
    OP_4 = 0x54,
    OP_5 = 0x55,
    OP_6 = 0x56,
    OP_7 = 0x57,
    OP_8 = 0x58,
    OP_9 = 0x59,
    OP_10 = 0x5A,
    OP_11 = 0x5B,
    OP_12 = 0x5C,
    OP_13 = 0x5D,
    OP_14 = 0x5E,
    OP_15 = 0x5F,
    OP_16 = 0x60,

    // Flow control
    OP_IF = 0x63,
    OP_ELSE = 0x67,
    OP_ENDIF = 0x68,
    OP_VERIFY = 0x69,

    // Stack
    OP_DROP = 0x75,
    OP_DUP = 0x76,
    OP_SIZE = 0x82,

    // Comparison
    OP_EQUAL = 0x87,
    OP_EQUALVERIFY = 0x88,

    // Crypto
    OP_SHA256 = 0xA8,
    OP_BLAKE2B = 0xAA,
    OP_CHECKSIG = 0xAC,

    // Locktime
    OP_CHECKLOCKTIMEVERIFY = 0xB0,
    OP_CHECKSEQUENCEVERIFY = 0xB1,
}

const ALL: [Opcode; 35] = [
    Opcode::OP_0,
    Opcode::OP_PUSHDATA1,
    Opcode::OP_PUSHDATA2,
    Opcode::OP_PUSHDATA4,
    Opcode::OP_1NEGATE,
    Opcode::OP_1,
    Opcode::OP_2,
    Opcode::OP_3,
    Opcode::OP_4,
    Opcode::OP_5,
    Opcode::OP_6,
    Opcode::OP_7,
    Opcode::OP_8,
    Opcode::OP_9,
    Opcode::OP_10,
    Opcode::OP_11,
    Opcode::OP_12,
    Opcode::OP_13,
    Opcode::OP_14,
    Opcode::OP_15,
    Opcode::OP_16,
    Opcode::OP_IF,
    Opcode::OP_ELSE,
    Opcode::OP_ENDIF,
    Opcode::OP_VERIFY,
    Opcode::OP_DROP,
    Opcode::OP_DUP,
    Opcode::OP_SIZE,
    Opcode::OP_EQUAL,
    Opcode::OP_EQUALVERIFY,
    Opcode::OP_SHA256,
    Opcode::OP_BLAKE2B,
    Opcode::OP_CHECKSIG,
    Opcode::OP_CHECKLOCKTIMEVERIFY,
    Opcode::OP_CHECKSEQUENCEVERIFY,
];

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        ALL.iter().copied().find(|op| op.to_byte() == byte)
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// OP_1..OP_16 for n in 1..=16
    pub fn small_int(n: u8) -> Option<Self> {
        if (1..=16).contains(&n) {
            Self::from_byte(Opcode::OP_1.to_byte() + n - 1)
        } else {
            None
        }
    }

    /// Value pushed by OP_1..OP_16
    pub fn small_int_value(&self) -> Option<u8> {
        let byte = self.to_byte();
        if (Opcode::OP_1.to_byte()..=Opcode::OP_16.to_byte()).contains(&byte) {
            Some(byte - Opcode::OP_1.to_byte() + 1)
        } else {
            None
        }
    }

    pub fn is_conditional(&self) -> bool {
        matches!(self, Opcode::OP_IF | Opcode::OP_ELSE | Opcode::OP_ENDIF)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Opcode::OP_0 => "OP_0",
            Opcode::OP_PUSHDATA1 => "OP_PUSHDATA1",
            Opcode::OP_PUSHDATA2 => "OP_PUSHDATA2",
            Opcode::OP_PUSHDATA4 => "OP_PUSHDATA4",
            Opcode::OP_1NEGATE => "OP_1NEGATE",
            Opcode::OP_1 => "OP_1",
            Opcode::OP_2 => "OP_2",
            Opcode::OP_3 => "OP_3",
            Opcode::OP_4 => "OP_4",
            Opcode::OP_5 => "OP_5",
            Opcode::OP_6 => "OP_6",
            Opcode::OP_7 => "OP_7",
            Opcode::OP_8 => "OP_8",
            Opcode::OP_9 => "OP_9",
            Opcode::OP_10 => "OP_10",
            Opcode::OP_11 => "OP_11",
            Opcode::OP_12 => "OP_12",
            Opcode::OP_13 => "OP_13",
            Opcode::OP_14 => "OP_14",
            Opcode::OP_15 => "OP_15",
            Opcode::OP_16 => "OP_16",
            Opcode::OP_IF => "OP_IF",
            Opcode::OP_ELSE => "OP_ELSE",
            Opcode::OP_ENDIF => "OP_ENDIF",
            Opcode::OP_VERIFY => "OP_VERIFY",
            Opcode::OP_DROP => "OP_DROP",
            Opcode::OP_DUP => "OP_DUP",
            Opcode::OP_SIZE => "OP_SIZE",
            Opcode::OP_EQUAL => "OP_EQUAL",
            Opcode::OP_EQUALVERIFY => "OP_EQUALVERIFY",
            Opcode::OP_SHA256 => "OP_SHA256",
            Opcode::OP_BLAKE2B => "OP_BLAKE2B",
            Opcode::OP_CHECKSIG => "OP_CHECKSIG",
            Opcode::OP_CHECKLOCKTIMEVERIFY => "OP_CHECKLOCKTIMEVERIFY",
            Opcode::OP_CHECKSEQUENCEVERIFY => "OP_CHECKSEQUENCEVERIFY",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Tests
// =============================================================================
