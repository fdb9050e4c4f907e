// =============================================================================
// SATKAS - Address Codec
// =============================================================================
//
// Kaspa addresses: <prefix>:<base32(version + payload + checksum)>
//
// The charset matches bech32 but the checksum is a 40-bit BCH code over
// five generators (cashaddr family), with ':' as separator.
//
//   version 0 -> payload is a 32-byte x-only public key (p2pk)
//   version 8 -> payload is the 32-byte hash of a redeem script (p2sh)
//
// =============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::hashes;

// =============================================================================
// Constants
// =============================================================================

pub const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

const GENERATOR: [u64; 5] = [0x98f2bc8e61, 0x79b76d99e2, 0xf33e5fb3c4, 0xae2eabe2a8, 0x1e4f43e470];

pub const CHECKSUM_LENGTH: usize = 8;

pub const VERSION_PUBKEY: u8 = 0;
pub const VERSION_SCRIPT_HASH: u8 = 8;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Malformed text, with the reason
    Format(String),
    /// Well-formed but the checksum does not match
    Checksum { expected: String, actual: String },
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::Format(reason) => write!(f, "Invalid address: {}", reason),
            AddressError::Checksum { expected, actual } => {
                write!(f, "checksum failed. Expected {}, got {}", expected, actual)
            }
        }
    }
}

impl std::error::Error for AddressError {}

// =============================================================================
// Address
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub prefix: String,
    pub version: u8,
    pub payload: Vec<u8>,
}

impl Address {
    pub fn new(prefix: &str, version: u8, payload: Vec<u8>) -> Self {
        Address {
            prefix: prefix.to_string(),
            version,
            payload,
        }
    }

    /// Pay-to-pubkey address over an x-only public key
    pub fn p2pk(prefix: &str, pubkey: &[u8]) -> Self {
        Self::new(prefix, VERSION_PUBKEY, pubkey.to_vec())
    }

    /// Pay-to-script-hash address of a redeem script
    pub fn p2sh(prefix: &str, script: &[u8]) -> Self {
        Self::new(prefix, VERSION_SCRIPT_HASH, hashes::script_hash(script).to_vec())
    }

    pub fn is_p2sh(&self) -> bool {
        self.version == VERSION_SCRIPT_HASH
    }

    pub fn encode(&self) -> Result<String, AddressError> {
        encode(&self.prefix, &self.payload, self.version)
    }

    pub fn decode(text: &str) -> Result<Self, AddressError> {
        let (prefix, payload, version) = decode(text)?;
        Ok(Address { prefix, version, payload })
    }

    /// Like `decode`, but rejects non-zero regrouping padding
    pub fn decode_strict(text: &str) -> Result<Self, AddressError> {
        let (prefix, payload, version) = decode_with(text, true)?;
        Ok(Address { prefix, version, payload })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.encode() {
            Ok(text) => write!(f, "{}", text),
            Err(_) => write!(f, "{}:<invalid>", self.prefix),
        }
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::decode(s)
    }
}

// =============================================================================
// Bit Regrouping
// =============================================================================

/// Regroups `from_bits`-wide values into `to_bits`-wide values.
/// With `pad` the final partial group is filled with zero bits; without it the
/// remainder is dropped whatever its value.
pub fn convert_bits(data: &[u8], from_bits: u32, to_bits: u32, pad: bool) -> Vec<u8> {
    let (mut ret, acc, bits) = regroup(data, from_bits, to_bits);
    let maxv: u32 = (1 << to_bits) - 1;

    if pad && bits > 0 {
        ret.push(((acc << (to_bits - bits)) & maxv) as u8);
    }
    ret
}

/// Decode-direction regrouping that fails on a non-zero or over-long remainder
pub fn convert_bits_strict(data: &[u8], from_bits: u32, to_bits: u32) -> Result<Vec<u8>, AddressError> {
    let (ret, acc, bits) = regroup(data, from_bits, to_bits);
    let remainder = acc & ((1u32 << bits) - 1);

    if bits >= from_bits {
        return Err(AddressError::Format(format!("excess padding of {} bits", bits)));
    }
    if remainder != 0 {
        return Err(AddressError::Format("non-zero padding".to_string()));
    }
    Ok(ret)
}

fn regroup(data: &[u8], from_bits: u32, to_bits: u32) -> (Vec<u8>, u32, u32) {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let mut ret = Vec::with_capacity(data.len() * from_bits as usize / to_bits as usize + 1);
    let maxv: u32 = (1 << to_bits) - 1;
    let max_acc: u32 = (1 << (from_bits + to_bits - 1)) - 1;

    for value in data {
        acc = ((acc << from_bits) | (*value as u32 & ((1 << from_bits) - 1))) & max_acc;
        bits += from_bits;
        while bits >= to_bits {
            bits -= to_bits;
            ret.push(((acc >> bits) & maxv) as u8);
        }
    }

    (ret, acc, bits)
}

// =============================================================================
// Checksum
// =============================================================================

fn polymod(values: &[u8]) -> u64 {
    let mut checksum: u64 = 1;

    for value in values {
        let top = checksum >> 35;
        checksum = ((checksum & 0x07_ffff_ffff) << 5) ^ (*value as u64);
        for (i, g) in GENERATOR.iter().enumerate() {
            if (top >> i) & 1 == 1 {
                checksum ^= g;
            }
        }
    }

    checksum ^ 1
}

fn prefix_lower5_bits(prefix: &str) -> Vec<u8> {
    prefix.bytes().map(|c| c & 31).collect()
}

fn create_checksum(prefix: &str, data: &[u8]) -> [u8; CHECKSUM_LENGTH] {
    let mut values = prefix_lower5_bits(prefix);
    values.push(0);
    values.extend_from_slice(data);
    values.extend_from_slice(&[0u8; CHECKSUM_LENGTH]);

    let residue = polymod(&values);

    let mut checksum = [0u8; CHECKSUM_LENGTH];
    for (i, symbol) in checksum.iter_mut().enumerate() {
        *symbol = ((residue >> (5 * (CHECKSUM_LENGTH - 1 - i))) & 31) as u8;
    }
    checksum
}

fn verify_checksum(prefix: &str, data: &[u8]) -> bool {
    let mut values = prefix_lower5_bits(prefix);
    values.push(0);
    values.extend_from_slice(data);
    polymod(&values) == 0
}

fn to_base32(symbols: &[u8]) -> String {
    symbols.iter().map(|s| CHARSET[(*s & 31) as usize] as char).collect()
}

// =============================================================================
// Encode / Decode
// =============================================================================

pub fn encode(prefix: &str, payload: &[u8], version: u8) -> Result<String, AddressError> {
    if prefix.is_empty() {
        return Err(AddressError::Format("empty prefix".to_string()));
    }
    if let Some(c) = prefix.chars().find(|c| !c.is_ascii_graphic() || *c == ':' || c.is_ascii_uppercase()) {
        return Err(AddressError::Format(format!("invalid prefix character: '{}'", c)));
    }

    let mut versioned = Vec::with_capacity(payload.len() + 1);
    versioned.push(version);
    versioned.extend_from_slice(payload);

    let data = convert_bits(&versioned, 8, 5, true);
    let checksum = create_checksum(prefix, &data);

    Ok(format!("{}:{}{}", prefix, to_base32(&data), to_base32(&checksum)))
}

/// Returns (prefix, payload, version)
pub fn decode(text: &str) -> Result<(String, Vec<u8>, u8), AddressError> {
    decode_with(text, false)
}

fn decode_with(text: &str, strict: bool) -> Result<(String, Vec<u8>, u8), AddressError> {
    if text.len() < CHECKSUM_LENGTH + 2 {
        return Err(AddressError::Format(format!("invalid bech32 string length {}", text.len())));
    }

    if let Some(c) = text.chars().find(|c| (*c as u32) < 33 || (*c as u32) > 126) {
        return Err(AddressError::Format(format!("invalid character in string: '{}'", c)));
    }

    let lower = text.to_ascii_lowercase();
    if text != lower && text != text.to_ascii_uppercase() {
        return Err(AddressError::Format("string not all lowercase or all uppercase".to_string()));
    }

    let colon = match lower.rfind(':') {
        Some(i) if i >= 1 && i + CHECKSUM_LENGTH + 1 <= lower.len() => i,
        _ => return Err(AddressError::Format("invalid index of ':'".to_string())),
    };

    let prefix = &lower[..colon];
    let data_part = &lower[colon + 1..];

    let mut symbols = Vec::with_capacity(data_part.len());
    for c in data_part.bytes() {
        let index = CHARSET
            .iter()
            .position(|&x| x == c)
            .ok_or_else(|| AddressError::Format(format!("invalid character not part of charset: {}", c as char)))?;
        symbols.push(index as u8);
    }

    if !verify_checksum(prefix, &symbols) {
        let split = symbols.len() - CHECKSUM_LENGTH;
        let expected = to_base32(&create_checksum(prefix, &symbols[..split]));
        return Err(AddressError::Checksum {
            expected,
            actual: data_part[split..].to_string(),
        });
    }

    let data = &symbols[..symbols.len() - CHECKSUM_LENGTH];
    let bytes = if strict {
        convert_bits_strict(data, 5, 8)?
    } else {
        convert_bits(data, 5, 8, false)
    };

    let (version, payload) = bytes
        .split_first()
        .ok_or_else(|| AddressError::Format("missing version byte".to_string()))?;

    Ok((prefix.to_string(), payload.to_vec(), *version))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const KNOWN_P2PK: &str = "kaspa:qr2y4cg72p09fhpwfs3dxudwz5duxlx774ejwvwgvr9yf5p4a8edzdrt50e8q";

    #[test]
    fn test_decode_known_address() {
        let (prefix, payload, version) = decode(KNOWN_P2PK).unwrap();
        assert_eq!(prefix, "kaspa");
        assert_eq!(version, VERSION_PUBKEY);
        assert_eq!(
            hex::encode(payload),
            "d44ae11e505e54dc2e4c22d371ae151bc37cdef5732731c860ca44d035e9f2d1"
        );
    }

    #[test]
    fn test_encode_vectors() {
        assert_eq!(encode("kaspa", &[], 0).unwrap(), "kaspa:qq675gp8rh");
        assert_eq!(encode("a", &[0xff], 255).unwrap(), "a:llls0yzw8egr");

        let payload: Vec<u8> = (0u8..32).collect();
        assert_eq!(
            encode("kaspatest", &payload, VERSION_SCRIPT_HASH).unwrap(),
            "kaspatest:pqqqzqsrqszsvpcgpy9qkrqdpc83qygjzv2p29shrqv35xcur50p75w6c8hmk"
        );
    }

    #[test]
    fn test_round_trip() {
        let prefixes = ["kaspa", "kaspatest", "kaspadev", "a"];
        let payloads: Vec<Vec<u8>> = vec![vec![], vec![0], vec![0xab; 20], (0u8..32).collect(), vec![0xff; 65]];

        for prefix in prefixes {
            for payload in &payloads {
                for version in [0u8, 1, 8, 127, 255] {
                    let text = encode(prefix, payload, version).unwrap();
                    let decoded = decode(&text).unwrap();
                    assert_eq!(decoded, (prefix.to_string(), payload.clone(), version));
                    assert_eq!(decode_with(&text, true).unwrap(), decoded);
                }
            }
        }
    }

    #[test]
    fn test_uppercase_accepted_mixed_rejected() {
        let upper = KNOWN_P2PK.to_ascii_uppercase();
        let (prefix, _, _) = decode(&upper).unwrap();
        assert_eq!(prefix, "kaspa");

        let mixed = KNOWN_P2PK.replacen('q', "Q", 1);
        assert!(matches!(decode(&mixed), Err(AddressError::Format(_))));
    }

    #[test]
    fn test_single_character_flip_detected() {
        let colon = KNOWN_P2PK.find(':').unwrap();
        for (i, original) in KNOWN_P2PK.char_indices() {
            if i == colon {
                continue;
            }
            for replacement in CHARSET.iter().map(|b| *b as char).chain(['b', 'z']) {
                if replacement == original {
                    continue;
                }
                let mut chars: Vec<char> = KNOWN_P2PK.chars().collect();
                chars[i] = replacement;
                let mutated: String = chars.into_iter().collect();
                assert!(decode(&mutated).is_err(), "flip at {} to {} accepted", i, replacement);
            }
        }
    }

    #[test]
    fn test_checksum_error_reports_expected() {
        let mut broken = KNOWN_P2PK.to_string();
        broken.pop();
        broken.push('p');
        match decode(&broken) {
            Err(AddressError::Checksum { expected, actual }) => {
                assert_eq!(expected, "drt50e8q");
                assert!(actual.ends_with('p'));
            }
            other => panic!("expected checksum error, got {:?}", other),
        }
    }

    #[test]
    fn test_format_errors() {
        assert!(matches!(decode("kaspa:qq"), Err(AddressError::Format(_))));
        assert!(matches!(decode(":qq675gp8rhqq"), Err(AddressError::Format(_))));
        assert!(matches!(decode("kaspaqq675gp8rh"), Err(AddressError::Format(_))));
        assert!(matches!(decode("kaspa:qq675gp8rb"), Err(AddressError::Format(_))));
        assert!(matches!(decode("kaspa:qq675 p8rh"), Err(AddressError::Format(_))));
        assert!(encode("", &[1], 0).is_err());
        assert!(encode("Kaspa", &[1], 0).is_err());
    }

    #[test]
    fn test_bit_regrouping_identity() {
        for len in [0usize, 1, 31, 32, 33] {
            let data: Vec<u8> = (0..len).map(|i| (i * 37 + 11) as u8).collect();
            let five = convert_bits(&data, 8, 5, true);
            assert!(five.iter().all(|v| *v < 32));
            assert_eq!(convert_bits(&five, 5, 8, false), data);
            assert_eq!(convert_bits_strict(&five, 5, 8).unwrap(), data);
        }
    }

    #[test]
    fn test_strict_rejects_nonzero_padding() {
        // 0xff -> [31, 28]; setting a padding bit gives [31, 29]
        assert_eq!(convert_bits(&[0xff], 8, 5, true), vec![31, 28]);
        assert_eq!(convert_bits(&[31, 29], 5, 8, false), vec![0xff]);
        assert!(convert_bits_strict(&[31, 29], 5, 8).is_err());
        // a full spare symbol is excess padding
        assert!(convert_bits_strict(&[31, 28, 0], 5, 8).is_err());
    }

    #[test]
    fn test_p2sh_and_p2pk_helpers() {
        let pk = hex::decode("d44ae11e505e54dc2e4c22d371ae151bc37cdef5732731c860ca44d035e9f2d1").unwrap();
        let addr = Address::p2pk("kaspa", &pk);
        assert_eq!(addr.to_string(), KNOWN_P2PK);
        assert_eq!(KNOWN_P2PK.parse::<Address>().unwrap(), addr);

        let script_addr = Address::p2sh("kaspa", b"script");
        assert!(script_addr.is_p2sh());
        assert_eq!(script_addr.payload, hashes::script_hash(b"script").to_vec());
    }
}
