// =============================================================================
// SATKAS - Hash Primitives
// =============================================================================
//
// One digest primitive (BLAKE2b, 32-byte output) is used for script hashes,
// public key hashes and the keyed transaction signing hash. SHA-256 is only
// used for HTLC secrets and the message envelope.
//
// =============================================================================

use blake2b_simd::{Params, State};
use sha2::{Digest, Sha256};

pub const HASH_SIZE: usize = 32;

/// Domain key of the transaction signing hash
pub const TRANSACTION_SIGNING_HASH_KEY: &[u8] = b"TransactionSigningHash";

pub const ZERO_HASH: [u8; HASH_SIZE] = [0u8; HASH_SIZE];

/// BLAKE2b-256 sin clave
pub fn blake2b_256(data: &[u8]) -> [u8; HASH_SIZE] {
    let hash = Params::new().hash_length(HASH_SIZE).hash(data);
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(hash.as_bytes());
    out
}

/// Hash of a redeem script (p2sh payload)
pub fn script_hash(script: &[u8]) -> [u8; HASH_SIZE] {
    blake2b_256(script)
}

/// Hash of a public key as committed inside HTLC scripts
pub fn pubkey_hash(pubkey: &[u8]) -> [u8; HASH_SIZE] {
    blake2b_256(pubkey)
}

pub fn sha256(data: &[u8]) -> [u8; HASH_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

// =============================================================================
// Hash Writer
// =============================================================================

/// Incremental little-endian writer over a BLAKE2b state
pub struct HashWriter {
    state: State,
}

impl HashWriter {
    /// Writer keyed with the transaction signing domain
    pub fn transaction_signing() -> Self {
        Self::keyed(TRANSACTION_SIGNING_HASH_KEY)
    }

    pub fn keyed(key: &[u8]) -> Self {
        let state = Params::new().hash_length(HASH_SIZE).key(key).to_state();
        HashWriter { state }
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.state.update(data);
        self
    }

    /// Length (u64) followed by the bytes
    pub fn write_var_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.write_u64(data.len() as u64);
        self.write_bytes(data)
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.write_bytes(&[value])
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn finalize(&self) -> [u8; HASH_SIZE] {
        let mut out = [0u8; HASH_SIZE];
        out.copy_from_slice(self.state.finalize().as_bytes());
        out
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pubkey_hash_vector() {
        let hash = pubkey_hash(&[2u8; 32]);
        assert_eq!(
            hex::encode(hash),
            "d9818087de7244abc1b5fcf28e55e42c7ff9c678c0605181f37ac5d7414a7b95"
        );
    }

    #[test]
    fn test_keyed_writer_differs_from_plain() {
        let mut writer = HashWriter::transaction_signing();
        writer.write_bytes(b"abc");
        assert_ne!(writer.finalize(), blake2b_256(b"abc"));
    }

    #[test]
    fn test_writer_chunking_is_irrelevant() {
        let mut a = HashWriter::transaction_signing();
        a.write_u16(1).write_u64(7);
        let mut b = HashWriter::transaction_signing();
        let mut bytes = 1u16.to_le_bytes().to_vec();
        bytes.extend_from_slice(&7u64.to_le_bytes());
        b.write_bytes(&bytes);
        assert_eq!(a.finalize(), b.finalize());
    }

    #[test]
    fn test_sha256_empty() {
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
