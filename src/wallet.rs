// =============================================================================
// SATKAS - Wallet (Schnorr secp256k1)
// =============================================================================
//
// Signing goes through the `SigningCapability` trait. The binary picks the
// implementation once, from configuration, and hands it to every component.
//
// =============================================================================

use std::fmt;
use std::sync::Arc;

use rand::RngCore;
use secp256k1::{schnorr, All, Keypair, Message, Secp256k1, XOnlyPublicKey};

use crate::sighash::{calc_signature_hash, SigHashType, SighashError, SighashReusedValues};
use crate::transaction::Transaction;

pub const SCHNORR_SIGNATURE_SIZE: usize = 64;
pub const XONLY_PUBKEY_SIZE: usize = 32;
pub const SECRET_KEY_SIZE: usize = 32;

pub const SCHEME_SCHNORR: &str = "schnorr";

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    InvalidSecretKey(String),
    UnknownScheme(String),
    Sighash(SighashError),
}

impl fmt::Display for SigningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningError::InvalidSecretKey(e) => write!(f, "Invalid secret key: {}", e),
            SigningError::UnknownScheme(s) => write!(f, "Unknown signature scheme: {}", s),
            SigningError::Sighash(e) => write!(f, "Sighash error: {}", e),
        }
    }
}

impl std::error::Error for SigningError {}

impl From<SighashError> for SigningError {
    fn from(e: SighashError) -> Self {
        SigningError::Sighash(e)
    }
}

// =============================================================================
// Signing Capability
// =============================================================================

pub trait SigningCapability: Send + Sync {
    /// Signs a 32-byte digest
    fn sign(&self, digest: &[u8; 32], secret_key: &[u8; SECRET_KEY_SIZE]) -> Result<Vec<u8>, SigningError>;

    /// Checks `signature` over `digest` for `public_key`; malformed input is just invalid
    fn verify(&self, signature: &[u8], digest: &[u8; 32], public_key: &[u8]) -> bool;

    fn public_key(&self, secret_key: &[u8; SECRET_KEY_SIZE]) -> Result<Vec<u8>, SigningError>;

    fn generate_secret_key(&self) -> [u8; SECRET_KEY_SIZE];
}

/// BIP340 schnorr over secp256k1, x-only public keys
pub struct SchnorrSigner {
    secp: Secp256k1<All>,
}

impl SchnorrSigner {
    pub fn new() -> Self {
        SchnorrSigner { secp: Secp256k1::new() }
    }

    fn keypair(&self, secret_key: &[u8; SECRET_KEY_SIZE]) -> Result<Keypair, SigningError> {
        Keypair::from_seckey_slice(&self.secp, secret_key).map_err(|e| SigningError::InvalidSecretKey(e.to_string()))
    }
}

impl Default for SchnorrSigner {
    fn default() -> Self {
        Self::new()
    }
}

impl SigningCapability for SchnorrSigner {
    fn sign(&self, digest: &[u8; 32], secret_key: &[u8; SECRET_KEY_SIZE]) -> Result<Vec<u8>, SigningError> {
        let keypair = self.keypair(secret_key)?;
        let mut aux = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut aux);

        let msg = Message::from_digest(*digest);
        let sig = self.secp.sign_schnorr_with_aux_rand(&msg, &keypair, &aux);
        Ok(sig.serialize().to_vec())
    }

    fn verify(&self, signature: &[u8], digest: &[u8; 32], public_key: &[u8]) -> bool {
        let sig = match schnorr::Signature::from_slice(signature) {
            Ok(s) => s,
            Err(_) => return false,
        };
        let pubkey = match XOnlyPublicKey::from_slice(public_key) {
            Ok(p) => p,
            Err(_) => return false,
        };
        let msg = Message::from_digest(*digest);
        self.secp.verify_schnorr(&sig, &msg, &pubkey).is_ok()
    }

    fn public_key(&self, secret_key: &[u8; SECRET_KEY_SIZE]) -> Result<Vec<u8>, SigningError> {
        let (xonly, _parity) = self.keypair(secret_key)?.x_only_public_key();
        Ok(xonly.serialize().to_vec())
    }

    fn generate_secret_key(&self) -> [u8; SECRET_KEY_SIZE] {
        let (sk, _pk) = self.secp.generate_keypair(&mut rand::thread_rng());
        sk.secret_bytes()
    }
}

/// Selects the signing implementation by configured scheme name
pub fn signer_for_scheme(scheme: &str) -> Result<Arc<dyn SigningCapability>, SigningError> {
    match scheme.to_ascii_lowercase().as_str() {
        SCHEME_SCHNORR => Ok(Arc::new(SchnorrSigner::new())),
        other => Err(SigningError::UnknownScheme(other.to_string())),
    }
}

// =============================================================================
// Transaction input signatures
// =============================================================================

/// Signature pushed in a spend script: signature bytes followed by the hash type
pub fn raw_input_signature(
    tx: &Transaction,
    input_index: usize,
    hash_type: SigHashType,
    secret_key: &[u8; SECRET_KEY_SIZE],
    reused: &mut SighashReusedValues,
    signer: &dyn SigningCapability,
) -> Result<Vec<u8>, SigningError> {
    let digest = calc_signature_hash(tx, input_index, hash_type, reused)?;
    let mut signature = signer.sign(&digest, secret_key)?;
    signature.push(hash_type.to_u8());
    Ok(signature)
}

pub fn parse_secret_key(hex_key: &str) -> Result<[u8; SECRET_KEY_SIZE], SigningError> {
    let bytes = hex::decode(hex_key.trim()).map_err(|e| SigningError::InvalidSecretKey(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| SigningError::InvalidSecretKey("expected 32 bytes".to_string()))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let signer = SchnorrSigner::new();
        let sk = signer.generate_secret_key();
        let pk = signer.public_key(&sk).unwrap();
        assert_eq!(pk.len(), XONLY_PUBKEY_SIZE);

        let digest = [7u8; 32];
        let sig = signer.sign(&digest, &sk).unwrap();
        assert_eq!(sig.len(), SCHNORR_SIGNATURE_SIZE);
        assert!(signer.verify(&sig, &digest, &pk));
        assert!(!signer.verify(&sig, &[8u8; 32], &pk));
    }

    #[test]
    fn test_verify_rejects_garbage() {
        let signer = SchnorrSigner::new();
        assert!(!signer.verify(&[0u8; 10], &[0u8; 32], &[2u8; 32]));
        assert!(!signer.verify(&[0u8; 64], &[0u8; 32], &[0u8; 5]));
    }

    #[test]
    fn test_known_public_key() {
        // BIP340 test vector 0
        let mut sk = [0u8; 32];
        sk[31] = 3;
        let pk = SchnorrSigner::new().public_key(&sk).unwrap();
        assert_eq!(
            hex::encode(pk),
            "f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9"
        );
    }

    #[test]
    fn test_invalid_secret_key() {
        let signer = SchnorrSigner::new();
        assert!(matches!(signer.public_key(&[0u8; 32]), Err(SigningError::InvalidSecretKey(_))));
        assert!(parse_secret_key("abcd").is_err());
        assert!(parse_secret_key(&"11".repeat(32)).is_ok());
    }

    #[test]
    fn test_scheme_selection() {
        assert!(signer_for_scheme("schnorr").is_ok());
        assert!(signer_for_scheme("Schnorr").is_ok());
        assert!(matches!(signer_for_scheme("ecdsa"), Err(SigningError::UnknownScheme(_))));
    }
}
