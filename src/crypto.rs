// =============================================================================
// SATKAS - Keystore Encryption
// =============================================================================
//
// Encriptación AES-256-GCM para las claves de swap y del nodo.
// Usa PBKDF2 para derivar la clave de encriptación desde la contraseña.
//
// Keys are random 32-byte secrets. Swap keys are named by the persisted
// address counter ("swap/<n>"), the node key is "node".
//
// =============================================================================

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use log::info;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::io::{self, Write};

use crate::storage::Storage;
use crate::wallet::{SigningCapability, SECRET_KEY_SIZE};

// =============================================================================
// Constants
// =============================================================================

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

pub const NODE_KEY_NAME: &str = "node";

// =============================================================================
// Encrypted Data
// =============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EncryptedData {
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub version: u8,
}

/// Stored form of a secret key
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum KeyBlob {
    Plain([u8; SECRET_KEY_SIZE]),
    Encrypted(EncryptedData),
}

/// Deriva una clave de 256 bits desde una contraseña usando PBKDF2
fn derive_key(password: &str, salt: &[u8]) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

pub fn encrypt(plaintext: &[u8], password: &str) -> Result<EncryptedData, String> {
    let salt = random_bytes(SALT_SIZE);
    let key = derive_key(password, &salt);
    let nonce_bytes = random_bytes(NONCE_SIZE);

    let cipher = Aes256Gcm::new(GenericArray::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| format!("Encryption failed: {}", e))?;

    Ok(EncryptedData {
        salt,
        nonce: nonce_bytes,
        ciphertext,
        version: 1,
    })
}

pub fn decrypt(encrypted: &EncryptedData, password: &str) -> Result<Vec<u8>, String> {
    if encrypted.nonce.len() != NONCE_SIZE {
        return Err(format!("Invalid nonce length: {}", encrypted.nonce.len()));
    }
    let key = derive_key(password, &encrypted.salt);
    let cipher = Aes256Gcm::new(GenericArray::from_slice(&key));

    cipher
        .decrypt(Nonce::from_slice(&encrypted.nonce), encrypted.ciphertext.as_ref())
        .map_err(|_| "Decryption failed: wrong password or corrupted data".to_string())
}

impl KeyBlob {
    pub fn seal(secret: &[u8; SECRET_KEY_SIZE], password: Option<&str>) -> Result<Self, String> {
        match password {
            Some(pw) => Ok(KeyBlob::Encrypted(encrypt(secret, pw)?)),
            None => Ok(KeyBlob::Plain(*secret)),
        }
    }

    pub fn open(&self, password: Option<&str>) -> Result<[u8; SECRET_KEY_SIZE], String> {
        match (self, password) {
            (KeyBlob::Plain(secret), _) => Ok(*secret),
            (KeyBlob::Encrypted(_), None) => Err("Key is encrypted, password required".to_string()),
            (KeyBlob::Encrypted(data), Some(pw)) => decrypt(data, pw)?
                .try_into()
                .map_err(|_| "Decrypted key has wrong length".to_string()),
        }
    }
}

// =============================================================================
// Keystore
// =============================================================================

/// Generates and loads secret keys kept in the `keys` tree
pub struct Keystore<'a> {
    storage: &'a Storage,
    password: Option<String>,
}

impl<'a> Keystore<'a> {
    /// Fails if the wallet is encrypted and no password is given
    pub fn new(storage: &'a Storage, password: Option<&str>) -> Result<Self, String> {
        let password = password.filter(|p| !p.is_empty()).map(str::to_string);
        if storage.is_encrypted() && password.is_none() {
            return Err("Wallet is encrypted, password required".to_string());
        }
        Ok(Keystore { storage, password })
    }

    pub fn swap_key_name(index: u32) -> String {
        format!("swap/{}", index)
    }

    fn store(&self, name: &str, secret: &[u8; SECRET_KEY_SIZE]) -> Result<(), String> {
        if self.password.is_some() && !self.storage.is_encrypted() {
            self.storage.set_encrypted(true)?;
        }
        let blob = KeyBlob::seal(secret, self.password.as_deref())?;
        self.storage.put_key(name, &blob)
    }

    /// New key at the next address index
    pub fn generate_swap_key(&self, signer: &dyn SigningCapability) -> Result<(u32, [u8; SECRET_KEY_SIZE]), String> {
        let index = self.storage.next_address_index()?;
        let secret = signer.generate_secret_key();
        self.store(&Self::swap_key_name(index), &secret)?;
        info!("Generated swap key #{}", index);
        Ok((index, secret))
    }

    pub fn load_swap_key(&self, index: u32) -> Result<[u8; SECRET_KEY_SIZE], String> {
        self.load(&Self::swap_key_name(index))
    }

    /// Node identity key used for signed messages, created on first use
    pub fn node_key(&self, signer: &dyn SigningCapability) -> Result<[u8; SECRET_KEY_SIZE], String> {
        if self.storage.get_key(NODE_KEY_NAME)?.is_some() {
            return self.load(NODE_KEY_NAME);
        }
        let secret = signer.generate_secret_key();
        self.store(NODE_KEY_NAME, &secret)?;
        Ok(secret)
    }

    fn load(&self, name: &str) -> Result<[u8; SECRET_KEY_SIZE], String> {
        self.storage
            .get_key(name)?
            .ok_or_else(|| format!("No key named {}", name))?
            .open(self.password.as_deref())
    }
}

// =============================================================================
// Password Input
// =============================================================================

/// Lee una contraseña desde stdin
pub fn read_password(prompt: &str) -> io::Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut password = String::new();
    io::stdin().read_line(&mut password)?;
    Ok(password.trim().to_string())
}

// =============================================================================
// Tests
// =============================================================================
