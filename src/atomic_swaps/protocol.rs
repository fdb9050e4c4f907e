// =============================================================================
// SATKAS - Signed Message Envelope
// =============================================================================
//
// Peers exchange JSON objects of the form
//
//   {"type": ..., "payload": {...}, "pubkey": <hex>, "signature": <hex>}
//
// The signature covers sha256("<type>:<compact json of payload>"). Both
// sides must serialize the payload identically, so object keys are emitted
// in sorted order and without whitespace.
//
// =============================================================================

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::swap::{Role, SwapError};
use crate::hashes::sha256;
use crate::wallet::{SigningCapability, SECRET_KEY_SIZE};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignedMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub payload: Value,
    /// Hex
    pub pubkey: String,
    /// Hex
    pub signature: String,
}

impl SignedMessage {
    pub fn to_json(&self) -> Result<String, SwapError> {
        serde_json::to_string(self).map_err(|e| SwapError::Format(format!("message: {}", e)))
    }

    pub fn from_json(text: &str) -> Result<Self, SwapError> {
        serde_json::from_str(text).map_err(|e| SwapError::Format(format!("message: {}", e)))
    }
}

/// Digest signed for a message of `message_type` carrying `payload`
pub fn message_digest(message_type: &str, payload: &Value) -> Result<[u8; 32], SwapError> {
    let body = serde_json::to_string(payload).map_err(|e| SwapError::Format(format!("payload: {}", e)))?;
    Ok(sha256(format!("{}:{}", message_type, body).as_bytes()))
}

pub fn sign_message(
    signer: &dyn SigningCapability,
    secret_key: &[u8; SECRET_KEY_SIZE],
    message_type: &str,
    payload: Value,
) -> Result<SignedMessage, SwapError> {
    let digest = message_digest(message_type, &payload)?;
    let signature = signer.sign(&digest, secret_key)?;
    let pubkey = signer.public_key(secret_key)?;

    Ok(SignedMessage {
        message_type: message_type.to_string(),
        payload,
        pubkey: hex::encode(pubkey),
        signature: hex::encode(signature),
    })
}

/// False for any malformed field; never errors
pub fn verify_message(signer: &dyn SigningCapability, message: &SignedMessage) -> bool {
    let (Ok(pubkey), Ok(signature)) = (hex::decode(&message.pubkey), hex::decode(&message.signature)) else {
        debug!("Message {} has non-hex key or signature", message.message_type);
        return false;
    };
    match message_digest(&message.message_type, &message.payload) {
        Ok(digest) => signer.verify(&signature, &digest, &pubkey),
        Err(_) => false,
    }
}

/// Opening message of a connection, typed by our role
pub fn hello(
    role: Role,
    signer: &dyn SigningCapability,
    secret_key: &[u8; SECRET_KEY_SIZE],
    payload: Value,
) -> Result<SignedMessage, SwapError> {
    sign_message(signer, secret_key, role.hello_message_type(), payload)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::SchnorrSigner;
    use serde_json::json;

    #[test]
    fn test_digest_canonicalization() {
        // keys come out sorted and without spaces
        let payload = json!({"b": 1, "a": "x"});
        let expected = sha256(br#"ping:{"a":"x","b":1}"#);
        assert_eq!(message_digest("ping", &payload).unwrap(), expected);
        assert_eq!(message_digest("client_hello", &json!({})).unwrap(), sha256(b"client_hello:{}"));
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = SchnorrSigner::new();
        let sk = signer.generate_secret_key();
        let msg = sign_message(&signer, &sk, "order", json!({"amount": 1000, "pair": "sat2kas"})).unwrap();
        assert!(verify_message(&signer, &msg));

        let mut tampered = msg.clone();
        tampered.payload = json!({"amount": 1001, "pair": "sat2kas"});
        assert!(!verify_message(&signer, &tampered));

        let mut retyped = msg.clone();
        retyped.message_type = "other".to_string();
        assert!(!verify_message(&signer, &retyped));

        let mut garbage = msg;
        garbage.signature = "zz".to_string();
        assert!(!verify_message(&signer, &garbage));
    }

    #[test]
    fn test_wire_format() {
        let signer = SchnorrSigner::new();
        let sk = signer.generate_secret_key();
        let msg = hello(Role::Maker, &signer, &sk, json!({"p2p_endpoint": "127.0.0.1:9000"})).unwrap();
        assert_eq!(msg.message_type, "server_hello");

        let text = msg.to_json().unwrap();
        let raw: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(raw["type"], "server_hello");
        assert_eq!(raw["pubkey"].as_str().unwrap().len(), 64);

        let parsed = SignedMessage::from_json(&text).unwrap();
        assert_eq!(parsed, msg);
        assert!(verify_message(&signer, &parsed));
        assert!(SignedMessage::from_json("{\"type\":1}").is_err());
    }

    #[test]
    fn test_taker_hello() {
        let signer = SchnorrSigner::new();
        let sk = signer.generate_secret_key();
        let msg = hello(Role::Taker, &signer, &sk, json!({})).unwrap();
        assert_eq!(msg.message_type, "client_hello");
        assert!(verify_message(&signer, &msg));
    }
}
