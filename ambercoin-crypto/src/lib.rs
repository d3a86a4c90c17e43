//! Crypto primitives shared by every other ambercoin crate: secp256k1
//! signing, SHA-256 digests and scrypt-based block header proof of work.
//!
//! Parameters are fixed so that two independent implementations of this
//! crate hash byte-for-byte identically; that's a consensus requirement,
//! not a style choice.

use rand::rngs::OsRng;
use scrypt::{scrypt, Params};
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// scrypt parameters for block header proof of work: N=1024, r=1, p=1, dkLen=32.
const SCRYPT_LOG_N: u8 = 10;
const SCRYPT_R: u32 = 1;
const SCRYPT_P: u32 = 1;
const SCRYPT_DK_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("invalid secp256k1 key or signature: {0}")]
    Secp256k1(#[from] secp256k1::Error),
    #[error("scrypt parameters rejected: {0}")]
    ScryptParams(#[from] scrypt::errors::InvalidParams),
    #[error("scrypt output buffer rejected: {0}")]
    ScryptOutput(#[from] scrypt::errors::InvalidOutputLen),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// A freshly generated secp256k1 keypair, hex-encoded the way addresses and
/// signatures are stored everywhere else in the system.
pub struct KeyPair {
    pub private_key_hex: String,
    pub public_key_hex: String,
}

pub fn generate_keypair() -> KeyPair {
    let secp = Secp256k1::new();
    let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
    KeyPair {
        private_key_hex: hex::encode(secret_key.secret_bytes()),
        public_key_hex: hex::encode(public_key.serialize()),
    }
}

pub fn public_key_from_private(private_key_hex: &str) -> Result<String> {
    let bytes = hex::decode(private_key_hex)?;
    let secret_key = SecretKey::from_slice(&bytes)?;
    let secp = Secp256k1::new();
    let public_key = PublicKey::from_secret_key(&secp, &secret_key);
    Ok(hex::encode(public_key.serialize()))
}

/// Signs `msg` under `private_key_hex`, returning a 64-byte compact
/// signature, hex-encoded.
pub fn sign(private_key_hex: &str, msg: &[u8]) -> Result<String> {
    let bytes = hex::decode(private_key_hex)?;
    let secret_key = SecretKey::from_slice(&bytes)?;
    let secp = Secp256k1::new();
    let digest = sha256_bytes(msg);
    let message = Message::from_digest_slice(&digest)?;
    let signature = secp.sign_ecdsa(&message, &secret_key);
    Ok(hex::encode(signature.serialize_compact()))
}

/// Verifies a hex-encoded compact signature against a hex-encoded
/// compressed public key. Malformed hex or key material is treated as a
/// failed verification rather than an error, since callers (the validator)
/// only ever branch on pass/fail.
pub fn verify(public_key_hex: &str, signature_hex: &str, msg: &[u8]) -> bool {
    (|| -> Result<bool> {
        let pk_bytes = hex::decode(public_key_hex)?;
        let public_key = PublicKey::from_slice(&pk_bytes)?;
        let sig_bytes = hex::decode(signature_hex)?;
        let signature = Signature::from_compact(&sig_bytes)?;
        let digest = sha256_bytes(msg);
        let message = Message::from_digest_slice(&digest)?;
        let secp = Secp256k1::new();
        Ok(secp.verify_ecdsa(&message, &signature, &public_key).is_ok())
    })()
    .unwrap_or(false)
}

fn sha256_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hex-encoded SHA-256 digest, used for transaction hashes and Merkle nodes.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256_bytes(data))
}

/// scrypt(password=data, salt=data, N=1024, r=1, p=1, dkLen=32), hex-encoded.
/// Used exclusively for block header proof of work.
pub fn scrypt_hash_hex(data: &[u8]) -> Result<String> {
    let params = Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, SCRYPT_DK_LEN)?;
    let mut out = [0u8; SCRYPT_DK_LEN];
    scrypt(data, data, &params, &mut out)?;
    Ok(hex::encode(out))
}

/// Counts the leading `'0'` hex characters in a digest, i.e. its PoW
/// difficulty under this system's definition.
pub fn leading_zero_hex_chars(hash_hex: &str) -> u32 {
    hash_hex.chars().take_while(|c| *c == '0').count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let kp = generate_keypair();
        let msg = b"source:dest:1:0:123:3:asset:data:prev";
        let sig = sign(&kp.private_key_hex, msg).unwrap();
        assert!(verify(&kp.public_key_hex, &sig, msg));
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let kp = generate_keypair();
        let sig = sign(&kp.private_key_hex, b"hello").unwrap();
        assert!(!verify(&kp.public_key_hex, &sig, b"goodbye"));
    }

    #[test]
    fn verify_rejects_garbage_input() {
        assert!(!verify("not-hex", "also-not-hex", b"msg"));
    }

    #[test]
    fn scrypt_hash_is_deterministic() {
        let a = scrypt_hash_hex(b"00000001deadbeef").unwrap();
        let b = scrypt_hash_hex(b"00000001deadbeef").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn sha256_hex_matches_known_vector() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn leading_zero_hex_chars_counts_correctly() {
        assert_eq!(leading_zero_hex_chars("000abc"), 3);
        assert_eq!(leading_zero_hex_chars("abc000"), 0);
        assert_eq!(leading_zero_hex_chars("0000"), 4);
    }
}
