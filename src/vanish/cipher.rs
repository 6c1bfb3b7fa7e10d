//! Authenticated encryption of vanished payloads with ChaCha20-Poly1305.
//!
//! The random nonce is prepended to the ciphertext. Decrypting under any key other than the one
//! used to encrypt fails instead of producing garbage.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;

use crate::error::{Error, Result};

pub const CONTENT_KEY_LENGTH: usize = 32;

const NONCE_LENGTH: usize = 12;

/// Generates a random content key.
pub fn generate_key() -> [u8; CONTENT_KEY_LENGTH] {
    let mut key = [0u8; CONTENT_KEY_LENGTH];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

pub fn encrypt(key: &[u8; CONTENT_KEY_LENGTH], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(key.into());
    let mut nonce = [0u8; NONCE_LENGTH];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|err| Error::Crypto(err.to_string()))?;

    let mut ret = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
    ret.extend_from_slice(&nonce);
    ret.extend_from_slice(&ciphertext);
    Ok(ret)
}

pub fn decrypt(key: &[u8; CONTENT_KEY_LENGTH], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < NONCE_LENGTH {
        return Err(Error::Crypto("ciphertext is not long enough".to_string()));
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LENGTH);
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|err| Error::Crypto(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{decrypt, encrypt, generate_key, NONCE_LENGTH};

    #[test]
    fn test_decrypts_with_same_key() {
        let key = generate_key();
        let ciphertext = encrypt(&key, b"somedata").unwrap();
        assert_eq!(decrypt(&key, &ciphertext).unwrap(), b"somedata");
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let key = generate_key();
        let a = encrypt(&key, b"somedata").unwrap();
        let b = encrypt(&key, b"somedata").unwrap();
        assert_ne!(a[..NONCE_LENGTH], b[..NONCE_LENGTH]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let ciphertext = encrypt(&generate_key(), b"somedata").unwrap();
        assert!(decrypt(&generate_key(), &ciphertext).is_err());
    }

    #[test]
    fn test_tampered_or_truncated_fails() {
        let key = generate_key();
        let mut ciphertext = encrypt(&key, b"somedata").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;
        assert!(decrypt(&key, &ciphertext).is_err());
        assert!(decrypt(&key, &ciphertext[..4]).is_err());
    }
}
