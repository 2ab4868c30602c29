//! TOTP Secret Encryption
//!
//! AES-256-GCM encryption for TOTP secrets stored in the database, so
//! two-factor secrets are never at rest in plaintext. Stored form is
//! hex(nonce || ciphertext || tag).

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use thiserror::Error;

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Encryption errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid encryption key length (expected 32 bytes, got {0})")]
    InvalidKeyLength(usize),

    #[error("Cipher operation failed")]
    CipherFailure,

    #[error("Invalid encrypted data format")]
    InvalidFormat,

    #[error("Hex decoding failed: {0}")]
    Hex(#[from] hex::FromHexError),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

fn cipher_for(key: &[u8]) -> CryptoResult<Aes256Gcm> {
    if key.len() != 32 {
        return Err(CryptoError::InvalidKeyLength(key.len()));
    }

    Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::CipherFailure)
}

/// Encrypt a base32 TOTP secret with a 32-byte key.
pub fn encrypt_totp_secret(secret: &str, key: &[u8]) -> CryptoResult<String> {
    let cipher = cipher_for(key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, secret.as_bytes())
        .map_err(|_| CryptoError::CipherFailure)?;

    let mut combined = nonce.to_vec();
    combined.extend_from_slice(&ciphertext);

    Ok(hex::encode(combined))
}

/// Decrypt a stored TOTP secret with the key it was encrypted under.
pub fn decrypt_totp_secret(encrypted: &str, key: &[u8]) -> CryptoResult<String> {
    let cipher = cipher_for(key)?;

    let combined = hex::decode(encrypted)?;
    if combined.len() < NONCE_LEN {
        return Err(CryptoError::InvalidFormat);
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CryptoError::CipherFailure)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidFormat)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [7u8; 32];
    const SECRET: &str = "JBSWY3DPEHPK3PXP";

    #[test]
    fn test_roundtrip() {
        let encrypted = encrypt_totp_secret(SECRET, &KEY).unwrap();
        let decrypted = decrypt_totp_secret(&encrypted, &KEY).unwrap();

        assert_eq!(decrypted, SECRET);
    }

    #[test]
    fn test_wrong_key_fails() {
        let encrypted = encrypt_totp_secret(SECRET, &KEY).unwrap();
        let other_key = [9u8; 32];

        assert!(decrypt_totp_secret(&encrypted, &other_key).is_err());
    }

    #[test]
    fn test_short_key_rejected() {
        let result = encrypt_totp_secret(SECRET, &[0u8; 16]);
        assert!(matches!(result, Err(CryptoError::InvalidKeyLength(16))));
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        assert!(matches!(
            decrypt_totp_secret("001122", &KEY),
            Err(CryptoError::InvalidFormat) | Err(CryptoError::Hex(_))
        ));
    }

    #[test]
    fn test_nonce_is_random() {
        let a = encrypt_totp_secret(SECRET, &KEY).unwrap();
        let b = encrypt_totp_secret(SECRET, &KEY).unwrap();

        assert_ne!(a, b);
        assert_eq!(decrypt_totp_secret(&a, &KEY).unwrap(), SECRET);
        assert_eq!(decrypt_totp_secret(&b, &KEY).unwrap(), SECRET);
    }
}
