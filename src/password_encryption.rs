use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, OsRng, rand_core::RngCore},
};
use sha2::{Digest, Sha256};
use thiserror::Error;

const ENCRYPTED_PREFIX: &str = "enc:";

#[derive(Error, Debug)]
pub enum PasswordEncryptionError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("Invalid encrypted data format")]
    InvalidFormat,
}

/// AES-256-GCM cipher for passwords stored in the connection repositories
///
/// The key is derived from the session secret, so rotating `SESSION_SECRET`
/// makes previously stored passwords unreadable.
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; 32],
}

impl SecretCipher {
    pub fn from_secret(secret: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        // Fixed salt so the key differs from other uses of the same secret
        hasher.update(b"clickhouse-owl-connection-secrets-v1");

        let hash = hasher.finalize();
        let mut key = [0u8; 32];
        key.copy_from_slice(&hash);
        Self { key }
    }

    /// Encrypt with a random nonce
    /// Returns: "enc:" + hex(nonce (12 bytes) + ciphertext + tag)
    pub fn encrypt(&self, plaintext: &str) -> Result<String, PasswordEncryptionError> {
        if is_encrypted(plaintext) {
            return Ok(plaintext.to_string());
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| PasswordEncryptionError::EncryptionFailed(e.to_string()))?;

        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| PasswordEncryptionError::EncryptionFailed(e.to_string()))?;

        let mut result = Vec::with_capacity(12 + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);

        Ok(format!("{ENCRYPTED_PREFIX}{}", hex::encode(result)))
    }

    /// Decrypt a value produced by [`SecretCipher::encrypt`]; plaintext passes through
    pub fn decrypt(&self, stored: &str) -> Result<String, PasswordEncryptionError> {
        let Some(hex_data) = stored.strip_prefix(ENCRYPTED_PREFIX) else {
            return Ok(stored.to_string());
        };

        let encrypted_data =
            hex::decode(hex_data).map_err(|_| PasswordEncryptionError::InvalidFormat)?;
        if encrypted_data.len() < 12 {
            return Err(PasswordEncryptionError::InvalidFormat);
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| PasswordEncryptionError::DecryptionFailed(e.to_string()))?;

        let (nonce_bytes, ciphertext) = encrypted_data.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext_bytes = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| PasswordEncryptionError::DecryptionFailed(e.to_string()))?;

        String::from_utf8(plaintext_bytes)
            .map_err(|e| PasswordEncryptionError::DecryptionFailed(e.to_string()))
    }
}

/// Check if a password string is encrypted (starts with "enc:" prefix)
pub fn is_encrypted(password: &str) -> bool {
    password.starts_with(ENCRYPTED_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_password() {
        let cipher = SecretCipher::from_secret("session-secret");
        let original_password = "my_secret_password_123!";

        let encrypted = cipher.encrypt(original_password).expect("Encryption should succeed");
        assert!(encrypted.starts_with("enc:"));
        assert_ne!(encrypted, original_password);

        let decrypted = cipher.decrypt(&encrypted).expect("Decryption should succeed");
        assert_eq!(decrypted, original_password);
    }

    #[test]
    fn test_plaintext_password_passthrough() {
        let cipher = SecretCipher::from_secret("session-secret");
        let result = cipher.decrypt("plaintext_password").expect("Should handle plaintext");
        assert_eq!(result, "plaintext_password");
    }

    #[test]
    fn test_wrong_secret_cannot_decrypt() {
        let encrypted = SecretCipher::from_secret("one").encrypt("pw").unwrap();
        let result = SecretCipher::from_secret("two").decrypt(&encrypted);
        assert!(matches!(
            result,
            Err(PasswordEncryptionError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_invalid_encrypted_format() {
        let cipher = SecretCipher::from_secret("session-secret");
        assert!(matches!(
            cipher.decrypt("enc:invalid-hex-data"),
            Err(PasswordEncryptionError::InvalidFormat)
        ));
        assert!(matches!(
            cipher.decrypt("enc:0123456789"),
            Err(PasswordEncryptionError::InvalidFormat)
        ));
    }

    #[test]
    fn test_multiple_encryptions_are_different() {
        let cipher = SecretCipher::from_secret("session-secret");
        let encrypted1 = cipher.encrypt("same_password").unwrap();
        let encrypted2 = cipher.encrypt("same_password").unwrap();

        assert_ne!(encrypted1, encrypted2);
        assert_eq!(cipher.decrypt(&encrypted1).unwrap(), "same_password");
        assert_eq!(cipher.decrypt(&encrypted2).unwrap(), "same_password");
    }

    #[test]
    fn test_already_encrypted_is_not_double_encrypted() {
        let cipher = SecretCipher::from_secret("session-secret");
        let encrypted = cipher.encrypt("pw").unwrap();
        assert_eq!(cipher.encrypt(&encrypted).unwrap(), encrypted);
    }
}
