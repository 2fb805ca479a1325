//! Credential vault for platform OAuth tokens
//!
//! Tokens are encrypted at rest with the `age` passphrase format, keyed by the
//! symmetric key from `[security] encryption_key`, and stored base64-encoded
//! in the accounts table. Decryption fails closed: corrupted ciphertext or a
//! rotated key surfaces `CredentialError::DecryptionFailed` rather than an
//! empty or garbage token.

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use zeroize::Zeroizing;

use crate::error::{CredentialError, Result};

/// Minimum length for the symmetric encryption key.
pub const MIN_KEY_LEN: usize = 16;

pub struct CredentialVault {
    key: Zeroizing<String>,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault")
            .field("key", &"<redacted>")
            .finish()
    }
}

impl CredentialVault {
    /// Build a vault around the configured key.
    ///
    /// Rejects short keys up front so a misconfigured deployment fails at
    /// startup instead of writing weakly protected tokens.
    pub fn new(encryption_key: &str) -> Result<Self> {
        if encryption_key.len() < MIN_KEY_LEN {
            return Err(CredentialError::WeakKey(MIN_KEY_LEN).into());
        }
        Ok(Self {
            key: Zeroizing::new(encryption_key.to_string()),
        })
    }

    /// Encrypt a token and return it base64-encoded for column storage.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let encryptor = age::Encryptor::with_user_passphrase(age::secrecy::Secret::new(
            self.key.to_string(),
        ));

        let mut encrypted = vec![];
        let mut writer = encryptor
            .wrap_output(&mut encrypted)
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;

        writer
            .write_all(plaintext.as_bytes())
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;

        writer
            .finish()
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;

        Ok(BASE64.encode(encrypted))
    }

    /// Decrypt a base64-encoded ciphertext produced by [`encrypt`].
    ///
    /// Any failure along the way (bad base64, unrecognized format, wrong key,
    /// tampered ciphertext) maps to `DecryptionFailed`.
    ///
    /// [`encrypt`]: CredentialVault::encrypt
    pub fn decrypt(&self, ciphertext_b64: &str) -> Result<Zeroizing<String>> {
        let ciphertext = BASE64
            .decode(ciphertext_b64)
            .map_err(|_| CredentialError::DecryptionFailed)?;

        let decryptor = match age::Decryptor::new(&ciphertext[..]) {
            Ok(age::Decryptor::Passphrase(d)) => d,
            Ok(_) => return Err(CredentialError::DecryptionFailed.into()),
            Err(_) => return Err(CredentialError::DecryptionFailed.into()),
        };

        let mut decrypted = vec![];
        let mut reader = decryptor
            .decrypt(&age::secrecy::Secret::new(self.key.to_string()), None)
            .map_err(|_| CredentialError::DecryptionFailed)?;

        reader
            .read_to_end(&mut decrypted)
            .map_err(|_| CredentialError::DecryptionFailed)?;

        let plaintext =
            String::from_utf8(decrypted).map_err(|_| CredentialError::DecryptionFailed)?;
        Ok(Zeroizing::new(plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForgeError;

    #[test]
    fn test_roundtrip() {
        let vault = CredentialVault::new("a-long-enough-test-key").unwrap();
        let token = "EAABsbCS1234|page-scoped-token";
        let encrypted = vault.encrypt(token).unwrap();
        assert_ne!(encrypted, token);
        let decrypted = vault.decrypt(&encrypted).unwrap();
        assert_eq!(&*decrypted, token);
    }

    #[test]
    fn test_weak_key_rejected() {
        let err = CredentialVault::new("short").unwrap_err();
        assert!(matches!(
            err,
            ForgeError::Credential(CredentialError::WeakKey(_))
        ));
    }

    #[test]
    fn test_wrong_key_fails_closed() {
        let vault = CredentialVault::new("a-long-enough-test-key").unwrap();
        let encrypted = vault.encrypt("secret-token").unwrap();

        let other = CredentialVault::new("a-different-test-key!").unwrap();
        let err = other.decrypt(&encrypted).unwrap_err();
        assert!(matches!(
            err,
            ForgeError::Credential(CredentialError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails_closed() {
        let vault = CredentialVault::new("a-long-enough-test-key").unwrap();
        let encrypted = vault.encrypt("secret-token").unwrap();

        let mut bytes = BASE64.decode(&encrypted).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let tampered = BASE64.encode(bytes);

        let err = vault.decrypt(&tampered).unwrap_err();
        assert!(matches!(
            err,
            ForgeError::Credential(CredentialError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_garbage_input_fails_closed() {
        let vault = CredentialVault::new("a-long-enough-test-key").unwrap();
        assert!(vault.decrypt("not-base64!!!").is_err());
        assert!(vault.decrypt(&BASE64.encode(b"not an age payload")).is_err());
    }
}
