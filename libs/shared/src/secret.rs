//! User-scoped secret encryption.
//!
//! SSH passwords, key passphrases, and AI API keys are stored in the
//! settings document as opaque ciphertext. The key material lives in a
//! key file beside the settings document, readable only by the current
//! user; every other component treats ciphertext as an uninterpreted
//! base64 string.
//!
//! Format: `base64(nonce || aes-256-gcm ciphertext)`, with the AES key
//! derived from the key file's random seed via PBKDF2-HMAC-SHA256.

use std::fs;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

const AES_KEY_SIZE: usize = 32;
const SALT_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const PBKDF2_ITERATIONS: u32 = 600_000;

#[derive(Debug, thiserror::Error)]
pub enum SecretStoreError {
    #[error("no per-user data directory available on this platform")]
    NoDataDir,

    #[error("key file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("key file is corrupt: {0}")]
    KeyFile(String),

    #[error("ciphertext is not valid base64")]
    Encoding(#[from] base64::DecodeError),

    #[error("decryption failed (wrong key file or tampered ciphertext)")]
    Crypto,

    #[error("decrypted secret is not valid UTF-8")]
    NotUtf8,
}

/// On-disk key material. The seed is random; the derived AES key never
/// touches the disk.
#[derive(Serialize, Deserialize)]
struct KeyFile {
    version: u32,
    salt: String,
    seed: String,
}

pub struct SecretStore {
    master_key: Zeroizing<[u8; AES_KEY_SIZE]>,
}

impl SecretStore {
    /// Key file under the per-user data directory
    /// (`<data>/termweave/secret.key`).
    pub fn open_default() -> Result<Self, SecretStoreError> {
        let dir = dirs::data_dir()
            .ok_or(SecretStoreError::NoDataDir)?
            .join("termweave");
        Self::open_at(&dir)
    }

    /// Open (or create) the key file inside `dir`.
    pub fn open_at(dir: &Path) -> Result<Self, SecretStoreError> {
        fs::create_dir_all(dir)?;
        let key_path = dir.join("secret.key");
        let key_file = Self::load_or_create_key_file(&key_path)?;

        let salt = BASE64
            .decode(&key_file.salt)
            .map_err(|_| SecretStoreError::KeyFile("salt is not base64".to_string()))?;
        let seed = Zeroizing::new(
            BASE64
                .decode(&key_file.seed)
                .map_err(|_| SecretStoreError::KeyFile("seed is not base64".to_string()))?,
        );

        let mut master_key = Zeroizing::new([0u8; AES_KEY_SIZE]);
        pbkdf2_hmac::<Sha256>(&seed, &salt, PBKDF2_ITERATIONS, master_key.as_mut());

        Ok(Self { master_key })
    }

    fn load_or_create_key_file(path: &PathBuf) -> Result<KeyFile, SecretStoreError> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            return serde_json::from_str(&content)
                .map_err(|e| SecretStoreError::KeyFile(e.to_string()));
        }

        let mut salt = [0u8; SALT_SIZE];
        let mut seed = [0u8; AES_KEY_SIZE];
        getrandom::getrandom(&mut salt)
            .map_err(|e| SecretStoreError::KeyFile(format!("no entropy source: {e}")))?;
        getrandom::getrandom(&mut seed)
            .map_err(|e| SecretStoreError::KeyFile(format!("no entropy source: {e}")))?;

        let key_file = KeyFile {
            version: 1,
            salt: BASE64.encode(salt),
            seed: BASE64.encode(seed),
        };
        let content = serde_json::to_string(&key_file)
            .map_err(|e| SecretStoreError::KeyFile(e.to_string()))?;
        fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
        }

        tracing::info!(path = %path.display(), "created new secret key file");
        Ok(key_file)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, SecretStoreError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce_bytes)
            .map_err(|e| SecretStoreError::KeyFile(format!("no entropy source: {e}")))?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.master_key.as_ref()));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| SecretStoreError::Crypto)?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<String, SecretStoreError> {
        let combined = BASE64.decode(ciphertext)?;
        if combined.len() < NONCE_SIZE {
            return Err(SecretStoreError::Crypto);
        }
        let (nonce_bytes, payload) = combined.split_at(NONCE_SIZE);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.master_key.as_ref()));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), payload)
            .map_err(|_| SecretStoreError::Crypto)?;

        String::from_utf8(plaintext).map_err(|_| SecretStoreError::NotUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SecretStore::open_at(dir.path()).unwrap();

        let ciphertext = store.encrypt("hunter2").unwrap();
        assert_ne!(ciphertext, "hunter2");
        assert_eq!(store.decrypt(&ciphertext).unwrap(), "hunter2");
    }

    #[test]
    fn ciphertexts_differ_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let store = SecretStore::open_at(dir.path()).unwrap();

        let a = store.encrypt("same input").unwrap();
        let b = store.encrypt("same input").unwrap();
        assert_ne!(a, b, "nonce must differ per encryption");
        assert_eq!(store.decrypt(&a).unwrap(), store.decrypt(&b).unwrap());
    }

    #[test]
    fn key_file_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let ciphertext = {
            let store = SecretStore::open_at(dir.path()).unwrap();
            store.encrypt("persisted").unwrap()
        };
        let reopened = SecretStore::open_at(dir.path()).unwrap();
        assert_eq!(reopened.decrypt(&ciphertext).unwrap(), "persisted");
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SecretStore::open_at(dir.path()).unwrap();

        let ciphertext = store.encrypt("intact").unwrap();
        let mut bytes = BASE64.decode(&ciphertext).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let tampered = BASE64.encode(bytes);

        assert!(matches!(
            store.decrypt(&tampered),
            Err(SecretStoreError::Crypto)
        ));
    }

    #[test]
    fn garbage_input_is_an_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SecretStore::open_at(dir.path()).unwrap();
        assert!(matches!(
            store.decrypt("!!not base64!!"),
            Err(SecretStoreError::Encoding(_))
        ));
    }
}
