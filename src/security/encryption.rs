// Security manager for EchoNote Core
// AES-256-GCM authenticated encryption with machine-bound key derivation

use std::fs;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};
use crate::storage::{atomic_write_bytes, set_file_permissions};

use super::machine_id::get_machine_id;

const SALT_FILE: &str = ".salt";
const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const PBKDF2_ITERATIONS: u32 = 100_000;

/// Encrypts and decrypts sensitive data with a key derived from the machine
/// identifier and a locally persisted salt.
///
/// Output format is `base64(nonce || ciphertext || tag)`. Resetting the salt
/// deliberately makes prior ciphertexts undecryptable.
pub struct SecurityManager {
    config_dir: PathBuf,
    salt_file: PathBuf,
    salt: [u8; SALT_LEN],
    key: Key<Aes256Gcm>,
}

impl SecurityManager {
    pub fn new(config_dir: &Path) -> Result<Self> {
        fs::create_dir_all(config_dir).context("Failed to create security config directory")?;

        let salt_file = config_dir.join(SALT_FILE);
        let salt = load_or_create_salt(&salt_file)?;
        let key = derive_key(config_dir, &salt);

        log::info!("Security manager initialized");

        Ok(Self {
            config_dir: config_dir.to_path_buf(),
            salt_file,
            salt,
            key,
        })
    }

    /// Encrypt a UTF-8 string. Empty input maps to empty output.
    pub fn encrypt(&self, plaintext: &str) -> CoreResult<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let cipher = Aes256Gcm::new(&self.key);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CoreError::fatal("encryption failed"))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(combined))
    }

    /// Decrypt a base64 blob produced by `encrypt`. Tag verification failure
    /// surfaces as `Integrity`.
    pub fn decrypt(&self, encrypted: &str) -> CoreResult<String> {
        if encrypted.is_empty() {
            return Ok(String::new());
        }

        let combined = BASE64
            .decode(encrypted)
            .map_err(|e| CoreError::integrity(format!("invalid base64 ciphertext: {e}")))?;
        if combined.len() <= NONCE_LEN {
            return Err(CoreError::integrity("ciphertext too short"));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(&self.key);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CoreError::integrity("authentication tag verification failed"))?;

        String::from_utf8(plaintext)
            .map_err(|e| CoreError::integrity(format!("decrypted data is not UTF-8: {e}")))
    }

    /// Encrypt every string leaf of a JSON tree; other leaves pass through.
    pub fn encrypt_value(&self, value: &Value) -> CoreResult<Value> {
        match value {
            Value::String(s) => Ok(Value::String(self.encrypt(s)?)),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, inner) in map {
                    out.insert(key.clone(), self.encrypt_value(inner)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    /// Decrypt every string leaf. Leaves that fail to decrypt keep their
    /// original value so a partially legacy file stays usable.
    pub fn decrypt_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => match self.decrypt(s) {
                Ok(plain) => Value::String(plain),
                Err(_) => Value::String(s.clone()),
            },
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, inner) in map {
                    out.insert(key.clone(), self.decrypt_value(inner));
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    /// Salted SHA-256 password hash, base64 encoded.
    pub fn hash_password(&self, password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        hasher.update(self.salt);
        BASE64.encode(hasher.finalize())
    }

    pub fn verify_password(&self, password: &str, hashed: &str) -> bool {
        self.hash_password(password) == hashed
    }

    /// Hex slice of the derived key used to key the database cipher.
    pub fn database_key_hex(&self) -> String {
        self.key.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Regenerate the salt and re-derive the key. All previously encrypted
    /// data becomes unrecoverable.
    pub fn reset_encryption_key(&mut self) -> Result<()> {
        log::warn!("Resetting encryption key - all encrypted data will be lost");

        if self.salt_file.exists() {
            fs::remove_file(&self.salt_file).context("Failed to remove old salt file")?;
        }

        self.salt = load_or_create_salt(&self.salt_file)?;
        self.key = derive_key(&self.config_dir, &self.salt);

        log::info!("Encryption key reset complete");
        Ok(())
    }
}

fn load_or_create_salt(salt_file: &Path) -> Result<[u8; SALT_LEN]> {
    if salt_file.exists() {
        match fs::read(salt_file) {
            Ok(raw) if raw.len() == SALT_LEN => {
                let mut salt = [0u8; SALT_LEN];
                salt.copy_from_slice(&raw);
                return Ok(salt);
            }
            Ok(raw) => log::warn!("Salt file has unexpected length {}, regenerating", raw.len()),
            Err(e) => log::warn!("Could not read salt file: {}", e),
        }
    }

    let mut salt = [0u8; SALT_LEN];
    use rand::RngCore;
    rand::rngs::OsRng.fill_bytes(&mut salt);

    atomic_write_bytes(salt_file, &salt).context("Failed to save salt file")?;
    set_file_permissions(salt_file);
    log::info!("Created new salt");

    Ok(salt)
}

fn derive_key(config_dir: &Path, salt: &[u8; SALT_LEN]) -> Key<Aes256Gcm> {
    let machine_id = get_machine_id(config_dir);

    let mut key_bytes = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        machine_id.as_bytes(),
        salt,
        PBKDF2_ITERATIONS,
        &mut key_bytes,
    );

    Key::<Aes256Gcm>::clone_from_slice(&key_bytes)
}
