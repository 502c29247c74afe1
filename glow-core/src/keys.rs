use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{info, warn};

use crate::encryption::{self, EncryptionService};

const SERVICE: &str = "glow";

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring_core::Error),
    #[error("Stored key is invalid: {0}")]
    InvalidKey(#[from] encryption::EncryptionError),
    #[error("No photo key on this device for user {0}")]
    MissingPhotoKey(String),
    #[error("Key storage unavailable: {0}")]
    Unavailable(String),
}

struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    fail_reads: AtomicBool,
}

impl MemoryStore {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn get(&self, account: &str) -> Result<Option<String>, KeyError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(KeyError::Unavailable(format!("cannot read {}", account)));
        }
        Ok(self.entries().get(account).cloned())
    }
}

#[derive(Clone)]
enum Backend {
    /// OS keyring (Keychain / Secret Service / Credential Manager)
    Keyring,
    /// Process memory only. Dev mode and tests.
    Memory(Arc<MemoryStore>),
}

/// Manages on-device secrets: per-user photo encryption keys, the AI API key,
/// backend and S3 credentials.
///
/// Photo keys are created lazily on first use and never leave the device.
/// Creation is single-flight per user so two concurrent first uploads cannot
/// generate two different keys.
#[derive(Clone)]
pub struct KeyService {
    backend: Backend,
    creation_locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl KeyService {
    /// Secrets in the OS keyring.
    pub fn keyring() -> Self {
        Self {
            backend: Backend::Keyring,
            creation_locks: Arc::default(),
        }
    }

    /// Secrets in memory, seeded from `GLOW_*` env vars.
    pub fn in_memory() -> Self {
        let mut seed = HashMap::new();
        for (account, var) in [
            ("ai_api_key", "GLOW_AI_API_KEY"),
            ("backend_api_key", "GLOW_BACKEND_API_KEY"),
            ("s3_access_key", "GLOW_S3_ACCESS_KEY"),
            ("s3_secret_key", "GLOW_S3_SECRET_KEY"),
        ] {
            if let Some(value) = std::env::var(var).ok().filter(|v| !v.is_empty()) {
                seed.insert(account.to_string(), value);
            }
        }

        Self {
            backend: Backend::Memory(Arc::new(MemoryStore {
                entries: Mutex::new(seed),
                fail_reads: AtomicBool::new(false),
            })),
            creation_locks: Arc::default(),
        }
    }

    pub fn for_mode(dev_mode: bool) -> Self {
        if dev_mode {
            Self::in_memory()
        } else {
            Self::keyring()
        }
    }

    /// Make every in-memory read fail, as a locked or broken keyring would.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn fail_reads(&self, fail: bool) {
        if let Backend::Memory(store) = &self.backend {
            store.fail_reads.store(fail, Ordering::SeqCst);
        }
    }

    /// Ok(None) only when nothing is stored. Any other failure is an error.
    fn read(&self, account: &str) -> Result<Option<String>, KeyError> {
        let value = match &self.backend {
            Backend::Keyring => match keyring_core::Entry::new(SERVICE, account)?.get_password() {
                Ok(value) => Some(value),
                Err(keyring_core::Error::NoEntry) => None,
                Err(e) => return Err(KeyError::Keyring(e)),
            },
            Backend::Memory(store) => store.get(account)?,
        };
        Ok(value.filter(|v| !v.is_empty()))
    }

    /// For optional credentials: a read failure is logged and treated as absent.
    fn read_optional(&self, account: &str) -> Option<String> {
        self.read(account).unwrap_or_else(|e| {
            warn!("Failed to read {}: {}", account, e);
            None
        })
    }

    fn write(&self, account: &str, value: &str) -> Result<(), KeyError> {
        match &self.backend {
            Backend::Keyring => {
                keyring_core::Entry::new(SERVICE, account)?.set_password(value)?;
            }
            Backend::Memory(store) => {
                store
                    .entries()
                    .insert(account.to_string(), value.to_string());
            }
        }
        Ok(())
    }

    fn delete(&self, account: &str) -> Result<(), KeyError> {
        match &self.backend {
            Backend::Keyring => {
                match keyring_core::Entry::new(SERVICE, account)?.delete_credential() {
                    Ok(()) | Err(keyring_core::Error::NoEntry) => Ok(()),
                    Err(e) => Err(KeyError::Keyring(e)),
                }
            }
            Backend::Memory(store) => {
                store.entries().remove(account);
                Ok(())
            }
        }
    }

    fn photo_key_account(user_id: &str) -> String {
        format!("photo_key:{}", user_id)
    }

    fn creation_lock(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .creation_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(user_id.to_string()).or_default().clone()
    }

    /// Read a user's photo key. Returns None if none has been created yet;
    /// a keyring that cannot be read is an error, never None.
    pub fn get_photo_key(&self, user_id: &str) -> Result<Option<EncryptionService>, KeyError> {
        self.read(&Self::photo_key_account(user_id))?
            .map(|hex| EncryptionService::from_hex(&hex).map_err(KeyError::from))
            .transpose()
    }

    /// Get the user's photo key, creating and storing a new one if absent.
    pub async fn get_or_create_photo_key(
        &self,
        user_id: &str,
    ) -> Result<EncryptionService, KeyError> {
        if let Some(existing) = self.get_photo_key(user_id)? {
            return Ok(existing);
        }

        let lock = self.creation_lock(user_id);
        let _guard = lock.lock().await;

        // Another task may have created it while we waited.
        if let Some(existing) = self.get_photo_key(user_id)? {
            return Ok(existing);
        }

        let key = encryption::generate_random_key();
        self.write(&Self::photo_key_account(user_id), &hex::encode(key))?;
        let service = EncryptionService::new_with_key(&key);
        info!(
            user_id,
            fingerprint = %service.fingerprint(),
            "Generated and saved new photo encryption key"
        );
        Ok(service)
    }

    /// Import a photo key (e.g. recovered from another device).
    pub fn set_photo_key(&self, user_id: &str, key_hex: &str) -> Result<(), KeyError> {
        let service = EncryptionService::from_hex(key_hex)?;
        self.write(&Self::photo_key_account(user_id), key_hex.trim())?;
        info!(user_id, fingerprint = %service.fingerprint(), "Photo key imported");
        Ok(())
    }

    /// The user's existing photo key. Never creates one: a new key could not
    /// decrypt anything already backed up.
    pub fn require_photo_key(&self, user_id: &str) -> Result<EncryptionService, KeyError> {
        self.get_photo_key(user_id)?
            .ok_or_else(|| KeyError::MissingPhotoKey(user_id.to_string()))
    }

    /// Export the hex photo key so the user can keep a recovery copy.
    pub fn export_photo_key(&self, user_id: &str) -> Result<Option<String>, KeyError> {
        self.read(&Self::photo_key_account(user_id))
    }

    pub fn get_ai_api_key(&self) -> Option<String> {
        self.read_optional("ai_api_key")
    }

    pub fn set_ai_api_key(&self, value: &str) -> Result<(), KeyError> {
        self.write("ai_api_key", value)?;
        info!("AI API key saved");
        Ok(())
    }

    pub fn get_backend_api_key(&self) -> Option<String> {
        self.read_optional("backend_api_key")
    }

    pub fn set_backend_api_key(&self, value: &str) -> Result<(), KeyError> {
        self.write("backend_api_key", value)?;
        info!("Backend API key saved");
        Ok(())
    }

    /// S3 access/secret pair. None unless both are stored.
    pub fn get_s3_credentials(&self) -> Option<(String, String)> {
        Some((
            self.read_optional("s3_access_key")?,
            self.read_optional("s3_secret_key")?,
        ))
    }

    pub fn set_s3_credentials(&self, access_key: &str, secret_key: &str) -> Result<(), KeyError> {
        self.write("s3_access_key", access_key)?;
        self.write("s3_secret_key", secret_key)?;
        info!("S3 credentials saved");
        Ok(())
    }

    pub fn delete_s3_credentials(&self) -> Result<(), KeyError> {
        for account in ["s3_access_key", "s3_secret_key"] {
            if let Err(e) = self.delete(account) {
                warn!("Failed to delete {}: {}", account, e);
                return Err(e);
            }
        }
        Ok(())
    }
}
