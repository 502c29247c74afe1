use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Default AI budget: calls admitted per trailing minute.
pub const DEFAULT_AI_REQUESTS_PER_MINUTE: usize = 50;
/// Below this much free space the capture flow warns before taking a photo.
pub const DEFAULT_LOW_STORAGE_THRESHOLD_BYTES: u64 = 500 * 1024 * 1024;
pub const DEFAULT_RESTORE_BATCH_SIZE: usize = 5;
const DEFAULT_AI_BASE_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_AI_MODEL: &str = "claude-3-5-sonnet-20241022";

/// Initialize the keyring credential store.
///
/// On macOS, uses the protected data store so photo keys are covered by
/// iCloud Keychain backup when the user has it on. Must be called once at
/// startup before any keyring operations.
pub fn init_keyring() {
    #[cfg(target_os = "macos")]
    {
        use std::collections::HashMap;
        let config = HashMap::from([("cloud-sync", "true")]);
        match apple_native_keyring_store::protected::Store::new_with_configuration(&config) {
            Ok(store) => {
                keyring_core::set_default_store(store);
                info!("Keyring initialized (protected store, iCloud sync enabled)");
            }
            Err(e) => {
                warn!("Failed to create protected keyring store: {e}, falling back to local");
                if let Ok(store) = apple_native_keyring_store::protected::Store::new() {
                    keyring_core::set_default_store(store);
                    info!("Keyring initialized (protected store, local only)");
                }
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn default_ai_base_url() -> String {
    DEFAULT_AI_BASE_URL.to_string()
}

fn default_ai_model() -> String {
    DEFAULT_AI_MODEL.to_string()
}

fn default_requests_per_minute() -> usize {
    DEFAULT_AI_REQUESTS_PER_MINUTE
}

fn default_low_storage_threshold() -> u64 {
    DEFAULT_LOW_STORAGE_THRESHOLD_BYTES
}

fn default_restore_batch_size() -> usize {
    DEFAULT_RESTORE_BATCH_SIZE
}

/// `config.yaml` structure. Secrets live in the keyring, never here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigYaml {
    /// Override for the data directory (defaults to `~/.glow`)
    pub data_path: Option<PathBuf>,
    #[serde(default = "default_ai_base_url")]
    pub ai_base_url: String,
    #[serde(default = "default_ai_model")]
    pub ai_model: String,
    #[serde(default = "default_requests_per_minute")]
    pub ai_requests_per_minute: usize,
    /// Base URL of the hosted backend (PostgREST-style API)
    pub backend_url: Option<String>,
    pub cloud_bucket: Option<String>,
    pub cloud_region: Option<String>,
    /// Custom S3 endpoint (MinIO, R2, Supabase storage, ...)
    pub cloud_endpoint: Option<String>,
    #[serde(default = "default_low_storage_threshold")]
    pub low_storage_threshold_bytes: u64,
    #[serde(default = "default_restore_batch_size")]
    pub restore_batch_size: usize,
}

impl Default for ConfigYaml {
    fn default() -> Self {
        Self {
            data_path: None,
            ai_base_url: default_ai_base_url(),
            ai_model: default_ai_model(),
            ai_requests_per_minute: default_requests_per_minute(),
            backend_url: None,
            cloud_bucket: None,
            cloud_region: None,
            cloud_endpoint: None,
            low_storage_threshold_bytes: default_low_storage_threshold(),
            restore_batch_size: default_restore_batch_size(),
        }
    }
}

/// Application configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub dev_mode: bool,
    /// Photos, the sync queue database and config live under here
    pub data_path: PathBuf,
    pub ai_base_url: String,
    pub ai_model: String,
    pub ai_requests_per_minute: usize,
    pub backend_url: Option<String>,
    pub cloud_bucket: Option<String>,
    pub cloud_region: Option<String>,
    pub cloud_endpoint: Option<String>,
    pub low_storage_threshold_bytes: u64,
    pub restore_batch_size: usize,
}

impl Config {
    /// Dev mode (`GLOW_DEV_MODE` or a `.env` file) reads env vars,
    /// otherwise `~/.glow/config.yaml`.
    pub fn load() -> Result<Self, ConfigError> {
        let dev_mode = std::env::var("GLOW_DEV_MODE").is_ok() || dotenvy::dotenv().is_ok();
        if dev_mode {
            info!("Dev mode activated - loading from environment");
            Self::from_env()
        } else {
            info!("Production mode - loading from config.yaml");
            let home = dirs::home_dir()
                .ok_or_else(|| ConfigError::Config("Failed to get home directory".into()))?;
            Self::load_from_dir(&home.join(".glow"))
        }
    }

    fn from_env() -> Result<Self, ConfigError> {
        let env = |name: &str| std::env::var(name).ok().filter(|s| !s.is_empty());
        let parse = |name: &str| -> Result<Option<u64>, ConfigError> {
            env(name)
                .map(|v| {
                    v.parse::<u64>()
                        .map_err(|e| ConfigError::Config(format!("{}: {}", name, e)))
                })
                .transpose()
        };

        let data_path = match env("GLOW_DATA_PATH") {
            Some(p) => PathBuf::from(p),
            None => dirs::home_dir()
                .ok_or_else(|| ConfigError::Config("Failed to get home directory".into()))?
                .join(".glow-dev"),
        };

        let config = Self {
            dev_mode: true,
            data_path,
            ai_base_url: env("GLOW_AI_BASE_URL").unwrap_or_else(default_ai_base_url),
            ai_model: env("GLOW_AI_MODEL").unwrap_or_else(default_ai_model),
            ai_requests_per_minute: parse("GLOW_AI_REQUESTS_PER_MINUTE")?
                .map(|v| v as usize)
                .unwrap_or(DEFAULT_AI_REQUESTS_PER_MINUTE),
            backend_url: env("GLOW_BACKEND_URL"),
            cloud_bucket: env("GLOW_CLOUD_BUCKET"),
            cloud_region: env("GLOW_CLOUD_REGION"),
            cloud_endpoint: env("GLOW_CLOUD_ENDPOINT"),
            low_storage_threshold_bytes: parse("GLOW_LOW_STORAGE_THRESHOLD_BYTES")?
                .unwrap_or(DEFAULT_LOW_STORAGE_THRESHOLD_BYTES),
            restore_batch_size: parse("GLOW_RESTORE_BATCH_SIZE")?
                .map(|v| v as usize)
                .unwrap_or(DEFAULT_RESTORE_BATCH_SIZE),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load `config.yaml` from `glow_dir`. A missing file means defaults.
    pub fn load_from_dir(glow_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = glow_dir.join("config.yaml");
        let yaml = match std::fs::read_to_string(&config_path) {
            Ok(content) => serde_yaml::from_str::<ConfigYaml>(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config at {}, using defaults", config_path.display());
                ConfigYaml::default()
            }
            Err(e) => return Err(e.into()),
        };

        let config = Self {
            dev_mode: false,
            data_path: yaml.data_path.unwrap_or_else(|| glow_dir.to_path_buf()),
            ai_base_url: yaml.ai_base_url,
            ai_model: yaml.ai_model,
            ai_requests_per_minute: yaml.ai_requests_per_minute,
            backend_url: yaml.backend_url,
            cloud_bucket: yaml.cloud_bucket,
            cloud_region: yaml.cloud_region,
            cloud_endpoint: yaml.cloud_endpoint,
            low_storage_threshold_bytes: yaml.low_storage_threshold_bytes,
            restore_batch_size: yaml.restore_batch_size,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ai_requests_per_minute == 0 {
            return Err(ConfigError::Config(
                "ai_requests_per_minute must be at least 1".into(),
            ));
        }
        if self.restore_batch_size == 0 {
            return Err(ConfigError::Config(
                "restore_batch_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Write the non-secret settings back to `config.yaml`.
    pub fn save_to_dir(&self, glow_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(glow_dir)?;
        let yaml = ConfigYaml {
            data_path: Some(self.data_path.clone()),
            ai_base_url: self.ai_base_url.clone(),
            ai_model: self.ai_model.clone(),
            ai_requests_per_minute: self.ai_requests_per_minute,
            backend_url: self.backend_url.clone(),
            cloud_bucket: self.cloud_bucket.clone(),
            cloud_region: self.cloud_region.clone(),
            cloud_endpoint: self.cloud_endpoint.clone(),
            low_storage_threshold_bytes: self.low_storage_threshold_bytes,
            restore_batch_size: self.restore_batch_size,
        };
        std::fs::write(glow_dir.join("config.yaml"), serde_yaml::to_string(&yaml)?)?;
        Ok(())
    }

    pub fn photos_dir(&self) -> PathBuf {
        self.data_path.join("photos")
    }

    pub fn sync_queue_db_path(&self) -> PathBuf {
        self.data_path.join("sync_queue.db")
    }
}
