//! Wiring: builds every service from config and shares them.
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use crate::ai::{AiGateway, AiService, GatewayConfig, HttpAiClient};
use crate::backend::{Backend, BackendError, PhotoRecord, RestBackend};
use crate::config::{Config, ConfigError};
use crate::keys::KeyService;
use crate::retry::RetryPolicy;
use crate::session::{spawn_outbox_worker, SessionService};
use crate::storage::{
    BucketError, LocalPhotoStore, PhotoBucket, PhotoTransfer, S3Config, S3PhotoBucket,
    StorageError,
};
use crate::sync::{
    BackupManager, NetworkMonitor, QueueStore, RestorationEngine, SyncError, SyncQueue,
};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Not configured: {0}")]
    NotConfigured(String),
    #[error("Bucket error: {0}")]
    Bucket(#[from] BucketError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Every long-lived service, built once at startup.
pub struct CoreServices {
    pub config: Config,
    pub keys: KeyService,
    pub backend: Arc<dyn Backend>,
    pub local: LocalPhotoStore,
    pub transfer: PhotoTransfer,
    pub network: NetworkMonitor,
    pub sync_queue: SyncQueue,
    pub backup: BackupManager,
    pub restoration: RestorationEngine,
    /// None when no AI key is stored
    pub ai: Option<AiService>,
    pub sessions: Arc<SessionService>,
    network_watcher: JoinHandle<()>,
}

impl CoreServices {
    /// Build against the configured REST backend and S3 bucket.
    pub async fn from_config(config: Config, network: NetworkMonitor) -> Result<Self, AppError> {
        let keys = KeyService::for_mode(config.dev_mode);

        let backend_url = config
            .backend_url
            .clone()
            .ok_or_else(|| AppError::NotConfigured("backend_url".into()))?;
        let backend_key = keys
            .get_backend_api_key()
            .ok_or_else(|| AppError::NotConfigured("backend API key".into()))?;
        let backend: Arc<dyn Backend> = Arc::new(RestBackend::new(&backend_url, &backend_key));

        let s3 = S3Config::from_config(&config, &keys)
            .ok_or_else(|| AppError::NotConfigured("cloud bucket or S3 credentials".into()))?;
        let bucket: Arc<dyn PhotoBucket> = Arc::new(S3PhotoBucket::new(s3).await?);

        Self::build(config, keys, backend, bucket, network).await
    }

    /// Build from explicit collaborators.
    pub async fn build(
        config: Config,
        keys: KeyService,
        backend: Arc<dyn Backend>,
        bucket: Arc<dyn PhotoBucket>,
        network: NetworkMonitor,
    ) -> Result<Self, AppError> {
        let local = LocalPhotoStore::new(config.photos_dir(), config.low_storage_threshold_bytes);
        let transfer = PhotoTransfer::new(bucket, keys.clone(), local.clone());

        let store = QueueStore::open(&config.sync_queue_db_path())
            .await
            .map_err(SyncError::from)?;
        let sync_queue = SyncQueue::new(store, transfer.clone(), backend.clone(), network.clone());
        sync_queue.load().await?;
        let network_watcher = sync_queue.spawn_network_watcher();

        let backup = BackupManager::new(backend.clone(), sync_queue.clone(), transfer.clone());
        let restoration = RestorationEngine::new(backend.clone(), transfer.clone())
            .with_batch_size(config.restore_batch_size);

        let ai = keys.get_ai_api_key().map(|api_key| {
            let gateway =
                AiGateway::start(GatewayConfig::with_budget(config.ai_requests_per_minute));
            let client = Arc::new(HttpAiClient::new(config.ai_base_url.clone(), api_key));
            AiService::new(gateway, client, config.ai_model.clone())
        });
        if ai.is_none() {
            info!("No AI API key stored, AI features disabled");
        }

        let (outbox, _outbox_worker) =
            spawn_outbox_worker(backend.clone(), RetryPolicy::PERSISTENCE);
        let sessions = Arc::new(SessionService::new(backend.clone(), outbox));

        info!("Core services ready (data at {})", config.data_path.display());
        Ok(Self {
            config,
            keys,
            backend,
            local,
            transfer,
            network,
            sync_queue,
            backup,
            restoration,
            ai,
            sessions,
            network_watcher,
        })
    }

    /// Save a new photo, record it, and queue it for backup if the user has
    /// backup on.
    pub async fn capture_photo(
        &self,
        user_id: &str,
        image: &[u8],
    ) -> Result<PhotoRecord, AppError> {
        let photo_id = uuid::Uuid::new_v4().to_string();
        let path = self.local.save_photo(user_id, &photo_id, image).await?;
        let record = PhotoRecord::new_local(&photo_id, user_id, &path.to_string_lossy());
        self.backend.create_photo_record(&record).await?;

        if self.backend.is_cloud_backup_enabled(user_id).await? {
            self.sync_queue.enqueue(&photo_id, user_id, &path).await?;
        }
        Ok(record)
    }
}

impl Drop for CoreServices {
    fn drop(&mut self) {
        self.network_watcher.abort();
    }
}
