use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::network::NetworkMonitor;
use super::store::{QueueStore, SyncQueueItem};
use super::SyncError;
use crate::backend::{Backend, PhotoUpdate};
use crate::storage::PhotoTransfer;

/// Failed uploads before an item is dropped and its photo marked failed.
pub const MAX_SYNC_RETRIES: u32 = 3;

struct Inner {
    items: Mutex<Vec<SyncQueueItem>>,
    store: QueueStore,
    transfer: PhotoTransfer,
    backend: Arc<dyn Backend>,
    network: NetworkMonitor,
    draining: AtomicBool,
}

/// Photos waiting for backup, drained only on WiFi.
///
/// Items live in SQLite; the in-memory list mirrors the table. A drain
/// works from a snapshot taken when it starts, one item at a time, and
/// finishes the snapshot even if WiFi drops part way. Each item is rechecked
/// against the live queue and the user's backup setting before it uploads.
/// Only one drain runs at once; a second call while draining returns 0
/// immediately.
#[derive(Clone)]
pub struct SyncQueue {
    inner: Arc<Inner>,
}

/// Clears the drain flag on every exit path.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

enum ItemOutcome {
    Uploaded,
    Dropped,
    Failed,
    /// Left for a later drain
    Deferred,
}

impl SyncQueue {
    pub fn new(
        store: QueueStore,
        transfer: PhotoTransfer,
        backend: Arc<dyn Backend>,
        network: NetworkMonitor,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(Vec::new()),
                store,
                transfer,
                backend,
                network,
                draining: AtomicBool::new(false),
            }),
        }
    }

    /// Load persisted items. Call once at startup.
    pub async fn load(&self) -> Result<usize, SyncError> {
        let persisted = self.inner.store.list().await?;
        let count = persisted.len();
        *self.inner.items.lock().await = persisted;
        if count > 0 {
            info!("Loaded {} pending uploads", count);
        }
        Ok(count)
    }

    /// Queue without draining. Returns false if the photo was already queued.
    pub async fn push(
        &self,
        photo_id: &str,
        user_id: &str,
        local_path: &Path,
    ) -> Result<bool, SyncError> {
        let mut items = self.inner.items.lock().await;
        if items.iter().any(|i| i.photo_id == photo_id) {
            debug!(photo_id, "Photo already queued");
            return Ok(false);
        }

        let item = SyncQueueItem::new(photo_id, user_id, local_path);
        self.inner.store.insert(&item).await?;
        items.push(item);
        drop(items);

        if let Err(e) = self
            .inner
            .backend
            .update_photo_record(photo_id, &PhotoUpdate::Queued)
            .await
        {
            warn!(photo_id, "Failed to mark photo pending: {}", e);
        }
        debug!(photo_id, "Queued photo for backup");
        Ok(true)
    }

    /// Queue a photo and try to drain.
    pub async fn enqueue(
        &self,
        photo_id: &str,
        user_id: &str,
        local_path: &Path,
    ) -> Result<bool, SyncError> {
        let added = self.push(photo_id, user_id, local_path).await?;
        self.process_queue().await;
        Ok(added)
    }

    /// Drain once if the network allows. Returns the number uploaded.
    pub async fn process_queue(&self) -> usize {
        if self.inner.draining.swap(true, Ordering::SeqCst) {
            debug!("Sync queue already draining");
            return 0;
        }
        let _guard = DrainGuard(&self.inner.draining);

        if !self.inner.network.current().allows_sync() {
            debug!("Not on WiFi, sync queue waits");
            return 0;
        }

        let snapshot = self.inner.items.lock().await.clone();
        if snapshot.is_empty() {
            return 0;
        }
        info!(pending = snapshot.len(), "Draining sync queue");

        let mut uploaded = 0;
        let mut failed = 0;

        // Runs the whole snapshot even if WiFi drops part way
        for item in &snapshot {
            match self.process_item(item).await {
                ItemOutcome::Uploaded => uploaded += 1,
                ItemOutcome::Failed => failed += 1,
                ItemOutcome::Dropped | ItemOutcome::Deferred => {}
            }
        }

        info!(uploaded, failed, "Sync queue drain finished");
        uploaded
    }

    async fn is_queued(&self, photo_id: &str) -> bool {
        self.inner
            .items
            .lock()
            .await
            .iter()
            .any(|i| i.photo_id == photo_id)
    }

    async fn process_item(&self, item: &SyncQueueItem) -> ItemOutcome {
        if !self.is_queued(&item.photo_id).await {
            debug!(photo_id = %item.photo_id, "Removed since the drain started, skipping");
            return ItemOutcome::Dropped;
        }

        match self.inner.backend.is_cloud_backup_enabled(&item.user_id).await {
            Ok(true) => {}
            Ok(false) => {
                self.remove(&item.photo_id).await;
                return ItemOutcome::Dropped;
            }
            Err(e) => {
                warn!(user_id = %item.user_id, "Could not read backup setting: {}", e);
                return ItemOutcome::Deferred;
            }
        }

        if !tokio::fs::try_exists(&item.local_path).await.unwrap_or(false) {
            warn!(
                photo_id = %item.photo_id,
                "Local file {} is gone, dropping from queue",
                item.local_path.display()
            );
            self.remove(&item.photo_id).await;
            return ItemOutcome::Dropped;
        }

        let uploaded = match self
            .inner
            .transfer
            .upload(&item.local_path, &item.photo_id, &item.user_id)
            .await
        {
            Ok(uploaded) => uploaded,
            Err(e) => {
                let e = SyncError::from(e);
                self.record_failure(&item.photo_id, &e).await;
                return ItemOutcome::Failed;
            }
        };

        // Backup was turned off or the item cleared while the upload ran
        if !self.is_queued(&item.photo_id).await {
            info!(photo_id = %item.photo_id, "Dequeued during upload, discarding remote copy");
            if let Err(e) = self.inner.transfer.delete_remote(&uploaded.remote_path).await {
                warn!(photo_id = %item.photo_id, "Failed to delete orphaned upload: {}", e);
            }
            return ItemOutcome::Dropped;
        }

        let recorded = self
            .inner
            .backend
            .update_photo_record(
                &item.photo_id,
                &PhotoUpdate::Uploaded {
                    remote_path: uploaded.remote_path,
                    remote_url: uploaded.remote_url,
                    uploaded_at: uploaded.uploaded_at,
                },
            )
            .await;

        match recorded {
            Ok(()) => {
                self.remove(&item.photo_id).await;
                ItemOutcome::Uploaded
            }
            Err(e) => {
                self.record_failure(&item.photo_id, &SyncError::from(e)).await;
                ItemOutcome::Failed
            }
        }
    }

    async fn record_failure(&self, photo_id: &str, error: &SyncError) {
        let retry_count = {
            let mut items = self.inner.items.lock().await;
            match items.iter_mut().find(|i| i.photo_id == photo_id) {
                Some(item) => {
                    item.retry_count += 1;
                    item.retry_count
                }
                // Removed while we were uploading
                None => return,
            }
        };

        if retry_count >= MAX_SYNC_RETRIES {
            warn!(
                photo_id,
                "Upload failed {} times, giving up: {}", retry_count, error
            );
            self.remove(photo_id).await;
            if let Err(e) = self
                .inner
                .backend
                .update_photo_record(photo_id, &PhotoUpdate::SyncFailed)
                .await
            {
                warn!(photo_id, "Failed to mark photo sync failed: {}", e);
            }
        } else {
            warn!(
                photo_id,
                "Upload failed (attempt {}/{}): {}", retry_count, MAX_SYNC_RETRIES, error
            );
            if let Err(e) = self.inner.store.set_retry_count(photo_id, retry_count).await {
                warn!(photo_id, "Failed to persist retry count: {}", e);
            }
        }
    }

    /// Drop an item. Returns whether it was queued.
    pub async fn remove(&self, photo_id: &str) -> bool {
        let removed = {
            let mut items = self.inner.items.lock().await;
            let before = items.len();
            items.retain(|i| i.photo_id != photo_id);
            items.len() != before
        };
        if let Err(e) = self.inner.store.remove(photo_id).await {
            warn!(photo_id, "Failed to remove queue row: {}", e);
        }
        removed
    }

    /// Manual "sync now". Refuses when not on WiFi.
    pub async fn sync_now(&self) -> Result<usize, SyncError> {
        if !self.inner.network.current().is_wifi {
            return Err(SyncError::NotOnWifi);
        }
        Ok(self.process_queue().await)
    }

    /// Drain whenever the network comes back to WiFi.
    pub fn spawn_network_watcher(&self) -> JoinHandle<()> {
        let queue = self.clone();
        let mut rx = self.inner.network.subscribe();
        tokio::spawn(async move {
            let mut could_sync = rx.borrow_and_update().allows_sync();
            while rx.changed().await.is_ok() {
                let can_sync = rx.borrow_and_update().allows_sync();
                if can_sync && !could_sync {
                    info!("WiFi available, draining sync queue");
                    queue.process_queue().await;
                }
                could_sync = can_sync;
            }
            debug!("Network watcher stopped");
        })
    }

    pub async fn pending(&self) -> Vec<SyncQueueItem> {
        self.inner.items.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) -> Result<(), SyncError> {
        self.inner.items.lock().await.clear();
        let removed = self.inner.store.clear().await?;
        info!("Cleared {} items from sync queue", removed);
        Ok(())
    }

    pub async fn clear_user(&self, user_id: &str) -> Result<(), SyncError> {
        self.inner
            .items
            .lock()
            .await
            .retain(|i| i.user_id != user_id);
        let removed = self.inner.store.clear_user(user_id).await?;
        info!(user_id, "Cleared {} items from sync queue", removed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, PhotoRecord, PhotoSyncStatus};
    use crate::keys::KeyService;
    use crate::storage::{BucketError, LocalPhotoStore, MemoryBucket, PhotoBucket};
    use crate::sync::network::NetworkState;
    use async_trait::async_trait;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use tempfile::TempDir;

    /// Memory bucket that runs a hook once, right after the first write.
    struct HookedBucket {
        inner: Arc<MemoryBucket>,
        hook: std::sync::Mutex<Option<BoxFuture<'static, ()>>>,
    }

    impl HookedBucket {
        fn after_first_write(&self, hook: BoxFuture<'static, ()>) {
            *self.hook.lock().unwrap() = Some(hook);
        }
    }

    #[async_trait]
    impl PhotoBucket for HookedBucket {
        async fn write(&self, key: &str, data: Vec<u8>) -> Result<(), BucketError> {
            self.inner.write(key, data).await?;
            let hook = self.hook.lock().unwrap().take();
            if let Some(hook) = hook {
                hook.await;
            }
            Ok(())
        }

        async fn read(&self, key: &str) -> Result<Vec<u8>, BucketError> {
            self.inner.read(key).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<String>, BucketError> {
            self.inner.list(prefix).await
        }

        async fn delete(&self, key: &str) -> Result<(), BucketError> {
            self.inner.delete(key).await
        }

        async fn exists(&self, key: &str) -> Result<bool, BucketError> {
            self.inner.exists(key).await
        }

        fn url_for(&self, key: &str) -> String {
            self.inner.url_for(key)
        }
    }

    struct Fixture {
        _tmp: TempDir,
        backend: Arc<MemoryBackend>,
        bucket: Arc<MemoryBucket>,
        hooked: Arc<HookedBucket>,
        local: LocalPhotoStore,
        network: NetworkMonitor,
        queue: SyncQueue,
    }

    async fn fixture(state: NetworkState) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let bucket = Arc::new(MemoryBucket::new());
        let hooked = Arc::new(HookedBucket {
            inner: bucket.clone(),
            hook: std::sync::Mutex::new(None),
        });
        let local = LocalPhotoStore::new(tmp.path().join("photos"), 0);
        let network = NetworkMonitor::new(state);
        let transfer = PhotoTransfer::new(hooked.clone(), KeyService::in_memory(), local.clone());
        let queue = SyncQueue::new(
            QueueStore::open_in_memory().await.unwrap(),
            transfer,
            backend.clone(),
            network.clone(),
        );
        backend.set_cloud_backup_enabled("u1", true).await.unwrap();
        Fixture {
            _tmp: tmp,
            backend,
            bucket,
            hooked,
            local,
            network,
            queue,
        }
    }

    async fn capture(f: &Fixture, photo_id: &str) -> std::path::PathBuf {
        let path = f.local.write_photo("u1", photo_id, b"jpeg").await.unwrap();
        f.backend.insert_photo(PhotoRecord::new_local(
            photo_id,
            "u1",
            &path.to_string_lossy(),
        ));
        path
    }

    #[tokio::test]
    async fn off_wifi_nothing_moves() {
        let f = fixture(NetworkState::CELLULAR).await;
        let path = capture(&f, "p1").await;
        f.queue.enqueue("p1", "u1", &path).await.unwrap();

        assert_eq!(f.queue.process_queue().await, 0);
        assert_eq!(f.queue.len().await, 1);
        assert!(f.bucket.keys().is_empty());
        assert_eq!(
            f.backend.photo("p1").unwrap().sync_status,
            PhotoSyncStatus::Pending
        );
        assert!(matches!(f.queue.sync_now().await, Err(SyncError::NotOnWifi)));
    }

    #[tokio::test]
    async fn disabled_backup_drops_silently() {
        let f = fixture(NetworkState::CELLULAR).await;
        let path = capture(&f, "p1").await;
        f.queue.push("p1", "u1", &path).await.unwrap();
        f.backend.set_cloud_backup_enabled("u1", false).await.unwrap();

        f.network.set(NetworkState::WIFI);
        assert_eq!(f.queue.process_queue().await, 0);
        assert!(f.queue.is_empty().await);
        assert!(f.bucket.keys().is_empty());
    }

    #[tokio::test]
    async fn missing_local_file_is_dropped() {
        let f = fixture(NetworkState::CELLULAR).await;
        let path = capture(&f, "p1").await;
        f.queue.push("p1", "u1", &path).await.unwrap();
        f.local.delete_photo("u1", "p1").await.unwrap();

        f.network.set(NetworkState::WIFI);
        assert_eq!(f.queue.process_queue().await, 0);
        assert!(f.queue.is_empty().await);
    }

    #[tokio::test]
    async fn failures_do_not_abort_the_batch() {
        let f = fixture(NetworkState::CELLULAR).await;
        for id in ["p1", "p2", "p3"] {
            let path = capture(&f, id).await;
            f.queue.push(id, "u1", &path).await.unwrap();
        }
        f.bucket.fail_key("u1/p2.jpg.encrypted");

        f.network.set(NetworkState::WIFI);
        assert_eq!(f.queue.process_queue().await, 2);
        let pending = f.queue.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].photo_id, "p2");
        assert_eq!(pending[0].retry_count, 1);
    }

    #[tokio::test]
    async fn reload_restores_pending_items() {
        let f = fixture(NetworkState::OFFLINE).await;
        let path = capture(&f, "p1").await;
        f.queue.push("p1", "u1", &path).await.unwrap();

        let reopened = SyncQueue::new(
            f.queue.inner.store.clone(),
            f.queue.inner.transfer.clone(),
            f.backend.clone(),
            f.network.clone(),
        );
        assert_eq!(reopened.load().await.unwrap(), 1);
        assert_eq!(reopened.pending().await[0].photo_id, "p1");
    }

    #[tokio::test]
    async fn concurrent_drains_do_not_double_upload() {
        let f = fixture(NetworkState::CELLULAR).await;
        for id in ["p1", "p2", "p3", "p4"] {
            let path = capture(&f, id).await;
            f.queue.push(id, "u1", &path).await.unwrap();
        }
        f.network.set(NetworkState::WIFI);

        let (a, b) = tokio::join!(f.queue.process_queue(), f.queue.process_queue());
        assert_eq!(a + b, 4);
        assert!(a == 0 || b == 0);
        assert!(f.queue.is_empty().await);
    }

    async fn queue_three(f: &Fixture) {
        for id in ["p1", "p2", "p3"] {
            let path = capture(f, id).await;
            f.queue.push(id, "u1", &path).await.unwrap();
        }
    }

    #[tokio::test]
    async fn backup_turned_off_mid_drain_stops_later_uploads() {
        let f = fixture(NetworkState::CELLULAR).await;
        queue_three(&f).await;
        let backend = f.backend.clone();
        f.hooked.after_first_write(
            async move {
                backend.set_cloud_backup_enabled("u1", false).await.unwrap();
            }
            .boxed(),
        );

        f.network.set(NetworkState::WIFI);
        assert_eq!(f.queue.process_queue().await, 1);
        assert!(f.queue.is_empty().await);
        assert_eq!(f.bucket.keys(), vec!["u1/p1.jpg.encrypted".to_string()]);
        assert!(f.backend.photo("p1").unwrap().has_remote());
        for id in ["p2", "p3"] {
            assert!(!f.backend.photo(id).unwrap().has_remote());
        }
    }

    #[tokio::test]
    async fn items_cleared_mid_drain_are_not_recorded() {
        let f = fixture(NetworkState::CELLULAR).await;
        queue_three(&f).await;
        let backend = f.backend.clone();
        let queue = f.queue.clone();
        f.hooked.after_first_write(
            async move {
                backend.set_cloud_backup_enabled("u1", false).await.unwrap();
                queue.clear_user("u1").await.unwrap();
            }
            .boxed(),
        );

        f.network.set(NetworkState::WIFI);
        assert_eq!(f.queue.process_queue().await, 0);
        assert!(f.queue.is_empty().await);
        // The in-flight upload is discarded rather than left orphaned
        assert!(f.bucket.keys().is_empty());
        for id in ["p1", "p2", "p3"] {
            assert!(!f.backend.photo(id).unwrap().has_remote());
        }
    }

    #[tokio::test]
    async fn losing_wifi_mid_drain_still_finishes_the_snapshot() {
        let f = fixture(NetworkState::CELLULAR).await;
        queue_three(&f).await;
        let network = f.network.clone();
        f.hooked.after_first_write(
            async move {
                network.set(NetworkState::CELLULAR);
            }
            .boxed(),
        );

        f.network.set(NetworkState::WIFI);
        assert_eq!(f.queue.process_queue().await, 3);
        assert!(f.queue.is_empty().await);
        assert_eq!(f.bucket.keys().len(), 3);
        // The next drain waits for WiFi again
        let path = capture(&f, "p4").await;
        f.queue.push("p4", "u1", &path).await.unwrap();
        assert_eq!(f.queue.process_queue().await, 0);
        assert_eq!(f.queue.len().await, 1);
    }
}
