#![cfg(feature = "test-utils")]
//! Restoring a backup onto a fresh device.
//!
//! Tests:
//! - Every photo comes back, in batches, with per-photo progress
//! - A batch downloads concurrently and finishes before the next starts
//! - Failed downloads are reported and never stop the rest
//! - Photos already on the device are not downloaded again
//! - A device without the photo key cannot restore
//! - Integrity check finds pointers whose blob is gone

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use glow_core::backend::{Backend, MemoryBackend, PhotoRecord, PhotoUpdate};
use glow_core::keys::KeyService;
use glow_core::storage::{
    remote_photo_path, BucketError, LocalPhotoStore, MemoryBucket, PhotoBucket, PhotoTransfer,
};
use glow_core::sync::{plan_batches, RestorationEngine, RestoreProgress};
use tempfile::TempDir;

fn tracing_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .with_line_number(true)
        .with_target(false)
        .with_file(true)
        .try_init();
}

struct Device {
    _temp: TempDir,
    transfer: PhotoTransfer,
}

fn device(bucket: &Arc<MemoryBucket>, keys: &KeyService) -> Device {
    let temp = TempDir::new().unwrap();
    let local = LocalPhotoStore::new(temp.path().join("photos"), 0);
    let bucket: Arc<dyn PhotoBucket> = bucket.clone();
    Device {
        transfer: PhotoTransfer::new(bucket, keys.clone(), local),
        _temp: temp,
    }
}

enum Read {
    Start(String),
    End(String),
}

/// Memory bucket that logs when each read starts and ends and how many
/// overlap.
struct ReadLogBucket {
    inner: Arc<MemoryBucket>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    log: Mutex<Vec<Read>>,
}

impl ReadLogBucket {
    fn new(inner: Arc<MemoryBucket>) -> Self {
        Self {
            inner,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PhotoBucket for ReadLogBucket {
    async fn write(&self, key: &str, data: Vec<u8>) -> Result<(), BucketError> {
        self.inner.write(key, data).await
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, BucketError> {
        self.log.lock().unwrap().push(Read::Start(key.to_string()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = self.inner.read(key).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(Read::End(key.to_string()));
        result
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

fn photo_bytes(i: usize) -> Vec<u8> {
    format!("photo number {}", i).into_bytes()
}

/// Capture and back up `count` photos on `origin`. Returns their ids.
async fn back_up_photos(
    origin: &Device,
    backend: &MemoryBackend,
    user_id: &str,
    count: usize,
) -> Vec<String> {
    let mut ids = Vec::new();
    for i in 0..count {
        let id = format!("photo-{:02}", i);
        let path = origin
            .transfer
            .local()
            .save_photo(user_id, &id, &photo_bytes(i))
            .await
            .unwrap();
        let uploaded = origin.transfer.upload(&path, &id, user_id).await.unwrap();

        let mut record = PhotoRecord::new_local(&id, user_id, &path.to_string_lossy());
        record.apply(&PhotoUpdate::Uploaded {
            remote_path: uploaded.remote_path,
            remote_url: uploaded.remote_url,
            uploaded_at: uploaded.uploaded_at,
        });
        backend.insert_photo(record);
        ids.push(id);
    }
    ids
}

#[tokio::test]
async fn restores_every_photo_with_progress() {
    tracing_init();
    let bucket = Arc::new(MemoryBucket::new());
    let keys = KeyService::in_memory();
    let backend = Arc::new(MemoryBackend::new());
    let origin = device(&bucket, &keys);
    let ids = back_up_photos(&origin, &backend, "user-1", 12).await;

    let fresh = device(&bucket, &keys);
    let engine =
        RestorationEngine::new(backend.clone(), fresh.transfer.clone()).with_batch_size(5);
    let progress: Mutex<Vec<RestoreProgress>> = Mutex::new(Vec::new());
    let result = engine
        .restore_all("user-1", |p| progress.lock().unwrap().push(p))
        .await
        .unwrap();

    assert_eq!(result.total_photos, 12);
    assert_eq!(result.success_count, 12);
    assert_eq!(result.failure_count, 0);
    assert!(result.failed_photo_ids.is_empty());
    assert_eq!(
        plan_batches(12, 5)
            .iter()
            .map(|r| r.len())
            .collect::<Vec<_>>(),
        vec![5, 5, 2]
    );

    let progress = progress.into_inner().unwrap();
    assert_eq!(progress.len(), 12);
    let currents: Vec<usize> = progress.iter().map(|p| p.current).collect();
    assert_eq!(currents, (1..=12).collect::<Vec<_>>());
    assert!(progress.iter().all(|p| p.total == 12));
    assert_eq!(progress.last().unwrap().percentage, 100.0);
    let reported: HashSet<&str> = progress.iter().map(|p| p.photo_id.as_str()).collect();
    assert_eq!(reported.len(), 12);

    let local = fresh.transfer.local();
    for (i, id) in ids.iter().enumerate() {
        let bytes = std::fs::read(local.photo_path("user-1", id)).unwrap();
        assert_eq!(bytes, photo_bytes(i));
        let record = backend.photo(id).unwrap();
        assert_eq!(
            record.local_uri,
            Some(local.photo_path("user-1", id).to_string_lossy().into_owned())
        );
    }
}

#[tokio::test]
async fn batches_download_concurrently_and_in_sequence() {
    tracing_init();
    let bucket = Arc::new(MemoryBucket::new());
    let keys = KeyService::in_memory();
    let backend = Arc::new(MemoryBackend::new());
    let origin = device(&bucket, &keys);
    back_up_photos(&origin, &backend, "user-1", 12).await;

    let temp = TempDir::new().unwrap();
    let logged = Arc::new(ReadLogBucket::new(bucket.clone()));
    let transfer = PhotoTransfer::new(
        logged.clone(),
        keys.clone(),
        LocalPhotoStore::new(temp.path().join("photos"), 0),
    );
    let engine = RestorationEngine::new(backend.clone(), transfer).with_batch_size(5);
    let result = engine.restore_all("user-1", |_| {}).await.unwrap();
    assert_eq!(result.success_count, 12);

    // Batch number of every blob, in the order restore walks the library
    let batch_of: HashMap<String, usize> = backend
        .get_photos_for_user("user-1")
        .await
        .unwrap()
        .iter()
        .enumerate()
        .map(|(i, p)| (remote_photo_path("user-1", &p.id), i / 5))
        .collect();

    assert_eq!(logged.max_in_flight.load(Ordering::SeqCst), 5);

    let log = logged.log.lock().unwrap();
    assert_eq!(log.len(), 24);
    let mut first_start = [usize::MAX; 3];
    let mut last_end = [0usize; 3];
    for (position, read) in log.iter().enumerate() {
        match read {
            Read::Start(key) => {
                let batch = batch_of[key];
                first_start[batch] = first_start[batch].min(position);
            }
            Read::End(key) => {
                let batch = batch_of[key];
                last_end[batch] = last_end[batch].max(position);
            }
        }
    }
    for batch in 0..2 {
        assert!(
            last_end[batch] < first_start[batch + 1],
            "batch {} started before batch {} finished",
            batch + 1,
            batch
        );
    }
}

#[tokio::test]
async fn failures_are_reported_and_do_not_stop_restore() {
    tracing_init();
    let bucket = Arc::new(MemoryBucket::new());
    let keys = KeyService::in_memory();
    let backend = Arc::new(MemoryBackend::new());
    let origin = device(&bucket, &keys);
    let ids = back_up_photos(&origin, &backend, "user-1", 7).await;

    bucket.fail_key(&remote_photo_path("user-1", &ids[1]));
    bucket.fail_key(&remote_photo_path("user-1", &ids[5]));

    let fresh = device(&bucket, &keys);
    let engine =
        RestorationEngine::new(backend.clone(), fresh.transfer.clone()).with_batch_size(5);
    let result = engine.restore_all("user-1", |_| {}).await.unwrap();

    assert_eq!(result.total_photos, 7);
    assert_eq!(result.success_count, 5);
    assert_eq!(result.failure_count, 2);
    let failed: HashSet<String> = result.failed_photo_ids.into_iter().collect();
    assert_eq!(failed, HashSet::from([ids[1].clone(), ids[5].clone()]));
    assert!(!fresh.transfer.local().has_photo("user-1", &ids[1]).await);
    assert!(fresh.transfer.local().has_photo("user-1", &ids[6]).await);
}

#[tokio::test]
async fn photo_without_remote_copy_fails() {
    tracing_init();
    let bucket = Arc::new(MemoryBucket::new());
    let keys = KeyService::in_memory();
    let backend = Arc::new(MemoryBackend::new());
    backend.insert_photo(PhotoRecord::new_local("never-synced", "user-1", "/gone.jpg"));

    let fresh = device(&bucket, &keys);
    let engine = RestorationEngine::new(backend.clone(), fresh.transfer.clone());
    let result = engine.restore_all("user-1", |_| {}).await.unwrap();

    assert_eq!(result.failure_count, 1);
    assert_eq!(result.failed_photo_ids, vec!["never-synced".to_string()]);
}

#[tokio::test]
async fn photos_already_on_device_are_skipped() {
    tracing_init();
    let bucket = Arc::new(MemoryBucket::new());
    let keys = KeyService::in_memory();
    let backend = Arc::new(MemoryBackend::new());
    let origin = device(&bucket, &keys);
    back_up_photos(&origin, &backend, "user-1", 3).await;

    // Every bucket call would fail, so success means nothing was fetched
    bucket.set_offline(true);
    let engine = RestorationEngine::new(backend.clone(), origin.transfer.clone());
    let result = engine.restore_all("user-1", |_| {}).await.unwrap();

    assert_eq!(result.success_count, 3);
    assert_eq!(result.failure_count, 0);
}

#[tokio::test]
async fn restore_without_photo_key_fails_every_photo() {
    tracing_init();
    let bucket = Arc::new(MemoryBucket::new());
    let backend = Arc::new(MemoryBackend::new());
    let origin = device(&bucket, &KeyService::in_memory());
    back_up_photos(&origin, &backend, "user-1", 2).await;

    let other_keys = KeyService::in_memory();
    let fresh = device(&bucket, &other_keys);
    let engine = RestorationEngine::new(backend.clone(), fresh.transfer.clone());
    let result = engine.restore_all("user-1", |_| {}).await.unwrap();

    assert_eq!(result.failure_count, 2);
    // A restore must never mint a new key
    assert!(other_keys.get_photo_key("user-1").unwrap().is_none());
}

#[tokio::test]
async fn restore_with_imported_key_succeeds() {
    tracing_init();
    let bucket = Arc::new(MemoryBucket::new());
    let backend = Arc::new(MemoryBackend::new());
    let origin_keys = KeyService::in_memory();
    let origin = device(&bucket, &origin_keys);
    back_up_photos(&origin, &backend, "user-1", 2).await;

    let exported = origin_keys.export_photo_key("user-1").unwrap().unwrap();
    let other_keys = KeyService::in_memory();
    other_keys.set_photo_key("user-1", &exported).unwrap();

    let fresh = device(&bucket, &other_keys);
    let engine = RestorationEngine::new(backend.clone(), fresh.transfer.clone());
    let result = engine.restore_all("user-1", |_| {}).await.unwrap();
    assert_eq!(result.success_count, 2);
}

#[tokio::test]
async fn empty_library_restores_nothing() {
    tracing_init();
    let bucket = Arc::new(MemoryBucket::new());
    let backend = Arc::new(MemoryBackend::new());
    let fresh = device(&bucket, &KeyService::in_memory());
    let engine = RestorationEngine::new(backend.clone(), fresh.transfer.clone());

    let calls = AtomicUsize::new(0);
    let result = engine
        .restore_all("user-1", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

    assert_eq!(result.total_photos, 0);
    assert_eq!(result.success_count, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn integrity_check_finds_missing_blobs() {
    tracing_init();
    let bucket = Arc::new(MemoryBucket::new());
    let keys = KeyService::in_memory();
    let backend = Arc::new(MemoryBackend::new());
    let origin = device(&bucket, &keys);
    let ids = back_up_photos(&origin, &backend, "user-1", 3).await;
    backend.insert_photo(PhotoRecord::new_local("local-only", "user-1", "/x.jpg"));

    let engine = RestorationEngine::new(backend.clone(), origin.transfer.clone());
    let report = engine.verify_integrity("user-1").await.unwrap();
    assert!(report.is_intact());
    assert_eq!(report.checked, 3);

    origin
        .transfer
        .delete_remote(&remote_photo_path("user-1", &ids[2]))
        .await
        .unwrap();
    let report = engine.verify_integrity("user-1").await.unwrap();
    assert!(!report.is_intact());
    assert_eq!(report.checked, 3);
    assert_eq!(report.missing, vec![ids[2].clone()]);

    // Unrelated users are not affected
    assert!(backend.get_photos_for_user("user-2").await.unwrap().is_empty());
}
