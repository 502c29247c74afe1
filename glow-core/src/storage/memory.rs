use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::bucket::{BucketError, PhotoBucket};

#[derive(Default)]
struct State {
    objects: BTreeMap<String, Vec<u8>>,
    failing_keys: HashSet<String>,
    offline: bool,
}

/// In-process `PhotoBucket` for tests.
#[derive(Default)]
pub struct MemoryBucket {
    state: Mutex<State>,
}

impl MemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Reads and writes of `key` fail from now on.
    pub fn fail_key(&self, key: &str) {
        self.lock().failing_keys.insert(key.to_string());
    }

    /// Every operation fails while offline.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(key).cloned()
    }

    pub fn put(&self, key: &str, data: Vec<u8>) {
        self.lock().objects.insert(key.to_string(), data);
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    fn check(&self, key: &str) -> Result<(), BucketError> {
        let state = self.lock();
        if state.offline || state.failing_keys.contains(key) {
            return Err(BucketError::Storage(format!("injected failure for {}", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl PhotoBucket for MemoryBucket {
    async fn write(&self, key: &str, data: Vec<u8>) -> Result<(), BucketError> {
        self.check(key)?;
        self.put(key, data);
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, BucketError> {
        self.check(key)?;
        self.get(key)
            .ok_or_else(|| BucketError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BucketError> {
        self.check(prefix)?;
        Ok(self
            .lock()
            .objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), BucketError> {
        self.check(key)?;
        self.lock().objects.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, BucketError> {
        self.check(key)?;
        Ok(self.lock().objects.contains_key(key))
    }

    fn url_for(&self, key: &str) -> String {
        format!("memory://{}", key)
    }
}
