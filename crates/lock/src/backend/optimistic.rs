// Copyright 2024 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::LockBackend;
use crate::store::{VersionedLock, VersionedLockStore, now_millis};
use crate::types::resource_key;
use crate::{LockError, LockMethod, LockOwner, Result};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const MIN_RETRY_DELAY_MS: u64 = 2;
const MAX_RETRY_DELAY_MS: u64 = 50;
const RELEASE_ATTEMPTS: usize = 16;

/// Compare-and-set locks over versioned records, the `optimistic` strategy.
///
/// Nothing blocks on the store: a writer reads the record, writes its claim against the version
/// it read and starts over on a version conflict. A record whose last write is older than the
/// lease is considered abandoned and can be taken over. The record counts how often its holder
/// acquired it, and the lock is freed by the matching number of releases.
#[derive(Debug)]
pub struct OptimisticLockBackend {
    store: Arc<dyn VersionedLockStore>,
    lease_time: Duration,
}

impl OptimisticLockBackend {
    pub fn new(store: Arc<dyn VersionedLockStore>, lease_time: Duration) -> Self {
        Self { store, lease_time }
    }

    fn is_abandoned(&self, record: &VersionedLock) -> bool {
        let lease_ms = self.lease_time.as_millis() as u64;
        record.holder.is_some() && now_millis().saturating_sub(record.updated_at_ms) >= lease_ms
    }

    fn retry_delay() -> Duration {
        Duration::from_millis(rand::rng().random_range(MIN_RETRY_DELAY_MS..=MAX_RETRY_DELAY_MS))
    }

    /// Write the holder and hold count that `next` derives from the current record, retrying on
    /// version conflicts. `next` returning `None` leaves the record alone.
    async fn update_record<F>(&self, resource: &str, mut next: F) -> Result<bool>
    where
        F: FnMut(&VersionedLock) -> Result<Option<(Option<String>, u32)>> + Send,
    {
        for _ in 0..RELEASE_ATTEMPTS {
            let record = self.store.read(resource).await?;
            let Some((holder, holds)) = next(&record)? else {
                return Ok(false);
            };
            if self.store.compare_and_set(resource, record.version, holder, holds).await? {
                return Ok(true);
            }
            tokio::time::sleep(Self::retry_delay()).await;
        }
        Err(LockError::store(format!("too many version conflicts on {resource}")))
    }
}

#[async_trait]
impl LockBackend for OptimisticLockBackend {
    fn method(&self) -> LockMethod {
        LockMethod::Optimistic
    }

    async fn acquire(&self, category: &str, key: &str, owner: &LockOwner, timeout: Duration) -> Result<()> {
        let resource = resource_key(category, key);
        let deadline = Instant::now() + timeout;

        loop {
            let record = self.store.read(&resource).await?;
            match record.holder.as_deref() {
                Some(holder) if holder == owner.as_str() => {
                    if self
                        .store
                        .compare_and_set(&resource, record.version, Some(owner.to_string()), record.holds.saturating_add(1))
                        .await?
                    {
                        return Ok(());
                    }
                    debug!("Version conflict on reentrant {} at version {}", resource, record.version);
                }
                Some(holder) if !self.is_abandoned(&record) => {
                    debug!("{} is held by {}, {} retries", resource, holder, owner);
                }
                stale => {
                    if let Some(previous) = stale {
                        warn!("Taking over abandoned lock {} from {}", resource, previous);
                    }
                    if self
                        .store
                        .compare_and_set(&resource, record.version, Some(owner.to_string()), 1)
                        .await?
                    {
                        return Ok(());
                    }
                    debug!("Version conflict on {} at version {}", resource, record.version);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LockError::timeout(resource, timeout));
            }
            tokio::time::sleep(Self::retry_delay().min(deadline - now)).await;
        }
    }

    async fn release(&self, category: &str, key: &str, owner: &LockOwner) -> Result<bool> {
        let resource = resource_key(category, key);
        self.update_record(&resource, |record| match record.holder.as_deref() {
            None => Ok(None),
            Some(holder) if holder == owner.as_str() && record.holds > 1 => {
                Ok(Some((Some(holder.to_string()), record.holds - 1)))
            }
            Some(holder) if holder == owner.as_str() => Ok(Some((None, 0))),
            Some(_) => Err(LockError::not_owner(resource.clone(), owner.as_str())),
        })
        .await
    }

    async fn renew(&self, category: &str, key: &str, owner: &LockOwner) -> Result<bool> {
        let resource = resource_key(category, key);
        self.update_record(&resource, |record| match record.holder.as_deref() {
            Some(holder) if holder == owner.as_str() => Ok(Some((Some(holder.to_string()), record.holds))),
            _ => Ok(None),
        })
        .await
    }

    async fn force_release(&self, category: &str, key: &str) -> Result<bool> {
        let resource = resource_key(category, key);
        self.update_record(&resource, |record| Ok(record.holder.as_ref().map(|_| (None, 0)))).await
    }

    async fn holder(&self, category: &str, key: &str) -> Result<Option<LockOwner>> {
        let record = self.store.read(&resource_key(category, key)).await?;
        Ok(record.holder.map(LockOwner::new))
    }

    async fn locked_keys(&self, category: &str) -> Result<Vec<String>> {
        let prefix = resource_key(category, "");
        Ok(self
            .store
            .held(&prefix)
            .await?
            .into_iter()
            .filter_map(|(resource, _)| resource.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        let mut removed = 0;
        for (resource, record) in self.store.held("").await? {
            if !self.is_abandoned(&record) {
                continue;
            }
            // A conflict means someone touched the record since, so it is no longer abandoned
            if self.store.compare_and_set(&resource, record.version, None, 0).await? {
                warn!("Removed abandoned lock {} held by {:?}", resource, record.holder);
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryVersionedStore;

    fn backend(store: &Arc<InMemoryVersionedStore>) -> OptimisticLockBackend {
        OptimisticLockBackend::new(store.clone(), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_acquire_release() {
        let store = Arc::new(InMemoryVersionedStore::new());
        let backend = backend(&store);
        let a = LockOwner::new("a");

        backend.acquire("cat", "k", &a, Duration::from_millis(10)).await.unwrap();
        assert!(backend.is_held_by("cat", "k", &a).await.unwrap());
        assert_eq!(backend.locked_keys("cat").await.unwrap(), vec!["k"]);

        let err = backend
            .acquire("cat", "k", &LockOwner::new("b"), Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        let err = backend.release("cat", "k", &LockOwner::new("b")).await.unwrap_err();
        assert!(matches!(err, LockError::NotOwner { .. }));

        assert!(backend.release("cat", "k", &a).await.unwrap());
        assert!(!backend.release("cat", "k", &a).await.unwrap());
        assert_eq!(store.read("cat:k").await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_reentry_is_counted() {
        let store = Arc::new(InMemoryVersionedStore::new());
        let backend = backend(&store);
        let a = LockOwner::new("a");
        let b = LockOwner::new("b");

        backend.acquire("cat", "k", &a, Duration::from_millis(10)).await.unwrap();
        backend.acquire("cat", "k", &a, Duration::from_millis(10)).await.unwrap();
        assert_eq!(store.read("cat:k").await.unwrap().holds, 2);

        assert!(backend.release("cat", "k", &a).await.unwrap());
        assert!(backend.is_held_by("cat", "k", &a).await.unwrap());
        assert!(backend.acquire("cat", "k", &b, Duration::from_millis(20)).await.unwrap_err().is_timeout());

        assert!(backend.release("cat", "k", &a).await.unwrap());
        assert!(!backend.is_locked("cat", "k").await.unwrap());
        backend.acquire("cat", "k", &b, Duration::from_millis(10)).await.unwrap();
        assert_eq!(store.read("cat:k").await.unwrap().holds, 1);
    }

    #[tokio::test]
    async fn test_renew_keeps_record_from_being_taken_over() {
        let store = Arc::new(InMemoryVersionedStore::new());
        let backend = backend(&store);
        let a = LockOwner::new("a");
        backend.acquire("cat", "k", &a, Duration::from_millis(10)).await.unwrap();
        store.backdate("cat:k", 0);

        assert!(!backend.renew("cat", "k", &LockOwner::new("b")).await.unwrap());
        assert!(backend.renew("cat", "k", &a).await.unwrap());
        assert_eq!(store.read("cat:k").await.unwrap().holds, 1);
        assert_eq!(backend.cleanup_expired().await.unwrap(), 0);
        assert!(
            backend
                .acquire("cat", "k", &LockOwner::new("b"), Duration::from_millis(20))
                .await
                .unwrap_err()
                .is_timeout()
        );
    }

    #[tokio::test]
    async fn test_contenders_get_exclusive_turns() {
        let store = Arc::new(InMemoryVersionedStore::new());
        let backend = Arc::new(backend(&store));
        let inside = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let backend = backend.clone();
                let inside = inside.clone();
                tokio::spawn(async move {
                    let owner = LockOwner::new(format!("t{i}"));
                    backend.acquire("cat", "k", &owner, Duration::from_secs(5)).await.unwrap();
                    assert_eq!(inside.fetch_add(1, std::sync::atomic::Ordering::SeqCst), 0);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    inside.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                    backend.release("cat", "k", &owner).await.unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert!(!backend.is_locked("cat", "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_abandoned_lock_is_reaped_and_taken_over() {
        let store = Arc::new(InMemoryVersionedStore::new());
        let backend = backend(&store);
        backend
            .acquire("cat", "old", &LockOwner::new("gone"), Duration::from_millis(10))
            .await
            .unwrap();
        backend
            .acquire("cat", "live", &LockOwner::new("a"), Duration::from_millis(10))
            .await
            .unwrap();
        store.backdate("cat:old", 0);

        let b = LockOwner::new("b");
        backend.acquire("cat", "old", &b, Duration::from_millis(10)).await.unwrap();
        assert!(backend.is_held_by("cat", "old", &b).await.unwrap());

        store.backdate("cat:old", 0);
        assert_eq!(backend.cleanup_expired().await.unwrap(), 1);
        assert_eq!(backend.locked_keys("cat").await.unwrap(), vec!["live"]);
    }
}
