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
use crate::store::{LockRow, LockStore, now_millis};
use crate::{LockError, LockMethod, LockOwner, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const ACQUIRE_INITIAL_BACKOFF: Duration = Duration::from_millis(8);
const ACQUIRE_MAX_BACKOFF: Duration = Duration::from_millis(2048);
const UNLOCK_RETRIES: usize = 3;
const UNLOCK_INITIAL_BACKOFF: Duration = Duration::from_millis(4);
const UNLOCK_MAX_BACKOFF: Duration = Duration::from_millis(256);
const BACKOFF_MULTIPLIER: u32 = 4;

#[derive(Debug, Clone)]
struct HeldLock {
    holder: LockOwner,
    acquired_at: Instant,
}

/// Lease rows in a shared table, the `db` strategy.
///
/// A lock is a row keyed by `(category, key)`; the insert that wins the unique key wins the
/// lock. Waiting is a poll with exponential backoff. Locks are not reentrant: asking again for
/// a row this owner already holds fails with [`LockError::ReentrantNotSupported`].
#[derive(Debug)]
pub struct DbLockBackend {
    store: Arc<dyn LockStore>,
    node_id: String,
    lease_time: Duration,
    held: DashMap<(String, String), HeldLock>,
}

impl DbLockBackend {
    pub fn new(store: Arc<dyn LockStore>, node_id: impl Into<String>, lease_time: Duration) -> Self {
        Self {
            store,
            node_id: node_id.into(),
            lease_time,
            held: DashMap::new(),
        }
    }

    /// Delete rows left behind by a previous run of this node.
    pub async fn init(&self) -> Result<usize> {
        let removed = self.store.delete_all_for_owner(&self.node_id).await?;
        if removed > 0 {
            info!("Removed {} stale lock rows of node {}", removed, self.node_id);
        }
        Ok(removed)
    }

    /// Locks this node believes it holds
    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    async fn try_lock(&self, category: &str, key: &str, owner: &LockOwner) -> Result<bool> {
        let row = LockRow {
            category: category.to_string(),
            key: key.to_string(),
            owner: self.node_id.clone(),
            holder: owner.to_string(),
            started_at_ms: now_millis(),
        };
        if self.store.try_insert(&row).await? {
            self.held.insert(
                (category.to_string(), key.to_string()),
                HeldLock {
                    holder: owner.clone(),
                    acquired_at: Instant::now(),
                },
            );
            return Ok(true);
        }

        if let Some(existing) = self.store.get(category, key).await?
            && existing.owner == self.node_id
            && existing.holder == owner.as_str()
        {
            return Err(LockError::reentrant(format!("{category}:{key}"), owner.as_str()));
        }
        Ok(false)
    }

    async fn delete_with_retry(&self, category: &str, key: &str) -> Result<bool> {
        let mut backoff = UNLOCK_INITIAL_BACKOFF;
        let mut attempt = 1;
        loop {
            match self.store.delete(category, key, &self.node_id).await {
                Ok(deleted) => return Ok(deleted),
                Err(e) if attempt < UNLOCK_RETRIES => {
                    warn!(
                        "Failed to delete lock row {}:{} (attempt {}/{}): {}",
                        category, key, attempt, UNLOCK_RETRIES, e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * BACKOFF_MULTIPLIER).min(UNLOCK_MAX_BACKOFF);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl LockBackend for DbLockBackend {
    fn method(&self) -> LockMethod {
        LockMethod::Db
    }

    async fn acquire(&self, category: &str, key: &str, owner: &LockOwner, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        let mut backoff = ACQUIRE_INITIAL_BACKOFF;
        loop {
            if self.try_lock(category, key, owner).await? {
                debug!("Acquired db lock {}:{} for {}", category, key, owner);
                return Ok(());
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(LockError::timeout(format!("{category}:{key}"), timeout));
            }
            tokio::time::sleep(backoff.min(timeout - elapsed)).await;
            backoff = (backoff * BACKOFF_MULTIPLIER).min(ACQUIRE_MAX_BACKOFF);
        }
    }

    async fn release(&self, category: &str, key: &str, owner: &LockOwner) -> Result<bool> {
        let id = (category.to_string(), key.to_string());
        match self.held.get(&id).map(|h| h.holder.clone()) {
            Some(holder) if holder != *owner => {
                return Err(LockError::not_owner(format!("{category}:{key}"), owner.as_str()));
            }
            Some(_) => {
                self.held.remove(&id);
            }
            None => {
                // Not cached locally; only a row written for this very owner may be deleted
                match self.store.get(category, key).await? {
                    Some(row) if row.owner == self.node_id && row.holder == owner.as_str() => {}
                    Some(_) => return Err(LockError::not_owner(format!("{category}:{key}"), owner.as_str())),
                    None => return Ok(false),
                }
            }
        }
        self.delete_with_retry(category, key).await
    }

    async fn renew(&self, category: &str, key: &str, owner: &LockOwner) -> Result<bool> {
        let renewed = self
            .store
            .touch(category, key, &self.node_id, owner.as_str(), now_millis())
            .await?;
        if renewed && let Some(mut held) = self.held.get_mut(&(category.to_string(), key.to_string())) {
            held.acquired_at = Instant::now();
        }
        Ok(renewed)
    }

    async fn force_release(&self, category: &str, key: &str) -> Result<bool> {
        self.held.remove(&(category.to_string(), key.to_string()));
        self.store.force_delete(category, key).await
    }

    async fn holder(&self, category: &str, key: &str) -> Result<Option<LockOwner>> {
        Ok(self.store.get(category, key).await?.map(|row| LockOwner::new(row.holder)))
    }

    async fn locked_keys(&self, category: &str) -> Result<Vec<String>> {
        let mut keys = self.store.keys(category).await?;
        keys.sort();
        Ok(keys)
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        let lease_ms = self.lease_time.as_millis() as u64;
        let threshold = now_millis().saturating_sub(lease_ms);
        let mut removed = 0;
        for row in self.store.expired(threshold).await? {
            if self.store.force_delete(&row.category, &row.key).await? {
                warn!(
                    "Removed expired lock {}:{} held by {} on node {}",
                    row.category, row.key, row.holder, row.owner
                );
                removed += 1;
            }
        }

        let lease_time = self.lease_time;
        self.held.retain(|_, h| h.acquired_at.elapsed() < lease_time);
        Ok(removed)
    }

    async fn shutdown(&self) -> Result<()> {
        self.held.clear();
        self.store.delete_all_for_owner(&self.node_id).await?;
        Ok(())
    }
}
