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

use std::fmt::{self, Display};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{LockBackend, LockError, LockOwner, Result};

/// Named lock on one key of a category.
///
/// A guard is a view onto the backend's lock for `(category, key)`: every guard obtained for the
/// same name refers to the same lock, whichever caller obtained it. Ownership is carried by the
/// [`LockOwner`] passed to each call.
///
/// Under the lease strategies (`distributed`, `db`, `optimistic`) a held lock expires
/// `lease_time` after it was last taken or renewed, and nothing extends it in the background.
/// A holder that may outlive the lease has to call [`ConflictGuard::renew`] within every lease
/// period, otherwise the lock can be reaped or taken over while it still works.
#[derive(Debug, Clone)]
pub struct ConflictGuard {
    backend: Arc<dyn LockBackend>,
    category: Arc<str>,
    key: String,
}

impl ConflictGuard {
    pub(crate) fn new(backend: Arc<dyn LockBackend>, category: Arc<str>, key: impl Into<String>) -> Self {
        Self {
            backend,
            category,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// Wait up to `timeout` for the lock. `Ok(false)` means the wait elapsed; errors are backend
    /// failures such as an unreachable quorum.
    pub async fn try_to_lock(&self, owner: &LockOwner, timeout: Duration) -> Result<bool> {
        match self.backend.acquire(&self.category, &self.key, owner, timeout).await {
            Ok(()) => Ok(true),
            Err(LockError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Release one hold of `owner`. Fails when `owner` does not hold the lock.
    pub async fn unlock(&self, owner: &LockOwner) -> Result<()> {
        if self.backend.release(&self.category, &self.key, owner).await? {
            Ok(())
        } else {
            Err(LockError::not_owner(format!("{}:{}", self.category, self.key), owner.as_str()))
        }
    }

    /// Restart the lease `owner` holds on this lock. `Ok(false)` when `owner` lost the lock.
    pub async fn renew(&self, owner: &LockOwner) -> Result<bool> {
        let renewed = self.backend.renew(&self.category, &self.key, owner).await?;
        if !renewed {
            warn!("{}:{} is no longer held by {}, lease not renewed", self.category, self.key, owner);
        }
        Ok(renewed)
    }

    /// Release the lock whoever holds it
    pub async fn force_unlock(&self) -> Result<bool> {
        self.backend.force_release(&self.category, &self.key).await
    }

    pub async fn is_locked(&self) -> Result<bool> {
        self.backend.is_locked(&self.category, &self.key).await
    }

    pub async fn is_held_by(&self, owner: &LockOwner) -> Result<bool> {
        self.backend.is_held_by(&self.category, &self.key, owner).await
    }
}

/// Named key space sharing one backend
#[derive(Debug)]
pub struct GuardCategory {
    name: Arc<str>,
    backend: Arc<dyn LockBackend>,
}

impl GuardCategory {
    pub(crate) fn new(name: &str, backend: Arc<dyn LockBackend>) -> Self {
        Self {
            name: Arc::from(name),
            backend,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn guard(&self, key: impl Into<String>) -> ConflictGuard {
        ConflictGuard::new(self.backend.clone(), self.name.clone(), key)
    }
}

/// Family of locks keyed by `K`, with all-or-nothing acquisition of several keys.
///
/// Keys are turned into lock names with their `Display` form and grouped acquisitions lock
/// them in ascending `Ord` order, so two callers asking for overlapping key sets cannot wait on
/// each other in a cycle.
pub struct ConflictsGuard<K> {
    category: Arc<GuardCategory>,
    _marker: PhantomData<fn(K)>,
}

impl<K> Clone for ConflictsGuard<K> {
    fn clone(&self) -> Self {
        Self {
            category: self.category.clone(),
            _marker: PhantomData,
        }
    }
}

impl<K> fmt::Debug for ConflictsGuard<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictsGuard").field("category", &self.category.name()).finish()
    }
}

impl<K> ConflictsGuard<K>
where
    K: Ord + Display,
{
    pub(crate) fn new(category: Arc<GuardCategory>) -> Self {
        Self {
            category,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        self.category.name()
    }

    /// Guard for a single key
    pub fn get_lock(&self, key: &K) -> ConflictGuard {
        self.category.guard(key.to_string())
    }

    pub async fn try_to_lock(&self, key: &K, owner: &LockOwner, timeout: Duration) -> Result<bool> {
        self.get_lock(key).try_to_lock(owner, timeout).await
    }

    pub async fn unlock(&self, key: &K, owner: &LockOwner) -> Result<()> {
        self.get_lock(key).unlock(owner).await
    }

    pub async fn force_unlock(&self, key: &K) -> Result<bool> {
        self.get_lock(key).force_unlock().await
    }

    pub async fn is_locked(&self, key: &K) -> Result<bool> {
        self.get_lock(key).is_locked().await
    }

    /// Names of the keys currently locked in this family
    pub async fn key_set(&self) -> Result<Vec<String>> {
        self.category.backend.locked_keys(self.category.name()).await
    }

    /// Number of keys currently locked in this family
    pub async fn size(&self) -> Result<usize> {
        Ok(self.key_set().await?.len())
    }

    /// Lock every key or none of them, waiting at most `timeout` in total.
    ///
    /// Keys are sorted and deduplicated first. When a key cannot be obtained in time the keys
    /// already taken are released in reverse order and the timeout names the blocking key.
    pub async fn try_to_lock_all<I>(&self, keys: I, owner: &LockOwner, timeout: Duration) -> Result<GroupLockGuard>
    where
        I: IntoIterator<Item = K>,
    {
        let mut keys: Vec<K> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();
        let names: Vec<String> = keys.iter().map(|k| k.to_string()).collect();

        let backend = &self.category.backend;
        let category = self.category.name();
        let deadline = Instant::now() + timeout;
        let mut acquired: Vec<String> = Vec::with_capacity(names.len());

        for name in names {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Err(e) = backend.acquire(category, &name, owner, remaining).await {
                debug!(
                    "Grouped acquisition in {} failed at {} after {} keys: {}",
                    category,
                    name,
                    acquired.len(),
                    e
                );
                rollback(backend.as_ref(), category, &acquired, owner).await;
                return Err(match e {
                    LockError::Timeout { .. } => LockError::timeout(format!("{category}:{name}"), timeout),
                    other => other,
                });
            }
            acquired.push(name);
        }

        Ok(GroupLockGuard {
            category: self.category.clone(),
            keys: acquired,
            owner: owner.clone(),
            released: false,
        })
    }
}

async fn rollback(backend: &dyn LockBackend, category: &str, acquired: &[String], owner: &LockOwner) {
    for name in acquired.iter().rev() {
        if let Err(e) = backend.release(category, name, owner).await {
            warn!("Failed to roll back {}:{} for {}: {}", category, name, owner, e);
        }
    }
}

/// Keys taken together by [`ConflictsGuard::try_to_lock_all`].
///
/// Call [`GroupLockGuard::release`] to release them; dropping the guard releases them in the
/// background when a Tokio runtime is available. Leases are not extended while the guard is
/// alive, see [`GroupLockGuard::renew`].
#[derive(Debug)]
pub struct GroupLockGuard {
    category: Arc<GuardCategory>,
    keys: Vec<String>,
    owner: LockOwner,
    released: bool,
}

impl GroupLockGuard {
    /// Locked keys in acquisition order
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn owner(&self) -> &LockOwner {
        &self.owner
    }

    /// Restart the lease of every key. `Ok(false)` when at least one key was lost.
    pub async fn renew(&self) -> Result<bool> {
        let mut all = true;
        for name in &self.keys {
            if !self.category.backend.renew(self.category.name(), name, &self.owner).await? {
                warn!("{}:{} is no longer held by {}", self.category.name(), name, self.owner);
                all = false;
            }
        }
        Ok(all)
    }

    /// Release every key in reverse acquisition order
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let mut first_error = None;
        for name in self.keys.iter().rev() {
            if let Err(e) = self.category.backend.release(self.category.name(), name, &self.owner).await {
                warn!("Failed to release {}:{}: {}", self.category.name(), name, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for GroupLockGuard {
    fn drop(&mut self) {
        if self.released || self.keys.is_empty() {
            return;
        }
        let category = self.category.clone();
        let keys = std::mem::take(&mut self.keys);
        let owner = self.owner.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    rollback(category.backend.as_ref(), category.name(), &keys, &owner).await;
                });
            }
            Err(_) => warn!(
                "GroupLockGuard dropped outside a runtime, {} keys in {} stay locked for {}",
                keys.len(),
                category.name(),
                owner
            ),
        }
    }
}
