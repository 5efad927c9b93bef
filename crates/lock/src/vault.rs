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

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{LockBackend, LockError, LockOwner, RepoPath, Result};

#[derive(Debug)]
struct Hold {
    owner: LockOwner,
    count: usize,
}

#[derive(Debug)]
struct VaultInner {
    category: &'static str,
    backend: Arc<dyn LockBackend>,
    holds: DashMap<RepoPath, Hold>,
    default_timeout: Duration,
}

/// Exclusive, reentrant locks over repository paths.
///
/// The backend provides exclusivity between owners (and between nodes for cluster strategies);
/// re-entry by the current owner is counted here, so the backend sees a single acquisition per
/// hold. The folder and file vaults of a provider are independent: locking a file never blocks
/// a check on its folder. Callers moving or copying trees lock ancestors and descendants
/// themselves, preferably with [`FsItemsVault::lock_all`].
#[derive(Debug, Clone)]
pub struct FsItemsVault {
    inner: Arc<VaultInner>,
}

impl FsItemsVault {
    pub(crate) fn new(category: &'static str, backend: Arc<dyn LockBackend>, default_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(VaultInner {
                category,
                backend,
                holds: DashMap::new(),
                default_timeout,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.category
    }

    /// Lock `path` for `owner` with the configured default timeout
    pub async fn lock(&self, path: &RepoPath, owner: &LockOwner) -> Result<FsItemLockGuard> {
        self.try_lock(path, owner, self.inner.default_timeout).await
    }

    /// Lock `path` for `owner`, waiting at most `timeout`
    pub async fn try_lock(&self, path: &RepoPath, owner: &LockOwner, timeout: Duration) -> Result<FsItemLockGuard> {
        if let Some(mut hold) = self.inner.holds.get_mut(path)
            && hold.owner == *owner
        {
            hold.count += 1;
            return Ok(self.guard(path, owner));
        }

        self.inner
            .backend
            .acquire(self.inner.category, &path.to_path(), owner, timeout)
            .await?;

        match self.inner.holds.entry(path.clone()) {
            Entry::Occupied(mut e) if e.get().owner == *owner => e.get_mut().count += 1,
            Entry::Occupied(mut e) => {
                // The backend granted the lock, so any leftover hold is stale
                warn!("Replacing stale hold of {} on {}", e.get().owner, path);
                e.insert(Hold {
                    owner: owner.clone(),
                    count: 1,
                });
            }
            Entry::Vacant(e) => {
                e.insert(Hold {
                    owner: owner.clone(),
                    count: 1,
                });
            }
        }
        debug!("Locked {} in {} for {}", path, self.inner.category, owner);
        Ok(self.guard(path, owner))
    }

    /// Lock several paths in canonical order, all or nothing.
    ///
    /// Paths are sorted (ancestors first) and deduplicated. On failure the paths already locked
    /// are released and the error is returned.
    pub async fn lock_all(&self, paths: &[RepoPath], owner: &LockOwner, timeout: Duration) -> Result<Vec<FsItemLockGuard>> {
        let mut ordered: Vec<&RepoPath> = paths.iter().collect();
        ordered.sort();
        ordered.dedup();

        let deadline = Instant::now() + timeout;
        let mut guards = Vec::with_capacity(ordered.len());
        for path in ordered {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.try_lock(path, owner, remaining).await {
                Ok(guard) => guards.push(guard),
                Err(e) => {
                    while let Some(guard) = guards.pop() {
                        if let Err(release_err) = guard.release().await {
                            warn!("Failed to roll back lock during lock_all: {}", release_err);
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(guards)
    }

    /// Release one hold of `owner` on `path`. Returns true when the path became free.
    pub async fn unlock(&self, path: &RepoPath, owner: &LockOwner) -> Result<bool> {
        let fully_released = match self.inner.holds.entry(path.clone()) {
            Entry::Occupied(mut e) => {
                if e.get().owner != *owner {
                    return Err(LockError::not_owner(path.to_path(), owner.as_str()));
                }
                let hold = e.get_mut();
                hold.count -= 1;
                if hold.count == 0 {
                    e.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => return Err(LockError::not_owner(path.to_path(), owner.as_str())),
        };

        if fully_released {
            self.inner
                .backend
                .release(self.inner.category, &path.to_path(), owner)
                .await?;
            debug!("Unlocked {} in {} for {}", path, self.inner.category, owner);
        }
        Ok(fully_released)
    }

    /// Release `path` whoever holds it
    pub async fn force_unlock(&self, path: &RepoPath) -> Result<bool> {
        self.inner.holds.remove(path);
        self.inner.backend.force_release(self.inner.category, &path.to_path()).await
    }

    /// Check whether any owner, on any node, holds `path`
    pub async fn is_locked(&self, path: &RepoPath) -> Result<bool> {
        self.inner.backend.is_locked(self.inner.category, &path.to_path()).await
    }

    /// Check whether `owner` holds `path` through this vault
    pub fn is_held_by(&self, path: &RepoPath, owner: &LockOwner) -> bool {
        self.hold_count(path, owner) > 0
    }

    pub fn hold_count(&self, path: &RepoPath, owner: &LockOwner) -> usize {
        self.inner
            .holds
            .get(path)
            .filter(|h| h.owner == *owner)
            .map(|h| h.count)
            .unwrap_or_default()
    }

    /// Paths held through this vault in this process, sorted
    pub fn locked_paths(&self) -> Vec<RepoPath> {
        let mut paths: Vec<RepoPath> = self.inner.holds.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    fn guard(&self, path: &RepoPath, owner: &LockOwner) -> FsItemLockGuard {
        FsItemLockGuard {
            vault: self.clone(),
            path: path.clone(),
            owner: owner.clone(),
            released: false,
        }
    }
}

/// One hold on a path. Release with [`FsItemLockGuard::release`]; a dropped guard is released
/// in the background when a Tokio runtime is available.
#[derive(Debug)]
pub struct FsItemLockGuard {
    vault: FsItemsVault,
    path: RepoPath,
    owner: LockOwner,
    released: bool,
}

impl FsItemLockGuard {
    pub fn path(&self) -> &RepoPath {
        &self.path
    }

    pub fn owner(&self) -> &LockOwner {
        &self.owner
    }

    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        self.vault.unlock(&self.path, &self.owner).await.map(|_| ())
    }
}

impl Drop for FsItemLockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let vault = self.vault.clone();
        let path = self.path.clone();
        let owner = self.owner.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = vault.unlock(&path, &owner).await {
                        warn!("Background release of {} failed: {}", path, e);
                    }
                });
            }
            Err(_) => warn!("FsItemLockGuard for {} dropped outside a runtime, lock stays held", path),
        }
    }
}
