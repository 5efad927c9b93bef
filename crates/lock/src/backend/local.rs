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
use crate::{LockError, LockMethod, LockOwner, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

/// Idle entries are swept inline once every this many releases
const SWEEP_EVERY_RELEASES: usize = 1024;

#[derive(Debug)]
struct LocalLockState {
    holder: Option<LockOwner>,
    hold_count: usize,
    last_access: Instant,
}

/// One reentrant lock plus the wakeup channel of its waiters.
#[derive(Debug)]
struct LocalLockEntry {
    state: Mutex<LocalLockState>,
    notify: Notify,
}

impl LocalLockEntry {
    fn new() -> Self {
        Self {
            state: Mutex::new(LocalLockState {
                holder: None,
                hold_count: 0,
                last_access: Instant::now(),
            }),
            notify: Notify::new(),
        }
    }

    /// Try once. Re-entry by the current holder bumps the hold count.
    fn try_acquire(&self, owner: &LockOwner) -> bool {
        let mut state = self.state.lock();
        state.last_access = Instant::now();
        match &state.holder {
            None => {
                state.holder = Some(owner.clone());
                state.hold_count = 1;
                true
            }
            Some(holder) if holder == owner => {
                state.hold_count += 1;
                true
            }
            Some(_) => false,
        }
    }
}

/// In-process reentrant locks, the `jvm` strategy.
///
/// Entries are created on first use and evicted once they are unlocked, have no waiters and
/// have been idle longer than `idle_expiry`. Eviction runs inline every few releases and on
/// [`LockBackend::cleanup_expired`].
#[derive(Debug)]
pub struct LocalLockBackend {
    entries: DashMap<(String, String), Arc<LocalLockEntry>>,
    idle_expiry: Duration,
    releases: AtomicUsize,
}

impl LocalLockBackend {
    pub fn new(idle_expiry: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            idle_expiry,
            releases: AtomicUsize::new(0),
        }
    }

    fn entry(&self, category: &str, key: &str) -> Arc<LocalLockEntry> {
        self.entries
            .entry((category.to_string(), key.to_string()))
            .or_insert_with(|| Arc::new(LocalLockEntry::new()))
            .clone()
    }

    fn existing(&self, category: &str, key: &str) -> Option<Arc<LocalLockEntry>> {
        self.entries.get(&(category.to_string(), key.to_string())).map(|e| e.clone())
    }

    /// Number of lock entries currently tracked, held or idle
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    fn sweep_idle(&self) -> usize {
        let before = self.entries.len();
        let idle_expiry = self.idle_expiry;
        // A strong count of 1 means no waiter holds the entry, so it cannot be in use
        self.entries.retain(|_, entry| {
            if Arc::strong_count(entry) > 1 {
                return true;
            }
            let state = entry.state.lock();
            state.holder.is_some() || state.last_access.elapsed() < idle_expiry
        });
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            trace!("Evicted {} idle local lock entries", removed);
        }
        removed
    }
}

impl Default for LocalLockBackend {
    fn default() -> Self {
        Self::new(Duration::from_secs(repokeeper_config::DEFAULT_LOCK_LEASE_SECS))
    }
}

#[async_trait]
impl LockBackend for LocalLockBackend {
    fn method(&self) -> LockMethod {
        LockMethod::Jvm
    }

    async fn acquire(&self, category: &str, key: &str, owner: &LockOwner, timeout: Duration) -> Result<()> {
        let entry = self.entry(category, key);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before checking so a release in between is not missed
            let notified = entry.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if entry.try_acquire(owner) {
                return Ok(());
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                debug!("Timed out waiting for local lock {}:{} owner={}", category, key, owner);
                return Err(LockError::timeout(format!("{category}:{key}"), timeout));
            }
        }
    }

    async fn release(&self, category: &str, key: &str, owner: &LockOwner) -> Result<bool> {
        let Some(entry) = self.existing(category, key) else {
            return Ok(false);
        };

        let released = {
            let mut state = entry.state.lock();
            state.last_access = Instant::now();
            match &state.holder {
                None => return Ok(false),
                Some(holder) if holder != owner => {
                    warn!("Owner {} tried to release {}:{} held by {}", owner, category, key, holder);
                    return Err(LockError::not_owner(format!("{category}:{key}"), owner.as_str()));
                }
                Some(_) => {
                    state.hold_count = state.hold_count.saturating_sub(1);
                    if state.hold_count == 0 {
                        state.holder = None;
                        true
                    } else {
                        false
                    }
                }
            }
        };

        if released {
            entry.notify.notify_waiters();
            drop(entry);
            if (self.releases.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY_RELEASES == 0 {
                self.sweep_idle();
            }
        }
        Ok(true)
    }

    async fn force_release(&self, category: &str, key: &str) -> Result<bool> {
        let Some(entry) = self.existing(category, key) else {
            return Ok(false);
        };
        let was_locked = {
            let mut state = entry.state.lock();
            let was_locked = state.holder.take().is_some();
            state.hold_count = 0;
            state.last_access = Instant::now();
            was_locked
        };
        if was_locked {
            entry.notify.notify_waiters();
        }
        Ok(was_locked)
    }

    async fn holder(&self, category: &str, key: &str) -> Result<Option<LockOwner>> {
        Ok(self.existing(category, key).and_then(|e| e.state.lock().holder.clone()))
    }

    async fn locked_keys(&self, category: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == category && e.value().state.lock().holder.is_some())
            .map(|e| e.key().1.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        Ok(self.sweep_idle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reentrant_per_owner() {
        let backend = LocalLockBackend::default();
        let owner = LockOwner::new("task-a");
        backend.acquire("general", "k", &owner, Duration::from_millis(10)).await.unwrap();
        backend.acquire("general", "k", &owner, Duration::from_millis(10)).await.unwrap();

        assert!(backend.release("general", "k", &owner).await.unwrap());
        assert!(backend.is_locked("general", "k").await.unwrap());
        assert!(backend.release("general", "k", &owner).await.unwrap());
        assert!(!backend.is_locked("general", "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_other_owner_times_out() {
        let backend = LocalLockBackend::default();
        let a = LockOwner::new("a");
        let b = LockOwner::new("b");
        backend.acquire("general", "k", &a, Duration::from_millis(10)).await.unwrap();

        let err = backend.acquire("general", "k", &b, Duration::from_millis(30)).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(backend.is_held_by("general", "k", &a).await.unwrap());
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let backend = Arc::new(LocalLockBackend::default());
        let a = LockOwner::new("a");
        backend.acquire("cat", "k", &a, Duration::from_millis(10)).await.unwrap();

        let waiter = {
            let backend = backend.clone();
            tokio::spawn(async move {
                let b = LockOwner::new("b");
                backend.acquire("cat", "k", &b, Duration::from_secs(5)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        backend.release("cat", "k", &a).await.unwrap();

        waiter.await.unwrap().unwrap();
        assert_eq!(backend.holder("cat", "k").await.unwrap(), Some(LockOwner::new("b")));
    }

    #[tokio::test]
    async fn test_release_by_non_owner_fails() {
        let backend = LocalLockBackend::default();
        backend
            .acquire("cat", "k", &LockOwner::new("a"), Duration::from_millis(10))
            .await
            .unwrap();
        let err = backend.release("cat", "k", &LockOwner::new("b")).await.unwrap_err();
        assert!(matches!(err, LockError::NotOwner { .. }));
        assert!(!backend.release("cat", "missing", &LockOwner::new("b")).await.unwrap());
    }

    #[tokio::test]
    async fn test_force_release_and_locked_keys() {
        let backend = LocalLockBackend::default();
        let a = LockOwner::new("a");
        for key in ["z", "x", "y"] {
            backend.acquire("cat", key, &a, Duration::from_millis(10)).await.unwrap();
        }
        backend.acquire("other", "w", &a, Duration::from_millis(10)).await.unwrap();
        assert_eq!(backend.locked_keys("cat").await.unwrap(), vec!["x", "y", "z"]);

        assert!(backend.force_release("cat", "y").await.unwrap());
        assert!(!backend.force_release("cat", "y").await.unwrap());
        assert_eq!(backend.locked_keys("cat").await.unwrap(), vec!["x", "z"]);
    }

    #[tokio::test]
    async fn test_cleanup_evicts_only_idle_unlocked_entries() {
        let backend = LocalLockBackend::new(Duration::ZERO);
        let a = LockOwner::new("a");
        backend.acquire("cat", "held", &a, Duration::from_millis(10)).await.unwrap();
        backend.acquire("cat", "free", &a, Duration::from_millis(10)).await.unwrap();
        backend.release("cat", "free", &a).await.unwrap();

        assert_eq!(backend.cleanup_expired().await.unwrap(), 1);
        assert_eq!(backend.entry_count(), 1);
        assert!(backend.is_locked("cat", "held").await.unwrap());
    }
}
