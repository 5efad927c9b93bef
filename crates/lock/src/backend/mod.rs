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

pub mod db;
pub mod distributed;
pub mod local;
pub mod optimistic;

use crate::{LockMethod, LockOwner, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Exclusive lock backend for one locking strategy.
///
/// Locks are addressed by `(category, key)`; categories keep unrelated key spaces apart.
/// Every backend guarantees that at most one owner holds a given `(category, key)` at a time.
#[async_trait]
pub trait LockBackend: Send + Sync + std::fmt::Debug {
    /// Strategy implemented by this backend
    fn method(&self) -> LockMethod;

    /// Acquire the lock for `owner`, waiting at most `timeout`.
    ///
    /// Returns [`crate::LockError::Timeout`] when the wait elapses; any other error means the
    /// backend itself failed.
    async fn acquire(&self, category: &str, key: &str, owner: &LockOwner, timeout: Duration) -> Result<()>;

    /// Release a lock held by `owner`. `Ok(false)` when nothing was held.
    async fn release(&self, category: &str, key: &str, owner: &LockOwner) -> Result<bool>;

    /// Restart the lease of a lock `owner` holds. `Ok(false)` when `owner` no longer holds it.
    ///
    /// Backends without leases only report whether `owner` still holds the lock.
    async fn renew(&self, category: &str, key: &str, owner: &LockOwner) -> Result<bool> {
        self.is_held_by(category, key, owner).await
    }

    /// Release a lock regardless of its holder
    async fn force_release(&self, category: &str, key: &str) -> Result<bool>;

    /// Current holder of the lock, if any
    async fn holder(&self, category: &str, key: &str) -> Result<Option<LockOwner>>;

    /// Check whether any owner holds the lock
    async fn is_locked(&self, category: &str, key: &str) -> Result<bool> {
        Ok(self.holder(category, key).await?.is_some())
    }

    /// Check whether `owner` holds the lock
    async fn is_held_by(&self, category: &str, key: &str, owner: &LockOwner) -> Result<bool> {
        Ok(self.holder(category, key).await?.as_ref() == Some(owner))
    }

    /// Keys currently locked in `category`
    async fn locked_keys(&self, category: &str) -> Result<Vec<String>>;

    /// Remove abandoned locks older than the lease. Returns how many were removed.
    async fn cleanup_expired(&self) -> Result<usize> {
        Ok(0)
    }

    /// Release everything this process still holds
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
