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

use crate::LockBackend;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Background task that periodically removes abandoned locks from a backend.
///
/// The task stops when the reaper is stopped or dropped.
#[derive(Debug)]
pub struct ExpiredLocksReaper {
    handle: JoinHandle<()>,
}

impl ExpiredLocksReaper {
    /// Spawn the reaper on the current Tokio runtime. The first cleanup runs one `interval` after start.
    pub fn spawn(backend: Arc<dyn LockBackend>, interval: Duration) -> Self {
        info!("Starting expired locks reaper for '{}' every {:?}", backend.method(), interval);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                Self::run_once(backend.as_ref()).await;
            }
        });
        Self { handle }
    }

    /// One cleanup pass. Failures are logged and reported as zero removals.
    pub async fn run_once(backend: &dyn LockBackend) -> usize {
        match backend.cleanup_expired().await {
            Ok(removed) => {
                if removed > 0 {
                    info!("Expired locks reaper removed {} locks", removed);
                } else {
                    debug!("Expired locks reaper found nothing to remove");
                }
                removed
            }
            Err(e) => {
                error!("Failed to clean up expired locks: {}", e);
                0
            }
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for ExpiredLocksReaper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::db::DbLockBackend;
    use crate::store::InMemoryLockStore;
    use crate::{LockOwner, LockStore};

    #[tokio::test]
    async fn test_reaper_removes_expired_rows() {
        let store = Arc::new(InMemoryLockStore::new());
        let backend: Arc<dyn LockBackend> = Arc::new(DbLockBackend::new(store.clone(), "node-a", Duration::from_secs(60)));
        backend
            .acquire("cat", "k", &LockOwner::new("t"), Duration::from_millis(10))
            .await
            .unwrap();
        store.backdate("cat", "k", 0);

        let reaper = ExpiredLocksReaper::spawn(backend.clone(), Duration::from_millis(10));
        for _ in 0..100 {
            if store.get("cat", "k").await.unwrap().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(store.get("cat", "k").await.unwrap().is_none());
        assert!(reaper.is_running());
        reaper.stop();
    }
}
