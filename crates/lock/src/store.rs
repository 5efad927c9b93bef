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

//! Persistence seams of the `db` and `optimistic` strategies.
//!
//! The in-memory implementations are shared by cloning an `Arc`, so several backends in one
//! process behave like several nodes writing to the same table.

use crate::{LockError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// One row of the lock table. `(category, key)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRow {
    pub category: String,
    pub key: String,
    /// Node that inserted the row
    pub owner: String,
    /// Execution context on that node
    pub holder: String,
    pub started_at_ms: u64,
}

/// Shared lock table.
#[async_trait]
pub trait LockStore: Send + Sync + std::fmt::Debug {
    /// Insert the row. `Ok(false)` when `(category, key)` already exists.
    async fn try_insert(&self, row: &LockRow) -> Result<bool>;

    async fn get(&self, category: &str, key: &str) -> Result<Option<LockRow>>;

    /// Delete the row only if it belongs to `owner`
    async fn delete(&self, category: &str, key: &str, owner: &str) -> Result<bool>;

    async fn force_delete(&self, category: &str, key: &str) -> Result<bool>;

    /// Set the start time of the row held by `owner` and `holder`. `Ok(false)` when it is gone.
    async fn touch(&self, category: &str, key: &str, owner: &str, holder: &str, started_at_ms: u64) -> Result<bool>;

    async fn keys(&self, category: &str) -> Result<Vec<String>>;

    /// Rows started before `started_before_ms`
    async fn expired(&self, started_before_ms: u64) -> Result<Vec<LockRow>>;

    async fn delete_all_for_owner(&self, owner: &str) -> Result<usize>;
}

/// Lock table kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    rows: Mutex<BTreeMap<(String, String), LockRow>>,
    failing_deletes: AtomicUsize,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` deletes fail with a store error
    pub fn fail_next_deletes(&self, count: usize) {
        self.failing_deletes.store(count, Ordering::SeqCst);
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().len()
    }

    /// Overwrite the start time of a row, e.g. to simulate an abandoned lock
    pub fn backdate(&self, category: &str, key: &str, started_at_ms: u64) {
        if let Some(row) = self.rows.lock().get_mut(&(category.to_string(), key.to_string())) {
            row.started_at_ms = started_at_ms;
        }
    }

    fn injected_failure(&self) -> Result<()> {
        let pending = self
            .failing_deletes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match pending {
            Ok(_) => Err(LockError::store("injected delete failure")),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn try_insert(&self, row: &LockRow) -> Result<bool> {
        let mut rows = self.rows.lock();
        let id = (row.category.clone(), row.key.clone());
        if rows.contains_key(&id) {
            return Ok(false);
        }
        rows.insert(id, row.clone());
        Ok(true)
    }

    async fn get(&self, category: &str, key: &str) -> Result<Option<LockRow>> {
        Ok(self.rows.lock().get(&(category.to_string(), key.to_string())).cloned())
    }

    async fn delete(&self, category: &str, key: &str, owner: &str) -> Result<bool> {
        self.injected_failure()?;
        let mut rows = self.rows.lock();
        let id = (category.to_string(), key.to_string());
        match rows.get(&id) {
            Some(row) if row.owner == owner => {
                rows.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn force_delete(&self, category: &str, key: &str) -> Result<bool> {
        self.injected_failure()?;
        Ok(self.rows.lock().remove(&(category.to_string(), key.to_string())).is_some())
    }

    async fn touch(&self, category: &str, key: &str, owner: &str, holder: &str, started_at_ms: u64) -> Result<bool> {
        match self.rows.lock().get_mut(&(category.to_string(), key.to_string())) {
            Some(row) if row.owner == owner && row.holder == holder => {
                row.started_at_ms = started_at_ms;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn keys(&self, category: &str) -> Result<Vec<String>> {
        Ok(self
            .rows
            .lock()
            .keys()
            .filter(|(c, _)| c == category)
            .map(|(_, k)| k.clone())
            .collect())
    }

    async fn expired(&self, started_before_ms: u64) -> Result<Vec<LockRow>> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|r| r.started_at_ms < started_before_ms)
            .cloned()
            .collect())
    }

    async fn delete_all_for_owner(&self, owner: &str) -> Result<usize> {
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|_, r| r.owner != owner);
        Ok(before - rows.len())
    }
}

/// Versioned lock record. Every successful write bumps `version` by one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedLock {
    pub holder: Option<String>,
    /// Times `holder` acquired the record without releasing it, 0 when unheld
    #[serde(default)]
    pub holds: u32,
    pub version: u64,
    pub updated_at_ms: u64,
}

/// Compare-and-set store used by the `optimistic` strategy.
#[async_trait]
pub trait VersionedLockStore: Send + Sync + std::fmt::Debug {
    /// Current record, a default unheld record at version 0 when missing
    async fn read(&self, resource: &str) -> Result<VersionedLock>;

    /// Write `holder` and its hold count if the record is still at `expected_version`.
    /// `Ok(false)` on conflict.
    async fn compare_and_set(&self, resource: &str, expected_version: u64, holder: Option<String>, holds: u32) -> Result<bool>;

    /// Held records whose resource starts with `prefix`
    async fn held(&self, prefix: &str) -> Result<Vec<(String, VersionedLock)>>;
}

/// Versioned records kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryVersionedStore {
    records: Mutex<BTreeMap<String, VersionedLock>>,
}

impl InMemoryVersionedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the update time of a record, e.g. to simulate an abandoned lock
    pub fn backdate(&self, resource: &str, updated_at_ms: u64) {
        if let Some(record) = self.records.lock().get_mut(resource) {
            record.updated_at_ms = updated_at_ms;
        }
    }
}

#[async_trait]
impl VersionedLockStore for InMemoryVersionedStore {
    async fn read(&self, resource: &str) -> Result<VersionedLock> {
        Ok(self.records.lock().get(resource).cloned().unwrap_or_default())
    }

    async fn compare_and_set(&self, resource: &str, expected_version: u64, holder: Option<String>, holds: u32) -> Result<bool> {
        let mut records = self.records.lock();
        let current = records.get(resource).map(|r| r.version).unwrap_or_default();
        if current != expected_version {
            return Ok(false);
        }
        records.insert(
            resource.to_string(),
            VersionedLock {
                holds: if holder.is_some() { holds } else { 0 },
                holder,
                version: expected_version + 1,
                updated_at_ms: now_millis(),
            },
        );
        Ok(true)
    }

    async fn held(&self, prefix: &str) -> Result<Vec<(String, VersionedLock)>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|(resource, record)| resource.starts_with(prefix) && record.holder.is_some())
            .map(|(resource, record)| (resource.clone(), record.clone()))
            .collect())
    }
}
