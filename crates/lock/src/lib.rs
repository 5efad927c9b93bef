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

// ============================================================================
// Core Module Declarations
// ============================================================================

// Application Layer Modules
pub mod guard;
pub mod provider;
pub mod vault;

// Strategy Layer Modules
pub mod backend;
pub mod client;
pub mod reaper;
pub mod store;

// Core Modules
pub mod config;
pub mod error;
pub mod method;
pub mod types;

// ============================================================================
// Public API Exports
// ============================================================================

pub use crate::{
    // Strategies
    backend::{
        LockBackend, db::DbLockBackend, distributed::DistributedLockBackend, local::LocalLockBackend,
        optimistic::OptimisticLockBackend,
    },
    // Cluster node clients
    client::{ClientFactory, ClusterLockClient, local::LocalNodeClient},
    config::{DistributedConfig, LockingConfig},
    // Error types
    error::{LockError, Result},
    // Guards
    guard::{ConflictGuard, ConflictsGuard, GroupLockGuard},
    method::{LockMethod, is_db_locking, is_distributed_locking, is_optimistic_locking, lock_method},
    // Main components
    provider::{BackendResources, FILE_CATEGORY, FOLDER_CATEGORY, GENERAL_CATEGORY, LockingProvider},
    reaper::ExpiredLocksReaper,
    store::{InMemoryLockStore, InMemoryVersionedStore, LockRow, LockStore, VersionedLock, VersionedLockStore},
    // Core types
    types::{LockOwner, RepoPath},
    vault::{FsItemLockGuard, FsItemsVault},
};

/// Current version of the lock crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
