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

use std::fmt::Display;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::backend::db::DbLockBackend;
use crate::backend::distributed::DistributedLockBackend;
use crate::backend::local::LocalLockBackend;
use crate::backend::optimistic::OptimisticLockBackend;
use crate::client::ClusterLockClient;
use crate::guard::{ConflictGuard, ConflictsGuard, GuardCategory};
use crate::reaper::ExpiredLocksReaper;
use crate::store::{LockStore, VersionedLockStore};
use crate::vault::FsItemsVault;
use crate::{LockBackend, LockError, LockMethod, LockingConfig, Result, lock_method};

/// Category of single-key guards handed out by [`LockingProvider::get_conflict_guard`]
pub const GENERAL_CATEGORY: &str = "general";
/// Category of the folder path vault
pub const FOLDER_CATEGORY: &str = "fs-folders";
/// Category of the file path vault
pub const FILE_CATEGORY: &str = "fs-files";

const RESERVED_CATEGORIES: [&str; 3] = [GENERAL_CATEGORY, FOLDER_CATEGORY, FILE_CATEGORY];

/// External resources the cluster strategies are built on.
#[derive(Debug, Default, Clone)]
pub struct BackendResources {
    /// Node clients for `distributed`
    pub cluster_clients: Vec<Arc<dyn ClusterLockClient>>,
    /// Lock table for `db`
    pub lock_store: Option<Arc<dyn LockStore>>,
    /// Versioned records for `optimistic`
    pub versioned_store: Option<Arc<dyn VersionedLockStore>>,
}

/// Entry point for every lock used by the storage layer.
///
/// Owns one backend, chosen once, plus the folder and file path vaults and the registry of
/// named guard categories built on it.
#[derive(Debug)]
pub struct LockingProvider {
    method: LockMethod,
    config: LockingConfig,
    backend: Arc<dyn LockBackend>,
    folder_vault: FsItemsVault,
    file_vault: FsItemsVault,
    general: Arc<GuardCategory>,
    categories: DashMap<String, Arc<GuardCategory>>,
}

impl LockingProvider {
    /// Provider over an already built backend
    pub fn new(config: LockingConfig, backend: Arc<dyn LockBackend>) -> Self {
        let method = backend.method();
        info!("Locking provider using '{}' on node {}", method, config.node_id);
        Self {
            method,
            folder_vault: FsItemsVault::new(FOLDER_CATEGORY, backend.clone(), config.acquire_timeout),
            file_vault: FsItemsVault::new(FILE_CATEGORY, backend.clone(), config.acquire_timeout),
            general: Arc::new(GuardCategory::new(GENERAL_CATEGORY, backend.clone())),
            categories: DashMap::new(),
            backend,
            config,
        }
    }

    /// Provider with in-process locks
    pub fn local(config: LockingConfig) -> Self {
        let backend = Arc::new(LocalLockBackend::new(config.lease_time));
        Self::new(config, backend)
    }

    /// Build the backend for `method` from `resources`.
    ///
    /// Fails with a configuration error when the resource the strategy needs is missing. The
    /// `db` backend removes rows left by a previous run of this node before it is returned.
    pub async fn build(method: LockMethod, config: LockingConfig, resources: BackendResources) -> Result<Self> {
        config.validate()?;
        let backend: Arc<dyn LockBackend> = match method {
            LockMethod::Jvm => Arc::new(LocalLockBackend::new(config.lease_time)),
            LockMethod::Distributed => {
                if resources.cluster_clients.is_empty() {
                    return Err(LockError::configuration("distributed locking requires cluster lock clients"));
                }
                let quorum = config.calculate_quorum(resources.cluster_clients.len())?;
                Arc::new(DistributedLockBackend::new(
                    resources.cluster_clients,
                    quorum,
                    config.lease_time,
                    config.distributed.retry_interval,
                ))
            }
            LockMethod::Db => {
                let store = resources
                    .lock_store
                    .ok_or_else(|| LockError::configuration("db locking requires a lock store"))?;
                let backend = DbLockBackend::new(store, config.node_id.clone(), config.lease_time);
                backend.init().await?;
                Arc::new(backend)
            }
            LockMethod::Optimistic => {
                let store = resources
                    .versioned_store
                    .ok_or_else(|| LockError::configuration("optimistic locking requires a versioned lock store"))?;
                Arc::new(OptimisticLockBackend::new(store, config.lease_time))
            }
        };
        Ok(Self::new(config, backend))
    }

    /// Build from the process-wide lock method and `REPOKEEPER_*` configuration
    pub async fn from_env(resources: BackendResources) -> Result<Self> {
        Self::build(lock_method()?, LockingConfig::from_env(), resources).await
    }

    pub fn method(&self) -> LockMethod {
        self.method
    }

    pub fn config(&self) -> &LockingConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn LockBackend> {
        &self.backend
    }

    pub fn get_folder_locking_map(&self) -> &FsItemsVault {
        &self.folder_vault
    }

    pub fn get_file_locking_map(&self) -> &FsItemsVault {
        &self.file_vault
    }

    /// Guard named `key` in the general category
    pub fn get_conflict_guard(&self, key: &str) -> ConflictGuard {
        self.general.guard(key)
    }

    /// Keyed guard family registered under `name`, created on first request.
    ///
    /// Requests for the same name share one category whatever `K` is; the category names of
    /// the general guards and path vaults are reserved.
    pub fn get_conflicts_guard<K>(&self, name: &str) -> Result<ConflictsGuard<K>>
    where
        K: Ord + Display,
    {
        if RESERVED_CATEGORIES.contains(&name) {
            return Err(LockError::ReservedCategory { name: name.to_string() });
        }
        let category = self
            .categories
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Creating guard category {}", name);
                Arc::new(GuardCategory::new(name, self.backend.clone()))
            })
            .clone();
        Ok(ConflictsGuard::new(category))
    }

    /// Names of the registered guard categories, sorted
    pub fn category_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.categories.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Start the expired locks reaper when the strategy needs one
    pub fn start_reaper(&self) -> Option<ExpiredLocksReaper> {
        if self.method.needs_reaper() {
            Some(ExpiredLocksReaper::spawn(self.backend.clone(), self.config.cleanup_interval))
        } else {
            None
        }
    }

    /// Release everything this node holds in the backend
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down locking provider '{}'", self.method);
        self.backend.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LockOwner;
    use crate::store::{InMemoryLockStore, InMemoryVersionedStore};
    use std::time::Duration;

    #[tokio::test]
    async fn test_reserved_category_rejected() {
        let provider = LockingProvider::local(LockingConfig::default());
        for name in RESERVED_CATEGORIES {
            assert!(matches!(
                provider.get_conflicts_guard::<String>(name),
                Err(LockError::ReservedCategory { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_categories_are_shared_by_name() {
        let provider = LockingProvider::local(LockingConfig::default());
        let first = provider.get_conflicts_guard::<String>("indexing").unwrap();
        let second = provider.get_conflicts_guard::<String>("indexing").unwrap();
        let owner = LockOwner::new("a");

        assert!(first.try_to_lock(&"repo".to_string(), &owner, Duration::from_millis(10)).await.unwrap());
        assert!(second.is_locked(&"repo".to_string()).await.unwrap());
        assert_eq!(provider.category_names(), vec!["indexing"]);
    }

    #[tokio::test]
    async fn test_conflict_guards_share_lock_by_key() {
        let provider = LockingProvider::local(LockingConfig::default());
        let a = LockOwner::new("a");
        assert!(provider.get_conflict_guard("gc").try_to_lock(&a, Duration::from_millis(10)).await.unwrap());
        assert!(provider.get_conflict_guard("gc").is_locked().await.unwrap());
        assert!(!provider.get_conflict_guard("other").is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_build_requires_resources() {
        let config = LockingConfig::default();
        for method in [LockMethod::Distributed, LockMethod::Db, LockMethod::Optimistic] {
            let err = LockingProvider::build(method, config.clone(), BackendResources::default())
                .await
                .unwrap_err();
            assert!(matches!(err, LockError::Configuration { .. }));
        }
    }

    #[tokio::test]
    async fn test_distributed_rejects_minority_quorum() {
        let clients = || {
            (0..3)
                .map(|i| crate::client::ClientFactory::create_local(format!("node-{i}")))
                .collect::<Vec<_>>()
        };
        let mut config = LockingConfig::default();
        config.distributed.quorum = 1;
        let resources = BackendResources {
            cluster_clients: clients(),
            ..Default::default()
        };
        let err = LockingProvider::build(LockMethod::Distributed, config.clone(), resources)
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Configuration { .. }));

        config.distributed.quorum = 2;
        let resources = BackendResources {
            cluster_clients: clients(),
            ..Default::default()
        };
        let provider = LockingProvider::build(LockMethod::Distributed, config, resources).await.unwrap();
        assert_eq!(provider.method(), LockMethod::Distributed);
    }

    #[tokio::test]
    async fn test_reaper_only_for_lease_strategies() {
        let resources = BackendResources {
            lock_store: Some(Arc::new(InMemoryLockStore::new())),
            versioned_store: Some(Arc::new(InMemoryVersionedStore::new())),
            cluster_clients: vec![crate::client::ClientFactory::create_local("node-a")],
        };
        for (method, expected) in [
            (LockMethod::Jvm, false),
            (LockMethod::Distributed, false),
            (LockMethod::Db, true),
            (LockMethod::Optimistic, true),
        ] {
            let provider = LockingProvider::build(method, LockingConfig::default(), resources.clone())
                .await
                .unwrap();
            assert_eq!(provider.method(), method);
            assert_eq!(provider.start_reaper().is_some(), expected, "{method}");
        }
    }
}
