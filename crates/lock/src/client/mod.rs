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

pub mod local;

use crate::{LockOwner, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Lock client of one cluster node, as seen by the distributed strategy
#[async_trait]
pub trait ClusterLockClient: Send + Sync + std::fmt::Debug {
    /// Identifier of the node behind this client
    fn node_id(&self) -> &str;

    /// Grant `resource` to `owner` for `lease` if it is free, expired or already held by `owner`.
    /// Grants to the current holder are counted and renew the lease.
    async fn try_acquire(&self, resource: &str, owner: &LockOwner, lease: Duration) -> Result<bool>;

    /// Drop one grant of `resource` if held by `owner`. The lease goes away with the last one.
    async fn release(&self, resource: &str, owner: &LockOwner) -> Result<bool>;

    /// Extend the live lease of `owner` on `resource` to `lease` from now, without adding a grant
    async fn renew(&self, resource: &str, owner: &LockOwner, lease: Duration) -> Result<bool>;

    /// Release `resource` regardless of its holder
    async fn force_release(&self, resource: &str) -> Result<bool>;

    /// Current holder of an unexpired lease
    async fn holder(&self, resource: &str) -> Result<Option<LockOwner>>;

    /// Resources with an unexpired lease that start with `prefix`
    async fn resources(&self, prefix: &str) -> Result<Vec<String>>;

    /// Drop expired leases
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }

    /// Check if client is online
    async fn is_online(&self) -> bool;
}

/// Client factory
pub struct ClientFactory;

impl ClientFactory {
    /// Create an in-process node client
    pub fn create_local(node_id: impl Into<String>) -> Arc<dyn ClusterLockClient> {
        Arc::new(local::LocalNodeClient::new(node_id))
    }
}
