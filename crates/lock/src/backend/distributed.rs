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
use crate::client::ClusterLockClient;
use crate::types::resource_key;
use crate::{LockError, LockMethod, LockOwner, Result};
use async_trait::async_trait;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Outcome of one round of quorum acquisition
#[derive(Debug)]
struct QuorumAttempt {
    granted: Vec<Arc<dyn ClusterLockClient>>,
    reachable: usize,
}

/// Cluster-wide locks, the `distributed` strategy.
///
/// A lock is held once at least `quorum` node clients granted it. A round that falls short
/// rolls back its partial grants before retrying, so a failed attempt never leaves stray
/// leases behind.
#[derive(Debug)]
pub struct DistributedLockBackend {
    clients: Vec<Arc<dyn ClusterLockClient>>,
    quorum: usize,
    lease_time: Duration,
    retry_interval: Duration,
}

impl DistributedLockBackend {
    /// Backend over `clients`. A `quorum` below a strict majority is raised to it.
    pub fn new(clients: Vec<Arc<dyn ClusterLockClient>>, quorum: usize, lease_time: Duration, retry_interval: Duration) -> Self {
        let majority = clients.len() / 2 + 1;
        let q = if clients.is_empty() {
            0
        } else {
            if quorum < majority {
                warn!("Quorum {} is below the majority of {} nodes, using {}", quorum, clients.len(), majority);
            }
            quorum.clamp(majority, clients.len())
        };
        Self {
            clients,
            quorum: q,
            lease_time,
            retry_interval,
        }
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Retry pause between half and one and a half `retry_interval`, so contenders that split
    /// the grants do not collide again in lockstep
    fn retry_delay(&self) -> Duration {
        let base = self.retry_interval.as_millis().max(2) as u64;
        Duration::from_millis(rand::rng().random_range(base / 2..=base + base / 2))
    }

    async fn acquire_quorum(&self, resource: &str, owner: &LockOwner) -> QuorumAttempt {
        let futs: Vec<_> = self
            .clients
            .iter()
            .map(|client| async move { (client.clone(), client.try_acquire(resource, owner, self.lease_time).await) })
            .collect();

        let mut granted = Vec::new();
        let mut reachable = 0;
        for (client, result) in futures::future::join_all(futs).await {
            match result {
                Ok(true) => {
                    reachable += 1;
                    granted.push(client);
                }
                Ok(false) => reachable += 1,
                Err(e) => warn!("Failed to acquire {} on node {}: {}", resource, client.node_id(), e),
            }
        }
        QuorumAttempt { granted, reachable }
    }

    async fn rollback(&self, resource: &str, owner: &LockOwner, granted: Vec<Arc<dyn ClusterLockClient>>) {
        let futs = granted.iter().map(|client| async move {
            if let Err(e) = client.release(resource, owner).await {
                warn!("Failed to rollback {} on node {}: {}", resource, client.node_id(), e);
            }
        });
        futures::future::join_all(futs).await;
    }

    /// Holder reported by at least `quorum` nodes
    async fn quorum_holder(&self, resource: &str) -> Result<Option<LockOwner>> {
        let results = futures::future::join_all(self.clients.iter().map(|c| c.holder(resource))).await;
        let mut votes: HashMap<LockOwner, usize> = HashMap::new();
        let mut reachable = 0;
        for result in results {
            match result {
                Ok(Some(owner)) => {
                    reachable += 1;
                    *votes.entry(owner).or_default() += 1;
                }
                Ok(None) => reachable += 1,
                Err(e) => debug!("Holder query for {} failed: {}", resource, e),
            }
        }
        if reachable < self.quorum {
            return Err(LockError::QuorumNotReached {
                required: self.quorum,
                achieved: reachable,
            });
        }
        Ok(votes.into_iter().find(|(_, count)| *count >= self.quorum).map(|(owner, _)| owner))
    }
}

#[async_trait]
impl LockBackend for DistributedLockBackend {
    fn method(&self) -> LockMethod {
        LockMethod::Distributed
    }

    async fn acquire(&self, category: &str, key: &str, owner: &LockOwner, timeout: Duration) -> Result<()> {
        if self.clients.is_empty() {
            return Err(LockError::configuration("distributed locking requires at least one node client"));
        }
        let resource = resource_key(category, key);
        let deadline = Instant::now() + timeout;

        loop {
            let attempt = self.acquire_quorum(&resource, owner).await;
            if attempt.granted.len() >= self.quorum {
                debug!("Acquired {} on {}/{} nodes for {}", resource, attempt.granted.len(), self.clients.len(), owner);
                return Ok(());
            }

            let achieved = attempt.granted.len();
            let reachable = attempt.reachable;
            self.rollback(&resource, owner, attempt.granted).await;

            let now = Instant::now();
            if now >= deadline {
                if reachable < self.quorum {
                    return Err(LockError::QuorumNotReached {
                        required: self.quorum,
                        achieved,
                    });
                }
                return Err(LockError::timeout(resource, timeout));
            }
            tokio::time::sleep(self.retry_delay().min(deadline - now)).await;
        }
    }

    async fn release(&self, category: &str, key: &str, owner: &LockOwner) -> Result<bool> {
        let resource = resource_key(category, key);
        let results = futures::future::join_all(self.clients.iter().map(|c| c.release(&resource, owner))).await;
        let mut released = 0;
        for (client, result) in self.clients.iter().zip(results) {
            match result {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to release {} on node {}: {}", resource, client.node_id(), e),
            }
        }
        Ok(released > 0)
    }

    async fn renew(&self, category: &str, key: &str, owner: &LockOwner) -> Result<bool> {
        let resource = resource_key(category, key);
        let results =
            futures::future::join_all(self.clients.iter().map(|c| c.renew(&resource, owner, self.lease_time))).await;
        let mut renewed = 0;
        for (client, result) in self.clients.iter().zip(results) {
            match result {
                Ok(true) => renewed += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to renew {} on node {}: {}", resource, client.node_id(), e),
            }
        }
        Ok(renewed >= self.quorum)
    }

    async fn force_release(&self, category: &str, key: &str) -> Result<bool> {
        let resource = resource_key(category, key);
        let results = futures::future::join_all(self.clients.iter().map(|c| c.force_release(&resource))).await;
        Ok(results.into_iter().any(|r| matches!(r, Ok(true))))
    }

    async fn holder(&self, category: &str, key: &str) -> Result<Option<LockOwner>> {
        self.quorum_holder(&resource_key(category, key)).await
    }

    async fn locked_keys(&self, category: &str) -> Result<Vec<String>> {
        let prefix = resource_key(category, "");
        let results = futures::future::join_all(self.clients.iter().map(|c| c.resources(&prefix))).await;
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for resources in results.into_iter().flatten() {
            for resource in resources {
                if let Some(key) = resource.strip_prefix(&prefix) {
                    *counts.entry(key.to_string()).or_default() += 1;
                }
            }
        }
        Ok(counts
            .into_iter()
            .filter(|(_, count)| *count >= self.quorum)
            .map(|(key, _)| key)
            .collect())
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        let results = futures::future::join_all(self.clients.iter().map(|c| c.purge_expired())).await;
        Ok(results.into_iter().flatten().sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::local::LocalNodeClient;

    fn cluster(n: usize) -> (Vec<Arc<LocalNodeClient>>, DistributedLockBackend) {
        let nodes: Vec<Arc<LocalNodeClient>> = (0..n).map(|i| Arc::new(LocalNodeClient::new(format!("node-{i}")))).collect();
        let clients = nodes.iter().map(|n| n.clone() as Arc<dyn ClusterLockClient>).collect();
        let backend = DistributedLockBackend::new(clients, n / 2 + 1, Duration::from_secs(30), Duration::from_millis(5));
        (nodes, backend)
    }

    #[tokio::test]
    async fn test_quorum_acquire_and_release() {
        let (_, backend) = cluster(3);
        let a = LockOwner::new("a");
        backend.acquire("cat", "k", &a, Duration::from_millis(50)).await.unwrap();
        assert_eq!(backend.holder("cat", "k").await.unwrap(), Some(a.clone()));
        assert_eq!(backend.locked_keys("cat").await.unwrap(), vec!["k"]);

        let err = backend
            .acquire("cat", "k", &LockOwner::new("b"), Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        assert!(backend.release("cat", "k", &a).await.unwrap());
        assert!(!backend.is_locked("cat", "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_tolerates_minority_outage() {
        let (nodes, backend) = cluster(3);
        nodes[2].set_online(false);
        let a = LockOwner::new("a");
        backend.acquire("cat", "k", &a, Duration::from_millis(50)).await.unwrap();
        assert!(backend.is_held_by("cat", "k", &a).await.unwrap());
    }

    #[tokio::test]
    async fn test_majority_outage_reports_quorum_failure() {
        let (nodes, backend) = cluster(3);
        nodes[1].set_online(false);
        nodes[2].set_online(false);

        let err = backend
            .acquire("cat", "k", &LockOwner::new("a"), Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::QuorumNotReached { required: 2, .. }));
        // The single grant on the healthy node was rolled back
        assert_eq!(nodes[0].holder("cat:k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_split_grants_are_rolled_back() {
        let (nodes, backend) = cluster(3);
        let lease = Duration::from_secs(30);
        // Another owner already holds the lease on two nodes
        nodes[0].try_acquire("cat:k", &LockOwner::new("x"), lease).await.unwrap();
        nodes[1].try_acquire("cat:k", &LockOwner::new("x"), lease).await.unwrap();

        let err = backend
            .acquire("cat", "k", &LockOwner::new("a"), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(nodes[2].holder("cat:k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_minority_quorum_is_raised_to_majority() {
        let nodes: Vec<Arc<LocalNodeClient>> = (0..3).map(|i| Arc::new(LocalNodeClient::new(format!("node-{i}")))).collect();
        let clients = nodes.iter().map(|n| n.clone() as Arc<dyn ClusterLockClient>).collect();
        let backend = DistributedLockBackend::new(clients, 1, Duration::from_secs(30), Duration::from_millis(5));
        assert_eq!(backend.quorum(), 2);

        // One node alone can no longer hand the lock to a second owner
        let lease = Duration::from_secs(30);
        nodes[0].try_acquire("cat:k", &LockOwner::new("x"), lease).await.unwrap();
        nodes[1].try_acquire("cat:k", &LockOwner::new("x"), lease).await.unwrap();
        let err = backend
            .acquire("cat", "k", &LockOwner::new("a"), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_reentry_needs_matching_releases() {
        let (nodes, backend) = cluster(3);
        let a = LockOwner::new("a");
        backend.acquire("cat", "k", &a, Duration::from_millis(50)).await.unwrap();
        backend.acquire("cat", "k", &a, Duration::from_millis(50)).await.unwrap();

        assert!(backend.release("cat", "k", &a).await.unwrap());
        assert!(backend.is_held_by("cat", "k", &a).await.unwrap());
        assert!(
            backend
                .acquire("cat", "k", &LockOwner::new("b"), Duration::from_millis(20))
                .await
                .unwrap_err()
                .is_timeout()
        );

        assert!(backend.release("cat", "k", &a).await.unwrap());
        assert!(!backend.is_locked("cat", "k").await.unwrap());
        assert_eq!(nodes[0].holder("cat:k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_renew_keeps_lease_past_its_time() {
        let nodes: Vec<Arc<LocalNodeClient>> = (0..3).map(|i| Arc::new(LocalNodeClient::new(format!("node-{i}")))).collect();
        let clients = nodes.iter().map(|n| n.clone() as Arc<dyn ClusterLockClient>).collect();
        let backend = DistributedLockBackend::new(clients, 2, Duration::from_millis(60), Duration::from_millis(5));
        let a = LockOwner::new("a");
        backend.acquire("cat", "k", &a, Duration::from_millis(50)).await.unwrap();

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(30)).await;
            assert!(backend.renew("cat", "k", &a).await.unwrap());
        }
        assert!(backend.is_held_by("cat", "k", &a).await.unwrap());
        assert!(!backend.renew("cat", "k", &LockOwner::new("b")).await.unwrap());

        tokio::time::sleep(Duration::from_millis(90)).await;
        assert!(!backend.renew("cat", "k", &a).await.unwrap());
        assert!(!backend.is_locked("cat", "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_no_clients_is_a_configuration_error() {
        let backend = DistributedLockBackend::new(Vec::new(), 1, Duration::from_secs(1), Duration::from_millis(5));
        let err = backend
            .acquire("cat", "k", &LockOwner::new("a"), Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Configuration { .. }));
    }
}
