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

use crate::{LockError, LockOwner, Result, client::ClusterLockClient};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Lease {
    owner: LockOwner,
    holds: usize,
    expires_at: Instant,
}

impl Lease {
    fn is_live(&self) -> bool {
        self.expires_at > Instant::now()
    }
}

/// Lease table of one node, reachable in-process.
///
/// Can be switched offline to model an unreachable node: every call then fails with a
/// network error.
#[derive(Debug)]
pub struct LocalNodeClient {
    node_id: String,
    leases: Mutex<HashMap<String, Lease>>,
    online: AtomicBool,
}

impl LocalNodeClient {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            leases: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LockError::network(
                format!("lock node {} is unreachable", self.node_id),
                std::io::Error::from(std::io::ErrorKind::NotConnected),
            ))
        }
    }
}

#[async_trait]
impl ClusterLockClient for LocalNodeClient {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn try_acquire(&self, resource: &str, owner: &LockOwner, lease: Duration) -> Result<bool> {
        self.ensure_online()?;
        let mut leases = self.leases.lock();
        let expires_at = Instant::now() + lease;
        match leases.get_mut(resource) {
            Some(current) if current.owner == *owner => {
                current.holds += 1;
                current.expires_at = expires_at;
                Ok(true)
            }
            Some(current) if current.is_live() => Ok(false),
            _ => {
                leases.insert(
                    resource.to_string(),
                    Lease {
                        owner: owner.clone(),
                        holds: 1,
                        expires_at,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn release(&self, resource: &str, owner: &LockOwner) -> Result<bool> {
        self.ensure_online()?;
        let mut leases = self.leases.lock();
        match leases.get_mut(resource) {
            Some(current) if current.owner == *owner => {
                current.holds = current.holds.saturating_sub(1);
                if current.holds == 0 {
                    leases.remove(resource);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn renew(&self, resource: &str, owner: &LockOwner, lease: Duration) -> Result<bool> {
        self.ensure_online()?;
        match self.leases.lock().get_mut(resource) {
            Some(current) if current.owner == *owner && current.is_live() => {
                current.expires_at = Instant::now() + lease;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn force_release(&self, resource: &str) -> Result<bool> {
        self.ensure_online()?;
        Ok(self.leases.lock().remove(resource).is_some())
    }

    async fn holder(&self, resource: &str) -> Result<Option<LockOwner>> {
        self.ensure_online()?;
        Ok(self
            .leases
            .lock()
            .get(resource)
            .filter(|l| l.is_live())
            .map(|l| l.owner.clone()))
    }

    async fn resources(&self, prefix: &str) -> Result<Vec<String>> {
        self.ensure_online()?;
        Ok(self
            .leases
            .lock()
            .iter()
            .filter(|(resource, lease)| resource.starts_with(prefix) && lease.is_live())
            .map(|(resource, _)| resource.clone())
            .collect())
    }

    async fn purge_expired(&self) -> Result<usize> {
        self.ensure_online()?;
        let mut leases = self.leases.lock();
        let before = leases.len();
        leases.retain(|_, l| l.is_live());
        Ok(before - leases.len())
    }

    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lease_is_exclusive_until_expiry() {
        let client = LocalNodeClient::new("node-a");
        let a = LockOwner::new("a");
        let b = LockOwner::new("b");

        assert!(client.try_acquire("cat:k", &a, Duration::from_millis(30)).await.unwrap());
        assert!(client.try_acquire("cat:k", &a, Duration::from_millis(30)).await.unwrap());
        assert!(!client.try_acquire("cat:k", &b, Duration::from_millis(30)).await.unwrap());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.holder("cat:k").await.unwrap(), None);
        assert!(client.try_acquire("cat:k", &b, Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_only_by_owner() {
        let client = LocalNodeClient::new("node-a");
        let a = LockOwner::new("a");
        client.try_acquire("cat:k", &a, Duration::from_secs(1)).await.unwrap();

        assert!(!client.release("cat:k", &LockOwner::new("b")).await.unwrap());
        assert!(client.release("cat:k", &a).await.unwrap());
        assert!(client.resources("cat:").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_grants_need_as_many_releases() {
        let client = LocalNodeClient::new("node-a");
        let a = LockOwner::new("a");
        let b = LockOwner::new("b");
        assert!(client.try_acquire("cat:k", &a, Duration::from_secs(1)).await.unwrap());
        assert!(client.try_acquire("cat:k", &a, Duration::from_secs(1)).await.unwrap());

        assert!(client.release("cat:k", &a).await.unwrap());
        assert_eq!(client.holder("cat:k").await.unwrap(), Some(a.clone()));
        assert!(!client.try_acquire("cat:k", &b, Duration::from_secs(1)).await.unwrap());

        assert!(client.release("cat:k", &a).await.unwrap());
        assert!(!client.release("cat:k", &a).await.unwrap());
        assert!(client.try_acquire("cat:k", &b, Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_renew_extends_live_lease_only() {
        let client = LocalNodeClient::new("node-a");
        let a = LockOwner::new("a");
        client.try_acquire("cat:k", &a, Duration::from_millis(40)).await.unwrap();
        assert!(!client.renew("cat:k", &LockOwner::new("b"), Duration::from_secs(1)).await.unwrap());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(client.renew("cat:k", &a, Duration::from_secs(1)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(client.holder("cat:k").await.unwrap(), Some(a.clone()));

        // Renewing does not add a grant
        assert!(client.release("cat:k", &a).await.unwrap());
        assert_eq!(client.holder("cat:k").await.unwrap(), None);
        assert!(!client.renew("cat:k", &a, Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_offline_node_fails() {
        let client = LocalNodeClient::new("node-a");
        client.set_online(false);
        assert!(!client.is_online().await);
        let err = client
            .try_acquire("cat:k", &LockOwner::new("a"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Network { .. }));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let client = LocalNodeClient::new("node-a");
        client
            .try_acquire("cat:k", &LockOwner::new("a"), Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(client.purge_expired().await.unwrap(), 1);
    }
}
