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

use crate::error::{LockError, Result};
use repokeeper_config::{
    DEFAULT_LOCK_ACQUIRE_TIMEOUT_MS, DEFAULT_LOCK_CLEANUP_INTERVAL_SECS, DEFAULT_LOCK_LEASE_SECS, DEFAULT_LOCK_QUORUM,
    DEFAULT_NODE_ID, ENV_LOCK_ACQUIRE_TIMEOUT_MS, ENV_LOCK_CLEANUP_INTERVAL_SECS, ENV_LOCK_LEASE_SECS, ENV_LOCK_QUORUM,
    ENV_NODE_ID, envs,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Locking provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockingConfig {
    /// Identifier of this node, used as the owner column of database rows
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Maximum lease of a held lock before the reaper may remove it
    #[serde(default = "default_lease_time")]
    pub lease_time: Duration,

    /// Default wait used by path vaults when the caller gives none
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout: Duration,

    /// Interval of the expired locks reaper
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: Duration,

    /// Distributed lock configuration
    #[serde(default)]
    pub distributed: DistributedConfig,
}

/// Distributed lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedConfig {
    /// Grants required to hold a lock, `0` for a simple majority
    #[serde(default)]
    pub quorum: usize,

    /// Pause between quorum attempts
    #[serde(default = "default_retry_interval")]
    pub retry_interval: Duration,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            lease_time: default_lease_time(),
            acquire_timeout: default_acquire_timeout(),
            cleanup_interval: default_cleanup_interval(),
            distributed: DistributedConfig::default(),
        }
    }
}

impl Default for DistributedConfig {
    fn default() -> Self {
        Self {
            quorum: DEFAULT_LOCK_QUORUM,
            retry_interval: default_retry_interval(),
        }
    }
}

fn default_node_id() -> String {
    DEFAULT_NODE_ID.to_string()
}

fn default_lease_time() -> Duration {
    Duration::from_secs(DEFAULT_LOCK_LEASE_SECS)
}

fn default_acquire_timeout() -> Duration {
    Duration::from_millis(DEFAULT_LOCK_ACQUIRE_TIMEOUT_MS)
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(DEFAULT_LOCK_CLEANUP_INTERVAL_SECS)
}

fn default_retry_interval() -> Duration {
    Duration::from_millis(50)
}

impl LockingConfig {
    /// Build the configuration from `REPOKEEPER_*` environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            node_id: envs::get_env_str(ENV_NODE_ID, DEFAULT_NODE_ID),
            lease_time: Duration::from_secs(envs::get_env_u64(ENV_LOCK_LEASE_SECS, DEFAULT_LOCK_LEASE_SECS)),
            acquire_timeout: Duration::from_millis(envs::get_env_u64(ENV_LOCK_ACQUIRE_TIMEOUT_MS, DEFAULT_LOCK_ACQUIRE_TIMEOUT_MS)),
            cleanup_interval: Duration::from_secs(envs::get_env_u64(
                ENV_LOCK_CLEANUP_INTERVAL_SECS,
                DEFAULT_LOCK_CLEANUP_INTERVAL_SECS,
            )),
            distributed: DistributedConfig {
                quorum: envs::get_env_usize(ENV_LOCK_QUORUM, DEFAULT_LOCK_QUORUM),
                ..DistributedConfig::default()
            },
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(LockError::configuration("Node id must not be empty"));
        }

        if self.lease_time.is_zero() {
            return Err(LockError::configuration("Lease time must be greater than zero"));
        }

        if self.cleanup_interval.is_zero() {
            return Err(LockError::configuration("Cleanup interval must be greater than zero"));
        }

        if self.distributed.retry_interval.is_zero() {
            return Err(LockError::configuration("Retry interval must be greater than zero"));
        }

        Ok(())
    }

    /// Calculate quorum size for `total_nodes` cluster clients.
    ///
    /// An explicit quorum must be a strict majority of the nodes, otherwise two disjoint node
    /// sets could grant the same lock to different owners.
    pub fn calculate_quorum(&self, total_nodes: usize) -> Result<usize> {
        let majority = total_nodes / 2 + 1;
        match self.distributed.quorum {
            0 => Ok(majority),
            quorum if quorum < majority || quorum > total_nodes => Err(LockError::configuration(format!(
                "Quorum {quorum} is not a majority of {total_nodes} nodes, expected {majority}..={total_nodes}"
            ))),
            quorum => Ok(quorum),
        }
    }
}
