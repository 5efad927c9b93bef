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

//! Selection of the locking strategy used by the whole process.

use crate::error::{LockError, Result};
use repokeeper_config::{DEFAULT_HA_ENABLED, DEFAULT_LOCKING_PROVIDER_TYPE, ENV_HA_ENABLED, ENV_LOCKING_PROVIDER_TYPE, envs};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Locking strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMethod {
    /// In-process locks, never visible to other nodes
    Jvm,
    /// Quorum locks over the cluster's lock nodes
    Distributed,
    /// Compare-and-set on versioned records
    Optimistic,
    /// Lease rows in a shared database table
    Db,
}

impl LockMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockMethod::Jvm => "jvm",
            LockMethod::Distributed => "distributed",
            LockMethod::Optimistic => "optimistic",
            LockMethod::Db => "db",
        }
    }

    /// Strategies whose abandoned locks outlive the process and need the reaper.
    pub fn needs_reaper(&self) -> bool {
        matches!(self, LockMethod::Db | LockMethod::Optimistic)
    }

    /// Decide the strategy from the HA flag and the configured provider type.
    ///
    /// A failure to read the HA flag, or a node that is not HA, always yields [`LockMethod::Jvm`]
    /// without looking at `provider_type`. On HA nodes an unrecognized provider type is a
    /// configuration error.
    pub fn resolve<E: fmt::Display>(ha_enabled: std::result::Result<bool, E>, provider_type: &str) -> Result<Self> {
        match ha_enabled {
            Err(e) => {
                debug!("Failed to read HA configuration, using in-process locking: {}", e);
                Ok(LockMethod::Jvm)
            }
            Ok(false) => Ok(LockMethod::Jvm),
            Ok(true) => provider_type.parse(),
        }
    }

    /// Resolve from `REPOKEEPER_HA_ENABLED` and `REPOKEEPER_LOCKING_PROVIDER_TYPE`.
    pub fn from_env() -> Result<Self> {
        let ha_enabled = envs::try_get_env_bool(ENV_HA_ENABLED).map(|v| v.unwrap_or(DEFAULT_HA_ENABLED));
        let provider_type = envs::get_env_str(ENV_LOCKING_PROVIDER_TYPE, DEFAULT_LOCKING_PROVIDER_TYPE);
        Self::resolve(ha_enabled, &provider_type)
    }
}

impl fmt::Display for LockMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockMethod {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jvm" => Ok(LockMethod::Jvm),
            "distributed" => Ok(LockMethod::Distributed),
            "optimistic" => Ok(LockMethod::Optimistic),
            "db" => Ok(LockMethod::Db),
            other => Err(LockError::configuration(format!(
                "unsupported locking provider type '{other}', expected one of jvm, distributed, optimistic, db"
            ))),
        }
    }
}

static LOCK_METHOD: OnceLock<Result<LockMethod>> = OnceLock::new();

/// Process-wide locking strategy, resolved from the environment on first call.
///
/// The outcome (including a configuration error) is cached; later environment changes have
/// no effect.
pub fn lock_method() -> Result<LockMethod> {
    LOCK_METHOD
        .get_or_init(|| {
            let resolved = LockMethod::from_env();
            if let Ok(method) = &resolved {
                info!("Locking provider resolved to '{}'", method);
            }
            resolved
        })
        .clone()
}

pub fn is_db_locking() -> Result<bool> {
    Ok(lock_method()? == LockMethod::Db)
}

pub fn is_distributed_locking() -> Result<bool> {
    Ok(lock_method()? == LockMethod::Distributed)
}

pub fn is_optimistic_locking() -> Result<bool> {
    Ok(lock_method()? == LockMethod::Optimistic)
}
