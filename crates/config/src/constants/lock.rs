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

/// Environment variable name that selects the locking provider type on HA nodes.
/// - Purpose: Choose between in-process, cluster, optimistic and database-row locking.
/// - Valid values: "jvm", "distributed", "optimistic", "db" (case insensitive, surrounding whitespace ignored).
/// - Semantics: Only consulted when `REPOKEEPER_HA_ENABLED` is true. Any other value is a fatal
///   configuration error at first resolution.
/// - Example: `export REPOKEEPER_LOCKING_PROVIDER_TYPE=db`
/// - Note: The value is resolved once per process; changing it requires a restart.
pub const ENV_LOCKING_PROVIDER_TYPE: &str = "REPOKEEPER_LOCKING_PROVIDER_TYPE";

/// Default locking provider type on HA nodes when the variable is not set.
pub const DEFAULT_LOCKING_PROVIDER_TYPE: &str = "db";

/// Environment variable name that specifies the maximum lease time of a lock, in seconds.
/// - Purpose: Bound how long a lock may be held before it is considered abandoned.
/// - Unit: seconds (u64).
/// - Semantics: Database rows and cluster leases older than this are removed by the expired
///   locks reaper; idle in-process entries are evicted after the same period.
/// - Example: `export REPOKEEPER_LOCK_LEASE_SECS=900`
pub const ENV_LOCK_LEASE_SECS: &str = "REPOKEEPER_LOCK_LEASE_SECS";

/// Default lock lease time: 15 minutes.
pub const DEFAULT_LOCK_LEASE_SECS: u64 = 900;

/// Environment variable name that specifies the default acquisition timeout, in milliseconds.
/// - Purpose: Bound how long path locks wait before reporting a timeout.
/// - Unit: milliseconds (u64).
/// - Example: `export REPOKEEPER_LOCK_ACQUIRE_TIMEOUT_MS=120000`
pub const ENV_LOCK_ACQUIRE_TIMEOUT_MS: &str = "REPOKEEPER_LOCK_ACQUIRE_TIMEOUT_MS";

/// Default acquisition timeout: 2 minutes.
pub const DEFAULT_LOCK_ACQUIRE_TIMEOUT_MS: u64 = 120_000;

/// Environment variable name that specifies how often expired database locks are reaped, in seconds.
/// - Purpose: Interval of the background cleanup task used by the `db` and `optimistic` providers.
/// - Unit: seconds (u64).
/// - Example: `export REPOKEEPER_LOCK_CLEANUP_INTERVAL_SECS=60`
pub const ENV_LOCK_CLEANUP_INTERVAL_SECS: &str = "REPOKEEPER_LOCK_CLEANUP_INTERVAL_SECS";

/// Default reaper interval: 1 minute.
pub const DEFAULT_LOCK_CLEANUP_INTERVAL_SECS: u64 = 60;

/// Environment variable name that specifies the quorum required by the distributed provider.
/// - Purpose: Number of node clients that must grant a lock before it counts as held.
/// - Unit: count (usize). `0` means a simple majority of the configured clients.
/// - Example: `export REPOKEEPER_LOCK_QUORUM=2`
pub const ENV_LOCK_QUORUM: &str = "REPOKEEPER_LOCK_QUORUM";

/// Default quorum: majority.
pub const DEFAULT_LOCK_QUORUM: usize = 0;
