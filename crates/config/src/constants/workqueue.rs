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

/// Prefix of the per-queue worker count variables.
/// - Purpose: Cap the number of tasks allowed to drain one named work queue at the same time.
/// - Format: prefix followed by the queue kind in upper snake case,
///   e.g. `REPOKEEPER_WORKQUEUE_WORKERS_SHA256_MIGRATION`.
/// - Unit: count (usize). `0` disables execution for that queue (offers are still accepted).
/// - Example: `export REPOKEEPER_WORKQUEUE_WORKERS_RPM_METADATA=2`
pub const ENV_WORKQUEUE_WORKERS_PREFIX: &str = "REPOKEEPER_WORKQUEUE_WORKERS_";

/// Workers of a queue built without an explicit count. Registered queue kinds carry their own defaults.
pub const DEFAULT_WORKQUEUE_WORKERS: usize = 1;

/// Environment variable name that specifies the per-item job timeout, in seconds.
/// - Purpose: Keep a single runaway job (for example a checksum over a huge artifact) from
///   stalling a queue's worker indefinitely.
/// - Unit: seconds (u64). `0` disables the timeout.
/// - Example: `export REPOKEEPER_WORKQUEUE_JOB_TIMEOUT_SECS=3600`
pub const ENV_WORKQUEUE_JOB_TIMEOUT_SECS: &str = "REPOKEEPER_WORKQUEUE_JOB_TIMEOUT_SECS";

/// Default per-item job timeout: disabled.
pub const DEFAULT_WORKQUEUE_JOB_TIMEOUT_SECS: u64 = 0;
