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

/// Prefix shared by every environment variable read by repokeeper.
pub const ENV_PREFIX: &str = "REPOKEEPER_";

/// Environment variable name that declares whether this node is part of a high-availability cluster.
/// - Purpose: Decide whether cluster-wide locking strategies are even considered.
/// - Valid values: "true"/"false", "1"/"0", "yes"/"no" (case insensitive).
/// - Semantics: When unset or "false" the node always uses in-process locking. An unparsable value is
///   treated as a configuration read failure, which also falls back to in-process locking.
/// - Example: `export REPOKEEPER_HA_ENABLED=true`
pub const ENV_HA_ENABLED: &str = "REPOKEEPER_HA_ENABLED";

/// Default HA flag when `REPOKEEPER_HA_ENABLED` is not set.
pub const DEFAULT_HA_ENABLED: bool = false;

/// Environment variable name that identifies this node inside the cluster.
/// - Purpose: Owner column for database lock rows and holder name for cluster locks.
/// - Valid values: any non-empty string unique within the cluster.
/// - Example: `export REPOKEEPER_NODE_ID=node-a`
pub const ENV_NODE_ID: &str = "REPOKEEPER_NODE_ID";

/// Default node identifier when `REPOKEEPER_NODE_ID` is not set.
pub const DEFAULT_NODE_ID: &str = "local";
