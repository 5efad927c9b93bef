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

use crate::error::{Result, WorkQueueError};
use crate::kind::{QUEUE_KINDS, QueueKind};
use repokeeper_config::{DEFAULT_WORKQUEUE_JOB_TIMEOUT_SECS, ENV_WORKQUEUE_JOB_TIMEOUT_SECS, ENV_WORKQUEUE_WORKERS_PREFIX, envs};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// Work queue service configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkQueueConfig {
    /// Worker counts by queue kind id, overriding the kind defaults
    #[serde(default)]
    pub workers: BTreeMap<String, usize>,

    /// Per-item job timeout, none to let jobs run unbounded
    #[serde(default)]
    pub job_timeout: Option<Duration>,
}

impl WorkQueueConfig {
    /// Build the configuration from `REPOKEEPER_WORKQUEUE_*` environment variables.
    ///
    /// Unparsable worker counts are logged and ignored.
    pub fn from_env() -> Self {
        let mut workers = BTreeMap::new();
        for kind in QUEUE_KINDS {
            let var = format!("{ENV_WORKQUEUE_WORKERS_PREFIX}{}", kind.id);
            if let Some(value) = envs::get_env_opt_str(&var) {
                match value.trim().parse::<usize>() {
                    Ok(count) => {
                        workers.insert(kind.id.to_string(), count);
                    }
                    Err(_) => warn!("Ignoring {}={}: expected a worker count", var, value),
                }
            }
        }
        let timeout_secs = envs::get_env_u64(ENV_WORKQUEUE_JOB_TIMEOUT_SECS, DEFAULT_WORKQUEUE_JOB_TIMEOUT_SECS);
        Self {
            workers,
            job_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(id) = self.workers.keys().find(|id| QueueKind::by_id(id).is_none()) {
            return Err(WorkQueueError::configuration(format!("Unknown work queue kind '{id}'")));
        }
        if self.job_timeout.is_some_and(|t| t.is_zero()) {
            return Err(WorkQueueError::configuration("Job timeout must be greater than zero"));
        }
        Ok(())
    }

    /// Worker count for `kind`
    pub fn workers_for(&self, kind: &QueueKind) -> usize {
        self.workers
            .iter()
            .find(|(id, _)| id.eq_ignore_ascii_case(kind.id))
            .map(|(_, count)| *count)
            .unwrap_or(kind.default_workers)
    }
}
