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

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Read-only view of a live work queue
pub trait QueueMonitor: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Approximate number of pending and running items
    fn queue_size(&self) -> usize;

    /// Tasks draining the queue right now
    fn number_of_workers(&self) -> usize;

    fn max_number_of_workers(&self) -> usize;

    fn stats(&self) -> WorkQueueStats {
        WorkQueueStats {
            name: self.name().to_string(),
            queue_size: self.queue_size(),
            number_of_workers: self.number_of_workers(),
            max_number_of_workers: self.max_number_of_workers(),
        }
    }
}

/// Point-in-time snapshot of a work queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkQueueStats {
    pub name: String,
    pub queue_size: usize,
    pub number_of_workers: usize,
    pub max_number_of_workers: usize,
}
