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

// ============================================================================
// Core Module Declarations
// ============================================================================

pub mod item;
pub mod kind;
pub mod monitor;
pub mod queue;
pub mod service;

pub mod config;
pub mod error;

// ============================================================================
// Public API Exports
// ============================================================================

pub use crate::{
    config::WorkQueueConfig,
    error::{Result, WorkQueueError},
    item::{
        ChecksumCalculationWorkItem, HaMessageWorkItem, MigrationJobCounters, MigrationJobDelegate, ReplicationEvent,
        ReplicationEventQueueWorkItem, ReplicationEventType, RepoPathChecksumCalculationWorkItem, WorkItem,
    },
    kind::{QUEUE_KINDS, QueueKind},
    monitor::{QueueMonitor, WorkQueueStats},
    queue::{WorkCallback, WorkQueue},
    service::{AsyncWorkQueueService, ManagedQueue},
};

/// Current version of the work queue crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
