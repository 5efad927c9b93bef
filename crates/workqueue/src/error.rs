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

use repokeeper_lock::LockError;
use thiserror::Error;

/// Work queue related error types
#[derive(Error, Debug)]
pub enum WorkQueueError {
    /// No queue kind is registered for the callback
    #[error("Unsupported work queue: callback '{callback}' is not supported by this service")]
    UnsupportedQueue { callback: String },

    /// The queue exists with a different item type
    #[error("Work queue '{name}' was created for items of type {expected}, not {requested}")]
    QueueTypeMismatch {
        name: String,
        expected: &'static str,
        requested: &'static str,
    },

    /// The queue was stopped and accepts no more work
    #[error("Work queue '{name}' is stopped")]
    QueueStopped { name: String },

    /// A job failed
    #[error("Job failed: {message}")]
    Job { message: String },

    /// A job ran past the queue's job timeout
    #[error("Job '{key}' timed out after {seconds}s")]
    Timeout { key: String, seconds: u64 },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Snapshot or payload serialization failed
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// A lock needed by a job could not be taken
    #[error(transparent)]
    Lock(#[from] LockError),
}

impl Clone for WorkQueueError {
    fn clone(&self) -> Self {
        match self {
            WorkQueueError::UnsupportedQueue { callback } => WorkQueueError::UnsupportedQueue {
                callback: callback.clone(),
            },
            WorkQueueError::QueueTypeMismatch {
                name,
                expected,
                requested,
            } => WorkQueueError::QueueTypeMismatch {
                name: name.clone(),
                expected: *expected,
                requested: *requested,
            },
            WorkQueueError::QueueStopped { name } => WorkQueueError::QueueStopped { name: name.clone() },
            WorkQueueError::Job { message } => WorkQueueError::Job {
                message: message.clone(),
            },
            WorkQueueError::Timeout { key, seconds } => WorkQueueError::Timeout {
                key: key.clone(),
                seconds: *seconds,
            },
            WorkQueueError::Configuration { message } => WorkQueueError::Configuration {
                message: message.clone(),
            },
            WorkQueueError::Serialization { message } => WorkQueueError::Serialization {
                message: message.clone(),
            },
            WorkQueueError::Lock(e) => WorkQueueError::Lock(e.clone()),
        }
    }
}

impl WorkQueueError {
    pub fn unsupported(callback: impl Into<String>) -> Self {
        Self::UnsupportedQueue {
            callback: callback.into(),
        }
    }

    pub fn stopped(name: impl Into<String>) -> Self {
        Self::QueueStopped { name: name.into() }
    }

    pub fn job(message: impl Into<String>) -> Self {
        Self::Job { message: message.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether offering the same work again later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkQueueError::Job { .. } | WorkQueueError::Timeout { .. } => true,
            WorkQueueError::Lock(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Whether the error reflects a wiring or configuration mistake
    pub fn is_fatal(&self) -> bool {
        match self {
            WorkQueueError::UnsupportedQueue { .. }
            | WorkQueueError::QueueTypeMismatch { .. }
            | WorkQueueError::Configuration { .. } => true,
            WorkQueueError::Lock(e) => e.is_fatal(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for WorkQueueError {
    fn from(e: serde_json::Error) -> Self {
        WorkQueueError::Serialization { message: e.to_string() }
    }
}

/// Result type alias for work queue operations
pub type Result<T> = std::result::Result<T, WorkQueueError>;
