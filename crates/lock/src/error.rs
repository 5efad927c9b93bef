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

use std::time::Duration;
use thiserror::Error;

/// Lock operation related error types
#[derive(Error, Debug)]
pub enum LockError {
    /// Lock acquisition timeout
    #[error("Lock acquisition timeout for resource '{resource}' after {timeout:?}")]
    Timeout { resource: String, timeout: Duration },

    /// Network error talking to a cluster node
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Lock store failure (database row lease or versioned record)
    #[error("Lock store error: {message}")]
    Store { message: String },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Quorum not reached
    #[error("Quorum not reached: required {required}, achieved {achieved}")]
    QuorumNotReached { required: usize, achieved: usize },

    /// Not the lock owner
    #[error("Resource '{resource}' is not held by {owner}")]
    NotOwner { resource: String, owner: String },

    /// The same owner asked twice for a lock that cannot be re-entered
    #[error("Reentrant lock is not supported: resource '{resource}' is already held by {owner}")]
    ReentrantNotSupported { resource: String, owner: String },

    /// Category name reserved for single-key guards
    #[error("Guard category '{name}' is reserved")]
    ReservedCategory { name: String },
}

impl Clone for LockError {
    fn clone(&self) -> Self {
        match self {
            LockError::Timeout { resource, timeout } => LockError::Timeout {
                resource: resource.clone(),
                timeout: *timeout,
            },
            LockError::Network { message, source: _ } => LockError::Network {
                message: message.clone(),
                source: Box::new(std::io::Error::other(message.clone())),
            },
            LockError::Store { message } => LockError::Store {
                message: message.clone(),
            },
            LockError::Internal { message } => LockError::Internal {
                message: message.clone(),
            },
            LockError::Configuration { message } => LockError::Configuration {
                message: message.clone(),
            },
            LockError::QuorumNotReached { required, achieved } => LockError::QuorumNotReached {
                required: *required,
                achieved: *achieved,
            },
            LockError::NotOwner { resource, owner } => LockError::NotOwner {
                resource: resource.clone(),
                owner: owner.clone(),
            },
            LockError::ReentrantNotSupported { resource, owner } => LockError::ReentrantNotSupported {
                resource: resource.clone(),
                owner: owner.clone(),
            },
            LockError::ReservedCategory { name } => LockError::ReservedCategory { name: name.clone() },
        }
    }
}

impl LockError {
    /// Create timeout error
    pub fn timeout(resource: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            resource: resource.into(),
            timeout,
        }
    }

    /// Create network error
    pub fn network(message: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Network {
            message: message.into(),
            source: Box::new(source),
        }
    }

    /// Create lock store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store { message: message.into() }
    }

    /// Create internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Create configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create not owner error
    pub fn not_owner(resource: impl Into<String>, owner: impl Into<String>) -> Self {
        Self::NotOwner {
            resource: resource.into(),
            owner: owner.into(),
        }
    }

    /// Create reentrant acquisition error
    pub fn reentrant(resource: impl Into<String>, owner: impl Into<String>) -> Self {
        Self::ReentrantNotSupported {
            resource: resource.into(),
            owner: owner.into(),
        }
    }

    /// Check if the failure is a plain acquisition timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if it is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Network { .. } | Self::Store { .. } | Self::QuorumNotReached { .. }
        )
    }

    /// Check if it is a fatal error
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::ReservedCategory { .. })
    }
}

/// Lock operation Result type
pub type Result<T> = std::result::Result<T, LockError>;

/// Convert from std::io::Error
impl From<std::io::Error> for LockError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::TimedOut => Self::network("I/O failure talking to lock node", err),
            _ => Self::Internal {
                message: err.to_string(),
            },
        }
    }
}
