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

//! Work items and the concrete items queued by the storage jobs.

use repokeeper_lock::RepoPath;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A unit of work offered to a [`crate::WorkQueue`].
///
/// Two items are the same work iff their unique keys are equal. A queue never holds two
/// items with the same key, pending or running.
pub trait WorkItem: Send + 'static {
    fn unique_key(&self) -> String;
}

impl WorkItem for String {
    fn unique_key(&self) -> String {
        self.clone()
    }
}

/// Progress sink of a background migration job
pub trait MigrationJobDelegate: Send + Sync + fmt::Debug {
    /// Name of the job, used as the `job` field of its log events
    fn job_name(&self) -> &str;

    /// One item finished
    fn increment_done(&self);

    /// One batch of items was queued
    fn increment_batch_count(&self);
}

/// Atomic counters for a migration job
#[derive(Debug)]
pub struct MigrationJobCounters {
    name: String,
    done: AtomicU64,
    batches: AtomicU64,
}

impl MigrationJobCounters {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: AtomicU64::new(0),
            batches: AtomicU64::new(0),
        }
    }

    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }
}

impl MigrationJobDelegate for MigrationJobCounters {
    fn job_name(&self) -> &str {
        &self.name
    }

    fn increment_done(&self) {
        self.done.fetch_add(1, Ordering::Relaxed);
    }

    fn increment_batch_count(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }
}

/// SHA-256 calculation for every path sharing one SHA-1.
///
/// Keyed by the SHA-1 so a digest is never computed twice at the same time.
#[derive(Debug, Clone)]
pub struct ChecksumCalculationWorkItem {
    sha1: String,
    paths: Vec<RepoPath>,
    delegate: Arc<dyn MigrationJobDelegate>,
}

impl ChecksumCalculationWorkItem {
    pub fn new(sha1: impl Into<String>, paths: Vec<RepoPath>, delegate: Arc<dyn MigrationJobDelegate>) -> Self {
        Self {
            sha1: sha1.into(),
            paths,
            delegate,
        }
    }

    pub fn sha1(&self) -> &str {
        &self.sha1
    }

    pub fn paths(&self) -> &[RepoPath] {
        &self.paths
    }

    pub fn delegate(&self) -> &Arc<dyn MigrationJobDelegate> {
        &self.delegate
    }
}

impl WorkItem for ChecksumCalculationWorkItem {
    fn unique_key(&self) -> String {
        self.sha1.clone()
    }
}

/// Path checksum calculation for a single repository path
#[derive(Debug, Clone)]
pub struct RepoPathChecksumCalculationWorkItem {
    repo_path: RepoPath,
    delegate: Arc<dyn MigrationJobDelegate>,
}

impl RepoPathChecksumCalculationWorkItem {
    pub fn new(repo_path: RepoPath, delegate: Arc<dyn MigrationJobDelegate>) -> Self {
        Self { repo_path, delegate }
    }

    pub fn repo_path(&self) -> &RepoPath {
        &self.repo_path
    }

    pub fn delegate(&self) -> &Arc<dyn MigrationJobDelegate> {
        &self.delegate
    }
}

impl WorkItem for RepoPathChecksumCalculationWorkItem {
    fn unique_key(&self) -> String {
        self.repo_path.to_path()
    }
}

/// Kind of change carried by a replication event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationEventType {
    Mkdir,
    Deploy,
    Delete,
    PropertyChange,
    StatsChange,
    Empty,
}

/// One change to replicate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationEvent {
    pub path: RepoPath,
    pub event_type: ReplicationEventType,
}

impl ReplicationEvent {
    pub fn new(path: RepoPath, event_type: ReplicationEventType) -> Self {
        Self { path, event_type }
    }
}

/// Batch of replication events for one repository.
///
/// Keyed by the repository key: while a batch for a repository waits or ships, further
/// batches for it are rejected and picked up by the next dispatch round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationEventQueueWorkItem {
    repo_key: String,
    #[serde(default)]
    events: Vec<ReplicationEvent>,
}

impl ReplicationEventQueueWorkItem {
    pub fn new(repo_key: impl Into<String>, events: Vec<ReplicationEvent>) -> Self {
        Self {
            repo_key: repo_key.into(),
            events,
        }
    }

    pub fn repo_key(&self) -> &str {
        &self.repo_key
    }

    pub fn events(&self) -> &[ReplicationEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl WorkItem for ReplicationEventQueueWorkItem {
    fn unique_key(&self) -> String {
        self.repo_key.clone()
    }
}

/// Message propagated to the other cluster members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaMessageWorkItem {
    topic: String,
    key: Option<String>,
    message: serde_json::Value,
}

impl HaMessageWorkItem {
    /// Message aggregated per topic: while one is queued, later ones on the topic are dropped
    pub fn aggregated(topic: impl Into<String>, message: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            message,
        }
    }

    /// Message deduplicated by `key` within its topic
    pub fn keyed(topic: impl Into<String>, key: impl Into<String>, message: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            key: Some(key.into()),
            message,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn message(&self) -> &serde_json::Value {
        &self.message
    }

    /// Message body as JSON text
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(&self.message)?)
    }
}

impl WorkItem for HaMessageWorkItem {
    fn unique_key(&self) -> String {
        match &self.key {
            Some(key) => format!("{}:{}", self.topic, key),
            None => self.topic.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_checksum_items_key_by_sha1() {
        let job: Arc<dyn MigrationJobDelegate> = Arc::new(MigrationJobCounters::new("sha256-migration"));
        let a = ChecksumCalculationWorkItem::new("da39a3ee", vec![RepoPath::new("libs", "a.jar")], job.clone());
        let b = ChecksumCalculationWorkItem::new("da39a3ee", vec![RepoPath::new("libs", "b.jar")], job);
        assert_eq!(a.unique_key(), b.unique_key());
        assert_eq!(a.paths().len(), 1);
    }

    #[test]
    fn test_repo_path_item_key_is_full_path() {
        let job: Arc<dyn MigrationJobDelegate> = Arc::new(MigrationJobCounters::new("path-checksum"));
        let item = RepoPathChecksumCalculationWorkItem::new(RepoPath::new("libs", "org/acme/app.jar"), job);
        assert_eq!(item.unique_key(), "libs/org/acme/app.jar");
    }

    #[test]
    fn test_replication_item_keys_by_repo() {
        let item = ReplicationEventQueueWorkItem::new(
            "libs-release",
            vec![ReplicationEvent::new(RepoPath::new("libs-release", "a.jar"), ReplicationEventType::Deploy)],
        );
        assert_eq!(item.unique_key(), "libs-release");
        assert!(!item.is_empty());
        assert!(ReplicationEventQueueWorkItem::new("libs-release", Vec::new()).is_empty());

        let text = serde_json::to_string(&item).unwrap();
        assert!(text.contains("\"DEPLOY\""));
    }

    #[test]
    fn test_ha_message_keys() {
        let acl = HaMessageWorkItem::aggregated("aclChangeTopic", json!({"user": "a"}));
        let other_acl = HaMessageWorkItem::aggregated("aclChangeTopic", json!({"user": "b"}));
        assert_eq!(acl.unique_key(), other_acl.unique_key());

        let opkg = HaMessageWorkItem::keyed("opkgTopic", "repo-x", json!({}));
        assert_eq!(opkg.unique_key(), "opkgTopic:repo-x");
        assert_eq!(acl.to_json().unwrap(), r#"{"user":"a"}"#);
    }

    #[test]
    fn test_counters() {
        let counters = MigrationJobCounters::new("job");
        counters.increment_done();
        counters.increment_done();
        counters.increment_batch_count();
        assert_eq!((counters.done(), counters.batches()), (2, 1));
        assert_eq!(counters.job_name(), "job");
    }
}
