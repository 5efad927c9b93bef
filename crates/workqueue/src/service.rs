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

use crate::config::WorkQueueConfig;
use crate::error::{Result, WorkQueueError};
use crate::item::WorkItem;
use crate::kind::QueueKind;
use crate::monitor::{QueueMonitor, WorkQueueStats};
use crate::queue::{WorkCallback, WorkQueue};
use dashmap::DashMap;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Type-erased queue held by the service registry
pub trait ManagedQueue: QueueMonitor {
    fn stop_queue(&self) -> usize;

    /// Name of the item type the queue was created for
    fn item_type(&self) -> &'static str;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn into_monitor(self: Arc<Self>) -> Arc<dyn QueueMonitor>;
}

impl<T: WorkItem> ManagedQueue for WorkQueue<T> {
    fn stop_queue(&self) -> usize {
        WorkQueue::stop_queue(self)
    }

    fn item_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn into_monitor(self: Arc<Self>) -> Arc<dyn QueueMonitor> {
        self
    }
}

/// Registry of the process work queues.
///
/// One queue per [`QueueKind`]: every callback name of a kind resolves to the same queue,
/// created on first request with the worker count from [`WorkQueueConfig`].
#[derive(Debug, Default)]
pub struct AsyncWorkQueueService {
    config: WorkQueueConfig,
    queues: DashMap<&'static str, Arc<dyn ManagedQueue>>,
    closed: AtomicBool,
}

impl AsyncWorkQueueService {
    pub fn new(config: WorkQueueConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            queues: DashMap::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Service configured from `REPOKEEPER_WORKQUEUE_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(WorkQueueConfig::from_env())
    }

    pub fn config(&self) -> &WorkQueueConfig {
        &self.config
    }

    /// Queue serving `callback_name`, created with `callback` on first request.
    ///
    /// Later requests for the kind get the existing queue and drop their callback. Fails when
    /// no kind serves the name, when the queue holds another item type, or after
    /// [`close_all_queues`](Self::close_all_queues).
    pub fn get_work_queue<T, C>(&self, callback_name: &str, callback: C) -> Result<Arc<WorkQueue<T>>>
    where
        T: WorkItem,
        C: WorkCallback<T>,
    {
        let kind = QueueKind::for_callback(callback_name).ok_or_else(|| WorkQueueError::unsupported(callback_name))?;
        if self.closed.load(Ordering::SeqCst) {
            return Err(WorkQueueError::stopped(kind.display_name));
        }

        let queue = self
            .queues
            .entry(kind.display_name)
            .or_insert_with(|| {
                let workers = self.config.workers_for(kind);
                info!(
                    "Creating work queue '{}' with {} workers for callback {}",
                    kind.display_name, workers, callback_name
                );
                let queue = WorkQueue::<T>::with_workers(kind.display_name, workers, callback)
                    .with_job_timeout(self.config.job_timeout);
                Arc::new(queue) as Arc<dyn ManagedQueue>
            })
            .clone();

        let expected = queue.item_type();
        queue
            .into_any()
            .downcast::<WorkQueue<T>>()
            .map_err(|_| WorkQueueError::QueueTypeMismatch {
                name: kind.display_name.to_string(),
                expected,
                requested: std::any::type_name::<T>(),
            })
    }

    /// Live queues by queue name
    pub fn get_existing_work_queues(&self) -> BTreeMap<String, Arc<dyn QueueMonitor>> {
        self.queues
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().clone().into_monitor()))
            .collect()
    }

    /// Snapshots of every live queue, sorted by name
    pub fn get_queue_stats(&self) -> Vec<WorkQueueStats> {
        self.get_existing_work_queues().values().map(|queue| queue.stats()).collect()
    }

    /// [`get_queue_stats`](Self::get_queue_stats) as JSON
    pub fn stats_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.get_queue_stats())?)
    }

    /// Pending plus running items of the queue named by a callback or queue name, `None` if
    /// no such queue exists yet
    pub fn get_estimated_pending_tasks_size(&self, name: &str) -> Option<usize> {
        let kind = QueueKind::for_callback(name).or_else(|| QueueKind::by_display_name(name))?;
        self.queues.get(kind.display_name).map(|queue| queue.queue_size())
    }

    /// Stop every queue and refuse to create new ones. Returns the number of discarded items.
    pub fn close_all_queues(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let queues: Vec<Arc<dyn ManagedQueue>> = self.queues.iter().map(|entry| entry.value().clone()).collect();
        let mut discarded = 0;
        for queue in queues {
            let count = queue.stop_queue();
            debug!("Closed work queue '{}', {} items discarded", queue.name(), count);
            discarded += count;
        }
        info!("Closed all work queues, {} pending items discarded", discarded);
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ReplicationEventQueueWorkItem;

    async fn noop(_item: String) -> Result<()> {
        Ok(())
    }

    #[test]
    fn test_unsupported_callback() {
        let service = AsyncWorkQueueService::default();
        let err = service.get_work_queue::<String, _>("frobnicate", noop).unwrap_err();
        assert!(matches!(err, WorkQueueError::UnsupportedQueue { .. }));
        assert!(service.get_existing_work_queues().is_empty());
    }

    #[test]
    fn test_aliases_share_a_queue() {
        let service = AsyncWorkQueueService::default();
        let a = service.get_work_queue::<String, _>("calculate_helm_metadata_async", noop).unwrap();
        let b = service.get_work_queue::<String, _>("calculate_helm_metadata_sync", noop).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "Helm Metadata");
        assert_eq!(a.max_workers(), 2);
        assert_eq!(service.get_existing_work_queues().keys().collect::<Vec<_>>(), vec!["Helm Metadata"]);
    }

    #[test]
    fn test_item_type_mismatch() {
        let service = AsyncWorkQueueService::default();
        service.get_work_queue::<String, _>("notify_async", noop).unwrap();
        let err = service
            .get_work_queue::<ReplicationEventQueueWorkItem, _>("notify_async", |_item: ReplicationEventQueueWorkItem| async {
                Ok::<_, WorkQueueError>(())
            })
            .unwrap_err();
        assert!(matches!(err, WorkQueueError::QueueTypeMismatch { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_configured_workers_and_timeout() {
        let mut config = WorkQueueConfig {
            job_timeout: Some(std::time::Duration::from_secs(5)),
            ..WorkQueueConfig::default()
        };
        config.workers.insert("SHA256_MIGRATION".to_string(), 0);
        let service = AsyncWorkQueueService::new(config).unwrap();
        let queue = service.get_work_queue::<String, _>("update_sha2", noop).unwrap();
        assert_eq!(queue.max_workers(), 0);
        assert_eq!(queue.job_timeout(), Some(std::time::Duration::from_secs(5)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = WorkQueueConfig::default();
        config.workers.insert("BOGUS".to_string(), 1);
        assert!(AsyncWorkQueueService::new(config).is_err());
    }

    #[tokio::test]
    async fn test_pending_size_by_callback_or_queue_name() {
        let service = AsyncWorkQueueService::default();
        assert_eq!(service.get_estimated_pending_tasks_size("update_sha2"), None);
        assert_eq!(service.get_estimated_pending_tasks_size("nonexistent"), None);

        let mut config = WorkQueueConfig::default();
        config.workers.insert("SHA256_MIGRATION".to_string(), 0);
        let service = AsyncWorkQueueService::new(config).unwrap();
        let queue = service.get_work_queue::<String, _>("update_sha2", noop).unwrap();
        queue.offer_work("a".to_string()).await;
        queue.offer_work("b".to_string()).await;

        assert_eq!(service.get_estimated_pending_tasks_size("update_sha2"), Some(2));
        assert_eq!(service.get_estimated_pending_tasks_size("SHA256 Migration"), Some(2));

        let stats = service.get_queue_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].queue_size, 2);
        assert!(service.stats_json().unwrap().contains("\"maxNumberOfWorkers\":0"));
    }

    #[tokio::test]
    async fn test_close_all_queues() {
        let mut config = WorkQueueConfig::default();
        config.workers.insert("RPM_METADATA".to_string(), 0);
        let service = AsyncWorkQueueService::new(config).unwrap();
        let rpm = service.get_work_queue::<String, _>("calculate_rpm_metadata_async", noop).unwrap();
        let ha = service.get_work_queue::<String, _>("notify_async", noop).unwrap();
        rpm.offer_work("libs-rpm".to_string()).await;

        assert_eq!(service.close_all_queues(), 1);
        assert!(rpm.is_stopped() && ha.is_stopped());
        assert!(!rpm.offer_work("libs-rpm".to_string()).await);
        assert!(matches!(
            service.get_work_queue::<String, _>("notify_async", noop),
            Err(WorkQueueError::QueueStopped { .. })
        ));
    }
}
