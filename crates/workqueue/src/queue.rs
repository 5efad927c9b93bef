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

//! Deduplicating FIFO queue whose workers are the tasks that offer work.

use crate::error::{Result, WorkQueueError};
use crate::item::WorkItem;
use crate::monitor::QueueMonitor;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use repokeeper_config::DEFAULT_WORKQUEUE_WORKERS;
use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, trace, warn};

/// Job body run for every item a queue executes
#[async_trait]
pub trait WorkCallback<T>: Send + Sync + 'static {
    async fn execute(&self, item: T) -> Result<()>;
}

#[async_trait]
impl<T, F, Fut> WorkCallback<T> for F
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn execute(&self, item: T) -> Result<()> {
        (self)(item).await
    }
}

struct QueueState<T> {
    pending: VecDeque<(String, T)>,
    pending_keys: HashSet<String>,
    in_flight: HashSet<String>,
    active_workers: usize,
    stopped: bool,
}

impl<T> QueueState<T> {
    fn contains(&self, key: &str) -> bool {
        self.pending_keys.contains(key) || self.in_flight.contains(key)
    }
}

/// FIFO work queue keyed by [`WorkItem::unique_key`].
///
/// An item is accepted only while no item with the same key waits or runs. The task whose
/// offer is accepted drains the queue itself when a worker permit is free, so a queue owns
/// no background tasks. At most `max_workers` tasks drain at once; a queue with zero workers
/// accepts work but never runs it. A draining task that is cancelled hands the rest of the
/// queue to a new task on the current runtime.
pub struct WorkQueue<T> {
    inner: Arc<QueueInner<T>>,
}

struct QueueInner<T> {
    name: String,
    max_workers: usize,
    job_timeout: Option<Duration>,
    callback: Arc<dyn WorkCallback<T>>,
    state: Mutex<QueueState<T>>,
    queue_size: AtomicUsize,
    done: Notify,
}

impl<T: WorkItem> WorkQueue<T> {
    /// Queue with the default worker count
    pub fn new(name: impl Into<String>, callback: impl WorkCallback<T>) -> Self {
        Self::with_workers(name, DEFAULT_WORKQUEUE_WORKERS, callback)
    }

    pub fn with_workers(name: impl Into<String>, max_workers: usize, callback: impl WorkCallback<T>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                max_workers,
                job_timeout: None,
                callback: Arc::new(callback),
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    pending_keys: HashSet::new(),
                    in_flight: HashSet::new(),
                    active_workers: 0,
                    stopped: false,
                }),
                queue_size: AtomicUsize::new(0),
                done: Notify::new(),
            }),
        }
    }

    /// Cancel jobs running longer than `timeout`. Takes effect only before any worker ran.
    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.job_timeout = timeout.filter(|t| !t.is_zero()),
            None => warn!(queue = %self.inner.name, "Job timeout not applied, a worker already holds the queue"),
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn max_workers(&self) -> usize {
        self.inner.max_workers
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.inner.job_timeout
    }

    /// Offer `item` and, when a worker permit is free, drain the queue in the calling task.
    ///
    /// Returns `false` when an item with the same key is pending or running, or when the
    /// queue is stopped. A rejected duplicate does not replace the queued payload.
    pub async fn offer_work(&self, item: T) -> bool {
        let inner = &self.inner;
        let key = item.unique_key();
        {
            let mut state = inner.state.lock();
            if state.stopped {
                debug!(queue = %inner.name, key = %key, "Rejected work offered to a stopped queue");
                return false;
            }
            if state.contains(&key) {
                trace!(queue = %inner.name, key = %key, "Work already queued");
                return false;
            }
            state.pending_keys.insert(key.clone());
            state.pending.push_back((key, item));
            inner.queue_size.fetch_add(1, Ordering::SeqCst);
        }
        inner.drain().await;
        true
    }

    /// Drain pending work in the calling task if a worker permit is free.
    ///
    /// Returns once the queue is observed empty; the permit is given back in the same
    /// critical section, so an offer racing with the exit finds either a live worker or a
    /// free permit.
    pub async fn do_jobs(&self) {
        self.inner.drain().await
    }

    /// Whether an item with `key` is pending or running
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.state.lock().contains(key)
    }

    /// Wait until no item with the key of `item` is pending or running
    pub async fn wait_for_item_done(&self, item: &T) {
        self.wait_for_key(&item.unique_key()).await
    }

    /// Wait until no item with `key` is pending or running. Returns at once for an unknown key.
    pub async fn wait_for_key(&self, key: &str) {
        loop {
            let mut notified = std::pin::pin!(self.inner.done.notified());
            notified.as_mut().enable();
            if !self.contains_key(key) {
                return;
            }
            notified.await;
        }
    }

    /// Worker permits not taken
    pub fn available_permits(&self) -> usize {
        self.inner.max_workers.saturating_sub(self.inner.state.lock().active_workers)
    }

    pub fn active_workers(&self) -> usize {
        self.inner.state.lock().active_workers
    }

    /// Pending plus running items, read without locking
    pub fn get_queue_size(&self) -> usize {
        self.inner.queue_size.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.state.lock().stopped
    }

    /// Stop the queue for good.
    ///
    /// Pending items are discarded and their waiters released; running jobs finish. Returns
    /// the number of discarded items.
    pub fn stop_queue(&self) -> usize {
        let inner = &self.inner;
        let discarded = {
            let mut state = inner.state.lock();
            state.stopped = true;
            state.pending_keys.clear();
            std::mem::take(&mut state.pending)
        };
        let count = discarded.len();
        drop(discarded);
        inner.queue_size.fetch_sub(count, Ordering::SeqCst);
        inner.done.notify_waiters();
        info!(queue = %inner.name, discarded = count, "Work queue stopped");
        count
    }
}

impl<T: WorkItem> QueueInner<T> {
    async fn drain(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.active_workers >= self.max_workers || state.pending.is_empty() {
                return;
            }
            state.active_workers += 1;
        }
        let mut slot = WorkerSlot {
            queue: self.clone(),
            current: None,
            active: true,
        };

        loop {
            let next = {
                let mut state = self.state.lock();
                match state.pending.pop_front() {
                    Some((key, item)) => {
                        state.pending_keys.remove(&key);
                        state.in_flight.insert(key.clone());
                        Some((key, item))
                    }
                    None => {
                        state.active_workers -= 1;
                        slot.active = false;
                        None
                    }
                }
            };
            let Some((key, item)) = next else {
                return;
            };

            slot.current = Some(key.clone());
            self.run_job(&key, item).await;
            slot.current = None;
            self.finish(&key);
        }
    }

    async fn run_job(&self, key: &str, item: T) {
        trace!(queue = %self.name, key, "Running job");
        let job = AssertUnwindSafe(self.callback.execute(item)).catch_unwind();
        let outcome = match self.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, job).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let err = WorkQueueError::Timeout {
                        key: key.to_string(),
                        seconds: limit.as_secs(),
                    };
                    warn!(queue = %self.name, "{}", err);
                    return;
                }
            },
            None => job.await,
        };
        match outcome {
            Ok(Ok(())) => trace!(queue = %self.name, key, "Job done"),
            Ok(Err(e)) => error!(queue = %self.name, key, "Failed to execute job: {}", e),
            Err(panic) => error!(queue = %self.name, key, "Job panicked: {}", panic_message(&*panic)),
        }
    }

    fn finish(&self, key: &str) {
        self.state.lock().in_flight.remove(key);
        self.queue_size.fetch_sub(1, Ordering::SeqCst);
        self.done.notify_waiters();
    }
}

/// Gives the worker permit and the running key back if a draining task is cancelled, and
/// restarts draining when work is left behind
struct WorkerSlot<T: WorkItem> {
    queue: Arc<QueueInner<T>>,
    current: Option<String>,
    active: bool,
}

impl<T: WorkItem> Drop for WorkerSlot<T> {
    fn drop(&mut self) {
        if let Some(key) = self.current.take() {
            self.queue.finish(&key);
        }
        if !self.active {
            return;
        }
        let left = {
            let mut state = self.queue.state.lock();
            state.active_workers -= 1;
            if state.stopped { 0 } else { state.pending.len() }
        };
        if left == 0 {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(queue = %self.queue.name, pending = left, "Worker cancelled, continuing in a new task");
                let queue = self.queue.clone();
                handle.spawn(async move { queue.drain().await });
            }
            Err(_) => warn!(
                queue = %self.queue.name,
                pending = left,
                "Worker cancelled outside a runtime, pending work waits for the next offer"
            ),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

impl<T> fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = &self.inner;
        f.debug_struct("WorkQueue")
            .field("name", &inner.name)
            .field("max_workers", &inner.max_workers)
            .field("job_timeout", &inner.job_timeout)
            .field("queue_size", &inner.queue_size.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T: WorkItem> QueueMonitor for WorkQueue<T> {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn queue_size(&self) -> usize {
        self.get_queue_size()
    }

    fn number_of_workers(&self) -> usize {
        self.active_workers()
    }

    fn max_number_of_workers(&self) -> usize {
        self.inner.max_workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl WorkCallback<String> for Counter {
        async fn execute(&self, _item: String) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counting_queue(workers: usize) -> (Arc<AtomicUsize>, WorkQueue<String>) {
        let runs = Arc::new(AtomicUsize::new(0));
        (runs.clone(), WorkQueue::with_workers("test", workers, Counter(runs)))
    }

    #[tokio::test]
    async fn test_offer_runs_in_calling_task() {
        let (runs, queue) = counting_queue(1);
        assert!(queue.offer_work("a".to_string()).await);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(queue.get_queue_size(), 0);
        assert_eq!(queue.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_zero_workers_never_execute() {
        let (runs, queue) = counting_queue(0);
        assert!(queue.offer_work("a".to_string()).await);
        assert!(!queue.offer_work("a".to_string()).await);
        assert!(queue.offer_work("b".to_string()).await);
        queue.do_jobs().await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(queue.get_queue_size(), 2);
        assert_eq!(queue.available_permits(), 0);
    }

    #[tokio::test]
    async fn test_stop_discards_pending_and_rejects_offers() {
        let (runs, queue) = counting_queue(0);
        queue.offer_work("a".to_string()).await;
        queue.offer_work("b".to_string()).await;

        assert_eq!(queue.stop_queue(), 2);
        assert!(queue.is_stopped());
        assert_eq!(queue.get_queue_size(), 0);
        assert!(!queue.offer_work("c".to_string()).await);
        assert_eq!(queue.get_queue_size(), 0);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        // Waiters on discarded keys return
        queue.wait_for_key("a").await;
    }

    #[tokio::test]
    async fn test_failing_and_panicking_jobs_do_not_stop_the_worker() {
        let gate = Arc::new(Notify::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let queue = {
            let gate = gate.clone();
            let runs = runs.clone();
            Arc::new(WorkQueue::with_workers("faulty", 1, move |item: String| {
                let gate = gate.clone();
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    match item.as_str() {
                        "gate" => {
                            gate.notified().await;
                            Ok(())
                        }
                        "fail" => Err(WorkQueueError::job("boom")),
                        "panic" => panic!("job exploded"),
                        _ => Ok(()),
                    }
                }
            }))
        };

        let worker = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.offer_work("gate".to_string()).await })
        };
        while !queue.contains_key("gate") || queue.active_workers() == 0 {
            tokio::task::yield_now().await;
        }
        // The permit is taken, so these offers only enqueue
        for key in ["fail", "panic", "ok"] {
            assert!(queue.offer_work(key.to_string()).await);
        }
        assert_eq!(queue.get_queue_size(), 4);

        gate.notify_one();
        assert!(worker.await.unwrap());
        assert_eq!(runs.load(Ordering::SeqCst), 4);
        assert_eq!(queue.get_queue_size(), 0);
        assert_eq!(queue.active_workers(), 0);
    }

    #[tokio::test]
    async fn test_job_timeout_lets_the_worker_continue() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let queue = WorkQueue::with_workers("slow", 1, move |item: String| {
            let flag = flag.clone();
            async move {
                if item == "slow" {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                } else {
                    flag.store(true, Ordering::SeqCst);
                }
                Ok::<_, WorkQueueError>(())
            }
        })
        .with_job_timeout(Some(Duration::from_millis(20)));

        assert!(queue.offer_work("slow".to_string()).await);
        assert!(queue.offer_work("fast".to_string()).await);
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(queue.get_queue_size(), 0);
    }

    #[tokio::test]
    async fn test_zero_timeout_disables_limit() {
        let (_, queue) = counting_queue(1);
        let queue = queue.with_job_timeout(Some(Duration::ZERO));
        assert_eq!(queue.job_timeout(), None);
    }

    #[tokio::test]
    async fn test_wait_for_unknown_key_returns() {
        let (_, queue) = counting_queue(1);
        queue.wait_for_key("never-offered").await;
        queue.wait_for_item_done(&"never-offered".to_string()).await;
    }

    #[tokio::test]
    async fn test_cancelled_worker_returns_permit() {
        let queue = Arc::new(WorkQueue::with_workers("cancel", 1, |_item: String| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, WorkQueueError>(())
        }));
        let worker = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.offer_work("a".to_string()).await })
        };
        while queue.active_workers() == 0 {
            tokio::task::yield_now().await;
        }
        worker.abort();
        let _ = worker.await;

        assert_eq!(queue.available_permits(), 1);
        assert_eq!(queue.get_queue_size(), 0);
        assert!(!queue.contains_key("a"));
    }

    #[tokio::test]
    async fn test_cancelled_worker_hands_pending_work_on() {
        let ran = Arc::new(Mutex::new(Vec::new()));
        let queue = {
            let ran = ran.clone();
            Arc::new(WorkQueue::with_workers("handover", 1, move |item: String| {
                let ran = ran.clone();
                async move {
                    if item == "slow" {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                    }
                    ran.lock().push(item);
                    Ok::<_, WorkQueueError>(())
                }
            }))
        };
        let worker = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.offer_work("slow".to_string()).await })
        };
        while queue.active_workers() == 0 {
            tokio::task::yield_now().await;
        }
        // No permit is free, so this only enqueues
        assert!(queue.offer_work("next".to_string()).await);
        assert!(queue.contains_key("next"));

        worker.abort();
        let _ = worker.await;

        tokio::time::timeout(Duration::from_secs(5), queue.wait_for_key("next"))
            .await
            .expect("pending item stranded by the cancelled worker");
        assert_eq!(*ran.lock(), vec!["next".to_string()]);
        assert_eq!(queue.get_queue_size(), 0);
        assert!(!queue.contains_key("slow"));
        while queue.active_workers() > 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(queue.available_permits(), 1);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*boxed), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*boxed), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(&*boxed), "unknown panic");
    }
}
