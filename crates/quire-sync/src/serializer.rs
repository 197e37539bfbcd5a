//! Per-signer transaction serialization
//!
//! Two writes signed by the same identity must never be in flight at once:
//! the chain client assigns sequence numbers at submission time and
//! overlapping submissions clobber each other. A [`TransactionSerializer`]
//! runs the tasks queued for one signer strictly one at a time, in FIFO
//! order, with a fixed cool-down between them. Different signers get
//! different serializers (see [`SerializerPool`]) and proceed concurrently.
//!
//! ## State machine
//!
//! ```text
//! Idle --enqueue--> Processing --queue empty--> Idle
//!                   Processing --clear_queue--> Draining --in-flight done--> Idle
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use quire_core::PublisherAddress;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::error::{SyncError, SyncResult};

/// Lifecycle phase of a serializer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializerPhase {
    /// No worker running
    Idle,
    /// Worker running tasks or cooling down
    Processing,
    /// Queue was cleared while a task was in flight
    Draining,
}

/// Snapshot of a serializer's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerializerStats {
    /// Tasks waiting to run
    pub queue_length: usize,
    /// Whether a worker is active
    pub processing: bool,
    /// Tasks run to completion (successfully or not)
    pub total_processed: u64,
    pub phase: SerializerPhase,
}

/// A queued unit of work, type-erased over its output
trait QueuedTask: Send {
    /// Run the task and deliver its result
    fn run(self: Box<Self>) -> BoxFuture<'static, ()>;

    /// Deliver `error` without running
    fn reject(self: Box<Self>, error: SyncError);
}

struct Task<T> {
    future: BoxFuture<'static, SyncResult<T>>,
    reply: oneshot::Sender<SyncResult<T>>,
}

impl<T: Send + 'static> QueuedTask for Task<T> {
    fn run(self: Box<Self>) -> BoxFuture<'static, ()> {
        let Task { future, reply } = *self;
        Box::pin(async move {
            // Spawned so a panicking task fails alone instead of taking the
            // worker (and every task behind it) down.
            let result = match tokio::spawn(future).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "Serialized task aborted");
                    Err(SyncError::WorkerStopped)
                }
            };
            let _ = reply.send(result);
        })
    }

    fn reject(self: Box<Self>, error: SyncError) {
        let _ = self.reply.send(Err(error));
    }
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<Box<dyn QueuedTask>>,
    processing: bool,
    draining: bool,
}

struct Shared {
    signer: PublisherAddress,
    cool_down: Duration,
    state: Mutex<QueueState>,
    total_processed: AtomicU64,
}

/// FIFO executor for the writes of one signer
#[derive(Clone)]
pub struct TransactionSerializer {
    shared: Arc<Shared>,
}

impl TransactionSerializer {
    /// Create an idle serializer for `signer`
    pub fn new(signer: PublisherAddress, cool_down: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                signer,
                cool_down,
                state: Mutex::new(QueueState::default()),
                total_processed: AtomicU64::new(0),
            }),
        }
    }

    /// The signer this serializer runs writes for
    pub fn signer(&self) -> &PublisherAddress {
        &self.shared.signer
    }

    /// Queue `task` behind everything already enqueued
    ///
    /// The task is queued immediately, before the returned future is polled,
    /// so call order is execution order. The future resolves with the task's
    /// own result; a failing task fails only its own future.
    pub fn enqueue<Fut, T>(
        &self,
        task: Fut,
    ) -> impl Future<Output = SyncResult<T>> + Send + use<Fut, T>
    where
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, receiver) = oneshot::channel();
        let task: Box<dyn QueuedTask> = Box::new(Task {
            future: Box::pin(task),
            reply,
        });

        let start_worker = {
            let mut state = self.shared.state.lock();
            state.queue.push_back(task);
            trace!(
                signer = %self.shared.signer,
                queue_length = state.queue.len(),
                "Task enqueued"
            );
            if state.processing {
                false
            } else {
                state.processing = true;
                true
            }
        };

        if start_worker {
            tokio::spawn(Self::run_worker(Arc::clone(&self.shared)));
        }

        async move { receiver.await.unwrap_or(Err(SyncError::WorkerStopped)) }
    }

    /// Reject every pending task with [`SyncError::QueueCleared`]
    ///
    /// A task already running is unaffected and completes on its own.
    /// Returns how many tasks were rejected.
    pub fn clear_queue(&self) -> usize {
        let rejected: Vec<_> = {
            let mut state = self.shared.state.lock();
            if state.processing {
                state.draining = true;
            }
            state.queue.drain(..).collect()
        };

        let count = rejected.len();
        for task in rejected {
            task.reject(SyncError::QueueCleared);
        }
        if count > 0 {
            debug!(signer = %self.shared.signer, rejected = count, "Cleared transaction queue");
        }
        count
    }

    /// Current counters
    pub fn stats(&self) -> SerializerStats {
        let state = self.shared.state.lock();
        let phase = match (state.processing, state.draining) {
            (false, _) => SerializerPhase::Idle,
            (true, true) => SerializerPhase::Draining,
            (true, false) => SerializerPhase::Processing,
        };
        SerializerStats {
            queue_length: state.queue.len(),
            processing: state.processing,
            total_processed: self.shared.total_processed.load(Ordering::SeqCst),
            phase,
        }
    }

    async fn run_worker(shared: Arc<Shared>) {
        debug!(signer = %shared.signer, "Serializer worker started");
        loop {
            let next = {
                let mut state = shared.state.lock();
                match state.queue.pop_front() {
                    Some(task) => {
                        state.draining = false;
                        task
                    }
                    None => {
                        state.processing = false;
                        state.draining = false;
                        break;
                    }
                }
            };

            next.run().await;
            shared.total_processed.fetch_add(1, Ordering::SeqCst);

            // The cool-down also applies after the last task, so a task
            // enqueued right after we go idle still waits its turn.
            tokio::time::sleep(shared.cool_down).await;
        }
        debug!(signer = %shared.signer, "Serializer worker idle");
    }
}

impl std::fmt::Debug for TransactionSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSerializer")
            .field("signer", &self.shared.signer)
            .field("stats", &self.stats())
            .finish()
    }
}

/// One serializer per signer address, created on demand
#[derive(Debug)]
pub struct SerializerPool {
    serializers: DashMap<PublisherAddress, TransactionSerializer>,
    cool_down: Duration,
}

impl SerializerPool {
    pub fn new(cool_down: Duration) -> Self {
        Self {
            serializers: DashMap::new(),
            cool_down,
        }
    }

    /// The serializer for `signer`
    pub fn get(&self, signer: &PublisherAddress) -> TransactionSerializer {
        self.serializers
            .entry(signer.clone())
            .or_insert_with(|| TransactionSerializer::new(signer.clone(), self.cool_down))
            .clone()
    }

    /// Stats of every serializer created so far
    pub fn stats(&self) -> Vec<(PublisherAddress, SerializerStats)> {
        let mut stats: Vec<_> = self
            .serializers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    /// Clear every queue, returning the number of rejected tasks
    pub fn clear_all(&self) -> usize {
        self.serializers
            .iter()
            .map(|entry| entry.value().clear_queue())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn signer(byte: u8) -> PublisherAddress {
        PublisherAddress::from_bytes([byte; 20])
    }

    #[tokio::test(start_paused = true)]
    async fn test_tasks_run_in_order_separated_by_cool_down() {
        let serializer = TransactionSerializer::new(signer(1), Duration::from_millis(500));
        let log: Arc<Mutex<Vec<(usize, Instant, Instant)>>> = Arc::new(Mutex::new(Vec::new()));

        let futures: Vec<_> = (0..3)
            .map(|i| {
                let log = Arc::clone(&log);
                serializer.enqueue(async move {
                    let start = Instant::now();
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    log.lock().push((i, start, Instant::now()));
                    Ok(i)
                })
            })
            .collect();

        let results = futures::future::join_all(futures).await;
        assert_eq!(
            results.into_iter().map(|r| r.unwrap()).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );

        let log = log.lock();
        assert_eq!(log.iter().map(|(i, _, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2]);
        for pair in log.windows(2) {
            let (_, _, previous_end) = pair[0];
            let (_, next_start, _) = pair[1];
            assert!(next_start >= previous_end + Duration::from_millis(500));
        }
        assert_eq!(serializer.stats().total_processed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_enqueued_after_idle_still_waits() {
        let serializer = TransactionSerializer::new(signer(1), Duration::from_millis(500));

        serializer.enqueue(async { Ok(()) }).await.unwrap();
        let first_done = Instant::now();

        let started = serializer.enqueue(async { Ok(Instant::now()) }).await.unwrap();
        assert!(started >= first_done + Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_isolated() {
        let serializer = TransactionSerializer::new(signer(2), Duration::from_millis(10));

        let failing = serializer.enqueue(async {
            Err::<(), _>(SyncError::Chain(quire_core::ChainError::Rejected("nonce".into())))
        });
        let succeeding = serializer.enqueue(async { Ok(7) });

        assert!(matches!(failing.await, Err(SyncError::Chain(_))));
        assert_eq!(succeeding.await.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_task_does_not_stop_worker() {
        let serializer = TransactionSerializer::new(signer(3), Duration::from_millis(10));

        let panicking = serializer.enqueue(async {
            if true {
                panic!("task blew up");
            }
            Ok(())
        });
        let next = serializer.enqueue(async { Ok("still running") });

        assert_eq!(panicking.await, Err(SyncError::WorkerStopped));
        assert_eq!(next.await.unwrap(), "still running");
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_queue_rejects_pending_only() {
        let serializer = TransactionSerializer::new(signer(4), Duration::from_millis(10));

        let in_flight = serializer.enqueue(async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(1)
        });
        let pending_a = serializer.enqueue(async { Ok(2) });
        let pending_b = serializer.enqueue(async { Ok(3) });

        // Let the worker pick up the first task.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(serializer.stats().phase, SerializerPhase::Processing);
        assert_eq!(serializer.stats().queue_length, 2);

        assert_eq!(serializer.clear_queue(), 2);
        assert_eq!(serializer.stats().phase, SerializerPhase::Draining);
        assert_eq!(serializer.stats().queue_length, 0);

        assert_eq!(pending_a.await, Err(SyncError::QueueCleared));
        assert_eq!(pending_b.await, Err(SyncError::QueueCleared));
        assert_eq!(in_flight.await.unwrap(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let stats = serializer.stats();
        assert_eq!(stats.phase, SerializerPhase::Idle);
        assert!(!stats.processing);
        assert_eq!(stats.total_processed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_shares_serializer_per_signer() {
        let pool = SerializerPool::new(Duration::from_millis(100));
        let a = signer(0xaa);
        let b = signer(0xbb);

        let running = Arc::new(Mutex::new((0usize, 0usize)));
        let task = |running: Arc<Mutex<(usize, usize)>>| async move {
            {
                let mut guard = running.lock();
                guard.0 += 1;
                guard.1 = guard.1.max(guard.0);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
            running.lock().0 -= 1;
            Ok(())
        };

        let futures = vec![
            pool.get(&a).enqueue(task(Arc::clone(&running))),
            pool.get(&a).enqueue(task(Arc::clone(&running))),
            pool.get(&b).enqueue(task(Arc::clone(&running))),
        ];
        for result in futures::future::join_all(futures).await {
            result.unwrap();
        }

        // a's two tasks never overlapped, but b ran alongside a
        assert_eq!(running.lock().1, 2);
        let stats = pool.stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].0, a);
        assert_eq!(stats[0].1.total_processed, 2);
        assert_eq!(stats[1].1.total_processed, 1);
    }
}
