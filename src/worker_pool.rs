//! # Worker Pool Module
//!
//! The bounded pool that runs `Worker` mode handlers.
//!
//! ## Features
//!
//! - **Worker Threads**: N named OS threads with a configured stack size
//! - **Shared Queue**: workers take jobs from one channel and so balance load
//!   between themselves
//! - **Bounded Admission**: at most `num_workers + queue_bound` jobs may be in
//!   flight (running or queued); beyond that [`WorkerPool::submit`] sheds the
//!   job immediately instead of queueing it
//! - **Metrics**: queue depth, shed, dispatch and completion counts
//!
//! Submission never blocks the caller, which is what keeps an event-loop
//! thread responsive when every worker is busy.
//!
//! ## Configuration
//!
//! - `ROUTECORE_HANDLER_WORKERS`: number of worker threads (default: 4)
//! - `ROUTECORE_HANDLER_QUEUE_BOUND`: jobs allowed to wait for a worker (default: 1024)
//! - `ROUTECORE_STACK_SIZE`: worker stack size, decimal or `0x` hex (default: 0x40000)

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::error::DispatchError;
use crate::runtime_config::{env_usize, parse_size};

/// Work submitted to the pool
pub type Job = Box<dyn FnOnce() + Send + 'static>;

const DEFAULT_STACK_SIZE: usize = 0x40000;

/// Configuration for a worker pool
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of worker threads
    pub num_workers: usize,
    /// Jobs allowed to wait when every worker is busy
    pub queue_bound: usize,
    /// Stack size for worker threads in bytes
    #[serde(deserialize_with = "crate::runtime_config::deserialize_size")]
    pub stack_size: usize,
}

impl WorkerPoolConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            num_workers: env_usize("ROUTECORE_HANDLER_WORKERS").unwrap_or(defaults.num_workers),
            queue_bound: env_usize("ROUTECORE_HANDLER_QUEUE_BOUND").unwrap_or(defaults.queue_bound),
            stack_size: std::env::var("ROUTECORE_STACK_SIZE")
                .ok()
                .and_then(|s| parse_size(&s))
                .unwrap_or(defaults.stack_size),
        }
    }

    /// Create a custom configuration
    pub fn new(num_workers: usize, queue_bound: usize, stack_size: usize) -> Self {
        Self {
            num_workers,
            queue_bound,
            stack_size,
        }
    }

    /// Jobs the pool admits at once: one running per worker plus the queue
    pub fn capacity(&self) -> usize {
        self.num_workers + self.queue_bound
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            queue_bound: 1024,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

/// Metrics for a worker pool
#[derive(Debug, Default)]
pub struct WorkerPoolMetrics {
    /// Number of jobs shed because the pool was full
    pub shed_count: AtomicU64,
    /// Jobs admitted and not yet completed (running or queued)
    pub queue_depth: AtomicUsize,
    /// Total jobs admitted
    pub dispatched_count: AtomicU64,
    /// Total jobs completed, including ones that panicked
    pub completed_count: AtomicU64,
    /// Jobs that panicked
    pub panic_count: AtomicU64,
}

impl WorkerPoolMetrics {
    /// Create new metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot if fewer than `capacity` jobs are in flight.
    ///
    /// Returns the depth observed when the reservation failed.
    fn try_admit(&self, capacity: usize) -> Result<(), usize> {
        self.queue_depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| {
                (depth < capacity).then_some(depth + 1)
            })
            .map(|_| {
                self.dispatched_count.fetch_add(1, Ordering::Relaxed);
            })
    }

    /// Give back a slot reserved by a submission that never reached a worker
    fn release(&self) {
        self.queue_depth.fetch_sub(1, Ordering::AcqRel);
        self.dispatched_count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a shed event
    pub fn record_shed(&self) {
        self.shed_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completion event
    pub fn record_completion(&self) {
        self.completed_count.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_sub(1, Ordering::AcqRel);
    }

    /// Get current shed count
    pub fn get_shed_count(&self) -> u64 {
        self.shed_count.load(Ordering::Relaxed)
    }

    /// Get current queue depth
    pub fn get_queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Acquire)
    }

    /// Get total dispatched count
    pub fn get_dispatched_count(&self) -> u64 {
        self.dispatched_count.load(Ordering::Relaxed)
    }

    /// Get total completed count
    pub fn get_completed_count(&self) -> u64 {
        self.completed_count.load(Ordering::Relaxed)
    }

    pub fn get_panic_count(&self) -> u64 {
        self.panic_count.load(Ordering::Relaxed)
    }
}

/// A fixed set of worker threads with bounded admission
///
/// Dropping the pool closes the queue; workers finish the jobs already queued
/// and exit.
pub struct WorkerPool {
    name: String,
    config: WorkerPoolConfig,
    sender: SyncSender<Job>,
    metrics: Arc<WorkerPoolMetrics>,
    workers: usize,
}

impl WorkerPool {
    /// Spawn the worker threads.
    ///
    /// A worker that fails to spawn is logged and skipped; a pool left with no
    /// workers rejects every submission with [`DispatchError::PoolClosed`].
    pub fn new(name: impl Into<String>, config: WorkerPoolConfig) -> Self {
        let name = name.into();
        let (sender, receiver) = mpsc::sync_channel::<Job>(config.capacity());
        let receiver = Arc::new(Mutex::new(receiver));
        let metrics = Arc::new(WorkerPoolMetrics::new());

        info!(
            pool = %name,
            num_workers = config.num_workers,
            queue_bound = config.queue_bound,
            stack_size = config.stack_size,
            "Creating worker pool"
        );

        let mut workers = 0;
        for worker_id in 0..config.num_workers {
            let receiver = Arc::clone(&receiver);
            let metrics = Arc::clone(&metrics);
            let pool_name = name.clone();

            let spawn_result = thread::Builder::new()
                .name(format!("{name}-{worker_id}"))
                .stack_size(config.stack_size)
                .spawn(move || worker_loop(&pool_name, worker_id, &receiver, &metrics));

            match spawn_result {
                Ok(_) => workers += 1,
                Err(e) => error!(
                    pool = %name,
                    worker_id = worker_id,
                    error = %e,
                    "Failed to spawn worker thread"
                ),
            }
        }

        Self {
            name,
            config,
            sender,
            metrics,
            workers,
        }
    }

    /// Pool sized from environment variables
    pub fn from_env(name: impl Into<String>) -> Self {
        Self::new(name, WorkerPoolConfig::from_env())
    }

    /// Queue a job without blocking.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Overloaded`] when `num_workers + queue_bound` jobs
    ///   are already in flight
    /// - [`DispatchError::PoolClosed`] when no worker is running
    pub fn submit(&self, job: Job) -> Result<(), DispatchError> {
        if self.workers == 0 {
            return Err(DispatchError::PoolClosed);
        }

        let capacity = self.config.capacity();
        if let Err(depth) = self.metrics.try_admit(capacity) {
            self.metrics.record_shed();
            warn!(
                pool = %self.name,
                depth = depth,
                capacity = capacity,
                shed_count = self.metrics.get_shed_count(),
                "Worker pool saturated - shedding request"
            );
            return Err(DispatchError::Overloaded { depth, capacity });
        }

        match self.sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.metrics.release();
                self.metrics.record_shed();
                Err(DispatchError::Overloaded {
                    depth: self.metrics.get_queue_depth(),
                    capacity,
                })
            }
            Err(TrySendError::Disconnected(_)) => {
                self.metrics.release();
                error!(pool = %self.name, "Worker pool channel disconnected");
                Err(DispatchError::PoolClosed)
            }
        }
    }

    /// Get metrics for this worker pool
    pub fn metrics(&self) -> &Arc<WorkerPoolMetrics> {
        &self.metrics
    }

    /// Get configuration for this worker pool
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Worker threads actually running
    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("workers", &self.workers)
            .field("queue_depth", &self.metrics.get_queue_depth())
            .finish()
    }
}

fn worker_loop(
    pool: &str,
    worker_id: usize,
    receiver: &Mutex<Receiver<Job>>,
    metrics: &WorkerPoolMetrics,
) {
    debug!(pool = %pool, worker_id = worker_id, "Worker thread started");

    loop {
        // The lock is only held while waiting for the next job.
        let next = receiver.lock().recv();
        let Ok(job) = next else {
            break;
        };

        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(job)) {
            metrics.panic_count.fetch_add(1, Ordering::Relaxed);
            error!(
                pool = %pool,
                worker_id = worker_id,
                panic_message = ?panic,
                "Job panicked - CRITICAL"
            );
        }
        metrics.record_completion();
    }

    debug!(pool = %pool, worker_id = worker_id, "Worker thread exiting");
}
