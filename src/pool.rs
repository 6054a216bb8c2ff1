//! The worker pool: thread lifecycle, submission, and shutdown.

use crate::class::ClassTable;
use crate::config::{ClassConfig, ConfigError};
use crate::ingress::{Ingress, IngressItem};
use crate::placement::{
    self, GreedyPlacement, PlacementPolicy, RoundRobinPlacement, ThreadPlacement,
};
use crate::scheduler::ClassQueues;
use crate::task::Task;
use crossbeam_channel::{unbounded, Receiver};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// How long a worker waits on ingress before re-checking the class queues.
const INGRESS_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// How long shutdown waits for every worker to drain and exit.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_millis(20_000);

/// Unpinned pools join all workers as one wait batch at shutdown; 64 is the
/// size of a single batch.
const MAX_UNPINNED_WORKERS: u32 = 64;

/// A fixed-size pool of worker threads executing class-tagged tasks under
/// per-class thread budgets.
///
/// Tasks enter through a shared ingress FIFO and are routed by idle workers
/// into per-class queues, where the two-tier selection of
/// [`ClassQueues::acquire_next`] decides what runs next. Routed work always
/// takes precedence over fresh arrivals: a worker only polls ingress after
/// the class queues came up empty, so a task already admitted to its class
/// queue is never overtaken by one still sitting in ingress.
///
/// Shutdown pushes one null sentinel per worker through ingress. A worker
/// picking up a sentinel switches to drain mode (ceilings are ignored so a
/// saturated class cannot wedge the drain), hands the sentinel on while work
/// remains, and exits once the class queues are empty.
#[derive(Debug)]
pub struct WorkerPool {
    queues: Arc<ClassQueues>,
    ingress: Arc<Ingress>,
    shutting_down: AtomicBool,
    workers: Vec<JoinHandle<()>>,
    worker_exits: Receiver<usize>,
    attached_sources: AtomicUsize,
    concurrent_threads: u32,
}

/// Point-in-time view of the pool, for embedders and tests.
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Idle workers. Equals the pool size minus the sum of `running`.
    pub free_threads: u32,
    /// Workers currently executing a task of each class.
    pub running: ClassTable<u32>,
    /// Tasks routed into each class queue but not yet running.
    pub queued: ClassTable<usize>,
    /// Submitted tasks not yet routed into a class queue.
    pub ingress_depth: usize,
}

impl WorkerPool {
    /// Build the pool and spawn `total_threads` workers placed according to
    /// `policy`.
    ///
    /// `concurrent_threads` is an advisory cap on simultaneously executing
    /// workers for embedders that oversubscribe; zero means "as many as the
    /// pool holds". It is validated against the pool size but does not alter
    /// scheduling.
    ///
    /// Configuration violations are rejected here, before any thread is
    /// spawned. A failed thread spawn itself is fatal.
    pub fn new(
        configs: Vec<ClassConfig>,
        policy: PlacementPolicy,
        total_threads: u32,
        concurrent_threads: u32,
    ) -> Result<Self, ConfigError> {
        validate(policy, total_threads, concurrent_threads)?;

        // ClassQueues::new validates the config list itself.
        let queues = Arc::new(ClassQueues::new(configs, total_threads)?);
        let ingress = Arc::new(Ingress::new());
        let (exit_sender, worker_exits) = unbounded();

        let mut workers = Vec::with_capacity(total_threads as usize);
        {
            let mut spawn_worker = |pin: Option<(usize, u64)>| {
                let worker_id = workers.len();
                let queues = Arc::clone(&queues);
                let ingress = Arc::clone(&ingress);
                let exit_sender = exit_sender.clone();

                let handle = thread::Builder::new()
                    .name(format!("pool-worker-{worker_id}"))
                    .spawn(move || {
                        if let Some((group_index, mask)) = pin {
                            placement::pin_current_thread(group_index, mask);
                        }
                        run_worker(worker_id, &queues, &ingress);
                        let _ = exit_sender.send(worker_id);
                    })
                    .expect("failed to spawn pool worker thread");

                workers.push(handle);
            };

            let cpu_groups = placement::cpu_groups();
            match policy {
                PlacementPolicy::Unpinned => {
                    for _ in 0..total_threads {
                        spawn_worker(None);
                    }
                }
                PlacementPolicy::Greedy => {
                    GreedyPlacement.create_threads(total_threads, &cpu_groups, &mut |group, mask| {
                        spawn_worker(Some((group, mask)));
                    });
                }
                PlacementPolicy::RoundRobin => {
                    RoundRobinPlacement.create_threads(
                        total_threads,
                        &cpu_groups,
                        &mut |group, mask| spawn_worker(Some((group, mask))),
                    );
                }
            }
        }
        debug!(workers = workers.len(), ?policy, "worker pool started");

        Ok(WorkerPool {
            queues,
            ingress,
            shutting_down: AtomicBool::new(false),
            workers,
            worker_exits,
            attached_sources: AtomicUsize::new(0),
            concurrent_threads,
        })
    }

    /// Submit a task for execution. Non-blocking; the pool takes ownership.
    ///
    /// Once shutdown has begun the task is dropped without being executed and
    /// without an error indication.
    pub fn submit(&self, task: Box<dyn Task>) {
        if self.shutting_down.load(Ordering::SeqCst) {
            trace!(class = %task.class(), "submission after shutdown dropped");
            return;
        }
        self.ingress.push(IngressItem::Task(task));
    }

    /// Register an external task source feeding this pool. Sources are opaque
    /// here; only their count is tracked, and every attached source must be
    /// detached before the pool is torn down.
    pub fn attach(&self) {
        self.attached_sources.fetch_add(1, Ordering::SeqCst);
    }

    /// Unregister an external task source.
    pub fn detach(&self) {
        let previous = self.attached_sources.fetch_sub(1, Ordering::SeqCst);
        assert!(previous > 0, "detach without a matching attach");
    }

    /// The advisory concurrency cap passed at construction.
    pub fn concurrent_threads(&self) -> u32 {
        self.concurrent_threads
    }

    pub fn stats(&self) -> PoolStats {
        let scheduler = self.queues.stats();
        PoolStats {
            free_threads: scheduler.free_threads,
            running: scheduler.running,
            queued: scheduler.queued,
            ingress_depth: self.ingress.len(),
        }
    }

    /// Drain all previously submitted work and stop every worker.
    ///
    /// One sentinel per worker goes through ingress so each worker observes
    /// shutdown even when no real task remains. Workers that see work left
    /// keep draining (ignoring per-class ceilings) and pass their sentinel
    /// on. Failure to join within the shutdown window is fatal.
    ///
    /// Also runs on drop; calling it again is a no-op.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }

        self.shutting_down.store(true, Ordering::SeqCst);
        debug!(workers = self.workers.len(), "worker pool shutting down");

        for _ in 0..self.workers.len() {
            self.ingress.push(IngressItem::Shutdown);
        }

        let deadline = Instant::now() + SHUTDOWN_JOIN_TIMEOUT;
        for _ in 0..self.workers.len() {
            if self.worker_exits.recv_deadline(deadline).is_err() {
                error!("worker threads failed to exit within the shutdown window");
                panic!("worker pool shutdown timed out");
            }
        }

        for handle in self.workers.drain(..) {
            // The exit notification above already observed this worker
            // finishing; the join only reaps the thread.
            let _ = handle.join();
        }

        assert_eq!(
            self.attached_sources.load(Ordering::SeqCst),
            0,
            "all attached task sources must be detached before teardown"
        );
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Pool-level checks; the config list itself is validated by
/// [`ClassQueues::new`].
fn validate(
    policy: PlacementPolicy,
    total_threads: u32,
    concurrent_threads: u32,
) -> Result<(), ConfigError> {
    if total_threads == 0 {
        return Err(ConfigError::EmptyPool);
    }
    if concurrent_threads > total_threads {
        return Err(ConfigError::ConcurrencyAbovePool {
            concurrent_threads,
            total_threads,
        });
    }
    if policy == PlacementPolicy::Unpinned && total_threads > MAX_UNPINNED_WORKERS {
        return Err(ConfigError::TooManyUnpinnedWorkers {
            limit: MAX_UNPINNED_WORKERS,
            requested: total_threads,
        });
    }

    Ok(())
}

/// The loop each worker runs until it observes shutdown with empty queues.
///
/// Routed work is always tried first; ingress is only polled when the class
/// queues have nothing runnable, which is what makes admission to a class
/// queue a strict scheduling promotion over fresh arrivals.
fn run_worker(worker_id: usize, queues: &ClassQueues, ingress: &Ingress) {
    let mut draining = false;

    loop {
        if let Some(task) = queues.acquire_next(draining) {
            run_task(worker_id, queues, task);
            continue;
        }

        match ingress.poll(INGRESS_POLL_TIMEOUT) {
            // Timeout: loop around and re-check the class queues. The poll
            // timeout keeps this from busy-spinning.
            None => continue,
            Some(IngressItem::Shutdown) => {
                draining = true;
                if queues.has_any_tasks() {
                    // Hand the sentinel on so another worker can also
                    // terminate once the drain completes.
                    ingress.push(IngressItem::Shutdown);
                } else {
                    debug!(worker_id, "worker exiting");
                    return;
                }
            }
            Some(IngressItem::Task(task)) => queues.post(task),
        }
    }
}

/// Execute one task and return its thread slot.
///
/// A panicking or erroring task still counts as completed: the slot is
/// released and the task is dropped before the outcome is even inspected, so
/// no failure can leak a thread.
fn run_task(worker_id: usize, queues: &ClassQueues, mut task: Box<dyn Task>) {
    let class = task.class();
    let outcome = catch_unwind(AssertUnwindSafe(|| task.execute()));

    queues.release(class);
    drop(task);

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(worker_id, %class, error = %err, "task failed"),
        Err(_) => warn!(worker_id, %class, "task panicked"),
    }
}
