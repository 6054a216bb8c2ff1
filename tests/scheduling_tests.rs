// Scheduling-order tests: preference beats legality, ceilings hold under
// load, and same-class work stays FIFO.

use parking_lot::Mutex;
use priority_pool::{
    ClassConfig, PlacementPolicy, Task, TaskClass, TaskError, WorkerPool,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// A task that appends its id to a shared execution log.
struct LoggedTask {
    class: TaskClass,
    id: u64,
    log: Arc<Mutex<Vec<u64>>>,
    busy_for: Duration,
}

impl Task for LoggedTask {
    fn class(&self) -> TaskClass {
        self.class
    }

    fn execute(&mut self) -> Result<(), TaskError> {
        self.log.lock().push(self.id);
        if !self.busy_for.is_zero() {
            thread::sleep(self.busy_for);
        }
        Ok(())
    }
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn a_preferred_high_task_overtakes_pending_low_work() {
    const LOW_TASKS: u64 = 100;
    const HIGH_ID: u64 = 1_000;

    let configs = vec![
        ClassConfig::new(TaskClass::High, 0, 1).unwrap(),
        ClassConfig::new(TaskClass::Medium, 0, 1).unwrap(),
        ClassConfig::new(TaskClass::Low, 0, 1).unwrap(),
    ];
    let mut pool = WorkerPool::new(configs, PlacementPolicy::Unpinned, 2, 0).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    // A backlog of Low work first. With max_threads(Low) == 1 only one can
    // run at a time, so the rest pile up in the Low queue.
    for id in 0..LOW_TASKS {
        pool.submit(Box::new(LoggedTask {
            class: TaskClass::Low,
            id,
            log: log.clone(),
            busy_for: Duration::from_millis(2),
        }));
    }
    pool.submit(Box::new(LoggedTask {
        class: TaskClass::High,
        id: HIGH_ID,
        log: log.clone(),
        busy_for: Duration::ZERO,
    }));

    wait_until("every task to execute", || {
        log.lock().len() as u64 == LOW_TASKS + 1
    });
    pool.shutdown();

    // High is idle, so it is preferred the moment it is routed; the pending
    // Lows are merely legal and must let it pass.
    let log = log.lock();
    let high_position = log
        .iter()
        .position(|&id| id == HIGH_ID)
        .expect("the high task ran");
    assert!(
        (high_position as u64) < LOW_TASKS,
        "the high task ran last, behind every queued low task"
    );
}

#[test]
fn the_low_ceiling_holds_across_a_thousand_tasks() {
    const TASKS: u32 = 1000;

    struct GaugedTask {
        executions: Arc<AtomicU32>,
        running_now: Arc<AtomicU32>,
        running_high_water: Arc<AtomicU32>,
    }

    impl Task for GaugedTask {
        fn class(&self) -> TaskClass {
            TaskClass::Low
        }

        fn execute(&mut self) -> Result<(), TaskError> {
            let running = self.running_now.fetch_add(1, Ordering::SeqCst) + 1;
            self.running_high_water.fetch_max(running, Ordering::SeqCst);
            self.executions.fetch_add(1, Ordering::SeqCst);
            self.running_now.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let configs = vec![
        ClassConfig::new(TaskClass::High, 1, 4).unwrap(),
        ClassConfig::new(TaskClass::Medium, 1, 4).unwrap(),
        ClassConfig::new(TaskClass::Low, 1, 1).unwrap(),
    ];
    let mut pool = WorkerPool::new(configs, PlacementPolicy::Unpinned, 4, 0).unwrap();
    let executions = Arc::new(AtomicU32::new(0));
    let running_now = Arc::new(AtomicU32::new(0));
    let running_high_water = Arc::new(AtomicU32::new(0));

    for _ in 0..TASKS {
        pool.submit(Box::new(GaugedTask {
            executions: executions.clone(),
            running_now: running_now.clone(),
            running_high_water: running_high_water.clone(),
        }));
    }

    wait_until("every task to execute", || {
        executions.load(Ordering::SeqCst) == TASKS
    });
    pool.shutdown();

    assert!(
        running_high_water.load(Ordering::SeqCst) <= 1,
        "more than one low task ran at once"
    );
}

#[test]
fn same_class_tasks_acquire_in_submission_order() {
    const TASKS: u64 = 100;

    let configs = vec![
        ClassConfig::new(TaskClass::High, 1, 1).unwrap(),
        ClassConfig::new(TaskClass::Medium, 1, 1).unwrap(),
        ClassConfig::new(TaskClass::Low, 1, 1).unwrap(),
    ];
    // A single worker keeps routing serial, so end-to-end order is exact.
    let mut pool = WorkerPool::new(configs, PlacementPolicy::Unpinned, 1, 0).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    for id in 0..TASKS {
        pool.submit(Box::new(LoggedTask {
            class: TaskClass::Medium,
            id,
            log: log.clone(),
            busy_for: Duration::ZERO,
        }));
    }

    wait_until("every task to execute", || log.lock().len() as u64 == TASKS);
    pool.shutdown();

    let log = log.lock();
    let expected: Vec<u64> = (0..TASKS).collect();
    assert_eq!(*log, expected);
}
