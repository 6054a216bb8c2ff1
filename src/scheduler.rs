//! Class-level task queues and the selection algorithm over them.

use crate::accounting::ClassAccounting;
use crate::class::{ClassTable, TaskClass};
use crate::config::{ClassConfig, ConfigError};
use crate::task::Task;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

/// Accounting shared by every worker, guarded by the scheduling lock.
#[derive(Debug)]
struct SchedState {
    free_threads: u32,
    classes: ClassTable<ClassAccounting>,
}

/// Per-class FIFO queues plus the accounting that decides which class runs
/// next.
///
/// The scheduling lock covers only the bookkeeping: the free-thread budget and
/// the per-class queue depth, running count, and derived flags. Task payloads
/// travel through separate per-class channels that are never touched under the
/// lock, so no caller ever holds it across a potentially blocking operation.
#[derive(Debug)]
pub struct ClassQueues {
    state: Mutex<SchedState>,
    payload_senders: ClassTable<Sender<Box<dyn Task>>>,
    payload_receivers: ClassTable<Receiver<Box<dyn Task>>>,
    total_threads: u32,
}

/// Point-in-time view of the scheduler accounting.
#[derive(Debug, Clone)]
pub struct SchedulerStats {
    pub free_threads: u32,
    pub running: ClassTable<u32>,
    pub queued: ClassTable<usize>,
}

impl ClassQueues {
    /// Build the queues for a config list, validating it first.
    ///
    /// The list must hold one config per class in class order, every config
    /// must satisfy its own limits, and no ceiling may exceed the pool size.
    /// Violations are rejected here, synchronously, so a scheduler can never
    /// exist with a non-binding ceiling.
    pub fn new(configs: Vec<ClassConfig>, total_threads: u32) -> Result<Self, ConfigError> {
        if configs.len() != TaskClass::COUNT {
            return Err(ConfigError::WrongClassCount {
                expected: TaskClass::COUNT,
                actual: configs.len(),
            });
        }
        for (position, config) in configs.iter().enumerate() {
            if config.class().index() != position {
                return Err(ConfigError::MisorderedClass {
                    position,
                    class: config.class(),
                });
            }
            // Re-run the per-config checks so lists built without
            // `ClassConfig::new` (e.g. deserialized) are still rejected.
            ClassConfig::new(
                config.class(),
                config.priority_threshold(),
                config.max_threads(),
            )?;
            if config.max_threads() > total_threads {
                return Err(ConfigError::CeilingAbovePool {
                    class: config.class(),
                    max_threads: config.max_threads(),
                    total_threads,
                });
            }
        }

        let mut senders = Vec::with_capacity(TaskClass::COUNT);
        let mut receivers = Vec::with_capacity(TaskClass::COUNT);
        for _ in TaskClass::ALL {
            let (sender, receiver) = unbounded();
            senders.push(sender);
            receivers.push(receiver);
        }

        Ok(ClassQueues {
            state: Mutex::new(SchedState {
                free_threads: total_threads,
                classes: ClassTable::from_fn(|class| ClassAccounting::new(configs[class.index()])),
            }),
            payload_senders: ClassTable::from_vec(senders),
            payload_receivers: ClassTable::from_vec(receivers),
            total_threads,
        })
    }

    /// Route a task into its class queue.
    ///
    /// The payload goes into the FIFO before the accounting is bumped, so an
    /// accounting token always has a matching element to dequeue. No worker is
    /// woken here; workers poll.
    pub fn post(&self, task: Box<dyn Task>) {
        let class = task.class();
        self.payload_senders[class]
            .send(task)
            .expect("class payload queue disconnected");
        self.state.lock().classes[class].post();
    }

    /// Select, account, and dequeue the next runnable task.
    ///
    /// Selection walks the classes in index order three times: first for a
    /// preferred class, then for a merely legal one. The third scan runs only
    /// in drain mode and takes any class with work left, ignoring thresholds
    /// and ceilings so a saturated ceiling cannot wedge the shutdown drain.
    ///
    /// Every `Some` return consumes one free thread and must be paired with
    /// exactly one [`ClassQueues::release`].
    pub fn acquire_next(&self, drain_mode: bool) -> Option<Box<dyn Task>> {
        let mut state = self.state.lock();
        if state.free_threads == 0 {
            return None;
        }

        let class = Self::select_class(&state.classes, drain_mode)?;
        state.classes[class].acquire();
        state.free_threads -= 1;
        drop(state);

        // Dequeue outside the lock. The token moved by acquire() guarantees
        // the FIFO holds at least one element; anything else is a lost task.
        let task = self.payload_receivers[class]
            .try_recv()
            .expect("class queue empty after a successful acquire");
        debug_assert_eq!(task.class(), class);
        Some(task)
    }

    fn select_class(
        classes: &ClassTable<ClassAccounting>,
        drain_mode: bool,
    ) -> Option<TaskClass> {
        for class in TaskClass::ALL {
            if classes[class].is_preferred() {
                return Some(class);
            }
        }

        for class in TaskClass::ALL {
            if classes[class].is_legal() {
                return Some(class);
            }
        }

        if drain_mode {
            for class in TaskClass::ALL {
                if classes[class].has_tasks() {
                    return Some(class);
                }
            }
        }

        None
    }

    /// Return the thread consumed by [`ClassQueues::acquire_next`]. Called
    /// exactly once per successful acquire, whether or not the task failed.
    pub fn release(&self, class: TaskClass) {
        let mut state = self.state.lock();
        state.classes[class].release();
        state.free_threads += 1;
        assert!(
            state.free_threads <= self.total_threads,
            "free thread count exceeds the pool size"
        );
    }

    /// Check whether any class still has queued work.
    pub fn has_any_tasks(&self) -> bool {
        let state = self.state.lock();
        TaskClass::ALL
            .iter()
            .any(|&class| state.classes[class].has_tasks())
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.state.lock();
        SchedulerStats {
            free_threads: state.free_threads,
            running: ClassTable::from_fn(|class| state.classes[class].running_count()),
            queued: ClassTable::from_fn(|class| state.classes[class].queued_count()),
        }
    }
}
