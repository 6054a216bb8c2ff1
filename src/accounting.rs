//! Per-class queue depth and running count bookkeeping.

use crate::config::ClassConfig;

/// Thread resource accounting for one task class.
///
/// Not internally synchronized. The scheduler's lock guards every instance;
/// see [`crate::scheduler::ClassQueues`].
///
/// The derived flags are recomputed after every mutation:
///
/// ```text
/// legal     = queued > 0 && running <  max_threads
/// preferred = legal      && running <= priority_threshold
/// ```
///
/// Note the strict versus non-strict comparison: preference is granted up to
/// and including the threshold, while legality stops before the ceiling. A
/// class whose threshold equals its ceiling is preferred on its last legal
/// slot; a class with a zero threshold is preferred only while idle.
#[derive(Debug)]
pub struct ClassAccounting {
    config: ClassConfig,
    queued: usize,
    running: u32,
    legal: bool,
    preferred: bool,
}

impl ClassAccounting {
    pub fn new(config: ClassConfig) -> Self {
        let mut accounting = ClassAccounting {
            config,
            queued: 0,
            running: 0,
            legal: false,
            preferred: false,
        };
        accounting.reevaluate();
        accounting
    }

    fn reevaluate(&mut self) {
        self.legal = self.queued > 0 && self.running < self.config.max_threads();
        // A preferred class must also be legal, otherwise the priority scan
        // could acquire past the ceiling when the threshold equals it.
        self.preferred = self.legal && self.running <= self.config.priority_threshold();
    }

    /// Record one queued task.
    pub fn post(&mut self) {
        self.queued += 1;
        self.reevaluate();
    }

    /// Move one queued task to running.
    ///
    /// Only the queue depth is asserted, not legality: the shutdown drain
    /// intentionally acquires past the ceiling.
    pub fn acquire(&mut self) {
        assert!(
            self.queued > 0,
            "acquire on class {} with an empty queue",
            self.config.class()
        );

        self.queued -= 1;
        self.running += 1;
        self.reevaluate();
    }

    /// Return the thread consumed by a running task.
    pub fn release(&mut self) {
        assert!(
            self.running > 0,
            "release on class {} with no running tasks",
            self.config.class()
        );

        self.running -= 1;
        self.reevaluate();
    }

    pub fn has_tasks(&self) -> bool {
        self.queued > 0
    }

    pub fn is_legal(&self) -> bool {
        self.legal
    }

    pub fn is_preferred(&self) -> bool {
        self.preferred
    }

    pub fn running_count(&self) -> u32 {
        self.running
    }

    pub fn queued_count(&self) -> usize {
        self.queued
    }
}
