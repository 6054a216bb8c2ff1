//! Per-class scheduling limits and their validation.

use crate::class::TaskClass;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scheduling limits for one task class.
///
/// `priority_threshold` is the running count up to which (inclusive) the class
/// is granted priority over merely legal classes. `max_threads` is the hard
/// ceiling on concurrently running tasks of the class; it keeps one busy class
/// from starving the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassConfig {
    class: TaskClass,
    priority_threshold: u32,
    max_threads: u32,
}

impl ClassConfig {
    /// Create a validated config for one class.
    ///
    /// Rejected synchronously when `priority_threshold > max_threads` or when
    /// `max_threads` is zero.
    pub fn new(
        class: TaskClass,
        priority_threshold: u32,
        max_threads: u32,
    ) -> Result<Self, ConfigError> {
        if max_threads == 0 {
            return Err(ConfigError::ZeroMaxThreads { class });
        }
        if priority_threshold > max_threads {
            return Err(ConfigError::ThresholdAboveCeiling {
                class,
                threshold: priority_threshold,
                max_threads,
            });
        }
        Ok(ClassConfig {
            class,
            priority_threshold,
            max_threads,
        })
    }

    pub fn class(&self) -> TaskClass {
        self.class
    }

    pub fn priority_threshold(&self) -> u32 {
        self.priority_threshold
    }

    pub fn max_threads(&self) -> u32 {
        self.max_threads
    }
}

/// Construction-time configuration failures. The pool is not created when any
/// of these is returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("class {class} has priority threshold {threshold} above its max thread count {max_threads}")]
    ThresholdAboveCeiling {
        class: TaskClass,
        threshold: u32,
        max_threads: u32,
    },

    #[error("class {class} has a zero max thread count")]
    ZeroMaxThreads { class: TaskClass },

    #[error("expected {expected} class configs, got {actual}")]
    WrongClassCount { expected: usize, actual: usize },

    #[error("config at position {position} is for class {class}")]
    MisorderedClass { position: usize, class: TaskClass },

    #[error("class {class} max thread count {max_threads} exceeds the pool size {total_threads}")]
    CeilingAbovePool {
        class: TaskClass,
        max_threads: u32,
        total_threads: u32,
    },

    #[error("concurrent thread count {concurrent_threads} exceeds the pool size {total_threads}")]
    ConcurrencyAbovePool {
        concurrent_threads: u32,
        total_threads: u32,
    },

    #[error("the pool needs at least one worker thread")]
    EmptyPool,

    #[error("unpinned pools are limited to {limit} workers, got {requested}")]
    TooManyUnpinnedWorkers { limit: u32, requested: u32 },
}
