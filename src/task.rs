//! The unit of work consumed by the pool.

use crate::class::TaskClass;
use std::error::Error;

/// Error produced by a failing [`Task::execute`].
pub type TaskError = Box<dyn Error + Send + Sync>;

/// A unit of work tagged with the class that schedules it.
///
/// The pool takes ownership of a task at submission and drops it after
/// `execute` returns, errors, or panics. A failing task is contained inside
/// the worker that ran it; the failure is logged and never reaches the
/// submitter.
pub trait Task: Send {
    /// The class this task is scheduled under.
    fn class(&self) -> TaskClass;

    /// Run the task to completion.
    fn execute(&mut self) -> Result<(), TaskError>;
}

/// A [`Task`] that executes a closure supplied at construction.
pub struct ClosureTask<F> {
    class: TaskClass,
    action: F,
}

impl<F> ClosureTask<F>
where
    F: FnMut() -> Result<(), TaskError> + Send,
{
    /// Create a task of the given class that runs `action` on invocation.
    pub fn new(class: TaskClass, action: F) -> Self {
        ClosureTask { class, action }
    }
}

impl<F> Task for ClosureTask<F>
where
    F: FnMut() -> Result<(), TaskError> + Send,
{
    fn class(&self) -> TaskClass {
        self.class
    }

    fn execute(&mut self) -> Result<(), TaskError> {
        (self.action)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn closure_task_runs_action() {
        let hits = Arc::new(AtomicU32::new(0));
        let hits_clone = hits.clone();
        let mut task = ClosureTask::new(TaskClass::Medium, move || {
            hits_clone.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });

        assert_eq!(task.class(), TaskClass::Medium);
        task.execute().unwrap();
        task.execute().unwrap();
        assert_eq!(hits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn closure_task_propagates_errors() {
        let mut task = ClosureTask::new(TaskClass::Low, || Err("nope".into()));
        assert!(task.execute().is_err());
    }
}
