//! Shared FIFO of submitted-but-unrouted tasks.

use crate::task::Task;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::time::Duration;

/// An entry in the ingress queue: a freshly submitted task, or the shutdown
/// sentinel that tells a worker to start draining.
pub enum IngressItem {
    Task(Box<dyn Task>),
    Shutdown,
}

/// Single FIFO holding submitted tasks before a worker routes them into their
/// class queue.
///
/// Decoupling submission from the class queues keeps submitters off the
/// scheduling lock and gives routed work strict precedence over fresh
/// arrivals: workers only poll here after the class queues came up empty.
#[derive(Debug)]
pub struct Ingress {
    sender: Sender<IngressItem>,
    receiver: Receiver<IngressItem>, // crossbeam Receiver is already thread-safe
}

impl Ingress {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Ingress { sender, receiver }
    }

    /// Enqueue an item. Never blocks.
    pub fn push(&self, item: IngressItem) {
        // Both endpoints live inside this struct, so the channel cannot be
        // disconnected while an Ingress exists.
        self.sender
            .send(item)
            .expect("ingress channel disconnected");
    }

    /// Dequeue the next item, waiting up to `timeout`. Returns `None` on
    /// timeout so callers can re-check the class queues.
    pub fn poll(&self, timeout: Duration) -> Option<IngressItem> {
        self.receiver.recv_timeout(timeout).ok()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for Ingress {
    fn default() -> Self {
        Self::new()
    }
}
