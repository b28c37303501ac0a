//! Cross-thread deferred-task queues.
//!
//! Two of these exist for the life of the engine: the *foreground*
//! queue (drained by the main loop — UI-facing notifications, state
//! observers) and the *audio* queue (drained by the audio loop —
//! codec resets and anything else that must touch codec state).
//!
//! ## Discipline
//!
//! - Producers push under the lock and raise the wake signal in the
//!   same critical section, so "enqueue + wake" is one atomic step.
//! - The single consumer drains the *entire* queue per tick, bounding
//!   latency to one full flush rather than one item per tick.
//! - A push that races the drain may leave the signal raised with an
//!   empty queue; the consumer then drains nothing and goes back to
//!   waiting. Tolerated.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

/// A deferred closure executed on the consumer thread.
pub type Task = Box<dyn FnOnce() + Send>;

/// Multi-producer, single-consumer queue of deferred closures.
pub struct TaskQueue {
    tasks: Mutex<Vec<Task>>,
    signal_tx: Sender<()>,
    signal_rx: Receiver<()>,
}

impl TaskQueue {
    pub fn new() -> Self {
        // Capacity 1: the signal is a level, not a count. A second
        // push while one is pending is a no-op.
        let (signal_tx, signal_rx) = bounded(1);
        Self {
            tasks: Mutex::new(Vec::new()),
            signal_tx,
            signal_rx,
        }
    }

    /// Enqueue a task and wake the consumer.
    pub fn push<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        tasks.push(Box::new(task));
        let _ = self.signal_tx.try_send(());
    }

    /// Block until the wake signal is raised or `timeout` elapses.
    ///
    /// Returns `true` if the signal fired. The consumer should drain
    /// regardless of the return value when it uses the timeout for
    /// periodic work.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.signal_rx.recv_timeout(timeout).is_ok()
    }

    /// Atomically take every pending task, in enqueue order.
    pub fn drain(&self) -> Vec<Task> {
        std::mem::take(&mut *self.tasks.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
