// src/stream/job_queue.rs - Cross-thread job marshaling
//
// Transport callbacks fire on threads the control loop does not own. Anything
// they need to change is wrapped in a job and executed later, in FIFO order,
// by the control loop via `drain`.

use crate::error::Result;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Deferred action executed on the control-loop thread against its context.
pub type Job<C> = Box<dyn FnOnce(&mut C) -> Result<()> + Send>;

/// Outcome of a single drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub executed: usize,
    pub failed: usize,
}

/// Cloneable handle for queueing jobs from any thread.
pub struct JobSender<C> {
    sender: Sender<Job<C>>,
}

impl<C> Clone for JobSender<C> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<C> JobSender<C> {
    /// Queue a job. Returns `false` if the owning queue no longer exists.
    pub fn queue<F>(&self, job: F) -> bool
    where
        F: FnOnce(&mut C) -> Result<()> + Send + 'static,
    {
        if self.sender.send(Box::new(job)).is_err() {
            debug!("Job queue dropped, discarding job");
            return false;
        }
        true
    }
}

/// Multi-producer, single-consumer queue of jobs.
pub struct JobQueue<C> {
    sender: Sender<Job<C>>,
    receiver: Receiver<Job<C>>,
}

impl<C> JobQueue<C> {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }

    pub fn sender(&self) -> JobSender<C> {
        JobSender {
            sender: self.sender.clone(),
        }
    }

    /// Queue a job from the owning thread.
    pub fn queue<F>(&self, job: F)
    where
        F: FnOnce(&mut C) -> Result<()> + Send + 'static,
    {
        // Cannot fail: this queue holds the receiver.
        let _ = self.sender.send(Box::new(job));
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Run every queued job, including jobs queued while draining.
    ///
    /// A job that fails or panics is logged and skipped; the rest still run.
    pub fn drain(&self, context: &mut C) -> DrainReport {
        let mut report = DrainReport::default();

        while let Ok(job) = self.receiver.try_recv() {
            let position = report.executed;
            report.executed += 1;
            debug!("Executing job {} ({} queued)", position, self.receiver.len());

            match catch_unwind(AssertUnwindSafe(|| job(&mut *context))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("Job {position} failed: {e}");
                    report.failed += 1;
                }
                Err(_) => {
                    error!("Job {position} panicked");
                    report.failed += 1;
                }
            }
        }

        report
    }
}

impl<C> Default for JobQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}
