// src/stream/frame_queue.rs - Two-stage (encode -> send) frame queue
//
// Core features:
// - Independent encode and send stages, each with its own concurrency cap
// - Optional latest-only policy: stale pending items are dropped, never reordered
// - At most one item advanced per call; the control loop drives both stages every tick
// - Asynchronous encode on a small pool of named worker threads
// - Encoded outputs are appended to the send stage on the control-loop thread only

use crate::error::Result;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, error, warn};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

pub const DEFAULT_MAX_ENCODE_CONCURRENT: usize = 3;
pub const DEFAULT_MAX_SEND_CONCURRENT: usize = 3;

/// Encoder port: turns an input frame into its wire representation.
pub type EncodeFn<I, O> = Arc<dyn Fn(I) -> Result<O> + Send + Sync>;

/// Sender port: hands an encoded frame to the transport. The completion must be
/// fired (or dropped) once the transport is done with the item.
pub type SendFn<O> = Box<dyn Fn(O, SendCompletion) + Send>;

#[derive(Default)]
struct QueueCounters {
    dropped_frames: AtomicU64,
    encode_failures: AtomicU64,
    sent: AtomicU64,
    send_failures: AtomicU64,
}

/// Completion token for a single in-flight send.
///
/// Releases the send slot exactly once: either through [`complete`](SendCompletion::complete)
/// or, if the transport loses the token, when it is dropped (counted as a failure).
pub struct SendCompletion {
    in_flight: Arc<AtomicUsize>,
    counters: Arc<QueueCounters>,
    released: bool,
}

impl SendCompletion {
    fn new(in_flight: Arc<AtomicUsize>, counters: Arc<QueueCounters>) -> Self {
        Self {
            in_flight,
            counters,
            released: false,
        }
    }

    /// Report the outcome of the send and free its concurrency slot.
    ///
    /// Failed sends are not retried or requeued.
    pub fn complete(mut self, success: bool) {
        self.release(success);
    }

    fn release(&mut self, success: bool) {
        if self.released {
            return;
        }
        self.released = true;
        if success {
            self.counters.sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Drop for SendCompletion {
    fn drop(&mut self) {
        if !self.released {
            debug!("Send completion dropped without being fired, releasing slot");
            self.release(false);
        }
    }
}

/// Snapshot of queue depth and counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending_encode: usize,
    pub pending_send: usize,
    pub encode_in_flight: usize,
    pub send_in_flight: usize,
    /// Items discarded by the latest-only policy.
    pub dropped_frames: u64,
    pub encode_failures: u64,
    pub sent: u64,
    pub send_failures: u64,
}

/// Staged frame queue
///
/// `push` never blocks. `encode` and `send` each advance at most one item and
/// are no-ops while their stage is at its concurrency cap.
///
/// The two pending sequences are only touched from the thread that owns the
/// queue; the in-flight counters are the only state shared with worker and
/// transport threads.
pub struct FrameQueue<I, O> {
    encode_queue: VecDeque<I>,
    send_queue: VecDeque<O>,
    max_encode_concurrent: usize,
    max_send_concurrent: usize,
    encode_concurrent: Arc<AtomicUsize>,
    send_concurrent: Arc<AtomicUsize>,
    only_send_latest: bool,
    encoder: EncodeFn<I, O>,
    sender: SendFn<O>,
    encoded_sender: Sender<O>,
    encoded_receiver: Receiver<O>,
    workers: Option<EncodeWorkers<I>>,
    counters: Arc<QueueCounters>,
}

impl<I, O> FrameQueue<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn new<E, S>(encoder: E, sender: S) -> Self
    where
        E: Fn(I) -> Result<O> + Send + Sync + 'static,
        S: Fn(O, SendCompletion) + Send + 'static,
    {
        let (encoded_sender, encoded_receiver) = crossbeam_channel::unbounded();
        Self {
            encode_queue: VecDeque::with_capacity(16),
            send_queue: VecDeque::with_capacity(16),
            max_encode_concurrent: DEFAULT_MAX_ENCODE_CONCURRENT,
            max_send_concurrent: DEFAULT_MAX_SEND_CONCURRENT,
            encode_concurrent: Arc::new(AtomicUsize::new(0)),
            send_concurrent: Arc::new(AtomicUsize::new(0)),
            only_send_latest: false,
            encoder: Arc::new(encoder),
            sender: Box::new(sender),
            encoded_sender,
            encoded_receiver,
            workers: None,
            counters: Arc::new(QueueCounters::default()),
        }
    }

    /// Sets the maximum number of encodes in flight (minimum 1).
    pub fn set_max_encode_concurrent(mut self, max: usize) -> Self {
        self.max_encode_concurrent = max.max(1);
        self
    }

    /// Sets the maximum number of sends in flight (minimum 1).
    pub fn set_max_send_concurrent(mut self, max: usize) -> Self {
        self.max_send_concurrent = max.max(1);
        self
    }

    /// When enabled, a stage holding more than one pending item keeps only the
    /// most recent one at dequeue time.
    pub fn set_only_send_latest(mut self, only_send_latest: bool) -> Self {
        self.only_send_latest = only_send_latest;
        self
    }

    pub fn only_send_latest(&self) -> bool {
        self.only_send_latest
    }

    /// Append a frame to the encode stage. Ownership moves into the queue.
    pub fn push(&mut self, frame: I) {
        self.encode_queue.push_back(frame);
    }

    /// Advance at most one frame from the encode stage.
    ///
    /// With `asynchronous` the frame is encoded on a worker thread and its
    /// output shows up in the send stage on a later call.
    pub fn encode(&mut self, asynchronous: bool) {
        self.collect_encoded();

        if self.encode_concurrent.load(Ordering::Acquire) >= self.max_encode_concurrent {
            return;
        }
        if self.encode_queue.is_empty() {
            return;
        }
        if self.only_send_latest {
            let dropped = truncate_to_latest(&mut self.encode_queue);
            self.count_dropped(dropped);
        }
        let Some(frame) = self.encode_queue.pop_front() else {
            return;
        };

        self.encode_concurrent.fetch_add(1, Ordering::AcqRel);

        let frame = if asynchronous {
            match self.submit_to_workers(frame) {
                Ok(()) => return,
                Err(frame) => frame,
            }
        } else {
            frame
        };

        let output = encode_frame(&self.encoder, frame, &self.counters);
        self.encode_concurrent.fetch_sub(1, Ordering::AcqRel);
        if let Some(output) = output {
            self.send_queue.push_back(output);
        }
    }

    /// Advance at most one encoded item to the sender port.
    pub fn send(&mut self) {
        self.collect_encoded();

        if self.send_concurrent.load(Ordering::Acquire) >= self.max_send_concurrent {
            return;
        }
        if self.send_queue.is_empty() {
            return;
        }
        if self.only_send_latest {
            let dropped = truncate_to_latest(&mut self.send_queue);
            self.count_dropped(dropped);
        }
        let Some(item) = self.send_queue.pop_front() else {
            return;
        };

        self.send_concurrent.fetch_add(1, Ordering::AcqRel);
        let completion = SendCompletion::new(self.send_concurrent.clone(), self.counters.clone());
        (self.sender)(item, completion);
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending_encode: self.encode_queue.len(),
            pending_send: self.pending_send(),
            encode_in_flight: self.encode_in_flight(),
            send_in_flight: self.send_in_flight(),
            dropped_frames: self.counters.dropped_frames.load(Ordering::Relaxed),
            encode_failures: self.counters.encode_failures.load(Ordering::Relaxed),
            sent: self.counters.sent.load(Ordering::Relaxed),
            send_failures: self.counters.send_failures.load(Ordering::Relaxed),
        }
    }

    pub fn pending_encode(&self) -> usize {
        self.encode_queue.len()
    }

    /// Encoded items waiting for a send slot, including outputs the encode
    /// workers have finished but the queue has not collected yet.
    pub fn pending_send(&self) -> usize {
        self.send_queue.len() + self.encoded_receiver.len()
    }

    pub fn encode_in_flight(&self) -> usize {
        self.encode_concurrent.load(Ordering::Acquire)
    }

    pub fn send_in_flight(&self) -> usize {
        self.send_concurrent.load(Ordering::Acquire)
    }

    /// Items discarded so far by the latest-only policy.
    pub fn dropped_frames(&self) -> u64 {
        self.counters.dropped_frames.load(Ordering::Relaxed)
    }

    /// Move outputs finished by the encode workers into the send stage.
    fn collect_encoded(&mut self) {
        while let Ok(output) = self.encoded_receiver.try_recv() {
            self.send_queue.push_back(output);
        }
    }

    fn count_dropped(&self, dropped: usize) {
        if dropped > 0 {
            self.counters
                .dropped_frames
                .fetch_add(dropped as u64, Ordering::Relaxed);
        }
    }

    /// Hand a frame to the worker pool, spawning it on first use.
    /// Gives the frame back if no worker can take it.
    fn submit_to_workers(&mut self, frame: I) -> std::result::Result<(), I> {
        if self.workers.is_none() {
            match EncodeWorkers::spawn(
                self.max_encode_concurrent,
                self.encoder.clone(),
                self.encoded_sender.clone(),
                self.encode_concurrent.clone(),
                self.counters.clone(),
            ) {
                Ok(workers) => self.workers = Some(workers),
                Err(e) => {
                    error!("Encode workers unavailable, encoding inline: {e}");
                    return Err(frame);
                }
            }
        }

        match self.workers.as_ref() {
            Some(workers) => workers.submit(frame),
            None => Err(frame),
        }
    }
}

/// Discard everything but the most recent item. Returns how many were dropped.
fn truncate_to_latest<T>(queue: &mut VecDeque<T>) -> usize {
    let excess = queue.len().saturating_sub(1);
    if excess > 0 {
        queue.drain(..excess);
    }
    excess
}

/// Run the encoder port, isolating errors and panics to the frame at hand.
fn encode_frame<I, O>(encoder: &EncodeFn<I, O>, frame: I, counters: &QueueCounters) -> Option<O> {
    match catch_unwind(AssertUnwindSafe(|| encoder(frame))) {
        Ok(Ok(output)) => Some(output),
        Ok(Err(e)) => {
            warn!("Failed to encode frame, dropping it: {e}");
            counters.encode_failures.fetch_add(1, Ordering::Relaxed);
            None
        }
        Err(_) => {
            error!("Encoder panicked, dropping frame");
            counters.encode_failures.fetch_add(1, Ordering::Relaxed);
            None
        }
    }
}

/// Worker threads for asynchronous encode, one per encode slot.
struct EncodeWorkers<I> {
    frame_sender: Option<Sender<I>>,
    handles: Vec<JoinHandle<()>>,
}

impl<I: Send + 'static> EncodeWorkers<I> {
    fn spawn<O: Send + 'static>(
        count: usize,
        encoder: EncodeFn<I, O>,
        output: Sender<O>,
        in_flight: Arc<AtomicUsize>,
        counters: Arc<QueueCounters>,
    ) -> Result<Self> {
        let (frame_sender, frame_receiver) = crossbeam_channel::bounded::<I>(count);
        let mut handles = Vec::with_capacity(count);

        for index in 0..count {
            let frames = frame_receiver.clone();
            let encoder = encoder.clone();
            let output = output.clone();
            let in_flight = in_flight.clone();
            let counters = counters.clone();
            let name = format!("frame-encoder{index}");
            let handle = std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    for frame in frames.iter() {
                        if let Some(encoded) = encode_frame(&encoder, frame, &counters) {
                            // Receiver is gone only when the queue itself was dropped.
                            let _ = output.send(encoded);
                        }
                        in_flight.fetch_sub(1, Ordering::AcqRel);
                    }
                    debug!("Encode worker exiting");
                });
            match handle {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!("Thread[{name}] exited with error: {e}");
                    if handles.is_empty() {
                        return Err(crate::error::Error::ThreadSpawn(name));
                    }
                    break;
                }
            }
        }

        Ok(Self {
            frame_sender: Some(frame_sender),
            handles,
        })
    }

    fn submit(&self, frame: I) -> std::result::Result<(), I> {
        let Some(sender) = self.frame_sender.as_ref() else {
            return Err(frame);
        };
        match sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(frame)) | Err(TrySendError::Disconnected(frame)) => Err(frame),
        }
    }
}

impl<I> Drop for EncodeWorkers<I> {
    fn drop(&mut self) {
        // Closing the channel ends each worker's loop once it finishes its frame.
        self.frame_sender.take();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("Encode worker terminated abnormally");
            }
        }
    }
}
