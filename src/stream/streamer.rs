// src/stream/streamer.rs - Top-level driver
//
// Tick order:
// 1. Connection countdown and connect attempt
// 2. Marshaled transport events
// 3. One encode step
// 4. One send step

use crate::error::Result;
use crate::stream::config::StreamerConfig;
use crate::stream::connection::{ConnectionController, ConnectionState, StatusSink};
use crate::stream::frame::{KeyFrame, Payload};
use crate::stream::frame_queue::{FrameQueue, QueueStats, SendCompletion};
use crate::stream::job_queue::{DrainReport, JobQueue};
use crate::stream::producer::FrameProducer;
use crate::stream::transport::Transport;
use log::{debug, info};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Point-in-time view of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamStats {
    pub state: ConnectionState,
    pub host: Option<String>,
    pub queue: QueueStats,
    /// Frames that passed the rate gate.
    pub accepted: u64,
    /// Frames dropped by the rate gate.
    pub rate_limited: u64,
}

/// Streams frames of type `I`, encoded as `O`, to the first reachable host.
///
/// The embedding application calls [`send`](FrameStreamer::send) at its frame
/// rate and [`tick`](FrameStreamer::tick) once per loop iteration. Neither call
/// blocks; network work happens on transport threads and comes back through
/// the job queue.
pub struct FrameStreamer<I, O> {
    config: StreamerConfig,
    controller: ConnectionController,
    jobs: JobQueue<ConnectionController>,
    queue: FrameQueue<I, O>,
    producer: FrameProducer,
    last_tick: Option<Instant>,
    is_shut_down: bool,
}

impl<I, O> FrameStreamer<I, O>
where
    I: KeyFrame + Send + 'static,
    O: Into<Payload> + Send + 'static,
{
    /// Creates a streamer with a custom encoder.
    ///
    /// # Returns
    ///
    /// * `Ok(FrameStreamer)` ready to be ticked; the first connect attempt is
    ///   made once the configured initial delay has elapsed.
    /// * `Err(Error::InvalidConfig)` if the configuration is out of range.
    pub fn new<E>(config: StreamerConfig, transport: Arc<dyn Transport>, encoder: E) -> Result<Self>
    where
        E: Fn(I) -> Result<O> + Send + Sync + 'static,
    {
        config.validate()?;

        let jobs = JobQueue::new();
        let controller = ConnectionController::new(&config, transport, jobs.sender());
        let active = controller.active_socket();

        let queue = FrameQueue::new(encoder, move |item: O, done: SendCompletion| {
            match active.get() {
                Some(socket) => socket.send(item.into(), done),
                None => done.complete(false),
            }
        })
        .set_max_encode_concurrent(config.max_encode_concurrent())
        .set_max_send_concurrent(config.max_send_concurrent())
        .set_only_send_latest(config.only_send_latest());

        let producer = FrameProducer::new(config.send_delay());

        info!(
            "Frame streamer created (hosts: {:?}, send rate: {} fps, only latest: {}).",
            config.hosts(),
            config.send_frame_rate(),
            config.only_send_latest()
        );

        Ok(Self {
            config,
            controller,
            jobs,
            queue,
            producer,
            last_tick: None,
            is_shut_down: false,
        })
    }

    /// Offer a frame sampled now. Returns `false` if the rate gate dropped it.
    pub fn send(&mut self, frame: I) -> bool {
        self.send_at(frame, Instant::now())
    }

    /// Offer a frame sampled at `now`.
    pub fn send_at(&mut self, frame: I, now: Instant) -> bool {
        if !self.producer.should_accept(frame.is_key_frame(), now) {
            return false;
        }
        self.queue.push(frame);
        true
    }

    /// Run one control-loop iteration.
    ///
    /// Order: connection countdown, marshaled jobs, one encode step, one send step.
    pub fn tick(&mut self, elapsed: Duration) -> DrainReport {
        self.controller.tick(elapsed);

        let report = self.jobs.drain(&mut self.controller);
        if report.failed > 0 {
            debug!("{} of {} jobs failed this tick", report.failed, report.executed);
        }

        self.queue.encode(self.config.async_encode());
        self.queue.send();
        report
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            state: self.controller.state(),
            host: self.controller.current_host().map(str::to_string),
            queue: self.queue.stats(),
            accepted: self.producer.accepted(),
            rate_limited: self.producer.rate_limited(),
        }
    }

    /// [`tick`](FrameStreamer::tick) using the wall-clock time since the previous call.
    pub fn tick_now(&mut self) -> DrainReport {
        let now = Instant::now();
        let elapsed = self
            .last_tick
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or_default();
        self.last_tick = Some(now);
        self.tick(elapsed)
    }
}

#[cfg(feature = "json")]
impl<I> FrameStreamer<I, String>
where
    I: KeyFrame + serde::Serialize + Send + 'static,
{
    /// Creates a streamer that sends each frame as pretty-printed JSON text.
    pub fn json(config: StreamerConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::new(config, transport, |frame: I| {
            Ok(serde_json::to_string_pretty(&frame)?)
        })
    }
}

impl<I, O> FrameStreamer<I, O> {
    pub fn status(&self) -> &str {
        self.controller.status()
    }

    pub fn state(&self) -> ConnectionState {
        self.controller.state()
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    pub fn set_status_sink(&mut self, sink: StatusSink) {
        self.controller.set_status_sink(sink);
    }

    /// Replace the host list; takes effect on the next connect attempt.
    pub fn set_hosts(&mut self, hosts: Vec<String>) {
        self.controller.set_hosts(hosts);
    }

    pub fn set_host(&mut self, host: impl Into<String>) {
        self.controller.set_host(host);
    }

    /// Close the connection. Also done on drop.
    pub fn shutdown(&mut self) {
        if self.is_shut_down {
            return;
        }
        self.is_shut_down = true;
        self.controller.shutdown();
        self.jobs.drain(&mut self.controller);
    }
}

impl<I, O> Drop for FrameStreamer<I, O> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
