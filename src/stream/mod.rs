//! The **stream** module pushes tracked-device poses to a remote endpoint as a
//! continuous stream of encoded frames. It is driven entirely by the host
//! application's loop: nothing here blocks, and every piece of shared state is
//! mutated on the thread that calls [`FrameStreamer::tick`](streamer::FrameStreamer::tick).
//!
//! # Architecture
//!
//! Each tick runs four steps in a fixed order:
//!
//! 1. `ConnectionController::tick`: count down the retry timer, start a connect when it runs out
//! 2. `JobQueue::drain`: apply transport events marshaled from I/O threads
//! 3. `FrameQueue::encode`: move at most one frame from the encode stage
//! 4. `FrameQueue::send`: move at most one encoded frame to the active socket
//!
//! ## Key Components
//!
//! - `FrameProducer`: rate gate in front of the queue; keyframes always pass
//! - `FrameQueue`: two-stage encode/send queue with per-stage concurrency caps
//! - `ConnectionController`: Idle/Connecting/Connected, round-robin hosts, fixed retry
//! - `JobQueue`: FIFO of closures queued from any thread, executed on the loop thread
//! - `Transport`/`Socket`: pluggable network port; `TcpTransport` is built in
//! - `DeviceSlots`: per-controller views, created lazily by slot index
//!
//! ## Thread Model
//!
//! | Thread | Owns | Talks to the loop through |
//! |--------|------|---------------------------|
//! | Control loop | queues, controller state, device slots | - |
//! | `frame-encoderN` | one frame at a time | encoded-output channel |
//! | `tcp-socket:{host}` | connect, then reads | `EventSink` -> job queue |
//! | `tcp-writer:{host}` | bounded outbound frame channel | `SendCompletion` after each flush |
//!
//! ## Backpressure
//!
//! | Point | Policy |
//! |-------|--------|
//! | Producer | Non-keyframes closer than `1 / send_frame_rate` are dropped |
//! | Encode stage | At most `max_encode_concurrent` in flight; latest-only drops stale frames |
//! | Send stage | At most `max_send_concurrent` in flight; latest-only drops stale outputs |
//! | Failed send | Counted and dropped, never requeued |
//!
//! # Example
//!
//! ```rust,ignore
//! let config = StreamerConfig::new()
//!     .set_hosts(["10.0.0.2:8181", "10.0.0.3:8181"])
//!     .set_only_send_latest(true);
//!
//! let mut streamer: FrameStreamer<JoysticksFrame, String> =
//!     FrameStreamer::json(config, Arc::new(TcpTransport::new()))?;
//!
//! loop {
//!     streamer.send(sample_joysticks());
//!     streamer.tick_now();
//!     std::thread::sleep(Duration::from_millis(16));
//! }
//! ```
//!
//! **Feature Flags**: `TcpTransport` needs `tcp`; `FrameStreamer::json` needs `json`.

pub mod config;
pub mod connection;
pub mod devices;
pub mod frame;
pub mod frame_queue;
pub mod job_queue;
pub mod producer;
pub mod streamer;
#[cfg(feature = "tcp")]
pub mod tcp;
pub mod transport;
