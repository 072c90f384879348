//! # pose-streamer
//!
//! Streams device poses (joysticks, tracked controllers) from a realtime loop to
//! one of several remote hosts, with bounded concurrency, a frame-rate gate and
//! automatic reconnection.
//!
//! ```rust,ignore
//! use pose_streamer::{FrameStreamer, JoysticksFrame, StreamerConfig, TcpTransport};
//! use std::sync::Arc;
//!
//! let mut streamer: FrameStreamer<JoysticksFrame, String> =
//!     FrameStreamer::json(StreamerConfig::new(), Arc::new(TcpTransport::new()))?;
//! streamer.send(JoysticksFrame::default());
//! streamer.tick_now();
//! ```
//!
//! See the [`stream`] module for the architecture.

pub mod error;
pub mod stream;

pub use error::{Error, Result};
pub use stream::config::StreamerConfig;
pub use stream::connection::{ConnectionController, ConnectionState};
pub use stream::devices::{DeviceSlots, DeviceView, SlotResult};
pub use stream::frame::{
    ControllerFrame, JoystickFrame, JoysticksFrame, KeyFrame, Payload, Quat, Vec3,
};
pub use stream::frame_queue::{FrameQueue, QueueStats, SendCompletion};
pub use stream::job_queue::{JobQueue, JobSender};
pub use stream::producer::FrameProducer;
pub use stream::streamer::{FrameStreamer, StreamStats};
#[cfg(feature = "tcp")]
pub use stream::tcp::TcpTransport;
pub use stream::transport::{EventSink, Message, Socket, Transport, TransportEvent};
