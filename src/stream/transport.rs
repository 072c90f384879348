// src/stream/transport.rs - Transport port
//
// The controller only needs three things from a transport: start an
// asynchronous connect, push encoded frames through an open socket, and
// report lifecycle events from whatever thread the transport runs on.

use crate::error::Result;
use crate::stream::frame::Payload;
use crate::stream::frame_queue::SendCompletion;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// Inbound message from the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
    /// Frame kind the transport does not understand.
    Other(u8),
}

/// Lifecycle and data events raised by a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Error(String),
    Close,
    Message(Message),
}

/// Receives events from transport threads.
///
/// Handlers must not block: they run on the transport's I/O thread.
#[derive(Clone)]
pub struct EventSink {
    handler: Arc<dyn Fn(TransportEvent) + Send + Sync>,
}

impl EventSink {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(TransportEvent) + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
        }
    }

    pub fn emit(&self, event: TransportEvent) {
        (self.handler)(event)
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

/// An open or opening connection to one host.
pub trait Socket: Send + Sync {
    /// Send an encoded frame. `done` must be completed once the transport is
    /// finished with the frame, successfully or not.
    fn send(&self, payload: Payload, done: SendCompletion);

    fn is_alive(&self) -> bool;

    /// Close the socket. Must be idempotent: a `Close` event is raised at most once.
    fn close(&self);
}

/// Factory for sockets.
pub trait Transport: Send + Sync {
    /// Begin connecting to `host` without blocking the caller.
    ///
    /// `Open`, `Error` and `Close` are reported later through `events`. An
    /// `Err` here means the attempt could not even be started.
    fn connect(&self, host: &str, events: EventSink) -> Result<Arc<dyn Socket>>;
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory transport used by controller and streamer tests.

    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    pub(crate) struct MockSocket {
        pub host: String,
        pub events: EventSink,
        pub sent: Mutex<Vec<Payload>>,
        pub alive: AtomicBool,
        pub close_calls: Mutex<usize>,
        pub fail_sends: AtomicBool,
    }

    impl MockSocket {
        pub fn open(&self) {
            self.alive.store(true, Ordering::Release);
            self.events.emit(TransportEvent::Open);
        }

        pub fn sent_texts(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|p| String::from_utf8_lossy(p.as_bytes()).into_owned())
                .collect()
        }
    }

    impl Socket for MockSocket {
        fn send(&self, payload: Payload, done: SendCompletion) {
            if self.fail_sends.load(Ordering::Acquire) {
                done.complete(false);
                return;
            }
            self.sent.lock().unwrap().push(payload);
            done.complete(true);
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::Acquire)
        }

        fn close(&self) {
            *self.close_calls.lock().unwrap() += 1;
            if self.alive.swap(false, Ordering::AcqRel) {
                self.events.emit(TransportEvent::Close);
            }
        }
    }

    #[derive(Default)]
    pub(crate) struct MockTransport {
        pub sockets: Mutex<Vec<Arc<MockSocket>>>,
        pub refuse: AtomicBool,
    }

    impl MockTransport {
        pub fn hosts(&self) -> Vec<String> {
            self.sockets
                .lock()
                .unwrap()
                .iter()
                .map(|s| s.host.clone())
                .collect()
        }

        pub fn last(&self) -> Arc<MockSocket> {
            self.sockets
                .lock()
                .unwrap()
                .last()
                .cloned()
                .expect("no socket created")
        }
    }

    impl Transport for MockTransport {
        fn connect(&self, host: &str, events: EventSink) -> Result<Arc<dyn Socket>> {
            if self.refuse.load(Ordering::Acquire) {
                return Err(crate::error::Error::Connect {
                    host: host.to_string(),
                    source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
                });
            }
            let socket = Arc::new(MockSocket {
                host: host.to_string(),
                events,
                sent: Mutex::new(Vec::new()),
                alive: AtomicBool::new(false),
                close_calls: Mutex::new(0),
                fail_sends: AtomicBool::new(false),
            });
            self.sockets.lock().unwrap().push(socket.clone());
            Ok(socket)
        }
    }
}
