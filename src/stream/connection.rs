// src/stream/connection.rs - Connection lifecycle
//
// Idle -> Connecting -> Connected -> (error/close) -> Idle
//
// - Round-robin over the configured hosts, advancing on every attempt
// - Fixed retry interval, counted down by the control-loop tick
// - Transport events are marshaled through the job queue; only the
//   "no longer connecting" flag is flipped directly on the transport thread
// - Every socket gets a generation; events from an older generation are ignored

use crate::error::{Error, Result};
use crate::stream::config::StreamerConfig;
use crate::stream::job_queue::JobSender;
use crate::stream::transport::{EventSink, Message, Socket, Transport, TransportEvent};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket; counting down to the next attempt.
    Idle,
    /// Socket created, handshake in flight.
    Connecting,
    /// Socket open and used for sends.
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Receives every status line.
pub type StatusSink = Box<dyn FnMut(&str) + Send>;

/// Shared slot holding the socket sends go through.
///
/// Written only by the control loop; read by the send stage.
#[derive(Clone, Default)]
pub struct ActiveSocket {
    slot: Arc<RwLock<Option<Arc<dyn Socket>>>>,
}

impl ActiveSocket {
    pub fn get(&self) -> Option<Arc<dyn Socket>> {
        match self.slot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_set(&self) -> bool {
        self.get().is_some()
    }

    fn replace(&self, socket: Option<Arc<dyn Socket>>) -> Option<Arc<dyn Socket>> {
        let mut guard = match self.slot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, socket)
    }
}

pub struct ConnectionController {
    hosts: Vec<String>,
    /// Index of the host used by the latest attempt; `None` before the first one.
    current_host: Option<usize>,
    retry_interval: Duration,
    retry_timeout: Duration,
    connecting: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    pending: Option<Arc<dyn Socket>>,
    active: ActiveSocket,
    transport: Arc<dyn Transport>,
    jobs: JobSender<ConnectionController>,
    status: String,
    status_sink: Option<StatusSink>,
}

impl ConnectionController {
    pub fn new(
        config: &StreamerConfig,
        transport: Arc<dyn Transport>,
        jobs: JobSender<ConnectionController>,
    ) -> Self {
        Self {
            hosts: config.hosts().to_vec(),
            current_host: None,
            retry_interval: config.retry_interval(),
            retry_timeout: config.initial_retry_delay(),
            connecting: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            pending: None,
            active: ActiveSocket::default(),
            transport,
            jobs,
            status: String::new(),
            status_sink: None,
        }
    }

    pub fn set_status_sink(&mut self, sink: StatusSink) {
        self.status_sink = Some(sink);
    }

    pub fn set_hosts(&mut self, hosts: Vec<String>) {
        self.hosts = hosts;
    }

    pub fn set_host(&mut self, host: impl Into<String>) {
        self.hosts = vec![host.into()];
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Host picked by the most recent connect attempt.
    pub fn current_host(&self) -> Option<&str> {
        self.current_host
            .and_then(|index| self.hosts.get(index))
            .map(String::as_str)
    }

    pub fn state(&self) -> ConnectionState {
        if self.active.is_set() {
            ConnectionState::Connected
        } else if self.connecting.load(Ordering::Acquire) {
            ConnectionState::Connecting
        } else {
            ConnectionState::Idle
        }
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn retry_timeout(&self) -> Duration {
        self.retry_timeout
    }

    /// Handle to the socket the send stage writes to.
    pub fn active_socket(&self) -> ActiveSocket {
        self.active.clone()
    }

    /// Count down while disconnected and start an attempt once the timeout has run out.
    pub fn tick(&mut self, elapsed: Duration) {
        if self.active.is_set() {
            return;
        }

        if self.retry_timeout.is_zero() {
            if let Err(e) = self.connect() {
                debug!("Connect attempt failed: {e}");
            }
            self.retry_timeout = self.retry_interval;
        } else {
            self.retry_timeout = self.retry_timeout.saturating_sub(elapsed);
        }
    }

    /// Start connecting to the next host in rotation.
    ///
    /// Does nothing while a socket is open or a connect is already in flight.
    pub fn connect(&mut self) -> Result<()> {
        if self.active.is_set() || self.connecting.load(Ordering::Acquire) {
            return Ok(());
        }

        if self.hosts.is_empty() {
            self.set_status(Error::NoHosts.to_string());
            return Err(Error::NoHosts);
        }

        // A socket whose close is still being marshaled is superseded.
        if let Some(stale) = self.pending.take() {
            if stale.is_alive() {
                stale.close();
            }
        }

        let index = self
            .current_host
            .map_or(0, |index| (index + 1) % self.hosts.len());
        self.current_host = Some(index);
        let host = self.hosts[index].clone();

        self.set_status(format!("Connecting to {host}..."));
        info!("Trying to connect to: {host}");

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.connecting.store(true, Ordering::Release);

        match self.transport.connect(&host, self.event_sink(generation)) {
            Ok(socket) => {
                self.pending = Some(socket);
                Ok(())
            }
            Err(e) => {
                self.connecting.store(false, Ordering::Release);
                self.set_status(format!("Error: {e}"));
                Err(e)
            }
        }
    }

    /// Apply a transport event. Runs on the control-loop thread.
    pub fn handle_event(&mut self, generation: u64, event: TransportEvent) -> Result<()> {
        if generation != self.generation.load(Ordering::Acquire) {
            debug!("Ignoring {event:?} from stale connection {generation}");
            return Ok(());
        }

        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Error(message) => self.on_error(&message, true),
            TransportEvent::Close => self.on_error("Closed", true),
            TransportEvent::Message(Message::Text(text)) => info!("Message: {text}"),
            TransportEvent::Message(Message::Binary(data)) => {
                self.set_status(format!("Binary Message: {} bytes", data.len()))
            }
            TransportEvent::Message(Message::Other(kind)) => {
                self.on_error(&Error::UnknownMessageKind(kind).to_string(), false)
            }
        }
        Ok(())
    }

    /// Close whatever socket exists. Further events from it are ignored.
    pub fn shutdown(&mut self) {
        let active = self.active.replace(None);
        let pending = self.pending.take();
        for socket in active.into_iter().chain(pending) {
            socket.close();
        }
        self.invalidate();
        info!("Connection shut down");
    }

    fn on_open(&mut self) {
        let Some(socket) = self.pending.take() else {
            warn!("Open event without a pending socket");
            return;
        };
        self.active.replace(Some(socket));
        self.connecting.store(false, Ordering::Release);
        self.set_status("Connected".to_string());
    }

    fn on_error(&mut self, message: &str, close: bool) {
        warn!("Error: {message}");
        self.set_status(format!("Error: {message}"));

        if close {
            let active = self.active.replace(None);
            let pending = self.pending.take();
            for socket in active.into_iter().chain(pending) {
                // Closing a socket that is already closing would re-enter here.
                if socket.is_alive() {
                    socket.close();
                }
            }
            self.invalidate();
        }
    }

    /// Forget the current socket: clear the connecting flag and retire its generation.
    fn invalidate(&mut self) {
        self.connecting.store(false, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn event_sink(&self, generation: u64) -> EventSink {
        let jobs = self.jobs.clone();
        let connecting = self.connecting.clone();
        let current = self.generation.clone();
        EventSink::new(move |event| {
            if event == TransportEvent::Close && current.load(Ordering::Acquire) == generation {
                connecting.store(false, Ordering::Release);
            }
            jobs.queue(move |controller: &mut ConnectionController| {
                controller.handle_event(generation, event)
            });
        })
    }

    fn set_status(&mut self, status: String) {
        info!("stream status: {status}");
        if let Some(sink) = self.status_sink.as_mut() {
            sink(&status);
        }
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::job_queue::JobQueue;
    use crate::stream::transport::mock::MockTransport;
    use bytes::Bytes;
    use std::sync::Mutex;

    struct Harness {
        controller: ConnectionController,
        jobs: JobQueue<ConnectionController>,
        transport: Arc<MockTransport>,
    }

    impl Harness {
        fn new(config: StreamerConfig) -> Self {
            let jobs = JobQueue::new();
            let transport = Arc::new(MockTransport::default());
            let controller = ConnectionController::new(&config, transport.clone(), jobs.sender());
            Self {
                controller,
                jobs,
                transport,
            }
        }

        fn immediate(hosts: &[&str]) -> Self {
            Self::new(
                StreamerConfig::new()
                    .set_hosts(hosts.iter().copied())
                    .set_initial_retry_delay(Duration::ZERO)
                    .set_retry_interval(Duration::ZERO),
            )
        }

        fn drain(&mut self) {
            self.jobs.drain(&mut self.controller);
        }

        fn connect_now(&mut self) {
            self.controller.tick(Duration::ZERO);
            self.transport.last().open();
            self.drain();
        }
    }

    #[test]
    fn test_connect_then_open() {
        let mut h = Harness::immediate(&["a:1"]);
        assert_eq!(h.controller.state(), ConnectionState::Idle);

        h.controller.tick(Duration::ZERO);
        assert_eq!(h.controller.state(), ConnectionState::Connecting);
        assert_eq!(h.controller.status(), "Connecting to a:1...");

        // Open is only applied once the job queue is drained.
        h.transport.last().open();
        assert_eq!(h.controller.state(), ConnectionState::Connecting);
        h.drain();

        assert_eq!(h.controller.state(), ConnectionState::Connected);
        assert_eq!(h.controller.status(), "Connected");
        assert!(h.controller.active_socket().is_set());
    }

    #[test]
    fn test_host_rotation_wraps() {
        let mut h = Harness::immediate(&["A", "B"]);
        for _ in 0..4 {
            h.controller.tick(Duration::ZERO);
            let socket = h.transport.last();
            socket.events.emit(TransportEvent::Error("refused".to_string()));
            socket.events.emit(TransportEvent::Close);
            h.drain();
            assert_eq!(h.controller.state(), ConnectionState::Idle);
        }
        assert_eq!(h.transport.hosts(), vec!["A", "B", "A", "B"]);
        assert_eq!(h.controller.current_host(), Some("B"));
    }

    #[test]
    fn test_single_host_is_retried() {
        let mut h = Harness::immediate(&["only"]);
        for _ in 0..3 {
            h.controller.tick(Duration::ZERO);
            h.transport.last().events.emit(TransportEvent::Close);
            h.drain();
        }
        assert_eq!(h.transport.hosts(), vec!["only", "only", "only"]);
    }

    #[test]
    fn test_retry_countdown() {
        let mut h = Harness::new(
            StreamerConfig::new()
                .set_host("a:1")
                .set_initial_retry_delay(Duration::from_secs(1))
                .set_retry_interval(Duration::from_secs(5)),
        );

        h.controller.tick(Duration::from_millis(600));
        h.controller.tick(Duration::from_millis(600));
        assert!(h.controller.retry_timeout().is_zero());
        assert!(h.transport.hosts().is_empty());

        h.controller.tick(Duration::from_millis(16));
        assert_eq!(h.transport.hosts().len(), 1);
        assert_eq!(h.controller.retry_timeout(), Duration::from_secs(5));

        // Connect failed: nothing happens until the interval elapses again.
        h.transport.last().events.emit(TransportEvent::Close);
        h.drain();
        h.controller.tick(Duration::from_secs(4));
        h.controller.tick(Duration::from_millis(500));
        assert_eq!(h.transport.hosts().len(), 1);
        h.controller.tick(Duration::from_secs(1));
        h.controller.tick(Duration::from_millis(16));
        assert_eq!(h.transport.hosts().len(), 2);
    }

    #[test]
    fn test_no_attempt_while_connecting() {
        let mut h = Harness::immediate(&["a", "b"]);
        h.controller.tick(Duration::ZERO);
        h.controller.tick(Duration::ZERO);
        h.controller.tick(Duration::ZERO);
        assert_eq!(h.transport.hosts(), vec!["a"]);
    }

    #[test]
    fn test_no_countdown_while_connected() {
        let mut h = Harness::new(
            StreamerConfig::new()
                .set_host("a")
                .set_initial_retry_delay(Duration::ZERO)
                .set_retry_interval(Duration::from_secs(5)),
        );
        h.connect_now();
        h.controller.tick(Duration::from_secs(60));
        assert_eq!(h.controller.retry_timeout(), Duration::from_secs(5));
        assert_eq!(h.transport.hosts().len(), 1);
    }

    #[test]
    fn test_empty_hosts_reported_and_retried() {
        let mut h = Harness::immediate(&[]);
        h.controller.tick(Duration::ZERO);
        assert_eq!(h.controller.status(), "No hosts specified");
        assert_eq!(h.controller.state(), ConnectionState::Idle);

        h.controller.set_host("late:1");
        h.controller.tick(Duration::ZERO);
        assert_eq!(h.transport.hosts(), vec!["late:1"]);
    }

    #[test]
    fn test_transport_refusal_stays_idle() {
        let mut h = Harness::immediate(&["a"]);
        h.transport.refuse.store(true, Ordering::Release);
        h.controller.tick(Duration::ZERO);
        assert_eq!(h.controller.state(), ConnectionState::Idle);
        assert!(h.controller.status().starts_with("Error: Failed to connect to a"));
    }

    #[test]
    fn test_close_flips_connecting_before_drain() {
        let mut h = Harness::immediate(&["a"]);
        h.controller.tick(Duration::ZERO);
        h.transport.last().events.emit(TransportEvent::Close);
        assert_eq!(h.controller.state(), ConnectionState::Idle);
        assert_eq!(h.jobs.len(), 1);
    }

    #[test]
    fn test_error_closes_socket_once() {
        let mut h = Harness::immediate(&["a"]);
        h.connect_now();
        let socket = h.transport.last();

        socket
            .events
            .emit(TransportEvent::Error("connection reset".to_string()));
        h.drain();

        assert_eq!(h.controller.state(), ConnectionState::Idle);
        assert!(!h.controller.active_socket().is_set());
        assert_eq!(*socket.close_calls.lock().unwrap(), 1);
        // The close the socket raised in response is stale and ignored.
        h.drain();
        assert_eq!(*socket.close_calls.lock().unwrap(), 1);
        assert_eq!(h.controller.status(), "Error: connection reset");
    }

    #[test]
    fn test_stale_events_ignored_after_reconnect() {
        let mut h = Harness::immediate(&["a", "b"]);
        h.controller.tick(Duration::ZERO);
        let first = h.transport.last();
        first.events.emit(TransportEvent::Close);

        // Reconnect before the close job has been drained.
        h.controller.tick(Duration::ZERO);
        assert_eq!(h.transport.hosts(), vec!["a", "b"]);
        first.events.emit(TransportEvent::Open);
        h.drain();

        assert_eq!(h.controller.state(), ConnectionState::Connecting);
        h.transport.last().open();
        h.drain();
        assert_eq!(h.controller.state(), ConnectionState::Connected);
        assert_eq!(h.controller.current_host(), Some("b"));
    }

    #[test]
    fn test_messages_update_status() {
        let mut h = Harness::immediate(&["a"]);
        h.connect_now();
        let socket = h.transport.last();

        socket
            .events
            .emit(TransportEvent::Message(Message::Binary(Bytes::from_static(&[1, 2, 3]))));
        h.drain();
        assert_eq!(h.controller.status(), "Binary Message: 3 bytes");

        socket
            .events
            .emit(TransportEvent::Message(Message::Text("hello".to_string())));
        h.drain();
        assert_eq!(h.controller.status(), "Binary Message: 3 bytes");

        socket.events.emit(TransportEvent::Message(Message::Other(9)));
        h.drain();
        assert_eq!(h.controller.status(), "Error: Unknown message kind 9");
        assert_eq!(h.controller.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_status_sink_receives_updates() {
        let mut h = Harness::immediate(&["a"]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        h.controller
            .set_status_sink(Box::new(move |status| log.lock().unwrap().push(status.to_string())));

        h.connect_now();
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["Connecting to a...".to_string(), "Connected".to_string()]
        );
    }

    #[test]
    fn test_shutdown_closes_active_socket() {
        let mut h = Harness::immediate(&["a"]);
        h.connect_now();
        let socket = h.transport.last();

        h.controller.shutdown();
        assert_eq!(*socket.close_calls.lock().unwrap(), 1);
        assert_eq!(h.controller.state(), ConnectionState::Idle);
        h.drain();
        assert_eq!(h.controller.state(), ConnectionState::Idle);
    }
}
