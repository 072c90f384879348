// src/stream/tcp.rs - Built-in TCP transport
//
// Wire format, one frame per message:
//
// | Field  | Size    | Notes                          |
// |--------|---------|--------------------------------|
// | kind   | 1 byte  | 1 = text, 2 = binary           |
// | length | 4 bytes | big-endian body length         |
// | body   | length  | UTF-8 for text, raw for binary |
//
// Each socket owns one thread that connects and then reads, and one writer
// thread fed by a bounded channel. `send` only enqueues, so the control loop
// never waits on the network; the send slot is released once the frame is flushed.

use crate::error::{Error, Result};
use crate::stream::frame::Payload;
use crate::stream::frame_queue::SendCompletion;
use crate::stream::transport::{EventSink, Message, Socket, Transport, TransportEvent};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, info, warn};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const KIND_TEXT: u8 = 1;
pub const KIND_BINARY: u8 = 2;
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 5;
const OUTBOUND_CAPACITY: usize = 16;

const STATE_CONNECTING: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Write one frame.
pub fn write_frame<W: Write>(writer: &mut W, payload: &Payload) -> io::Result<()> {
    let (kind, body) = match payload {
        Payload::Text(text) => (KIND_TEXT, text.as_bytes()),
        Payload::Binary(data) => (KIND_BINARY, &data[..]),
    };
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    writer.write_u8(kind)?;
    writer.write_u32::<BigEndian>(len)?;
    writer.write_all(body)?;
    Ok(())
}

/// Read one frame. Unknown kinds are skipped over and reported as [`Message::Other`].
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Message> {
    let kind = reader.read_u8()?;
    let len = reader.read_u32::<BigEndian>()?;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds limit"),
        ));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body)?;

    match kind {
        KIND_TEXT => String::from_utf8(body)
            .map(Message::Text)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        KIND_BINARY => Ok(Message::Binary(Bytes::from(body))),
        other => Ok(Message::Other(other)),
    }
}

/// Transport that speaks the length-prefixed framing above over plain TCP.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            write_timeout: Duration::from_secs(DEFAULT_WRITE_TIMEOUT_SECS),
        }
    }

    pub fn set_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// A write stalled for longer than this fails the connection.
    pub fn set_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for TcpTransport {
    fn connect(&self, host: &str, events: EventSink) -> Result<Arc<dyn Socket>> {
        let (outbound, frames) = crossbeam_channel::bounded(OUTBOUND_CAPACITY);
        let socket = Arc::new(TcpSocket {
            host: host.to_string(),
            state: AtomicU8::new(STATE_CONNECTING),
            stream: Mutex::new(None),
            outbound: Mutex::new(Some(outbound)),
            events,
        });

        let worker = socket.clone();
        let connect_timeout = self.connect_timeout;
        let write_timeout = self.write_timeout;
        let name = format!("tcp-socket:{host}");
        std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker.run(connect_timeout, write_timeout, frames))
            .map_err(|e| {
                warn!("Thread[{name}] exited with error: {e}");
                Error::ThreadSpawn(name)
            })?;

        Ok(socket)
    }
}

/// A frame waiting for the writer thread, with the slot it holds.
type Outbound = (Payload, SendCompletion);

struct TcpSocket {
    host: String,
    state: AtomicU8,
    /// Handle kept for shutdown.
    stream: Mutex<Option<TcpStream>>,
    /// Feeds the writer thread; taken on close so the writer drains and exits.
    outbound: Mutex<Option<Sender<Outbound>>>,
    events: EventSink,
}

impl TcpSocket {
    fn run(
        self: Arc<Self>,
        connect_timeout: Duration,
        write_timeout: Duration,
        frames: Receiver<Outbound>,
    ) {
        let stream = match connect_any(&self.host, connect_timeout) {
            Ok(stream) => stream,
            Err(e) => {
                debug!("Connect to {} failed: {e}", self.host);
                self.fail(e.to_string());
                return;
            }
        };

        let (reader, writer) = match self.install(stream, write_timeout) {
            Ok(Some(halves)) => halves,
            Ok(None) => return,
            Err(e) => {
                self.fail(e.to_string());
                return;
            }
        };

        let worker = self.clone();
        let name = format!("tcp-writer:{}", self.host);
        if let Err(e) = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker.write_loop(frames, writer))
        {
            warn!("Thread[{name}] exited with error: {e}");
            self.fail(Error::ThreadSpawn(name).to_string());
            return;
        }

        info!("Connected to {}", self.host);
        self.events.emit(TransportEvent::Open);
        self.read_loop(reader);
    }

    /// Store the shutdown handle and split off reader and writer halves.
    /// `None` if the socket was closed meanwhile.
    fn install(
        &self,
        stream: TcpStream,
        write_timeout: Duration,
    ) -> Result<Option<(TcpStream, TcpStream)>> {
        stream.set_nodelay(true)?;
        if !write_timeout.is_zero() {
            stream.set_write_timeout(Some(write_timeout))?;
        }
        let reader = stream.try_clone()?;
        let writer = stream.try_clone()?;

        let mut guard = lock(&self.stream);
        if self
            .state
            .compare_exchange(STATE_CONNECTING, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let _ = stream.shutdown(Shutdown::Both);
            return Ok(None);
        }
        *guard = Some(stream);
        Ok(Some((reader, writer)))
    }

    fn read_loop(&self, stream: TcpStream) {
        let mut reader = BufReader::new(stream);
        loop {
            match read_frame(&mut reader) {
                Ok(message) => self.events.emit(TransportEvent::Message(message)),
                Err(e) => {
                    if self.state.load(Ordering::Acquire) == STATE_OPEN {
                        if e.kind() != io::ErrorKind::UnexpectedEof {
                            self.events.emit(TransportEvent::Error(e.to_string()));
                        }
                        self.close();
                    }
                    return;
                }
            }
        }
    }

    /// Write queued frames until the socket closes. Each completion fires
    /// only after its frame is flushed, so the send slot stays taken meanwhile.
    fn write_loop(&self, frames: Receiver<Outbound>, stream: TcpStream) {
        let mut writer = BufWriter::new(stream);
        for (payload, done) in frames.iter() {
            if !self.is_alive() {
                done.complete(false);
                continue;
            }
            match write_frame(&mut writer, &payload).and_then(|_| writer.flush()) {
                Ok(()) => done.complete(true),
                Err(e) => {
                    done.complete(false);
                    if self.is_alive() {
                        warn!("Send to {} failed: {e}", self.host);
                        self.fail(e.to_string());
                    }
                }
            }
        }
        debug!("Writer for {} exiting", self.host);
    }

    fn fail(&self, message: String) {
        self.events.emit(TransportEvent::Error(message));
        self.close();
    }
}

impl Socket for TcpSocket {
    /// Queue a frame for the writer thread. Never blocks: a closed socket or
    /// a full outbound queue fails the send immediately.
    fn send(&self, payload: Payload, done: SendCompletion) {
        if !self.is_alive() {
            debug!("Send to {} dropped: socket is not open", self.host);
            done.complete(false);
            return;
        }
        let outbound = lock(&self.outbound);
        let Some(sender) = outbound.as_ref() else {
            done.complete(false);
            return;
        };
        match sender.try_send((payload, done)) {
            Ok(()) => {}
            Err(TrySendError::Full((_, done))) => {
                debug!("Outbound queue for {} is full, dropping frame", self.host);
                done.complete(false);
            }
            Err(TrySendError::Disconnected((_, done))) => done.complete(false),
        }
    }

    fn is_alive(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_OPEN
    }

    fn close(&self) {
        if self.state.swap(STATE_CLOSED, Ordering::AcqRel) == STATE_CLOSED {
            return;
        }
        if let Some(stream) = lock(&self.stream).take() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!("Socket shutdown error (expected if already closed): {e:?}");
            }
        }
        lock(&self.outbound).take();
        self.events.emit(TransportEvent::Close);
    }
}

fn connect_any(host: &str, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_error = io::Error::new(
        io::ErrorKind::AddrNotAvailable,
        format!("{host} did not resolve to any address"),
    );
    for addr in host.to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = e,
        }
    }
    Err(last_error)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
