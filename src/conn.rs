//! One TCP connection: handshake, send, receive loop, and idempotent
//! teardown. A `Connection` owns its socket and its [`Statistics`] record;
//! everything else (reference name, handlers, timeouts) is supplied by the
//! embedder at construction.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Local;

use crate::config::SocketConfig;
use crate::error::ConnError;
use crate::frame::{self, FRAME_LEN};
use crate::logger::{Logger, Severity};
use crate::stats::Statistics;

const LOG_TARGET: &str = "msgsock::conn";

/// Invoked by the receive loop with `(reference_name, payload)` for every
/// successfully decoded inbound frame.
pub type InboundHandler = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Invoked exactly once, at the moment a connection tears down.
pub type DisconnectHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// The three-way result of a single `recv()` attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum RecvOutcome {
    /// A complete, valid frame was decoded.
    Message(String),
    /// A soft fault (timeout, short frame, CRC/timestamp error). The
    /// connection is still open.
    Empty,
    /// A fatal fault tore the connection down; the caller should stop.
    Closed,
}

struct Shared {
    stream: TcpStream,
    name: Mutex<String>,
    connected: AtomicBool,
    running: AtomicBool,
    send_seq: AtomicU32,
    /// Serializes `send()` callers (e.g. the server broadcast task and a
    /// direct embedder call) so two frames can never interleave on the wire.
    send_lock: Mutex<()>,
    last_recv_at: Mutex<Instant>,
    stats: Statistics,
    logger: Arc<dyn Logger>,
    idle_timeout: Option<Duration>,
    handle_inbound: Option<InboundHandler>,
    on_disconnected: Option<DisconnectHandler>,
    reference_name: String,
}

/// A single peer connection. Cheap to clone the handle via [`Connection::handle`];
/// the receive loop and any embedder-side `send()` calls share the same
/// underlying socket through a cloned `TcpStream` file descriptor.
pub struct Connection {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Server-side handshake: the listener has already accepted `stream`.
    /// Expects the peer's hostname as the very first frame; on success the
    /// display name becomes `hostname[peer-ip:peer-port]`.
    pub fn accept(
        stream: TcpStream,
        peer_addr: SocketAddr,
        reference_name: String,
        config: &SocketConfig,
        logger: Arc<dyn Logger>,
        handle_inbound: Option<InboundHandler>,
        on_disconnected: Option<DisconnectHandler>,
    ) -> Result<Self, ConnError> {
        stream.set_read_timeout(Some(config.socket_timeout())).ok();
        stream.set_write_timeout(Some(config.socket_timeout())).ok();

        let provisional_name = format!("[{peer_addr}]");
        let conn = Self::new(
            stream,
            provisional_name.clone(),
            config,
            logger.clone(),
            handle_inbound,
            on_disconnected,
            reference_name,
        );

        match conn.recv_once() {
            RecvOutcome::Message(hostname) => {
                let name = format!("{hostname}[{peer_addr}]");
                // Recreate the statistics window so the handshake frame
                // itself never counts toward the connection's reported
                // recv/seq accounting.
                conn.shared.stats.reset(&name);
                *conn.shared.name.lock().unwrap() = name.clone();
                logger.log(Severity::Info, LOG_TARGET, &format!("connected \"{name}\""));
                Ok(conn)
            }
            RecvOutcome::Empty | RecvOutcome::Closed => {
                let name = conn.name();
                let err = ConnError::HandshakeAborted { name };
                conn.teardown(err.to_string());
                Err(err)
            }
        }
    }

    /// Client-side dial: connects to `(server, port)` and sends the local
    /// hostname as the first frame.
    pub fn connect(
        server: &str,
        port: u16,
        config: &SocketConfig,
        logger: Arc<dyn Logger>,
        handle_inbound: Option<InboundHandler>,
        on_disconnected: Option<DisconnectHandler>,
    ) -> Result<Self, ConnError> {
        let addr_str = format!("{server}:{port}");
        let addrs: Vec<SocketAddr> = addr_str.to_socket_addrs().map_err(|source| {
            ConnError::ConnectAddr { addr: addr_str.clone(), source }
        })?.collect();

        let mut last_err: Option<ConnError> = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, config.socket_timeout()) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(config.socket_timeout())).ok();
                    stream.set_write_timeout(Some(config.socket_timeout())).ok();
                    let peer_addr = stream.peer_addr().unwrap_or(addr);
                    let name = format!("{server}[{peer_addr}]");

                    let conn = Self::new(
                        stream,
                        name.clone(),
                        config,
                        logger.clone(),
                        handle_inbound,
                        on_disconnected,
                        name.clone(),
                    );
                    logger.log(Severity::Info, LOG_TARGET, &format!("connected \"{name}\""));

                    let local_hostname = hostname::get()
                        .ok()
                        .and_then(|h| h.into_string().ok())
                        .unwrap_or_else(|| "localhost".to_string());
                    conn.send(&local_hostname);
                    return Ok(conn);
                }
                Err(source) => {
                    last_err = Some(if source.kind() == io::ErrorKind::TimedOut {
                        ConnError::ConnectTimeout { addr: addr_str.clone() }
                    } else {
                        ConnError::ConnectIo { addr: addr_str.clone(), source }
                    });
                }
            }
        }
        let err = last_err.unwrap_or(ConnError::ConnectIo {
            addr: addr_str.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"),
        });
        logger.log(Severity::Error, LOG_TARGET, &err.to_string());
        Err(err)
    }

    fn new(
        stream: TcpStream,
        display_name: String,
        config: &SocketConfig,
        logger: Arc<dyn Logger>,
        handle_inbound: Option<InboundHandler>,
        on_disconnected: Option<DisconnectHandler>,
        reference_name: String,
    ) -> Self {
        let shared = Arc::new(Shared {
            stream,
            name: Mutex::new(display_name.clone()),
            connected: AtomicBool::new(true),
            running: AtomicBool::new(false),
            send_seq: AtomicU32::new(0),
            send_lock: Mutex::new(()),
            last_recv_at: Mutex::new(Instant::now()),
            stats: Statistics::new(display_name, config.status_interval(), config.socket_timeout()),
            logger,
            idle_timeout: config.idle_timeout(),
            handle_inbound,
            on_disconnected,
            reference_name,
        });
        Self { shared, thread: Mutex::new(None) }
    }

    /// Spawn the receive loop. No-op if already running or not connected.
    pub fn start(self: &Arc<Self>) {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return;
        }
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        let handle = thread::spawn(move || this.run());
        *self.thread.lock().unwrap() = Some(handle);
    }

    fn run(&self) {
        while self.shared.running.load(Ordering::SeqCst) {
            match self.recv_once() {
                RecvOutcome::Message(payload) => {
                    if let Some(handler) = &self.shared.handle_inbound {
                        handler(&self.shared.reference_name, &payload);
                    }
                }
                RecvOutcome::Empty => continue,
                RecvOutcome::Closed => break,
            }
        }
    }

    /// Send one payload. No-op if not connected. Truncates/trims per spec
    /// §4.1 and emits a `message truncated` warning when truncation occurs.
    pub fn send(&self, payload: &str) {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return;
        }
        let (payload, truncated) = frame::prepare_payload(payload);
        if truncated {
            self.shared.logger.log(
                Severity::Warning,
                LOG_TARGET,
                &format!("message truncated \"{payload}\""),
            );
        }

        let _guard = self.shared.send_lock.lock().unwrap();
        let seq = self.shared.send_seq.load(Ordering::SeqCst);
        let wire = frame::encode(&payload, seq);

        let mut sent = 0usize;
        let mut stream = &self.shared.stream;
        while sent < FRAME_LEN {
            match stream.write(&wire[sent..]) {
                Ok(0) => {
                    self.shared.stats.on_send_err(self.shared.logger.as_ref());
                    return;
                }
                Ok(n) => sent += n,
                Err(e) if is_timeout(&e) => {
                    self.shared.stats.on_send_timeout(self.shared.logger.as_ref());
                    return;
                }
                Err(source) => {
                    let name = self.name();
                    self.teardown_io(ConnError::SendIo { name, source });
                    return;
                }
            }
        }
        self.shared.stats.on_send_ok(self.shared.logger.as_ref());
        self.shared.send_seq.store(seq.wrapping_add(1), Ordering::SeqCst);
    }

    /// Stop the connection: clear `running`, join the receive thread if
    /// alive, then (if still connected) shut down and close the socket.
    /// Does not invoke the disconnect handler — that is reserved for
    /// fault-triggered teardown.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            let _ = self.shared.stream.shutdown(Shutdown::Both);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> String {
        self.shared.name.lock().unwrap().clone()
    }

    pub fn reference_name(&self) -> &str {
        &self.shared.reference_name
    }

    // -------------------------------------------------------------------
    // Internal
    // -------------------------------------------------------------------

    /// A single handshake-style recv (also used per iteration of the
    /// receive loop).
    fn recv_once(&self) -> RecvOutcome {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return RecvOutcome::Closed;
        }

        let mut buf = [0u8; FRAME_LEN];
        let mut received = 0usize;
        let mut stream = &self.shared.stream;
        while received < FRAME_LEN {
            match stream.read(&mut buf[received..]) {
                Ok(0) => {
                    let name = self.name();
                    self.teardown(ConnError::Disconnected { name }.to_string());
                    return RecvOutcome::Closed;
                }
                Ok(n) => received += n,
                Err(e) if is_timeout(&e) => {
                    return self.handle_recv_timeout();
                }
                Err(source) => {
                    let name = self.name();
                    self.teardown_io(ConnError::RecvIo { name, source });
                    return RecvOutcome::Closed;
                }
            }
        }

        let received_at = Local::now().naive_local();
        *self.shared.last_recv_at.lock().unwrap() = Instant::now();

        match frame::decode(&buf) {
            Ok(decoded) => {
                let latency_ms = (received_at - decoded.timestamp).num_microseconds()
                    .map(|us| us as f64 / 1000.0)
                    .unwrap_or(0.0);
                self.shared.stats.on_recv_ok(decoded.seq, latency_ms, self.shared.logger.as_ref());
                RecvOutcome::Message(decoded.payload)
            }
            Err(crate::error::FrameError::Short { .. }) => {
                self.shared.stats.on_short(self.shared.logger.as_ref());
                RecvOutcome::Empty
            }
            Err(crate::error::FrameError::CrcMismatch { .. }) => {
                self.shared.stats.on_crc_err(self.shared.logger.as_ref());
                RecvOutcome::Empty
            }
            Err(crate::error::FrameError::Timestamp) => {
                self.shared.stats.on_dt_err(self.shared.logger.as_ref());
                RecvOutcome::Empty
            }
        }
    }

    fn handle_recv_timeout(&self) -> RecvOutcome {
        match self.shared.idle_timeout {
            None => RecvOutcome::Empty,
            Some(idle_timeout) => {
                let idle = self.shared.last_recv_at.lock().unwrap().elapsed();
                if idle < idle_timeout {
                    RecvOutcome::Empty
                } else {
                    let name = self.name();
                    self.teardown(ConnError::RecvTimeout { name }.to_string());
                    RecvOutcome::Closed
                }
            }
        }
    }

    fn teardown_io(&self, err: ConnError) {
        self.teardown(err.to_string());
    }

    /// Idempotent teardown. The first caller flips `connected`/`running`,
    /// logs at error severity, closes the socket, and fires the disconnect
    /// handler; later callers observe the flag already flipped and log at
    /// debug instead, so two racing teardown triggers never double-log or
    /// double-fire the disconnect handler.
    fn teardown(&self, err_msg: String) {
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            self.shared.running.store(false, Ordering::SeqCst);
            self.shared.logger.log(Severity::Error, LOG_TARGET, &err_msg);
            let _ = self.shared.stream.shutdown(Shutdown::Both);
            if let Some(handler) = &self.shared.on_disconnected {
                handler(&self.shared.reference_name);
            }
        } else {
            self.shared.logger.log(Severity::Debug, LOG_TARGET, &err_msg);
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
