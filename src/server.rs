//! Listens on a port, accepts clients, and fans an externally-supplied
//! outbound stream out to every connected client while routing inbound
//! frames through a user handler.

use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::SocketConfig;
use crate::conn::{Connection, DisconnectHandler, InboundHandler};
use crate::error::ServerError;
use crate::logger::{DefaultLogger, Logger, Severity};

const LOG_TARGET: &str = "msgsock::server";

/// How often the accept loop re-checks `running` while the listener has no
/// pending connection. `std::net::TcpListener` has no built-in accept
/// timeout, so the accept loop polls a non-blocking listener at this
/// cadence instead — functionally the same "on timeout continue" contract
/// as the original's `socket.settimeout` + blocking `accept()`.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Fallback payload broadcast when no `produce_outbound` is wired up.
pub const DEFAULT_OUTBOUND_PAYLOAD: &str = "test msg";

/// Called once per broadcast-loop iteration for the next outbound payload.
/// An empty string means "nothing to send this iteration".
pub type OutboundProducer = Box<dyn FnMut() -> String + Send>;

struct Tasks {
    accept: Mutex<Option<JoinHandle<()>>>,
    broadcast: Mutex<Option<JoinHandle<()>>>,
}

/// Multi-client fixed-frame message server.
pub struct MessageServer {
    listener: TcpListener,
    port: u16,
    config: SocketConfig,
    logger: Arc<dyn Logger>,
    running: Arc<AtomicBool>,
    clients: Arc<Mutex<Vec<Arc<Connection>>>>,
    handle_inbound: Option<InboundHandler>,
    produce_outbound: Arc<Mutex<Option<OutboundProducer>>>,
    tasks: Tasks,
}

impl MessageServer {
    /// Bind a listening socket on `(any-interface, port)` with address
    /// reuse, using the default logger.
    pub fn bind(port: u16) -> Result<Self, ServerError> {
        Self::bind_with(port, SocketConfig::default(), Arc::new(DefaultLogger))
    }

    /// Bind with an explicit config and logger.
    pub fn bind_with(
        port: u16,
        config: SocketConfig,
        logger: Arc<dyn Logger>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .map_err(|source| ServerError::Bind { port, source })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ServerError::SetTimeout { source })?;

        Ok(Self {
            listener,
            port,
            config,
            logger,
            running: Arc::new(AtomicBool::new(false)),
            clients: Arc::new(Mutex::new(Vec::new())),
            handle_inbound: None,
            produce_outbound: Arc::new(Mutex::new(None)),
            tasks: Tasks { accept: Mutex::new(None), broadcast: Mutex::new(None) },
        })
    }

    /// Install the handler invoked as `(reference_name, payload)` for every
    /// inbound frame from any client.
    pub fn set_handle_inbound(&mut self, handler: InboundHandler) {
        self.handle_inbound = Some(handler);
    }

    /// Install the producer polled once per broadcast iteration. `None`
    /// (the default) falls back to the literal `"test msg"` payload.
    pub fn set_produce_outbound(&mut self, producer: OutboundProducer) {
        *self.produce_outbound.lock().unwrap() = Some(producer);
    }

    pub fn local_port(&self) -> u16 {
        self.port
    }

    /// Snapshot of currently tracked client connections (live or recently
    /// disconnected; stale entries are pruned lazily by `stop`).
    pub fn clients(&self) -> Vec<Arc<Connection>> {
        self.clients.lock().unwrap().clone()
    }

    /// Launch the accept task and the broadcast task.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let accept_handle = {
            let this = Arc::clone(self);
            thread::spawn(move || this.accept_loop())
        };
        *self.tasks.accept.lock().unwrap() = Some(accept_handle);

        let broadcast_handle = {
            let this = Arc::clone(self);
            thread::spawn(move || this.broadcast_loop())
        };
        *self.tasks.broadcast.lock().unwrap() = Some(broadcast_handle);
    }

    /// Clear `running` (letting both background tasks observe it at their
    /// next poll), join them, then stop every tracked client in turn.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.tasks.accept.lock().unwrap().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.tasks.broadcast.lock().unwrap().take() {
            let _ = handle.join();
        }
        for client in self.clients.lock().unwrap().iter() {
            client.stop();
        }
    }

    fn accept_loop(&self) {
        let local_addr = self.listener.local_addr().ok();
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        let display_name = match local_addr {
            Some(addr) => format!("{host}[{}:{}]", addr.ip(), addr.port()),
            None => format!("{host}[:{}]", self.port),
        };
        self.logger.log(
            Severity::Warning,
            LOG_TARGET,
            &format!("accepting client connections \"{display_name}\""),
        );

        while self.running.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    self.spawn_client(stream, peer_addr, &display_name);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(source) => {
                    self.logger.log(
                        Severity::Error,
                        LOG_TARGET,
                        &format!("accept error \"{display_name}\": {source}"),
                    );
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }
    }

    fn spawn_client(&self, stream: TcpStream, peer_addr: std::net::SocketAddr, display_name: &str) {
        let handle_inbound = self.handle_inbound.clone();
        let on_disconnected: Option<DisconnectHandler> = None;
        match Connection::accept(
            stream,
            peer_addr,
            display_name.to_string(),
            &self.config,
            self.logger.clone(),
            handle_inbound,
            on_disconnected,
        ) {
            Ok(conn) => {
                let conn = Arc::new(conn);
                conn.start();
                self.clients.lock().unwrap().push(conn);
            }
            Err(_) => {
                // Already logged by Connection::accept (connection aborted).
            }
        }
    }

    fn broadcast_loop(&self) {
        while self.running.load(Ordering::SeqCst) {
            let payload = {
                let mut producer = self.produce_outbound.lock().unwrap();
                match producer.as_mut() {
                    Some(f) => f(),
                    None => DEFAULT_OUTBOUND_PAYLOAD.to_string(),
                }
            };
            if !payload.is_empty() {
                let snapshot = self.clients.lock().unwrap().clone();
                for client in snapshot {
                    if client.is_running() {
                        client.send(&payload);
                    }
                }
            }
        }
    }
}
