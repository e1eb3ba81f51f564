//! Reliable fixed-length message transport over TCP/IP.
//!
//! A peer either listens ([`MessageServer`]) or dials (a single
//! [`Connection`]). Frames are a fixed 162-byte ASCII record (§3 of the
//! wire spec): CRC-32 header, sequence number, timestamp, and a
//! space-padded payload. See [`frame`] for the codec, [`stats`] for the
//! per-connection counters and latency aggregates, and [`conn`] / [`server`]
//! for connection lifecycle and the multi-client server.

pub mod config;
pub mod conn;
pub mod error;
pub mod frame;
pub mod logger;
pub mod server;
pub mod stats;

pub use config::SocketConfig;
pub use conn::{Connection, DisconnectHandler, InboundHandler, RecvOutcome};
pub use error::{ConnError, FrameError, ServerError};
pub use frame::{Decoded, FRAME_LEN, PAYLOAD_LEN};
pub use logger::{DefaultLogger, Logger, Severity};
pub use server::{MessageServer, OutboundProducer};
pub use stats::{Report, Statistics};
