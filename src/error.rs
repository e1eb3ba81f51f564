use std::io;

use thiserror::Error;

/// Soft decode errors: counted by the statistics aggregator, never fatal.
///
/// A frame that fails one of these checks is dropped and the connection
/// stays open; the caller sees an empty `recv()`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("short frame ({len} bytes, header is {header} bytes)")]
    Short { len: usize, header: usize },

    #[error("crc mismatch (received 0x{received:08x}, computed 0x{computed:08x})")]
    CrcMismatch { received: u32, computed: u32 },

    #[error("timestamp field did not parse as an ISO-8601 local time")]
    Timestamp,
}

/// Fatal errors on a single connection. Every variant here tears the
/// connection down; soft per-frame faults live in [`FrameError`] instead.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("recv timeout \"{name}\"")]
    RecvTimeout { name: String },

    #[error("recv error \"{name}\": {source}")]
    RecvIo {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("disconnected \"{name}\"")]
    Disconnected { name: String },

    #[error("send error \"{name}\": {source}")]
    SendIo {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("connection aborted \"{name}\"")]
    HandshakeAborted { name: String },

    #[error("connection timeout \"{addr}\"")]
    ConnectTimeout { addr: String },

    #[error("server address error \"{addr}\": {source}")]
    ConnectAddr {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connection error \"{addr}\": {source}")]
    ConnectIo {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// Errors that abort the server at construction or bind time. Per-client
/// errors never surface here; they are handled (and logged) per connection.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind listening socket on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("failed to set listener accept timeout: {source}")]
    SetTimeout {
        #[source]
        source: io::Error,
    },
}
