//! Error types for the bridge.
//!
//! Only [`ConfigError`] is fatal; it is returned before the step loop starts.
//! Protocol and transport errors are handled inside the step and logged.

use std::io;

/// Configuration inconsistencies detected at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("channel index {index} out of range (max {max})")]
    ChannelIndexOutOfRange { index: usize, max: usize },

    #[error("channel {channel}: source index {source_index} out of range (max {max})")]
    SourceIndexOutOfRange {
        channel: usize,
        source_index: usize,
        max: usize,
    },

    #[error("channel {0} configured more than once")]
    DuplicateChannel(usize),

    #[error("{field} must be finite")]
    NonFinite { field: String },

    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("unsupported protocol version {0} (expected 1 or 2)")]
    UnsupportedProtocolVersion(u8),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("config read error: {0}")]
    Io(#[from] io::Error),
}

/// Wire-level encode/decode failures. Never fatal.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    EmptyFrame,

    #[error("unknown frame magic 0x{0:02X}")]
    UnknownMagic(u8),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("encode failed: {0}")]
    Encode(String),
}

/// Socket and resolver failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to spawn resolver thread: {0}")]
    Spawn(io::Error),

    #[error("failed to bind local port {port}: {source}")]
    Bind { port: u16, source: io::Error },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors surfaced by [`SitlBridge`](crate::SitlBridge) construction.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
