//! Error types for the chat server
//!
//! Defines wire protocol errors, registry rejections, and the fatal
//! server/client errors. Uses thiserror for ergonomic error definitions.

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Wire protocol errors
///
/// Some of these mean the peer is speaking garbage and must be dropped,
/// others only invalidate a single frame. See [`ProtocolError::is_fatal`].
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload does not fit the 16-bit length field
    #[error("payload too large: {len} bytes")]
    PayloadTooLarge { len: usize },

    /// Declared frame length exceeds what this endpoint accepts
    #[error("invalid frame length: {declared} bytes (limit {limit})")]
    InvalidLength { declared: usize, limit: usize },

    /// Payload is not valid UTF-8
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    /// Unknown (type, subtype) pair
    #[error("unknown message kind {kind:#04x}/{subtype:#04x}")]
    UnknownKind { kind: u8, subtype: u8 },

    /// A delimited payload is missing fields
    #[error("malformed payload for message kind {kind:#04x}/{subtype:#04x}")]
    MalformedPayload { kind: u8, subtype: u8 },

    /// Transport failure while framing
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the connection that produced this error must be dropped.
    ///
    /// Unknown kinds and malformed fields only cost the peer that frame.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ProtocolError::UnknownKind { .. } | ProtocolError::MalformedPayload { .. }
        )
    }
}

/// Reasons a connect-request is refused
///
/// The display text is sent verbatim in the `CONNECT_ERROR` reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectRejection {
    /// The origin address was banned while using `nickname`
    #[error("you are banned: {nickname}")]
    Banned { nickname: String },

    /// Another authenticated connection holds the nickname
    #[error("nickname already taken")]
    NicknameTaken,

    /// Registry is at capacity
    #[error("server is full")]
    ServerFull,

    #[error("nickname too long")]
    NicknameTooLong,

    #[error("nickname is empty")]
    NicknameEmpty,

    /// Nickname contains a protocol separator
    #[error("nickname contains reserved characters")]
    NicknameInvalid,
}

/// Room registry errors
///
/// `NotFound` is dropped silently by the router; everything else
/// becomes an explicit `|false` reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("room name too long")]
    NameTooLong,

    #[error("room name is empty or contains reserved characters")]
    InvalidName,

    /// Registry already holds the maximum number of rooms
    #[error("room limit reached")]
    LimitReached,

    #[error("room '{0}' already exists")]
    AlreadyExists(String),

    #[error("room '{0}' not found")]
    NotFound(String),

    #[error("'{nickname}' is not a member of '{room}'")]
    NotMember { room: String, nickname: String },

    #[error("message too long")]
    MessageTooLong,
}

/// Server-level errors
///
/// Only `Bind` is fatal at startup; everything per-connection is
/// handled inside the event loop.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Could not bind the listening endpoint
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Poll or waker failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The event loop has exited and dropped its command receiver
    #[error("server command channel closed")]
    CommandChannelClosed,
}

/// Client library errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Chat and room actions are refused until `INIT_COMPLETE` arrives
    #[error("client is not initialized yet")]
    NotInitialized,

    /// The connection task has ended
    #[error("connection closed")]
    Closed,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}
