//! Multi-room TCP chat server
//!
//! Clients connect over TCP, pick a unique nickname, and exchange global,
//! private, and room messages framed by a small binary protocol.
//!
//! # Features
//! - Length-prefixed binary framing (`type`, `subtype`, `u16` length, UTF-8)
//! - Nickname registration with capacity limit and IP bans
//! - Rooms with membership, bounded history, and automatic deletion when empty
//! - Operator commands: kick, ban, create room, announce
//! - Async client library for tools and tests
//!
//! # Architecture
//! One thread runs a mio readiness loop that owns every socket and the
//! [`Router`]. Handlers return [`Outbound`] directives instead of writing
//! to sockets, so all state lives on the loop thread with no locks. Other
//! threads talk to the loop through a [`ServerHandle`].
//!
//! # Example
//! ```ignore
//! use multiroom_chat::{ChatServer, ServerConfig};
//!
//! let (server, handle) = ChatServer::bind(ServerConfig::default())?;
//! std::thread::spawn(move || server.run());
//! handle.create_room("lobby")?;
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod connector;
pub mod error;
pub mod handler;
pub mod message;
pub mod room;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use client::{ClientInfo, ClientRegistry};
pub use codec::{decode, encode, Decoded, Frame, FrameCodec};
pub use config::ServerConfig;
pub use connector::{ChatClient, ClientEvent};
pub use error::{ClientError, ConfigError, ConnectRejection, ProtocolError, RoomError, ServerError};
pub use handler::{Destination, Outbound, Router};
pub use message::{ClientMessage, ServerMessage};
pub use room::{Room, RoomRegistry};
pub use server::{ChatServer, ServerCommand, ServerHandle};
pub use types::ConnectionId;
