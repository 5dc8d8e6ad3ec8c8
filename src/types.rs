//! Basic type definitions for the chat server
//!
//! Provides newtype wrappers for type safety:
//! - `ConnectionId`: identifier of one live transport connection

use mio::Token;

/// Unique connection identifier (newtype pattern)
///
/// Doubles as the mio `Token` the socket is registered under. Ids are
/// handed out monotonically and never reused for the lifetime of a
/// server, so ordering by id is ordering by accept time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub usize);

impl ConnectionId {
    /// The mio token for this connection
    pub fn token(self) -> Token {
        Token(self.0)
    }
}

impl From<Token> for ConnectionId {
    fn from(token: Token) -> Self {
        Self(token.0)
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}
