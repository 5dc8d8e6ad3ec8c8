//! Connection registry
//!
//! Maps each authenticated connection to its session state and enforces
//! the nickname uniqueness, capacity, and ban rules on connect-request.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::{IpAddr, SocketAddr};

use tracing::debug;

use crate::error::ConnectRejection;
use crate::message::{has_reserved_chars, MAX_NICKNAME_LEN};
use crate::types::ConnectionId;

/// Session state of an authenticated connection
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// Transport connection this session lives on
    pub id: ConnectionId,
    /// Unique nickname
    pub nickname: String,
    /// Peer address at accept time
    pub address: SocketAddr,
    /// Names of the rooms this client is a member of
    pub joined_rooms: BTreeSet<String>,
}

impl ClientInfo {
    pub fn new(id: ConnectionId, nickname: String, address: SocketAddr) -> Self {
        Self {
            id,
            nickname,
            address,
            joined_rooms: BTreeSet::new(),
        }
    }
}

/// Registry of authenticated clients plus the ban list
///
/// Keyed by `ConnectionId`, so iteration follows accept order.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: BTreeMap<ConnectionId, ClientInfo>,
    /// Origin address -> nickname it was banned under
    bans: HashMap<IpAddr, String>,
    max_clients: usize,
    /// Nicknames nobody may register (the server's own name)
    reserved: Vec<String>,
}

impl ClientRegistry {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: BTreeMap::new(),
            bans: HashMap::new(),
            max_clients,
            reserved: Vec::new(),
        }
    }

    /// Reserve a nickname, e.g. the operator's
    pub fn reserve(&mut self, nickname: impl Into<String>) {
        self.reserved.push(nickname.into());
    }

    /// Authenticate `id` under `nickname`
    ///
    /// Checks run in a fixed order and the first failure wins: ban,
    /// duplicate nickname, capacity, then nickname shape.
    pub fn register(
        &mut self,
        id: ConnectionId,
        nickname: &str,
        address: SocketAddr,
    ) -> Result<&ClientInfo, ConnectRejection> {
        if let Some(banned_as) = self.bans.get(&address.ip()) {
            return Err(ConnectRejection::Banned {
                nickname: banned_as.clone(),
            });
        }

        if self.reserved.iter().any(|r| r == nickname) || self.find_by_nickname(nickname).is_some()
        {
            return Err(ConnectRejection::NicknameTaken);
        }

        if self.clients.len() >= self.max_clients {
            return Err(ConnectRejection::ServerFull);
        }

        if nickname.chars().count() > MAX_NICKNAME_LEN {
            return Err(ConnectRejection::NicknameTooLong);
        }

        if nickname.trim().is_empty() {
            return Err(ConnectRejection::NicknameEmpty);
        }

        if has_reserved_chars(nickname) {
            return Err(ConnectRejection::NicknameInvalid);
        }

        debug!("Registering {} as '{}'", id, nickname);
        let info = ClientInfo::new(id, nickname.to_string(), address);
        Ok(self.clients.entry(id).or_insert(info))
    }

    /// Remove a session, returning it if `id` was authenticated
    pub fn unregister(&mut self, id: ConnectionId) -> Option<ClientInfo> {
        self.clients.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ClientInfo> {
        self.clients.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut ClientInfo> {
        self.clients.get_mut(&id)
    }

    /// Connection holding `nickname`, if any
    pub fn find_by_nickname(&self, nickname: &str) -> Option<ConnectionId> {
        self.clients
            .values()
            .find(|info| info.nickname == nickname)
            .map(|info| info.id)
    }

    /// Number of authenticated clients
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Nicknames in accept order
    pub fn snapshot_nicknames(&self) -> Vec<String> {
        self.clients.values().map(|c| c.nickname.clone()).collect()
    }

    /// Every authenticated connection
    pub fn ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.clients.keys().copied()
    }

    /// Ban an address; later connect-requests from it are refused
    pub fn ban(&mut self, ip: IpAddr, nickname: &str) {
        self.bans.insert(ip, nickname.to_string());
    }

    /// Drop all sessions. Bans survive for the process lifetime.
    pub fn clear(&mut self) {
        self.clients.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, last], 40000))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut reg = ClientRegistry::new(10);
        let info = reg.register(ConnectionId(2), "alice", addr(1)).unwrap();
        assert_eq!(info.nickname, "alice");
        assert!(info.joined_rooms.is_empty());

        assert_eq!(reg.find_by_nickname("alice"), Some(ConnectionId(2)));
        assert_eq!(reg.find_by_nickname("bob"), None);
        assert_eq!(reg.count(), 1);
    }

    #[test]
    fn test_duplicate_nickname_until_disconnect() {
        let mut reg = ClientRegistry::new(10);
        reg.register(ConnectionId(2), "alice", addr(1)).unwrap();

        let err = reg.register(ConnectionId(3), "alice", addr(2)).unwrap_err();
        assert_eq!(err, ConnectRejection::NicknameTaken);

        let removed = reg.unregister(ConnectionId(2)).unwrap();
        assert_eq!(removed.nickname, "alice");
        assert!(reg.register(ConnectionId(3), "alice", addr(2)).is_ok());
    }

    #[test]
    fn test_capacity() {
        let mut reg = ClientRegistry::new(10);
        for i in 0..10 {
            reg.register(ConnectionId(i + 2), &format!("user{}", i), addr(i as u8))
                .unwrap();
        }
        let err = reg.register(ConnectionId(20), "late", addr(99)).unwrap_err();
        assert_eq!(err, ConnectRejection::ServerFull);
        assert_eq!(reg.count(), 10);
    }

    #[test]
    fn test_rejection_order() {
        let mut reg = ClientRegistry::new(1);
        reg.register(ConnectionId(2), "alice", addr(1)).unwrap();
        reg.ban(addr(5).ip(), "mallory");

        // Banned beats everything else
        let err = reg.register(ConnectionId(3), "alice", addr(5)).unwrap_err();
        assert_eq!(
            err,
            ConnectRejection::Banned {
                nickname: "mallory".to_string()
            }
        );

        // Duplicate beats full
        let err = reg.register(ConnectionId(3), "alice", addr(6)).unwrap_err();
        assert_eq!(err, ConnectRejection::NicknameTaken);

        // Full beats too long
        let err = reg
            .register(ConnectionId(3), "a_very_long_nickname", addr(6))
            .unwrap_err();
        assert_eq!(err, ConnectRejection::ServerFull);
    }

    #[test]
    fn test_nickname_shape() {
        let mut reg = ClientRegistry::new(10);
        assert_eq!(
            reg.register(ConnectionId(2), "sixteen_chars_xx", addr(1))
                .unwrap_err(),
            ConnectRejection::NicknameTooLong
        );
        assert!(reg.register(ConnectionId(2), "fifteen_chars_x", addr(1)).is_ok());
        assert_eq!(
            reg.register(ConnectionId(3), "", addr(2)).unwrap_err(),
            ConnectRejection::NicknameEmpty
        );
        assert_eq!(
            reg.register(ConnectionId(3), "a|b", addr(2)).unwrap_err(),
            ConnectRejection::NicknameInvalid
        );
    }

    #[test]
    fn test_reserved_nickname() {
        let mut reg = ClientRegistry::new(10);
        reg.reserve("Admin");
        assert_eq!(
            reg.register(ConnectionId(2), "Admin", addr(1)).unwrap_err(),
            ConnectRejection::NicknameTaken
        );
    }

    #[test]
    fn test_snapshot_follows_accept_order() {
        let mut reg = ClientRegistry::new(10);
        reg.register(ConnectionId(5), "carol", addr(3)).unwrap();
        reg.register(ConnectionId(2), "alice", addr(1)).unwrap();
        reg.register(ConnectionId(3), "bob", addr(2)).unwrap();
        assert_eq!(reg.snapshot_nicknames(), vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_ban_survives_clear() {
        let mut reg = ClientRegistry::new(10);
        reg.register(ConnectionId(2), "alice", addr(1)).unwrap();
        reg.ban(addr(1).ip(), "alice");
        reg.clear();
        assert_eq!(reg.count(), 0);
        assert_eq!(
            reg.register(ConnectionId(3), "bob", addr(1)).unwrap_err(),
            ConnectRejection::Banned {
                nickname: "alice".to_string()
            }
        );
    }
}
