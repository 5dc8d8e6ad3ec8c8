//! Room registry
//!
//! Named broadcast groups with a membership set and a bounded message
//! history. A room exists only while it has members: the leave that
//! empties it deletes it and says so in its return value.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use chrono::Local;
use tracing::debug;

use crate::error::RoomError;
use crate::message::{has_reserved_chars, MAX_MESSAGE_LEN, MAX_ROOM_NAME_LEN};

/// One posted room message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Local time of posting, `HH:MM:SS`
    pub time: String,
    pub sender: String,
    pub text: String,
}

impl HistoryEntry {
    fn now(sender: &str, text: &str) -> Self {
        Self {
            time: Local::now().format("%H:%M:%S").to_string(),
            sender: sender.to_string(),
            text: text.to_string(),
        }
    }
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.time, self.sender, self.text)
    }
}

/// Chat room
#[derive(Debug)]
pub struct Room {
    pub name: String,
    /// Nickname that created the room
    pub creator: String,
    members: BTreeSet<String>,
    history: VecDeque<HistoryEntry>,
    history_limit: usize,
}

impl Room {
    /// Create a room whose only member is its creator
    pub fn new(name: String, creator: String, history_limit: usize) -> Self {
        let mut members = BTreeSet::new();
        members.insert(creator.clone());
        Self {
            name,
            creator,
            members,
            history: VecDeque::new(),
            history_limit,
        }
    }

    pub fn contains(&self, nickname: &str) -> bool {
        self.members.contains(nickname)
    }

    /// Members in name order
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(String::as_str)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Posted messages, oldest first
    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    fn push_history(&mut self, entry: HistoryEntry) {
        self.history.push_back(entry);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }
}

/// What happened on a successful leave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// The leaver was the last member and the room is gone
    pub room_deleted: bool,
}

/// Registry of all live rooms
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: BTreeMap<String, Room>,
    max_rooms: usize,
    history_limit: usize,
}

impl RoomRegistry {
    pub fn new(max_rooms: usize, history_limit: usize) -> Self {
        Self {
            rooms: BTreeMap::new(),
            max_rooms,
            history_limit,
        }
    }

    /// Create a room with `creator` as its first member
    pub fn create(&mut self, name: &str, creator: &str) -> Result<&Room, RoomError> {
        if name.chars().count() > MAX_ROOM_NAME_LEN {
            return Err(RoomError::NameTooLong);
        }
        if name.trim().is_empty() || has_reserved_chars(name) {
            return Err(RoomError::InvalidName);
        }
        if self.rooms.len() >= self.max_rooms {
            return Err(RoomError::LimitReached);
        }
        if self.rooms.contains_key(name) {
            return Err(RoomError::AlreadyExists(name.to_string()));
        }

        debug!("Room '{}' created by '{}'", name, creator);
        let room = Room::new(name.to_string(), creator.to_string(), self.history_limit);
        Ok(self.rooms.entry(name.to_string()).or_insert(room))
    }

    /// Add `nickname` to a room. Joining twice is a no-op.
    pub fn join(&mut self, name: &str, nickname: &str) -> Result<&Room, RoomError> {
        let room = self
            .rooms
            .get_mut(name)
            .ok_or_else(|| RoomError::NotFound(name.to_string()))?;
        room.members.insert(nickname.to_string());
        Ok(room)
    }

    /// Remove `nickname` from a room, deleting the room if it empties
    pub fn leave(&mut self, name: &str, nickname: &str) -> Result<LeaveOutcome, RoomError> {
        let room = self
            .rooms
            .get_mut(name)
            .ok_or_else(|| RoomError::NotFound(name.to_string()))?;

        if !room.members.remove(nickname) {
            return Err(RoomError::NotMember {
                room: name.to_string(),
                nickname: nickname.to_string(),
            });
        }

        let room_deleted = room.members.is_empty();
        if room_deleted {
            self.rooms.remove(name);
            debug!("Room '{}' deleted (empty)", name);
        }
        Ok(LeaveOutcome { room_deleted })
    }

    /// Append a message to a room's history
    pub fn post(&mut self, name: &str, nickname: &str, text: &str) -> Result<HistoryEntry, RoomError> {
        let room = self
            .rooms
            .get_mut(name)
            .ok_or_else(|| RoomError::NotFound(name.to_string()))?;

        if !room.contains(nickname) {
            return Err(RoomError::NotMember {
                room: name.to_string(),
                nickname: nickname.to_string(),
            });
        }
        if text.chars().count() > MAX_MESSAGE_LEN {
            return Err(RoomError::MessageTooLong);
        }

        let entry = HistoryEntry::now(nickname, text);
        room.push_history(entry.clone());
        Ok(entry)
    }

    pub fn get(&self, name: &str) -> Option<&Room> {
        self.rooms.get(name)
    }

    /// Room names in sorted order
    pub fn list_names(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }

    /// Members of a room
    pub fn users_of(&self, name: &str) -> Result<Vec<String>, RoomError> {
        self.rooms
            .get(name)
            .map(|room| room.members().map(str::to_string).collect())
            .ok_or_else(|| RoomError::NotFound(name.to_string()))
    }

    pub fn count(&self) -> usize {
        self.rooms.len()
    }

    pub fn clear(&mut self) {
        self.rooms.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RoomRegistry {
        RoomRegistry::new(20, 100)
    }

    #[test]
    fn test_create_adds_creator() {
        let mut rooms = registry();
        let room = rooms.create("lobby", "alice").unwrap();
        assert_eq!(room.creator, "alice");
        assert!(room.contains("alice"));
        assert_eq!(room.member_count(), 1);
        assert_eq!(rooms.list_names(), vec!["lobby"]);
    }

    #[test]
    fn test_create_rejections() {
        let mut rooms = RoomRegistry::new(1, 100);
        assert_eq!(
            rooms.create("twenty_one_characters", "alice").unwrap_err(),
            RoomError::NameTooLong
        );
        assert_eq!(rooms.create("", "alice").unwrap_err(), RoomError::InvalidName);
        assert_eq!(rooms.create("a;b", "alice").unwrap_err(), RoomError::InvalidName);

        rooms.create("lobby", "alice").unwrap();
        assert_eq!(rooms.create("games", "bob").unwrap_err(), RoomError::LimitReached);

        let mut rooms = registry();
        rooms.create("lobby", "alice").unwrap();
        assert_eq!(
            rooms.create("lobby", "bob").unwrap_err(),
            RoomError::AlreadyExists("lobby".to_string())
        );
    }

    #[test]
    fn test_join_unknown_room() {
        let mut rooms = registry();
        assert_eq!(
            rooms.join("nowhere", "alice").unwrap_err(),
            RoomError::NotFound("nowhere".to_string())
        );
    }

    #[test]
    fn test_sole_member_leaving_deletes_room() {
        let mut rooms = registry();
        rooms.create("R1", "alice").unwrap();

        let outcome = rooms.leave("R1", "alice").unwrap();
        assert!(outcome.room_deleted);
        assert!(!rooms.list_names().contains(&"R1".to_string()));
        assert_eq!(
            rooms.users_of("R1").unwrap_err(),
            RoomError::NotFound("R1".to_string())
        );
    }

    #[test]
    fn test_leave_keeps_room_with_members() {
        let mut rooms = registry();
        rooms.create("lobby", "alice").unwrap();
        rooms.join("lobby", "bob").unwrap();

        let outcome = rooms.leave("lobby", "alice").unwrap();
        assert!(!outcome.room_deleted);
        assert_eq!(rooms.users_of("lobby").unwrap(), vec!["bob"]);

        assert!(matches!(
            rooms.leave("lobby", "alice"),
            Err(RoomError::NotMember { .. })
        ));
    }

    #[test]
    fn test_post_requires_membership() {
        let mut rooms = registry();
        rooms.create("lobby", "alice").unwrap();
        assert!(matches!(
            rooms.post("lobby", "bob", "hi"),
            Err(RoomError::NotMember { .. })
        ));

        let entry = rooms.post("lobby", "alice", "hi").unwrap();
        assert_eq!(entry.sender, "alice");
        assert!(entry.to_string().ends_with(" alice: hi"));
    }

    #[test]
    fn test_post_message_length() {
        let mut rooms = registry();
        rooms.create("lobby", "alice").unwrap();
        assert!(rooms.post("lobby", "alice", &"x".repeat(500)).is_ok());
        assert_eq!(
            rooms.post("lobby", "alice", &"x".repeat(501)).unwrap_err(),
            RoomError::MessageTooLong
        );
    }

    #[test]
    fn test_history_cap_keeps_latest() {
        let mut rooms = registry();
        rooms.create("lobby", "alice").unwrap();
        for i in 0..150 {
            rooms.post("lobby", "alice", &format!("msg {}", i)).unwrap();
        }

        let history: Vec<_> = rooms.get("lobby").unwrap().history().collect();
        assert_eq!(history.len(), 100);
        assert_eq!(history[0].text, "msg 50");
        assert_eq!(history[99].text, "msg 149");
    }
}
