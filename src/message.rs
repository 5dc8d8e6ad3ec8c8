//! Message protocol definitions
//!
//! Typed views over (type, subtype) frames. `ClientMessage` is what peers
//! send to the server, `ServerMessage` is what the server sends back; both
//! convert to and from [`Frame`] so an unhandled kind is a compile error
//! rather than a silently ignored byte.

use crate::codec::Frame;
use crate::error::ProtocolError;

/// Frame `type` byte values
pub mod kind {
    pub const CONNECTION: u8 = 0x01;
    pub const GROUP: u8 = 0x02;
    pub const PRIVATE: u8 = 0x03;
    pub const CLIENT_LIST: u8 = 0x04;
    pub const ROOM: u8 = 0x05;
    pub const INIT: u8 = 0x06;
}

/// Frame `subtype` byte values, grouped by `type`
pub mod subtype {
    pub const CONNECT_REQUEST: u8 = 0x01;
    pub const DISCONNECT: u8 = 0x02;
    pub const CONNECT_SUCCESS: u8 = 0x03;
    pub const CONNECT_ERROR: u8 = 0x04;

    pub const GROUP_TEXT: u8 = 0x02;

    pub const PRIVATE_REQUEST: u8 = 0x01;
    pub const PRIVATE_MSG: u8 = 0x02;
    pub const PRIVATE_CONFIRM: u8 = 0x03;

    pub const ADD_CLIENT: u8 = 0x01;
    pub const REMOVE_CLIENT: u8 = 0x02;
    pub const FULL_LIST: u8 = 0x03;

    pub const CREATE_ROOM: u8 = 0x01;
    pub const JOIN_ROOM: u8 = 0x02;
    pub const LEAVE_ROOM: u8 = 0x03;
    pub const ROOM_MESSAGE: u8 = 0x04;
    pub const ROOM_LIST: u8 = 0x05;
    pub const ROOM_USERS: u8 = 0x06;

    pub const INIT_REQUEST: u8 = 0x01;
    pub const INIT_DATA: u8 = 0x02;
    pub const INIT_COMPLETE: u8 = 0x03;
}

/// Maximum nickname length in characters
pub const MAX_NICKNAME_LEN: usize = 15;
/// Maximum chat message length in characters
pub const MAX_MESSAGE_LEN: usize = 500;
/// Maximum room name length in characters
pub const MAX_ROOM_NAME_LEN: usize = 20;

/// Characters that delimit payload fields and may not appear in names
pub const RESERVED_CHARS: [char; 3] = ['|', ';', ','];

/// Whether `name` contains a field separator
pub fn has_reserved_chars(name: &str) -> bool {
    name.contains(&RESERVED_CHARS[..])
}

/// Client → Server message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Authenticate with a nickname
    ConnectRequest { nickname: String },
    /// Leave the server
    Disconnect,
    /// Message to everyone
    GroupMessage { text: String },
    /// Message to a single user
    PrivateMessage { target: String, text: String },
    /// Create a room; the creator field is informational
    CreateRoom { room: String, creator: String },
    JoinRoom { room: String, user: String },
    LeaveRoom { room: String, user: String },
    /// Post to a room
    RoomMessage {
        room: String,
        sender: String,
        text: String,
    },
    /// Ask for the current users and rooms
    InitRequest,
}

/// Server → Client message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Connect-request accepted
    ConnectSuccess { greeting: String },
    /// Connect-request refused, or the connection is being closed by the server
    ConnectError { reason: String },
    /// Formatted global message
    GroupMessage { text: String },
    /// Private message from `sender`
    PrivateMessage { sender: String, text: String },
    /// Private message delivered to `target`
    PrivateConfirm { target: String, text: String },
    ClientAdded { nickname: String },
    ClientRemoved { nickname: String },
    ClientList { nicknames: Vec<String> },
    /// Reply to a create-room request
    RoomCreated {
        room: String,
        creator: String,
        ok: bool,
    },
    /// Reply to a join-room request
    RoomJoined { room: String, user: String, ok: bool },
    /// Reply to a leave-room request
    RoomLeft { room: String, user: String, ok: bool },
    RoomMessage {
        room: String,
        sender: String,
        text: String,
    },
    RoomList { rooms: Vec<String> },
    RoomUsers { room: String, users: Vec<String> },
    /// Snapshot for a freshly authenticated client
    InitData {
        users: Vec<String>,
        rooms: Vec<String>,
    },
    InitComplete,
}

impl ClientMessage {
    /// Parse a frame received by the server
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        let text = frame.text()?;
        let malformed = || ProtocolError::MalformedPayload {
            kind: frame.kind,
            subtype: frame.subtype,
        };

        let msg = match (frame.kind, frame.subtype) {
            (kind::CONNECTION, subtype::CONNECT_REQUEST) => ClientMessage::ConnectRequest {
                nickname: text.to_string(),
            },
            (kind::CONNECTION, subtype::DISCONNECT) => ClientMessage::Disconnect,
            (kind::GROUP, _) => ClientMessage::GroupMessage {
                text: text.to_string(),
            },
            (kind::PRIVATE, subtype::PRIVATE_REQUEST | subtype::PRIVATE_MSG) => {
                let (target, text) = text.split_once('|').ok_or_else(malformed)?;
                ClientMessage::PrivateMessage {
                    target: target.to_string(),
                    text: text.to_string(),
                }
            }
            (kind::ROOM, subtype::CREATE_ROOM) => {
                let (room, creator) = text.split_once('|').unwrap_or((text, ""));
                ClientMessage::CreateRoom {
                    room: room.to_string(),
                    creator: creator.to_string(),
                }
            }
            (kind::ROOM, subtype::JOIN_ROOM) => {
                let (room, user) = text.split_once('|').unwrap_or((text, ""));
                ClientMessage::JoinRoom {
                    room: room.to_string(),
                    user: user.to_string(),
                }
            }
            (kind::ROOM, subtype::LEAVE_ROOM) => {
                let (room, user) = text.split_once('|').unwrap_or((text, ""));
                ClientMessage::LeaveRoom {
                    room: room.to_string(),
                    user: user.to_string(),
                }
            }
            (kind::ROOM, subtype::ROOM_MESSAGE) => {
                let mut parts = text.splitn(3, '|');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(room), Some(sender), Some(text)) => ClientMessage::RoomMessage {
                        room: room.to_string(),
                        sender: sender.to_string(),
                        text: text.to_string(),
                    },
                    _ => return Err(malformed()),
                }
            }
            (kind::INIT, subtype::INIT_REQUEST) => ClientMessage::InitRequest,
            (kind, subtype) => return Err(ProtocolError::UnknownKind { kind, subtype }),
        };
        Ok(msg)
    }

    /// Encode for sending to the server
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        match self {
            ClientMessage::ConnectRequest { nickname } => {
                Frame::new(kind::CONNECTION, subtype::CONNECT_REQUEST, nickname)
            }
            ClientMessage::Disconnect => Ok(Frame::empty(kind::CONNECTION, subtype::DISCONNECT)),
            ClientMessage::GroupMessage { text } => {
                Frame::new(kind::GROUP, subtype::GROUP_TEXT, text)
            }
            ClientMessage::PrivateMessage { target, text } => Frame::new(
                kind::PRIVATE,
                subtype::PRIVATE_REQUEST,
                &format!("{}|{}", target, text),
            ),
            ClientMessage::CreateRoom { room, creator } => Frame::new(
                kind::ROOM,
                subtype::CREATE_ROOM,
                &format!("{}|{}", room, creator),
            ),
            ClientMessage::JoinRoom { room, user } => Frame::new(
                kind::ROOM,
                subtype::JOIN_ROOM,
                &format!("{}|{}", room, user),
            ),
            ClientMessage::LeaveRoom { room, user } => Frame::new(
                kind::ROOM,
                subtype::LEAVE_ROOM,
                &format!("{}|{}", room, user),
            ),
            ClientMessage::RoomMessage { room, sender, text } => Frame::new(
                kind::ROOM,
                subtype::ROOM_MESSAGE,
                &format!("{}|{}|{}", room, sender, text),
            ),
            ClientMessage::InitRequest => Ok(Frame::empty(kind::INIT, subtype::INIT_REQUEST)),
        }
    }
}

impl ServerMessage {
    /// Encode for sending to a client
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        match self {
            ServerMessage::ConnectSuccess { greeting } => {
                Frame::new(kind::CONNECTION, subtype::CONNECT_SUCCESS, greeting)
            }
            ServerMessage::ConnectError { reason } => {
                Frame::new(kind::CONNECTION, subtype::CONNECT_ERROR, reason)
            }
            ServerMessage::GroupMessage { text } => {
                Frame::new(kind::GROUP, subtype::GROUP_TEXT, text)
            }
            ServerMessage::PrivateMessage { sender, text } => Frame::new(
                kind::PRIVATE,
                subtype::PRIVATE_MSG,
                &format!("{}|{}", sender, text),
            ),
            ServerMessage::PrivateConfirm { target, text } => Frame::new(
                kind::PRIVATE,
                subtype::PRIVATE_CONFIRM,
                &format!("{}|{}", target, text),
            ),
            ServerMessage::ClientAdded { nickname } => {
                Frame::new(kind::CLIENT_LIST, subtype::ADD_CLIENT, nickname)
            }
            ServerMessage::ClientRemoved { nickname } => {
                Frame::new(kind::CLIENT_LIST, subtype::REMOVE_CLIENT, nickname)
            }
            ServerMessage::ClientList { nicknames } => {
                Frame::new(kind::CLIENT_LIST, subtype::FULL_LIST, &nicknames.join(";"))
            }
            ServerMessage::RoomCreated { room, creator, ok } => Frame::new(
                kind::ROOM,
                subtype::CREATE_ROOM,
                &format!("{}|{}|{}", room, creator, ok),
            ),
            ServerMessage::RoomJoined { room, user, ok } => Frame::new(
                kind::ROOM,
                subtype::JOIN_ROOM,
                &format!("{}|{}|{}", room, user, ok),
            ),
            ServerMessage::RoomLeft { room, user, ok } => Frame::new(
                kind::ROOM,
                subtype::LEAVE_ROOM,
                &format!("{}|{}|{}", room, user, ok),
            ),
            ServerMessage::RoomMessage { room, sender, text } => Frame::new(
                kind::ROOM,
                subtype::ROOM_MESSAGE,
                &format!("{}|{}|{}", room, sender, text),
            ),
            ServerMessage::RoomList { rooms } => {
                Frame::new(kind::ROOM, subtype::ROOM_LIST, &rooms.join(";"))
            }
            ServerMessage::RoomUsers { room, users } => Frame::new(
                kind::ROOM,
                subtype::ROOM_USERS,
                &format!("{}|{}", room, users.join(",")),
            ),
            ServerMessage::InitData { users, rooms } => Frame::new(
                kind::INIT,
                subtype::INIT_DATA,
                &format!("{};{}", users.join(","), rooms.join(",")),
            ),
            ServerMessage::InitComplete => Ok(Frame::empty(kind::INIT, subtype::INIT_COMPLETE)),
        }
    }

    /// Parse a frame received by a client
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        let text = frame.text()?;
        let malformed = || ProtocolError::MalformedPayload {
            kind: frame.kind,
            subtype: frame.subtype,
        };

        let msg = match (frame.kind, frame.subtype) {
            (kind::CONNECTION, subtype::CONNECT_SUCCESS) => ServerMessage::ConnectSuccess {
                greeting: text.to_string(),
            },
            (kind::CONNECTION, subtype::CONNECT_ERROR) => ServerMessage::ConnectError {
                reason: text.to_string(),
            },
            (kind::GROUP, _) => ServerMessage::GroupMessage {
                text: text.to_string(),
            },
            (kind::PRIVATE, subtype::PRIVATE_MSG) => {
                let (sender, text) = text.split_once('|').ok_or_else(malformed)?;
                ServerMessage::PrivateMessage {
                    sender: sender.to_string(),
                    text: text.to_string(),
                }
            }
            (kind::PRIVATE, subtype::PRIVATE_CONFIRM) => {
                let (target, text) = text.split_once('|').ok_or_else(malformed)?;
                ServerMessage::PrivateConfirm {
                    target: target.to_string(),
                    text: text.to_string(),
                }
            }
            (kind::CLIENT_LIST, subtype::ADD_CLIENT) => ServerMessage::ClientAdded {
                nickname: text.to_string(),
            },
            (kind::CLIENT_LIST, subtype::REMOVE_CLIENT) => ServerMessage::ClientRemoved {
                nickname: text.to_string(),
            },
            (kind::CLIENT_LIST, subtype::FULL_LIST) => ServerMessage::ClientList {
                nicknames: split_list(text, ';'),
            },
            (kind::ROOM, subtype::CREATE_ROOM) => {
                let (room, creator, ok) = split_flagged(text).ok_or_else(malformed)?;
                ServerMessage::RoomCreated { room, creator, ok }
            }
            (kind::ROOM, subtype::JOIN_ROOM) => {
                let (room, user, ok) = split_flagged(text).ok_or_else(malformed)?;
                ServerMessage::RoomJoined { room, user, ok }
            }
            (kind::ROOM, subtype::LEAVE_ROOM) => {
                let (room, user, ok) = split_flagged(text).ok_or_else(malformed)?;
                ServerMessage::RoomLeft { room, user, ok }
            }
            (kind::ROOM, subtype::ROOM_MESSAGE) => {
                let mut parts = text.splitn(3, '|');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(room), Some(sender), Some(text)) => ServerMessage::RoomMessage {
                        room: room.to_string(),
                        sender: sender.to_string(),
                        text: text.to_string(),
                    },
                    _ => return Err(malformed()),
                }
            }
            (kind::ROOM, subtype::ROOM_LIST) => ServerMessage::RoomList {
                rooms: split_list(text, ';'),
            },
            (kind::ROOM, subtype::ROOM_USERS) => {
                let (room, users) = text.split_once('|').ok_or_else(malformed)?;
                ServerMessage::RoomUsers {
                    room: room.to_string(),
                    users: split_list(users, ','),
                }
            }
            (kind::INIT, subtype::INIT_DATA) => {
                let (users, rooms) = text.split_once(';').unwrap_or((text, ""));
                ServerMessage::InitData {
                    users: split_list(users, ','),
                    rooms: split_list(rooms, ','),
                }
            }
            (kind::INIT, subtype::INIT_COMPLETE) => ServerMessage::InitComplete,
            (kind, subtype) => return Err(ProtocolError::UnknownKind { kind, subtype }),
        };
        Ok(msg)
    }
}

/// Split a delimited list, dropping empty entries
fn split_list(text: &str, sep: char) -> Vec<String> {
    text.split(sep)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split `name|who|flag`. A missing flag reads as success.
fn split_flagged(text: &str) -> Option<(String, String, bool)> {
    let mut parts = text.splitn(3, '|');
    let name = parts.next()?;
    let who = parts.next()?;
    let ok = parts.next().map_or(true, |flag| flag == "true");
    Some((name.to_string(), who.to_string(), ok))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_parse_room_message_keeps_pipes_in_text() {
        let frame = Frame::new(kind::ROOM, subtype::ROOM_MESSAGE, "lobby|alice|a|b").unwrap();
        let msg = ClientMessage::from_frame(&frame).unwrap();
        assert_eq!(
            msg,
            ClientMessage::RoomMessage {
                room: "lobby".to_string(),
                sender: "alice".to_string(),
                text: "a|b".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_private_without_separator_is_malformed() {
        let frame = Frame::new(kind::PRIVATE, subtype::PRIVATE_REQUEST, "bob").unwrap();
        let err = ClientMessage::from_frame(&frame).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedPayload { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_unknown_kind() {
        let frame = Frame::empty(0x09, 0x01);
        assert!(matches!(
            ClientMessage::from_frame(&frame),
            Err(ProtocolError::UnknownKind { kind: 0x09, subtype: 0x01 })
        ));
    }

    #[test]
    fn test_invalid_utf8_is_fatal() {
        let frame = Frame {
            kind: kind::GROUP,
            subtype: subtype::GROUP_TEXT,
            payload: Bytes::from_static(&[0xc3, 0x28]),
        };
        let err = ClientMessage::from_frame(&frame).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_create_room_reply_flag() {
        let msg = ServerMessage::RoomCreated {
            room: "lobby".to_string(),
            creator: "alice".to_string(),
            ok: false,
        };
        let frame = msg.to_frame().unwrap();
        assert_eq!(frame.text().unwrap(), "lobby|alice|false");
        assert_eq!(ServerMessage::from_frame(&frame).unwrap(), msg);
    }

    #[test]
    fn test_init_data_layout() {
        let msg = ServerMessage::InitData {
            users: vec!["Admin".to_string(), "alice".to_string()],
            rooms: vec!["lobby".to_string()],
        };
        let frame = msg.to_frame().unwrap();
        assert_eq!(frame.text().unwrap(), "Admin,alice;lobby");
        assert_eq!(ServerMessage::from_frame(&frame).unwrap(), msg);
    }

    #[test]
    fn test_empty_room_list() {
        let frame = ServerMessage::RoomList { rooms: vec![] }.to_frame().unwrap();
        assert!(frame.payload.is_empty());
        assert_eq!(
            ServerMessage::from_frame(&frame).unwrap(),
            ServerMessage::RoomList { rooms: vec![] }
        );
    }

    #[test]
    fn test_group_message_any_subtype() {
        let frame = Frame::new(kind::GROUP, 0x01, "hello").unwrap();
        assert_eq!(
            ClientMessage::from_frame(&frame).unwrap(),
            ClientMessage::GroupMessage {
                text: "hello".to_string()
            }
        );
    }

    #[test]
    fn test_reserved_chars() {
        assert!(has_reserved_chars("a|b"));
        assert!(has_reserved_chars("a;b"));
        assert!(has_reserved_chars("a,b"));
        assert!(!has_reserved_chars("alice"));
    }
}
