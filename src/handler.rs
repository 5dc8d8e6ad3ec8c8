//! Message router
//!
//! Applies the protocol's business rules. Each handler mutates the
//! registries and returns the frames to send as [`Outbound`] directives;
//! the event loop resolves destinations and does the actual I/O, so this
//! module never touches a socket.

use std::net::SocketAddr;

use chrono::Local;
use tracing::{debug, info, warn};

use crate::client::ClientRegistry;
use crate::config::ServerConfig;
use crate::error::RoomError;
use crate::message::{ClientMessage, ServerMessage, MAX_MESSAGE_LEN};
use crate::room::RoomRegistry;
use crate::types::ConnectionId;

/// Who an outbound message goes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// One connection, authenticated or not
    Connection(ConnectionId),
    /// Every authenticated connection except the given one
    AllExcept(Option<ConnectionId>),
    /// Every connected member of a room except the given one
    Room {
        name: String,
        except: Option<ConnectionId>,
    },
}

impl Destination {
    /// Every authenticated connection
    pub fn everyone() -> Self {
        Destination::AllExcept(None)
    }
}

/// Instruction for the event loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Queue a message
    Deliver { to: Destination, message: ServerMessage },
    /// Flush what is queued for the connection, then close it
    Close(ConnectionId),
}

impl Outbound {
    fn to(conn: ConnectionId, message: ServerMessage) -> Self {
        Outbound::Deliver {
            to: Destination::Connection(conn),
            message,
        }
    }

    fn broadcast(to: Destination, message: ServerMessage) -> Self {
        Outbound::Deliver { to, message }
    }
}

/// Owner of the client and room registries
///
/// Lives on the event-loop thread; nothing else mutates it.
#[derive(Debug)]
pub struct Router {
    clients: ClientRegistry,
    rooms: RoomRegistry,
    server_name: String,
}

impl Router {
    pub fn new(config: &ServerConfig) -> Self {
        let mut clients = ClientRegistry::new(config.max_clients);
        clients.reserve(config.server_name.clone());
        Self {
            clients,
            rooms: RoomRegistry::new(config.max_rooms, config.history_limit),
            server_name: config.server_name.clone(),
        }
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    /// Dispatch one message from connection `conn`
    pub fn handle(&mut self, conn: ConnectionId, peer: SocketAddr, msg: ClientMessage) -> Vec<Outbound> {
        match msg {
            ClientMessage::ConnectRequest { nickname } => self.handle_connect(conn, peer, &nickname),
            ClientMessage::Disconnect => self.disconnect(conn),
            ClientMessage::InitRequest => self.handle_init(conn),
            ClientMessage::GroupMessage { text } => self.handle_group_message(conn, &text),
            ClientMessage::PrivateMessage { target, text } => {
                self.handle_private_message(conn, &target, &text)
            }
            ClientMessage::CreateRoom { room, .. } => self.handle_create_room(conn, &room),
            ClientMessage::JoinRoom { room, .. } => self.handle_join_room(conn, &room),
            ClientMessage::LeaveRoom { room, .. } => self.handle_leave_room(conn, &room),
            ClientMessage::RoomMessage { room, text, .. } => {
                self.handle_room_message(conn, &room, &text)
            }
        }
    }

    /// Handle connect-request
    fn handle_connect(&mut self, conn: ConnectionId, peer: SocketAddr, nickname: &str) -> Vec<Outbound> {
        if let Some(info) = self.clients.get(conn) {
            warn!("{} already authenticated as '{}'", conn, info.nickname);
            return Vec::new();
        }

        info!("'{}' connecting from {}", nickname, peer);

        if let Err(rejection) = self.clients.register(conn, nickname, peer) {
            info!("Rejected '{}' from {}: {}", nickname, peer, rejection);
            return vec![
                Outbound::to(
                    conn,
                    ServerMessage::ConnectError {
                        reason: rejection.to_string(),
                    },
                ),
                Outbound::Close(conn),
            ];
        }

        info!("'{}' connected ({} online)", nickname, self.clients.count());

        vec![
            Outbound::to(
                conn,
                ServerMessage::ConnectSuccess {
                    greeting: "Welcome!".to_string(),
                },
            ),
            Outbound::broadcast(
                Destination::AllExcept(Some(conn)),
                ServerMessage::ClientAdded {
                    nickname: nickname.to_string(),
                },
            ),
            Outbound::broadcast(
                Destination::AllExcept(Some(conn)),
                ServerMessage::GroupMessage {
                    text: format!("{} {} joined the chat", timestamp(), nickname),
                },
            ),
        ]
    }

    /// Tear down a connection's session
    ///
    /// Shared by explicit disconnects, transport failures, and admin
    /// kicks. Safe to call for a connection that was never authenticated
    /// or is already gone.
    pub fn disconnect(&mut self, conn: ConnectionId) -> Vec<Outbound> {
        let Some(info) = self.clients.unregister(conn) else {
            return vec![Outbound::Close(conn)];
        };

        info!("'{}' disconnected", info.nickname);

        let mut out = Vec::new();
        let mut room_deleted = false;

        for room in &info.joined_rooms {
            match self.rooms.leave(room, &info.nickname) {
                Ok(outcome) if outcome.room_deleted => room_deleted = true,
                Ok(_) => out.extend(self.room_departure(room, &info.nickname)),
                Err(e) => debug!("Cleanup of '{}' in '{}': {}", info.nickname, room, e),
            }
        }

        out.push(Outbound::broadcast(
            Destination::everyone(),
            ServerMessage::ClientRemoved {
                nickname: info.nickname.clone(),
            },
        ));
        if room_deleted {
            out.push(self.room_list_update());
        }
        out.push(Outbound::broadcast(
            Destination::everyone(),
            ServerMessage::GroupMessage {
                text: format!("{} {} left the chat", timestamp(), info.nickname),
            },
        ));
        out.push(Outbound::Close(conn));
        out
    }

    /// Handle initialization request
    fn handle_init(&mut self, conn: ConnectionId) -> Vec<Outbound> {
        if self.clients.get(conn).is_none() {
            return Vec::new();
        }

        let mut users = vec![self.server_name.clone()];
        users.extend(self.clients.snapshot_nicknames());

        vec![
            Outbound::to(
                conn,
                ServerMessage::InitData {
                    users,
                    rooms: self.rooms.list_names(),
                },
            ),
            Outbound::to(conn, ServerMessage::InitComplete),
        ]
    }

    /// Handle global chat message
    fn handle_group_message(&mut self, conn: ConnectionId, text: &str) -> Vec<Outbound> {
        let Some(sender) = self.clients.get(conn) else {
            return Vec::new();
        };
        if text.chars().count() > MAX_MESSAGE_LEN {
            debug!("Dropping oversized message from '{}'", sender.nickname);
            return Vec::new();
        }

        vec![Outbound::broadcast(
            Destination::AllExcept(Some(conn)),
            ServerMessage::GroupMessage {
                text: format!("{} {}: {}", timestamp(), sender.nickname, text),
            },
        )]
    }

    /// Handle private message
    fn handle_private_message(&mut self, conn: ConnectionId, target: &str, text: &str) -> Vec<Outbound> {
        let Some(sender) = self.clients.get(conn) else {
            return Vec::new();
        };
        if text.chars().count() > MAX_MESSAGE_LEN {
            return Vec::new();
        }
        let Some(target_conn) = self.clients.find_by_nickname(target) else {
            debug!("Private message from '{}' to unknown '{}'", sender.nickname, target);
            return Vec::new();
        };

        vec![
            Outbound::to(
                target_conn,
                ServerMessage::PrivateMessage {
                    sender: sender.nickname.clone(),
                    text: text.to_string(),
                },
            ),
            Outbound::to(
                conn,
                ServerMessage::PrivateConfirm {
                    target: target.to_string(),
                    text: text.to_string(),
                },
            ),
        ]
    }

    /// Handle room creation by a client
    fn handle_create_room(&mut self, conn: ConnectionId, room: &str) -> Vec<Outbound> {
        let Some(nickname) = self.nickname_of(conn) else {
            return Vec::new();
        };

        let ok = match self.rooms.create(room, &nickname) {
            Ok(_) => true,
            Err(e) => {
                info!("'{}' cannot create room '{}': {}", nickname, room, e);
                false
            }
        };

        let mut out = vec![Outbound::to(
            conn,
            ServerMessage::RoomCreated {
                room: room.to_string(),
                creator: nickname.clone(),
                ok,
            },
        )];

        if ok {
            if let Some(info) = self.clients.get_mut(conn) {
                info.joined_rooms.insert(room.to_string());
            }
            info!("Room '{}' created by '{}'", room, nickname);
            out.push(self.room_list_update());
        }
        out
    }

    /// Handle room joining
    fn handle_join_room(&mut self, conn: ConnectionId, room: &str) -> Vec<Outbound> {
        let Some(nickname) = self.nickname_of(conn) else {
            return Vec::new();
        };

        let already_member = self.rooms.get(room).is_some_and(|r| r.contains(&nickname));
        let (members, history) = match self.rooms.join(room, &nickname) {
            Ok(joined) => (
                joined.member_count(),
                joined
                    .history()
                    .map(|entry| ServerMessage::RoomMessage {
                        room: room.to_string(),
                        sender: entry.sender.clone(),
                        text: entry.to_string(),
                    })
                    .collect::<Vec<_>>(),
            ),
            Err(e) => {
                // Requester may have a stale room list
                debug!("'{}' cannot join '{}': {}", nickname, room, e);
                return Vec::new();
            }
        };

        if let Some(info) = self.clients.get_mut(conn) {
            info.joined_rooms.insert(room.to_string());
        }

        let mut out = vec![Outbound::to(
            conn,
            ServerMessage::RoomJoined {
                room: room.to_string(),
                user: nickname.clone(),
                ok: true,
            },
        )];
        if already_member {
            return out;
        }

        info!("'{}' joined room '{}' ({} members)", nickname, room, members);
        out.extend(history.into_iter().map(|msg| Outbound::to(conn, msg)));
        out.push(Outbound::broadcast(
            Destination::Room {
                name: room.to_string(),
                except: Some(conn),
            },
            ServerMessage::RoomMessage {
                room: room.to_string(),
                sender: self.server_name.clone(),
                text: format!("{} joined the room", nickname),
            },
        ));
        out.extend(self.room_users_update(room));
        out
    }

    /// Handle voluntary room leaving
    fn handle_leave_room(&mut self, conn: ConnectionId, room: &str) -> Vec<Outbound> {
        let Some(nickname) = self.nickname_of(conn) else {
            return Vec::new();
        };

        let outcome = match self.rooms.leave(room, &nickname) {
            Ok(outcome) => outcome,
            Err(RoomError::NotFound(_)) => return Vec::new(),
            Err(e) => {
                debug!("'{}' cannot leave '{}': {}", nickname, room, e);
                return vec![Outbound::to(
                    conn,
                    ServerMessage::RoomLeft {
                        room: room.to_string(),
                        user: nickname,
                        ok: false,
                    },
                )];
            }
        };

        if let Some(info) = self.clients.get_mut(conn) {
            info.joined_rooms.remove(room);
        }
        info!("'{}' left room '{}'", nickname, room);

        let mut out = vec![Outbound::to(
            conn,
            ServerMessage::RoomLeft {
                room: room.to_string(),
                user: nickname.clone(),
                ok: true,
            },
        )];
        if outcome.room_deleted {
            info!("Room '{}' deleted (empty)", room);
            out.push(self.room_list_update());
        } else {
            out.extend(self.room_departure(room, &nickname));
        }
        out
    }

    /// Handle room chat message
    fn handle_room_message(&mut self, conn: ConnectionId, room: &str, text: &str) -> Vec<Outbound> {
        let Some(nickname) = self.nickname_of(conn) else {
            return Vec::new();
        };

        if let Err(e) = self.rooms.post(room, &nickname, text) {
            debug!("Dropping room message from '{}': {}", nickname, e);
            return Vec::new();
        }

        vec![Outbound::broadcast(
            Destination::Room {
                name: room.to_string(),
                except: Some(conn),
            },
            ServerMessage::RoomMessage {
                room: room.to_string(),
                sender: nickname,
                text: text.to_string(),
            },
        )]
    }

    /// Administrative kick
    pub fn kick(&mut self, nickname: &str) -> Vec<Outbound> {
        self.eject(nickname, "you have been kicked by admin")
    }

    /// Administrative ban: record the origin address, then kick
    pub fn ban(&mut self, nickname: &str) -> Vec<Outbound> {
        let Some(info) = self
            .clients
            .find_by_nickname(nickname)
            .and_then(|conn| self.clients.get(conn))
        else {
            warn!("Cannot ban '{}': not connected", nickname);
            return Vec::new();
        };

        let ip = info.address.ip();
        self.clients.ban(ip, nickname);
        info!("Banned '{}' (IP: {})", nickname, ip);
        self.eject(nickname, "you have been banned by admin")
    }

    fn eject(&mut self, nickname: &str, reason: &str) -> Vec<Outbound> {
        let Some(conn) = self.clients.find_by_nickname(nickname) else {
            warn!("Cannot remove '{}': not connected", nickname);
            return Vec::new();
        };

        info!("Removing '{}': {}", nickname, reason);
        let mut out = vec![Outbound::to(
            conn,
            ServerMessage::ConnectError {
                reason: reason.to_string(),
            },
        )];
        out.extend(self.disconnect(conn));
        out
    }

    /// Room created from the operator console
    pub fn create_room_as_admin(&mut self, name: &str) -> Result<Vec<Outbound>, RoomError> {
        self.rooms.create(name, &self.server_name)?;
        info!("Admin created room '{}'", name);
        Ok(vec![self.room_list_update()])
    }

    /// Global message from the operator
    pub fn announce(&mut self, text: &str) -> Result<Vec<Outbound>, RoomError> {
        if text.chars().count() > MAX_MESSAGE_LEN {
            return Err(RoomError::MessageTooLong);
        }
        Ok(vec![Outbound::broadcast(
            Destination::everyone(),
            ServerMessage::GroupMessage {
                text: format!("{} {}: {}", timestamp(), self.server_name, text),
            },
        )])
    }

    /// Connections a destination currently covers
    pub fn resolve(&self, to: &Destination) -> Vec<ConnectionId> {
        match to {
            Destination::Connection(conn) => vec![*conn],
            Destination::AllExcept(except) => self
                .clients
                .ids()
                .filter(|id| Some(*id) != *except)
                .collect(),
            Destination::Room { name, except } => match self.rooms.get(name) {
                Some(room) => room
                    .members()
                    .filter_map(|nick| self.clients.find_by_nickname(nick))
                    .filter(|id| Some(*id) != *except)
                    .collect(),
                None => Vec::new(),
            },
        }
    }

    /// Forget every session and room. Bans are kept.
    pub fn clear(&mut self) {
        self.clients.clear();
        self.rooms.clear();
    }

    fn nickname_of(&self, conn: ConnectionId) -> Option<String> {
        self.clients.get(conn).map(|info| info.nickname.clone())
    }

    fn room_list_update(&self) -> Outbound {
        Outbound::broadcast(
            Destination::everyone(),
            ServerMessage::RoomList {
                rooms: self.rooms.list_names(),
            },
        )
    }

    fn room_users_update(&self, room: &str) -> Option<Outbound> {
        let users = self.rooms.users_of(room).ok()?;
        Some(Outbound::broadcast(
            Destination::Room {
                name: room.to_string(),
                except: None,
            },
            ServerMessage::RoomUsers {
                room: room.to_string(),
                users,
            },
        ))
    }

    /// Notice and member list for the members left behind
    fn room_departure(&self, room: &str, nickname: &str) -> Vec<Outbound> {
        let mut out = vec![Outbound::broadcast(
            Destination::Room {
                name: room.to_string(),
                except: None,
            },
            ServerMessage::RoomMessage {
                room: room.to_string(),
                sender: self.server_name.clone(),
                text: format!("{} left the room", nickname),
            },
        )];
        out.extend(self.room_users_update(room));
        out
    }
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Router {
        Router::new(&ServerConfig::default())
    }

    fn peer(last: u8) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, last], 50000))
    }

    fn connect(router: &mut Router, conn: usize, nickname: &str) -> Vec<Outbound> {
        router.handle(
            ConnectionId(conn),
            peer(conn as u8),
            ClientMessage::ConnectRequest {
                nickname: nickname.to_string(),
            },
        )
    }

    /// Messages each connection would receive, in order
    fn deliveries(router: &Router, out: &[Outbound], conn: usize) -> Vec<ServerMessage> {
        out.iter()
            .filter_map(|o| match o {
                Outbound::Deliver { to, message } => router
                    .resolve(to)
                    .contains(&ConnectionId(conn))
                    .then(|| message.clone()),
                Outbound::Close(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_connect_success_notifies_others() {
        let mut router = router();
        connect(&mut router, 2, "alice");
        let out = connect(&mut router, 3, "bob");

        assert_eq!(
            deliveries(&router, &out, 3),
            vec![ServerMessage::ConnectSuccess {
                greeting: "Welcome!".to_string()
            }]
        );
        let to_alice = deliveries(&router, &out, 2);
        assert_eq!(
            to_alice[0],
            ServerMessage::ClientAdded {
                nickname: "bob".to_string()
            }
        );
        assert!(matches!(
            &to_alice[1],
            ServerMessage::GroupMessage { text } if text.ends_with(" bob joined the chat")
        ));
    }

    #[test]
    fn test_connect_rejection_closes() {
        let mut router = router();
        connect(&mut router, 2, "alice");
        let out = connect(&mut router, 3, "alice");

        assert_eq!(
            out,
            vec![
                Outbound::to(
                    ConnectionId(3),
                    ServerMessage::ConnectError {
                        reason: "nickname already taken".to_string()
                    }
                ),
                Outbound::Close(ConnectionId(3)),
            ]
        );
        assert_eq!(router.clients().count(), 1);
    }

    #[test]
    fn test_eleventh_client_rejected() {
        let mut router = router();
        for i in 0..10 {
            connect(&mut router, i + 2, &format!("user{}", i));
        }
        let out = connect(&mut router, 20, "late");
        assert!(matches!(
            &out[0],
            Outbound::Deliver { message: ServerMessage::ConnectError { reason }, .. }
                if reason == "server is full"
        ));
        assert_eq!(router.clients().count(), 10);
    }

    #[test]
    fn test_unauthenticated_messages_dropped() {
        let mut router = router();
        let out = router.handle(
            ConnectionId(2),
            peer(2),
            ClientMessage::GroupMessage {
                text: "hello".to_string(),
            },
        );
        assert!(out.is_empty());
        let out = router.handle(ConnectionId(2), peer(2), ClientMessage::InitRequest);
        assert!(out.is_empty());
    }

    #[test]
    fn test_init_lists_users_and_rooms() {
        let mut router = router();
        connect(&mut router, 2, "alice");
        router.create_room_as_admin("lobby").unwrap();

        let out = router.handle(ConnectionId(2), peer(2), ClientMessage::InitRequest);
        assert_eq!(
            deliveries(&router, &out, 2),
            vec![
                ServerMessage::InitData {
                    users: vec!["Admin".to_string(), "alice".to_string()],
                    rooms: vec!["lobby".to_string()],
                },
                ServerMessage::InitComplete,
            ]
        );
    }

    #[test]
    fn test_group_message_excludes_sender() {
        let mut router = router();
        connect(&mut router, 2, "alice");
        connect(&mut router, 3, "bob");

        let out = router.handle(
            ConnectionId(2),
            peer(2),
            ClientMessage::GroupMessage {
                text: "hello".to_string(),
            },
        );
        assert!(deliveries(&router, &out, 2).is_empty());
        assert!(matches!(
            &deliveries(&router, &out, 3)[0],
            ServerMessage::GroupMessage { text } if text.ends_with(" alice: hello")
        ));

        let out = router.handle(
            ConnectionId(2),
            peer(2),
            ClientMessage::GroupMessage {
                text: "x".repeat(501),
            },
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_private_message() {
        let mut router = router();
        connect(&mut router, 2, "alice");
        connect(&mut router, 3, "bob");
        connect(&mut router, 4, "carol");

        let out = router.handle(
            ConnectionId(2),
            peer(2),
            ClientMessage::PrivateMessage {
                target: "bob".to_string(),
                text: "psst".to_string(),
            },
        );
        assert_eq!(
            deliveries(&router, &out, 3),
            vec![ServerMessage::PrivateMessage {
                sender: "alice".to_string(),
                text: "psst".to_string()
            }]
        );
        assert!(deliveries(&router, &out, 4).is_empty());

        let out = router.handle(
            ConnectionId(2),
            peer(2),
            ClientMessage::PrivateMessage {
                target: "nobody".to_string(),
                text: "psst".to_string(),
            },
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_create_room_failure_flag() {
        let mut router = router();
        connect(&mut router, 2, "alice");
        router.handle(
            ConnectionId(2),
            peer(2),
            ClientMessage::CreateRoom {
                room: "lobby".to_string(),
                creator: "alice".to_string(),
            },
        );

        let out = router.handle(
            ConnectionId(2),
            peer(2),
            ClientMessage::CreateRoom {
                room: "lobby".to_string(),
                creator: "alice".to_string(),
            },
        );
        assert_eq!(
            out,
            vec![Outbound::to(
                ConnectionId(2),
                ServerMessage::RoomCreated {
                    room: "lobby".to_string(),
                    creator: "alice".to_string(),
                    ok: false,
                }
            )]
        );
    }

    #[test]
    fn test_room_flow() {
        let mut router = router();
        connect(&mut router, 2, "alice");
        connect(&mut router, 3, "bob");

        let out = router.handle(
            ConnectionId(2),
            peer(2),
            ClientMessage::CreateRoom {
                room: "lobby".to_string(),
                creator: "alice".to_string(),
            },
        );
        assert!(deliveries(&router, &out, 3).contains(&ServerMessage::RoomList {
            rooms: vec!["lobby".to_string()]
        }));
        assert!(router.clients().get(ConnectionId(2)).unwrap().joined_rooms.contains("lobby"));

        let out = router.handle(
            ConnectionId(3),
            peer(3),
            ClientMessage::JoinRoom {
                room: "lobby".to_string(),
                user: "bob".to_string(),
            },
        );
        assert_eq!(
            deliveries(&router, &out, 3)[0],
            ServerMessage::RoomJoined {
                room: "lobby".to_string(),
                user: "bob".to_string(),
                ok: true
            }
        );
        assert!(deliveries(&router, &out, 2).contains(&ServerMessage::RoomMessage {
            room: "lobby".to_string(),
            sender: "Admin".to_string(),
            text: "bob joined the room".to_string(),
        }));

        let out = router.handle(
            ConnectionId(2),
            peer(2),
            ClientMessage::RoomMessage {
                room: "lobby".to_string(),
                sender: "alice".to_string(),
                text: "hi".to_string(),
            },
        );
        assert_eq!(
            deliveries(&router, &out, 3),
            vec![ServerMessage::RoomMessage {
                room: "lobby".to_string(),
                sender: "alice".to_string(),
                text: "hi".to_string(),
            }]
        );
        assert!(deliveries(&router, &out, 2).is_empty());
    }

    #[test]
    fn test_join_replays_history() {
        let mut router = router();
        connect(&mut router, 2, "alice");
        connect(&mut router, 3, "bob");
        router.handle(
            ConnectionId(2),
            peer(2),
            ClientMessage::CreateRoom {
                room: "lobby".to_string(),
                creator: "alice".to_string(),
            },
        );
        for text in ["one", "two"] {
            router.handle(
                ConnectionId(2),
                peer(2),
                ClientMessage::RoomMessage {
                    room: "lobby".to_string(),
                    sender: "alice".to_string(),
                    text: text.to_string(),
                },
            );
        }

        let out = router.handle(
            ConnectionId(3),
            peer(3),
            ClientMessage::JoinRoom {
                room: "lobby".to_string(),
                user: "bob".to_string(),
            },
        );
        let to_bob = deliveries(&router, &out, 3);
        for (msg, expected) in to_bob[1..3].iter().zip(["one", "two"]) {
            let ServerMessage::RoomMessage { room, sender, text } = msg else {
                panic!("expected a room message, got {:?}", msg);
            };
            assert_eq!(room, "lobby");
            assert_eq!(sender, "alice");
            // "HH:MM:SS alice: one"
            let (time, rest) = text.split_once(' ').unwrap();
            assert_eq!(time.len(), 8);
            assert_eq!(time.matches(':').count(), 2);
            assert!(time.split(':').all(|part| part.parse::<u8>().is_ok()));
            assert_eq!(rest, format!("alice: {}", expected));
        }
    }

    #[test]
    fn test_join_unknown_room_is_silent() {
        let mut router = router();
        connect(&mut router, 2, "alice");
        let out = router.handle(
            ConnectionId(2),
            peer(2),
            ClientMessage::JoinRoom {
                room: "nowhere".to_string(),
                user: "alice".to_string(),
            },
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_leave_last_member_deletes_room() {
        let mut router = router();
        connect(&mut router, 2, "alice");
        connect(&mut router, 3, "bob");
        router.handle(
            ConnectionId(2),
            peer(2),
            ClientMessage::CreateRoom {
                room: "R1".to_string(),
                creator: "alice".to_string(),
            },
        );

        let out = router.handle(
            ConnectionId(2),
            peer(2),
            ClientMessage::LeaveRoom {
                room: "R1".to_string(),
                user: "alice".to_string(),
            },
        );
        assert!(router.rooms().list_names().is_empty());
        assert!(deliveries(&router, &out, 3).contains(&ServerMessage::RoomList { rooms: vec![] }));
        assert!(router.clients().get(ConnectionId(2)).unwrap().joined_rooms.is_empty());
    }

    #[test]
    fn test_disconnect_cleans_rooms() {
        let mut router = router();
        connect(&mut router, 2, "alice");
        connect(&mut router, 3, "bob");
        for room in ["solo", "shared"] {
            router.handle(
                ConnectionId(2),
                peer(2),
                ClientMessage::CreateRoom {
                    room: room.to_string(),
                    creator: "alice".to_string(),
                },
            );
        }
        router.handle(
            ConnectionId(3),
            peer(3),
            ClientMessage::JoinRoom {
                room: "shared".to_string(),
                user: "bob".to_string(),
            },
        );

        let out = router.disconnect(ConnectionId(2));
        assert_eq!(router.rooms().list_names(), vec!["shared"]);
        assert_eq!(router.rooms().users_of("shared").unwrap(), vec!["bob"]);

        let to_bob = deliveries(&router, &out, 3);
        assert!(to_bob.contains(&ServerMessage::ClientRemoved {
            nickname: "alice".to_string()
        }));
        assert!(to_bob.contains(&ServerMessage::RoomList {
            rooms: vec!["shared".to_string()]
        }));
        assert!(to_bob.contains(&ServerMessage::RoomMessage {
            room: "shared".to_string(),
            sender: "Admin".to_string(),
            text: "alice left the room".to_string(),
        }));
        assert_eq!(out.last(), Some(&Outbound::Close(ConnectionId(2))));

        // Second disconnect is a no-op apart from the close
        assert_eq!(
            router.disconnect(ConnectionId(2)),
            vec![Outbound::Close(ConnectionId(2))]
        );
    }

    #[test]
    fn test_ban_blocks_address() {
        let mut router = router();
        connect(&mut router, 2, "mallory");

        let out = router.ban("mallory");
        assert_eq!(
            out[0],
            Outbound::to(
                ConnectionId(2),
                ServerMessage::ConnectError {
                    reason: "you have been banned by admin".to_string()
                }
            )
        );
        assert!(out.contains(&Outbound::Close(ConnectionId(2))));
        assert_eq!(router.clients().count(), 0);

        // Same address, different connection and nickname
        let out = router.handle(
            ConnectionId(5),
            peer(2),
            ClientMessage::ConnectRequest {
                nickname: "eve".to_string(),
            },
        );
        assert!(matches!(
            &out[0],
            Outbound::Deliver { message: ServerMessage::ConnectError { reason }, .. }
                if reason == "you are banned: mallory"
        ));
    }

    #[test]
    fn test_kick_unknown_is_noop() {
        let mut router = router();
        assert!(router.kick("ghost").is_empty());
    }
}
