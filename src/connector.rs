//! Chat client
//!
//! Async counterpart to the server for tools and tests. The socket is split
//! into a read task and a write task framed with [`FrameCodec`]; decoded
//! server messages reach the caller as [`ClientEvent`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use crate::codec::FrameCodec;
use crate::error::ClientError;
use crate::message::{ClientMessage, ServerMessage};

/// Channel buffer size for outgoing messages and events
const CHANNEL_BUFFER_SIZE: usize = 64;

/// Something the server told us
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Nickname accepted
    Connected,
    /// Initial snapshot received; chat and room actions are now allowed
    Initialized {
        users: Vec<String>,
        rooms: Vec<String>,
    },
    /// Connection ended
    Disconnected { reason: String },
    GlobalMessage { text: String },
    PrivateMessage { sender: String, text: String },
    /// Our private message was delivered
    PrivateSent { target: String, text: String },
    RoomMessage {
        room: String,
        sender: String,
        text: String,
    },
    UserListChanged(Vec<String>),
    RoomListChanged(Vec<String>),
    RoomCreated { room: String, ok: bool },
    RoomJoined { room: String, ok: bool },
    RoomLeft { room: String, ok: bool },
    RoomUsers { room: String, users: Vec<String> },
    /// Server refused or ended the session
    Error { message: String },
}

/// Client-side view of the session, fed by server messages
#[derive(Debug, Default)]
struct Session {
    users: Vec<String>,
    rooms: Vec<String>,
    /// Last reason the server gave for refusing us
    close_reason: Option<String>,
}

impl Session {
    fn apply(&mut self, msg: ServerMessage) -> Vec<ClientEvent> {
        match msg {
            ServerMessage::ConnectSuccess { .. } => vec![ClientEvent::Connected],
            ServerMessage::ConnectError { reason } => {
                self.close_reason = Some(reason.clone());
                vec![ClientEvent::Error { message: reason }]
            }
            ServerMessage::GroupMessage { text } => vec![ClientEvent::GlobalMessage { text }],
            ServerMessage::PrivateMessage { sender, text } => {
                vec![ClientEvent::PrivateMessage { sender, text }]
            }
            ServerMessage::PrivateConfirm { target, text } => {
                vec![ClientEvent::PrivateSent { target, text }]
            }
            ServerMessage::ClientAdded { nickname } => {
                if !self.users.contains(&nickname) {
                    self.users.push(nickname);
                }
                vec![ClientEvent::UserListChanged(self.users.clone())]
            }
            ServerMessage::ClientRemoved { nickname } => {
                self.users.retain(|user| *user != nickname);
                vec![ClientEvent::UserListChanged(self.users.clone())]
            }
            ServerMessage::ClientList { nicknames } => {
                self.users = nicknames;
                vec![ClientEvent::UserListChanged(self.users.clone())]
            }
            ServerMessage::RoomCreated { room, ok, .. } => vec![ClientEvent::RoomCreated { room, ok }],
            ServerMessage::RoomJoined { room, ok, .. } => vec![ClientEvent::RoomJoined { room, ok }],
            ServerMessage::RoomLeft { room, ok, .. } => vec![ClientEvent::RoomLeft { room, ok }],
            ServerMessage::RoomMessage { room, sender, text } => {
                vec![ClientEvent::RoomMessage { room, sender, text }]
            }
            ServerMessage::RoomList { rooms } => {
                self.rooms = rooms;
                vec![ClientEvent::RoomListChanged(self.rooms.clone())]
            }
            ServerMessage::RoomUsers { room, users } => vec![ClientEvent::RoomUsers { room, users }],
            ServerMessage::InitData { users, rooms } => {
                self.users = users;
                self.rooms = rooms;
                Vec::new()
            }
            ServerMessage::InitComplete => vec![ClientEvent::Initialized {
                users: self.users.clone(),
                rooms: self.rooms.clone(),
            }],
        }
    }
}

/// Handle to a connected chat session
#[derive(Debug, Clone)]
pub struct ChatClient {
    nickname: String,
    outgoing: mpsc::Sender<ClientMessage>,
    initialized: Arc<AtomicBool>,
}

impl ChatClient {
    /// Connect and request `nickname`
    ///
    /// Returns once the connect-request is queued; whether the server
    /// accepted it arrives as [`ClientEvent::Connected`] or
    /// [`ClientEvent::Error`] on the returned receiver.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        nickname: &str,
    ) -> Result<(Self, mpsc::Receiver<ClientEvent>), ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        info!("Connected to {} as '{}'", peer, nickname);

        let (read_half, write_half) = stream.into_split();
        let reader = FramedRead::new(read_half, FrameCodec::new());
        let writer = FramedWrite::new(write_half, FrameCodec::new());

        let (out_tx, out_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let initialized = Arc::new(AtomicBool::new(false));

        let mut read_task = tokio::spawn(read_loop(
            reader,
            out_tx.clone(),
            event_tx.clone(),
            initialized.clone(),
        ));
        let mut write_task = tokio::spawn(write_loop(writer, out_rx));

        let flag = initialized.clone();
        tokio::spawn(async move {
            // Whichever side ends first takes the other down with it
            let reason = tokio::select! {
                res = &mut read_task => {
                    write_task.abort();
                    res.unwrap_or_else(|e| e.to_string())
                }
                _ = &mut write_task => {
                    read_task.abort();
                    "disconnected".to_string()
                }
            };
            flag.store(false, Ordering::SeqCst);
            debug!("Session with {} ended: {}", peer, reason);
            let _ = event_tx.send(ClientEvent::Disconnected { reason }).await;
        });

        out_tx
            .send(ClientMessage::ConnectRequest {
                nickname: nickname.to_string(),
            })
            .await
            .map_err(|_| ClientError::Closed)?;

        let client = Self {
            nickname: nickname.to_string(),
            outgoing: out_tx,
            initialized,
        };
        Ok((client, event_rx))
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// Whether `INIT_COMPLETE` has arrived
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub async fn send_group_message(&self, text: &str) -> Result<(), ClientError> {
        self.send_initialized(ClientMessage::GroupMessage {
            text: text.to_string(),
        })
        .await
    }

    pub async fn send_private_message(&self, target: &str, text: &str) -> Result<(), ClientError> {
        self.send_initialized(ClientMessage::PrivateMessage {
            target: target.to_string(),
            text: text.to_string(),
        })
        .await
    }

    pub async fn create_room(&self, room: &str) -> Result<(), ClientError> {
        self.send_initialized(ClientMessage::CreateRoom {
            room: room.to_string(),
            creator: self.nickname.clone(),
        })
        .await
    }

    pub async fn join_room(&self, room: &str) -> Result<(), ClientError> {
        self.send_initialized(ClientMessage::JoinRoom {
            room: room.to_string(),
            user: self.nickname.clone(),
        })
        .await
    }

    pub async fn leave_room(&self, room: &str) -> Result<(), ClientError> {
        self.send_initialized(ClientMessage::LeaveRoom {
            room: room.to_string(),
            user: self.nickname.clone(),
        })
        .await
    }

    pub async fn send_room_message(&self, room: &str, text: &str) -> Result<(), ClientError> {
        self.send_initialized(ClientMessage::RoomMessage {
            room: room.to_string(),
            sender: self.nickname.clone(),
            text: text.to_string(),
        })
        .await
    }

    /// Say goodbye and close the connection
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.initialized.store(false, Ordering::SeqCst);
        self.send(ClientMessage::Disconnect).await
    }

    async fn send_initialized(&self, msg: ClientMessage) -> Result<(), ClientError> {
        if !self.is_initialized() {
            return Err(ClientError::NotInitialized);
        }
        self.send(msg).await
    }

    async fn send(&self, msg: ClientMessage) -> Result<(), ClientError> {
        self.outgoing.send(msg).await.map_err(|_| ClientError::Closed)
    }
}

/// Socket -> events. Returns why the session ended.
async fn read_loop(
    mut reader: FramedRead<OwnedReadHalf, FrameCodec>,
    replies: mpsc::Sender<ClientMessage>,
    events: mpsc::Sender<ClientEvent>,
    initialized: Arc<AtomicBool>,
) -> String {
    let mut session = Session::default();

    loop {
        let frame = match reader.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                warn!("Dropping connection: {}", e);
                return e.to_string();
            }
            None => break,
        };

        let msg = match ServerMessage::from_frame(&frame) {
            Ok(msg) => msg,
            Err(e) if e.is_fatal() => {
                warn!("Dropping connection: {}", e);
                return e.to_string();
            }
            Err(e) => {
                debug!("Ignoring frame: {}", e);
                continue;
            }
        };

        match &msg {
            ServerMessage::ConnectSuccess { .. } => {
                if replies.send(ClientMessage::InitRequest).await.is_err() {
                    break;
                }
            }
            ServerMessage::InitComplete => initialized.store(true, Ordering::SeqCst),
            _ => {}
        }

        for event in session.apply(msg) {
            // Caller may have stopped listening; keep the session alive anyway
            let _ = events.send(event).await;
        }
    }

    session
        .close_reason
        .unwrap_or_else(|| "connection closed by server".to_string())
}

/// Outgoing messages -> socket
async fn write_loop(
    mut writer: FramedWrite<OwnedWriteHalf, FrameCodec>,
    mut outgoing: mpsc::Receiver<ClientMessage>,
) {
    while let Some(msg) = outgoing.recv().await {
        let frame = match msg.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode {:?}: {}", msg, e);
                continue;
            }
        };
        if let Err(e) = writer.send(frame).await {
            debug!("Send failed, ending write task: {}", e);
            break;
        }
        if msg == ClientMessage::Disconnect {
            break;
        }
    }
    let _ = writer.close().await;
    debug!("Write task ended");
}
