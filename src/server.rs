//! ChatServer event loop
//!
//! A single thread owns the listening socket, every client socket, and the
//! [`Router`] with its registries. Readiness comes from mio; nothing on the
//! loop blocks except the bounded poll wait. Operator actions reach the
//! loop as [`ServerCommand`]s through a [`ServerHandle`], which wakes the
//! poll so they are applied promptly.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionState, ReadStatus};
use crate::error::ServerError;
use crate::handler::{Outbound, Router};
use crate::message::{ClientMessage, ServerMessage};
use crate::types::ConnectionId;

const WAKER: Token = Token(0);
const LISTENER: Token = Token(1);
const FIRST_CONNECTION_ID: usize = 2;
const EVENTS_CAPACITY: usize = 256;
/// Reads per connection per readiness pass
const READ_BUDGET_CHUNKS: usize = 16;

/// Operator commands marshaled onto the loop thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    /// Disconnect a client
    Kick { nickname: String },
    /// Ban a client's address, then disconnect it
    Ban { nickname: String },
    /// Create a room owned by the server
    CreateRoom { name: String },
    /// Global message from the operator
    Announce { text: String },
}

/// Thread-safe handle for controlling a running server
#[derive(Debug, Clone)]
pub struct ServerHandle {
    commands: mpsc::UnboundedSender<ServerCommand>,
    waker: Arc<Waker>,
    shutdown: Arc<AtomicBool>,
}

impl ServerHandle {
    /// Queue a command for the event loop
    pub fn send(&self, cmd: ServerCommand) -> Result<(), ServerError> {
        self.commands
            .send(cmd)
            .map_err(|_| ServerError::CommandChannelClosed)?;
        self.waker.wake()?;
        Ok(())
    }

    pub fn kick(&self, nickname: impl Into<String>) -> Result<(), ServerError> {
        self.send(ServerCommand::Kick {
            nickname: nickname.into(),
        })
    }

    pub fn ban(&self, nickname: impl Into<String>) -> Result<(), ServerError> {
        self.send(ServerCommand::Ban {
            nickname: nickname.into(),
        })
    }

    pub fn create_room(&self, name: impl Into<String>) -> Result<(), ServerError> {
        self.send(ServerCommand::CreateRoom { name: name.into() })
    }

    pub fn announce(&self, text: impl Into<String>) -> Result<(), ServerError> {
        self.send(ServerCommand::Announce { text: text.into() })
    }

    /// Ask the loop to notify every client and stop
    pub fn shutdown(&self) -> Result<(), ServerError> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.waker.wake()?;
        Ok(())
    }
}

/// The chat server
pub struct ChatServer {
    config: ServerConfig,
    poll: Poll,
    listener: TcpListener,
    connections: HashMap<ConnectionId, Connection>,
    router: Router,
    commands: mpsc::UnboundedReceiver<ServerCommand>,
    shutdown: Arc<AtomicBool>,
    next_id: usize,
    /// Connections whose transport failed while flushing
    failed: Vec<ConnectionId>,
    /// Connections that used up their read budget with data left
    still_readable: Vec<ConnectionId>,
}

impl ChatServer {
    /// Bind the listening socket and set up the poll
    ///
    /// Failing to bind is the only fatal server error.
    pub fn bind(config: ServerConfig) -> Result<(Self, ServerHandle), ServerError> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(config.bind).map_err(|source| ServerError::Bind {
            addr: config.bind,
            source,
        })?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let shutdown = Arc::new(AtomicBool::new(false));

        info!("Chat server listening on {}", listener.local_addr()?);

        let handle = ServerHandle {
            commands: cmd_tx,
            waker,
            shutdown: shutdown.clone(),
        };
        let server = Self {
            router: Router::new(&config),
            config,
            poll,
            listener,
            connections: HashMap::new(),
            commands: cmd_rx,
            shutdown,
            next_id: FIRST_CONNECTION_ID,
            failed: Vec::new(),
            still_readable: Vec::new(),
        };
        Ok((server, handle))
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Run the event loop until shutdown is requested
    pub fn run(mut self) -> Result<(), ServerError> {
        info!("ChatServer started");
        let result = self.event_loop();
        if let Err(e) = &result {
            error!("Event loop failed: {}", e);
        }
        self.shutdown_all();
        info!("ChatServer stopped");
        result
    }

    fn event_loop(&mut self) -> Result<(), ServerError> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        while !self.shutdown.load(Ordering::SeqCst) {
            // Leftover reads mean there is work now; don't wait for readiness
            let backlog = std::mem::take(&mut self.still_readable);
            let timeout = if backlog.is_empty() {
                self.config.poll_timeout()
            } else {
                Duration::ZERO
            };

            if let Err(e) = self.poll.poll(&mut events, Some(timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    self.still_readable = backlog;
                    continue;
                }
                return Err(e.into());
            }

            for event in events.iter() {
                match event.token() {
                    WAKER => {}
                    LISTENER => self.accept_connections(),
                    token => {
                        let id = ConnectionId::from(token);
                        if event.is_readable() || event.is_read_closed() || event.is_error() {
                            self.on_readable(id);
                        }
                        if event.is_writable() {
                            self.on_writable(id);
                        }
                    }
                }
            }

            for id in backlog {
                if !self.still_readable.contains(&id) {
                    self.on_readable(id);
                }
            }

            self.drain_commands();
        }
        Ok(())
    }

    /// Accept every pending connection
    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    if self.connections.len() >= self.config.max_connections {
                        warn!("Refusing connection from {}: too many open sockets", peer);
                        continue;
                    }

                    let id = ConnectionId(self.next_id);
                    self.next_id += 1;

                    if let Err(e) = self.poll.registry().register(
                        &mut stream,
                        id.token(),
                        Interest::READABLE | Interest::WRITABLE,
                    ) {
                        warn!("Failed to register {}: {}", peer, e);
                        continue;
                    }

                    info!("New connection from {} ({})", peer, id);
                    self.connections.insert(id, Connection::new(id, stream, peer));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    break;
                }
            }
        }
    }

    /// Read, reassemble, and dispatch frames from one connection
    ///
    /// Reads at most `READ_BUDGET_CHUNKS` chunks, decoding after each one.
    /// A connection that still has data when the budget runs out is
    /// revisited after the other ready connections.
    fn on_readable(&mut self, id: ConnectionId) {
        for _ in 0..READ_BUDGET_CHUNKS {
            let Some(conn) = self.connections.get_mut(&id) else {
                return;
            };

            let status = match conn.read_chunk() {
                Ok(status) => status,
                Err(e) => {
                    debug!("Read error on {}: {}", id, e);
                    self.drop_connection(id);
                    return;
                }
            };

            // Frames that arrived before end-of-stream still count
            if !self.dispatch_buffered(id) {
                return;
            }

            match status {
                ReadStatus::Read(_) => {}
                ReadStatus::Drained => return,
                ReadStatus::Eof => {
                    debug!("{} reached end of stream", id);
                    self.drop_connection(id);
                    return;
                }
            }
        }
        self.still_readable.push(id);
    }

    /// Dispatch every complete frame in the accumulator. Returns false
    /// once the connection is gone.
    fn dispatch_buffered(&mut self, id: ConnectionId) -> bool {
        loop {
            let Some(conn) = self.connections.get_mut(&id) else {
                return false;
            };
            let peer = conn.peer;
            match conn.next_frame(self.config.max_payload) {
                Ok(Some(frame)) => match ClientMessage::from_frame(&frame) {
                    Ok(msg) => self.dispatch(id, peer, msg),
                    Err(e) if e.is_fatal() => {
                        warn!("Protocol violation from {}: {}", id, e);
                        self.drop_connection(id);
                        return false;
                    }
                    Err(e) => debug!("Ignoring frame from {}: {}", id, e),
                },
                Ok(None) => return true,
                Err(e) => {
                    warn!("Protocol violation from {}: {}", id, e);
                    self.drop_connection(id);
                    return false;
                }
            }
        }
    }

    fn on_writable(&mut self, id: ConnectionId) {
        self.flush_connection(id);
        self.process_failures();
    }

    /// Route one message and apply the result
    fn dispatch(&mut self, id: ConnectionId, peer: SocketAddr, msg: ClientMessage) {
        debug!("{} sent {:?}", id, msg);
        let out = self.router.handle(id, peer, msg);
        self.apply(out);

        if self.router.clients().get(id).is_some() {
            if let Some(conn) = self.connections.get_mut(&id) {
                if conn.state == ConnectionState::Established {
                    conn.state = ConnectionState::Authenticated;
                }
            }
        }
    }

    /// Queue, flush, and close as the router instructed
    fn apply(&mut self, out: Vec<Outbound>) {
        let mut touched = Vec::new();

        for item in out {
            match item {
                Outbound::Deliver { to, message } => {
                    let bytes = match message.to_frame() {
                        Ok(frame) => frame.to_bytes(),
                        Err(e) => {
                            warn!("Dropping unencodable message {:?}: {}", message, e);
                            continue;
                        }
                    };
                    for target in self.router.resolve(&to) {
                        if let Some(conn) = self.connections.get_mut(&target) {
                            conn.queue(&bytes);
                            touched.push(target);
                        }
                    }
                }
                Outbound::Close(id) => self.close_connection(id),
            }
        }

        touched.sort_unstable();
        touched.dedup();
        for id in touched {
            self.flush_connection(id);
        }
        self.process_failures();
    }

    fn flush_connection(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        if let Err(e) = conn.flush() {
            debug!("Write error on {}: {}", id, e);
            self.failed.push(id);
        } else if conn.pending() > self.config.max_outbound_bytes {
            warn!("{} is not keeping up ({} bytes queued)", id, conn.pending());
            self.failed.push(id);
        }
    }

    fn process_failures(&mut self) {
        while let Some(id) = self.failed.pop() {
            self.drop_connection(id);
        }
    }

    /// Transport failure or end-of-stream: same cleanup as a disconnect
    fn drop_connection(&mut self, id: ConnectionId) {
        let out = self.router.disconnect(id);
        self.apply(out);
    }

    fn close_connection(&mut self, id: ConnectionId) {
        let Some(mut conn) = self.connections.remove(&id) else {
            return;
        };
        conn.close();
        if let Err(e) = self.poll.registry().deregister(conn.stream_mut()) {
            debug!("Failed to deregister {}: {}", id, e);
        }
        info!("Connection {} from {} closed", id, conn.peer);
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            self.execute(cmd);
        }
    }

    fn execute(&mut self, cmd: ServerCommand) {
        debug!("Executing {:?}", cmd);
        let out = match cmd {
            ServerCommand::Kick { nickname } => self.router.kick(&nickname),
            ServerCommand::Ban { nickname } => self.router.ban(&nickname),
            ServerCommand::CreateRoom { name } => {
                self.router.create_room_as_admin(&name).unwrap_or_else(|e| {
                    warn!("Cannot create room '{}': {}", name, e);
                    Vec::new()
                })
            }
            ServerCommand::Announce { text } => self.router.announce(&text).unwrap_or_else(|e| {
                warn!("Cannot announce: {}", e);
                Vec::new()
            }),
        };
        self.apply(out);
    }

    /// Notify every connection, close all sockets, clear the registries
    fn shutdown_all(&mut self) {
        info!("Shutting down {} connections", self.connections.len());

        let notice = ServerMessage::ConnectError {
            reason: "server is shutting down".to_string(),
        }
        .to_frame()
        .map(|frame| frame.to_bytes());

        for (id, mut conn) in self.connections.drain() {
            if let Ok(bytes) = &notice {
                conn.queue(bytes);
            }
            conn.close();
            if let Err(e) = self.poll.registry().deregister(conn.stream_mut()) {
                debug!("Failed to deregister {}: {}", id, e);
            }
        }
        self.router.clear();
    }
}
