//! Connection lifecycle and message routing for the replicated store
//!
//! This module binds every accepted connection to a client identifier and to
//! exactly one replicated variable:
//! - accept: assign the next id, greet the client with it, replay the current
//!   store to it and create its variable
//! - active: route each field-update message to the client's own variable
//! - close: remove the variable exactly once, whatever triggered the close
//!
//! Writes always target the sender's own key, so no message can mutate
//! another client's state.

use crate::config::ServerConfig;
use crate::error::{ServerError, StoreError};
use crate::outbox::Outbox;
use crate::store::VariableStore;
use log::{debug, info, warn};
use shared::{player_key, ClientId, Field, FieldValue, Packet, PlayerRecord, Vec3};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// Longest accepted username, model, texture or cosmetic string
pub const MAX_TEXT_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientRequest,
    ConnectionLost,
    TimedOut,
    TooManyMalformed,
    Lagging,
    ServerShutdown,
}

impl DisconnectReason {
    /// Whether the client should be told why it is being dropped
    fn notifies_client(&self) -> bool {
        matches!(
            self,
            DisconnectReason::TimedOut
                | DisconnectReason::TooManyMalformed
                | DisconnectReason::ServerShutdown
        )
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DisconnectReason::ClientRequest => "client disconnected",
            DisconnectReason::ConnectionLost => "connection lost",
            DisconnectReason::TimedOut => "client timeout",
            DisconnectReason::TooManyMalformed => "too many malformed messages",
            DisconnectReason::Lagging => "client not keeping up",
            DisconnectReason::ServerShutdown => "server shutting down",
        };
        f.write_str(text)
    }
}

/// What the connection's reader should do after a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close(DisconnectReason),
}

/// A connected client
#[derive(Debug)]
pub struct Connection {
    pub id: ClientId,
    pub addr: SocketAddr,
    pub state: ConnectionState,
    /// Last time any message arrived from this client
    pub last_seen: Instant,
    /// Malformed messages since the last well-formed one
    pub malformed_streak: u32,
    pub outbox: Arc<Outbox>,
}

impl Connection {
    pub fn new(id: ClientId, addr: SocketAddr, outbox: Arc<Outbox>) -> Self {
        Self {
            id,
            addr,
            state: ConnectionState::Connecting,
            last_seen: Instant::now(),
            malformed_streak: 0,
            outbox,
        }
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

pub struct ConnectionManager {
    store: Arc<Mutex<VariableStore>>,
    /// Live connections. Closed connections are removed, so absence means
    /// [`ConnectionState::Closed`].
    connections: RwLock<HashMap<ClientId, Connection>>,
    /// Never reused for the lifetime of the server
    next_client_id: AtomicU32,
    config: ServerConfig,
}

impl ConnectionManager {
    pub fn new(store: Arc<Mutex<VariableStore>>, config: ServerConfig) -> Self {
        Self {
            store,
            connections: RwLock::new(HashMap::new()),
            next_client_id: AtomicU32::new(1),
            config,
        }
    }

    pub fn store(&self) -> &Arc<Mutex<VariableStore>> {
        &self.store
    }

    /// Registers a new connection and creates its variable
    ///
    /// The new client's outbox first receives `AssignId`, then the replay of
    /// every existing variable, then the `Created` event of its own variable.
    pub async fn accept(&self, addr: SocketAddr) -> Result<(ClientId, Arc<Outbox>), ServerError> {
        let outbox = Arc::new(Outbox::new(self.config.outbox_capacity));

        let client_id = {
            let mut connections = self.connections.write().await;
            if connections.len() >= self.config.max_clients {
                return Err(ServerError::ServerFull(self.config.max_clients));
            }

            let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
            connections.insert(client_id, Connection::new(client_id, addr, Arc::clone(&outbox)));
            client_id
        };

        {
            let mut store = self.store.lock().await;
            outbox.push(Packet::AssignId { client_id });
            store.subscribe(client_id, Arc::clone(&outbox));

            let key = player_key(client_id);
            match store.create(&key, PlayerRecord::new(client_id)) {
                Ok(()) => {}
                Err(StoreError::DuplicateKey(key)) => {
                    // Only one variable per client may exist; keep the live one
                    warn!("Variable {} already present for new client {}", key, client_id);
                }
                Err(e) => warn!("Failed to create variable for client {}: {}", client_id, e),
            }
        }

        let still_connected = match self.connections.write().await.get_mut(&client_id) {
            Some(connection) => {
                connection.state = ConnectionState::Active;
                true
            }
            None => false,
        };

        if !still_connected {
            // Closed while being set up: undo the variable created above
            let mut store = self.store.lock().await;
            store.unsubscribe(client_id);
            let _ = store.remove(&player_key(client_id));
            return Err(ServerError::ConnectionLost(client_id));
        }

        info!("Client {} connected from {}", client_id, addr);
        Ok((client_id, outbox))
    }

    /// Handles one message from an active client
    ///
    /// Malformed messages are rejected with [`ServerError::MalformedMessage`]
    /// and leave the connection open until `max_malformed` of them arrive in
    /// a row. Updates racing with teardown are dropped silently.
    pub async fn handle_packet(&self, client_id: ClientId, packet: Packet) -> Result<Flow, ServerError> {
        if !self.touch(client_id).await {
            debug!("Dropping message from closed client {}", client_id);
            return Ok(Flow::Close(DisconnectReason::ConnectionLost));
        }

        let update = match packet {
            Packet::Heartbeat => return self.accepted(client_id).await,
            Packet::Disconnect => return Ok(Flow::Close(DisconnectReason::ClientRequest)),
            Packet::SetPosition(v) => check_vector(v).map(|value| (Field::Position, value)),
            Packet::SetRotation(v) => check_vector(v).map(|value| (Field::Rotation, value)),
            Packet::SetModel(s) => check_text(s).map(|value| (Field::Model, value)),
            Packet::SetTexture(s) => check_text(s).map(|value| (Field::Texture, value)),
            Packet::SetUsername(s) => check_text(s).map(|value| (Field::Username, value)),
            Packet::SetCosmetic(s) => check_text(s).map(|value| (Field::Cosmetic, value)),
            Packet::SetHighscore(s) => check_highscore(&s).map(|value| (Field::Highscore, value)),
            other => Err(format!("unexpected {:?} from client", other)),
        };

        let (field, value) = match update {
            Ok(update) => update,
            Err(reason) => return self.reject_malformed(client_id, reason).await,
        };

        let key = player_key(client_id);
        let result = {
            let mut store = self.store.lock().await;
            store.update(&key, field, value).map(|_| ())
        };

        match result {
            Ok(()) => {}
            Err(StoreError::UnknownKey(_)) => {
                debug!("Update of {} for removed variable {} ignored", field, key);
            }
            Err(e) => warn!("Rejected update from client {}: {}", client_id, e),
        }

        self.accepted(client_id).await
    }

    /// Counts an undecodable or invalid message against the client
    pub async fn reject_malformed(&self, client_id: ClientId, reason: String) -> Result<Flow, ServerError> {
        let streak = {
            let mut connections = self.connections.write().await;
            match connections.get_mut(&client_id) {
                Some(connection) => {
                    connection.malformed_streak += 1;
                    connection.malformed_streak
                }
                None => return Ok(Flow::Close(DisconnectReason::ConnectionLost)),
            }
        };

        warn!("Malformed message from client {} ({} in a row): {}", client_id, streak, reason);

        if streak >= self.config.max_malformed {
            return Ok(Flow::Close(DisconnectReason::TooManyMalformed));
        }
        Err(ServerError::MalformedMessage { client_id, reason })
    }

    /// Closes a connection and removes its variable
    ///
    /// Safe to call from every close path concurrently: only the first call
    /// tears down and returns `true`, later calls are no-ops.
    pub async fn disconnect(&self, client_id: ClientId, reason: DisconnectReason) -> bool {
        let connection = match self.connections.write().await.remove(&client_id) {
            Some(connection) => connection,
            None => return false,
        };

        {
            let mut store = self.store.lock().await;
            store.unsubscribe(client_id);

            let key = player_key(client_id);
            if let Err(e) = store.remove(&key) {
                debug!("Variable for client {} already gone: {}", client_id, e);
            }
        }

        if reason.notifies_client() {
            connection.outbox.push(Packet::Disconnected {
                reason: reason.to_string(),
            });
        }
        connection.outbox.close();

        info!("Client {} disconnected ({})", client_id, reason);
        true
    }

    /// Disconnects every client silent for longer than `client_timeout`
    pub async fn check_timeouts(&self) -> Vec<ClientId> {
        let timed_out: Vec<ClientId> = self
            .connections
            .read()
            .await
            .values()
            .filter(|connection| connection.is_timed_out(self.config.client_timeout))
            .map(|connection| connection.id)
            .collect();

        for client_id in &timed_out {
            self.disconnect(*client_id, DisconnectReason::TimedOut).await;
        }

        timed_out
    }

    pub async fn disconnect_all(&self, reason: DisconnectReason) {
        let ids = self.client_ids().await;
        for client_id in ids {
            self.disconnect(client_id, reason).await;
        }
    }

    pub async fn state(&self, client_id: ClientId) -> ConnectionState {
        self.connections
            .read()
            .await
            .get(&client_id)
            .map(|connection| connection.state)
            .unwrap_or(ConnectionState::Closed)
    }

    pub async fn client_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.connections.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Refreshes liveness; false when the client is no longer connected
    async fn touch(&self, client_id: ClientId) -> bool {
        match self.connections.write().await.get_mut(&client_id) {
            Some(connection) => {
                connection.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    async fn accepted(&self, client_id: ClientId) -> Result<Flow, ServerError> {
        if let Some(connection) = self.connections.write().await.get_mut(&client_id) {
            connection.malformed_streak = 0;
        }
        Ok(Flow::Continue)
    }
}

fn check_vector(v: Vec3) -> Result<FieldValue, String> {
    if !v.is_finite() {
        return Err(format!("non-finite vector {:?}", v));
    }
    Ok(FieldValue::Vector(v))
}

fn check_text(s: String) -> Result<FieldValue, String> {
    if s.len() > MAX_TEXT_LEN {
        return Err(format!("text of {} bytes", s.len()));
    }
    Ok(FieldValue::Text(s))
}

/// Scores arrive as decimal strings and are kept to two decimals
fn check_highscore(s: &str) -> Result<FieldValue, String> {
    match s.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(FieldValue::Number(shared::round_highscore(value))),
        _ => Err(format!("highscore {:?} is not a number", s)),
    }
}
