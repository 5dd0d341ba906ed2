use axum::extract::ws;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::config::GameSettings;
use crate::game::deck::{ThemeError, normalize_theme};
use crate::game::messages::client_message_from_ws_text;
use crate::game::{ClientToServerMessage, Deck, Player, Room, RoomError, ServerToClientMessage};
use crate::log_sink::LogSinkHandle;
use crate::room_actor::{RoomActorError, RoomActorHandle, try_deliver};

const MAX_ROOM_ID_LENGTH: usize = 32;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Room '{0}' does not exist")]
    RoomNotFound(String),
    #[error("Room '{0}' already exists")]
    RoomAlreadyExists(String),
    #[error("Name '{0}' is already taken")]
    NameTaken(String),
    #[error("Already in room '{0}'. Leave it first")]
    AlreadyInRoom(String),
    #[error("Invalid room id: {0}")]
    InvalidRoomId(String),
    #[error("Invalid player name: {0}")]
    InvalidName(String),
    #[error("Invalid theme: {0}")]
    InvalidTheme(#[from] ThemeError),
    #[error("Theme '{0}' is not available")]
    ThemeNotAllowed(String),
    #[error(transparent)]
    Room(RoomError),
}

impl RegistryError {
    pub fn to_client_message(&self) -> ServerToClientMessage {
        match self {
            RegistryError::RoomNotFound(room_id) => ServerToClientMessage::RoomNotFound {
                room_id: room_id.clone(),
            },
            RegistryError::RoomAlreadyExists(room_id) => ServerToClientMessage::RoomAlreadyExists {
                room_id: room_id.clone(),
            },
            RegistryError::NameTaken(name) => ServerToClientMessage::NameTaken { name: name.clone() },
            other => ServerToClientMessage::SystemError {
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug)]
pub enum RegistryMessage {
    ClientConnected {
        conn_id: Uuid,
        client_tx: mpsc::Sender<ws::Message>,
    },
    ClientEvent {
        conn_id: Uuid,
        raw_payload: String,
    },
    ClientDisconnected {
        conn_id: Uuid,
    },
    ListRooms {
        respond_to: oneshot::Sender<Vec<String>>,
    },
    RoomClosed {
        room_id: String,
    },
}

struct Connection {
    client_tx: mpsc::Sender<ws::Message>,
    room_id: Option<String>,
}

/// Owns the live room table and the connection table. Each connection is in
/// at most one room; each live room has exactly one actor.
pub struct RoomRegistryActor {
    receiver: mpsc::Receiver<RegistryMessage>,
    self_handle: RoomRegistryHandle,
    rooms: HashMap<String, RoomActorHandle>,
    connections: HashMap<Uuid, Connection>,
    game_settings: GameSettings,
    log_sink: LogSinkHandle,
}

impl RoomRegistryActor {
    fn new(
        receiver: mpsc::Receiver<RegistryMessage>,
        self_handle: RoomRegistryHandle,
        game_settings: GameSettings,
        log_sink: LogSinkHandle,
    ) -> Self {
        RoomRegistryActor {
            receiver,
            self_handle,
            rooms: HashMap::new(),
            connections: HashMap::new(),
            game_settings,
            log_sink,
        }
    }

    #[tracing::instrument(skip(self, msg), fields(
        msg_type = %std::any::type_name_of_val(&msg)
    ))]
    async fn handle_message(&mut self, msg: RegistryMessage) {
        match msg {
            RegistryMessage::ClientConnected { conn_id, client_tx } => {
                tracing::debug!(client.id = %conn_id, "Client connected");
                self.connections.insert(
                    conn_id,
                    Connection {
                        client_tx,
                        room_id: None,
                    },
                );
                let rooms = ServerToClientMessage::RoomsList {
                    room_ids: self.list_rooms(),
                };
                self.send_to_client(conn_id, &rooms);
            }
            RegistryMessage::ClientEvent {
                conn_id,
                raw_payload,
            } => {
                tracing::trace!(
                    client.id = %conn_id,
                    event.raw = %raw_payload,
                    "Raw event from client"
                );
                match client_message_from_ws_text(&raw_payload) {
                    Ok(message) => {
                        tracing::debug!(
                            client.id = %conn_id,
                            event.type = ?message,
                            "Processing event from client"
                        );
                        if let Err(e) = self.dispatch(conn_id, message).await {
                            tracing::info!(client.id = %conn_id, error = %e, "Request rejected");
                            self.send_to_client(conn_id, &e.to_client_message());
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            client.id = %conn_id,
                            error = %e,
                            event.raw = %raw_payload,
                            "Failed to deserialize event from client"
                        );
                        let error_response = ServerToClientMessage::SystemError {
                            message: format!("Invalid message format: {}", e),
                        };
                        self.send_to_client(conn_id, &error_response);
                    }
                }
            }
            RegistryMessage::ClientDisconnected { conn_id } => {
                self.remove_connection(conn_id).await;
            }
            RegistryMessage::ListRooms { respond_to } => {
                let _ = respond_to.send(self.list_rooms());
            }
            RegistryMessage::RoomClosed { room_id } => {
                // A new room may already have taken over the id.
                if self.rooms.get(&room_id).is_some_and(RoomActorHandle::is_closed) {
                    self.rooms.remove(&room_id);
                    tracing::info!(room.id = %room_id, "Removed closed room");
                    self.broadcast_rooms_list();
                }
            }
        }
    }

    async fn dispatch(
        &mut self,
        conn_id: Uuid,
        message: ClientToServerMessage,
    ) -> Result<(), RegistryError> {
        let message = match message.into_room_command() {
            Ok((room_id, command)) => {
                let room_id = room_id.trim().to_string();
                let handle = self.member_room(conn_id, &room_id)?;
                return match handle {
                    Some(handle) => handle.command(conn_id, command).await.map_err(|_| {
                        self.rooms.remove(&room_id);
                        RegistryError::RoomNotFound(room_id)
                    }),
                    None => {
                        tracing::debug!(
                            client.id = %conn_id,
                            room.id = %room_id,
                            "Ignoring command for a room the client is not in"
                        );
                        Ok(())
                    }
                };
            }
            Err(message) => message,
        };

        match message {
            ClientToServerMessage::CreateRoom {
                room_id,
                player_name,
                theme,
            } => self.create_room(conn_id, room_id, player_name, theme).await,
            ClientToServerMessage::JoinRoom {
                room_id,
                player_name,
            } => self.join_room(conn_id, room_id, player_name).await,
            ClientToServerMessage::ListRooms => {
                let rooms = ServerToClientMessage::RoomsList {
                    room_ids: self.list_rooms(),
                };
                self.send_to_client(conn_id, &rooms);
                Ok(())
            }
            ClientToServerMessage::LeaveRoom { room_id } => self.leave_room(conn_id, room_id).await,
            other => {
                tracing::warn!(event.type = ?other, "Unroutable client message");
                Ok(())
            }
        }
    }

    /// Resolves a room-scoped request. `Ok(None)` means the room exists but the
    /// connection is not seated in it, which is ignored like a stale retry.
    fn member_room(
        &mut self,
        conn_id: Uuid,
        room_id: &str,
    ) -> Result<Option<RoomActorHandle>, RegistryError> {
        let handle = self
            .live_room(room_id)
            .ok_or_else(|| RegistryError::RoomNotFound(room_id.to_string()))?;
        let is_member = self
            .connections
            .get(&conn_id)
            .and_then(|c| c.room_id.as_deref())
            == Some(room_id);
        Ok(is_member.then_some(handle))
    }

    fn live_room(&mut self, room_id: &str) -> Option<RoomActorHandle> {
        match self.rooms.get(room_id) {
            Some(handle) if handle.is_closed() => {
                self.rooms.remove(room_id);
                None
            }
            Some(handle) => Some(handle.clone()),
            None => None,
        }
    }

    fn current_room(&self, conn_id: Uuid) -> Option<&str> {
        self.connections
            .get(&conn_id)
            .and_then(|c| c.room_id.as_deref())
    }

    fn validate_room_id(room_id: &str) -> Result<String, RegistryError> {
        let room_id = room_id.trim();
        if room_id.is_empty() {
            return Err(RegistryError::InvalidRoomId("must not be empty".to_string()));
        }
        if room_id.chars().count() > MAX_ROOM_ID_LENGTH {
            return Err(RegistryError::InvalidRoomId(format!(
                "must be at most {MAX_ROOM_ID_LENGTH} characters"
            )));
        }
        Ok(room_id.to_string())
    }

    fn validate_name(&self, name: &str) -> Result<String, RegistryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistryError::InvalidName("must not be empty".to_string()));
        }
        if name.chars().count() > self.game_settings.max_name_length {
            return Err(RegistryError::InvalidName(format!(
                "must be at most {} characters",
                self.game_settings.max_name_length
            )));
        }
        Ok(name.to_string())
    }

    async fn create_room(
        &mut self,
        conn_id: Uuid,
        room_id: String,
        player_name: String,
        theme: String,
    ) -> Result<(), RegistryError> {
        if let Some(current) = self.current_room(conn_id) {
            return Err(RegistryError::AlreadyInRoom(current.to_string()));
        }
        let room_id = Self::validate_room_id(&room_id)?;
        if self.live_room(&room_id).is_some() {
            return Err(RegistryError::RoomAlreadyExists(room_id));
        }
        let player_name = self.validate_name(&player_name)?;
        let theme = normalize_theme(&theme)?;
        if !self.game_settings.is_theme_allowed(&theme) {
            return Err(RegistryError::ThemeNotAllowed(theme));
        }
        let Some(client_tx) = self.connections.get(&conn_id).map(|c| c.client_tx.clone()) else {
            tracing::warn!(client.id = %conn_id, "CreateRoom from unregistered connection");
            return Ok(());
        };

        let deck = {
            let mut rng = rand::thread_rng();
            Deck::generate(
                &theme,
                self.game_settings.deck_size,
                &self.game_settings.card_extension,
                &mut rng,
            )
        };
        let room = Room::new(
            room_id.clone(),
            theme.clone(),
            deck,
            Player::new(conn_id, player_name.clone()),
            self.game_settings.max_guess_length,
        );

        self.send_to_client(
            conn_id,
            &ServerToClientMessage::RoomCreated {
                room_id: room_id.clone(),
            },
        );

        let handle = RoomActorHandle::spawn(
            room,
            client_tx,
            self.game_settings.room_buffer_size.max(1),
            self.log_sink.clone(),
            self.self_handle.clone(),
        );
        self.rooms.insert(room_id.clone(), handle);
        if let Some(connection) = self.connections.get_mut(&conn_id) {
            connection.room_id = Some(room_id.clone());
        }

        tracing::info!(
            room.id = %room_id,
            room.theme = %theme,
            client.id = %conn_id,
            owner.name = %player_name,
            "Created room"
        );
        self.broadcast_rooms_list();
        Ok(())
    }

    async fn join_room(
        &mut self,
        conn_id: Uuid,
        room_id: String,
        player_name: String,
    ) -> Result<(), RegistryError> {
        if let Some(current) = self.current_room(conn_id) {
            return Err(RegistryError::AlreadyInRoom(current.to_string()));
        }
        let room_id = room_id.trim().to_string();
        let handle = self
            .live_room(&room_id)
            .ok_or_else(|| RegistryError::RoomNotFound(room_id.clone()))?;
        let player_name = self.validate_name(&player_name)?;
        let Some(client_tx) = self.connections.get(&conn_id).map(|c| c.client_tx.clone()) else {
            tracing::warn!(client.id = %conn_id, "JoinRoom from unregistered connection");
            return Ok(());
        };

        match handle.join(conn_id, player_name.clone(), client_tx).await {
            Ok(()) => {
                if let Some(connection) = self.connections.get_mut(&conn_id) {
                    connection.room_id = Some(room_id.clone());
                }
                tracing::info!(
                    room.id = %room_id,
                    client.id = %conn_id,
                    player.name = %player_name,
                    "Client joined room"
                );
                Ok(())
            }
            Err(RoomActorError::Closed) => {
                self.rooms.remove(&room_id);
                Err(RegistryError::RoomNotFound(room_id))
            }
            Err(RoomActorError::Room(RoomError::NameTaken(name))) => {
                Err(RegistryError::NameTaken(name))
            }
            Err(RoomActorError::Room(e)) => Err(RegistryError::Room(e)),
        }
    }

    async fn leave_room(&mut self, conn_id: Uuid, room_id: String) -> Result<(), RegistryError> {
        let room_id = room_id.trim().to_string();
        if self.current_room(conn_id) != Some(room_id.as_str()) {
            tracing::debug!(
                client.id = %conn_id,
                room.id = %room_id,
                "Leave for a room the client is not in"
            );
            return Ok(());
        }
        if let Some(connection) = self.connections.get_mut(&conn_id) {
            connection.room_id = None;
        }
        self.send_to_client(
            conn_id,
            &ServerToClientMessage::RoomLeft {
                room_id: room_id.clone(),
            },
        );
        self.release_seat(conn_id, &room_id).await;
        Ok(())
    }

    /// Drops a connection and its seat. Unknown or already removed
    /// connections are a no-op.
    async fn remove_connection(&mut self, conn_id: Uuid) {
        let Some(connection) = self.connections.remove(&conn_id) else {
            tracing::debug!(client.id = %conn_id, "Disconnect for unknown client ignored");
            return;
        };
        tracing::debug!(client.id = %conn_id, room.id = ?connection.room_id, "Client disconnected");
        if let Some(room_id) = connection.room_id {
            self.release_seat(conn_id, &room_id).await;
        }
    }

    /// Tells the room the connection is gone. A room nobody is seated in any
    /// more is dropped from the table at once, ahead of its actor's shutdown.
    async fn release_seat(&mut self, conn_id: Uuid, room_id: &str) {
        let Some(handle) = self.rooms.get(room_id).cloned() else {
            return;
        };
        handle.client_left(conn_id).await;
        let still_occupied = self
            .connections
            .values()
            .any(|c| c.room_id.as_deref() == Some(room_id));
        if !still_occupied {
            self.rooms.remove(room_id);
            tracing::info!(room.id = %room_id, "Last player left. Room removed");
            self.broadcast_rooms_list();
        }
    }

    fn list_rooms(&mut self) -> Vec<String> {
        self.rooms.retain(|_, handle| !handle.is_closed());
        let mut room_ids: Vec<String> = self.rooms.keys().cloned().collect();
        room_ids.sort();
        room_ids
    }

    fn broadcast_rooms_list(&mut self) {
        let message = ServerToClientMessage::RoomsList {
            room_ids: self.list_rooms(),
        };
        let ws_msg = match message.to_ws_text() {
            Ok(ws_msg) => ws_msg,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize rooms list");
                return;
            }
        };
        for (conn_id, connection) in &self.connections {
            try_deliver(&connection.client_tx, *conn_id, ws_msg.clone());
        }
    }

    fn send_to_client(&self, conn_id: Uuid, message: &ServerToClientMessage) {
        let Some(connection) = self.connections.get(&conn_id) else {
            return;
        };
        match message.to_ws_text() {
            Ok(ws_msg) => try_deliver(&connection.client_tx, conn_id, ws_msg),
            Err(e) => {
                tracing::error!(client.id = %conn_id, error = %e, "Failed to serialize message");
            }
        }
    }
}

#[tracing::instrument(skip(actor))]
pub async fn run_room_registry_actor(mut actor: RoomRegistryActor) {
    tracing::info!("Room registry actor started");
    while let Some(msg) = actor.receiver.recv().await {
        actor.handle_message(msg).await;
    }
    tracing::info!("Room registry actor stopped");
}

#[derive(Clone, Debug)]
pub struct RoomRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
}

impl RoomRegistryHandle {
    pub fn spawn(buffer_size: usize, game_settings: GameSettings, log_sink: LogSinkHandle) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let handle = Self { sender };
        let actor = RoomRegistryActor::new(receiver, handle.clone(), game_settings, log_sink);
        tokio::spawn(run_room_registry_actor(actor));
        handle
    }

    /// A handle whose messages land in the returned receiver instead of a registry.
    #[cfg(test)]
    pub(crate) fn detached(buffer_size: usize) -> (Self, mpsc::Receiver<RegistryMessage>) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        (Self { sender }, receiver)
    }

    pub async fn client_connected(&self, conn_id: Uuid, client_tx: mpsc::Sender<ws::Message>) {
        if self
            .sender
            .send(RegistryMessage::ClientConnected { conn_id, client_tx })
            .await
            .is_err()
        {
            tracing::error!("Failed to send ClientConnected");
        }
    }

    pub async fn process_event(&self, conn_id: Uuid, raw_payload: String) -> Result<(), String> {
        self.sender
            .send(RegistryMessage::ClientEvent {
                conn_id,
                raw_payload,
            })
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    pub async fn client_disconnected(&self, conn_id: Uuid) {
        if self
            .sender
            .send(RegistryMessage::ClientDisconnected { conn_id })
            .await
            .is_err()
        {
            tracing::error!("Failed to send ClientDisconnected");
        }
    }

    pub async fn list_rooms(&self) -> Result<Vec<String>, String> {
        let (respond_to, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::ListRooms { respond_to })
            .await
            .map_err(|e| format!("Failed to send ListRooms: {}", e))?;
        rx.await
            .map_err(|e| format!("Room registry no response: {}", e))
    }

    pub async fn notify_room_closed(&self, room_id: String) {
        if let Err(e) = self
            .sender
            .send(RegistryMessage::RoomClosed { room_id })
            .await
        {
            tracing::error!(error = %e, "Failed to notify registry of closed room");
        }
    }
}
