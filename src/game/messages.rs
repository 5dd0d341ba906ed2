use serde::{Deserialize, Serialize};

use super::player::PlayerView;
use super::room::{GameSummary, Phase, RoomSnapshot};
use super::submissions::SubmissionGroupView;

/// Messages sent from a game client (WebSocket) to the server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "messageType", content = "payload")]
pub enum ClientToServerMessage {
    CreateRoom {
        room_id: String,
        player_name: String,
        theme: String,
    },
    JoinRoom {
        room_id: String,
        player_name: String,
    },
    ListRooms,
    /// Leave the room but keep the connection open.
    LeaveRoom { room_id: String },
    StartGame { room_id: String },
    DrawCard { room_id: String },
    SubmitGuess { room_id: String, text: String },
    /// `group_key` is the text of the submission group the parent picks.
    ChooseGuess { room_id: String, group_key: String },
    /// Sent by a client whose countdown ran out.
    AdvanceTurn { room_id: String },
}

/// Turn commands handled by the room actor itself.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomCommand {
    StartGame,
    DrawCard,
    SubmitGuess { text: String },
    ChooseGuess { group_key: String },
    AdvanceTurn,
}

impl ClientToServerMessage {
    /// Splits a room-scoped turn command into its target room and command.
    pub fn into_room_command(self) -> Result<(String, RoomCommand), Self> {
        match self {
            Self::StartGame { room_id } => Ok((room_id, RoomCommand::StartGame)),
            Self::DrawCard { room_id } => Ok((room_id, RoomCommand::DrawCard)),
            Self::SubmitGuess { room_id, text } => Ok((room_id, RoomCommand::SubmitGuess { text })),
            Self::ChooseGuess { room_id, group_key } => {
                Ok((room_id, RoomCommand::ChooseGuess { group_key }))
            }
            Self::AdvanceTurn { room_id } => Ok((room_id, RoomCommand::AdvanceTurn)),
            other => Err(other),
        }
    }
}

/// Messages sent from the server to game clients.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "messageType", content = "payload")]
pub enum ServerToClientMessage {
    RoomCreated {
        room_id: String,
    },
    RoomJoined(RoomSnapshot),
    RoomLeft {
        room_id: String,
    },
    RoomsList {
        room_ids: Vec<String>,
    },
    PlayersUpdated {
        players: Vec<PlayerView>,
    },
    GameStarted {
        theme: String,
        parent: PlayerView,
    },
    CardDrawn {
        card: String,
    },
    /// Private to the parent: every guess of the turn, grouped.
    SubmissionsComplete {
        groups: Vec<SubmissionGroupView>,
    },
    GuessChosen {
        chosen: SubmissionGroupView,
        players: Vec<PlayerView>,
    },
    NewTurn {
        parent: PlayerView,
        phase: Phase,
    },
    GameOver(GameSummary),
    RoomNotFound {
        room_id: String,
    },
    RoomAlreadyExists {
        room_id: String,
    },
    NameTaken {
        name: String,
    },
    /// A general error delivered only to the connection that caused it.
    SystemError {
        message: String,
    },
}

impl ServerToClientMessage {
    pub fn to_ws_text(&self) -> Result<axum::extract::ws::Message, serde_json::Error> {
        serde_json::to_string(self)
            .map(|json_string| axum::extract::ws::Message::Text(json_string.into()))
    }
}

pub fn client_message_from_ws_text(text: &str) -> Result<ClientToServerMessage, serde_json::Error> {
    serde_json::from_str(text)
}
