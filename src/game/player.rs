use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub conn_id: Uuid,
    pub name: String,
    pub points: u32,
}

impl Player {
    pub fn new(conn_id: Uuid, name: String) -> Self {
        Self {
            conn_id,
            name,
            points: 0,
        }
    }

    pub fn view(&self) -> PlayerView {
        PlayerView {
            name: self.name.clone(),
            points: self.points,
        }
    }
}

/// What clients get to see of a player. Connection ids stay on the server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PlayerView {
    pub name: String,
    pub points: u32,
}

pub fn views(players: &[Player]) -> Vec<PlayerView> {
    players.iter().map(Player::view).collect()
}
