pub mod deck;
pub mod messages;
pub mod player;
pub mod room;
pub mod scoring;
pub mod submissions;

pub use deck::Deck;
pub use messages::{ClientToServerMessage, RoomCommand, ServerToClientMessage};
pub use player::{Player, PlayerView};
pub use room::{Phase, Room, RoomError};
