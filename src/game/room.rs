use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::deck::Deck;
use super::player::{Player, PlayerView, views};
use super::scoring::{award_point, resolve_winners};
use super::submissions::{
    GuessError, SubmissionAggregator, SubmissionGroup, SubmissionGroupView, normalize_guess,
};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Waiting,
    TurnActive,
    AwaitingSubmissions,
    Choosing,
    GameOver,
}

impl Phase {
    /// A parent is seated in these phases.
    pub fn in_turn(self) -> bool {
        matches!(
            self,
            Phase::TurnActive | Phase::AwaitingSubmissions | Phase::Choosing
        )
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("Name '{0}' is already taken")]
    NameTaken(String),
    #[error("Connection is already a player in this room")]
    AlreadyJoined,
    #[error("Connection is not a player in this room")]
    UnknownPlayer,
    #[error("Not your turn")]
    NotYourTurn,
    #[error("Only the room owner can start the game")]
    NotRoomOwner,
    #[error("Cannot {action} while the room is in phase {phase:?}")]
    InvalidPhase { action: &'static str, phase: Phase },
    #[error("A guess was already submitted this turn")]
    AlreadySubmitted,
    #[error("No submission '{0}' exists this turn")]
    UnknownGroup(String),
    #[error("Invalid guess: {0}")]
    InvalidGuess(#[from] GuessError),
    #[error("The game in this room has already finished")]
    GameFinished,
}

impl RoomError {
    /// Turn and phase violations come from stale UIs retrying; they are
    /// dropped without telling the requester.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            RoomError::AlreadyJoined
                | RoomError::UnknownPlayer
                | RoomError::NotYourTurn
                | RoomError::NotRoomOwner
                | RoomError::InvalidPhase { .. }
                | RoomError::AlreadySubmitted
        )
    }
}

/// Final standings. `winners` holds every player tied on the top score.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GameSummary {
    pub winners: Vec<PlayerView>,
    pub players: Vec<PlayerView>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawOutcome {
    Card(String),
    GameOver(GameSummary),
}

/// The grouped guesses, due to the parent once every guesser has answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionsComplete {
    pub parent: Uuid,
    pub groups: Vec<SubmissionGroupView>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionAccepted {
    pub player_name: String,
    pub guess: String,
    pub card: Option<String>,
    pub completed: Option<SubmissionsComplete>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    NextParent(PlayerView),
    GameOver(GameSummary),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceOutcome {
    pub parent_name: String,
    pub chosen: SubmissionGroupView,
    pub players: Vec<PlayerView>,
    pub next: TurnOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub player: Player,
    pub room_empty: bool,
    /// Set when the departing player was the parent and the turn moved on.
    pub new_parent: Option<PlayerView>,
    /// Set when the departure changed what the parent has to choose from.
    pub completed: Option<SubmissionsComplete>,
}

/// What a player sees right after joining.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub theme: String,
    pub phase: Phase,
    pub players: Vec<PlayerView>,
    pub parent: Option<PlayerView>,
    pub cards_remaining: usize,
}

/// One game session. Player order is join order: index 0 is the room owner
/// and the order is the turn rotation.
#[derive(Debug)]
pub struct Room {
    id: String,
    theme: String,
    players: Vec<Player>,
    deck: Deck,
    turn_index: usize,
    current_card: Option<String>,
    phase: Phase,
    submissions: SubmissionAggregator,
    max_guess_length: usize,
}

impl Room {
    pub fn new(id: String, theme: String, deck: Deck, owner: Player, max_guess_length: usize) -> Self {
        Self {
            id,
            theme,
            players: vec![owner],
            deck,
            turn_index: 0,
            current_card: None,
            phase: Phase::Waiting,
            submissions: SubmissionAggregator::new(),
            max_guess_length,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn theme(&self) -> &str {
        &self.theme
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn current_card(&self) -> Option<&str> {
        self.current_card.as_deref()
    }

    pub fn cards_remaining(&self) -> usize {
        self.deck.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn owner(&self) -> Option<&Player> {
        self.players.first()
    }

    pub fn parent(&self) -> Option<&Player> {
        if self.phase.in_turn() {
            self.players.get(self.turn_index)
        } else {
            None
        }
    }

    pub fn player(&self, conn_id: Uuid) -> Option<&Player> {
        self.players.iter().find(|p| p.conn_id == conn_id)
    }

    pub fn submission_groups(&self) -> &[SubmissionGroup] {
        self.submissions.groups()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.id.clone(),
            theme: self.theme.clone(),
            phase: self.phase,
            players: views(&self.players),
            parent: self.parent().map(Player::view),
            cards_remaining: self.deck.remaining(),
        }
    }

    pub fn summary(&self) -> GameSummary {
        GameSummary {
            winners: resolve_winners(&self.players)
                .into_iter()
                .map(Player::view)
                .collect(),
            players: views(&self.players),
        }
    }

    pub fn add_player(&mut self, conn_id: Uuid, name: String) -> Result<(), RoomError> {
        if self.phase == Phase::GameOver {
            return Err(RoomError::GameFinished);
        }
        if self.player_index(conn_id).is_some() {
            return Err(RoomError::AlreadyJoined);
        }
        if self.players.iter().any(|p| p.name == name) {
            return Err(RoomError::NameTaken(name));
        }
        self.players.push(Player::new(conn_id, name));
        Ok(())
    }

    pub fn start_game<R: Rng + ?Sized>(
        &mut self,
        conn_id: Uuid,
        rng: &mut R,
    ) -> Result<PlayerView, RoomError> {
        let index = self.require_player(conn_id)?;
        self.require_phase(Phase::Waiting, "start the game")?;
        if index != 0 {
            return Err(RoomError::NotRoomOwner);
        }

        self.turn_index = rng.gen_range(0..self.players.len());
        self.phase = Phase::TurnActive;
        Ok(self.players[self.turn_index].view())
    }

    pub fn draw_card(&mut self, conn_id: Uuid) -> Result<DrawOutcome, RoomError> {
        let index = self.require_player(conn_id)?;
        self.require_phase(Phase::TurnActive, "draw a card")?;
        self.require_parent(index)?;

        match self.deck.draw() {
            Some(card) => {
                self.submissions.clear();
                self.current_card = Some(card.clone());
                self.phase = Phase::AwaitingSubmissions;
                Ok(DrawOutcome::Card(card))
            }
            None => Ok(DrawOutcome::GameOver(self.end_game())),
        }
    }

    pub fn submit_guess(
        &mut self,
        conn_id: Uuid,
        raw_text: &str,
    ) -> Result<SubmissionAccepted, RoomError> {
        let index = self.require_player(conn_id)?;
        self.require_phase(Phase::AwaitingSubmissions, "submit a guess")?;
        if index == self.turn_index {
            return Err(RoomError::NotYourTurn);
        }
        if self.submissions.has_contributed(conn_id) {
            return Err(RoomError::AlreadySubmitted);
        }

        let guess = normalize_guess(raw_text, self.max_guess_length)?;
        self.submissions.add(conn_id, guess.clone());

        Ok(SubmissionAccepted {
            player_name: self.players[index].name.clone(),
            guess,
            card: self.current_card.clone(),
            completed: self.check_submissions_complete(),
        })
    }

    pub fn choose_guess(
        &mut self,
        conn_id: Uuid,
        group_key: &str,
    ) -> Result<ChoiceOutcome, RoomError> {
        let index = self.require_player(conn_id)?;
        self.require_phase(Phase::Choosing, "choose a guess")?;
        self.require_parent(index)?;

        let group = self
            .submissions
            .group(group_key)
            .cloned()
            .ok_or_else(|| RoomError::UnknownGroup(group_key.to_string()))?;

        for contributor in &group.contributors {
            if let Some(player) = self.players.iter_mut().find(|p| p.conn_id == *contributor) {
                award_point(player);
            }
        }

        let chosen = self.group_view(&group);
        let parent_name = self.players[index].name.clone();
        self.submissions.clear();
        self.current_card = None;

        let next = if self.deck.is_empty() {
            TurnOutcome::GameOver(self.end_game())
        } else {
            TurnOutcome::NextParent(self.rotate_turn())
        };

        Ok(ChoiceOutcome {
            parent_name,
            chosen,
            players: views(&self.players),
            next,
        })
    }

    /// Skips the rest of the turn without scoring. Only the parent or the
    /// owner may ask.
    pub fn advance_turn(&mut self, conn_id: Uuid) -> Result<PlayerView, RoomError> {
        let index = self.require_player(conn_id)?;
        if !self.phase.in_turn() {
            return Err(RoomError::InvalidPhase {
                action: "advance the turn",
                phase: self.phase,
            });
        }
        if index != self.turn_index && index != 0 {
            return Err(RoomError::NotYourTurn);
        }

        self.submissions.clear();
        self.current_card = None;
        Ok(self.rotate_turn())
    }

    /// Removes a leaving or disconnected player and repairs the turn.
    /// Returns `None` if the connection was not in this room.
    pub fn remove_player(&mut self, conn_id: Uuid) -> Option<Departure> {
        let index = self.player_index(conn_id)?;
        let was_parent = self.phase.in_turn() && index == self.turn_index;
        let player = self.players.remove(index);
        let had_contributed = self.submissions.remove_contributor(conn_id);

        if self.players.is_empty() {
            self.turn_index = 0;
            self.submissions.clear();
            return Some(Departure {
                player,
                room_empty: true,
                new_parent: None,
                completed: None,
            });
        }

        if index < self.turn_index {
            self.turn_index -= 1;
        } else if self.turn_index >= self.players.len() {
            self.turn_index = 0;
        }

        let mut departure = Departure {
            player,
            room_empty: false,
            new_parent: None,
            completed: None,
        };

        if was_parent {
            // The player after the old parent now sits at the old index.
            self.submissions.clear();
            self.current_card = None;
            self.phase = Phase::TurnActive;
            departure.new_parent = Some(self.players[self.turn_index].view());
        } else {
            match self.phase {
                Phase::AwaitingSubmissions => {
                    departure.completed = self.check_submissions_complete();
                }
                Phase::Choosing if had_contributed => {
                    if self.submissions.is_empty() {
                        self.current_card = None;
                        departure.new_parent = Some(self.rotate_turn());
                    } else {
                        departure.completed = Some(self.submissions_complete());
                    }
                }
                _ => {}
            }
        }

        Some(departure)
    }

    fn player_index(&self, conn_id: Uuid) -> Option<usize> {
        self.players.iter().position(|p| p.conn_id == conn_id)
    }

    fn require_player(&self, conn_id: Uuid) -> Result<usize, RoomError> {
        self.player_index(conn_id).ok_or(RoomError::UnknownPlayer)
    }

    fn require_phase(&self, expected: Phase, action: &'static str) -> Result<(), RoomError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(RoomError::InvalidPhase {
                action,
                phase: self.phase,
            })
        }
    }

    fn require_parent(&self, index: usize) -> Result<(), RoomError> {
        if index == self.turn_index {
            Ok(())
        } else {
            Err(RoomError::NotYourTurn)
        }
    }

    fn rotate_turn(&mut self) -> PlayerView {
        self.turn_index = (self.turn_index + 1) % self.players.len();
        self.phase = Phase::TurnActive;
        self.players[self.turn_index].view()
    }

    fn end_game(&mut self) -> GameSummary {
        self.phase = Phase::GameOver;
        self.submissions.clear();
        self.current_card = None;
        self.summary()
    }

    fn check_submissions_complete(&mut self) -> Option<SubmissionsComplete> {
        let expected = self.players.len().saturating_sub(1);
        if self.phase != Phase::AwaitingSubmissions
            || self.submissions.is_empty()
            || self.submissions.contributor_count() != expected
        {
            return None;
        }
        self.phase = Phase::Choosing;
        Some(self.submissions_complete())
    }

    fn submissions_complete(&self) -> SubmissionsComplete {
        SubmissionsComplete {
            parent: self.players[self.turn_index].conn_id,
            groups: self
                .submissions
                .groups()
                .iter()
                .map(|group| self.group_view(group))
                .collect(),
        }
    }

    fn group_view(&self, group: &SubmissionGroup) -> SubmissionGroupView {
        SubmissionGroupView {
            text: group.text.clone(),
            contributors: group
                .contributors
                .iter()
                .filter_map(|id| self.player(*id).map(|p| p.name.clone()))
                .collect(),
        }
    }
}
