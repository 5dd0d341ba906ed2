use axum::extract::ws;
use chrono::Utc;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::game::room::{DrawOutcome, SubmissionsComplete, TurnOutcome};
use crate::game::{Room, RoomCommand, RoomError, ServerToClientMessage};
use crate::log_sink::{LogRecord, LogSinkHandle};
use crate::registry::RoomRegistryHandle;

#[derive(Debug, Error)]
pub enum RoomActorError {
    #[error("Room has shut down")]
    Closed,
    #[error(transparent)]
    Room(#[from] RoomError),
}

#[derive(Debug)]
pub enum RoomActorMessage {
    Join {
        conn_id: Uuid,
        player_name: String,
        client_tx: mpsc::Sender<ws::Message>,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },
    Command {
        conn_id: Uuid,
        command: RoomCommand,
    },
    /// Explicit leave or dropped connection; both remove the player.
    ClientLeft {
        conn_id: Uuid,
    },
}

/// Sole owner of one room's state. Every mutation of the room goes through
/// this actor's inbox, so requests touching the same room never interleave.
pub struct RoomActor {
    receiver: mpsc::Receiver<RoomActorMessage>,
    room: Room,
    clients: HashMap<Uuid, mpsc::Sender<ws::Message>>,
    log_sink: LogSinkHandle,
}

impl RoomActor {
    fn new(
        receiver: mpsc::Receiver<RoomActorMessage>,
        room: Room,
        clients: HashMap<Uuid, mpsc::Sender<ws::Message>>,
        log_sink: LogSinkHandle,
    ) -> Self {
        RoomActor {
            receiver,
            room,
            clients,
            log_sink,
        }
    }

    /// Returns `true` once the room is empty and the actor should stop.
    #[tracing::instrument(skip(self, msg), fields(
        room.id = %self.room.id(),
        room.phase = ?self.room.phase(),
        msg_type = %std::any::type_name_of_val(&msg)
    ))]
    fn handle_message(&mut self, msg: RoomActorMessage) -> bool {
        match msg {
            RoomActorMessage::Join {
                conn_id,
                player_name,
                client_tx,
                respond_to,
            } => {
                match self.room.add_player(conn_id, player_name.clone()) {
                    Ok(()) => {
                        tracing::info!(
                            client.id = %conn_id,
                            player.name = %player_name,
                            "Player joined room"
                        );
                        self.clients.insert(conn_id, client_tx);
                        self.send_to_client(
                            conn_id,
                            &ServerToClientMessage::RoomJoined(self.room.snapshot()),
                        );
                        self.broadcast_players();
                        let _ = respond_to.send(Ok(()));
                    }
                    Err(e) => {
                        tracing::debug!(
                            client.id = %conn_id,
                            player.name = %player_name,
                            error = %e,
                            "Join rejected"
                        );
                        let _ = respond_to.send(Err(e));
                    }
                }
            }
            RoomActorMessage::Command { conn_id, command } => {
                tracing::debug!(
                    client.id = %conn_id,
                    command = ?command,
                    "Processing room command"
                );
                if let Err(e) = self.handle_command(conn_id, command) {
                    if e.is_silent() {
                        tracing::debug!(
                            client.id = %conn_id,
                            error = %e,
                            "Ignoring room command"
                        );
                    } else {
                        tracing::info!(
                            client.id = %conn_id,
                            error = %e,
                            "Rejected room command"
                        );
                        self.send_to_client(
                            conn_id,
                            &ServerToClientMessage::SystemError {
                                message: e.to_string(),
                            },
                        );
                    }
                }
            }
            RoomActorMessage::ClientLeft { conn_id } => {
                self.clients.remove(&conn_id);
                let Some(departure) = self.room.remove_player(conn_id) else {
                    tracing::debug!(client.id = %conn_id, "Leave for unknown player ignored");
                    return false;
                };
                tracing::info!(
                    client.id = %conn_id,
                    player.name = %departure.player.name,
                    "Player left room"
                );
                if departure.room_empty {
                    return true;
                }
                self.broadcast_players();
                if let Some(parent) = departure.new_parent {
                    self.broadcast(&ServerToClientMessage::NewTurn {
                        parent,
                        phase: self.room.phase(),
                    });
                }
                if let Some(completed) = departure.completed {
                    self.deliver_submissions(completed);
                }
            }
        }
        false
    }

    fn handle_command(&mut self, conn_id: Uuid, command: RoomCommand) -> Result<(), RoomError> {
        match command {
            RoomCommand::StartGame => {
                let parent = {
                    let mut rng = rand::thread_rng();
                    self.room.start_game(conn_id, &mut rng)?
                };
                tracing::info!(parent.name = %parent.name, "Game started");
                self.broadcast(&ServerToClientMessage::GameStarted {
                    theme: self.room.theme().to_string(),
                    parent,
                });
            }
            RoomCommand::DrawCard => match self.room.draw_card(conn_id)? {
                DrawOutcome::Card(card) => {
                    tracing::debug!(
                        card = %card,
                        cards.remaining = self.room.cards_remaining(),
                        "Card drawn"
                    );
                    self.broadcast(&ServerToClientMessage::CardDrawn { card });
                }
                DrawOutcome::GameOver(summary) => {
                    tracing::info!(winners.count = summary.winners.len(), "Card supply exhausted. Game over");
                    self.broadcast(&ServerToClientMessage::GameOver(summary));
                }
            },
            RoomCommand::SubmitGuess { text } => {
                let accepted = self.room.submit_guess(conn_id, &text)?;
                if let Some(completed) = accepted.completed {
                    self.deliver_submissions(completed);
                }
                self.log_sink.record(LogRecord::Submission {
                    room_id: self.room.id().to_string(),
                    card: accepted.card,
                    guess: accepted.guess,
                    player_name: accepted.player_name,
                    timestamp: Utc::now(),
                });
            }
            RoomCommand::ChooseGuess { group_key } => {
                let outcome = self.room.choose_guess(conn_id, &group_key)?;
                let chosen = outcome.chosen.clone();
                self.broadcast(&ServerToClientMessage::GuessChosen {
                    chosen: outcome.chosen,
                    players: outcome.players,
                });
                match outcome.next {
                    TurnOutcome::NextParent(parent) => {
                        self.broadcast(&ServerToClientMessage::NewTurn {
                            parent,
                            phase: self.room.phase(),
                        });
                    }
                    TurnOutcome::GameOver(summary) => {
                        tracing::info!(winners.count = summary.winners.len(), "Last card scored. Game over");
                        self.broadcast(&ServerToClientMessage::GameOver(summary));
                    }
                }
                self.log_sink.record(LogRecord::Choice {
                    room_id: self.room.id().to_string(),
                    parent_name: outcome.parent_name,
                    chosen_guess: chosen.text,
                    contributor_names: chosen.contributors,
                    timestamp: Utc::now(),
                });
            }
            RoomCommand::AdvanceTurn => {
                let parent = self.room.advance_turn(conn_id)?;
                tracing::info!(parent.name = %parent.name, "Turn advanced without scoring");
                self.broadcast(&ServerToClientMessage::NewTurn {
                    parent,
                    phase: self.room.phase(),
                });
            }
        }
        Ok(())
    }

    fn deliver_submissions(&self, completed: SubmissionsComplete) {
        tracing::debug!(
            groups.count = completed.groups.len(),
            "All guesses in. Sending list to parent"
        );
        self.send_to_client(
            completed.parent,
            &ServerToClientMessage::SubmissionsComplete {
                groups: completed.groups,
            },
        );
    }

    fn broadcast_players(&self) {
        self.broadcast(&ServerToClientMessage::PlayersUpdated {
            players: crate::game::player::views(self.room.players()),
        });
    }

    fn send_to_client(&self, conn_id: Uuid, message: &ServerToClientMessage) {
        let Some(tx) = self.clients.get(&conn_id) else {
            return;
        };
        match message.to_ws_text() {
            Ok(ws_msg) => try_deliver(tx, conn_id, ws_msg),
            Err(e) => {
                tracing::error!(client.id = %conn_id, error = %e, "Failed to serialize message");
            }
        }
    }

    /// Sends to every player currently seated, in rotation order.
    fn broadcast(&self, message: &ServerToClientMessage) {
        let ws_msg = match message.to_ws_text() {
            Ok(ws_msg) => ws_msg,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize broadcast message");
                return;
            }
        };
        for player in self.room.players() {
            if let Some(tx) = self.clients.get(&player.conn_id) {
                try_deliver(tx, player.conn_id, ws_msg.clone());
            }
        }
    }
}

/// Queues a frame for a connection's socket writer without waiting. A client
/// whose queue is full loses the frame.
pub(crate) fn try_deliver(client_tx: &mpsc::Sender<ws::Message>, conn_id: Uuid, ws_msg: ws::Message) {
    match client_tx.try_send(ws_msg) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!(client.id = %conn_id, "Client queue full. Dropping message");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!(client.id = %conn_id, "Client channel closed. Dropping message");
        }
    }
}

#[tracing::instrument(skip(actor, registry), fields(room.id = %actor.room.id()))]
pub async fn run_room_actor(mut actor: RoomActor, registry: RoomRegistryHandle) {
    tracing::info!(room.theme = %actor.room.theme(), "Room actor started");
    actor.broadcast_players();

    while let Some(msg) = actor.receiver.recv().await {
        if actor.handle_message(msg) {
            tracing::info!("Last player left. Closing room");
            break;
        }
    }

    let room_id = actor.room.id().to_string();
    // Closing the inbox first fails any queued join immediately.
    drop(actor);
    registry.notify_room_closed(room_id).await;
    tracing::info!("Room actor stopped");
}

#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomActorMessage>,
    pub room_id: String,
}

impl RoomActorHandle {
    pub fn spawn(
        room: Room,
        owner_tx: mpsc::Sender<ws::Message>,
        buffer_size: usize,
        log_sink: LogSinkHandle,
        registry: RoomRegistryHandle,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let room_id = room.id().to_string();
        let clients = room
            .owner()
            .map(|owner| HashMap::from([(owner.conn_id, owner_tx)]))
            .unwrap_or_default();
        let actor = RoomActor::new(receiver, room, clients, log_sink);
        tokio::spawn(run_room_actor(actor, registry));
        Self { sender, room_id }
    }

    /// A closed room has lost its last player and is gone for good.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub async fn join(
        &self,
        conn_id: Uuid,
        player_name: String,
        client_tx: mpsc::Sender<ws::Message>,
    ) -> Result<(), RoomActorError> {
        let (respond_to, rx) = oneshot::channel();
        self.sender
            .send(RoomActorMessage::Join {
                conn_id,
                player_name,
                client_tx,
                respond_to,
            })
            .await
            .map_err(|_| RoomActorError::Closed)?;
        rx.await.map_err(|_| RoomActorError::Closed)??;
        Ok(())
    }

    pub async fn command(&self, conn_id: Uuid, command: RoomCommand) -> Result<(), RoomActorError> {
        self.sender
            .send(RoomActorMessage::Command { conn_id, command })
            .await
            .map_err(|_| RoomActorError::Closed)
    }

    pub async fn client_left(&self, conn_id: Uuid) {
        if self
            .sender
            .send(RoomActorMessage::ClientLeft { conn_id })
            .await
            .is_err()
        {
            tracing::debug!(
                room.id = %self.room_id,
                client.id = %conn_id,
                "Room already closed when client left"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::player::Player;
    use crate::game::room::Phase;
    use crate::game::{Deck, PlayerView};
    use crate::registry::RegistryMessage;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::time::Duration;

    async fn next_message(rx: &mut mpsc::Receiver<ws::Message>) -> ServerToClientMessage {
        let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for server message")
            .expect("client channel closed");
        match msg {
            ws::Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("unexpected ws message {other:?}"),
        }
    }

    struct Harness {
        handle: RoomActorHandle,
        sink_rx: mpsc::Receiver<LogRecord>,
        registry_rx: mpsc::Receiver<RegistryMessage>,
    }

    fn spawn_room(owner: Uuid, owner_tx: mpsc::Sender<ws::Message>, deck_size: usize) -> Harness {
        let mut rng = StdRng::seed_from_u64(9);
        let deck = Deck::generate("stone", deck_size, "jpg", &mut rng);
        let room = Room::new(
            "0001".to_string(),
            "stone".to_string(),
            deck,
            Player::new(owner, "Alice".to_string()),
            40,
        );
        let (log_sink, sink_rx) = LogSinkHandle::channel(16);
        let (registry, registry_rx) = RoomRegistryHandle::detached(8);
        let handle = RoomActorHandle::spawn(room, owner_tx, 8, log_sink, registry);
        Harness {
            handle,
            sink_rx,
            registry_rx,
        }
    }

    fn player(name: &str, points: u32) -> PlayerView {
        PlayerView {
            name: name.to_string(),
            points,
        }
    }

    #[tokio::test]
    async fn test_full_turn_through_actor() {
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let (alice_tx, mut alice_rx) = mpsc::channel(32);
        let (bob_tx, mut bob_rx) = mpsc::channel(32);
        let mut h = spawn_room(alice, alice_tx, 36);

        assert_eq!(
            next_message(&mut alice_rx).await,
            ServerToClientMessage::PlayersUpdated {
                players: vec![player("Alice", 0)]
            }
        );

        h.handle.join(bob, "Bob".to_string(), bob_tx).await.unwrap();
        let ServerToClientMessage::RoomJoined(snapshot) = next_message(&mut bob_rx).await else {
            panic!("expected RoomJoined");
        };
        assert_eq!(snapshot.theme, "stone");
        assert_eq!(snapshot.phase, Phase::Waiting);
        let both = vec![player("Alice", 0), player("Bob", 0)];
        assert_eq!(
            next_message(&mut alice_rx).await,
            ServerToClientMessage::PlayersUpdated { players: both.clone() }
        );
        assert_eq!(
            next_message(&mut bob_rx).await,
            ServerToClientMessage::PlayersUpdated { players: both }
        );

        h.handle.command(alice, RoomCommand::StartGame).await.unwrap();
        let ServerToClientMessage::GameStarted { theme, parent } = next_message(&mut alice_rx).await
        else {
            panic!("expected GameStarted");
        };
        assert_eq!(theme, "stone");
        next_message(&mut bob_rx).await;

        let (parent_id, parent_rx, guesser_id, guesser_rx, guesser_name) = if parent.name == "Alice" {
            (alice, &mut alice_rx, bob, &mut bob_rx, "Bob")
        } else {
            (bob, &mut bob_rx, alice, &mut alice_rx, "Alice")
        };

        h.handle.command(parent_id, RoomCommand::DrawCard).await.unwrap();
        let ServerToClientMessage::CardDrawn { card } = next_message(parent_rx).await else {
            panic!("expected CardDrawn");
        };
        assert!(card.starts_with("stone_000") && card.ends_with(".jpg"));
        next_message(guesser_rx).await;

        h.handle
            .command(
                guesser_id,
                RoomCommand::SubmitGuess {
                    text: "pop".to_string(),
                },
            )
            .await
            .unwrap();
        let ServerToClientMessage::SubmissionsComplete { groups } = next_message(parent_rx).await
        else {
            panic!("expected SubmissionsComplete for the parent");
        };
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].text, "pop");
        assert_eq!(groups[0].contributors, vec![guesser_name.to_string()]);

        h.handle
            .command(
                parent_id,
                RoomCommand::ChooseGuess {
                    group_key: "pop".to_string(),
                },
            )
            .await
            .unwrap();
        let ServerToClientMessage::GuessChosen { players, .. } = next_message(guesser_rx).await else {
            panic!("expected GuessChosen");
        };
        assert!(players.contains(&player(guesser_name, 1)));
        let ServerToClientMessage::NewTurn { parent, phase } = next_message(guesser_rx).await else {
            panic!("expected NewTurn");
        };
        assert_eq!(parent.name, guesser_name);
        assert_eq!(phase, Phase::TurnActive);

        let LogRecord::Submission { guess, card: logged_card, .. } = h.sink_rx.recv().await.unwrap()
        else {
            panic!("expected a submission record");
        };
        assert_eq!(guess, "pop");
        assert_eq!(logged_card, Some(card));
        let LogRecord::Choice {
            chosen_guess,
            contributor_names,
            ..
        } = h.sink_rx.recv().await.unwrap()
        else {
            panic!("expected a choice record");
        };
        assert_eq!(chosen_guess, "pop");
        assert_eq!(contributor_names, vec![guesser_name.to_string()]);
    }

    #[tokio::test]
    async fn test_name_taken_join_is_rejected() {
        let alice = Uuid::new_v4();
        let (alice_tx, _alice_rx) = mpsc::channel(32);
        let (other_tx, mut other_rx) = mpsc::channel(32);
        let h = spawn_room(alice, alice_tx, 36);

        let result = h.handle.join(Uuid::new_v4(), "Alice".to_string(), other_tx).await;
        assert!(matches!(
            result,
            Err(RoomActorError::Room(RoomError::NameTaken(name))) if name == "Alice"
        ));
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_guess_is_reported_to_sender_only() {
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let (alice_tx, mut alice_rx) = mpsc::channel(32);
        let (bob_tx, mut bob_rx) = mpsc::channel(32);
        let h = spawn_room(alice, alice_tx, 36);
        h.handle.join(bob, "Bob".to_string(), bob_tx).await.unwrap();
        h.handle.command(alice, RoomCommand::StartGame).await.unwrap();

        let parent = loop {
            if let ServerToClientMessage::GameStarted { parent, .. } = next_message(&mut bob_rx).await {
                break parent;
            }
        };
        loop {
            if let ServerToClientMessage::GameStarted { .. } = next_message(&mut alice_rx).await {
                break;
            }
        }
        let (parent_id, parent_rx, guesser_id, guesser_rx) = if parent.name == "Alice" {
            (alice, &mut alice_rx, bob, &mut bob_rx)
        } else {
            (bob, &mut bob_rx, alice, &mut alice_rx)
        };

        h.handle.command(parent_id, RoomCommand::DrawCard).await.unwrap();
        next_message(parent_rx).await;
        next_message(guesser_rx).await;

        h.handle
            .command(guesser_id, RoomCommand::SubmitGuess { text: "   ".to_string() })
            .await
            .unwrap();
        // Silently ignored: the parent may not guess.
        h.handle
            .command(parent_id, RoomCommand::SubmitGuess { text: "pop".to_string() })
            .await
            .unwrap();
        assert!(matches!(
            next_message(guesser_rx).await,
            ServerToClientMessage::SystemError { .. }
        ));

        // A valid guess still goes through afterwards.
        h.handle
            .command(guesser_id, RoomCommand::SubmitGuess { text: "pop".to_string() })
            .await
            .unwrap();
        assert!(matches!(
            next_message(parent_rx).await,
            ServerToClientMessage::SubmissionsComplete { .. }
        ));
    }

    #[tokio::test]
    async fn test_parent_disconnect_moves_turn_and_updates_players() {
        let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let (alice_tx, _alice_rx) = mpsc::channel(64);
        let (bob_tx, mut bob_rx) = mpsc::channel(64);
        let (carol_tx, _carol_rx) = mpsc::channel(64);
        let h = spawn_room(alice, alice_tx, 36);
        h.handle.join(bob, "Bob".to_string(), bob_tx).await.unwrap();
        h.handle.join(carol, "Carol".to_string(), carol_tx).await.unwrap();
        h.handle.command(alice, RoomCommand::StartGame).await.unwrap();

        let parent = loop {
            if let ServerToClientMessage::GameStarted { parent, .. } = next_message(&mut bob_rx).await {
                break parent;
            }
        };
        let parent_conn = match parent.name.as_str() {
            "Alice" => alice,
            "Bob" => bob,
            _ => carol,
        };
        if parent_conn == bob {
            // Bob stays connected to observe; let the owner skip Bob's turn first.
            h.handle.command(alice, RoomCommand::AdvanceTurn).await.unwrap();
            next_message(&mut bob_rx).await;
        }
        let parent_conn = if parent_conn == bob { carol } else { parent_conn };

        h.handle.client_left(parent_conn).await;
        let ServerToClientMessage::PlayersUpdated { players } = next_message(&mut bob_rx).await else {
            panic!("expected PlayersUpdated");
        };
        assert_eq!(players.len(), 2);
        let ServerToClientMessage::NewTurn { parent, phase } = next_message(&mut bob_rx).await else {
            panic!("expected NewTurn");
        };
        assert_eq!(phase, Phase::TurnActive);
        assert!(players.contains(&parent));
    }

    #[tokio::test]
    async fn test_stalled_player_does_not_hold_up_the_room() {
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let (alice_tx, mut alice_rx) = mpsc::channel(64);
        // Bob's socket writer never drains.
        let (bob_tx, _bob_rx) = mpsc::channel(1);
        let h = spawn_room(alice, alice_tx, 36);
        h.handle.join(bob, "Bob".to_string(), bob_tx).await.unwrap();
        h.handle.command(alice, RoomCommand::StartGame).await.unwrap();
        loop {
            if let ServerToClientMessage::GameStarted { .. } = next_message(&mut alice_rx).await {
                break;
            }
        }
        for _ in 0..5 {
            h.handle.command(alice, RoomCommand::AdvanceTurn).await.unwrap();
            assert!(matches!(
                next_message(&mut alice_rx).await,
                ServerToClientMessage::NewTurn { .. }
            ));
        }
    }

    #[tokio::test]
    async fn test_room_closes_when_last_player_leaves() {
        let alice = Uuid::new_v4();
        let (alice_tx, _alice_rx) = mpsc::channel(32);
        let mut h = spawn_room(alice, alice_tx, 36);

        h.handle.client_left(Uuid::new_v4()).await;
        assert!(!h.handle.is_closed());

        h.handle.client_left(alice).await;
        tokio::time::timeout(Duration::from_secs(1), h.handle.sender.closed())
            .await
            .unwrap();
        assert!(h.handle.is_closed());

        let notice = h.registry_rx.recv().await.unwrap();
        assert!(matches!(notice, RegistryMessage::RoomClosed { room_id } if room_id == "0001"));

        let (late_tx, _late_rx) = mpsc::channel(8);
        assert!(matches!(
            h.handle.join(Uuid::new_v4(), "Late".to_string(), late_tx).await,
            Err(RoomActorError::Closed)
        ));
    }
}
