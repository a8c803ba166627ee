//! Lobby and match state machine
//!
//! The session owns the client roster and the multiplayer engine. It does no
//! I/O: every operation takes the current [`Instant`] and returns the
//! messages to deliver, which the network layer dispatches after releasing
//! the session lock.
//!
//! Phases loop `Lobby → Playing → Finished → Lobby`. A match starts once at
//! least `min_players` have joined and all of them are ready; any terminal
//! outcome moves to `Finished`, and `return_delay` later everyone is sent
//! back to the lobby with ready flags and scores cleared.

use crate::client_manager::{ClientId, ClientManager};
use crate::game::Outcome;
use crate::level::{LevelId, LevelSource};
use crate::multiplayer::MultiplayerGame;
use crate::utils::{default_username, get_timestamp};
use log::{debug, error, info, warn};
use shared::{ClientMessage, ServerMessage, SessionPhase, MAX_PLAYERS, MIN_PLAYERS_TO_START};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

pub const REJECT_FULL: &str = "Server full";
pub const REJECT_NO_SLOTS: &str = "No slots available";
pub const REJECT_IN_PROGRESS: &str = "Game already in progress";
pub const REJECT_ALREADY_JOINED: &str = "Already joined";
pub const GAME_OVER_DESTROYED: &str = "All players were destroyed";
pub const GAME_OVER_ABANDONED: &str = "Not enough players remaining";
pub const VICTORY_MESSAGE: &str = "Congratulations! You have completed every level";

const MAX_USERNAME_CHARS: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Client(ClientId),
    All,
}

/// A message the network layer should deliver.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub recipient: Recipient,
    pub message: ServerMessage,
}

impl Outbound {
    pub fn to(client_id: ClientId, message: ServerMessage) -> Self {
        Self {
            recipient: Recipient::Client(client_id),
            message,
        }
    }

    pub fn all(message: ServerMessage) -> Self {
        Self {
            recipient: Recipient::All,
            message,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_players: usize,
    pub min_players: usize,
    pub return_delay: Duration,
    pub client_timeout: Duration,
    /// Custom first level; procedural level 1 when unset.
    pub level_file: Option<PathBuf>,
    pub seed: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_players: MAX_PLAYERS,
            min_players: MIN_PLAYERS_TO_START,
            return_delay: Duration::from_secs(5),
            client_timeout: Duration::from_secs(30),
            level_file: None,
            seed: 0,
        }
    }
}

pub struct Session {
    config: SessionConfig,
    clients: ClientManager,
    game: MultiplayerGame,
    phase: SessionPhase,
    finished_at: Option<Instant>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            clients: ClientManager::new(config.max_players),
            game: MultiplayerGame::new(config.seed),
            phase: SessionPhase::Lobby,
            finished_at: None,
            config,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn game(&self) -> &MultiplayerGame {
        &self.game
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Registers a new connection, or returns the rejection to write
    /// before closing it.
    pub fn connect(
        &mut self,
        addr: SocketAddr,
        now: Instant,
    ) -> Result<(ClientId, Vec<Outbound>), ServerMessage> {
        let Some(client_id) = self.clients.add_client(addr, now) else {
            warn!("Rejected connection from {}: server full", addr);
            return Err(ServerMessage::ConnectionRejected {
                reason: REJECT_FULL.to_string(),
            });
        };

        let accepted = ServerMessage::ConnectionAccepted {
            client_id,
            max_players: self.config.max_players,
            current_players: self.clients.len(),
        };
        Ok((client_id, vec![Outbound::to(client_id, accepted)]))
    }

    pub fn handle_message(
        &mut self,
        client_id: ClientId,
        message: ClientMessage,
        now: Instant,
    ) -> Vec<Outbound> {
        if self.clients.get(client_id).is_none() {
            debug!("Message from unknown client {}", client_id);
            return Vec::new();
        }
        self.clients.touch(client_id, now);

        match message {
            ClientMessage::JoinGame { username } => self.handle_join(client_id, username),
            ClientMessage::Ready { ready } => self.handle_ready(client_id, ready),
            ClientMessage::PlayerInput { inputs } => {
                if self.phase == SessionPhase::Playing {
                    self.clients.set_latest_input(client_id, inputs);
                }
                Vec::new()
            }
            ClientMessage::Chat { message } => self.handle_chat(client_id, message),
            ClientMessage::Ping => vec![Outbound::to(client_id, ServerMessage::Pong)],
            ClientMessage::Pong => Vec::new(),
        }
    }

    fn handle_join(&mut self, client_id: ClientId, username: Option<String>) -> Vec<Outbound> {
        let reject = |reason: &str| {
            vec![Outbound::to(
                client_id,
                ServerMessage::JoinRejected {
                    reason: reason.to_string(),
                },
            )]
        };

        if self.clients.get(client_id).map_or(false, |c| c.has_joined()) {
            return reject(REJECT_ALREADY_JOINED);
        }
        if self.phase != SessionPhase::Lobby {
            return reject(REJECT_IN_PROGRESS);
        }

        let requested: Option<String> = username
            .map(|name| name.trim().chars().take(MAX_USERNAME_CHARS).collect())
            .filter(|name: &String| !name.is_empty());
        let provisional = requested.clone().unwrap_or_default();
        let Some(slot) = self.clients.assign_slot(client_id, provisional) else {
            return reject(REJECT_NO_SLOTS);
        };

        let username = requested.unwrap_or_else(|| default_username(slot));
        if let Some(client) = self.clients.get_mut(client_id) {
            client.username = Some(username.clone());
        }
        self.game.add_participant(slot, username.clone());
        info!("{} joined as player {}", username, slot);

        vec![
            Outbound::to(
                client_id,
                ServerMessage::JoinAccepted {
                    player_id: slot,
                    username,
                },
            ),
            self.lobby_state(),
        ]
    }

    fn handle_ready(&mut self, client_id: ClientId, ready: bool) -> Vec<Outbound> {
        if self.phase != SessionPhase::Lobby || !self.clients.set_ready(client_id, ready) {
            return Vec::new();
        }

        let mut out = Vec::new();
        if self.clients.all_ready(self.config.min_players) {
            out.extend(self.start_game());
        }
        out.push(self.lobby_state());
        out
    }

    fn handle_chat(&mut self, client_id: ClientId, message: String) -> Vec<Outbound> {
        let Some(username) = self.clients.get(client_id).and_then(|c| c.username.clone()) else {
            return Vec::new();
        };
        let message = message.trim();
        if message.is_empty() {
            return Vec::new();
        }

        vec![Outbound::all(ServerMessage::Chat {
            username,
            message: message.to_string(),
            timestamp: get_timestamp(),
        })]
    }

    fn first_level(&self) -> LevelSource {
        match &self.config.level_file {
            Some(path) => LevelSource::File(path.clone()),
            None => LevelSource::Procedural(1),
        }
    }

    fn start_game(&mut self) -> Vec<Outbound> {
        if let Err(e) = self.game.start_game(self.first_level()) {
            error!("Failed to start game: {}", e);
            return Vec::new();
        }

        self.phase = SessionPhase::Playing;
        info!(
            "Starting game with {} players on level {}",
            self.game.len(),
            self.game.level.label()
        );
        vec![Outbound::all(ServerMessage::GameStart {
            level: self.game.level.label(),
        })]
    }

    /// Removes a client and their participant. Leaving a running match
    /// below the minimum ends it.
    pub fn disconnect(&mut self, client_id: ClientId, now: Instant) -> Vec<Outbound> {
        let Some(client) = self.clients.remove_client(client_id) else {
            return Vec::new();
        };
        let Some(slot) = client.slot else {
            return Vec::new();
        };
        self.game.remove_participant(slot);

        match self.phase {
            SessionPhase::Lobby => vec![self.lobby_state()],
            SessionPhase::Playing if self.game.len() < self.config.min_players => {
                info!("Too few players left, ending the game");
                self.finish(
                    ServerMessage::GameOver {
                        reason: GAME_OVER_ABANDONED.to_string(),
                    },
                    now,
                )
            }
            _ => Vec::new(),
        }
    }

    /// One game-loop iteration: steps a running match, or returns a
    /// finished one to the lobby once its delay has passed.
    pub fn tick(&mut self, now: Instant, elapsed_ms: u64) -> Vec<Outbound> {
        match self.phase {
            SessionPhase::Playing => self.step_game(now, elapsed_ms),
            SessionPhase::Finished => {
                let due = self
                    .finished_at
                    .map_or(true, |at| now.saturating_duration_since(at) >= self.config.return_delay);
                if due {
                    self.return_to_lobby()
                } else {
                    Vec::new()
                }
            }
            SessionPhase::Lobby => Vec::new(),
        }
    }

    fn step_game(&mut self, now: Instant, elapsed_ms: u64) -> Vec<Outbound> {
        let inputs = self.clients.take_inputs();
        let outcome = self.game.step(&inputs, elapsed_ms);

        let mut out = vec![Outbound::all(ServerMessage::GameState {
            state: self.game.snapshot(),
        })];

        match outcome {
            Outcome::Playing => {}
            Outcome::GameOver => out.extend(self.finish(
                ServerMessage::GameOver {
                    reason: GAME_OVER_DESTROYED.to_string(),
                },
                now,
            )),
            Outcome::LevelCleared => {
                let next_level = match self.game.level {
                    LevelId::Procedural(number) => number + 1,
                    _ => 1,
                };
                out.push(Outbound::all(ServerMessage::LevelCompleted { next_level }));
                if let Err(e) = self.game.advance_level() {
                    warn!("Could not load level {}: {}", next_level, e);
                    out.extend(self.finish(victory(), now));
                }
            }
            Outcome::FinalVictory => out.extend(self.finish(victory(), now)),
        }
        out
    }

    fn finish(&mut self, announcement: ServerMessage, now: Instant) -> Vec<Outbound> {
        self.phase = SessionPhase::Finished;
        self.finished_at = Some(now);
        info!("Game finished: {:?}", announcement);
        vec![Outbound::all(announcement)]
    }

    fn return_to_lobby(&mut self) -> Vec<Outbound> {
        self.phase = SessionPhase::Lobby;
        self.finished_at = None;
        self.clients.reset_ready();
        self.game.reset_for_lobby();
        info!("Returning to lobby");

        vec![Outbound::all(ServerMessage::ReturnToLobby), self.lobby_state()]
    }

    /// Drops silent clients and pings everyone else. Returns the dropped ids
    /// so their connections can be closed.
    pub fn heartbeat(&mut self, now: Instant) -> (Vec<Outbound>, Vec<ClientId>) {
        let expired = self.clients.check_timeouts(now, self.config.client_timeout);
        let mut out = Vec::new();
        for client_id in &expired {
            warn!("Client {} timed out", client_id);
            out.extend(self.disconnect(*client_id, now));
        }
        out.push(Outbound::all(ServerMessage::Ping));
        (out, expired)
    }

    pub fn lobby_state(&self) -> Outbound {
        Outbound::all(ServerMessage::LobbyState {
            players: self.clients.lobby_players(),
            game_state: self.phase,
            can_start: self.phase == SessionPhase::Lobby
                && self.clients.joined_count() >= self.config.min_players,
        })
    }
}

fn victory() -> ServerMessage {
    ServerMessage::Victory {
        message: VICTORY_MESSAGE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Direction, PlayerInput};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn join(session: &mut Session, name: &str, now: Instant) -> ClientId {
        let (id, _) = session.connect(addr(9000 + session.clients().len() as u16), now).unwrap();
        session.handle_message(
            id,
            ClientMessage::JoinGame {
                username: Some(name.to_string()),
            },
            now,
        );
        id
    }

    fn playing_pair(now: Instant) -> (Session, ClientId, ClientId) {
        let mut session = Session::new(SessionConfig {
            seed: 7,
            ..SessionConfig::default()
        });
        let a = join(&mut session, "alice", now);
        let b = join(&mut session, "bob", now);
        session.handle_message(a, ClientMessage::Ready { ready: true }, now);
        let out = session.handle_message(b, ClientMessage::Ready { ready: true }, now);
        assert!(out
            .iter()
            .any(|o| matches!(o.message, ServerMessage::GameStart { .. })));
        (session, a, b)
    }

    fn messages(out: &[Outbound]) -> Vec<&ServerMessage> {
        out.iter().map(|o| &o.message).collect()
    }

    #[test]
    fn test_connect_reports_capacity() {
        let mut session = Session::new(SessionConfig {
            max_players: 2,
            ..SessionConfig::default()
        });
        let now = Instant::now();

        let (id, out) = session.connect(addr(1), now).unwrap();
        assert!(matches!(
            out[0].message,
            ServerMessage::ConnectionAccepted {
                client_id,
                max_players: 2,
                current_players: 1
            } if client_id == id
        ));
        session.connect(addr(2), now).unwrap();
        assert!(matches!(
            session.connect(addr(3), now),
            Err(ServerMessage::ConnectionRejected { .. })
        ));
    }

    #[test]
    fn test_join_assigns_slot_and_broadcasts_lobby() {
        let mut session = Session::new(SessionConfig::default());
        let now = Instant::now();
        let (id, _) = session.connect(addr(1), now).unwrap();

        let out = session.handle_message(id, ClientMessage::JoinGame { username: None }, now);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].recipient, Recipient::Client(id));
        assert!(matches!(
            &out[0].message,
            ServerMessage::JoinAccepted { player_id: 1, username } if username == "Player1"
        ));
        assert_eq!(out[1].recipient, Recipient::All);
        assert!(matches!(
            &out[1].message,
            ServerMessage::LobbyState { players, can_start: false, game_state: SessionPhase::Lobby }
                if players.len() == 1
        ));
    }

    #[test]
    fn test_join_rejections() {
        let now = Instant::now();
        let mut session = Session::new(SessionConfig::default());
        let a = join(&mut session, "alice", now);

        let out = session.handle_message(a, ClientMessage::JoinGame { username: None }, now);
        assert!(matches!(
            &out[0].message,
            ServerMessage::JoinRejected { reason } if reason == REJECT_ALREADY_JOINED
        ));

        let (mut session, _, _) = playing_pair(now);
        let (late, _) = session.connect(addr(50), now).unwrap();
        let out = session.handle_message(late, ClientMessage::JoinGame { username: None }, now);
        assert!(matches!(
            &out[0].message,
            ServerMessage::JoinRejected { reason } if reason == REJECT_IN_PROGRESS
        ));
    }

    #[test]
    fn test_game_needs_two_ready_players() {
        let now = Instant::now();
        let mut session = Session::new(SessionConfig::default());
        let a = join(&mut session, "alice", now);

        let out = session.handle_message(a, ClientMessage::Ready { ready: true }, now);
        assert_eq!(session.phase(), SessionPhase::Lobby);
        assert_eq!(out.len(), 1);

        let b = join(&mut session, "bob", now);
        session.handle_message(b, ClientMessage::Ready { ready: false }, now);
        assert_eq!(session.phase(), SessionPhase::Lobby);
        session.handle_message(b, ClientMessage::Ready { ready: true }, now);
        assert_eq!(session.phase(), SessionPhase::Playing);
    }

    #[test]
    fn test_tick_broadcasts_snapshot_with_participants() {
        let now = Instant::now();
        let (mut session, a, _) = playing_pair(now);

        session.handle_message(
            a,
            ClientMessage::PlayerInput {
                inputs: PlayerInput::moving(Direction::Down),
            },
            now,
        );
        let out = session.tick(now, 33);
        let ServerMessage::GameState { state } = &out[0].message else {
            panic!("expected a game state, got {:?}", out[0].message);
        };
        assert_eq!(state.tick, 1);
        let participants = state.participants.as_ref().unwrap();
        assert_eq!(participants.len(), 2);
        assert_eq!(participants[&1].name, "alice");
        assert!(session.clients().get(a).unwrap().latest_input.is_none());
    }

    #[test]
    fn test_disconnect_mid_game_ends_it() {
        let now = Instant::now();
        let (mut session, _, b) = playing_pair(now);
        session.tick(now, 33);

        let out = session.disconnect(b, now);
        assert_eq!(session.phase(), SessionPhase::Finished);
        assert!(matches!(
            messages(&out)[..],
            [ServerMessage::GameOver { .. }]
        ));
        assert!(session.handle_message(b, ClientMessage::Ping, now).is_empty());
    }

    #[test]
    fn test_finished_returns_to_lobby_after_delay() {
        let now = Instant::now();
        let (mut session, a, b) = playing_pair(now);
        session.disconnect(b, now);

        assert!(session.tick(now + Duration::from_secs(1), 33).is_empty());
        let out = session.tick(now + Duration::from_secs(6), 33);
        assert!(matches!(
            messages(&out)[..],
            [ServerMessage::ReturnToLobby, ServerMessage::LobbyState { .. }]
        ));
        assert_eq!(session.phase(), SessionPhase::Lobby);
        assert!(!session.clients().get(a).unwrap().ready);
        assert_eq!(session.game().participant(1).unwrap().score, 0);
    }

    #[test]
    fn test_chat_is_broadcast_with_username() {
        let now = Instant::now();
        let mut session = Session::new(SessionConfig::default());
        let a = join(&mut session, "alice", now);

        let out = session.handle_message(
            a,
            ClientMessage::Chat {
                message: " hello ".to_string(),
            },
            now,
        );
        assert_eq!(out[0].recipient, Recipient::All);
        assert!(matches!(
            &out[0].message,
            ServerMessage::Chat { username, message, .. } if username == "alice" && message == "hello"
        ));
    }

    #[test]
    fn test_ping_pong_and_heartbeat_timeouts() {
        let now = Instant::now();
        let mut session = Session::new(SessionConfig::default());
        let a = join(&mut session, "alice", now);
        let b = join(&mut session, "bob", now);

        let out = session.handle_message(a, ClientMessage::Ping, now);
        assert!(matches!(messages(&out)[..], [ServerMessage::Pong]));

        let later = now + Duration::from_secs(20);
        session.handle_message(b, ClientMessage::Pong, later);
        let (out, dropped) = session.heartbeat(now + Duration::from_secs(31));
        assert_eq!(dropped, vec![a]);
        assert!(matches!(out.last().map(|o| &o.message), Some(ServerMessage::Ping)));
        assert_eq!(session.clients().len(), 1);
        assert!(session.game().participant(1).is_none());
    }
}
