//! Connected client roster for the lobby and match
//!
//! This module handles the server-side bookkeeping for every open connection:
//! - Client connection lifecycle (connect, disconnect, timeout)
//! - Lobby membership: username, participant slot and ready flag
//! - The latest input per participant, overwritten on every update
//!
//! Inputs are last-write-wins: a client that sends several updates between
//! two ticks only has its most recent one applied.

use log::info;
use shared::{LobbyPlayer, PlayerInput};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

pub type ClientId = u32;

/// Represents a connected client and their lobby state
///
/// Each client maintains:
/// - Connection metadata (ID, address, last activity)
/// - Lobby membership once they have joined (username and slot)
/// - The input to apply at the next tick, if any
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: ClientId,
    /// Remote address, for logging
    pub addr: SocketAddr,
    /// Last time we received any message from this client
    pub last_seen: Instant,
    /// Display name, set on join
    pub username: Option<String>,
    /// Participant slot in 1..=max_players, set on join
    pub slot: Option<u8>,
    /// Lobby ready flag
    pub ready: bool,
    /// Most recent input since the last tick
    pub latest_input: Option<PlayerInput>,
}

impl Client {
    /// Creates a connected client that has not joined the lobby yet
    pub fn new(id: ClientId, addr: SocketAddr, now: Instant) -> Self {
        Self {
            id,
            addr,
            last_seen: now,
            username: None,
            slot: None,
            ready: false,
            latest_input: None,
        }
    }

    pub fn has_joined(&self) -> bool {
        self.slot.is_some()
    }

    /// Checks if the client has exceeded the connection timeout
    ///
    /// Returns true if nothing has been received from this client within
    /// the timeout window measured from `now`.
    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }
}

/// Manages all connected clients and their lobby membership
///
/// The ClientManager enforces the connection cap, hands out participant
/// slots, and buffers one input per participant for the game loop. Clients
/// are kept in a `BTreeMap` so every listing comes out in connection order.
pub struct ClientManager {
    /// Connected clients indexed by their unique ID
    clients: BTreeMap<ClientId, Client>,
    /// Next available client ID for new connections
    next_client_id: ClientId,
    /// Maximum number of concurrent connections and participants
    max_clients: usize,
}

impl ClientManager {
    /// Creates a new client manager with the specified capacity limit
    ///
    /// Client IDs start from 1 and increment for each new connection.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: BTreeMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Attempts to add a new client connection
    ///
    /// Returns Some(client_id) if successful, None if server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr, now: Instant) -> Option<ClientId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr, now));

        Some(client_id)
    }

    /// Removes a client from the server
    ///
    /// Returns the removed client so callers can release its slot in the
    /// game, or None if they were already gone.
    pub fn remove_client(&mut self, client_id: ClientId) -> Option<Client> {
        let client = self.clients.remove(&client_id)?;
        info!("Client {} disconnected", client.id);
        Some(client)
    }

    pub fn get(&self, client_id: ClientId) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    pub fn get_mut(&mut self, client_id: ClientId) -> Option<&mut Client> {
        self.clients.get_mut(&client_id)
    }

    /// Refreshes the activity timestamp of a client
    pub fn touch(&mut self, client_id: ClientId, now: Instant) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.last_seen = now;
        }
    }

    /// Gives a client the lowest free participant slot
    ///
    /// Returns None if the client is unknown, already joined, or every slot
    /// in 1..=max_clients is taken.
    pub fn assign_slot(&mut self, client_id: ClientId, username: String) -> Option<u8> {
        if self.clients.get(&client_id)?.has_joined() {
            return None;
        }

        let slot = (1..=self.max_clients as u8).find(|slot| self.client_in_slot(*slot).is_none())?;
        let client = self.clients.get_mut(&client_id)?;
        client.slot = Some(slot);
        client.username = Some(username);
        client.ready = false;
        Some(slot)
    }

    pub fn client_in_slot(&self, slot: u8) -> Option<&Client> {
        self.clients.values().find(|c| c.slot == Some(slot))
    }

    /// Number of clients holding a participant slot
    pub fn joined_count(&self) -> usize {
        self.clients.values().filter(|c| c.has_joined()).count()
    }

    /// Sets the ready flag of a joined client. False if they never joined.
    pub fn set_ready(&mut self, client_id: ClientId, ready: bool) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) if client.has_joined() => {
                client.ready = ready;
                true
            }
            _ => false,
        }
    }

    /// True when at least `minimum` clients joined and all of them are ready
    pub fn all_ready(&self, minimum: usize) -> bool {
        let joined: Vec<&Client> = self.clients.values().filter(|c| c.has_joined()).collect();
        joined.len() >= minimum && joined.iter().all(|c| c.ready)
    }

    /// Clears every ready flag, used when a match ends
    pub fn reset_ready(&mut self) {
        for client in self.clients.values_mut() {
            client.ready = false;
            client.latest_input = None;
        }
    }

    /// Replaces the buffered input of a joined client
    pub fn set_latest_input(&mut self, client_id: ClientId, input: PlayerInput) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) if client.has_joined() => {
                client.latest_input = Some(input);
                true
            }
            _ => false,
        }
    }

    /// Drains the buffered inputs, keyed by participant slot
    pub fn take_inputs(&mut self) -> BTreeMap<u8, PlayerInput> {
        self.clients
            .values_mut()
            .filter_map(|client| Some((client.slot?, client.latest_input.take()?)))
            .collect()
    }

    /// Lobby listing in slot order
    pub fn lobby_players(&self) -> Vec<LobbyPlayer> {
        let mut players: Vec<LobbyPlayer> = self
            .clients
            .values()
            .filter_map(|client| {
                Some(LobbyPlayer {
                    player_id: client.slot?,
                    username: client.username.clone()?,
                    ready: client.ready,
                })
            })
            .collect();
        players.sort_by_key(|p| p.player_id);
        players
    }

    /// Lists the clients that have been silent for longer than `timeout`
    ///
    /// The caller removes them so the game can release their slots too.
    pub fn check_timeouts(&self, now: Instant, timeout: Duration) -> Vec<ClientId> {
        self.clients
            .values()
            .filter(|client| client.is_timed_out(now, timeout))
            .map(|client| client.id)
            .collect()
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are currently connected
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Direction;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_client_creation() {
        let addr = test_addr();
        let client = Client::new(1, addr, Instant::now());

        assert_eq!(client.id, 1);
        assert_eq!(client.addr, addr);
        assert!(!client.has_joined());
        assert!(client.latest_input.is_none());
    }

    #[test]
    fn test_client_timeout() {
        let start = Instant::now();
        let client = Client::new(1, test_addr(), start);

        assert!(!client.is_timed_out(start + Duration::from_secs(1), Duration::from_secs(1)));
        assert!(client.is_timed_out(start + Duration::from_secs(2), Duration::from_secs(1)));
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = ClientManager::new(1);
        let now = Instant::now();

        assert_eq!(manager.add_client(test_addr(), now), Some(1));
        assert!(manager.add_client(test_addr2(), now).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove_client() {
        let mut manager = ClientManager::new(2);
        let client_id = manager.add_client(test_addr(), Instant::now()).unwrap();

        assert!(manager.remove_client(client_id).is_some());
        assert!(manager.remove_client(client_id).is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_slots_fill_lowest_first_and_are_reused() {
        let mut manager = ClientManager::new(3);
        let now = Instant::now();
        let a = manager.add_client(test_addr(), now).unwrap();
        let b = manager.add_client(test_addr2(), now).unwrap();

        assert_eq!(manager.assign_slot(a, "alice".into()), Some(1));
        assert_eq!(manager.assign_slot(b, "bob".into()), Some(2));
        assert_eq!(manager.assign_slot(a, "again".into()), None);

        manager.remove_client(a);
        let c = manager.add_client(test_addr(), now).unwrap();
        assert_eq!(manager.assign_slot(c, "carol".into()), Some(1));
        assert_eq!(manager.joined_count(), 2);
    }

    #[test]
    fn test_ready_requires_join_and_minimum() {
        let mut manager = ClientManager::new(4);
        let now = Instant::now();
        let a = manager.add_client(test_addr(), now).unwrap();
        let b = manager.add_client(test_addr2(), now).unwrap();

        assert!(!manager.set_ready(a, true));
        manager.assign_slot(a, "alice".into());
        assert!(manager.set_ready(a, true));
        assert!(!manager.all_ready(2));

        manager.assign_slot(b, "bob".into());
        assert!(!manager.all_ready(2));
        manager.set_ready(b, true);
        assert!(manager.all_ready(2));

        manager.reset_ready();
        assert!(manager.lobby_players().iter().all(|p| !p.ready));
    }

    #[test]
    fn test_latest_input_wins_and_is_taken_once() {
        let mut manager = ClientManager::new(2);
        let a = manager.add_client(test_addr(), Instant::now()).unwrap();
        manager.assign_slot(a, "alice".into());

        manager.set_latest_input(a, PlayerInput::moving(Direction::Up));
        manager.set_latest_input(a, PlayerInput::moving(Direction::Left));

        let inputs = manager.take_inputs();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[&1].movement, Some(Direction::Left));
        assert!(manager.take_inputs().is_empty());
    }

    #[test]
    fn test_input_before_join_is_ignored() {
        let mut manager = ClientManager::new(2);
        let a = manager.add_client(test_addr(), Instant::now()).unwrap();

        assert!(!manager.set_latest_input(a, PlayerInput::shooting()));
        assert!(manager.take_inputs().is_empty());
    }

    #[test]
    fn test_check_timeouts_lists_silent_clients() {
        let mut manager = ClientManager::new(2);
        let start = Instant::now();
        let a = manager.add_client(test_addr(), start).unwrap();
        let b = manager.add_client(test_addr2(), start).unwrap();

        manager.touch(b, start + Duration::from_secs(20));
        let expired = manager.check_timeouts(start + Duration::from_secs(31), Duration::from_secs(30));
        assert_eq!(expired, vec![a]);
    }
}
