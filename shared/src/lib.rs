use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const GRID_WIDTH: i32 = 20;
pub const GRID_HEIGHT: i32 = 15;
pub const MAX_LEVELS: u32 = 3;
pub const MAX_PLAYERS: usize = 4;
pub const MIN_PLAYERS_TO_START: usize = 2;
pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_TICK_RATE: u32 = 30;
/// Lines longer than this are discarded unread by the server.
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Cardinal facing of a tank or travel direction of a projectile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    /// Unit step in tile coordinates, y grows downwards.
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }
}

/// One frame of participant intent. Absent fields mean "not pressed".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInput {
    #[serde(rename = "move", default, skip_serializing_if = "Option::is_none")]
    pub movement: Option<Direction>,
    #[serde(default)]
    pub shoot: bool,
    #[serde(default)]
    pub stop: bool,
}

impl PlayerInput {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn moving(direction: Direction) -> Self {
        Self {
            movement: Some(direction),
            ..Self::default()
        }
    }

    pub fn shooting() -> Self {
        Self {
            shoot: true,
            ..Self::default()
        }
    }

    pub fn stopping() -> Self {
        Self {
            stop: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Player,
    EnemyNormal,
    EnemyFast,
    EnemyHeavy,
    Projectile,
    Wall,
    ObjectiveAlpha,
    ObjectiveBravo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectView {
    pub id: u32,
    pub kind: ObjectKind,
    pub tile_x: i32,
    pub tile_y: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facing: Option<Direction>,
    #[serde(default)]
    pub is_moving: bool,
    /// Participant slot for player tanks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyingEnemyView {
    pub id: u32,
    pub tile_x: i32,
    pub tile_y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantView {
    pub name: String,
    pub lives: u32,
    pub score: u32,
    pub color: String,
    pub active: bool,
}

/// Everything a renderer needs to draw one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tick: u64,
    pub level: String,
    pub player_lives: u32,
    pub objects: Vec<ObjectView>,
    pub destroying_enemies: Vec<DestroyingEnemyView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participants: Option<BTreeMap<u8, ParticipantView>>,
}

impl Snapshot {
    pub fn count_of(&self, kind: ObjectKind) -> usize {
        self.objects.iter().filter(|o| o.kind == kind).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    Lobby,
    Playing,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyPlayer {
    pub player_id: u8,
    pub username: String,
    pub ready: bool,
}

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinGame {
        #[serde(default)]
        username: Option<String>,
    },
    Ready {
        ready: bool,
    },
    PlayerInput {
        inputs: PlayerInput,
    },
    Chat {
        message: String,
    },
    Ping,
    Pong,
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionAccepted {
        client_id: u32,
        max_players: usize,
        current_players: usize,
    },
    ConnectionRejected {
        reason: String,
    },
    JoinAccepted {
        player_id: u8,
        username: String,
    },
    JoinRejected {
        reason: String,
    },
    LobbyState {
        players: Vec<LobbyPlayer>,
        game_state: SessionPhase,
        can_start: bool,
    },
    GameStart {
        level: String,
    },
    GameState {
        state: Snapshot,
    },
    GameOver {
        reason: String,
    },
    LevelCompleted {
        next_level: u32,
    },
    Victory {
        message: String,
    },
    ReturnToLobby,
    Chat {
        username: String,
        message: String,
        timestamp: u64,
    },
    Ping,
    Pong,
}

/// Encodes a message as one newline-terminated JSON line.
pub fn encode_message<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Decodes one JSON line; surrounding whitespace is ignored.
pub fn decode_message<T: DeserializeOwned>(line: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line.trim())
}
