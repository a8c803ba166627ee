//! Command line and runtime configuration for the server

use crate::error::ConfigError;
use crate::session::SessionConfig;
use clap::Parser;
use shared::{DEFAULT_PORT, DEFAULT_TICK_RATE, MAX_PLAYERS, MIN_PLAYERS_TO_START};
use std::path::PathBuf;
use std::time::Duration;

/// Command line arguments of the `server` binary
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about = "Authoritative tank arena server")]
pub struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    pub host: String,
    /// Server port to listen on
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Maximum number of participants (2-4)
    #[clap(short, long, default_value_t = MAX_PLAYERS)]
    pub max_players: usize,
    /// Tick rate (updates per second)
    #[clap(short, long, default_value_t = DEFAULT_TICK_RATE)]
    pub tick_rate: u32,
    /// Custom level file used instead of the procedural first level
    #[clap(long)]
    pub level_file: Option<PathBuf>,
    /// Seed for level generation and enemy AI
    #[clap(long)]
    pub seed: Option<u64>,
    /// Seconds between liveness pings
    #[clap(long, default_value_t = 5)]
    pub ping_interval: u64,
    /// Seconds of silence before a client is dropped
    #[clap(long, default_value_t = 30)]
    pub client_timeout: u64,
    /// Seconds between the end of a match and the return to the lobby
    #[clap(long, default_value_t = 5)]
    pub return_delay: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_players: usize,
    pub tick_rate: u32,
    pub level_file: Option<PathBuf>,
    pub seed: Option<u64>,
    pub ping_interval: Duration,
    pub client_timeout: Duration,
    pub return_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_players: MAX_PLAYERS,
            tick_rate: DEFAULT_TICK_RATE,
            level_file: None,
            seed: None,
            ping_interval: Duration::from_secs(5),
            client_timeout: Duration::from_secs(30),
            return_delay: Duration::from_secs(5),
        }
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            max_players: args.max_players,
            tick_rate: args.tick_rate,
            level_file: args.level_file,
            seed: args.seed,
            ping_interval: Duration::from_secs(args.ping_interval),
            client_timeout: Duration::from_secs(args.client_timeout),
            return_delay: Duration::from_secs(args.return_delay),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_PLAYERS_TO_START..=MAX_PLAYERS).contains(&self.max_players) {
            return Err(ConfigError::Invalid(format!(
                "max players must be between {} and {}, got {}",
                MIN_PLAYERS_TO_START, MAX_PLAYERS, self.max_players
            )));
        }
        if self.tick_rate == 0 || self.tick_rate > 240 {
            return Err(ConfigError::Invalid(format!(
                "tick rate must be between 1 and 240, got {}",
                self.tick_rate
            )));
        }
        if self.ping_interval.is_zero() {
            return Err(ConfigError::Invalid("ping interval must be positive".into()));
        }
        if self.client_timeout <= self.ping_interval {
            return Err(ConfigError::Invalid(
                "client timeout must be longer than the ping interval".into(),
            ));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    /// Session settings; an unset seed is drawn at random.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_players: self.max_players,
            min_players: MIN_PLAYERS_TO_START,
            return_delay: self.return_delay,
            client_timeout: self.client_timeout,
            level_file: self.level_file.clone(),
            seed: self.seed.unwrap_or_else(rand::random),
        }
    }
}
