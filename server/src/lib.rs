//! # Tank Arena Server Library
//!
//! This library provides the authoritative simulation and network server for
//! the tile-grid tank arena. It owns the canonical game state, applies
//! participant intent, runs the enemy AI and streams snapshots to every
//! connected client.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! All movement is tile-quantized. Each tick evicts finished entities, applies
//! participant intent, runs every enemy through its decision hierarchy and then
//! resolves projectiles against the spatial index. Time and randomness are
//! explicit (a tick counter, an engine clock and a seeded generator), so a
//! seeded engine replays identically.
//!
//! ### Session Management
//! Connected clients join a lobby, declare readiness and play through the
//! procedural levels together. The session is a pure state machine: it never
//! touches a socket and returns the messages the network layer should deliver.
//!
//! ### State Broadcasting
//! Every tick of a running match produces one snapshot that is broadcast to
//! all clients. Lost or late messages are corrected by the next snapshot.
//!
//! ## Module Organization
//!
//! ### Simulation (`entity`, `spatial`, `world`, `physics`, `ai`, `pathfinding`)
//! - Entities with an explicit lifecycle and a tank role payload
//! - A dense per-tile index kept in step with every coordinate change
//! - Deferred projectile resolution against the index
//! - Enemy attack, chase and patrol decisions over an A* planner
//!
//! ### Engines (`game`, `multiplayer`, `level`)
//! - Single-player and multi-participant tick loops
//! - Level text parsing, serialization and procedural generation
//!
//! ### Server (`session`, `client_manager`, `network`, `config`)
//! - Lobby and match state machine
//! - Client roster, slots, ready flags and latest input
//! - TCP transport with newline-delimited JSON
//! - Command line configuration
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let config = ServerConfig {
//!         host: "127.0.0.1".to_string(),
//!         port: 8888,
//!         ..ServerConfig::default()
//!     };
//!
//!     // Accepts connections, runs the game loop at the configured tick rate
//!     // and pings clients until the shutdown handle is triggered.
//!     let server = Server::bind(&config).await?;
//!     server.run().await
//! }
//! ```

pub mod ai;
pub mod client_manager;
pub mod config;
pub mod entity;
pub mod error;
pub mod game;
pub mod level;
pub mod multiplayer;
pub mod network;
pub mod pathfinding;
pub mod physics;
pub mod session;
pub mod spatial;
pub mod utils;
pub mod world;
