use std::path::PathBuf;
use thiserror::Error;

/// Reasons a level could not be built. A failed load leaves the previous
/// engine state untouched.
#[derive(Debug, Error)]
pub enum LevelError {
    #[error("level 0 is a placeholder and cannot be loaded")]
    Placeholder,
    #[error("no participants to place")]
    NoParticipants,
    #[error("failed to read level file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("level file {0} is not valid UTF-8")]
    Encoding(PathBuf),
    #[error("spawn tile ({x}, {y}) is blocked")]
    SpawnBlocked { x: i32, y: i32 },
    #[error("could not place {0}")]
    Placement(&'static str),
    #[error("level {0} is the last level")]
    NoNextLevel(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
