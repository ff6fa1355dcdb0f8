use thiserror::Error;

use crate::core::types::AgentId;

/// Result codes of a side-effecting world command
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    #[error("target not in range")]
    NotInRange,

    #[error("not enough resources")]
    NotEnoughResources,

    #[error("invalid target")]
    InvalidTarget,

    #[error("actor is busy")]
    Busy,

    #[error("target is full")]
    Full,

    #[error("actor lacks the required body part")]
    NoBodypart,

    #[error("actor is not owned by us")]
    NotOwner,
}

/// Errors raised while loading a ruleset
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("No memory record for agent {0}")]
    MissingMemory(AgentId),

    #[error("Command failed: {0}")]
    Command(#[from] CommandError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SwarmError>;
