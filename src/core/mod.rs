pub mod config;
pub mod error;
pub mod types;

pub use config::Ruleset;
pub use error::{Result, SwarmError};
pub use types::{AgentId, ObjectId, Position, TerritoryId, Tick};
