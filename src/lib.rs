//! Hivemind - tick-driven decision core for an autonomous agent swarm

pub mod body;
pub mod campaign;
pub mod context;
pub mod core;
pub mod defense;
pub mod logistics;
pub mod memory;
pub mod production;
pub mod roles;
pub mod simulation;
pub mod tasks;
pub mod territory;
pub mod world;

pub use context::TickContext;
pub use memory::MemoryStore;
pub use roles::Role;
pub use simulation::{run_tick, Simulation, TickReport};
