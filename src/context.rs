//! Explicit per-tick context handed to every component

use crate::core::config::Ruleset;
use crate::core::error::{CommandError, Result};
use crate::core::types::{AgentId, Position, TerritoryId, Tick};
use crate::memory::MemoryStore;
use crate::roles::Role;
use crate::world::{Command, UnitView, World};

/// World gateway, persistent store and ruleset for one tick
pub struct TickContext<'a> {
    pub world: &'a mut dyn World,
    pub memory: &'a mut MemoryStore,
    pub rules: &'a Ruleset,
}

/// Outcome of a command that may need the actor to close in first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approach {
    Done,
    Moving,
}

impl<'a> TickContext<'a> {
    pub fn new(world: &'a mut dyn World, memory: &'a mut MemoryStore, rules: &'a Ruleset) -> Self {
        Self {
            world,
            memory,
            rules,
        }
    }

    pub fn tick(&self) -> Tick {
        self.world.tick()
    }

    /// Move one step toward `to`; a tired agent simply waits
    pub fn move_to(&mut self, agent: AgentId, to: Position) -> Result<()> {
        match self.world.execute(Command::Move { agent, to }) {
            Ok(()) | Err(CommandError::Busy) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Issue `command`, falling back to movement toward `target` when out of range
    pub fn act_or_approach(
        &mut self,
        agent: AgentId,
        command: Command,
        target: Position,
    ) -> Result<Approach> {
        match self.world.execute(command) {
            Ok(()) => Ok(Approach::Done),
            Err(CommandError::NotInRange) => {
                self.move_to(agent, target)?;
                Ok(Approach::Moving)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Agents of `role` whose home is `home`, including ones still spawning
    pub fn agents_of(&self, home: TerritoryId, role: Role) -> Vec<UnitView> {
        self.world
            .my_units()
            .into_iter()
            .filter(|u| {
                self.memory
                    .agent(u.id)
                    .is_some_and(|m| m.role == role && m.home == home)
            })
            .collect()
    }

    /// Live agents of `role` currently inside `territory`
    pub fn agents_in(&self, territory: TerritoryId, role: Role) -> Vec<UnitView> {
        self.world
            .my_units_in(territory)
            .into_iter()
            .filter(|u| self.memory.role_of(u.id) == Some(role))
            .collect()
    }

    pub fn is_alive(&self, agent: AgentId) -> bool {
        self.world.my_unit(agent).is_some()
    }
}
