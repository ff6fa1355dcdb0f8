//! Tick orchestration and housekeeping

pub mod gc;
pub mod tick;

pub use gc::GcReport;
pub use tick::{run_tick, TickReport};

use crate::core::config::Ruleset;
use crate::memory::MemoryStore;
use crate::world::SimWorld;

/// A simulated world driven by the decision core, one tick at a time
pub struct Simulation {
    pub world: SimWorld,
    pub memory: MemoryStore,
    pub rules: Ruleset,
}

impl Simulation {
    pub fn new(world: SimWorld, rules: Ruleset) -> Self {
        Self {
            world,
            memory: MemoryStore::new(),
            rules,
        }
    }

    /// Decide, then let the world advance
    pub fn step(&mut self) -> TickReport {
        let report = run_tick(&mut self.world, &mut self.memory, &self.rules);
        self.world.advance();
        report
    }

    pub fn run(&mut self, ticks: u64) -> Vec<TickReport> {
        (0..ticks).map(|_| self.step()).collect()
    }
}
