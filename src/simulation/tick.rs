//! Tick Orchestrator
//!
//! Runs every component once, in a fixed order:
//! garbage collection -> campaign -> marker bookkeeping -> territory upkeep
//! and task refresh -> production -> agent behavior -> towers.
//!
//! Tasks are refreshed before agents act so work published this tick is
//! taken this tick, and the campaign runs before production since
//! production reads the operation state. A failing component is logged and
//! counted; the rest of the tick still runs.

use serde::Serialize;

use crate::campaign::{self, StateChange};
use crate::context::TickContext;
use crate::core::config::Ruleset;
use crate::core::types::{AgentId, Tick};
use crate::defense::{self, TowerAction};
use crate::memory::MemoryStore;
use crate::production::{self, Produced, SpawnOutcome};
use crate::simulation::gc::{self, GcReport};
use crate::tasks;
use crate::territory;
use crate::world::{Owner, StructureKind, World};

/// Everything one tick decided, for diagnostics and tests
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub tick: Tick,
    pub gc: Option<GcReport>,
    pub campaign: Vec<StateChange>,
    pub produced: Vec<Produced>,
    pub renewed: Vec<AgentId>,
    pub agents_run: usize,
    pub tower_attacks: usize,
    pub tower_repairs: usize,
    /// Component failures contained during the tick
    pub faults: usize,
}

impl TickReport {
    fn fault(&mut self, component: &str, subject: impl std::fmt::Display, error: impl std::fmt::Display) {
        tracing::warn!(component, subject = %subject, error = %error, "contained fault");
        self.faults += 1;
    }
}

/// Run one full decision pass over the world
pub fn run_tick(world: &mut dyn World, memory: &mut MemoryStore, rules: &Ruleset) -> TickReport {
    let tick = world.tick();
    let mut report = TickReport {
        tick,
        ..Default::default()
    };

    if gc::is_due(tick, memory.last_gc, rules.lifecycle.gc_interval) {
        report.gc = Some(gc::collect(&*world, memory));
    }

    let mut ctx = TickContext::new(world, memory, rules);

    match campaign::run(&mut ctx) {
        Ok(changes) => report.campaign = changes,
        Err(e) => report.fault("campaign", tick, e),
    }
    if let Err(e) = campaign::bookkeep_markers(&mut ctx) {
        report.fault("markers", tick, e);
    }

    for territory in ctx.world.visible_territories() {
        if let Err(e) = territory::upkeep(&mut ctx, territory) {
            report.fault("territory", territory, e);
        }
        tasks::refresh(&mut ctx, territory);
    }

    let spawns: Vec<_> = ctx
        .world
        .visible_territories()
        .into_iter()
        .flat_map(|t| ctx.world.my_structures_of(t, StructureKind::Spawn))
        .collect();
    for spawn in &spawns {
        match production::run(&mut ctx, spawn) {
            Ok(SpawnOutcome::Produced(produced)) => report.produced.push(produced),
            Ok(SpawnOutcome::Renewed(agent)) => report.renewed.push(agent),
            Ok(SpawnOutcome::Idle) => {}
            Err(e) => report.fault("production", spawn.id, e),
        }
    }

    for agent in ctx.world.my_units() {
        if agent.spawning {
            continue;
        }
        // the unit may have died earlier this tick
        let Some(agent) = ctx.world.my_unit(agent.id) else {
            continue;
        };
        let Some(role) = ctx.memory.role_of(agent.id) else {
            tracing::debug!(agent = %agent.id, name = %agent.name, "unit without memory skipped");
            continue;
        };
        report.agents_run += 1;
        if let Err(e) = role.act(&mut ctx, &agent) {
            report.fault("agent", agent.id, e);
        }
    }

    let towers: Vec<_> = ctx
        .world
        .visible_territories()
        .into_iter()
        .flat_map(|t| ctx.world.structures(t))
        .filter(|s| s.kind == StructureKind::Tower && s.owner == Owner::Mine)
        .collect();
    for tower in &towers {
        match defense::run(&mut ctx, tower) {
            Ok(TowerAction::Attacked(_)) => report.tower_attacks += 1,
            Ok(TowerAction::Repaired(_)) => report.tower_repairs += 1,
            Ok(TowerAction::Idle) => {}
            Err(e) => report.fault("tower", tower.id, e),
        }
    }

    tracing::debug!(
        tick,
        produced = report.produced.len(),
        agents = report.agents_run,
        faults = report.faults,
        "tick complete"
    );
    report
}
