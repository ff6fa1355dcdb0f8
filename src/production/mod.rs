//! Production Controller
//!
//! Once per tick each idle production point decides what to produce.
//! Scouting requests come first, then a first-match rule list. When nothing
//! is produced, an aging agent next to the point may get its lifespan
//! extended instead.

use serde::Serialize;

use crate::body::{self, Body};
use crate::context::TickContext;
use crate::core::error::{CommandError, Result};
use crate::core::types::{AgentId, ObjectId, Position, TerritoryId};
use crate::logistics;
use crate::memory::AgentMemory;
use crate::roles::Role;
use crate::territory;
use crate::world::{MarkerKind, StructureView, TerritoryView, UnitView};

/// What a production point decided to make
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Order {
    Scout { marker: String },
    Fighter(Role),
    Carrier { miner: AgentId },
    Miner { source: ObjectId },
    Claimer { target: TerritoryId },
    Builder,
}

impl Order {
    pub fn role(&self) -> Role {
        match self {
            Order::Scout { .. } => Role::Scout,
            Order::Fighter(role) => *role,
            Order::Carrier { .. } => Role::Carrier,
            Order::Miner { .. } => Role::Miner,
            Order::Claimer { .. } => Role::Claimer,
            Order::Builder => Role::Builder,
        }
    }
}

/// A production command that was accepted by the world
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Produced {
    pub spawn: ObjectId,
    pub agent: AgentId,
    pub order: Order,
}

/// Outcome of one production point's turn
#[derive(Debug, Clone, PartialEq)]
pub enum SpawnOutcome {
    Produced(Produced),
    Renewed(AgentId),
    Idle,
}

/// Full capacity, or a bootstrap amount while extraction or transport is missing
pub fn is_ready(energy: u32, capacity: u32, miners: usize, carriers: usize, bootstrap: u32) -> bool {
    energy >= capacity || ((miners == 0 || carriers == 0) && energy >= bootstrap)
}

/// Melee units first, then one medic per `melee_per_medic` melee units
pub fn next_fighter(melee: usize, medics: usize, ctx: &TickContext<'_>) -> Role {
    let rules = &ctx.rules.production;
    let before_medic = rules.melee_before_first_medic;
    if melee < before_medic || melee < medics * rules.melee_per_medic + before_medic {
        Role::Melee
    } else {
        Role::Medic
    }
}

/// A fresh body for the agent's role would be much larger than its current one
pub fn is_obsolete(ctx: &TickContext<'_>, agent: &UnitView, capacity: u32) -> bool {
    let Some(role) = ctx.memory.role_of(agent.id) else {
        return false;
    };
    let costs = &ctx.rules.body.costs;
    let current = agent.body_parts().cost(costs);
    match body::plan_body(role, capacity, &ctx.rules.body) {
        Some(fresh) => fresh.cost(costs) as f32 >= current as f32 * ctx.rules.production.obsolete_cost_ratio,
        None => false,
    }
}

/// A marker that needs scouting and has nobody on the way
fn scouting_request(ctx: &TickContext<'_>) -> Option<String> {
    ctx.world
        .markers()
        .into_iter()
        .filter(|m| !ctx.world.is_visible(m.pos.territory))
        .find(|m| {
            ctx.memory.marker(&m.name).is_some_and(|mem| {
                mem.scouting_needed
                    && !mem.reserved
                    && !mem.scout.is_some_and(|s| ctx.is_alive(s))
            })
        })
        .map(|m| m.name)
}

/// Resource node in the territory without a live miner, closest to `origin`
fn free_source(ctx: &TickContext<'_>, territory: TerritoryId, origin: &Position) -> Option<ObjectId> {
    let bound: Vec<ObjectId> = ctx
        .world
        .my_units()
        .iter()
        .filter_map(|u| ctx.memory.agent(u.id))
        .filter(|m| m.role == Role::Miner)
        .filter_map(|m| m.source)
        .collect();
    ctx.world
        .sources(territory)
        .into_iter()
        .filter(|s| !bound.contains(&s.id))
        .min_by_key(|s| (origin.range_or(&s.pos, 50), s.id))
        .map(|s| s.id)
}

/// Claim marker funded by this territory that nobody is working on yet
fn claim_target(ctx: &TickContext<'_>, territory: TerritoryId) -> Option<TerritoryId> {
    let claimed: Vec<TerritoryId> = ctx
        .world
        .my_units()
        .iter()
        .filter_map(|u| ctx.memory.agent(u.id))
        .filter(|m| m.role == Role::Claimer)
        .filter_map(|m| m.claim_target)
        .collect();
    ctx.world
        .markers()
        .into_iter()
        .filter(|m| m.kind == MarkerKind::Claim)
        .filter(|m| ctx.memory.marker(&m.name).and_then(|mem| mem.owner) == Some(territory))
        .map(|m| m.pos.territory)
        .filter(|t| !claimed.contains(t))
        .find(|t| !ctx.world.territory(*t).is_some_and(|view| view.is_mine()))
}

/// First matching production rule for a ready production point
pub fn decide(ctx: &mut TickContext<'_>, spawn: &StructureView) -> Option<Order> {
    let territory = spawn.pos.territory;
    let miners = ctx.agents_in(territory, Role::Miner);
    let carriers = ctx.agents_in(territory, Role::Carrier);

    if !miners.is_empty() && !carriers.is_empty() {
        let threatened = !ctx.world.hostile_units(territory).is_empty();
        let occupying = ctx
            .memory
            .territory(territory)
            .is_some_and(|t| t.occupation_in_progress);
        if threatened || occupying {
            let melee = ctx.agents_of(territory, Role::Melee).len();
            let medics = ctx.agents_of(territory, Role::Medic).len();
            return Some(Order::Fighter(next_fighter(melee, medics, ctx)));
        }
    }

    if carriers.len() < miners.len() {
        // no order this tick until a miner is actually unpaired
        let miner = logistics::closest_solo_miner(ctx, &spawn.pos)?;
        return Some(Order::Carrier { miner: miner.id });
    }

    if let Some(source) = free_source(ctx, territory, &spawn.pos) {
        return Some(Order::Miner { source });
    }

    if let Some(target) = claim_target(ctx, territory) {
        return Some(Order::Claimer { target });
    }

    if ctx.agents_of(territory, Role::Builder).len() < ctx.rules.production.worker_target {
        return Some(Order::Builder);
    }

    let melee = ctx.agents_of(territory, Role::Melee).len();
    let medics = ctx.agents_of(territory, Role::Medic).len();
    if melee + medics < ctx.rules.production.combat_reserve {
        return Some(Order::Fighter(next_fighter(melee, medics, ctx)));
    }
    None
}

fn initial_memory(order: &Order, home: TerritoryId) -> AgentMemory {
    let mut memory = AgentMemory::new(order.role(), home);
    match order {
        Order::Miner { source } => memory.source = Some(*source),
        Order::Carrier { miner } => memory.paired_miner = Some(*miner),
        Order::Claimer { target } => memory.claim_target = Some(*target),
        _ => {}
    }
    memory
}

/// Issue the production command and write the new agent's record
fn produce(
    ctx: &mut TickContext<'_>,
    spawn: &StructureView,
    order: Order,
    body: &Body,
) -> Result<Option<Produced>> {
    let home = spawn.pos.territory;
    let role = order.role();
    let name = format!("{}-{}-{}", role, ctx.tick(), spawn.id.0);
    let agent = match ctx.world.spawn_agent(spawn.id, body, &name) {
        Ok(agent) => agent,
        Err(CommandError::NotEnoughResources | CommandError::Busy) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    ctx.memory.agents.insert(agent, initial_memory(&order, home));
    match &order {
        Order::Carrier { miner } => logistics::pair(ctx, agent, *miner),
        Order::Scout { marker } => {
            let record = ctx.memory.marker_mut(marker);
            record.reserved = true;
            record.scout = None;
        }
        _ => {}
    }

    tracing::info!(
        spawn = %spawn.id,
        agent = %agent,
        role = %role,
        parts = body.len(),
        "production ordered"
    );
    Ok(Some(Produced {
        spawn: spawn.id,
        agent,
        order,
    }))
}

/// Extend the life of the adjacent agent closest to expiring
fn renew(ctx: &mut TickContext<'_>, spawn: &StructureView, view: &TerritoryView) -> Result<Option<AgentId>> {
    let rules = &ctx.rules.production;
    if (view.energy_available as f32) <= view.energy_capacity as f32 * rules.renew_energy_fraction {
        return Ok(None);
    }
    if !territory::has_surplus_energy(ctx, view.id) {
        return Ok(None);
    }
    let limit = (ctx.rules.lifecycle.agent_lifetime as f32 * rules.renew_ttl_fraction) as u32;
    let candidate = ctx
        .world
        .my_units_in(view.id)
        .into_iter()
        .filter(|u| !u.spawning && u.pos.is_near_to(&spawn.pos))
        .filter(|u| u.ticks_to_live.is_some_and(|ttl| ttl < limit))
        .filter(|u| ctx.memory.agent(u.id).is_some())
        .filter(|u| !is_obsolete(ctx, u, view.energy_capacity))
        .min_by_key(|u| (u.ticks_to_live, u.id));
    let Some(agent) = candidate else {
        return Ok(None);
    };

    match ctx.world.execute(crate::world::Command::Renew {
        spawn: spawn.id,
        agent: agent.id,
    }) {
        Ok(()) => {
            tracing::debug!(spawn = %spawn.id, agent = %agent.id, "renewed agent");
            Ok(Some(agent.id))
        }
        Err(CommandError::NotEnoughResources | CommandError::Busy | CommandError::Full) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// One production point's turn
pub fn run(ctx: &mut TickContext<'_>, spawn: &StructureView) -> Result<SpawnOutcome> {
    if spawn.busy {
        return Ok(SpawnOutcome::Idle);
    }
    let territory = spawn.pos.territory;
    let Some(view) = ctx.world.territory(territory) else {
        return Ok(SpawnOutcome::Idle);
    };
    let energy = view.energy_available;

    let scout_cost = body::minimum_cost(Role::Scout, &ctx.rules.body);
    if energy >= scout_cost {
        if let Some(marker) = scouting_request(ctx) {
            if let Some(body) = body::plan_body(Role::Scout, scout_cost, &ctx.rules.body) {
                if let Some(produced) = produce(ctx, spawn, Order::Scout { marker }, &body)? {
                    return Ok(SpawnOutcome::Produced(produced));
                }
            }
        }
    }

    let miners = ctx.agents_in(territory, Role::Miner).len();
    let carriers = ctx.agents_in(territory, Role::Carrier).len();
    let bootstrap = ctx.rules.production.bootstrap_energy;
    if is_ready(energy, view.energy_capacity, miners, carriers, bootstrap) {
        if let Some(order) = decide(ctx, spawn) {
            match body::plan_body(order.role(), energy, &ctx.rules.body) {
                Some(body) => {
                    if let Some(produced) = produce(ctx, spawn, order, &body)? {
                        return Ok(SpawnOutcome::Produced(produced));
                    }
                }
                None => {
                    tracing::debug!(spawn = %spawn.id, role = %order.role(), energy, "cannot afford body yet");
                }
            }
        }
    }

    Ok(renew(ctx, spawn, &view)?.map_or(SpawnOutcome::Idle, SpawnOutcome::Renewed))
}
