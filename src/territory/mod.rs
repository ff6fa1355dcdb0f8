//! Per-territory upkeep
//!
//! The surplus check gates every "nice to have" use of energy (renewal,
//! builder handovers, withdrawing from production structures). Road planning
//! lays construction markers once per production point and once per pair of
//! path endpoints.

use crate::context::TickContext;
use crate::core::error::{CommandError, Result};
use crate::core::types::{ObjectId, Position, TerritoryId};
use crate::roles::Role;
use crate::world::{Command, StructureKind};

/// Enough extraction and transport is alive and nothing threatens it
pub fn has_surplus_energy(ctx: &TickContext<'_>, territory: TerritoryId) -> bool {
    if !ctx.world.hostile_units(territory).is_empty() {
        return false;
    }
    let miners = ctx.agents_in(territory, Role::Miner);
    let carriers = ctx.agents_in(territory, Role::Carrier);
    let sources = ctx.world.sources(territory).len();
    if miners.len() < sources || carriers.len() < miners.len() {
        return false;
    }
    let min_ttl = ctx.rules.production.surplus_min_ttl;
    miners
        .iter()
        .chain(carriers.iter())
        .filter_map(|u| u.ticks_to_live)
        .min()
        .map_or(true, |ttl| ttl > min_ttl)
}

/// Order-independent key of a path between two endpoints
pub fn road_key(a: ObjectId, b: ObjectId) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}", low.0, high.0)
}

fn site_budget(ctx: &TickContext<'_>) -> usize {
    ctx.rules
        .lifecycle
        .max_construction_sites
        .saturating_sub(ctx.world.construction_sites().len())
}

/// Place a road site, skipping tiles that already hold one
fn place_road(ctx: &mut TickContext<'_>, pos: Position) -> Result<bool> {
    match ctx.world.execute(Command::CreateSite {
        pos,
        kind: StructureKind::Road,
    }) {
        Ok(()) => Ok(true),
        Err(CommandError::InvalidTarget) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Ring every own production point with road sites, once per point
///
/// Returns the number of sites placed.
pub fn lay_spawn_roads(ctx: &mut TickContext<'_>, territory: TerritoryId) -> Result<usize> {
    let spawns = ctx.world.my_structures_of(territory, StructureKind::Spawn);
    let mut placed = 0;
    for spawn in spawns {
        let done = ctx
            .memory
            .territory(territory)
            .is_some_and(|t| t.spawns_with_roads.contains(&spawn.id));
        if done {
            continue;
        }
        let ring: Vec<Position> = spawn.pos.neighbors().collect();
        if site_budget(ctx) < ring.len() + 1 {
            tracing::debug!(territory = %territory, "no site budget for spawn roads");
            break;
        }
        for pos in ring {
            if place_road(ctx, pos)? {
                placed += 1;
            }
        }
        ctx.memory
            .territory_mut(territory)
            .spawns_with_roads
            .insert(spawn.id);
        tracing::info!(territory = %territory, spawn = %spawn.id, "laid roads around spawn");
    }
    Ok(placed)
}

/// Lay road sites along the path between two objects, once per endpoint pair
///
/// Returns `Ok(false)` when the path was already planned or cannot be
/// planned yet (no path, not enough site budget).
pub fn plan_road(
    ctx: &mut TickContext<'_>,
    territory: TerritoryId,
    (from_id, from): (ObjectId, Position),
    (to_id, to): (ObjectId, Position),
) -> Result<bool> {
    let key = road_key(from_id, to_id);
    if ctx
        .memory
        .territory(territory)
        .is_some_and(|t| t.road_keys.contains(&key))
    {
        return Ok(false);
    }
    let Some(mut path) = ctx.world.find_path(&from, &to) else {
        return Ok(false);
    };
    // the destination tile itself is occupied by the endpoint
    path.pop();
    if site_budget(ctx) < path.len() + 1 {
        return Ok(false);
    }
    for pos in path {
        place_road(ctx, pos)?;
    }
    ctx.memory.territory_mut(territory).road_keys.insert(key);
    tracing::info!(territory = %territory, from = %from_id, to = %to_id, "planned road");
    Ok(true)
}

/// Road upkeep of an owned territory: spawn rings, then spawn-to-source paths
pub fn upkeep(ctx: &mut TickContext<'_>, territory: TerritoryId) -> Result<()> {
    let owned = ctx.world.territory(territory).is_some_and(|t| t.is_mine());
    if !owned {
        return Ok(());
    }
    lay_spawn_roads(ctx, territory)?;

    let spawns = ctx.world.my_structures_of(territory, StructureKind::Spawn);
    let sources = ctx.world.sources(territory);
    for spawn in &spawns {
        for source in &sources {
            plan_road(
                ctx,
                territory,
                (spawn.id, spawn.pos),
                (source.id, source.pos),
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyPart;
    use crate::core::config::Ruleset;
    use crate::memory::{AgentMemory, MemoryStore};
    use crate::world::{Owner, SimWorld, World};

    const HOME: TerritoryId = TerritoryId(1);

    fn pos(x: i32, y: i32) -> Position {
        Position::new(HOME, x, y)
    }

    fn add_agent(world: &mut SimWorld, memory: &mut MemoryStore, role: Role, at: Position) -> ObjectId {
        let id = world.add_unit(Owner::Mine, "a", at, &[BodyPart::Work, BodyPart::Carry, BodyPart::Move]);
        world.unit_mut(id).unwrap().ticks_to_live = Some(1_000);
        memory.agents.insert(id, AgentMemory::new(role, HOME));
        id
    }

    #[test]
    fn test_road_key_is_unordered() {
        assert_eq!(road_key(ObjectId(9), ObjectId(2)), road_key(ObjectId(2), ObjectId(9)));
        assert_eq!(road_key(ObjectId(2), ObjectId(9)), "2:9");
    }

    #[test]
    fn test_surplus_needs_full_crew() {
        let mut world = SimWorld::new();
        world.add_controller(HOME, Owner::Mine, 2);
        world.add_source(pos(10, 10));
        let mut memory = MemoryStore::new();
        let rules = Ruleset::default();

        add_agent(&mut world, &mut memory, Role::Miner, pos(11, 10));
        {
            let ctx = TickContext::new(&mut world, &mut memory, &rules);
            assert!(!has_surplus_energy(&ctx, HOME));
        }

        let carrier = add_agent(&mut world, &mut memory, Role::Carrier, pos(12, 10));
        {
            let ctx = TickContext::new(&mut world, &mut memory, &rules);
            assert!(has_surplus_energy(&ctx, HOME));
        }

        world.unit_mut(carrier).unwrap().ticks_to_live = Some(40);
        let ctx = TickContext::new(&mut world, &mut memory, &rules);
        assert!(!has_surplus_energy(&ctx, HOME));
    }

    #[test]
    fn test_hostiles_cancel_surplus() {
        let mut world = SimWorld::new();
        world.add_controller(HOME, Owner::Mine, 2);
        world.add_unit(Owner::Hostile, "raider", pos(40, 40), &[BodyPart::Attack]);
        let mut memory = MemoryStore::new();
        let rules = Ruleset::default();
        let ctx = TickContext::new(&mut world, &mut memory, &rules);
        assert!(!has_surplus_energy(&ctx, HOME));
    }

    #[test]
    fn test_spawn_roads_laid_once() {
        let mut world = SimWorld::new();
        world.add_controller(HOME, Owner::Mine, 2);
        world.add_structure(StructureKind::Spawn, Owner::Mine, pos(10, 10));
        let mut memory = MemoryStore::new();
        let rules = Ruleset::default();

        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        assert_eq!(lay_spawn_roads(&mut ctx, HOME).unwrap(), 8);
        assert_eq!(lay_spawn_roads(&mut ctx, HOME).unwrap(), 0);
        assert_eq!(world.construction_sites().len(), 8);
    }

    #[test]
    fn test_spawn_roads_wait_for_budget() {
        let mut world = SimWorld::new();
        world.add_controller(HOME, Owner::Mine, 2);
        world.add_structure(StructureKind::Spawn, Owner::Mine, pos(10, 10));
        let mut memory = MemoryStore::new();
        let mut rules = Ruleset::default();
        rules.lifecycle.max_construction_sites = 5;

        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        assert_eq!(lay_spawn_roads(&mut ctx, HOME).unwrap(), 0);
        assert!(memory.territory(HOME).is_none());
    }

    #[test]
    fn test_path_planned_once_per_pair() {
        let mut world = SimWorld::new();
        world.add_controller(HOME, Owner::Mine, 2);
        let spawn = world.add_structure(StructureKind::Spawn, Owner::Mine, pos(10, 10));
        let source = world.add_source(pos(15, 10));
        let mut memory = MemoryStore::new();
        let rules = Ruleset::default();

        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        let ends = ((spawn, pos(10, 10)), (source, pos(15, 10)));
        assert!(plan_road(&mut ctx, HOME, ends.0, ends.1).unwrap());
        assert!(!plan_road(&mut ctx, HOME, ends.1, ends.0).unwrap());
        // (11..=14, 10)
        assert_eq!(world.construction_sites().len(), 4);
    }
}
