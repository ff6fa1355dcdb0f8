//! Extraction agent
//!
//! A miner sits on (or next to) its resource node. A paired miner drops or
//! hands its energy to the carrier; a solo miner delivers it itself.

use crate::context::TickContext;
use crate::core::error::{CommandError, Result};
use crate::core::types::{AgentId, ObjectId, Position};
use crate::logistics;
use crate::memory::WorkMode;
use crate::roles::Role;
use crate::world::{Command, ObjectView, SourceView, StructureKind, StructureView, UnitView};

fn source_of(ctx: &TickContext<'_>, miner: AgentId) -> Option<SourceView> {
    let id = ctx.memory.agent(miner)?.source?;
    match ctx.world.object(id) {
        Some(ObjectView::Source(source)) => Some(source),
        _ => None,
    }
}

/// Container next to the node, registered as a miner drop-off on discovery
fn container_at(ctx: &mut TickContext<'_>, miner: AgentId, source: &SourceView) -> Option<StructureView> {
    let container = ctx
        .world
        .structures(source.pos.territory)
        .into_iter()
        .filter(|s| s.kind == StructureKind::Container && s.is_friendly_or_neutral())
        .filter(|s| s.pos.is_near_to(&source.pos))
        .min_by_key(|s| s.id)?;

    let registered = ctx
        .memory
        .territory_mut(source.pos.territory)
        .drop_off_containers
        .insert(container.id);
    if registered {
        tracing::info!(container = %container.id, source = %source.id, "registered miner container");
    }
    if let Some(record) = ctx.memory.agent_mut(miner) {
        record.container = Some(container.id);
    }
    Some(container)
}

fn has_container_site(ctx: &TickContext<'_>, source: &Position) -> bool {
    ctx.world
        .construction_sites()
        .iter()
        .any(|s| s.kind == StructureKind::Container && s.pos.is_near_to(source))
}

fn set_mode(ctx: &mut TickContext<'_>, miner: AgentId, mode: WorkMode) {
    if let Some(record) = ctx.memory.agent_mut(miner) {
        if record.mode != mode {
            record.mode = mode;
            if mode == WorkMode::Collecting {
                record.drop_off = None;
            }
        }
    }
}

/// Get rid of a full load for the carrier: into the container when standing on it
fn unload_for_carrier(ctx: &mut TickContext<'_>, miner: &UnitView, container: Option<ObjectId>) -> Result<()> {
    if let Some(container) = container {
        match ctx.world.execute(Command::Transfer {
            agent: miner.id,
            to: container,
        }) {
            Ok(()) => return Ok(()),
            Err(CommandError::NotInRange | CommandError::Full | CommandError::InvalidTarget) => {}
            Err(e) => return Err(e.into()),
        }
    }
    match ctx.world.execute(Command::Drop { agent: miner.id }) {
        Ok(()) | Err(CommandError::NotEnoughResources) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn harvest(ctx: &mut TickContext<'_>, miner: &UnitView, source: &SourceView, solo: bool) -> Result<()> {
    let container = container_at(ctx, miner.id, source);

    match &container {
        Some(c) if miner.pos != c.pos => return ctx.move_to(miner.id, c.pos),
        None if !miner.pos.is_near_to(&source.pos) => return ctx.move_to(miner.id, source.pos),
        _ => {}
    }

    if let Some(c) = &container {
        if solo && c.has_energy() && !miner.is_full() {
            return match ctx.world.execute(Command::Withdraw {
                agent: miner.id,
                from: c.id,
            }) {
                Ok(()) | Err(CommandError::Full) => Ok(()),
                Err(e) => Err(e.into()),
            };
        }
    } else if !has_container_site(ctx, &source.pos) {
        match ctx.world.execute(Command::CreateSite {
            pos: miner.pos,
            kind: StructureKind::Container,
        }) {
            Ok(()) => tracing::debug!(miner = %miner.id, source = %source.id, "placed container site"),
            Err(CommandError::Full | CommandError::InvalidTarget) => {}
            Err(e) => return Err(e.into()),
        }
    }

    match ctx.world.execute(Command::Harvest {
        agent: miner.id,
        source: source.id,
    }) {
        Ok(()) | Err(CommandError::NotEnoughResources) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub fn act(ctx: &mut TickContext<'_>, agent: &UnitView) -> Result<()> {
    let Some(source) = source_of(ctx, agent.id) else {
        tracing::debug!(miner = %agent.id, "miner has no visible source");
        let home = ctx.memory.require_agent(agent.id)?.home;
        if agent.pos.territory != home {
            ctx.move_to(agent.id, Position::center(home))?;
        }
        return Ok(());
    };
    let solo = logistics::is_solo(ctx, agent.id);

    if agent.energy >= ctx.rules.logistics.handover_threshold {
        let mut receivers = vec![Role::Carrier];
        if logistics::can_share_energy(ctx, agent.pos.territory) {
            receivers.push(Role::Builder);
        }
        logistics::hand_over_to_adjacent(ctx, agent.id, &receivers);
    }
    let Some(agent) = ctx.world.my_unit(agent.id) else {
        return Ok(());
    };

    if agent.is_full() {
        if solo {
            set_mode(ctx, agent.id, WorkMode::Delivering);
        } else {
            let container = ctx.memory.agent(agent.id).and_then(|m| m.container);
            return unload_for_carrier(ctx, &agent, container);
        }
    } else if agent.energy == 0 {
        set_mode(ctx, agent.id, WorkMode::Collecting);
    }

    // a miner that just got a carrier stops delivering
    let delivering = ctx.memory.require_agent(agent.id)?.mode == WorkMode::Delivering;
    if delivering && solo {
        logistics::deliver_energy(ctx, &agent)
    } else {
        set_mode(ctx, agent.id, WorkMode::Collecting);
        harvest(ctx, &agent, &source, solo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyPart;
    use crate::core::config::Ruleset;
    use crate::core::types::TerritoryId;
    use crate::memory::{AgentMemory, MemoryStore};
    use crate::world::{Owner, SimWorld, World};

    const HOME: TerritoryId = TerritoryId(1);

    fn pos(x: i32, y: i32) -> Position {
        Position::new(HOME, x, y)
    }

    struct Setup {
        world: SimWorld,
        memory: MemoryStore,
        rules: Ruleset,
        miner: AgentId,
        source: ObjectId,
    }

    fn setup(at: Position) -> Setup {
        let mut world = SimWorld::new();
        world.add_controller(HOME, Owner::Mine, 2);
        let source = world.add_source(pos(10, 10));
        let miner = world.add_unit(
            Owner::Mine,
            "miner",
            at,
            &[BodyPart::Work, BodyPart::Work, BodyPart::Carry, BodyPart::Move],
        );
        let mut memory = MemoryStore::new();
        let mut record = AgentMemory::new(Role::Miner, HOME);
        record.source = Some(source);
        memory.agents.insert(miner, record);
        Setup {
            world,
            memory,
            rules: Ruleset::default(),
            miner,
            source,
        }
    }

    fn step(s: &mut Setup) {
        let view = s.world.my_unit(s.miner).unwrap();
        let mut ctx = TickContext::new(&mut s.world, &mut s.memory, &s.rules);
        act(&mut ctx, &view).unwrap();
        s.world.advance();
    }

    #[test]
    fn test_walks_to_source_then_harvests() {
        let mut s = setup(pos(14, 10));
        for _ in 0..3 {
            step(&mut s);
        }
        assert_eq!(s.world.unit(s.miner).unwrap().pos, pos(11, 10));
        step(&mut s);
        assert_eq!(s.world.unit(s.miner).unwrap().energy, 4);
    }

    #[test]
    fn test_places_container_site_once() {
        let mut s = setup(pos(11, 10));
        step(&mut s);
        step(&mut s);
        let sites = s.world.construction_sites();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].kind, StructureKind::Container);
        assert_eq!(sites[0].pos, pos(11, 10));
    }

    #[test]
    fn test_registers_container_and_stands_on_it() {
        let mut s = setup(pos(12, 12));
        let container = s.world.add_structure(StructureKind::Container, Owner::Neutral, pos(9, 9));
        step(&mut s);
        assert!(s.memory.territory(HOME).unwrap().drop_off_containers.contains(&container));
        assert_eq!(s.memory.agent(s.miner).unwrap().container, Some(container));
        step(&mut s);
        step(&mut s);
        assert_eq!(s.world.unit(s.miner).unwrap().pos, pos(9, 9));
    }

    #[test]
    fn test_solo_miner_delivers_when_full() {
        let mut s = setup(pos(11, 10));
        let spawn = s.world.add_structure(StructureKind::Spawn, Owner::Mine, pos(12, 11));
        s.world.unit_mut(s.miner).unwrap().energy = 50;
        step(&mut s);
        assert_eq!(s.memory.agent(s.miner).unwrap().mode, WorkMode::Delivering);
        assert_eq!(s.world.structure(spawn).unwrap().energy, 50 + 1);
        assert_eq!(s.world.unit(s.miner).unwrap().energy, 0);
    }

    #[test]
    fn test_paired_miner_drops_for_carrier() {
        let mut s = setup(pos(11, 10));
        let carrier = s.world.add_unit(Owner::Mine, "carrier", pos(20, 20), &[BodyPart::Carry, BodyPart::Move]);
        let mut record = AgentMemory::new(Role::Carrier, HOME);
        record.paired_miner = Some(s.miner);
        s.memory.agents.insert(carrier, record);
        s.memory.agent_mut(s.miner).unwrap().paired_carrier = Some(carrier);
        s.world.unit_mut(s.miner).unwrap().energy = 50;

        step(&mut s);
        assert_eq!(s.world.unit(s.miner).unwrap().energy, 0);
        assert_eq!(s.world.piles(HOME)[0].amount, 50);
        assert_eq!(s.memory.agent(s.miner).unwrap().mode, WorkMode::Collecting);
    }

    #[test]
    fn test_hands_energy_to_adjacent_carrier() {
        let mut s = setup(pos(11, 10));
        let carrier = s.world.add_unit(Owner::Mine, "carrier", pos(12, 10), &[BodyPart::Carry, BodyPart::Carry, BodyPart::Move]);
        let mut record = AgentMemory::new(Role::Carrier, HOME);
        record.paired_miner = Some(s.miner);
        s.memory.agents.insert(carrier, record);
        s.memory.agent_mut(s.miner).unwrap().paired_carrier = Some(carrier);
        s.world.unit_mut(s.miner).unwrap().energy = 50;

        step(&mut s);
        assert_eq!(s.world.unit(carrier).unwrap().energy, 50);
        // harvested after handing over
        assert_eq!(s.world.unit(s.miner).unwrap().energy, 4);
        assert_eq!(s.world.objects().sources[&s.source].energy, 3_000 - 4);
    }
}
