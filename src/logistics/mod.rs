//! Logistics Coordinator
//!
//! Miners sit at a resource node and carriers move the energy away. A miner
//! and a carrier may be paired one-to-one. The link is stored on both agent
//! records, which are updated separately, so either side may find a
//! one-sided or dangling link and repairs it on its next decision: a
//! miner whose own link is gone re-adopts a live carrier still pointing at
//! it, and a carrier drops a link the miner no longer confirms.

use crate::context::{Approach, TickContext};
use crate::core::error::{CommandError, Result};
use crate::core::types::{AgentId, ObjectId, Position};
use crate::roles::Role;
use crate::territory;
use crate::world::{Command, Owner, PileView, StructureKind, StructureView, UnitView};

/// Range assumed for objects outside the agent's territory
const FAR: u32 = 50;

/// How a carrier is tied to a miner this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinerLink {
    /// Dedicated pairing recorded on both sides
    Paired(AgentId),
    /// Temporary help for a miner that has no dedicated carrier
    Attached(AgentId),
    Unlinked,
}

/// Where a collecting carrier gets its energy from
#[derive(Debug, Clone, PartialEq)]
pub enum Pickup {
    Pile(PileView),
    Store(StructureView),
    Miner(UnitView),
}

impl Pickup {
    pub fn id(&self) -> ObjectId {
        match self {
            Pickup::Pile(p) => p.id,
            Pickup::Store(s) => s.id,
            Pickup::Miner(m) => m.id,
        }
    }

    pub fn pos(&self) -> Position {
        match self {
            Pickup::Pile(p) => p.pos,
            Pickup::Store(s) => s.pos,
            Pickup::Miner(m) => m.pos,
        }
    }
}

fn is_live_role(ctx: &TickContext<'_>, id: AgentId, role: Role) -> bool {
    ctx.is_alive(id) && ctx.memory.role_of(id) == Some(role)
}

/// The dedicated carrier of a miner, repairing the miner's side of the link
///
/// `None` means the miner is solo.
pub fn miner_carrier(ctx: &mut TickContext<'_>, miner: AgentId) -> Option<AgentId> {
    let stored = ctx.memory.agent(miner)?.paired_carrier;
    if let Some(carrier) = stored {
        let confirmed = is_live_role(ctx, carrier, Role::Carrier)
            && ctx.memory.agent(carrier).and_then(|c| c.paired_miner) == Some(miner);
        if confirmed {
            return Some(carrier);
        }
    }

    let adopted = ctx
        .memory
        .agents
        .iter()
        .filter(|(_, m)| m.role == Role::Carrier && m.paired_miner == Some(miner))
        .map(|(id, _)| *id)
        .find(|id| ctx.is_alive(*id));

    if adopted != stored {
        match adopted {
            Some(carrier) => tracing::info!(miner = %miner, carrier = %carrier, "re-linked carrier"),
            None => tracing::debug!(miner = %miner, "carrier link lost, miner is solo"),
        }
    }
    if let Some(record) = ctx.memory.agent_mut(miner) {
        record.paired_carrier = adopted;
    }
    adopted
}

pub fn is_solo(ctx: &mut TickContext<'_>, miner: AgentId) -> bool {
    miner_carrier(ctx, miner).is_none()
}

/// Solo miner closest to `origin`, ties broken by id
pub fn closest_solo_miner(ctx: &mut TickContext<'_>, origin: &Position) -> Option<UnitView> {
    let miners: Vec<UnitView> = ctx
        .world
        .my_units()
        .into_iter()
        .filter(|u| ctx.memory.role_of(u.id) == Some(Role::Miner))
        .collect();
    let mut solo = Vec::new();
    for miner in miners {
        if is_solo(ctx, miner.id) {
            solo.push(miner);
        }
    }
    solo.into_iter()
        .min_by_key(|m| (origin.range_or(&m.pos, FAR), m.id))
}

/// Write a dedicated pairing on both records
pub fn pair(ctx: &mut TickContext<'_>, carrier: AgentId, miner: AgentId) {
    if let Some(record) = ctx.memory.agent_mut(carrier) {
        record.paired_miner = Some(miner);
        record.attached_miner = None;
    }
    if let Some(record) = ctx.memory.agent_mut(miner) {
        record.paired_carrier = Some(carrier);
    }
    tracing::info!(carrier = %carrier, miner = %miner, "paired carrier with miner");
}

/// Resolve (and if needed establish) the miner a carrier works for
pub fn link_carrier(ctx: &mut TickContext<'_>, carrier: &UnitView) -> MinerLink {
    let Some(record) = ctx.memory.agent(carrier.id) else {
        return MinerLink::Unlinked;
    };
    let stored = record.paired_miner;
    let attached = record.attached_miner;

    if let Some(miner) = stored {
        if is_live_role(ctx, miner, Role::Miner) {
            // the miner's side decides; it re-adopts us when its own link is gone
            if miner_carrier(ctx, miner) == Some(carrier.id) {
                return MinerLink::Paired(miner);
            }
        }
        if let Some(record) = ctx.memory.agent_mut(carrier.id) {
            record.paired_miner = None;
        }
        tracing::debug!(carrier = %carrier.id, miner = %miner, "dropped stale miner link");
    }

    if let Some(miner) = closest_solo_miner(ctx, &carrier.pos) {
        pair(ctx, carrier.id, miner.id);
        return MinerLink::Paired(miner.id);
    }

    if let Some(miner) = attached.filter(|m| is_live_role(ctx, *m, Role::Miner)) {
        return MinerLink::Attached(miner);
    }

    // no solo miner left: help the one farthest away without claiming it
    let farthest = ctx
        .agents_in(carrier.pos.territory, Role::Miner)
        .into_iter()
        .max_by_key(|m| (carrier.pos.range_or(&m.pos, FAR), std::cmp::Reverse(m.id)));
    let attached = farthest.map(|m| m.id);
    if let Some(record) = ctx.memory.agent_mut(carrier.id) {
        record.attached_miner = attached;
    }
    attached.map_or(MinerLink::Unlinked, MinerLink::Attached)
}

/// Drop-off candidates are split into tiers; earlier tiers always win
fn drop_off_tier(structure: &StructureView) -> u8 {
    match structure.kind {
        StructureKind::Tower => 0,
        kind if kind.is_production() => 1,
        _ => 2,
    }
}

fn accepts_energy(structure: &StructureView, excluded: &[ObjectId]) -> bool {
    structure.is_friendly_or_neutral()
        && structure.energy_capacity > 0
        && structure.can_receive_energy()
        && !excluded.contains(&structure.id)
        && (structure.kind != StructureKind::Tower || structure.owner == Owner::Mine)
}

/// Structures an agent must not deliver into
fn excluded_drop_offs(ctx: &TickContext<'_>, agent: &UnitView) -> Vec<ObjectId> {
    let Some(record) = ctx.memory.agent(agent.id) else {
        return Vec::new();
    };
    match record.role {
        Role::Carrier => ctx
            .memory
            .territory(agent.pos.territory)
            .map(|t| t.drop_off_containers.iter().copied().collect())
            .unwrap_or_default(),
        Role::Miner => record.container.into_iter().collect(),
        _ => Vec::new(),
    }
}

/// Choose where an agent delivers its energy
///
/// A cached target is kept while it can still take energy, so the choice
/// does not oscillate between ticks.
pub fn find_drop_off(ctx: &mut TickContext<'_>, agent: &UnitView) -> Option<StructureView> {
    let excluded = excluded_drop_offs(ctx, agent);
    let cached = ctx.memory.agent(agent.id).and_then(|m| m.drop_off);
    if let Some(structure) = cached.and_then(|id| ctx.world.structure(id)) {
        if accepts_energy(&structure, &excluded) {
            return Some(structure);
        }
    }

    let chosen = ctx
        .world
        .structures(agent.pos.territory)
        .into_iter()
        .filter(|s| accepts_energy(s, &excluded))
        .min_by_key(|s| (drop_off_tier(s), agent.pos.range_or(&s.pos, FAR), s.id));

    if let Some(record) = ctx.memory.agent_mut(agent.id) {
        record.drop_off = chosen.as_ref().map(|s| s.id);
    }
    chosen
}

/// Bring carried energy to the drop-off, heading home when none is in sight
pub fn deliver_energy(ctx: &mut TickContext<'_>, agent: &UnitView) -> Result<()> {
    let Some(target) = find_drop_off(ctx, agent) else {
        let home = ctx.memory.require_agent(agent.id)?.home;
        if agent.pos.territory != home {
            ctx.move_to(agent.id, Position::center(home))?;
        }
        return Ok(());
    };

    let command = Command::Transfer {
        agent: agent.id,
        to: target.id,
    };
    match ctx.act_or_approach(agent.id, command, target.pos) {
        Ok(_) => Ok(()),
        Err(crate::core::error::SwarmError::Command(CommandError::Full)) => {
            if let Some(record) = ctx.memory.agent_mut(agent.id) {
                record.drop_off = None;
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn pile_value(agent: &UnitView, pile: &PileView) -> Option<f32> {
    let range = agent.pos.range_to(&pile.pos)?;
    Some(pile.amount as f32 / range.max(1) as f32)
}

/// Pickup target of a collecting carrier
///
/// 1. piles worth the walk (amount / range above the threshold)
/// 2. containers and storage while production structures are not full,
///    preferring registered drop-off containers, fullest first
/// 3. its paired or attached miner
pub fn find_pickup(ctx: &mut TickContext<'_>, carrier: &UnitView) -> Option<Pickup> {
    let threshold = ctx.rules.logistics.pile_value_threshold;
    let territory = carrier.pos.territory;

    let cached_pile = ctx.memory.agent(carrier.id).and_then(|m| m.energy_pile);
    let piles = ctx.world.piles(territory);
    let worthwhile = |p: &PileView| pile_value(carrier, p).is_some_and(|v| v > threshold);
    let pile = piles
        .iter()
        .find(|p| Some(p.id) == cached_pile && worthwhile(p))
        .or_else(|| {
            piles
                .iter()
                .filter(|p| worthwhile(p))
                .min_by_key(|p| (carrier.pos.range_or(&p.pos, FAR), p.id))
        })
        .cloned();
    if let Some(record) = ctx.memory.agent_mut(carrier.id) {
        record.energy_pile = pile.as_ref().map(|p| p.id);
    }
    if let Some(pile) = pile {
        return Some(Pickup::Pile(pile));
    }

    let needs_energy = ctx
        .world
        .territory(territory)
        .is_some_and(|t| t.energy_available < t.energy_capacity);
    if needs_energy {
        let cached = ctx.memory.agent(carrier.id).and_then(|m| m.pickup);
        if let Some(store) = cached.and_then(|id| ctx.world.structure(id)) {
            if store.has_energy() && store.pos.territory == territory {
                return Some(Pickup::Store(store));
            }
        }

        let mut stores: Vec<StructureView> = ctx
            .world
            .structures(territory)
            .into_iter()
            .filter(|s| s.kind.is_store() && s.is_friendly_or_neutral() && s.has_energy())
            .collect();
        let registered = ctx
            .memory
            .territory(territory)
            .map(|t| t.drop_off_containers.clone())
            .unwrap_or_default();
        if stores.iter().any(|s| registered.contains(&s.id)) {
            stores.retain(|s| registered.contains(&s.id));
        }
        let store = stores.into_iter().min_by(|a, b| {
            b.energy_fraction()
                .total_cmp(&a.energy_fraction())
                .then(a.id.cmp(&b.id))
        });
        if let Some(record) = ctx.memory.agent_mut(carrier.id) {
            record.pickup = store.as_ref().map(|s| s.id);
        }
        if let Some(store) = store {
            return Some(Pickup::Store(store));
        }
    }

    match link_carrier(ctx, carrier) {
        MinerLink::Paired(miner) | MinerLink::Attached(miner) => {
            ctx.world.my_unit(miner).map(Pickup::Miner)
        }
        MinerLink::Unlinked => None,
    }
}

/// Hand carried energy to adjacent agents of the given roles
///
/// Returns how many transfers succeeded.
pub fn hand_over_to_adjacent(ctx: &mut TickContext<'_>, giver: AgentId, roles: &[Role]) -> u32 {
    let Some(unit) = ctx.world.my_unit(giver) else {
        return 0;
    };
    let receivers: Vec<AgentId> = ctx
        .world
        .my_units_in(unit.pos.territory)
        .into_iter()
        .filter(|u| u.id != giver && !u.spawning && u.pos.is_near_to(&unit.pos))
        .filter(|u| u.free_capacity() > 0)
        .filter(|u| ctx.memory.role_of(u.id).is_some_and(|r| roles.contains(&r)))
        .map(|u| u.id)
        .collect();

    let mut handed = 0;
    for receiver in receivers {
        match ctx.world.execute(Command::Transfer {
            agent: giver,
            to: receiver,
        }) {
            Ok(()) => handed += 1,
            Err(CommandError::NotEnoughResources) => break,
            Err(_) => continue,
        }
    }
    handed
}

/// Pick up every pile on or next to the agent's tile
pub fn pickup_adjacent_piles(ctx: &mut TickContext<'_>, agent: &UnitView) {
    if agent.free_capacity() == 0 {
        return;
    }
    let piles: Vec<ObjectId> = ctx
        .world
        .piles(agent.pos.territory)
        .into_iter()
        .filter(|p| p.pos.is_near_to(&agent.pos))
        .map(|p| p.id)
        .collect();
    for pile in piles {
        if let Err(CommandError::Full) = ctx.world.execute(Command::Pickup {
            agent: agent.id,
            pile,
        }) {
            break;
        }
    }
}

/// Move next to a pickup and take energy from it
///
/// Miners hand energy over on their own turn, so a carrier at its miner
/// only waits.
pub fn collect_from(ctx: &mut TickContext<'_>, agent: &UnitView, pickup: &Pickup) -> Result<Approach> {
    let command = match pickup {
        Pickup::Pile(pile) => Command::Pickup {
            agent: agent.id,
            pile: pile.id,
        },
        Pickup::Store(store) => Command::Withdraw {
            agent: agent.id,
            from: store.id,
        },
        Pickup::Miner(miner) => {
            if agent.pos.is_near_to(&miner.pos) {
                return Ok(Approach::Done);
            }
            ctx.move_to(agent.id, miner.pos)?;
            return Ok(Approach::Moving);
        }
    };
    match ctx.act_or_approach(agent.id, command, pickup.pos()) {
        Err(crate::core::error::SwarmError::Command(
            CommandError::NotEnoughResources | CommandError::InvalidTarget,
        )) => {
            if let Some(record) = ctx.memory.agent_mut(agent.id) {
                record.pickup = None;
                record.energy_pile = None;
            }
            Ok(Approach::Done)
        }
        other => other,
    }
}

/// Energy is plentiful enough to hand some to workers
pub fn can_share_energy(ctx: &TickContext<'_>, territory: crate::core::types::TerritoryId) -> bool {
    territory::has_surplus_energy(ctx, territory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyPart;
    use crate::core::config::Ruleset;
    use crate::core::types::TerritoryId;
    use crate::memory::{AgentMemory, MemoryStore};
    use crate::world::{SimWorld, World};

    const HOME: TerritoryId = TerritoryId(1);

    fn pos(x: i32, y: i32) -> Position {
        Position::new(HOME, x, y)
    }

    fn agent(world: &mut SimWorld, memory: &mut MemoryStore, role: Role, at: Position) -> AgentId {
        let parts = match role {
            Role::Miner => vec![BodyPart::Work, BodyPart::Carry, BodyPart::Move],
            _ => vec![BodyPart::Carry, BodyPart::Move],
        };
        let id = world.add_unit(Owner::Mine, &role.to_string(), at, &parts);
        memory.agents.insert(id, AgentMemory::new(role, HOME));
        id
    }

    fn setup() -> (SimWorld, MemoryStore, Ruleset) {
        let mut world = SimWorld::new();
        world.add_controller(HOME, Owner::Mine, 2);
        (world, MemoryStore::new(), Ruleset::default())
    }

    #[test]
    fn test_carrier_pairs_with_closest_solo_miner() {
        let (mut world, mut memory, rules) = setup();
        let near = agent(&mut world, &mut memory, Role::Miner, pos(12, 10));
        let far = agent(&mut world, &mut memory, Role::Miner, pos(40, 10));
        let carrier = agent(&mut world, &mut memory, Role::Carrier, pos(10, 10));
        let view = world.unit(carrier).unwrap();

        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        assert_eq!(link_carrier(&mut ctx, &view), MinerLink::Paired(near));
        assert!(!is_solo(&mut ctx, near));
        assert!(is_solo(&mut ctx, far));
        assert_eq!(memory.agent(near).unwrap().paired_carrier, Some(carrier));
    }

    #[test]
    fn test_miner_relinks_after_partial_update() {
        let (mut world, mut memory, rules) = setup();
        let miner = agent(&mut world, &mut memory, Role::Miner, pos(12, 10));
        let carrier = agent(&mut world, &mut memory, Role::Carrier, pos(10, 10));
        let view = world.unit(carrier).unwrap();

        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        link_carrier(&mut ctx, &view);
        ctx.memory.agent_mut(miner).unwrap().paired_carrier = None;

        assert_eq!(miner_carrier(&mut ctx, miner), Some(carrier));
        assert_eq!(ctx.memory.agent(miner).unwrap().paired_carrier, Some(carrier));
        // no solo miner left, so production would not add a second carrier
        assert!(closest_solo_miner(&mut ctx, &pos(10, 10)).is_none());
    }

    #[test]
    fn test_dead_carrier_leaves_miner_solo() {
        let (mut world, mut memory, rules) = setup();
        let miner = agent(&mut world, &mut memory, Role::Miner, pos(12, 10));
        let carrier = agent(&mut world, &mut memory, Role::Carrier, pos(10, 10));
        let view = world.unit(carrier).unwrap();
        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        link_carrier(&mut ctx, &view);

        world.kill(carrier);
        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        assert!(is_solo(&mut ctx, miner));
        assert_eq!(memory.agent(miner).unwrap().paired_carrier, None);
    }

    #[test]
    fn test_carrier_attaches_to_farthest_when_no_solo_miner() {
        let (mut world, mut memory, rules) = setup();
        let near = agent(&mut world, &mut memory, Role::Miner, pos(12, 10));
        let far = agent(&mut world, &mut memory, Role::Miner, pos(30, 10));
        let first = agent(&mut world, &mut memory, Role::Carrier, pos(10, 10));
        let second = agent(&mut world, &mut memory, Role::Carrier, pos(20, 10));
        let third = agent(&mut world, &mut memory, Role::Carrier, pos(11, 10));

        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        for id in [first, second] {
            let view = ctx.world.unit(id).unwrap();
            assert!(matches!(link_carrier(&mut ctx, &view), MinerLink::Paired(_)));
        }
        let view = ctx.world.unit(third).unwrap();
        assert_eq!(link_carrier(&mut ctx, &view), MinerLink::Attached(far));
        assert_eq!(ctx.memory.agent(near).unwrap().paired_carrier, Some(first));
        assert_eq!(ctx.memory.agent(far).unwrap().paired_carrier, Some(second));
    }

    #[test]
    fn test_drop_off_tiers() {
        let (mut world, mut memory, rules) = setup();
        let spawn = world.add_structure(StructureKind::Spawn, Owner::Mine, pos(11, 11));
        let storage = world.add_structure(StructureKind::Storage, Owner::Mine, pos(10, 11));
        let tower = world.add_structure(StructureKind::Tower, Owner::Mine, pos(30, 30));
        let carrier = agent(&mut world, &mut memory, Role::Carrier, pos(10, 10));
        let view = world.unit(carrier).unwrap();

        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        assert_eq!(find_drop_off(&mut ctx, &view).unwrap().id, tower);

        world.structure_mut(tower).unwrap().energy = 1_000;
        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        assert_eq!(find_drop_off(&mut ctx, &view).unwrap().id, spawn);

        world.structure_mut(spawn).unwrap().energy = 300;
        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        assert_eq!(find_drop_off(&mut ctx, &view).unwrap().id, storage);
    }

    #[test]
    fn test_carrier_skips_registered_containers() {
        let (mut world, mut memory, rules) = setup();
        let container = world.add_structure(StructureKind::Container, Owner::Mine, pos(11, 11));
        let storage = world.add_structure(StructureKind::Storage, Owner::Mine, pos(20, 20));
        memory
            .territory_mut(HOME)
            .drop_off_containers
            .insert(container);
        let carrier = agent(&mut world, &mut memory, Role::Carrier, pos(10, 10));
        let view = world.unit(carrier).unwrap();

        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        assert_eq!(find_drop_off(&mut ctx, &view).unwrap().id, storage);
    }

    #[test]
    fn test_cached_drop_off_is_sticky() {
        let (mut world, mut memory, rules) = setup();
        let far = world.add_structure(StructureKind::Extension, Owner::Mine, pos(20, 20));
        let carrier = agent(&mut world, &mut memory, Role::Carrier, pos(10, 10));
        memory.agent_mut(carrier).unwrap().drop_off = Some(far);
        world.add_structure(StructureKind::Extension, Owner::Mine, pos(11, 11));
        let view = world.unit(carrier).unwrap();

        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        assert_eq!(find_drop_off(&mut ctx, &view).unwrap().id, far);
    }

    #[test]
    fn test_pile_worth_the_walk() {
        let (mut world, mut memory, rules) = setup();
        let carrier = agent(&mut world, &mut memory, Role::Carrier, pos(10, 10));
        // 100 / 10 = 10 is not worth it, 100 / 5 = 20 is
        world.add_pile(pos(20, 10), 100);
        let close = world.add_pile(pos(15, 10), 100);
        let view = world.unit(carrier).unwrap();

        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        assert_eq!(find_pickup(&mut ctx, &view).map(|p| p.id()), Some(close));
    }

    #[test]
    fn test_pickup_prefers_fullest_registered_container() {
        let (mut world, mut memory, rules) = setup();
        let spawn = world.add_structure(StructureKind::Spawn, Owner::Mine, pos(5, 5));
        world.structure_mut(spawn).unwrap().energy = 100;
        let storage = world.add_structure(StructureKind::Storage, Owner::Mine, pos(12, 12));
        world.structure_mut(storage).unwrap().energy = 5_000;
        let low = world.add_structure(StructureKind::Container, Owner::Mine, pos(30, 30));
        world.structure_mut(low).unwrap().energy = 100;
        let high = world.add_structure(StructureKind::Container, Owner::Mine, pos(40, 40));
        world.structure_mut(high).unwrap().energy = 1_500;
        memory.territory_mut(HOME).drop_off_containers.extend([low, high]);
        let carrier = agent(&mut world, &mut memory, Role::Carrier, pos(10, 10));
        let view = world.unit(carrier).unwrap();

        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        assert_eq!(find_pickup(&mut ctx, &view).map(|p| p.id()), Some(high));
    }

    #[test]
    fn test_hand_over_to_adjacent_roles() {
        let (mut world, mut memory, rules) = setup();
        let miner = agent(&mut world, &mut memory, Role::Miner, pos(10, 10));
        world.unit_mut(miner).unwrap().energy = 50;
        let carrier = agent(&mut world, &mut memory, Role::Carrier, pos(11, 10));
        let builder = agent(&mut world, &mut memory, Role::Builder, pos(9, 10));

        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        assert_eq!(hand_over_to_adjacent(&mut ctx, miner, &[Role::Carrier]), 1);
        assert_eq!(world.unit(carrier).unwrap().energy, 50);
        assert_eq!(world.unit(builder).unwrap().energy, 0);
    }
}
