//! General worker consuming the task queue

use crate::context::TickContext;
use crate::core::error::{CommandError, Result, SwarmError};
use crate::core::types::{AgentId, ObjectId, Position, TerritoryId};
use crate::logistics;
use crate::memory::WorkMode;
use crate::production;
use crate::tasks::{self, Task, TaskKind};
use crate::world::{Command, StructureKind, StructureView, UnitView};

/// Where a builder goes to refill
#[derive(Debug, Clone, PartialEq)]
enum EnergySource {
    Pile(ObjectId, Position),
    Structure(StructureView),
    Home(Position),
}

fn lifetime_fraction(ctx: &TickContext<'_>, fraction: f32) -> u32 {
    (ctx.rules.lifecycle.agent_lifetime as f32 * fraction) as u32
}

fn find_energy(ctx: &mut TickContext<'_>, builder: &UnitView) -> Option<EnergySource> {
    let territory = builder.pos.territory;
    let cached = ctx.memory.agent(builder.id).and_then(|m| m.pickup);
    if let Some(structure) = cached.and_then(|id| ctx.world.structure(id)) {
        if structure.has_energy() {
            return Some(EnergySource::Structure(structure));
        }
    }

    let range = ctx.rules.logistics.worker_pile_range;
    let pile = ctx
        .world
        .piles(territory)
        .into_iter()
        .filter(|p| builder.pos.in_range(&p.pos, range))
        .min_by_key(|p| (builder.pos.range_or(&p.pos, u32::MAX), p.id));
    if let Some(pile) = pile {
        return Some(EnergySource::Pile(pile.id, pile.pos));
    }

    let home = ctx.memory.require_agent(builder.id).ok()?.home;
    let structures: Vec<StructureView> = ctx
        .world
        .structures(territory)
        .into_iter()
        .filter(|s| s.is_friendly_or_neutral() && s.has_energy() && s.kind != StructureKind::Tower)
        .collect();
    if territory != home {
        let available: u32 = structures.iter().map(|s| s.energy).sum();
        if available < builder.free_capacity() {
            return Some(EnergySource::Home(Position::center(home)));
        }
    }

    let stores: Vec<&StructureView> = structures.iter().filter(|s| s.kind.is_store()).collect();
    let chosen = if stores.is_empty() {
        let surplus = logistics::can_share_energy(ctx, territory);
        structures
            .iter()
            .filter(|s| surplus || !s.kind.is_production())
            .min_by_key(|s| (builder.pos.range_or(&s.pos, u32::MAX), s.id))
            .cloned()
    } else {
        stores
            .into_iter()
            .min_by_key(|s| (builder.pos.range_or(&s.pos, u32::MAX), s.id))
            .cloned()
    };
    if let Some(record) = ctx.memory.agent_mut(builder.id) {
        record.pickup = chosen.as_ref().map(|s| s.id);
    }
    chosen.map(EnergySource::Structure)
}

fn refill(ctx: &mut TickContext<'_>, builder: &UnitView) -> Result<()> {
    match find_energy(ctx, builder) {
        Some(EnergySource::Pile(pile, pos)) => {
            ctx.act_or_approach(builder.id, Command::Pickup { agent: builder.id, pile }, pos)?;
        }
        Some(EnergySource::Structure(structure)) => {
            let command = Command::Withdraw {
                agent: builder.id,
                from: structure.id,
            };
            match ctx.act_or_approach(builder.id, command, structure.pos) {
                Ok(_) => {}
                Err(SwarmError::Command(
                    CommandError::NotEnoughResources | CommandError::Full,
                )) => {
                    if let Some(record) = ctx.memory.agent_mut(builder.id) {
                        record.pickup = None;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Some(EnergySource::Home(center)) => ctx.move_to(builder.id, center)?,
        None => {}
    }
    Ok(())
}

/// Keep the current task while it is valid, otherwise ask for a new one
fn current_task(ctx: &mut TickContext<'_>, builder: &UnitView) -> Option<Task> {
    let held = ctx.memory.agent(builder.id).and_then(|m| m.task);
    if let Some(task_ref) = held {
        tasks::refresh(ctx, task_ref.territory);
        if let Some(task) = ctx.memory.task(&task_ref) {
            if tasks::is_valid(&*ctx.world, ctx.rules, task) && task.assignees.contains(&builder.id) {
                return Some(task.clone());
            }
        }
        tasks::release(ctx.memory, builder.id, &task_ref);
    }

    let task = tasks::assign(ctx, builder);
    if let Some(task) = &task {
        tracing::info!(
            builder = %builder.id,
            kind = ?task.kind,
            target = %task.target,
            territory = %task.territory,
            "acquired a new task"
        );
    }
    if let Some(record) = ctx.memory.agent_mut(builder.id) {
        record.task = task.as_ref().map(|t| t.task_ref());
    }
    task
}

fn drop_task(ctx: &mut TickContext<'_>, builder: AgentId) {
    let held = ctx.memory.agent_mut(builder).and_then(|m| m.task.take());
    if let Some(task_ref) = held {
        tasks::release(ctx.memory, builder, &task_ref);
        tracing::debug!(builder = %builder, target = %task_ref.target, "stopped work on task");
    }
}

fn perform(ctx: &mut TickContext<'_>, builder: &UnitView, task: &Task) -> Result<()> {
    let target_pos = ctx
        .world
        .object(task.target)
        .map(|o| o.pos())
        .unwrap_or_else(|| Position::center(task.territory));
    let range = builder.pos.range_to(&target_pos);

    let command = match task.kind {
        TaskKind::Resupply => {
            let command = Command::Transfer {
                agent: builder.id,
                to: task.target,
            };
            return match ctx.act_or_approach(builder.id, command, target_pos) {
                Ok(_) => Ok(()),
                Err(SwarmError::Command(CommandError::Full)) => {
                    drop_task(ctx, builder.id);
                    Ok(())
                }
                Err(e) => Err(e),
            };
        }
        TaskKind::Construct => Command::Build {
            agent: builder.id,
            site: task.target,
        },
        TaskKind::Repair => Command::Repair {
            actor: builder.id,
            target: task.target,
        },
        TaskKind::Upgrade => Command::Upgrade {
            agent: builder.id,
            controller: task.target,
        },
    };

    // stop one tile short of the work range so others can get in range
    if range.map_or(true, |r| r > 2) {
        ctx.move_to(builder.id, target_pos)?;
    }
    if range.is_some_and(|r| r <= ctx.rules.tasks.work_range) {
        match ctx.world.execute(command) {
            Ok(()) | Err(CommandError::NotEnoughResources | CommandError::NotInRange) => {}
            Err(CommandError::InvalidTarget | CommandError::NotOwner) => drop_task(ctx, builder.id),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn go_renew(ctx: &mut TickContext<'_>, builder: &UnitView, home: TerritoryId) -> Result<()> {
    if builder.pos.territory != home {
        return ctx.move_to(builder.id, Position::center(home));
    }
    let spawns = ctx.world.my_structures_of(home, StructureKind::Spawn);
    let closest = spawns
        .iter()
        .min_by_key(|s| (builder.pos.range_or(&s.pos, u32::MAX), s.id));
    match closest {
        Some(spawn) if !builder.pos.is_near_to(&spawn.pos) => ctx.move_to(builder.id, spawn.pos),
        _ => Ok(()),
    }
}

pub fn act(ctx: &mut TickContext<'_>, agent: &UnitView) -> Result<()> {
    logistics::pickup_adjacent_piles(ctx, agent);
    let Some(builder) = ctx.world.my_unit(agent.id) else {
        return Ok(());
    };
    let ttl = builder.ticks_to_live.unwrap_or(ctx.rules.lifecycle.agent_lifetime);
    let release_at = lifetime_fraction(ctx, ctx.rules.lifecycle.renew_release_fraction);
    let request_at = lifetime_fraction(ctx, ctx.rules.lifecycle.renew_request_fraction);

    let mut mode = ctx.memory.require_agent(builder.id)?.mode;
    if mode == WorkMode::Renewing && ttl > release_at {
        mode = WorkMode::Collecting;
    }

    if builder.energy == 0 {
        drop_task(ctx, builder.id);
        if mode != WorkMode::Renewing {
            let capacity = ctx
                .world
                .territory(builder.pos.territory)
                .map_or(0, |t| t.energy_capacity);
            mode = if ttl < request_at && !production::is_obsolete(ctx, &builder, capacity) {
                tracing::debug!(builder = %builder.id, ttl, "requesting renewal");
                WorkMode::Renewing
            } else {
                WorkMode::Collecting
            };
        }
    } else if builder.is_full() && mode == WorkMode::Collecting {
        mode = WorkMode::Working;
        if let Some(record) = ctx.memory.agent_mut(builder.id) {
            record.pickup = None;
        }
    }

    let record = ctx.memory.require_agent_mut(builder.id)?;
    record.mode = mode;
    let home = record.home;

    match mode {
        WorkMode::Renewing => go_renew(ctx, &builder, home),
        WorkMode::Working | WorkMode::Delivering => match current_task(ctx, &builder) {
            Some(task) => perform(ctx, &builder, &task),
            None => Ok(()),
        },
        WorkMode::Collecting => refill(ctx, &builder),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyPart;
    use crate::core::config::Ruleset;
    use crate::memory::{AgentMemory, MemoryStore, TaskRef};
    use crate::roles::Role;
    use crate::world::{Owner, SimWorld, World};

    const HOME: TerritoryId = TerritoryId(1);

    fn pos(x: i32, y: i32) -> Position {
        Position::new(HOME, x, y)
    }

    fn setup(at: Position) -> (SimWorld, MemoryStore, Ruleset, AgentId) {
        let mut world = SimWorld::new();
        world.add_controller(HOME, Owner::Mine, 2);
        let builder = world.add_unit(
            Owner::Mine,
            "builder",
            at,
            &[BodyPart::Work, BodyPart::Work, BodyPart::Carry, BodyPart::Move],
        );
        let mut memory = MemoryStore::new();
        memory.agents.insert(builder, AgentMemory::new(Role::Builder, HOME));
        (world, memory, Ruleset::default(), builder)
    }

    fn step(world: &mut SimWorld, memory: &mut MemoryStore, rules: &Ruleset, builder: AgentId) {
        let view = world.my_unit(builder).unwrap();
        let mut ctx = TickContext::new(world, memory, rules);
        act(&mut ctx, &view).unwrap();
        world.advance();
    }

    #[test]
    fn test_full_builder_takes_and_works_a_task() {
        let (mut world, mut memory, rules, builder) = setup(pos(10, 10));
        let site = world.add_site(StructureKind::Extension, pos(12, 10));
        world.unit_mut(builder).unwrap().energy = 50;

        step(&mut world, &mut memory, &rules, builder);
        let record = memory.agent(builder).unwrap();
        assert_eq!(record.mode, WorkMode::Working);
        assert_eq!(record.task.map(|t| t.target), Some(site));
        assert_eq!(world.unit(builder).unwrap().energy, 40);
        assert!(memory
            .task(&TaskRef { territory: HOME, target: site })
            .unwrap()
            .assignees
            .contains(&builder));
    }

    #[test]
    fn test_empty_builder_releases_task() {
        let (mut world, mut memory, rules, builder) = setup(pos(10, 10));
        let site = world.add_site(StructureKind::Extension, pos(12, 10));
        world.unit_mut(builder).unwrap().energy = 5;
        memory.agent_mut(builder).unwrap().mode = WorkMode::Working;

        step(&mut world, &mut memory, &rules, builder);
        assert_eq!(world.unit(builder).unwrap().energy, 0);
        step(&mut world, &mut memory, &rules, builder);

        let record = memory.agent(builder).unwrap();
        assert_eq!(record.mode, WorkMode::Collecting);
        assert_eq!(record.task, None);
        let task = memory.task(&TaskRef { territory: HOME, target: site }).unwrap();
        assert!(task.assignees.is_empty());
    }

    #[test]
    fn test_old_builder_requests_renewal() {
        let (mut world, mut memory, rules, builder) = setup(pos(20, 10));
        world.add_structure(StructureKind::Spawn, Owner::Mine, pos(10, 10));
        world.unit_mut(builder).unwrap().ticks_to_live = Some(100);

        step(&mut world, &mut memory, &rules, builder);
        assert_eq!(memory.agent(builder).unwrap().mode, WorkMode::Renewing);
        assert_eq!(world.unit(builder).unwrap().pos, pos(19, 10));

        world.unit_mut(builder).unwrap().ticks_to_live = Some(800);
        step(&mut world, &mut memory, &rules, builder);
        assert_eq!(memory.agent(builder).unwrap().mode, WorkMode::Collecting);
    }

    #[test]
    fn test_refills_from_storage_before_spawn() {
        let (mut world, mut memory, rules, builder) = setup(pos(10, 10));
        let spawn = world.add_structure(StructureKind::Spawn, Owner::Mine, pos(11, 11));
        world.structure_mut(spawn).unwrap().energy = 300;
        let storage = world.add_structure(StructureKind::Storage, Owner::Mine, pos(15, 10));
        world.structure_mut(storage).unwrap().energy = 1_000;

        step(&mut world, &mut memory, &rules, builder);
        assert_eq!(memory.agent(builder).unwrap().pickup, Some(storage));
        assert_eq!(world.unit(builder).unwrap().pos, pos(11, 10));
    }

    #[test]
    fn test_spawn_withdrawal_needs_surplus() {
        let (mut world, mut memory, rules, builder) = setup(pos(10, 10));
        world.add_source(pos(30, 30));
        let spawn = world.add_structure(StructureKind::Spawn, Owner::Mine, pos(11, 11));
        world.structure_mut(spawn).unwrap().energy = 300;

        step(&mut world, &mut memory, &rules, builder);
        assert_eq!(world.unit(builder).unwrap().energy, 0);
        assert_eq!(memory.agent(builder).unwrap().pickup, None);
    }

    #[test]
    fn test_picks_up_nearby_pile() {
        let (mut world, mut memory, rules, builder) = setup(pos(10, 10));
        world.add_pile(pos(13, 10), 30);

        step(&mut world, &mut memory, &rules, builder);
        assert_eq!(world.unit(builder).unwrap().pos, pos(11, 10));
        step(&mut world, &mut memory, &rules, builder);
        // adjacent now, collected before anything else
        step(&mut world, &mut memory, &rules, builder);
        assert_eq!(world.unit(builder).unwrap().energy, 30);
    }
}
