//! Defense Controller
//!
//! Towers shoot first and repair second. The attack target is cached on the
//! structure's memory record and re-validated every tick. Repair work comes
//! from the Task Queue, but a tower gives its repair task back early since
//! it is a poor repairer.

use std::cmp::Ordering;

use crate::context::TickContext;
use crate::core::error::{CommandError, Result};
use crate::core::types::ObjectId;
use crate::memory::TaskRef;
use crate::tasks;
use crate::world::{Combatant, Command, StructureView, UnitView};

/// What a tower did this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TowerAction {
    Attacked(ObjectId),
    Repaired(ObjectId),
    Idle,
}

/// Order hostiles by threat: combatants first, then the most damaged, then the closest
fn compare_threat(tower: &StructureView, a: &UnitView, b: &UnitView) -> Ordering {
    b.is_combatant()
        .cmp(&a.is_combatant())
        .then(a.health_fraction().total_cmp(&b.health_fraction()))
        .then(tower.pos.range_or(&a.pos, u32::MAX).cmp(&tower.pos.range_or(&b.pos, u32::MAX)))
        .then(a.id.cmp(&b.id))
}

/// Hostile the tower should shoot, keeping the cached one while it is a threat
pub fn select_target(ctx: &mut TickContext<'_>, tower: &StructureView) -> Option<UnitView> {
    let range = ctx.rules.defense.weapon_range;
    let hostiles: Vec<UnitView> = ctx
        .world
        .hostile_units(tower.pos.territory)
        .into_iter()
        .filter(|u| tower.pos.in_range(&u.pos, range))
        .collect();

    let cached = ctx.memory.structure(tower.id).and_then(|m| m.attack_target);
    if let Some(current) = cached.and_then(|id| hostiles.iter().find(|u| u.id == id)) {
        if current.is_combatant() {
            return Some(current.clone());
        }
    }

    let chosen = hostiles
        .into_iter()
        .min_by(|a, b| compare_threat(tower, a, b));
    let record = ctx.memory.structure_mut(tower.id);
    if record.attack_target != chosen.as_ref().map(|u| u.id) {
        tracing::debug!(tower = %tower.id, target = ?chosen.as_ref().map(|u| u.id), "tower retargeted");
    }
    record.attack_target = chosen.as_ref().map(|u| u.id);
    chosen
}

/// Current repair task, dropped once the target has recovered enough
fn current_repair(ctx: &mut TickContext<'_>, tower: &StructureView) -> Option<TaskRef> {
    let task_ref = ctx.memory.structure(tower.id)?.repair_task?;
    let level = tasks::territory_level(&*ctx.world, task_ref.territory);
    let abandon = ctx.rules.defense.repair_abandon_threshold;
    let keep = ctx.memory.task(&task_ref).is_some_and(|task| {
        tasks::is_valid(&*ctx.world, ctx.rules, task)
            && ctx.world.structure(task.target).is_some_and(|s| {
                (s.hits as f32) < tasks::target_hits(&s, level, &ctx.rules.tasks) as f32 * abandon
            })
    });
    if keep {
        return Some(task_ref);
    }
    tasks::release(ctx.memory, tower.id, &task_ref);
    ctx.memory.structure_mut(tower.id).repair_task = None;
    None
}

fn repair(ctx: &mut TickContext<'_>, tower: &StructureView) -> Result<TowerAction> {
    let task_ref = match current_repair(ctx, tower) {
        Some(task_ref) => task_ref,
        None => {
            let abandon = ctx.rules.defense.repair_abandon_threshold;
            let Some(task_ref) = tasks::assign_structure_repair(ctx, tower, abandon) else {
                return Ok(TowerAction::Idle);
            };
            tracing::debug!(tower = %tower.id, target = %task_ref.target, "tower took repair task");
            ctx.memory.structure_mut(tower.id).repair_task = Some(task_ref);
            task_ref
        }
    };

    match ctx.world.execute(Command::Repair {
        actor: tower.id,
        target: task_ref.target,
    }) {
        Ok(()) => Ok(TowerAction::Repaired(task_ref.target)),
        Err(CommandError::NotEnoughResources) => Ok(TowerAction::Idle),
        Err(e) => Err(e.into()),
    }
}

/// One tower's turn
pub fn run(ctx: &mut TickContext<'_>, tower: &StructureView) -> Result<TowerAction> {
    if tower.energy < ctx.rules.combat.tower_energy_cost {
        return Ok(TowerAction::Idle);
    }

    if let Some(target) = select_target(ctx, tower) {
        ctx.world.execute(Command::Attack {
            actor: tower.id,
            target: target.id,
        })?;
        return Ok(TowerAction::Attacked(target.id));
    }

    if tower.energy_fraction() > ctx.rules.defense.repair_energy_threshold {
        return repair(ctx, tower);
    }
    Ok(TowerAction::Idle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyPart;
    use crate::core::config::Ruleset;
    use crate::core::types::{Position, TerritoryId};
    use crate::memory::MemoryStore;
    use crate::world::{Owner, SimWorld, StructureKind, World};

    const HOME: TerritoryId = TerritoryId(1);

    fn pos(x: i32, y: i32) -> Position {
        Position::new(HOME, x, y)
    }

    fn home(tower_energy: u32) -> (SimWorld, ObjectId) {
        let mut world = SimWorld::new();
        world.add_controller(HOME, Owner::Mine, 3);
        let tower = world.add_structure(StructureKind::Tower, Owner::Mine, pos(25, 25));
        world.structure_mut(tower).unwrap().energy = tower_energy;
        (world, tower)
    }

    fn turn(world: &mut SimWorld, memory: &mut MemoryStore, rules: &Ruleset, tower: ObjectId) -> TowerAction {
        let view = world.structure(tower).unwrap();
        let mut ctx = TickContext::new(world, memory, rules);
        run(&mut ctx, &view).unwrap()
    }

    #[test]
    fn test_combatants_before_passive_units() {
        let (mut world, tower) = home(500);
        let scout = world.add_unit(Owner::Hostile, "scout", pos(26, 25), &[BodyPart::Move]);
        let fighter = world.add_unit(Owner::Hostile, "fighter", pos(30, 25), &[BodyPart::Attack, BodyPart::Move]);
        world.set_unit_hits(scout, 10);
        let mut memory = MemoryStore::new();
        let rules = Ruleset::default();

        assert_eq!(turn(&mut world, &mut memory, &rules, tower), TowerAction::Attacked(fighter));
        assert_eq!(memory.structure(tower).unwrap().attack_target, Some(fighter));
    }

    #[test]
    fn test_prefers_most_damaged() {
        let (mut world, tower) = home(500);
        let healthy = world.add_unit(Owner::Hostile, "a", pos(26, 25), &[BodyPart::Attack, BodyPart::Move, BodyPart::Move]);
        let hurt = world.add_unit(Owner::Hostile, "b", pos(33, 25), &[BodyPart::Attack, BodyPart::Move, BodyPart::Move]);
        world.set_unit_hits(hurt, 250);
        let mut memory = MemoryStore::new();
        let rules = Ruleset::default();

        assert_eq!(turn(&mut world, &mut memory, &rules, tower), TowerAction::Attacked(hurt));
        assert_ne!(memory.structure(tower).unwrap().attack_target, Some(healthy));
    }

    #[test]
    fn test_keeps_cached_target() {
        let (mut world, tower) = home(500);
        let first = world.add_unit(Owner::Hostile, "a", pos(30, 25), &[BodyPart::Heal, BodyPart::Move]);
        let second = world.add_unit(Owner::Hostile, "b", pos(26, 25), &[BodyPart::Attack, BodyPart::Move]);
        world.set_unit_hits(second, 50);
        let mut memory = MemoryStore::new();
        memory.structure_mut(tower).attack_target = Some(first);
        let rules = Ruleset::default();

        assert_eq!(turn(&mut world, &mut memory, &rules, tower), TowerAction::Attacked(first));
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let (mut world, tower) = home(500);
        world.add_unit(Owner::Hostile, "far", pos(45, 25), &[BodyPart::Attack, BodyPart::Move]);
        let mut memory = MemoryStore::new();
        memory.structure_mut(tower).attack_target = Some(ObjectId(999));
        let rules = Ruleset::default();

        assert_eq!(turn(&mut world, &mut memory, &rules, tower), TowerAction::Idle);
        assert_eq!(memory.structure(tower).unwrap().attack_target, None);
    }

    #[test]
    fn test_no_energy_no_action() {
        let (mut world, tower) = home(5);
        world.add_unit(Owner::Hostile, "a", pos(26, 25), &[BodyPart::Attack, BodyPart::Move]);
        let mut memory = MemoryStore::new();
        let rules = Ruleset::default();
        assert_eq!(turn(&mut world, &mut memory, &rules, tower), TowerAction::Idle);
    }

    #[test]
    fn test_repairs_only_when_stocked() {
        let (mut world, tower) = home(500);
        let wall = world.add_structure(StructureKind::Wall, Owner::Mine, pos(20, 20));
        world.structure_mut(wall).unwrap().hits = 1_000;
        let mut memory = MemoryStore::new();
        let rules = Ruleset::default();

        assert_eq!(turn(&mut world, &mut memory, &rules, tower), TowerAction::Idle);

        world.structure_mut(tower).unwrap().energy = 900;
        assert_eq!(turn(&mut world, &mut memory, &rules, tower), TowerAction::Repaired(wall));
        let task = memory.structure(tower).unwrap().repair_task.unwrap();
        assert!(memory.task(&task).unwrap().assignees.contains(&tower));
    }

    #[test]
    fn test_abandons_repair_once_recovered() {
        let (mut world, tower) = home(900);
        let wall = world.add_structure(StructureKind::Wall, Owner::Mine, pos(20, 20));
        world.structure_mut(wall).unwrap().hits = 1_000;
        let mut memory = MemoryStore::new();
        let rules = Ruleset::default();
        assert_eq!(turn(&mut world, &mut memory, &rules, tower), TowerAction::Repaired(wall));

        // level 3 walls target 50000 hits; 36000 is above the 70% mark
        world.structure_mut(wall).unwrap().hits = 36_000;
        world.structure_mut(tower).unwrap().energy = 900;
        world.advance();
        assert_eq!(turn(&mut world, &mut memory, &rules, tower), TowerAction::Idle);
        assert_eq!(memory.structure(tower).unwrap().repair_task, None);
        let task_ref = TaskRef {
            territory: HOME,
            target: wall,
        };
        assert!(memory.task(&task_ref).unwrap().assignees.is_empty());
    }
}
