//! Task Queue Manager
//!
//! Each territory owns a table of tasks keyed by target id. The table is
//! rebuilt lazily, at most once per tick, the first time anyone reads it.
//! Rebuilding reuses existing task records so their assignees survive;
//! only kind and priority are refreshed and dead assignees are pruned.
//!
//! Priorities are continuous scores where lower is more urgent:
//! - tower maintenance is fixed at the maintenance priority (0)
//! - construction lies in (0, 1], approaching 0 as work progresses
//! - repair lies in [0.7, 1.7], growing with remaining hits
//! - upgrade lies in [0.1, 2.1], growing with the downgrade timer

use std::collections::{BTreeMap, BTreeSet};

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::context::TickContext;
use crate::core::config::{lookup_level, Ruleset, TaskRules};
use crate::core::types::{AgentId, ObjectId, Position, TerritoryId};
use crate::memory::{MemoryStore, TaskRef};
use crate::roles::Role;
use crate::world::{
    ControllerView, ObjectView, Owner, SiteView, StructureKind, StructureView, UnitView, World,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    Construct,
    Repair,
    /// Fill a defense structure with energy
    Resupply,
    Upgrade,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub kind: TaskKind,
    pub territory: TerritoryId,
    pub target: ObjectId,
    pub priority: f32,
    /// `None` means unbounded
    pub max_assignees: Option<u32>,
    pub assignees: BTreeSet<ObjectId>,
}

impl Task {
    pub fn new(
        kind: TaskKind,
        territory: TerritoryId,
        target: ObjectId,
        priority: f32,
        max_assignees: Option<u32>,
    ) -> Self {
        Self {
            kind,
            territory,
            target,
            priority,
            max_assignees,
            assignees: BTreeSet::new(),
        }
    }

    pub fn task_ref(&self) -> TaskRef {
        TaskRef {
            territory: self.territory,
            target: self.target,
        }
    }

    /// Another assignee fits
    pub fn has_room(&self) -> bool {
        self.max_assignees
            .map_or(true, |max| (self.assignees.len() as u32) < max)
    }
}

pub fn max_assignees(kind: TaskKind, rules: &TaskRules) -> Option<u32> {
    match kind {
        TaskKind::Construct => Some(rules.max_build_assignees),
        TaskKind::Repair => Some(rules.max_repair_assignees),
        TaskKind::Resupply | TaskKind::Upgrade => None,
    }
}

/// Hit points a structure is repaired up to at a development level
pub fn target_hits(structure: &StructureView, level: u8, rules: &TaskRules) -> u32 {
    let table = match structure.kind {
        StructureKind::Wall => &rules.wall_target_hits,
        StructureKind::Rampart => &rules.rampart_target_hits,
        _ => return structure.hits_max,
    };
    lookup_level(table, level).min(structure.hits_max)
}

pub fn construct_priority(site: &SiteView, rules: &TaskRules) -> f32 {
    rules.min_build_priority + (1.0 - site.fraction_complete())
}

pub fn repair_priority(hits: u32, target_hits: u32, rules: &TaskRules) -> f32 {
    rules.min_repair_priority + hits as f32 / target_hits.max(1) as f32
}

/// Doubling the timer fraction spreads the range so urgency spikes only near expiry
pub fn upgrade_priority(controller: &ControllerView, rules: &Ruleset) -> f32 {
    let full = rules.controller_downgrade(controller.level) as f32;
    let remaining = (controller.ticks_to_downgrade as f32 / full).clamp(0.0, 1.0);
    rules.tasks.min_upgrade_priority + 2.0 * remaining
}

/// Development level used for per-level target hits
pub fn territory_level(world: &dyn World, territory: TerritoryId) -> u8 {
    world.territory(territory).map_or(0, |t| t.level())
}

/// Compute the tasks a territory needs right now
///
/// `repairing` lists targets that already have a repair task; those stay in
/// the table until fully repaired even after climbing above the threshold.
fn collect_tasks(
    world: &dyn World,
    rules: &Ruleset,
    territory: TerritoryId,
    repairing: &BTreeSet<ObjectId>,
) -> Vec<Task> {
    let task_rules = &rules.tasks;
    let mut tasks = Vec::new();

    for site in world.construction_sites() {
        if site.pos.territory == territory {
            tasks.push(Task::new(
                TaskKind::Construct,
                territory,
                site.id,
                construct_priority(&site, task_rules),
                max_assignees(TaskKind::Construct, task_rules),
            ));
        }
    }

    let Some(view) = world.territory(territory) else {
        return tasks;
    };
    let level = view.level();

    for structure in world.structures(territory) {
        if structure.kind == StructureKind::Tower {
            if structure.owner != Owner::Mine {
                continue;
            }
            let needs_energy = structure.energy < structure.energy_capacity;
            let needs_hits = structure.hits < structure.hits_max;
            if needs_energy || needs_hits {
                let kind = if structure.hits_fraction() < structure.energy_fraction() {
                    TaskKind::Repair
                } else {
                    TaskKind::Resupply
                };
                tasks.push(Task::new(
                    kind,
                    territory,
                    structure.id,
                    task_rules.maintenance_priority,
                    max_assignees(kind, task_rules),
                ));
            }
            continue;
        }

        if !structure.is_friendly_or_neutral() {
            continue;
        }
        let target = target_hits(&structure, level, task_rules);
        let below_threshold = (structure.hits as f32) < target as f32 * task_rules.repair_threshold;
        let still_repairing = repairing.contains(&structure.id) && structure.hits < target;
        if below_threshold || still_repairing {
            tasks.push(Task::new(
                TaskKind::Repair,
                territory,
                structure.id,
                repair_priority(structure.hits, target, task_rules),
                max_assignees(TaskKind::Repair, task_rules),
            ));
        }
    }

    if let Some(controller) = view.controller.as_ref().filter(|c| c.is_mine()) {
        tasks.push(Task::new(
            TaskKind::Upgrade,
            territory,
            controller.id,
            upgrade_priority(controller, rules),
            None,
        ));
    }

    tasks
}

/// Rebuild a territory's task table unless it was already rebuilt this tick
///
/// Returns whether a rebuild happened.
pub fn refresh(ctx: &mut TickContext<'_>, territory: TerritoryId) -> bool {
    refresh_table(&*ctx.world, ctx.memory, ctx.rules, territory)
}

pub(crate) fn refresh_table(
    world: &dyn World,
    memory: &mut MemoryStore,
    rules: &Ruleset,
    territory: TerritoryId,
) -> bool {
    let tick = world.tick();
    let table = memory.territory_mut(territory);
    if table.tasks_updated == Some(tick) {
        return false;
    }

    let mut old = std::mem::take(&mut table.tasks);
    let repairing: BTreeSet<ObjectId> = old
        .values()
        .filter(|t| t.kind == TaskKind::Repair)
        .map(|t| t.target)
        .collect();

    let mut tasks = BTreeMap::new();
    for fresh in collect_tasks(world, rules, territory, &repairing) {
        let task = match old.remove(&fresh.target) {
            Some(mut existing) => {
                existing.kind = fresh.kind;
                existing.priority = fresh.priority;
                existing.max_assignees = fresh.max_assignees;
                existing.assignees.retain(|id| world.object(*id).is_some());
                if let Some(max) = existing.max_assignees {
                    while existing.assignees.len() as u32 > max {
                        existing.assignees.pop_last();
                    }
                }
                existing
            }
            None => fresh,
        };
        tasks.insert(task.target, task);
    }

    tracing::debug!(
        territory = %territory,
        tasks = tasks.len(),
        dropped = old.len(),
        "task table rebuilt"
    );

    table.tasks = tasks;
    table.tasks_updated = Some(tick);
    true
}

/// A task's target still exists and still needs the work
pub fn is_valid(world: &dyn World, rules: &Ruleset, task: &Task) -> bool {
    match (task.kind, world.object(task.target)) {
        (TaskKind::Construct, Some(ObjectView::Site(_))) => true,
        (TaskKind::Upgrade, Some(ObjectView::Controller(c))) => c.is_mine(),
        (TaskKind::Repair, Some(ObjectView::Structure(s))) => {
            let level = territory_level(world, s.pos.territory);
            s.hits < target_hits(&s, level, &rules.tasks)
        }
        (TaskKind::Resupply, Some(ObjectView::Structure(s))) => s.energy < s.energy_capacity,
        _ => false,
    }
}

fn target_position(world: &dyn World, task: &Task) -> Option<Position> {
    world.object(task.target).map(|o| o.pos())
}

/// Territories whose tables an agent may take work from
fn search_territories(ctx: &TickContext<'_>, agent: &UnitView, role: Option<Role>) -> Vec<TerritoryId> {
    let current = agent.pos.territory;
    let mut territories = vec![current];
    if role.is_some_and(|r| r.works_across_borders()) {
        for adjacent in ctx.world.adjacent_territories(current) {
            let eligible = match ctx.world.territory(adjacent) {
                None => true,
                Some(view) => {
                    view.is_friendly_or_neutral() && ctx.agents_of(adjacent, Role::Builder).is_empty()
                }
            };
            if eligible {
                territories.push(adjacent);
            }
        }
    }
    territories
}

/// Pick the most urgent open task for an agent and register it as assignee
///
/// Tasks outside the agent's current territory have their priority scaled
/// by the adjacent-territory multiplier before comparison. Ties go to the
/// closest target.
pub fn assign(ctx: &mut TickContext<'_>, agent: &UnitView) -> Option<Task> {
    let role = ctx.memory.role_of(agent.id);
    let territories = search_territories(ctx, agent, role);
    for territory in &territories {
        refresh(ctx, *territory);
    }

    let multiplier = ctx.rules.tasks.adjacent_territory_multiplier;
    let unknown_range = ctx.rules.tasks.unknown_target_range;
    let world: &dyn World = &*ctx.world;
    let mut best: Option<(OrderedFloat<f32>, u32, TaskRef)> = None;
    for territory in &territories {
        let Some(table) = ctx.memory.territory(*territory) else {
            continue;
        };
        for task in table.tasks.values() {
            if !task.has_room() || !is_valid(world, ctx.rules, task) {
                continue;
            }
            let effective = if task.territory == agent.pos.territory {
                task.priority
            } else {
                task.priority * multiplier
            };
            let range = target_position(world, task)
                .map_or(unknown_range, |pos| agent.pos.range_or(&pos, unknown_range));
            let candidate = (OrderedFloat(effective), range, task.task_ref());
            let better = match &best {
                None => true,
                Some((p, r, t)) => (candidate.0, candidate.1, candidate.2.target) < (*p, *r, t.target),
            };
            if better {
                best = Some(candidate);
            }
        }
    }

    let (priority, _, task_ref) = best?;
    let task = ctx.memory.task_mut(&task_ref)?;
    task.assignees.insert(agent.id);
    tracing::debug!(
        agent = %agent.id,
        target = %task.target,
        kind = ?task.kind,
        priority = priority.0,
        "task assigned"
    );
    Some(task.clone())
}

/// Remove an assignee from a task, freeing the slot
pub fn release(memory: &mut MemoryStore, assignee: AgentId, task: &TaskRef) -> bool {
    memory
        .task_mut(task)
        .is_some_and(|t| t.assignees.remove(&assignee))
}

/// Hand a defense structure the most urgent repair task in its territory
///
/// Only targets whose hits sit below `max_fraction` of their target hits
/// qualify, so the structure never competes for nearly finished work.
pub fn assign_structure_repair(
    ctx: &mut TickContext<'_>,
    structure: &StructureView,
    max_fraction: f32,
) -> Option<TaskRef> {
    let territory = structure.pos.territory;
    refresh(ctx, territory);
    let world: &dyn World = &*ctx.world;
    let level = territory_level(world, territory);
    let table = ctx.memory.territory(territory)?;

    let chosen = table
        .tasks
        .values()
        .filter(|t| t.kind == TaskKind::Repair && t.target != structure.id && t.has_room())
        .filter(|t| is_valid(world, ctx.rules, t))
        .filter(|t| {
            world.structure(t.target).is_some_and(|s| {
                (s.hits as f32) < target_hits(&s, level, &ctx.rules.tasks) as f32 * max_fraction
            })
        })
        .min_by_key(|t| (OrderedFloat(t.priority), t.target))
        .map(|t| t.task_ref())?;

    ctx.memory.task_mut(&chosen)?.assignees.insert(structure.id);
    Some(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyPart;
    use crate::memory::AgentMemory;
    use crate::world::SimWorld;

    const HOME: TerritoryId = TerritoryId(1);
    const NEXT: TerritoryId = TerritoryId(2);

    fn pos(x: i32, y: i32) -> Position {
        Position::new(HOME, x, y)
    }

    fn world_with_controller(level: u8) -> SimWorld {
        let mut world = SimWorld::new();
        world.add_controller(HOME, Owner::Mine, level);
        world
    }

    fn builder(world: &mut SimWorld, memory: &mut MemoryStore, at: Position) -> UnitView {
        let id = world.add_unit(
            Owner::Mine,
            "builder",
            at,
            &[BodyPart::Work, BodyPart::Carry, BodyPart::Move],
        );
        memory.agents.insert(id, AgentMemory::new(Role::Builder, HOME));
        world.unit(id).unwrap()
    }

    #[test]
    fn test_repair_priority_scenario() {
        let rules = TaskRules::default();
        // level 3 wall target is 50000
        let p = repair_priority(49_999, 50_000, &rules);
        assert!((p - 1.69998).abs() < 1e-4);
    }

    #[test]
    fn test_wall_target_hits_by_level() {
        let mut world = world_with_controller(3);
        let wall = world.add_structure(StructureKind::Wall, Owner::Mine, pos(5, 5));
        let view = world.structure(wall).unwrap();
        assert_eq!(target_hits(&view, 3, &TaskRules::default()), 50_000);
        assert_eq!(target_hits(&view, 12, &TaskRules::default()), 5_000_000);
    }

    #[test]
    fn test_refresh_builds_expected_table() {
        let mut world = world_with_controller(3);
        let site = world.add_site(StructureKind::Extension, pos(10, 10));
        world.site_mut(site).unwrap().progress = 1_500;
        let wall = world.add_structure(StructureKind::Wall, Owner::Mine, pos(5, 5));
        world.structure_mut(wall).unwrap().hits = 40_000;
        let healthy = world.add_structure(StructureKind::Wall, Owner::Mine, pos(6, 5));
        world.structure_mut(healthy).unwrap().hits = 48_000;
        let tower = world.add_structure(StructureKind::Tower, Owner::Mine, pos(20, 20));
        world.structure_mut(tower).unwrap().energy = 500;

        let rules = Ruleset::default();
        let mut memory = MemoryStore::new();
        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        assert!(refresh(&mut ctx, HOME));

        let tasks = &memory.territory(HOME).unwrap().tasks;
        assert_eq!(tasks.len(), 4);
        assert_eq!(tasks[&site].kind, TaskKind::Construct);
        assert!((tasks[&site].priority - 0.5).abs() < 1e-6);
        assert_eq!(tasks[&site].max_assignees, Some(3));
        assert_eq!(tasks[&wall].kind, TaskKind::Repair);
        assert!((tasks[&wall].priority - 1.5).abs() < 1e-6);
        assert!(!tasks.contains_key(&healthy));
        assert_eq!(tasks[&tower].kind, TaskKind::Resupply);
        assert_eq!(tasks[&tower].priority, 0.0);
        let upgrade = tasks.values().find(|t| t.kind == TaskKind::Upgrade).unwrap();
        assert!((upgrade.priority - 2.1).abs() < 1e-6);
    }

    #[test]
    fn test_refresh_is_idempotent_within_a_tick() {
        let mut world = world_with_controller(2);
        world.add_site(StructureKind::Road, pos(3, 3));
        let rules = Ruleset::default();
        let mut memory = MemoryStore::new();
        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        assert!(refresh(&mut ctx, HOME));
        let first = ctx.memory.territory(HOME).unwrap().clone();
        assert!(!refresh(&mut ctx, HOME));
        assert_eq!(ctx.memory.territory(HOME).unwrap(), &first);

        world.advance();
        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        assert!(refresh(&mut ctx, HOME));
    }

    #[test]
    fn test_refresh_keeps_live_assignees() {
        let mut world = world_with_controller(2);
        let site = world.add_site(StructureKind::Road, pos(3, 3));
        let rules = Ruleset::default();
        let mut memory = MemoryStore::new();
        let alive = builder(&mut world, &mut memory, pos(4, 4));
        let doomed = builder(&mut world, &mut memory, pos(5, 5));

        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        refresh(&mut ctx, HOME);
        let task_ref = TaskRef {
            territory: HOME,
            target: site,
        };
        let task = ctx.memory.task_mut(&task_ref).unwrap();
        task.assignees.insert(alive.id);
        task.assignees.insert(doomed.id);

        world.kill(doomed.id);
        world.advance();
        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        refresh(&mut ctx, HOME);
        let task = memory.task(&task_ref).unwrap();
        assert_eq!(task.assignees.iter().copied().collect::<Vec<_>>(), vec![alive.id]);
    }

    #[test]
    fn test_repair_task_kept_until_target_reached() {
        let mut world = world_with_controller(3);
        let wall = world.add_structure(StructureKind::Wall, Owner::Mine, pos(5, 5));
        world.structure_mut(wall).unwrap().hits = 40_000;
        let rules = Ruleset::default();
        let mut memory = MemoryStore::new();
        refresh_table(&world, &mut memory, &rules, HOME);

        world.structure_mut(wall).unwrap().hits = 49_999;
        world.advance();
        refresh_table(&world, &mut memory, &rules, HOME);
        let task = &memory.territory(HOME).unwrap().tasks[&wall];
        assert!((task.priority - 1.69998).abs() < 1e-4);

        world.structure_mut(wall).unwrap().hits = 50_000;
        world.advance();
        refresh_table(&world, &mut memory, &rules, HOME);
        assert!(!memory.territory(HOME).unwrap().tasks.contains_key(&wall));
    }

    #[test]
    fn test_assign_prefers_urgent_then_close() {
        let mut world = world_with_controller(2);
        let far = world.add_site(StructureKind::Road, pos(40, 40));
        let near = world.add_site(StructureKind::Road, pos(12, 12));
        let rules = Ruleset::default();
        let mut memory = MemoryStore::new();
        let agent = builder(&mut world, &mut memory, pos(10, 10));

        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        let task = assign(&mut ctx, &agent).unwrap();
        assert_eq!(task.target, near);
        assert!(task.assignees.contains(&agent.id));
        assert_ne!(task.target, far);
    }

    #[test]
    fn test_assign_respects_capacity() {
        let mut world = world_with_controller(2);
        let site = world.add_site(StructureKind::Road, pos(12, 12));
        let rules = Ruleset::default();
        let mut memory = MemoryStore::new();
        let agents: Vec<UnitView> = (0..4)
            .map(|i| builder(&mut world, &mut memory, pos(10 + i, 10)))
            .collect();

        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        let targets: Vec<ObjectId> = agents
            .iter()
            .map(|a| assign(&mut ctx, a).unwrap().target)
            .collect();
        assert_eq!(targets.iter().filter(|t| **t == site).count(), 3);
        let task = memory
            .task(&TaskRef {
                territory: HOME,
                target: site,
            })
            .unwrap();
        assert_eq!(task.assignees.len(), 3);
    }

    #[test]
    fn test_adjacent_tasks_are_penalized() {
        let mut world = world_with_controller(2);
        world.connect(HOME, NEXT);
        world.reveal(NEXT);
        let remote = world.add_site(StructureKind::Road, Position::new(NEXT, 10, 10));
        world.site_mut(remote).unwrap().progress = 100;
        let local = world.add_site(StructureKind::Road, pos(30, 30));
        world.site_mut(local).unwrap().progress = 30;

        let rules = Ruleset::default();
        let mut memory = MemoryStore::new();
        let agent = builder(&mut world, &mut memory, pos(10, 10));
        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);

        // remote 0.667 * 1.5 = 1.0 loses against local 0.9
        let task = assign(&mut ctx, &agent).unwrap();
        assert_eq!(task.target, local);
    }

    #[test]
    fn test_release_frees_slot() {
        let mut world = world_with_controller(2);
        world.add_site(StructureKind::Road, pos(12, 12));
        let rules = Ruleset::default();
        let mut memory = MemoryStore::new();
        let agent = builder(&mut world, &mut memory, pos(10, 10));
        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        let task = assign(&mut ctx, &agent).unwrap();

        assert!(release(&mut memory, agent.id, &task.task_ref()));
        assert!(memory.task(&task.task_ref()).unwrap().assignees.is_empty());
        assert!(!release(&mut memory, agent.id, &task.task_ref()));
    }

    #[test]
    fn test_is_valid_tracks_targets() {
        let mut world = world_with_controller(2);
        let tower = world.add_structure(StructureKind::Tower, Owner::Mine, pos(20, 20));
        let rules = Ruleset::default();
        let task = Task::new(TaskKind::Resupply, HOME, tower, 0.0, None);
        assert!(is_valid(&world, &rules, &task));

        world.structure_mut(tower).unwrap().energy = 1_000;
        assert!(!is_valid(&world, &rules, &task));

        let gone = Task::new(TaskKind::Construct, HOME, ObjectId(999), 0.5, Some(3));
        assert!(!is_valid(&world, &rules, &gone));
    }

    #[test]
    fn test_structure_repair_skips_nearly_done_targets() {
        let mut world = world_with_controller(3);
        let tower = world.add_structure(StructureKind::Tower, Owner::Mine, pos(20, 20));
        world.structure_mut(tower).unwrap().energy = 1_000;
        let wall = world.add_structure(StructureKind::Wall, Owner::Mine, pos(5, 5));
        world.structure_mut(wall).unwrap().hits = 40_000;
        let rules = Ruleset::default();
        let mut memory = MemoryStore::new();
        let view = world.structure(tower).unwrap();

        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        assert!(assign_structure_repair(&mut ctx, &view, 0.7).is_none());

        world.structure_mut(wall).unwrap().hits = 20_000;
        world.advance();
        let mut ctx = TickContext::new(&mut world, &mut memory, &rules);
        let task = assign_structure_repair(&mut ctx, &view, 0.7).unwrap();
        assert_eq!(task.target, wall);
        assert!(memory.task(&task).unwrap().assignees.contains(&tower));
    }
}
