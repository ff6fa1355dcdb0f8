//! Garbage collection of persisted records
//!
//! Records outlive the objects they describe: an agent dies, a structure is
//! destroyed, a marker is removed. Every `gc_interval` ticks the orphans are
//! dropped, and a dead agent's task slot is given back first so the task
//! can be taken by someone else in the same tick.

use serde::Serialize;

use crate::core::types::Tick;
use crate::memory::MemoryStore;
use crate::tasks;
use crate::world::World;

/// What one collection pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    pub agents: usize,
    pub structures: usize,
    pub markers: usize,
    pub released_tasks: usize,
}

impl GcReport {
    pub fn total(&self) -> usize {
        self.agents + self.structures + self.markers
    }
}

/// A pass is due `interval` ticks after the previous one
pub fn is_due(tick: Tick, last: Option<Tick>, interval: u64) -> bool {
    match last {
        None => true,
        Some(last) => tick >= last + interval.max(1),
    }
}

/// Remove every record whose live counterpart is gone
pub fn collect(world: &dyn World, memory: &mut MemoryStore) -> GcReport {
    let mut report = GcReport::default();

    let dead_agents: Vec<_> = memory
        .agents
        .keys()
        .copied()
        .filter(|id| world.my_unit(*id).is_none())
        .collect();
    for id in dead_agents {
        let held = memory.agents.get(&id).and_then(|m| m.task);
        if let Some(task_ref) = held {
            if tasks::release(memory, id, &task_ref) {
                report.released_tasks += 1;
            }
        }
        if let Some(record) = memory.agents.remove(&id) {
            tracing::debug!(agent = %id, role = %record.role, "agent memory collected");
            report.agents += 1;
        }
    }

    let dead_structures: Vec<_> = memory
        .structures
        .keys()
        .copied()
        .filter(|id| world.structure(*id).is_none())
        .collect();
    for id in dead_structures {
        let held = memory.structures.get(&id).and_then(|m| m.repair_task);
        if let Some(task_ref) = held {
            if tasks::release(memory, id, &task_ref) {
                report.released_tasks += 1;
            }
        }
        memory.structures.remove(&id);
        report.structures += 1;
    }

    let live_markers: Vec<String> = world.markers().into_iter().map(|m| m.name).collect();
    let before = memory.markers.len();
    memory.markers.retain(|name, _| live_markers.contains(name));
    report.markers = before - memory.markers.len();

    memory.last_gc = Some(world.tick());
    if report.total() > 0 {
        tracing::info!(
            agents = report.agents,
            structures = report.structures,
            markers = report.markers,
            released_tasks = report.released_tasks,
            "garbage collected"
        );
    }
    report
}
