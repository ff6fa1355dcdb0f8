//! Scouting agent
//!
//! A scout walks into territories we cannot see so that markers placed there
//! can be evaluated. Being present grants visibility, so the marker's
//! scouting flag is cleared as soon as the scout crosses the border.

use crate::context::TickContext;
use crate::core::error::Result;
use crate::core::types::{AgentId, Position, TerritoryId};
use crate::world::{MarkerView, UnitView};

/// Clear the scouting requests of every marker in a newly entered territory
fn report_arrival(ctx: &mut TickContext<'_>, scout: AgentId, territory: TerritoryId) {
    let markers: Vec<MarkerView> = ctx
        .world
        .markers()
        .into_iter()
        .filter(|m| m.pos.territory == territory)
        .collect();
    for marker in markers {
        let record = ctx.memory.marker_mut(&marker.name);
        if record.scouting_needed {
            record.scouting_needed = false;
            record.reserved = false;
            record.scout = None;
            tracing::info!(scout = %scout, marker = %marker.name, territory = %territory, "marker scouted");
        }
    }
}

/// Adopt the closest marker that still needs a scout
fn adopt_marker(ctx: &mut TickContext<'_>, scout: &UnitView) -> Option<Position> {
    let here = scout.pos.territory;
    let marker = ctx
        .world
        .markers()
        .into_iter()
        .filter(|m| !ctx.world.is_visible(m.pos.territory))
        .filter(|m| {
            ctx.memory.marker(&m.name).is_some_and(|mem| {
                mem.scouting_needed
                    && !mem
                        .scout
                        .is_some_and(|s| s != scout.id && ctx.is_alive(s))
            })
        })
        .min_by_key(|m| {
            let reserved = ctx.memory.marker(&m.name).is_some_and(|mem| mem.reserved);
            let distance = ctx.world.territory_distance(here, m.pos.territory).unwrap_or(u32::MAX);
            (!reserved, distance, m.name.clone())
        })?;

    let record = ctx.memory.marker_mut(&marker.name);
    record.scout = Some(scout.id);
    record.reserved = false;
    tracing::info!(scout = %scout.id, marker = %marker.name, "scout adopted marker");
    Some(marker.pos)
}

pub fn act(ctx: &mut TickContext<'_>, agent: &UnitView) -> Result<()> {
    let here = agent.pos.territory;
    let record = ctx.memory.require_agent_mut(agent.id)?;
    let entered = record.previous_territory != Some(here);
    record.previous_territory = Some(here);
    let stored = record.scouting_target;
    if entered {
        report_arrival(ctx, agent.id, here);
    }

    let target = match stored {
        Some(target) if target.territory != here => Some(target),
        _ => adopt_marker(ctx, agent),
    };
    if let Some(record) = ctx.memory.agent_mut(agent.id) {
        record.scouting_target = target;
    }
    match target {
        Some(target) => ctx.move_to(agent.id, target),
        None => Ok(()),
    }
}
