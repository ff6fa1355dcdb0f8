//! Transport agent

use crate::context::TickContext;
use crate::core::error::Result;
use crate::core::types::{AgentId, Position};
use crate::logistics;
use crate::memory::WorkMode;
use crate::roles::Role;
use crate::world::UnitView;

fn switch_mode(ctx: &mut TickContext<'_>, carrier: AgentId, mode: WorkMode) -> Result<()> {
    let record = ctx.memory.require_agent_mut(carrier)?;
    if record.mode == mode {
        return Ok(());
    }
    record.mode = mode;
    match mode {
        WorkMode::Delivering => {
            record.energy_pile = None;
            record.pickup = None;
            record.attached_miner = None;
        }
        _ => record.drop_off = None,
    }
    Ok(())
}

pub fn act(ctx: &mut TickContext<'_>, agent: &UnitView) -> Result<()> {
    logistics::pickup_adjacent_piles(ctx, agent);

    let share = ctx
        .world
        .my_unit(agent.id)
        .is_some_and(|u| u.energy >= ctx.rules.logistics.handover_threshold)
        && logistics::can_share_energy(ctx, agent.pos.territory);
    if share {
        logistics::hand_over_to_adjacent(ctx, agent.id, &[Role::Builder]);
    }

    let Some(agent) = ctx.world.my_unit(agent.id) else {
        return Ok(());
    };
    let expiring = agent
        .ticks_to_live
        .is_some_and(|ttl| ttl < ctx.rules.logistics.carrier_return_ttl);
    if agent.is_full() || (expiring && agent.energy > 0) {
        switch_mode(ctx, agent.id, WorkMode::Delivering)?;
    } else if agent.energy == 0 {
        switch_mode(ctx, agent.id, WorkMode::Collecting)?;
    }

    if ctx.memory.require_agent(agent.id)?.mode == WorkMode::Delivering {
        return logistics::deliver_energy(ctx, &agent);
    }

    match logistics::find_pickup(ctx, &agent) {
        Some(pickup) => {
            logistics::collect_from(ctx, &agent, &pickup)?;
        }
        None => {
            let home = ctx.memory.require_agent(agent.id)?.home;
            if agent.pos.territory != home {
                ctx.move_to(agent.id, Position::center(home))?;
            }
        }
    }
    Ok(())
}
