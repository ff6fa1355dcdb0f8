//! Combat agents: melee fighters and medics
//!
//! Soldiers defend their home territory by default. Once the Campaign
//! Manager flags an offensive on an agent's memory, the agent walks to the
//! rally point and fights there instead.

use crate::context::TickContext;
use crate::core::error::{CommandError, Result, SwarmError};
use crate::core::types::{AgentId, ObjectId, Position, TerritoryId};
use crate::roles::Role;
use crate::world::{Combatant, Command, StructureKind, UnitView};

fn rally_point(ctx: &TickContext<'_>, agent: AgentId) -> Option<Position> {
    let record = ctx.memory.agent(agent)?;
    if record.attack_in_progress {
        record.occupation_rally
    } else {
        None
    }
}

fn home_spawn(ctx: &TickContext<'_>, home: TerritoryId, from: &Position) -> Option<Position> {
    ctx.world
        .my_structures_of(home, StructureKind::Spawn)
        .into_iter()
        .min_by_key(|s| (from.range_or(&s.pos, u32::MAX), s.id))
        .map(|s| s.pos)
}

/// Stay within `range` of the home spawn, walking home first if needed
fn idle_near_spawn(ctx: &mut TickContext<'_>, agent: &UnitView, range: u32) -> Result<()> {
    let home = ctx.memory.require_agent(agent.id)?.home;
    if agent.pos.territory != home {
        return ctx.move_to(agent.id, Position::center(home));
    }
    match home_spawn(ctx, home, &agent.pos) {
        Some(spawn) if !agent.pos.in_range(&spawn, range) => ctx.move_to(agent.id, spawn),
        _ => Ok(()),
    }
}

/// Closest hostile unit, or failing that a destroyable hostile structure
fn closest_enemy(ctx: &TickContext<'_>, agent: &UnitView, range: u32) -> Option<(ObjectId, Position)> {
    let territory = agent.pos.territory;
    let unit = ctx
        .world
        .hostile_units(territory)
        .into_iter()
        .filter(|u| agent.pos.in_range(&u.pos, range))
        .min_by_key(|u| (agent.pos.range_or(&u.pos, u32::MAX), u.id))
        .map(|u| (u.id, u.pos));
    unit.or_else(|| {
        ctx.world
            .hostile_structures(territory)
            .into_iter()
            .filter(|s| s.kind.is_destroyable() && agent.pos.in_range(&s.pos, range))
            .min_by_key(|s| (agent.pos.range_or(&s.pos, u32::MAX), s.id))
            .map(|s| (s.id, s.pos))
    })
}

fn engage(ctx: &mut TickContext<'_>, agent: &UnitView, target: ObjectId, pos: Position) -> Result<()> {
    let command = Command::Attack {
        actor: agent.id,
        target,
    };
    match ctx.act_or_approach(agent.id, command, pos) {
        Ok(_) => Ok(()),
        Err(SwarmError::Command(CommandError::InvalidTarget)) => Ok(()),
        Err(e) => Err(e),
    }
}

fn retreat(ctx: &mut TickContext<'_>, agent: &UnitView) -> Result<()> {
    let medic = ctx
        .agents_in(agent.pos.territory, Role::Medic)
        .into_iter()
        .min_by_key(|m| (agent.pos.range_or(&m.pos, u32::MAX), m.id))
        .map(|m| m.pos);
    let home = ctx.memory.require_agent(agent.id)?.home;
    let shelter = medic
        .or_else(|| home_spawn(ctx, home, &agent.pos))
        .unwrap_or_else(|| Position::center(home));
    tracing::debug!(agent = %agent.id, to = ?shelter, "retreating with broken weapons");
    if agent.pos.is_near_to(&shelter) {
        return Ok(());
    }
    ctx.move_to(agent.id, shelter)
}

pub fn act_melee(ctx: &mut TickContext<'_>, agent: &UnitView) -> Result<()> {
    if !agent.can_attack() {
        return retreat(ctx, agent);
    }
    let engage_range = ctx.rules.campaign.engage_range;

    if let Some(rally) = rally_point(ctx, agent.id) {
        if agent.pos.territory == rally.territory {
            if let Some((target, pos)) = closest_enemy(ctx, agent, engage_range) {
                return engage(ctx, agent, target, pos);
            }
        }
        if agent.pos != rally {
            return ctx.move_to(agent.id, rally);
        }
        return Ok(());
    }

    let idle_range = ctx.rules.campaign.melee_idle_range;
    match closest_enemy(ctx, agent, engage_range) {
        Some((target, pos)) => engage(ctx, agent, target, pos),
        None => idle_near_spawn(ctx, agent, idle_range),
    }
}

pub fn act_medic(ctx: &mut TickContext<'_>, agent: &UnitView) -> Result<()> {
    let patient = ctx
        .world
        .my_units_in(agent.pos.territory)
        .into_iter()
        .filter(|u| u.hits < u.hits_max)
        .min_by(|a, b| {
            a.health_fraction()
                .total_cmp(&b.health_fraction())
                .then(agent.pos.range_or(&a.pos, u32::MAX).cmp(&agent.pos.range_or(&b.pos, u32::MAX)))
                .then(a.id.cmp(&b.id))
        });

    if let Some(patient) = patient {
        if agent.can_heal() {
            let command = Command::Heal {
                actor: agent.id,
                target: patient.id,
            };
            ctx.act_or_approach(agent.id, command, patient.pos)?;
            return Ok(());
        }
    }

    let idle_range = ctx.rules.campaign.medic_idle_range;
    match rally_point(ctx, agent.id) {
        Some(rally) if !agent.pos.in_range(&rally, idle_range) => ctx.move_to(agent.id, rally),
        Some(_) => Ok(()),
        None => idle_near_spawn(ctx, agent, idle_range),
    }
}
