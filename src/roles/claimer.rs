//! Territory claim agent

use crate::context::TickContext;
use crate::core::error::{CommandError, Result};
use crate::core::types::{AgentId, Position, TerritoryId};
use crate::world::{Command, ControllerView, MarkerKind, MarkerView, Owner, UnitView};

fn claim_markers(ctx: &TickContext<'_>) -> Vec<MarkerView> {
    ctx.world
        .markers()
        .into_iter()
        .filter(|m| m.kind == MarkerKind::Claim)
        .collect()
}

/// Territory this claimer works on: memory first, then claim markers nearby
fn resolve_target(ctx: &mut TickContext<'_>, claimer: &UnitView) -> Option<TerritoryId> {
    let markers = claim_markers(ctx);
    let stored = ctx.memory.agent(claimer.id).and_then(|m| m.claim_target);
    if let Some(target) = stored {
        let still_wanted = !ctx.world.is_visible(target) || markers.iter().any(|m| m.pos.territory == target);
        if still_wanted {
            return Some(target);
        }
    }

    let here = claimer.pos.territory;
    let adjacent = ctx.world.adjacent_territories(here);
    let chosen = markers
        .iter()
        .find(|m| m.pos.territory == here)
        .or_else(|| markers.iter().find(|m| adjacent.contains(&m.pos.territory)))
        .or_else(|| {
            markers
                .iter()
                .filter_map(|m| {
                    ctx.world
                        .territory_distance(here, m.pos.territory)
                        .map(|d| (d, m))
                })
                .min_by_key(|(d, m)| (*d, m.name.clone()))
                .map(|(_, m)| m)
        })
        .map(|m| m.pos.territory);

    if chosen != stored {
        tracing::info!(claimer = %claimer.id, target = ?chosen, "claimer retargeted");
    }
    if let Some(record) = ctx.memory.agent_mut(claimer.id) {
        record.claim_target = chosen;
    }
    chosen
}

fn owned_territories(ctx: &TickContext<'_>) -> usize {
    ctx.world
        .visible_territories()
        .into_iter()
        .filter(|t| ctx.world.territory(*t).is_some_and(|v| v.is_mine()))
        .count()
}

fn remove_claim_markers(ctx: &mut TickContext<'_>, territory: TerritoryId) -> Result<()> {
    for marker in claim_markers(ctx) {
        if marker.pos.territory != territory {
            continue;
        }
        match ctx.world.execute(Command::RemoveMarker { name: marker.name.clone() }) {
            Ok(()) => tracing::info!(marker = %marker.name, territory = %territory, "claim fulfilled"),
            Err(CommandError::InvalidTarget) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// The controller command fitting the controller's ownership and reservation
fn controller_command(ctx: &TickContext<'_>, claimer: &UnitView, controller: &ControllerView) -> Option<Command> {
    let agent = claimer.id;
    let target = controller.id;
    match controller.owner {
        Owner::Mine => None,
        Owner::Hostile => claimer.can_claim().then_some(Command::AttackController {
            agent,
            controller: target,
        }),
        Owner::Neutral => match controller.reserved_by {
            Some(Owner::Hostile) => claimer.can_claim().then_some(Command::AttackController {
                agent,
                controller: target,
            }),
            reservation => {
                let room = owned_territories(ctx) < ctx.world.owned_territory_limit();
                if room {
                    Some(Command::Claim {
                        agent,
                        controller: target,
                    })
                } else if reservation.is_none() || reservation == Some(Owner::Mine) {
                    Some(Command::Reserve {
                        agent,
                        controller: target,
                    })
                } else {
                    None
                }
            }
        },
    }
}

fn go_home(ctx: &mut TickContext<'_>, claimer: AgentId, at: &Position) -> Result<()> {
    let home = ctx.memory.require_agent(claimer)?.home;
    if at.territory != home {
        ctx.move_to(claimer, Position::center(home))?;
    }
    Ok(())
}

pub fn act(ctx: &mut TickContext<'_>, agent: &UnitView) -> Result<()> {
    let Some(target) = resolve_target(ctx, agent) else {
        return go_home(ctx, agent.id, &agent.pos);
    };
    if agent.pos.territory != target {
        return ctx.move_to(agent.id, Position::center(target));
    }

    let Some(controller) = ctx.world.territory(target).and_then(|t| t.controller) else {
        tracing::debug!(claimer = %agent.id, territory = %target, "no controller to claim");
        return Ok(());
    };
    if controller.is_mine() {
        return remove_claim_markers(ctx, target);
    }
    if !agent.pos.is_near_to(&controller.pos) {
        return ctx.move_to(agent.id, controller.pos);
    }

    let Some(command) = controller_command(ctx, agent, &controller) else {
        return Ok(());
    };
    let claiming = matches!(command, Command::Claim { .. });
    match ctx.world.execute(command) {
        Ok(()) if claiming => {
            tracing::info!(claimer = %agent.id, territory = %target, "territory claimed");
            remove_claim_markers(ctx, target)
        }
        Ok(()) | Err(CommandError::NotEnoughResources) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyPart;
    use crate::core::config::Ruleset;
    use crate::core::types::ObjectId;
    use crate::memory::{AgentMemory, MemoryStore};
    use crate::roles::Role;
    use crate::world::{SimWorld, World};

    const HOME: TerritoryId = TerritoryId(1);
    const TARGET: TerritoryId = TerritoryId(2);

    struct Setup {
        world: SimWorld,
        memory: MemoryStore,
        rules: Ruleset,
        claimer: AgentId,
        controller: ObjectId,
    }

    fn setup(at: Position, limit: usize) -> Setup {
        let mut world = SimWorld::new();
        world.add_controller(HOME, Owner::Mine, 3);
        let controller = world.add_controller(TARGET, Owner::Neutral, 0);
        world.connect(HOME, TARGET);
        world.set_owned_territory_limit(limit);
        world.add_marker("claim-2", MarkerKind::Claim, Position::new(TARGET, 20, 20));
        let claimer = world.add_unit(Owner::Mine, "claimer", at, &[BodyPart::Claim, BodyPart::Move]);
        let mut memory = MemoryStore::new();
        memory.agents.insert(claimer, AgentMemory::new(Role::Claimer, HOME));
        Setup {
            world,
            memory,
            rules: Ruleset::default(),
            claimer,
            controller,
        }
    }

    fn step(s: &mut Setup) {
        let view = s.world.my_unit(s.claimer).unwrap();
        let mut ctx = TickContext::new(&mut s.world, &mut s.memory, &s.rules);
        act(&mut ctx, &view).unwrap();
        s.world.advance();
    }

    #[test]
    fn test_heads_for_marked_territory() {
        let mut s = setup(Position::new(HOME, 10, 10), 2);
        step(&mut s);
        assert_eq!(s.memory.agent(s.claimer).unwrap().claim_target, Some(TARGET));
        assert_eq!(s.world.unit(s.claimer).unwrap().pos, Position::center(TARGET));
    }

    #[test]
    fn test_claims_and_removes_marker() {
        let mut s = setup(Position::new(TARGET, 24, 25), 2);
        step(&mut s);
        let controller = s.world.objects().controllers[&s.controller].clone();
        assert_eq!(controller.owner, Owner::Mine);
        assert!(s.world.markers().is_empty());
    }

    #[test]
    fn test_reserves_at_territory_limit() {
        let mut s = setup(Position::new(TARGET, 24, 25), 1);
        step(&mut s);
        let controller = s.world.objects().controllers[&s.controller].clone();
        assert_eq!(controller.owner, Owner::Neutral);
        assert_eq!(controller.reserved_by, Some(Owner::Mine));
        assert_eq!(s.world.markers().len(), 1);
    }

    #[test]
    fn test_attacks_foreign_reservation() {
        let mut s = setup(Position::new(TARGET, 24, 25), 2);
        s.world.controller_mut(s.controller).unwrap().reserved_by = Some(Owner::Hostile);
        step(&mut s);
        let controller = s.world.objects().controllers[&s.controller].clone();
        assert_eq!(controller.reserved_by, None);
        assert_eq!(controller.owner, Owner::Neutral);
    }
}
