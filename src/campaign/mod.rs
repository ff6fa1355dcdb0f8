//! Campaign Manager
//!
//! One [`Operation`] per contested territory drives a three-state machine:
//!
//! ```text
//! NotTracked --hostiles seen--> TrackedIdle --commit--> OffensiveInProgress
//!      ^                            |   ^                     |
//!      +------ dissolved -----------+   +------ retreat ------+
//! ```
//!
//! Commit and retreat use different ratios so an offensive does not flap
//! when the strength balance hovers around a single threshold.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::context::TickContext;
use crate::core::config::{CampaignRules, CombatRules};
use crate::core::error::{CommandError, Result};
use crate::core::types::{AgentId, TerritoryId, Tick};
use crate::world::{Combatant, Command, MarkerKind, MarkerView, StructureKind, World};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CampaignState {
    NotTracked,
    TrackedIdle,
    OffensiveInProgress,
}

/// Tracked offensive against one contested territory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub territory: TerritoryId,
    /// Occupation marker that started the operation
    pub marker: String,
    /// Territories funding and supplying the attackers
    pub attacking_territories: BTreeSet<TerritoryId>,
    pub attackers: BTreeSet<AgentId>,
    pub attack_strength: f32,
    pub defense_strength: f32,
    pub defending_units: usize,
    pub defending_structures: usize,
    pub in_progress: bool,
    pub last_updated: Tick,
}

impl Operation {
    pub fn new(territory: TerritoryId, marker: &str, tick: Tick) -> Self {
        Self {
            territory,
            marker: marker.to_string(),
            attacking_territories: BTreeSet::new(),
            attackers: BTreeSet::new(),
            attack_strength: 0.0,
            defense_strength: 0.0,
            defending_units: 0,
            defending_structures: 0,
            in_progress: false,
            last_updated: tick,
        }
    }

    pub fn state(&self) -> CampaignState {
        if self.in_progress {
            CampaignState::OffensiveInProgress
        } else {
            CampaignState::TrackedIdle
        }
    }

    pub fn is_stale(&self, now: Tick, rules: &CampaignRules) -> bool {
        now.saturating_sub(self.last_updated) > rules.stale_after
    }
}

/// Decision of the commit / retreat evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Commit,
    Retreat,
    Hold,
}

/// Pure commit / retreat rule over an operation snapshot
pub fn evaluate_transition(op: &Operation, rules: &CampaignRules) -> Transition {
    if op.in_progress {
        if op.attack_strength < op.defense_strength * rules.retreat_ratio {
            return Transition::Retreat;
        }
        return Transition::Hold;
    }
    let outnumbered = op.attackers.len() > op.defending_units + op.defending_structures;
    if outnumbered && op.attack_strength >= op.defense_strength * rules.commit_ratio {
        Transition::Commit
    } else {
        Transition::Hold
    }
}

/// A state change made during the campaign pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub territory: TerritoryId,
    pub from: CampaignState,
    pub to: CampaignState,
}

/// Hostile units and destroyable structures still hold the territory
fn is_defended(world: &dyn World, territory: TerritoryId) -> bool {
    !world.hostile_units(territory).is_empty()
        || world
            .hostile_structures(territory)
            .iter()
            .any(|s| s.kind.is_destroyable())
}

/// Snapshot of what defends a territory: (strength, units, structures)
pub fn defense_snapshot(world: &dyn World, territory: TerritoryId, combat: &CombatRules) -> (f32, usize, usize) {
    let units: Vec<_> = world
        .hostile_units(territory)
        .into_iter()
        .filter(|u| u.is_combatant())
        .collect();
    let towers = world
        .hostile_structures(territory)
        .into_iter()
        .filter(|s| s.kind == StructureKind::Tower)
        .count();
    let strength = units.iter().map(|u| u.fighting_strength(combat)).sum::<f32>()
        + towers as f32 * combat.tower_strength();
    (strength, units.len(), towers)
}

/// Re-snapshot attacker roster and strength figures
fn refresh_operation(ctx: &mut TickContext<'_>, territory: TerritoryId) {
    let Some(op) = ctx.memory.operations.get(&territory) else {
        return;
    };
    let marker = op.marker.clone();
    let mut attacking: BTreeSet<TerritoryId> = ctx
        .memory
        .marker(&marker)
        .and_then(|m| m.owner)
        .into_iter()
        .collect();
    attacking.extend(op.attacking_territories.iter().copied());

    let rally = ctx
        .world
        .markers()
        .into_iter()
        .find(|m| m.name == marker)
        .map(|m| m.pos);

    let mut attackers = BTreeSet::new();
    let mut attack_strength = 0.0;
    for unit in ctx.world.my_units() {
        let Some(record) = ctx.memory.agent_mut(unit.id) else {
            continue;
        };
        let eligible = record.role.is_soldier()
            && attacking.contains(&record.home)
            && record.occupation_target.map_or(true, |t| t == territory)
            && unit.is_combatant();
        if !eligible {
            continue;
        }
        record.occupation_target = Some(territory);
        record.occupation_rally = rally;
        attackers.insert(unit.id);
        attack_strength += unit.fighting_strength(&ctx.rules.combat);
    }

    for t in &attacking {
        ctx.memory.territory_mut(*t).occupation_in_progress = true;
    }

    let (defense_strength, defending_units, defending_structures) =
        defense_snapshot(&*ctx.world, territory, &ctx.rules.combat);
    let tick = ctx.tick();
    if let Some(op) = ctx.memory.operations.get_mut(&territory) {
        op.attacking_territories = attacking;
        op.attackers = attackers;
        op.attack_strength = attack_strength;
        op.defense_strength = defense_strength;
        op.defending_units = defending_units;
        op.defending_structures = defending_structures;
        op.last_updated = tick;
        tracing::debug!(
            territory = %territory,
            attackers = op.attackers.len(),
            attack = op.attack_strength,
            defense = op.defense_strength,
            "operation refreshed"
        );
    }
}

/// Dissolve the operation against `territory` and forget every link to it
pub fn stop_occupation(ctx: &mut TickContext<'_>, territory: TerritoryId, remove_marker: Option<&str>) -> Result<()> {
    let op = ctx.memory.operations.remove(&territory);
    for record in ctx.memory.agents.values_mut() {
        if record.occupation_target == Some(territory) {
            record.clear_campaign();
        }
    }
    if let Some(op) = &op {
        for t in &op.attacking_territories {
            ctx.memory.territory_mut(*t).occupation_in_progress = false;
        }
    }
    if let Some(name) = remove_marker {
        match ctx.world.execute(Command::RemoveMarker {
            name: name.to_string(),
        }) {
            Ok(()) | Err(CommandError::InvalidTarget) => {}
            Err(e) => return Err(e.into()),
        }
        ctx.memory.markers.remove(name);
    }
    tracing::info!(territory = %territory, "occupation stopped");
    Ok(())
}

fn set_attack_flags(ctx: &mut TickContext<'_>, territory: TerritoryId, attacking: bool) {
    let attackers = match ctx.memory.operations.get(&territory) {
        Some(op) => op.attackers.clone(),
        None => return,
    };
    for id in attackers {
        if let Some(record) = ctx.memory.agent_mut(id) {
            if record.occupation_target == Some(territory) {
                record.attack_in_progress = attacking;
            }
        }
    }
}

/// Global campaign pass: track, refresh, commit / retreat and dissolve operations
pub fn run(ctx: &mut TickContext<'_>) -> Result<Vec<StateChange>> {
    let mut changes = Vec::new();
    let tick = ctx.tick();
    let occupy: Vec<MarkerView> = ctx
        .world
        .markers()
        .into_iter()
        .filter(|m| m.kind == MarkerKind::Occupy)
        .collect();

    for marker in &occupy {
        let territory = marker.pos.territory;
        let tracked = ctx.memory.operations.contains_key(&territory);
        if !ctx.world.is_visible(territory) {
            if !tracked {
                ctx.memory.marker_mut(&marker.name).scouting_needed = true;
            }
            continue;
        }
        if !is_defended(&*ctx.world, territory) {
            let from = ctx
                .memory
                .operations
                .get(&territory)
                .map_or(CampaignState::NotTracked, |op| op.state());
            stop_occupation(ctx, territory, Some(&marker.name))?;
            if from != CampaignState::NotTracked {
                changes.push(StateChange {
                    territory,
                    from,
                    to: CampaignState::NotTracked,
                });
            }
            continue;
        }
        if !tracked {
            ctx.memory
                .operations
                .insert(territory, Operation::new(territory, &marker.name, tick));
            refresh_operation(ctx, territory);
            tracing::info!(territory = %territory, marker = %marker.name, "operation tracked");
            changes.push(StateChange {
                territory,
                from: CampaignState::NotTracked,
                to: CampaignState::TrackedIdle,
            });
        }
    }

    let orphaned: Vec<(TerritoryId, CampaignState)> = ctx
        .memory
        .operations
        .values()
        .filter(|op| !occupy.iter().any(|m| m.name == op.marker))
        .map(|op| (op.territory, op.state()))
        .collect();
    for (territory, from) in orphaned {
        stop_occupation(ctx, territory, None)?;
        changes.push(StateChange {
            territory,
            from,
            to: CampaignState::NotTracked,
        });
    }

    let tracked: Vec<TerritoryId> = ctx.memory.operations.keys().copied().collect();
    for territory in tracked {
        let Some(op) = ctx.memory.operations.get(&territory) else {
            continue;
        };
        if op.is_stale(tick, &ctx.rules.campaign) {
            if ctx.world.is_visible(territory) {
                refresh_operation(ctx, territory);
            } else {
                let marker = op.marker.clone();
                ctx.memory.marker_mut(&marker).scouting_needed = true;
            }
        }

        let Some(op) = ctx.memory.operations.get(&territory) else {
            continue;
        };
        let from = op.state();
        match evaluate_transition(op, &ctx.rules.campaign) {
            Transition::Commit => {
                if let Some(op) = ctx.memory.operations.get_mut(&territory) {
                    op.in_progress = true;
                }
                set_attack_flags(ctx, territory, true);
                tracing::info!(territory = %territory, "offensive committed");
            }
            Transition::Retreat => {
                set_attack_flags(ctx, territory, false);
                if let Some(op) = ctx.memory.operations.get_mut(&territory) {
                    op.in_progress = false;
                }
                tracing::info!(territory = %territory, "offensive called off");
            }
            Transition::Hold => continue,
        }
        let to = ctx
            .memory
            .operations
            .get(&territory)
            .map_or(CampaignState::NotTracked, |op| op.state());
        changes.push(StateChange { territory, from, to });
    }

    Ok(changes)
}

/// Friendly territory that should fund a marker, by capacity then distance
pub fn choose_owner(ctx: &TickContext<'_>, marker: &MarkerView) -> Option<TerritoryId> {
    let max_distance = ctx.rules.campaign.max_owner_distance;
    ctx.world
        .visible_territories()
        .into_iter()
        .filter_map(|t| ctx.world.territory(t))
        .filter(|view| view.is_mine())
        .filter_map(|view| {
            let distance = ctx.world.territory_distance(view.id, marker.pos.territory)?;
            (distance <= max_distance).then_some((view, distance))
        })
        .min_by_key(|(view, distance)| (std::cmp::Reverse(view.energy_capacity), *distance, view.id))
        .map(|(view, _)| view.id)
}

/// Marker upkeep: drop stale records, retire fulfilled claims, assign owners
pub fn bookkeep_markers(ctx: &mut TickContext<'_>) -> Result<()> {
    let markers = ctx.world.markers();

    let stale: Vec<String> = ctx
        .memory
        .markers
        .keys()
        .filter(|name| !markers.iter().any(|m| &m.name == *name))
        .cloned()
        .collect();
    for name in stale {
        tracing::debug!(marker = %name, "dropped memory of removed marker");
        ctx.memory.markers.remove(&name);
    }

    for marker in &markers {
        if marker.kind == MarkerKind::Claim {
            let claimed = ctx
                .world
                .territory(marker.pos.territory)
                .is_some_and(|view| view.is_mine());
            if claimed {
                match ctx.world.execute(Command::RemoveMarker {
                    name: marker.name.clone(),
                }) {
                    Ok(()) | Err(CommandError::InvalidTarget) => {}
                    Err(e) => return Err(e.into()),
                }
                ctx.memory.markers.remove(&marker.name);
                tracing::info!(marker = %marker.name, territory = %marker.pos.territory, "claim fulfilled");
                continue;
            }
        }

        if marker.kind == MarkerKind::Rally {
            continue;
        }
        let unowned = ctx.memory.marker(&marker.name).map_or(true, |m| m.owner.is_none());
        if unowned {
            if let Some(owner) = choose_owner(ctx, marker) {
                ctx.memory.marker_mut(&marker.name).owner = Some(owner);
                tracing::info!(marker = %marker.name, owner = %owner, "marker assigned");
            }
        }
    }
    Ok(())
}
