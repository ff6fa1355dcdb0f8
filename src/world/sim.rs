//! Deterministic in-memory host simulation
//!
//! `SimWorld` implements [`World`] closely enough to drive the decision core
//! in tests and in the `swarm_sim` binary. It models the mechanics the core
//! relies on (ranges, energy flow, production, construction, damage and
//! territory control) and nothing else: there is no terrain, and units
//! crossing a border arrive at the center of the next territory.

use std::collections::{BTreeMap, VecDeque};

use ahash::AHashMap;

use crate::body::{Body, BodyPart};
use crate::core::config::Ruleset;
use crate::core::error::CommandError;
use crate::core::types::{AgentId, ObjectId, Position, TerritoryId, Tick, TERRITORY_SIZE};
use crate::world::objects::{build_cost, initial_hits, structure_stats, SimObjects};
use crate::world::{
    Command, ControllerView, MarkerKind, MarkerView, ObjectView, Owner, PileView, Segment,
    SiteView, SourceView, StructureKind, StructureView, TerritoryView, UnitView, World,
    SEGMENT_HITS,
};

/// Production time of one body segment
pub const SPAWN_TICKS_PER_PART: u32 = 3;
/// Resource nodes refill on this period
pub const SOURCE_REGEN_TICKS: u64 = 300;
pub const SOURCE_CAPACITY: u32 = 3_000;
/// Production points trickle energy back up to this amount
const SPAWN_REGEN_CAP: u32 = 300;
/// Controller ticks removed per claim part by an attack on the controller
const CONTROLLER_ATTACK_TICKS: u32 = 300;

#[derive(Debug, Clone, Default)]
struct SimTerritory {
    adjacent: Vec<TerritoryId>,
    revealed: bool,
}

#[derive(Debug, Clone, Copy)]
struct Production {
    agent: AgentId,
    remaining: u32,
}

/// In-memory world used by tests and the simulation binary
#[derive(Debug)]
pub struct SimWorld {
    tick: Tick,
    rules: Ruleset,
    objects: SimObjects,
    territories: BTreeMap<TerritoryId, SimTerritory>,
    markers: Vec<MarkerView>,
    owned_limit: usize,
    production: AHashMap<ObjectId, Production>,
    /// Every command that succeeded, in order
    pub command_log: Vec<Command>,
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl SimWorld {
    pub fn new() -> Self {
        Self::with_rules(Ruleset::default())
    }

    /// World whose mechanics (part costs, powers, lifetimes) follow `rules`
    pub fn with_rules(rules: Ruleset) -> Self {
        Self {
            tick: 0,
            rules,
            objects: SimObjects::new(),
            territories: BTreeMap::new(),
            markers: Vec::new(),
            owned_limit: 1,
            production: AHashMap::new(),
            command_log: Vec::new(),
        }
    }

    pub fn rules(&self) -> &Ruleset {
        &self.rules
    }

    pub fn objects(&self) -> &SimObjects {
        &self.objects
    }

    // === Scenario building ===

    pub fn add_territory(&mut self, id: TerritoryId) {
        self.territories.entry(id).or_default();
    }

    /// Make two territories adjacent (both directions)
    pub fn connect(&mut self, a: TerritoryId, b: TerritoryId) {
        self.add_territory(a);
        self.add_territory(b);
        for (from, to) in [(a, b), (b, a)] {
            if let Some(t) = self.territories.get_mut(&from) {
                if !t.adjacent.contains(&to) {
                    t.adjacent.push(to);
                }
            }
        }
    }

    /// Grant permanent visibility of a territory
    pub fn reveal(&mut self, id: TerritoryId) {
        self.territories.entry(id).or_default().revealed = true;
    }

    pub fn set_owned_territory_limit(&mut self, limit: usize) {
        self.owned_limit = limit;
    }

    pub fn add_controller(&mut self, territory: TerritoryId, owner: Owner, level: u8) -> ObjectId {
        self.add_territory(territory);
        let id = self.objects.allocate_id();
        let ticks_to_downgrade = self.rules.controller_downgrade(level);
        self.objects.controllers.insert(
            id,
            ControllerView {
                id,
                pos: Position::center(territory),
                owner,
                level,
                ticks_to_downgrade,
                reserved_by: None,
            },
        );
        id
    }

    pub fn add_structure(&mut self, kind: StructureKind, owner: Owner, pos: Position) -> ObjectId {
        self.add_territory(pos.territory);
        let id = self.objects.allocate_id();
        let (hits_max, energy_capacity) = structure_stats(kind);
        self.objects.structures.insert(
            id,
            StructureView {
                id,
                kind,
                owner,
                pos,
                hits: hits_max,
                hits_max,
                energy: 0,
                energy_capacity,
                busy: false,
            },
        );
        id
    }

    pub fn add_source(&mut self, pos: Position) -> ObjectId {
        self.add_territory(pos.territory);
        let id = self.objects.allocate_id();
        self.objects.sources.insert(
            id,
            SourceView {
                id,
                pos,
                energy: SOURCE_CAPACITY,
                energy_capacity: SOURCE_CAPACITY,
            },
        );
        id
    }

    pub fn add_site(&mut self, kind: StructureKind, pos: Position) -> ObjectId {
        self.add_territory(pos.territory);
        let id = self.objects.allocate_id();
        self.objects.sites.insert(
            id,
            SiteView {
                id,
                pos,
                kind,
                progress: 0,
                progress_total: build_cost(kind),
            },
        );
        id
    }

    pub fn add_pile(&mut self, pos: Position, amount: u32) -> ObjectId {
        self.add_territory(pos.territory);
        self.drop_energy(pos, amount)
    }

    /// Add a fully grown unit with a fresh lifetime
    pub fn add_unit(&mut self, owner: Owner, name: &str, pos: Position, parts: &[BodyPart]) -> ObjectId {
        self.add_territory(pos.territory);
        let id = self.objects.allocate_id();
        let mut unit = self.new_unit(id, owner, name, pos, parts);
        unit.ticks_to_live = Some(self.rules.lifecycle.agent_lifetime);
        self.objects.units.insert(id, unit);
        id
    }

    pub fn add_marker(&mut self, name: &str, kind: MarkerKind, pos: Position) {
        self.add_territory(pos.territory);
        self.markers.push(MarkerView {
            name: name.to_string(),
            kind,
            pos,
        });
    }

    pub fn unit_mut(&mut self, id: ObjectId) -> Option<&mut UnitView> {
        self.objects.units.get_mut(&id)
    }

    pub fn structure_mut(&mut self, id: ObjectId) -> Option<&mut StructureView> {
        self.objects.structures.get_mut(&id)
    }

    pub fn controller_mut(&mut self, id: ObjectId) -> Option<&mut ControllerView> {
        self.objects.controllers.get_mut(&id)
    }

    pub fn site_mut(&mut self, id: ObjectId) -> Option<&mut SiteView> {
        self.objects.sites.get_mut(&id)
    }

    /// Remove an object outright (death, destruction, depletion)
    pub fn kill(&mut self, id: ObjectId) -> bool {
        self.production.retain(|_, p| p.agent != id);
        self.objects.remove(id)
    }

    /// Set a unit's hit points and damage its segments to match
    pub fn set_unit_hits(&mut self, id: ObjectId, hits: u32) {
        if let Some(unit) = self.objects.units.get_mut(&id) {
            unit.hits = hits.min(unit.hits_max);
            sync_segments(unit);
        }
    }

    // === Time ===

    /// Move the world forward one tick
    pub fn advance(&mut self) {
        self.tick += 1;

        let mut expired = Vec::new();
        for unit in self.objects.units.values_mut() {
            unit.fatigue = 0;
            if unit.spawning {
                continue;
            }
            if let Some(ttl) = unit.ticks_to_live.as_mut() {
                *ttl = ttl.saturating_sub(1);
                if *ttl == 0 {
                    expired.push(unit.id);
                }
            }
        }
        for id in expired {
            tracing::debug!(unit = %id, "unit expired");
            self.kill(id);
        }

        self.progress_production();

        if self.tick % SOURCE_REGEN_TICKS == 0 {
            for source in self.objects.sources.values_mut() {
                source.energy = source.energy_capacity;
            }
        }

        for structure in self.objects.structures.values_mut() {
            if structure.kind == StructureKind::Spawn && structure.energy < SPAWN_REGEN_CAP {
                structure.energy += 1;
            }
        }

        let downgrade = self.rules.tasks.controller_downgrade.clone();
        for controller in self.objects.controllers.values_mut() {
            if controller.owner == Owner::Neutral {
                continue;
            }
            controller.ticks_to_downgrade = controller.ticks_to_downgrade.saturating_sub(1);
            if controller.ticks_to_downgrade == 0 {
                downgrade_controller(controller, &downgrade);
            }
        }
    }

    fn progress_production(&mut self) {
        let mut finished = Vec::new();
        for (spawn, production) in self.production.iter_mut() {
            production.remaining = production.remaining.saturating_sub(1);
            if production.remaining == 0 {
                finished.push((*spawn, production.agent));
            }
        }
        finished.sort();
        let lifetime = self.rules.lifecycle.agent_lifetime;
        for (spawn, agent) in finished {
            self.production.remove(&spawn);
            let spawn_pos = match self.objects.structures.get_mut(&spawn) {
                Some(s) => {
                    s.busy = false;
                    Some(s.pos)
                }
                None => None,
            };
            if let Some(unit) = self.objects.units.get_mut(&agent) {
                unit.spawning = false;
                unit.ticks_to_live = Some(lifetime);
                if let Some(exit) = spawn_pos.and_then(|p| p.neighbors().next()) {
                    unit.pos = exit;
                }
            }
        }
    }

    // === Internals ===

    fn new_unit(&self, id: ObjectId, owner: Owner, name: &str, pos: Position, parts: &[BodyPart]) -> UnitView {
        let body: Vec<Segment> = parts
            .iter()
            .map(|&part| Segment {
                part,
                hits: SEGMENT_HITS,
            })
            .collect();
        let hits_max = SEGMENT_HITS * body.len() as u32;
        let carry_parts = parts.iter().filter(|p| **p == BodyPart::Carry).count() as u32;
        UnitView {
            id,
            name: name.to_string(),
            owner,
            pos,
            body,
            hits: hits_max,
            hits_max,
            energy: 0,
            carry_capacity: carry_parts * self.rules.body.carry_capacity_per_part,
            ticks_to_live: None,
            fatigue: 0,
            spawning: false,
        }
    }

    fn is_territory_visible(&self, id: TerritoryId) -> bool {
        let Some(territory) = self.territories.get(&id) else {
            return false;
        };
        territory.revealed
            || self
                .objects
                .controller_in(id)
                .is_some_and(|c| c.owner == Owner::Mine)
            || self
                .objects
                .units
                .values()
                .any(|u| u.owner == Owner::Mine && u.pos.territory == id)
            || self
                .objects
                .structures
                .values()
                .any(|s| s.owner == Owner::Mine && s.pos.territory == id)
    }

    /// Territories on the shortest route, both ends included
    fn route(&self, from: TerritoryId, to: TerritoryId) -> Option<Vec<TerritoryId>> {
        if !self.territories.contains_key(&from) || !self.territories.contains_key(&to) {
            return None;
        }
        let mut previous: BTreeMap<TerritoryId, TerritoryId> = BTreeMap::new();
        let mut queue = VecDeque::from([from]);
        previous.insert(from, from);
        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut route = vec![to];
                let mut at = to;
                while at != from {
                    at = previous[&at];
                    route.push(at);
                }
                route.reverse();
                return Some(route);
            }
            for next in self.adjacent_territories(current) {
                if !previous.contains_key(&next) {
                    previous.insert(next, current);
                    queue.push_back(next);
                }
            }
        }
        None
    }

    fn agent(&self, id: AgentId) -> Result<&UnitView, CommandError> {
        let unit = self.objects.units.get(&id).ok_or(CommandError::InvalidTarget)?;
        if unit.owner != Owner::Mine {
            return Err(CommandError::NotOwner);
        }
        if unit.spawning {
            return Err(CommandError::Busy);
        }
        Ok(unit)
    }

    fn agent_with(&self, id: AgentId, part: BodyPart) -> Result<UnitView, CommandError> {
        let unit = self.agent(id)?;
        if unit.active_parts(part) == 0 {
            return Err(CommandError::NoBodypart);
        }
        Ok(unit.clone())
    }

    fn owned_controllers(&self) -> usize {
        self.objects
            .controllers
            .values()
            .filter(|c| c.owner == Owner::Mine)
            .count()
    }

    fn production_energy(&self, territory: TerritoryId) -> (u32, u32) {
        self.objects
            .structures_in(territory)
            .into_iter()
            .filter(|s| s.owner == Owner::Mine && s.kind.is_production())
            .fold((0, 0), |(energy, capacity), s| {
                (energy + s.energy, capacity + s.energy_capacity)
            })
    }

    /// Pay from production structures, spawns first
    fn spend_energy(&mut self, territory: TerritoryId, amount: u32) -> Result<(), CommandError> {
        if self.production_energy(territory).0 < amount {
            return Err(CommandError::NotEnoughResources);
        }
        let mut payers: Vec<(bool, ObjectId)> = self
            .objects
            .structures_in(territory)
            .into_iter()
            .filter(|s| s.owner == Owner::Mine && s.kind.is_production())
            .map(|s| (s.kind != StructureKind::Spawn, s.id))
            .collect();
        payers.sort();
        let mut owed = amount;
        for (_, id) in payers {
            if owed == 0 {
                break;
            }
            if let Some(s) = self.objects.structures.get_mut(&id) {
                let paid = s.energy.min(owed);
                s.energy -= paid;
                owed -= paid;
            }
        }
        Ok(())
    }

    fn drop_energy(&mut self, pos: Position, amount: u32) -> ObjectId {
        if let Some(id) = self.objects.pile_at(&pos) {
            if let Some(pile) = self.objects.piles.get_mut(&id) {
                pile.amount += amount;
            }
            return id;
        }
        let id = self.objects.allocate_id();
        self.objects.piles.insert(id, PileView { id, pos, amount });
        id
    }

    /// Tower effect at range, full up close and falling off linearly
    fn tower_effect(&self, range: u32) -> u32 {
        let combat = &self.rules.combat;
        let falloff = if range <= 5 {
            0.0
        } else if range >= 20 {
            combat.tower_falloff
        } else {
            combat.tower_falloff * (range - 5) as f32 / 15.0
        };
        (combat.tower_power_attack * (1.0 - falloff)) as u32
    }

    /// A tower able to act on `target`; returns its effect
    fn tower_shot(&mut self, tower: ObjectId, target: &Position) -> Result<u32, CommandError> {
        let cost = self.rules.combat.tower_energy_cost;
        let structure = self
            .objects
            .structures
            .get(&tower)
            .ok_or(CommandError::InvalidTarget)?;
        if structure.kind != StructureKind::Tower {
            return Err(CommandError::NoBodypart);
        }
        if structure.owner != Owner::Mine {
            return Err(CommandError::NotOwner);
        }
        if structure.energy < cost {
            return Err(CommandError::NotEnoughResources);
        }
        let range = structure
            .pos
            .range_to(target)
            .ok_or(CommandError::NotInRange)?;
        let effect = self.tower_effect(range);
        if let Some(s) = self.objects.structures.get_mut(&tower) {
            s.energy -= cost;
        }
        Ok(effect)
    }

    fn damage(&mut self, target: ObjectId, amount: u32) -> Result<(), CommandError> {
        if let Some(unit) = self.objects.units.get_mut(&target) {
            unit.hits = unit.hits.saturating_sub(amount);
            sync_segments(unit);
            if unit.hits == 0 {
                tracing::debug!(unit = %target, "unit destroyed");
                self.kill(target);
            }
            return Ok(());
        }
        if let Some(structure) = self.objects.structures.get_mut(&target) {
            structure.hits = structure.hits.saturating_sub(amount);
            if structure.hits == 0 {
                tracing::debug!(structure = %target, "structure destroyed");
                self.kill(target);
            }
            return Ok(());
        }
        Err(CommandError::InvalidTarget)
    }

    fn run(&mut self, command: &Command) -> Result<(), CommandError> {
        match *command {
            Command::Move { agent, to } => {
                let unit = self.agent_with(agent, BodyPart::Move)?;
                if unit.fatigue > 0 {
                    return Err(CommandError::Busy);
                }
                let next = if to.territory == unit.pos.territory {
                    unit.pos.step_toward(&to)
                } else {
                    let route = self
                        .route(unit.pos.territory, to.territory)
                        .ok_or(CommandError::InvalidTarget)?;
                    Position::center(route[1])
                };
                if let Some(u) = self.objects.units.get_mut(&agent) {
                    u.pos = next;
                    u.fatigue = 1;
                }
                Ok(())
            }
            Command::Harvest { agent, source } => {
                let unit = self.agent_with(agent, BodyPart::Work)?;
                let node = self
                    .objects
                    .sources
                    .get(&source)
                    .ok_or(CommandError::InvalidTarget)?;
                if !unit.pos.is_near_to(&node.pos) {
                    return Err(CommandError::NotInRange);
                }
                if node.energy == 0 {
                    return Err(CommandError::NotEnoughResources);
                }
                let power = unit.active_parts(BodyPart::Work) as u32 * self.rules.combat.harvest_power;
                let harvested = power.min(node.energy);
                let kept = harvested.min(unit.free_capacity());
                if let Some(node) = self.objects.sources.get_mut(&source) {
                    node.energy -= harvested;
                }
                if let Some(u) = self.objects.units.get_mut(&agent) {
                    u.energy += kept;
                }
                if harvested > kept {
                    self.drop_energy(unit.pos, harvested - kept);
                }
                Ok(())
            }
            Command::Transfer { agent, to } => {
                let unit = self.agent(agent)?.clone();
                if unit.energy == 0 {
                    return Err(CommandError::NotEnoughResources);
                }
                let (pos, free) = match self.objects.get(to) {
                    Some(ObjectView::Unit(u)) if u.owner == Owner::Mine && u.id != agent => {
                        (u.pos, u.free_capacity())
                    }
                    Some(ObjectView::Structure(s)) if s.is_friendly_or_neutral() => {
                        (s.pos, s.free_capacity())
                    }
                    _ => return Err(CommandError::InvalidTarget),
                };
                if !unit.pos.is_near_to(&pos) {
                    return Err(CommandError::NotInRange);
                }
                if free == 0 {
                    return Err(CommandError::Full);
                }
                let amount = unit.energy.min(free);
                if let Some(u) = self.objects.units.get_mut(&to) {
                    u.energy += amount;
                } else if let Some(s) = self.objects.structures.get_mut(&to) {
                    s.energy += amount;
                }
                if let Some(u) = self.objects.units.get_mut(&agent) {
                    u.energy -= amount;
                }
                Ok(())
            }
            Command::Withdraw { agent, from } => {
                let unit = self.agent(agent)?.clone();
                let store = self
                    .objects
                    .structures
                    .get(&from)
                    .filter(|s| s.is_friendly_or_neutral())
                    .ok_or(CommandError::InvalidTarget)?;
                if !unit.pos.is_near_to(&store.pos) {
                    return Err(CommandError::NotInRange);
                }
                if store.energy == 0 {
                    return Err(CommandError::NotEnoughResources);
                }
                if unit.free_capacity() == 0 {
                    return Err(CommandError::Full);
                }
                let amount = store.energy.min(unit.free_capacity());
                if let Some(s) = self.objects.structures.get_mut(&from) {
                    s.energy -= amount;
                }
                if let Some(u) = self.objects.units.get_mut(&agent) {
                    u.energy += amount;
                }
                Ok(())
            }
            Command::Pickup { agent, pile } => {
                let unit = self.agent(agent)?.clone();
                let heap = self
                    .objects
                    .piles
                    .get(&pile)
                    .ok_or(CommandError::InvalidTarget)?;
                if !unit.pos.is_near_to(&heap.pos) {
                    return Err(CommandError::NotInRange);
                }
                if unit.free_capacity() == 0 {
                    return Err(CommandError::Full);
                }
                let amount = heap.amount.min(unit.free_capacity());
                let left = heap.amount - amount;
                if left == 0 {
                    self.objects.piles.remove(&pile);
                } else if let Some(p) = self.objects.piles.get_mut(&pile) {
                    p.amount = left;
                }
                if let Some(u) = self.objects.units.get_mut(&agent) {
                    u.energy += amount;
                }
                Ok(())
            }
            Command::Drop { agent } => {
                let unit = self.agent(agent)?.clone();
                if unit.energy == 0 {
                    return Err(CommandError::NotEnoughResources);
                }
                self.drop_energy(unit.pos, unit.energy);
                if let Some(u) = self.objects.units.get_mut(&agent) {
                    u.energy = 0;
                }
                Ok(())
            }
            Command::Build { agent, site } => {
                let unit = self.agent_with(agent, BodyPart::Work)?;
                let target = self
                    .objects
                    .sites
                    .get(&site)
                    .cloned()
                    .ok_or(CommandError::InvalidTarget)?;
                if !unit.pos.in_range(&target.pos, self.rules.tasks.work_range) {
                    return Err(CommandError::NotInRange);
                }
                if unit.energy == 0 {
                    return Err(CommandError::NotEnoughResources);
                }
                let power = unit.active_parts(BodyPart::Work) as u32 * self.rules.combat.build_power;
                let amount = power
                    .min(unit.energy)
                    .min(target.progress_total - target.progress);
                if let Some(u) = self.objects.units.get_mut(&agent) {
                    u.energy -= amount;
                }
                if target.progress + amount >= target.progress_total {
                    self.objects.sites.remove(&site);
                    let id = self.add_structure(target.kind, Owner::Mine, target.pos);
                    if let Some(s) = self.objects.structures.get_mut(&id) {
                        s.hits = initial_hits(target.kind);
                    }
                    tracing::debug!(site = %site, structure = %id, kind = ?target.kind, "construction complete");
                } else if let Some(s) = self.objects.sites.get_mut(&site) {
                    s.progress += amount;
                }
                Ok(())
            }
            Command::Repair { actor, target } => {
                let structure = self
                    .objects
                    .structures
                    .get(&target)
                    .cloned()
                    .ok_or(CommandError::InvalidTarget)?;
                let amount = if self.objects.units.contains_key(&actor) {
                    let unit = self.agent_with(actor, BodyPart::Work)?;
                    if !unit.pos.in_range(&structure.pos, self.rules.tasks.work_range) {
                        return Err(CommandError::NotInRange);
                    }
                    if unit.energy == 0 {
                        return Err(CommandError::NotEnoughResources);
                    }
                    let used = (unit.active_parts(BodyPart::Work) as u32).min(unit.energy);
                    if let Some(u) = self.objects.units.get_mut(&actor) {
                        u.energy -= used;
                    }
                    used * self.rules.combat.repair_power
                } else {
                    self.tower_shot(actor, &structure.pos)?
                };
                if let Some(s) = self.objects.structures.get_mut(&target) {
                    s.hits = (s.hits + amount).min(s.hits_max);
                }
                Ok(())
            }
            Command::Upgrade { agent, controller } => {
                let unit = self.agent_with(agent, BodyPart::Work)?;
                let point = self
                    .objects
                    .controllers
                    .get(&controller)
                    .ok_or(CommandError::InvalidTarget)?;
                if !point.is_mine() {
                    return Err(CommandError::NotOwner);
                }
                if !unit.pos.in_range(&point.pos, self.rules.tasks.work_range) {
                    return Err(CommandError::NotInRange);
                }
                if unit.energy == 0 {
                    return Err(CommandError::NotEnoughResources);
                }
                let used = (unit.active_parts(BodyPart::Work) as u32 * self.rules.combat.upgrade_power)
                    .min(unit.energy);
                let reset = self.rules.controller_downgrade(point.level);
                if let Some(c) = self.objects.controllers.get_mut(&controller) {
                    c.ticks_to_downgrade = reset;
                }
                if let Some(u) = self.objects.units.get_mut(&agent) {
                    u.energy -= used;
                }
                Ok(())
            }
            Command::Attack { actor, target } => {
                let target_pos = self
                    .objects
                    .position_of(target)
                    .ok_or(CommandError::InvalidTarget)?;
                let amount = if self.objects.units.contains_key(&actor) {
                    let unit = self.agent(actor)?.clone();
                    let combat = &self.rules.combat;
                    let melee = unit.active_parts(BodyPart::Attack) as f32 * combat.attack_power;
                    let ranged =
                        unit.active_parts(BodyPart::RangedAttack) as f32 * combat.ranged_attack_power;
                    if melee == 0.0 && ranged == 0.0 {
                        return Err(CommandError::NoBodypart);
                    }
                    let mut total = 0.0;
                    if unit.pos.is_near_to(&target_pos) {
                        total += melee;
                    }
                    if unit.pos.in_range(&target_pos, 3) {
                        total += ranged;
                    }
                    if total == 0.0 {
                        return Err(CommandError::NotInRange);
                    }
                    total as u32
                } else {
                    self.tower_shot(actor, &target_pos)?
                };
                self.damage(target, amount)
            }
            Command::Heal { actor, target } => {
                let patient = self
                    .objects
                    .units
                    .get(&target)
                    .cloned()
                    .ok_or(CommandError::InvalidTarget)?;
                let amount = if self.objects.units.contains_key(&actor) {
                    let unit = self.agent_with(actor, BodyPart::Heal)?;
                    let parts = unit.active_parts(BodyPart::Heal) as f32;
                    let combat = &self.rules.combat;
                    if unit.pos.is_near_to(&patient.pos) {
                        (parts * combat.heal_power) as u32
                    } else if unit.pos.in_range(&patient.pos, 3) {
                        (parts * combat.ranged_heal_power) as u32
                    } else {
                        return Err(CommandError::NotInRange);
                    }
                } else {
                    self.tower_shot(actor, &patient.pos)?
                };
                if let Some(u) = self.objects.units.get_mut(&target) {
                    u.hits = (u.hits + amount).min(u.hits_max);
                    sync_segments(u);
                }
                Ok(())
            }
            Command::Claim { agent, controller } => {
                let unit = self.agent_with(agent, BodyPart::Claim)?;
                let point = self
                    .objects
                    .controllers
                    .get(&controller)
                    .ok_or(CommandError::InvalidTarget)?;
                if !unit.pos.is_near_to(&point.pos) {
                    return Err(CommandError::NotInRange);
                }
                if point.owner != Owner::Neutral || point.reserved_by == Some(Owner::Hostile) {
                    return Err(CommandError::InvalidTarget);
                }
                if self.owned_controllers() >= self.owned_limit {
                    return Err(CommandError::NotEnoughResources);
                }
                let reset = self.rules.controller_downgrade(1);
                if let Some(c) = self.objects.controllers.get_mut(&controller) {
                    c.owner = Owner::Mine;
                    c.level = 1;
                    c.reserved_by = None;
                    c.ticks_to_downgrade = reset;
                }
                Ok(())
            }
            Command::Reserve { agent, controller } => {
                let unit = self.agent_with(agent, BodyPart::Claim)?;
                let point = self
                    .objects
                    .controllers
                    .get(&controller)
                    .ok_or(CommandError::InvalidTarget)?;
                if !unit.pos.is_near_to(&point.pos) {
                    return Err(CommandError::NotInRange);
                }
                if point.owner != Owner::Neutral || point.reserved_by == Some(Owner::Hostile) {
                    return Err(CommandError::InvalidTarget);
                }
                if let Some(c) = self.objects.controllers.get_mut(&controller) {
                    c.reserved_by = Some(Owner::Mine);
                }
                Ok(())
            }
            Command::AttackController { agent, controller } => {
                let unit = self.agent_with(agent, BodyPart::Claim)?;
                let point = self
                    .objects
                    .controllers
                    .get(&controller)
                    .cloned()
                    .ok_or(CommandError::InvalidTarget)?;
                if !unit.pos.is_near_to(&point.pos) {
                    return Err(CommandError::NotInRange);
                }
                let downgrade = self.rules.tasks.controller_downgrade.clone();
                let parts = unit.active_parts(BodyPart::Claim) as u32;
                let c = self
                    .objects
                    .controllers
                    .get_mut(&controller)
                    .ok_or(CommandError::InvalidTarget)?;
                if point.reserved_by == Some(Owner::Hostile) {
                    c.reserved_by = None;
                } else if point.owner == Owner::Hostile {
                    c.ticks_to_downgrade = c
                        .ticks_to_downgrade
                        .saturating_sub(parts * CONTROLLER_ATTACK_TICKS);
                    if c.ticks_to_downgrade == 0 {
                        downgrade_controller(c, &downgrade);
                    }
                } else {
                    return Err(CommandError::InvalidTarget);
                }
                Ok(())
            }
            Command::Renew { spawn, agent } => {
                let lifetime = self.rules.lifecycle.agent_lifetime;
                let point = self
                    .objects
                    .structures
                    .get(&spawn)
                    .filter(|s| s.kind == StructureKind::Spawn)
                    .cloned()
                    .ok_or(CommandError::InvalidTarget)?;
                if point.owner != Owner::Mine {
                    return Err(CommandError::NotOwner);
                }
                if point.busy {
                    return Err(CommandError::Busy);
                }
                let unit = self.agent(agent)?.clone();
                if !point.pos.is_near_to(&unit.pos) {
                    return Err(CommandError::NotInRange);
                }
                let ttl = unit.ticks_to_live.unwrap_or(lifetime);
                if ttl >= lifetime {
                    return Err(CommandError::Full);
                }
                let parts = unit.body.len().max(1) as f32;
                let body_cost = unit.body_parts().cost(&self.rules.body.costs) as f32;
                let cost = (body_cost / 2.5 / parts).ceil() as u32;
                self.spend_energy(point.pos.territory, cost)?;
                let gain = (600.0 / parts).floor() as u32;
                if let Some(u) = self.objects.units.get_mut(&agent) {
                    u.ticks_to_live = Some((ttl + gain).min(lifetime));
                }
                Ok(())
            }
            Command::CreateSite { pos, kind } => {
                if !self.is_territory_visible(pos.territory) {
                    return Err(CommandError::InvalidTarget);
                }
                if pos.x < 0 || pos.y < 0 || pos.x >= TERRITORY_SIZE || pos.y >= TERRITORY_SIZE {
                    return Err(CommandError::InvalidTarget);
                }
                if self.objects.sites.len() >= self.rules.lifecycle.max_construction_sites {
                    return Err(CommandError::Full);
                }
                if self.objects.is_tile_taken(&pos, kind) {
                    return Err(CommandError::InvalidTarget);
                }
                self.add_site(kind, pos);
                Ok(())
            }
            Command::RemoveMarker { ref name } => {
                let before = self.markers.len();
                self.markers.retain(|m| &m.name != name);
                if self.markers.len() == before {
                    return Err(CommandError::InvalidTarget);
                }
                Ok(())
            }
        }
    }
}

/// Recompute segment hits from the unit's total; damage eats the front first
fn sync_segments(unit: &mut UnitView) {
    let mut damage = unit.hits_max.saturating_sub(unit.hits);
    for segment in unit.body.iter_mut() {
        let taken = damage.min(SEGMENT_HITS);
        segment.hits = SEGMENT_HITS - taken;
        damage -= taken;
    }
}

fn downgrade_controller(controller: &mut ControllerView, table: &[u32]) {
    controller.level = controller.level.saturating_sub(1);
    if controller.level == 0 {
        controller.owner = Owner::Neutral;
        controller.ticks_to_downgrade = 0;
    } else {
        controller.ticks_to_downgrade = crate::core::config::lookup_level(table, controller.level);
    }
}

impl World for SimWorld {
    fn tick(&self) -> Tick {
        self.tick
    }

    fn territory(&self, id: TerritoryId) -> Option<TerritoryView> {
        if !self.is_territory_visible(id) {
            return None;
        }
        let (energy_available, energy_capacity) = self.production_energy(id);
        Some(TerritoryView {
            id,
            energy_available,
            energy_capacity,
            controller: self.objects.controller_in(id).cloned(),
        })
    }

    fn visible_territories(&self) -> Vec<TerritoryId> {
        self.territories
            .keys()
            .copied()
            .filter(|t| self.is_territory_visible(*t))
            .collect()
    }

    fn adjacent_territories(&self, id: TerritoryId) -> Vec<TerritoryId> {
        let mut adjacent = self
            .territories
            .get(&id)
            .map(|t| t.adjacent.clone())
            .unwrap_or_default();
        adjacent.sort();
        adjacent
    }

    fn territory_distance(&self, from: TerritoryId, to: TerritoryId) -> Option<u32> {
        self.route(from, to).map(|r| r.len() as u32 - 1)
    }

    fn owned_territory_limit(&self) -> usize {
        self.owned_limit
    }

    fn my_units(&self) -> Vec<UnitView> {
        self.objects
            .units_sorted()
            .into_iter()
            .filter(|u| u.owner == Owner::Mine)
            .cloned()
            .collect()
    }

    fn hostile_units(&self, territory: TerritoryId) -> Vec<UnitView> {
        if !self.is_territory_visible(territory) {
            return Vec::new();
        }
        self.objects
            .units_sorted()
            .into_iter()
            .filter(|u| u.owner == Owner::Hostile && u.pos.territory == territory)
            .cloned()
            .collect()
    }

    fn structures(&self, territory: TerritoryId) -> Vec<StructureView> {
        if !self.is_territory_visible(territory) {
            return Vec::new();
        }
        self.objects
            .structures_in(territory)
            .into_iter()
            .cloned()
            .collect()
    }

    fn construction_sites(&self) -> Vec<SiteView> {
        self.objects.sites_sorted().into_iter().cloned().collect()
    }

    fn sources(&self, territory: TerritoryId) -> Vec<SourceView> {
        if !self.is_territory_visible(territory) {
            return Vec::new();
        }
        self.objects
            .sources_in(territory)
            .into_iter()
            .cloned()
            .collect()
    }

    fn piles(&self, territory: TerritoryId) -> Vec<PileView> {
        if !self.is_territory_visible(territory) {
            return Vec::new();
        }
        self.objects
            .piles_in(territory)
            .into_iter()
            .cloned()
            .collect()
    }

    fn markers(&self) -> Vec<MarkerView> {
        self.markers.clone()
    }

    fn object(&self, id: ObjectId) -> Option<ObjectView> {
        let object = self.objects.get(id)?;
        let known = match &object {
            ObjectView::Unit(u) => u.owner == Owner::Mine || self.is_territory_visible(u.pos.territory),
            ObjectView::Structure(s) => {
                s.owner == Owner::Mine || self.is_territory_visible(s.pos.territory)
            }
            ObjectView::Site(_) => true,
            other => self.is_territory_visible(other.pos().territory),
        };
        known.then_some(object)
    }

    fn find_path(&self, from: &Position, to: &Position) -> Option<Vec<Position>> {
        if from.territory == to.territory {
            let mut path = Vec::new();
            let mut at = *from;
            while at != *to {
                at = at.step_toward(to);
                path.push(at);
            }
            return Some(path);
        }
        let route = self.route(from.territory, to.territory)?;
        let mut path: Vec<Position> = route[1..route.len() - 1]
            .iter()
            .map(|t| Position::center(*t))
            .collect();
        let mut at = Position::center(to.territory);
        path.push(at);
        while at != *to {
            at = at.step_toward(to);
            path.push(at);
        }
        Some(path)
    }

    fn spawn_agent(&mut self, spawn: ObjectId, body: &Body, name: &str) -> Result<AgentId, CommandError> {
        let point = self
            .objects
            .structures
            .get(&spawn)
            .filter(|s| s.kind == StructureKind::Spawn)
            .cloned()
            .ok_or(CommandError::InvalidTarget)?;
        if point.owner != Owner::Mine {
            return Err(CommandError::NotOwner);
        }
        if point.busy || self.production.contains_key(&spawn) {
            return Err(CommandError::Busy);
        }
        if body.is_empty() || body.len() > self.rules.body.max_segments {
            return Err(CommandError::InvalidTarget);
        }
        self.spend_energy(point.pos.territory, body.cost(&self.rules.body.costs))?;

        let id = self.objects.allocate_id();
        let mut unit = self.new_unit(id, Owner::Mine, name, point.pos, body.parts());
        unit.spawning = true;
        self.objects.units.insert(id, unit);
        if let Some(s) = self.objects.structures.get_mut(&spawn) {
            s.busy = true;
        }
        self.production.insert(
            spawn,
            Production {
                agent: id,
                remaining: SPAWN_TICKS_PER_PART * body.len() as u32,
            },
        );
        tracing::debug!(spawn = %spawn, agent = %id, name, parts = body.len(), "production started");
        Ok(id)
    }

    fn execute(&mut self, command: Command) -> Result<(), CommandError> {
        self.run(&command)?;
        self.command_log.push(command);
        Ok(())
    }
}
