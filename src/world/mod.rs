//! World gateway - the only way the core observes or changes the simulation
//!
//! The host simulation implements [`World`]. Queries return owned snapshots
//! ("views") valid for the current tick; commands are fire-and-forget and
//! report a [`CommandError`] synchronously so callers can fall back (e.g.
//! move closer on `NotInRange`) within the same tick.

pub mod loader;
pub mod objects;
pub mod sim;

use serde::{Deserialize, Serialize};

use crate::body::{Body, BodyPart};
use crate::core::config::CombatRules;
use crate::core::error::CommandError;
use crate::core::types::{AgentId, ObjectId, Position, TerritoryId, Tick};

pub use loader::{Scenario, ScenarioError, ScenarioLoader};
pub use sim::SimWorld;

/// Who controls an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Owner {
    Mine,
    Hostile,
    Neutral,
}

/// One body segment with its remaining hit points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub part: BodyPart,
    pub hits: u32,
}

/// Hit points of a fresh body segment
pub const SEGMENT_HITS: u32 = 100;

/// A unit (own agent or hostile)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitView {
    pub id: ObjectId,
    pub name: String,
    pub owner: Owner,
    pub pos: Position,
    pub body: Vec<Segment>,
    pub hits: u32,
    pub hits_max: u32,
    pub energy: u32,
    pub carry_capacity: u32,
    pub ticks_to_live: Option<u32>,
    pub fatigue: u32,
    pub spawning: bool,
}

impl UnitView {
    /// Number of segments of `part` that still function
    pub fn active_parts(&self, part: BodyPart) -> usize {
        self.body.iter().filter(|s| s.part == part && s.hits > 0).count()
    }

    pub fn body_parts(&self) -> Body {
        Body::new(self.body.iter().map(|s| s.part).collect())
    }

    pub fn health_fraction(&self) -> f32 {
        if self.hits_max == 0 {
            return 0.0;
        }
        self.hits as f32 / self.hits_max as f32
    }

    pub fn is_full(&self) -> bool {
        self.energy >= self.carry_capacity
    }

    pub fn free_capacity(&self) -> u32 {
        self.carry_capacity.saturating_sub(self.energy)
    }

    pub fn can_move(&self) -> bool {
        self.active_parts(BodyPart::Move) > 0
    }

    pub fn can_claim(&self) -> bool {
        self.active_parts(BodyPart::Claim) > 0
    }
}

/// Offensive and defensive capability of a unit
pub trait Combatant {
    fn can_attack(&self) -> bool;
    fn can_heal(&self) -> bool;

    /// Weighted offense / heal capability
    fn fighting_strength(&self, combat: &CombatRules) -> f32;

    /// Able to take part in a fight at all
    fn is_combatant(&self) -> bool {
        self.can_attack() || self.can_heal()
    }
}

impl Combatant for UnitView {
    fn can_attack(&self) -> bool {
        self.active_parts(BodyPart::Attack) > 0 || self.active_parts(BodyPart::RangedAttack) > 0
    }

    fn can_heal(&self) -> bool {
        self.active_parts(BodyPart::Heal) > 0
    }

    fn fighting_strength(&self, combat: &CombatRules) -> f32 {
        self.active_parts(BodyPart::Attack) as f32 * combat.attack_power
            + self.active_parts(BodyPart::RangedAttack) as f32 * combat.ranged_attack_power
            + self.active_parts(BodyPart::Heal) as f32 * combat.averaged_heal_power()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StructureKind {
    Spawn,
    Extension,
    Tower,
    Container,
    Storage,
    Road,
    Wall,
    Rampart,
}

impl StructureKind {
    /// Structures that fund production
    pub fn is_production(self) -> bool {
        matches!(self, StructureKind::Spawn | StructureKind::Extension)
    }

    pub fn is_store(self) -> bool {
        matches!(self, StructureKind::Container | StructureKind::Storage)
    }

    /// Structures players can destroy (walls and roads are not worth it)
    pub fn is_destroyable(self) -> bool {
        !matches!(self, StructureKind::Wall | StructureKind::Road)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureView {
    pub id: ObjectId,
    pub kind: StructureKind,
    pub owner: Owner,
    pub pos: Position,
    pub hits: u32,
    pub hits_max: u32,
    pub energy: u32,
    pub energy_capacity: u32,
    /// Production points report busy while producing
    pub busy: bool,
}

impl StructureView {
    pub fn has_energy(&self) -> bool {
        self.energy > 0
    }

    pub fn can_receive_energy(&self) -> bool {
        self.energy < self.energy_capacity
    }

    pub fn free_capacity(&self) -> u32 {
        self.energy_capacity.saturating_sub(self.energy)
    }

    pub fn energy_fraction(&self) -> f32 {
        if self.energy_capacity == 0 {
            return 0.0;
        }
        self.energy as f32 / self.energy_capacity as f32
    }

    pub fn hits_fraction(&self) -> f32 {
        if self.hits_max == 0 {
            return 1.0;
        }
        self.hits as f32 / self.hits_max as f32
    }

    pub fn is_friendly_or_neutral(&self) -> bool {
        self.owner != Owner::Hostile
    }
}

/// The upgradeable control point of a territory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerView {
    pub id: ObjectId,
    pub pos: Position,
    pub owner: Owner,
    pub level: u8,
    pub ticks_to_downgrade: u32,
    pub reserved_by: Option<Owner>,
}

impl ControllerView {
    pub fn is_mine(&self) -> bool {
        self.owner == Owner::Mine
    }
}

/// An unfinished construction marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteView {
    pub id: ObjectId,
    pub pos: Position,
    pub kind: StructureKind,
    pub progress: u32,
    pub progress_total: u32,
}

impl SiteView {
    pub fn fraction_complete(&self) -> f32 {
        if self.progress_total == 0 {
            return 1.0;
        }
        self.progress as f32 / self.progress_total as f32
    }
}

/// A stationary resource node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceView {
    pub id: ObjectId,
    pub pos: Position,
    pub energy: u32,
    pub energy_capacity: u32,
}

/// Energy lying on the ground
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PileView {
    pub id: ObjectId,
    pub pos: Position,
    pub amount: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarkerKind {
    /// Take the territory by force
    Occupy,
    /// Claim the territory's control point
    Claim,
    /// Gathering point for combat units
    Rally,
}

/// A world annotation signalling intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerView {
    pub name: String,
    pub kind: MarkerKind,
    pub pos: Position,
}

/// Territory-level state, only available with visibility
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerritoryView {
    pub id: TerritoryId,
    /// Energy in production structures
    pub energy_available: u32,
    pub energy_capacity: u32,
    pub controller: Option<ControllerView>,
}

impl TerritoryView {
    pub fn is_mine(&self) -> bool {
        self.controller.as_ref().is_some_and(|c| c.is_mine())
    }

    /// Development level; zero unless we own the control point
    pub fn level(&self) -> u8 {
        match &self.controller {
            Some(c) if c.is_mine() => c.level,
            _ => 0,
        }
    }

    pub fn is_friendly_or_neutral(&self) -> bool {
        self.controller
            .as_ref()
            .map_or(true, |c| c.owner != Owner::Hostile)
    }
}

/// Result of a look-up by identifier
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectView {
    Unit(UnitView),
    Structure(StructureView),
    Controller(ControllerView),
    Site(SiteView),
    Source(SourceView),
    Pile(PileView),
}

impl ObjectView {
    pub fn pos(&self) -> Position {
        match self {
            ObjectView::Unit(u) => u.pos,
            ObjectView::Structure(s) => s.pos,
            ObjectView::Controller(c) => c.pos,
            ObjectView::Site(s) => s.pos,
            ObjectView::Source(s) => s.pos,
            ObjectView::Pile(p) => p.pos,
        }
    }
}

/// Side effects the core asks the host to perform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Move { agent: AgentId, to: Position },
    Harvest { agent: AgentId, source: ObjectId },
    /// Hand carried energy to an adjacent unit or structure
    Transfer { agent: AgentId, to: ObjectId },
    /// Take energy out of an adjacent structure
    Withdraw { agent: AgentId, from: ObjectId },
    Pickup { agent: AgentId, pile: ObjectId },
    Drop { agent: AgentId },
    Build { agent: AgentId, site: ObjectId },
    /// Actor is an agent or a defense structure
    Repair { actor: ObjectId, target: ObjectId },
    Upgrade { agent: AgentId, controller: ObjectId },
    Attack { actor: ObjectId, target: ObjectId },
    Heal { actor: ObjectId, target: ObjectId },
    Claim { agent: AgentId, controller: ObjectId },
    Reserve { agent: AgentId, controller: ObjectId },
    AttackController { agent: AgentId, controller: ObjectId },
    Renew { spawn: ObjectId, agent: AgentId },
    CreateSite { pos: Position, kind: StructureKind },
    RemoveMarker { name: String },
}

/// Query and command surface of the host simulation
pub trait World {
    fn tick(&self) -> Tick;

    /// `None` when the territory is not visible this tick
    fn territory(&self, id: TerritoryId) -> Option<TerritoryView>;
    fn visible_territories(&self) -> Vec<TerritoryId>;
    fn adjacent_territories(&self, id: TerritoryId) -> Vec<TerritoryId>;
    /// Graph distance between territories
    fn territory_distance(&self, from: TerritoryId, to: TerritoryId) -> Option<u32>;
    /// How many control points we may own
    fn owned_territory_limit(&self) -> usize;

    fn my_units(&self) -> Vec<UnitView>;
    fn hostile_units(&self, territory: TerritoryId) -> Vec<UnitView>;
    /// All structures in a visible territory, any owner
    fn structures(&self, territory: TerritoryId) -> Vec<StructureView>;
    /// Our construction markers; known even without visibility
    fn construction_sites(&self) -> Vec<SiteView>;
    fn sources(&self, territory: TerritoryId) -> Vec<SourceView>;
    fn piles(&self, territory: TerritoryId) -> Vec<PileView>;
    fn markers(&self) -> Vec<MarkerView>;
    fn object(&self, id: ObjectId) -> Option<ObjectView>;
    fn find_path(&self, from: &Position, to: &Position) -> Option<Vec<Position>>;

    /// Start producing an agent; the new agent exists (spawning) immediately
    fn spawn_agent(&mut self, spawn: ObjectId, body: &Body, name: &str)
        -> Result<AgentId, CommandError>;
    fn execute(&mut self, command: Command) -> Result<(), CommandError>;

    fn unit(&self, id: ObjectId) -> Option<UnitView> {
        match self.object(id) {
            Some(ObjectView::Unit(unit)) => Some(unit),
            _ => None,
        }
    }

    fn my_unit(&self, id: ObjectId) -> Option<UnitView> {
        self.unit(id).filter(|u| u.owner == Owner::Mine)
    }

    fn structure(&self, id: ObjectId) -> Option<StructureView> {
        match self.object(id) {
            Some(ObjectView::Structure(structure)) => Some(structure),
            _ => None,
        }
    }

    fn my_units_in(&self, territory: TerritoryId) -> Vec<UnitView> {
        self.my_units()
            .into_iter()
            .filter(|u| u.pos.territory == territory)
            .collect()
    }

    fn hostile_structures(&self, territory: TerritoryId) -> Vec<StructureView> {
        self.structures(territory)
            .into_iter()
            .filter(|s| s.owner == Owner::Hostile)
            .collect()
    }

    fn my_structures_of(&self, territory: TerritoryId, kind: StructureKind) -> Vec<StructureView> {
        self.structures(territory)
            .into_iter()
            .filter(|s| s.owner == Owner::Mine && s.kind == kind)
            .collect()
    }

    fn is_visible(&self, territory: TerritoryId) -> bool {
        self.territory(territory).is_some()
    }
}

/// Closest item to `origin` by range, skipping other territories
pub fn closest_by_range<'a, T, F>(origin: &Position, items: &'a [T], pos: F) -> Option<&'a T>
where
    F: Fn(&T) -> Position,
{
    items
        .iter()
        .filter_map(|item| origin.range_to(&pos(item)).map(|r| (r, item)))
        .min_by_key(|(r, _)| *r)
        .map(|(_, item)| item)
}
