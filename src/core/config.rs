//! Ruleset with documented balance constants
//!
//! Every number the planners depend on lives here so the decision logic stays
//! independent of any particular simulation's balance sheet. All sections
//! deserialize with defaults, so a TOML file only needs the values it changes.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::body::BodyPart;
use crate::core::error::ConfigError;

/// Cost of each body segment in energy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartCosts {
    pub movement: u32,
    pub work: u32,
    pub carry: u32,
    pub attack: u32,
    pub ranged_attack: u32,
    pub heal: u32,
    pub claim: u32,
    pub tough: u32,
}

impl Default for PartCosts {
    fn default() -> Self {
        Self {
            movement: 50,
            work: 100,
            carry: 50,
            attack: 80,
            ranged_attack: 150,
            heal: 250,
            claim: 600,
            tough: 10,
        }
    }
}

impl PartCosts {
    pub fn cost(&self, part: BodyPart) -> u32 {
        match part {
            BodyPart::Move => self.movement,
            BodyPart::Work => self.work,
            BodyPart::Carry => self.carry,
            BodyPart::Attack => self.attack,
            BodyPart::RangedAttack => self.ranged_attack,
            BodyPart::Heal => self.heal,
            BodyPart::Claim => self.claim,
            BodyPart::Tough => self.tough,
        }
    }
}

/// Body planning limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyRules {
    pub costs: PartCosts,
    /// Hard cap on segments per agent
    pub max_segments: usize,
    /// Work segments beyond this drain a resource node faster than it refills
    pub miner_max_work: usize,
    /// Miner work segments are kept at or below this multiple of carry segments
    pub miner_work_per_carry: usize,
    /// Miners only carry when no transport is around, so a few segments suffice
    pub miner_max_carry: usize,
    /// Energy carried per carry segment
    pub carry_capacity_per_part: u32,
}

impl Default for BodyRules {
    fn default() -> Self {
        Self {
            costs: PartCosts::default(),
            max_segments: 50,
            miner_max_work: 5,
            miner_work_per_carry: 3,
            miner_max_carry: 3,
            carry_capacity_per_part: 50,
        }
    }
}

/// Combat power constants used for strength estimates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatRules {
    pub attack_power: f32,
    pub ranged_attack_power: f32,
    pub heal_power: f32,
    pub ranged_heal_power: f32,
    /// Damage of a defense structure at point blank range
    pub tower_power_attack: f32,
    /// Fraction of damage lost at maximum range
    pub tower_falloff: f32,
    /// Energy consumed per defense structure action
    pub tower_energy_cost: u32,
    /// Energy gained per work segment per harvest action
    pub harvest_power: u32,
    pub build_power: u32,
    pub repair_power: u32,
    pub upgrade_power: u32,
}

impl Default for CombatRules {
    fn default() -> Self {
        Self {
            attack_power: 30.0,
            ranged_attack_power: 10.0,
            heal_power: 12.0,
            ranged_heal_power: 4.0,
            tower_power_attack: 600.0,
            tower_falloff: 0.75,
            tower_energy_cost: 10,
            harvest_power: 2,
            build_power: 5,
            repair_power: 100,
            upgrade_power: 1,
        }
    }
}

impl CombatRules {
    /// Average heal capability of one heal segment (direct and ranged)
    pub fn averaged_heal_power(&self) -> f32 {
        (self.heal_power + self.ranged_heal_power) / 2.0
    }

    /// Average splash-mitigated damage of a single defense structure
    pub fn tower_strength(&self) -> f32 {
        (self.tower_power_attack + self.tower_power_attack * (1.0 - self.tower_falloff)) / 2.0
    }
}

/// Task Queue priorities and limits
///
/// Priorities are continuous scores: lower is more urgent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskRules {
    /// Defense structure resupply / repair
    pub maintenance_priority: f32,
    /// Added to `1 - fractionComplete` for construction tasks
    pub min_build_priority: f32,
    /// Added to the current hit fraction for repair tasks
    pub min_repair_priority: f32,
    /// Added to twice the remaining downgrade timer fraction
    pub min_upgrade_priority: f32,
    /// Multiplier applied to tasks outside the agent's current territory
    pub adjacent_territory_multiplier: f32,
    pub max_build_assignees: u32,
    pub max_repair_assignees: u32,
    /// Structures below this fraction of their target hits get a repair task
    pub repair_threshold: f32,
    /// Target hits for walls per territory development level (index = level)
    pub wall_target_hits: Vec<u32>,
    /// Target hits for ramparts per territory development level
    pub rampart_target_hits: Vec<u32>,
    /// Control point downgrade timer length per level (index = level)
    pub controller_downgrade: Vec<u32>,
    /// Range at which workers build, repair and upgrade
    pub work_range: u32,
    /// Tie-break range assumed for targets outside the agent's territory
    pub unknown_target_range: u32,
}

impl Default for TaskRules {
    fn default() -> Self {
        Self {
            maintenance_priority: 0.0,
            min_build_priority: 0.0,
            min_repair_priority: 0.7,
            min_upgrade_priority: 0.1,
            adjacent_territory_multiplier: 1.5,
            max_build_assignees: 3,
            max_repair_assignees: 1,
            repair_threshold: 0.9,
            wall_target_hits: vec![
                1, 1_000, 10_000, 50_000, 100_000, 200_000, 500_000, 1_000_000, 5_000_000,
            ],
            rampart_target_hits: vec![
                1, 1, 10_000, 50_000, 100_000, 200_000, 500_000, 1_000_000, 5_000_000,
            ],
            controller_downgrade: vec![
                20_000, 20_000, 10_000, 20_000, 40_000, 80_000, 120_000, 150_000, 200_000,
            ],
            work_range: 3,
            unknown_target_range: 50,
        }
    }
}

/// Logistics tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticsRules {
    /// A pile is worth the trip if `amount / range` exceeds this
    pub pile_value_threshold: f32,
    /// Minimum carried energy before handing over to adjacent agents
    pub handover_threshold: u32,
    /// Carriers about to expire deliver whatever they hold
    pub carrier_return_ttl: u32,
    /// Pile search radius for workers looking for energy
    pub worker_pile_range: u32,
}

impl Default for LogisticsRules {
    fn default() -> Self {
        Self {
            pile_value_threshold: 15.0,
            handover_threshold: 50,
            carrier_return_ttl: 50,
            worker_pile_range: 4,
        }
    }
}

/// Production Controller tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductionRules {
    /// Minimum energy for producing when extraction or transport is absent
    pub bootstrap_energy: u32,
    /// General workers kept per territory
    pub worker_target: usize,
    /// Melee + medic units kept in reserve per territory
    pub combat_reserve: usize,
    /// Melee units per medic
    pub melee_per_medic: usize,
    /// Melee units produced before the first medic
    pub melee_before_first_medic: usize,
    /// Only renew agents below this fraction of their lifetime
    pub renew_ttl_fraction: f32,
    /// Renewal only when energy exceeds this fraction of capacity
    pub renew_energy_fraction: f32,
    /// Surplus requires every miner / carrier to live at least this long
    pub surplus_min_ttl: u32,
    /// An agent is obsolete when a fresh body would cost this many times more
    pub obsolete_cost_ratio: f32,
}

impl Default for ProductionRules {
    fn default() -> Self {
        Self {
            bootstrap_energy: 300,
            worker_target: 3,
            combat_reserve: 2,
            melee_per_medic: 4,
            melee_before_first_medic: 2,
            renew_ttl_fraction: 0.8,
            renew_energy_fraction: 0.5,
            surplus_min_ttl: 50,
            obsolete_cost_ratio: 1.5,
        }
    }
}

/// Defense Controller tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefenseRules {
    pub weapon_range: u32,
    /// Repair only when the energy reserve fraction exceeds this
    pub repair_energy_threshold: f32,
    /// Give a repair task back once its target recovers above this fraction
    pub repair_abandon_threshold: f32,
}

impl Default for DefenseRules {
    fn default() -> Self {
        Self {
            weapon_range: 10,
            repair_energy_threshold: 0.8,
            repair_abandon_threshold: 0.7,
        }
    }
}

/// Campaign Manager tuning
///
/// `commit_ratio` and `retreat_ratio` form a hysteresis band: an offensive
/// starts at `attack >= defense * commit_ratio` and only stops once
/// `attack < defense * retreat_ratio`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignRules {
    pub commit_ratio: f32,
    pub retreat_ratio: f32,
    /// Operation data older than this is refreshed (or scouted)
    pub stale_after: u64,
    /// Maximum graph distance between an owning territory and its marker
    pub max_owner_distance: u32,
    /// Melee units engage hostiles closer than this outside an offensive
    pub engage_range: u32,
    /// Idle melee units stay this close to the home spawn
    pub melee_idle_range: u32,
    /// Idle medics stay this close to the home spawn, or to the rally point
    pub medic_idle_range: u32,
}

impl Default for CampaignRules {
    fn default() -> Self {
        Self {
            commit_ratio: 3.0,
            retreat_ratio: 1.0 / 3.0,
            stale_after: 200,
            max_owner_distance: 3,
            engage_range: 10,
            melee_idle_range: 5,
            medic_idle_range: 3,
        }
    }
}

/// Agent lifecycle and housekeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleRules {
    /// Ticks a freshly produced agent lives
    pub agent_lifetime: u32,
    /// Workers request renewal below this fraction of their lifetime
    pub renew_request_fraction: f32,
    /// Renewal requests are dropped above this fraction
    pub renew_release_fraction: f32,
    /// Garbage collection runs every this many ticks
    pub gc_interval: u64,
    /// Global cap on concurrently existing construction markers
    pub max_construction_sites: usize,
}

impl Default for LifecycleRules {
    fn default() -> Self {
        Self {
            agent_lifetime: 1500,
            renew_request_fraction: 0.1,
            renew_release_fraction: 0.5,
            gc_interval: 100,
            max_construction_sites: 100,
        }
    }
}

/// Complete balance configuration passed to every planner
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Ruleset {
    pub body: BodyRules,
    pub combat: CombatRules,
    pub tasks: TaskRules,
    pub logistics: LogisticsRules,
    pub production: ProductionRules,
    pub defense: DefenseRules,
    pub campaign: CampaignRules,
    pub lifecycle: LifecycleRules,
}

impl Ruleset {
    /// Parse a ruleset from TOML; missing keys keep their defaults
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Load a ruleset from a TOML file on disk
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Downgrade timer length for a control point level
    pub fn controller_downgrade(&self, level: u8) -> u32 {
        lookup_level(&self.tasks.controller_downgrade, level).max(1)
    }
}

/// Index a per-level table, clamping to the highest defined level
pub(crate) fn lookup_level(table: &[u32], level: u8) -> u32 {
    table
        .get(level as usize)
        .or_else(|| table.last())
        .copied()
        .unwrap_or(1)
}
