//! Persistent cross-tick state
//!
//! Everything the core remembers between ticks lives in [`MemoryStore`]:
//! agent, territory, structure and marker records plus campaign operations.
//! Records only hold identifiers of live objects, never copies, so a stale
//! reference is detected by looking it up again on the next tick.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::campaign::Operation;
use crate::core::error::{Result, SwarmError};
use crate::core::types::{AgentId, ObjectId, Position, TerritoryId, Tick};
use crate::roles::Role;
use crate::tasks::Task;

/// What an agent is currently doing with its carried energy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkMode {
    /// Gathering energy
    #[default]
    Collecting,
    /// Bringing energy to a drop-off
    Delivering,
    /// Spending energy on a task
    Working,
    /// Waiting next to a production point for a lifespan extension
    Renewing,
}

/// Back-reference to a task in a territory's task table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub territory: TerritoryId,
    pub target: ObjectId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMemory {
    pub role: Role,
    pub home: TerritoryId,
    #[serde(default)]
    pub mode: WorkMode,
    #[serde(default)]
    pub task: Option<TaskRef>,

    /// Resource node a miner is bound to
    #[serde(default)]
    pub source: Option<ObjectId>,
    /// Container next to a miner's node
    #[serde(default)]
    pub container: Option<ObjectId>,
    /// Dedicated carrier of a miner
    #[serde(default)]
    pub paired_carrier: Option<AgentId>,
    /// Dedicated miner of a carrier
    #[serde(default)]
    pub paired_miner: Option<AgentId>,
    /// Miner a carrier serves while it has no dedicated pairing
    #[serde(default)]
    pub attached_miner: Option<AgentId>,

    #[serde(default)]
    pub drop_off: Option<ObjectId>,
    #[serde(default)]
    pub pickup: Option<ObjectId>,
    #[serde(default)]
    pub energy_pile: Option<ObjectId>,

    #[serde(default)]
    pub claim_target: Option<TerritoryId>,

    /// Territory of the operation a soldier is enlisted in
    #[serde(default)]
    pub occupation_target: Option<TerritoryId>,
    #[serde(default)]
    pub occupation_rally: Option<Position>,
    #[serde(default)]
    pub attack_in_progress: bool,

    #[serde(default)]
    pub scouting_target: Option<Position>,
    #[serde(default)]
    pub previous_territory: Option<TerritoryId>,
}

impl AgentMemory {
    pub fn new(role: Role, home: TerritoryId) -> Self {
        Self {
            role,
            home,
            mode: WorkMode::default(),
            task: None,
            source: None,
            container: None,
            paired_carrier: None,
            paired_miner: None,
            attached_miner: None,
            drop_off: None,
            pickup: None,
            energy_pile: None,
            claim_target: None,
            occupation_target: None,
            occupation_rally: None,
            attack_in_progress: false,
            scouting_target: None,
            previous_territory: None,
        }
    }

    /// Forget everything tied to a campaign
    pub fn clear_campaign(&mut self) {
        self.occupation_target = None;
        self.occupation_rally = None;
        self.attack_in_progress = false;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerritoryMemory {
    /// Task table keyed by target id
    #[serde(default)]
    pub tasks: BTreeMap<ObjectId, Task>,
    #[serde(default)]
    pub tasks_updated: Option<Tick>,
    /// Miner containers carriers should not deliver into
    #[serde(default)]
    pub drop_off_containers: BTreeSet<ObjectId>,
    /// Soldiers from this territory take part in an offensive
    #[serde(default)]
    pub occupation_in_progress: bool,
    /// Unordered endpoint-pair keys of paths already under construction
    #[serde(default)]
    pub road_keys: BTreeSet<String>,
    /// Production points whose surrounding roads have been laid out
    #[serde(default)]
    pub spawns_with_roads: BTreeSet<ObjectId>,
}

/// Decision state of structures that have no native record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureMemory {
    #[serde(default)]
    pub attack_target: Option<ObjectId>,
    #[serde(default)]
    pub repair_task: Option<TaskRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkerMemory {
    #[serde(default)]
    pub scouting_needed: bool,
    /// A scout is being produced for this marker
    #[serde(default)]
    pub reserved: bool,
    #[serde(default)]
    pub scout: Option<AgentId>,
    /// Territory funding the marker's campaign or claim
    #[serde(default)]
    pub owner: Option<TerritoryId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStore {
    #[serde(default)]
    pub agents: BTreeMap<AgentId, AgentMemory>,
    #[serde(default)]
    pub territories: BTreeMap<TerritoryId, TerritoryMemory>,
    #[serde(default)]
    pub structures: BTreeMap<ObjectId, StructureMemory>,
    #[serde(default)]
    pub markers: BTreeMap<String, MarkerMemory>,
    /// Campaign operations keyed by contested territory
    #[serde(default)]
    pub operations: BTreeMap<TerritoryId, Operation>,
    #[serde(default)]
    pub last_gc: Option<Tick>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn agent(&self, id: AgentId) -> Option<&AgentMemory> {
        self.agents.get(&id)
    }

    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut AgentMemory> {
        self.agents.get_mut(&id)
    }

    /// Agent record that must exist
    pub fn require_agent(&self, id: AgentId) -> Result<&AgentMemory> {
        self.agents.get(&id).ok_or(SwarmError::MissingMemory(id))
    }

    pub fn require_agent_mut(&mut self, id: AgentId) -> Result<&mut AgentMemory> {
        self.agents.get_mut(&id).ok_or(SwarmError::MissingMemory(id))
    }

    pub fn role_of(&self, id: AgentId) -> Option<Role> {
        self.agents.get(&id).map(|a| a.role)
    }

    pub fn territory(&self, id: TerritoryId) -> Option<&TerritoryMemory> {
        self.territories.get(&id)
    }

    pub fn territory_mut(&mut self, id: TerritoryId) -> &mut TerritoryMemory {
        self.territories.entry(id).or_default()
    }

    pub fn structure(&self, id: ObjectId) -> Option<&StructureMemory> {
        self.structures.get(&id)
    }

    pub fn structure_mut(&mut self, id: ObjectId) -> &mut StructureMemory {
        self.structures.entry(id).or_default()
    }

    pub fn marker(&self, name: &str) -> Option<&MarkerMemory> {
        self.markers.get(name)
    }

    pub fn marker_mut(&mut self, name: &str) -> &mut MarkerMemory {
        self.markers.entry(name.to_string()).or_default()
    }

    /// Look up a task through a back-reference
    pub fn task(&self, task: &TaskRef) -> Option<&Task> {
        self.territories.get(&task.territory)?.tasks.get(&task.target)
    }

    pub fn task_mut(&mut self, task: &TaskRef) -> Option<&mut Task> {
        self.territories
            .get_mut(&task.territory)?
            .tasks
            .get_mut(&task.target)
    }

    /// Serialize the whole store so it survives a process restart
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
