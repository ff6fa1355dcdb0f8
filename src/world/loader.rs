//! Load simulated worlds from JSON scenario files
//!
//! A scenario lists territories with their adjacency and the objects placed
//! in them. `ScenarioLoader` turns one into a ready-to-run [`SimWorld`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::body::BodyPart;
use crate::core::config::Ruleset;
use crate::core::types::{Position, TerritoryId};
use crate::world::sim::SimWorld;
use crate::world::{MarkerKind, Owner, StructureKind};

/// Errors that can occur when loading a scenario
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// JSON parsing failed
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
    /// An object references a territory the scenario does not declare
    #[error("Unknown territory: {0}")]
    UnknownTerritory(TerritoryId),
    /// File I/O error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioController {
    pub owner: Owner,
    #[serde(default)]
    pub level: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioTerritory {
    pub id: TerritoryId,
    #[serde(default)]
    pub adjacent: Vec<TerritoryId>,
    #[serde(default)]
    pub controller: Option<ScenarioController>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioStructure {
    pub kind: StructureKind,
    #[serde(default = "default_owner")]
    pub owner: Owner,
    pub pos: Position,
    /// Starting energy, defaults to empty
    #[serde(default)]
    pub energy: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioUnit {
    pub name: String,
    #[serde(default = "default_owner")]
    pub owner: Owner,
    pub pos: Position,
    pub body: Vec<BodyPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioMarker {
    pub name: String,
    pub kind: MarkerKind,
    pub pos: Position,
}

/// Serialized description of a starting world
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub territories: Vec<ScenarioTerritory>,
    #[serde(default)]
    pub structures: Vec<ScenarioStructure>,
    #[serde(default)]
    pub sources: Vec<Position>,
    #[serde(default)]
    pub units: Vec<ScenarioUnit>,
    #[serde(default)]
    pub markers: Vec<ScenarioMarker>,
    #[serde(default = "default_limit")]
    pub owned_territory_limit: usize,
}

fn default_owner() -> Owner {
    Owner::Mine
}

fn default_limit() -> usize {
    1
}

impl Scenario {
    /// One owned territory with a stocked production point and two
    /// resource nodes, a neutral neighbour and a hostile one behind it
    pub fn starter() -> Self {
        let home = TerritoryId(1);
        let neutral = TerritoryId(2);
        let hostile = TerritoryId(3);
        Self {
            territories: vec![
                ScenarioTerritory {
                    id: home,
                    adjacent: vec![neutral],
                    controller: Some(ScenarioController {
                        owner: Owner::Mine,
                        level: 2,
                    }),
                },
                ScenarioTerritory {
                    id: neutral,
                    adjacent: vec![home, hostile],
                    controller: Some(ScenarioController {
                        owner: Owner::Neutral,
                        level: 0,
                    }),
                },
                ScenarioTerritory {
                    id: hostile,
                    adjacent: vec![neutral],
                    controller: Some(ScenarioController {
                        owner: Owner::Hostile,
                        level: 3,
                    }),
                },
            ],
            structures: vec![
                ScenarioStructure {
                    kind: StructureKind::Spawn,
                    owner: Owner::Mine,
                    pos: Position::new(home, 20, 20),
                    energy: 300,
                },
                ScenarioStructure {
                    kind: StructureKind::Extension,
                    owner: Owner::Mine,
                    pos: Position::new(home, 22, 20),
                    energy: 50,
                },
                ScenarioStructure {
                    kind: StructureKind::Tower,
                    owner: Owner::Mine,
                    pos: Position::new(home, 24, 22),
                    energy: 500,
                },
                ScenarioStructure {
                    kind: StructureKind::Tower,
                    owner: Owner::Hostile,
                    pos: Position::new(hostile, 25, 20),
                    energy: 1000,
                },
            ],
            sources: vec![Position::new(home, 10, 12), Position::new(home, 38, 30)],
            units: vec![ScenarioUnit {
                name: "raider".to_string(),
                owner: Owner::Hostile,
                pos: Position::new(hostile, 30, 30),
                body: vec![BodyPart::Attack, BodyPart::Move],
            }],
            markers: vec![ScenarioMarker {
                name: "expand".to_string(),
                kind: MarkerKind::Claim,
                pos: Position::center(neutral),
            }],
            owned_territory_limit: 2,
        }
    }
}

/// Loader that converts scenarios into simulated worlds
pub struct ScenarioLoader<'a> {
    rules: &'a Ruleset,
}

impl<'a> ScenarioLoader<'a> {
    /// Create a new loader whose worlds follow `rules`
    pub fn new(rules: &'a Ruleset) -> Self {
        Self { rules }
    }

    /// Load a scenario from a JSON string
    pub fn load_from_json(&self, json: &str) -> Result<SimWorld, ScenarioError> {
        let scenario: Scenario = serde_json::from_str(json)?;
        self.load_scenario(&scenario)
    }

    /// Load a scenario from a JSON file on disk
    pub fn load_from_file(&self, path: &Path) -> Result<SimWorld, ScenarioError> {
        let content = std::fs::read_to_string(path)?;
        self.load_from_json(&content)
    }

    /// Build the world described by `scenario`
    pub fn load_scenario(&self, scenario: &Scenario) -> Result<SimWorld, ScenarioError> {
        let mut world = SimWorld::with_rules(self.rules.clone());
        world.set_owned_territory_limit(scenario.owned_territory_limit);

        let declared: Vec<TerritoryId> = scenario.territories.iter().map(|t| t.id).collect();
        let check = |id: TerritoryId| {
            if declared.contains(&id) {
                Ok(())
            } else {
                Err(ScenarioError::UnknownTerritory(id))
            }
        };

        for territory in &scenario.territories {
            world.add_territory(territory.id);
            for adjacent in &territory.adjacent {
                check(*adjacent)?;
                world.connect(territory.id, *adjacent);
            }
            if let Some(controller) = &territory.controller {
                world.add_controller(territory.id, controller.owner, controller.level);
            }
        }

        for structure in &scenario.structures {
            check(structure.pos.territory)?;
            let id = world.add_structure(structure.kind, structure.owner, structure.pos);
            if let Some(s) = world.structure_mut(id) {
                s.energy = structure.energy.min(s.energy_capacity);
            }
        }

        for source in &scenario.sources {
            check(source.territory)?;
            world.add_source(*source);
        }

        for unit in &scenario.units {
            check(unit.pos.territory)?;
            world.add_unit(unit.owner, &unit.name, unit.pos, &unit.body);
        }

        for marker in &scenario.markers {
            check(marker.pos.territory)?;
            world.add_marker(&marker.name, marker.kind, marker.pos);
        }

        tracing::info!(
            territories = scenario.territories.len(),
            objects = world.objects().len(),
            markers = scenario.markers.len(),
            "scenario loaded"
        );
        Ok(world)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::World;

    #[test]
    fn test_load_minimal_scenario() {
        let json = r#"{
            "territories": [
                { "id": 1, "adjacent": [2], "controller": { "owner": "Mine", "level": 1 } },
                { "id": 2, "adjacent": [1] }
            ],
            "structures": [
                { "kind": "Spawn", "pos": { "territory": 1, "x": 10, "y": 10 }, "energy": 250 }
            ],
            "sources": [ { "territory": 1, "x": 5, "y": 5 } ],
            "markers": [
                { "name": "attack", "kind": "Occupy", "pos": { "territory": 2, "x": 25, "y": 25 } }
            ]
        }"#;

        let rules = Ruleset::default();
        let world = ScenarioLoader::new(&rules).load_from_json(json).unwrap();

        let home = world.territory(TerritoryId(1)).unwrap();
        assert!(home.is_mine());
        assert_eq!(home.energy_available, 250);
        assert_eq!(world.sources(TerritoryId(1)).len(), 1);
        assert_eq!(world.adjacent_territories(TerritoryId(1)), vec![TerritoryId(2)]);
        assert_eq!(world.markers().len(), 1);
        assert_eq!(world.owned_territory_limit(), 1);
    }

    #[test]
    fn test_unknown_territory_rejected() {
        let json = r#"{
            "territories": [ { "id": 1 } ],
            "sources": [ { "territory": 4, "x": 5, "y": 5 } ]
        }"#;
        let rules = Ruleset::default();
        let result = ScenarioLoader::new(&rules).load_from_json(json);
        assert!(matches!(result, Err(ScenarioError::UnknownTerritory(TerritoryId(4)))));
    }

    #[test]
    fn test_malformed_json() {
        let rules = Ruleset::default();
        let result = ScenarioLoader::new(&rules).load_from_json("{ not json");
        assert!(matches!(result, Err(ScenarioError::JsonError(_))));
    }

    #[test]
    fn test_starter_round_trips_through_json() {
        let json = serde_json::to_string(&Scenario::starter()).unwrap();
        let rules = Ruleset::default();
        let world = ScenarioLoader::new(&rules).load_from_json(&json).unwrap();
        assert_eq!(world.visible_territories(), vec![TerritoryId(1)]);
        assert_eq!(world.owned_territory_limit(), 2);
    }
}
