//! Core type definitions used throughout the codebase

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Simulation tick counter (the only unit of time the core knows)
pub type Tick = u64;

/// Identifier of any simulation object: units, structures, construction
/// sites, resource nodes and dropped resource piles share one id space.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[display(fmt = "#{}", _0)]
pub struct ObjectId(pub u64);

/// Agents are simulation objects; the alias documents intent at call sites
pub type AgentId = ObjectId;

/// Identifier of a territory (a bounded region of the world)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[display(fmt = "T{}", _0)]
pub struct TerritoryId(pub u32);

/// Side length of a territory grid
pub const TERRITORY_SIZE: i32 = 50;

/// Grid position inside a territory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub territory: TerritoryId,
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(territory: TerritoryId, x: i32, y: i32) -> Self {
        Self { territory, x, y }
    }

    /// Rally point used when a unit only knows which territory to reach
    pub fn center(territory: TerritoryId) -> Self {
        Self::new(territory, TERRITORY_SIZE / 2, TERRITORY_SIZE / 2)
    }

    /// Chessboard range between two positions, `None` across territories
    pub fn range_to(&self, other: &Position) -> Option<u32> {
        if self.territory != other.territory {
            return None;
        }
        let dx = (self.x - other.x).unsigned_abs();
        let dy = (self.y - other.y).unsigned_abs();
        Some(dx.max(dy))
    }

    /// Range with a fixed fallback for positions in different territories
    pub fn range_or(&self, other: &Position, fallback: u32) -> u32 {
        self.range_to(other).unwrap_or(fallback)
    }

    pub fn in_range(&self, other: &Position, range: u32) -> bool {
        self.range_to(other).is_some_and(|r| r <= range)
    }

    pub fn is_near_to(&self, other: &Position) -> bool {
        self.in_range(other, 1)
    }

    /// One grid step toward `target` (same territory only)
    pub fn step_toward(&self, target: &Position) -> Position {
        Position {
            territory: self.territory,
            x: self.x + (target.x - self.x).signum(),
            y: self.y + (target.y - self.y).signum(),
        }
    }

    /// Positions of the eight surrounding tiles, clipped to the grid
    pub fn neighbors(&self) -> impl Iterator<Item = Position> + '_ {
        (-1..=1)
            .flat_map(|dx| (-1..=1).map(move |dy| (dx, dy)))
            .filter(|&(dx, dy)| dx != 0 || dy != 0)
            .map(|(dx, dy)| Position::new(self.territory, self.x + dx, self.y + dy))
            .filter(|p| p.x >= 0 && p.y >= 0 && p.x < TERRITORY_SIZE && p.y < TERRITORY_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_is_chessboard_distance() {
        let a = Position::new(TerritoryId(1), 10, 10);
        let b = Position::new(TerritoryId(1), 13, 11);
        assert_eq!(a.range_to(&b), Some(3));
        assert!(a.in_range(&b, 3));
        assert!(!a.is_near_to(&b));
    }

    #[test]
    fn test_range_across_territories() {
        let a = Position::new(TerritoryId(1), 10, 10);
        let b = Position::new(TerritoryId(2), 10, 10);
        assert_eq!(a.range_to(&b), None);
        assert_eq!(a.range_or(&b, 50), 50);
        assert!(!a.in_range(&b, 100));
    }

    #[test]
    fn test_step_toward() {
        let a = Position::new(TerritoryId(1), 10, 10);
        let b = Position::new(TerritoryId(1), 5, 20);
        assert_eq!(a.step_toward(&b), Position::new(TerritoryId(1), 9, 11));
        assert_eq!(b.step_toward(&b), b);
    }

    #[test]
    fn test_neighbors_clipped_at_edge() {
        let corner = Position::new(TerritoryId(1), 0, 0);
        assert_eq!(corner.neighbors().count(), 3);
        let inner = Position::new(TerritoryId(1), 5, 5);
        assert_eq!(inner.neighbors().count(), 8);
    }

    #[test]
    fn test_ids_display() {
        assert_eq!(ObjectId(7).to_string(), "#7");
        assert_eq!(TerritoryId(3).to_string(), "T3");
    }
}
