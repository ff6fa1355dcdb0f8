//! Object storage for the simulated world

use ahash::AHashMap;

use crate::core::types::{ObjectId, Position, TerritoryId};
use crate::world::{
    ControllerView, ObjectView, PileView, SiteView, SourceView, StructureKind, StructureView,
    UnitView,
};

/// Default hit points and energy capacity of a freshly built structure
pub fn structure_stats(kind: StructureKind) -> (u32, u32) {
    match kind {
        StructureKind::Spawn => (5_000, 300),
        StructureKind::Extension => (1_000, 50),
        StructureKind::Tower => (3_000, 1_000),
        StructureKind::Container => (250_000, 2_000),
        StructureKind::Storage => (10_000, 1_000_000),
        StructureKind::Road => (5_000, 0),
        StructureKind::Wall => (300_000_000, 0),
        StructureKind::Rampart => (300_000_000, 0),
    }
}

/// Hit points a structure starts with once its construction completes
pub fn initial_hits(kind: StructureKind) -> u32 {
    match kind {
        StructureKind::Wall | StructureKind::Rampart => 1,
        other => structure_stats(other).0,
    }
}

/// Construction work needed to finish a site
pub fn build_cost(kind: StructureKind) -> u32 {
    match kind {
        StructureKind::Spawn => 15_000,
        StructureKind::Extension => 3_000,
        StructureKind::Tower => 5_000,
        StructureKind::Container => 5_000,
        StructureKind::Storage => 30_000,
        StructureKind::Road => 300,
        StructureKind::Wall | StructureKind::Rampart => 1,
    }
}

/// Storage for all objects of the simulated world
///
/// Iteration order of the hash maps is not stable, so every listing is
/// sorted by id to keep the simulation deterministic.
#[derive(Debug, Default)]
pub struct SimObjects {
    next_id: u64,
    pub units: AHashMap<ObjectId, UnitView>,
    pub structures: AHashMap<ObjectId, StructureView>,
    pub controllers: AHashMap<ObjectId, ControllerView>,
    pub sites: AHashMap<ObjectId, SiteView>,
    pub sources: AHashMap<ObjectId, SourceView>,
    pub piles: AHashMap<ObjectId, PileView>,
}

impl SimObjects {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// Hand out the next unused object id
    pub fn allocate_id(&mut self) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Look up any object by id
    pub fn get(&self, id: ObjectId) -> Option<ObjectView> {
        if let Some(u) = self.units.get(&id) {
            return Some(ObjectView::Unit(u.clone()));
        }
        if let Some(s) = self.structures.get(&id) {
            return Some(ObjectView::Structure(s.clone()));
        }
        if let Some(c) = self.controllers.get(&id) {
            return Some(ObjectView::Controller(c.clone()));
        }
        if let Some(s) = self.sites.get(&id) {
            return Some(ObjectView::Site(s.clone()));
        }
        if let Some(s) = self.sources.get(&id) {
            return Some(ObjectView::Source(s.clone()));
        }
        self.piles.get(&id).map(|p| ObjectView::Pile(p.clone()))
    }

    /// Remove an object of any kind; returns whether something was removed
    pub fn remove(&mut self, id: ObjectId) -> bool {
        self.units.remove(&id).is_some()
            || self.structures.remove(&id).is_some()
            || self.controllers.remove(&id).is_some()
            || self.sites.remove(&id).is_some()
            || self.sources.remove(&id).is_some()
            || self.piles.remove(&id).is_some()
    }

    pub fn position_of(&self, id: ObjectId) -> Option<Position> {
        self.get(id).map(|o| o.pos())
    }

    pub fn controller_in(&self, territory: TerritoryId) -> Option<&ControllerView> {
        self.controllers
            .values()
            .find(|c| c.pos.territory == territory)
    }

    pub fn units_sorted(&self) -> Vec<&UnitView> {
        sorted(self.units.values(), |u| u.id)
    }

    pub fn structures_in(&self, territory: TerritoryId) -> Vec<&StructureView> {
        sorted(
            self.structures
                .values()
                .filter(|s| s.pos.territory == territory),
            |s| s.id,
        )
    }

    pub fn sites_sorted(&self) -> Vec<&SiteView> {
        sorted(self.sites.values(), |s| s.id)
    }

    pub fn sources_in(&self, territory: TerritoryId) -> Vec<&SourceView> {
        sorted(
            self.sources.values().filter(|s| s.pos.territory == territory),
            |s| s.id,
        )
    }

    pub fn piles_in(&self, territory: TerritoryId) -> Vec<&PileView> {
        sorted(
            self.piles.values().filter(|p| p.pos.territory == territory),
            |p| p.id,
        )
    }

    pub fn pile_at(&self, pos: &Position) -> Option<ObjectId> {
        self.piles.values().find(|p| p.pos == *pos).map(|p| p.id)
    }

    /// Something already occupies the tile for construction purposes
    pub fn is_tile_taken(&self, pos: &Position, kind: StructureKind) -> bool {
        self.sites.values().any(|s| s.pos == *pos)
            || self
                .structures
                .values()
                .any(|s| s.pos == *pos && (s.kind == kind || kind != StructureKind::Rampart))
    }

    pub fn len(&self) -> usize {
        self.units.len()
            + self.structures.len()
            + self.controllers.len()
            + self.sites.len()
            + self.sources.len()
            + self.piles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn sorted<'a, T, I, F>(items: I, key: F) -> Vec<&'a T>
where
    I: Iterator<Item = &'a T>,
    F: Fn(&T) -> ObjectId,
{
    let mut items: Vec<&T> = items.collect();
    items.sort_by_key(|item| key(item));
    items
}
