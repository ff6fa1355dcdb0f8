//! Body Planner - maps an energy budget to an ordered list of body segments
//!
//! Every role has a greedy fill loop: repeatedly add the next eligible segment
//! that is affordable, subject to the role's ratio constraints, until the
//! budget or the segment cap runs out. Planning is pure and deterministic.
//!
//! `None` means the budget cannot afford the minimal viable body for the role.
//! That is a normal planning outcome ("cannot produce yet"), not an error.

use serde::{Deserialize, Serialize};

use crate::core::config::{BodyRules, PartCosts};
use crate::roles::Role;

/// A single body segment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BodyPart {
    Move,
    Work,
    Carry,
    Attack,
    RangedAttack,
    Heal,
    Claim,
    Tough,
}

impl BodyPart {
    /// Output layer: defensive segments first, offense / utility next,
    /// movement last (segments in front absorb damage first)
    fn layer(self) -> u8 {
        match self {
            BodyPart::Tough => 0,
            BodyPart::Attack | BodyPart::RangedAttack => 1,
            BodyPart::Heal => 2,
            BodyPart::Work => 3,
            BodyPart::Carry => 4,
            BodyPart::Claim => 5,
            BodyPart::Move => 6,
        }
    }

    pub fn is_offensive(self) -> bool {
        matches!(self, BodyPart::Attack | BodyPart::RangedAttack)
    }
}

/// Ordered list of body segments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body(Vec<BodyPart>);

impl Body {
    pub fn new(parts: Vec<BodyPart>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[BodyPart] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn count(&self, part: BodyPart) -> usize {
        self.0.iter().filter(|p| **p == part).count()
    }

    pub fn cost(&self, costs: &PartCosts) -> u32 {
        self.0.iter().map(|p| costs.cost(*p)).sum()
    }

    pub fn into_parts(self) -> Vec<BodyPart> {
        self.0
    }
}

/// Segment counters used while filling a body
#[derive(Debug, Default, Clone, Copy)]
struct Fill {
    movement: usize,
    work: usize,
    carry: usize,
    attack: usize,
    heal: usize,
    claim: usize,
    tough: usize,
    spent: u32,
}

impl Fill {
    fn total(&self) -> usize {
        self.movement + self.work + self.carry + self.attack + self.heal + self.claim + self.tough
    }

    fn add(&mut self, part: BodyPart, costs: &PartCosts) {
        self.spent += costs.cost(part);
        match part {
            BodyPart::Move => self.movement += 1,
            BodyPart::Work => self.work += 1,
            BodyPart::Carry => self.carry += 1,
            BodyPart::Attack | BodyPart::RangedAttack => self.attack += 1,
            BodyPart::Heal => self.heal += 1,
            BodyPart::Claim => self.claim += 1,
            BodyPart::Tough => self.tough += 1,
        }
    }

    /// Pad leftover budget with the cheapest defensive segment
    fn pad_tough(&mut self, budget: u32, rules: &BodyRules) {
        let tough = rules.costs.tough;
        if tough == 0 {
            return;
        }
        while budget - self.spent >= tough && self.total() < rules.max_segments {
            self.add(BodyPart::Tough, &rules.costs);
        }
    }

    fn into_body(self) -> Body {
        let mut parts = Vec::with_capacity(self.total());
        for (part, n) in [
            (BodyPart::Tough, self.tough),
            (BodyPart::Attack, self.attack),
            (BodyPart::Heal, self.heal),
            (BodyPart::Work, self.work),
            (BodyPart::Carry, self.carry),
            (BodyPart::Claim, self.claim),
            (BodyPart::Move, self.movement),
        ] {
            parts.extend(std::iter::repeat(part).take(n));
        }
        debug_assert!(parts.windows(2).all(|w| w[0].layer() <= w[1].layer()));
        Body(parts)
    }
}

/// Cheapest body the role can function with
pub fn minimum_cost(role: Role, rules: &BodyRules) -> u32 {
    let c = &rules.costs;
    match role {
        Role::Miner | Role::Builder => c.work + c.carry + c.movement,
        Role::Carrier => c.carry + c.movement,
        Role::Claimer => c.claim + c.movement,
        Role::Melee => c.attack + c.movement,
        Role::Medic => c.heal + c.movement,
        Role::Scout => c.movement,
    }
}

/// Plan the body of a new agent for `role` within `budget`
pub fn plan_body(role: Role, budget: u32, rules: &BodyRules) -> Option<Body> {
    if budget < minimum_cost(role, rules) {
        return None;
    }

    let fill = match role {
        Role::Miner => fill_miner(budget, rules),
        Role::Carrier => fill_carrier(budget, rules),
        Role::Builder => fill_builder(budget, rules),
        Role::Claimer => fill_claimer(budget, rules),
        Role::Melee => fill_melee(budget, rules),
        Role::Medic => fill_medic(budget, rules),
        Role::Scout => {
            let mut fill = Fill::default();
            fill.add(BodyPart::Move, &rules.costs);
            fill
        }
    };

    Some(fill.into_body())
}

/// Work segments never exceed `miner_work_per_carry` per carry segment
fn fill_miner(budget: u32, rules: &BodyRules) -> Fill {
    let c = &rules.costs;
    let mut fill = Fill::default();

    while fill.total() < rules.max_segments {
        let left = budget - fill.spent;
        if fill.movement == 0 && left >= c.movement {
            fill.add(BodyPart::Move, c);
        } else if left >= c.work
            && fill.work < rules.miner_max_work
            && fill.work < rules.miner_work_per_carry * fill.carry
        {
            fill.add(BodyPart::Work, c);
        } else if left >= c.carry && fill.carry < rules.miner_max_carry {
            fill.add(BodyPart::Carry, c);
        } else {
            break;
        }
    }

    fill
}

fn fill_carrier(budget: u32, rules: &BodyRules) -> Fill {
    let c = &rules.costs;
    let mut fill = Fill::default();

    while fill.total() < rules.max_segments {
        let left = budget - fill.spent;
        if left >= c.movement && fill.movement <= fill.carry {
            fill.add(BodyPart::Move, c);
        } else if left >= c.carry {
            fill.add(BodyPart::Carry, c);
        } else {
            break;
        }
    }

    fill
}

fn fill_builder(budget: u32, rules: &BodyRules) -> Fill {
    let c = &rules.costs;
    let mut fill = Fill::default();

    while fill.total() < rules.max_segments {
        let left = budget - fill.spent;
        if left >= c.work && fill.work <= fill.carry {
            fill.add(BodyPart::Work, c);
        } else if left >= c.movement && fill.movement < fill.work {
            fill.add(BodyPart::Move, c);
        } else if left >= c.carry {
            fill.add(BodyPart::Carry, c);
        } else {
            break;
        }
    }

    fill
}

fn fill_claimer(budget: u32, rules: &BodyRules) -> Fill {
    let c = &rules.costs;
    let pair = c.claim + c.movement;
    let mut fill = Fill::default();

    while budget - fill.spent >= pair && fill.total() + 2 <= rules.max_segments {
        fill.add(BodyPart::Claim, c);
        fill.add(BodyPart::Move, c);
    }

    fill
}

/// Movement segments are kept at or above combat segments
fn fill_melee(budget: u32, rules: &BodyRules) -> Fill {
    let c = &rules.costs;
    let mut fill = Fill::default();

    loop {
        let left = budget - fill.spent;
        if fill.movement < fill.attack {
            fill.add(BodyPart::Move, c);
        } else if fill.total() + 2 <= rules.max_segments && left >= c.attack + c.movement {
            fill.add(BodyPart::Attack, c);
        } else {
            break;
        }
    }

    fill.pad_tough(budget, rules);
    fill
}

/// One attack segment per heal segment beyond the first, movement matching
/// all combat segments
fn fill_medic(budget: u32, rules: &BodyRules) -> Fill {
    let c = &rules.costs;
    let mut fill = Fill::default();

    loop {
        let left = budget - fill.spent;
        let room = fill.total() + 2 <= rules.max_segments;
        if fill.movement < fill.attack + fill.heal {
            fill.add(BodyPart::Move, c);
        } else if room && fill.attack + 1 < fill.heal && left >= c.attack + c.movement {
            fill.add(BodyPart::Attack, c);
        } else if room && left >= c.heal + c.movement {
            fill.add(BodyPart::Heal, c);
        } else {
            break;
        }
    }

    fill.pad_tough(budget, rules);
    fill
}

#[cfg(test)]
mod tests {
    use super::*;
    use BodyPart::*;

    fn rules() -> BodyRules {
        BodyRules::default()
    }

    #[test]
    fn test_carrier_minimum_body() {
        let body = plan_body(Role::Carrier, 100, &rules()).expect("Should afford carrier");
        assert_eq!(body.parts(), &[Carry, Move]);
    }

    #[test]
    fn test_below_minimum_returns_none() {
        let r = rules();
        for role in Role::ALL {
            let min = minimum_cost(role, &r);
            assert!(plan_body(role, min - 1, &r).is_none(), "{:?} below minimum", role);
            assert!(plan_body(role, min, &r).is_some(), "{:?} at minimum", role);
        }
    }

    #[test]
    fn test_miner_work_limits() {
        let r = rules();
        let body = plan_body(Role::Miner, 200, &r).unwrap();
        assert_eq!(body.parts(), &[Work, Carry, Move]);

        let body = plan_body(Role::Miner, 500, &r).unwrap();
        assert_eq!(body.count(Work), 3);

        let body = plan_body(Role::Miner, 10_000, &r).unwrap();
        assert_eq!(body.count(Work), 5);
        assert!(body.count(Work) <= 3 * body.count(Carry));
        assert_eq!(body.count(Move), 1);
        assert!(body.count(Carry) <= r.miner_max_carry);
    }

    #[test]
    fn test_miner_ratio_across_budgets() {
        let r = rules();
        for budget in (200..=1200).step_by(50) {
            let body = plan_body(Role::Miner, budget, &r).unwrap();
            assert!(
                body.count(Work) <= r.miner_work_per_carry * body.count(Carry),
                "budget {}: {:?}",
                budget,
                body.parts()
            );
            assert!(body.count(Work) >= 1);
            assert!(body.cost(&r.costs) <= budget);
        }
    }

    #[test]
    fn test_carrier_alternates_move_and_carry() {
        let body = plan_body(Role::Carrier, 550, &rules()).unwrap();
        let moves = body.count(Move) as i64;
        let carries = body.count(Carry) as i64;
        assert!((moves - carries).abs() <= 1);
        assert_eq!(body.cost(&rules().costs), 550);
    }

    #[test]
    fn test_combat_bodies_keep_movement() {
        let r = rules();
        for budget in [130, 300, 550, 800, 1300, 5000] {
            let melee = plan_body(Role::Melee, budget, &r).unwrap();
            assert!(melee.count(Move) >= melee.count(Attack));

            if let Some(medic) = plan_body(Role::Medic, budget, &r) {
                assert!(medic.count(Move) >= medic.count(Attack) + medic.count(Heal));
            }
        }
    }

    #[test]
    fn test_segment_order_defensive_first_movement_last() {
        let body = plan_body(Role::Melee, 555, &rules()).unwrap();
        assert_eq!(body.parts().first(), Some(&Tough));
        assert_eq!(body.parts().last(), Some(&Move));

        let medic = plan_body(Role::Medic, 1000, &rules()).unwrap();
        let heal_idx = medic.parts().iter().position(|p| *p == Heal).unwrap();
        let move_idx = medic.parts().iter().position(|p| *p == Move).unwrap();
        assert!(heal_idx < move_idx);
    }

    #[test]
    fn test_claimer_pairs() {
        let r = rules();
        let body = plan_body(Role::Claimer, 1400, &r).unwrap();
        assert_eq!(body.parts(), &[Claim, Claim, Move, Move]);
    }

    #[test]
    fn test_segment_cap() {
        let r = rules();
        for role in Role::ALL {
            let body = plan_body(role, 1_000_000, &r).unwrap();
            assert!(body.len() <= r.max_segments, "{:?} exceeded cap", role);
        }
    }
}
