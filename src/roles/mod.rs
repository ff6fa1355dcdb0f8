//! Agent roles
//!
//! Roles form a closed set; each one plans its body through the Body Planner
//! and runs one decision step per tick through [`Role::act`].

pub mod builder;
pub mod carrier;
pub mod claimer;
pub mod miner;
pub mod scout;
pub mod soldier;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::body::{self, Body};
use crate::context::TickContext;
use crate::core::config::BodyRules;
use crate::core::error::Result;
use crate::world::UnitView;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
pub enum Role {
    /// Extraction agent bound to one resource node
    #[display(fmt = "miner")]
    Miner,
    /// Transport agent moving energy from miners to consumers
    #[display(fmt = "carrier")]
    Carrier,
    /// General worker consuming the task queue
    #[display(fmt = "builder")]
    Builder,
    #[display(fmt = "claimer")]
    Claimer,
    #[display(fmt = "melee")]
    Melee,
    #[display(fmt = "medic")]
    Medic,
    #[display(fmt = "scout")]
    Scout,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::Miner,
        Role::Carrier,
        Role::Builder,
        Role::Claimer,
        Role::Melee,
        Role::Medic,
        Role::Scout,
    ];

    /// Combat roles taking part in campaigns
    pub fn is_soldier(self) -> bool {
        matches!(self, Role::Melee | Role::Medic)
    }

    /// Roles whose task search includes adjacent territories
    pub fn works_across_borders(self) -> bool {
        matches!(self, Role::Builder)
    }

    pub fn plan_body(self, budget: u32, rules: &BodyRules) -> Option<Body> {
        body::plan_body(self, budget, rules)
    }

    /// Run one tick of behavior for an agent of this role
    pub fn act(self, ctx: &mut TickContext<'_>, agent: &UnitView) -> Result<()> {
        match self {
            Role::Miner => miner::act(ctx, agent),
            Role::Carrier => carrier::act(ctx, agent),
            Role::Builder => builder::act(ctx, agent),
            Role::Claimer => claimer::act(ctx, agent),
            Role::Melee => soldier::act_melee(ctx, agent),
            Role::Medic => soldier::act_medic(ctx, agent),
            Role::Scout => scout::act(ctx, agent),
        }
    }
}
