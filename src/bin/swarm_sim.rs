//! Headless swarm runner
//!
//! Drives the decision core over a simulated world and prints what it did.
//! Hostile raiders show up at random (seeded) to exercise the defenses.

use std::path::PathBuf;

use clap::Parser;
use hivemind::body::BodyPart;
use hivemind::core::config::Ruleset;
use hivemind::core::types::{Position, TerritoryId, TERRITORY_SIZE};
use hivemind::simulation::{Simulation, TickReport};
use hivemind::world::{Owner, Scenario, ScenarioLoader, World};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "swarm_sim")]
#[command(about = "Run the swarm decision core against a simulated world")]
struct Args {
    /// Number of ticks to simulate
    #[arg(long, default_value_t = 500)]
    ticks: u64,

    /// Random seed for raider arrivals
    #[arg(long)]
    seed: Option<u64>,

    /// Ruleset TOML file (defaults are used when absent)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Scenario JSON file (the built-in starter scenario when absent)
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Chance per tick that a raider enters an owned territory
    #[arg(long, default_value_t = 0.005)]
    raid_chance: f64,

    /// Print a status line every N ticks (text format only)
    #[arg(long, default_value_t = 50)]
    report_every: u64,

    /// Output format: text or json
    #[arg(long, default_value = "text")]
    format: String,

    /// Write the final memory store to this file
    #[arg(long)]
    save_memory: Option<PathBuf>,
}

/// JSON output structure
#[derive(Serialize, Default)]
struct RunSummary {
    seed: u64,
    ticks: u64,
    produced: usize,
    renewed: usize,
    raids: usize,
    tower_attacks: usize,
    tower_repairs: usize,
    campaign_changes: usize,
    faults: usize,
    agents_alive: usize,
    owned_territories: usize,
}

impl RunSummary {
    fn absorb(&mut self, report: &TickReport) {
        self.ticks += 1;
        self.produced += report.produced.len();
        self.renewed += report.renewed.len();
        self.tower_attacks += report.tower_attacks;
        self.tower_repairs += report.tower_repairs;
        self.campaign_changes += report.campaign.len();
        self.faults += report.faults;
    }
}

fn owned_territories(world: &dyn World) -> Vec<TerritoryId> {
    world
        .visible_territories()
        .into_iter()
        .filter(|t| world.territory(*t).is_some_and(|v| v.is_mine()))
        .collect()
}

fn send_raider(sim: &mut Simulation, rng: &mut ChaCha8Rng, serial: usize) -> bool {
    let targets = owned_territories(&sim.world);
    if targets.is_empty() {
        return false;
    }
    let territory = targets[rng.gen_range(0..targets.len())];
    let edge = if rng.gen_bool(0.5) { 0 } else { TERRITORY_SIZE - 1 };
    let pos = Position::new(territory, edge, rng.gen_range(0..TERRITORY_SIZE));
    let body: &[BodyPart] = if rng.gen_bool(0.5) {
        &[BodyPart::Attack, BodyPart::Move]
    } else {
        &[BodyPart::RangedAttack, BodyPart::Move, BodyPart::Move]
    };
    let id = sim.world.add_unit(Owner::Hostile, &format!("raider-{}", serial), pos, body);
    tracing::info!(raider = %id, territory = %territory, "raider arrived");
    true
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("hivemind=info")),
        )
        .init();

    let args = Args::parse();
    let seed = args.seed.unwrap_or_else(|| rand::random());
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let rules = match &args.config {
        Some(path) => Ruleset::load(path)?,
        None => Ruleset::default(),
    };
    let loader = ScenarioLoader::new(&rules);
    let world = match &args.scenario {
        Some(path) => loader.load_from_file(path)?,
        None => loader.load_scenario(&Scenario::starter())?,
    };

    tracing::info!(seed, ticks = args.ticks, "starting swarm simulation");
    let mut sim = Simulation::new(world, rules);
    let mut summary = RunSummary {
        seed,
        ..Default::default()
    };

    for _ in 0..args.ticks {
        if rng.gen_bool(args.raid_chance.clamp(0.0, 1.0)) && send_raider(&mut sim, &mut rng, summary.raids) {
            summary.raids += 1;
        }
        let report = sim.step();
        summary.absorb(&report);

        if args.format == "text" && args.report_every > 0 && report.tick % args.report_every == 0 {
            let world: &dyn World = &sim.world;
            let energy: u32 = owned_territories(world)
                .into_iter()
                .filter_map(|t| world.territory(t))
                .map(|t| t.energy_available)
                .sum();
            println!(
                "tick {:>5} | agents {:>3} | energy {:>5} | produced {:>3} | faults {}",
                report.tick,
                world.my_units().len(),
                energy,
                summary.produced,
                summary.faults
            );
        }
    }

    summary.agents_alive = sim.world.my_units().len();
    summary.owned_territories = owned_territories(&sim.world).len();

    if let Some(path) = &args.save_memory {
        std::fs::write(path, sim.memory.to_json()?)?;
    }

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!();
        println!("Simulated {} ticks (seed {})", summary.ticks, seed);
        println!("  agents alive:       {}", summary.agents_alive);
        println!("  owned territories:  {}", summary.owned_territories);
        println!("  produced / renewed: {} / {}", summary.produced, summary.renewed);
        println!("  raids:              {}", summary.raids);
        println!("  tower attacks:      {}", summary.tower_attacks);
        println!("  tower repairs:      {}", summary.tower_repairs);
        println!("  campaign changes:   {}", summary.campaign_changes);
        println!("  contained faults:   {}", summary.faults);
    }
    Ok(())
}
