use otimapp_rust::common::Path;
use otimapp_rust::config::{Cli, Config};
use otimapp_rust::execution::{emulate, ExecutionRecord};
use otimapp_rust::map::Map;
use otimapp_rust::scenario::Scenario;
use otimapp_rust::solver::{build_solver, Outcome};

use anyhow::Context;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn, Level};

#[derive(Serialize)]
struct RunLog<'a> {
    solver: &'a str,
    solved: bool,
    unsolvable: bool,
    comp_time_ms: u128,
    starts: Vec<(usize, usize)>,
    goals: Vec<(usize, usize)>,
    sum_of_costs: Option<usize>,
    plan: Option<&'a [Path]>,
    execution: Option<&'a ExecutionRecord>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let config = if let Some(config_file) = cli.config.as_ref() {
        let content = std::fs::read_to_string(config_file)
            .with_context(|| format!("cannot read config file {config_file:?}"))?;
        Config::from_yaml_str(&content)
            .with_context(|| format!("error with config file: {config_file}"))?
    } else {
        info!("no config file given, starting from defaults");
        Config::default()
    }
    .override_from_command_line(&cli);
    config.validate()?;

    let scenario = Scenario::load_from_file(&config.instance)?;
    let map_path = config.map.clone().unwrap_or_else(|| scenario.map.clone());

    if config.make_scen {
        let output = config
            .output
            .as_deref()
            .context("--make-scen needs --output to name the new instance")?;
        let map = Map::from_file(&map_path, &Vec::new())?;
        let num_agents = config.num_agents.unwrap_or(scenario.agents.len());
        let mut rng = StdRng::seed_from_u64(config.seed);
        let generated = Scenario::generate_random(&map, &map_path, num_agents, &mut rng)?;
        generated.write_to_file(output)?;
        info!("instance with {num_agents} agents written to {output}");
        return Ok(());
    }

    let agents = scenario.agents(config.num_agents)?;
    let map = Map::from_file(&map_path, &agents)?;
    for agent in &agents {
        agent.verify(&map)?;
    }
    info!(
        "solving {:?} on {map_path:?}: {} agents, solver {}, seed {}",
        config.instance,
        agents.len(),
        config.solver,
        config.seed
    );

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut solver = build_solver(&config.solver, &agents, &map)?;
    let solve_start = Instant::now();
    let outcome = solver.solve(&config, &mut rng);
    let comp_time_ms = solve_start.elapsed().as_millis();

    match &outcome {
        Outcome::Solved(solution) => {
            solution.verify(&map, &agents)?;
            info!("solved, sum of costs {}", solution.sum_of_costs());
        }
        Outcome::Exhausted => warn!("no plan within the budget, verdict open"),
        Outcome::Unsolvable => warn!("no deadlock-free plan exists for this instance"),
    }

    let execution = match (&outcome, config.emulate) {
        (Outcome::Solved(solution), true) => {
            Some(emulate(&map, solution, config.ub_delay_prob, &mut rng))
        }
        _ => None,
    };

    if let Some(output) = config.output.as_ref() {
        let solution = outcome.solution();
        let log = RunLog {
            solver: &config.solver,
            solved: outcome.is_solved(),
            unsolvable: outcome.is_unsolvable(),
            comp_time_ms,
            starts: agents.iter().map(|a| a.start).collect(),
            goals: agents.iter().map(|a| a.goal).collect(),
            sum_of_costs: solution.map(|s| s.sum_of_costs()),
            plan: solution.map(|s| s.paths.as_slice()),
            execution: execution.as_ref(),
        };
        std::fs::write(output, serde_json::to_string_pretty(&log)?)
            .with_context(|| format!("cannot write run log {output:?}"))?;
        info!("run log written to {output}");
    }

    Ok(())
}
