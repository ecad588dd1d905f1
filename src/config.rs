use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "otimapp",
    about = "Offline time-independent multi-agent path planning in Rust.",
    version = "0.1"
)]
pub struct Cli {
    #[arg(long, help = "Path to a YAML config file; flags override its values")]
    pub config: Option<String>,

    #[arg(long, help = "Path to the YAML instance file")]
    pub instance: Option<String>,

    #[arg(long, help = "Map file to use instead of the one named by the instance")]
    pub map: Option<String>,

    #[arg(long, help = "Path to the JSON run log")]
    pub output: Option<String>,

    #[arg(long, help = "Solver to use: pp, cp or dbs")]
    pub solver: Option<String>,

    #[arg(long, help = "Plan only for the first N agents of the instance")]
    pub num_agents: Option<usize>,

    #[arg(long, help = "Seed for the random number generator")]
    pub seed: Option<u64>,

    #[arg(long, help = "Computation budget in milliseconds")]
    pub time_limit_ms: Option<u64>,

    #[arg(
        long,
        help = "Orderings tried by prioritized planning before giving up"
    )]
    pub pp_iter_max: Option<usize>,

    #[arg(
        long,
        help = "Longest fragment the deadlock table keeps; unbounded when omitted"
    )]
    pub max_fragment_size: Option<usize>,

    #[arg(long, help = "High-level objective: swaps or soc")]
    pub objective: Option<String>,

    #[arg(
        long,
        help = "Emulate asynchronous execution of the solved plan",
        default_value_t = false
    )]
    pub emulate: bool,

    #[arg(long, help = "Upper bound for the per-agent delay probabilities")]
    pub ub_delay_prob: Option<f64>,

    #[arg(
        long,
        help = "Write a random instance to --output instead of solving",
        default_value_t = false
    )]
    pub make_scen: bool,

    #[arg(long, help = "Log at debug level", default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub instance: String,
    pub map: Option<String>,
    pub output: Option<String>,
    pub solver: String,
    pub num_agents: Option<usize>,
    pub seed: u64,
    pub time_limit_ms: u64,
    pub pp_iter_max: usize,
    pub max_fragment_size: Option<usize>,
    pub objective: String,
    pub emulate: bool,
    pub ub_delay_prob: f64,
    pub make_scen: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            instance: "instances/sample.yaml".to_string(),
            map: None,
            output: None,
            solver: "pp".to_string(),
            num_agents: None,
            seed: 0,
            time_limit_ms: 60_000,
            pp_iter_max: 10,
            max_fragment_size: None,
            objective: "swaps".to_string(),
            emulate: false,
            ub_delay_prob: 0.5,
            make_scen: false,
        }
    }
}

impl Config {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("malformed config file")
    }

    pub fn override_from_command_line(mut self, cli: &Cli) -> Self {
        if let Some(instance) = &cli.instance {
            self.instance = instance.clone();
        }
        if let Some(map) = &cli.map {
            self.map = Some(map.clone());
        }
        if let Some(output) = &cli.output {
            self.output = Some(output.clone());
        }
        if let Some(solver) = &cli.solver {
            self.solver = solver.clone();
        }
        if let Some(num_agents) = cli.num_agents {
            self.num_agents = Some(num_agents);
        }
        if let Some(seed) = cli.seed {
            self.seed = seed;
        }
        if let Some(time_limit_ms) = cli.time_limit_ms {
            self.time_limit_ms = time_limit_ms;
        }
        if let Some(pp_iter_max) = cli.pp_iter_max {
            self.pp_iter_max = pp_iter_max;
        }
        if let Some(max_fragment_size) = cli.max_fragment_size {
            self.max_fragment_size = Some(max_fragment_size);
        }
        if let Some(objective) = &cli.objective {
            self.objective = objective.clone();
        }
        if cli.emulate {
            self.emulate = true;
        }
        if let Some(ub_delay_prob) = cli.ub_delay_prob {
            self.ub_delay_prob = ub_delay_prob;
        }
        if cli.make_scen {
            self.make_scen = true;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        match self.solver.as_str() {
            "pp" | "cp" | "dbs" => {}
            other => return Err(anyhow!("unknown solver {other:?}, expected pp, cp or dbs")),
        }
        match self.objective.as_str() {
            "swaps" | "soc" => {}
            other => {
                return Err(anyhow!(
                    "unknown objective {other:?}, expected swaps or soc"
                ))
            }
        }
        if self.pp_iter_max == 0 {
            return Err(anyhow!("pp_iter_max must be at least 1"));
        }
        if self.max_fragment_size == Some(0) {
            return Err(anyhow!("max_fragment_size must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.ub_delay_prob) {
            return Err(anyhow!(
                "ub_delay_prob must lie in [0, 1), got {}",
                self.ub_delay_prob
            ));
        }
        Ok(())
    }

    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.time_limit_ms)
    }
}
