mod algorithm;
mod comm;
mod conflict_tree;
mod cp;
mod dbs;
mod prioritized;

pub use cp::CompletePlanning;
pub use dbs::DBS;
pub use prioritized::PrioritizedPlanning;

use anyhow::{bail, Result};
use rand::rngs::StdRng;

use crate::common::{Agent, Solution};
use crate::config::Config;
use crate::map::Map;

/// How a solve attempt ended. `Exhausted` means the solver gave up within its
/// budget without a verdict, while `Unsolvable` is a proof that no plan exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Solved(Solution),
    Exhausted,
    Unsolvable,
}

impl Outcome {
    pub fn solution(&self) -> Option<&Solution> {
        match self {
            Outcome::Solved(solution) => Some(solution),
            _ => None,
        }
    }

    pub fn is_solved(&self) -> bool {
        matches!(self, Outcome::Solved(_))
    }

    pub fn is_unsolvable(&self) -> bool {
        matches!(self, Outcome::Unsolvable)
    }
}

pub trait Solver {
    fn solve(&mut self, config: &Config, rng: &mut StdRng) -> Outcome;
}

pub fn build_solver(name: &str, agents: &[Agent], map: &Map) -> Result<Box<dyn Solver>> {
    let solver: Box<dyn Solver> = match name {
        "pp" => Box::new(PrioritizedPlanning::new(agents.to_vec(), map)),
        "cp" => Box::new(CompletePlanning::new(agents.to_vec(), map)),
        "dbs" => Box::new(DBS::new(agents.to_vec(), map)),
        _ => bail!("unknown solver {name:?}, expected pp, cp or dbs"),
    };
    Ok(solver)
}
