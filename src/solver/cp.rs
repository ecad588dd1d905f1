use rand::rngs::StdRng;

use super::comm::Objective;
use super::conflict_tree::{conflict_tree_search, LowLevelOrder, RootStrategy, SearchProfile};
use super::{Outcome, Solver};
use crate::common::Agent;
use crate::config::Config;
use crate::map::Map;
use crate::stat::Stats;

/// Complete planning. Roots the conflict tree at independent shortest paths
/// and replans with cost-optimal searches, so draining the open set without a
/// size bound proves the instance has no deadlock-free plan at all.
pub struct CompletePlanning {
    agents: Vec<Agent>,
    map: Map,
    stats: Stats,
}

impl CompletePlanning {
    pub fn new(agents: Vec<Agent>, map: &Map) -> Self {
        CompletePlanning {
            agents,
            map: map.clone(),
            stats: Stats::default(),
        }
    }
}

impl Solver for CompletePlanning {
    fn solve(&mut self, config: &Config, rng: &mut StdRng) -> Outcome {
        let profile = SearchProfile {
            name: "cp",
            root: RootStrategy::Independent,
            order: LowLevelOrder::FCost,
            objective: Objective::from_name(&config.objective),
        };
        conflict_tree_search(
            &profile,
            &self.agents,
            &self.map,
            config,
            rng,
            &mut self.stats,
        )
    }
}
