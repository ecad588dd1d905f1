use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use super::algorithm::{constrained_search, reserved_goals, PlainOrder, PrioritizedFilter};
use super::comm::FragmentTable;
use super::{Outcome, Solver};
use crate::common::{Agent, Deadline, Path, Solution};
use crate::config::Config;
use crate::map::Map;
use crate::stat::Stats;

/// Prioritized planning. Agents plan one after another in a random order,
/// each banned from closing any fragment the earlier paths put in the table,
/// which keeps the growing plan deadlock-free by construction. Under a size
/// bound the table misses longer cycles, so a finished round is rescanned
/// without the bound before it counts. Incomplete: a stuck ordering is thrown
/// away and a fresh one drawn, up to the retry cap.
pub struct PrioritizedPlanning {
    agents: Vec<Agent>,
    map: Map,
    stats: Stats,
}

impl PrioritizedPlanning {
    pub fn new(agents: Vec<Agent>, map: &Map) -> Self {
        PrioritizedPlanning {
            agents,
            map: map.clone(),
            stats: Stats::default(),
        }
    }
}

impl Solver for PrioritizedPlanning {
    fn solve(&mut self, config: &Config, rng: &mut StdRng) -> Outcome {
        let deadline = Deadline::start(config.budget());
        if self.agents.is_empty() {
            return Outcome::Solved(Solution::default());
        }

        let reserved = reserved_goals(&self.map, &self.agents);
        let mut order: Vec<usize> = (0..self.agents.len()).collect();

        for round in 1..=config.pp_iter_max {
            if deadline.expired() {
                break;
            }
            self.stats.iterations = round;
            order.shuffle(rng);
            debug!("round {round} plans in order {order:?}");

            let mut table = FragmentTable::new(&self.map, config.max_fragment_size);
            let mut paths: Vec<Path> = vec![Vec::new(); self.agents.len()];
            let mut failed = false;

            for &id in &order {
                let path = {
                    let filter = PrioritizedFilter {
                        map: &self.map,
                        reserved: &reserved,
                        own_goal: self.agents[id].goal,
                        table: &table,
                    };
                    constrained_search(
                        &self.map,
                        &self.agents[id],
                        &filter,
                        &PlainOrder,
                        rng,
                        &deadline,
                        &mut self.stats,
                    )
                };
                let Some(path) = path else {
                    debug!("round {round} stuck at agent {id}");
                    failed = true;
                    break;
                };
                if deadline.expired() {
                    failed = true;
                    break;
                }
                if let Some(found) = table.register_path(id, &path, false, Some(&deadline)) {
                    // The filter refuses every cycle-closing move, so a path
                    // it accepted can never register one.
                    panic!(
                        "prioritized path for agent {id} registered deadlock {:?}",
                        table.get(found)
                    );
                }
                paths[id] = path;
            }

            self.stats.fragments_registered += table.len();
            if failed {
                continue;
            }

            if config.max_fragment_size.is_some() {
                // Cycles longer than the bound never entered the table, so
                // the filter could not have steered around them.
                let mut check = FragmentTable::new(&self.map, None);
                let mut dirty = false;
                for (id, path) in paths.iter().enumerate() {
                    if check.register_path(id, path, true, Some(&deadline)).is_some() {
                        dirty = true;
                        break;
                    }
                }
                self.stats.fragments_registered += check.len();
                if deadline.expired() {
                    break;
                }
                if dirty {
                    debug!("round {round} only looked clean under the size bound");
                    continue;
                }
            }

            let solution = Solution { paths };
            self.stats.costs = solution.sum_of_costs();
            self.stats.time_ms = deadline.elapsed_ms();
            self.stats.print("pp");
            return Outcome::Solved(solution);
        }

        info!(
            "no agent ordering worked within {} rounds and {:?}",
            config.pp_iter_max,
            config.budget()
        );
        self.stats.time_ms = deadline.elapsed_ms();
        Outcome::Exhausted
    }
}
