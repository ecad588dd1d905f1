use rand::rngs::StdRng;

use super::comm::Objective;
use super::conflict_tree::{conflict_tree_search, LowLevelOrder, RootStrategy, SearchProfile};
use super::{Outcome, Solver};
use crate::common::Agent;
use crate::config::Config;
use crate::map::Map;
use crate::stat::Stats;

/// Deadlock-based search. Roots the conflict tree at a prioritized plan and
/// replans greedily, trading optimality for speed; pairs naturally with a
/// fragment size bound, which the tree's final check keeps sound.
pub struct DBS {
    agents: Vec<Agent>,
    map: Map,
    stats: Stats,
}

impl DBS {
    pub fn new(agents: Vec<Agent>, map: &Map) -> Self {
        DBS {
            agents,
            map: map.clone(),
            stats: Stats::default(),
        }
    }
}

impl Solver for DBS {
    fn solve(&mut self, config: &Config, rng: &mut StdRng) -> Outcome {
        let profile = SearchProfile {
            name: "dbs",
            root: RootStrategy::Prioritized,
            order: LowLevelOrder::Greedy,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::comm::{count_swap_conflicts, FragmentTable};
    use rand::SeedableRng;

    const OPEN3: &str = "type octile\nheight 3\nwidth 3\nmap\n...\n...\n...\n";
    const LANE2: &str = "type octile\nheight 1\nwidth 2\nmap\n..\n";

    #[test]
    fn test_bounded_run_still_certifies_its_answer() {
        let agents = vec![
            Agent {
                id: 0,
                start: (0, 0),
                goal: (0, 2),
            },
            Agent {
                id: 1,
                start: (0, 2),
                goal: (0, 0),
            },
        ];
        let map = Map::from_str(OPEN3, &agents).unwrap();
        let mut config = Config::default();
        config.max_fragment_size = Some(2);
        let mut rng = StdRng::seed_from_u64(11);

        let outcome = DBS::new(agents.clone(), &map).solve(&config, &mut rng);
        let Outcome::Solved(solution) = outcome else {
            panic!("bounded search must still solve the open-square swap");
        };
        solution.verify(&map, &agents).unwrap();

        let mut check = FragmentTable::new(&map, None);
        for (id, path) in solution.paths.iter().enumerate() {
            assert_eq!(check.register_path(id, path, true, None), None);
        }
        assert_eq!(count_swap_conflicts(&map, &solution.paths), 0);
    }

    #[test]
    fn test_boxed_in_root_falls_back_and_the_tree_decides() {
        // Steering leaves the second agent no move at all; the fallback path
        // revives the swap cycle and the tree proves it unresolvable.
        let agents = vec![
            Agent {
                id: 0,
                start: (0, 0),
                goal: (0, 1),
            },
            Agent {
                id: 1,
                start: (0, 1),
                goal: (0, 0),
            },
        ];
        let map = Map::from_str(LANE2, &agents).unwrap();
        let config = Config::default();
        let mut rng = StdRng::seed_from_u64(0);

        let outcome = DBS::new(agents, &map).solve(&config, &mut rng);
        assert!(outcome.is_unsolvable());
    }
}
