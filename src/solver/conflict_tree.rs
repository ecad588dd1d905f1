use rand::Rng;
use std::collections::BTreeSet;
use tracing::{debug, info};

use super::algorithm::{
    constrained_search, reserved_goals, ConstraintFilter, GreedyOrder, MoveFilter,
    PrioritizedFilter, SwapAwareOrder,
};
use super::comm::{Constraint, FragmentTable, FromToTable, HighLevelNode, Objective};
use super::Outcome;
use crate::common::{Agent, Deadline, Path, Solution};
use crate::config::Config;
use crate::map::Map;
use crate::stat::Stats;

/// How the root plan is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RootStrategy {
    /// Every agent takes a shortest path on its own.
    Independent,
    /// Agents plan in id order, steered away from closing any fragment the
    /// earlier paths registered. A boxed-in agent falls back to an unsteered
    /// path and leaves its cycles for the tree to resolve.
    Prioritized,
}

/// Open-list order used when replanning a single agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LowLevelOrder {
    FCost,
    Greedy,
}

/// Everything that distinguishes one conflict-tree solver from another.
pub(crate) struct SearchProfile {
    pub(crate) name: &'static str,
    pub(crate) root: RootStrategy,
    pub(crate) order: LowLevelOrder,
    pub(crate) objective: Objective,
}

fn ordered_search<R: Rng + ?Sized>(
    map: &Map,
    agent: &Agent,
    filter: &impl MoveFilter,
    order: LowLevelOrder,
    others: &FromToTable,
    rng: &mut R,
    deadline: &Deadline,
    stats: &mut Stats,
) -> Option<Path> {
    match order {
        LowLevelOrder::FCost => constrained_search(
            map,
            agent,
            filter,
            &SwapAwareOrder { map, others },
            rng,
            deadline,
            stats,
        ),
        LowLevelOrder::Greedy => constrained_search(
            map,
            agent,
            filter,
            &GreedyOrder { map, others },
            rng,
            deadline,
            stats,
        ),
    }
}

fn plan_root<R: Rng + ?Sized>(
    profile: &SearchProfile,
    agents: &[Agent],
    map: &Map,
    config: &Config,
    reserved: &[bool],
    rng: &mut R,
    deadline: &Deadline,
    stats: &mut Stats,
) -> Option<Vec<Path>> {
    let mut paths: Vec<Path> = vec![Vec::new(); agents.len()];
    let mut table = FragmentTable::new(map, config.max_fragment_size);

    for agent in agents {
        // Unplanned agents still hold empty paths and contribute no moves.
        let others = FromToTable::build(map, &paths, Some(agent.id));
        let unsteered = ConstraintFilter {
            map,
            reserved,
            own_goal: agent.goal,
            forbidden: Vec::new(),
        };
        let path = match profile.root {
            RootStrategy::Independent => ordered_search(
                map, agent, &unsteered, profile.order, &others, rng, deadline, stats,
            ),
            RootStrategy::Prioritized => {
                let steered = PrioritizedFilter {
                    map,
                    reserved,
                    own_goal: agent.goal,
                    table: &table,
                };
                let mut path = ordered_search(
                    map, agent, &steered, profile.order, &others, rng, deadline, stats,
                );
                if path.is_none() && !deadline.expired() {
                    debug!("steering boxed in agent {}, replanning without it", agent.id);
                    path = ordered_search(
                        map, agent, &unsteered, profile.order, &others, rng, deadline, stats,
                    );
                }
                path
            }
        };
        let path = path?;
        if profile.root == RootStrategy::Prioritized {
            // Fallback paths may close a cycle; the tree resolves those later.
            let _ = table.register_path(agent.id, &path, true, Some(deadline));
        }
        paths[agent.id] = path;
    }

    stats.fragments_registered += table.len();
    Some(paths)
}

/// Best-first search over plans. Each node re-derives the fragments of its
/// paths; a detected cycle spawns one child per cycle edge, with the owning
/// agent replanned under a constraint forbidding that move. A run without a
/// size bound that drains the open set has tried every resolution of every
/// reachable cycle, which proves the instance unsolvable.
pub(crate) fn conflict_tree_search<R: Rng + ?Sized>(
    profile: &SearchProfile,
    agents: &[Agent],
    map: &Map,
    config: &Config,
    rng: &mut R,
    stats: &mut Stats,
) -> Outcome {
    let deadline = Deadline::start(config.budget());
    if agents.is_empty() {
        return Outcome::Solved(Solution::default());
    }

    let reserved = reserved_goals(map, agents);
    let bounded = config.max_fragment_size.is_some();

    let Some(paths) = plan_root(profile, agents, map, config, &reserved, rng, &deadline, stats)
    else {
        stats.time_ms = deadline.elapsed_ms();
        return Outcome::Exhausted;
    };

    let mut open = BTreeSet::new();
    let mut next_id = 1;
    open.insert(HighLevelNode {
        id: 0,
        cost: profile.objective.evaluate(map, &paths),
        paths,
        constraints: Vec::new(),
    });

    while let Some(node) = open.pop_first() {
        if deadline.expired() {
            stats.time_ms = deadline.elapsed_ms();
            return Outcome::Exhausted;
        }

        let mut table = FragmentTable::new(map, config.max_fragment_size);
        let mut conflict = None;
        for (id, path) in node.paths.iter().enumerate() {
            if let Some(found) = table.register_path(id, path, false, Some(&deadline)) {
                conflict = Some(table.get(found).clone());
                break;
            }
        }
        stats.fragments_registered += table.len();
        // Registration bails out quietly when the deadline passes mid-walk,
        // so a clean table is only trustworthy while time remains.
        if deadline.expired() {
            stats.time_ms = deadline.elapsed_ms();
            return Outcome::Exhausted;
        }

        let Some(fragment) = conflict else {
            if bounded {
                let mut gate = FragmentTable::new(map, None);
                let mut dirty = false;
                for (id, path) in node.paths.iter().enumerate() {
                    if gate.register_path(id, path, true, Some(&deadline)).is_some() {
                        dirty = true;
                        break;
                    }
                }
                stats.fragments_registered += gate.len();
                if deadline.expired() {
                    stats.time_ms = deadline.elapsed_ms();
                    return Outcome::Exhausted;
                }
                if dirty {
                    // Only cycles within the bound get branched on, so a
                    // longer one makes this node a dead end.
                    debug!("node {} only looked clean under the size bound", node.id);
                    continue;
                }
            }
            let solution = Solution { paths: node.paths };
            stats.costs = solution.sum_of_costs();
            stats.time_ms = deadline.elapsed_ms();
            stats.print(profile.name);
            return Outcome::Solved(solution);
        };

        debug!("node {} deadlocks on {fragment:?}", node.id);
        for constraint in Constraint::from_fragment(&fragment) {
            let mut constraints = node.constraints.clone();
            constraints.push(constraint.clone());

            let agent = &agents[constraint.agent];
            let own: Vec<&Constraint> = constraints
                .iter()
                .filter(|c| c.agent == constraint.agent)
                .collect();
            let others = FromToTable::build(map, &node.paths, Some(constraint.agent));
            let filter = ConstraintFilter {
                map,
                reserved: &reserved,
                own_goal: agent.goal,
                forbidden: own,
            };

            let Some(new_path) = ordered_search(
                map,
                agent,
                &filter,
                profile.order,
                &others,
                rng,
                &deadline,
                stats,
            ) else {
                continue;
            };

            let cost =
                profile
                    .objective
                    .update(map, node.cost, constraint.agent, &node.paths, &new_path);
            let mut paths = node.paths.clone();
            paths[constraint.agent] = new_path;
            open.insert(HighLevelNode {
                id: next_id,
                paths,
                constraints,
                cost,
            });
            next_id += 1;
            stats.high_level_expand_nodes += 1;
        }
    }

    stats.time_ms = deadline.elapsed_ms();
    if bounded || deadline.expired() {
        Outcome::Exhausted
    } else {
        info!("{} drained its open set, no deadlock-free plan exists", profile.name);
        Outcome::Unsolvable
    }
}
