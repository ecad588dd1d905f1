use super::fragment::Fragment;
use crate::common::Path;
use crate::map::Map;

use std::cmp::Ordering;

/// One branch decision of the conflict tree: `agent` may never take the move
/// `parent -> child` again, anywhere along its path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Constraint {
    pub(crate) agent: usize,
    pub(crate) parent: (usize, usize),
    pub(crate) child: (usize, usize),
}

impl Constraint {
    /// A cycle is resolved by breaking any one of its edges, so a detected
    /// fragment turns into one constraint per edge, each addressed to the
    /// agent owning that move.
    pub(crate) fn from_fragment(fragment: &Fragment) -> Vec<Constraint> {
        fragment
            .agents
            .iter()
            .enumerate()
            .map(|(k, &agent)| Constraint {
                agent,
                parent: fragment.path[k],
                child: fragment.path[k + 1],
            })
            .collect()
    }
}

/// Directed moves taken by a set of paths, bucketed by source node. Buckets
/// keep duplicates so opposing moves can be counted, not just spotted.
pub(crate) struct FromToTable {
    moves: Vec<Vec<usize>>,
}

impl FromToTable {
    /// Collects every move of every path except the one belonging to `skip`.
    pub(crate) fn build(map: &Map, paths: &[Path], skip: Option<usize>) -> Self {
        let mut moves = vec![Vec::new(); map.nodes_count()];
        for (agent, path) in paths.iter().enumerate() {
            if Some(agent) == skip {
                continue;
            }
            for step in path.windows(2) {
                moves[map.node_id(step[0])].push(map.node_id(step[1]));
            }
        }
        FromToTable { moves }
    }

    pub(crate) fn traverses(&self, map: &Map, from: (usize, usize), to: (usize, usize)) -> bool {
        self.count(map, from, to) > 0
    }

    pub(crate) fn count(&self, map: &Map, from: (usize, usize), to: (usize, usize)) -> usize {
        let target = map.node_id(to);
        self.moves[map.node_id(from)]
            .iter()
            .filter(|&&id| id == target)
            .count()
    }
}

/// What the conflict-tree search minimizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Objective {
    /// Pairs of moves taken head-on over the same edge.
    Swaps,
    /// Sum of individual path costs.
    SumOfCosts,
}

impl Objective {
    // Accepts what `Config::validate` lets through.
    pub(crate) fn from_name(name: &str) -> Objective {
        match name {
            "swaps" => Objective::Swaps,
            "soc" => Objective::SumOfCosts,
            _ => unreachable!(),
        }
    }

    pub(crate) fn evaluate(&self, map: &Map, paths: &[Path]) -> usize {
        match self {
            Objective::Swaps => count_swap_conflicts(map, paths),
            Objective::SumOfCosts => paths.iter().map(|path| path.len() - 1).sum(),
        }
    }

    /// Plan cost after `agent` switches to `new_path`, derived from the
    /// parent's cost instead of a full recount. Only the terms involving
    /// `agent` can have changed.
    pub(crate) fn update(
        &self,
        map: &Map,
        cost: usize,
        agent: usize,
        paths: &[Path],
        new_path: &Path,
    ) -> usize {
        match self {
            Objective::Swaps => {
                cost - swaps_with_others(map, agent, &paths[agent], paths)
                    + swaps_with_others(map, agent, new_path, paths)
            }
            Objective::SumOfCosts => cost - (paths[agent].len() - 1) + (new_path.len() - 1),
        }
    }
}

/// Head-on move pairs across the whole plan. Zero means no two agents ever
/// traverse the same edge in opposite directions.
pub(crate) fn count_swap_conflicts(map: &Map, paths: &[Path]) -> usize {
    let mut seen: Vec<Vec<(usize, usize)>> = vec![Vec::new(); map.nodes_count()];
    let mut count = 0;
    for (agent, path) in paths.iter().enumerate() {
        for step in path.windows(2) {
            let (from, to) = (map.node_id(step[0]), map.node_id(step[1]));
            count += seen[to]
                .iter()
                .filter(|&&(target, owner)| target == from && owner != agent)
                .count();
            seen[from].push((to, agent));
        }
    }
    count
}

// Swap pairs between one candidate path and everyone else's current path.
fn swaps_with_others(map: &Map, agent: usize, path: &Path, paths: &[Path]) -> usize {
    let others = FromToTable::build(map, paths, Some(agent));
    path.windows(2)
        .map(|step| others.count(map, step[1], step[0]))
        .sum()
}

/// One node of the conflict tree. The insertion counter makes ordering total
/// and settles cost ties first-in-first-out.
#[derive(Debug, Clone)]
pub(crate) struct HighLevelNode {
    pub(crate) id: usize,
    pub(crate) paths: Vec<Path>,
    pub(crate) constraints: Vec<Constraint>,
    pub(crate) cost: usize,
}

impl Ord for HighLevelNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cost
            .cmp(&other.cost)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for HighLevelNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HighLevelNode {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost && self.id == other.id
    }
}

impl Eq for HighLevelNode {}
