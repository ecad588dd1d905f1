use crate::common::{Agent, Deadline};
use crate::map::Map;
use crate::solver::comm::{Constraint, FragmentTable, FromToTable};
use crate::stat::Stats;
use rand::seq::SliceRandom;
use rand::Rng;
use std::cmp::Reverse;
use std::collections::BTreeSet;
use tracing::{debug, instrument};

/// Open-list priority: primary cost, a tie-break bit, then deeper nodes
/// first. Remaining ties fall back to insertion order, which the neighbor
/// shuffle randomizes.
pub(crate) type SearchKey = (usize, bool, Reverse<usize>);

/// Decides how the open list ranks a candidate move from `parent` to `child`.
pub(crate) trait NodeOrder {
    fn key(&self, g: usize, h: usize, child: (usize, usize), parent: (usize, usize)) -> SearchKey;
}

/// Rejects moves a given search is not allowed to take.
pub(crate) trait MoveFilter {
    fn is_invalid(&self, child: (usize, usize), parent: (usize, usize)) -> bool;
}

pub(crate) struct PlainOrder;

impl NodeOrder for PlainOrder {
    fn key(&self, g: usize, h: usize, _child: (usize, usize), _parent: (usize, usize)) -> SearchKey {
        (g + h, false, Reverse(g))
    }
}

/// f-ordered, but ties resolve away from moves that run against an edge some
/// other agent traverses in the opposite direction. Those are the moves that
/// turn into head-on swaps.
pub(crate) struct SwapAwareOrder<'a> {
    pub(crate) map: &'a Map,
    pub(crate) others: &'a FromToTable,
}

impl NodeOrder for SwapAwareOrder<'_> {
    fn key(&self, g: usize, h: usize, child: (usize, usize), parent: (usize, usize)) -> SearchKey {
        (g + h, self.others.traverses(self.map, child, parent), Reverse(g))
    }
}

/// Pure heuristic descent with the same swap-averse tie-break. Paths come out
/// quickly and possibly inflated.
pub(crate) struct GreedyOrder<'a> {
    pub(crate) map: &'a Map,
    pub(crate) others: &'a FromToTable,
}

impl NodeOrder for GreedyOrder<'_> {
    fn key(&self, g: usize, h: usize, child: (usize, usize), parent: (usize, usize)) -> SearchKey {
        (h, self.others.traverses(self.map, child, parent), Reverse(g))
    }
}

/// Keeps the agent off every reserved goal but its own, and away from the
/// branch constraints issued against it.
pub(crate) struct ConstraintFilter<'a> {
    pub(crate) map: &'a Map,
    pub(crate) reserved: &'a [bool],
    pub(crate) own_goal: (usize, usize),
    pub(crate) forbidden: Vec<&'a Constraint>,
}

impl MoveFilter for ConstraintFilter<'_> {
    fn is_invalid(&self, child: (usize, usize), parent: (usize, usize)) -> bool {
        if child != self.own_goal && self.reserved[self.map.node_id(child)] {
            return true;
        }
        self.forbidden
            .iter()
            .any(|c| c.parent == parent && c.child == child)
    }
}

/// Goal avoidance plus the table check: a move that would close a registered
/// fragment into a cycle is refused outright. An agent that never closes a
/// cycle keeps the plan deadlock-free by construction.
pub(crate) struct PrioritizedFilter<'a> {
    pub(crate) map: &'a Map,
    pub(crate) reserved: &'a [bool],
    pub(crate) own_goal: (usize, usize),
    pub(crate) table: &'a FragmentTable<'a>,
}

impl MoveFilter for PrioritizedFilter<'_> {
    fn is_invalid(&self, child: (usize, usize), parent: (usize, usize)) -> bool {
        if child != self.own_goal && self.reserved[self.map.node_id(child)] {
            return true;
        }
        self.table.closes_fragment(parent, child)
    }
}

/// Goal nodes are reserved for their owners forever, since a finished agent
/// never moves again.
pub(crate) fn reserved_goals(map: &Map, agents: &[Agent]) -> Vec<bool> {
    let mut reserved = vec![false; map.nodes_count()];
    for agent in agents {
        reserved[map.node_id(agent.goal)] = true;
    }
    reserved
}

struct AstarNode {
    position: (usize, usize),
    g: usize,
    parent: Option<usize>,
}

/// Single-agent search over the map with a caller-chosen move filter and
/// open-list order. Nodes live in a scratch arena local to the call and are
/// addressed by handle. A `None` covers both "no path survives the filter"
/// and "deadline expired"; callers that care must re-check the deadline.
#[instrument(skip_all, name = "constrained_search", fields(agent = agent.id), level = "debug")]
pub(crate) fn constrained_search<R: Rng + ?Sized>(
    map: &Map,
    agent: &Agent,
    filter: &impl MoveFilter,
    order: &impl NodeOrder,
    rng: &mut R,
    deadline: &Deadline,
    stats: &mut Stats,
) -> Option<Vec<(usize, usize)>> {
    let heuristic = &map.heuristic[agent.id];
    if heuristic[agent.start.0][agent.start.1] == usize::MAX {
        debug!("goal not reachable from start");
        return None;
    }

    let mut arena = Vec::new();
    let mut open: BTreeSet<(SearchKey, usize)> = BTreeSet::new();
    let mut closed = vec![false; map.nodes_count()];
    let mut best_g = vec![usize::MAX; map.nodes_count()];

    arena.push(AstarNode {
        position: agent.start,
        g: 0,
        parent: None,
    });
    best_g[map.node_id(agent.start)] = 0;
    let start_h = heuristic[agent.start.0][agent.start.1];
    open.insert((order.key(0, start_h, agent.start, agent.start), 0));

    while let Some((_, handle)) = open.pop_first() {
        if deadline.expired() {
            debug!("search for agent {} ran out of time", agent.id);
            return None;
        }

        let (position, g) = (arena[handle].position, arena[handle].g);
        let node_id = map.node_id(position);
        // Stale duplicates of an expanded node are simply skipped.
        if closed[node_id] {
            continue;
        }
        closed[node_id] = true;
        stats.low_level_expand_nodes += 1;

        if position == agent.goal {
            return Some(construct_path(&arena, handle));
        }

        let mut neighbors = map.get_neighbors(position.0, position.1);
        neighbors.shuffle(rng);

        for &neighbor in &neighbors {
            let neighbor_id = map.node_id(neighbor);
            if closed[neighbor_id] {
                continue;
            }
            if filter.is_invalid(neighbor, position) {
                continue;
            }
            let h = heuristic[neighbor.0][neighbor.1];
            if h == usize::MAX {
                continue;
            }
            let tentative_g = g + 1;
            if tentative_g >= best_g[neighbor_id] {
                continue;
            }
            best_g[neighbor_id] = tentative_g;

            let child = arena.len();
            arena.push(AstarNode {
                position: neighbor,
                g: tentative_g,
                parent: Some(handle),
            });
            open.insert((order.key(tentative_g, h, neighbor, position), child));
        }
    }

    None
}

fn construct_path(arena: &[AstarNode], goal: usize) -> Vec<(usize, usize)> {
    let mut path = Vec::new();
    let mut cursor = Some(goal);
    while let Some(handle) = cursor {
        path.push(arena[handle].position);
        cursor = arena[handle].parent;
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;

    const LANE4: &str = "type octile\nheight 1\nwidth 4\nmap\n....\n";
    const OPEN2X4: &str = "type octile\nheight 2\nwidth 4\nmap\n....\n....\n";
    const OPEN2: &str = "type octile\nheight 2\nwidth 2\nmap\n..\n..\n";

    fn generous() -> Deadline {
        Deadline::start(Duration::from_secs(10))
    }

    #[test]
    fn test_plain_search_runs_straight() {
        let agent = Agent {
            id: 0,
            start: (0, 0),
            goal: (7, 7),
        };
        let map = Map::from_file("maps/8x8.map", &vec![agent.clone()]).unwrap();
        let reserved = reserved_goals(&map, &[agent.clone()]);
        let filter = ConstraintFilter {
            map: &map,
            reserved: &reserved,
            own_goal: agent.goal,
            forbidden: Vec::new(),
        };
        let mut rng = StdRng::seed_from_u64(0);
        let stats = &mut Stats::default();

        let path = constrained_search(
            &map,
            &agent,
            &filter,
            &PlainOrder,
            &mut rng,
            &generous(),
            stats,
        )
        .unwrap();

        assert_eq!(path.len(), 15);
        assert_eq!(path[0], agent.start);
        assert_eq!(*path.last().unwrap(), agent.goal);
        assert!(stats.low_level_expand_nodes > 0);
    }

    #[test]
    fn test_forbidden_edge_forces_a_detour() {
        let agent = Agent {
            id: 0,
            start: (0, 0),
            goal: (0, 3),
        };
        let map = Map::from_str(OPEN2X4, &vec![agent.clone()]).unwrap();
        let reserved = reserved_goals(&map, &[agent.clone()]);
        let banned = Constraint {
            agent: 0,
            parent: (0, 1),
            child: (0, 2),
        };
        let filter = ConstraintFilter {
            map: &map,
            reserved: &reserved,
            own_goal: agent.goal,
            forbidden: vec![&banned],
        };
        let mut rng = StdRng::seed_from_u64(3);
        let stats = &mut Stats::default();

        let path = constrained_search(
            &map,
            &agent,
            &filter,
            &PlainOrder,
            &mut rng,
            &generous(),
            stats,
        )
        .unwrap();

        assert_eq!(path.len(), 6);
        assert!(!path
            .windows(2)
            .any(|pair| pair[0] == (0, 1) && pair[1] == (0, 2)));
    }

    #[test]
    fn test_reserved_goal_blocks_through_traffic() {
        let agents = vec![
            Agent {
                id: 0,
                start: (0, 0),
                goal: (0, 3),
            },
            Agent {
                id: 1,
                start: (0, 3),
                goal: (0, 2),
            },
        ];
        let map = Map::from_str(LANE4, &agents).unwrap();
        let reserved = reserved_goals(&map, &agents);
        let mut rng = StdRng::seed_from_u64(0);
        let stats = &mut Stats::default();

        // Agent 0 would have to cross the goal reserved for agent 1.
        let blocked = ConstraintFilter {
            map: &map,
            reserved: &reserved,
            own_goal: agents[0].goal,
            forbidden: Vec::new(),
        };
        assert!(constrained_search(
            &map,
            &agents[0],
            &blocked,
            &PlainOrder,
            &mut rng,
            &generous(),
            stats,
        )
        .is_none());

        // The reservation never applies to the owner itself.
        let own = ConstraintFilter {
            map: &map,
            reserved: &reserved,
            own_goal: agents[1].goal,
            forbidden: Vec::new(),
        };
        let path = constrained_search(
            &map,
            &agents[1],
            &own,
            &PlainOrder,
            &mut rng,
            &generous(),
            stats,
        )
        .unwrap();
        assert_eq!(path, vec![(0, 3), (0, 2)]);
    }

    #[test]
    fn test_swap_tiebreak_picks_the_clean_route() {
        let agent = Agent {
            id: 0,
            start: (0, 0),
            goal: (1, 1),
        };
        let map = Map::from_str(OPEN2, &vec![agent.clone()]).unwrap();
        let reserved = reserved_goals(&map, &[agent.clone()]);
        let other = vec![vec![(1, 1), (0, 1), (0, 0)]];
        let others = FromToTable::build(&map, &other, None);
        let filter = ConstraintFilter {
            map: &map,
            reserved: &reserved,
            own_goal: agent.goal,
            forbidden: Vec::new(),
        };
        let order = SwapAwareOrder {
            map: &map,
            others: &others,
        };
        let stats = &mut Stats::default();

        // Both corners cost the same; only (1, 0) avoids running against the
        // other agent's direction of travel, whatever the shuffle does.
        for seed in 0..8 {
            let mut rng = StdRng::seed_from_u64(seed);
            let path = constrained_search(
                &map,
                &agent,
                &filter,
                &order,
                &mut rng,
                &generous(),
                stats,
            )
            .unwrap();
            assert_eq!(path, vec![(0, 0), (1, 0), (1, 1)]);
        }
    }

    #[test]
    fn test_expired_deadline_aborts_search() {
        let agent = Agent {
            id: 0,
            start: (0, 0),
            goal: (0, 3),
        };
        let map = Map::from_str(LANE4, &vec![agent.clone()]).unwrap();
        let reserved = reserved_goals(&map, &[agent.clone()]);
        let filter = ConstraintFilter {
            map: &map,
            reserved: &reserved,
            own_goal: agent.goal,
            forbidden: Vec::new(),
        };
        let mut rng = StdRng::seed_from_u64(0);
        let stats = &mut Stats::default();

        assert!(constrained_search(
            &map,
            &agent,
            &filter,
            &PlainOrder,
            &mut rng,
            &Deadline::start(Duration::ZERO),
            stats,
        )
        .is_none());
    }
}
