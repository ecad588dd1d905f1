use tracing::debug;

use crate::common::Deadline;
use crate::map::Map;

pub(crate) type FragmentId = usize;

/// One directed chain of waiting moves. `path` holds `agents.len() + 1`
/// nodes and `agents[k]` is the agent moving from `path[k]` to `path[k + 1]`.
/// A closed chain (head equals tail) is a potential deadlock: every agent on
/// it waits for the next one to vacate its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fragment {
    pub(crate) path: Vec<(usize, usize)>,
    pub(crate) agents: Vec<usize>,
}

impl Fragment {
    pub(crate) fn head(&self) -> (usize, usize) {
        self.path[0]
    }

    pub(crate) fn tail(&self) -> (usize, usize) {
        *self.path.last().unwrap()
    }

    pub(crate) fn edge_count(&self) -> usize {
        self.agents.len()
    }

    pub(crate) fn is_cycle(&self) -> bool {
        self.head() == self.tail()
    }

    fn contains_agent(&self, agent: usize) -> bool {
        self.agents.contains(&agent)
    }
}

/// Arena of every fragment derivable from the paths registered so far, with
/// per-node handle buckets so extension candidates are found without scans.
/// Handles stay valid for the lifetime of the table; fragments are never
/// removed, only added.
pub(crate) struct FragmentTable<'a> {
    map: &'a Map,
    max_fragment_size: Option<usize>,
    fragments: Vec<Fragment>,
    head_at: Vec<Vec<FragmentId>>,
    tail_at: Vec<Vec<FragmentId>>,
}

impl<'a> FragmentTable<'a> {
    pub(crate) fn new(map: &'a Map, max_fragment_size: Option<usize>) -> Self {
        FragmentTable {
            map,
            max_fragment_size,
            fragments: Vec::new(),
            head_at: vec![Vec::new(); map.nodes_count()],
            tail_at: vec![Vec::new(); map.nodes_count()],
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.fragments.len()
    }

    pub(crate) fn get(&self, id: FragmentId) -> &Fragment {
        &self.fragments[id]
    }

    /// Registers every move of `path` together with all fragments derivable
    /// from the table so far. Returns the first potential deadlock found, or
    /// the last one when `force` is set (registration then runs through the
    /// whole path regardless). Returns `None` on a clean registration, and
    /// also when the deadline expires mid-walk, so callers must re-check the
    /// deadline before trusting a `None`.
    pub(crate) fn register_path(
        &mut self,
        agent: usize,
        path: &[(usize, usize)],
        force: bool,
        deadline: Option<&Deadline>,
    ) -> Option<FragmentId> {
        let mut deadlock = None;

        for step in path.windows(2) {
            if deadline.is_some_and(|d| d.expired()) {
                debug!("fragment registration for agent {agent} ran out of time");
                return None;
            }
            let (from, to) = (step[0], step[1]);

            // The move itself as a one-edge fragment.
            if let Some(found) = self.insert_candidate(vec![from, to], vec![agent]) {
                if !force {
                    return Some(found);
                }
                deadlock = Some(found);
            }

            // Grow fragments that stop where this move starts.
            for base in self.tail_at[self.map.node_id(from)].clone() {
                let head = self.fragments[base].head();
                if let Some(found) = self.extend(agent, head, base, to) {
                    if !force {
                        return Some(found);
                    }
                    deadlock = Some(found);
                }
            }

            // Grow fragments that start where this move stops.
            for base in self.head_at[self.map.node_id(to)].clone() {
                let tail = self.fragments[base].tail();
                if let Some(found) = self.extend(agent, from, base, tail) {
                    if !force {
                        return Some(found);
                    }
                    deadlock = Some(found);
                }
            }

            // Bridge fragment pairs across the move. This is the expensive
            // part of registration, hence the extra deadline poll.
            let into: Vec<FragmentId> = self.tail_at[self.map.node_id(from)]
                .iter()
                .copied()
                .filter(|&id| !self.fragments[id].contains_agent(agent))
                .collect();
            let out_of: Vec<FragmentId> = self.head_at[self.map.node_id(to)]
                .iter()
                .copied()
                .filter(|&id| !self.fragments[id].contains_agent(agent))
                .collect();
            for former in into {
                if deadline.is_some_and(|d| d.expired()) {
                    debug!("fragment registration for agent {agent} ran out of time");
                    return None;
                }
                for &latter in &out_of {
                    if let Some(found) = self.join(agent, former, latter) {
                        if !force {
                            return Some(found);
                        }
                        deadlock = Some(found);
                    }
                }
            }
        }

        deadlock
    }

    /// True when moving `parent -> child` would close some registered
    /// fragment into a cycle. This is the move a deadlock-avoiding agent must
    /// refuse.
    pub(crate) fn closes_fragment(&self, parent: (usize, usize), child: (usize, usize)) -> bool {
        self.tail_at[self.map.node_id(parent)]
            .iter()
            .any(|&id| self.fragments[id].head() == child)
    }

    // One new move glued onto an existing fragment, in front of its head or
    // behind its tail. Gluing onto both ends at once is the closing case:
    // head and tail coincide and the result is a cycle.
    fn extend(
        &mut self,
        agent: usize,
        head: (usize, usize),
        base: FragmentId,
        tail: (usize, usize),
    ) -> Option<FragmentId> {
        if self.fragments[base].contains_agent(agent) {
            return None;
        }
        if let Some(max) = self.max_fragment_size {
            let size = self.fragments[base].edge_count() + 1;
            if size > max || (size == max && head != tail) {
                return None;
            }
        }

        let fragment = &self.fragments[base];
        let mut agents = fragment.agents.clone();
        let mut path = fragment.path.clone();
        if fragment.head() != head {
            agents.insert(0, agent);
            path.insert(0, head);
        }
        if fragment.tail() != tail {
            agents.push(agent);
            path.push(tail);
        }
        self.insert_candidate(path, agents)
    }

    // Two fragments bridged by one move: `former` ends where the move starts,
    // `latter` starts where it stops. The node-disjointness requirement means
    // a join never closes a cycle; closure is left to single-edge extensions.
    fn join(&mut self, agent: usize, former: FragmentId, latter: FragmentId) -> Option<FragmentId> {
        let front = &self.fragments[former];
        let back = &self.fragments[latter];
        if let Some(max) = self.max_fragment_size {
            let size = front.edge_count() + back.edge_count() + 1;
            if size > max || (size == max && front.head() != back.tail()) {
                return None;
            }
        }
        if front.agents.iter().any(|a| back.agents.contains(a)) {
            return None;
        }
        if front.path.iter().any(|node| back.path.contains(node)) {
            return None;
        }

        let mut agents = front.agents.clone();
        agents.push(agent);
        agents.extend_from_slice(&back.agents);
        let mut path = front.path.clone();
        path.extend_from_slice(&back.path);
        self.insert_candidate(path, agents)
    }

    // Shared tail of every registration step. The candidate is dropped when a
    // twin fragment already exists or when no return route could ever close
    // it within the size bound. Returns the handle when the candidate itself
    // closed into a cycle.
    fn insert_candidate(
        &mut self,
        path: Vec<(usize, usize)>,
        agents: Vec<usize>,
    ) -> Option<FragmentId> {
        if self.exists_duplicate(&path, &agents) {
            return None;
        }
        let fragment = Fragment { path, agents };
        let closes = fragment.is_cycle();
        if !closes && !self.permits_future_cycle(&fragment.path) {
            return None;
        }

        let id = self.fragments.len();
        self.head_at[self.map.node_id(fragment.head())].push(id);
        self.tail_at[self.map.node_id(fragment.tail())].push(id);
        self.fragments.push(fragment);
        closes.then_some(id)
    }

    // A candidate is a twin when some fragment already carries the same node
    // sequence and the same agent set, in any order.
    fn exists_duplicate(&self, path: &[(usize, usize)], agents: &[usize]) -> bool {
        self.head_at[self.map.node_id(path[0])].iter().any(|&id| {
            let known = &self.fragments[id];
            if known.path.as_slice() != path {
                return false;
            }
            let mut lhs = known.agents.clone();
            let mut rhs = agents.to_vec();
            lhs.sort_unstable();
            rhs.sort_unstable();
            lhs == rhs
        })
    }

    // An open fragment is only worth keeping if some return route from its
    // tail back to its head could close it without growing past the size
    // bound. The route must not revisit the fragment's interior nodes.
    fn permits_future_cycle(&self, path: &[(usize, usize)]) -> bool {
        let Some(max) = self.max_fragment_size else {
            return true;
        };
        let edges = path.len() - 1;
        let head = path[0];
        let tail = *path.last().unwrap();
        if edges + self.map.manhattan_dist(tail, head) > max {
            return false;
        }
        match self.map.shortest_path_avoiding(tail, head, path) {
            Some(route) => edges + route.len() - 1 <= max,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const LANE2: &str = "type octile\nheight 1\nwidth 2\nmap\n..\n";
    const LANE4: &str = "type octile\nheight 1\nwidth 4\nmap\n....\n";
    const OPEN2: &str = "type octile\nheight 2\nwidth 2\nmap\n..\n..\n";

    fn load(content: &str) -> Map {
        Map::from_str(content, &Vec::new()).unwrap()
    }

    #[test]
    fn test_opposing_paths_close_a_swap() {
        let map = load(LANE4);
        let mut table = FragmentTable::new(&map, None);

        assert_eq!(
            table.register_path(0, &[(0, 0), (0, 1), (0, 2)], false, None),
            None
        );

        let found = table
            .register_path(1, &[(0, 3), (0, 2), (0, 1)], false, None)
            .expect("opposing moves over the same edge must deadlock");
        let deadlock = table.get(found);
        assert!(deadlock.is_cycle());
        assert_eq!(deadlock.path, vec![(0, 1), (0, 2), (0, 1)]);
        assert_eq!(deadlock.agents, vec![0, 1]);
    }

    #[test]
    fn test_single_agent_loop_is_not_a_deadlock() {
        let map = load(OPEN2);
        let lap = [(0, 0), (0, 1), (1, 1), (1, 0), (0, 0)];
        let mut table = FragmentTable::new(&map, None);

        assert_eq!(table.register_path(0, &lap, false, None), None);
        assert_eq!(table.len(), 4);

        // Same path again: every candidate is a twin of a registered one.
        assert_eq!(table.register_path(0, &lap, false, None), None);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_rotation_closes_under_force() {
        let map = load(OPEN2);
        let mut table = FragmentTable::new(&map, None);

        assert_eq!(table.register_path(0, &[(0, 0), (0, 1)], false, None), None);
        assert_eq!(table.register_path(1, &[(0, 1), (1, 1)], false, None), None);
        assert_eq!(table.register_path(2, &[(1, 1), (1, 0)], false, None), None);

        let found = table
            .register_path(3, &[(1, 0), (0, 0)], true, None)
            .expect("the fourth move completes the rotation");
        let deadlock = table.get(found);
        assert!(deadlock.is_cycle());
        assert_eq!(deadlock.edge_count(), 4);
        let mut agents = deadlock.agents.clone();
        agents.sort_unstable();
        assert_eq!(agents, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_join_rejects_overlapping_pieces() {
        let map = load(LANE4);
        let mut table = FragmentTable::new(&map, None);

        table.register_path(0, &[(0, 1), (0, 0)], false, None);
        table.register_path(1, &[(0, 1), (0, 2)], false, None);

        // Bridging the two over (0,0) -> (0,1) would revisit (0,1), so the
        // join is dropped; the move still closes the plain swap with agent 0.
        let found = table
            .register_path(2, &[(0, 0), (0, 1)], true, None)
            .expect("returning over agent 0's edge is a swap");
        assert_eq!(table.get(found).path, vec![(0, 0), (0, 1), (0, 0)]);

        for fragment in &table.fragments {
            let body = if fragment.is_cycle() {
                &fragment.path[1..]
            } else {
                &fragment.path[..]
            };
            let mut nodes = body.to_vec();
            nodes.sort_unstable();
            nodes.dedup();
            assert_eq!(nodes.len(), body.len(), "{:?} revisits a node", fragment.path);
        }
    }

    #[test]
    fn test_size_bound_hides_and_reveals_the_swap() {
        let map = load(LANE2);
        let swap = [
            ((0, 0), (0, 1)), // agent 0
            ((0, 1), (0, 0)), // agent 1
        ];

        // Bound one: even a lone move cannot return within one edge, so
        // nothing is registered and nothing is detected.
        let mut strict = FragmentTable::new(&map, Some(1));
        for (agent, (start, goal)) in swap.iter().enumerate() {
            assert_eq!(strict.register_path(agent, &[*start, *goal], false, None), None);
        }
        assert_eq!(strict.len(), 0);

        // Bound two admits the one-edge fragment and the closing extension
        // sitting exactly at the bound.
        let mut tolerant = FragmentTable::new(&map, Some(2));
        assert_eq!(
            tolerant.register_path(0, &[(0, 0), (0, 1)], false, None),
            None
        );
        let found = tolerant
            .register_path(1, &[(0, 1), (0, 0)], false, None)
            .expect("a two-edge swap fits a bound of two");
        assert_eq!(tolerant.get(found).path, vec![(0, 0), (0, 1), (0, 0)]);
    }

    #[test]
    fn test_size_bound_caps_open_fragments() {
        let map = load(LANE4);
        let mut table = FragmentTable::new(&map, Some(2));

        table.register_path(0, &[(0, 0), (0, 1), (0, 2), (0, 3)], true, None);
        let found = table.register_path(1, &[(0, 3), (0, 2), (0, 1), (0, 0)], true, None);

        assert!(found.is_some());
        assert!(table
            .fragments
            .iter()
            .all(|f| f.is_cycle() || f.edge_count() < 2));
    }

    #[test]
    fn test_closes_fragment_consults_every_length() {
        let map = load(LANE4);
        let mut table = FragmentTable::new(&map, None);
        table.register_path(0, &[(0, 0), (0, 1)], false, None);
        table.register_path(1, &[(0, 1), (0, 2)], false, None);

        assert!(table.closes_fragment((0, 1), (0, 0)));
        assert!(table.closes_fragment((0, 2), (0, 1)));
        // The two moves chain into a two-edge fragment, so returning from
        // (0, 2) straight to (0, 0) would close that one as well.
        assert!(table.closes_fragment((0, 2), (0, 0)));
        assert!(!table.closes_fragment((0, 0), (0, 1)));
        assert!(!table.closes_fragment((0, 3), (0, 2)));
    }

    #[test]
    fn test_expired_deadline_stops_registration() {
        let map = load(LANE4);
        let deadline = Deadline::start(Duration::ZERO);
        let mut table = FragmentTable::new(&map, None);

        assert_eq!(
            table.register_path(0, &[(0, 0), (0, 1), (0, 2)], false, Some(&deadline)),
            None
        );
        assert_eq!(table.len(), 0);
    }
}
