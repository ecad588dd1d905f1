use std::collections::VecDeque;
use std::fs;

use anyhow::{anyhow, Context, Result};

use crate::common::Agent;

#[derive(Debug, Clone)]
pub struct Tile {
    passable: bool,
    pub neighbors: Vec<(usize, usize)>, // Stores coordinates of accessible neighbors
}

impl Tile {
    pub fn is_passable(&self) -> bool {
        self.passable
    }
}

#[derive(Debug, Clone)]
pub struct Map {
    pub height: usize,
    pub width: usize,
    pub grid: Vec<Vec<Tile>>,
    pub heuristic: Vec<Vec<Vec<usize>>>,
}

impl Map {
    pub fn from_file(path: &str, agents: &Vec<Agent>) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("cannot read map file {path}"))?;
        Self::from_str(&content, agents).with_context(|| format!("cannot parse map file {path}"))
    }

    pub fn from_str(content: &str, agents: &Vec<Agent>) -> Result<Self> {
        let mut lines = content.lines();

        let _type = lines.next().ok_or_else(|| anyhow!("missing type line"))?;
        let height = lines
            .next()
            .and_then(|line| line.split_whitespace().last())
            .ok_or_else(|| anyhow!("missing height line"))?
            .parse::<usize>()?;
        let width = lines
            .next()
            .and_then(|line| line.split_whitespace().last())
            .ok_or_else(|| anyhow!("missing width line"))?
            .parse::<usize>()?;
        let _map = lines.next().ok_or_else(|| anyhow!("missing map line"))?;

        let mut grid = Vec::with_capacity(height);
        for line in lines.take(height) {
            let tiles_row: Vec<Tile> = line
                .chars()
                .map(|ch| Tile {
                    passable: ch == '.',
                    neighbors: Vec::new(),
                })
                .collect();
            grid.push(tiles_row);
        }
        if grid.len() != height || grid.iter().any(|row| row.len() != width) {
            return Err(anyhow!("grid does not match declared {height}x{width}"));
        }

        let mut map = Map {
            height,
            width,
            grid,
            heuristic: Vec::new(),
        };
        map.initialize_neighbors();
        for agent in agents {
            map.heuristic.push(map.bfs_distance(agent.goal));
        }

        Ok(map)
    }

    fn initialize_neighbors(&mut self) {
        for x in 0..self.height {
            for y in 0..self.width {
                if self.grid[x][y].passable {
                    self.grid[x][y].neighbors = self.get_neighbors(x, y);
                }
            }
        }
    }

    pub fn get_neighbors(&self, x: usize, y: usize) -> Vec<(usize, usize)> {
        let directions = [(-1, 0), (1, 0), (0, -1), (0, 1)]; // Up, down, left, right
        let mut neighbors = Vec::new();

        for &(dx, dy) in &directions {
            let new_x = x as i32 + dx;
            let new_y = y as i32 + dy;
            if new_x >= 0
                && new_y >= 0
                && new_x < self.height as i32
                && new_y < self.width as i32
                && self.grid[new_x as usize][new_y as usize].passable
            {
                neighbors.push((new_x as usize, new_y as usize));
            }
        }

        neighbors
    }

    pub fn is_passable(&self, x: usize, y: usize) -> bool {
        self.grid[x][y].is_passable()
    }

    // Stable integer identity used by every node-indexed table.
    pub fn node_id(&self, position: (usize, usize)) -> usize {
        position.0 * self.width + position.1
    }

    pub fn nodes_count(&self) -> usize {
        self.height * self.width
    }

    pub fn manhattan_dist(&self, a: (usize, usize), b: (usize, usize)) -> usize {
        a.0.abs_diff(b.0) + a.1.abs_diff(b.1)
    }

    pub fn bfs_distance(&self, goal: (usize, usize)) -> Vec<Vec<usize>> {
        let mut distance = vec![vec![usize::MAX; self.width]; self.height];
        let mut queue = VecDeque::new();

        distance[goal.0][goal.1] = 0;
        queue.push_back(goal);

        while let Some((x, y)) = queue.pop_front() {
            for &(new_x, new_y) in &self.grid[x][y].neighbors {
                if distance[new_x][new_y] == usize::MAX {
                    distance[new_x][new_y] = distance[x][y] + 1;
                    queue.push_back((new_x, new_y));
                }
            }
        }

        distance
    }

    // Breadth-first path from source to target that never enters a prohibited
    // node. Source and target themselves are allowed to appear in the list.
    pub fn shortest_path_avoiding(
        &self,
        source: (usize, usize),
        target: (usize, usize),
        prohibited: &[(usize, usize)],
    ) -> Option<Vec<(usize, usize)>> {
        let mut blocked = vec![false; self.nodes_count()];
        for &node in prohibited {
            if node != source && node != target {
                blocked[self.node_id(node)] = true;
            }
        }

        let mut parent: Vec<Option<(usize, usize)>> = vec![None; self.nodes_count()];
        let mut seen = vec![false; self.nodes_count()];
        let mut queue = VecDeque::new();
        seen[self.node_id(source)] = true;
        queue.push_back(source);

        while let Some((x, y)) = queue.pop_front() {
            if (x, y) == target {
                let mut path = vec![(x, y)];
                let mut current = (x, y);
                while let Some(prev) = parent[self.node_id(current)] {
                    path.push(prev);
                    current = prev;
                }
                path.reverse();
                return Some(path);
            }
            for &next in &self.grid[x][y].neighbors {
                let id = self.node_id(next);
                if !seen[id] && !blocked[id] {
                    seen[id] = true;
                    parent[id] = Some((x, y));
                    queue.push_back(next);
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RING: &str = "type octile\nheight 3\nwidth 3\nmap\n...\n.@.\n...\n";

    #[test]
    fn test_read_map() {
        let agents = vec![Agent {
            id: 0,
            start: (0, 0),
            goal: (7, 7),
        }];
        let map = Map::from_file("maps/8x8.map", &agents).unwrap();

        assert_eq!(map.height, 8);
        assert_eq!(map.width, 8);
        assert!(map.is_passable(0, 0));

        let neighbors = map.get_neighbors(0, 0);
        assert_eq!(neighbors.len(), 2);
        assert!(neighbors.contains(&(1, 0)));
        assert!(neighbors.contains(&(0, 1)));

        assert_eq!(map.heuristic[0][7][7], 0);
        assert_eq!(map.heuristic[0][0][0], 14);
    }

    #[test]
    fn test_parse_obstacles() {
        let map = Map::from_str(RING, &Vec::new()).unwrap();
        assert!(!map.is_passable(1, 1));
        assert_eq!(map.get_neighbors(0, 1).len(), 2);
        assert_eq!(map.node_id((2, 1)), 7);
        assert_eq!(map.nodes_count(), 9);
    }

    #[test]
    fn test_bfs_distance_around_obstacle() {
        let map = Map::from_str(RING, &Vec::new()).unwrap();
        let distance = map.bfs_distance((2, 1));
        assert_eq!(distance[2][1], 0);
        assert_eq!(distance[0][1], 4);
        assert_eq!(distance[1][1], usize::MAX);
    }

    #[test]
    fn test_shortest_path_avoiding() {
        let map = Map::from_str(RING, &Vec::new()).unwrap();

        let direct = map.shortest_path_avoiding((0, 0), (0, 2), &[]).unwrap();
        assert_eq!(direct.len(), 3);

        let detour = map
            .shortest_path_avoiding((0, 0), (0, 2), &[(0, 1)])
            .unwrap();
        assert_eq!(detour.len(), 7);
        assert!(!detour.contains(&(0, 1)));

        assert!(map
            .shortest_path_avoiding((0, 0), (0, 2), &[(0, 1), (1, 0)])
            .is_none());
    }
}
