use std::time::{Duration, Instant};

use anyhow::{bail, Result};

use crate::map::Map;

pub type Path = Vec<(usize, usize)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    pub id: usize,
    pub start: (usize, usize),
    pub goal: (usize, usize),
}

impl Agent {
    pub fn verify(&self, map: &Map) -> Result<()> {
        for (name, (x, y)) in [("start", self.start), ("goal", self.goal)] {
            if x >= map.height || y >= map.width {
                bail!("agent {} {name} {:?} is out of bounds", self.id, (x, y));
            }
            if !map.is_passable(x, y) {
                bail!("agent {} {name} {:?} is not passable", self.id, (x, y));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Solution {
    pub paths: Vec<Path>,
}

impl Solution {
    // Endpoint and adjacency checks; every solved outcome must pass this.
    pub fn verify(&self, map: &Map, agents: &Vec<Agent>) -> Result<()> {
        if self.paths.len() != agents.len() {
            bail!(
                "solution holds {} paths for {} agents",
                self.paths.len(),
                agents.len()
            );
        }
        for agent in agents {
            let path = &self.paths[agent.id];
            if path.is_empty() {
                bail!("agent {} has an empty path", agent.id);
            }
            if path[0] != agent.start {
                bail!("agent {} path starts at {:?}", agent.id, path[0]);
            }
            if *path.last().unwrap() != agent.goal {
                bail!("agent {} path ends at {:?}", agent.id, path.last());
            }
            for pair in path.windows(2) {
                if !map.get_neighbors(pair[0].0, pair[0].1).contains(&pair[1]) {
                    bail!(
                        "agent {} path jumps from {:?} to {:?}",
                        agent.id,
                        pair[0],
                        pair[1]
                    );
                }
            }
        }
        Ok(())
    }

    pub fn sum_of_costs(&self) -> usize {
        self.paths.iter().map(|path| path.len() - 1).sum()
    }
}

// Wall-clock budget shared by a whole solve call. Polled cooperatively, never
// enforced preemptively.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn start(budget: Duration) -> Self {
        Deadline {
            start: Instant::now(),
            budget,
        }
    }

    pub fn expired(&self) -> bool {
        self.start.elapsed() >= self.budget
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.start.elapsed().as_millis()
    }
}
