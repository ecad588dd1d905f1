use anyhow::{bail, Context, Result};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, Write};
use tracing::info;

use crate::common::Agent;
use crate::map::Map;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ScenarioAgent {
    pub start: [usize; 2],
    pub goal: [usize; 2],
}

/// An instance file: the map it runs on plus a fixed agent list. Positions
/// are `[row, column]` pairs.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub map: String,
    pub agents: Vec<ScenarioAgent>,
}

impl Scenario {
    pub fn load_from_file(path: &str) -> Result<Scenario> {
        let file = File::open(path).with_context(|| format!("cannot open instance {path:?}"))?;
        let reader = BufReader::new(file);
        serde_yaml::from_reader(reader).with_context(|| format!("malformed instance {path:?}"))
    }

    pub fn from_yaml_str(content: &str) -> Result<Scenario> {
        serde_yaml::from_str(content).context("malformed instance")
    }

    pub fn write_to_file(&self, path: &str) -> Result<()> {
        let file = File::create(path).with_context(|| format!("cannot create {path:?}"))?;
        let mut writer = io::BufWriter::new(file);
        writer.write_all(serde_yaml::to_string(self)?.as_bytes())?;
        Ok(())
    }

    /// The first `limit` agents, numbered in file order. No limit takes all.
    pub fn agents(&self, limit: Option<usize>) -> Result<Vec<Agent>> {
        let take = limit.unwrap_or(self.agents.len());
        if take > self.agents.len() {
            bail!(
                "instance provides {} agents, {} requested",
                self.agents.len(),
                take
            );
        }
        Ok(self
            .agents
            .iter()
            .take(take)
            .enumerate()
            .map(|(id, entry)| Agent {
                id,
                start: (entry.start[0], entry.start[1]),
                goal: (entry.goal[0], entry.goal[1]),
            })
            .collect())
    }

    /// Draws starts and goals independently from the passable cells, each
    /// side without repetition. An agent may start on its own goal.
    pub fn generate_random<R: Rng + ?Sized>(
        map: &Map,
        map_name: &str,
        num_agents: usize,
        rng: &mut R,
    ) -> Result<Scenario> {
        let mut cells: Vec<(usize, usize)> = (0..map.height)
            .flat_map(|x| (0..map.width).map(move |y| (x, y)))
            .filter(|&(x, y)| map.is_passable(x, y))
            .collect();
        if cells.len() < num_agents {
            bail!(
                "map has {} free cells, cannot place {} agents",
                cells.len(),
                num_agents
            );
        }

        cells.shuffle(rng);
        let starts: Vec<(usize, usize)> = cells[..num_agents].to_vec();
        cells.shuffle(rng);
        let goals: Vec<(usize, usize)> = cells[..num_agents].to_vec();

        let agents = starts
            .into_iter()
            .zip(goals)
            .map(|(start, goal)| ScenarioAgent {
                start: [start.0, start.1],
                goal: [goal.0, goal.1],
            })
            .collect();

        let scenario = Scenario {
            map: map_name.to_string(),
            agents,
        };
        info!("generated scenario: {:?}", scenario.agents);
        Ok(scenario)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    const SAMPLE: &str = "map: maps/8x8.map
agents:
  - start: [0, 0]
    goal: [3, 3]
  - start: [7, 7]
    goal: [4, 4]
";

    #[test]
    fn test_yaml_round_trip() {
        let scenario = Scenario::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(scenario.map, "maps/8x8.map");
        assert_eq!(scenario.agents.len(), 2);
        assert_eq!(scenario.agents[1].start, [7, 7]);

        let reparsed = Scenario::from_yaml_str(&serde_yaml::to_string(&scenario).unwrap()).unwrap();
        assert_eq!(reparsed, scenario);
    }

    #[test]
    fn test_agent_numbering_and_limit() {
        let scenario = Scenario::from_yaml_str(SAMPLE).unwrap();

        let all = scenario.agents(None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, 0);
        assert_eq!(all[1].id, 1);
        assert_eq!(all[1].goal, (4, 4));

        let first = scenario.agents(Some(1)).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].start, (0, 0));

        assert!(scenario.agents(Some(3)).is_err());
    }

    #[test]
    fn test_random_generation_is_seeded_and_collision_free() {
        let map = Map::from_str(
            "type octile\nheight 3\nwidth 3\nmap\n...\n.@.\n...\n",
            &Vec::new(),
        )
        .unwrap();

        let mut rng = StdRng::seed_from_u64(42);
        let scenario = Scenario::generate_random(&map, "ring.map", 8, &mut rng).unwrap();
        assert_eq!(scenario.agents.len(), 8);

        let starts: HashSet<[usize; 2]> = scenario.agents.iter().map(|a| a.start).collect();
        let goals: HashSet<[usize; 2]> = scenario.agents.iter().map(|a| a.goal).collect();
        assert_eq!(starts.len(), 8);
        assert_eq!(goals.len(), 8);
        assert!(!starts.contains(&[1, 1]));
        assert!(!goals.contains(&[1, 1]));

        let mut rng = StdRng::seed_from_u64(42);
        let replay = Scenario::generate_random(&map, "ring.map", 8, &mut rng).unwrap();
        assert_eq!(replay, scenario);

        assert!(Scenario::generate_random(&map, "ring.map", 9, &mut rng).is_err());
    }

    #[test]
    fn test_sample_instance_parses() {
        let scenario = Scenario::load_from_file("instances/sample.yaml").unwrap();
        assert_eq!(scenario.map, "maps/8x8.map");
        assert!(!scenario.agents.is_empty());
    }
}
