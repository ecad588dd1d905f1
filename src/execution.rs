use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::common::{Path, Solution};
use crate::map::Map;

/// What a plan did when executed under random delays. `configs` holds one
/// position per agent per round, `configs[0]` being the starts; `finished`
/// is false only when execution wedged, which a deadlock-free plan never does.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub configs: Vec<Vec<(usize, usize)>>,
    pub activations: usize,
    pub makespan: usize,
    pub sum_of_costs: usize,
    pub finished: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Standing on `tail`.
    Contracted,
    /// Mid-move: still holds `tail`, has reserved `head`.
    Extended,
}

struct AgentState {
    t: usize,
    mode: Mode,
    head: Option<(usize, usize)>,
    tail: (usize, usize),
    path: Path,
}

impl AgentState {
    fn new(path: Path) -> Self {
        AgentState {
            t: 0,
            mode: Mode::Contracted,
            head: None,
            tail: path[0],
            path,
        }
    }

    fn next_node(&self) -> Option<(usize, usize)> {
        self.path.get(self.t + 1).copied()
    }

    fn is_finished(&self) -> bool {
        self.mode == Mode::Contracted && self.t == self.path.len() - 1
    }
}

struct Emulator<'a> {
    map: &'a Map,
    agents: Vec<AgentState>,
    occupancy: Vec<Option<usize>>,
    activations: usize,
}

/// Plays a solved plan under asynchronous activation. Each agent gets a delay
/// probability drawn from `U(0, ub_delay_prob)`; every round, mid-move agents
/// complete unless delayed, the configuration is recorded, and standing
/// agents are activated in random order until all of them are either moving,
/// finished, or waiting on someone who is. Deterministic for a fixed rng.
pub fn emulate<R: Rng + ?Sized>(
    map: &Map,
    solution: &Solution,
    ub_delay_prob: f64,
    rng: &mut R,
) -> ExecutionRecord {
    let delay_probs: Vec<f64> = (0..solution.paths.len())
        .map(|_| rng.gen::<f64>() * ub_delay_prob)
        .collect();

    let mut occupancy = vec![None; map.nodes_count()];
    let agents: Vec<AgentState> = solution
        .paths
        .iter()
        .enumerate()
        .map(|(id, path)| {
            let state = AgentState::new(path.clone());
            occupancy[map.node_id(state.tail)] = Some(id);
            state
        })
        .collect();

    Emulator {
        map,
        agents,
        occupancy,
        activations: 0,
    }
    .run(&delay_probs, rng)
}

impl Emulator<'_> {
    fn run<R: Rng + ?Sized>(mut self, delay_probs: &[f64], rng: &mut R) -> ExecutionRecord {
        info!("emulating execution, delays {delay_probs:?}");
        let mut configs: Vec<Vec<(usize, usize)>> = Vec::new();
        let finished;

        loop {
            // Mid-move agents complete unless their delay strikes. A zero
            // bound draws zero probabilities, so `<` keeps it delay-free.
            for id in 0..self.agents.len() {
                if self.agents[id].mode == Mode::Extended {
                    if rng.gen::<f64>() < delay_probs[id] {
                        continue;
                    }
                    self.activate(id);
                }
            }

            configs.push(self.agents.iter().map(|a| a.tail).collect());

            // Recounted from scratch: agents starting on their goal are done
            // without ever being activated.
            if self.agents.iter().all(|a| a.is_finished()) {
                finished = true;
                break;
            }

            // Standing agents claim their next node until everyone settles.
            // Each sweep moves at least one agent, so this terminates.
            loop {
                let mut unstable: Vec<usize> = (0..self.agents.len())
                    .filter(|&id| !self.is_stable(id))
                    .collect();
                if unstable.is_empty() {
                    break;
                }
                unstable.shuffle(rng);
                for id in unstable {
                    self.activate(id);
                }
            }

            // With nobody mid-move and nobody done activating, no future
            // round can change anything.
            if !self.agents.iter().any(|a| a.mode == Mode::Extended) {
                warn!("execution wedged, the plan was not deadlock-free");
                finished = false;
                break;
            }
        }

        let makespan = configs.len() - 1;
        let sum_of_costs = config_sum_of_costs(&configs);
        info!(
            "emulation done: finished {finished}, makespan {makespan}, soc {sum_of_costs}, activations {}",
            self.activations
        );
        ExecutionRecord {
            configs,
            activations: self.activations,
            makespan,
            sum_of_costs,
            finished,
        }
    }

    /// One attempt by one agent: a mid-move agent finishes its move, a
    /// standing agent reserves its next node if that node is free. Blocked
    /// attempts count too.
    fn activate(&mut self, id: usize) {
        self.activations += 1;
        match self.agents[id].mode {
            Mode::Extended => {
                let agent = &mut self.agents[id];
                if let Some(head) = agent.head.take() {
                    let freed = self.map.node_id(agent.tail);
                    agent.tail = head;
                    agent.mode = Mode::Contracted;
                    self.occupancy[freed] = None;
                }
            }
            Mode::Contracted => {
                let Some(next) = self.agents[id].next_node() else {
                    return;
                };
                let target = self.map.node_id(next);
                if self.occupancy[target].is_none() {
                    self.occupancy[target] = Some(id);
                    let agent = &mut self.agents[id];
                    agent.mode = Mode::Extended;
                    agent.head = Some(next);
                    agent.t += 1;
                }
            }
        }
    }

    /// An agent is stable when nothing it does this round could move it:
    /// already mid-move, finished, or waiting behind a chain of stable
    /// agents. The chain is walked iteratively; a chain that bites its own
    /// tail is stable too, nobody in it can go anywhere.
    fn is_stable(&self, start: usize) -> bool {
        let mut visited = vec![false; self.agents.len()];
        let mut current = start;
        while !visited[current] {
            visited[current] = true;
            let agent = &self.agents[current];
            if agent.mode == Mode::Extended {
                return true;
            }
            let Some(next) = agent.next_node() else {
                return true;
            };
            match self.occupancy[self.map.node_id(next)] {
                None => return false,
                Some(holder) => current = holder,
            }
        }
        true
    }
}

// Arrival times summed over agents, read off the recorded configurations.
fn config_sum_of_costs(configs: &[Vec<(usize, usize)>]) -> usize {
    let makespan = configs.len() - 1;
    let mut soc = 0;
    for i in 0..configs[0].len() {
        let goal = configs[makespan][i];
        let mut c = makespan;
        while c > 0 && configs[c - 1][i] == goal {
            c -= 1;
        }
        soc += c;
    }
    soc
}
