use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub costs: usize,
    pub time_ms: u128,
    pub low_level_expand_nodes: usize,
    pub high_level_expand_nodes: usize,
    pub fragments_registered: usize,
    pub iterations: usize,
}

impl Stats {
    pub fn print(&self, solver: &str) {
        info!(
            "Solver {:?} Cost {:?} Time(ms) {:?} High level expand nodes number: {:?} Low level expand nodes number {:?} Registered fragments {:?} Iterations {:?}",
            solver,
            self.costs,
            self.time_ms,
            self.high_level_expand_nodes,
            self.low_level_expand_nodes,
            self.fragments_registered,
            self.iterations
        );
    }
}
