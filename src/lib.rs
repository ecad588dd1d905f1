pub mod common;
pub mod config;
pub mod execution;
pub mod map;
pub mod scenario;
pub mod solver;
pub mod stat;
