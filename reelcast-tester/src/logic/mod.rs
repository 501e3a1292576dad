pub mod reports;
pub mod simulation;
pub mod tester;

pub use simulation::{SimulationConfig, SimulationReport, run_simulation};
pub use tester::*;
