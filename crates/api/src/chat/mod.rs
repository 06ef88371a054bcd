//! Chat core: session lifecycle, agent capacity, directory and stats

pub mod agents;
pub mod capacity;
pub mod engine;
pub mod stats;

pub use agents::{AgentDirectory, NewAgent};
pub use capacity::{Assignment, CapacityManager};
pub use engine::{AgentSummary, SessionClose, SessionDetails, SessionEngine};
pub use stats::{ChatStats, StatsAggregator};
