//! Training infrastructure for MAPPO (Multi-Agent PPO).
//!
//! Rollout memory and return math are always available. The learner, its
//! evaluation loop and the training driver require the `nn` feature.

pub mod buffer;
pub mod returns;

#[cfg(feature = "nn")]
mod evaluation;
#[cfg(feature = "nn")]
pub mod mappo;
#[cfg(feature = "nn")]
pub mod runner;

pub use buffer::{AgentSlice, Batch, OnPolicyMemory, Rollout};

#[cfg(feature = "nn")]
pub use mappo::{MappoLearner, RolloutSummary, TrainStats};
#[cfg(feature = "nn")]
pub use runner::{run_evaluation, run_training};
