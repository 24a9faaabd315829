//! cavmarl - Cooperative Autonomous Vehicles Multi-Agent Reinforcement Learning
//!
//! Multi-agent PPO with a shared actor, a centralized critic and slowly
//! moving target networks, trained against any simulator implementing the
//! [`Environment`] contract.
//!
//! Configuration, rollout memory, return math, episode bookkeeping and
//! checkpoint naming are always available. Neural networks, the learner and
//! the training driver require the `nn` feature flag (tch).

// Always available, no extra dependencies.
pub mod checkpoint;
pub mod config;
pub mod environment;
pub mod episode;
pub mod error;
pub mod metrics;
pub mod training;
pub mod types;

#[cfg(feature = "nn")]
pub mod network;

// Public re-exports, always available.
pub use checkpoint::{CheckpointMeta, CheckpointSelector};
pub use config::{
    ConfigError, CriticLoss, LogProbEstimator, MappoConfig, OptimizerKind, OutputActivation,
    RewardType, RunConfig, TrafficDensity,
};
pub use environment::{
    Environment, FrameSink, ResetOptions, ScriptedEnvironment, StepInfo, StepResult,
};
pub use episode::{EpisodeLog, EpisodeRecord};
pub use error::LearnerError;
pub use metrics::EvaluationStats;
pub use training::OnPolicyMemory;
pub use types::{JointAction, Observation};

// Re-exports gated behind `nn` feature.
#[cfg(feature = "nn")]
pub use network::{ActorNetwork, CriticNetwork};
#[cfg(feature = "nn")]
pub use training::{run_evaluation, run_training, MappoLearner};
