//! Configuration for the MAPPO learner and its training driver.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while validating or parsing configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unsupported reward type: {0} (expected \"regional_R\" or \"global_R\")")]
    UnsupportedRewardType(String),

    #[error("Unsupported critic loss: {0} (expected \"mse\" or \"huber\")")]
    UnsupportedCriticLoss(String),

    #[error("Unsupported optimizer: {0} (expected \"adam\" or \"rmsprop\")")]
    UnsupportedOptimizer(String),

    #[error("Unsupported output activation: {0} (expected \"tanh\" or \"sigmoid\")")]
    UnsupportedActivation(String),

    #[error("Unsupported traffic density: {0} (expected 1, 2 or 3)")]
    UnsupportedTrafficDensity(String),

    #[error("Unsupported log-prob estimator: {0} (expected \"gaussian\" or \"projection\")")]
    UnsupportedEstimator(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: f64 },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// How the per-agent reward of a step is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RewardType {
    /// Each agent receives its own entry of `info.regional_rewards`.
    Regional,
    /// The scalar global reward is broadcast to every agent.
    #[default]
    Global,
}

impl FromStr for RewardType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regional_R" | "regional" => Ok(RewardType::Regional),
            "global_R" | "global" => Ok(RewardType::Global),
            other => Err(ConfigError::UnsupportedRewardType(other.to_string())),
        }
    }
}

impl fmt::Display for RewardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewardType::Regional => write!(f, "regional_R"),
            RewardType::Global => write!(f, "global_R"),
        }
    }
}

/// Loss used to regress the critic onto discounted returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CriticLoss {
    #[default]
    Mse,
    /// Smooth-L1 with β = 1.
    Huber,
}

impl FromStr for CriticLoss {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mse" => Ok(CriticLoss::Mse),
            "huber" => Ok(CriticLoss::Huber),
            other => Err(ConfigError::UnsupportedCriticLoss(other.to_string())),
        }
    }
}

/// Gradient optimizer used for both live networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OptimizerKind {
    Adam,
    #[default]
    RmsProp,
}

impl FromStr for OptimizerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adam" => Ok(OptimizerKind::Adam),
            "rmsprop" => Ok(OptimizerKind::RmsProp),
            other => Err(ConfigError::UnsupportedOptimizer(other.to_string())),
        }
    }
}

/// Bounded nonlinearity applied to every actor output component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputActivation {
    /// Actions in `[-1, 1]`.
    #[default]
    Tanh,
    /// Actions in `[0, 1]`.
    Sigmoid,
}

impl FromStr for OutputActivation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tanh" => Ok(OutputActivation::Tanh),
            "sigmoid" => Ok(OutputActivation::Sigmoid),
            other => Err(ConfigError::UnsupportedActivation(other.to_string())),
        }
    }
}

/// How action log-probabilities are obtained for the importance ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogProbEstimator {
    /// Diagonal Gaussian centred on the actor output, std = exploration noise.
    #[default]
    Gaussian,
    /// `sum(actor(state) * action)` over action components.
    Projection,
}

impl FromStr for LogProbEstimator {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gaussian" => Ok(LogProbEstimator::Gaussian),
            "projection" => Ok(LogProbEstimator::Projection),
            other => Err(ConfigError::UnsupportedEstimator(other.to_string())),
        }
    }
}

/// Traffic density level, controls how many vehicles evaluation episodes spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrafficDensity {
    #[default]
    Low,
    Medium,
    High,
}

impl TrafficDensity {
    /// Number of controlled vehicles for the `episode`-th evaluation episode
    /// run during training.
    pub fn agents_for_episode(&self, episode: usize) -> usize {
        match self {
            TrafficDensity::Low => episode + 1,
            TrafficDensity::Medium => episode + 2,
            TrafficDensity::High => episode + 4,
        }
    }
}

impl FromStr for TrafficDensity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" | "low" => Ok(TrafficDensity::Low),
            "2" | "medium" => Ok(TrafficDensity::Medium),
            "3" | "high" => Ok(TrafficDensity::High),
            other => Err(ConfigError::UnsupportedTrafficDensity(other.to_string())),
        }
    }
}

/// Hyperparameters of the multi-agent PPO learner.
///
/// Defaults mirror the lane-change experiments: discount 0.99, clip 0.2,
/// full target replacement every 5 episodes and rewards scaled down by 20.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappoConfig {
    // --- Dimensions ---
    /// Width of one agent's observation vector.
    pub state_dim: usize,
    /// Width of one agent's action vector.
    pub action_dim: usize,

    // --- Rollouts ---
    /// Maximum number of stored rollouts.
    pub memory_capacity: usize,
    /// Steps after which the environment is force-reset.
    pub max_steps: Option<u64>,
    /// Rollout horizon.
    pub roll_out_n_steps: usize,
    /// Per-agent reward source.
    pub reward_type: RewardType,
    /// Raw rewards are divided by this before discounting (disabled when 0).
    pub reward_scale: f64,
    /// Discount factor γ.
    pub reward_gamma: f64,
    /// Std of the Gaussian noise added to actions while collecting rollouts.
    pub exploration_noise_std: f64,
    /// Std of the noise added to actions during evaluation.
    pub evaluation_noise_std: f64,

    // --- Networks ---
    pub actor_hidden_size: usize,
    pub critic_hidden_size: usize,
    pub actor_output_act: OutputActivation,
    pub critic_loss: CriticLoss,
    pub log_prob_estimator: LogProbEstimator,

    // --- Optimization ---
    pub optimizer: OptimizerKind,
    pub actor_lr: f64,
    pub critic_lr: f64,
    /// Gradient norm cap; `None` disables clipping.
    pub max_grad_norm: Option<f64>,
    /// PPO clip bound ε.
    pub clip_param: f64,
    /// Number of rollouts sampled per training call.
    pub batch_size: usize,
    /// Completed episodes required before `train` updates parameters.
    pub episodes_before_train: u64,
    /// Drop every stored rollout after a training call.
    pub clear_memory_after_train: bool,

    // --- Target networks ---
    /// Soft-update interpolation factor τ.
    pub target_tau: f64,
    /// Targets are synced every this many completed episodes.
    pub target_update_steps: u64,

    // --- Evaluation ---
    pub traffic_density: TrafficDensity,
    /// Seeds used for evaluation resets, cycled per episode.
    pub test_seeds: Vec<u64>,
    /// Hard step cap for a single evaluation episode.
    pub eval_step_limit: u64,

    /// Seeds torch and the exploration RNG when set.
    pub seed: Option<u64>,
    /// Completed episodes kept in the learner's history (unbounded when `None`).
    pub history_capacity: Option<usize>,
}

impl MappoConfig {
    /// Creates a configuration with default hyperparameters for the given dimensions.
    pub fn new(state_dim: usize, action_dim: usize) -> Self {
        Self {
            state_dim,
            action_dim,
            ..Self::default()
        }
    }

    /// Checks every numeric invariant the learner relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state_dim == 0 {
            return Err(ConfigError::Zero("state_dim"));
        }
        if self.action_dim == 0 {
            return Err(ConfigError::Zero("action_dim"));
        }
        if self.roll_out_n_steps == 0 {
            return Err(ConfigError::Zero("roll_out_n_steps"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Zero("batch_size"));
        }
        if self.memory_capacity == 0 {
            return Err(ConfigError::Zero("memory_capacity"));
        }
        if self.target_update_steps == 0 {
            return Err(ConfigError::Zero("target_update_steps"));
        }
        if self.actor_hidden_size == 0 || self.critic_hidden_size == 0 {
            return Err(ConfigError::Zero("hidden_size"));
        }

        check_range("reward_gamma", self.reward_gamma, 0.0, 1.0)?;
        check_range("target_tau", self.target_tau, 0.0, 1.0)?;
        check_positive("clip_param", self.clip_param)?;
        check_positive("actor_lr", self.actor_lr)?;
        check_positive("critic_lr", self.critic_lr)?;
        check_non_negative("reward_scale", self.reward_scale)?;
        check_non_negative("exploration_noise_std", self.exploration_noise_std)?;
        check_non_negative("evaluation_noise_std", self.evaluation_noise_std)?;
        if let Some(norm) = self.max_grad_norm {
            check_positive("max_grad_norm", norm)?;
        }
        if self.log_prob_estimator == LogProbEstimator::Gaussian {
            check_positive("exploration_noise_std", self.exploration_noise_std)?;
        }
        Ok(())
    }
}

impl Default for MappoConfig {
    fn default() -> Self {
        Self {
            state_dim: 25,
            action_dim: 2,
            memory_capacity: 10_000,
            max_steps: None,
            roll_out_n_steps: 100,
            reward_type: RewardType::Global,
            reward_scale: 20.0,
            reward_gamma: 0.99,
            exploration_noise_std: 0.5,
            evaluation_noise_std: 0.01,
            actor_hidden_size: 128,
            critic_hidden_size: 128,
            actor_output_act: OutputActivation::Tanh,
            critic_loss: CriticLoss::Mse,
            log_prob_estimator: LogProbEstimator::Gaussian,
            optimizer: OptimizerKind::RmsProp,
            actor_lr: 1e-4,
            critic_lr: 1e-4,
            max_grad_norm: Some(0.5),
            clip_param: 0.2,
            batch_size: 100,
            episodes_before_train: 100,
            clear_memory_after_train: true,
            target_tau: 1.0,
            target_update_steps: 5,
            traffic_density: TrafficDensity::Low,
            test_seeds: Vec::new(),
            eval_step_limit: 10_000,
            seed: None,
            history_capacity: None,
        }
    }
}

/// Settings of the outer training loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Training stops once this many episodes completed.
    pub max_episodes: u64,
    /// Evaluate and checkpoint every this many episodes.
    pub eval_interval: u64,
    /// Episodes per evaluation.
    pub eval_episodes: usize,
    /// Resume from the latest checkpoint in the model directory, if any.
    pub resume: bool,
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.eval_interval == 0 {
            return Err(ConfigError::Zero("eval_interval"));
        }
        Ok(())
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_episodes: 2_000,
            eval_interval: 50,
            eval_episodes: 3,
            resume: true,
        }
    }
}

fn check_range(name: &'static str, value: f64, lo: f64, hi: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (lo..=hi).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue { name, value })
    }
}

fn check_positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue { name, value })
    }
}

fn check_non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue { name, value })
    }
}
