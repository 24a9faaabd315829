//! Contract between the learner and the driving simulator.
//!
//! The simulator itself (vehicle kinematics, lanes, collisions, reward terms)
//! lives outside this crate. The learner only needs the [`Environment`] trait:
//!
//! 1. [`Environment::reset`] starts an episode and returns the first state.
//! 2. [`Environment::step`] applies one action per controlled vehicle.
//! 3. [`Environment::controlled_vehicles`] reports the current agent count,
//!    which may change between resets.

mod scripted;

pub use scripted::ScriptedEnvironment;

use crate::types::{ActionMask, LaneCoordinates, Observation, VehicleState};

/// Options passed to [`Environment::reset`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetOptions {
    /// Training episodes use the training seed stream; evaluation ones do not.
    pub training: bool,
    /// Seed for this episode, if any.
    pub seed: Option<u64>,
    /// Number of controlled vehicles to spawn, if the environment supports it.
    pub num_agents: Option<usize>,
}

impl ResetOptions {
    /// Options for a regular training reset.
    pub fn training() -> Self {
        Self {
            training: true,
            ..Self::default()
        }
    }

    /// Options for an evaluation reset.
    pub fn evaluation(seed: Option<u64>, num_agents: Option<usize>) -> Self {
        Self {
            training: false,
            seed,
            num_agents,
        }
    }
}

/// Auxiliary information returned with every step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepInfo {
    /// Mean speed of the controlled vehicles.
    pub average_speed: f64,
    /// World-frame state of each controlled vehicle.
    pub agents_info: Vec<VehicleState>,
    /// Lane-local coordinates of each controlled vehicle.
    pub hdv_info: Vec<LaneCoordinates>,
    /// Per-agent rewards, present when the simulator shapes rewards per agent.
    pub regional_rewards: Option<Vec<f64>>,
}

/// Result of a single environment step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub next_state: Observation,
    /// Cooperative reward shared by all agents.
    pub reward: f64,
    /// Episode ended (collision or duration exceeded).
    pub done: bool,
    pub info: StepInfo,
}

/// A rendered RGB frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: usize,
    pub height: usize,
    /// Row-major RGB bytes, `width * height * 3` long.
    pub rgb: Vec<u8>,
}

/// Receives frames rendered during evaluation, e.g. to encode a video.
pub trait FrameSink {
    fn record(&mut self, episode: usize, frame: &Frame);
}

impl FrameSink for Vec<Frame> {
    fn record(&mut self, _episode: usize, frame: &Frame) {
        self.push(frame.clone());
    }
}

/// A multi-agent driving environment.
pub trait Environment {
    /// Starts a new episode.
    fn reset(&mut self, options: &ResetOptions) -> (Observation, ActionMask);

    /// Applies one action per controlled vehicle.
    fn step(&mut self, actions: &[Vec<f64>]) -> StepResult;

    /// Number of vehicles currently controlled by the learner.
    fn controlled_vehicles(&self) -> usize;

    /// Renders the current scene, for environments that support it.
    fn render_frame(&mut self) -> Option<Frame> {
        None
    }
}
