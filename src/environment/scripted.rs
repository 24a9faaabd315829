//! Deterministic environment with a fixed reward script.
//!
//! Vehicles drive straight along parallel lanes at constant speed; rewards,
//! episode length and agent counts follow the configured script. Useful to
//! exercise the learner without a driving simulator.

use super::{Environment, Frame, ResetOptions, StepInfo, StepResult};
use crate::types::{ActionMask, LaneCoordinates, Observation, VehicleState};

/// Lane width used to place vehicles, in metres.
const LANE_WIDTH: f64 = 4.0;
/// Seconds simulated per step.
const STEP_DURATION: f64 = 0.2;

/// A scripted multi-agent environment.
///
/// # Lifecycle
///
/// 1. Build with [`ScriptedEnvironment::new`] and the `with_*` methods.
/// 2. [`Environment::reset`] sets the agent count (explicit option, then the
///    training schedule, then the default) and returns the first state.
/// 3. [`Environment::step`] returns the next scripted reward; the episode is
///    done after `horizon` steps.
#[derive(Debug, Clone)]
pub struct ScriptedEnvironment {
    state_dim: usize,
    default_agents: usize,
    agent_schedule: Vec<usize>,
    horizon: u64,
    rewards: Vec<f64>,
    regional_rewards: Option<Vec<f64>>,
    speed: f64,
    nan_at: Option<u64>,
    render: bool,
    n_agents: usize,
    t: u64,
    resets: usize,
    training_resets: usize,
    last_reset: Option<ResetOptions>,
}

impl ScriptedEnvironment {
    /// Creates an environment with `n_agents` vehicles, observations of width
    /// `state_dim` and episodes of `horizon` steps. Every step yields reward 1.
    pub fn new(n_agents: usize, state_dim: usize, horizon: u64) -> Self {
        Self {
            state_dim,
            default_agents: n_agents,
            agent_schedule: Vec::new(),
            horizon: horizon.max(1),
            rewards: vec![1.0],
            regional_rewards: None,
            speed: 25.0,
            nan_at: None,
            render: false,
            n_agents,
            t: 0,
            resets: 0,
            training_resets: 0,
            last_reset: None,
        }
    }

    /// Global rewards for consecutive steps, cycled when the episode is longer.
    pub fn with_rewards(mut self, rewards: Vec<f64>) -> Self {
        if !rewards.is_empty() {
            self.rewards = rewards;
        }
        self
    }

    /// Per-agent rewards reported in `info.regional_rewards` on every step.
    /// Agent `i` receives entry `i % len`.
    pub fn with_regional_rewards(mut self, rewards: Vec<f64>) -> Self {
        self.regional_rewards = (!rewards.is_empty()).then_some(rewards);
        self
    }

    /// Agent counts for consecutive training resets, cycled.
    pub fn with_agent_schedule(mut self, schedule: Vec<usize>) -> Self {
        self.agent_schedule = schedule;
        self
    }

    /// Makes step `step` (1-based within an episode) report a NaN observation
    /// and vehicle position.
    pub fn with_nan_at(mut self, step: u64) -> Self {
        self.nan_at = Some(step);
        self
    }

    /// Enables [`Environment::render_frame`].
    pub fn with_frames(mut self) -> Self {
        self.render = true;
        self
    }

    /// Number of resets performed so far.
    pub fn reset_count(&self) -> usize {
        self.resets
    }

    /// Options of the most recent reset.
    pub fn last_reset(&self) -> Option<&ResetOptions> {
        self.last_reset.as_ref()
    }

    fn vehicle(&self, agent: usize) -> VehicleState {
        let x = 10.0 * agent as f64 + self.speed * STEP_DURATION * self.t as f64;
        let y = (agent % 2) as f64 * LANE_WIDTH;
        VehicleState::new(x, y, self.speed)
    }

    fn observe(&self) -> Observation {
        (0..self.n_agents)
            .map(|agent| {
                let vehicle = self.vehicle(agent);
                let features = [
                    self.t as f64 / self.horizon as f64,
                    vehicle.y / LANE_WIDTH,
                    vehicle.speed / 30.0,
                    agent as f64 / self.n_agents.max(1) as f64,
                ];
                let mut obs = vec![0.0; self.state_dim];
                for (slot, value) in obs.iter_mut().zip(features) {
                    *slot = value;
                }
                obs
            })
            .collect()
    }
}

impl Environment for ScriptedEnvironment {
    fn reset(&mut self, options: &ResetOptions) -> (Observation, ActionMask) {
        self.n_agents = match options.num_agents {
            Some(n) => n,
            None if options.training && !self.agent_schedule.is_empty() => {
                self.agent_schedule[self.training_resets % self.agent_schedule.len()]
            }
            None => self.default_agents,
        };
        if options.training {
            self.training_resets += 1;
        }
        self.t = 0;
        self.resets += 1;
        self.last_reset = Some(options.clone());
        (self.observe(), None)
    }

    fn step(&mut self, actions: &[Vec<f64>]) -> StepResult {
        assert_eq!(
            actions.len(),
            self.n_agents,
            "Number of actions must match number of agents"
        );

        let reward = self.rewards[(self.t as usize) % self.rewards.len()];
        self.t += 1;
        let done = self.t >= self.horizon;

        let mut next_state = self.observe();
        let mut agents_info: Vec<VehicleState> =
            (0..self.n_agents).map(|i| self.vehicle(i)).collect();
        let hdv_info = agents_info
            .iter()
            .map(|v| {
                let lateral = v.y - (v.y / LANE_WIDTH).round() * LANE_WIDTH;
                LaneCoordinates::new(v.x, lateral, v.speed)
            })
            .collect();

        if self.nan_at == Some(self.t) {
            if let Some(first) = next_state.first_mut().and_then(|o| o.first_mut()) {
                *first = f64::NAN;
            }
            if let Some(first) = agents_info.first_mut() {
                first.x = f64::NAN;
            }
        }

        let regional_rewards = self
            .regional_rewards
            .as_ref()
            .map(|r| (0..self.n_agents).map(|i| r[i % r.len()]).collect());

        StepResult {
            next_state,
            reward,
            done,
            info: StepInfo {
                average_speed: self.speed,
                agents_info,
                hdv_info,
                regional_rewards,
            },
        }
    }

    fn controlled_vehicles(&self) -> usize {
        self.n_agents
    }

    fn render_frame(&mut self) -> Option<Frame> {
        if !self.render {
            return None;
        }
        let (width, height) = (4, 2);
        let shade = self.t.min(255) as u8;
        Some(Frame {
            width,
            height,
            rgb: vec![shade; width * height * 3],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_returns_observations() {
        let mut env = ScriptedEnvironment::new(3, 8, 5);
        let (obs, mask) = env.reset(&ResetOptions::training());
        assert_eq!(obs.len(), 3);
        assert!(obs.iter().all(|o| o.len() == 8));
        assert!(mask.is_none());
        assert_eq!(env.controlled_vehicles(), 3);
    }

    #[test]
    fn episode_terminates_at_horizon() {
        let mut env = ScriptedEnvironment::new(2, 4, 3);
        env.reset(&ResetOptions::training());
        for t in 0..3 {
            let result = env.step(&[vec![0.0], vec![0.0]]);
            assert_eq!(result.done, t == 2);
        }
    }

    #[test]
    fn rewards_follow_script() {
        let mut env = ScriptedEnvironment::new(1, 4, 10).with_rewards(vec![1.0, 2.0]);
        env.reset(&ResetOptions::training());
        let rewards: Vec<f64> = (0..3).map(|_| env.step(&[vec![0.0]]).reward).collect();
        assert_eq!(rewards, vec![1.0, 2.0, 1.0]);
    }

    #[test]
    fn regional_rewards_are_per_agent() {
        let mut env = ScriptedEnvironment::new(3, 4, 10).with_regional_rewards(vec![0.5, 1.5]);
        env.reset(&ResetOptions::training());
        let result = env.step(&[vec![0.0], vec![0.0], vec![0.0]]);
        assert_eq!(result.info.regional_rewards, Some(vec![0.5, 1.5, 0.5]));
    }

    #[test]
    fn agent_count_follows_options_then_schedule() {
        let mut env = ScriptedEnvironment::new(2, 4, 10).with_agent_schedule(vec![1, 3]);
        env.reset(&ResetOptions::training());
        assert_eq!(env.controlled_vehicles(), 1);
        env.reset(&ResetOptions::training());
        assert_eq!(env.controlled_vehicles(), 3);
        env.reset(&ResetOptions::evaluation(Some(7), Some(5)));
        assert_eq!(env.controlled_vehicles(), 5);
        assert_eq!(env.last_reset().and_then(|o| o.seed), Some(7));
        env.reset(&ResetOptions::evaluation(None, None));
        assert_eq!(env.controlled_vehicles(), 2);
    }

    #[test]
    fn nan_injection() {
        let mut env = ScriptedEnvironment::new(1, 4, 10).with_nan_at(2);
        env.reset(&ResetOptions::training());
        let first = env.step(&[vec![0.0]]);
        assert!(!first.next_state[0][0].is_nan());
        let second = env.step(&[vec![0.0]]);
        assert!(second.next_state[0][0].is_nan());
        assert!(second.info.agents_info[0].has_nan());
    }

    #[test]
    fn frames_only_when_enabled() {
        let mut env = ScriptedEnvironment::new(1, 4, 10);
        assert!(env.render_frame().is_none());
        let mut env = env.with_frames();
        let frame = env.render_frame().unwrap();
        assert_eq!(frame.rgb.len(), frame.width * frame.height * 3);
    }
}
