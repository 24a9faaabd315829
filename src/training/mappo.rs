//! MAPPO (Multi-Agent PPO) learner.
//!
//! One actor and one critic are shared by every controlled vehicle and
//! applied to each agent's slice of a batch independently. Frozen target
//! copies of both networks provide the bootstrap value, the advantage
//! baseline and the "old" log-probabilities of the importance ratio; they
//! move only through [`soft_update`].
//!
//! The outer loop alternates [`MappoLearner::interact`] and
//! [`MappoLearner::train`]; both take `&mut self`, so they never overlap.

use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tch::{nn, nn::OptimizerConfig, Device, Kind, Reduction, Tensor};

use super::buffer::OnPolicyMemory;
use super::returns::{discount_per_agent, scale_rewards};
use crate::checkpoint::{self, CheckpointMeta, CheckpointSelector, OptimizerState};
use crate::config::{ConfigError, CriticLoss, MappoConfig, OptimizerKind, RewardType};
use crate::environment::{Environment, ResetOptions, StepResult};
use crate::episode::{EpisodeLog, TrajectoryTrace};
use crate::error::LearnerError;
use crate::network::{rows_from_tensor, soft_update, tensor_from_rows, ActorNetwork, CriticNetwork};
use crate::types::{JointAction, Observation};

/// Outcome of one [`MappoLearner::interact`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct RolloutSummary {
    /// Environment steps taken.
    pub steps: usize,
    pub n_agents: usize,
    /// The rollout ended because the episode terminated.
    pub episode_done: bool,
    /// Per-agent value used to seed the discounted returns.
    pub bootstrap: Vec<f64>,
}

/// Losses of one [`MappoLearner::train`] call, averaged over agents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainStats {
    pub actor_loss: f64,
    pub critic_loss: f64,
    /// Rollouts sampled from memory.
    pub rollouts: usize,
    /// Agent slices that received a gradient step.
    pub agents: usize,
    /// Target networks were soft-updated during this call.
    pub targets_synced: bool,
}

fn build_optimizer(
    kind: OptimizerKind,
    vs: &nn::VarStore,
    lr: f64,
) -> Result<nn::Optimizer, LearnerError> {
    let opt = match kind {
        OptimizerKind::Adam => nn::Adam::default().build(vs, lr)?,
        OptimizerKind::RmsProp => nn::RmsProp::default().build(vs, lr)?,
    };
    Ok(opt)
}

fn optimizer_step(opt: &mut nn::Optimizer, loss: &Tensor, max_grad_norm: Option<f64>) {
    match max_grad_norm {
        Some(max) => opt.backward_step_clip_norm(loss, max),
        None => opt.backward_step(loss),
    }
}

/// Per-sample clipped PPO objective `min(ρA, clip(ρ, 1-ε, 1+ε)A)`.
pub fn clipped_surrogate_objective(ratio: &Tensor, advantages: &Tensor, clip: f64) -> Tensor {
    let unclipped = ratio * advantages;
    let clipped = ratio.clamp(1.0 - clip, 1.0 + clip) * advantages;
    unclipped.min_other(&clipped)
}

fn ensure_finite(state: &Observation) -> Result<(), LearnerError> {
    if state.iter().flatten().any(|v| v.is_nan()) {
        return Err(LearnerError::NonFinite("observation"));
    }
    Ok(())
}

/// Multi-agent PPO learner bound to a training environment.
pub struct MappoLearner<E: Environment> {
    env: E,
    config: MappoConfig,
    device: Device,

    actor: ActorNetwork,
    critic: CriticNetwork,
    actor_target: ActorNetwork,
    critic_target: CriticNetwork,
    actor_opt: nn::Optimizer,
    critic_opt: nn::Optimizer,

    memory: OnPolicyMemory,
    rng: StdRng,

    env_state: Observation,
    n_agents: usize,
    n_episodes: u64,
    /// Steps since the last forced reset, compared against `max_steps`.
    n_steps: u64,
    total_steps: u64,
    episode_done: bool,
    episodes: EpisodeLog,
    trace: TrajectoryTrace,
    last_synced_episode: Option<u64>,
}

impl<E: Environment> MappoLearner<E> {
    /// Validates `config`, builds the networks and resets `env` once.
    pub fn new(mut env: E, config: MappoConfig, device: Device) -> Result<Self, LearnerError> {
        config.validate()?;

        let rng = match config.seed {
            Some(seed) => {
                tch::manual_seed(seed as i64);
                StdRng::seed_from_u64(seed)
            }
            None => StdRng::from_entropy(),
        };

        let actor = ActorNetwork::new(
            config.state_dim,
            config.actor_hidden_size,
            config.action_dim,
            config.actor_output_act,
            device,
        );
        let critic = CriticNetwork::new(
            config.state_dim,
            config.action_dim,
            config.critic_hidden_size,
            device,
        );
        let actor_target = actor.snapshot()?;
        let critic_target = critic.snapshot()?;

        let actor_opt = build_optimizer(config.optimizer, actor.var_store(), config.actor_lr)?;
        let critic_opt = build_optimizer(config.optimizer, critic.var_store(), config.critic_lr)?;

        let (env_state, _) = env.reset(&ResetOptions::training());
        let n_agents = env.controlled_vehicles();

        Ok(Self {
            memory: OnPolicyMemory::new(
                config.memory_capacity,
                config.state_dim,
                config.action_dim,
            ),
            episodes: EpisodeLog::with_capacity(config.history_capacity),
            env,
            config,
            device,
            actor,
            critic,
            actor_target,
            critic_target,
            actor_opt,
            critic_opt,
            rng,
            env_state,
            n_agents,
            n_episodes: 0,
            n_steps: 0,
            total_steps: 0,
            episode_done: false,
            trace: TrajectoryTrace::default(),
            last_synced_episode: None,
        })
    }

    /// Collects up to `roll_out_n_steps` steps with exploration noise,
    /// discounts the rewards and pushes the rollout into memory.
    pub fn interact(&mut self) -> Result<RolloutSummary, LearnerError> {
        if let Some(max_steps) = self.config.max_steps {
            if self.n_steps >= max_steps {
                self.abandon_episode();
                tracing::debug!(max_steps, "Step budget exhausted, environment reset");
            }
        }

        self.n_agents = self.env.controlled_vehicles();
        let n_agents = self.n_agents;

        let mut states = Vec::with_capacity(self.config.roll_out_n_steps);
        let mut actions = Vec::with_capacity(self.config.roll_out_n_steps);
        let mut rewards = Vec::with_capacity(self.config.roll_out_n_steps);
        let mut final_state = self.env_state.clone();
        let mut done = false;

        for step in 0..self.config.roll_out_n_steps {
            let state = self.env_state.clone();
            self.check_agents(step, &state)?;
            let action = self.exploration_action(&state)?;

            let result = self.env.step(&action);
            let reward = match self.agent_rewards(&result, n_agents) {
                Ok(reward) => reward,
                Err(e) => {
                    // the environment already advanced; start over from a fresh episode
                    self.abandon_episode();
                    return Err(e);
                }
            };

            self.episodes
                .record_step(result.reward, result.info.average_speed);
            states.push(state);
            actions.push(action);
            rewards.push(reward);
            self.n_steps += 1;
            self.total_steps += 1;

            done = result.done;
            final_state = result.next_state;
            self.env_state = final_state.clone();
            if done {
                let (state, _) = self.env.reset(&ResetOptions::training());
                self.env_state = state;
                break;
            }
        }

        let bootstrap = if done {
            self.n_episodes += 1;
            self.episode_done = true;
            let record = self.episodes.finish_episode();
            self.trace.clear();
            tracing::info!(
                episode = self.n_episodes,
                reward = record.reward,
                steps = record.steps,
                average_speed = record.average_speed,
                "Episode finished"
            );
            vec![0.0; n_agents]
        } else {
            self.episode_done = false;
            self.check_agents(states.len(), &final_state)?;
            let final_action = self.policy_action(&final_state)?;
            self.value(&final_state, &final_action)?
        };

        scale_rewards(&mut rewards, self.config.reward_scale);
        let returns = discount_per_agent(&rewards, &bootstrap, self.config.reward_gamma);

        let steps = states.len();
        self.memory.push(states, actions, returns)?;
        tracing::debug!(steps, n_agents, done, memory = self.memory.len(), "Rollout collected");

        Ok(RolloutSummary {
            steps,
            n_agents,
            episode_done: done,
            bootstrap,
        })
    }

    /// Takes one clipped-PPO step on the actor and one regression step on
    /// the critic for every agent slice of a sampled batch.
    ///
    /// Returns `Ok(None)` without touching parameters while fewer than
    /// `episodes_before_train` episodes have completed or memory is empty.
    pub fn train(&mut self) -> Result<Option<TrainStats>, LearnerError> {
        if self.n_episodes < self.config.episodes_before_train || self.memory.is_empty() {
            return Ok(None);
        }

        let batch = self.memory.sample(self.config.batch_size, &mut self.rng);
        let estimator = self.config.log_prob_estimator;
        let std = self.config.exploration_noise_std;
        let clip = self.config.clip_param;

        let mut actor_total = 0.0;
        let mut critic_total = 0.0;
        let mut agents = 0;

        for agent in 0..batch.max_agents {
            let slice = batch.agent_slice(agent);
            if slice.is_empty() {
                continue;
            }
            let states = self.rows_tensor(&slice.states, self.config.state_dim, "observation")?;
            let actions = self.rows_tensor(&slice.actions, self.config.action_dim, "action")?;
            let returns = Tensor::from_slice(&slice.returns)
                .to_kind(Kind::Float)
                .to_device(self.device);

            let (advantages, old_log_probs) = self.target_terms(&states, &actions, &returns)?;

            // Actor: clipped surrogate
            let log_probs = self.actor.log_prob(&states, &actions, estimator, std)?;
            let ratio = (log_probs - old_log_probs).exp();
            let actor_loss =
                -clipped_surrogate_objective(&ratio, &advantages, clip).mean(Kind::Float);
            optimizer_step(&mut self.actor_opt, &actor_loss, self.config.max_grad_norm);

            // Critic: regression onto discounted returns
            let values = self.critic.forward(&states, &actions)?;
            let critic_loss = match self.config.critic_loss {
                CriticLoss::Mse => values.mse_loss(&returns, Reduction::Mean),
                CriticLoss::Huber => values.smooth_l1_loss(&returns, Reduction::Mean, 1.0),
            };
            optimizer_step(&mut self.critic_opt, &critic_loss, self.config.max_grad_norm);

            actor_total += actor_loss.double_value(&[]);
            critic_total += critic_loss.double_value(&[]);
            agents += 1;
        }

        let targets_synced = self.sync_targets()?;
        if self.config.clear_memory_after_train {
            self.memory.clear();
        }

        let n = agents.max(1) as f64;
        let stats = TrainStats {
            actor_loss: actor_total / n,
            critic_loss: critic_total / n,
            rollouts: batch.rollouts,
            agents,
            targets_synced,
        };
        tracing::debug!(
            actor_loss = stats.actor_loss,
            critic_loss = stats.critic_loss,
            rollouts = stats.rollouts,
            agents,
            targets_synced,
            "Train step"
        );
        Ok(Some(stats))
    }

    /// Soft-updates both targets once per positive multiple of
    /// `target_update_steps` completed episodes.
    fn sync_targets(&mut self) -> Result<bool, LearnerError> {
        let n = self.n_episodes;
        if n == 0
            || n % self.config.target_update_steps != 0
            || self.last_synced_episode == Some(n)
        {
            return Ok(false);
        }
        let tau = self.config.target_tau;
        soft_update(self.actor_target.var_store_mut(), self.actor.var_store(), tau)?;
        soft_update(self.critic_target.var_store_mut(), self.critic.var_store(), tau)?;
        self.last_synced_episode = Some(n);
        tracing::debug!(episode = n, tau, "Target networks updated");
        Ok(true)
    }

    /// Advantages against the critic target and log-probabilities under the
    /// actor target, both detached from the graph.
    fn target_terms(
        &self,
        states: &Tensor,
        actions: &Tensor,
        returns: &Tensor,
    ) -> Result<(Tensor, Tensor), LearnerError> {
        let estimator = self.config.log_prob_estimator;
        let std = self.config.exploration_noise_std;
        tch::no_grad(|| -> Result<(Tensor, Tensor), LearnerError> {
            let baseline = self.critic_target.forward(states, actions)?;
            let old = self.actor_target.log_prob(states, actions, estimator, std)?;
            Ok((returns - baseline, old))
        })
    }

    /// Validates one step's outputs, extends the trace and returns the
    /// per-agent rewards selected by `reward_type`.
    fn agent_rewards(
        &mut self,
        result: &StepResult,
        n_agents: usize,
    ) -> Result<Vec<f64>, LearnerError> {
        ensure_finite(&result.next_state)?;
        self.trace.extend(&result.info)?;

        match self.config.reward_type {
            RewardType::Global => Ok(vec![result.reward; n_agents]),
            RewardType::Regional => match result.info.regional_rewards {
                Some(ref r) if r.len() == n_agents => Ok(r.clone()),
                ref other => Err(LearnerError::MissingRegionalRewards {
                    expected: n_agents,
                    actual: other.as_ref().map_or(0, Vec::len),
                }),
            },
        }
    }

    /// Drops the episode in progress and resets the environment.
    fn abandon_episode(&mut self) {
        let (state, _) = self.env.reset(&ResetOptions::training());
        self.env_state = state;
        self.n_steps = 0;
        self.episodes.discard_current();
        self.trace.clear();
    }

    fn rows_tensor(
        &self,
        rows: &[Vec<f64>],
        width: usize,
        what: &'static str,
    ) -> Result<Tensor, LearnerError> {
        tensor_from_rows(rows, width, what, self.device)
    }

    fn check_agents(&self, step: usize, state: &Observation) -> Result<(), LearnerError> {
        if state.len() != self.n_agents {
            return Err(LearnerError::AgentCountMismatch {
                step,
                expected: self.n_agents,
                actual: state.len(),
            });
        }
        ensure_finite(state)
    }

    /// Deterministic actor output for every agent, in one forward pass.
    pub fn policy_action(&self, state: &Observation) -> Result<JointAction, LearnerError> {
        ensure_finite(state)?;
        let states = self.rows_tensor(state, self.config.state_dim, "observation")?;
        let actions = tch::no_grad(|| self.actor.forward(&states))?;
        rows_from_tensor(&actions)
    }

    /// Actor output plus N(0, `exploration_noise_std`) per component.
    pub fn exploration_action(&mut self, state: &Observation) -> Result<JointAction, LearnerError> {
        let mut actions = self.policy_action(state)?;
        self.add_noise(&mut actions, self.config.exploration_noise_std)?;
        Ok(actions)
    }

    /// Actor output plus N(0, `evaluation_noise_std`) per component.
    pub fn action(&mut self, state: &Observation) -> Result<JointAction, LearnerError> {
        let mut actions = self.policy_action(state)?;
        self.add_noise(&mut actions, self.config.evaluation_noise_std)?;
        Ok(actions)
    }

    fn add_noise(&mut self, actions: &mut JointAction, std: f64) -> Result<(), LearnerError> {
        if std == 0.0 {
            return Ok(());
        }
        let normal = Normal::new(0.0, std).map_err(|_| ConfigError::InvalidValue {
            name: "noise std",
            value: std,
        })?;
        for component in actions.iter_mut().flatten() {
            *component += normal.sample(&mut self.rng);
        }
        Ok(())
    }

    /// Critic-target value of each agent's (state, action) pair.
    pub fn value(
        &self,
        state: &Observation,
        action: &JointAction,
    ) -> Result<Vec<f64>, LearnerError> {
        let states = self.rows_tensor(state, self.config.state_dim, "observation")?;
        let actions = self.rows_tensor(action, self.config.action_dim, "action")?;
        let values = tch::no_grad(|| self.critic_target.forward(&states, &actions))?;
        Ok(Vec::<f64>::try_from(values.to_kind(Kind::Double).to_device(Device::Cpu))?)
    }

    /// Saves the live actor as `checkpoint-<step>.pt` plus its metadata.
    pub fn save(&self, dir: &Path, step: u64) -> Result<PathBuf, LearnerError> {
        fs::create_dir_all(dir)?;
        let path = checkpoint::weights_path(dir, step);
        tracing::info!(path = %path.display(), "Saving checkpoint");
        self.actor.var_store().save(&path)?;

        let meta = CheckpointMeta {
            global_step: step,
            episodes: self.n_episodes,
            optimizer: OptimizerState {
                kind: self.config.optimizer,
                learning_rate: self.config.actor_lr,
            },
        };
        checkpoint::write_metadata(dir, &meta)?;
        tracing::info!(step, episodes = self.n_episodes, "Checkpoint saved");
        Ok(path)
    }

    /// Restores the live actor from `dir` and re-syncs the actor target.
    ///
    /// A missing checkpoint is logged and reported as `Ok(false)`. In train
    /// mode the persisted learning rate and episode count are restored as well.
    pub fn load(
        &mut self,
        dir: &Path,
        selector: CheckpointSelector,
        train_mode: bool,
    ) -> Result<bool, LearnerError> {
        let Some((step, path)) = checkpoint::resolve(dir, selector)? else {
            tracing::error!(dir = %dir.display(), ?selector, "No checkpoint found");
            return Ok(false);
        };

        self.actor.var_store_mut().load(&path)?;
        self.actor_target
            .var_store_mut()
            .copy(self.actor.var_store())?;
        tracing::info!(path = %path.display(), step, "Checkpoint loaded");

        if train_mode {
            match checkpoint::read_metadata(dir, step)? {
                Some(meta) => {
                    if meta.optimizer.kind != self.config.optimizer {
                        tracing::warn!(
                            saved = ?meta.optimizer.kind,
                            configured = ?self.config.optimizer,
                            "Checkpoint optimizer differs from configuration"
                        );
                    }
                    self.actor_opt.set_lr(meta.optimizer.learning_rate);
                    self.n_episodes = meta.episodes;
                }
                None => tracing::warn!(step, "Checkpoint has no metadata, optimizer settings kept"),
            }
        }
        Ok(true)
    }

    pub fn config(&self) -> &MappoConfig {
        &self.config
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Completed training episodes.
    pub fn n_episodes(&self) -> u64 {
        self.n_episodes
    }

    /// Environment steps taken since creation.
    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    /// Agent count of the most recent rollout.
    pub fn n_agents(&self) -> usize {
        self.n_agents
    }

    /// The last rollout ended an episode.
    pub fn episode_done(&self) -> bool {
        self.episode_done
    }

    pub fn episodes(&self) -> &EpisodeLog {
        &self.episodes
    }

    pub fn trace(&self) -> &TrajectoryTrace {
        &self.trace
    }

    pub fn memory(&self) -> &OnPolicyMemory {
        &self.memory
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn actor(&self) -> &ActorNetwork {
        &self.actor
    }

    pub fn critic(&self) -> &CriticNetwork {
        &self.critic
    }

    pub fn actor_target(&self) -> &ActorNetwork {
        &self.actor_target
    }

    pub fn critic_target(&self) -> &CriticNetwork {
        &self.critic_target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputActivation;
    use crate::environment::ScriptedEnvironment;
    use crate::episode::EpisodeRecord;
    use crate::training::returns::clipped_surrogate;
    use tempfile::tempdir;

    fn config() -> MappoConfig {
        MappoConfig {
            state_dim: 4,
            action_dim: 2,
            actor_hidden_size: 8,
            critic_hidden_size: 8,
            roll_out_n_steps: 3,
            batch_size: 4,
            episodes_before_train: 0,
            seed: Some(11),
            ..MappoConfig::default()
        }
    }

    fn learner(env: ScriptedEnvironment, cfg: MappoConfig) -> MappoLearner<ScriptedEnvironment> {
        MappoLearner::new(env, cfg, Device::Cpu).unwrap()
    }

    fn max_param_diff(a: &nn::VarStore, b: &nn::VarStore) -> f64 {
        let b = b.variables();
        a.variables()
            .iter()
            .map(|(name, v)| (v - &b[name]).abs().max().double_value(&[]))
            .fold(0.0, f64::max)
    }

    #[test]
    fn invalid_config_is_rejected_before_any_rollout() {
        let env = ScriptedEnvironment::new(1, 4, 5);
        let cfg = MappoConfig {
            clip_param: 0.0,
            ..config()
        };
        let result = MappoLearner::new(env, cfg, Device::Cpu);
        assert!(matches!(result, Err(LearnerError::Config(_))));
    }

    #[test]
    fn interact_pushes_one_rollout() {
        let mut l = learner(ScriptedEnvironment::new(2, 4, 10), config());
        let summary = l.interact().unwrap();
        assert_eq!(summary.steps, 3);
        assert_eq!(summary.n_agents, 2);
        assert!(!summary.episode_done);
        assert_eq!(l.memory().len(), 1);
        assert_eq!(l.total_steps(), 3);
        assert_eq!(l.n_episodes(), 0);
    }

    #[test]
    fn non_terminal_rollout_bootstraps_from_target_critic() {
        let mut l = learner(ScriptedEnvironment::new(2, 4, 10), config());
        let summary = l.interact().unwrap();
        assert_eq!(summary.bootstrap.len(), 2);
        assert!(summary.bootstrap.iter().all(|v| v.is_finite()));
        assert_eq!(l.trace().agents.len(), 6);
    }

    #[test]
    fn bootstrap_and_baseline_come_from_target_critic() {
        let cfg = MappoConfig {
            target_update_steps: 1000,
            reward_gamma: 0.9,
            ..config()
        };
        let mut l = learner(ScriptedEnvironment::new(2, 4, 100), cfg);
        l.interact().unwrap();
        l.train().unwrap().unwrap();
        assert!(max_param_diff(l.critic().var_store(), l.critic_target().var_store()) > 0.0);

        let summary = l.interact().unwrap();
        assert!(!summary.episode_done);

        let final_state = l.env_state.clone();
        let final_action = l.policy_action(&final_state).unwrap();
        let states = tensor_from_rows(&final_state, 4, "observation", Device::Cpu).unwrap();
        let actions = tensor_from_rows(&final_action, 2, "action", Device::Cpu).unwrap();
        let values = |critic: &CriticNetwork| -> Vec<f64> {
            let out = tch::no_grad(|| critic.forward(&states, &actions)).unwrap();
            Vec::<f64>::try_from(out.to_kind(Kind::Double)).unwrap()
        };
        let target = values(l.critic_target());
        let live = values(l.critic());

        for (b, t) in summary.bootstrap.iter().zip(&target) {
            assert!((b - t).abs() < 1e-6);
        }
        assert!(summary
            .bootstrap
            .iter()
            .zip(&live)
            .any(|(b, v)| (b - v).abs() > 1e-6));

        // R_last = r / reward_scale + gamma * bootstrap, per agent
        let rollout = l.memory().rollouts().next().unwrap();
        let last = rollout.returns().last().unwrap();
        for (r, b) in last.iter().zip(&summary.bootstrap) {
            assert!((r - (1.0 / 20.0 + 0.9 * b)).abs() < 1e-12);
        }
        assert!(summary.bootstrap.iter().any(|b| b.abs() > 0.0));

        // advantages are measured against the target critic
        let returns = Tensor::from_slice(&[0.5f32, -0.5]);
        let (advantages, _) = l.target_terms(&states, &actions, &returns).unwrap();
        let advantages = Vec::<f64>::try_from(advantages.to_kind(Kind::Double)).unwrap();
        for ((a, t), r) in advantages.iter().zip(&target).zip([0.5, -0.5]) {
            assert!((a - (r - t)).abs() < 1e-6);
        }
        assert!(advantages
            .iter()
            .zip(&live)
            .zip([0.5, -0.5])
            .any(|((a, v), r)| (a - (r - v)).abs() > 1e-6));
    }

    #[test]
    fn batched_surrogate_matches_scalar_form() {
        let clip = 0.2;
        let ratios: Vec<f64> = (0..=20).map(|i| i as f64 / 10.0).collect();
        let ratio_t = Tensor::from_slice(&ratios).to_kind(Kind::Float);
        for advantage in [1.0, -1.0, 2.5] {
            let adv_t = Tensor::from_slice(&vec![advantage; ratios.len()]).to_kind(Kind::Float);
            let batched = clipped_surrogate_objective(&ratio_t, &adv_t, clip);
            let batched = Vec::<f64>::try_from(batched.to_kind(Kind::Double)).unwrap();
            for (&ratio, &value) in ratios.iter().zip(&batched) {
                let expected = clipped_surrogate(ratio, advantage, clip);
                assert!(
                    (value - expected).abs() < 1e-5,
                    "ratio {ratio}, advantage {advantage}: {value} vs {expected}"
                );
                assert!(value.abs() <= advantage.abs() * ratio.max(1.0 + clip) + 1e-5);
            }
        }

        let ones = Tensor::from_slice(&vec![1.0f32; ratios.len()]);
        let gains = clipped_surrogate_objective(&ratio_t, &ones, clip);
        let gains = Vec::<f64>::try_from(gains.to_kind(Kind::Double)).unwrap();
        for (&ratio, &gain) in ratios.iter().zip(&gains) {
            let expected = if ratio > 1.2 { 1.2 } else { ratio };
            assert!((gain - expected).abs() < 1e-5);
        }
        let losses = clipped_surrogate_objective(&ratio_t, &(-&ones), clip);
        let losses = Vec::<f64>::try_from(losses.to_kind(Kind::Double)).unwrap();
        for (&ratio, &loss) in ratios.iter().zip(&losses) {
            let expected = if ratio < 0.8 { -0.8 } else { -ratio };
            assert!((loss - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn terminal_rollout_finishes_episode_and_resets() {
        let mut l = learner(ScriptedEnvironment::new(1, 4, 2), config());
        let summary = l.interact().unwrap();
        assert_eq!(summary.steps, 2);
        assert!(summary.episode_done);
        assert_eq!(summary.bootstrap, vec![0.0]);
        assert_eq!(l.n_episodes(), 1);
        assert!(l.episode_done());
        // construction reset + terminal reset
        assert_eq!(l.env().reset_count(), 2);
        let record = l.episodes().last_finished().unwrap();
        assert_eq!(record.steps, 2);
        assert_eq!(record.reward, 2.0);
        assert!((record.average_speed - 25.0).abs() < 1e-12);
        assert!(l.trace().is_empty());
    }

    #[test]
    fn discounted_returns_scenario() {
        let env = ScriptedEnvironment::new(1, 4, 3);
        let cfg = MappoConfig {
            reward_scale: 0.0,
            reward_gamma: 0.5,
            ..config()
        };
        let mut l = learner(env, cfg);
        l.interact().unwrap();
        let rollout = l.memory().rollouts().next().unwrap();
        assert_eq!(rollout.returns(), &[vec![1.75], vec![1.5], vec![1.0]]);
    }

    #[test]
    fn global_reward_is_scaled_and_broadcast() {
        let env = ScriptedEnvironment::new(3, 4, 2).with_rewards(vec![20.0]);
        let cfg = MappoConfig {
            reward_scale: 20.0,
            reward_gamma: 0.0,
            ..config()
        };
        let mut l = learner(env, cfg);
        l.interact().unwrap();
        let rollout = l.memory().rollouts().next().unwrap();
        assert_eq!(rollout.returns(), &[vec![1.0; 3], vec![1.0; 3]]);
    }

    #[test]
    fn regional_rewards_are_used_per_agent() {
        let env = ScriptedEnvironment::new(2, 4, 1).with_regional_rewards(vec![1.0, 3.0]);
        let cfg = MappoConfig {
            reward_type: RewardType::Regional,
            reward_scale: 0.0,
            ..config()
        };
        let mut l = learner(env, cfg);
        l.interact().unwrap();
        let rollout = l.memory().rollouts().next().unwrap();
        assert_eq!(rollout.returns(), &[vec![1.0, 3.0]]);
    }

    #[test]
    fn regional_mode_requires_regional_rewards() {
        let cfg = MappoConfig {
            reward_type: RewardType::Regional,
            ..config()
        };
        let mut l = learner(ScriptedEnvironment::new(2, 4, 5), cfg);
        assert!(matches!(
            l.interact(),
            Err(LearnerError::MissingRegionalRewards {
                expected: 2,
                actual: 0
            })
        ));
        assert!(l.memory().is_empty());
        assert_eq!(l.env().reset_count(), 2);
    }

    #[test]
    fn nan_observation_aborts_rollout_and_resets() {
        let env = ScriptedEnvironment::new(1, 4, 10).with_nan_at(2);
        let mut l = learner(env, config());
        assert!(matches!(l.interact(), Err(LearnerError::NonFinite(_))));
        assert!(l.memory().is_empty());

        // the half-played episode is dropped and the learner is back in sync
        assert_eq!(l.env().reset_count(), 2);
        assert_eq!(l.episodes().current(), EpisodeRecord::default());
        assert!(l.trace().is_empty());
        assert_eq!(l.env_state.len(), 1);
        assert!(l.env_state.iter().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn step_budget_forces_reset() {
        let cfg = MappoConfig {
            max_steps: Some(3),
            ..config()
        };
        let mut l = learner(ScriptedEnvironment::new(1, 4, 100), cfg);
        l.interact().unwrap();
        assert_eq!(l.env().reset_count(), 1);
        assert_eq!(l.episodes().current().steps, 3);
        assert_eq!(l.trace().agents.len(), 3);

        l.interact().unwrap();
        assert_eq!(l.env().reset_count(), 2);
        // the truncated episode does not leak into the new one
        assert_eq!(l.episodes().current().steps, 3);
        assert_eq!(l.episodes().current().reward, 3.0);
        assert_eq!(l.trace().agents.len(), 3);
        assert_eq!(l.episodes().total_finished(), 0);
    }

    #[test]
    fn actions_match_agents_and_bounds() {
        let cfg = MappoConfig {
            evaluation_noise_std: 0.0,
            actor_output_act: OutputActivation::Sigmoid,
            ..config()
        };
        let mut l = learner(ScriptedEnvironment::new(3, 4, 10), cfg);
        let state = vec![vec![0.5; 4]; 3];
        let action = l.action(&state).unwrap();
        assert_eq!(action.len(), 3);
        assert!(action.iter().all(|a| a.len() == 2));
        assert!(action.iter().flatten().all(|&v| (0.0..=1.0).contains(&v)));
        assert_eq!(action, l.policy_action(&state).unwrap());
        assert!(l.exploration_action(&state).unwrap() != action);
    }

    #[test]
    fn policy_action_rejects_wrong_width() {
        let l = learner(ScriptedEnvironment::new(1, 4, 10), config());
        assert!(matches!(
            l.policy_action(&vec![vec![0.0; 3]]),
            Err(LearnerError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn train_is_skipped_during_warm_up() {
        let cfg = MappoConfig {
            episodes_before_train: 5,
            ..config()
        };
        let mut l = learner(ScriptedEnvironment::new(1, 4, 10), cfg);
        l.interact().unwrap();
        assert_eq!(l.train().unwrap(), None);
        assert_eq!(l.memory().len(), 1);
    }

    #[test]
    fn train_updates_live_networks_and_clears_memory() {
        let cfg = MappoConfig {
            target_update_steps: 1000,
            ..config()
        };
        let mut l = learner(ScriptedEnvironment::new(2, 4, 10), cfg);
        l.interact().unwrap();
        l.interact().unwrap();

        let stats = l.train().unwrap().unwrap();
        assert_eq!(stats.rollouts, 2);
        assert_eq!(stats.agents, 2);
        assert!(stats.actor_loss.is_finite() && stats.critic_loss.is_finite());
        assert!(!stats.targets_synced);
        assert!(l.memory().is_empty());

        assert!(max_param_diff(l.critic().var_store(), l.critic_target().var_store()) > 0.0);
        assert!(max_param_diff(l.actor().var_store(), l.actor_target().var_store()) > 0.0);
    }

    #[test]
    fn targets_sync_once_per_qualifying_episode() {
        let cfg = MappoConfig {
            target_update_steps: 2,
            clear_memory_after_train: false,
            ..config()
        };
        // horizon 2 < rollout length 3: every interact finishes an episode
        let mut l = learner(ScriptedEnvironment::new(1, 4, 2), cfg);

        l.interact().unwrap();
        assert!(!l.train().unwrap().unwrap().targets_synced);

        l.interact().unwrap();
        assert_eq!(l.n_episodes(), 2);
        assert!(l.train().unwrap().unwrap().targets_synced);
        // tau = 1 replaces the targets
        assert!(max_param_diff(l.actor().var_store(), l.actor_target().var_store()) < 1e-7);
        assert!(max_param_diff(l.critic().var_store(), l.critic_target().var_store()) < 1e-7);

        assert!(!l.train().unwrap().unwrap().targets_synced);
    }

    #[test]
    fn train_handles_varying_agent_counts() {
        let env = ScriptedEnvironment::new(1, 4, 2).with_agent_schedule(vec![3, 1]);
        let cfg = MappoConfig {
            clear_memory_after_train: false,
            ..config()
        };
        let mut l = learner(env, cfg);
        // construction reset spawned 3 agents, the terminal reset 1
        assert_eq!(l.interact().unwrap().n_agents, 3);
        assert_eq!(l.interact().unwrap().n_agents, 1);
        let stats = l.train().unwrap().unwrap();
        assert_eq!(stats.rollouts, 2);
        assert_eq!(stats.agents, 3);
    }

    #[test]
    fn huber_loss_and_adam_train() {
        let cfg = MappoConfig {
            critic_loss: CriticLoss::Huber,
            optimizer: OptimizerKind::Adam,
            max_grad_norm: None,
            ..config()
        };
        let mut l = learner(ScriptedEnvironment::new(2, 4, 10), cfg);
        l.interact().unwrap();
        assert!(l.train().unwrap().unwrap().critic_loss.is_finite());
    }

    #[test]
    fn save_and_load_restore_actor() {
        let dir = tempdir().unwrap();
        let mut l = learner(ScriptedEnvironment::new(1, 4, 10), config());
        let saved = l.save(dir.path(), 7).unwrap();
        assert!(saved.ends_with("checkpoint-7.pt"));
        assert!(checkpoint::metadata_path(dir.path(), 7).is_file());

        let state = vec![vec![0.3; 4]];
        let before = l.policy_action(&state).unwrap();

        let unseeded = MappoConfig {
            seed: None,
            ..config()
        };
        let mut other = learner(ScriptedEnvironment::new(1, 4, 10), unseeded);
        other.interact().unwrap();
        assert!(other
            .load(dir.path(), CheckpointSelector::Latest, false)
            .unwrap());
        assert_eq!(other.policy_action(&state).unwrap(), before);
        assert!(max_param_diff(other.actor().var_store(), other.actor_target().var_store()) < 1e-7);

        l.interact().unwrap();
        assert!(l.load(dir.path(), CheckpointSelector::Step(7), true).unwrap());
        assert_eq!(l.n_episodes(), 0);
    }

    #[test]
    fn missing_checkpoint_is_not_an_error() {
        let dir = tempdir().unwrap();
        let mut l = learner(ScriptedEnvironment::new(1, 4, 10), config());
        assert!(!l.load(dir.path(), CheckpointSelector::Latest, true).unwrap());
        assert!(!l.load(dir.path(), CheckpointSelector::Step(3), false).unwrap());
    }
}
