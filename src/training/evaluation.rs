//! Evaluation episodes on a separate environment.

use super::mappo::MappoLearner;
use crate::environment::{Environment, FrameSink, ResetOptions};
use crate::error::LearnerError;
use crate::metrics::EvaluationStats;

impl<E: Environment> MappoLearner<E> {
    /// Runs `episodes` full episodes on `env` with [`MappoLearner::action`]
    /// and no learning.
    ///
    /// Episode `i` resets with seed `test_seeds[i % len]` (if any). When
    /// `during_training` is set, the agent count grows with the episode
    /// index according to the configured traffic density. Each episode is
    /// capped at `eval_step_limit` steps. Rendered frames, if the
    /// environment produces any, go to `sink`.
    pub fn evaluate<V: Environment>(
        &mut self,
        env: &mut V,
        episodes: usize,
        during_training: bool,
        mut sink: Option<&mut dyn FrameSink>,
    ) -> Result<EvaluationStats, LearnerError> {
        let seeds = self.config().test_seeds.clone();
        let density = self.config().traffic_density;
        let step_limit = self.config().eval_step_limit;
        let mut stats = EvaluationStats::default();

        for episode in 0..episodes {
            let seed = (!seeds.is_empty()).then(|| seeds[episode % seeds.len()]);
            let num_agents = during_training.then(|| density.agents_for_episode(episode));
            let (mut state, _) = env.reset(&ResetOptions::evaluation(seed, num_agents));

            if let Some(sink) = sink.as_deref_mut() {
                if let Some(frame) = env.render_frame() {
                    sink.record(episode, &frame);
                }
            }

            let mut rewards = Vec::new();
            let mut speed_sum = 0.0;
            let mut steps = 0u64;
            let mut vehicles = Vec::new();
            let mut done = false;

            while !done {
                if steps >= step_limit {
                    tracing::warn!(episode, step_limit, "Evaluation episode hit the step limit");
                    break;
                }
                let action = self.action(&state)?;
                let result = env.step(&action);
                if result.info.agents_info.iter().any(|v| v.has_nan()) {
                    return Err(LearnerError::NonFinite("vehicle position"));
                }

                steps += 1;
                speed_sum += result.info.average_speed;
                rewards.push(result.reward);
                vehicles = result.info.agents_info;
                done = result.done;
                state = result.next_state;

                if let Some(sink) = sink.as_deref_mut() {
                    if let Some(frame) = env.render_frame() {
                        sink.record(episode, &frame);
                    }
                }
            }

            let average_speed = if steps > 0 {
                speed_sum / steps as f64
            } else {
                0.0
            };
            tracing::debug!(
                episode,
                seed,
                steps,
                reward = rewards.iter().sum::<f64>(),
                average_speed,
                "Evaluation episode finished"
            );
            stats.episode_rewards.push(rewards);
            stats.steps.push(steps);
            stats.average_speeds.push(average_speed);
            stats.final_vehicles.push(vehicles);
        }

        let (reward_mean, reward_std) = stats.reward_mean_std();
        tracing::info!(
            episodes,
            training_episodes = self.n_episodes(),
            reward_mean,
            reward_std,
            "Evaluation finished"
        );
        Ok(stats)
    }
}
