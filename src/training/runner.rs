//! Outer training and evaluation drivers.

use std::path::Path;

use super::mappo::MappoLearner;
use crate::checkpoint::{self, CheckpointSelector};
use crate::config::RunConfig;
use crate::environment::Environment;
use crate::error::LearnerError;
use crate::metrics::EvaluationStats;

/// Alternates rollouts and updates until `max_episodes` episodes completed.
///
/// Every `eval_interval` episodes the policy is evaluated on `eval_env` and
/// checkpointed as `checkpoint-<episode>`; a final checkpoint is written at
/// step `max_episodes + 2`.
///
/// # Returns
///
/// The learning curve as `(episode, mean evaluation reward)` pairs.
pub fn run_training<E: Environment, V: Environment>(
    learner: &mut MappoLearner<E>,
    eval_env: &mut V,
    run: &RunConfig,
    model_dir: &Path,
) -> Result<Vec<(u64, f64)>, LearnerError> {
    run.validate()?;

    if run.resume && checkpoint::latest_step(model_dir)?.is_some() {
        learner.load(model_dir, CheckpointSelector::Latest, true)?;
    }

    let mut curve = Vec::new();
    while learner.n_episodes() < run.max_episodes {
        learner.interact()?;
        if learner.n_episodes() >= learner.config().episodes_before_train {
            learner.train()?;
        }

        let next_episode = learner.n_episodes() + 1;
        if learner.episode_done() && next_episode % run.eval_interval == 0 {
            let stats = learner.evaluate(eval_env, run.eval_episodes, true, None)?;
            let (reward_mean, reward_std) = stats.reward_mean_std();
            tracing::info!(
                episode = next_episode,
                reward_mean,
                reward_std,
                "Training progress"
            );
            curve.push((next_episode, reward_mean));
            learner.save(model_dir, next_episode)?;
        }
    }

    learner.save(model_dir, run.max_episodes + 2)?;
    Ok(curve)
}

/// Loads a checkpoint in inference mode and evaluates it once per test seed
/// (or once when no seeds are configured).
///
/// Returns `Ok(None)` when the checkpoint does not exist.
pub fn run_evaluation<E: Environment, V: Environment>(
    learner: &mut MappoLearner<E>,
    env: &mut V,
    model_dir: &Path,
    selector: CheckpointSelector,
) -> Result<Option<EvaluationStats>, LearnerError> {
    if !learner.load(model_dir, selector, false)? {
        return Ok(None);
    }
    let episodes = learner.config().test_seeds.len().max(1);
    let stats = learner.evaluate(env, episodes, false, None)?;
    Ok(Some(stats))
}
