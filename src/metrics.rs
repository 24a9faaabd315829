//! Evaluation statistics.
//!
//! Collects per-episode reward traces, step counts and speeds produced by
//! an evaluation run and aggregates them for reporting.

use std::fmt;

use crate::types::VehicleState;

/// Results of an evaluation run, one entry per episode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationStats {
    /// Per-step global rewards of each episode.
    pub episode_rewards: Vec<Vec<f64>>,
    /// Steps taken in each episode.
    pub steps: Vec<u64>,
    /// Mean vehicle speed of each episode.
    pub average_speeds: Vec<f64>,
    /// Vehicle states reported by the last step of each episode.
    pub final_vehicles: Vec<Vec<VehicleState>>,
}

impl EvaluationStats {
    /// Number of evaluated episodes.
    pub fn n_episodes(&self) -> usize {
        self.episode_rewards.len()
    }

    /// Total reward of each episode.
    pub fn episode_returns(&self) -> Vec<f64> {
        self.episode_rewards
            .iter()
            .map(|r| r.iter().sum())
            .collect()
    }

    /// Mean and population standard deviation of the episode returns.
    pub fn reward_mean_std(&self) -> (f64, f64) {
        mean_std(&self.episode_returns())
    }

    /// Mean episode length.
    pub fn mean_steps(&self) -> f64 {
        let steps: Vec<f64> = self.steps.iter().map(|&s| s as f64).collect();
        mean_std(&steps).0
    }

    /// Mean of the per-episode average speeds.
    pub fn mean_speed(&self) -> f64 {
        mean_std(&self.average_speeds).0
    }
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

impl fmt::Display for EvaluationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (mean, std) = self.reward_mean_std();
        writeln!(
            f,
            "=== Evaluation ({} episodes) ===",
            self.n_episodes()
        )?;
        writeln!(f, "  Reward:         {:.2} ± {:.2}", mean, std)?;
        writeln!(f, "  Mean steps:     {:.1}", self.mean_steps())?;
        writeln!(f, "  Mean speed:     {:.2}", self.mean_speed())
    }
}
