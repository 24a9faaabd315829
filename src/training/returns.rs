//! Discounted returns and the clipped surrogate objective.
//!
//! Returns are computed backward over a rollout from a bootstrap value:
//! `R_t = r_t + γ R_{t+1}` with `R_T` equal to the bootstrap.

/// Computes discounted returns for one agent.
///
/// # Arguments
///
/// * `rewards` - Per-step rewards, already scaled
/// * `bootstrap` - Value of the state after the last step (0 when terminal)
/// * `gamma` - Discount factor
pub fn discount_rewards(rewards: &[f64], bootstrap: f64, gamma: f64) -> Vec<f64> {
    let mut returns = vec![0.0; rewards.len()];
    let mut running = bootstrap;
    for t in (0..rewards.len()).rev() {
        running = rewards[t] + gamma * running;
        returns[t] = running;
    }
    returns
}

/// Discounts a `[step][agent]` reward matrix column by column.
///
/// `bootstrap[i]` seeds agent `i`. Every row must have `bootstrap.len()`
/// entries.
pub fn discount_per_agent(rewards: &[Vec<f64>], bootstrap: &[f64], gamma: f64) -> Vec<Vec<f64>> {
    let n_agents = bootstrap.len();
    let mut returns = vec![vec![0.0; n_agents]; rewards.len()];
    for (agent, &value) in bootstrap.iter().enumerate() {
        let column: Vec<f64> = rewards.iter().map(|row| row[agent]).collect();
        for (t, r) in discount_rewards(&column, value, gamma).into_iter().enumerate() {
            returns[t][agent] = r;
        }
    }
    returns
}

/// Divides every reward by `scale`; a non-positive scale leaves them untouched.
pub fn scale_rewards(rewards: &mut [Vec<f64>], scale: f64) {
    if scale <= 0.0 {
        return;
    }
    for value in rewards.iter_mut().flatten() {
        *value /= scale;
    }
}

/// PPO clipped surrogate for one sample: `min(ρA, clip(ρ, 1-ε, 1+ε)A)`.
///
/// Scalar form of the learner's batched objective.
pub fn clipped_surrogate(ratio: f64, advantage: f64, clip: f64) -> f64 {
    let unclipped = ratio * advantage;
    let clipped = ratio.clamp(1.0 - clip, 1.0 + clip) * advantage;
    unclipped.min(clipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discount_without_bootstrap() {
        let returns = discount_rewards(&[1.0, 1.0, 1.0], 0.0, 0.5);
        assert_eq!(returns, vec![1.75, 1.5, 1.0]);
    }

    #[test]
    fn discount_with_bootstrap() {
        // R_1 = 1 + 0.9 * 10 = 10, R_0 = 0 + 0.9 * 10 = 9
        let returns = discount_rewards(&[0.0, 1.0], 10.0, 0.9);
        assert!((returns[1] - 10.0).abs() < 1e-12);
        assert!((returns[0] - 9.0).abs() < 1e-12);
    }

    #[test]
    fn gamma_zero_returns_rewards() {
        let rewards = [3.0, -1.0, 2.0];
        assert_eq!(discount_rewards(&rewards, 100.0, 0.0), rewards.to_vec());
    }

    #[test]
    fn empty_rollout_has_no_returns() {
        assert!(discount_rewards(&[], 5.0, 0.99).is_empty());
    }

    #[test]
    fn per_agent_columns_are_independent() {
        let rewards = vec![vec![1.0, 0.0], vec![1.0, 2.0]];
        let returns = discount_per_agent(&rewards, &[0.0, 4.0], 0.5);
        // agent 0: [1.5, 1.0]; agent 1: R_1 = 2 + 2 = 4, R_0 = 0 + 2 = 2
        assert_eq!(returns, vec![vec![1.5, 2.0], vec![1.0, 4.0]]);
    }

    #[test]
    fn scaling_divides_rewards() {
        let mut rewards = vec![vec![20.0, 40.0], vec![-20.0, 0.0]];
        scale_rewards(&mut rewards, 20.0);
        assert_eq!(rewards, vec![vec![1.0, 2.0], vec![-1.0, 0.0]]);

        let mut untouched = vec![vec![20.0]];
        scale_rewards(&mut untouched, 0.0);
        assert_eq!(untouched, vec![vec![20.0]]);
    }

    #[test]
    fn scaled_constant_rewards_with_gamma_zero() {
        let mut rewards = vec![vec![20.0], vec![20.0]];
        scale_rewards(&mut rewards, 20.0);
        assert_eq!(discount_per_agent(&rewards, &[0.0], 0.0), vec![vec![1.0], vec![1.0]]);
    }

    #[test]
    fn surrogate_clips_ratio() {
        let eps = 0.2;
        // Positive advantage caps the gain at (1+ε)A.
        assert!((clipped_surrogate(1.5, 1.0, eps) - 1.2).abs() < 1e-12);
        assert!((clipped_surrogate(0.5, 1.0, eps) - 0.5).abs() < 1e-12);
        // Negative advantage keeps the pessimistic branch.
        assert!((clipped_surrogate(0.5, -1.0, eps) + 0.8).abs() < 1e-12);
        assert!((clipped_surrogate(1.5, -1.0, eps) + 1.5).abs() < 1e-12);
        for ratio in [0.0, 0.8, 1.0, 1.2, 3.0] {
            assert!(clipped_surrogate(ratio, 2.0, eps) <= 2.0 * 1.2 + 1e-12);
        }
    }

    #[test]
    fn surrogate_sweep_is_bounded_and_clips_outside_band() {
        let eps = 0.2;
        for i in 0..=20 {
            let ratio = i as f64 / 10.0;
            for advantage in [1.0, -1.0, 3.0] {
                let value = clipped_surrogate(ratio, advantage, eps);
                assert!(value.abs() <= advantage.abs() * ratio.max(1.0 + eps) + 1e-12);
            }

            // A = 1: gains above 1 + ε are cut off
            let gain = clipped_surrogate(ratio, 1.0, eps);
            let expected = if ratio > 1.2 + 1e-9 { 1.2 } else { ratio };
            assert!((gain - expected).abs() < 1e-12, "ratio {ratio}: {gain}");

            // A = -1: ratios below 1 - ε are held at the clip edge
            let loss = clipped_surrogate(ratio, -1.0, eps);
            let expected = if ratio < 0.8 - 1e-9 { -0.8 } else { -ratio };
            assert!((loss - expected).abs() < 1e-12, "ratio {ratio}: {loss}");
        }
    }
}
