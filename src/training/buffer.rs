//! On-policy rollout memory.

use std::collections::VecDeque;

use rand::Rng;

use crate::error::LearnerError;
use crate::types::{JointAction, Observation};

/// One rollout: per-step states, actions and discounted returns.
///
/// All steps carry the same number of agents, recorded in
/// [`Rollout::n_agents`]. Returns are already discounted when stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Rollout {
    states: Vec<Observation>,
    actions: Vec<JointAction>,
    returns: Vec<Vec<f64>>,
    n_agents: usize,
}

impl Rollout {
    /// Validates and builds a rollout.
    ///
    /// Every step must have `n_agents` entries (taken from the first step),
    /// observations of width `state_dim` and actions of width `action_dim`.
    pub fn new(
        states: Vec<Observation>,
        actions: Vec<JointAction>,
        returns: Vec<Vec<f64>>,
        state_dim: usize,
        action_dim: usize,
    ) -> Result<Self, LearnerError> {
        let first = states.first().ok_or(LearnerError::EmptyRollout)?;
        let n_agents = first.len();

        check_len("rollout actions", states.len(), actions.len())?;
        check_len("rollout returns", states.len(), returns.len())?;

        for (step, ((s, a), r)) in states.iter().zip(&actions).zip(&returns).enumerate() {
            for count in [s.len(), a.len(), r.len()] {
                if count != n_agents {
                    return Err(LearnerError::AgentCountMismatch {
                        step,
                        expected: n_agents,
                        actual: count,
                    });
                }
            }
            for obs in s {
                check_len("observation", state_dim, obs.len())?;
            }
            for action in a {
                check_len("action", action_dim, action.len())?;
            }
        }

        Ok(Self {
            states,
            actions,
            returns,
            n_agents,
        })
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn n_agents(&self) -> usize {
        self.n_agents
    }

    pub fn states(&self) -> &[Observation] {
        &self.states
    }

    pub fn actions(&self) -> &[JointAction] {
        &self.actions
    }

    /// Discounted returns, `[step][agent]`.
    pub fn returns(&self) -> &[Vec<f64>] {
        &self.returns
    }
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<(), LearnerError> {
    if expected == actual {
        Ok(())
    } else {
        Err(LearnerError::ShapeMismatch {
            what,
            expected,
            actual,
        })
    }
}

/// Rows drawn from sampled rollouts, flattened to `(time × agents, feature)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub states: Vec<Vec<f64>>,
    pub actions: Vec<Vec<f64>>,
    pub returns: Vec<f64>,
    /// Agent index of each row.
    pub agents: Vec<usize>,
    /// Number of rollouts the rows came from.
    pub rollouts: usize,
    /// Largest agent count among the sampled rollouts.
    pub max_agents: usize,
}

impl Batch {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.returns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.returns.is_empty()
    }

    /// Rows belonging to `agent`, gathered from every sampled rollout that
    /// has at least `agent + 1` agents.
    pub fn agent_slice(&self, agent: usize) -> AgentSlice {
        let mut slice = AgentSlice::default();
        for (row, &a) in self.agents.iter().enumerate() {
            if a != agent {
                continue;
            }
            slice.states.push(self.states[row].clone());
            slice.actions.push(self.actions[row].clone());
            slice.returns.push(self.returns[row]);
        }
        slice
    }
}

/// One agent's view of a [`Batch`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentSlice {
    pub states: Vec<Vec<f64>>,
    pub actions: Vec<Vec<f64>>,
    pub returns: Vec<f64>,
}

impl AgentSlice {
    pub fn len(&self) -> usize {
        self.returns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.returns.is_empty()
    }
}

/// Insertion-ordered store of discounted rollouts.
///
/// Holds at most `capacity` rollouts; pushing into a full memory evicts the
/// oldest one. The learner clears it after each training call so sampled
/// data never outlives one policy update.
#[derive(Debug, Clone)]
pub struct OnPolicyMemory {
    capacity: usize,
    state_dim: usize,
    action_dim: usize,
    rollouts: VecDeque<Rollout>,
}

impl OnPolicyMemory {
    /// Creates an empty memory. A zero capacity is treated as one.
    pub fn new(capacity: usize, state_dim: usize, action_dim: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state_dim,
            action_dim,
            rollouts: VecDeque::new(),
        }
    }

    /// Appends one rollout of already-discounted returns.
    pub fn push(
        &mut self,
        states: Vec<Observation>,
        actions: Vec<JointAction>,
        returns: Vec<Vec<f64>>,
    ) -> Result<(), LearnerError> {
        let rollout = Rollout::new(states, actions, returns, self.state_dim, self.action_dim)?;
        while self.rollouts.len() >= self.capacity {
            self.rollouts.pop_front();
        }
        self.rollouts.push_back(rollout);
        Ok(())
    }

    /// Draws `min(n, len)` distinct rollouts uniformly at random and flattens
    /// them into a [`Batch`]. Separate calls draw independently.
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Batch {
        let amount = n.min(self.rollouts.len());
        let mut batch = Batch {
            rollouts: amount,
            ..Batch::default()
        };
        if amount == 0 {
            return batch;
        }

        for idx in rand::seq::index::sample(rng, self.rollouts.len(), amount) {
            let rollout = &self.rollouts[idx];
            batch.max_agents = batch.max_agents.max(rollout.n_agents);
            for ((s, a), r) in rollout
                .states
                .iter()
                .zip(&rollout.actions)
                .zip(&rollout.returns)
            {
                for agent in 0..rollout.n_agents {
                    batch.states.push(s[agent].clone());
                    batch.actions.push(a[agent].clone());
                    batch.returns.push(r[agent]);
                    batch.agents.push(agent);
                }
            }
        }
        batch
    }

    /// Drops every stored rollout.
    pub fn clear(&mut self) {
        self.rollouts.clear();
    }

    /// Number of stored rollouts.
    pub fn len(&self) -> usize {
        self.rollouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rollouts.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stored rollouts, oldest first.
    pub fn rollouts(&self) -> impl Iterator<Item = &Rollout> {
        self.rollouts.iter()
    }
}
