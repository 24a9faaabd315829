//! Actor and critic networks using tch-rs (PyTorch bindings).
//!
//! Each network owns its own [`nn::VarStore`], so a target copy is an
//! independent set of parameters that can be blended toward the live one
//! with [`soft_update`]. This module is only available with the `nn` feature.

use std::f64::consts::PI;

use tch::{nn, Device, Kind, Tensor};

use crate::config::{LogProbEstimator, OutputActivation};
use crate::error::LearnerError;

/// Packs `rows` (each `width` long) into a `[rows, width]` float tensor.
pub fn tensor_from_rows(
    rows: &[Vec<f64>],
    width: usize,
    what: &'static str,
    device: Device,
) -> Result<Tensor, LearnerError> {
    let mut flat = Vec::with_capacity(rows.len() * width);
    for row in rows {
        if row.len() != width {
            return Err(LearnerError::ShapeMismatch {
                what,
                expected: width,
                actual: row.len(),
            });
        }
        flat.extend_from_slice(row);
    }
    Ok(Tensor::from_slice(&flat)
        .reshape([rows.len() as i64, width as i64])
        .to_kind(Kind::Float)
        .to_device(device))
}

/// Reads a `[rows, width]` tensor back into nested vectors.
pub fn rows_from_tensor(t: &Tensor) -> Result<Vec<Vec<f64>>, LearnerError> {
    let t = t.to_kind(Kind::Double).to_device(Device::Cpu).contiguous();
    let width = t.size().last().copied().unwrap_or(0).max(1) as usize;
    let flat: Vec<f64> = Vec::<f64>::try_from(t.flatten(0, -1))?;
    Ok(flat.chunks(width).map(<[f64]>::to_vec).collect())
}

/// Promotes a single sample to a batch of one.
fn batched(x: &Tensor) -> (Tensor, bool) {
    if x.dim() == 1 {
        (x.unsqueeze(0), true)
    } else {
        (x.shallow_clone(), false)
    }
}

fn check_width(what: &'static str, x: &Tensor, expected: usize) -> Result<(), LearnerError> {
    let actual = x.size().last().copied().unwrap_or(0) as usize;
    if actual != expected {
        return Err(LearnerError::ShapeMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Deterministic MLP policy shared by every agent.
///
/// Architecture: `state_dim → hidden → hidden → action_dim` with ReLU between
/// layers and a bounded output activation.
pub struct ActorNetwork {
    vs: nn::VarStore,
    fc1: nn::Linear,
    fc2: nn::Linear,
    fc3: nn::Linear,
    state_dim: usize,
    hidden_size: usize,
    action_dim: usize,
    activation: OutputActivation,
}

impl ActorNetwork {
    /// Creates a freshly initialized actor.
    pub fn new(
        state_dim: usize,
        hidden_size: usize,
        action_dim: usize,
        activation: OutputActivation,
        device: Device,
    ) -> Self {
        let vs = nn::VarStore::new(device);
        let p = &vs.root();
        let fc1 = nn::linear(
            p / "fc1",
            state_dim as i64,
            hidden_size as i64,
            Default::default(),
        );
        let fc2 = nn::linear(
            p / "fc2",
            hidden_size as i64,
            hidden_size as i64,
            Default::default(),
        );
        let fc3 = nn::linear(
            p / "fc3",
            hidden_size as i64,
            action_dim as i64,
            Default::default(),
        );

        Self {
            vs,
            fc1,
            fc2,
            fc3,
            state_dim,
            hidden_size,
            action_dim,
            activation,
        }
    }

    /// Maps `[batch, state_dim]` (or `[state_dim]`) to actions of the same
    /// leading shape, every component inside the activation's range.
    pub fn forward(&self, states: &Tensor) -> Result<Tensor, LearnerError> {
        check_width("actor input", states, self.state_dim)?;
        let (x, single) = batched(states);
        let out = x.apply(&self.fc1).relu().apply(&self.fc2).relu().apply(&self.fc3);
        let out = match self.activation {
            OutputActivation::Tanh => out.tanh(),
            OutputActivation::Sigmoid => out.sigmoid(),
        };
        Ok(if single { out.squeeze_dim(0) } else { out })
    }

    /// Log-probability of `actions` under the policy at `states`, shape `[batch]`.
    ///
    /// The Gaussian estimator treats the actor output as the mean of a
    /// diagonal normal with standard deviation `sigma`. The projection
    /// estimator returns `sum(actor(states) * actions)`.
    pub fn log_prob(
        &self,
        states: &Tensor,
        actions: &Tensor,
        estimator: LogProbEstimator,
        sigma: f64,
    ) -> Result<Tensor, LearnerError> {
        check_width("actor action", actions, self.action_dim)?;
        let mean = self.forward(states)?;
        let per_component = match estimator {
            LogProbEstimator::Gaussian => {
                let z = (actions - &mean) / sigma;
                let log_norm = sigma.ln() + 0.5 * (2.0 * PI).ln();
                z.pow_tensor_scalar(2.0) * -0.5 - log_norm
            }
            LogProbEstimator::Projection => mean * actions,
        };
        Ok(per_component.sum_dim_intlist([-1].as_slice(), false, Kind::Float))
    }

    /// Independent frozen copy of the current parameters.
    pub fn snapshot(&self) -> Result<Self, LearnerError> {
        let mut copy = Self::new(
            self.state_dim,
            self.hidden_size,
            self.action_dim,
            self.activation,
            self.vs.device(),
        );
        copy.vs.copy(&self.vs)?;
        copy.vs.freeze();
        Ok(copy)
    }

    pub fn state_dim(&self) -> usize {
        self.state_dim
    }

    pub fn action_dim(&self) -> usize {
        self.action_dim
    }

    /// Returns a mutable reference to the variable store for optimization.
    pub fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }

    /// Returns a reference to the variable store.
    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }
}

/// Centralized action-value network `Q(state, action)`.
///
/// The state is encoded first, then concatenated with the action:
/// `relu(fc1(s)) ++ a → relu(fc2) → fc3 → 1`.
pub struct CriticNetwork {
    vs: nn::VarStore,
    fc1: nn::Linear,
    fc2: nn::Linear,
    fc3: nn::Linear,
    state_dim: usize,
    action_dim: usize,
    hidden_size: usize,
}

impl CriticNetwork {
    pub fn new(state_dim: usize, action_dim: usize, hidden_size: usize, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let p = &vs.root();
        let fc1 = nn::linear(
            p / "fc1",
            state_dim as i64,
            hidden_size as i64,
            Default::default(),
        );
        let fc2 = nn::linear(
            p / "fc2",
            (hidden_size + action_dim) as i64,
            hidden_size as i64,
            Default::default(),
        );
        let fc3 = nn::linear(p / "fc3", hidden_size as i64, 1, Default::default());

        Self {
            vs,
            fc1,
            fc2,
            fc3,
            state_dim,
            action_dim,
            hidden_size,
        }
    }

    /// Returns one value per row, shape `[batch]`.
    pub fn forward(&self, states: &Tensor, actions: &Tensor) -> Result<Tensor, LearnerError> {
        check_width("critic state", states, self.state_dim)?;
        check_width("critic action", actions, self.action_dim)?;
        let (s, _) = batched(states);
        let (a, _) = batched(actions);
        let (rows_s, rows_a) = (s.size()[0], a.size()[0]);
        if rows_s != rows_a {
            return Err(LearnerError::ShapeMismatch {
                what: "critic batch",
                expected: rows_s as usize,
                actual: rows_a as usize,
            });
        }

        let h = s.apply(&self.fc1).relu();
        let x = Tensor::cat(&[h, a], 1);
        Ok(x.apply(&self.fc2).relu().apply(&self.fc3).squeeze_dim(-1))
    }

    /// Independent frozen copy of the current parameters.
    pub fn snapshot(&self) -> Result<Self, LearnerError> {
        let mut copy = Self::new(
            self.state_dim,
            self.action_dim,
            self.hidden_size,
            self.vs.device(),
        );
        copy.vs.copy(&self.vs)?;
        copy.vs.freeze();
        Ok(copy)
    }

    /// Returns a mutable reference to the variable store for optimization.
    pub fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }

    /// Returns a reference to the variable store.
    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }
}

/// Blends every target parameter toward its live counterpart:
/// `θ′ ← τθ + (1 − τ)θ′`.
///
/// Parameters are matched by name; a target parameter with no live
/// counterpart is an error.
pub fn soft_update(
    target: &mut nn::VarStore,
    source: &nn::VarStore,
    tau: f64,
) -> Result<(), LearnerError> {
    let sources = source.variables();
    tch::no_grad(|| {
        for (name, mut target_var) in target.variables() {
            let source_var = sources
                .get(&name)
                .ok_or_else(|| LearnerError::ParameterMismatch(name.clone()))?;
            let blended = source_var * tau + &target_var * (1.0 - tau);
            target_var.copy_(&blended);
        }
        Ok(())
    })
}
