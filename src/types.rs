//! Core value types shared by the learner and the environment contract.

use serde::{Deserialize, Serialize};

/// Per-agent observation vectors, ordered by agent index.
pub type Observation = Vec<Vec<f64>>;

/// Per-agent action vectors, ordered by agent index.
pub type JointAction = Vec<Vec<f64>>;

/// Optional per-agent action availability returned by `reset`.
pub type ActionMask = Option<Vec<Vec<bool>>>;

/// World-frame state of a controlled vehicle (`agents_info` entry).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VehicleState {
    pub x: f64,
    pub y: f64,
    pub speed: f64,
}

impl VehicleState {
    pub fn new(x: f64, y: f64, speed: f64) -> Self {
        Self { x, y, speed }
    }

    /// Returns true if any component is NaN.
    pub fn has_nan(&self) -> bool {
        self.x.is_nan() || self.y.is_nan() || self.speed.is_nan()
    }
}

/// Lane-local coordinates of a vehicle (`hdv_info` entry).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LaneCoordinates {
    /// Distance along the lane.
    pub longitudinal: f64,
    /// Offset from the lane centre.
    pub lateral: f64,
    pub speed: f64,
}

impl LaneCoordinates {
    pub fn new(longitudinal: f64, lateral: f64, speed: f64) -> Self {
        Self {
            longitudinal,
            lateral,
            speed,
        }
    }

    pub fn has_nan(&self) -> bool {
        self.longitudinal.is_nan() || self.lateral.is_nan() || self.speed.is_nan()
    }
}
