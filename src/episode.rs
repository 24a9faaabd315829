//! Episode bookkeeping owned by the learner.
//!
//! [`EpisodeLog`] keeps per-episode reward, step count and average speed.
//! The last entry always belongs to the episode in progress; it is frozen
//! and a fresh entry opened by [`EpisodeLog::finish_episode`].

use std::collections::VecDeque;

use crate::environment::StepInfo;
use crate::error::LearnerError;
use crate::types::{LaneCoordinates, VehicleState};

/// Summary of one finished episode.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EpisodeRecord {
    /// Sum of global rewards.
    pub reward: f64,
    /// Environment steps taken.
    pub steps: u64,
    /// Mean of the per-step average vehicle speed.
    pub average_speed: f64,
}

/// Append-only history of episodes plus the one in progress.
#[derive(Debug, Clone, Default)]
pub struct EpisodeLog {
    finished: VecDeque<EpisodeRecord>,
    current: EpisodeRecord,
    speed_sum: f64,
    capacity: Option<usize>,
    total_finished: u64,
}

impl EpisodeLog {
    /// Creates an unbounded log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a log that keeps at most `capacity` finished episodes.
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Accumulates one environment step into the current episode.
    pub fn record_step(&mut self, reward: f64, average_speed: f64) {
        self.current.reward += reward;
        self.current.steps += 1;
        self.speed_sum += average_speed;
    }

    /// Freezes the current episode, appends it to the history and opens a new one.
    pub fn finish_episode(&mut self) -> EpisodeRecord {
        let mut record = self.current;
        record.average_speed = if record.steps > 0 {
            self.speed_sum / record.steps as f64
        } else {
            0.0
        };

        self.finished.push_back(record);
        if let Some(cap) = self.capacity {
            while self.finished.len() > cap {
                self.finished.pop_front();
            }
        }
        self.total_finished += 1;
        self.current = EpisodeRecord::default();
        self.speed_sum = 0.0;
        record
    }

    /// Zeroes the episode in progress without recording it.
    pub fn discard_current(&mut self) {
        self.current = EpisodeRecord::default();
        self.speed_sum = 0.0;
    }

    /// The episode in progress; `average_speed` is the running mean.
    pub fn current(&self) -> EpisodeRecord {
        let mut record = self.current;
        if record.steps > 0 {
            record.average_speed = self.speed_sum / record.steps as f64;
        }
        record
    }

    /// Finished episodes still retained, oldest first.
    pub fn finished(&self) -> impl Iterator<Item = &EpisodeRecord> {
        self.finished.iter()
    }

    /// Most recently finished episode.
    pub fn last_finished(&self) -> Option<&EpisodeRecord> {
        self.finished.back()
    }

    /// Number of episodes finished since creation, including dropped ones.
    pub fn total_finished(&self) -> u64 {
        self.total_finished
    }

    /// Rewards of the retained episodes followed by the current one.
    pub fn rewards(&self) -> Vec<f64> {
        self.finished
            .iter()
            .map(|r| r.reward)
            .chain(std::iter::once(self.current.reward))
            .collect()
    }
}

/// Positions of controlled vehicles over the current episode.
#[derive(Debug, Clone, Default)]
pub struct TrajectoryTrace {
    pub agents: Vec<VehicleState>,
    pub lanes: Vec<LaneCoordinates>,
}

impl TrajectoryTrace {
    /// Appends the vehicle states of one step, rejecting NaN positions.
    pub fn extend(&mut self, info: &StepInfo) -> Result<(), LearnerError> {
        if info.agents_info.iter().any(VehicleState::has_nan) {
            return Err(LearnerError::NonFinite("vehicle position"));
        }
        if info.hdv_info.iter().any(LaneCoordinates::has_nan) {
            return Err(LearnerError::NonFinite("lane coordinates"));
        }
        self.agents.extend_from_slice(&info.agents_info);
        self.lanes.extend_from_slice(&info.hdv_info);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.agents.clear();
        self.lanes.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty() && self.lanes.is_empty()
    }
}
