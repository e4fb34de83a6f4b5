use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SessionError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ExerciseKind {
    Normal,
    Bodyweight,
}

impl Default for ExerciseKind {
    fn default() -> Self {
        ExerciseKind::Normal
    }
}

/// Immutable description of the session being performed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub exercise_id: String,
    pub exercise_name: String,
    pub total_sets: usize,
    pub planned_reps: u32,
    pub rest_secs: u64,
    #[serde(default)]
    pub kind: ExerciseKind,
}

/// Longest rest the engine will schedule.
pub const MAX_REST_SECS: u64 = 24 * 60 * 60;

impl SessionConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.total_sets == 0 {
            return Err(SessionError::InvalidConfig(
                "total_sets must be greater than zero".into(),
            ));
        }
        if self.exercise_name.trim().is_empty() {
            return Err(SessionError::InvalidConfig(
                "exercise_name must not be blank".into(),
            ));
        }
        if self.rest_secs > MAX_REST_SECS {
            return Err(SessionError::InvalidConfig(format!(
                "rest_secs must be at most {MAX_REST_SECS}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SetResult {
    pub reps: Option<u32>,
    pub weight: Option<f64>,
}

impl SetResult {
    pub fn is_complete(&self, kind: ExerciseKind) -> bool {
        match kind {
            ExerciseKind::Bodyweight => self.reps.is_some(),
            ExerciseKind::Normal => self.reps.is_some() && self.weight.is_some(),
        }
    }

    /// Returns the recorded set if it counts as complete for `kind`.
    pub fn completed(&self, kind: ExerciseKind) -> Option<CompletedSet> {
        if !self.is_complete(kind) {
            return None;
        }
        Some(CompletedSet {
            reps: self.reps?,
            weight: match kind {
                ExerciseKind::Normal => self.weight,
                ExerciseKind::Bodyweight => None,
            },
        })
    }
}

/// A set that was fully recorded; this is what gets delivered and persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletedSet {
    pub reps: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Work,
    Rest,
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Work
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    NotStarted,
    InProgress,
    Finished,
    Abandoned,
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus::NotStarted
    }
}

/// State-machine view derived from [`SessionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    NotStarted,
    Working(usize),
    Resting(usize, DateTime<Utc>),
    Finished,
    Abandoned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub status: SessionStatus,
    pub phase: Phase,
    pub current_set_index: usize,
    pub results: Vec<SetResult>,
    pub rest_deadline: Option<DateTime<Utc>>,
    /// Set index currently open in the editor overlay.
    pub editing: Option<usize>,
}

impl SessionState {
    pub fn new(total_sets: usize) -> Self {
        Self {
            status: SessionStatus::NotStarted,
            phase: Phase::Work,
            current_set_index: 0,
            results: vec![SetResult::default(); total_sets],
            rest_deadline: None,
            editing: None,
        }
    }

    pub fn has_started(&self) -> bool {
        self.status != SessionStatus::NotStarted
    }

    pub fn stage(&self) -> SessionStage {
        match (self.status, self.phase, self.rest_deadline) {
            (SessionStatus::NotStarted, _, _) => SessionStage::NotStarted,
            (SessionStatus::Finished, _, _) => SessionStage::Finished,
            (SessionStatus::Abandoned, _, _) => SessionStage::Abandoned,
            (SessionStatus::InProgress, Phase::Rest, Some(deadline)) => {
                SessionStage::Resting(self.current_set_index, deadline)
            }
            (SessionStatus::InProgress, _, _) => SessionStage::Working(self.current_set_index),
        }
    }

    pub fn is_resting(&self) -> bool {
        matches!(self.stage(), SessionStage::Resting(..))
    }

    /// Whole seconds left in the rest phase, rounded up and derived from the
    /// absolute deadline so suspended ticks never skew it.
    pub fn remaining_rest_secs(&self, now: DateTime<Utc>) -> u64 {
        match self.stage() {
            SessionStage::Resting(_, deadline) => remaining_secs(deadline, now),
            _ => 0,
        }
    }

    pub fn completed_count(&self, kind: ExerciseKind) -> usize {
        self.results.iter().filter(|r| r.is_complete(kind)).count()
    }

    pub fn completed_sets(&self, kind: ExerciseKind) -> Vec<CompletedSet> {
        self.results.iter().filter_map(|r| r.completed(kind)).collect()
    }

    pub fn is_last_set(&self) -> bool {
        self.current_set_index + 1 >= self.results.len()
    }

    /// The session may only be finished once its last set is recorded.
    pub fn is_finishable(&self, kind: ExerciseKind) -> bool {
        self.results
            .last()
            .map(|last| last.is_complete(kind))
            .unwrap_or(false)
    }
}

pub fn remaining_secs(deadline: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let remaining_ms = (deadline - now).num_milliseconds();
    if remaining_ms <= 0 {
        return 0;
    }
    (remaining_ms as u64).div_ceil(1000)
}
