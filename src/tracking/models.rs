use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::CompletedSession;

/// One `{reps, weight?}` entry of `sets_data`.
pub use crate::session::CompletedSet as SetEntry;

/// A finished session as stored by the tracking backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackingRecord {
    pub id: String,
    pub user_id: String,
    pub exercise_id: String,
    pub exercise_name: String,
    pub date: DateTime<Utc>,
    /// JSON array of [`SetEntry`].
    pub sets_data: String,
}

impl TrackingRecord {
    pub fn from_session(user_id: &str, session: &CompletedSession) -> Result<Self> {
        let sets_data =
            serde_json::to_string(&session.sets).context("failed to serialize sets data")?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            exercise_id: session.exercise_id.clone(),
            exercise_name: session.exercise_name.clone(),
            date: session.completed_at,
            sets_data,
        })
    }

    pub fn sets(&self) -> Result<Vec<SetEntry>> {
        serde_json::from_str(&self.sets_data)
            .with_context(|| format!("record {} has malformed sets data", self.id))
    }
}
