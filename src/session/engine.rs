use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::{
    audio::{HapticPulse, SoundCue},
    notifications::RestNotification,
    settings::CueSettings,
};

use super::{
    state::{CompletedSet, Phase, SessionConfig, SessionStage, SessionState, SessionStatus},
    validation::SetForm,
    SessionError,
};

/// Remaining seconds (inclusive) during which each tick plays a warning cue.
pub const REST_WARNING_SECS: u64 = 3;

/// Side-effect intents produced by a transition. The engine never performs
/// them itself; an adapter maps them onto platform calls.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    PlaySound(SoundCue),
    Haptic(HapticPulse),
    ScheduleNotification(RestNotification),
    CancelNotification(String),
    CancelAllNotifications,
    StartRestTicker,
    StopRestTicker,
    PersistSession(CompletedSession),
    SaveSettings(CueSettings),
    SessionEnded(SessionOutcome),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedSession {
    pub exercise_id: String,
    pub exercise_name: String,
    pub sets: Vec<CompletedSet>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome", content = "sets")]
pub enum SessionOutcome {
    Finished(Vec<CompletedSet>),
    Abandoned,
}

/// What the UI should ask when the user tries to leave a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AbandonPrompt {
    /// Nothing recorded yet: confirm and discard.
    ConfirmDiscard,
    /// At least one set recorded: cancel, save and exit, or discard.
    SaveOrDiscard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonChoice {
    Cancel,
    Save,
    Discard,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub config: SessionConfig,
    pub state: SessionState,
    pub remaining_rest_secs: u64,
    pub finishable: bool,
}

pub struct SessionEngine {
    config: SessionConfig,
    state: SessionState,
    cues: CueSettings,
    pending_notification: Option<String>,
    last_warning_secs: Option<u64>,
}

impl SessionEngine {
    pub fn new(config: SessionConfig, cues: CueSettings) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self {
            state: SessionState::new(config.total_sets),
            config,
            cues,
            pending_notification: None,
            last_warning_secs: None,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn stage(&self) -> SessionStage {
        self.state.stage()
    }

    pub fn cue_settings(&self) -> CueSettings {
        self.cues
    }

    pub fn pending_notification(&self) -> Option<&str> {
        self.pending_notification.as_deref()
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> SessionSnapshot {
        SessionSnapshot {
            config: self.config.clone(),
            state: self.state.clone(),
            remaining_rest_secs: self.state.remaining_rest_secs(now),
            finishable: self.state.is_finishable(self.config.kind),
        }
    }

    pub fn start(&mut self) -> Result<Vec<SessionEffect>, SessionError> {
        self.require_stage("start", |stage| matches!(stage, SessionStage::NotStarted))?;
        self.state.status = SessionStatus::InProgress;
        self.state.phase = Phase::Work;
        self.state.current_set_index = 0;
        Ok(Vec::new())
    }

    /// Records the current set. On a validation failure nothing changes and
    /// the per-field errors are returned.
    pub fn complete_set(
        &mut self,
        form: &SetForm,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionEffect>, SessionError> {
        self.require_stage("complete a set", |stage| {
            matches!(stage, SessionStage::Working(_))
        })?;
        let result = form.validate(self.config.kind)?;
        let deadline = self.rest_deadline(now)?;

        let index = self.state.current_set_index;
        self.state.results[index] = result;
        self.state.editing = None;

        if self.state.is_last_set() {
            return Ok(self.finish(now));
        }

        let Some(deadline) = deadline else {
            self.state.current_set_index += 1;
            return Ok(Vec::new());
        };

        self.state.phase = Phase::Rest;
        self.state.rest_deadline = Some(deadline);
        self.last_warning_secs = None;

        let notification = self.next_set_notification(self.config.rest_secs);
        self.pending_notification = Some(notification.id.clone());

        Ok(vec![
            SessionEffect::ScheduleNotification(notification),
            SessionEffect::StartRestTicker,
        ])
    }

    /// Rest countdown step. Stale ticks outside the rest phase are ignored.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<SessionEffect> {
        if !self.state.is_resting() {
            return Vec::new();
        }

        let remaining = self.state.remaining_rest_secs(now);
        if remaining == 0 {
            return self.complete_rest();
        }

        let mut effects = Vec::new();
        if remaining <= REST_WARNING_SECS && self.last_warning_secs != Some(remaining) {
            self.last_warning_secs = Some(remaining);
            if self.cues.sound_enabled {
                effects.push(SessionEffect::PlaySound(SoundCue::RestWarning));
            }
            if self.cues.haptics_enabled {
                effects.push(SessionEffect::Haptic(HapticPulse::Warning));
            }
        }
        effects
    }

    pub fn skip_rest(&mut self) -> Result<Vec<SessionEffect>, SessionError> {
        if self.state.editing.is_some() {
            return Err(SessionError::EditorOpen);
        }
        self.require_stage("skip rest", |stage| {
            matches!(stage, SessionStage::Resting(..))
        })?;
        Ok(self.complete_rest())
    }

    pub fn abandon(&self) -> Result<AbandonPrompt, SessionError> {
        self.require_in_progress("abandon")?;
        if self.state.completed_count(self.config.kind) == 0 {
            Ok(AbandonPrompt::ConfirmDiscard)
        } else {
            Ok(AbandonPrompt::SaveOrDiscard)
        }
    }

    pub fn resolve_abandon(
        &mut self,
        choice: AbandonChoice,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionEffect>, SessionError> {
        self.require_in_progress("abandon")?;
        match choice {
            AbandonChoice::Cancel => Ok(Vec::new()),
            AbandonChoice::Save => {
                if self.state.completed_count(self.config.kind) == 0 {
                    return Err(SessionError::NothingToSave);
                }
                Ok(self.finish(now))
            }
            AbandonChoice::Discard => Ok(self.discard()),
        }
    }

    pub fn cancel_pre_start(&mut self) -> Result<Vec<SessionEffect>, SessionError> {
        self.require_stage("cancel", |stage| matches!(stage, SessionStage::NotStarted))?;
        self.state.status = SessionStatus::Abandoned;
        Ok(vec![SessionEffect::SessionEnded(SessionOutcome::Abandoned)])
    }

    /// Scheduled notifications are only a fallback for a suspended app; once
    /// back in the foreground the countdown is recomputed from the deadline.
    pub fn app_foregrounded(&mut self, now: DateTime<Utc>) -> Vec<SessionEffect> {
        self.pending_notification = None;
        let mut effects = vec![SessionEffect::CancelAllNotifications];
        effects.extend(self.tick(now));
        effects
    }

    /// Re-arms the rest notification for whatever is left of the countdown.
    pub fn app_backgrounded(&mut self, now: DateTime<Utc>) -> Vec<SessionEffect> {
        if !self.state.is_resting() || self.pending_notification.is_some() {
            return Vec::new();
        }
        let remaining = self.state.remaining_rest_secs(now);
        if remaining == 0 {
            return Vec::new();
        }
        let notification = self.next_set_notification(remaining);
        self.pending_notification = Some(notification.id.clone());
        vec![SessionEffect::ScheduleNotification(notification)]
    }

    pub fn open_set_editor(&mut self, index: usize) -> Result<(), SessionError> {
        self.require_in_progress("edit a set")?;
        if index >= self.state.results.len() || index > self.state.current_set_index {
            return Err(SessionError::SetOutOfRange(index));
        }
        self.state.editing = Some(index);
        Ok(())
    }

    pub fn close_set_editor(&mut self) {
        self.state.editing = None;
    }

    /// Submits the editor: the current working set is completed, an earlier
    /// set is amended in place without touching the phase.
    pub fn submit_set_editor(
        &mut self,
        form: &SetForm,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionEffect>, SessionError> {
        self.require_in_progress("edit a set")?;
        let index = self.state.editing.ok_or(SessionError::EditorClosed)?;

        if index == self.state.current_set_index && self.state.phase == Phase::Work {
            return self.complete_set(form, now);
        }

        let result = form.validate(self.config.kind)?;
        self.state.results[index] = result;
        self.state.editing = None;
        Ok(Vec::new())
    }

    /// Applies preferences loaded from storage without persisting them again.
    pub fn apply_cue_settings(&mut self, cues: CueSettings) {
        self.cues = cues;
    }

    pub fn set_sound_enabled(&mut self, enabled: bool) -> Vec<SessionEffect> {
        self.cues.sound_enabled = enabled;
        vec![SessionEffect::SaveSettings(self.cues)]
    }

    pub fn set_haptics_enabled(&mut self, enabled: bool) -> Vec<SessionEffect> {
        self.cues.haptics_enabled = enabled;
        vec![SessionEffect::SaveSettings(self.cues)]
    }

    fn complete_rest(&mut self) -> Vec<SessionEffect> {
        let mut effects = self.leave_rest();
        if self.cues.sound_enabled {
            effects.push(SessionEffect::PlaySound(SoundCue::RestComplete));
        }
        self.state.current_set_index += 1;
        effects
    }

    fn finish(&mut self, now: DateTime<Utc>) -> Vec<SessionEffect> {
        let mut effects = self.leave_rest();
        self.state.status = SessionStatus::Finished;
        self.state.editing = None;

        let sets = self.state.completed_sets(self.config.kind);
        effects.push(SessionEffect::PersistSession(CompletedSession {
            exercise_id: self.config.exercise_id.clone(),
            exercise_name: self.config.exercise_name.clone(),
            sets: sets.clone(),
            completed_at: now,
        }));
        effects.push(SessionEffect::SessionEnded(SessionOutcome::Finished(sets)));
        effects
    }

    fn discard(&mut self) -> Vec<SessionEffect> {
        let mut effects = self.leave_rest();
        self.state = SessionState::new(self.config.total_sets);
        self.state.status = SessionStatus::Abandoned;
        effects.push(SessionEffect::SessionEnded(SessionOutcome::Abandoned));
        effects
    }

    fn leave_rest(&mut self) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        if let Some(id) = self.pending_notification.take() {
            effects.push(SessionEffect::CancelNotification(id));
        }
        if self.state.phase == Phase::Rest {
            effects.push(SessionEffect::StopRestTicker);
        }
        self.state.phase = Phase::Work;
        self.state.rest_deadline = None;
        self.last_warning_secs = None;
        effects
    }

    /// End of the rest that follows the current set, if there is one.
    fn rest_deadline(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, SessionError> {
        if self.config.rest_secs == 0 || self.state.is_last_set() {
            return Ok(None);
        }
        i64::try_from(self.config.rest_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|rest| now.checked_add_signed(rest))
            .map(Some)
            .ok_or_else(|| {
                SessionError::InvalidConfig(format!(
                    "rest of {}s is out of range",
                    self.config.rest_secs
                ))
            })
    }

    fn next_set_notification(&self, after_secs: u64) -> RestNotification {
        let next_set = self.state.current_set_index + 2;
        RestNotification {
            id: format!("{}-rest-{}", self.config.exercise_id, next_set),
            after_secs,
            title: "Rest is over".into(),
            body: format!(
                "Set {} of {}: {} reps of {}",
                next_set, self.config.total_sets, self.config.planned_reps, self.config.exercise_name
            ),
        }
    }

    fn require_stage(
        &self,
        action: &'static str,
        allowed: impl Fn(SessionStage) -> bool,
    ) -> Result<(), SessionError> {
        let stage = self.state.stage();
        if allowed(stage) {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition { action, stage })
        }
    }

    fn require_in_progress(&self, action: &'static str) -> Result<(), SessionError> {
        self.require_stage(action, |stage| {
            matches!(stage, SessionStage::Working(_) | SessionStage::Resting(..))
        })
    }
}
