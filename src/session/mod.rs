pub mod controller;
pub mod engine;
pub mod state;
pub mod validation;

use std::fmt;

pub use controller::{Clock, SessionController, SessionUpdate, SystemClock};
pub use engine::{
    AbandonChoice, AbandonPrompt, CompletedSession, SessionEffect, SessionEngine, SessionOutcome,
    SessionSnapshot,
};
pub use state::{
    CompletedSet, ExerciseKind, Phase, SessionConfig, SessionStage, SessionState, SessionStatus,
    SetResult,
};
pub use validation::{FormErrors, SetForm, ValidationError};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    InvalidConfig(String),
    InvalidTransition {
        action: &'static str,
        stage: SessionStage,
    },
    Validation(FormErrors),
    SetOutOfRange(usize),
    EditorOpen,
    EditorClosed,
    NothingToSave,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::InvalidConfig(reason) => write!(f, "invalid session config: {reason}"),
            SessionError::InvalidTransition { action, stage } => {
                write!(f, "cannot {action} while {stage:?}")
            }
            SessionError::Validation(errors) => write!(f, "invalid set input ({errors})"),
            SessionError::SetOutOfRange(index) => write!(f, "set {index} does not exist"),
            SessionError::EditorOpen => f.write_str("close the set editor first"),
            SessionError::EditorClosed => f.write_str("no set is open in the editor"),
            SessionError::NothingToSave => f.write_str("no completed set to save"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<FormErrors> for SessionError {
    fn from(errors: FormErrors) -> Self {
        SessionError::Validation(errors)
    }
}
