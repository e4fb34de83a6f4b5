pub mod audio;
pub mod notifications;
pub mod session;
pub mod settings;
pub mod tracking;

pub use audio::{default_cue_player, CuePlayer, HapticPulse, SilentCues, SoundCue};
pub use notifications::{LocalNotifier, Notifier, RestNotification};
pub use session::{
    AbandonChoice, AbandonPrompt, CompletedSet, ExerciseKind, SessionConfig, SessionController,
    SessionEngine, SessionError, SessionStage, SessionUpdate, SetForm,
};
pub use settings::{CueSettings, SettingsStore};
pub use tracking::{Database, TrackingRecord, TrackingStore};

/// Initialise logging (reads `RUST_LOG`, defaults to `info`). Safe to call
/// more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}
