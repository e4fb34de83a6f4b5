pub mod chime;
#[cfg(feature = "audio")]
pub mod player;

use std::sync::Arc;

use anyhow::Result;
use log::debug;
use serde::{Deserialize, Serialize};

pub use chime::Chime;
#[cfg(feature = "audio")]
pub use player::AudioCueHandle;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SoundCue {
    RestWarning,
    RestComplete,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum HapticPulse {
    Warning,
}

/// Plays sounds and haptic pulses. Calls must return quickly; playback
/// happens elsewhere.
pub trait CuePlayer: Send + Sync {
    fn play(&self, cue: SoundCue) -> Result<()>;
    fn pulse(&self, pulse: HapticPulse) -> Result<()>;
}

/// Cue player for builds without an audio backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentCues;

impl CuePlayer for SilentCues {
    fn play(&self, cue: SoundCue) -> Result<()> {
        debug!("Sound cue {:?} (no audio backend)", cue);
        Ok(())
    }

    fn pulse(&self, pulse: HapticPulse) -> Result<()> {
        debug!("Haptic pulse {:?} (no haptics backend)", pulse);
        Ok(())
    }
}

pub fn default_cue_player() -> Arc<dyn CuePlayer> {
    #[cfg(feature = "audio")]
    {
        Arc::new(AudioCueHandle::new())
    }

    #[cfg(not(feature = "audio"))]
    {
        Arc::new(SilentCues)
    }
}
