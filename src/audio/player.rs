use anyhow::{anyhow, Result};
use log::{debug, error};
use rodio::{OutputStream, Sink};
use std::sync::{
    mpsc::{self, Sender},
    Mutex,
};
use std::thread;

use super::{Chime, CuePlayer, HapticPulse, SoundCue};

enum AudioCommand {
    Play(SoundCue),
}

/// Owns a dedicated audio thread; rodio's output stream is not `Send`.
pub struct AudioCueHandle {
    tx: Mutex<Option<Sender<AudioCommand>>>,
}

impl AudioCueHandle {
    pub fn new() -> Self {
        Self {
            tx: Mutex::new(None),
        }
    }

    fn ensure_thread(&self) -> Result<Sender<AudioCommand>> {
        let mut guard = self
            .tx
            .lock()
            .map_err(|e| anyhow!("audio sender lock poisoned: {e}"))?;
        if let Some(tx) = guard.as_ref() {
            return Ok(tx.clone());
        }

        let (tx, rx) = mpsc::channel::<AudioCommand>();

        thread::Builder::new()
            .name("audio-cues".to_string())
            .spawn(move || {
                let mut _stream: Option<OutputStream> = None;
                let mut sink: Option<Sink> = None;

                fn ensure_sink(
                    stream: &mut Option<OutputStream>,
                    sink: &mut Option<Sink>,
                ) -> Result<(), String> {
                    if sink.is_none() {
                        let (s, handle) = OutputStream::try_default()
                            .map_err(|e| format!("Failed to create audio output stream: {}", e))?;
                        let new_sink = Sink::try_new(&handle)
                            .map_err(|e| format!("Failed to create audio sink: {}", e))?;
                        *stream = Some(s);
                        *sink = Some(new_sink);
                    }
                    Ok(())
                }

                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        AudioCommand::Play(cue) => {
                            if let Err(e) = ensure_sink(&mut _stream, &mut sink) {
                                error!("{}", e);
                                continue;
                            }
                            if let Some(ref s) = sink {
                                s.append(Chime::for_cue(cue));
                            }
                        }
                    }
                }
            })?;

        *guard = Some(tx.clone());
        Ok(tx)
    }
}

impl Default for AudioCueHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CuePlayer for AudioCueHandle {
    fn play(&self, cue: SoundCue) -> Result<()> {
        let tx = self.ensure_thread()?;
        tx.send(AudioCommand::Play(cue))
            .map_err(|e| anyhow!("audio thread gone: {e}"))
    }

    fn pulse(&self, pulse: HapticPulse) -> Result<()> {
        debug!("Haptic pulse {:?} has no desktop backend", pulse);
        Ok(())
    }
}
