#[cfg(feature = "audio")]
use rodio::Source;
use std::f32::consts::PI;
use std::time::Duration;

use super::SoundCue;

const SAMPLE_RATE: u32 = 44100;

/// Finite sine tone with an exponential decay envelope.
/// Mono, so one sample per frame.
pub struct Chime {
    freq: f32,
    sample_rate: u32,
    num_sample: usize,
    total_samples: usize,
    decay: f32,
    amplitude: f32,
}

impl Chime {
    pub fn new(freq: f32, duration: Duration, amplitude: f32) -> Self {
        let total_samples = (duration.as_secs_f32() * SAMPLE_RATE as f32) as usize;
        Self {
            freq,
            sample_rate: SAMPLE_RATE,
            num_sample: 0,
            total_samples,
            // reach ~1% of the start amplitude at the end of the tone
            decay: 4.6 / duration.as_secs_f32().max(f32::EPSILON),
            amplitude: amplitude.clamp(0.0, 1.0),
        }
    }

    pub fn for_cue(cue: SoundCue) -> Self {
        match cue {
            // short high blip for the last seconds of rest
            SoundCue::RestWarning => Self::new(880.0, Duration::from_millis(120), 0.35),
            SoundCue::RestComplete => Self::new(660.0, Duration::from_millis(450), 0.5),
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f32(self.total_samples as f32 / self.sample_rate as f32)
    }
}

impl Iterator for Chime {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.num_sample >= self.total_samples {
            return None;
        }

        let t = self.num_sample as f32 / self.sample_rate as f32;
        self.num_sample += 1;

        let envelope = (-self.decay * t).exp();
        Some((2.0 * PI * self.freq * t).sin() * envelope * self.amplitude)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total_samples.saturating_sub(self.num_sample);
        (left, Some(left))
    }
}

#[cfg(feature = "audio")]
impl Source for Chime {
    fn current_frame_len(&self) -> Option<usize> {
        Some(self.total_samples.saturating_sub(self.num_sample))
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        Some(self.duration())
    }
}
