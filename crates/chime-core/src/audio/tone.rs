//! Parametric two-tone alert. No bundled media: the samples are generated
//! once from a [`ToneSpec`] and reused for every playback.

use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use crate::constants::tone;

/// Shape of the alert: two consecutive sine segments, each with a linear
/// fade-in and fade-out so neither the start nor the frequency switch clicks.
#[derive(Debug, Clone, PartialEq)]
pub struct ToneSpec {
    pub first_hz: f32,
    pub second_hz: f32,
    pub segment_ms: u32,
    pub fade_ms: u32,
    pub gain: f32,
    pub sample_rate: u32,
}

impl Default for ToneSpec {
    fn default() -> Self {
        Self {
            first_hz: tone::FIRST_HZ,
            second_hz: tone::SECOND_HZ,
            segment_ms: tone::SEGMENT_MS,
            fade_ms: tone::FADE_MS,
            gain: tone::GAIN,
            sample_rate: tone::SAMPLE_RATE,
        }
    }
}

/// Mono `f32` samples ready for playback.
#[derive(Debug, Clone)]
pub struct Tone {
    pub sample_rate: u32,
    pub samples: Arc<[f32]>,
}

impl Tone {
    pub fn duration(&self) -> Duration {
        let nanos = self.samples.len() as u64 * 1_000_000_000 / self.sample_rate.max(1) as u64;
        Duration::from_nanos(nanos)
    }
}

impl ToneSpec {
    pub fn synthesize(&self) -> Tone {
        let per_segment = self.samples_for(self.segment_ms);
        let fade = self.samples_for(self.fade_ms).clamp(1, per_segment.max(1));

        let mut samples = Vec::with_capacity(per_segment * 2);
        for freq in [self.first_hz, self.second_hz] {
            for i in 0..per_segment {
                let t = i as f32 / self.sample_rate as f32;
                let rise = i as f32 / fade as f32;
                let fall = (per_segment - 1 - i) as f32 / fade as f32;
                let envelope = rise.min(fall).min(1.0);
                samples.push(self.gain * envelope * (TAU * freq * t).sin());
            }
        }

        Tone {
            sample_rate: self.sample_rate,
            samples: samples.into(),
        }
    }

    fn samples_for(&self, ms: u32) -> usize {
        (self.sample_rate as u64 * ms as u64 / 1000) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tone_is_300ms() {
        let tone = ToneSpec::default().synthesize();
        assert_eq!(tone.samples.len(), 2 * 6_615);
        assert_eq!(tone.duration().as_millis(), 300);
    }

    #[test]
    fn test_envelope_starts_and_ends_silent() {
        let tone = ToneSpec::default().synthesize();
        let n = tone.samples.len();
        assert_eq!(tone.samples[0], 0.0);
        assert!(tone.samples[n - 1].abs() < 1e-6);

        // The switch between segments is faded too.
        let mid = n / 2;
        assert!(tone.samples[mid - 1].abs() < 1e-6);
        assert_eq!(tone.samples[mid], 0.0);
    }

    #[test]
    fn test_peak_respects_gain() {
        let spec = ToneSpec::default();
        let tone = spec.synthesize();
        let peak = tone.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert!(peak <= spec.gain + 1e-6);
        assert!(peak > spec.gain * 0.9, "tone should reach full gain, got {}", peak);
    }

    #[test]
    fn test_fade_longer_than_segment_does_not_panic() {
        let spec = ToneSpec {
            segment_ms: 5,
            fade_ms: 50,
            ..ToneSpec::default()
        };
        let tone = spec.synthesize();
        assert!(tone.samples.iter().all(|s| s.abs() <= spec.gain));
    }
}
