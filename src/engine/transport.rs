use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

use super::utils::AtomicF64;

pub const DEFAULT_BPM: f64 = 120.0;
pub const DEFAULT_SAMPLE_RATE: f64 = 48_000.0;

/// Sample-accurate playhead, tempo and loop range.
///
/// Every field is independently atomic, so it can be read from any thread without locking.
/// Keeping the fields consistent with each other is up to the caller.
#[derive(Debug)]
pub struct Transport {
    playing: AtomicBool,
    position: AtomicI64,
    bpm: AtomicF64,
    sample_rate: AtomicF64,

    loop_enabled: AtomicBool,
    loop_start: AtomicI64,
    loop_end: AtomicI64,
}
impl Transport {
    pub fn new() -> Self {
        Self {
            playing: AtomicBool::new(false),
            position: AtomicI64::new(0),
            bpm: AtomicF64::new(DEFAULT_BPM),
            sample_rate: AtomicF64::new(DEFAULT_SAMPLE_RATE),
            loop_enabled: AtomicBool::new(false),
            loop_start: AtomicI64::new(0),
            loop_end: AtomicI64::new(0),
        }
    }

    /// Resume playback from the current position.
    pub fn play(&self) {
        self.playing.store(true, Ordering::Release);
    }
    /// Halt playback and rewind to the start.
    pub fn stop(&self) {
        self.playing.store(false, Ordering::Release);
        self.position.store(0, Ordering::Release);
    }
    /// Halt playback, keeping the position.
    pub fn pause(&self) {
        self.playing.store(false, Ordering::Release);
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// Position in samples.
    pub fn set_position(&self, sample: i64) {
        self.position.store(sample, Ordering::Release);
    }
    pub fn position(&self) -> i64 {
        self.position.load(Ordering::Acquire)
    }

    /// Tempos that aren't positive are ignored.
    ///
    /// Positions are left as they are, see [`crate::project::ProjectState::set_bpm`].
    pub fn set_bpm(&self, bpm: f64) {
        if bpm > 0.0 && bpm.is_finite() {
            self.bpm.store(bpm, Ordering::Release);
        }
    }
    pub fn bpm(&self) -> f64 {
        self.bpm.load(Ordering::Acquire)
    }

    pub fn set_sample_rate(&self, sample_rate: f64) {
        self.sample_rate.store(sample_rate, Ordering::Release);
    }
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate.load(Ordering::Acquire)
    }

    pub fn set_loop_enabled(&self, enabled: bool) {
        self.loop_enabled.store(enabled, Ordering::Release);
    }
    pub fn is_loop_enabled(&self) -> bool {
        self.loop_enabled.load(Ordering::Acquire)
    }

    /// Loop range in samples. Looping only takes effect if `end > start`.
    pub fn set_loop_range(&self, start: i64, end: i64) {
        self.loop_start.store(start, Ordering::Release);
        self.loop_end.store(end, Ordering::Release);
    }
    pub fn loop_start(&self) -> i64 {
        self.loop_start.load(Ordering::Acquire)
    }
    pub fn loop_end(&self) -> i64 {
        self.loop_end.load(Ordering::Acquire)
    }

    /// Move the playhead forward, if playing.
    pub fn advance(&self, frames: usize) {
        if self.is_playing() {
            self.position.fetch_add(frames as i64, Ordering::AcqRel);
        }
    }

    /// Position in beats at the current tempo and sample rate.
    pub fn position_in_beats(&self) -> f64 {
        samples_to_beats(self.position(), self.sample_rate(), self.bpm())
    }

    pub fn state(&self) -> TransportState {
        TransportState {
            playing: self.is_playing(),
            position: self.position(),
            bpm: self.bpm(),
            sample_rate: self.sample_rate(),
            loop_enabled: self.is_loop_enabled(),
            loop_start: self.loop_start(),
            loop_end: self.loop_end(),
        }
    }

    pub fn restore(&self, state: &TransportState) {
        self.set_playing(state.playing);
        self.set_position(state.position);
        self.bpm.store(state.bpm, Ordering::Release);
        self.set_sample_rate(state.sample_rate);
        self.set_loop_enabled(state.loop_enabled);
        self.set_loop_range(state.loop_start, state.loop_end);
    }
}
impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain copy of every [`Transport`] field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransportState {
    pub playing: bool,
    pub position: i64,
    pub bpm: f64,
    pub sample_rate: f64,
    pub loop_enabled: bool,
    pub loop_start: i64,
    pub loop_end: i64,
}

/// Number of samples in one beat.
pub fn samples_per_beat(sample_rate: f64, bpm: f64) -> f64 {
    sample_rate * 60.0 / bpm
}

pub fn samples_to_beats(samples: i64, sample_rate: f64, bpm: f64) -> f64 {
    samples as f64 / sample_rate * (bpm / 60.0)
}

pub fn beats_to_samples(beats: f64, sample_rate: f64, bpm: f64) -> i64 {
    (beats * samples_per_beat(sample_rate, bpm)) as i64
}
