use std::f64::consts::PI;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::clip::ClipRegion;
use crate::engine::import::{self, DecodedAudio, ImportError};
use crate::engine::persist::{self, LineReader};
use crate::engine::transport::DEFAULT_BPM;
use crate::engine::{Sample, CHANNELS};

/// Used in place of a clip's native sample rate when that is not positive.
pub const FALLBACK_SAMPLE_RATE: f64 = 44_100.0;
/// Segment BPM at or below this is treated as unset.
const MIN_SEGMENT_BPM: f64 = 0.1;
/// Transposition below this many semitones is ignored during playback.
const TRANSPOSE_THRESHOLD: f64 = 0.001;

/// Stretching algorithm selected for a warped clip.
///
/// Stored and persisted, but playback always resamples linearly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarpMode {
    #[default]
    Beats,
    Tones,
    Texture,
    RePitch,
    Complex,
    ComplexPro,
}
impl WarpMode {
    pub fn from_index(index: i64) -> Option<Self> {
        Some(match index {
            0 => WarpMode::Beats,
            1 => WarpMode::Tones,
            2 => WarpMode::Texture,
            3 => WarpMode::RePitch,
            4 => WarpMode::Complex,
            5 => WarpMode::ComplexPro,
            _ => return None,
        })
    }

    pub fn index(self) -> i64 {
        self as i64
    }
}

#[derive(Debug, Clone)]
pub struct AudioClip {
    region: ClipRegion,

    samples: Arc<[Sample]>,
    channels: usize,
    sample_rate: f64,
    total_frames: u64,
    path: Option<PathBuf>,

    warp_enabled: bool,
    warp_mode: WarpMode,
    segment_bpm: f64,
    transpose_semitones: f64,
    transpose_cents: f64,
}
impl Default for AudioClip {
    fn default() -> Self {
        Self::new()
    }
}
impl AudioClip {
    pub fn new() -> Self {
        Self {
            region: ClipRegion::new("Audio Clip"),

            samples: Arc::from(Vec::new()),
            channels: CHANNELS,
            sample_rate: 48_000.0,
            total_frames: 0,
            path: None,

            warp_enabled: false,
            warp_mode: WarpMode::default(),
            segment_bpm: DEFAULT_BPM,
            transpose_semitones: 0.0,
            transpose_cents: 0.0,
        }
    }

    /// A clip playing already decoded audio.
    pub fn from_decoded(audio: DecodedAudio) -> Self {
        let mut clip = Self::new();
        clip.set_audio(audio);
        clip
    }

    pub fn region(&self) -> &ClipRegion {
        &self.region
    }
    pub fn region_mut(&mut self) -> &mut ClipRegion {
        &mut self.region
    }

    /// Interleaved samples.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }
    pub fn channels(&self) -> usize {
        self.channels
    }
    /// Native sample rate of the material.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_warp_enabled(&self) -> bool {
        self.warp_enabled
    }
    pub fn set_warp_enabled(&mut self, enabled: bool) {
        self.warp_enabled = enabled;
    }
    pub fn warp_mode(&self) -> WarpMode {
        self.warp_mode
    }
    pub fn set_warp_mode(&mut self, mode: WarpMode) {
        self.warp_mode = mode;
    }
    /// Tempo the material was recorded at, used when warping.
    pub fn segment_bpm(&self) -> f64 {
        self.segment_bpm
    }
    pub fn set_segment_bpm(&mut self, bpm: f64) {
        self.segment_bpm = bpm;
    }
    pub fn transpose_semitones(&self) -> f64 {
        self.transpose_semitones
    }
    pub fn set_transpose_semitones(&mut self, semitones: f64) {
        self.transpose_semitones = semitones;
    }
    pub fn transpose_cents(&self) -> f64 {
        self.transpose_cents
    }
    pub fn set_transpose_cents(&mut self, cents: f64) {
        self.transpose_cents = cents;
    }

    /// Transposition in semitones, including cents.
    pub fn total_semitones(&self) -> f64 {
        self.transpose_semitones + self.transpose_cents / 100.0
    }

    /// Replace the material, keeping the region and playback settings.
    pub fn set_audio(&mut self, audio: DecodedAudio) {
        self.total_frames = audio.frames();
        self.channels = audio.channels;
        self.sample_rate = audio.sample_rate;
        self.samples = Arc::from(audio.samples);
    }

    /// Decode a file into this clip.
    ///
    /// On failure the clip is left untouched.
    pub fn load_from_file(&mut self, path: &Path) -> Result<(), ImportError> {
        let audio = import::decode_audio_file(path)?;
        log::info!(
            "Loaded {} frames at {} Hz from '{}'",
            audio.frames(),
            audio.sample_rate,
            path.display()
        );
        self.set_audio(audio);
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    /// Fill the clip with a stereo sine sweep from 220 Hz to 880 Hz.
    pub fn generate_test_signal(&mut self, sample_rate: f64, duration_secs: f64) {
        let frames = (duration_secs * sample_rate).max(0.0) as usize;
        let mut samples = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let t = i as f64 / sample_rate;
            let frequency = 220.0 + 660.0 * t / duration_secs;
            let value = (0.5 * (2.0 * PI * frequency * t).sin()) as Sample;
            samples.push(value);
            samples.push(value);
        }

        self.set_audio(DecodedAudio {
            samples,
            channels: 2,
            sample_rate,
        });
        self.region.duration = duration_secs * 2.0;
    }

    /// Playback speed relative to the project, in source frames per output frame.
    pub fn playback_rate(&self, project_sample_rate: f64, project_bpm: f64) -> f64 {
        let native_rate = if self.sample_rate <= 0.0 {
            FALLBACK_SAMPLE_RATE
        } else {
            self.sample_rate
        };
        let mut rate = native_rate / project_sample_rate;

        if self.warp_enabled {
            let segment_bpm = if self.segment_bpm <= MIN_SEGMENT_BPM {
                DEFAULT_BPM
            } else {
                self.segment_bpm
            };
            rate *= project_bpm / segment_bpm;
        }

        let semitones = self.total_semitones();
        if semitones.abs() > TRANSPOSE_THRESHOLD {
            rate *= 2.0_f64.powf(semitones / 12.0);
        }
        rate
    }

    /// How many beats the whole material lasts at the given tempo.
    pub fn max_duration_in_beats(&self, project_bpm: f64) -> f64 {
        if self.total_frames == 0 || self.sample_rate <= 0.0 {
            return 0.0;
        }

        let pitch_ratio = 2.0_f64.powf(self.total_semitones() / 12.0);
        let file_secs = self.total_frames as f64 / self.sample_rate;

        if self.warp_enabled {
            file_secs * (self.segment_bpm / 60.0) / pitch_ratio
        } else {
            file_secs / pitch_ratio * (project_bpm / 60.0)
        }
    }

    /// Shorten the clip so it doesn't extend past the end of its material.
    pub fn validate_duration(&mut self, project_bpm: f64) {
        let max_visible = (self.max_duration_in_beats(project_bpm) - self.region.offset).max(0.0);
        if self.region.duration > max_visible {
            self.region.duration = max_visible;
        }
    }

    pub(crate) fn save(&self, out: &mut dyn Write) -> io::Result<()> {
        self.region.save(out)?;
        let path = self
            .path
            .as_deref()
            .map(|p| p.to_string_lossy())
            .unwrap_or_default();
        writeln!(out, "PATH \"{path}\"")?;
        writeln!(out, "WARP {}", persist::flag(self.warp_enabled))?;
        writeln!(out, "WARP_MODE {}", self.warp_mode.index())?;
        writeln!(out, "SEG_BPM {}", self.segment_bpm)?;
        writeln!(out, "TRANSPOSE {}", self.transpose_semitones)?;
        writeln!(out, "TRANSPOSE_FINE {}", self.transpose_cents)
    }

    /// Read an audio clip block up to and including `CLIP_END`,
    /// decoding the referenced file if there is one.
    pub(crate) fn load(reader: &mut LineReader<'_>) -> Self {
        let mut clip = Self::new();
        while let Some(line) = reader.next_line() {
            if line == "CLIP_END" {
                break;
            }
            let (tag, rest) = persist::split_tag(line);
            if clip.region.parse_line(tag, line, rest) {
                continue;
            }
            match tag {
                "PATH" => {
                    let Some(path) = persist::quoted(line).filter(|p| !p.is_empty()) else {
                        continue;
                    };
                    let path = PathBuf::from(path);
                    if let Err(e) = clip.load_from_file(&path) {
                        log::warn!("Could not load audio '{}': {e}", path.display());
                    }
                    clip.path = Some(path);
                }
                "WARP" => {
                    if let Some(v) = persist::parse_flag(rest) {
                        clip.warp_enabled = v;
                    }
                }
                "WARP_MODE" => {
                    if let Some(mode) = persist::parse_first(rest).and_then(WarpMode::from_index) {
                        clip.warp_mode = mode;
                    }
                }
                "SEG_BPM" => {
                    if let Some(v) = persist::parse_first(rest) {
                        clip.segment_bpm = v;
                    }
                }
                "TRANSPOSE" => {
                    if let Some(v) = persist::parse_first(rest) {
                        clip.transpose_semitones = v;
                    }
                }
                "TRANSPOSE_FINE" => {
                    if let Some(v) = persist::parse_first(rest) {
                        clip.transpose_cents = v;
                    }
                }
                _ => {}
            }
        }
        clip
    }
}
