use std::io::{Seek, Write};
use std::path::Path;
use std::sync::Arc;

use hound::{SampleFormat, WavSpec, WavWriter};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::graph::Block;
use super::ProjectState;
use crate::engine::components::Track;
use crate::engine::{Sample, CHANNELS};

/// Frames processed per pass over the graph while rendering.
pub const RENDER_BLOCK_SIZE: usize = 512;

/// Beats past the last clip included when rendering the whole project.
const TAIL_BEATS: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    pub start_beat: f64,
    /// If not after `start_beat`, the whole project is rendered,
    /// from beat 0 until a few beats after the last clip ends.
    pub end_beat: f64,
    pub sample_rate: f64,
}
impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            start_beat: 0.0,
            end_beat: 0.0,
            sample_rate: 44_100.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Nothing to render between beat {start} and beat {end}")]
    InvalidRange { start: f64, end: f64 },

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(f64),

    #[error("Failed to write WAV: {0}")]
    Wav(#[from] hound::Error),
}

impl ProjectState {
    /// Render to a 16-bit stereo WAV file, faster than real time.
    ///
    /// Returns the number of frames written.
    pub fn render_audio(&mut self, path: &Path, settings: &RenderSettings) -> Result<u64, RenderError> {
        let (start, end) = self.render_range(settings)?;
        let writer = WavWriter::create(path, wav_spec(settings.sample_rate))?;
        let frames = self.render(writer, start, end, settings.sample_rate)?;
        log::info!("Rendered {frames} frames to '{}'", path.display());
        Ok(frames)
    }

    /// Like [`Self::render_audio`], but to any seekable writer.
    pub fn render_to<W: Write + Seek>(
        &mut self,
        out: W,
        settings: &RenderSettings,
    ) -> Result<u64, RenderError> {
        let (start, end) = self.render_range(settings)?;
        let writer = WavWriter::new(out, wav_spec(settings.sample_rate))?;
        self.render(writer, start, end, settings.sample_rate)
    }

    fn render_range(&self, settings: &RenderSettings) -> Result<(f64, f64), RenderError> {
        let sample_rate = settings.sample_rate;
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(RenderError::InvalidSampleRate(sample_rate));
        }

        let (start, end) = if settings.end_beat <= settings.start_beat {
            let last_end = self
                .tracks
                .iter()
                .map(|t| t.clips().latest_end())
                .fold(0.0, f64::max);
            (0.0, last_end + TAIL_BEATS)
        } else {
            (settings.start_beat, settings.end_beat)
        };

        if !(end - start > 0.0) {
            return Err(RenderError::InvalidRange { start, end });
        }
        Ok((start, end))
    }

    /// The transport is moved for the duration of the render, and restored afterwards, also on failure.
    fn render<W: Write + Seek>(
        &mut self,
        mut writer: WavWriter<W>,
        start_beat: f64,
        end_beat: f64,
        sample_rate: f64,
    ) -> Result<u64, RenderError> {
        let transport = Arc::clone(&self.transport);
        let seconds_per_beat = 60.0 / transport.bpm();
        let total_frames = ((end_beat - start_beat) * seconds_per_beat * sample_rate) as i64;
        let start_frame = (start_beat * seconds_per_beat * sample_rate) as i64;

        let saved = transport.state();
        transport.set_sample_rate(sample_rate);
        transport.set_position(start_frame);
        transport.set_playing(true);
        transport.set_loop_enabled(false);
        self.prepare_to_play(sample_rate);
        self.reset_tracks();

        let result = self
            .render_blocks(&mut writer, total_frames.max(0) as u64)
            .and_then(|frames| writer.finalize().map(|()| frames));

        transport.restore(&saved);
        self.prepare_to_play(saved.sample_rate);

        result.map_err(RenderError::from)
    }

    fn render_blocks<W: Write + Seek>(
        &mut self,
        writer: &mut WavWriter<W>,
        total_frames: u64,
    ) -> Result<u64, hound::Error> {
        let transport = Arc::clone(&self.transport);
        let any_solo = self.tracks.iter().any(Track::is_soloed);
        let mut buffer = vec![0.0; RENDER_BLOCK_SIZE * CHANNELS];

        let mut written = 0;
        while written < total_frames {
            let frames = (total_frames - written).min(RENDER_BLOCK_SIZE as u64) as usize;
            let output = &mut buffer[..frames * CHANNELS];
            output.fill(0.0);

            let context = self.context(transport.position(), true);
            let block = Block {
                frames,
                channels: CHANNELS,
                live_midi: &[],
                any_solo,
                context: &context,
            };
            self.process_audio_graph(output, &block);
            transport.advance(frames);

            for &sample in output.iter() {
                writer.write_sample(to_i16(sample))?;
            }
            written += frames as u64;
        }
        Ok(written)
    }
}

fn wav_spec(sample_rate: f64) -> WavSpec {
    WavSpec {
        channels: CHANNELS as u16,
        sample_rate: sample_rate as u32,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

fn to_i16(sample: Sample) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::engine::components::MidiClip;
    use crate::engine::project::Project;

    #[test]
    fn clamps_to_full_scale() {
        assert_eq!(to_i16(2.0), 32767);
        assert_eq!(to_i16(-2.0), -32767);
        assert_eq!(to_i16(0.0), 0);
    }

    #[test]
    fn empty_project_renders_tail() {
        let project = Project::new();
        let mut out = Cursor::new(Vec::new());
        let frames = project
            .lock()
            .render_to(&mut out, &RenderSettings::default())
            .unwrap();
        // 4 beats at 120 BPM
        assert_eq!(frames, 88_200);
        assert_eq!(out.into_inner().len(), 44 + 88_200 * 4);
    }

    #[test]
    fn whole_project_follows_last_clip() {
        let project = Project::new();
        project.create_track().unwrap();
        let mut clip = MidiClip::new();
        clip.region_mut().start_beat = 2.0;
        project.lock().track_mut(0).unwrap().add_clip(clip).unwrap();

        let mut out = Cursor::new(Vec::new());
        let frames = project
            .lock()
            .render_to(&mut out, &RenderSettings::default())
            .unwrap();
        // Clip ends at beat 6, plus 4 beats
        assert_eq!(frames, 220_500);
    }

    #[test]
    fn explicit_range() {
        let project = Project::new();
        let settings = RenderSettings {
            start_beat: 1.0,
            end_beat: 3.0,
            sample_rate: 48_000.0,
        };
        let frames = project
            .lock()
            .render_to(Cursor::new(Vec::new()), &settings)
            .unwrap();
        assert_eq!(frames, 48_000);
    }

    #[test]
    fn rejects_bad_sample_rate() {
        let project = Project::new();
        let settings = RenderSettings {
            sample_rate: 0.0,
            ..RenderSettings::default()
        };
        let result = project.lock().render_to(Cursor::new(Vec::new()), &settings);
        assert!(matches!(result, Err(RenderError::InvalidSampleRate(_))));
    }

    #[test]
    fn transport_is_restored() {
        let project = Project::new();
        project.prepare_to_play(48_000.0);
        let transport = project.transport();
        transport.set_position(1234);
        transport.set_loop_range(0, 100);
        transport.set_loop_enabled(true);
        let before = transport.state();

        project
            .lock()
            .render_to(Cursor::new(Vec::new()), &RenderSettings::default())
            .unwrap();
        assert_eq!(transport.state(), before);
    }
}
