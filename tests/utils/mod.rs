#![allow(dead_code)]

use std::path::Path;

use mixgraph::import::DecodedAudio;
use mixgraph::{AudioClip, Project, Sample, CHANNELS};

pub const SAMPLE_RATE: f64 = 48_000.0;

/// Write a 16-bit WAV file.
pub fn write_wav_i16(path: &Path, channels: u16, sample_rate: u32, samples: &[i16]) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}

/// Write one second of a stereo 16-bit sine at 440 Hz.
pub fn write_sine_wav(path: &Path, sample_rate: u32) {
    let samples: Vec<i16> = (0..sample_rate)
        .flat_map(|i| {
            let t = f64::from(i) / f64::from(sample_rate);
            let v = ((t * 440.0 * std::f64::consts::TAU).sin() * 16_000.0) as i16;
            [v, v]
        })
        .collect();
    write_wav_i16(path, 2, sample_rate, &samples);
}

/// Stereo clip at [`SAMPLE_RATE`], where every frame holds the given function of its index.
pub fn clip_from_fn(frames: usize, f: impl Fn(usize) -> Sample) -> AudioClip {
    let samples = (0..frames).flat_map(|i| [f(i), f(i)]).collect();
    AudioClip::from_decoded(DecodedAudio {
        samples,
        channels: 2,
        sample_rate: SAMPLE_RATE,
    })
}

/// Clip holding `value` for `beats` beats at 120 BPM, starting at `start_beat`.
pub fn constant_clip(value: Sample, start_beat: f64, beats: f64) -> AudioClip {
    let frames = (beats * SAMPLE_RATE / 2.0) as usize + 1;
    let mut clip = clip_from_fn(frames, |_| value);
    clip.region_mut().start_beat = start_beat;
    clip.region_mut().duration = beats;
    clip
}

/// A prepared project with one track per clip, each holding that clip.
pub fn project_with_clips(clips: Vec<AudioClip>) -> Project {
    let project = Project::new();
    project.prepare_to_play(SAMPLE_RATE);
    for clip in clips {
        project.create_track().unwrap();
        project.edit(|state| {
            let index = state.tracks().len() - 1;
            state.track_mut(index).unwrap().add_clip(clip).unwrap();
        });
    }
    project
}

/// Run one stereo block through the project.
pub fn process(project: &Project, frames: usize) -> Vec<Sample> {
    let mut out = vec![0.0; frames * CHANNELS];
    project.process_block(&mut out, frames, CHANNELS, &[]);
    out
}

pub fn left(buffer: &[Sample]) -> Vec<Sample> {
    buffer.iter().step_by(CHANNELS).copied().collect()
}

/// Standard MIDI File bytes, format 0, holding the given track data.
pub fn smf(division: u16, track: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"MThd");
    bytes.extend_from_slice(&6_u32.to_be_bytes());
    bytes.extend_from_slice(&0_u16.to_be_bytes());
    bytes.extend_from_slice(&1_u16.to_be_bytes());
    bytes.extend_from_slice(&division.to_be_bytes());
    bytes.extend_from_slice(b"MTrk");
    bytes.extend_from_slice(&(track.len() as u32).to_be_bytes());
    bytes.extend_from_slice(track);
    bytes
}

/// One note of middle C, starting after one beat and lasting half a beat, at 480 ticks per beat.
pub fn single_note_smf() -> Vec<u8> {
    smf(
        480,
        &[
            // Delta 480, note on
            0x83, 0x60, 0x90, 60, 90,
            // Delta 240, note off
            0x81, 0x70, 0x80, 60, 0,
            // End of track
            0x00, 0xFF, 0x2F, 0x00,
        ],
    )
}
