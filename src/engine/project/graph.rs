use std::sync::Arc;

use super::ProjectState;
use crate::engine::components::{Track, TrackKey};
use crate::engine::processor::{MidiMessage, ProcessContext};
use crate::engine::Sample;

/// Scratch buffers reused between blocks, so mixing doesn't allocate once warmed up.
#[derive(Debug, Default)]
pub(super) struct GraphBuffers {
    mix: Vec<Sample>,
    pool: Vec<Vec<Sample>>,
}
impl GraphBuffers {
    fn take(&mut self, len: usize) -> Vec<Sample> {
        let mut buffer = self.pool.pop().unwrap_or_default();
        buffer.clear();
        buffer.resize(len, 0.0);
        buffer
    }

    fn give(&mut self, buffer: Vec<Sample>) {
        self.pool.push(buffer);
    }
}

/// Everything that stays the same for every track within one pass over the graph.
pub(super) struct Block<'a> {
    pub frames: usize,
    pub channels: usize,
    pub live_midi: &'a [MidiMessage],
    pub any_solo: bool,
    pub context: &'a ProcessContext,
}

impl ProjectState {
    /// Produce the next `frames` frames of interleaved output, and advance the transport.
    ///
    /// When looping, the block is split at the loop end, and the playhead jumps back to the loop start.
    /// Live MIDI is delivered with the first part only.
    pub fn process_block(
        &mut self,
        output: &mut [Sample],
        frames: usize,
        channels: usize,
        live_midi: &[MidiMessage],
    ) {
        if channels == 0 {
            return;
        }
        let frames = frames.min(output.len() / channels);
        let transport = Arc::clone(&self.transport);

        let playing = transport.is_playing();
        if self.was_playing && !playing {
            self.reset_tracks();
        }
        self.was_playing = playing;

        let any_solo = self.tracks.iter().any(Track::is_soloed);
        let loop_start = transport.loop_start();
        let loop_end = transport.loop_end();

        if playing && transport.is_loop_enabled() && loop_end > loop_start {
            let mut processed = 0;
            while processed < frames {
                let mut position = transport.position();
                if position >= loop_end {
                    position = loop_start;
                    transport.set_position(position);
                }
                let chunk = (frames - processed).min((loop_end - position) as usize);

                let context = self.context(position, playing);
                let block = Block {
                    frames: chunk,
                    channels,
                    live_midi: if processed == 0 { live_midi } else { &[] },
                    any_solo,
                    context: &context,
                };
                let range = processed * channels..(processed + chunk) * channels;
                self.process_audio_graph(&mut output[range], &block);

                transport.advance(chunk);
                processed += chunk;
            }
        } else {
            let context = self.context(transport.position(), playing);
            let block = Block {
                frames,
                channels,
                live_midi,
                any_solo,
                context: &context,
            };
            self.process_audio_graph(&mut output[..frames * channels], &block);
            transport.advance(frames);
        }
    }

    pub(super) fn context(&self, position: i64, playing: bool) -> ProcessContext {
        ProcessContext {
            sample_rate: self.transport.sample_rate(),
            current_sample: position,
            bpm: self.transport.bpm(),
            is_playing: playing,
            ..ProcessContext::default()
        }
    }

    /// Mix every root track into `dest`, then run the master track over the sum.
    pub(super) fn process_audio_graph(&mut self, dest: &mut [Sample], block: &Block<'_>) {
        let len = block.frames * block.channels;
        let dest = &mut dest[..len];

        let mut mix = std::mem::take(&mut self.buffers.mix);
        mix.clear();
        mix.resize(len, 0.0);

        for index in 0..self.tracks.len() {
            if self.tracks[index].parent().is_none() {
                self.process_track_recursively(index, &mut mix, block, false);
            }
        }

        dest.copy_from_slice(&mix);
        self.master
            .process(dest, block.frames, block.channels, &[], block.context);

        self.buffers.mix = mix;
    }

    /// Add the output of the track at `index` to `dest`, processing its children first if it's a group.
    fn process_track_recursively(
        &mut self,
        index: usize,
        dest: &mut [Sample],
        block: &Block<'_>,
        ancestor_soloed: bool,
    ) {
        let track = &self.tracks[index];
        let key = track.key();
        let soloed = ancestor_soloed || track.is_soloed();

        if track.is_muted() && !soloed {
            return;
        }
        if block.any_solo && !soloed && !self.has_soloed_descendant(key) {
            return;
        }

        let len = dest.len();
        if track.is_group() {
            self.tracks[index].clear_accumulator(len);
            let mut child_output = self.buffers.take(len);
            for child in 0..self.tracks.len() {
                if child == index || self.tracks[child].parent() != Some(key) {
                    continue;
                }
                child_output.fill(0.0);
                self.process_track_recursively(child, &mut child_output, block, soloed);
                self.tracks[index].add_to_accumulator(&child_output);
            }
            self.buffers.give(child_output);
        }

        let track = &self.tracks[index];
        let live_midi = if self.selected == Some(index) && track.has_instrument() {
            block.live_midi
        } else {
            &[]
        };

        let mut output = self.buffers.take(len);
        self.tracks[index].process(
            &mut output,
            block.frames,
            block.channels,
            live_midi,
            block.context,
        );
        for (d, s) in dest.iter_mut().zip(&output) {
            *d += s;
        }
        self.buffers.give(output);
    }

    fn has_soloed_descendant(&self, key: TrackKey) -> bool {
        self.tracks.iter().any(|t| {
            t.parent() == Some(key)
                && t.key() != key
                && (t.is_soloed() || self.has_soloed_descendant(t.key()))
        })
    }
}
