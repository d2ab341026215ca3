use std::f32::consts::PI;

use crate::engine::processor::{AudioProcessor, MidiMessage, Parameter, ProcessContext};
use crate::engine::Sample;

/// Monophonic sine instrument.
///
/// Sounds the most recent note-on until its matching note-off, and is mixed on top of the input.
#[derive(Debug)]
pub struct TestTone {
    parameters: [Parameter; 1],

    sample_rate: f32,
    sample_clock: f32,
    voice: Option<Voice>,
}

#[derive(Debug, Clone, Copy)]
struct Voice {
    note: u8,
    frequency: f32,
    gain: f32,
}

impl Default for TestTone {
    fn default() -> Self {
        Self::new()
    }
}
impl TestTone {
    pub const ID: &'static str = "TestTone";

    pub fn new() -> Self {
        Self {
            parameters: [Parameter::new("Level", 0.5, 0.0, 1.0)],

            sample_rate: 48_000.0,
            sample_clock: 0.0,
            voice: None,
        }
    }

    /// The note currently sounding.
    pub fn active_note(&self) -> Option<u8> {
        self.voice.map(|v| v.note)
    }

    fn handle(&mut self, message: &MidiMessage) {
        if message.is_note_off() {
            if self.active_note() == Some(message.data1) {
                self.voice = None;
            }
        } else if message.is_note_on() {
            self.voice = Some(Voice {
                note: message.data1,
                frequency: 440.0 * 2.0_f32.powf((f32::from(message.data1) - 69.0) / 12.0),
                gain: f32::from(message.data2) / 127.0,
            });
            self.sample_clock = 0.0;
        }
    }
}

impl AudioProcessor for TestTone {
    fn name(&self) -> &str {
        "Test Tone"
    }
    fn processor_id(&self) -> &str {
        Self::ID
    }
    fn is_instrument(&self) -> bool {
        true
    }

    fn prepare_to_play(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate as f32;
        self.sample_clock = 0.0;
    }

    fn reset(&mut self) {
        self.voice = None;
        self.sample_clock = 0.0;
    }

    fn process(
        &mut self,
        buffer: &mut [Sample],
        frames: usize,
        channels: usize,
        midi: &mut Vec<MidiMessage>,
        _context: &ProcessContext,
    ) {
        let level = self.parameters[0].value;
        let mut events = midi.iter().peekable();

        for (i, frame) in buffer.chunks_mut(channels).take(frames).enumerate() {
            while let Some(message) = events.next_if(|m| m.frame_index <= i) {
                self.handle(message);
            }

            let Some(voice) = self.voice else {
                continue;
            };
            let phase_length = self.sample_rate / voice.frequency;
            let value = (self.sample_clock * 2.0 * PI / phase_length).sin() * voice.gain * level;
            self.sample_clock = (self.sample_clock + 1.0) % phase_length;

            for sample in frame {
                *sample += value;
            }
        }

        // Events past the end of the block still apply
        for message in events {
            self.handle(message);
        }
        midi.clear();
    }

    fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }
    fn parameters_mut(&mut self) -> &mut [Parameter] {
        &mut self.parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process(tone: &mut TestTone, frames: usize, midi: Vec<MidiMessage>) -> Vec<Sample> {
        let mut buffer = vec![0.0; frames * 2];
        let mut midi = midi;
        tone.process(&mut buffer, frames, 2, &mut midi, &ProcessContext::default());
        assert!(midi.is_empty());
        buffer
    }

    #[test]
    fn silent_without_notes() {
        let mut tone = TestTone::new();
        tone.prepare_to_play(48_000.0);
        assert!(process(&mut tone, 64, vec![]).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn sounds_from_note_on_frame() {
        let mut tone = TestTone::new();
        tone.prepare_to_play(48_000.0);
        let out = process(&mut tone, 128, vec![MidiMessage::note_on(69, 127, 32)]);

        assert!(out[..64].iter().all(|&s| s == 0.0));
        assert!(out[64..].iter().any(|&s| s.abs() > 0.1));
        assert!(out.iter().all(|&s| s.abs() <= 0.5 + 1e-6));
        assert_eq!(tone.active_note(), Some(69));
    }

    #[test]
    fn matching_note_off_stops() {
        let mut tone = TestTone::new();
        tone.prepare_to_play(48_000.0);
        let out = process(
            &mut tone,
            64,
            vec![
                MidiMessage::note_on(60, 100, 0),
                MidiMessage::note_off(61, 10),
                MidiMessage::note_off(60, 20),
            ],
        );
        assert!(out[40..].iter().all(|&s| s == 0.0));
        assert_eq!(tone.active_note(), None);
    }

    #[test]
    fn reset_silences() {
        let mut tone = TestTone::new();
        tone.prepare_to_play(48_000.0);
        process(&mut tone, 16, vec![MidiMessage::note_on(60, 100, 0)]);
        tone.reset();
        assert!(process(&mut tone, 16, vec![]).iter().all(|&s| s == 0.0));
    }
}
