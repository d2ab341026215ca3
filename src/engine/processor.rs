use std::collections::HashMap;
use std::fmt::Debug;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};

use super::components::{TestTone, Utility};
use super::persist::{self, LineReader};
use super::utils::panic_msg;
use super::Sample;

/// A named, automatable value with a range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: f32,
    pub min: f32,
    pub max: f32,
}
impl Parameter {
    pub fn new(name: &str, value: f32, min: f32, max: f32) -> Self {
        Self {
            name: name.to_owned(),
            value,
            min,
            max,
        }
    }

    /// Set the value, limited to the parameter's range.
    pub fn set(&mut self, value: f32) {
        self.value = value.clamp(self.min, self.max);
    }
}

/// Transport information handed to every processor for one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessContext {
    pub sample_rate: f64,
    /// Position of the first frame of the block, relative to project start.
    pub current_sample: i64,
    pub bpm: f64,
    pub is_playing: bool,
    pub time_signature_numerator: u32,
    pub time_signature_denominator: u32,
}
impl Default for ProcessContext {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            current_sample: 0,
            bpm: 120.0,
            is_playing: false,
            time_signature_numerator: 4,
            time_signature_denominator: 4,
        }
    }
}

pub const NOTE_ON: u8 = 0x90;
pub const NOTE_OFF: u8 = 0x80;

/// A channel message, timestamped within the current block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiMessage {
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
    /// Frame offset inside the block.
    pub frame_index: usize,
}
impl MidiMessage {
    pub fn note_on(note: u8, velocity: u8, frame_index: usize) -> Self {
        Self {
            status: NOTE_ON,
            data1: note,
            data2: velocity,
            frame_index,
        }
    }

    pub fn note_off(note: u8, frame_index: usize) -> Self {
        Self {
            status: NOTE_OFF,
            data1: note,
            data2: 0,
            frame_index,
        }
    }

    pub fn is_note_on(&self) -> bool {
        self.status & 0xF0 == NOTE_ON && self.data2 > 0
    }

    /// Either an explicit note-off, or a note-on with zero velocity.
    pub fn is_note_off(&self) -> bool {
        self.status & 0xF0 == NOTE_OFF || (self.status & 0xF0 == NOTE_ON && self.data2 == 0)
    }
}

/// An element of a track's effect/instrument chain.
pub trait AudioProcessor: Send + Debug {
    /// Display name.
    fn name(&self) -> &str;

    /// The id used to recreate this processor through a [`ProcessorRegistry`].
    fn processor_id(&self) -> &str;

    fn is_instrument(&self) -> bool {
        false
    }

    fn prepare_to_play(&mut self, sample_rate: f64);

    /// Flush any internal state, e.g. delay lines and sounding voices.
    fn reset(&mut self) {}

    /// Process one block of interleaved audio in place.
    ///
    /// `midi` is sorted by frame index, and may be consumed.
    fn process(
        &mut self,
        buffer: &mut [Sample],
        frames: usize,
        channels: usize,
        midi: &mut Vec<MidiMessage>,
        context: &ProcessContext,
    );

    fn parameters(&self) -> &[Parameter];
    fn parameters_mut(&mut self) -> &mut [Parameter];

    fn save(&self, out: &mut dyn Write) -> io::Result<()> {
        save_parameters(self.parameters(), out)
    }

    /// Read back what [`AudioProcessor::save`] wrote.
    fn load(&mut self, reader: &mut LineReader<'_>) {
        load_parameters(self.parameters_mut(), reader)
    }
}

/// Write a `PARAMS_BEGIN … PARAMS_END` block.
pub fn save_parameters(parameters: &[Parameter], out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "PARAMS_BEGIN")?;
    for p in parameters {
        writeln!(out, "P \"{}\" {}", p.name, p.value)?;
    }
    writeln!(out, "PARAMS_END")
}

/// Read a parameter block up to and including `PARAMS_END`.
///
/// Nothing is consumed if the next line doesn't open a block.
/// An unterminated block ends before `PROCESSOR_END`, which is left for the enclosing processor.
/// Values for names that don't exist are ignored.
pub fn load_parameters(parameters: &mut [Parameter], reader: &mut LineReader<'_>) {
    if reader.peek_line() != Some("PARAMS_BEGIN") {
        return;
    }
    reader.next_line();
    while let Some(line) = reader.peek_line() {
        if line == "PROCESSOR_END" {
            break;
        }
        reader.next_line();
        if line == "PARAMS_END" {
            break;
        }
        if !line.starts_with("P ") {
            continue;
        }
        let (Some(name), Some(value)) = (persist::quoted(line), persist::after_quoted(line)) else {
            continue;
        };
        let Some(value) = persist::parse_first::<f32>(value) else {
            continue;
        };
        if let Some(p) = parameters.iter_mut().find(|p| p.name == name) {
            p.value = value;
        }
    }
}

/// A processor in a track's chain, along with its bypass flag.
///
/// Panics raised by the processor are caught here. The block the panic happened in
/// is passed through unchanged, as if the processor was bypassed.
#[derive(Debug)]
pub struct ProcessorSlot {
    processor: Box<dyn AudioProcessor>,
    bypassed: bool,
    faults: u32,

    audio_snapshot: Vec<Sample>,
    midi_snapshot: Vec<MidiMessage>,
}
impl ProcessorSlot {
    pub fn new(processor: Box<dyn AudioProcessor>) -> Self {
        Self {
            processor,
            bypassed: false,
            faults: 0,
            audio_snapshot: Vec::new(),
            midi_snapshot: Vec::new(),
        }
    }

    pub fn processor(&self) -> &dyn AudioProcessor {
        self.processor.as_ref()
    }
    pub fn processor_mut(&mut self) -> &mut dyn AudioProcessor {
        self.processor.as_mut()
    }
    pub fn into_processor(self) -> Box<dyn AudioProcessor> {
        self.processor
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }
    pub fn set_bypassed(&mut self, bypassed: bool) {
        self.bypassed = bypassed;
    }

    /// Number of blocks in which the processor panicked.
    pub fn faults(&self) -> u32 {
        self.faults
    }

    pub(crate) fn prepare_to_play(&mut self, sample_rate: f64) {
        let processor = &mut self.processor;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            processor.prepare_to_play(sample_rate)
        }));
        if let Err(payload) = result {
            self.faults += 1;
            log::error!(
                "Processor '{}' panicked while preparing: {}",
                self.processor.name(),
                panic_msg(payload.as_ref())
            );
        }
    }

    pub(crate) fn reset(&mut self) {
        let processor = &mut self.processor;
        let result = panic::catch_unwind(AssertUnwindSafe(|| processor.reset()));
        if let Err(payload) = result {
            self.faults += 1;
            log::error!(
                "Processor '{}' panicked while resetting: {}",
                self.processor.name(),
                panic_msg(payload.as_ref())
            );
        }
    }

    pub(crate) fn process(
        &mut self,
        buffer: &mut [Sample],
        frames: usize,
        channels: usize,
        midi: &mut Vec<MidiMessage>,
        context: &ProcessContext,
    ) {
        if self.bypassed {
            return;
        }

        self.audio_snapshot.clear();
        self.audio_snapshot.extend_from_slice(buffer);
        self.midi_snapshot.clear();
        self.midi_snapshot.extend_from_slice(midi);

        let processor = &mut self.processor;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            processor.process(buffer, frames, channels, midi, context)
        }));

        if let Err(payload) = result {
            buffer.copy_from_slice(&self.audio_snapshot);
            midi.clear();
            midi.extend_from_slice(&self.midi_snapshot);
            self.faults += 1;
            log::error!(
                "Processor '{}' panicked, bypassing it for this block: {}",
                self.processor.name(),
                panic_msg(payload.as_ref())
            );
        }
    }

    pub(crate) fn save(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "PROCESSOR {}", self.processor.processor_id())?;
        self.processor.save(out)?;
        writeln!(out, "BYPASS {}", persist::flag(self.bypassed))?;
        writeln!(out, "PROCESSOR_END")
    }

    /// Read the body of a `PROCESSOR <id>` block, the header line already being consumed.
    ///
    /// Returns `None` if the id isn't registered, in which case the block is skipped.
    pub(crate) fn load(
        id: &str,
        registry: &ProcessorRegistry,
        reader: &mut LineReader<'_>,
    ) -> Option<Self> {
        let Some(processor) = registry.create(id) else {
            log::warn!("Unknown processor '{id}', skipping it");
            reader.skip_past("PROCESSOR_END");
            return None;
        };

        let mut slot = ProcessorSlot::new(processor);
        slot.processor.load(reader);
        while let Some(line) = reader.next_line() {
            if line == "PROCESSOR_END" {
                break;
            }
            let (tag, rest) = persist::split_tag(line);
            if tag == "BYPASS" {
                slot.bypassed = persist::parse_flag(rest).unwrap_or(false);
            }
        }
        Some(slot)
    }
}

pub type ProcessorFactory = fn() -> Box<dyn AudioProcessor>;

/// Creates processors from their string id, used when loading projects.
#[derive(Debug, Clone, Default)]
pub struct ProcessorRegistry {
    factories: HashMap<String, ProcessorFactory>,
}
impl ProcessorRegistry {
    /// A registry without any processors.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry containing every processor shipped with this crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(TestTone::ID, || Box::new(TestTone::new()));
        registry.register(Utility::ID, || Box::new(Utility::new()));
        registry
    }

    /// Register a factory, replacing any previous one under the same id.
    pub fn register(&mut self, id: &str, factory: ProcessorFactory) {
        self.factories.insert(id.to_owned(), factory);
    }

    pub fn create(&self, id: &str) -> Option<Box<dyn AudioProcessor>> {
        self.factories.get(id).map(|factory| factory())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}
