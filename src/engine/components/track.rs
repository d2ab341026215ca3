use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::io::{self, Write};

use super::audio_meter::{PeakMeter, PeakMeterReader};
use super::automation::{AutomationCurve, AutomationPoint};
use super::clip::{Clip, ClipKey, ClipList, OverlapReport};
use super::{AudioClip, MidiClip};
use crate::engine::persist::{self, LineReader};
use crate::engine::processor::{
    AudioProcessor, MidiMessage, Parameter, ProcessContext, ProcessorRegistry, ProcessorSlot,
};
use crate::engine::transport::samples_per_beat;
use crate::engine::utils::db_to_gain;
use crate::engine::utils::key_generator::{key_type, Key, OverflowError};
use crate::engine::Sample;

key_type!(pub struct TrackKey(u32));

/// Address of a parameter automatable on a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterId {
    Volume,
    Pan,
    /// Parameter `index` of the processor in chain position `slot`.
    Processor { slot: usize, index: usize },
}

/// A mixer channel with clips, a processor chain and automation.
///
/// Tracks form a tree through their parent key.
/// A group track sums its children's output into its accumulator, before its own processing.
#[derive(Debug)]
pub struct Track {
    key: TrackKey,
    name: String,
    color: u32,

    volume: Parameter,
    pan: Parameter,
    mute: bool,
    solo: bool,
    group: bool,
    parent: Option<TrackKey>,

    processors: Vec<ProcessorSlot>,
    clips: ClipList,
    automation: Vec<AutomationCurve>,
    meter: PeakMeter,

    sample_rate: f64,
    accumulator: Vec<Sample>,
    midi: Vec<MidiMessage>,
}
impl Track {
    pub fn new(key: TrackKey, name: &str) -> Self {
        Self {
            key,
            name: name.to_owned(),
            color: random_color(key),

            volume: Parameter::new("Volume", 0.0, -60.0, 6.0),
            pan: Parameter::new("Pan", 0.0, -1.0, 1.0),
            mute: false,
            solo: false,
            group: false,
            parent: None,

            processors: Vec::new(),
            clips: ClipList::new(),
            automation: Vec::new(),
            meter: PeakMeter::new(),

            sample_rate: 0.0,
            accumulator: Vec::new(),
            midi: Vec::new(),
        }
    }

    pub fn key(&self) -> TrackKey {
        self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_owned();
    }

    /// Packed as `0xAABBGGRR`.
    pub fn color(&self) -> u32 {
        self.color
    }
    pub fn set_color(&mut self, color: u32) {
        self.color = color;
    }

    pub fn volume_db(&self) -> f32 {
        self.volume.value
    }
    pub fn set_volume_db(&mut self, db: f32) {
        self.volume.set(db);
    }
    pub fn pan(&self) -> f32 {
        self.pan.value
    }
    pub fn set_pan(&mut self, pan: f32) {
        self.pan.set(pan);
    }

    pub fn is_muted(&self) -> bool {
        self.mute
    }
    pub fn set_muted(&mut self, mute: bool) {
        self.mute = mute;
    }
    pub fn is_soloed(&self) -> bool {
        self.solo
    }
    pub fn set_soloed(&mut self, solo: bool) {
        self.solo = solo;
    }
    pub fn is_group(&self) -> bool {
        self.group
    }
    pub fn set_group(&mut self, group: bool) {
        self.group = group;
        if !group {
            self.accumulator.clear();
        }
    }

    pub fn parent(&self) -> Option<TrackKey> {
        self.parent
    }
    pub(crate) fn set_parent(&mut self, parent: Option<TrackKey>) {
        self.parent = parent;
    }

    pub fn meter(&self) -> &PeakMeter {
        &self.meter
    }
    pub fn meter_reader(&self) -> PeakMeterReader {
        self.meter.reader()
    }

    pub fn prepare_to_play(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        for slot in &mut self.processors {
            slot.prepare_to_play(sample_rate);
        }
    }

    /// Flush every processor and zero the meters.
    pub fn reset(&mut self) {
        for slot in &mut self.processors {
            slot.reset();
        }
        self.meter.reset();
    }

    // Processors

    pub fn processors(&self) -> &[ProcessorSlot] {
        &self.processors
    }
    pub fn processor(&self, index: usize) -> Option<&ProcessorSlot> {
        self.processors.get(index)
    }
    pub fn processor_mut(&mut self, index: usize) -> Option<&mut ProcessorSlot> {
        self.processors.get_mut(index)
    }

    pub fn add_processor(&mut self, processor: Box<dyn AudioProcessor>) {
        self.insert_processor(self.processors.len(), processor);
    }

    /// Insert into the chain. The index is clamped to the chain length.
    pub fn insert_processor(&mut self, index: usize, processor: Box<dyn AudioProcessor>) {
        self.insert_slot(index, ProcessorSlot::new(processor));
    }

    fn insert_slot(&mut self, index: usize, mut slot: ProcessorSlot) {
        if self.sample_rate > 0.0 {
            slot.prepare_to_play(self.sample_rate);
        }
        let index = index.min(self.processors.len());
        self.processors.insert(index, slot);
        self.rebind_automation();
    }

    pub fn remove_processor(&mut self, index: usize) -> Option<Box<dyn AudioProcessor>> {
        if index >= self.processors.len() {
            return None;
        }
        let slot = self.processors.remove(index);
        self.rebind_automation();
        Some(slot.into_processor())
    }

    /// Move a processor to stand before whatever is currently at `to`.
    ///
    /// `to` may equal the chain length, to move it to the end.
    pub fn move_processor(&mut self, from: usize, to: usize) -> bool {
        let len = self.processors.len();
        if from >= len || to > len {
            return false;
        }
        let to = if to > from { to - 1 } else { to };
        let slot = self.processors.remove(from);
        self.processors.insert(to, slot);
        self.rebind_automation();
        true
    }

    pub fn has_instrument(&self) -> bool {
        self.processors
            .iter()
            .any(|slot| slot.processor().is_instrument())
    }

    // Parameters and automation

    pub fn parameter(&self, id: ParameterId) -> Option<&Parameter> {
        match id {
            ParameterId::Volume => Some(&self.volume),
            ParameterId::Pan => Some(&self.pan),
            ParameterId::Processor { slot, index } => {
                self.processors.get(slot)?.processor().parameters().get(index)
            }
        }
    }

    pub fn parameter_mut(&mut self, id: ParameterId) -> Option<&mut Parameter> {
        match id {
            ParameterId::Volume => Some(&mut self.volume),
            ParameterId::Pan => Some(&mut self.pan),
            ParameterId::Processor { slot, index } => self
                .processors
                .get_mut(slot)?
                .processor_mut()
                .parameters_mut()
                .get_mut(index),
        }
    }

    /// Volume, pan, then every processor's parameters in chain order.
    pub fn all_parameters(&self) -> Vec<(ParameterId, &Parameter)> {
        let mut parameters = vec![
            (ParameterId::Volume, &self.volume),
            (ParameterId::Pan, &self.pan),
        ];
        for (slot, processor) in self.processors.iter().enumerate() {
            for (index, p) in processor.processor().parameters().iter().enumerate() {
                parameters.push((ParameterId::Processor { slot, index }, p));
            }
        }
        parameters
    }

    /// The first parameter with the given name.
    pub fn find_parameter(&self, name: &str) -> Option<ParameterId> {
        self.all_parameters()
            .into_iter()
            .find(|(_, p)| p.name == name)
            .map(|(id, _)| id)
    }

    pub fn automation_curves(&self) -> &[AutomationCurve] {
        &self.automation
    }

    /// The curve automating the named parameter.
    pub fn automation_curve(&self, param_name: &str) -> Option<&AutomationCurve> {
        self.automation
            .iter()
            .find(|c| c.param_name() == param_name)
    }

    fn curve_for(&mut self, id: ParameterId) -> Option<&mut AutomationCurve> {
        let name = self.parameter(id)?.name.clone();
        let index = match self.automation.iter().position(|c| c.target() == Some(id)) {
            Some(index) => index,
            None => {
                let mut curve = AutomationCurve::new(&name);
                curve.set_target(Some(id));
                self.automation.push(curve);
                self.automation.len() - 1
            }
        };
        self.automation.get_mut(index)
    }

    /// Add a point to the parameter's curve, creating the curve if needed.
    ///
    /// Returns `false` if there is no such parameter.
    pub fn add_automation_point(&mut self, id: ParameterId, beat: f64, value: f32) -> bool {
        match self.curve_for(id) {
            Some(curve) => {
                curve.add_point(beat, value);
                true
            }
            None => false,
        }
    }

    pub fn remove_automation_point(
        &mut self,
        id: ParameterId,
        index: usize,
    ) -> Option<AutomationPoint> {
        self.automation
            .iter_mut()
            .find(|c| c.target() == Some(id))?
            .remove_point(index)
    }

    pub fn set_point_tension(&mut self, id: ParameterId, index: usize, tension: f32) {
        if let Some(curve) = self.automation.iter_mut().find(|c| c.target() == Some(id)) {
            curve.set_tension(index, tension);
        }
    }

    /// Resolve every curve's parameter name against the current parameter layout.
    pub fn rebind_automation(&mut self) {
        for i in 0..self.automation.len() {
            let target = self.find_parameter(self.automation[i].param_name());
            self.automation[i].set_target(target);
        }
    }

    // Clips

    pub fn clips(&self) -> &ClipList {
        &self.clips
    }

    pub fn clip(&self, key: ClipKey) -> Option<&Clip> {
        self.clips.get(key)
    }

    /// Edit a clip in place. Call [`Self::resolve_overlaps`] after moving or resizing it.
    pub fn clip_mut(&mut self, key: ClipKey) -> Option<&mut Clip> {
        self.clips.get_mut(key)
    }

    /// Place a clip on the timeline, making room for it.
    pub fn add_clip(&mut self, clip: impl Into<Clip>) -> Result<ClipKey, OverflowError> {
        let key = self.clips.insert(clip.into())?;
        self.clips.resolve_overlaps(key)?;
        Ok(key)
    }

    pub fn remove_clip(&mut self, key: ClipKey) -> Option<Clip> {
        self.clips.remove(key)
    }

    pub fn resolve_overlaps(&mut self, active: ClipKey) -> Result<OverlapReport, OverflowError> {
        self.clips.resolve_overlaps(active)
    }

    pub(crate) fn validate_audio_durations(&mut self, bpm: f64) {
        let keys: Vec<ClipKey> = self.clips.keys().collect();
        for key in keys {
            if let Some(Clip::Audio(clip)) = self.clips.get_mut(key) {
                clip.validate_duration(bpm);
            }
        }
    }

    // Audio

    pub(crate) fn clear_accumulator(&mut self, len: usize) {
        self.accumulator.clear();
        self.accumulator.resize(len, 0.0);
    }

    pub(crate) fn add_to_accumulator(&mut self, source: &[Sample]) {
        if self.accumulator.len() < source.len() {
            self.accumulator.resize(source.len(), 0.0);
        }
        for (a, s) in self.accumulator.iter_mut().zip(source) {
            *a += s;
        }
    }

    /// Process one block in place.
    ///
    /// `buffer` holds `frames * channels` interleaved samples.
    /// Its contents are kept and mixed with the track's own material.
    pub fn process(
        &mut self,
        buffer: &mut [Sample],
        frames: usize,
        channels: usize,
        live_midi: &[MidiMessage],
        context: &ProcessContext,
    ) {
        let len = (frames * channels).min(buffer.len());
        let buffer = &mut buffer[..len];

        self.midi.clear();
        self.midi.extend_from_slice(live_midi);

        if context.is_playing {
            self.apply_automation(context);
        }

        if self.accumulator.len() >= len {
            for (sample, input) in buffer.iter_mut().zip(&self.accumulator) {
                *sample += input;
            }
        }

        if context.is_playing {
            let spb = samples_per_beat(context.sample_rate, context.bpm);
            let block_start = context.current_sample;
            let block_end = block_start + frames as i64;

            for (_, clip) in self.clips.iter() {
                let clip_start = (clip.start_beat() * spb) as i64;
                let clip_end = clip_start + (clip.duration() * spb) as i64;
                if clip_end <= block_start || clip_start >= block_end {
                    continue;
                }
                let span = ClipSpan {
                    clip_start,
                    clip_end,
                    block_start,
                    block_end,
                    samples_per_beat: spb,
                };

                match clip {
                    Clip::Midi(clip) => schedule_notes(clip, &span, &mut self.midi),
                    Clip::Audio(clip) => play_audio(clip, &span, buffer, channels, context),
                }
            }
        }

        self.midi.sort_by_key(|m| m.frame_index);

        for slot in &mut self.processors {
            slot.process(buffer, frames, channels, &mut self.midi, context);
        }

        let gain = db_to_gain(self.volume.value);
        let pan = self.pan.value;
        let (mut gain_left, mut gain_right) = (gain, gain);
        if pan > 0.0 {
            gain_left *= 1.0 - pan;
        } else if pan < 0.0 {
            gain_right *= 1.0 + pan;
        }

        let mut peaks = [0.0_f32; 2];
        if channels >= 2 {
            for frame in buffer.chunks_mut(channels) {
                frame[0] *= gain_left;
                frame[1] *= gain_right;
                peaks[0] = peaks[0].max(frame[0].abs());
                peaks[1] = peaks[1].max(frame[1].abs());
            }
        } else if channels == 1 {
            for sample in buffer.iter_mut() {
                *sample *= gain;
                peaks[0] = peaks[0].max(sample.abs());
            }
            peaks[1] = peaks[0];
        }
        self.meter.report(peaks);
    }

    fn apply_automation(&mut self, context: &ProcessContext) {
        let beat = context.current_sample as f64 / context.sample_rate * (context.bpm / 60.0);
        for i in 0..self.automation.len() {
            let curve = &self.automation[i];
            let (Some(target), Some(value)) = (curve.target(), curve.evaluate(beat)) else {
                continue;
            };
            if let Some(parameter) = self.parameter_mut(target) {
                parameter.value = value;
            }
        }
    }

    // Persistence

    pub(crate) fn save(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "TRACK_BEGIN")?;
        writeln!(out, "NAME \"{}\"", self.name)?;
        writeln!(out, "COLOR {}", self.color)?;
        writeln!(out, "VOL {}", self.volume.value)?;
        writeln!(out, "PAN {}", self.pan.value)?;
        writeln!(out, "MUTE {}", persist::flag(self.mute))?;
        writeln!(out, "SOLO {}", persist::flag(self.solo))?;
        writeln!(out, "GROUP {}", persist::flag(self.group))?;

        for slot in &self.processors {
            slot.save(out)?;
        }
        for (_, clip) in self.clips.iter() {
            clip.save(out)?;
        }
        for curve in &self.automation {
            if !curve.points().is_empty() {
                curve.save(out)?;
            }
        }

        writeln!(out, "TRACK_END")
    }

    /// Read a track block up to and including `TRACK_END`.
    ///
    /// Returns the parent index found in the block, if any.
    /// Automation is left unbound, see [`Self::rebind_automation`].
    pub(crate) fn load(
        &mut self,
        reader: &mut LineReader<'_>,
        registry: &ProcessorRegistry,
    ) -> Option<i64> {
        let mut parent_index = None;
        while let Some(line) = reader.next_line() {
            if line == "TRACK_END" {
                break;
            }
            let (tag, rest) = persist::split_tag(line);
            match tag {
                "NAME" => {
                    if let Some(name) = persist::quoted(line) {
                        self.name = name.to_owned();
                    }
                }
                "COLOR" => {
                    if let Some(v) = persist::parse_first(rest) {
                        self.color = v;
                    }
                }
                "VOL" => {
                    if let Some(v) = persist::parse_first(rest) {
                        self.volume.value = v;
                    }
                }
                "PAN" => {
                    if let Some(v) = persist::parse_first(rest) {
                        self.pan.value = v;
                    }
                }
                "MUTE" => {
                    if let Some(v) = persist::parse_flag(rest) {
                        self.mute = v;
                    }
                }
                "SOLO" => {
                    if let Some(v) = persist::parse_flag(rest) {
                        self.solo = v;
                    }
                }
                "GROUP" => {
                    if let Some(v) = persist::parse_flag(rest) {
                        self.group = v;
                    }
                }
                "PARENT_IDX" => parent_index = persist::parse_first(rest),
                "PROCESSOR" => {
                    let id = rest.split_whitespace().next().unwrap_or_default();
                    if let Some(slot) = ProcessorSlot::load(id, registry, reader) {
                        self.insert_slot(self.processors.len(), slot);
                    }
                }
                "CLIP_BEGIN" => {
                    let kind = rest.split_whitespace().next().unwrap_or_default();
                    if let Some(clip) = Clip::load(kind, reader) {
                        if let Err(e) = self.add_clip(clip) {
                            log::warn!("Dropping clip on track '{}': {e}", self.name);
                        }
                    }
                }
                "AUTO_BEGIN" => {
                    if let Some(name) = persist::quoted(line) {
                        self.automation.push(AutomationCurve::load(name, reader));
                    }
                }
                _ => {}
            }
        }
        parent_index
    }
}

/// Sample positions of an intersecting clip and block.
struct ClipSpan {
    clip_start: i64,
    clip_end: i64,
    block_start: i64,
    block_end: i64,
    samples_per_beat: f64,
}

fn schedule_notes(clip: &MidiClip, span: &ClipSpan, midi: &mut Vec<MidiMessage>) {
    let offset = clip.region().offset;
    let spb = span.samples_per_beat;
    let in_block = |sample: i64| sample >= span.block_start && sample < span.block_end;

    clip.read_notes(|notes| {
        for note in notes {
            // Notes starting before the content offset are not played at all
            let adjusted_start = note.start_beat - offset;
            if adjusted_start < 0.0 {
                continue;
            }
            let on = span.clip_start + (adjusted_start * spb) as i64;
            let off = on + (note.duration_beats * spb) as i64;

            if in_block(on) {
                let frame = (on - span.block_start) as usize;
                midi.push(MidiMessage::note_on(note.note, note.velocity, frame));
            }
            if in_block(off) {
                let frame = (off - span.block_start) as usize;
                midi.push(MidiMessage::note_off(note.note, frame));
            }
        }
    });
}

fn play_audio(
    clip: &AudioClip,
    span: &ClipSpan,
    buffer: &mut [Sample],
    channels: usize,
    context: &ProcessContext,
) {
    let samples = clip.samples();
    let clip_channels = clip.channels();
    if clip_channels == 0 || samples.is_empty() {
        return;
    }

    let rate = clip.playback_rate(context.sample_rate, context.bpm);

    let overlap_start = span.block_start.max(span.clip_start);
    let overlap_end = span.block_end.min(span.clip_end);
    let buffer_offset = (overlap_start - span.block_start) as usize;
    let count = (overlap_end - overlap_start).max(0) as usize;

    let offset_frames = clip.region().offset * (60.0 / context.bpm) * context.sample_rate * rate;
    let read_start = (overlap_start - span.clip_start) as f64 * rate + offset_frames;

    for i in 0..count {
        let position = read_start + i as f64 * rate;
        let index = position as i64;
        if index < 0 {
            continue;
        }
        let index = index as usize;
        if (index + 1) * clip_channels >= samples.len() {
            break;
        }
        let alpha = (position - index as f64) as Sample;

        let out = (buffer_offset + i) * channels;
        let Some(frame) = buffer.get_mut(out..out + channels) else {
            break;
        };
        for (c, sample) in frame.iter_mut().enumerate() {
            let a = index * clip_channels + c % clip_channels;
            let b = a + clip_channels;
            *sample += samples[a] + alpha * (samples[b] - samples[a]);
        }
    }
}

/// Pastel color, with each component in `100..=255`.
fn random_color(key: TrackKey) -> u32 {
    let bits = RandomState::new().hash_one(key.id());
    let component = |shift: u32| 100 + ((bits >> shift) & 0xFF) as u32 % 156;
    let (r, g, b) = (component(0), component(8), component(16));
    (0xFF << 24) | (b << 16) | (g << 8) | r
}
