use std::io::{self, Write};

use super::{AudioClip, MidiClip};
use crate::engine::persist::{self, LineReader};
use crate::engine::utils::key_generator::{key_type, KeyGenerator, OverflowError};

key_type!(pub struct ClipKey(u32));

/// Timeline placement shared by every kind of clip. All values are in beats.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipRegion {
    pub name: String,
    pub start_beat: f64,
    pub duration: f64,
    /// Where in the source material playback begins.
    pub offset: f64,
}
impl ClipRegion {
    pub const DEFAULT_DURATION: f64 = 4.0;

    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            start_beat: 0.0,
            duration: Self::DEFAULT_DURATION,
            offset: 0.0,
        }
    }

    pub fn end_beat(&self) -> f64 {
        self.start_beat + self.duration
    }

    pub(crate) fn save(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "CLIP_NAME \"{}\"", self.name)?;
        writeln!(out, "START {}", self.start_beat)?;
        writeln!(out, "DUR {}", self.duration)?;
        writeln!(out, "OFFSET {}", self.offset)
    }

    /// Apply one line of a clip block, if it holds a region field.
    pub(crate) fn parse_line(&mut self, tag: &str, line: &str, rest: &str) -> bool {
        match tag {
            "CLIP_NAME" => {
                if let Some(name) = persist::quoted(line) {
                    self.name = name.to_owned();
                }
            }
            "START" => {
                if let Some(v) = persist::parse_first(rest) {
                    self.start_beat = v;
                }
            }
            "DUR" => {
                if let Some(v) = persist::parse_first(rest) {
                    self.duration = v;
                }
            }
            "OFFSET" => {
                if let Some(v) = persist::parse_first(rest) {
                    self.offset = v;
                }
            }
            _ => return false,
        }
        true
    }
}

/// A region of audio or MIDI material placed on a track's timeline.
#[derive(Debug, Clone)]
pub enum Clip {
    Audio(AudioClip),
    Midi(MidiClip),
}
impl Clip {
    pub fn region(&self) -> &ClipRegion {
        match self {
            Clip::Audio(clip) => clip.region(),
            Clip::Midi(clip) => clip.region(),
        }
    }
    pub fn region_mut(&mut self) -> &mut ClipRegion {
        match self {
            Clip::Audio(clip) => clip.region_mut(),
            Clip::Midi(clip) => clip.region_mut(),
        }
    }

    pub fn name(&self) -> &str {
        &self.region().name
    }
    pub fn start_beat(&self) -> f64 {
        self.region().start_beat
    }
    pub fn duration(&self) -> f64 {
        self.region().duration
    }
    pub fn offset(&self) -> f64 {
        self.region().offset
    }
    pub fn end_beat(&self) -> f64 {
        self.region().end_beat()
    }

    pub fn set_name(&mut self, name: &str) {
        self.region_mut().name = name.to_owned();
    }
    pub fn set_start_beat(&mut self, beat: f64) {
        self.region_mut().start_beat = beat;
    }
    pub fn set_duration(&mut self, beats: f64) {
        self.region_mut().duration = beats;
    }
    pub fn set_offset(&mut self, beats: f64) {
        self.region_mut().offset = beats;
    }

    pub fn as_audio(&self) -> Option<&AudioClip> {
        match self {
            Clip::Audio(clip) => Some(clip),
            Clip::Midi(_) => None,
        }
    }
    pub fn as_audio_mut(&mut self) -> Option<&mut AudioClip> {
        match self {
            Clip::Audio(clip) => Some(clip),
            Clip::Midi(_) => None,
        }
    }
    pub fn as_midi(&self) -> Option<&MidiClip> {
        match self {
            Clip::Midi(clip) => Some(clip),
            Clip::Audio(_) => None,
        }
    }
    pub fn as_midi_mut(&mut self) -> Option<&mut MidiClip> {
        match self {
            Clip::Midi(clip) => Some(clip),
            Clip::Audio(_) => None,
        }
    }

    /// Tag used in the project format.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Clip::Audio(_) => "AUDIO",
            Clip::Midi(_) => "MIDI",
        }
    }

    pub(crate) fn save(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "CLIP_BEGIN {}", self.type_tag())?;
        match self {
            Clip::Audio(clip) => clip.save(out)?,
            Clip::Midi(clip) => clip.save(out)?,
        }
        writeln!(out, "CLIP_END")
    }

    /// Read the body of a `CLIP_BEGIN <tag>` block, up to and including `CLIP_END`.
    ///
    /// Blocks of unknown type are skipped.
    pub(crate) fn load(tag: &str, reader: &mut LineReader<'_>) -> Option<Clip> {
        match tag {
            "AUDIO" => Some(Clip::Audio(AudioClip::load(reader))),
            "MIDI" => Some(Clip::Midi(MidiClip::load(reader))),
            _ => {
                reader.skip_past("CLIP_END");
                None
            }
        }
    }
}
impl From<AudioClip> for Clip {
    fn from(clip: AudioClip) -> Self {
        Clip::Audio(clip)
    }
}
impl From<MidiClip> for Clip {
    fn from(clip: MidiClip) -> Self {
        Clip::Midi(clip)
    }
}

/// What a call to [`ClipList::resolve_overlaps`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlapReport {
    pub removed: Vec<ClipKey>,
    pub trimmed: Vec<ClipKey>,
    pub added: Vec<ClipKey>,
}
impl OverlapReport {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.trimmed.is_empty() && self.added.is_empty()
    }
}

/// The clips of a single track, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ClipList {
    clips: Vec<(ClipKey, Clip)>,
    keys: KeyGenerator<ClipKey>,
}
impl ClipList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }
    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClipKey, &Clip)> + '_ {
        self.clips.iter().map(|(key, clip)| (*key, clip))
    }

    pub fn keys(&self) -> impl Iterator<Item = ClipKey> + '_ {
        self.clips.iter().map(|(key, _)| *key)
    }

    pub fn get(&self, key: ClipKey) -> Option<&Clip> {
        self.clips.iter().find(|(k, _)| *k == key).map(|(_, c)| c)
    }
    pub fn get_mut(&mut self, key: ClipKey) -> Option<&mut Clip> {
        self.clips.iter_mut().find(|(k, _)| *k == key).map(|(_, c)| c)
    }

    /// Append a clip, without touching any other clip.
    pub fn insert(&mut self, clip: Clip) -> Result<ClipKey, OverflowError> {
        let key = self.keys.next()?;
        self.clips.push((key, clip));
        Ok(key)
    }

    pub fn remove(&mut self, key: ClipKey) -> Option<Clip> {
        let index = self.clips.iter().position(|(k, _)| *k == key)?;
        // The key is known to be in use, since it was found in the list.
        let _ = self.keys.free(key);
        Some(self.clips.remove(index).1)
    }

    /// Latest end beat of any clip, or 0 if empty.
    pub fn latest_end(&self) -> f64 {
        self.clips
            .iter()
            .map(|(_, c)| c.end_beat())
            .fold(0.0, f64::max)
    }

    /// Make room for the `active` clip, by deleting, trimming or splitting every clip it overlaps.
    ///
    /// Clips merely touching the active one are left alone.
    /// Afterwards, no clip overlaps the active one.
    ///
    /// When the active clip sits strictly inside another, that clip keeps its left part
    /// and a copy is added for the right part. The copy's content offset advances by
    /// `active.end - other.start`, the whole span from the other clip's start to where the
    /// right part begins, so the right part plays the same material it did before the split.
    pub fn resolve_overlaps(&mut self, active: ClipKey) -> Result<OverlapReport, OverflowError> {
        let mut report = OverlapReport::default();
        let Some(active_clip) = self.get(active) else {
            return Ok(report);
        };
        let a_start = active_clip.start_beat();
        let a_end = active_clip.end_beat();

        let mut additions = Vec::new();
        for (key, clip) in self.clips.iter_mut() {
            if *key == active {
                continue;
            }

            let b_start = clip.start_beat();
            let b_end = clip.end_beat();
            if !(a_start < b_end && a_end > b_start) {
                continue;
            }

            if a_start <= b_start && a_end >= b_end {
                // Covered entirely
                report.removed.push(*key);
            } else if a_start > b_start && a_end < b_end {
                // Active sits inside, so split into a left and right part
                let consumed = a_end - b_start;
                let mut right = clip.clone();
                right.set_start_beat(a_end);
                right.set_duration(b_end - a_end);
                right.set_offset(clip.offset() + consumed);
                additions.push(right);

                clip.set_duration(a_start - b_start);
                report.trimmed.push(*key);
            } else if b_start < a_start && b_end > a_start {
                // Tail overlapped
                clip.set_duration(a_start - b_start);
                report.trimmed.push(*key);
            } else if b_start >= a_start && b_start < a_end {
                // Head overlapped
                let overlap = a_end - b_start;
                clip.set_start_beat(a_end);
                clip.set_duration(clip.duration() - overlap);
                clip.set_offset(clip.offset() + overlap);
                report.trimmed.push(*key);
            }
        }

        for key in &report.removed {
            self.remove(*key);
        }
        for clip in additions {
            report.added.push(self.insert(clip)?);
        }

        Ok(report)
    }
}
