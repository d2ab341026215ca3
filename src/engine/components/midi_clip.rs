use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::clip::ClipRegion;
use crate::engine::import::{self, ImportError};
use crate::engine::persist::{self, LineReader};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MidiNote {
    pub note: u8,
    pub velocity: u8,
    /// Relative to the start of the clip's content.
    pub start_beat: f64,
    pub duration_beats: f64,
}

/// Note storage, which may be shared between linked clips.
#[derive(Debug, Clone, Default, PartialEq)]
struct MidiSequence {
    notes: Vec<MidiNote>,
}

/// A clip triggering notes on the track's processors.
///
/// Cloning a clip deep-copies its notes.
/// Use [`MidiClip::linked_copy`] to get a second clip sharing the same notes.
#[derive(Debug)]
pub struct MidiClip {
    region: ClipRegion,
    sequence: Arc<RwLock<MidiSequence>>,
}
impl Clone for MidiClip {
    fn clone(&self) -> Self {
        Self {
            region: self.region.clone(),
            sequence: Arc::new(RwLock::new(self.sequence.read().clone())),
        }
    }
}
impl Default for MidiClip {
    fn default() -> Self {
        Self::new()
    }
}
impl MidiClip {
    pub fn new() -> Self {
        Self {
            region: ClipRegion::new("MIDI Clip"),
            sequence: Arc::new(RwLock::new(MidiSequence::default())),
        }
    }

    pub fn with_notes(notes: Vec<MidiNote>) -> Self {
        let clip = Self::new();
        clip.sequence.write().notes = notes;
        clip
    }

    pub fn region(&self) -> &ClipRegion {
        &self.region
    }
    pub fn region_mut(&mut self) -> &mut ClipRegion {
        &mut self.region
    }

    /// A copy of the notes.
    pub fn notes(&self) -> Vec<MidiNote> {
        self.sequence.read().notes.clone()
    }

    pub fn note_count(&self) -> usize {
        self.sequence.read().notes.len()
    }

    /// Run `f` on the notes without copying them.
    pub fn read_notes<R>(&self, f: impl FnOnce(&[MidiNote]) -> R) -> R {
        f(&self.sequence.read().notes)
    }

    /// Edit the notes. Linked clips see the change as well.
    pub fn edit_notes<R>(&self, f: impl FnOnce(&mut Vec<MidiNote>) -> R) -> R {
        f(&mut self.sequence.write().notes)
    }

    pub fn add_note(&mut self, note: MidiNote) {
        self.sequence.write().notes.push(note);
    }

    /// Remove every note. Linked clips are cleared as well.
    pub fn clear_notes(&mut self) {
        self.sequence.write().notes.clear();
    }

    /// A new clip with the same region, sharing this clip's notes.
    pub fn linked_copy(&self) -> Self {
        Self {
            region: self.region.clone(),
            sequence: Arc::clone(&self.sequence),
        }
    }

    pub fn is_linked_to(&self, other: &MidiClip) -> bool {
        Arc::ptr_eq(&self.sequence, &other.sequence)
    }

    /// Whether any other clip shares this clip's notes.
    pub fn is_linked(&self) -> bool {
        Arc::strong_count(&self.sequence) > 1
    }

    /// Break any link, giving this clip its own copy of the notes.
    pub fn make_unique(&mut self) {
        let copy = self.sequence.read().clone();
        self.sequence = Arc::new(RwLock::new(copy));
        self.region.name.push_str(" (Unique)");
    }

    /// Replace the notes with those of a Standard MIDI File, and fit the duration to them.
    ///
    /// On failure the clip is left untouched.
    pub fn load_from_file(&mut self, path: &Path) -> Result<(), ImportError> {
        let contents = import::read_smf(path)?;
        log::info!(
            "Loaded {} notes from '{}'",
            contents.notes.len(),
            path.display()
        );
        self.sequence.write().notes = contents.notes;
        self.region.duration = contents.duration_beats;
        Ok(())
    }

    pub(crate) fn save(&self, out: &mut dyn Write) -> io::Result<()> {
        self.region.save(out)?;
        for n in &self.sequence.read().notes {
            writeln!(
                out,
                "NOTE {} {} {} {}",
                n.note, n.velocity, n.start_beat, n.duration_beats
            )?;
        }
        Ok(())
    }

    pub(crate) fn load(reader: &mut LineReader<'_>) -> Self {
        let mut clip = Self::new();
        let mut notes = Vec::new();
        while let Some(line) = reader.next_line() {
            if line == "CLIP_END" {
                break;
            }
            let (tag, rest) = persist::split_tag(line);
            if clip.region.parse_line(tag, line, rest) {
                continue;
            }
            if tag == "NOTE" {
                if let Some(note) = parse_note(rest) {
                    notes.push(note);
                }
            }
        }
        clip.sequence.write().notes = notes;
        clip
    }
}

fn parse_note(rest: &str) -> Option<MidiNote> {
    let mut values = rest.split_whitespace();
    Some(MidiNote {
        note: values.next()?.parse().ok()?,
        velocity: values.next()?.parse().ok()?,
        start_beat: values.next()?.parse().ok()?,
        duration_beats: values.next()?.parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(note: u8, start_beat: f64) -> MidiNote {
        MidiNote {
            note,
            velocity: 100,
            start_beat,
            duration_beats: 1.0,
        }
    }

    #[test]
    fn clone_is_deep() {
        let mut a = MidiClip::with_notes(vec![note(60, 0.0)]);
        let b = a.clone();
        a.add_note(note(62, 1.0));
        assert_eq!(a.note_count(), 2);
        assert_eq!(b.note_count(), 1);
        assert!(!a.is_linked_to(&b));
    }

    #[test]
    fn linked_copy_shares_notes() {
        let mut a = MidiClip::with_notes(vec![note(60, 0.0)]);
        let b = a.linked_copy();
        a.add_note(note(62, 1.0));
        assert_eq!(b.note_count(), 2);
        assert!(a.is_linked_to(&b));
        assert!(b.is_linked());
    }

    #[test]
    fn make_unique_breaks_link() {
        let a = MidiClip::with_notes(vec![note(60, 0.0)]);
        let mut b = a.linked_copy();
        b.make_unique();
        b.add_note(note(64, 2.0));
        assert_eq!(a.note_count(), 1);
        assert_eq!(b.note_count(), 2);
        assert!(!a.is_linked());
        assert_eq!(b.region().name, "MIDI Clip (Unique)");
    }

    #[test]
    fn save_then_load() {
        let mut clip = MidiClip::with_notes(vec![note(60, 0.0), note(67, 1.5)]);
        clip.region_mut().name = "Riff".to_owned();
        clip.region_mut().start_beat = 8.0;
        clip.region_mut().duration = 2.0;
        clip.region_mut().offset = 0.5;

        let mut out = Vec::new();
        clip.save(&mut out).unwrap();
        out.extend_from_slice(b"CLIP_END\n");
        let text = String::from_utf8(out).unwrap();

        let loaded = MidiClip::load(&mut LineReader::new(&text));
        assert_eq!(loaded.region(), clip.region());
        assert_eq!(loaded.notes(), clip.notes());
    }

    #[test]
    fn malformed_note_lines_are_skipped() {
        let text = "NOTE 60 100\nNOTE 61 90 0 1\nCLIP_END\n";
        let loaded = MidiClip::load(&mut LineReader::new(text));
        assert_eq!(loaded.notes(), vec![MidiNote {
            note: 61,
            velocity: 90,
            start_beat: 0.0,
            duration_beats: 1.0
        }]);
    }
}
