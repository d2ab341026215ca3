use std::collections::HashMap;
use std::fs;
use std::path::Path;

use super::ImportError;
use crate::engine::components::MidiNote;

/// Velocity given to every note read from a file.
const IMPORTED_VELOCITY: u8 = 100;
/// Clips shorter than a beat get this duration instead.
const FALLBACK_DURATION: f64 = 4.0;

/// Notes read from a Standard MIDI File, merged across all tracks.
#[derive(Debug, Clone, PartialEq)]
pub struct SmfContents {
    pub notes: Vec<MidiNote>,
    /// Latest note end in beats, or [`FALLBACK_DURATION`] if that is below one beat.
    pub duration_beats: f64,
}

pub fn read_smf(path: &Path) -> Result<SmfContents, ImportError> {
    let bytes = fs::read(path).map_err(|_| ImportError::FileNotFound(path.to_path_buf()))?;
    parse_smf(&bytes)
}

/// Parse the bytes of a Standard MIDI File.
///
/// Only ticks-per-quarter-note timing is supported.
/// Note-on and note-off pairs are collapsed per channel and key into discrete notes.
pub fn parse_smf(bytes: &[u8]) -> Result<SmfContents, ImportError> {
    let mut reader = ByteReader::new(bytes);

    if reader.take(4) != Some(b"MThd".as_slice()) {
        return Err(ImportError::InvalidFormat("Missing MThd header".to_owned()));
    }
    let header = (|| {
        let size = reader.be32()?;
        let _format = reader.be16()?;
        let track_count = reader.be16()?;
        let division = reader.be16()?;
        if size > 6 {
            reader.skip(size as usize - 6)?;
        }
        Some((track_count, division))
    })();
    let Some((track_count, division)) = header else {
        return Err(ImportError::InvalidFormat("Truncated MThd header".to_owned()));
    };

    if division & 0x8000 != 0 {
        return Err(ImportError::UnsupportedFormat(
            "SMPTE time division".to_owned(),
        ));
    }
    if division == 0 {
        return Err(ImportError::InvalidFormat("Zero time division".to_owned()));
    }
    let ticks_per_beat = f64::from(division);

    let mut notes = Vec::new();
    for _ in 0..track_count {
        let Some(track) = next_track_chunk(&mut reader) else {
            break;
        };
        parse_track(track, ticks_per_beat, &mut notes);
    }

    let end = notes
        .iter()
        .map(|n| n.start_beat + n.duration_beats)
        .fold(0.0, f64::max);
    let duration_beats = if end < 1.0 { FALLBACK_DURATION } else { end };

    Ok(SmfContents {
        notes,
        duration_beats,
    })
}

/// The body of the next `MTrk` chunk, skipping any other chunk type.
fn next_track_chunk<'a>(reader: &mut ByteReader<'a>) -> Option<&'a [u8]> {
    loop {
        let id = reader.take(4)?;
        let size = reader.be32()? as usize;
        if id == b"MTrk" {
            let available = size.min(reader.remaining());
            return reader.take(available);
        }
        reader.skip(size)?;
    }
}

fn parse_track(data: &[u8], ticks_per_beat: f64, notes: &mut Vec<MidiNote>) {
    let mut reader = ByteReader::new(data);
    let mut tick: u64 = 0;
    let mut running_status: u8 = 0;
    let mut active: HashMap<(u8, u8), u64> = HashMap::new();

    while reader.remaining() > 0 {
        let Some(delta) = reader.vlq() else { break };
        tick += u64::from(delta);

        let Some(&byte) = reader.peek() else { break };
        let status = if byte & 0x80 != 0 {
            reader.skip(1);
            running_status = byte;
            byte
        } else if running_status != 0 {
            running_status
        } else {
            // Data byte without any status to apply it to
            break;
        };

        let kind = status & 0xF0;
        let channel = status & 0x0F;
        let parsed = match kind {
            0x80 | 0x90 => reader.take(2).map(|d| {
                let (key, velocity) = (d[0], d[1]);
                if kind == 0x90 && velocity > 0 {
                    active.insert((channel, key), tick);
                } else if let Some(start) = active.remove(&(channel, key)) {
                    notes.push(MidiNote {
                        note: key,
                        velocity: IMPORTED_VELOCITY,
                        start_beat: start as f64 / ticks_per_beat,
                        duration_beats: (tick - start) as f64 / ticks_per_beat,
                    });
                }
            }),
            0xA0 | 0xB0 | 0xE0 => reader.skip(2),
            0xC0 | 0xD0 => reader.skip(1),
            _ => match status {
                0xF0 | 0xF7 => reader.vlq().and_then(|len| reader.skip(len as usize)),
                0xFF => {
                    let meta = (|| {
                        let kind = reader.u8()?;
                        let len = reader.vlq()?;
                        reader.skip(len as usize)?;
                        Some(kind)
                    })();
                    match meta {
                        // End of track
                        Some(0x2F) => break,
                        Some(_) => Some(()),
                        None => None,
                    }
                }
                _ => Some(()),
            },
        };

        if parsed.is_none() {
            break;
        }
    }
}

/// Big-endian cursor over a byte slice.
struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
}
impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    fn peek(&self) -> Option<&u8> {
        self.data.get(self.position)
    }

    fn take(&mut self, count: usize) -> Option<&'a [u8]> {
        let end = self.position.checked_add(count)?;
        let slice = self.data.get(self.position..end)?;
        self.position = end;
        Some(slice)
    }

    fn skip(&mut self, count: usize) -> Option<()> {
        self.take(count).map(|_| ())
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn be16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn be32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Variable-length quantity, at most four bytes.
    fn vlq(&mut self) -> Option<u32> {
        let mut value: u32 = 0;
        for _ in 0..4 {
            let byte = self.u8()?;
            value = (value << 7) | u32::from(byte & 0x7F);
            if byte & 0x80 == 0 {
                return Some(value);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smf(division: u16, track: &[u8]) -> Vec<u8> {
        let mut bytes = b"MThd".to_vec();
        bytes.extend_from_slice(&6u32.to_be_bytes());
        bytes.extend_from_slice(&0u16.to_be_bytes());
        bytes.extend_from_slice(&1u16.to_be_bytes());
        bytes.extend_from_slice(&division.to_be_bytes());
        bytes.extend_from_slice(b"MTrk");
        bytes.extend_from_slice(&(track.len() as u32).to_be_bytes());
        bytes.extend_from_slice(track);
        bytes
    }

    #[test]
    fn single_note() {
        // Note on at tick 0, off at tick 960, i.e. two beats at 480 ticks per beat
        let track = [
            0x00, 0x90, 60, 90, //
            0x87, 0x40, 0x80, 60, 0, //
            0x00, 0xFF, 0x2F, 0x00,
        ];
        let contents = parse_smf(&smf(480, &track)).unwrap();
        assert_eq!(
            contents.notes,
            vec![MidiNote {
                note: 60,
                velocity: 100,
                start_beat: 0.0,
                duration_beats: 2.0,
            }]
        );
        assert_eq!(contents.duration_beats, 2.0);
    }

    #[test]
    fn running_status_and_zero_velocity_off() {
        let track = [
            0x00, 0x90, 60, 100, //
            0x60, 64, 100, // running status note on, 96 ticks later
            0x60, 60, 0, // note off via velocity 0
            0x60, 64, 0, //
            0x00, 0xFF, 0x2F, 0x00,
        ];
        let contents = parse_smf(&smf(96, &track)).unwrap();
        assert_eq!(contents.notes.len(), 2);
        assert_eq!(contents.notes[0].note, 60);
        assert_eq!(contents.notes[0].duration_beats, 2.0);
        assert_eq!(contents.notes[1].note, 64);
        assert_eq!(contents.notes[1].start_beat, 1.0);
        assert_eq!(contents.notes[1].duration_beats, 2.0);
    }

    #[test]
    fn skips_meta_sysex_and_controllers() {
        let track = [
            0x00, 0xFF, 0x03, 0x02, b'h', b'i', // track name
            0x00, 0xF0, 0x02, 0x7E, 0xF7, // sysex
            0x00, 0xB0, 7, 100, // controller
            0x00, 0xC0, 5, // program change
            0x00, 0x91, 48, 80, //
            0x60, 0x81, 48, 0, //
            0x00, 0xFF, 0x2F, 0x00, //
            0x00, 0x90, 70, 100, // after end of track, ignored
        ];
        let contents = parse_smf(&smf(96, &track)).unwrap();
        assert_eq!(contents.notes.len(), 1);
        assert_eq!(contents.notes[0].note, 48);
    }

    #[test]
    fn short_content_falls_back_to_four_beats() {
        let track = [0x00, 0x90, 60, 90, 0x30, 0x80, 60, 0];
        let contents = parse_smf(&smf(96, &track)).unwrap();
        assert_eq!(contents.notes[0].duration_beats, 0.5);
        assert_eq!(contents.duration_beats, 4.0);
    }

    #[test]
    fn smpte_division_is_rejected() {
        let result = parse_smf(&smf(0xE728, &[]));
        assert!(matches!(result, Err(ImportError::UnsupportedFormat(_))));
    }

    #[test]
    fn missing_header_is_rejected() {
        assert!(matches!(
            parse_smf(b"RIFF1234"),
            Err(ImportError::InvalidFormat(_))
        ));
    }

    #[test]
    fn foreign_chunks_are_skipped() {
        let mut bytes = b"MThd".to_vec();
        bytes.extend_from_slice(&6u32.to_be_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 1, 0, 96]);
        bytes.extend_from_slice(b"XFIH");
        bytes.extend_from_slice(&3u32.to_be_bytes());
        bytes.extend_from_slice(&[1, 2, 3]);
        let track = [0x00, 0x90, 60, 90, 0x81, 0x40, 0x80, 60, 0];
        bytes.extend_from_slice(b"MTrk");
        bytes.extend_from_slice(&(track.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&track);

        let contents = parse_smf(&bytes).unwrap();
        assert_eq!(contents.notes.len(), 1);
        assert_eq!(contents.notes[0].duration_beats, 2.0);
    }
}
