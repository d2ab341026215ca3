pub mod audio_clip;
pub mod audio_meter;
pub mod automation;
pub mod clip;
pub mod midi_clip;
pub mod test_tone;
pub mod track;
pub mod utility;

pub use audio_clip::{AudioClip, WarpMode};
pub use audio_meter::{PeakMeter, PeakMeterReader};
pub use automation::{AutomationCurve, AutomationPoint};
pub use clip::{Clip, ClipKey, ClipList, ClipRegion, OverlapReport};
pub use midi_clip::{MidiClip, MidiNote};
pub use test_tone::TestTone;
pub use track::{ParameterId, Track, TrackKey};
pub use utility::Utility;
