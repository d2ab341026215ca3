mod utils;

use mixgraph::components::ClipList;
use mixgraph::{Clip, MidiClip, MidiNote, Project, WarpMode};
use utils::clip_from_fn;

fn midi(start: f64, duration: f64) -> MidiClip {
    let mut clip = MidiClip::with_notes(vec![MidiNote {
        note: 64,
        velocity: 90,
        start_beat: 0.5,
        duration_beats: 1.0,
    }]);
    clip.region_mut().start_beat = start;
    clip.region_mut().duration = duration;
    clip
}

fn spans(clips: &ClipList) -> Vec<(f64, f64, f64)> {
    let mut spans: Vec<_> = clips
        .iter()
        .map(|(_, c)| (c.start_beat(), c.duration(), c.offset()))
        .collect();
    spans.sort_by(|a, b| a.0.total_cmp(&b.0));
    spans
}

fn project_with_track() -> Project {
    let project = Project::new();
    project.create_track().unwrap();
    project
}

#[test]
fn inserting_inside_splits() {
    let project = project_with_track();
    let mut state = project.lock();
    let track = state.track_mut(0).unwrap();

    track.add_clip(midi(0.0, 8.0)).unwrap();
    let active = track.add_clip(midi(2.0, 4.0)).unwrap();

    assert_eq!(track.clips().len(), 3);
    assert_eq!(
        spans(track.clips()),
        vec![(0.0, 2.0, 0.0), (2.0, 4.0, 0.0), (6.0, 2.0, 6.0)]
    );
    assert!(track.clip(active).is_some());
}

#[test]
fn split_remainder_owns_its_notes() {
    let project = project_with_track();
    let mut state = project.lock();
    let track = state.track_mut(0).unwrap();

    let original = track.add_clip(midi(0.0, 8.0)).unwrap();
    track.add_clip(midi(2.0, 4.0)).unwrap();

    let remainder = track
        .clips()
        .iter()
        .find(|(_, c)| c.start_beat() == 6.0)
        .map(|(k, _)| k)
        .unwrap();

    let Some(Clip::Midi(left)) = track.clip(original) else {
        panic!("Original clip should still be MIDI");
    };
    let Some(Clip::Midi(right)) = track.clip(remainder) else {
        panic!("Remainder should be MIDI");
    };
    assert!(!right.is_linked_to(left));
    assert_eq!(right.notes(), left.notes());

    right.edit_notes(|notes| notes.clear());
    let Some(Clip::Midi(left)) = track.clip(original) else {
        unreachable!()
    };
    assert_eq!(left.note_count(), 1);
}

#[test]
fn split_remainder_keeps_audio_settings() {
    let project = project_with_track();
    let mut state = project.lock();
    let track = state.track_mut(0).unwrap();

    let mut audio = clip_from_fn(1000, |_| 0.25);
    audio.set_warp_enabled(true);
    audio.set_warp_mode(WarpMode::Complex);
    audio.set_transpose_semitones(3.0);
    audio.region_mut().duration = 8.0;
    track.add_clip(audio).unwrap();
    track.add_clip(midi(2.0, 4.0)).unwrap();

    let (_, remainder) = track
        .clips()
        .iter()
        .find(|(_, c)| c.start_beat() == 6.0)
        .unwrap();
    let remainder = remainder.as_audio().unwrap();
    assert!(remainder.is_warp_enabled());
    assert_eq!(remainder.warp_mode(), WarpMode::Complex);
    assert_eq!(remainder.transpose_semitones(), 3.0);
    assert_eq!(remainder.total_frames(), 1000);
}

#[test]
fn covering_tail_and_head() {
    let project = project_with_track();
    let mut state = project.lock();
    let track = state.track_mut(0).unwrap();

    track.add_clip(midi(0.0, 4.0)).unwrap();
    track.add_clip(midi(6.0, 4.0)).unwrap();
    track.add_clip(midi(12.0, 1.0)).unwrap();
    // Overlaps the tail of the first, the head of the second and covers the third
    track.add_clip(midi(3.0, 4.0)).unwrap();
    track.add_clip(midi(11.0, 3.0)).unwrap();

    assert_eq!(
        spans(track.clips()),
        vec![
            (0.0, 3.0, 0.0),
            (3.0, 4.0, 0.0),
            (7.0, 3.0, 1.0),
            (11.0, 3.0, 0.0)
        ]
    );
}

#[test]
fn resolving_again_changes_nothing() {
    let project = project_with_track();
    let mut state = project.lock();
    let track = state.track_mut(0).unwrap();

    track.add_clip(midi(0.0, 8.0)).unwrap();
    let active = track.add_clip(midi(2.0, 4.0)).unwrap();
    let before = spans(track.clips());

    let report = track.resolve_overlaps(active).unwrap();
    assert!(report.is_empty());
    assert_eq!(spans(track.clips()), before);
}

#[test]
fn touching_clips_stay() {
    let project = project_with_track();
    let mut state = project.lock();
    let track = state.track_mut(0).unwrap();

    track.add_clip(midi(0.0, 4.0)).unwrap();
    track.add_clip(midi(4.0, 4.0)).unwrap();
    assert_eq!(spans(track.clips()), vec![(0.0, 4.0, 0.0), (4.0, 4.0, 0.0)]);
}
