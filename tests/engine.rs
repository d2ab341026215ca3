mod utils;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mixgraph::components::TestTone;
use mixgraph::processor::{NOTE_OFF, NOTE_ON};
use mixgraph::{Engine, Project};

/// Spin until `condition` holds, failing after a few seconds.
fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "Timed out");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn create_dummy_engine() {
    let engine = Engine::dummy(Arc::new(Project::new()));
    assert!(engine.config().is_none());
}

#[test]
fn stopped_project_stays_put() {
    let project = Arc::new(Project::new());
    let engine = Engine::dummy(Arc::clone(&project));
    thread::sleep(Duration::from_millis(20));
    drop(engine);
    assert_eq!(project.transport().position(), 0);
}

#[test]
fn playing_project_advances() {
    let project = Arc::new(Project::new());
    let engine = Engine::dummy(Arc::clone(&project));
    project.transport().play();
    wait_for(|| project.transport().position() > 10_000);

    project.transport().stop();
    drop(engine);
    assert_eq!(project.transport().position(), 0);
}

#[test]
fn edits_while_playing() {
    let project = Arc::new(Project::new());
    let engine = Engine::dummy(Arc::clone(&project));
    project.transport().play();

    for _ in 0..20 {
        project.create_track().unwrap();
    }
    project.group_tracks(&[0, 1, 2]).unwrap();
    project.move_track(5, 0, true).unwrap();
    project.remove_track(3).unwrap();
    project.set_bpm(90.0);

    wait_for(|| project.transport().position() > 4096);
    drop(engine);
    assert_eq!(project.lock().tracks().len(), 20);
}

#[test]
fn live_notes_reach_selected_track() {
    let project = Arc::new(Project::new());
    project.create_track().unwrap();
    project.create_track().unwrap();
    project.edit(|state| {
        state
            .track_mut(1)
            .unwrap()
            .add_processor(Box::new(TestTone::new()));
    });
    project.set_selected_track(Some(1));

    let engine = Engine::dummy(Arc::clone(&project));
    engine.send_midi_event(NOTE_ON, 69, 127);
    wait_for(|| project.snapshot().tracks[1].peaks[0] > 0.1);
    engine.send_midi_event(NOTE_OFF, 69, 0);
    drop(engine);

    assert_eq!(project.snapshot().tracks[0].peaks, [0.0, 0.0]);
}
