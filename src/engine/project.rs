//! The track graph, together with the transport it plays along.

mod graph;
mod render;

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use render::{RenderError, RenderSettings, RENDER_BLOCK_SIZE};

use self::graph::GraphBuffers;
use super::components::{Track, TrackKey};
use super::persist::{self, LineReader};
use super::processor::{MidiMessage, ProcessorRegistry};
use super::transport::{Transport, TransportState};
use super::utils::key_generator::{KeyGenerator, OverflowError};
use super::Sample;

/// Written to the `VERSION` line of saved projects.
pub const PROJECT_VERSION: u32 = 1;

#[derive(Debug, Error)]
#[error("No track at index {index}")]
pub struct InvalidTrackError {
    pub index: usize,
}

#[derive(Debug, Error)]
pub enum ProjectFileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Too many tracks or clips")]
    Overflow(#[from] OverflowError),
}

/// A whole project: transport, tracks, master track and processor registry.
///
/// The transport is lock-free. Everything else sits behind one mutex,
/// which the audio callback also takes for every block.
#[derive(Debug)]
pub struct Project {
    transport: Arc<Transport>,
    state: Mutex<ProjectState>,
}
impl Project {
    pub fn new() -> Self {
        Self::with_registry(ProcessorRegistry::with_builtins())
    }

    /// A project that loads processors through the given registry.
    pub fn with_registry(registry: ProcessorRegistry) -> Self {
        let transport = Arc::new(Transport::new());
        Self {
            state: Mutex::new(ProjectState::new(Arc::clone(&transport), registry)),
            transport,
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Lock the project for a series of edits.
    ///
    /// The audio callback is blocked for as long as the guard is held.
    pub fn lock(&self) -> MutexGuard<'_, ProjectState> {
        self.state.lock()
    }

    /// Run `f` with the project locked.
    pub fn edit<R>(&self, f: impl FnOnce(&mut ProjectState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn create_track(&self) -> Result<TrackKey, OverflowError> {
        self.lock().create_track()
    }

    pub fn remove_track(&self, index: usize) -> Result<Track, InvalidTrackError> {
        self.lock().remove_track(index)
    }

    pub fn move_track(&self, src: usize, dst: usize, as_child: bool) -> Result<(), InvalidTrackError> {
        self.lock().move_track(src, dst, as_child)
    }

    pub fn group_tracks(&self, indices: &[usize]) -> Result<Option<TrackKey>, OverflowError> {
        self.lock().group_tracks(indices)
    }

    pub fn ungroup_track(&self, index: usize) -> Result<bool, InvalidTrackError> {
        self.lock().ungroup_track(index)
    }

    pub fn set_selected_track(&self, index: Option<usize>) {
        self.lock().set_selected_track(index);
    }

    pub fn set_bpm(&self, bpm: f64) {
        self.lock().set_bpm(bpm);
    }

    pub fn prepare_to_play(&self, sample_rate: f64) {
        self.lock().prepare_to_play(sample_rate);
    }

    /// See [`ProjectState::process_block`].
    pub fn process_block(
        &self,
        output: &mut [Sample],
        frames: usize,
        channels: usize,
        live_midi: &[MidiMessage],
    ) {
        self.lock().process_block(output, frames, channels, live_midi);
    }

    /// See [`ProjectState::render_audio`].
    pub fn render_audio(&self, path: &Path, settings: &RenderSettings) -> Result<u64, RenderError> {
        self.lock().render_audio(path, settings)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ProjectFileError> {
        let mut out = BufWriter::new(File::create(path)?);
        self.lock().save(&mut out)?;
        out.flush()?;
        log::info!("Saved project to '{}'", path.display());
        Ok(())
    }

    /// Replace the project with the contents of a file.
    ///
    /// If the file can't be read, the project is left as is.
    pub fn load_from_file(&self, path: &Path) -> Result<(), ProjectFileError> {
        let text = fs::read_to_string(path)?;
        self.lock().load(&text)?;
        log::info!("Loaded project from '{}'", path.display());
        Ok(())
    }

    pub fn snapshot(&self) -> ProjectSnapshot {
        self.lock().snapshot()
    }
}
impl Default for Project {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything in a [`Project`] guarded by its mutex.
#[derive(Debug)]
pub struct ProjectState {
    transport: Arc<Transport>,
    registry: ProcessorRegistry,

    tracks: Vec<Track>,
    master: Track,
    keys: KeyGenerator<TrackKey>,
    selected: Option<usize>,

    was_playing: bool,
    buffers: GraphBuffers,
}
impl ProjectState {
    fn new(transport: Arc<Transport>, registry: ProcessorRegistry) -> Self {
        let mut keys = KeyGenerator::new();
        let master_key = match keys.next() {
            Ok(key) => key,
            Err(_) => unreachable!("A fresh key generator has keys left"),
        };
        Self {
            transport,
            registry,

            tracks: Vec::new(),
            master: Track::new(master_key, "Master"),
            keys,
            selected: Some(0),

            was_playing: false,
            buffers: GraphBuffers::default(),
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }
    pub fn registry_mut(&mut self) -> &mut ProcessorRegistry {
        &mut self.registry
    }

    /// All tracks except the master, in display order.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }
    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }
    pub fn track_mut(&mut self, index: usize) -> Option<&mut Track> {
        self.tracks.get_mut(index)
    }
    pub fn track_index(&self, key: TrackKey) -> Option<usize> {
        self.tracks.iter().position(|t| t.key() == key)
    }

    pub fn master(&self) -> &Track {
        &self.master
    }
    pub fn master_mut(&mut self) -> &mut Track {
        &mut self.master
    }

    /// The track receiving live MIDI, if it has an instrument.
    pub fn selected_track(&self) -> Option<usize> {
        self.selected
    }
    pub fn set_selected_track(&mut self, index: Option<usize>) {
        self.selected = index;
    }

    /// Append an empty track named after its position.
    pub fn create_track(&mut self) -> Result<TrackKey, OverflowError> {
        let key = self.keys.next()?;
        let mut track = Track::new(key, &format!("Track {}", self.tracks.len() + 1));
        let sample_rate = self.transport.sample_rate();
        if sample_rate > 0.0 {
            track.prepare_to_play(sample_rate);
        }
        self.tracks.push(track);
        Ok(key)
    }

    /// Remove a track. Its children become root tracks.
    pub fn remove_track(&mut self, index: usize) -> Result<Track, InvalidTrackError> {
        if index >= self.tracks.len() {
            return Err(InvalidTrackError { index });
        }
        let track = self.tracks.remove(index);
        self.orphan_children(track.key());
        self.free_key(track.key());
        if track.parent().is_some() {
            self.remove_empty_groups();
        }
        Ok(track)
    }

    /// Move the track at `src` to stand before the track currently at `dst`.
    ///
    /// With `as_child`, it is instead placed right after the track at `dst` and becomes its child,
    /// turning that track into a group. If `dst` is out of range, it goes last as a root track.
    /// A track can't become a child of itself or of its own descendants, in which case it is
    /// moved as a root track.
    pub fn move_track(&mut self, src: usize, dst: usize, as_child: bool) -> Result<(), InvalidTrackError> {
        if src >= self.tracks.len() {
            return Err(InvalidTrackError { index: src });
        }
        let mut track = self.tracks.remove(src);
        let dst = if dst > src { dst - 1 } else { dst };

        let parent = if as_child {
            self.tracks.get(dst).map(Track::key)
        } else {
            None
        };
        match parent {
            Some(parent) if !self.has_ancestor(parent, track.key()) => {
                if let Some(p) = self.tracks.get_mut(dst) {
                    p.set_group(true);
                }
                track.set_parent(Some(parent));
                self.tracks.insert(dst + 1, track);
            }
            _ if as_child && dst >= self.tracks.len() => {
                track.set_parent(None);
                self.tracks.push(track);
            }
            _ => {
                track.set_parent(None);
                let dst = dst.min(self.tracks.len());
                self.tracks.insert(dst, track);
            }
        }

        self.remove_empty_groups();
        Ok(())
    }

    /// Put the given tracks in a new group, placed where the first of them was.
    ///
    /// Out of range indices are ignored. Returns the key of the new group,
    /// or `None` if there was nothing to group.
    pub fn group_tracks(&mut self, indices: &[usize]) -> Result<Option<TrackKey>, OverflowError> {
        let mut indices: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|&i| i < self.tracks.len())
            .collect();
        indices.sort_unstable();
        indices.dedup();
        let Some(&first) = indices.first() else {
            return Ok(None);
        };

        let key = self.keys.next()?;
        let mut group = Track::new(key, "Group");
        group.set_group(true);
        let sample_rate = self.transport.sample_rate();
        if sample_rate > 0.0 {
            group.prepare_to_play(sample_rate);
        }

        let mut members: Vec<Track> = indices
            .iter()
            .rev()
            .map(|&i| self.tracks.remove(i))
            .collect();
        members.reverse();

        let at = first.min(self.tracks.len());
        self.tracks.insert(at, group);
        for (offset, mut member) in members.into_iter().enumerate() {
            member.set_parent(Some(key));
            self.tracks.insert(at + 1 + offset, member);
        }
        Ok(Some(key))
    }

    /// Dissolve a group, making its children root tracks.
    ///
    /// Returns `false` if the track isn't a group.
    pub fn ungroup_track(&mut self, index: usize) -> Result<bool, InvalidTrackError> {
        let track = self.tracks.get(index).ok_or(InvalidTrackError { index })?;
        if !track.is_group() {
            return Ok(false);
        }
        let key = track.key();
        self.orphan_children(key);
        self.tracks.remove(index);
        self.free_key(key);
        Ok(true)
    }

    /// Change tempo, keeping the playhead and loop range at the same beat,
    /// and shorten audio clips that would now outlast their material.
    ///
    /// Tempos that aren't positive are ignored.
    pub fn set_bpm(&mut self, bpm: f64) {
        if !(bpm > 0.0 && bpm.is_finite()) {
            return;
        }
        let transport = &self.transport;
        let ratio = transport.bpm() / bpm;
        let rescale = |sample: i64| (sample as f64 * ratio).round() as i64;
        transport.set_position(rescale(transport.position()));
        transport.set_loop_range(rescale(transport.loop_start()), rescale(transport.loop_end()));
        transport.set_bpm(bpm);

        for track in &mut self.tracks {
            track.validate_audio_durations(bpm);
        }
        self.master.validate_audio_durations(bpm);
    }

    pub fn prepare_to_play(&mut self, sample_rate: f64) {
        self.transport.set_sample_rate(sample_rate);
        for track in &mut self.tracks {
            track.prepare_to_play(sample_rate);
        }
        self.master.prepare_to_play(sample_rate);
        self.was_playing = false;
    }

    fn reset_tracks(&mut self) {
        for track in &mut self.tracks {
            track.reset();
        }
        self.master.reset();
    }

    fn orphan_children(&mut self, parent: TrackKey) {
        for track in &mut self.tracks {
            if track.parent() == Some(parent) {
                track.set_parent(None);
            }
        }
    }

    fn free_key(&mut self, key: TrackKey) {
        if let Err(e) = self.keys.free(key) {
            log::warn!("{e}");
        }
    }

    fn has_children(&self, key: TrackKey) -> bool {
        self.tracks.iter().any(|t| t.parent() == Some(key))
    }

    /// Whether `ancestor` is `key` itself, or found by following parents up from `key`.
    fn has_ancestor(&self, key: TrackKey, ancestor: TrackKey) -> bool {
        let mut current = Some(key);
        // Bounded, in case a loaded file contained a cycle
        for _ in 0..=self.tracks.len() {
            let Some(k) = current else {
                return false;
            };
            if k == ancestor {
                return true;
            }
            current = self
                .track_index(k)
                .and_then(|i| self.tracks[i].parent());
        }
        false
    }

    /// Remove groups without children, until none are left.
    fn remove_empty_groups(&mut self) {
        loop {
            let empty: Vec<TrackKey> = self
                .tracks
                .iter()
                .filter(|t| t.is_group() && !self.has_children(t.key()))
                .map(Track::key)
                .collect();
            if empty.is_empty() {
                break;
            }
            self.tracks.retain(|t| !empty.contains(&t.key()));
            for key in empty {
                self.free_key(key);
            }
        }
    }

    // Persistence

    pub fn save(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "PROJECT_BEGIN")?;
        writeln!(out, "VERSION {PROJECT_VERSION}")?;
        writeln!(out, "BPM {}", self.transport.bpm())?;

        for track in &self.tracks {
            track.save(out)?;
            if let Some(parent) = track.parent().and_then(|p| self.track_index(p)) {
                writeln!(out, "PARENT_IDX {parent}")?;
            }
        }

        writeln!(out, "MASTER_BEGIN")?;
        self.master.save(out)?;
        writeln!(out, "MASTER_END")?;

        writeln!(out, "PROJECT_END")
    }

    /// Replace every track with those in `text`.
    ///
    /// Unknown lines are skipped. Parent links are resolved once every track is read.
    pub fn load(&mut self, text: &str) -> Result<(), OverflowError> {
        let mut reader = LineReader::new(text);
        let mut keys = KeyGenerator::new();
        let master_key = keys.next()?;

        let mut tracks = Vec::new();
        let mut parents: Vec<Option<i64>> = Vec::new();
        let mut master = None;

        while let Some(line) = reader.next_line() {
            if line == "PROJECT_END" {
                break;
            }
            let (tag, rest) = persist::split_tag(line);
            match tag {
                "VERSION" => {
                    let version = persist::parse_first::<u32>(rest).unwrap_or(0);
                    if version > PROJECT_VERSION {
                        log::warn!("Project version {version} is newer than {PROJECT_VERSION}");
                    }
                }
                "BPM" => {
                    if let Some(bpm) = persist::parse_first(rest) {
                        self.transport.set_bpm(bpm);
                    }
                }
                "TRACK_BEGIN" => {
                    let mut track = Track::new(keys.next()?, "Track");
                    parents.push(track.load(&mut reader, &self.registry));
                    tracks.push(track);
                }
                "PARENT_IDX" => {
                    if let Some(last) = parents.last_mut() {
                        *last = persist::parse_first(rest);
                    }
                }
                "MASTER_BEGIN" => {
                    let mut track = Track::new(master_key, "Master");
                    track.load(&mut reader, &self.registry);
                    // MASTER_END
                    reader.next_line();
                    master = Some(track);
                }
                _ => {}
            }
        }

        let keys_by_index: Vec<TrackKey> = tracks.iter().map(Track::key).collect();
        for (index, (track, parent)) in tracks.iter_mut().zip(parents).enumerate() {
            let parent = parent
                .and_then(|p| usize::try_from(p).ok())
                .filter(|&p| p != index)
                .and_then(|p| keys_by_index.get(p).copied());
            track.set_parent(parent);
            track.rebind_automation();
        }

        let mut master = master.unwrap_or_else(|| Track::new(master_key, "Master"));
        master.rebind_automation();

        let sample_rate = self.transport.sample_rate();
        if sample_rate > 0.0 {
            for track in &mut tracks {
                track.prepare_to_play(sample_rate);
            }
            master.prepare_to_play(sample_rate);
        }

        self.tracks = tracks;
        self.master = master;
        self.keys = keys;
        Ok(())
    }

    pub fn snapshot(&self) -> ProjectSnapshot {
        ProjectSnapshot {
            transport: self.transport.state(),
            selected_track: self.selected,
            master: self.track_snapshot(&self.master),
            tracks: self
                .tracks
                .iter()
                .map(|t| self.track_snapshot(t))
                .collect(),
        }
    }

    fn track_snapshot(&self, track: &Track) -> TrackSnapshot {
        TrackSnapshot {
            name: track.name().to_owned(),
            color: track.color(),
            volume_db: track.volume_db(),
            pan: track.pan(),
            muted: track.is_muted(),
            soloed: track.is_soloed(),
            group: track.is_group(),
            parent: track.parent().and_then(|p| self.track_index(p)),
            clips: track.clips().len(),
            processors: track
                .processors()
                .iter()
                .map(|slot| slot.processor().processor_id().to_owned())
                .collect(),
            peaks: track.meter().read(),
        }
    }
}

/// Plain copy of the project's state, for display or inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub transport: TransportState,
    pub selected_track: Option<usize>,
    pub master: TrackSnapshot,
    pub tracks: Vec<TrackSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSnapshot {
    pub name: String,
    pub color: u32,
    pub volume_db: f32,
    pub pan: f32,
    pub muted: bool,
    pub soloed: bool,
    pub group: bool,
    /// Index of the parent track.
    pub parent: Option<usize>,
    pub clips: usize,
    /// Processor ids, in chain order.
    pub processors: Vec<String>,
    pub peaks: [f32; 2],
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_with(count: usize) -> Project {
        let project = Project::new();
        for _ in 0..count {
            project.create_track().unwrap();
        }
        project
    }

    fn names(project: &Project) -> Vec<String> {
        project
            .lock()
            .tracks()
            .iter()
            .map(|t| t.name().to_owned())
            .collect()
    }

    fn parent_name(state: &ProjectState, index: usize) -> Option<String> {
        let parent = state.track(index)?.parent()?;
        Some(state.track(state.track_index(parent)?)?.name().to_owned())
    }

    #[test]
    fn tracks_are_named_by_count() {
        let project = project_with(2);
        assert_eq!(names(&project), vec!["Track 1", "Track 2"]);
        project.remove_track(0).unwrap();
        project.create_track().unwrap();
        assert_eq!(names(&project), vec!["Track 2", "Track 2"]);
    }

    #[test]
    fn remove_out_of_range() {
        let project = project_with(1);
        assert!(project.remove_track(1).is_err());
    }

    #[test]
    fn move_before() {
        let project = project_with(3);
        project.move_track(0, 2, false).unwrap();
        assert_eq!(names(&project), vec!["Track 2", "Track 1", "Track 3"]);
        project.move_track(2, 0, false).unwrap();
        assert_eq!(names(&project), vec!["Track 3", "Track 2", "Track 1"]);
        project.move_track(0, 99, false).unwrap();
        assert_eq!(names(&project), vec!["Track 2", "Track 1", "Track 3"]);
    }

    #[test]
    fn move_as_child_makes_group() {
        let project = project_with(3);
        project.move_track(2, 0, true).unwrap();

        let state = project.lock();
        let names: Vec<&str> = state.tracks().iter().map(Track::name).collect();
        assert_eq!(names, vec!["Track 1", "Track 3", "Track 2"]);
        assert!(state.track(0).unwrap().is_group());
        assert_eq!(parent_name(&state, 1).as_deref(), Some("Track 1"));
    }

    #[test]
    fn moving_last_child_out_removes_group() {
        let project = project_with(2);
        project.move_track(1, 0, true).unwrap();
        project.move_track(1, 0, false).unwrap();
        assert_eq!(names(&project), vec!["Track 2"]);
    }

    #[test]
    fn nested_empty_groups_are_removed() {
        let project = project_with(3);
        // Track 3 under Track 2 under Track 1
        project.move_track(1, 0, true).unwrap();
        project.move_track(2, 1, true).unwrap();
        assert_eq!(names(&project), vec!["Track 1", "Track 2", "Track 3"]);

        project.move_track(2, 0, false).unwrap();
        assert_eq!(names(&project), vec!["Track 3"]);
    }

    #[test]
    fn refuses_to_parent_under_descendant() {
        let project = project_with(2);
        project.move_track(1, 0, true).unwrap();
        // Track 1 into its own child, Track 2
        project.move_track(0, 1, true).unwrap();

        let state = project.lock();
        assert_eq!(state.track(0).unwrap().name(), "Track 1");
        assert_eq!(state.track(0).unwrap().parent(), None);
        assert_eq!(parent_name(&state, 1).as_deref(), Some("Track 1"));
    }

    #[test]
    fn as_child_past_end_goes_last() {
        let project = project_with(2);
        project.move_track(0, 10, true).unwrap();
        assert_eq!(names(&project), vec!["Track 2", "Track 1"]);
    }

    #[test]
    fn group_and_ungroup() {
        let project = project_with(4);
        let group = project.group_tracks(&[3, 1, 1, 99]).unwrap().unwrap();

        {
            let state = project.lock();
            let names: Vec<&str> = state.tracks().iter().map(Track::name).collect();
            assert_eq!(names, vec!["Track 1", "Group", "Track 2", "Track 4", "Track 3"]);
            assert_eq!(state.track_index(group), Some(1));
            assert_eq!(state.track(2).unwrap().parent(), Some(group));
            assert_eq!(state.track(3).unwrap().parent(), Some(group));
            assert_eq!(state.track(4).unwrap().parent(), None);
        }

        assert!(!project.ungroup_track(0).unwrap());
        assert!(project.ungroup_track(1).unwrap());
        let state = project.lock();
        assert_eq!(state.tracks().len(), 4);
        assert!(state.tracks().iter().all(|t| t.parent().is_none()));
    }

    #[test]
    fn grouping_nothing() {
        let project = project_with(1);
        assert_eq!(project.group_tracks(&[4]).unwrap(), None);
        assert_eq!(project.group_tracks(&[]).unwrap(), None);
    }

    #[test]
    fn removing_group_orphans_children() {
        let project = project_with(2);
        project.group_tracks(&[0, 1]).unwrap();
        project.remove_track(0).unwrap();
        let state = project.lock();
        assert_eq!(state.tracks().len(), 2);
        assert!(state.tracks().iter().all(|t| t.parent().is_none()));
    }

    #[test]
    fn removing_last_child_removes_group() {
        let project = project_with(1);
        project.group_tracks(&[0]).unwrap();
        project.remove_track(1).unwrap();
        assert!(project.lock().tracks().is_empty());
    }

    #[test]
    fn set_bpm_keeps_beat() {
        let project = Project::new();
        project.transport().set_position(48_000);
        project.set_bpm(60.0);
        assert_eq!(project.transport().position(), 96_000);
        assert_eq!(project.transport().bpm(), 60.0);
    }

    #[test]
    fn set_bpm_rescales_loop_range() {
        let project = Project::new();
        let transport = project.transport();
        transport.set_loop_range(24_000, 96_000);
        project.set_bpm(90.0);
        assert_eq!((transport.loop_start(), transport.loop_end()), (32_000, 128_000));

        project.set_bpm(-1.0);
        assert_eq!(transport.bpm(), 90.0);
        assert_eq!(transport.loop_end(), 128_000);
    }

    #[test]
    fn prepare_sets_sample_rate() {
        let project = project_with(1);
        project.prepare_to_play(44_100.0);
        assert_eq!(project.transport().sample_rate(), 44_100.0);
    }

    #[test]
    fn snapshot_serializes() {
        let project = project_with(2);
        project.move_track(1, 0, true).unwrap();
        let snapshot = project.snapshot();
        assert_eq!(snapshot.tracks[1].parent, Some(0));
        assert!(snapshot.tracks[0].group);
        assert_eq!(snapshot.master.name, "Master");

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: ProjectSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
