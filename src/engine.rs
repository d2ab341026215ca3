use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use parking_lot::Mutex;

pub mod components;
pub mod config;
pub mod error;
pub mod import;
pub mod persist;
pub mod processor;
pub mod project;
pub mod transport;
mod utils;

use self::config::{Config, InvalidConfigError, SampleFormat};
use self::processor::MidiMessage;
use self::project::Project;
use self::utils::panic_msg;
#[cfg(feature = "record_output")]
use crate::wav_recorder::WavRecorder;

pub type Sample = f32;

/// Every track mixes in stereo, whatever the output device's channel count.
pub const CHANNELS: usize = 2;
/// Frames the callback buffers are allocated for up front.
const MAX_BUFFER_SIZE_DEFAULT: usize = 1056;
/// Sample rate the dummy engine pretends to output at.
const DUMMY_SAMPLE_RATE: u32 = 48_000;

/// The part of the engine living in the audio callback.
struct OutputCallback {
    project: Arc<Project>,
    pending_midi: Arc<Mutex<Vec<MidiMessage>>>,

    channels: usize,
    midi: Vec<MidiMessage>,
    mix: Vec<Sample>,

    #[cfg(feature = "record_output")]
    recorder: Option<WavRecorder>,
}
impl OutputCallback {
    fn new(
        project: Arc<Project>,
        pending_midi: Arc<Mutex<Vec<MidiMessage>>>,
        channels: u16,
        sample_rate: u32,
    ) -> Self {
        project.prepare_to_play(f64::from(sample_rate));

        #[cfg(feature = "record_output")]
        let recorder = match WavRecorder::new(CHANNELS as u16, sample_rate) {
            Ok(recorder) => Some(recorder),
            Err(e) => {
                log::warn!("Not recording output: {e}");
                None
            }
        };

        Self {
            project,
            pending_midi,

            channels: usize::from(channels),
            midi: Vec::with_capacity(64),
            mix: Vec::with_capacity(MAX_BUFFER_SIZE_DEFAULT * CHANNELS),

            #[cfg(feature = "record_output")]
            recorder,
        }
    }

    /// Fill one device buffer.
    fn output<T: cpal::SizedSample + cpal::FromSample<Sample>>(&mut self, data: &mut [T]) {
        if self.channels == 0 {
            return;
        }
        let frames = data.len() / self.channels;

        std::mem::swap(&mut *self.pending_midi.lock(), &mut self.midi);

        self.mix.clear();
        self.mix.resize(frames * CHANNELS, 0.0);
        self.project
            .process_block(&mut self.mix, frames, CHANNELS, &self.midi);
        self.midi.clear();

        #[cfg(feature = "record_output")]
        if let Some(recorder) = &mut self.recorder {
            recorder.record(&self.mix);
        }

        for (frame, mixed) in data
            .chunks_mut(self.channels)
            .zip(self.mix.chunks(CHANNELS))
        {
            for (c, sample) in frame.iter_mut().enumerate() {
                *sample = T::from_sample(mixed[c % CHANNELS].clamp(-1.0, 1.0));
            }
        }
    }
}

/// Plays a [`Project`] live.
///
/// The project stays shared with the caller, who edits it while it plays.
pub struct Engine {
    /// Signal whether the stream should stop.
    stopped: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<()>>,

    config: Option<Config>,
    project: Arc<Project>,
    pending_midi: Arc<Mutex<Vec<MidiMessage>>>,
}
impl Engine {
    /// Start outputting the project with the given config.
    pub fn new(project: Arc<Project>, config: Config) -> Result<Self, InvalidConfigError> {
        let pending_midi = Arc::new(Mutex::new(Vec::with_capacity(64)));
        let (stopped, join_handle) =
            Self::start_stream(&config, Arc::clone(&project), Arc::clone(&pending_midi))?;

        Ok(Self {
            stopped,
            join_handle: Some(join_handle),
            config: Some(config),
            project,
            pending_midi,
        })
    }

    /// Start outputting the project on the default device.
    pub fn with_default_output(project: Arc<Project>) -> Result<Self, InvalidConfigError> {
        Self::new(project, Config::default_output()?)
    }

    fn start_stream(
        config: &Config,
        project: Arc<Project>,
        pending_midi: Arc<Mutex<Vec<MidiMessage>>>,
    ) -> Result<(Arc<AtomicBool>, JoinHandle<()>), InvalidConfigError> {
        let device = config.output_device.clone();
        let output_config = config.output_config.clone();
        let stream_config = output_config.stream_config();

        let create_stream = match output_config.sample_format {
            SampleFormat::I8 => Self::create_stream_of_type::<i8>,
            SampleFormat::I16 => Self::create_stream_of_type::<i16>,
            SampleFormat::I32 => Self::create_stream_of_type::<i32>,
            SampleFormat::I64 => Self::create_stream_of_type::<i64>,
            SampleFormat::U8 => Self::create_stream_of_type::<u8>,
            SampleFormat::U16 => Self::create_stream_of_type::<u16>,
            SampleFormat::U32 => Self::create_stream_of_type::<u32>,
            SampleFormat::U64 => Self::create_stream_of_type::<u64>,
            SampleFormat::F32 => Self::create_stream_of_type::<f32>,
            SampleFormat::F64 => Self::create_stream_of_type::<f64>,
        };

        let callback = OutputCallback::new(
            project,
            pending_midi,
            output_config.channels,
            output_config.sample_rate,
        );

        let (tx, rx) = sync_channel(1);

        let stopped1 = Arc::new(AtomicBool::new(false));
        let stopped2 = Arc::clone(&stopped1);
        let join_handle = thread::spawn(move || {
            // cpal::Stream isn't Send, so it has to live in this thread
            let started = device
                .raw()
                .map_err(InvalidConfigError::from)
                .and_then(|raw| create_stream(&raw, &stream_config, callback))
                .and_then(|stream| {
                    stream
                        .play()
                        .map(|()| stream)
                        .map_err(|e| InvalidConfigError::Stream(e.to_string()))
                });

            let stream = match started {
                Ok(stream) => {
                    // The receiver only gives up after a timeout, nothing to do then
                    let _ = tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            };

            log::info!(
                "Host: {}, Device: {}, Channels: {}, Sample format: {}, Sample rate: {}, Buffer size: {}",
                device.host().name(),
                device.name(),
                output_config.channels,
                output_config.sample_format,
                output_config.sample_rate,
                output_config
                    .buffer_size
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "Default".into()),
            );

            while !stopped2.load(Ordering::Acquire) {
                // Parking can wake up spuriously, hence the flag
                thread::park();
            }

            drop(stream);
            log::info!("Stream terminated");
        });

        match rx.recv_timeout(Duration::from_secs(30)) {
            Ok(Ok(())) => Ok((stopped1, join_handle)),
            Ok(Err(e)) => {
                let _ = join_handle.join();
                Err(e)
            }
            Err(_) => {
                stopped1.store(true, Ordering::Release);
                join_handle.thread().unpark();
                Err(InvalidConfigError::Stream("Timed out".into()))
            }
        }
    }

    /// Create a cpal stream with the given sample type.
    fn create_stream_of_type<T: 'static + cpal::SizedSample + cpal::FromSample<Sample>>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut callback: OutputCallback,
    ) -> Result<cpal::Stream, InvalidConfigError> {
        device
            .build_output_stream(
                config,
                move |data: &mut [T], _info| callback.output(data),
                |err| log::error!("Stream error: {err}"),
                None,
            )
            .map_err(|e| InvalidConfigError::Stream(e.to_string()))
    }

    /// An engine that runs the callback without any audio device.
    ///
    /// Spins as fast as possible, alternating between two buffer sizes.
    /// Useful for integration testing.
    #[doc(hidden)]
    pub fn dummy(project: Arc<Project>) -> Self {
        let pending_midi = Arc::new(Mutex::new(Vec::with_capacity(64)));
        let mut callback = OutputCallback::new(
            Arc::clone(&project),
            Arc::clone(&pending_midi),
            CHANNELS as u16,
            DUMMY_SAMPLE_RATE,
        );

        let mut data = vec![0.0_f32; 1024 * CHANNELS];

        let stopped1 = Arc::new(AtomicBool::new(false));
        let stopped2 = Arc::clone(&stopped1);
        let join_handle = thread::spawn(move || {
            while !stopped2.load(Ordering::Acquire) {
                callback.output(&mut data[..]);
                callback.output(&mut data[..512 * CHANNELS]);
                thread::yield_now();
            }
        });

        Self {
            stopped: stopped1,
            join_handle: Some(join_handle),
            config: None,
            project,
            pending_midi,
        }
    }

    /// Stops the stream if it is running.
    fn stop_stream(&mut self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(h) = self.join_handle.take() {
            h.thread().unpark();
            if let Err(e) = h.join() {
                log::error!("Stream thread panicked: {}", panic_msg(&*e));
            }
        }
    }

    /// The config in use, or `None` for a dummy engine.
    pub fn config(&self) -> Option<&Config> {
        self.config.as_ref()
    }

    pub fn project(&self) -> &Arc<Project> {
        &self.project
    }

    /// Queue a MIDI event for the selected track, delivered at the start of the next block.
    pub fn send_midi_event(&self, status: u8, note: u8, velocity: u8) {
        self.pending_midi.lock().push(MidiMessage {
            status,
            data1: note,
            data2: velocity,
            frame_index: 0,
        });
    }
}
impl Drop for Engine {
    /// Closes down the stream gracefully.
    fn drop(&mut self) {
        self.stop_stream();
    }
}
