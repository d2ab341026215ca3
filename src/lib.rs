#[cfg(feature = "record_output")]
mod wav_recorder;

mod engine;
pub use engine::{
    components, config, error, import, persist, processor, project, transport, Engine, Sample,
    CHANNELS,
};

pub use engine::components::{
    AudioClip, AutomationCurve, AutomationPoint, Clip, ClipKey, MidiClip, MidiNote, Track,
    TrackKey, WarpMode,
};
pub use engine::processor::{AudioProcessor, MidiMessage, Parameter, ProcessContext, ProcessorRegistry};
pub use engine::project::{Project, ProjectSnapshot, RenderSettings};
pub use engine::transport::Transport;
