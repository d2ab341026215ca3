pub use super::{
    config::{DeviceUnavailableError, HostUnavailableError, InvalidConfigError},
    import::ImportError,
    project::{InvalidTrackError, ProjectFileError, RenderError},
    utils::key_generator::{InvalidKeyError, OverflowError},
};
