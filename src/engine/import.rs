//! Decoding of audio and Standard MIDI files into clip data.

mod audio;
mod midi;

use std::path::PathBuf;

use thiserror::Error;

pub use audio::{decode_audio_file, decode_wav, DecodedAudio};
pub use midi::{parse_smf, read_smf, SmfContents};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file: {0}")]
    InvalidFormat(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Decode error: {0}")]
    Decode(String),
}
