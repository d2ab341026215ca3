use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use symphonia::core::{
    audio::SampleBuffer, codecs::DecoderOptions, errors::Error as SymphoniaError,
    formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};

use super::ImportError;
use crate::engine::Sample;

/// Interleaved audio, as read from a file.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<Sample>,
    pub channels: usize,
    pub sample_rate: f64,
}
impl DecodedAudio {
    /// Number of frames (samples per channel).
    pub fn frames(&self) -> u64 {
        if self.channels == 0 {
            0
        } else {
            (self.samples.len() / self.channels) as u64
        }
    }
}

/// Decode an audio file into memory.
///
/// `.wav` files are read directly, anything else goes through symphonia's probe.
pub fn decode_audio_file(path: &Path) -> Result<DecodedAudio, ImportError> {
    let file = File::open(path).map_err(|_| ImportError::FileNotFound(path.to_path_buf()))?;

    let is_wav = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("wav") || e.eq_ignore_ascii_case("wave"))
        .unwrap_or(false);

    if is_wav {
        decode_wav(BufReader::new(file))
    } else {
        decode_with_symphonia(file, path)
    }
}

/// Decode a RIFF/WAVE stream.
///
/// PCM at 8, 16 and 24 bits and IEEE float at 32 bits are supported.
/// Chunks other than `fmt ` and `data` are skipped, and reading stops at the first `data` chunk.
pub fn decode_wav<R: Read>(reader: R) -> Result<DecodedAudio, ImportError> {
    let mut reader = hound::WavReader::new(reader).map_err(map_hound_error)?;
    let spec = reader.spec();

    let samples = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 8) => read_int(&mut reader, 128.0)?,
        (hound::SampleFormat::Int, 16) => read_int(&mut reader, 32_768.0)?,
        (hound::SampleFormat::Int, 24) => read_int(&mut reader, 8_388_608.0)?,
        (hound::SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_hound_error)?,
        (hound::SampleFormat::Int, bits) => {
            return Err(ImportError::UnsupportedFormat(format!(
                "PCM bit depth {bits}"
            )))
        }
        (hound::SampleFormat::Float, bits) => {
            return Err(ImportError::UnsupportedFormat(format!(
                "float bit depth {bits}"
            )))
        }
    };

    Ok(DecodedAudio {
        samples,
        channels: usize::from(spec.channels),
        sample_rate: f64::from(spec.sample_rate),
    })
}

fn read_int<R: Read>(
    reader: &mut hound::WavReader<R>,
    scale: f32,
) -> Result<Vec<Sample>, ImportError> {
    reader
        .samples::<i32>()
        .map(|s| s.map(|v| v as f32 / scale))
        .collect::<Result<Vec<_>, _>>()
        .map_err(map_hound_error)
}

fn map_hound_error(e: hound::Error) -> ImportError {
    match e {
        hound::Error::IoError(e) => ImportError::Io(e),
        hound::Error::FormatError(msg) => ImportError::InvalidFormat(msg.to_owned()),
        hound::Error::Unsupported => {
            ImportError::UnsupportedFormat("WAV format type".to_owned())
        }
        other => ImportError::InvalidFormat(other.to_string()),
    }
}

fn decode_with_symphonia(file: File, path: &Path) -> Result<DecodedAudio, ImportError> {
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| ImportError::UnsupportedFormat(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| ImportError::InvalidFormat("No default track".to_owned()))?;
    let track_id = track.id;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| ImportError::UnsupportedFormat(e.to_string()))?;

    let mut samples = Vec::new();
    let mut channels = 0;
    let mut sample_rate = 0;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(_)) => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(ImportError::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                channels = spec.channels.count();
                sample_rate = spec.rate;

                let mut buffer = SampleBuffer::<Sample>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
            // Corrupt packets are skipped
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(ImportError::Decode(e.to_string())),
        }
    }

    if channels == 0 {
        return Err(ImportError::InvalidFormat("No audio data".to_owned()));
    }

    Ok(DecodedAudio {
        samples,
        channels,
        sample_rate: f64::from(sample_rate),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn wav_bytes(spec: hound::WavSpec, write: impl FnOnce(&mut hound::WavWriter<Cursor<&mut Vec<u8>>>)) -> Vec<u8> {
        let mut bytes = Vec::new();
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
            write(&mut writer);
            writer.finalize().unwrap();
        }
        bytes
    }

    #[test]
    fn sixteen_bit_pcm() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let bytes = wav_bytes(spec, |w| {
            w.write_sample(16_384i16).unwrap();
            w.write_sample(-32_768i16).unwrap();
        });

        let decoded = decode_wav(Cursor::new(bytes)).unwrap();
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.sample_rate, 44_100.0);
        assert_eq!(decoded.samples, vec![0.5, -1.0]);
        assert_eq!(decoded.frames(), 1);
    }

    #[test]
    fn twenty_four_bit_pcm() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48_000,
            bits_per_sample: 24,
            sample_format: hound::SampleFormat::Int,
        };
        let bytes = wav_bytes(spec, |w| {
            w.write_sample(-4_194_304i32).unwrap();
        });
        let decoded = decode_wav(Cursor::new(bytes)).unwrap();
        assert_eq!(decoded.samples, vec![-0.5]);
    }

    #[test]
    fn float_pcm() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let bytes = wav_bytes(spec, |w| {
            w.write_sample(0.125f32).unwrap();
        });
        assert_eq!(decode_wav(Cursor::new(bytes)).unwrap().samples, vec![0.125]);
    }

    #[test]
    fn thirty_two_bit_pcm_is_unsupported() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Int,
        };
        let bytes = wav_bytes(spec, |w| {
            w.write_sample(1i32).unwrap();
        });
        assert!(matches!(
            decode_wav(Cursor::new(bytes)),
            Err(ImportError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn bad_magic() {
        let bytes = b"RIFX\0\0\0\0WAVE".to_vec();
        assert!(decode_wav(Cursor::new(bytes)).is_err());
    }

    #[test]
    fn missing_file() {
        let result = decode_audio_file(Path::new("/definitely/not/here.wav"));
        assert!(matches!(result, Err(ImportError::FileNotFound(_))));
    }
}
