use std::{fs, io};

/// Records everything the engine outputs, for debugging.
pub struct WavRecorder {
    writer: hound::WavWriter<io::BufWriter<fs::File>>,
}

impl WavRecorder {
    pub fn new(channels: u16, sample_rate: u32) -> Result<Self, hound::Error> {
        const PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/recorded.wav");

        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };

        Ok(WavRecorder {
            writer: hound::WavWriter::create(PATH, spec)?,
        })
    }

    pub fn record(&mut self, buffer: &[f32]) {
        for sample in buffer {
            if let Err(e) = self.writer.write_sample(*sample) {
                log::error!("Failed to record output: {e}");
                return;
            }
        }
    }
}
