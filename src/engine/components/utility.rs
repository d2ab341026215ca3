use crate::engine::processor::{AudioProcessor, MidiMessage, Parameter, ProcessContext};
use crate::engine::utils::db_to_gain;
use crate::engine::Sample;

const GAIN: usize = 0;
const INVERT: usize = 1;

/// Gain stage with polarity flip.
#[derive(Debug)]
pub struct Utility {
    parameters: [Parameter; 2],
}
impl Default for Utility {
    fn default() -> Self {
        Self::new()
    }
}
impl Utility {
    pub const ID: &'static str = "Utility";

    pub fn new() -> Self {
        Self {
            parameters: [
                Parameter::new("Gain dB", 0.0, -60.0, 24.0),
                Parameter::new("Invert", 0.0, 0.0, 1.0),
            ],
        }
    }
}

impl AudioProcessor for Utility {
    fn name(&self) -> &str {
        "Utility"
    }
    fn processor_id(&self) -> &str {
        Self::ID
    }

    fn prepare_to_play(&mut self, _sample_rate: f64) {}

    fn process(
        &mut self,
        buffer: &mut [Sample],
        frames: usize,
        channels: usize,
        _midi: &mut Vec<MidiMessage>,
        _context: &ProcessContext,
    ) {
        let mut gain = db_to_gain(self.parameters[GAIN].value);
        if self.parameters[INVERT].value >= 0.5 {
            gain = -gain;
        }
        for sample in buffer.iter_mut().take(frames * channels) {
            *sample *= gain;
        }
    }

    fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }
    fn parameters_mut(&mut self) -> &mut [Parameter] {
        &mut self.parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn run(utility: &mut Utility, input: &[Sample]) -> Vec<Sample> {
        let mut buffer = input.to_vec();
        utility.process(
            &mut buffer,
            input.len() / 2,
            2,
            &mut Vec::new(),
            &ProcessContext::default(),
        );
        buffer
    }

    #[test]
    fn unity_by_default() {
        assert_eq!(run(&mut Utility::new(), &[0.5, -0.25]), vec![0.5, -0.25]);
    }

    #[test]
    fn gain_in_decibels() {
        let mut utility = Utility::new();
        utility.parameters_mut()[GAIN].set(-6.0);
        let out = run(&mut utility, &[1.0, 1.0]);
        assert_relative_eq!(out[0], 0.501_187, epsilon = 1e-5);
    }

    #[test]
    fn invert_flips_polarity() {
        let mut utility = Utility::new();
        utility.parameters_mut()[INVERT].set(1.0);
        assert_eq!(run(&mut utility, &[0.5, -0.25]), vec![-0.5, 0.25]);
    }
}
