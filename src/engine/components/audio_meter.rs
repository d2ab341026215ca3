use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::engine::utils::AtomicF32;
use crate::engine::CHANNELS;

/// Multiplier applied to the held peak on each block without a new peak.
pub const PEAK_DECAY: f32 = 0.95;

/// Peak-hold meter with a fixed multiplicative decay.
///
/// Lives with the track on the audio thread. [`PeakMeterReader`]s can be handed out to anywhere else.
#[derive(Debug)]
pub struct PeakMeter {
    peaks: Arc<[AtomicF32; CHANNELS]>,
}
impl PeakMeter {
    pub fn new() -> Self {
        Self {
            peaks: Arc::new([AtomicF32::new(0.0), AtomicF32::new(0.0)]),
        }
    }

    /// Sync the peak of a new block, per channel.
    pub fn report(&self, block_peaks: [f32; CHANNELS]) {
        for (peak, block_peak) in self.peaks.iter().zip(block_peaks) {
            let old = peak.load(Ordering::Relaxed);
            peak.store(block_peak.max(old * PEAK_DECAY), Ordering::Relaxed);
        }
    }

    pub fn reset(&self) {
        for peak in self.peaks.iter() {
            peak.store(0.0, Ordering::Relaxed);
        }
    }

    /// `[left, right]`
    pub fn read(&self) -> [f32; CHANNELS] {
        read(&self.peaks)
    }

    pub fn reader(&self) -> PeakMeterReader {
        PeakMeterReader {
            peaks: Arc::clone(&self.peaks),
        }
    }
}
impl Default for PeakMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock-free view of a [`PeakMeter`].
#[derive(Debug, Clone)]
pub struct PeakMeterReader {
    peaks: Arc<[AtomicF32; CHANNELS]>,
}
impl PeakMeterReader {
    /// `[left, right]`
    pub fn read(&self) -> [f32; CHANNELS] {
        read(&self.peaks)
    }
}

fn read(peaks: &[AtomicF32; CHANNELS]) -> [f32; CHANNELS] {
    [
        peaks[0].load(Ordering::Relaxed),
        peaks[1].load(Ordering::Relaxed),
    ]
}
