use std::fmt::Display;
use std::ops::RangeInclusive;

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const PREFERRED_SAMPLE_RATE: u32 = 48_000;
const PREFERRED_BUFFER_SIZE: u32 = 512;

/// Where and how the live engine outputs.
#[derive(Debug, Clone)]
pub struct Config {
    pub output_device: OutputDevice,
    pub output_config: OutputConfig,
}
impl Config {
    /// The default device of the default host, in its preferred configuration.
    pub fn default_output() -> Result<Self, InvalidConfigError> {
        let host = Host::default();
        let output_device = host
            .default_output_device()?
            .ok_or(InvalidConfigError::NoDevice)?;
        let output_config = output_device.default_config_range()?.default_config();
        Ok(Self {
            output_device,
            output_config,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub channels: u16,
    pub sample_format: SampleFormat,
    pub sample_rate: u32,

    /// Buffer size in frames.
    /// If `None`, the default buffer size is used.
    pub buffer_size: Option<u32>,
}
impl OutputConfig {
    pub(crate) fn stream_config(&self) -> cpal::StreamConfig {
        cpal::StreamConfig {
            channels: self.channels,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: match self.buffer_size {
                Some(size) => cpal::BufferSize::Fixed(size),
                None => cpal::BufferSize::Default,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    name: String,
}
impl Host {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn available() -> impl Iterator<Item = Host> {
        cpal::available_hosts().into_iter().map(|id| Host {
            name: id.name().into(),
        })
    }

    pub fn output_devices(&self) -> Result<Vec<OutputDevice>, HostUnavailableError> {
        let devices = self.raw()?.output_devices().map_err(|e| {
            log::warn!("Failed to list output devices of '{}': {e}", self.name);
            self.unavailable()
        })?;
        Ok(devices
            .filter_map(|device| device.name().ok())
            .map(|name| OutputDevice {
                host: self.clone(),
                name,
            })
            .collect())
    }

    pub fn default_output_device(&self) -> Result<Option<OutputDevice>, HostUnavailableError> {
        Ok(self
            .raw()?
            .default_output_device()
            .and_then(|device| device.name().ok())
            .map(|name| OutputDevice {
                host: self.clone(),
                name,
            }))
    }

    fn unavailable(&self) -> HostUnavailableError {
        HostUnavailableError {
            name: self.name.clone(),
        }
    }

    pub(crate) fn raw(&self) -> Result<cpal::Host, HostUnavailableError> {
        let id = cpal::available_hosts()
            .into_iter()
            .find(|host| host.name() == self.name)
            .ok_or_else(|| self.unavailable())?;

        cpal::host_from_id(id).map_err(|cpal::HostUnavailable| self.unavailable())
    }
}
impl Default for Host {
    fn default() -> Self {
        Self {
            name: cpal::default_host().id().name().into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDevice {
    host: Host,
    name: String,
}
impl OutputDevice {
    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every configuration range the device supports in a sample format the engine can output.
    pub fn supported_config_ranges(&self) -> Result<Vec<OutputConfigRange>, DeviceUnavailableError> {
        let configs = self
            .raw()?
            .supported_output_configs()
            .map_err(|_| self.unavailable())?;
        Ok(configs
            .filter_map(|config| {
                let sample_format = SampleFormat::try_from(config.sample_format()).ok()?;
                let buffer_size = match config.buffer_size() {
                    cpal::SupportedBufferSize::Range { min, max } => Some((*min)..=(*max)),
                    cpal::SupportedBufferSize::Unknown => None,
                };
                Some(OutputConfigRange {
                    channels: config.channels(),
                    sample_format,
                    sample_rate: config.min_sample_rate().0..=config.max_sample_rate().0,
                    buffer_size,
                })
            })
            .collect())
    }

    pub fn default_config_range(&self) -> Result<OutputConfigRange, InvalidConfigError> {
        let config = self
            .raw()?
            .default_output_config()
            .map_err(|e| InvalidConfigError::Unsupported(e.to_string()))?;
        let sample_format = SampleFormat::try_from(config.sample_format())?;
        let sample_rate = config.sample_rate().0..=config.sample_rate().0;
        let buffer_size = match config.buffer_size() {
            cpal::SupportedBufferSize::Unknown => None,

            // Some backends report the full range when they mean unknown
            cpal::SupportedBufferSize::Range {
                min: u32::MIN,
                max: u32::MAX,
            } => None,

            cpal::SupportedBufferSize::Range { min, max } => Some((*min)..=(*max)),
        };
        Ok(OutputConfigRange {
            channels: config.channels(),
            sample_format,
            sample_rate,
            buffer_size,
        })
    }

    fn unavailable(&self) -> DeviceUnavailableError {
        DeviceUnavailableError::DeviceUnavailable(self.name.clone())
    }

    pub(crate) fn raw(&self) -> Result<cpal::Device, DeviceUnavailableError> {
        let host = self
            .host
            .raw()
            .map_err(|e| DeviceUnavailableError::HostUnavailable(e.name))?;

        host.output_devices()
            .map_err(|_| self.unavailable())?
            .find(|device| device.name().map(|name| name == self.name).unwrap_or(false))
            .ok_or_else(|| self.unavailable())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfigRange {
    channels: u16,
    sample_format: SampleFormat,
    sample_rate: RangeInclusive<u32>,
    buffer_size: Option<RangeInclusive<u32>>,
}
impl OutputConfigRange {
    pub fn channels(&self) -> u16 {
        self.channels
    }
    pub fn sample_format(&self) -> SampleFormat {
        self.sample_format
    }
    pub fn sample_rate(&self) -> &RangeInclusive<u32> {
        &self.sample_rate
    }
    pub fn buffer_size(&self) -> Option<&RangeInclusive<u32>> {
        self.buffer_size.as_ref()
    }

    /// The preferred sample rate and buffer size, as close as the range allows.
    pub fn default_config(&self) -> OutputConfig {
        let sample_rate =
            PREFERRED_SAMPLE_RATE.clamp(*self.sample_rate.start(), *self.sample_rate.end());

        let buffer_size = self
            .buffer_size
            .as_ref()
            .map(|range| PREFERRED_BUFFER_SIZE.clamp(*range.start(), *range.end()));

        OutputConfig {
            channels: self.channels,
            sample_format: self.sample_format,
            sample_rate,
            buffer_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}
impl Display for SampleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleFormat::I8 => write!(f, "8-bit"),
            SampleFormat::I16 => write!(f, "16-bit"),
            SampleFormat::I32 => write!(f, "32-bit"),
            SampleFormat::I64 => write!(f, "64-bit"),
            SampleFormat::U8 => write!(f, "8-bit unsigned"),
            SampleFormat::U16 => write!(f, "16-bit unsigned"),
            SampleFormat::U32 => write!(f, "32-bit unsigned"),
            SampleFormat::U64 => write!(f, "64-bit unsigned"),
            SampleFormat::F32 => write!(f, "32-bit floating point"),
            SampleFormat::F64 => write!(f, "64-bit floating point"),
        }
    }
}
impl TryFrom<cpal::SampleFormat> for SampleFormat {
    type Error = InvalidConfigError;

    fn try_from(sample_format: cpal::SampleFormat) -> Result<Self, Self::Error> {
        Ok(match sample_format {
            cpal::SampleFormat::I8 => Self::I8,
            cpal::SampleFormat::I16 => Self::I16,
            cpal::SampleFormat::I32 => Self::I32,
            cpal::SampleFormat::I64 => Self::I64,
            cpal::SampleFormat::U8 => Self::U8,
            cpal::SampleFormat::U16 => Self::U16,
            cpal::SampleFormat::U32 => Self::U32,
            cpal::SampleFormat::U64 => Self::U64,
            cpal::SampleFormat::F32 => Self::F32,
            cpal::SampleFormat::F64 => Self::F64,
            other => {
                return Err(InvalidConfigError::Unsupported(format!(
                    "Sample format {other}"
                )))
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Host '{name}' is not available")]
pub struct HostUnavailableError {
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceUnavailableError {
    #[error("Host '{0}' is not available")]
    HostUnavailable(String),
    #[error("Device '{0}' is not available")]
    DeviceUnavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidConfigError {
    #[error("No output device available")]
    NoDevice,

    #[error(transparent)]
    HostUnavailable(#[from] HostUnavailableError),

    #[error(transparent)]
    DeviceUnavailable(#[from] DeviceUnavailableError),

    #[error("Unsupported configuration: {0}")]
    Unsupported(String),

    #[error("Failed to start stream: {0}")]
    Stream(String),
}
